//! `CmdTask` — runs an external program and streams its output to a log sink.

use std::io::{BufRead, BufReader};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, ValidationError};
use crate::job::{Job, LineSink};

pub const TYPE_TAG: &str = "CmdTask";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CmdTask {
    pub cmd: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory for the child process; current directory if absent.
    #[serde(default)]
    pub start_in: Option<String>,
    /// Maximum time the job may run, in milliseconds; no limit if absent/zero.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

pub fn decode(serialized: &str) -> Result<Box<dyn Job>, DecodeError> {
    let task: CmdTask = serde_json::from_str(serialized)?;
    Ok(Box::new(task))
}

/// Look up `cmd` on `PATH`, the way `exec.LookPath` does: an absolute or
/// relative path with a separator is checked directly, otherwise every `PATH`
/// entry is tried in order.
fn resolve_on_path(cmd: &str) -> bool {
    if cmd.contains(std::path::MAIN_SEPARATOR) {
        return std::fs::metadata(cmd).is_ok();
    }
    let Some(path) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path).any(|dir| std::fs::metadata(dir.join(cmd)).is_ok())
}

impl Job for CmdTask {
    fn job_type(&self) -> &'static str {
        TYPE_TAG
    }

    fn check_valid(&self) -> Result<(), ValidationError> {
        if self.cmd.trim().is_empty() {
            return Err(ValidationError::new("cmd empty"));
        }
        if !resolve_on_path(&self.cmd) {
            return Err(ValidationError::new(format!("{} not found", self.cmd)));
        }
        Ok(())
    }

    fn run(&self, sink: &dyn LineSink) -> (bool, String) {
        let mut command = Command::new(&self.cmd);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.start_in {
            command.current_dir(dir);
        }

        let start = Instant::now();
        sink.write_line(&format!("Start {} {}", self.cmd, self.args.join(" ")));

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                sink.write_line(&format!("Command Error {}: {}", self.cmd, e));
                return (false, e.to_string());
            }
        };

        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");
        let timed_out = AtomicBool::new(false);
        let pid = child.id();

        std::thread::scope(|scope| {
            scope.spawn(|| forward_lines(stdout, sink));
            scope.spawn(|| forward_lines(stderr, sink));
            if let Some(ms) = self.timeout_ms.filter(|ms| *ms > 0) {
                scope.spawn(|| {
                    std::thread::sleep(Duration::from_millis(ms));
                    if !timed_out.swap(true, Ordering::SeqCst) {
                        kill_pid(pid);
                    }
                });
            }
        });
        // Reader/watcher threads above are all joined by the time the scope
        // returns; only now is it safe to wait on the child without racing
        // the watcher's kill.
        let status = child.wait();

        let duration = start.elapsed();
        match status {
            Ok(status) if timed_out.load(Ordering::SeqCst) => {
                sink.write_line(&format!(
                    "TIMEOUT ({:?}) {} {}, duration={:?}",
                    self.timeout_ms, self.cmd, self.args.join(" "), duration
                ));
                let _ = status;
                (false, "timeout".to_string())
            }
            Ok(status) if status.success() => {
                sink.write_line(&format!(
                    "Terminated {} {}, duration={:?}",
                    self.cmd,
                    self.args.join(" "),
                    duration
                ));
                (true, String::new())
            }
            Ok(status) => {
                let info = match status.code() {
                    Some(code) => format!("exit code = {code}"),
                    None => "terminated by signal".to_string(),
                };
                sink.write_line(&format!(
                    "Terminated with error {} {}, duration={:?}",
                    info,
                    self.cmd,
                    duration
                ));
                (false, info)
            }
            Err(e) => {
                sink.write_line(&format!("Command Error {}: {}", self.cmd, e));
                (false, e.to_string())
            }
        }
    }

    fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Reads lines from a child's pipe and forwards each to the sink.
fn forward_lines<R: std::io::Read>(reader: R, sink: &dyn LineSink) {
    let reader = BufReader::new(reader);
    for line in reader.lines().map_while(Result::ok) {
        sink.write_line(&line);
    }
}

#[cfg(unix)]
fn kill_pid(pid: u32) {
    unsafe {
        libc::kill(pid as i32, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_pid(_pid: u32) {}
