//! The log group registry: named, line-oriented, size-rotated sinks.
//!
//! Rotation is size-based (`max_size_mb`) with numbered backups
//! (`agent.log`, `agent.log.1`, `agent.log.2`, ...) capped at `max_backups`,
//! mirroring the original's `lumberjack.Logger{MaxSize, MaxBackups}` —
//! `tracing_appender`'s own rolling writer only rotates on a time interval
//! (minutely/hourly/daily/never), so it can't express this, and `RotatingWriter`
//! below does the rotation itself. `compress` is accepted in configuration for
//! forward compatibility but is not implemented: rotated backups are kept as
//! plain text. The agent's own group (name `""`, internal diagnostics) always
//! additionally mirrors to stdout, so operators can `journalctl`/pipe the
//! process output even with file logging misconfigured; job log groups write
//! to file only.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_appender::non_blocking::WorkerGuard;

use crate::config::LogStoreConfig;
use crate::job::LineSink;
use crate::task::DEFAULT_LOG_GROUP;

/// A file writer that rotates itself to `<path>.1`, `<path>.2`, ... once the
/// current file would exceed `max_bytes`, keeping at most `max_backups` of
/// them (oldest dropped).
struct RotatingWriter {
    path: PathBuf,
    max_bytes: u64,
    max_backups: usize,
    file: File,
    written: u64,
}

impl RotatingWriter {
    fn open(path: PathBuf, max_size_mb: u32, max_backups: u32) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(RotatingWriter {
            path,
            max_bytes: u64::from(max_size_mb) * 1024 * 1024,
            max_backups: max_backups as usize,
            file,
            written,
        })
    }

    fn backup_path(&self, n: usize) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        for n in (1..self.max_backups).rev() {
            let from = self.backup_path(n);
            if from.exists() {
                std::fs::rename(&from, self.backup_path(n + 1))?;
            }
        }
        if self.max_backups > 0 {
            std::fs::rename(&self.path, self.backup_path(1))?;
        } else {
            std::fs::remove_file(&self.path)?;
        }
        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.max_bytes > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

struct Group {
    writer: Mutex<RotatingWriter>,
    mirror_stdout: bool,
}

/// Resolves group names to line sinks. Built once at startup from the loaded
/// configuration; groups are never created after that point, only looked up.
pub struct LogRegistry {
    groups: HashMap<String, Group>,
}

impl LogRegistry {
    /// `log_std` backs the internal group (name `""`); `log_groups` backs
    /// every named job group and must already contain `"_default_"`.
    pub fn init(
        log_std: &LogStoreConfig,
        log_groups: &HashMap<String, LogStoreConfig>,
    ) -> anyhow::Result<Self> {
        let mut groups = HashMap::new();
        groups.insert(String::new(), open_group(log_std, true)?);
        for (name, cfg) in log_groups {
            groups.insert(name.clone(), open_group(cfg, false)?);
        }
        Ok(LogRegistry { groups })
    }

    /// True for the internal group, `"_default_"`, or any configured group.
    pub fn name_exists(&self, name: &str) -> bool {
        name.is_empty() || name == DEFAULT_LOG_GROUP || self.groups.contains_key(name)
    }

    /// Resolves `name`, falling back to `"_default_"` if `name` isn't a known
    /// group at lookup time (admission already checked `name_exists`, but a
    /// group's backing sink is only ever looked up here, never created).
    pub fn sink_for(&self, name: &str) -> GroupSink<'_> {
        let group = self
            .groups
            .get(name)
            .or_else(|| self.groups.get(DEFAULT_LOG_GROUP))
            .expect("_default_ group always present");
        GroupSink { group }
    }
}

fn open_group(cfg: &LogStoreConfig, mirror_stdout: bool) -> anyhow::Result<Group> {
    std::fs::create_dir_all(&cfg.log_folder)?;
    let writer = RotatingWriter::open(cfg.log_folder.join("agent.log"), cfg.max_size_mb, cfg.max_backups)?;
    Ok(Group {
        writer: Mutex::new(writer),
        mirror_stdout,
    })
}

pub struct GroupSink<'a> {
    group: &'a Group,
}

impl LineSink for GroupSink<'_> {
    fn write_line(&self, line: &str) {
        if self.group.mirror_stdout {
            println!("{line}");
        }
        let mut writer = self.group.writer.lock().unwrap();
        let _ = writeln!(writer, "{line}");
    }
}

/// Installs the global `tracing` subscriber, writing to stdout plus the
/// internal log group's rotating file. Returns the worker guard that must
/// stay alive for the process lifetime.
pub fn install_tracing(log_std: &LogStoreConfig) -> anyhow::Result<WorkerGuard> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    std::fs::create_dir_all(&log_std.log_folder)?;
    let writer = RotatingWriter::open(
        log_std.log_folder.join("cmdagentd.log"),
        log_std.max_size_mb,
        log_std.max_backups,
    )?;
    let (non_blocking, guard) = tracing_appender::non_blocking(writer);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout))
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogStoreConfig;

    fn store(dir: &std::path::Path) -> LogStoreConfig {
        LogStoreConfig {
            max_size_mb: 10,
            max_backups: 3,
            compress: false,
            log_folder: dir.to_path_buf(),
        }
    }

    #[test]
    fn default_group_always_exists() {
        let dir = tempfile::tempdir().unwrap();
        let mut groups = HashMap::new();
        groups.insert(DEFAULT_LOG_GROUP.to_string(), store(dir.path()));
        let registry = LogRegistry::init(&store(dir.path()), &groups).unwrap();
        assert!(registry.name_exists(DEFAULT_LOG_GROUP));
        assert!(registry.name_exists(""));
        assert!(!registry.name_exists("nonexistent"));
    }

    #[test]
    fn unknown_group_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let mut groups = HashMap::new();
        groups.insert(DEFAULT_LOG_GROUP.to_string(), store(dir.path()));
        let registry = LogRegistry::init(&store(dir.path()), &groups).unwrap();
        let sink = registry.sink_for("nonexistent");
        sink.write_line("hello");
    }

    #[test]
    fn writer_rotates_once_max_size_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.log");
        let mut writer = RotatingWriter::open(path.clone(), 0, 2).unwrap();
        // max_size_mb=0 disables size rotation; force a tiny byte budget
        // directly to exercise rotation deterministically.
        writer.max_bytes = 8;

        writer.write_all(b"12345678").unwrap();
        assert!(!writer.backup_path(1).exists());

        writer.write_all(b"more").unwrap();
        assert!(writer.backup_path(1).exists());
        let rotated = std::fs::read_to_string(writer.backup_path(1)).unwrap();
        assert_eq!(rotated, "12345678");
        let current = std::fs::read_to_string(&path).unwrap();
        assert_eq!(current, "more");
    }

    #[test]
    fn writer_caps_backups_at_max_backups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.log");
        let mut writer = RotatingWriter::open(path, 0, 2).unwrap();
        writer.max_bytes = 4;

        for _ in 0..5 {
            writer.write_all(b"abcd").unwrap();
        }

        assert!(writer.backup_path(1).exists());
        assert!(writer.backup_path(2).exists());
        assert!(!writer.backup_path(3).exists());
    }
}
