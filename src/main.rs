//! cmdagentd — entry point.
//!
//! Loads configuration, opens the log registry and the task queue, then runs
//! the dispatcher loop and the HTTP(S) server concurrently until killed.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use cmdagent::api;
use cmdagent::config::AppConfig;
use cmdagent::dispatcher;
use cmdagent::logging::{self, LogRegistry};
use cmdagent::queue::Queue;

#[derive(Debug, Parser)]
#[command(name = "cmdagentd")]
#[command(about = "Host-resident task agent daemon", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let _cli = Cli::parse();

    let exe = std::env::current_exe().context("resolve executable path")?;
    let exe_dir = exe
        .parent()
        .ok_or_else(|| anyhow::anyhow!("executable has no parent directory"))?;

    let config = AppConfig::load(exe_dir).context("load configuration")?;
    let _tracing_guard = logging::install_tracing(&config.log_std).context("install tracing")?;

    tracing::info!(port = config.listen_port, no_tls = config.no_tls, "starting cmdagentd");

    let logs = Arc::new(LogRegistry::init(&config.log_std, &config.log_groups).context("open log groups")?);
    let queue = Arc::new(Queue::init().context("open task queue")?);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build async runtime")?;

    runtime.block_on(async move {
        let dispatcher_handle = tokio::spawn(dispatcher::run(queue.clone(), logs.clone()));
        let server_result = api::serve(&config, queue.clone(), logs.clone()).await;
        dispatcher_handle.abort();
        server_result
    })
}
