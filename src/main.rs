use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use chatpeek::control::DEFAULT_CONTROL_ADDR;
use chatpeek::RunOptions;

/// Follows the newest assistant answer in a running Chromium chat tab.
#[derive(Parser, Debug)]
#[command(name = "chatpeek", version, about)]
struct Cli {
    /// DevTools endpoint, e.g. http://127.0.0.1:9222. Discovered from
    /// running browser processes when absent.
    #[arg(long, env = "CHATPEEK_ENDPOINT")]
    endpoint: Option<String>,

    /// Probe this debug port instead of scanning for one.
    #[arg(long)]
    port: Option<u16>,

    /// Address for the JSON-lines control listener.
    #[arg(long, default_value = DEFAULT_CONTROL_ADDR)]
    control_addr: String,

    /// Settings file path (defaults to the user config directory).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Scan once, print a JSON summary, and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    chatpeek::run(RunOptions {
        endpoint: cli.endpoint,
        port: cli.port,
        control_addr: Some(cli.control_addr),
        settings_path: cli.settings,
        once: cli.once,
    })
    .await
}
