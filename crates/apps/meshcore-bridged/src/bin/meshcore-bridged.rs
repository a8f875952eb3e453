#[path = "meshcore-bridged/bootstrap.rs"]
mod bootstrap;

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "meshcore-bridged")]
struct Args {
    /// TOML settings file, polled for changes. Without it the bridge is
    /// configured from SERIAL_* and MQTT_* environment variables.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, short)]
    verbose: bool,
    #[arg(long, default_value_t = 30)]
    stats_interval_secs: u64,
    #[arg(long, default_value_t = 10)]
    config_check_interval_secs: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let context = bootstrap::bootstrap(&args)?;
    bootstrap::run(context).await;
    Ok(())
}
