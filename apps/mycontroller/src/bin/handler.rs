//! `handler`：独立处理器服务进程。

use clap::Parser;
use mc_config::{DEFAULT_HANDLER_CONFIG_FILE, HandlerServiceConfig};
use mc_telemetry::init_tracing;
use mycontroller::cli::{ComponentCli, ComponentCommand, log_settings};
use mycontroller::{HandlerRuntime, ShutdownSignal, VersionInfo};
use std::process::ExitCode;
use tracing::info;

fn main() -> ExitCode {
    let cli = ComponentCli::parse();
    let result = match cli.command {
        Some(ComponentCommand::Version) => print_version(),
        None => run(&cli),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("handler: {err}");
            ExitCode::from(1)
        }
    }
}

fn print_version() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", VersionInfo::current().to_json()?);
    Ok(())
}

fn run(cli: &ComponentCli) -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let path = cli.config_path(DEFAULT_HANDLER_CONFIG_FILE);
    let config = HandlerServiceConfig::load(&path)?;
    init_tracing(&log_settings(&config.logger));
    info!(target: "mc.runtime", config = %path.display(), "handler_service_starting");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        let handler = HandlerRuntime::start(&config).await?;
        let signal = ShutdownSignal::listen(handler.bus())?;
        signal.wait().await;
        handler.shutdown().await;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
