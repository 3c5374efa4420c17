//! `server`：完整控制器进程。

use chrono::{DateTime, Utc};
use clap::Parser;
use mc_config::ServerConfig;
use mc_telemetry::init_tracing;
use mycontroller::cli::{ServerCli, ServerCommand, export_env, export_timezone, log_settings};
use mycontroller::web::{self, WebState};
use mycontroller::{ServerRuntime, ShutdownSignal, VersionInfo};
use std::process::ExitCode;
use tracing::{info, warn};

fn main() -> ExitCode {
    let cli = ServerCli::parse();
    let result = match cli.command {
        Some(ServerCommand::Version) => print_version(),
        Some(ServerCommand::Config) => {
            print!("{}", ServerConfig::default_yaml());
            Ok(())
        }
        None => run(&cli),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("server: {err}");
            ExitCode::from(1)
        }
    }
}

fn print_version() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", VersionInfo::current().to_json()?);
    Ok(())
}

fn run(cli: &ServerCli) -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在）
    dotenvy::dotenv().ok();
    let config = ServerConfig::load(&cli.config)?;
    let running_since = Utc::now();
    // 环境变量须在运行时线程创建前写入
    export_env(&config.exported_env(running_since));
    export_timezone(&config.system.timezone);
    init_tracing(&log_settings(&config.logger));
    info!(
        target: "mc.runtime",
        config = %cli.config.display(),
        version = mycontroller::VERSION,
        "server_starting"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(config, running_since))
}

async fn serve(
    config: ServerConfig,
    running_since: DateTime<Utc>,
) -> Result<(), Box<dyn std::error::Error>> {
    let server = ServerRuntime::start(&config).await?;
    let signal = ShutdownSignal::listen(server.bus())?;

    // 健康检查接口
    let http = if config.web.http.enabled {
        let app = web::router(WebState {
            component: "server",
            running_since,
        });
        Some(web::serve(&config.web.http.addr(), app, signal.token()).await?)
    } else {
        None
    };

    signal.wait().await;
    if let Some(handle) = http {
        if let Err(err) = handle.await {
            warn!(target: "mc.web", error = %err, "http_server_join_failed");
        }
    }
    server.shutdown().await;
    Ok(())
}
