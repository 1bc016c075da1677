use anyhow::{Context, Result};
use env_logger::{Builder, Env, Target};
use log::{debug, error, info};
use netmode::{
    config::AppConfig,
    services::{
        mode::{AccessPointRequest, InterfaceRequest, ModeOrchestrator},
        wpa::WpaNetwork,
    },
    system::{IpLink, LocalFileSystem, ProcessExecutor, Systemctl},
};
use serde::{Deserialize, Serialize};
use std::{env, io::Write, process::ExitCode};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

/// Exit code of a transition that completed with failed steps
const EXIT_PARTIAL: u8 = 2;

/// One invocation of the binary, read as JSON from the first argument or stdin
#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase", rename_all_fields = "camelCase")]
enum CommandRequest {
    Apply {
        interface: String,
        request: InterfaceRequest,
    },
    EnterAccessPoint {
        interface: String,
        access_point: AccessPointRequest,
    },
    EnterStation {
        interface: String,
        network: WpaNetwork,
        country: Option<String>,
    },
    StopAccessPoint {
        interface: String,
    },
    Status {
        interface: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    log_panics::init();

    let mut builder = if cfg!(debug_assertions) {
        Builder::from_env(Env::default().default_filter_or("debug"))
    } else {
        Builder::from_env(Env::default().default_filter_or("info"))
    };

    builder.format(|f, record| match record.level() {
        log::Level::Error => {
            eprintln!("{}", record.args());
            Ok(())
        }
        _ => {
            writeln!(f, "{}", record.args())
        }
    });

    builder.target(Target::Stderr).init();

    info!("module version: {}", env!("CARGO_PKG_VERSION"));

    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(EXIT_PARTIAL),
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every step succeeded
async fn run() -> Result<bool> {
    let config = AppConfig::from_env().context("failed to load configuration")?;
    let request = read_request().await?;
    debug!("request: {request:?}");

    let executor = ProcessExecutor::new(config.timing.command_timeout, config.use_sudo);
    let orchestrator = ModeOrchestrator::new(
        executor.clone(),
        Systemctl::new(executor.clone()),
        IpLink::new(executor),
        LocalFileSystem,
        config,
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("ctrl-c");
            trigger.cancel();
        }
    });

    let report = match request {
        CommandRequest::Apply { interface, request } => {
            orchestrator.apply(&interface, request, &cancel).await?
        }
        CommandRequest::EnterAccessPoint {
            interface,
            access_point,
        } => {
            orchestrator
                .enter_access_point_mode(&interface, &access_point, &cancel)
                .await?
        }
        CommandRequest::EnterStation {
            interface,
            network,
            country,
        } => {
            orchestrator
                .enter_station_mode(&interface, network, country.as_deref(), &cancel)
                .await?
        }
        CommandRequest::StopAccessPoint { interface } => {
            orchestrator.stop_access_point(&interface).await?
        }
        CommandRequest::Status { interface } => {
            print_json(&orchestrator.status(&interface).await?)?;
            return Ok(true);
        }
    };

    print_json(&report)?;
    Ok(report.is_clean())
}

async fn read_request() -> Result<CommandRequest> {
    let json = match env::args().nth(1) {
        Some(arg) => arg,
        None => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("failed to read request from stdin")?;
            buf
        }
    };

    serde_json::from_str(&json).context("failed to parse request")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize result")?;
    println!("{json}");
    Ok(())
}
