// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! gpu-fan-curve: drives NVIDIA GPU fans along a temperature curve and hands
//! control back to the driver on exit.

use anyhow::Context;
use clap::Parser;
use gpu_fan_curve::config::{self, Config};
use gpu_fan_curve::hardware::{self, FanHardware};
use gpu_fan_curve::nvidia::NvidiaSettings;
use gpu_fan_curve::orchestrator::ControlLoop;
use std::future::Future;
use std::path::PathBuf;
use tokio::signal::unix::{SignalKind, signal};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "gpu-fan-curve", about = "GPU fan curve controller")]
struct Cli {
    /// Path to the configuration file [default: /etc/gpu-fan-curve/config.toml].
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the X display used by nvidia-settings.
    #[arg(short, long)]
    display: Option<String>,

    /// Write the default configuration to the config path and exit.
    #[arg(long)]
    write_default_config: bool,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config_path = config::resolve_config_path(cli.config.as_deref());

    if cli.write_default_config {
        config::save_config(&config_path, &Config::default())?;
        return Ok(());
    }

    let cfg = config::load_config(&config_path)?;
    let curve = cfg.build_curve()?;
    log::info!("Curve: {:?}", curve.points());

    // Handlers go in before any fan changes hands.
    let shutdown = shutdown_signal().context("installing signal handlers")?;

    let hw = NvidiaSettings::new()
        .with_program(cfg.driver.program.clone())
        .with_display(cli.display.or_else(|| cfg.driver.display.clone()));

    hardware::require_driver_version(&hw, cfg.driver.min_version)?;

    let devices = hw.enumerate_devices()?;
    for device in &devices {
        log::info!("Found {device}");
    }

    ControlLoop::new(&hw, &curve, cfg.loop_settings())
        .run(&devices, shutdown)
        .await?;

    log::info!("Fan control handed back, exiting");
    Ok(())
}

/// Resolves on the first SIGINT, SIGTERM or SIGHUP.
fn shutdown_signal() -> std::io::Result<impl Future<Output = ()>> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;

    Ok(async move {
        let name = tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
            _ = hangup.recv() => "SIGHUP",
        };
        log::info!("Received {name}");
    })
}
