use std::{fs::File, path::Path, sync::Mutex, time::Duration};

use anyhow::Context;
use clap::Parser;
use quiz_monitoring::{
    config::{MonitoringConfig, read_config_file},
    orchestrator::MonitoringOrchestrator,
    util::apply_env_overrides,
};
use tracing::{info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{Layer, filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (JSON); defaults apply when omitted
    #[arg(short)]
    file: Option<String>,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    duration: Option<u64>,

    /// Where to write the final report, overriding the config
    #[arg(long)]
    report: Option<String>,
}

fn open_log(dir: &Path, name: &str) -> anyhow::Result<Mutex<File>> {
    let path = dir.join(name);
    let file = File::options()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("opening {}", path.display()))?;
    Ok(Mutex::new(file))
}

fn init(log_dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;

    let filter = filter::Targets::new().with_targets(vec![
        ("quiz_monitoring", LevelFilter::TRACE),
        ("monitoring_hub", LevelFilter::TRACE),
    ]);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false)
                .with_filter(LevelFilter::DEBUG),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(open_log(log_dir, "application.log")?)
                .with_ansi(false)
                .with_filter(LevelFilter::INFO),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(open_log(log_dir, "errors.log")?)
                .with_ansi(false)
                .with_filter(LevelFilter::ERROR),
        )
        .with(filter)
        .init();

    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<MonitoringConfig> {
    let config = match &args.file {
        Some(file) => read_config_file(file).with_context(|| format!("loading {file}"))?,
        None => MonitoringConfig::default(),
    };

    let mut config = apply_env_overrides(config);
    if let Some(report) = &args.report {
        config.report_path = report.into();
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse();
    let config = load_config(&args)?;

    init(&config.log_dir)?;
    trace!("started with args: {args:?}");

    let report_path = config.report_path.clone();
    let orchestrator = MonitoringOrchestrator::new(config)?;

    orchestrator.start();

    match args.duration {
        Some(secs) => {
            info!("monitoring for {secs}s");
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                _ = tokio::signal::ctrl_c() => info!("interrupted"),
            }
        }
        None => {
            info!("monitoring until Ctrl-C");
            tokio::signal::ctrl_c()
                .await
                .context("waiting for Ctrl-C")?;
        }
    }

    if !orchestrator.stop().await {
        warn!("some monitoring loops did not settle before the stop timeout");
    }

    let report = orchestrator.generate_report().await?;
    orchestrator.write_report(&report, &report_path).await?;

    println!("System Status: {}", report.system_status.overall_health);
    println!("Active Alerts: {}", report.system_status.active_alerts);
    println!("Recommendations:");
    for recommendation in &report.recommendations {
        println!("  - {recommendation}");
    }

    Ok(())
}
