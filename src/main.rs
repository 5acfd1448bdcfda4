//! Prosumer simulator entry point: config loading, transport wiring, and shutdown.

use std::process;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use prosumer_sim::cli;
use prosumer_sim::config::ProsumerConfig;
use prosumer_sim::sim::clock::SystemClock;
use prosumer_sim::site::Site;
use prosumer_sim::telemetry::LogSink;
use prosumer_sim::telemetry::mqtt::MqttSink;

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let opts = match cli::parse_args() {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("error: {e}");
            cli::print_usage();
            process::exit(1);
        }
    };

    let config = ProsumerConfig::from_toml_file(&opts.config)
        .with_context(|| format!("loading {}", opts.config.display()))?;
    let errors = config.validate();
    if !errors.is_empty() {
        eprintln!("Configuration validation failed:");
        for e in &errors {
            eprintln!("  {e}");
        }
        process::exit(1);
    }

    let mqtt = if opts.dry_run {
        tracing::info!("dry run: publications are logged, no broker connection");
        None
    } else {
        Some(Arc::new(MqttSink::connect(&config.settings)))
    };
    let sink: Arc<dyn prosumer_sim::telemetry::StateSink> = match &mqtt {
        Some(mqtt) => mqtt.clone(),
        None => Arc::new(LogSink),
    };

    let site = Site::from_config(&config, sink, Arc::new(SystemClock)).context("building site")?;
    site.announce_online().await;
    site.start();
    tracing::info!(site = %config.settings.short_site_id(), "running; press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    tracing::info!("shutting down");
    site.stop().await;
    drop(site);

    if let Some(mqtt) = mqtt {
        match Arc::try_unwrap(mqtt) {
            Ok(mqtt) => mqtt.disconnect().await,
            Err(_) => tracing::warn!("mqtt sink still shared; skipping clean disconnect"),
        }
    }
    Ok(())
}
