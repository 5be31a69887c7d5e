//! Entrypoint, grounded in `doorway::main`: load `.env`, parse CLI,
//! initialize structured logging once, build the topology, run it for
//! the configured duration, then write the result artifact.

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use relaysim::{Args, SimConfig, SimulationEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging(&args.log_level);

    tracing::info!(
        duration = args.duration,
        rate = args.rate,
        seed = args.seed,
        port_base = args.tcp_port_base,
        "relaysim starting"
    );

    let config = SimConfig::from(&args);
    let engine = SimulationEngine::setup(config).await?;
    engine.run().await?;

    let results = engine.get_results().await;
    let (processor_counts, last_scale_times) = engine.scaling_status().await;
    let artifact = serde_json::json!({
        "clients": results.clients,
        "queue_stats": results.queue_stats,
        "worker_avg_processing_time": results.worker_avg_processing_time,
        "total_sent": results.total_sent,
        "total_received": results.total_received,
        "total_successful": results.total_successful,
        "throughput": results.throughput,
        "distributed_count": engine.distributed_count(),
        "scaling_status": {
            "processor_counts": processor_counts,
            "last_scale_times": last_scale_times,
        },
    });

    std::fs::write(&args.output, serde_json::to_string_pretty(&artifact)?)?;
    tracing::info!(output = %args.output, "relaysim finished, results written");

    Ok(())
}

fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("relaysim={log_level},info")));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}
