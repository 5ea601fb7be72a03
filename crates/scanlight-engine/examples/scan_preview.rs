// Live scan demo: first enumerated camera, QR decoder, outcomes logged.
//
//   RUST_LOG=debug cargo run --example scan_preview

use std::time::Duration;

use anyhow::{anyhow, Result};
use scanlight_engine::{EngineConfig, GstGateway, LogSink, QrDecoder, ScanEngine};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let engine = ScanEngine::new(GstGateway::new(), QrDecoder::new(), EngineConfig::default());
    engine.subscribe(LogSink::new()).await;
    engine
        .on_state_change(|state| println!("state: {state}"))
        .await;

    let devices = engine.list_devices().await?;
    for dev in &devices {
        println!("found device: {} ({})", dev.label, dev.id);
    }
    let first = devices.first().ok_or_else(|| anyhow!("no devices"))?;

    engine.start(&first.id).await?;
    tokio::time::sleep(Duration::from_secs(15)).await;
    engine.stop().await;
    Ok(())
}
