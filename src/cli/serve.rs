use anyhow::Result;
use tracing::info;

use crate::core::config::EngineConfig;
use crate::core::engine::SyncEngine;
use crate::core::terminal::{print_banner, print_status, print_step};

pub async fn run_serve(config: EngineConfig) -> Result<()> {
    print_banner();
    print_status("Data dir", &config.data_dir.display().to_string());
    print_status("Build runner", &config.build_endpoint);
    print_status("Deploy service", &config.deploy_endpoint);
    print_status("Ingestion service", &config.ingestion_endpoint);
    print_step("Watching for queued bot syncs. Press Ctrl+C to stop.");
    println!();

    let engine = SyncEngine::from_config(&config)?;

    tokio::select! {
        result = engine.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            Ok(())
        }
    }
}
