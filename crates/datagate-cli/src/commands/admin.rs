use super::print_json;
use clap::Args;
use datagate::{DataGate, DataSource};
use serde_json::json;
use tracing::info;

#[derive(Args)]
pub struct InitCommand {}

impl InitCommand {
    pub async fn execute(self, gate: &DataGate) -> anyhow::Result<()> {
        gate.init().await?;
        let collections: Vec<&str> = gate.catalog().iter().map(|c| c.name.as_str()).collect();
        info!("Initialized {} collections", collections.len());
        print_json(&json!({ "initialized": collections }))
    }
}

#[derive(Args)]
pub struct PingCommand {}

impl PingCommand {
    pub async fn execute(self, gate: &DataGate) -> anyhow::Result<()> {
        gate.ping().await?;
        print_json(&json!({ "ok": true, "engine": gate.store().source_type() }))
    }
}
