use super::{parse_filter, print_json};
use clap::Args;
use datagate::DataGate;
use serde_json::json;

#[derive(Args)]
pub struct CountCommand {
    pub collection: String,

    #[arg(long)]
    pub filter: Option<String>,
}

impl CountCommand {
    pub async fn execute(self, gate: &DataGate) -> anyhow::Result<()> {
        let filter = parse_filter(self.filter.as_deref())?;
        let count = gate.count(&self.collection, &filter).await?;
        print_json(&json!({ "count": count }))
    }
}

#[derive(Args)]
pub struct SumCommand {
    pub collection: String,
    pub field: String,

    #[arg(long)]
    pub filter: Option<String>,
}

impl SumCommand {
    pub async fn execute(self, gate: &DataGate) -> anyhow::Result<()> {
        let filter = parse_filter(self.filter.as_deref())?;
        let total = gate.sum(&self.collection, &self.field, &filter).await?;
        print_json(&json!({ "field": self.field, "sum": total }))
    }
}
