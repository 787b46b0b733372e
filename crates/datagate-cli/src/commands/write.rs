use super::{parse_identifier, parse_record, print_json};
use anyhow::Context;
use clap::Args;
use datagate::{DataGate, Identifier, Record, Value};
use serde_json::json;
use tracing::warn;

#[derive(Args)]
pub struct CreateCommand {
    pub collection: String,

    /// A JSON object, or a JSON array of objects for a bulk insert
    pub data: String,
}

impl CreateCommand {
    pub async fn execute(self, gate: &DataGate) -> anyhow::Result<()> {
        let json: serde_json::Value =
            serde_json::from_str(&self.data).context("Data must be valid JSON")?;
        let serde_json::Value::Array(items) = json else {
            let record = gate.create(&self.collection, Record::try_from(json)?).await?;
            return print_json(&record);
        };

        let records = items
            .into_iter()
            .map(Record::try_from)
            .collect::<datagate::Result<Vec<_>>>()?;
        let results = gate.insert_many(&self.collection, records).await?;
        let output: Vec<serde_json::Value> = results
            .into_iter()
            .enumerate()
            .map(|(i, result)| match result {
                Ok(record) => json!({ "ok": record }),
                Err(e) => {
                    warn!("Record {} was not inserted: {}", i, e);
                    json!({ "error": e.to_string() })
                }
            })
            .collect();
        print_json(&output)
    }
}

#[derive(Args)]
pub struct UpdateCommand {
    pub collection: String,
    #[arg(value_parser = parse_identifier)]
    pub id: Identifier,

    /// Fields to merge, as a JSON object
    pub patch: String,
}

impl UpdateCommand {
    pub async fn execute(self, gate: &DataGate) -> anyhow::Result<()> {
        let patch = parse_record(&self.patch)?;
        let record = gate.update(&self.collection, &self.id, patch).await?;
        print_json(&record)
    }
}

#[derive(Args)]
pub struct SetCommand {
    pub collection: String,
    #[arg(value_parser = parse_identifier)]
    pub id: Identifier,

    /// Dotted path into a JSON field, e.g. `items.0.quantity`
    pub path: String,

    /// New value as JSON
    pub value: String,
}

impl SetCommand {
    pub async fn execute(self, gate: &DataGate) -> anyhow::Result<()> {
        let value: serde_json::Value =
            serde_json::from_str(&self.value).context("Value must be valid JSON")?;
        let record = gate
            .set_path(&self.collection, &self.id, &self.path, Value::from(value))
            .await?;
        print_json(&record)
    }
}

#[derive(Args)]
pub struct DeleteCommand {
    pub collection: String,
    #[arg(value_parser = parse_identifier)]
    pub id: Identifier,
}

impl DeleteCommand {
    pub async fn execute(self, gate: &DataGate) -> anyhow::Result<()> {
        let deleted = gate.delete(&self.collection, &self.id).await?;
        print_json(&json!({ "deleted": deleted }))
    }
}
