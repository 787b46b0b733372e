use super::{parse_filter, parse_identifier, parse_record, print_json};
use anyhow::anyhow;
use clap::Args;
use datagate::{DataGate, Identifier, QueryDescriptor, SortOrder};

#[derive(Args)]
pub struct GetCommand {
    pub collection: String,
    #[arg(value_parser = parse_identifier)]
    pub id: Identifier,
}

impl GetCommand {
    pub async fn execute(self, gate: &DataGate) -> anyhow::Result<()> {
        let record = gate
            .find_by_id(&self.collection, &self.id)
            .await?
            .ok_or_else(|| anyhow!("{}/{} not found", self.collection, self.id))?;
        print_json(&record)
    }
}

#[derive(Args)]
pub struct FindCommand {
    pub collection: String,

    /// Predicate as a JSON object of field equalities
    pub predicate: String,
}

impl FindCommand {
    pub async fn execute(self, gate: &DataGate) -> anyhow::Result<()> {
        let predicate = parse_record(&self.predicate)?;
        let record = gate.find_one(&self.collection, &predicate).await?;
        print_json(&record)
    }
}

#[derive(Args)]
pub struct QueryCommand {
    pub collection: String,

    /// Filter as a JSON object; `{"$contains": ..}` and `{"$in": [..]}` select other predicates
    #[arg(long)]
    pub filter: Option<String>,

    /// Free-text search term
    #[arg(long)]
    pub q: Option<String>,

    #[arg(long)]
    pub sort: Option<String>,

    #[arg(long, default_value = "asc")]
    pub order: SortOrder,

    #[arg(long)]
    pub page: Option<u64>,

    #[arg(long)]
    pub limit: Option<u64>,

    /// Relation to nest into each result
    #[arg(long)]
    pub expand: Option<String>,
}

impl QueryCommand {
    pub fn descriptor(&self) -> anyhow::Result<QueryDescriptor> {
        Ok(QueryDescriptor {
            filter: parse_filter(self.filter.as_deref())?,
            q: self.q.clone(),
            sort: self.sort.clone(),
            order: self.order,
            page: self.page,
            limit: self.limit,
            expand: self.expand.clone(),
        })
    }

    pub async fn execute(self, gate: &DataGate) -> anyhow::Result<()> {
        let page = gate
            .find_all_advanced(&self.collection, &self.descriptor()?)
            .await?;
        print_json(&page)
    }
}
