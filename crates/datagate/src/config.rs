use serde::{Deserialize, Serialize};

/// Policy for equality on textual fields
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextMatch {
    /// Byte-exact, case-sensitive on every engine
    #[default]
    Exact,
    /// Fold case on every engine
    CaseInsensitive,
}

/// How `expand` directives are resolved
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpandStrategy {
    /// Native join / `$lookup` when the backend has one, follow-up fetches otherwise
    #[default]
    Auto,
    /// Always fetch related records with follow-up lookups
    FollowUp,
}

/// Facade behaviour knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateOptions {
    pub text_match: TextMatch,
    pub expand_strategy: ExpandStrategy,
    /// In-flight writes for a non-batched `insert_many`
    pub bulk_concurrency: usize,
    pub default_limit: u64,
    pub max_limit: u64,
}

impl Default for GateOptions {
    fn default() -> Self {
        Self {
            text_match: TextMatch::Exact,
            expand_strategy: ExpandStrategy::Auto,
            bulk_concurrency: 8,
            default_limit: 10,
            max_limit: 1000,
        }
    }
}

impl GateOptions {
    pub fn with_text_match(mut self, text_match: TextMatch) -> Self {
        self.text_match = text_match;
        self
    }

    pub fn with_expand_strategy(mut self, strategy: ExpandStrategy) -> Self {
        self.expand_strategy = strategy;
        self
    }

    pub fn with_bulk_concurrency(mut self, n: usize) -> Self {
        self.bulk_concurrency = n.max(1);
        self
    }
}
