use crate::config::TextMatch;
use crate::error::DataError;
use crate::schema::{CollectionSchema, Relation};
use crate::types::{Record, Value};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Predicate on one field (or dotted path into a JSON field)
///
/// In the serialized form a plain value means equality; `{"$contains": "..."}`
/// and `{"$in": [...]}` select the other predicates.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Equality; honours the configured [`TextMatch`] on strings
    Eq(Value),
    /// Case-insensitive partial match on text
    Contains(String),
    /// Membership in a set of values
    In(Vec<Value>),
}

impl From<Value> for Filter {
    fn from(v: Value) -> Self {
        Filter::Eq(v)
    }
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let json = match self {
            Filter::Eq(v) => v.to_json(),
            Filter::Contains(t) => serde_json::json!({ "$contains": t }),
            Filter::In(values) => {
                serde_json::json!({ "$in": values.iter().map(Value::to_json).collect::<Vec<_>>() })
            }
        };
        json.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;

        let raw = serde_json::Value::deserialize(deserializer)?;
        if let serde_json::Value::Object(map) = &raw {
            if map.len() == 1 {
                if let Some(v) = map.get("$contains") {
                    return v
                        .as_str()
                        .map(|s| Filter::Contains(s.to_string()))
                        .ok_or_else(|| D::Error::custom("$contains expects a string"));
                }
                if let Some(v) = map.get("$in") {
                    return match v {
                        serde_json::Value::Array(items) => Ok(Filter::In(
                            items.iter().cloned().map(Value::from).collect(),
                        )),
                        _ => Err(D::Error::custom("$in expects an array")),
                    };
                }
                if let Some(v) = map.get("$eq") {
                    return Ok(Filter::Eq(Value::from(v.clone())));
                }
            }
        }
        Ok(Filter::Eq(Value::from(raw)))
    }
}

pub type FilterMap = BTreeMap<String, Filter>;

/// Equality filters from a predicate record (`find_one`)
pub fn filters_from_record(predicate: &Record) -> FilterMap {
    predicate
        .iter()
        .map(|(k, v)| (k.clone(), Filter::Eq(v.clone())))
        .collect()
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Asc => write!(f, "asc"),
            SortOrder::Desc => write!(f, "desc"),
        }
    }
}

impl FromStr for SortOrder {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortOrder::Asc),
            "desc" | "descending" => Ok(SortOrder::Desc),
            other => Err(DataError::validation(format!(
                "invalid sort order '{}', expected asc or desc",
                other
            ))),
        }
    }
}

/// Engine-neutral description of a read
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryDescriptor {
    pub filter: FilterMap,
    /// Free-text term matched case-insensitively against the searchable fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
    pub order: SortOrder,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// Relation name to expand into a nested field
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expand: Option<String>,
}

impl QueryDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter.insert(field.into(), Filter::Eq(value.into()));
        self
    }

    pub fn contains(mut self, field: impl Into<String>, text: impl Into<String>) -> Self {
        self.filter.insert(field.into(), Filter::Contains(text.into()));
        self
    }

    pub fn any_of<V: Into<Value>>(mut self, field: impl Into<String>, values: Vec<V>) -> Self {
        self.filter.insert(
            field.into(),
            Filter::In(values.into_iter().map(Into::into).collect()),
        );
        self
    }

    pub fn search(mut self, q: impl Into<String>) -> Self {
        self.q = Some(q.into());
        self
    }

    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort = Some(field.into());
        self.order = order;
        self
    }

    pub fn page(mut self, page: u64) -> Self {
        self.page = Some(page);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn expand(mut self, relation: impl Into<String>) -> Self {
        self.expand = Some(relation.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

/// One window of results from `find_all_advanced`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub data: Vec<Record>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Search {
    pub term: String,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    pub field: String,
    pub order: SortOrder,
}

/// Resolved relation to join while reading
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandPlan {
    pub relation: Relation,
    pub target: CollectionSchema,
}

/// Validated read handed to a backend; every field name in it has been
/// checked against the collection schema
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub filter: FilterMap,
    pub search: Option<Search>,
    pub sort: Option<Sort>,
    pub offset: u64,
    /// `None` reads every matching record
    pub limit: Option<u64>,
    pub expand: Option<ExpandPlan>,
    pub text_match: TextMatch,
}

impl QueryPlan {
    /// Unwindowed read of every record matching `filter`
    pub fn matching(filter: FilterMap, text_match: TextMatch) -> Self {
        Self {
            filter,
            search: None,
            sort: None,
            offset: 0,
            limit: None,
            expand: None,
            text_match,
        }
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_descriptor_from_json() {
        let d: QueryDescriptor = serde_json::from_value(json!({
            "filter": {
                "status": "pending",
                "items.productName": {"$contains": "latte"},
                "userId": {"$in": [1, 2]}
            },
            "q": "coffee",
            "sort": "total",
            "order": "desc",
            "page": 2,
            "limit": 50,
            "expand": "user"
        }))
        .unwrap();

        assert_eq!(d.filter["status"], Filter::Eq(Value::from("pending")));
        assert_eq!(
            d.filter["items.productName"],
            Filter::Contains("latte".into())
        );
        assert_eq!(
            d.filter["userId"],
            Filter::In(vec![Value::Int(1), Value::Int(2)])
        );
        assert_eq!(d.order, SortOrder::Desc);
        assert_eq!(d.page, Some(2));
        assert_eq!(d.expand.as_deref(), Some("user"));
    }

    #[test]
    fn test_descriptor_defaults() {
        let d: QueryDescriptor = serde_json::from_value(json!({"q": "tea"})).unwrap();
        assert!(d.filter.is_empty());
        assert_eq!(d.order, SortOrder::Asc);
        assert_eq!(d.page, None);
    }

    #[test]
    fn test_nested_object_filter_is_equality() {
        let f: Filter = serde_json::from_value(json!({"sugar": true})).unwrap();
        assert!(matches!(f, Filter::Eq(Value::Record(_))));
    }

    #[test]
    fn test_sort_order_parsing() {
        assert_eq!("DESC".parse::<SortOrder>().unwrap(), SortOrder::Desc);
        assert!("sideways".parse::<SortOrder>().is_err());
    }

    #[test]
    fn test_pagination_omits_unknown_total() {
        let p = Pagination {
            page: 1,
            limit: 10,
            total: None,
        };
        assert_eq!(serde_json::to_value(p).unwrap(), json!({"page": 1, "limit": 10}));
    }
}
