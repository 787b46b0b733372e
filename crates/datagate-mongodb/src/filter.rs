//! Query plans as MongoDB filter, sort and pipeline documents.
//!
//! Dotted keys are passed through untouched: MongoDB resolves them into
//! embedded documents and fans out over arrays on its own.

use crate::convert::{to_bson, MONGO_ID};
use bson::oid::ObjectId;
use bson::{doc, Bson, Document, Regex};
use datagate::query::ExpandPlan;
use datagate::{DataError, Filter, QueryPlan, Result, SortOrder, TextMatch, Value, ID_FIELD};

fn regex(pattern: String) -> Bson {
    Bson::RegularExpression(Regex {
        pattern,
        options: "i".to_string(),
    })
}

/// Case-folded whole-value match
fn folded_eq(text: &str) -> Bson {
    regex(format!("^{}$", regex::escape(text)))
}

fn substring(text: &str) -> Bson {
    regex(regex::escape(text))
}

fn id_value(value: &Value) -> Bson {
    match value.as_str().and_then(|s| ObjectId::parse_str(s).ok()) {
        Some(oid) => Bson::ObjectId(oid),
        None => to_bson(value),
    }
}

fn eq_value(value: &Value, text_match: TextMatch) -> Bson {
    match (value, text_match) {
        (Value::String(s), TextMatch::CaseInsensitive) => folded_eq(s),
        (v, _) => to_bson(v),
    }
}

fn condition(key: &str, filter: &Filter, text_match: TextMatch) -> (String, Bson) {
    if key == ID_FIELD {
        let cond = match filter {
            Filter::Eq(v) => id_value(v),
            Filter::In(vs) => Bson::Document(doc! {
                "$in": vs.iter().map(id_value).collect::<Vec<_>>()
            }),
            Filter::Contains(t) => Bson::Document(doc! {
                "$expr": { "$regexMatch": { "input": { "$toString": "$_id" }, "regex": regex::escape(t) } }
            }),
        };
        return (MONGO_ID.to_string(), cond);
    }

    let cond = match filter {
        Filter::Eq(v) => eq_value(v, text_match),
        Filter::Contains(t) => substring(t),
        Filter::In(vs) => Bson::Document(doc! {
            "$in": vs.iter().map(|v| eq_value(v, text_match)).collect::<Vec<_>>()
        }),
    };
    (key.to_string(), cond)
}

/// Filter document for the plan's equality filters and free-text search
pub(crate) fn filter_document(plan: &QueryPlan) -> Document {
    let mut clauses: Vec<Document> = Vec::with_capacity(plan.filter.len() + 1);
    for (key, filter) in &plan.filter {
        match (key.as_str(), filter) {
            // $expr cannot sit under a field name
            (ID_FIELD, Filter::Contains(_)) => {
                if let (_, Bson::Document(expr)) = condition(key, filter, plan.text_match) {
                    clauses.push(expr);
                }
            }
            _ => {
                let (field, cond) = condition(key, filter, plan.text_match);
                clauses.push(doc! { field: cond });
            }
        }
    }
    if let Some(search) = plan.search.as_ref().filter(|s| !s.fields.is_empty()) {
        let any: Vec<Document> = search
            .fields
            .iter()
            .map(|f| doc! { f.as_str(): substring(&search.term) })
            .collect();
        clauses.push(doc! { "$or": any });
    }

    match clauses.len() {
        0 => Document::new(),
        1 => clauses.pop().unwrap_or_default(),
        _ => doc! { "$and": clauses },
    }
}

/// Sort document with `_id` as tiebreaker so windows are stable
pub(crate) fn sort_document(plan: &QueryPlan) -> Document {
    let dir = |order: SortOrder| match order {
        SortOrder::Asc => 1,
        SortOrder::Desc => -1,
    };
    let mut sort = Document::new();
    let mut id_dir = 1;
    if let Some(s) = &plan.sort {
        if s.field == ID_FIELD {
            id_dir = dir(s.order);
        } else {
            sort.insert(s.field.clone(), dir(s.order));
        }
    }
    sort.insert(MONGO_ID, id_dir);
    sort
}

/// `$lookup` stages nesting the related document under the relation name.
/// References are stored as hex tokens; they are converted to ObjectIds so
/// the match stays on `_id`, and kept as-is when they are not ObjectIds.
pub(crate) fn lookup_stages(plan: &ExpandPlan) -> Vec<Document> {
    let name = plan.relation.name.as_str();
    let reference = format!("${}", plan.relation.local_field);
    vec![
        doc! {
            "$lookup": {
                "from": plan.target.name.as_str(),
                "let": {
                    "ref": {
                        "$convert": {
                            "input": reference.as_str(),
                            "to": "objectId",
                            "onError": reference.as_str(),
                            "onNull": Bson::Null,
                        }
                    }
                },
                "pipeline": [
                    { "$match": { "$expr": { "$eq": ["$_id", "$$ref"] } } },
                    { "$limit": 1 }
                ],
                "as": name,
            }
        },
        doc! {
            "$set": {
                name: { "$ifNull": [{ "$arrayElemAt": [format!("${}", name), 0] }, Bson::Null] }
            }
        },
    ]
}

pub(crate) fn signed(n: u64, what: &str) -> Result<i64> {
    i64::try_from(n).map_err(|_| DataError::validation(format!("{} is out of range", what)))
}

/// Full aggregation for a windowed read with expansion
pub(crate) fn pipeline(plan: &QueryPlan) -> Result<Vec<Document>> {
    let mut stages = vec![
        doc! { "$match": filter_document(plan) },
        doc! { "$sort": sort_document(plan) },
    ];
    if plan.offset > 0 {
        stages.push(doc! { "$skip": signed(plan.offset, "page")? });
    }
    if let Some(limit) = plan.limit {
        stages.push(doc! { "$limit": signed(limit, "limit")? });
    }
    if let Some(expand) = &plan.expand {
        stages.extend(lookup_stages(expand));
    }
    Ok(stages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use datagate::query::{Search, Sort};
    use datagate::{CollectionSchema, FilterMap, Relation};

    fn plan(filter: FilterMap) -> QueryPlan {
        QueryPlan::matching(filter, TextMatch::Exact)
    }

    #[test]
    fn test_exact_equality_is_plain_match() {
        let mut f = FilterMap::new();
        f.insert("name".into(), Filter::Eq(Value::from("Alice")));
        assert_eq!(filter_document(&plan(f)), doc! { "name": "Alice" });
    }

    #[test]
    fn test_case_insensitive_equality_is_anchored_regex() {
        let mut f = FilterMap::new();
        f.insert("name".into(), Filter::Eq(Value::from("a.b")));
        let mut p = plan(f);
        p.text_match = TextMatch::CaseInsensitive;
        let doc = filter_document(&p);
        match doc.get("name") {
            Some(Bson::RegularExpression(re)) => {
                assert_eq!(re.pattern, r"^a\.b$");
                assert_eq!(re.options, "i");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_filters_and_search_are_conjoined() {
        let mut f = FilterMap::new();
        f.insert("status".into(), Filter::Eq(Value::from("pending")));
        f.insert(
            "items.productName".into(),
            Filter::In(vec![Value::from("Latte"), Value::from("Mocha")]),
        );
        let mut p = plan(f);
        p.search = Some(Search {
            term: "oat".into(),
            fields: vec!["notes".into(), "items.modifiers.name".into()],
        });
        let doc = filter_document(&p);
        let clauses = doc.get_array("$and").unwrap();
        assert_eq!(clauses.len(), 3);
        assert_eq!(
            clauses[0].as_document().unwrap(),
            &doc! { "items.productName": { "$in": ["Latte", "Mocha"] } }
        );
        let or = clauses[2].as_document().unwrap().get_array("$or").unwrap();
        assert_eq!(or.len(), 2);
    }

    #[test]
    fn test_id_filter_uses_object_id() {
        let oid = ObjectId::new();
        let mut f = FilterMap::new();
        f.insert("id".into(), Filter::Eq(Value::from(oid.to_hex())));
        assert_eq!(filter_document(&plan(f)), doc! { "_id": oid });
    }

    #[test]
    fn test_sort_has_id_tiebreak() {
        let mut p = plan(FilterMap::new());
        p.sort = Some(Sort {
            field: "total".into(),
            order: SortOrder::Desc,
        });
        assert_eq!(sort_document(&p), doc! { "total": -1, "_id": 1 });
        assert_eq!(sort_document(&plan(FilterMap::new())), doc! { "_id": 1 });
    }

    #[test]
    fn test_search_without_fields_adds_no_or_clause() {
        let mut p = plan(FilterMap::new());
        p.search = Some(Search {
            term: "oat".into(),
            fields: Vec::new(),
        });
        assert_eq!(filter_document(&p), Document::new());
    }

    #[test]
    fn test_lookup_matches_on_object_id() {
        let stages = lookup_stages(&ExpandPlan {
            relation: Relation::new("user", "userId", "users"),
            target: CollectionSchema::permissive("users"),
        });
        let lookup = stages[0].get_document("$lookup").unwrap();
        let convert = lookup
            .get_document("let")
            .and_then(|l| l.get_document("ref"))
            .and_then(|r| r.get_document("$convert"))
            .unwrap();
        assert_eq!(convert.get_str("to").unwrap(), "objectId");
        assert_eq!(convert.get_str("onError").unwrap(), "$userId");
        let first = lookup.get_array("pipeline").unwrap()[0].as_document().unwrap();
        assert_eq!(
            first,
            &doc! { "$match": { "$expr": { "$eq": ["$_id", "$$ref"] } } }
        );
    }

    #[test]
    fn test_window_past_signed_range_is_rejected() {
        let mut p = plan(FilterMap::new()).with_limit(8);
        p.offset = u64::MAX - 7;
        p.expand = Some(ExpandPlan {
            relation: Relation::new("user", "userId", "users"),
            target: CollectionSchema::permissive("users"),
        });
        assert!(pipeline(&p).unwrap_err().is_validation());
    }

    #[test]
    fn test_pipeline_windows_before_lookup() {
        let mut p = plan(FilterMap::new()).with_limit(5);
        p.offset = 10;
        p.expand = Some(ExpandPlan {
            relation: Relation::new("user", "userId", "users"),
            target: CollectionSchema::permissive("users"),
        });
        let stages = pipeline(&p).unwrap();
        let ops: Vec<&str> = stages
            .iter()
            .filter_map(|s| s.keys().next().map(String::as_str))
            .collect();
        assert_eq!(ops, ["$match", "$sort", "$skip", "$limit", "$lookup", "$set"]);
    }
}
