use crate::error::{DataError, Result};
use crate::types::{parse_path, PathSegment, CREATED_AT, ID_FIELD, UPDATED_AT};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

/// Storage type of a declared field
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    Timestamp,
    /// Nested record or sequence; a JSON column on relational engines
    Json,
    /// Identifier of a record in another collection
    Reference,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::String => write!(f, "string"),
            FieldType::Integer => write!(f, "integer"),
            FieldType::Float => write!(f, "float"),
            FieldType::Boolean => write!(f, "boolean"),
            FieldType::Timestamp => write!(f, "timestamp"),
            FieldType::Json => write!(f, "json"),
            FieldType::Reference => write!(f, "reference"),
        }
    }
}

/// Definition of a single field in a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    /// Column name on relational engines; defaults to the snake_case field name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    /// Target collection of a `Reference` field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<String>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            column: None,
            references: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::String)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Float)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    pub fn timestamp(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Timestamp)
    }

    pub fn json(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Json)
    }

    pub fn reference(name: impl Into<String>, target: impl Into<String>) -> Self {
        let mut def = Self::new(name, FieldType::Reference);
        def.references = Some(target.into());
        def
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn column_name(&self) -> String {
        self.column
            .clone()
            .unwrap_or_else(|| snake_case(&self.name))
    }
}

/// Named link from a local reference field to another collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    /// Name used in the `expand` directive and as the nested output field
    pub name: String,
    pub local_field: String,
    pub target: String,
}

impl Relation {
    pub fn new(
        name: impl Into<String>,
        local_field: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            local_field: local_field.into(),
            target: target.into(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Declared shape of one collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    /// Fields matched by the free-text `q` search; dotted paths reach into JSON fields
    #[serde(default)]
    pub searchable: Vec<String>,
    #[serde(default)]
    pub relations: Vec<Relation>,
    /// Maintain `createdAt` / `updatedAt`
    #[serde(default = "default_true")]
    pub timestamps: bool,
    /// Reject fields that are not declared
    #[serde(default = "default_true")]
    pub strict: bool,
}

impl CollectionSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            searchable: Vec::new(),
            relations: Vec::new(),
            timestamps: true,
            strict: true,
        }
    }

    /// Schema for an undeclared collection on engines without a fixed schema
    pub fn permissive(name: impl Into<String>) -> Self {
        let mut schema = Self::new(name);
        schema.strict = false;
        schema
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn searchable<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.searchable = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn relation(mut self, relation: Relation) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn timestamps(mut self, enabled: bool) -> Self {
        self.timestamps = enabled;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn is_permissive(&self) -> bool {
        self.fields.is_empty() && !self.strict
    }

    pub fn field_def(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fields the engine or facade fills in
    pub fn is_generated(&self, field: &str) -> bool {
        field == ID_FIELD || (self.timestamps && (field == CREATED_AT || field == UPDATED_AT))
    }

    /// Storage type of a top-level field, generated fields included
    pub fn field_type_of(&self, field: &str) -> Option<FieldType> {
        match field {
            ID_FIELD => Some(FieldType::Integer),
            CREATED_AT | UPDATED_AT if self.timestamps => Some(FieldType::Timestamp),
            _ => self.field_def(field).map(|f| f.field_type),
        }
    }

    /// Every stored column with its field type, `id` first
    pub fn columns(&self) -> Vec<(String, FieldType)> {
        let mut columns = vec![(ID_FIELD.to_string(), FieldType::Integer)];
        columns.extend(self.fields.iter().map(|f| (f.column_name(), f.field_type)));
        if self.timestamps {
            columns.push(("created_at".to_string(), FieldType::Timestamp));
            columns.push(("updated_at".to_string(), FieldType::Timestamp));
        }
        columns
    }

    /// Column backing a top-level field; unknown fields are rejected so that
    /// only declared identifiers ever reach query text
    pub fn column_for(&self, field: &str) -> Result<String> {
        match field {
            ID_FIELD => Ok(ID_FIELD.to_string()),
            CREATED_AT if self.timestamps => Ok("created_at".to_string()),
            UPDATED_AT if self.timestamps => Ok("updated_at".to_string()),
            _ => self
                .field_def(field)
                .map(FieldDef::column_name)
                .ok_or_else(|| {
                    DataError::invalid_query(format!(
                        "unknown field '{}' in collection '{}'",
                        field, self.name
                    ))
                }),
        }
    }

    /// Field name for a column returned by a relational engine
    pub fn field_for_column(&self, column: &str) -> Option<String> {
        match column {
            ID_FIELD => Some(ID_FIELD.to_string()),
            "created_at" if self.timestamps => Some(CREATED_AT.to_string()),
            "updated_at" if self.timestamps => Some(UPDATED_AT.to_string()),
            _ => self
                .fields
                .iter()
                .find(|f| f.column_name() == column)
                .map(|f| f.name.clone()),
        }
    }

    /// Split a dotted path whose root is a JSON field into the field and the
    /// remaining segments (`items.productName` → `items`, `[productName]`)
    pub fn json_root(&self, path: &str) -> Option<(&FieldDef, Vec<PathSegment>)> {
        let (root, rest) = path.split_once('.')?;
        let def = self.field_def(root)?;
        if def.field_type != FieldType::Json {
            return None;
        }
        let segments = parse_path(rest).ok()?;
        Some((def, segments))
    }

    /// Resolve an expand directive: a declared relation first, then a
    /// reference field named `<name>Id`, then the `<name>Id` → `<name>s`
    /// convention on permissive schemas
    pub fn resolve_relation(&self, name: &str) -> Option<Relation> {
        if let Some(rel) = self.relations.iter().find(|r| r.name == name) {
            return Some(rel.clone());
        }
        let local_field = format!("{}Id", name);
        match self.field_def(&local_field) {
            Some(def) => {
                let target = def
                    .references
                    .clone()
                    .unwrap_or_else(|| format!("{}s", name));
                Some(Relation::new(name, local_field, target))
            }
            None if self.is_permissive() => {
                Some(Relation::new(name, local_field, format!("{}s", name)))
            }
            None => None,
        }
    }

    /// Fields matched by free-text search
    pub fn search_fields(&self) -> Vec<String> {
        if !self.searchable.is_empty() {
            return self.searchable.clone();
        }
        let declared: Vec<String> = self
            .fields
            .iter()
            .filter(|f| f.field_type == FieldType::String)
            .map(|f| f.name.clone())
            .collect();
        if declared.is_empty() {
            vec!["name".to_string(), "description".to_string()]
        } else {
            declared
        }
    }

    /// Reference fields together with their target collection
    pub fn references(&self) -> impl Iterator<Item = (&FieldDef, &str)> {
        self.fields
            .iter()
            .filter_map(|f| f.references.as_deref().map(|t| (f, t)))
    }
}

/// Set of declared collections
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub collections: Vec<CollectionSchema>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, schema: CollectionSchema) -> Self {
        self.collections.push(schema);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CollectionSchema> {
        self.collections.iter()
    }

    pub fn get(&self, name: &str) -> Option<&CollectionSchema> {
        self.collections.iter().find(|c| c.name == name)
    }

    pub fn require(&self, name: &str) -> Result<&CollectionSchema> {
        self.get(name).ok_or_else(|| {
            DataError::invalid_configuration(format!("collection '{}' is not declared", name))
        })
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let catalog: Catalog = serde_json::from_str(s)
            .map_err(|e| DataError::invalid_configuration(format!("invalid catalog: {}", e)))?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let catalog: Catalog = serde_yaml::from_str(s)
            .map_err(|e| DataError::invalid_configuration(format!("invalid catalog: {}", e)))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Load from a `.json`, `.yaml` or `.yml` file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DataError::invalid_configuration(format!(
                "cannot read catalog {}: {}",
                path.display(),
                e
            ))
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            _ => Self::from_json_str(&content),
        }
    }

    /// Check names are usable identifiers and references point at declared collections
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for schema in &self.collections {
            check_identifier(&schema.name)?;
            if !seen.insert(schema.name.as_str()) {
                return Err(DataError::invalid_configuration(format!(
                    "collection '{}' declared twice",
                    schema.name
                )));
            }
            for field in &schema.fields {
                if schema.is_generated(&field.name) {
                    return Err(DataError::invalid_configuration(format!(
                        "{}.{} is a generated field",
                        schema.name, field.name
                    )));
                }
                check_identifier(&field.column_name())?;
                if field.field_type == FieldType::Reference && field.references.is_none() {
                    return Err(DataError::invalid_configuration(format!(
                        "{}.{} is a reference without a target",
                        schema.name, field.name
                    )));
                }
            }
            for relation in &schema.relations {
                if schema.field_def(&relation.local_field).is_none() {
                    return Err(DataError::invalid_configuration(format!(
                        "relation {}.{} uses undeclared field '{}'",
                        schema.name, relation.name, relation.local_field
                    )));
                }
            }
        }
        for schema in &self.collections {
            let targets = schema
                .references()
                .map(|(_, t)| t.to_string())
                .chain(schema.relations.iter().map(|r| r.target.clone()));
            for target in targets {
                if self.get(&target).is_none() {
                    return Err(DataError::invalid_configuration(format!(
                        "{} references undeclared collection '{}'",
                        schema.name, target
                    )));
                }
            }
        }
        Ok(())
    }

    /// Collections ordered so every reference target precedes its referrers
    pub fn in_dependency_order(&self) -> Result<Vec<&CollectionSchema>> {
        let mut remaining: HashMap<&str, HashSet<&str>> = self
            .collections
            .iter()
            .map(|c| {
                let deps = c
                    .references()
                    .map(|(_, t)| t)
                    .filter(|t| *t != c.name)
                    .collect();
                (c.name.as_str(), deps)
            })
            .collect();
        let mut ordered = Vec::with_capacity(self.collections.len());

        while !remaining.is_empty() {
            let ready: Vec<&CollectionSchema> = self
                .collections
                .iter()
                .filter(|c| {
                    remaining
                        .get(c.name.as_str())
                        .map(|deps| deps.iter().all(|d| !remaining.contains_key(d)))
                        .unwrap_or(false)
                })
                .collect();
            if ready.is_empty() {
                let mut cycle: Vec<&str> = remaining.keys().copied().collect();
                cycle.sort_unstable();
                return Err(DataError::invalid_configuration(format!(
                    "reference cycle between collections: {}",
                    cycle.join(", ")
                )));
            }
            for schema in ready {
                remaining.remove(schema.name.as_str());
                ordered.push(schema);
            }
        }
        Ok(ordered)
    }
}

fn check_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(DataError::invalid_configuration(format!(
            "'{}' is not a valid identifier",
            name
        )))
    }
}

/// `userId` → `user_id`
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else {
            out.push(c);
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Catalog {
        Catalog::new()
            .with(
                CollectionSchema::new("orders")
                    .field(FieldDef::reference("userId", "users").required())
                    .field(FieldDef::json("items"))
                    .field(FieldDef::float("total"))
                    .searchable(["items.productName"]),
            )
            .with(
                CollectionSchema::new("users")
                    .field(FieldDef::string("email").required())
                    .field(FieldDef::boolean("isActive")),
            )
    }

    #[test]
    fn test_snake_case() {
        assert_eq!(snake_case("userId"), "user_id");
        assert_eq!(snake_case("isActive"), "is_active");
        assert_eq!(snake_case("total"), "total");
        assert_eq!(snake_case("item2Name"), "item2_name");
    }

    #[test]
    fn test_column_mapping_both_ways() {
        let c = catalog();
        let orders = c.get("orders").unwrap();
        assert_eq!(orders.column_for("userId").unwrap(), "user_id");
        assert_eq!(orders.column_for("createdAt").unwrap(), "created_at");
        assert_eq!(orders.field_for_column("user_id").as_deref(), Some("userId"));
        assert!(orders.column_for("nickname").is_err());
    }

    #[test]
    fn test_dependency_order_puts_targets_first() {
        let c = catalog();
        let names: Vec<&str> = c
            .in_dependency_order()
            .unwrap()
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(names, vec!["users", "orders"]);
    }

    #[test]
    fn test_reference_cycle_is_rejected() {
        let c = Catalog::new()
            .with(CollectionSchema::new("a").field(FieldDef::reference("bId", "b")))
            .with(CollectionSchema::new("b").field(FieldDef::reference("aId", "a")));
        assert!(c.in_dependency_order().is_err());
    }

    #[test]
    fn test_relation_resolution_by_convention() {
        let c = catalog();
        let rel = c.get("orders").unwrap().resolve_relation("user").unwrap();
        assert_eq!(rel.local_field, "userId");
        assert_eq!(rel.target, "users");
        assert!(c.get("users").unwrap().resolve_relation("order").is_none());

        let loose = CollectionSchema::permissive("orders");
        assert_eq!(loose.resolve_relation("user").unwrap().target, "users");
    }

    #[test]
    fn test_json_root_splits_path() {
        let c = catalog();
        let orders = c.get("orders").unwrap();
        let (def, rest) = orders.json_root("items.productName").unwrap();
        assert_eq!(def.name, "items");
        assert_eq!(rest, vec![PathSegment::Key("productName".into())]);
        assert!(orders.json_root("total.x").is_none());
    }

    #[test]
    fn test_search_fields_fallbacks() {
        let c = catalog();
        assert_eq!(c.get("users").unwrap().search_fields(), vec!["email"]);
        assert_eq!(
            CollectionSchema::permissive("categories").search_fields(),
            vec!["name", "description"]
        );
    }

    #[test]
    fn test_catalog_from_yaml() {
        let yaml = r#"
collections:
  - name: users
    fields:
      - { name: email, type: string, required: true }
  - name: orders
    fields:
      - { name: userId, type: reference, references: users }
      - { name: items, type: json }
"#;
        let c = Catalog::from_yaml_str(yaml).unwrap();
        assert!(c.get("orders").unwrap().strict);
        assert_eq!(
            c.get("orders").unwrap().field_def("userId").unwrap().field_type,
            FieldType::Reference
        );
    }

    #[test]
    fn test_catalog_rejects_dangling_reference() {
        let json = r#"{"collections":[{"name":"orders","fields":[{"name":"userId","type":"reference","references":"users"}]}]}"#;
        let err = Catalog::from_json_str(json).unwrap_err();
        assert!(matches!(err, DataError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_catalog_rejects_unsafe_names() {
        let c = Catalog::new().with(CollectionSchema::new("users; DROP TABLE x"));
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_catalog_from_path_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("catalog.yml");
        std::fs::write(&yaml, "collections:\n  - name: tags\n").unwrap();
        assert!(Catalog::from_path(&yaml).unwrap().get("tags").is_some());

        let json = dir.path().join("catalog.json");
        std::fs::write(&json, r#"{"collections":[{"name":"tags"}]}"#).unwrap();
        assert!(Catalog::from_path(&json).unwrap().get("tags").is_some());

        let err = Catalog::from_path(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, DataError::InvalidConfiguration(_)));
    }
}
