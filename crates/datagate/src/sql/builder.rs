use super::{Bind, SqlDialect, SqlStatement};
use crate::config::TextMatch;
use crate::error::{DataError, Result};
use crate::normalize::parse_timestamp;
use crate::query::{Filter, QueryPlan, Search, SortOrder};
use crate::schema::{CollectionSchema, FieldType};
use crate::types::{Identifier, PathSegment, Record, Value, ID_FIELD};

/// Column alias prefix for joined columns of an expanded relation
pub const EXPAND_PREFIX: &str = "__x__";

const BASE: &str = "b";
const JOINED: &str = "x";

struct Binder {
    dialect: SqlDialect,
    binds: Vec<Bind>,
}

impl Binder {
    fn new(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            binds: Vec::new(),
        }
    }

    /// Placeholders must be requested in textual order for MySQL's `?`
    fn push(&mut self, bind: Bind) -> String {
        self.binds.push(bind);
        self.dialect.placeholder(self.binds.len())
    }

    fn finish(self, sql: String) -> SqlStatement {
        SqlStatement {
            sql,
            binds: self.binds,
        }
    }
}

/// Typed parameter for `value` stored in a field of `field_type`
pub(crate) fn bind_value(field: &str, field_type: FieldType, value: &Value) -> Result<Bind> {
    let mismatch = || {
        DataError::validation(format!(
            "field '{}' expects {}, got {}",
            field,
            field_type,
            value.type_name()
        ))
    };

    Ok(match (field_type, value) {
        (_, Value::Null) => Bind::Null(field_type),
        (FieldType::Json, v) => Bind::Json(v.to_json()),
        (FieldType::String, Value::String(s)) => Bind::Text(s.clone()),
        (FieldType::Integer | FieldType::Reference, v) => Bind::Int(
            v.as_i64()
                .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
                .ok_or_else(mismatch)?,
        ),
        (FieldType::Float, v) => Bind::Float(v.as_f64().ok_or_else(mismatch)?),
        (FieldType::Boolean, Value::Bool(b)) => Bind::Bool(*b),
        (FieldType::Timestamp, Value::Timestamp(ts)) => Bind::Timestamp(*ts),
        (FieldType::Timestamp, Value::String(s)) => {
            Bind::Timestamp(parse_timestamp(s).ok_or_else(mismatch)?)
        }
        _ => return Err(mismatch()),
    })
}

/// Parameter for an identifier; `None` when it cannot be a relational key
pub fn id_bind(id: &Identifier) -> Option<Bind> {
    id.as_i64().map(Bind::Int)
}

fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn json_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

/// PostgreSQL `text[]` literal for `jsonb_set` / `#>`
fn pg_text_array(path: &[PathSegment]) -> String {
    let parts: Vec<String> = path.iter().map(|s| json_string(&s.to_string())).collect();
    format!("{{{}}}", parts.join(","))
}

/// Lax SQL/JSON path; member access unwraps arrays at every level
fn pg_jsonpath(path: &[PathSegment]) -> String {
    let mut out = String::from("$");
    for seg in path {
        match seg {
            PathSegment::Key(k) => {
                out.push('.');
                out.push_str(&json_string(k));
            }
            PathSegment::Index(i) => out.push_str(&format!("[{}]", i)),
        }
    }
    out
}

/// MySQL JSON path; `deep` matches the path at any nesting level
fn mysql_json_path(path: &[PathSegment], deep: bool) -> String {
    let mut out = String::from(if deep { "$**" } else { "$" });
    for seg in path {
        match seg {
            PathSegment::Key(k) => {
                out.push('.');
                out.push_str(&json_string(k));
            }
            PathSegment::Index(i) => out.push_str(&format!("[{}]", i)),
        }
    }
    out
}

/// Nest `leaf` under the key segments of `path`
fn nest_json(path: &[PathSegment], leaf: serde_json::Value) -> serde_json::Value {
    path.iter().rev().fold(leaf, |acc, seg| {
        let mut map = serde_json::Map::new();
        map.insert(seg.to_string(), acc);
        serde_json::Value::Object(map)
    })
}

fn has_index(path: &[PathSegment]) -> bool {
    path.iter().any(|s| matches!(s, PathSegment::Index(_)))
}

/// Translates reads and writes on one collection into parameterised SQL
pub struct SqlBuilder<'a> {
    dialect: SqlDialect,
    schema: &'a CollectionSchema,
}

impl<'a> SqlBuilder<'a> {
    pub fn new(dialect: SqlDialect, schema: &'a CollectionSchema) -> Self {
        Self { dialect, schema }
    }

    fn q(&self, ident: &str) -> String {
        self.dialect.quote_ident(ident)
    }

    fn table(&self) -> String {
        self.q(&self.schema.name)
    }

    fn col(&self, column: &str) -> String {
        format!("{}.{}", BASE, self.q(column))
    }

    fn returning(&self, sql: String) -> String {
        if self.dialect.supports_returning() {
            format!("{} RETURNING *", sql)
        } else {
            sql
        }
    }

    fn writable(&self, field: &str) -> Result<(String, FieldType)> {
        if field == ID_FIELD {
            return Err(DataError::validation("id is assigned by the engine"));
        }
        match (self.schema.column_for(field), self.schema.field_type_of(field)) {
            (Ok(column), Some(field_type)) => Ok((column, field_type)),
            _ => Err(DataError::validation(format!(
                "collection '{}' has no column for field '{}'",
                self.schema.name, field
            ))),
        }
    }

    pub fn insert(&self, record: &Record) -> Result<SqlStatement> {
        let mut binder = Binder::new(self.dialect);
        let mut columns = Vec::with_capacity(record.len());
        let mut values = Vec::with_capacity(record.len());

        for (field, value) in record.iter() {
            let (column, field_type) = self.writable(field)?;
            columns.push(self.q(&column));
            values.push(binder.push(bind_value(field, field_type, value)?));
        }

        let sql = if columns.is_empty() {
            match self.dialect {
                SqlDialect::Postgres => format!("INSERT INTO {} DEFAULT VALUES", self.table()),
                SqlDialect::MySql => format!("INSERT INTO {} () VALUES ()", self.table()),
            }
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.table(),
                columns.join(", "),
                values.join(", ")
            )
        };
        Ok(binder.finish(self.returning(sql)))
    }

    /// Multi-row insert; fields missing from a row take the column default
    pub fn insert_batch(&self, records: &[Record]) -> Result<SqlStatement> {
        let mut fields: Vec<&str> = Vec::new();
        for record in records {
            for field in record.keys() {
                if !fields.contains(&field.as_str()) {
                    fields.push(field);
                }
            }
        }
        if records.is_empty() || fields.is_empty() {
            return Err(DataError::invalid_query(
                "batch insert needs at least one row with one field",
            ));
        }

        let mut columns = Vec::with_capacity(fields.len());
        let mut types = Vec::with_capacity(fields.len());
        for field in &fields {
            let (column, field_type) = self.writable(field)?;
            columns.push(self.q(&column));
            types.push(field_type);
        }

        let mut binder = Binder::new(self.dialect);
        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            let mut values = Vec::with_capacity(fields.len());
            for (field, field_type) in fields.iter().zip(&types) {
                match record.get(field) {
                    Some(value) => values.push(binder.push(bind_value(field, *field_type, value)?)),
                    None => values.push("DEFAULT".to_string()),
                }
            }
            rows.push(format!("({})", values.join(", ")));
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.table(),
            columns.join(", "),
            rows.join(", ")
        );
        Ok(binder.finish(self.returning(sql)))
    }

    pub fn select_by_id(&self, id: Bind) -> SqlStatement {
        let mut binder = Binder::new(self.dialect);
        let sql = format!(
            "SELECT * FROM {} WHERE {} = {}",
            self.table(),
            self.q(ID_FIELD),
            binder.push(id)
        );
        binder.finish(sql)
    }

    /// `None` when the patch is empty and there is nothing to write
    pub fn update(&self, id: Bind, patch: &Record) -> Result<Option<SqlStatement>> {
        if patch.is_empty() {
            return Ok(None);
        }
        let mut binder = Binder::new(self.dialect);
        let mut sets = Vec::with_capacity(patch.len());
        for (field, value) in patch.iter() {
            let (column, field_type) = self.writable(field)?;
            let ph = binder.push(bind_value(field, field_type, value)?);
            sets.push(format!("{} = {}", self.q(&column), ph));
        }
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = {}",
            self.table(),
            sets.join(", "),
            self.q(ID_FIELD),
            binder.push(id)
        );
        Ok(Some(binder.finish(self.returning(sql))))
    }

    /// Replace one nested value inside a JSON column, plus any top-level `touch` fields
    pub fn set_path(
        &self,
        id: Bind,
        field: &str,
        path: &[PathSegment],
        value: &Value,
        touch: &Record,
    ) -> Result<SqlStatement> {
        let (column, field_type) = self.writable(field)?;
        if field_type != FieldType::Json {
            return Err(DataError::validation(format!(
                "field '{}' is not a JSON field",
                field
            )));
        }
        if path.is_empty() {
            return Err(DataError::validation("nested path must not be empty"));
        }

        let mut binder = Binder::new(self.dialect);
        let c = self.q(&column);
        let mut sets = vec![match self.dialect {
            SqlDialect::Postgres => {
                let p = binder.push(Bind::Text(pg_text_array(path)));
                let v = binder.push(Bind::Json(value.to_json()));
                format!(
                    "{c} = jsonb_set(COALESCE({c}, '{{}}'::jsonb), {p}::text[], {v}::jsonb, true)",
                    c = c,
                    p = p,
                    v = v
                )
            }
            SqlDialect::MySql => {
                let p = binder.push(Bind::Text(mysql_json_path(path, false)));
                let v = binder.push(Bind::Text(value.to_json().to_string()));
                format!("{c} = JSON_SET({c}, {p}, CAST({v} AS JSON))", c = c, p = p, v = v)
            }
        }];
        for (field, value) in touch.iter() {
            let (column, field_type) = self.writable(field)?;
            let ph = binder.push(bind_value(field, field_type, value)?);
            sets.push(format!("{} = {}", self.q(&column), ph));
        }

        let sql = format!(
            "UPDATE {} SET {} WHERE {} = {}",
            self.table(),
            sets.join(", "),
            self.q(ID_FIELD),
            binder.push(id)
        );
        Ok(binder.finish(self.returning(sql)))
    }

    pub fn delete(&self, id: Bind) -> SqlStatement {
        let mut binder = Binder::new(self.dialect);
        let sql = format!(
            "DELETE FROM {} WHERE {} = {}",
            self.table(),
            self.q(ID_FIELD),
            binder.push(id)
        );
        binder.finish(sql)
    }

    /// Filtered, searched, sorted and windowed read, with the expansion
    /// joined in as `__x__<column>` aliases when the plan carries one
    pub fn select(&self, plan: &QueryPlan) -> Result<SqlStatement> {
        let mut binder = Binder::new(self.dialect);
        let mut projection = format!("{}.*", BASE);
        let mut from = format!("{} {}", self.table(), BASE);

        if let Some(expand) = &plan.expand {
            let local = self.schema.column_for(&expand.relation.local_field)?;
            for (column, _) in expand.target.columns() {
                projection.push_str(&format!(
                    ", {}.{} AS {}",
                    JOINED,
                    self.q(&column),
                    self.q(&format!("{}{}", EXPAND_PREFIX, column))
                ));
            }
            from.push_str(&format!(
                " LEFT JOIN {} {} ON {}.{} = {}",
                self.q(&expand.target.name),
                JOINED,
                JOINED,
                self.q(ID_FIELD),
                self.col(&local)
            ));
        }

        let where_sql = self.where_clause(plan, &mut binder)?;
        let order_sql = self.order_by(plan)?;
        let mut sql = format!(
            "SELECT {} FROM {}{}{}",
            projection, from, where_sql, order_sql
        );

        match plan.limit {
            Some(limit) => {
                let limit = i64::try_from(limit)
                    .map_err(|_| DataError::validation("limit is out of range"))?;
                sql.push_str(&format!(" LIMIT {}", binder.push(Bind::Int(limit))));
            }
            // MySQL only accepts OFFSET after a LIMIT
            None if plan.offset > 0 && self.dialect == SqlDialect::MySql => {
                sql.push_str(" LIMIT 18446744073709551615");
            }
            None => {}
        }
        if plan.offset > 0 {
            let offset = i64::try_from(plan.offset)
                .map_err(|_| DataError::validation("page is out of range"))?;
            sql.push_str(&format!(" OFFSET {}", binder.push(Bind::Int(offset))));
        }
        Ok(binder.finish(sql))
    }

    pub fn count(&self, plan: &QueryPlan) -> Result<SqlStatement> {
        let mut binder = Binder::new(self.dialect);
        let where_sql = self.where_clause(plan, &mut binder)?;
        let sql = format!(
            "SELECT COUNT(*) AS {} FROM {} {}{}",
            self.q("count"),
            self.table(),
            BASE,
            where_sql
        );
        Ok(binder.finish(sql))
    }

    pub fn sum(&self, field: &str, plan: &QueryPlan) -> Result<SqlStatement> {
        match self.schema.field_type_of(field) {
            Some(FieldType::Integer) | Some(FieldType::Float) => {}
            _ => {
                return Err(DataError::invalid_query(format!(
                    "cannot sum non-numeric field '{}'",
                    field
                )))
            }
        }
        let column = self.schema.column_for(field)?;
        let mut binder = Binder::new(self.dialect);
        let where_sql = self.where_clause(plan, &mut binder)?;
        let sql = format!(
            "SELECT CAST(COALESCE(SUM({}), 0) AS {}) AS {} FROM {} {}{}",
            self.col(&column),
            self.dialect.double_type(),
            self.q("total"),
            self.table(),
            BASE,
            where_sql
        );
        Ok(binder.finish(sql))
    }

    /// DDL creating the table (and its indexes) if absent
    pub fn create_table(&self) -> Vec<String> {
        let d = self.dialect;
        let mut defs = vec![format!("{} {}", self.q(ID_FIELD), d.id_column())];
        let mut constraints = Vec::new();
        let mut indexes = Vec::new();

        for field in &self.schema.fields {
            let column = field.column_name();
            let mut def = format!("{} {}", self.q(&column), d.column_type(field.field_type));
            if field.required {
                def.push_str(" NOT NULL");
            }
            if let Some(target) = &field.references {
                match d {
                    SqlDialect::Postgres => {
                        def.push_str(&format!(" REFERENCES {} ({})", self.q(target), self.q(ID_FIELD)));
                        indexes.push(format!(
                            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                            self.q(&format!("{}_{}_idx", self.schema.name, column)),
                            self.table(),
                            self.q(&column)
                        ));
                    }
                    SqlDialect::MySql => constraints.push(format!(
                        "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
                        self.q(&format!("fk_{}_{}", self.schema.name, column)),
                        self.q(&column),
                        self.q(target),
                        self.q(ID_FIELD)
                    )),
                }
            }
            if field.field_type == FieldType::Json && d == SqlDialect::Postgres {
                indexes.push(format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {} USING GIN ({})",
                    self.q(&format!("{}_{}_gin", self.schema.name, column)),
                    self.table(),
                    self.q(&column)
                ));
            }
            defs.push(def);
        }

        if self.schema.timestamps {
            for column in ["created_at", "updated_at"] {
                defs.push(format!(
                    "{} {} NOT NULL DEFAULT {}",
                    self.q(column),
                    d.column_type(FieldType::Timestamp),
                    d.now_default()
                ));
            }
        }
        defs.extend(constraints);

        let mut table = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.table(),
            defs.join(", ")
        );
        if d == SqlDialect::MySql {
            table.push_str(" ENGINE=InnoDB DEFAULT CHARSET=utf8mb4");
        }

        let mut statements = vec![table];
        statements.extend(indexes);
        statements
    }

    fn order_by(&self, plan: &QueryPlan) -> Result<String> {
        let dir = |order: SortOrder| match order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        let mut terms = Vec::with_capacity(2);
        let mut id_order = SortOrder::Asc;
        if let Some(sort) = &plan.sort {
            if sort.field == ID_FIELD {
                id_order = sort.order;
            } else {
                if sort.field.contains('.') {
                    return Err(DataError::invalid_query(format!(
                        "cannot sort by nested path '{}'",
                        sort.field
                    )));
                }
                let column = self.schema.column_for(&sort.field)?;
                terms.push(format!("{} {}", self.col(&column), dir(sort.order)));
            }
        }
        // id tiebreaker keeps windows stable across pages
        terms.push(format!("{} {}", self.col(ID_FIELD), dir(id_order)));
        Ok(format!(" ORDER BY {}", terms.join(", ")))
    }

    fn where_clause(&self, plan: &QueryPlan, binder: &mut Binder) -> Result<String> {
        let mut clauses = Vec::new();
        for (key, filter) in &plan.filter {
            clauses.push(self.filter_clause(key, filter, plan.text_match, binder)?);
        }
        if let Some(search) = &plan.search {
            clauses.push(self.search_clause(search, binder)?);
        }
        if clauses.is_empty() {
            Ok(String::new())
        } else {
            Ok(format!(" WHERE {}", clauses.join(" AND ")))
        }
    }

    fn filter_clause(
        &self,
        key: &str,
        filter: &Filter,
        text_match: TextMatch,
        binder: &mut Binder,
    ) -> Result<String> {
        if let Some((def, path)) = self.schema.json_root(key) {
            let expr = self.col(&def.column_name());
            return self.json_filter(&expr, key, &path, filter, text_match, binder);
        }
        if key.contains('.') {
            return Err(DataError::invalid_query(format!(
                "'{}' is not a path into a JSON field",
                key
            )));
        }

        let column = self.schema.column_for(key)?;
        let field_type = self.schema.field_type_of(key).unwrap_or(FieldType::String);
        let expr = self.col(&column);

        match filter {
            Filter::Eq(Value::Null) => Ok(format!("{} IS NULL", expr)),
            Filter::Eq(value) => {
                let ph = binder.push(bind_value(key, field_type, value)?);
                Ok(self.eq_expr(&expr, &ph, field_type, text_match))
            }
            Filter::Contains(text) => Ok(self.contains_expr(&expr, field_type, text, binder)),
            Filter::In(values) if values.is_empty() => Ok("1 = 0".to_string()),
            Filter::In(values) => {
                let mut parts = Vec::with_capacity(values.len());
                for value in values {
                    let ph = binder.push(bind_value(key, field_type, value)?);
                    parts.push(self.eq_expr(&expr, &ph, field_type, text_match));
                }
                Ok(format!("({})", parts.join(" OR ")))
            }
        }
    }

    fn eq_expr(&self, expr: &str, ph: &str, field_type: FieldType, text_match: TextMatch) -> String {
        match (field_type, text_match, self.dialect) {
            (FieldType::String, TextMatch::CaseInsensitive, _) => {
                format!("LOWER({}) = LOWER({})", expr, ph)
            }
            // MySQL's default collation folds case; compare bytes instead
            (FieldType::String, TextMatch::Exact, SqlDialect::MySql) => {
                format!("{} = {} COLLATE utf8mb4_bin", expr, ph)
            }
            (FieldType::Json, _, SqlDialect::Postgres) => format!("{} = {}::jsonb", expr, ph),
            (FieldType::Json, _, SqlDialect::MySql) => format!("{} = CAST({} AS JSON)", expr, ph),
            _ => format!("{} = {}", expr, ph),
        }
    }

    fn contains_expr(
        &self,
        expr: &str,
        field_type: FieldType,
        text: &str,
        binder: &mut Binder,
    ) -> String {
        let lhs = if field_type == FieldType::String {
            expr.to_string()
        } else {
            self.dialect.text_cast(expr)
        };
        match self.dialect {
            SqlDialect::Postgres => {
                let ph = binder.push(Bind::Text(format!("%{}%", escape_like(text))));
                format!("{} ILIKE {}", lhs, ph)
            }
            SqlDialect::MySql => {
                let ph = binder.push(Bind::Text(format!("%{}%", escape_like(&text.to_lowercase()))));
                format!("LOWER({}) LIKE {}", lhs, ph)
            }
        }
    }

    fn json_filter(
        &self,
        expr: &str,
        key: &str,
        path: &[PathSegment],
        filter: &Filter,
        text_match: TextMatch,
        binder: &mut Binder,
    ) -> Result<String> {
        match filter {
            Filter::Eq(value) => self.json_eq(expr, key, path, value, text_match, binder),
            Filter::Contains(text) => Ok(self.json_contains(expr, path, text, binder)),
            Filter::In(values) if values.is_empty() => Ok("1 = 0".to_string()),
            Filter::In(values) => {
                let mut parts = Vec::with_capacity(values.len());
                for value in values {
                    parts.push(self.json_eq(expr, key, path, value, text_match, binder)?);
                }
                Ok(format!("({})", parts.join(" OR ")))
            }
        }
    }

    /// Equality on a value nested inside a JSON column
    fn json_eq(
        &self,
        expr: &str,
        key: &str,
        path: &[PathSegment],
        value: &Value,
        text_match: TextMatch,
        binder: &mut Binder,
    ) -> Result<String> {
        if let (TextMatch::CaseInsensitive, Value::String(s)) = (text_match, value) {
            return Ok(match self.dialect {
                SqlDialect::Postgres => {
                    let p = binder.push(Bind::Text(pg_jsonpath(path)));
                    let t = binder.push(Bind::Text(s.clone()));
                    format!(
                        "EXISTS (SELECT 1 FROM jsonb_path_query({}, {}::jsonpath) AS v(val) \
                         WHERE jsonb_typeof(v.val) = 'string' AND LOWER(v.val #>> '{{}}') = LOWER({}))",
                        expr, p, t
                    )
                }
                SqlDialect::MySql => {
                    let p = binder.push(Bind::Text(mysql_json_path(path, !has_index(path))));
                    let t = binder.push(Bind::Text(format!(
                        "%{}%",
                        escape_like(&json_string(&s.to_lowercase()))
                    )));
                    format!(
                        "LOWER({}) LIKE {}",
                        self.dialect.text_cast(&format!("JSON_EXTRACT({}, {})", expr, p)),
                        t
                    )
                }
            });
        }

        let json = value.to_json();
        if has_index(path) {
            return Ok(match self.dialect {
                SqlDialect::Postgres => {
                    let p = binder.push(Bind::Text(pg_text_array(path)));
                    let v = binder.push(Bind::Json(json));
                    format!("{} #> {}::text[] = {}::jsonb", expr, p, v)
                }
                SqlDialect::MySql => {
                    let p = binder.push(Bind::Text(mysql_json_path(path, false)));
                    let v = binder.push(Bind::Text(json.to_string()));
                    format!("JSON_EXTRACT({}, {}) = CAST({} AS JSON)", expr, p, v)
                }
            });
        }

        let scalar = !json.is_object() && !json.is_array();
        Ok(match self.dialect {
            // scalar comparison through a lax path reaches into nested arrays
            SqlDialect::Postgres if scalar => {
                let p = binder.push(Bind::Text(format!("{} ? (@ == {})", pg_jsonpath(path), json)));
                format!("{} @? {}::jsonpath", expr, p)
            }
            SqlDialect::Postgres => {
                let candidate = nest_json(path, json);
                let a = binder.push(Bind::Json(candidate.clone()));
                let b = binder.push(Bind::Json(serde_json::Value::Array(vec![candidate])));
                format!("({} @> {}::jsonb OR {} @> {}::jsonb)", expr, a, expr, b)
            }
            SqlDialect::MySql => {
                if json.is_null() {
                    return Err(DataError::invalid_query(format!(
                        "cannot match null inside '{}'",
                        key
                    )));
                }
                let candidate = nest_json(path, json);
                let c = binder.push(Bind::Text(candidate.to_string()));
                format!("JSON_CONTAINS({}, CAST({} AS JSON))", expr, c)
            }
        })
    }

    /// Case-insensitive partial match on the string leaves under `path`
    fn json_contains(&self, expr: &str, path: &[PathSegment], text: &str, binder: &mut Binder) -> String {
        match self.dialect {
            SqlDialect::Postgres => {
                let jsonpath = if path.is_empty() {
                    "strict $.**".to_string()
                } else {
                    pg_jsonpath(path)
                };
                let p = binder.push(Bind::Text(jsonpath));
                let t = binder.push(Bind::Text(format!("%{}%", escape_like(text))));
                format!(
                    "EXISTS (SELECT 1 FROM jsonb_path_query({}, {}::jsonpath) AS v(val) \
                     WHERE jsonb_typeof(v.val) = 'string' AND v.val #>> '{{}}' ILIKE {})",
                    expr, p, t
                )
            }
            SqlDialect::MySql => {
                let target = if path.is_empty() {
                    expr.to_string()
                } else {
                    let p = binder.push(Bind::Text(mysql_json_path(path, !has_index(path))));
                    format!("JSON_EXTRACT({}, {})", expr, p)
                };
                let t = binder.push(Bind::Text(format!("%{}%", escape_like(&text.to_lowercase()))));
                format!("LOWER({}) LIKE {}", self.dialect.text_cast(&target), t)
            }
        }
    }

    fn search_clause(&self, search: &Search, binder: &mut Binder) -> Result<String> {
        let mut parts = Vec::with_capacity(search.fields.len());
        for field in &search.fields {
            if let Some((def, path)) = self.schema.json_root(field) {
                let expr = self.col(&def.column_name());
                parts.push(self.json_contains(&expr, &path, &search.term, binder));
            } else if let (Ok(column), Some(field_type)) =
                (self.schema.column_for(field), self.schema.field_type_of(field))
            {
                let expr = self.col(&column);
                if field_type == FieldType::Json {
                    parts.push(self.json_contains(&expr, &[], &search.term, binder));
                } else {
                    parts.push(self.contains_expr(&expr, field_type, &search.term, binder));
                }
            }
        }
        if parts.is_empty() {
            return Err(DataError::invalid_query(format!(
                "collection '{}' has no searchable fields",
                self.schema.name
            )));
        }
        Ok(format!("({})", parts.join(" OR ")))
    }
}
