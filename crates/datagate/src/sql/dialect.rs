use crate::schema::FieldType;

/// SQL flavour spoken by a relational backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Postgres,
    MySql,
}

impl SqlDialect {
    /// Quote an identifier, doubling any embedded quote character
    pub fn quote_ident(&self, ident: &str) -> String {
        match self {
            SqlDialect::Postgres => format!("\"{}\"", ident.replace('"', "\"\"")),
            SqlDialect::MySql => format!("`{}`", ident.replace('`', "``")),
        }
    }

    /// Bind placeholder for the `n`th (1-based) parameter
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            SqlDialect::Postgres => format!("${}", n),
            SqlDialect::MySql => "?".to_string(),
        }
    }

    /// Whether writes can hand back the stored row in the same statement
    pub fn supports_returning(&self) -> bool {
        matches!(self, SqlDialect::Postgres)
    }

    pub fn column_type(&self, field_type: FieldType) -> &'static str {
        match (self, field_type) {
            (_, FieldType::String) => "TEXT",
            (_, FieldType::Integer) | (_, FieldType::Reference) => "BIGINT",
            (SqlDialect::Postgres, FieldType::Float) => "DOUBLE PRECISION",
            (SqlDialect::MySql, FieldType::Float) => "DOUBLE",
            (_, FieldType::Boolean) => "BOOLEAN",
            (SqlDialect::Postgres, FieldType::Timestamp) => "TIMESTAMPTZ",
            (SqlDialect::MySql, FieldType::Timestamp) => "DATETIME(3)",
            (SqlDialect::Postgres, FieldType::Json) => "JSONB",
            (SqlDialect::MySql, FieldType::Json) => "JSON",
        }
    }

    pub fn id_column(&self) -> &'static str {
        match self {
            SqlDialect::Postgres => "BIGSERIAL PRIMARY KEY",
            SqlDialect::MySql => "BIGINT AUTO_INCREMENT PRIMARY KEY",
        }
    }

    /// Column default for generated timestamps
    pub fn now_default(&self) -> &'static str {
        match self {
            SqlDialect::Postgres => "NOW()",
            SqlDialect::MySql => "CURRENT_TIMESTAMP(3)",
        }
    }

    /// Type a numeric aggregate is cast to so it decodes as f64
    pub fn double_type(&self) -> &'static str {
        match self {
            SqlDialect::Postgres => "DOUBLE PRECISION",
            SqlDialect::MySql => "DOUBLE",
        }
    }

    /// Cast an arbitrary column expression to text
    pub fn text_cast(&self, expr: &str) -> String {
        match self {
            SqlDialect::Postgres => format!("CAST({} AS TEXT)", expr),
            SqlDialect::MySql => format!("CAST({} AS CHAR)", expr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_escapes() {
        assert_eq!(SqlDialect::Postgres.quote_ident("user_id"), "\"user_id\"");
        assert_eq!(SqlDialect::Postgres.quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(SqlDialect::MySql.quote_ident("a`b"), "`a``b`");
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(SqlDialect::Postgres.placeholder(3), "$3");
        assert_eq!(SqlDialect::MySql.placeholder(3), "?");
    }
}
