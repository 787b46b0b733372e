use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use datagate::sql::Bind;
use datagate::{FieldType, Result, Value};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::types::{Json, JsonValue};
use sqlx::{Column, Decode, Postgres, Row, Type, TypeInfo};

use crate::map_sqlx_error;

pub(crate) type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

/// Attach one parameter; NULLs carry the column type so PostgreSQL can infer it
pub(crate) fn bind<'q>(query: PgQuery<'q>, bind: &'q Bind) -> PgQuery<'q> {
    match bind {
        Bind::Null(field_type) => match field_type {
            FieldType::Integer | FieldType::Reference => query.bind(None::<i64>),
            FieldType::Float => query.bind(None::<f64>),
            FieldType::Boolean => query.bind(None::<bool>),
            FieldType::Timestamp => query.bind(None::<DateTime<Utc>>),
            FieldType::Json => query.bind(None::<Json<JsonValue>>),
            FieldType::String => query.bind(None::<String>),
        },
        Bind::Bool(b) => query.bind(*b),
        Bind::Int(i) => query.bind(*i),
        Bind::Float(f) => query.bind(*f),
        Bind::Text(s) => query.bind(s.as_str()),
        Bind::Timestamp(ts) => query.bind(*ts),
        Bind::Json(v) => query.bind(Json(v)),
    }
}

fn get<'r, T>(row: &'r PgRow, idx: usize) -> Result<Option<T>>
where
    T: Decode<'r, Postgres> + Type<Postgres>,
{
    row.try_get::<Option<T>, _>(idx).map_err(map_sqlx_error)
}

/// Read every column of a row as `(name, value)` pairs
pub(crate) fn columns(row: &PgRow) -> Result<Vec<(String, Value)>> {
    row.columns()
        .iter()
        .map(|column| {
            let idx = column.ordinal();
            let value = match column.type_info().name() {
                "BOOL" => get::<bool>(row, idx)?.map(Value::Bool),
                "INT2" => get::<i16>(row, idx)?.map(|v| Value::Int(v.into())),
                "INT4" => get::<i32>(row, idx)?.map(|v| Value::Int(v.into())),
                "INT8" => get::<i64>(row, idx)?.map(Value::Int),
                "FLOAT4" => get::<f32>(row, idx)?.map(|v| Value::Float(v.into())),
                "FLOAT8" => get::<f64>(row, idx)?.map(Value::Float),
                "TIMESTAMPTZ" => get::<DateTime<Utc>>(row, idx)?.map(Value::Timestamp),
                "TIMESTAMP" => get::<NaiveDateTime>(row, idx)?
                    .map(|naive| Value::Timestamp(Utc.from_utc_datetime(&naive))),
                "JSON" | "JSONB" => get::<JsonValue>(row, idx)?.map(Value::from),
                _ => get::<String>(row, idx)?.map(Value::String),
            };
            Ok((column.name().to_string(), value.unwrap_or_default()))
        })
        .collect()
}
