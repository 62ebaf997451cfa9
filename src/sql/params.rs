//! Convert serde_json::Value to types that sqlx can bind.

use serde_json::Value;
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgArguments, PgTypeInfo, Postgres};
use sqlx::{Database, Type};

/// A value bound to a PostgreSQL statement. Every placeholder in generated SQL carries an
/// explicit cast, so strings travel as TEXT and the server converts them.
#[derive(Clone, Debug, PartialEq)]
pub enum PgBindValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Text(String),
    Json(Value),
}

impl PgBindValue {
    pub fn from_json(v: &Value) -> Self {
        match v {
            Value::Null => PgBindValue::Null,
            Value::Bool(b) => PgBindValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    PgBindValue::I64(i)
                } else {
                    PgBindValue::F64(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => PgBindValue::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => PgBindValue::Json(v.clone()),
        }
    }

    /// Bind for a json/jsonb column: scalars are wrapped as JSON documents, null stays SQL NULL.
    pub fn json(v: &Value) -> Self {
        match v {
            Value::Null => PgBindValue::Null,
            other => PgBindValue::Json(other.clone()),
        }
    }
}

impl<'q> Encode<'q, Postgres> for PgBindValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        Ok(match self {
            PgBindValue::Null => <Option<&str> as Encode<Postgres>>::encode_by_ref(&None, buf)?,
            PgBindValue::Bool(b) => <bool as Encode<Postgres>>::encode_by_ref(b, buf)?,
            PgBindValue::I64(n) => <i64 as Encode<Postgres>>::encode_by_ref(n, buf)?,
            PgBindValue::F64(n) => <f64 as Encode<Postgres>>::encode_by_ref(n, buf)?,
            PgBindValue::Text(s) => <&str as Encode<Postgres>>::encode_by_ref(&s.as_str(), buf)?,
            PgBindValue::Json(v) => <Value as Encode<Postgres>>::encode_by_ref(v, buf)?,
        })
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        Some(match self {
            PgBindValue::Null | PgBindValue::Text(_) => <&str as Type<Postgres>>::type_info(),
            PgBindValue::Bool(_) => <bool as Type<Postgres>>::type_info(),
            PgBindValue::I64(_) => <i64 as Type<Postgres>>::type_info(),
            PgBindValue::F64(_) => <f64 as Type<Postgres>>::type_info(),
            PgBindValue::Json(_) => <Value as Type<Postgres>>::type_info(),
        })
    }
}

impl Type<Postgres> for PgBindValue {
    fn type_info() -> PgTypeInfo {
        <&str as Type<Postgres>>::type_info()
    }
}

/// Attach every parameter of a built statement to a sqlx query.
pub fn bind_all<'q>(sql: &'q str, params: &[PgBindValue]) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    let mut query = sqlx::query(sql);
    for p in params {
        query = query.bind(p.clone());
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_variants() {
        assert_eq!(PgBindValue::from_json(&json!(null)), PgBindValue::Null);
        assert_eq!(PgBindValue::from_json(&json!(7)), PgBindValue::I64(7));
        assert_eq!(PgBindValue::from_json(&json!(1.5)), PgBindValue::F64(1.5));
        assert_eq!(PgBindValue::from_json(&json!("a")), PgBindValue::Text("a".into()));
        assert_eq!(PgBindValue::from_json(&json!([1])), PgBindValue::Json(json!([1])));
    }

    #[test]
    fn test_json_column_wraps_scalars() {
        assert_eq!(PgBindValue::json(&json!("x")), PgBindValue::Json(json!("x")));
        assert_eq!(PgBindValue::json(&json!(null)), PgBindValue::Null);
    }
}
