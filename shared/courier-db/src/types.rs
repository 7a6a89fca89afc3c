//! Postgres (de)serialisation glue for the identifier codec types
//! owned by `courier-core` (spec component A). `courier-core` stays
//! free of a `tokio-postgres` dependency, so the `ToSql`/`FromSql`
//! impls live here instead of alongside the types themselves.

use bytes::BytesMut;
use courier_core::{NullId, NullString};
use tokio_postgres::types::{FromSql, IsNull, ToSql, Type};

impl ToSql for NullId {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self.get() {
            Some(v) => v.to_sql(ty, out),
            None => Ok(IsNull::Yes),
        }
    }

    fn accepts(ty: &Type) -> bool {
        <i64 as ToSql>::accepts(ty)
    }

    tokio_postgres::types::to_sql_checked!();
}

impl<'a> FromSql<'a> for NullId {
    fn from_sql(
        ty: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(NullId::new(i64::from_sql(ty, raw)?))
    }

    fn from_sql_null(_: &Type) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(NullId::NULL)
    }

    fn accepts(ty: &Type) -> bool {
        <i64 as FromSql>::accepts(ty)
    }
}

impl ToSql for NullString {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self.get() {
            Some(v) => v.to_sql(ty, out),
            None => Ok(IsNull::Yes),
        }
    }

    fn accepts(ty: &Type) -> bool {
        <&str as ToSql>::accepts(ty)
    }

    tokio_postgres::types::to_sql_checked!();
}

impl<'a> FromSql<'a> for NullString {
    fn from_sql(
        ty: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(NullString::new(<&str as FromSql>::from_sql(ty, raw)?))
    }

    fn from_sql_null(_: &Type) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(NullString::default())
    }

    fn accepts(ty: &Type) -> bool {
        <&str as FromSql>::accepts(ty)
    }
}

/// Pull a typed column out of a row, mapping a missing/NULL column
/// into [`crate::DbError::NotFound`] only at the row level — callers
/// decide whether a NULL column is legitimate via `Option<T>`.
pub fn get_required<'a, T>(row: &'a tokio_postgres::Row, idx: &str) -> crate::Result<T>
where
    T: FromSql<'a>,
{
    row.try_get(idx).map_err(|e| crate::DbError::Query(e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_id_accepts_int8() {
        assert!(<NullId as ToSql>::accepts(&Type::INT8));
    }

    #[test]
    fn null_string_accepts_text() {
        assert!(<NullString as ToSql>::accepts(&Type::TEXT));
    }
}
