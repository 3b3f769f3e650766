//! `ToSql` / `FromSql` helpers for the domain types.
//!
//! Enumerations are stored as `TEXT` using their `Display` / `FromStr`
//! representation, value objects as `JSONB`.

/// Implements `ToSql` and `FromSql` for types that round-trip through
/// `Display` and `FromStr`, stored in `TEXT` or `VARCHAR` columns.
macro_rules! impl_text_sql {
    ($($ty:ty),+ $(,)?) => {$(
        impl<'a> postgres_types::FromSql<'a> for $ty {
            fn from_sql(
                ty: &postgres_types::Type,
                raw: &'a [u8],
            ) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
                let text = <&str as postgres_types::FromSql>::from_sql(ty, raw)?;

                Ok(text.parse::<$ty>()?)
            }

            postgres_types::accepts!(TEXT, VARCHAR);
        }

        impl postgres_types::ToSql for $ty {
            fn to_sql(
                &self,
                ty: &postgres_types::Type,
                w: &mut bytes::BytesMut,
            ) -> Result<postgres_types::IsNull, Box<dyn std::error::Error + Sync + Send>> {
                postgres_types::ToSql::to_sql(&self.to_string(), ty, w)
            }

            postgres_types::accepts!(TEXT, VARCHAR);
            postgres_types::to_sql_checked!();
        }
    )+};
}

/// Implements `ToSql` and `FromSql` for serde value objects stored in `JSONB`.
macro_rules! impl_json_sql {
    ($($ty:ty),+ $(,)?) => {$(
        impl<'a> postgres_types::FromSql<'a> for $ty {
            fn from_sql(
                ty: &postgres_types::Type,
                raw: &'a [u8],
            ) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
                let json = <postgres_types::Json<$ty> as postgres_types::FromSql>::from_sql(ty, raw)?;

                Ok(json.0)
            }

            postgres_types::accepts!(JSON, JSONB);
        }

        impl postgres_types::ToSql for $ty {
            fn to_sql(
                &self,
                ty: &postgres_types::Type,
                w: &mut bytes::BytesMut,
            ) -> Result<postgres_types::IsNull, Box<dyn std::error::Error + Sync + Send>> {
                postgres_types::ToSql::to_sql(&postgres_types::Json(self), ty, w)
            }

            postgres_types::accepts!(JSON, JSONB);
            postgres_types::to_sql_checked!();
        }
    )+};
}

pub(crate) use impl_json_sql;
pub(crate) use impl_text_sql;
