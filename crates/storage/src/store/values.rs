#![forbid(unsafe_code)]

use kb_core::{AttributeValue, BranchId, ObjectId, ObjectRef, RevisionId, TypeName};
use rusqlite::Row;
use rusqlite::types::Value as SqlValue;

use super::error::StoreError;
use super::meta::{AttributeDescriptor, AttributeKind, ColumnType};
use super::schema;

pub(in crate::store) fn read_scalar(
    row: &Row<'_>,
    idx: usize,
    column_type: ColumnType,
) -> Result<Option<AttributeValue>, StoreError> {
    let value = match column_type {
        ColumnType::Long => row.get::<_, Option<i64>>(idx)?.map(AttributeValue::Long),
        ColumnType::Double => row.get::<_, Option<f64>>(idx)?.map(AttributeValue::Double),
        ColumnType::Varchar => row.get::<_, Option<String>>(idx)?.map(AttributeValue::Text),
        ColumnType::Clob => row.get::<_, Option<String>>(idx)?.map(AttributeValue::Clob),
        ColumnType::Blob => row.get::<_, Option<Vec<u8>>>(idx)?.map(AttributeValue::Blob),
    };
    Ok(value)
}

/// Assembles the logical value of one attribute from its physical columns,
/// starting at `idx`. Consumes `attribute.columns().len()` columns.
pub(in crate::store) fn read_attribute(
    row: &Row<'_>,
    idx: usize,
    attribute: &AttributeDescriptor,
) -> Result<Option<AttributeValue>, StoreError> {
    match &attribute.kind {
        AttributeKind::Scalar(column_type) => read_scalar(row, idx, *column_type),
        AttributeKind::PolymorphicRef => {
            let Some(raw_id) = row.get::<_, Option<String>>(idx)? else {
                return Ok(None);
            };
            let id = ObjectId::try_new(raw_id)
                .map_err(|_| StoreError::Corrupt("invalid reference id"))?;
            let type_name = row
                .get::<_, Option<String>>(idx + 1)?
                .map(TypeName::try_new)
                .transpose()
                .map_err(|_| StoreError::Corrupt("invalid reference type"))?;
            Ok(Some(AttributeValue::Ref(ObjectRef {
                id,
                type_name,
                revision: None,
                branch: None,
            })))
        }
        AttributeKind::HistoricRef => {
            let Some(raw_id) = row.get::<_, Option<String>>(idx)? else {
                return Ok(None);
            };
            let id = ObjectId::try_new(raw_id)
                .map_err(|_| StoreError::Corrupt("invalid reference id"))?;
            let revision = row
                .get::<_, Option<i64>>(idx + 1)?
                .map(RevisionId::try_new)
                .transpose()
                .map_err(|_| StoreError::Corrupt("invalid reference revision"))?;
            let branch = row
                .get::<_, Option<i64>>(idx + 2)?
                .map(BranchId::try_new)
                .transpose()
                .map_err(|_| StoreError::Corrupt("invalid reference branch"))?;
            Ok(Some(AttributeValue::Ref(ObjectRef {
                id,
                type_name: None,
                revision,
                branch,
            })))
        }
    }
}

/// Binds one attribute value to its physical columns, in column order.
pub(in crate::store) fn bind_attribute(
    attribute: &AttributeDescriptor,
    value: Option<&AttributeValue>,
) -> Result<Vec<SqlValue>, StoreError> {
    match (&attribute.kind, value) {
        (AttributeKind::Scalar(_), None) => Ok(vec![SqlValue::Null]),
        (AttributeKind::Scalar(column_type), Some(value)) => {
            let bound = match (column_type, value) {
                (ColumnType::Long, AttributeValue::Long(v)) => SqlValue::Integer(*v),
                (ColumnType::Double, AttributeValue::Double(v)) => {
                    // SQLite stores NaN as NULL, which would silently turn
                    // the value into an absent one.
                    if v.is_nan() {
                        return Err(StoreError::InvalidInput("double value must not be NaN"));
                    }
                    SqlValue::Real(*v)
                }
                (ColumnType::Varchar, AttributeValue::Text(v)) => SqlValue::Text(v.clone()),
                (ColumnType::Clob, AttributeValue::Clob(v)) => SqlValue::Text(v.clone()),
                (ColumnType::Blob, AttributeValue::Blob(v)) => SqlValue::Blob(v.clone()),
                _ => return Err(StoreError::InvalidInput("value does not match column type")),
            };
            Ok(vec![bound])
        }
        (AttributeKind::PolymorphicRef, None) => Ok(vec![SqlValue::Null, SqlValue::Null]),
        (AttributeKind::PolymorphicRef, Some(AttributeValue::Ref(reference))) => Ok(vec![
            SqlValue::Text(reference.id.as_str().to_string()),
            match &reference.type_name {
                Some(type_name) => SqlValue::Text(type_name.as_str().to_string()),
                None => SqlValue::Null,
            },
        ]),
        (AttributeKind::HistoricRef, None) => {
            Ok(vec![SqlValue::Null, SqlValue::Null, SqlValue::Null])
        }
        (AttributeKind::HistoricRef, Some(AttributeValue::Ref(reference))) => Ok(vec![
            SqlValue::Text(reference.id.as_str().to_string()),
            match reference.revision {
                Some(revision) => SqlValue::Integer(revision.as_i64()),
                None => SqlValue::Null,
            },
            match reference.branch {
                Some(branch) => SqlValue::Integer(branch.as_i64()),
                None => SqlValue::Null,
            },
        ]),
        (AttributeKind::PolymorphicRef | AttributeKind::HistoricRef, Some(_)) => {
            Err(StoreError::InvalidInput("reference attribute requires a reference value"))
        }
    }
}

/// Typed flex columns in select order: DATA_TYPE, LONG, DOUBLE, VARCHAR,
/// CLOB, BLOB.
pub(in crate::store) fn read_flex_value(
    row: &Row<'_>,
    idx: usize,
) -> Result<Option<AttributeValue>, StoreError> {
    let Some(data_type) = row.get::<_, Option<i64>>(idx)? else {
        return Ok(None);
    };
    let value = match data_type {
        schema::LONG_TYPE => row
            .get::<_, Option<i64>>(idx + 1)?
            .map(AttributeValue::Long),
        schema::DOUBLE_TYPE => row
            .get::<_, Option<f64>>(idx + 2)?
            .map(AttributeValue::Double),
        schema::STRING_TYPE => row
            .get::<_, Option<String>>(idx + 3)?
            .map(AttributeValue::Text),
        schema::CLOB_TYPE => row
            .get::<_, Option<String>>(idx + 4)?
            .map(AttributeValue::Clob),
        schema::BLOB_TYPE => row
            .get::<_, Option<Vec<u8>>>(idx + 5)?
            .map(AttributeValue::Blob),
        _ => return Err(StoreError::Corrupt("unknown flex data type")),
    };
    match value {
        Some(value) => Ok(Some(value)),
        None => Err(StoreError::Corrupt("flex value column is empty")),
    }
}

/// Encodes a flex value into (DATA_TYPE, LONG, DOUBLE, VARCHAR, CLOB, BLOB).
pub(in crate::store) fn encode_flex_value(
    value: &AttributeValue,
) -> Result<(i64, [SqlValue; 5]), StoreError> {
    let mut columns = [
        SqlValue::Null,
        SqlValue::Null,
        SqlValue::Null,
        SqlValue::Null,
        SqlValue::Null,
    ];
    let data_type = match value {
        AttributeValue::Long(v) => {
            columns[0] = SqlValue::Integer(*v);
            schema::LONG_TYPE
        }
        AttributeValue::Double(v) => {
            // SQLite stores NaN as NULL; a typed flex row with an empty
            // value column would read back as corruption.
            if v.is_nan() {
                return Err(StoreError::InvalidInput("double value must not be NaN"));
            }
            columns[1] = SqlValue::Real(*v);
            schema::DOUBLE_TYPE
        }
        AttributeValue::Text(v) => {
            columns[2] = SqlValue::Text(v.clone());
            schema::STRING_TYPE
        }
        AttributeValue::Clob(v) => {
            columns[3] = SqlValue::Text(v.clone());
            schema::CLOB_TYPE
        }
        AttributeValue::Blob(v) => {
            columns[4] = SqlValue::Blob(v.clone());
            schema::BLOB_TYPE
        }
        AttributeValue::Ref(_) => {
            return Err(StoreError::InvalidInput("flex values must be scalar"));
        }
    };
    Ok((data_type, columns))
}
