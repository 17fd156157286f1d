#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use kb_core::{AttributeName, AttributeValue, BranchId, ObjectId, RevisionId, TypeName};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Transaction, params, params_from_iter};

use super::error::StoreError;
use super::meta::TypeDescriptor;
use super::schema::CURRENT_REV;
use super::values::{bind_attribute, encode_flex_value, read_attribute};
use super::KnowledgeStore;

enum CommitOp {
    Create {
        type_name: TypeName,
        id: ObjectId,
        values: BTreeMap<AttributeName, AttributeValue>,
    },
    Update {
        type_name: TypeName,
        id: ObjectId,
        values: BTreeMap<AttributeName, Option<AttributeValue>>,
    },
    SetFlex {
        type_name: TypeName,
        id: ObjectId,
        attr: AttributeName,
        value: Option<AttributeValue>,
    },
    Delete {
        type_name: TypeName,
        id: ObjectId,
    },
}

/// A pending change set. Operations are queued and applied atomically by
/// [`CommitBuilder::commit`], which allocates the next revision, closes
/// superseded validity intervals and opens new ones.
pub struct CommitBuilder<'a> {
    store: &'a mut KnowledgeStore,
    branch: BranchId,
    ops: Vec<CommitOp>,
}

impl<'a> CommitBuilder<'a> {
    pub(in crate::store) fn new(store: &'a mut KnowledgeStore, branch: BranchId) -> Self {
        Self {
            store,
            branch,
            ops: Vec::new(),
        }
    }

    pub fn create(
        mut self,
        type_name: TypeName,
        id: ObjectId,
        values: BTreeMap<AttributeName, AttributeValue>,
    ) -> Self {
        self.ops.push(CommitOp::Create {
            type_name,
            id,
            values,
        });
        self
    }

    /// Partial row update: `Some` sets an attribute, `None` clears it.
    pub fn update(
        mut self,
        type_name: TypeName,
        id: ObjectId,
        values: BTreeMap<AttributeName, Option<AttributeValue>>,
    ) -> Self {
        self.ops.push(CommitOp::Update {
            type_name,
            id,
            values,
        });
        self
    }

    /// Sets (`Some`) or deletes (`None`) one open-schema attribute value.
    pub fn set_flex(
        mut self,
        type_name: TypeName,
        id: ObjectId,
        attr: AttributeName,
        value: Option<AttributeValue>,
    ) -> Self {
        self.ops.push(CommitOp::SetFlex {
            type_name,
            id,
            attr,
            value,
        });
        self
    }

    pub fn delete(mut self, type_name: TypeName, id: ObjectId) -> Self {
        self.ops.push(CommitOp::Delete { type_name, id });
        self
    }

    pub fn commit(self) -> Result<RevisionId, StoreError> {
        if self.ops.is_empty() {
            return Err(StoreError::InvalidInput("empty commit"));
        }

        let branch = self.branch;
        let rev = super::schema::last_revision(&self.store.conn)? + 1;

        let KnowledgeStore {
            ref mut conn,
            ref types,
            ..
        } = *self.store;
        let tx = conn.transaction()?;

        let mut touched: BTreeSet<TypeName> = BTreeSet::new();
        for op in &self.ops {
            match op {
                CommitOp::Create {
                    type_name,
                    id,
                    values,
                } => {
                    let descriptor = lookup(types, type_name)?;
                    check_branch(descriptor, branch)?;
                    apply_create(&tx, descriptor, branch, id, values, rev)?;
                    touched.insert(type_name.clone());
                }
                CommitOp::Update {
                    type_name,
                    id,
                    values,
                } => {
                    let descriptor = lookup(types, type_name)?;
                    check_branch(descriptor, branch)?;
                    apply_update(&tx, descriptor, branch, id, values, rev)?;
                    touched.insert(type_name.clone());
                }
                CommitOp::SetFlex {
                    type_name,
                    id,
                    attr,
                    value,
                } => {
                    let descriptor = lookup(types, type_name)?;
                    check_branch(descriptor, branch)?;
                    apply_set_flex(&tx, descriptor, branch, id, attr, value.as_ref(), rev)?;
                    touched.insert(type_name.clone());
                }
                CommitOp::Delete { type_name, id } => {
                    let descriptor = lookup(types, type_name)?;
                    check_branch(descriptor, branch)?;
                    apply_delete(&tx, descriptor, branch, id, rev)?;
                    touched.insert(type_name.clone());
                }
            }
        }

        for type_name in &touched {
            tx.execute(
                "INSERT OR IGNORE INTO revision_xref(REV, BRANCH, TYPE) VALUES (?1, ?2, ?3)",
                params![rev, branch.as_i64(), type_name.as_str()],
            )?;
        }
        tx.execute(
            "UPDATE meta SET value = ?1 WHERE key = 'last_revision'",
            params![rev.to_string()],
        )?;

        tx.commit()?;
        RevisionId::try_new(rev).map_err(|_| StoreError::Corrupt("revision overflow"))
    }
}

fn lookup<'t>(
    types: &'t BTreeMap<TypeName, TypeDescriptor>,
    type_name: &TypeName,
) -> Result<&'t TypeDescriptor, StoreError> {
    types.get(type_name).ok_or_else(|| StoreError::UnknownType {
        type_name: type_name.as_str().to_string(),
    })
}

fn check_branch(descriptor: &TypeDescriptor, branch: BranchId) -> Result<(), StoreError> {
    if !descriptor.multiple_branches && !branch.is_trunk() {
        return Err(StoreError::BranchesNotSupported {
            type_name: descriptor.name.as_str().to_string(),
        });
    }
    Ok(())
}

/// The currently-open row version of an object, if any.
struct OpenRow {
    rowid: i64,
    rev_min: i64,
    values: BTreeMap<AttributeName, AttributeValue>,
}

fn find_open_row(
    tx: &Transaction<'_>,
    descriptor: &TypeDescriptor,
    branch: BranchId,
    id: &ObjectId,
) -> Result<Option<OpenRow>, StoreError> {
    let table = descriptor.table_name();
    let mut select = String::from("SELECT rowid, REV_MIN");
    for attribute in &descriptor.attributes {
        for column in attribute.columns() {
            select.push_str(", ");
            select.push_str(&column.name);
        }
    }
    select.push_str(&format!(" FROM {table} WHERE IDENTIFIER = ?1 AND REV_MAX = ?2"));
    let mut args: Vec<SqlValue> = vec![
        SqlValue::Text(id.as_str().to_string()),
        SqlValue::Integer(CURRENT_REV),
    ];
    if descriptor.multiple_branches {
        select.push_str(" AND BRANCH = ?3");
        args.push(SqlValue::Integer(branch.as_i64()));
    }

    let mut stmt = tx.prepare(&select)?;
    let mut rows = stmt.query(params_from_iter(args))?;
    let Some(row) = rows.next()? else {
        return Ok(None);
    };

    let rowid: i64 = row.get(0)?;
    let rev_min: i64 = row.get(1)?;
    let mut values = BTreeMap::new();
    let mut idx = 2usize;
    for attribute in &descriptor.attributes {
        if let Some(value) = read_attribute(row, idx, attribute)? {
            values.insert(attribute.name.clone(), value);
        }
        idx += attribute.columns().len();
    }
    Ok(Some(OpenRow {
        rowid,
        rev_min,
        values,
    }))
}

fn insert_row_version(
    tx: &Transaction<'_>,
    descriptor: &TypeDescriptor,
    branch: BranchId,
    id: &ObjectId,
    values: &BTreeMap<AttributeName, AttributeValue>,
    rev_min: i64,
) -> Result<(), StoreError> {
    let table = descriptor.table_name();
    let mut columns = String::from("IDENTIFIER, REV_MIN, REV_MAX");
    let mut args: Vec<SqlValue> = vec![
        SqlValue::Text(id.as_str().to_string()),
        SqlValue::Integer(rev_min),
        SqlValue::Integer(CURRENT_REV),
    ];
    if descriptor.multiple_branches {
        columns.push_str(", BRANCH");
        args.push(SqlValue::Integer(branch.as_i64()));
    }
    for attribute in &descriptor.attributes {
        for column in attribute.columns() {
            columns.push_str(", ");
            columns.push_str(&column.name);
        }
        args.extend(bind_attribute(attribute, values.get(&attribute.name))?);
    }
    let placeholders = (1..=args.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    tx.execute(
        &format!("INSERT INTO {table} ({columns}) VALUES ({placeholders})"),
        params_from_iter(args),
    )?;
    Ok(())
}

fn validate_row_attrs<'v, I>(descriptor: &TypeDescriptor, names: I) -> Result<(), StoreError>
where
    I: Iterator<Item = &'v AttributeName>,
{
    for name in names {
        if descriptor.attribute(name).is_none() {
            return Err(StoreError::InvalidInput("attribute is not declared for this type"));
        }
    }
    Ok(())
}

fn apply_create(
    tx: &Transaction<'_>,
    descriptor: &TypeDescriptor,
    branch: BranchId,
    id: &ObjectId,
    values: &BTreeMap<AttributeName, AttributeValue>,
    rev: i64,
) -> Result<(), StoreError> {
    validate_row_attrs(descriptor, values.keys())?;
    if find_open_row(tx, descriptor, branch, id)?.is_some() {
        return Err(StoreError::ObjectAlreadyExists {
            type_name: descriptor.name.as_str().to_string(),
            id: id.as_str().to_string(),
        });
    }
    insert_row_version(tx, descriptor, branch, id, values, rev)
}

fn apply_update(
    tx: &Transaction<'_>,
    descriptor: &TypeDescriptor,
    branch: BranchId,
    id: &ObjectId,
    changes: &BTreeMap<AttributeName, Option<AttributeValue>>,
    rev: i64,
) -> Result<(), StoreError> {
    validate_row_attrs(descriptor, changes.keys())?;
    let Some(open) = find_open_row(tx, descriptor, branch, id)? else {
        return Err(StoreError::UnknownObject {
            type_name: descriptor.name.as_str().to_string(),
            id: id.as_str().to_string(),
        });
    };

    let mut merged = open.values.clone();
    for (name, change) in changes {
        match change {
            Some(value) => {
                merged.insert(name.clone(), value.clone());
            }
            None => {
                merged.remove(name);
            }
        }
    }

    let table = descriptor.table_name();
    if open.rev_min == rev {
        // Same-commit rewrite: replace the version opened by an earlier op
        // of this change set instead of closing a zero-length interval.
        tx.execute(
            &format!("DELETE FROM {table} WHERE rowid = ?1"),
            params![open.rowid],
        )?;
    } else {
        tx.execute(
            &format!("UPDATE {table} SET REV_MAX = ?1 WHERE rowid = ?2"),
            params![rev - 1, open.rowid],
        )?;
    }
    insert_row_version(tx, descriptor, branch, id, &merged, rev)?;
    Ok(())
}

fn apply_delete(
    tx: &Transaction<'_>,
    descriptor: &TypeDescriptor,
    branch: BranchId,
    id: &ObjectId,
    rev: i64,
) -> Result<(), StoreError> {
    let Some(open) = find_open_row(tx, descriptor, branch, id)? else {
        return Err(StoreError::UnknownObject {
            type_name: descriptor.name.as_str().to_string(),
            id: id.as_str().to_string(),
        });
    };
    let table = descriptor.table_name();
    if open.rev_min == rev {
        tx.execute(
            &format!("DELETE FROM {table} WHERE rowid = ?1"),
            params![open.rowid],
        )?;
    } else {
        tx.execute(
            &format!("UPDATE {table} SET REV_MAX = ?1 WHERE rowid = ?2"),
            params![rev - 1, open.rowid],
        )?;
    }

    // The row is gone; its open flex values must not outlive it.
    tx.execute(
        "DELETE FROM flex_data WHERE TYPE = ?1 AND BRANCH = ?2 AND IDENTIFIER = ?3 \
         AND REV_MAX = ?4 AND REV_MIN = ?5",
        params![
            descriptor.name.as_str(),
            branch.as_i64(),
            id.as_str(),
            CURRENT_REV,
            rev
        ],
    )?;
    tx.execute(
        "UPDATE flex_data SET REV_MAX = ?1 WHERE TYPE = ?2 AND BRANCH = ?3 AND IDENTIFIER = ?4 \
         AND REV_MAX = ?5",
        params![
            rev - 1,
            descriptor.name.as_str(),
            branch.as_i64(),
            id.as_str(),
            CURRENT_REV
        ],
    )?;
    Ok(())
}

fn apply_set_flex(
    tx: &Transaction<'_>,
    descriptor: &TypeDescriptor,
    branch: BranchId,
    id: &ObjectId,
    attr: &AttributeName,
    value: Option<&AttributeValue>,
    rev: i64,
) -> Result<(), StoreError> {
    if descriptor.attribute(attr).is_some() {
        return Err(StoreError::InvalidInput("attribute is a row attribute, not a flex attribute"));
    }
    if find_open_row(tx, descriptor, branch, id)?.is_none() {
        return Err(StoreError::UnknownObject {
            type_name: descriptor.name.as_str().to_string(),
            id: id.as_str().to_string(),
        });
    }

    let open: Option<(i64, i64)> = {
        let mut stmt = tx.prepare(
            "SELECT rowid, REV_MIN FROM flex_data WHERE TYPE = ?1 AND BRANCH = ?2 \
             AND IDENTIFIER = ?3 AND ATTR = ?4 AND REV_MAX = ?5",
        )?;
        let mut rows = stmt.query(params![
            descriptor.name.as_str(),
            branch.as_i64(),
            id.as_str(),
            attr.as_str(),
            CURRENT_REV
        ])?;
        match rows.next()? {
            Some(row) => Some((row.get(0)?, row.get(1)?)),
            None => None,
        }
    };

    if let Some((rowid, rev_min)) = open {
        if rev_min == rev {
            tx.execute("DELETE FROM flex_data WHERE rowid = ?1", params![rowid])?;
        } else {
            tx.execute(
                "UPDATE flex_data SET REV_MAX = ?1 WHERE rowid = ?2",
                params![rev - 1, rowid],
            )?;
        }
    }

    let Some(value) = value else {
        return Ok(());
    };

    let (data_type, typed) = encode_flex_value(value)?;
    let mut args: Vec<SqlValue> = vec![
        SqlValue::Integer(branch.as_i64()),
        SqlValue::Text(descriptor.name.as_str().to_string()),
        SqlValue::Text(id.as_str().to_string()),
        SqlValue::Text(attr.as_str().to_string()),
        SqlValue::Integer(rev),
        SqlValue::Integer(CURRENT_REV),
        SqlValue::Integer(data_type),
    ];
    args.extend(typed);
    tx.execute(
        "INSERT INTO flex_data(BRANCH, TYPE, IDENTIFIER, ATTR, REV_MIN, REV_MAX, DATA_TYPE, \
         LONG_DATA, DOUBLE_DATA, VARCHAR_DATA, CLOB_DATA, BLOB_DATA) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params_from_iter(args),
    )?;
    Ok(())
}
