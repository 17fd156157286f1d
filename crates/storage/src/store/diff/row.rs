#![forbid(unsafe_code)]

use std::collections::{BTreeMap, VecDeque};

use kb_core::{AttributeName, AttributeValue, BranchId, Coordinate, ObjectId, ValueDelta};
use rusqlite::{Connection, params_from_iter};

use super::super::error::StoreError;
use super::super::meta::TypeDescriptor;
use super::super::schema::NO_SOURCE_REV;
use super::super::values::read_attribute;

/// An object valid at the source coordinate with no valid row at the
/// destination coordinate. Carries the old values for the deletion event.
#[derive(Debug)]
pub(in crate::store) struct RowDeletion {
    pub branch: BranchId,
    pub id: ObjectId,
    pub old_values: BTreeMap<AttributeName, AttributeValue>,
}

/// An object whose row attributes differ between the coordinates, or which
/// did not exist at the source coordinate at all (`is_creation`). `values`
/// holds only attributes whose consolidated old/new values actually differ.
#[derive(Debug)]
pub(in crate::store) struct RowDiff {
    pub branch: BranchId,
    pub id: ObjectId,
    pub is_creation: bool,
    pub values: BTreeMap<AttributeName, ValueDelta>,
}

fn interval_predicate(alias: &str, rev_param: usize) -> String {
    format!("{alias}.REV_MIN <= ?{rev_param} AND {alias}.REV_MAX >= ?{rev_param}")
}

/// Rows valid at `source` with no matching row valid at `dest`.
///
/// Implemented as a self left-join; a missing destination row surfaces as
/// `d.REV_MAX IS NULL`, the deletion signal.
pub(in crate::store) fn query_row_deletions(
    conn: &Connection,
    descriptor: &TypeDescriptor,
    source: Coordinate,
    dest: Coordinate,
) -> Result<VecDeque<RowDeletion>, StoreError> {
    let table = descriptor.table_name();
    let branched = descriptor.multiple_branches;

    let mut select = String::from("SELECT s.IDENTIFIER");
    if branched {
        select.push_str(", s.BRANCH");
    }
    let attrs: Vec<_> = descriptor.diff_attributes().collect();
    for attribute in &attrs {
        for column in attribute.columns() {
            select.push_str(&format!(", s.{}", column.name));
        }
    }

    // Parameter order: dest_rev, src_rev [, dest_branch, src_branch].
    let mut args: Vec<i64> = vec![dest.revision.as_i64(), source.revision.as_i64()];
    let mut join = format!(
        "FROM {table} s LEFT JOIN {table} d ON d.IDENTIFIER = s.IDENTIFIER AND {}",
        interval_predicate("d", 1)
    );
    let mut filter = format!("WHERE {} AND d.REV_MAX IS NULL", interval_predicate("s", 2));
    let mut order = String::from("ORDER BY ");
    if branched {
        join.push_str(" AND d.BRANCH = ?3");
        filter.push_str(" AND s.BRANCH = ?4");
        args.push(dest.branch.as_i64());
        args.push(source.branch.as_i64());
        order.push_str("s.BRANCH, ");
    }
    order.push_str("s.IDENTIFIER COLLATE BINARY");

    let sql = format!("{select} {join} {filter} {order}");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(args))?;

    let mut out = VecDeque::new();
    while let Some(row) = rows.next()? {
        let raw_id: String = row.get(0)?;
        let id =
            ObjectId::try_new(raw_id).map_err(|_| StoreError::Corrupt("invalid stored object id"))?;
        let branch = if branched {
            BranchId::try_new(row.get::<_, i64>(1)?)
                .map_err(|_| StoreError::Corrupt("invalid stored branch id"))?
        } else {
            BranchId::TRUNK
        };

        let mut old_values = BTreeMap::new();
        let mut idx = if branched { 2usize } else { 1usize };
        for attribute in &attrs {
            if let Some(value) = read_attribute(row, idx, attribute)? {
                old_values.insert(attribute.name.clone(), value);
            }
            idx += attribute.columns().len();
        }
        out.push_back(RowDeletion {
            branch,
            id,
            old_values,
        });
    }
    Ok(out)
}

/// Rows valid at `dest` whose values differ from the source-valid row, or
/// which have no source row (creation).
///
/// The WHERE clause is a disjunction over every non-system column: directly
/// comparable columns use inequality plus explicit null-mismatch terms
/// (SQL `<>` never matches NULL); CLOB/BLOB columns cannot be compared in
/// SQL and are over-reported whenever both sides are non-null. The fetched
/// values are consolidated here, so over-reported equal values never reach
/// the caller.
pub(in crate::store) fn query_row_diffs(
    conn: &Connection,
    descriptor: &TypeDescriptor,
    source: Coordinate,
    dest: Coordinate,
) -> Result<VecDeque<RowDiff>, StoreError> {
    let table = descriptor.table_name();
    let branched = descriptor.multiple_branches;
    let attrs: Vec<_> = descriptor.diff_attributes().collect();

    let mut select = String::from("SELECT d.IDENTIFIER");
    if branched {
        select.push_str(", d.BRANCH");
    }
    select.push_str(&format!(", COALESCE(s.REV_MAX, {NO_SOURCE_REV})"));
    for attribute in &attrs {
        for column in attribute.columns() {
            select.push_str(&format!(", d.{}", column.name));
        }
    }
    for attribute in &attrs {
        for column in attribute.columns() {
            select.push_str(&format!(", s.{}", column.name));
        }
    }

    let mut difference_terms: Vec<String> = Vec::new();
    for attribute in &attrs {
        for column in attribute.columns() {
            let c = &column.name;
            if column.column_type.is_comparable() {
                difference_terms.push(format!(
                    "(d.{c} <> s.{c} OR (d.{c} IS NULL AND s.{c} IS NOT NULL) \
                     OR (d.{c} IS NOT NULL AND s.{c} IS NULL))"
                ));
            } else {
                difference_terms.push(format!(
                    "((d.{c} IS NOT NULL AND s.{c} IS NOT NULL) \
                     OR (d.{c} IS NULL AND s.{c} IS NOT NULL) \
                     OR (d.{c} IS NOT NULL AND s.{c} IS NULL))"
                ));
            }
        }
    }
    let difference = if difference_terms.is_empty() {
        String::from("0")
    } else {
        difference_terms.join(" OR ")
    };

    // Parameter order: src_rev, dest_rev [, src_branch, dest_branch].
    let mut args: Vec<i64> = vec![source.revision.as_i64(), dest.revision.as_i64()];
    let mut join = format!(
        "FROM {table} d LEFT JOIN {table} s ON s.IDENTIFIER = d.IDENTIFIER AND {}",
        interval_predicate("s", 1)
    );
    let mut filter = format!(
        "WHERE {} AND (s.REV_MAX IS NULL OR {difference})",
        interval_predicate("d", 2)
    );
    let mut order = String::from("ORDER BY ");
    if branched {
        join.push_str(" AND s.BRANCH = ?3");
        filter.push_str(" AND d.BRANCH = ?4");
        args.push(source.branch.as_i64());
        args.push(dest.branch.as_i64());
        order.push_str("d.BRANCH, ");
    }
    order.push_str("d.IDENTIFIER COLLATE BINARY");

    let sql = format!("{select} {join} {filter} {order}");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(args))?;

    let total_columns: usize = attrs.iter().map(|a| a.columns().len()).sum();
    let base = if branched { 3usize } else { 2usize };

    let mut out = VecDeque::new();
    while let Some(row) = rows.next()? {
        let raw_id: String = row.get(0)?;
        let id =
            ObjectId::try_new(raw_id).map_err(|_| StoreError::Corrupt("invalid stored object id"))?;
        let branch = if branched {
            BranchId::try_new(row.get::<_, i64>(1)?)
                .map_err(|_| StoreError::Corrupt("invalid stored branch id"))?
        } else {
            BranchId::TRUNK
        };
        let src_rev_max: i64 = row.get(if branched { 2 } else { 1 })?;
        let is_creation = src_rev_max == NO_SOURCE_REV;

        let mut values = BTreeMap::new();
        let mut offset = 0usize;
        for attribute in &attrs {
            let new = read_attribute(row, base + offset, attribute)?;
            let old = read_attribute(row, base + total_columns + offset, attribute)?;
            offset += attribute.columns().len();
            if is_creation {
                if new.is_some() {
                    values.insert(attribute.name.clone(), ValueDelta::new(None, new));
                }
            } else if old != new {
                values.insert(attribute.name.clone(), ValueDelta::new(old, new));
            }
        }

        // A non-creation row that only tripped the over-reporting terms
        // consolidates to an empty map; the reader suppresses it.
        out.push_back(RowDiff {
            branch,
            id,
            is_creation,
            values,
        });
    }
    Ok(out)
}
