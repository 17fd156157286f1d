#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::collections::VecDeque;

use kb_core::{AttributeName, AttributeValue, BranchId, Coordinate, ObjectId, TypeName};
use rusqlite::{Connection, params};

use super::super::error::StoreError;
use super::super::values::read_flex_value;

const FLEX_VALUE_COLUMNS: [&str; 6] = [
    "DATA_TYPE",
    "LONG_DATA",
    "DOUBLE_DATA",
    "VARCHAR_DATA",
    "CLOB_DATA",
    "BLOB_DATA",
];

/// One changed flexible attribute, already consolidated to in-memory values.
#[derive(Debug)]
pub(in crate::store) struct FlexEntry {
    pub type_name: TypeName,
    pub branch: BranchId,
    pub id: ObjectId,
    pub attr: AttributeName,
    pub old: Option<AttributeValue>,
    pub new: Option<AttributeValue>,
}

impl FlexEntry {
    fn key(&self) -> (&BranchId, &ObjectId) {
        (&self.branch, &self.id)
    }
}

fn flex_select(alias: &str, value_aliases: &[&str]) -> String {
    let mut select = format!(
        "SELECT {alias}.TYPE, {alias}.BRANCH, {alias}.IDENTIFIER, {alias}.ATTR"
    );
    for value_alias in value_aliases {
        for column in FLEX_VALUE_COLUMNS {
            select.push_str(&format!(", {value_alias}.{column}"));
        }
    }
    select
}

fn read_entry(row: &rusqlite::Row<'_>) -> Result<(TypeName, BranchId, ObjectId, AttributeName), StoreError> {
    let type_name = TypeName::try_new(row.get::<_, String>(0)?)
        .map_err(|_| StoreError::Corrupt("invalid stored type name"))?;
    let branch = BranchId::try_new(row.get::<_, i64>(1)?)
        .map_err(|_| StoreError::Corrupt("invalid stored branch id"))?;
    let id = ObjectId::try_new(row.get::<_, String>(2)?)
        .map_err(|_| StoreError::Corrupt("invalid stored object id"))?;
    let attr = AttributeName::try_new(row.get::<_, String>(3)?)
        .map_err(|_| StoreError::Corrupt("invalid stored attribute name"))?;
    Ok((type_name, branch, id, attr))
}

/// Flexible attributes valid at `dest` whose value differs from the value
/// valid at `source`, plus attributes with no source row (creation side).
///
/// One query covers all types; the result is ordered by type so a single
/// forward cursor can serve the per-type merge. CLOB/BLOB payloads cannot
/// be compared in SQL and are over-reported; consolidation drops entries
/// whose decoded values turn out equal.
pub(in crate::store) fn query_flex_updates(
    conn: &Connection,
    source: Coordinate,
    dest: Coordinate,
) -> Result<VecDeque<FlexEntry>, StoreError> {
    let mut difference_terms: Vec<String> = Vec::new();
    for column in FLEX_VALUE_COLUMNS {
        let comparable = column != "CLOB_DATA" && column != "BLOB_DATA";
        if comparable {
            difference_terms.push(format!(
                "(d.{column} <> s.{column} \
                 OR (d.{column} IS NULL AND s.{column} IS NOT NULL) \
                 OR (d.{column} IS NOT NULL AND s.{column} IS NULL))"
            ));
        } else {
            difference_terms.push(format!(
                "((d.{column} IS NOT NULL AND s.{column} IS NOT NULL) \
                 OR (d.{column} IS NULL AND s.{column} IS NOT NULL) \
                 OR (d.{column} IS NOT NULL AND s.{column} IS NULL))"
            ));
        }
    }
    let difference = difference_terms.join(" OR ");

    let sql = format!(
        "{select} FROM flex_data d LEFT JOIN flex_data s \
         ON s.TYPE = d.TYPE AND s.IDENTIFIER = d.IDENTIFIER AND s.ATTR = d.ATTR \
         AND s.BRANCH = ?1 AND s.REV_MIN <= ?2 AND s.REV_MAX >= ?2 \
         WHERE d.BRANCH = ?3 AND d.REV_MIN <= ?4 AND d.REV_MAX >= ?4 \
         AND (s.DATA_TYPE IS NULL OR {difference}) \
         ORDER BY d.TYPE, d.IDENTIFIER COLLATE BINARY, d.ATTR",
        select = flex_select("d", &["d", "s"]),
    );

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![
        source.branch.as_i64(),
        source.revision.as_i64(),
        dest.branch.as_i64(),
        dest.revision.as_i64(),
    ])?;

    let mut out = VecDeque::new();
    while let Some(row) = rows.next()? {
        let (type_name, branch, id, attr) = read_entry(row)?;
        let new = read_flex_value(row, 4)?;
        let old = read_flex_value(row, 10)?;
        if old == new {
            continue;
        }
        out.push_back(FlexEntry {
            type_name,
            branch,
            id,
            attr,
            old,
            new,
        });
    }
    Ok(out)
}

/// Flexible attributes valid at `source` with no row valid at `dest`.
/// These fold into deletion events or removed-attribute updates.
pub(in crate::store) fn query_flex_deletions(
    conn: &Connection,
    source: Coordinate,
    dest: Coordinate,
) -> Result<VecDeque<FlexEntry>, StoreError> {
    let sql = format!(
        "{select} FROM flex_data s LEFT JOIN flex_data d \
         ON d.TYPE = s.TYPE AND d.IDENTIFIER = s.IDENTIFIER AND d.ATTR = s.ATTR \
         AND d.BRANCH = ?1 AND d.REV_MIN <= ?2 AND d.REV_MAX >= ?2 \
         WHERE s.BRANCH = ?3 AND s.REV_MIN <= ?4 AND s.REV_MAX >= ?4 \
         AND d.REV_MAX IS NULL \
         ORDER BY s.TYPE, s.IDENTIFIER COLLATE BINARY, s.ATTR",
        select = flex_select("s", &["s"]),
    );

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![
        dest.branch.as_i64(),
        dest.revision.as_i64(),
        source.branch.as_i64(),
        source.revision.as_i64(),
    ])?;

    let mut out = VecDeque::new();
    while let Some(row) = rows.next()? {
        let (type_name, branch, id, attr) = read_entry(row)?;
        let old = read_flex_value(row, 4)?;
        out.push_back(FlexEntry {
            type_name,
            branch,
            id,
            attr,
            old,
            new: None,
        });
    }
    Ok(out)
}

/// Forward cursor over one flex result set, shared across all types of the
/// merge. Entries arrive ordered by type name; an entry for a type that was
/// never visited by the type index is stale and gets dropped with a warning.
#[derive(Debug)]
pub(in crate::store) struct FlexCursor {
    entries: VecDeque<FlexEntry>,
    pending: Option<FlexEntry>,
    label: &'static str,
}

impl FlexCursor {
    pub fn new(entries: VecDeque<FlexEntry>, label: &'static str) -> Self {
        Self {
            entries,
            pending: None,
            label,
        }
    }

    fn fill(&mut self) {
        if self.pending.is_none() {
            self.pending = self.entries.pop_front();
        }
    }

    /// Key of the next entry belonging to `type_name`, if the cursor has
    /// reached that type. Entries for earlier types are stale and dropped.
    pub fn peek_key(&mut self, type_name: &TypeName) -> Option<(BranchId, ObjectId)> {
        loop {
            self.fill();
            let entry = self.pending.as_ref()?;
            match entry.type_name.cmp(type_name) {
                Ordering::Less => {
                    if let Some(stale) = self.pending.take() {
                        tracing::warn!(
                            cursor = self.label,
                            type_name = stale.type_name.as_str(),
                            id = stale.id.as_str(),
                            attr = stale.attr.as_str(),
                            "dropping flex entry for type not in touched-type index"
                        );
                    }
                }
                Ordering::Equal => {
                    return Some((entry.branch, entry.id.clone()));
                }
                Ordering::Greater => return None,
            }
        }
    }

    /// Drains every entry of `type_name` for the given object.
    pub fn take_object(
        &mut self,
        type_name: &TypeName,
        branch: BranchId,
        id: &ObjectId,
    ) -> Vec<FlexEntry> {
        let mut taken = Vec::new();
        while let Some(key) = self.peek_key(type_name) {
            if key.0 != branch || key.1 != *id {
                break;
            }
            let Some(entry) = self.pending.take() else {
                break;
            };
            taken.push(entry);
        }
        taken
    }

    /// Leftovers at close time; reported at debug level by the reader.
    pub fn drain_remaining(&mut self) -> usize {
        let count = self.pending.take().map_or(0, |_| 1) + self.entries.len();
        self.entries.clear();
        count
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}
