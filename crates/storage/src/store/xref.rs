#![forbid(unsafe_code)]

use std::collections::VecDeque;

use kb_core::Coordinate;
use rusqlite::params;

use super::error::StoreError;
use super::meta::TypeDescriptor;
use super::KnowledgeStore;

/// The touched-type index driving the diff reader's outer loop.
///
/// For a same-branch diff the index is the set of type names recorded in
/// `revision_xref` within the half-open revision window `(min, max]` (a
/// change committed at the lower coordinate is already part of the state
/// observed there). A cross-branch diff must conservatively visit every
/// registered type, because changes may date back to a common ancestor
/// revision the per-revision cross-reference does not capture.
///
/// Types are yielded in ascending name order, matching the `ORDER BY TYPE`
/// of the process-wide flex cursors.
#[derive(Debug)]
pub(in crate::store) struct TouchedTypeIndex {
    types: VecDeque<TypeDescriptor>,
}

impl TouchedTypeIndex {
    pub(in crate::store) fn empty() -> Self {
        Self {
            types: VecDeque::new(),
        }
    }

    pub(in crate::store) fn open(
        store: &KnowledgeStore,
        source: Coordinate,
        dest: Coordinate,
    ) -> Result<Self, StoreError> {
        let mut types = VecDeque::new();
        if source.branch == dest.branch {
            let low = source.revision.min(dest.revision).as_i64();
            let high = source.revision.max(dest.revision).as_i64();
            let mut stmt = store.connection().prepare(
                "SELECT DISTINCT TYPE FROM revision_xref \
                 WHERE BRANCH = ?1 AND REV > ?2 AND REV <= ?3 ORDER BY TYPE",
            )?;
            let mut rows = stmt.query(params![source.branch.as_i64(), low, high])?;
            while let Some(row) = rows.next()? {
                let raw: String = row.get(0)?;
                let name = kb_core::TypeName::try_new(raw.clone())
                    .map_err(|_| StoreError::Corrupt("invalid type name in revision_xref"))?;
                let Some(descriptor) = store.type_descriptor(&name) else {
                    return Err(StoreError::UnknownType { type_name: raw });
                };
                types.push_back(descriptor.clone());
            }
        } else {
            for descriptor in store.registered_types() {
                types.push_back(descriptor.clone());
            }
        }
        Ok(Self { types })
    }

    pub(in crate::store) fn next(&mut self) -> Option<TypeDescriptor> {
        self.types.pop_front()
    }

    pub(in crate::store) fn descriptors(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.types.iter()
    }
}
