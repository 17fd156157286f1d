#![forbid(unsafe_code)]

mod flex;
mod row;

use std::collections::VecDeque;

use kb_core::{Coordinate, ItemChange, ItemEvent, ObjectBranchId, ValueDelta};

use super::KnowledgeStore;
use super::error::StoreError;
use super::meta::TypeDescriptor;
use super::xref::TouchedTypeIndex;
use flex::FlexCursor;
use row::{RowDeletion, RowDiff};

#[derive(Debug)]
struct CurrentType {
    descriptor: TypeDescriptor,
    deletions: VecDeque<RowDeletion>,
    diffs: VecDeque<RowDiff>,
}

/// Streams the object-level events that transform the state observed at
/// `source` into the state observed at `dest`.
///
/// Events come out grouped by type (type name ascending) and ordered by
/// object identifier within a type. Row changes and flexible-attribute
/// changes of the same object consolidate into a single event; a deletion
/// absorbs the old values of its deleted flexible attributes.
///
/// The reader holds a shared borrow of the store for its whole lifetime, so
/// no commit can interleave with an open diff.
#[derive(Debug)]
pub struct DiffEventReader<'a> {
    store: &'a KnowledgeStore,
    source: Coordinate,
    dest: Coordinate,
    types: TouchedTypeIndex,
    current: Option<CurrentType>,
    flex_updates: FlexCursor,
    flex_deletions: FlexCursor,
    closed: bool,
    failed: bool,
}

impl<'a> DiffEventReader<'a> {
    pub(in crate::store) fn open(
        store: &'a KnowledgeStore,
        source: Coordinate,
        dest: Coordinate,
    ) -> Result<Self, StoreError> {
        let types = TouchedTypeIndex::open(store, source, dest)?;

        // Branch-less types only admit trunk coordinates. Checked before
        // any data query so a bad request fails without partial work.
        let off_trunk = !source.branch.is_trunk() || !dest.branch.is_trunk();
        if off_trunk {
            for descriptor in types.descriptors() {
                if !descriptor.multiple_branches {
                    return Err(StoreError::BranchesNotSupported {
                        type_name: descriptor.name.as_str().to_string(),
                    });
                }
            }
        }

        if source == dest {
            return Ok(Self {
                store,
                source,
                dest,
                types: TouchedTypeIndex::empty(),
                current: None,
                flex_updates: FlexCursor::new(VecDeque::new(), "flex-update"),
                flex_deletions: FlexCursor::new(VecDeque::new(), "flex-deletion"),
                closed: true,
                failed: false,
            });
        }

        let flex_updates = FlexCursor::new(
            flex::query_flex_updates(store.connection(), source, dest)?,
            "flex-update",
        );
        let flex_deletions = FlexCursor::new(
            flex::query_flex_deletions(store.connection(), source, dest)?,
            "flex-deletion",
        );

        Ok(Self {
            store,
            source,
            dest,
            types,
            current: None,
            flex_updates,
            flex_deletions,
            closed: false,
            failed: false,
        })
    }

    /// Next event, or `None` once the stream is exhausted. After an error
    /// the reader is closed and every further call returns `Ok(None)`.
    pub fn next(&mut self) -> Result<Option<ItemEvent>, StoreError> {
        if self.closed {
            return Ok(None);
        }
        match self.step() {
            Ok(Some(event)) => Ok(Some(event)),
            Ok(None) => {
                self.close();
                Ok(None)
            }
            Err(err) => {
                self.failed = true;
                self.close();
                Err(err)
            }
        }
    }

    fn step(&mut self) -> Result<Option<ItemEvent>, StoreError> {
        loop {
            if self.current.is_none() {
                let Some(descriptor) = self.types.next() else {
                    return Ok(None);
                };
                let conn = self.store.connection();
                let deletions =
                    row::query_row_deletions(conn, &descriptor, self.source, self.dest)?;
                let diffs = row::query_row_diffs(conn, &descriptor, self.source, self.dest)?;
                self.current = Some(CurrentType {
                    descriptor,
                    deletions,
                    diffs,
                });
            }
            let Some(current) = self.current.as_mut() else {
                continue;
            };
            let type_name = current.descriptor.name.clone();

            let deletion_key = current
                .deletions
                .front()
                .map(|deletion| (deletion.branch, deletion.id.clone()));
            let diff_key = current
                .diffs
                .front()
                .map(|diff| (diff.branch, diff.id.clone()));
            let flex_update_key = self.flex_updates.peek_key(&type_name);
            let flex_deletion_key = self.flex_deletions.peek_key(&type_name);

            let candidates = [
                deletion_key.clone(),
                diff_key.clone(),
                flex_update_key,
                flex_deletion_key,
            ];
            let Some(key) = candidates.iter().flatten().min().cloned() else {
                self.current = None;
                continue;
            };

            if deletion_key.as_ref() == Some(&key) {
                if let Some(deletion) = current.deletions.pop_front() {
                    return Ok(Some(self.emit_deletion(&type_name, deletion)));
                }
                continue;
            }
            if diff_key.as_ref() == Some(&key) {
                if let Some(diff) = current.diffs.pop_front() {
                    if let Some(event) = self.emit_diff(&type_name, diff) {
                        return Ok(Some(event));
                    }
                }
                continue;
            }

            // Flex-only change; the row itself is untouched.
            let (branch, id) = key;
            let mut change = ItemChange::new(ObjectBranchId {
                branch,
                type_name: type_name.clone(),
                id,
            });
            self.merge_flex(&type_name, &mut change);
            if change.values.is_empty() {
                continue;
            }
            return Ok(Some(ItemEvent::Update(change)));
        }
    }

    fn emit_deletion(
        &mut self,
        type_name: &kb_core::TypeName,
        deletion: RowDeletion,
    ) -> ItemEvent {
        let mut change = ItemChange::new(ObjectBranchId {
            branch: deletion.branch,
            type_name: type_name.clone(),
            id: deletion.id,
        });
        for (attr, old) in deletion.old_values {
            change
                .values
                .insert(attr, ValueDelta::new(Some(old), None));
        }
        for entry in self.flex_deletions.take_object(
            type_name,
            change.object.branch,
            &change.object.id,
        ) {
            change.values.insert(entry.attr, ValueDelta::new(entry.old, None));
        }
        // A destination-valid flex value on a deleted object means the flex
        // history outlived the row history. Report and drop.
        for entry in self.flex_updates.take_object(
            type_name,
            change.object.branch,
            &change.object.id,
        ) {
            tracing::warn!(
                type_name = type_name.as_str(),
                id = change.object.id.as_str(),
                attr = entry.attr.as_str(),
                "dropping flex value still valid on a deleted object"
            );
        }
        ItemEvent::Deletion(change)
    }

    fn emit_diff(&mut self, type_name: &kb_core::TypeName, diff: RowDiff) -> Option<ItemEvent> {
        let mut change = ItemChange::new(ObjectBranchId {
            branch: diff.branch,
            type_name: type_name.clone(),
            id: diff.id,
        });
        change.values = diff.values;
        self.merge_flex(type_name, &mut change);
        if diff.is_creation {
            // A creation with no initial values is still a creation.
            Some(ItemEvent::Creation(change))
        } else if change.values.is_empty() {
            None
        } else {
            Some(ItemEvent::Update(change))
        }
    }

    fn merge_flex(&mut self, type_name: &kb_core::TypeName, change: &mut ItemChange) {
        for entry in self.flex_updates.take_object(
            type_name,
            change.object.branch,
            &change.object.id,
        ) {
            change
                .values
                .insert(entry.attr, ValueDelta::new(entry.old, entry.new));
        }
        for entry in self.flex_deletions.take_object(
            type_name,
            change.object.branch,
            &change.object.id,
        ) {
            change.values.insert(entry.attr, ValueDelta::new(entry.old, None));
        }
    }

    /// Releases the buffered state. Safe to call more than once; `next`
    /// returns `Ok(None)` afterward.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.current = None;
        while self.types.next().is_some() {}
        for cursor in [&mut self.flex_updates, &mut self.flex_deletions] {
            let leftover = cursor.drain_remaining();
            if leftover > 0 && !self.failed {
                tracing::debug!(
                    cursor = cursor.label(),
                    leftover,
                    "flex entries remained after the event stream ended"
                );
            }
        }
    }
}

impl Drop for DiffEventReader<'_> {
    fn drop(&mut self) {
        self.close();
    }
}
