#![forbid(unsafe_code)]

mod commit;
pub(crate) mod diff;
pub(crate) mod error;
pub(crate) mod json;
pub(crate) mod meta;
mod schema;
mod values;
mod xref;

pub use commit::CommitBuilder;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use kb_core::{BranchId, Coordinate, RevisionId, TypeName};
use rusqlite::Connection;

use diff::DiffEventReader;
use error::StoreError;
use meta::TypeDescriptor;

/// A branch- and revision-versioned object store backed by SQLite.
///
/// Row versions and flex values are written once at commit time and never
/// mutated afterward; a change closes the superseded validity interval and
/// opens a new one. The diff engine reads two fixed coordinates of this
/// history and never writes.
#[derive(Debug)]
pub struct KnowledgeStore {
    conn: Connection,
    storage_dir: PathBuf,
    types: BTreeMap<TypeName, TypeDescriptor>,
}

impl KnowledgeStore {
    pub fn open(storage_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_dir)?;

        let db_path = storage_dir.join("knowledge_base.db");
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        schema::install_base_schema(&conn)?;

        Ok(Self {
            conn,
            storage_dir,
            types: BTreeMap::new(),
        })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Registers a type and installs its table. Metadata is supplied by the
    /// caller on every open; it is not persisted here.
    pub fn register_type(&mut self, descriptor: TypeDescriptor) -> Result<(), StoreError> {
        descriptor.validate()?;
        if self.types.contains_key(&descriptor.name) {
            return Err(StoreError::InvalidInput("type is already registered"));
        }
        schema::install_type_table(&self.conn, &descriptor)?;
        self.types.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    pub fn type_descriptor(&self, name: &TypeName) -> Option<&TypeDescriptor> {
        self.types.get(name)
    }

    /// Registered types, ordered by name.
    pub fn registered_types(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.types.values()
    }

    pub fn last_revision(&self) -> Result<RevisionId, StoreError> {
        let raw = schema::last_revision(&self.conn)?;
        RevisionId::try_new(raw).map_err(|_| StoreError::Corrupt("last_revision is negative"))
    }

    /// Starts a change set against the given branch. Nothing is written
    /// until [`CommitBuilder::commit`].
    pub fn begin_commit(&mut self, branch: BranchId) -> CommitBuilder<'_> {
        CommitBuilder::new(self, branch)
    }

    /// Opens a diff reader producing the event stream that transforms the
    /// state observed at `source` into the state observed at `dest`.
    pub fn diff_reader(
        &self,
        source: Coordinate,
        dest: Coordinate,
    ) -> Result<DiffEventReader<'_>, StoreError> {
        DiffEventReader::open(self, source, dest)
    }

    pub(in crate::store) fn connection(&self) -> &Connection {
        &self.conn
    }

}
