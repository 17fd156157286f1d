#![forbid(unsafe_code)]

mod store;

pub use store::diff::DiffEventReader;
pub use store::error::StoreError;
pub use store::json::event_to_json;
pub use store::meta::{AttributeDescriptor, AttributeKind, ColumnType, TypeDescriptor};
pub use store::{CommitBuilder, KnowledgeStore};
