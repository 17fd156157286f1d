#![forbid(unsafe_code)]

use crate::ids::{BranchId, ObjectId, RevisionId, TypeName};

/// A typed attribute value as read from or written to the store.
///
/// `Text` and `Clob` both hold strings; the distinction matters because
/// CLOB columns cannot be compared inside the database and follow the
/// conservative over-report path of the diff queries, same as `Blob`.
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue {
    Long(i64),
    Double(f64),
    Text(String),
    Clob(String),
    Blob(Vec<u8>),
    Ref(ObjectRef),
}

impl AttributeValue {
    /// Whether equality of this value can be decided by the database.
    pub fn is_db_comparable(&self) -> bool {
        match self {
            Self::Long(_) | Self::Double(_) | Self::Text(_) | Self::Ref(_) => true,
            Self::Clob(_) | Self::Blob(_) => false,
        }
    }
}

/// A reference to another versioned object, possibly polymorphic (carrying
/// the target type) or historic (pinned to a revision and branch).
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectRef {
    pub id: ObjectId,
    pub type_name: Option<TypeName>,
    pub revision: Option<RevisionId>,
    pub branch: Option<BranchId>,
}

impl ObjectRef {
    pub fn current(id: ObjectId) -> Self {
        Self {
            id,
            type_name: None,
            revision: None,
            branch: None,
        }
    }
}
