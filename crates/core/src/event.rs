#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use crate::ids::{AttributeName, ObjectBranchId};
use crate::value::AttributeValue;

/// Old and new value of one attribute within a diff window.
///
/// Creations carry `old = None` for every entry, deletions `new = None`.
#[derive(Clone, Debug, PartialEq)]
pub struct ValueDelta {
    pub old: Option<AttributeValue>,
    pub new: Option<AttributeValue>,
}

impl ValueDelta {
    pub fn new(old: Option<AttributeValue>, new: Option<AttributeValue>) -> Self {
        Self { old, new }
    }
}

/// Per-object payload shared by all event kinds.
#[derive(Clone, Debug, PartialEq)]
pub struct ItemChange {
    pub object: ObjectBranchId,
    pub values: BTreeMap<AttributeName, ValueDelta>,
}

impl ItemChange {
    pub fn new(object: ObjectBranchId) -> Self {
        Self {
            object,
            values: BTreeMap::new(),
        }
    }
}

/// One object-level change produced by the diff engine.
#[derive(Clone, Debug, PartialEq)]
pub enum ItemEvent {
    Creation(ItemChange),
    Update(ItemChange),
    Deletion(ItemChange),
}

impl ItemEvent {
    pub fn object(&self) -> &ObjectBranchId {
        &self.change().object
    }

    pub fn change(&self) -> &ItemChange {
        match self {
            Self::Creation(change) | Self::Update(change) | Self::Deletion(change) => change,
        }
    }

    pub fn values(&self) -> &BTreeMap<AttributeName, ValueDelta> {
        &self.change().values
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Creation(_) => "creation",
            Self::Update(_) => "update",
            Self::Deletion(_) => "deletion",
        }
    }
}
