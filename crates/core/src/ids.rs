#![forbid(unsafe_code)]

/// Identifier of a line of revision history. Branch 0 is trunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BranchId(i64);

impl BranchId {
    pub const TRUNK: BranchId = BranchId(0);

    pub fn as_i64(self) -> i64 {
        self.0
    }

    pub fn is_trunk(self) -> bool {
        self.0 == Self::TRUNK.0
    }

    pub fn try_new(value: i64) -> Result<Self, BranchIdError> {
        if value < 0 {
            return Err(BranchIdError::Negative);
        }
        Ok(Self(value))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BranchIdError {
    Negative,
}

impl BranchIdError {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Negative => "branch id must not be negative",
        }
    }
}

/// Monotonically increasing commit number. Revision 0 is the empty store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RevisionId(i64);

impl RevisionId {
    pub const INITIAL: RevisionId = RevisionId(0);

    pub fn as_i64(self) -> i64 {
        self.0
    }

    pub fn try_new(value: i64) -> Result<Self, RevisionIdError> {
        if value < 0 {
            return Err(RevisionIdError::Negative);
        }
        Ok(Self(value))
    }

    pub fn next(self) -> RevisionId {
        RevisionId(self.0 + 1)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RevisionIdError {
    Negative,
}

impl RevisionIdError {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Negative => "revision must not be negative",
        }
    }
}

/// A point in the version space: branch plus revision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Coordinate {
    pub branch: BranchId,
    pub revision: RevisionId,
}

impl Coordinate {
    pub fn new(branch: BranchId, revision: RevisionId) -> Self {
        Self { branch, revision }
    }

    pub fn trunk(revision: RevisionId) -> Self {
        Self {
            branch: BranchId::TRUNK,
            revision,
        }
    }
}

/// Name of an object type. Doubles as the physical table name suffix, so
/// the character set is restricted accordingly.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeName(String);

impl TypeName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn try_new(value: impl Into<String>) -> Result<Self, TypeNameError> {
        let value = value.into();
        validate_sql_name(&value, 128).map_err(|err| match err {
            SqlNameError::Empty => TypeNameError::Empty,
            SqlNameError::TooLong => TypeNameError::TooLong,
            SqlNameError::InvalidFirstChar => TypeNameError::InvalidFirstChar,
            SqlNameError::InvalidChar { ch, index } => TypeNameError::InvalidChar { ch, index },
        })?;
        Ok(Self(value))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeNameError {
    Empty,
    TooLong,
    InvalidFirstChar,
    InvalidChar { ch: char, index: usize },
}

impl TypeNameError {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Empty => "type name must not be empty",
            Self::TooLong => "type name is too long",
            Self::InvalidFirstChar => "type name must start with an ascii letter",
            Self::InvalidChar { .. } => "type name contains an invalid character",
        }
    }
}

/// Name of a logical attribute. Interpolated into column lists, so the
/// same restrictions as for type names apply. The 254-char bound matches
/// the width of the flex table's ATTR column.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttributeName(String);

impl AttributeName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn try_new(value: impl Into<String>) -> Result<Self, AttributeNameError> {
        let value = value.into();
        validate_sql_name(&value, 254).map_err(|err| match err {
            SqlNameError::Empty => AttributeNameError::Empty,
            SqlNameError::TooLong => AttributeNameError::TooLong,
            SqlNameError::InvalidFirstChar => AttributeNameError::InvalidFirstChar,
            SqlNameError::InvalidChar { ch, index } => AttributeNameError::InvalidChar { ch, index },
        })?;
        Ok(Self(value))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttributeNameError {
    Empty,
    TooLong,
    InvalidFirstChar,
    InvalidChar { ch: char, index: usize },
}

impl AttributeNameError {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Empty => "attribute name must not be empty",
            Self::TooLong => "attribute name is too long",
            Self::InvalidFirstChar => "attribute name must start with an ascii letter",
            Self::InvalidChar { .. } => "attribute name contains an invalid character",
        }
    }
}

enum SqlNameError {
    Empty,
    TooLong,
    InvalidFirstChar,
    InvalidChar { ch: char, index: usize },
}

fn validate_sql_name(value: &str, max_len: usize) -> Result<(), SqlNameError> {
    if value.is_empty() {
        return Err(SqlNameError::Empty);
    }
    if value.len() > max_len {
        return Err(SqlNameError::TooLong);
    }
    let mut chars = value.chars();
    let Some(first) = chars.next() else {
        return Err(SqlNameError::Empty);
    };
    if !first.is_ascii_alphabetic() {
        return Err(SqlNameError::InvalidFirstChar);
    }
    for (index, ch) in value.chars().enumerate() {
        if index == 0 {
            continue;
        }
        if ch.is_ascii_alphanumeric() || ch == '_' {
            continue;
        }
        return Err(SqlNameError::InvalidChar { ch, index });
    }
    Ok(())
}

/// Stable identifier of one object instance within its type's table.
/// Compared byte-wise, matching the binary collation of the stored column.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(String);

impl ObjectId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn try_new(value: impl Into<String>) -> Result<Self, ObjectIdError> {
        let value = value.into();
        if value.is_empty() {
            return Err(ObjectIdError::Empty);
        }
        if value.len() > 256 {
            return Err(ObjectIdError::TooLong);
        }
        if value.chars().any(|c| c.is_control()) {
            return Err(ObjectIdError::ContainsControl);
        }
        Ok(Self(value))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObjectIdError {
    Empty,
    TooLong,
    ContainsControl,
}

impl ObjectIdError {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Empty => "object id must not be empty",
            Self::TooLong => "object id is too long",
            Self::ContainsControl => "object id contains control characters",
        }
    }
}

/// The stable identity of a versioned object across all its row versions.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectBranchId {
    pub branch: BranchId,
    pub type_name: TypeName,
    pub id: ObjectId,
}

impl ObjectBranchId {
    pub fn new(branch: BranchId, type_name: TypeName, id: ObjectId) -> Self {
        Self {
            branch,
            type_name,
            id,
        }
    }
}
