#![forbid(unsafe_code)]

use kb_core::{AttributeName, TypeName};

use super::error::StoreError;

/// Physical SQL type of one column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    Long,
    Double,
    Varchar,
    Clob,
    Blob,
}

impl ColumnType {
    /// Whether equality of two values of this type can be decided by the
    /// database. CLOB and BLOB columns cannot be compared in SQL; the diff
    /// queries conservatively over-report them and the reader compares the
    /// fetched bytes instead.
    pub fn is_comparable(self) -> bool {
        match self {
            Self::Long | Self::Double | Self::Varchar => true,
            Self::Clob | Self::Blob => false,
        }
    }

    pub(in crate::store) fn sql_decl(self) -> &'static str {
        match self {
            Self::Long => "INTEGER",
            Self::Double => "REAL",
            Self::Varchar | Self::Clob => "TEXT",
            Self::Blob => "BLOB",
        }
    }
}

/// Storage layout of one logical attribute.
///
/// A scalar occupies a single column. References span several physical
/// columns: the target id, plus a type discriminator for polymorphic
/// references, plus revision and branch pins for historic references.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttributeKind {
    Scalar(ColumnType),
    PolymorphicRef,
    HistoricRef,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributeDescriptor {
    pub name: AttributeName,
    pub kind: AttributeKind,
    pub system: bool,
}

impl AttributeDescriptor {
    pub fn scalar(name: AttributeName, column_type: ColumnType) -> Self {
        Self {
            name,
            kind: AttributeKind::Scalar(column_type),
            system: false,
        }
    }

    pub fn polymorphic_ref(name: AttributeName) -> Self {
        Self {
            name,
            kind: AttributeKind::PolymorphicRef,
            system: false,
        }
    }

    pub fn historic_ref(name: AttributeName) -> Self {
        Self {
            name,
            kind: AttributeKind::HistoricRef,
            system: false,
        }
    }

    pub fn system(mut self) -> Self {
        self.system = true;
        self
    }

    /// Ordered physical columns of this attribute.
    pub(in crate::store) fn columns(&self) -> Vec<Column> {
        let base = self.name.as_str();
        match &self.kind {
            AttributeKind::Scalar(column_type) => vec![Column {
                name: base.to_string(),
                column_type: *column_type,
            }],
            AttributeKind::PolymorphicRef => vec![
                Column {
                    name: format!("{base}_id"),
                    column_type: ColumnType::Varchar,
                },
                Column {
                    name: format!("{base}_type"),
                    column_type: ColumnType::Varchar,
                },
            ],
            AttributeKind::HistoricRef => vec![
                Column {
                    name: format!("{base}_id"),
                    column_type: ColumnType::Varchar,
                },
                Column {
                    name: format!("{base}_rev"),
                    column_type: ColumnType::Long,
                },
                Column {
                    name: format!("{base}_branch"),
                    column_type: ColumnType::Long,
                },
            ],
        }
    }
}

#[derive(Clone, Debug)]
pub(in crate::store) struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

/// Metadata of one registered object type.
#[derive(Clone, Debug)]
pub struct TypeDescriptor {
    pub name: TypeName,
    pub multiple_branches: bool,
    pub attributes: Vec<AttributeDescriptor>,
}

impl TypeDescriptor {
    pub fn new(name: TypeName, multiple_branches: bool) -> Self {
        Self {
            name,
            multiple_branches,
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, attribute: AttributeDescriptor) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub(in crate::store) fn table_name(&self) -> String {
        format!("obj_{}", self.name.as_str())
    }

    pub fn attribute(&self, name: &AttributeName) -> Option<&AttributeDescriptor> {
        self.attributes.iter().find(|attr| &attr.name == name)
    }

    /// Attributes taking part in diffing, in declaration order.
    pub(in crate::store) fn diff_attributes(&self) -> impl Iterator<Item = &AttributeDescriptor> {
        self.attributes.iter().filter(|attr| !attr.system)
    }

    pub(in crate::store) fn validate(&self) -> Result<(), StoreError> {
        let mut seen_attrs: Vec<&str> = Vec::new();
        let mut seen_columns: Vec<String> = Vec::new();
        for attribute in &self.attributes {
            let name = attribute.name.as_str();
            if seen_attrs.contains(&name) {
                return Err(StoreError::InvalidInput("duplicate attribute name"));
            }
            seen_attrs.push(name);
            for column in attribute.columns() {
                let upper = column.name.to_ascii_uppercase();
                // ROWID and its aliases would shadow the implicit rowid
                // the version bookkeeping addresses rows by.
                if matches!(
                    upper.as_str(),
                    "BRANCH" | "IDENTIFIER" | "REV_MIN" | "REV_MAX" | "ROWID" | "_ROWID_" | "OID"
                ) {
                    return Err(StoreError::InvalidInput(
                        "attribute column collides with a system column",
                    ));
                }
                if seen_columns.contains(&upper) {
                    return Err(StoreError::InvalidInput("duplicate attribute column"));
                }
                seen_columns.push(upper);
            }
        }
        Ok(())
    }
}
