#![forbid(unsafe_code)]

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Sql(rusqlite::Error),
    InvalidInput(&'static str),
    UnknownType {
        type_name: String,
    },
    UnknownObject {
        type_name: String,
        id: String,
    },
    ObjectAlreadyExists {
        type_name: String,
        id: String,
    },
    BranchesNotSupported {
        type_name: String,
    },
    Corrupt(&'static str),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Sql(err) => write!(f, "sqlite: {err}"),
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
            Self::UnknownType { type_name } => write!(f, "unknown type ({type_name})"),
            Self::UnknownObject { type_name, id } => {
                write!(f, "unknown object ({type_name}/{id})")
            }
            Self::ObjectAlreadyExists { type_name, id } => {
                write!(f, "object already exists ({type_name}/{id})")
            }
            Self::BranchesNotSupported { type_name } => {
                write!(f, "type does not support branches ({type_name})")
            }
            Self::Corrupt(message) => write!(f, "corrupt store: {message}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql(value)
    }
}
