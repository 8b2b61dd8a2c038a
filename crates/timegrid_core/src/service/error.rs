//! Error type shared by the matrix projector, reconciler and service.

use crate::field::config::ConfigError;
use crate::field::field_id::FieldIdError;
use crate::model::record::RecordId;
use crate::repo::record_repo::StoreError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type MatrixResult<T> = Result<T, MatrixError>;

/// Failures of a matrix read or write pass.
#[derive(Debug)]
pub enum MatrixError {
    Config(ConfigError),
    /// A submitted or requested key breaks the identifier grammar.
    FieldId(FieldIdError),
    /// A resource key carries something other than an entity id.
    InvalidResourceValue {
        field: String,
        value: String,
    },
    /// The date-range source does not yield an ordered list of dates.
    InvalidDateRange {
        collection: String,
        id: RecordId,
        message: String,
    },
    /// The active date range contains something other than dates.
    InvalidActiveRange {
        property: String,
        message: String,
    },
    /// A relation the matrix depends on is not set.
    MissingProperty {
        collection: String,
        id: RecordId,
        property: String,
    },
    RecordNotFound {
        collection: String,
        id: RecordId,
    },
    /// A line or cell record has an unusable attribute.
    InvalidRecord {
        collection: String,
        id: RecordId,
        message: String,
    },
    Store(StoreError),
}

impl Display for MatrixError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{err}"),
            Self::FieldId(err) => write!(f, "{err}"),
            Self::InvalidResourceValue { field, value } => {
                write!(f, "field `{field}` expects an entity id, got `{value}`")
            }
            Self::InvalidDateRange {
                collection,
                id,
                message,
            } => write!(f, "invalid date range on {collection}({id}): {message}"),
            Self::InvalidActiveRange { property, message } => {
                write!(f, "`{property}` must return a list of dates: {message}")
            }
            Self::MissingProperty {
                collection,
                id,
                property,
            } => write!(f, "{collection}({id}) has no `{property}` property"),
            Self::RecordNotFound { collection, id } => {
                write!(f, "record not found: {collection}({id})")
            }
            Self::InvalidRecord {
                collection,
                id,
                message,
            } => write!(f, "invalid record {collection}({id}): {message}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for MatrixError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::FieldId(err) => Some(err),
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigError> for MatrixError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<FieldIdError> for MatrixError {
    fn from(value: FieldIdError) -> Self {
        Self::FieldId(value)
    }
}

impl From<StoreError> for MatrixError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}
