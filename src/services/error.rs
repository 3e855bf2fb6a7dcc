use thiserror::Error;

use crate::db::StoreError;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors surfaced by the record services.
///
/// Absent records on `fetch`/`remove` are reported as `Ok(None)`, not as
/// errors; `NotFound` is reserved for writes that need an existing target.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: String, id: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        ServiceError::Validation(message.into())
    }
}
