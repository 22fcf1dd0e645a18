use thiserror::Error;
use tonic::Code;

use crate::zones::ZoneError;

/// Failures surfaced to HTTP and RPC callers.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("model not loaded")]
    NotReady,

    #[error("invalid zone: {0}")]
    InvalidZone(#[from] ZoneError),

    #[error("zone not found: {0}")]
    ZoneNotFound(String),

    #[error("track not found: {0}")]
    TrackNotFound(u64),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn http_status(&self) -> u16 {
        match self {
            ServiceError::InvalidImage(_) | ServiceError::InvalidRequest(_) => 400,
            ServiceError::NotReady => 503,
            ServiceError::InvalidZone(_) => 422,
            ServiceError::ZoneNotFound(_) | ServiceError::TrackNotFound(_) => 404,
            ServiceError::Internal(_) => 500,
        }
    }

    /// Status code used by the gRPC surface.
    pub fn rpc_code(&self) -> Code {
        match self {
            ServiceError::InvalidImage(_)
            | ServiceError::InvalidRequest(_)
            | ServiceError::InvalidZone(_) => Code::InvalidArgument,
            ServiceError::NotReady => Code::Unavailable,
            ServiceError::ZoneNotFound(_) | ServiceError::TrackNotFound(_) => Code::NotFound,
            ServiceError::Internal(_) => Code::Internal,
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        ServiceError::Internal(format!("{:#}", err))
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
