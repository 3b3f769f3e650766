//! The error of every domain service.
//!
//! Each variant is one of the kinds returned to API callers, see
//! [`ResponseError`](crate::response::ResponseError) for the mapping to
//! status codes.

use primitives::{
    affiliate, association, billing, campaign, delegation, invitation, organization, usage,
};
use thiserror::Error;

use crate::{cipher::CipherError, db::PoolError, store::RepositoryError};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    PreconditionFailed(String),
    #[error("{0}")]
    InsufficientFunds(String),
    #[error("{0}")]
    Upstream(String),
    #[error("{0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{what} not found"))
    }

    pub fn forbidden() -> Self {
        Self::Forbidden("You are not allowed to perform this action".into())
    }

    /// The kind of the error as it appears in response bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::InvalidInput(_) => "invalid_input",
            Error::Unauthorized(_) => "unauthorized",
            Error::Forbidden(_) => "forbidden",
            Error::Conflict(_) => "conflict",
            Error::PreconditionFailed(_) => "precondition_failed",
            Error::InsufficientFunds(_) => "insufficient_funds",
            Error::Upstream(_) => "upstream_failure",
            Error::Internal(_) => "internal",
        }
    }
}

impl From<RepositoryError> for Error {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::NotFound(what) => Error::not_found(what),
            RepositoryError::AlreadyExists(what) => Error::Conflict(format!("{what} already exists")),
            error => Error::Internal(error.to_string()),
        }
    }
}

impl From<PoolError> for Error {
    fn from(error: PoolError) -> Self {
        RepositoryError::from(error).into()
    }
}

impl From<tokio_postgres::Error> for Error {
    fn from(error: tokio_postgres::Error) -> Self {
        RepositoryError::from(error).into()
    }
}

impl From<adapter::Error> for Error {
    fn from(error: adapter::Error) -> Self {
        match error.kind() {
            adapter::Kind::InvalidRequest => Error::InvalidInput(error.to_string()),
            adapter::Kind::NotFound
            | adapter::Kind::Gateway
            | adapter::Kind::Webhook => Error::Upstream(error.to_string()),
        }
    }
}

impl From<CipherError> for Error {
    fn from(error: CipherError) -> Self {
        Error::Internal(format!("Credential cipher: {error}"))
    }
}

impl From<invitation::UseRejection> for Error {
    fn from(rejection: invitation::UseRejection) -> Self {
        use invitation::UseRejection::*;

        let message = rejection.to_string();
        match rejection {
            NotFound | AffiliateOrganizationNotFound => Error::NotFound(message),
            UsageLimitReached | AssociationExists => Error::Conflict(message),
            Expired | NotActive => Error::PreconditionFailed(message),
            NotAllowed => Error::Forbidden(message),
            NotAffiliateOrganization => Error::InvalidInput(message),
        }
    }
}

impl From<delegation::Error> for Error {
    fn from(error: delegation::Error) -> Self {
        match error {
            delegation::Error::InvalidTransition { .. } | delegation::Error::Expired(_) => {
                Error::PreconditionFailed(error.to_string())
            }
            error => Error::InvalidInput(error.to_string()),
        }
    }
}

impl From<association::TransitionError> for Error {
    fn from(error: association::TransitionError) -> Self {
        Error::PreconditionFailed(error.to_string())
    }
}

impl From<billing::DebitError> for Error {
    fn from(error: billing::DebitError) -> Self {
        match error {
            billing::DebitError::NonPositiveAmount => Error::InvalidInput(error.to_string()),
            billing::DebitError::InsufficientFunds { .. } => {
                Error::InsufficientFunds(error.to_string())
            }
        }
    }
}

impl From<campaign::PricingOverflow> for Error {
    fn from(error: campaign::PricingOverflow) -> Self {
        Error::Internal(error.to_string())
    }
}

impl From<billing::SettlementError> for Error {
    fn from(error: billing::SettlementError) -> Self {
        Error::PreconditionFailed(error.to_string())
    }
}

impl From<usage::StatusError> for Error {
    fn from(error: usage::StatusError) -> Self {
        Error::PreconditionFailed(error.to_string())
    }
}

/// Validation failures of the request bodies.
macro_rules! impl_invalid_input {
    ($($ty:ty),+ $(,)?) => {$(
        impl From<$ty> for Error {
            fn from(error: $ty) -> Self {
                Error::InvalidInput(error.to_string())
            }
        }
    )+};
}

impl_invalid_input!(
    organization::Error,
    campaign::Error,
    affiliate::Error,
    association::Error,
    invitation::Error,
    billing::ConfigError,
);
