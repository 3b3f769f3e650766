use parse_display::Display;
use std::{error::Error as StdError, fmt};
use thiserror::Error;

pub(crate) type BoxError = Box<dyn StdError + Send + Sync>;

/// An error returned by a [`PaymentsGateway`](crate::PaymentsGateway).
#[derive(Debug, Error)]
#[error("{inner}")]
pub struct Error {
    inner: Box<Inner>,
}

impl Error {
    pub(crate) fn new<E>(kind: Kind, source: Option<E>) -> Self
    where
        E: Into<BoxError>,
    {
        Self {
            inner: Box::new(Inner {
                kind,
                source: source.map(Into::into),
            }),
        }
    }

    pub fn kind(&self) -> Kind {
        self.inner.kind
    }

    /// The provider could not be reached or failed to answer.
    pub fn gateway<E>(source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::new(Kind::Gateway, Some(source))
    }

    /// The provider refused the request, e.g. an unusable payment method.
    pub fn invalid_request<E>(source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::new(Kind::InvalidRequest, Some(source))
    }

    pub fn not_found<E>(source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::new(Kind::NotFound, Some(source))
    }

    /// A webhook payload that failed signature verification or parsing.
    pub fn webhook<E>(source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::new(Kind::Webhook, Some(source))
    }
}

#[derive(Debug, Error)]
struct Inner {
    kind: Kind,
    source: Option<BoxError>,
}

impl fmt::Display for Inner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            // Writes: "Kind: Error message here"
            Some(source) => write!(f, "{}: {}", self.kind, source),
            // Writes: "Kind"
            None => write!(f, "{}", self.kind),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Kind {
    Gateway,
    InvalidRequest,
    NotFound,
    Webhook,
}
