use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Body of every failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// The [`Error`] of a request, turned into a response by axum.
///
/// The response carries the error as an extension as well, so that
/// [`log_failures`](crate::middleware::log_failures) can log it.
#[derive(Debug, PartialEq, Eq)]
pub struct ResponseError(pub Error);

impl ResponseError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self(Error::Unauthorized(message.into()))
    }

    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            Error::InsufficientFunds(_) => StatusCode::PAYMENT_REQUIRED,
            Error::Upstream(_) => StatusCode::BAD_GATEWAY,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Error> for ResponseError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

/// The failure a response was built from.
#[derive(Debug, Clone)]
pub struct Failure {
    pub kind: &'static str,
    pub message: String,
}

impl IntoResponse for ResponseError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let body = ErrorResponse {
            error: self.0.kind().to_string(),
            message: self.0.to_string(),
        };
        let failure = Failure {
            kind: self.0.kind(),
            message: body.message.clone(),
        };

        let mut response = (status, Json(body)).into_response();
        response.extensions_mut().insert(failure);

        response
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::middleware::body_to_string;

    #[tokio::test]
    async fn body_carries_kind_and_message() {
        let response =
            ResponseError::from(Error::InsufficientFunds("Insufficient funds".into())).into_response();

        assert_eq!(StatusCode::PAYMENT_REQUIRED, response.status());

        let body = serde_json::from_str::<ErrorResponse>(&body_to_string(response).await)
            .expect("Should deserialize");
        assert_eq!(
            ErrorResponse {
                error: "insufficient_funds".into(),
                message: "Insufficient funds".into(),
            },
            body
        );
    }

    #[test]
    fn statuses_of_the_kinds() {
        let statuses = [
            (Error::not_found("Campaign"), StatusCode::NOT_FOUND),
            (Error::InvalidInput(String::new()), StatusCode::BAD_REQUEST),
            (Error::Unauthorized(String::new()), StatusCode::UNAUTHORIZED),
            (Error::forbidden(), StatusCode::FORBIDDEN),
            (Error::Conflict(String::new()), StatusCode::CONFLICT),
            (
                Error::PreconditionFailed(String::new()),
                StatusCode::PRECONDITION_FAILED,
            ),
            (Error::Upstream(String::new()), StatusCode::BAD_GATEWAY),
            (
                Error::Internal(String::new()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, status) in statuses {
            assert_eq!(status, ResponseError(error).status());
        }
    }
}
