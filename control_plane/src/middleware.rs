//! This module contains all the routers' middlewares
//!

use std::sync::Arc;

use axum::{http::Request, middleware::Next, response::IntoResponse};
use slog::{debug, error};

use adapter::PaymentsGateway;

use crate::{response::Failure, Application};

#[cfg(test)]
pub use test_util::*;

pub mod auth;

/// Logs the failed requests.
///
/// Server side failures are logged as errors, the rest only at debug level.
pub async fn log_failures<G: PaymentsGateway, B>(
    request: Request<B>,
    next: Next<B>,
) -> impl IntoResponse {
    let logger = request
        .extensions()
        .get::<Arc<Application<G>>>()
        .expect("Application should always be present")
        .logger
        .clone();

    let method = request.method().clone();
    let path = request.uri().path().to_owned();

    let response = next.run(request).await;

    if let Some(failure) = response.extensions().get::<Failure>() {
        let status = response.status();

        if status.is_server_error() {
            error!(
                &logger,
                "Request failed";
                "method" => %method,
                "path" => &path,
                "status" => status.as_u16(),
                "kind" => failure.kind,
                "error" => &failure.message,
            );
        } else {
            debug!(
                &logger,
                "Request rejected";
                "method" => %method,
                "path" => &path,
                "status" => status.as_u16(),
                "kind" => failure.kind,
            );
        }
    }

    response
}

#[cfg(test)]
pub mod test_util {
    use axum::{body::BoxBody, response::Response};

    /// Extracts the body as a String from the Response.
    ///
    /// Used when you want to check the response body or debug a response.
    pub async fn body_to_string(response: Response<BoxBody>) -> String {
        String::from_utf8(hyper::body::to_bytes(response).await.unwrap().to_vec()).unwrap()
    }
}
