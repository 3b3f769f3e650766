//! Routes reachable without a token.

use std::sync::Arc;

use axum::{body::Bytes, extract::Path, http::HeaderMap, Extension, Json};
use chrono::Utc;

use adapter::{webhook::SIGNATURE_HEADER, PaymentsGateway};
use primitives::InvitationToken;

use crate::{
    response::ResponseError,
    services::{
        invitation::{self, PublicInvitation},
        webhook::{self, WebhookReceipt},
    },
    Application,
};

/// `POST /public/webhooks/payments`
///
/// The raw body is needed for the signature, so it is not extracted as
/// JSON.
pub async fn payments_webhook<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    headers: HeaderMap,
    payload: Bytes,
) -> Result<Json<WebhookReceipt>, ResponseError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let receipt = webhook::handle(app.as_ref(), &payload, signature, Utc::now()).await?;

    Ok(Json(receipt))
}

/// `GET /public/invitations/:token`
pub async fn invitation<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Path(token): Path<InvitationToken>,
) -> Result<Json<PublicInvitation>, ResponseError> {
    let invitation = invitation::public(app.store.as_ref(), &token, Utc::now()).await?;

    Ok(Json(invitation))
}
