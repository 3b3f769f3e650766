use std::sync::Arc;

use axum::{
    http::{
        header::{AUTHORIZATION, USER_AGENT},
        HeaderMap, Request,
    },
    middleware::Next,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use adapter::PaymentsGateway;
use primitives::{profile::DEFAULT_ROLE, Profile, Role};

use crate::{error::Error, response::ResponseError, Actor, Application, RequestOrigin};

/// The claims of the bearer token issued by the authentication provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Providers put their own values here, so anything that is not a
    /// [`Role`] is ignored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub exp: i64,
}

impl Claims {
    pub fn role(&self) -> Option<Role> {
        self.role.as_deref().and_then(|role| role.parse().ok())
    }
}

/// Verifies an HS256 token and returns its claims.
pub fn decode_claims(token: &str, secret: &str) -> Result<Claims, ResponseError> {
    let key = DecodingKey::from_secret(secret.as_bytes());

    decode::<Claims>(token, &key, &Validation::new(Algorithm::HS256))
        .map(|data| data.claims)
        .map_err(|err| ResponseError::unauthorized(format!("Invalid token: {err}")))
}

impl Actor {
    /// The stored profile wins over the claims of the token.
    pub fn new(claims: Claims, profile: Option<Profile>) -> Self {
        match profile {
            Some(profile) => Self {
                user_id: profile.id,
                email: Some(profile.email),
                role: profile.role,
                organization_id: profile.organization_id,
            },
            None => Self {
                user_id: claims.sub,
                role: claims.role().unwrap_or(DEFAULT_ROLE),
                email: claims.email,
                organization_id: None,
            },
        }
    }
}

/// Creates a [`RequestOrigin`] and additionally an [`Actor`] if a Bearer token was provided.
///
/// A token that is malformed, expired or signed with another secret is
/// rejected with `401 Unauthorized`.
pub async fn authenticate<G: PaymentsGateway, B>(
    mut request: Request<B>,
    next: Next<B>,
) -> Result<axum::response::Response, ResponseError> {
    let app = request
        .extensions()
        .get::<Arc<Application<G>>>()
        .expect("Application should always be present")
        .clone();

    let origin = RequestOrigin {
        ip_address: get_request_ip(request.headers()),
        user_agent: request
            .headers()
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string),
    };
    request.extensions_mut().insert(origin);

    let token = match request.headers().get(AUTHORIZATION) {
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(ToString::to_string)
            .ok_or_else(|| {
                ResponseError::unauthorized("Authorization header format must be Bearer {token}")
            })?,
        None => return Ok(next.run(request).await),
    };

    let claims = decode_claims(&token, &app.config.jwt_secret)?;
    let profile = app.store.profile(claims.sub).await?;

    request.extensions_mut().insert(Actor::new(claims, profile));

    Ok(next.run(request).await)
}

pub async fn authentication_required<B>(
    request: Request<B>,
    next: Next<B>,
) -> Result<axum::response::Response, ResponseError> {
    if request.extensions().get::<Actor>().is_some() {
        Ok(next.run(request).await)
    } else {
        Err(ResponseError::unauthorized("Authorization header required"))
    }
}

async fn require_role<B>(
    allowed: &[Role],
    request: Request<B>,
    next: Next<B>,
) -> Result<axum::response::Response, ResponseError> {
    let actor = request
        .extensions()
        .get::<Actor>()
        .ok_or_else(|| ResponseError::unauthorized("Authorization header required"))?;

    if !allowed.contains(&actor.role) {
        return Err(ResponseError(Error::Forbidden(format!(
            "Role {} is not allowed to access this resource",
            actor.role
        ))));
    }

    Ok(next.run(request).await)
}

macro_rules! role_guard {
    ($($(#[$meta:meta])* $name:ident => [$($role:ident),+ $(,)?];)+) => {$(
        $(#[$meta])*
        pub async fn $name<B>(
            request: Request<B>,
            next: Next<B>,
        ) -> Result<axum::response::Response, ResponseError> {
            require_role(&[$(Role::$role),+], request, next).await
        }
    )+};
}

role_guard! {
    is_admin => [Admin];
    advertiser_managers => [AdvertiserManager, Admin];
    affiliate_managers => [AffiliateManager, Admin];
    /// Both sides of an association.
    association_managers => [AdvertiserManager, AffiliateManager, Admin];
    /// Advertisers and the agencies acting for them.
    campaign_managers => [AdvertiserManager, AgencyManager, Admin];
    delegation_grantors => [AdvertiserManager, PlatformOwner, Admin];
    delegation_grantees => [AgencyManager, PlatformOwner, Admin];
    /// Both sides of a delegation.
    delegation_parties => [AdvertiserManager, AgencyManager, PlatformOwner, Admin];
}

/// Get's the Request IP from either `true-client-ip` or `x-forwarded-for`,
/// splits the IPs separated by `,` (comma) and returns the first one.
fn get_request_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("true-client-ip")
        .or_else(|| headers.get("x-forwarded-for"))
        .and_then(|hv| {
            hv.to_str()
                .map(ToString::to_string)
                .ok()
                .filter(|ip| !ip.is_empty())
        })
        .and_then(|ips| {
            ips.split(',')
                .next()
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
                .map(ToString::to_string)
        })
}

#[cfg(test)]
mod test {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        middleware::from_fn,
        routing::get,
        Extension, Router,
    };
    use pretty_assertions::assert_eq;
    use tower::Service;

    use adapter::dummy::Dummy;
    use primitives::{test_util::dummy_profile, OrganizationId};

    use crate::{
        middleware::body_to_string,
        response::ErrorResponse,
        test_util::{setup_dummy_app, token_for},
    };

    use super::*;

    async fn handle(Extension(actor): Extension<Actor>) -> String {
        actor.role.to_string()
    }

    #[tokio::test]
    async fn requests_without_token_have_no_actor() {
        let app = Arc::new(setup_dummy_app().await.app);

        async fn anonymous(actor: Option<Extension<Actor>>) -> String {
            assert!(actor.is_none(), "There shouldn't be an Actor in the extensions");
            "Ok".into()
        }

        let mut router = Router::new()
            .route("/", get(anonymous))
            .layer(from_fn(authenticate::<Dummy, _>));

        let request = Request::builder()
            .extension(app.clone())
            .body(Body::empty())
            .expect("should never fail!");

        let response = router
            .call(request)
            .await
            .expect("Handling the Request shouldn't have failed");

        assert_eq!(StatusCode::OK, response.status());
    }

    #[tokio::test]
    async fn malformed_or_foreign_tokens_are_unauthorized() {
        let app = Arc::new(setup_dummy_app().await.app);

        let mut router = Router::new()
            .route("/", get(handle))
            .layer(from_fn(authenticate::<Dummy, _>));

        // there is a Header, but it has wrong format
        {
            let request = Request::builder()
                .header(AUTHORIZATION, "Wrong Header")
                .extension(app.clone())
                .body(Body::empty())
                .expect("should never fail!");

            let response = router.call(request).await.expect("Should respond");
            assert_eq!(StatusCode::UNAUTHORIZED, response.status());
        }

        // signed with another secret
        {
            let token = token_for("another-secret", Uuid::new_v4(), Some(Role::Admin));
            let request = Request::builder()
                .header(AUTHORIZATION, format!("Bearer {token}"))
                .extension(app.clone())
                .body(Body::empty())
                .expect("should never fail!");

            let response = router.call(request).await.expect("Should respond");
            assert_eq!(StatusCode::UNAUTHORIZED, response.status());

            let body = serde_json::from_str::<ErrorResponse>(&body_to_string(response).await)
                .expect("Should deserialize");
            assert_eq!("unauthorized", body.error);
        }
    }

    #[tokio::test]
    async fn stored_profile_wins_over_the_token_role() {
        let app_guard = setup_dummy_app().await;
        let profile = dummy_profile(Some(OrganizationId(1)), Role::AdvertiserManager);
        app_guard
            .store
            .insert_profile(profile.clone())
            .expect("Should insert");
        let app = Arc::new(app_guard.app);

        let mut router = Router::new()
            .route("/", get(handle))
            .layer(from_fn(authenticate::<Dummy, _>));

        // the token claims Admin, the profile says otherwise
        let token = token_for(&app.config.jwt_secret, profile.id, Some(Role::Admin));
        let request = Request::builder()
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .extension(app.clone())
            .body(Body::empty())
            .expect("should never fail!");

        let response = router.call(request).await.expect("Should respond");
        assert_eq!(StatusCode::OK, response.status());
        assert_eq!("AdvertiserManager", body_to_string(response).await);

        // no profile, the role of the token is used
        let token = token_for(&app.config.jwt_secret, Uuid::new_v4(), Some(Role::AgencyManager));
        let request = Request::builder()
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .extension(app.clone())
            .body(Body::empty())
            .expect("should never fail!");

        let response = router.call(request).await.expect("Should respond");
        assert_eq!("AgencyManager", body_to_string(response).await);
    }

    #[tokio::test]
    async fn role_guards_reject_other_roles() {
        let app = Arc::new(setup_dummy_app().await.app);

        let mut router = Router::new()
            .route("/", get(handle))
            .route_layer(from_fn(advertiser_managers))
            .layer(from_fn(authenticate::<Dummy, _>));

        let call = |role: Role| {
            let token = token_for(&app.config.jwt_secret, Uuid::new_v4(), Some(role));
            Request::builder()
                .header(AUTHORIZATION, format!("Bearer {token}"))
                .extension(app.clone())
                .body(Body::empty())
                .expect("should never fail!")
        };

        let affiliate = router.call(call(Role::AffiliateManager)).await.expect("Should respond");
        assert_eq!(StatusCode::FORBIDDEN, affiliate.status());

        let advertiser = router
            .call(call(Role::AdvertiserManager))
            .await
            .expect("Should respond");
        assert_eq!(StatusCode::OK, advertiser.status());

        let admin = router.call(call(Role::Admin)).await.expect("Should respond");
        assert_eq!(StatusCode::OK, admin.status());
    }

    #[test]
    fn test_get_request_ip_headers() {
        let build_headers = |header: &'static str, ips: &str| -> HeaderMap {
            let mut headers = HeaderMap::new();
            headers.insert(header, ips.parse().expect("valid header value"));
            headers
        };

        assert_eq!(None, get_request_ip(&HeaderMap::new()));
        assert_eq!(None, get_request_ip(&build_headers("true-client-ip", "")));
        assert_eq!(None, get_request_ip(&build_headers("x-forwarded-for", ",")));
        assert_eq!(
            Some("120.0.0.1".to_string()),
            get_request_ip(&build_headers("true-client-ip", "120.0.0.1"))
        );
        assert_eq!(
            Some("192.168.0.1".to_string()),
            get_request_ip(&build_headers(
                "x-forwarded-for",
                "192.168.0.1,120.0.0.1,10.0.0.10"
            ))
        );
    }
}
