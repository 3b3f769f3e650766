//! This module contains all the routers of the REST API.
//!
//! Routers are functions that build the [`Router`] of a route prefix
//! (e.g. `/organizations`, `/billing`) and they perform a few key operations:
//!
//! - Extract parameters from the route
//! - Match against the different HTTP methods
//! - Call the role guards of [`auth`](crate::middleware::auth) for the route
//!
//! Role guards are added with `route_layer` and only cover the methods added
//! before them.

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde_json::{json, Value};

use adapter::PaymentsGateway;

use crate::{
    middleware::auth::{
        advertiser_managers, affiliate_managers, association_managers, authenticate,
        authentication_required, campaign_managers, delegation_grantees, delegation_grantors,
        delegation_parties, is_admin,
    },
    routes::{association, billing, catalog, delegation, identity, invitation, public},
};

/// `GET /health`
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// The whole API: `/health` and the `/api/v1` tree.
pub fn router<G: PaymentsGateway>() -> Router {
    let protected = Router::new()
        .nest("/users", users_router::<G>())
        .nest("/profiles", profiles_router::<G>())
        .nest("/organizations", organizations_router::<G>())
        .nest("/campaigns", campaigns_router::<G>())
        .nest("/affiliates", affiliates_router::<G>())
        .nest("/organization-associations", associations_router::<G>())
        .nest(
            "/advertiser-association-invitations",
            invitations_router::<G>(),
        )
        .nest("/agency-delegations", delegations_router::<G>())
        .nest("/billing", billing_router::<G>())
        .layer(middleware::from_fn(authentication_required));

    let api = Router::new()
        .nest("/public", public_router::<G>())
        .merge(protected)
        // keeps `RequestOrigin` and the `Actor` available to both subtrees
        .layer(middleware::from_fn(authenticate::<G, _>));

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api)
}

/// `/public` router
pub fn public_router<G: PaymentsGateway>() -> Router {
    Router::new()
        .route("/webhooks/payments", post(public::payments_webhook::<G>))
        .route("/invitations/:token", get(public::invitation::<G>))
}

/// `/users` router
pub fn users_router<G: PaymentsGateway>() -> Router {
    Router::new()
        .route("/me", get(identity::me::<G>))
        .route("/me/role", get(identity::my_role))
}

/// `/profiles` router
pub fn profiles_router<G: PaymentsGateway>() -> Router {
    Router::new()
        .route("/", post(identity::create_profile::<G>))
        .route("/upsert", post(identity::upsert_profile::<G>))
        .route(
            "/:id",
            put(identity::update_profile::<G>).delete(identity::delete_profile::<G>),
        )
}

/// `/organizations` router
pub fn organizations_router<G: PaymentsGateway>() -> Router {
    let organization_routes = Router::new()
        .route(
            "/",
            put(identity::update_organization::<G>)
                .delete(identity::delete_organization::<G>)
                .route_layer(middleware::from_fn(is_admin))
                .get(identity::organization::<G>),
        )
        .route("/affiliates", get(identity::organization_affiliates::<G>))
        .route("/campaigns", get(identity::organization_campaigns::<G>))
        .route(
            "/associations",
            get(identity::organization_associations::<G>),
        )
        .route(
            "/visible-affiliates",
            get(identity::visible_affiliates::<G>)
                .route_layer(middleware::from_fn(advertiser_managers)),
        )
        .route(
            "/visible-campaigns",
            get(identity::visible_campaigns::<G>)
                .route_layer(middleware::from_fn(affiliate_managers)),
        );

    Router::new()
        .route(
            "/",
            post(identity::create_organization::<G>).get(identity::organizations::<G>),
        )
        .nest("/:id", organization_routes)
}

/// `/campaigns` router
pub fn campaigns_router<G: PaymentsGateway>() -> Router {
    let campaign_routes = Router::new().route(
        "/",
        put(catalog::update_campaign::<G>)
            .delete(catalog::delete_campaign::<G>)
            .route_layer(middleware::from_fn(campaign_managers))
            .get(catalog::campaign::<G>),
    );

    Router::new()
        .route(
            "/",
            post(catalog::create_campaign::<G>)
                .route_layer(middleware::from_fn(campaign_managers))
                .get(catalog::campaigns::<G>),
        )
        .nest("/:id", campaign_routes)
}

/// `/affiliates` router
pub fn affiliates_router<G: PaymentsGateway>() -> Router {
    let affiliate_routes = Router::new().route(
        "/",
        put(catalog::update_affiliate::<G>)
            .delete(catalog::delete_affiliate::<G>)
            .route_layer(middleware::from_fn(affiliate_managers))
            .get(catalog::affiliate::<G>),
    );

    Router::new()
        .route(
            "/",
            post(catalog::create_affiliate::<G>)
                .route_layer(middleware::from_fn(affiliate_managers))
                .get(catalog::affiliates::<G>),
        )
        .nest("/:id", affiliate_routes)
}

/// `/organization-associations` router
pub fn associations_router<G: PaymentsGateway>() -> Router {
    let association_routes = Router::new()
        .route("/", get(association::get::<G>))
        .route("/approve", post(association::approve::<G>))
        .route("/reject", post(association::reject::<G>))
        .route("/suspend", post(association::suspend::<G>))
        .route("/reactivate", post(association::reactivate::<G>))
        .route("/visibility", put(association::update_visibility::<G>));

    Router::new()
        .route("/", get(association::list::<G>))
        .route("/by-pair", get(association::by_pair::<G>))
        .route("/invitations", post(association::invite::<G>))
        .route("/requests", post(association::request::<G>))
        .nest("/:id", association_routes)
        .route_layer(middleware::from_fn(association_managers))
}

/// `/advertiser-association-invitations` router
pub fn invitations_router<G: PaymentsGateway>() -> Router {
    let invitation_routes = Router::new()
        .route(
            "/",
            put(invitation::update::<G>)
                .delete(invitation::delete::<G>)
                .route_layer(middleware::from_fn(advertiser_managers))
                .get(invitation::get::<G>)
                .route_layer(middleware::from_fn(association_managers)),
        )
        .route(
            "/usage-history",
            get(invitation::usage_history::<G>)
                .route_layer(middleware::from_fn(advertiser_managers)),
        )
        .route(
            "/link",
            get(invitation::link::<G>).route_layer(middleware::from_fn(advertiser_managers)),
        );

    Router::new()
        .route(
            "/",
            post(invitation::create::<G>)
                .route_layer(middleware::from_fn(advertiser_managers))
                .get(invitation::list::<G>)
                .route_layer(middleware::from_fn(association_managers)),
        )
        .route(
            "/use",
            post(invitation::use_invitation::<G>)
                .route_layer(middleware::from_fn(affiliate_managers)),
        )
        .nest("/:id", invitation_routes)
}

/// `/agency-delegations` router
pub fn delegations_router<G: PaymentsGateway>() -> Router {
    let delegation_routes = Router::new()
        .route(
            "/",
            get(delegation::get::<G>).route_layer(middleware::from_fn(delegation_parties)),
        )
        .route(
            "/accept",
            post(delegation::accept::<G>).route_layer(middleware::from_fn(delegation_grantees)),
        )
        .route("/reject", post(delegation::reject::<G>))
        .route("/suspend", post(delegation::suspend::<G>))
        .route("/reactivate", post(delegation::reactivate::<G>))
        .route("/revoke", post(delegation::revoke::<G>))
        .route(
            "/permissions",
            put(delegation::update_permissions::<G>)
                .route_layer(middleware::from_fn(delegation_grantors)),
        )
        .route(
            "/expiration",
            put(delegation::update_expiration::<G>)
                .route_layer(middleware::from_fn(delegation_grantors)),
        )
        .route_layer(middleware::from_fn(delegation_parties));

    Router::new()
        .route(
            "/",
            post(delegation::create::<G>)
                .route_layer(middleware::from_fn(delegation_grantors))
                .get(delegation::list::<G>)
                .route_layer(middleware::from_fn(delegation_parties)),
        )
        .route(
            "/check-permissions",
            post(delegation::check_permissions::<G>)
                .route_layer(middleware::from_fn(delegation_parties)),
        )
        .route("/permissions", get(delegation::permissions))
        .route(
            "/agency/:agency_org_id",
            get(delegation::active_for_agency::<G>)
                .route_layer(middleware::from_fn(delegation_grantees)),
        )
        .route(
            "/advertiser/:advertiser_org_id",
            get(delegation::active_for_advertiser::<G>)
                .route_layer(middleware::from_fn(delegation_grantors)),
        )
        .nest("/:id", delegation_routes)
}

/// `/billing` router
pub fn billing_router<G: PaymentsGateway>() -> Router {
    Router::new()
        .route("/dashboard", get(billing::dashboard::<G>))
        .route("/config", put(billing::update_config::<G>))
        .route(
            "/credit-limit",
            put(billing::set_credit_limit::<G>).route_layer(middleware::from_fn(is_admin)),
        )
        .route(
            "/payment-methods",
            get(billing::payment_methods::<G>).post(billing::add_payment_method::<G>),
        )
        .route(
            "/payment-methods/:id",
            delete(billing::remove_payment_method::<G>),
        )
        .route(
            "/payment-methods/:id/default",
            post(billing::set_default_payment_method::<G>),
        )
        .route("/recharge", post(billing::recharge::<G>))
        .route("/transactions", get(billing::transactions::<G>))
        .route("/usage", get(billing::usage_records::<G>))
        .route(
            "/usage/run",
            post(billing::run_usage::<G>).route_layer(middleware::from_fn(is_admin)),
        )
        .route(
            "/usage/:id/payout",
            post(billing::process_affiliate_payout::<G>)
                .route_layer(middleware::from_fn(is_admin)),
        )
}

#[cfg(test)]
mod test {
    use std::{str::FromStr, sync::Arc};

    use axum::{
        body::Body,
        http::{header::AUTHORIZATION, Method, Request, StatusCode},
        Extension,
    };
    use pretty_assertions::assert_eq;
    use serde::de::DeserializeOwned;
    use serde_json::json;
    use tower::ServiceExt;
    use uuid::Uuid;

    use adapter::{
        dummy::Dummy,
        webhook::{signature_header, SIGNATURE_HEADER},
    };
    use primitives::{
        test_util::{dummy_invitation, dummy_organization, dummy_profile, DUMMY_CREATED_AT},
        BillingAccount, Money, Organization, OrganizationId, OrganizationKind, Profile, Role,
        Transaction, TransactionStatus,
    };

    use crate::{
        application::Config,
        middleware::body_to_string,
        response::ErrorResponse,
        services::{invitation::PublicInvitation, ledger::BillingDashboard, webhook::WebhookReceipt},
        test_util::{setup_dummy_app, token_for, DUMMY_WEBHOOK_SECRET},
        Application,
    };

    use super::*;

    const ADVERTISER: OrganizationId = OrganizationId(5);

    struct TestApi {
        app: Arc<Application<Dummy>>,
        router: Router,
    }

    impl TestApi {
        fn new(app: Application<Dummy>) -> Self {
            let app = Arc::new(app);

            Self {
                router: router::<Dummy>().layer(Extension(app.clone())),
                app,
            }
        }

        fn token(&self, profile: &Profile) -> String {
            token_for(&self.app.config.jwt_secret, profile.id, Some(profile.role))
        }

        async fn call(
            &self,
            method: Method,
            uri: &str,
            token: Option<&str>,
            body: Option<Value>,
        ) -> (StatusCode, String) {
            let mut request = Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json");
            if let Some(token) = token {
                request = request.header(AUTHORIZATION, format!("Bearer {token}"));
            }
            let body = match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            };

            let response = self
                .router
                .clone()
                .oneshot(request.body(body).expect("Should build request"))
                .await
                .expect("Routing shouldn't fail");
            let status = response.status();

            (status, body_to_string(response).await)
        }

        async fn json<T: DeserializeOwned>(
            &self,
            method: Method,
            uri: &str,
            token: Option<&str>,
            body: Option<Value>,
            expected: StatusCode,
        ) -> T {
            let (status, body) = self.call(method, uri, token, body).await;
            assert_eq!(expected, status, "Unexpected status, body: {body}");

            serde_json::from_str(&body).expect("Should deserialize the body")
        }
    }

    fn config() -> Config {
        Config {
            payments_webhook_secret: DUMMY_WEBHOOK_SECRET.to_string(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn health_and_authentication() {
        let api = TestApi::new(setup_dummy_app().await.app);

        let health: Value = api
            .json(Method::GET, "/health", None, None, StatusCode::OK)
            .await;
        assert_eq!(json!({ "status": "ok" }), health);

        let missing: ErrorResponse = api
            .json(
                Method::GET,
                "/api/v1/users/me",
                None,
                None,
                StatusCode::UNAUTHORIZED,
            )
            .await;
        assert_eq!("unauthorized", missing.error);

        let (status, _) = api
            .call(Method::GET, "/api/v1/users/me", Some("not-a-jwt"), None)
            .await;
        assert_eq!(StatusCode::UNAUTHORIZED, status);
    }

    #[tokio::test]
    async fn new_users_create_their_organization() {
        let api = TestApi::new(setup_dummy_app().await.app);
        let user = Uuid::new_v4();
        let token = token_for(&config().jwt_secret, user, None);

        let organization: Organization = api
            .json(
                Method::POST,
                "/api/v1/organizations",
                Some(&token),
                Some(json!({ "name": "Acme", "type": "advertiser" })),
                StatusCode::CREATED,
            )
            .await;
        assert_eq!(OrganizationKind::Advertiser, organization.kind);

        let me: Profile = api
            .json(
                Method::GET,
                "/api/v1/users/me",
                Some(&token),
                None,
                StatusCode::OK,
            )
            .await;
        assert_eq!(Some(organization.id), me.organization_id);
        assert_eq!(Role::AdvertiserManager, me.role);

        // a second organization is refused
        let refused: ErrorResponse = api
            .json(
                Method::POST,
                "/api/v1/organizations",
                Some(&token),
                Some(json!({ "name": "Acme 2", "type": "advertiser" })),
                StatusCode::PRECONDITION_FAILED,
            )
            .await;
        assert_eq!("precondition_failed", refused.error);

        // only admins update organizations
        let (status, _) = api
            .call(
                Method::PUT,
                &format!("/api/v1/organizations/{}", organization.id),
                Some(&token),
                Some(json!({ "name": "Renamed" })),
            )
            .await;
        assert_eq!(StatusCode::FORBIDDEN, status);

        let read: Organization = api
            .json(
                Method::GET,
                &format!("/api/v1/organizations/{}", organization.id),
                Some(&token),
                None,
                StatusCode::OK,
            )
            .await;
        assert_eq!(organization, read);
    }

    #[tokio::test]
    async fn role_guards_reject_unfit_callers() {
        let guard = setup_dummy_app().await;
        let affiliate = dummy_profile(Some(OrganizationId(200)), Role::AffiliateManager);
        guard
            .store
            .insert_profile(affiliate.clone())
            .expect("Should insert");
        let api = TestApi::new(guard.app);
        let token = api.token(&affiliate);

        let forbidden: ErrorResponse = api
            .json(
                Method::POST,
                "/api/v1/advertiser-association-invitations",
                Some(&token),
                Some(json!({ "advertiser_org_id": 5, "name": "Spring" })),
                StatusCode::FORBIDDEN,
            )
            .await;
        assert_eq!("forbidden", forbidden.error);

        let (status, _) = api
            .call(
                Method::POST,
                "/api/v1/billing/usage/run",
                Some(&token),
                Some(json!({ "date": "2025-01-10" })),
            )
            .await;
        assert_eq!(StatusCode::FORBIDDEN, status);

        let permissions: Vec<String> = api
            .json(
                Method::GET,
                "/api/v1/agency-delegations/permissions",
                Some(&token),
                None,
                StatusCode::OK,
            )
            .await;
        assert_eq!(16, permissions.len());
    }

    #[tokio::test]
    async fn public_invitation_lookup() {
        let guard = setup_dummy_app().await;
        guard
            .store
            .insert_organization(dummy_organization(ADVERTISER, OrganizationKind::Advertiser))
            .expect("Should insert");
        let invitation = dummy_invitation(ADVERTISER);
        guard
            .store
            .insert_invitation(invitation.clone())
            .expect("Should insert");
        let api = TestApi::new(guard.app);

        let public: PublicInvitation = api
            .json(
                Method::GET,
                &format!("/api/v1/public/invitations/{}", invitation.token.as_str()),
                None,
                None,
                StatusCode::OK,
            )
            .await;
        assert_eq!(invitation.id, public.invitation_id);
        assert_eq!(ADVERTISER, public.advertiser_org_id);

        let (status, _) = api
            .call(Method::GET, "/api/v1/public/invitations/unknown", None, None)
            .await;
        assert_eq!(StatusCode::NOT_FOUND, status);
    }

    #[tokio::test]
    async fn billing_and_signed_webhooks() {
        let guard = setup_dummy_app().await;
        guard
            .store
            .insert_organization(dummy_organization(ADVERTISER, OrganizationKind::Advertiser))
            .expect("Should insert");
        let manager = dummy_profile(Some(ADVERTISER), Role::AdvertiserManager);
        let outsider = dummy_profile(Some(OrganizationId(6)), Role::AdvertiserManager);
        guard
            .store
            .insert_profile(manager.clone())
            .expect("Should insert");
        guard
            .store
            .insert_profile(outsider.clone())
            .expect("Should insert");
        guard
            .gateway
            .set_intent_status("cus_dummy_5", primitives::PaymentIntentStatus::Processing);
        let api = TestApi::new(guard.app);
        let token = api.token(&manager);

        let (status, _) = api
            .call(
                Method::POST,
                "/api/v1/billing/payment-methods",
                Some(&token),
                Some(json!({ "payment_method_id": "pm_card_visa", "set_as_default": true })),
            )
            .await;
        assert_eq!(StatusCode::CREATED, status);

        let pending: Transaction = api
            .json(
                Method::POST,
                "/api/v1/billing/recharge",
                Some(&token),
                Some(json!({ "amount": "20" })),
                StatusCode::OK,
            )
            .await;
        assert_eq!(TransactionStatus::Pending, pending.status);
        let intent = pending
            .payment_intent_ref
            .clone()
            .expect("Should have an intent");

        let payload = json!({
            "id": "evt_route",
            "type": "payment_intent.succeeded",
            "created": DUMMY_CREATED_AT.timestamp(),
            "data": { "object": { "id": intent, "status": "succeeded" } },
        })
        .to_string();
        let signature = signature_header(
            payload.as_bytes(),
            DUMMY_WEBHOOK_SECRET,
            chrono::Utc::now(),
        )
        .expect("Should sign");

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/public/webhooks/payments")
            .header(SIGNATURE_HEADER, signature)
            .body(Body::from(payload))
            .expect("Should build request");
        let response = api
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Routing shouldn't fail");
        assert_eq!(StatusCode::OK, response.status());
        let receipt: WebhookReceipt =
            serde_json::from_str(&body_to_string(response).await).expect("Should deserialize");
        assert_eq!("processed", receipt.status);

        let dashboard: BillingDashboard = api
            .json(
                Method::GET,
                "/api/v1/billing/dashboard",
                Some(&token),
                None,
                StatusCode::OK,
            )
            .await;
        assert_eq!(
            Money::from_str("20").expect("Valid amount"),
            dashboard.account.balance
        );

        // another organization's account is out of reach
        let (status, _) = api
            .call(
                Method::GET,
                "/api/v1/billing/dashboard?organization_id=5",
                Some(&api.token(&outsider)),
                None,
            )
            .await;
        assert_eq!(StatusCode::FORBIDDEN, status);
    }

    #[tokio::test]
    async fn only_admins_set_the_credit_limit() {
        let guard = setup_dummy_app().await;
        guard
            .store
            .insert_organization(dummy_organization(ADVERTISER, OrganizationKind::Advertiser))
            .expect("Should insert");
        let manager = dummy_profile(Some(ADVERTISER), Role::AdvertiserManager);
        let admin = dummy_profile(None, Role::Admin);
        guard
            .store
            .insert_profile(manager.clone())
            .expect("Should insert");
        guard.store.insert_profile(admin.clone()).expect("Should insert");
        let api = TestApi::new(guard.app);
        let token = api.token(&manager);

        // a credit limit in the config body is not applied
        let account: BillingAccount = api
            .json(
                Method::PUT,
                "/api/v1/billing/config",
                Some(&token),
                Some(json!({ "credit_limit": "1000000", "auto_recharge_enabled": false })),
                StatusCode::OK,
            )
            .await;
        assert_eq!(Money::ZERO, account.credit_limit);

        let (status, _) = api
            .call(
                Method::PUT,
                "/api/v1/billing/credit-limit",
                Some(&token),
                Some(json!({ "credit_limit": "1000000" })),
            )
            .await;
        assert_eq!(StatusCode::FORBIDDEN, status);

        let account: BillingAccount = api
            .json(
                Method::PUT,
                "/api/v1/billing/credit-limit?organization_id=5",
                Some(&api.token(&admin)),
                Some(json!({ "credit_limit": "250" })),
                StatusCode::OK,
            )
            .await;
        assert_eq!(
            Money::from_str("250").expect("Valid amount"),
            account.credit_limit
        );
    }
}
