//! Testing utilities of the control plane.

use std::{ops, sync::Arc};

use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use uuid::Uuid;

use adapter::dummy::Dummy;
use primitives::{test_util::discard_logger, Role};

use crate::{
    application::Config,
    cipher::{Cipher, KEY_LEN},
    middleware::auth::Claims,
    services::usage::NoTraffic,
    store::MemoryStore,
    Actor, Application,
};

/// Webhook secret of the [`Config`] used by [`setup_dummy_app`].
pub const DUMMY_WEBHOOK_SECRET: &str = "whsec_dummy";

/// An [`Application`] over the [`MemoryStore`] and the [`Dummy`] gateway.
///
/// The store and the gateway are shared with the application, so seeding
/// them or setting mocked outcomes is visible to it.
pub struct ApplicationGuard {
    pub app: Application<Dummy>,
    pub store: MemoryStore,
    pub gateway: Dummy,
}

impl ops::Deref for ApplicationGuard {
    type Target = Application<Dummy>;

    fn deref(&self) -> &Self::Target {
        &self.app
    }
}

impl ops::DerefMut for ApplicationGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.app
    }
}

/// Uses the default [`Config`] with a webhook secret, a discarding logger,
/// no tracked traffic and a fixed cipher key.
pub async fn setup_dummy_app() -> ApplicationGuard {
    let config = Config {
        payments_webhook_secret: DUMMY_WEBHOOK_SECRET.to_string(),
        ..Config::default()
    };

    let store = MemoryStore::new();
    let gateway = Dummy::new();

    let app = Application::new(
        config,
        discard_logger(),
        Arc::new(store.clone()),
        gateway.clone(),
        Arc::new(NoTraffic),
        Some(Cipher::new(&[7; KEY_LEN])),
    );

    ApplicationGuard {
        app,
        store,
        gateway,
    }
}

/// A bearer token for `sub` valid for an hour.
pub fn token_for(secret: &str, sub: Uuid, role: Option<Role>) -> String {
    let claims = Claims {
        sub,
        email: None,
        role: role.map(|role| role.to_string()),
        exp: (Utc::now() + Duration::hours(1)).timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("Should encode the claims")
}

/// An [`Actor`] with a random user id.
pub fn dummy_actor(role: Role, organization: Option<primitives::OrganizationId>) -> Actor {
    Actor {
        user_id: Uuid::new_v4(),
        email: None,
        role,
        organization_id: organization,
    }
}
