#![deny(clippy::all)]
#![deny(rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! The control plane of the affiliate platform.
//!
//! The binary serves the `/api/v1` REST API and runs the daily usage worker.
//! Requests are authenticated with a bearer JWT, authorized against the
//! organization membership and delegations of the acting profile and then
//! handed to the domain [`services`], which persist through a [`Store`].

use std::sync::Arc;

use slog::Logger;
use uuid::Uuid;

use adapter::PaymentsGateway;
use primitives::{OrganizationId, Role};

use crate::{
    application::Config,
    cipher::Cipher,
    error::Error,
    services::{
        ledger::Ledger,
        usage::{UsageEngine, UsageSource},
    },
    store::Store,
};

pub mod application;
pub mod cipher;
pub mod db;
pub mod error;
pub mod middleware;
pub mod response;
pub mod routes;
pub mod services;
pub mod store;
#[cfg(any(test, feature = "test-util"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-util")))]
pub mod test_util;
pub mod worker;

/// The state shared by every request handler and the worker.
pub struct Application<G: PaymentsGateway> {
    pub config: Config,
    pub logger: Logger,
    pub store: Arc<dyn Store>,
    pub ledger: Ledger<G>,
    pub usage: UsageEngine<G>,
}

impl<G: PaymentsGateway> Application<G> {
    pub fn new(
        config: Config,
        logger: Logger,
        store: Arc<dyn Store>,
        gateway: G,
        usage_source: Arc<dyn UsageSource>,
        cipher: Option<Cipher>,
    ) -> Self {
        let ledger = Ledger::new(
            store.clone(),
            Arc::new(gateway),
            cipher,
            logger.clone(),
            config.gateway_timeout(),
        );
        let usage = UsageEngine::new(
            store.clone(),
            ledger.clone(),
            usage_source,
            logger.clone(),
            config.usage_run_timeout(),
        );

        Self {
            config,
            logger,
            store,
            ledger,
            usage,
        }
    }
}

/// The authenticated caller.
///
/// The role and organization come from the caller's profile when one
/// exists, otherwise the role is taken from the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub role: Role,
    pub organization_id: Option<OrganizationId>,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    pub fn belongs_to(&self, organization: OrganizationId) -> bool {
        self.organization_id == Some(organization)
    }

    /// The caller's organization, required by most operations.
    pub fn organization(&self) -> Result<OrganizationId, Error> {
        self.organization_id.ok_or_else(|| {
            Error::PreconditionFailed("User does not belong to an organization".into())
        })
    }
}

/// Where a request comes from, recorded in the invitation usage log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOrigin {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}
