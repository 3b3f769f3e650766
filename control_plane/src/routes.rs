//! The `/api/v1` REST API.
//!
//! Every handler extracts the [`Application`](crate::Application) and, for
//! the authenticated routes, the [`Actor`](crate::Actor) set by
//! [`authenticate`](crate::middleware::auth::authenticate) and delegates to
//! the matching [`service`](crate::services). The role guards of
//! [`routers`] only reject the obviously unfit callers, the services decide
//! on the organization scope.
//!
//! # Routes
//!
//! - `GET /health`
//!
//! Public, no token required:
//!
//! - `POST /api/v1/public/webhooks/payments` - deliveries of the payments provider
//! - `GET /api/v1/public/invitations/:token`
//!
//! Identity:
//!
//! - `GET /api/v1/users/me`, `GET /api/v1/users/me/role`
//! - `POST /api/v1/profiles`, `POST /api/v1/profiles/upsert`
//! - `PUT|DELETE /api/v1/profiles/:id`
//! - `POST|GET /api/v1/organizations`
//! - `GET /api/v1/organizations/:id`, `PUT|DELETE /api/v1/organizations/:id` (Admin)
//! - `GET /api/v1/organizations/:id/{affiliates,campaigns,associations}`
//! - `GET /api/v1/organizations/:id/visible-affiliates` (AdvertiserManager, Admin)
//! - `GET /api/v1/organizations/:id/visible-campaigns` (AffiliateManager, Admin)
//!
//! Catalog:
//!
//! - `POST|GET /api/v1/campaigns`, `GET|PUT|DELETE /api/v1/campaigns/:id`
//! - `POST|GET /api/v1/affiliates`, `GET|PUT|DELETE /api/v1/affiliates/:id`
//!
//! Associations:
//!
//! - `POST /api/v1/organization-associations/{invitations,requests}`
//! - `GET /api/v1/organization-associations`, `GET /api/v1/organization-associations/:id`
//! - `GET /api/v1/organization-associations/by-pair`
//! - `POST /api/v1/organization-associations/:id/{approve,reject,suspend,reactivate}`
//! - `PUT /api/v1/organization-associations/:id/visibility`
//!
//! Invitations:
//!
//! - `POST|GET /api/v1/advertiser-association-invitations`
//! - `GET|PUT|DELETE /api/v1/advertiser-association-invitations/:id`
//! - `POST /api/v1/advertiser-association-invitations/use`
//! - `GET /api/v1/advertiser-association-invitations/:id/{usage-history,link}`
//!
//! Delegations:
//!
//! - `POST|GET /api/v1/agency-delegations`, `GET /api/v1/agency-delegations/:id`
//! - `POST /api/v1/agency-delegations/:id/{accept,reject,suspend,reactivate,revoke}`
//! - `PUT /api/v1/agency-delegations/:id/{permissions,expiration}`
//! - `POST /api/v1/agency-delegations/check-permissions`
//! - `GET /api/v1/agency-delegations/permissions`
//! - `GET /api/v1/agency-delegations/agency/:agency_org_id`
//! - `GET /api/v1/agency-delegations/advertiser/:advertiser_org_id`
//!
//! Billing, scoped to the caller's organization or `?organization_id=`:
//!
//! - `GET /api/v1/billing/dashboard`, `PUT /api/v1/billing/config`
//! - `PUT /api/v1/billing/credit-limit` (Admin)
//! - `GET|POST /api/v1/billing/payment-methods`
//! - `DELETE /api/v1/billing/payment-methods/:id`, `POST /api/v1/billing/payment-methods/:id/default`
//! - `POST /api/v1/billing/recharge`, `GET /api/v1/billing/transactions`
//! - `GET /api/v1/billing/usage`, `POST /api/v1/billing/usage/run` (Admin)
//! - `POST /api/v1/billing/usage/:id/payout` (Admin)

pub mod association;
pub mod billing;
pub mod catalog;
pub mod delegation;
pub mod identity;
pub mod invitation;
pub mod public;
pub mod routers;
