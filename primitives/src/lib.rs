#![deny(rust_2018_idioms)]
#![deny(clippy::all)]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! Domain types and the pure rules of the affiliate control plane.
//!
//! Everything in this crate is free of I/O: the state machines of
//! associations, invitations, delegations and usage records, the visibility
//! semantics and the balance arithmetic of the ledger. Persistence and the
//! HTTP surface live in `control_plane`.

pub use self::{
    affiliate::Affiliate,
    association::{Association, AssociationStatus, CreationPath},
    billing::{
        BillingAccount, BillingMode, PaymentIntentStatus, PaymentMethod, Transaction,
        TransactionKind, TransactionStatus, WebhookEvent, WebhookEventStatus,
    },
    campaign::{Campaign, CampaignPricing, CampaignStatus},
    delegation::{Delegation, DelegationStatus, Permission},
    id::{
        AffiliateId, AssociationId, BillingAccountId, CampaignId, DelegationId, InvitationId,
        OrganizationId, PaymentMethodId, TransactionId, UsageRecordId, WebhookEventId,
    },
    invitation::{Invitation, InvitationStatus, InvitationToken},
    money::Money,
    organization::{Organization, OrganizationKind},
    profile::{Profile, Role},
    usage::{UsageRecord, UsageStatus},
};

pub mod affiliate;
pub mod api;
pub mod association;
pub mod billing;
pub mod campaign;
pub mod config;
pub mod delegation;
pub mod id;
pub mod invitation;
pub mod money;
pub mod organization;
pub mod profile;
#[cfg(any(test, feature = "test-util"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-util")))]
pub mod test_util;
pub mod usage;
pub mod util;
