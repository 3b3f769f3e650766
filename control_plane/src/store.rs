//! Persistence of the control plane.
//!
//! Every domain has its own repository trait. A [`Store`] is anything that
//! implements all of them; the application holds one as `Arc<dyn Store>`.
//!
//! Mutations are expressed as closures which the store runs against the
//! current version of a record while holding the record's lock (a row lock in
//! Postgres, the state lock in memory). When the closure fails nothing is
//! written.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use uuid::Uuid;

use primitives::{
    affiliate::NewAffiliate,
    api::Pagination,
    association::{CreationPath, NewAssociation},
    billing::{NewPaymentMethod, NewTransaction},
    campaign::NewCampaign,
    delegation::NewDelegation,
    invitation::{
        NewInvitation, NewUsageLogEntry, UsageLogEntry, UseAttempt, UseOutcome, UseRejection,
    },
    organization::{NewOrganization, OrganizationKind},
    profile::UpsertProfile,
    usage::CalculatedUsage,
    Affiliate, AffiliateId, Association, AssociationId, AssociationStatus, BillingAccount,
    Campaign, CampaignId, Delegation, DelegationId, DelegationStatus, Invitation, InvitationId,
    InvitationToken, Organization, OrganizationId, PaymentMethod, PaymentMethodId, Profile,
    Transaction, TransactionId, TransactionKind, TransactionStatus, UsageRecord, UsageRecordId,
    WebhookEvent,
};

use crate::{db::PoolError, error::Error};

pub use self::{memory::MemoryStore, postgres::PostgresStore};

pub mod memory;
pub mod postgres;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("{0}")]
    NotFound(&'static str),
    #[error("{0}")]
    AlreadyExists(&'static str),
    #[error("Postgres: {0}")]
    Postgres(#[from] PoolError),
    #[error("Serialization: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("The store lock is poisoned")]
    Lock,
}

impl From<tokio_postgres::Error> for RepositoryError {
    fn from(error: tokio_postgres::Error) -> Self {
        Self::Postgres(PoolError::Backend(error))
    }
}

/// Changes a record in place.
pub type Mutation<'a, T> = Box<dyn FnOnce(&mut T) -> Result<(), Error> + Send + 'a>;

/// Decides the ledger entry to record while the account is locked.
pub type Plan<'a> =
    Box<dyn FnOnce(&mut BillingAccount) -> Result<NewTransaction, Error> + Send + 'a>;

/// Settles a transaction against its locked account.
pub type Settlement<'a> =
    Box<dyn FnOnce(&mut Transaction, &mut BillingAccount) -> Result<(), Error> + Send + 'a>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssociationFilter {
    pub advertiser_org_id: Option<OrganizationId>,
    pub affiliate_org_id: Option<OrganizationId>,
    /// Either side of the association.
    pub organization_id: Option<OrganizationId>,
    pub status: Option<AssociationStatus>,
}

impl AssociationFilter {
    pub fn matches(&self, association: &Association) -> bool {
        self.advertiser_org_id
            .map_or(true, |org| association.advertiser_org_id == org)
            && self
                .affiliate_org_id
                .map_or(true, |org| association.affiliate_org_id == org)
            && self
                .organization_id
                .map_or(true, |org| association.involves(org))
            && self.status.map_or(true, |status| association.status == status)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DelegationFilter {
    pub agency_org_id: Option<OrganizationId>,
    pub advertiser_org_id: Option<OrganizationId>,
    /// Either side of the delegation.
    pub organization_id: Option<OrganizationId>,
    pub status: Option<DelegationStatus>,
}

impl DelegationFilter {
    pub fn matches(&self, delegation: &Delegation) -> bool {
        self.agency_org_id
            .map_or(true, |org| delegation.agency_org_id == org)
            && self
                .advertiser_org_id
                .map_or(true, |org| delegation.advertiser_org_id == org)
            && self
                .organization_id
                .map_or(true, |org| delegation.side_of(org).is_some())
            && self.status.map_or(true, |status| delegation.status == status)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
pub struct TransactionFilter {
    #[serde(default, rename = "type")]
    pub kind: Option<TransactionKind>,
    #[serde(default)]
    pub status: Option<TransactionStatus>,
}

impl TransactionFilter {
    pub fn matches(&self, transaction: &Transaction) -> bool {
        self.kind.map_or(true, |kind| transaction.kind == kind)
            && self.status.map_or(true, |status| transaction.status == status)
    }
}

/// Decides whether the locked `invitation` may be used by the organization
/// of the attempt, `affiliate` being that organization if it exists.
pub(crate) fn check_use(
    invitation: &Invitation,
    affiliate: Option<&Organization>,
    now: DateTime<Utc>,
) -> Result<(), UseRejection> {
    let affiliate = affiliate.ok_or(UseRejection::AffiliateOrganizationNotFound)?;
    invitation.check_usable(affiliate.id, now)?;

    if !affiliate.is(OrganizationKind::Affiliate) {
        return Err(UseRejection::NotAffiliateOrganization);
    }

    Ok(())
}

/// The usage log entry of a decided attempt.
pub(crate) fn usage_log_entry(
    attempt: &UseAttempt,
    outcome: &UseOutcome,
    now: DateTime<Utc>,
) -> NewUsageLogEntry {
    match outcome {
        UseOutcome::Created {
            association,
            invitation,
        } => NewUsageLogEntry::for_attempt(
            attempt,
            Some(invitation.id),
            Some(association.id),
            None,
            now,
        ),
        UseOutcome::Existing {
            association,
            invitation,
        } => NewUsageLogEntry::for_attempt(
            attempt,
            Some(invitation.id),
            Some(association.id),
            Some(UseRejection::AssociationExists),
            now,
        ),
        UseOutcome::Rejected {
            rejection,
            invitation,
        } => NewUsageLogEntry::for_attempt(
            attempt,
            invitation.as_ref().map(|invitation| invitation.id),
            None,
            Some(*rejection),
            now,
        ),
    }
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn create_organization(
        &self,
        new: NewOrganization,
        now: DateTime<Utc>,
    ) -> Result<Organization, Error>;

    async fn organization(&self, id: OrganizationId) -> Result<Option<Organization>, Error>;

    async fn organizations(&self, pagination: Pagination) -> Result<Vec<Organization>, Error>;

    async fn update_organization(
        &self,
        id: OrganizationId,
        mutation: Mutation<'_, Organization>,
    ) -> Result<Organization, Error>;

    /// Deletes the organization together with everything it owns or takes
    /// part in. Profiles are detached, not deleted.
    async fn delete_organization(&self, id: OrganizationId) -> Result<(), Error>;

    async fn profile(&self, id: Uuid) -> Result<Option<Profile>, Error>;

    async fn create_profile(&self, profile: Profile) -> Result<Profile, Error>;

    async fn upsert_profile(&self, upsert: UpsertProfile, now: DateTime<Utc>)
        -> Result<Profile, Error>;

    async fn update_profile(
        &self,
        id: Uuid,
        mutation: Mutation<'_, Profile>,
    ) -> Result<Profile, Error>;

    async fn delete_profile(&self, id: Uuid) -> Result<(), Error>;
}

/// Campaigns and affiliates, the entities the visibility graph ranges over.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn create_campaign(&self, new: NewCampaign, now: DateTime<Utc>)
        -> Result<Campaign, Error>;

    async fn campaign(&self, id: CampaignId) -> Result<Option<Campaign>, Error>;

    /// Every campaign of the organization, or every campaign when `None`.
    async fn campaigns(&self, organization: Option<OrganizationId>)
        -> Result<Vec<Campaign>, Error>;

    async fn update_campaign(
        &self,
        id: CampaignId,
        mutation: Mutation<'_, Campaign>,
    ) -> Result<Campaign, Error>;

    async fn delete_campaign(&self, id: CampaignId) -> Result<(), Error>;

    async fn create_affiliate(
        &self,
        new: NewAffiliate,
        now: DateTime<Utc>,
    ) -> Result<Affiliate, Error>;

    async fn affiliate(&self, id: AffiliateId) -> Result<Option<Affiliate>, Error>;

    async fn affiliates(
        &self,
        organization: Option<OrganizationId>,
    ) -> Result<Vec<Affiliate>, Error>;

    async fn update_affiliate(
        &self,
        id: AffiliateId,
        mutation: Mutation<'_, Affiliate>,
    ) -> Result<Affiliate, Error>;

    async fn delete_affiliate(&self, id: AffiliateId) -> Result<(), Error>;
}

#[async_trait]
pub trait AssociationStore: Send + Sync {
    /// Fails with a conflict when the pair already has an association,
    /// whatever its status.
    async fn create_association(
        &self,
        new: NewAssociation,
        path: CreationPath,
        requested_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Association, Error>;

    async fn association(&self, id: AssociationId) -> Result<Option<Association>, Error>;

    async fn association_by_pair(
        &self,
        advertiser: OrganizationId,
        affiliate: OrganizationId,
    ) -> Result<Option<Association>, Error>;

    async fn associations(&self, filter: AssociationFilter) -> Result<Vec<Association>, Error>;

    async fn update_association(
        &self,
        id: AssociationId,
        mutation: Mutation<'_, Association>,
    ) -> Result<Association, Error>;
}

#[async_trait]
pub trait InvitationStore: Send + Sync {
    /// Fails with a conflict on a token collision.
    async fn create_invitation(
        &self,
        new: NewInvitation,
        token: InvitationToken,
        created_by: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Invitation, Error>;

    async fn invitation(&self, id: InvitationId) -> Result<Option<Invitation>, Error>;

    async fn invitation_by_token(
        &self,
        token: &InvitationToken,
    ) -> Result<Option<Invitation>, Error>;

    async fn invitations(
        &self,
        advertiser: Option<OrganizationId>,
    ) -> Result<Vec<Invitation>, Error>;

    async fn update_invitation(
        &self,
        id: InvitationId,
        mutation: Mutation<'_, Invitation>,
    ) -> Result<Invitation, Error>;

    async fn delete_invitation(&self, id: InvitationId) -> Result<(), Error>;

    /// Uses the invitation as one atomic unit serialized on the invitation:
    /// the usability check, the association creation and the usage counter
    /// increment either all happen or none does. Every attempt, including
    /// the rejected ones, is appended to the usage log.
    async fn use_invitation(
        &self,
        attempt: &UseAttempt,
        now: DateTime<Utc>,
    ) -> Result<UseOutcome, Error>;

    async fn log_invitation_use(&self, entry: NewUsageLogEntry) -> Result<UsageLogEntry, Error>;

    async fn invitation_usage(&self, id: InvitationId) -> Result<Vec<UsageLogEntry>, Error>;

    /// Marks active invitations past their expiration as expired and
    /// returns how many there were.
    async fn expire_invitations(&self, now: DateTime<Utc>) -> Result<u64, Error>;
}

#[async_trait]
pub trait DelegationStore: Send + Sync {
    /// Fails with a conflict when the pair already has a delegation.
    async fn create_delegation(
        &self,
        new: NewDelegation,
        delegated_by: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Delegation, Error>;

    async fn delegation(&self, id: DelegationId) -> Result<Option<Delegation>, Error>;

    async fn delegation_by_pair(
        &self,
        agency: OrganizationId,
        advertiser: OrganizationId,
    ) -> Result<Option<Delegation>, Error>;

    async fn delegations(&self, filter: DelegationFilter) -> Result<Vec<Delegation>, Error>;

    async fn update_delegation(
        &self,
        id: DelegationId,
        mutation: Mutation<'_, Delegation>,
    ) -> Result<Delegation, Error>;

    /// Revokes active and suspended delegations past their expiration and
    /// returns how many there were.
    async fn expire_delegations(&self, now: DateTime<Utc>) -> Result<u64, Error>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn billing_account(
        &self,
        organization: OrganizationId,
    ) -> Result<Option<BillingAccount>, Error>;

    /// Every billing account, for the usage engine.
    async fn billing_accounts(&self) -> Result<Vec<BillingAccount>, Error>;

    /// Returns the existing account of the organization or stores `account`.
    async fn create_billing_account(
        &self,
        account: BillingAccount,
    ) -> Result<BillingAccount, Error>;

    async fn update_billing_account(
        &self,
        organization: OrganizationId,
        mutation: Mutation<'_, BillingAccount>,
    ) -> Result<BillingAccount, Error>;

    /// Records a ledger entry while the account is locked, so that entries
    /// on one account are serialized and no entry observes a stale balance.
    async fn record_transaction(
        &self,
        organization: OrganizationId,
        plan: Plan<'_>,
        now: DateTime<Utc>,
    ) -> Result<(BillingAccount, Transaction), Error>;

    /// Settles a transaction while both it and its account are locked.
    async fn settle_transaction(
        &self,
        id: TransactionId,
        settlement: Settlement<'_>,
    ) -> Result<(BillingAccount, Transaction), Error>;

    async fn transaction_by_payment_intent(
        &self,
        payment_intent: &str,
    ) -> Result<Option<Transaction>, Error>;

    async fn transaction_by_invoice(&self, invoice: &str) -> Result<Option<Transaction>, Error>;

    async fn transaction_by_reference(
        &self,
        reference_type: &str,
        reference_id: &str,
    ) -> Result<Option<Transaction>, Error>;

    /// Newest first, ordered by `(processed_at, id)`.
    async fn transactions(
        &self,
        organization: OrganizationId,
        filter: &TransactionFilter,
        pagination: Pagination,
    ) -> Result<Vec<Transaction>, Error>;

    /// Stores the method; when it is the default, the previous default is
    /// cleared and the account points to it.
    async fn add_payment_method(
        &self,
        organization: OrganizationId,
        new: NewPaymentMethod,
        now: DateTime<Utc>,
    ) -> Result<PaymentMethod, Error>;

    /// Active payment methods of the organization.
    async fn payment_methods(
        &self,
        organization: OrganizationId,
    ) -> Result<Vec<PaymentMethod>, Error>;

    async fn payment_method(&self, id: PaymentMethodId) -> Result<Option<PaymentMethod>, Error>;

    /// Deactivates the method and clears it as the account default.
    async fn remove_payment_method(
        &self,
        id: PaymentMethodId,
        now: DateTime<Utc>,
    ) -> Result<PaymentMethod, Error>;

    async fn set_default_payment_method(
        &self,
        id: PaymentMethodId,
        now: DateTime<Utc>,
    ) -> Result<PaymentMethod, Error>;

    async fn webhook_event(&self, external_id: &str) -> Result<Option<WebhookEvent>, Error>;

    /// Stores a first delivery; fails with a conflict when the external id
    /// is already known.
    async fn insert_webhook_event(
        &self,
        external_id: &str,
        event_type: &str,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<WebhookEvent, Error>;

    async fn save_webhook_event(&self, event: &WebhookEvent) -> Result<(), Error>;
}

#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn usage_record(
        &self,
        organization: OrganizationId,
        date: NaiveDate,
    ) -> Result<Option<UsageRecord>, Error>;

    async fn usage_record_by_id(&self, id: UsageRecordId) -> Result<Option<UsageRecord>, Error>;

    /// Inserts or recalculates the record of the organization's day.
    /// Returns `None` when the existing record is already settled.
    async fn save_calculated_usage(
        &self,
        usage: CalculatedUsage,
        now: DateTime<Utc>,
    ) -> Result<Option<UsageRecord>, Error>;

    async fn update_usage_record(
        &self,
        id: UsageRecordId,
        mutation: Mutation<'_, UsageRecord>,
    ) -> Result<UsageRecord, Error>;

    /// Newest day first.
    async fn usage_records(
        &self,
        organization: OrganizationId,
        pagination: Pagination,
    ) -> Result<Vec<UsageRecord>, Error>;
}

pub trait Store:
    IdentityStore
    + CatalogStore
    + AssociationStore
    + InvitationStore
    + DelegationStore
    + LedgerStore
    + UsageStore
    + Send
    + Sync
    + 'static
{
}

impl<T> Store for T where
    T: IdentityStore
        + CatalogStore
        + AssociationStore
        + InvitationStore
        + DelegationStore
        + LedgerStore
        + UsageStore
        + Send
        + Sync
        + 'static
{
}
