//! A [`Store`](super::Store) kept in process memory.
//!
//! All the state sits behind a single lock, which gives every operation the
//! same atomicity the Postgres store gets from transactions. Used by the
//! test-suite and by the `--memory` development mode.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use primitives::{
    affiliate::NewAffiliate,
    api::Pagination,
    association::{CreationPath, NewAssociation},
    billing::NewPaymentMethod,
    campaign::NewCampaign,
    delegation::NewDelegation,
    invitation::{
        InvitationStatus, NewInvitation, NewUsageLogEntry, UsageLogEntry, UseAttempt, UseOutcome,
    },
    organization::{NewOrganization, OrganizationKind},
    profile::UpsertProfile,
    usage::CalculatedUsage,
    Affiliate, AffiliateId, Association, AssociationId, BillingAccount, BillingAccountId,
    Campaign, CampaignId, Delegation, DelegationId, DelegationStatus, Invitation, InvitationId,
    InvitationToken, Organization, OrganizationId, PaymentMethod, PaymentMethodId, Profile,
    Transaction, TransactionId, UsageRecord, UsageRecordId, WebhookEvent, WebhookEventId,
    WebhookEventStatus,
};

use super::{
    check_use, usage_log_entry, AssociationFilter, AssociationStore, CatalogStore,
    DelegationFilter, DelegationStore, IdentityStore, InvitationStore, LedgerStore, Mutation,
    Plan, RepositoryError, Settlement, TransactionFilter, UsageStore,
};
use crate::error::Error;

#[derive(Debug, Default)]
struct Sequence(i64);

impl Sequence {
    fn next(&mut self) -> i64 {
        self.0 += 1;
        self.0
    }

    /// Keeps the sequence ahead of an explicitly inserted id.
    fn observe(&mut self, id: i64) {
        self.0 = self.0.max(id);
    }
}

#[derive(Debug, Default)]
struct Sequences {
    organization: Sequence,
    campaign: Sequence,
    affiliate: Sequence,
    association: Sequence,
    invitation: Sequence,
    usage_log: Sequence,
    delegation: Sequence,
    billing_account: Sequence,
    transaction: Sequence,
    payment_method: Sequence,
    webhook_event: Sequence,
    usage_record: Sequence,
}

#[derive(Debug, Default)]
struct State {
    sequences: Sequences,
    organizations: BTreeMap<OrganizationId, Organization>,
    profiles: HashMap<Uuid, Profile>,
    campaigns: BTreeMap<CampaignId, Campaign>,
    affiliates: BTreeMap<AffiliateId, Affiliate>,
    associations: BTreeMap<AssociationId, Association>,
    invitations: BTreeMap<InvitationId, Invitation>,
    usage_log: Vec<UsageLogEntry>,
    delegations: BTreeMap<DelegationId, Delegation>,
    /// by organization
    accounts: BTreeMap<OrganizationId, BillingAccount>,
    transactions: BTreeMap<TransactionId, Transaction>,
    payment_methods: BTreeMap<PaymentMethodId, PaymentMethod>,
    /// by external event id
    webhook_events: BTreeMap<String, WebhookEvent>,
    usage_records: BTreeMap<UsageRecordId, UsageRecord>,
}

impl State {
    fn association_by_pair(
        &self,
        advertiser: OrganizationId,
        affiliate: OrganizationId,
    ) -> Option<&Association> {
        self.associations.values().find(|association| {
            association.advertiser_org_id == advertiser && association.affiliate_org_id == affiliate
        })
    }

    fn insert_association(
        &mut self,
        new: NewAssociation,
        path: CreationPath,
        requested_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Association, RepositoryError> {
        if self
            .association_by_pair(new.advertiser_org_id, new.affiliate_org_id)
            .is_some()
        {
            return Err(RepositoryError::AlreadyExists("Association"));
        }

        let id = AssociationId(self.sequences.association.next());
        let association = new.into_pending(id, path, requested_by, now);
        self.associations.insert(id, association.clone());

        Ok(association)
    }

    fn append_usage_log(&mut self, entry: NewUsageLogEntry) -> UsageLogEntry {
        let entry = entry.with_id(self.sequences.usage_log.next());
        self.usage_log.push(entry.clone());

        entry
    }

    fn account_mut(
        &mut self,
        organization: OrganizationId,
    ) -> Result<&mut BillingAccount, RepositoryError> {
        self.accounts
            .get_mut(&organization)
            .ok_or(RepositoryError::NotFound("Billing account"))
    }

    /// Makes `id` the only default method of its organization.
    fn make_default(&mut self, id: PaymentMethodId, organization: OrganizationId, now: DateTime<Utc>) {
        for method in self
            .payment_methods
            .values_mut()
            .filter(|method| method.organization_id == organization)
        {
            let is_default = method.id == id;
            if method.is_default != is_default {
                method.is_default = is_default;
                method.updated_at = now;
            }
        }

        if let Some(account) = self.accounts.get_mut(&organization) {
            account.default_payment_method_id = Some(id);
            account.updated_at = now;
        }
    }
}

/// Applies `mutation` to a copy of the record and stores the copy only when
/// the mutation succeeds.
fn mutate<K: Ord, T: Clone>(
    records: &mut BTreeMap<K, T>,
    key: &K,
    what: &'static str,
    mutation: Mutation<'_, T>,
) -> Result<T, Error> {
    let record = records.get_mut(key).ok_or(RepositoryError::NotFound(what))?;

    let mut updated = record.clone();
    mutation(&mut updated)?;
    *record = updated.clone();

    Ok(updated)
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, RepositoryError> {
        self.state.read().map_err(|_| RepositoryError::Lock)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, RepositoryError> {
        self.state.write().map_err(|_| RepositoryError::Lock)
    }

    /// Stores an organization with its id as given.
    pub fn insert_organization(&self, organization: Organization) -> Result<(), Error> {
        let mut state = self.write()?;
        state.sequences.organization.observe(organization.id.as_i64());
        state.organizations.insert(organization.id, organization);

        Ok(())
    }

    pub fn insert_profile(&self, profile: Profile) -> Result<(), Error> {
        self.write()?.profiles.insert(profile.id, profile);

        Ok(())
    }

    pub fn insert_campaign(&self, campaign: Campaign) -> Result<(), Error> {
        let mut state = self.write()?;
        state.sequences.campaign.observe(campaign.id.as_i64());
        state.campaigns.insert(campaign.id, campaign);

        Ok(())
    }

    pub fn insert_affiliate(&self, affiliate: Affiliate) -> Result<(), Error> {
        let mut state = self.write()?;
        state.sequences.affiliate.observe(affiliate.id.as_i64());
        state.affiliates.insert(affiliate.id, affiliate);

        Ok(())
    }

    pub fn insert_association(&self, association: Association) -> Result<(), Error> {
        let mut state = self.write()?;
        state.sequences.association.observe(association.id.as_i64());
        state.associations.insert(association.id, association);

        Ok(())
    }

    pub fn insert_invitation(&self, invitation: Invitation) -> Result<(), Error> {
        let mut state = self.write()?;
        state.sequences.invitation.observe(invitation.id.as_i64());
        state.invitations.insert(invitation.id, invitation);

        Ok(())
    }

    pub fn insert_delegation(&self, delegation: Delegation) -> Result<(), Error> {
        let mut state = self.write()?;
        state.sequences.delegation.observe(delegation.id.as_i64());
        state.delegations.insert(delegation.id, delegation);

        Ok(())
    }

    pub fn insert_billing_account(&self, account: BillingAccount) -> Result<(), Error> {
        let mut state = self.write()?;
        state.sequences.billing_account.observe(account.id.as_i64());
        state.accounts.insert(account.organization_id, account);

        Ok(())
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn create_organization(
        &self,
        new: NewOrganization,
        now: DateTime<Utc>,
    ) -> Result<Organization, Error> {
        let mut state = self.write()?;
        if new.kind == OrganizationKind::PlatformOwner
            && state
                .organizations
                .values()
                .any(|organization| organization.is(OrganizationKind::PlatformOwner))
        {
            return Err(RepositoryError::AlreadyExists("Platform owner organization").into());
        }

        let id = OrganizationId(state.sequences.organization.next());
        let organization = new.into_organization(id, now);
        state.organizations.insert(id, organization.clone());

        Ok(organization)
    }

    async fn organization(&self, id: OrganizationId) -> Result<Option<Organization>, Error> {
        Ok(self.read()?.organizations.get(&id).cloned())
    }

    async fn organizations(&self, pagination: Pagination) -> Result<Vec<Organization>, Error> {
        let organizations = self.read()?.organizations.values().cloned().collect();

        Ok(pagination.paginate(organizations))
    }

    async fn update_organization(
        &self,
        id: OrganizationId,
        mutation: Mutation<'_, Organization>,
    ) -> Result<Organization, Error> {
        mutate(&mut self.write()?.organizations, &id, "Organization", mutation)
    }

    async fn delete_organization(&self, id: OrganizationId) -> Result<(), Error> {
        let mut state = self.write()?;
        state
            .organizations
            .remove(&id)
            .ok_or(RepositoryError::NotFound("Organization"))?;

        state.campaigns.retain(|_, campaign| campaign.organization_id != id);
        state.affiliates.retain(|_, affiliate| affiliate.organization_id != id);
        state.associations.retain(|_, association| !association.involves(id));
        state
            .invitations
            .retain(|_, invitation| invitation.advertiser_org_id != id);
        state
            .delegations
            .retain(|_, delegation| delegation.side_of(id).is_none());
        state.accounts.remove(&id);
        state.transactions.retain(|_, tx| tx.organization_id != id);
        state
            .payment_methods
            .retain(|_, method| method.organization_id != id);
        state
            .usage_records
            .retain(|_, record| record.organization_id != id);
        for profile in state.profiles.values_mut() {
            if profile.belongs_to(id) {
                profile.organization_id = None;
            }
        }

        Ok(())
    }

    async fn profile(&self, id: Uuid) -> Result<Option<Profile>, Error> {
        Ok(self.read()?.profiles.get(&id).cloned())
    }

    async fn create_profile(&self, profile: Profile) -> Result<Profile, Error> {
        let mut state = self.write()?;
        if state.profiles.contains_key(&profile.id) {
            return Err(RepositoryError::AlreadyExists("Profile").into());
        }
        state.profiles.insert(profile.id, profile.clone());

        Ok(profile)
    }

    async fn upsert_profile(
        &self,
        upsert: UpsertProfile,
        now: DateTime<Utc>,
    ) -> Result<Profile, Error> {
        let mut state = self.write()?;

        let profile = match state.profiles.get_mut(&upsert.id) {
            Some(profile) => {
                upsert.merge_into(profile, now);
                profile.clone()
            }
            None => {
                let profile = upsert.into_new(now);
                state.profiles.insert(profile.id, profile.clone());
                profile
            }
        };

        Ok(profile)
    }

    async fn update_profile(
        &self,
        id: Uuid,
        mutation: Mutation<'_, Profile>,
    ) -> Result<Profile, Error> {
        let mut state = self.write()?;
        let profile = state
            .profiles
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound("Profile"))?;

        let mut updated = profile.clone();
        mutation(&mut updated)?;
        *profile = updated.clone();

        Ok(updated)
    }

    async fn delete_profile(&self, id: Uuid) -> Result<(), Error> {
        self.write()?
            .profiles
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound("Profile").into())
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn create_campaign(
        &self,
        new: NewCampaign,
        now: DateTime<Utc>,
    ) -> Result<Campaign, Error> {
        let mut state = self.write()?;
        let id = CampaignId(state.sequences.campaign.next());
        let campaign = new.into_campaign(id, now);
        state.campaigns.insert(id, campaign.clone());

        Ok(campaign)
    }

    async fn campaign(&self, id: CampaignId) -> Result<Option<Campaign>, Error> {
        Ok(self.read()?.campaigns.get(&id).cloned())
    }

    async fn campaigns(
        &self,
        organization: Option<OrganizationId>,
    ) -> Result<Vec<Campaign>, Error> {
        Ok(self
            .read()?
            .campaigns
            .values()
            .filter(|campaign| organization.map_or(true, |org| campaign.organization_id == org))
            .cloned()
            .collect())
    }

    async fn update_campaign(
        &self,
        id: CampaignId,
        mutation: Mutation<'_, Campaign>,
    ) -> Result<Campaign, Error> {
        mutate(&mut self.write()?.campaigns, &id, "Campaign", mutation)
    }

    async fn delete_campaign(&self, id: CampaignId) -> Result<(), Error> {
        self.write()?
            .campaigns
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound("Campaign").into())
    }

    async fn create_affiliate(
        &self,
        new: NewAffiliate,
        now: DateTime<Utc>,
    ) -> Result<Affiliate, Error> {
        let mut state = self.write()?;
        let id = AffiliateId(state.sequences.affiliate.next());
        let affiliate = new.into_affiliate(id, now);
        state.affiliates.insert(id, affiliate.clone());

        Ok(affiliate)
    }

    async fn affiliate(&self, id: AffiliateId) -> Result<Option<Affiliate>, Error> {
        Ok(self.read()?.affiliates.get(&id).cloned())
    }

    async fn affiliates(
        &self,
        organization: Option<OrganizationId>,
    ) -> Result<Vec<Affiliate>, Error> {
        Ok(self
            .read()?
            .affiliates
            .values()
            .filter(|affiliate| organization.map_or(true, |org| affiliate.organization_id == org))
            .cloned()
            .collect())
    }

    async fn update_affiliate(
        &self,
        id: AffiliateId,
        mutation: Mutation<'_, Affiliate>,
    ) -> Result<Affiliate, Error> {
        mutate(&mut self.write()?.affiliates, &id, "Affiliate", mutation)
    }

    async fn delete_affiliate(&self, id: AffiliateId) -> Result<(), Error> {
        self.write()?
            .affiliates
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound("Affiliate").into())
    }
}

#[async_trait]
impl AssociationStore for MemoryStore {
    async fn create_association(
        &self,
        new: NewAssociation,
        path: CreationPath,
        requested_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Association, Error> {
        Ok(self
            .write()?
            .insert_association(new, path, requested_by, now)?)
    }

    async fn association(&self, id: AssociationId) -> Result<Option<Association>, Error> {
        Ok(self.read()?.associations.get(&id).cloned())
    }

    async fn association_by_pair(
        &self,
        advertiser: OrganizationId,
        affiliate: OrganizationId,
    ) -> Result<Option<Association>, Error> {
        Ok(self
            .read()?
            .association_by_pair(advertiser, affiliate)
            .cloned())
    }

    async fn associations(&self, filter: AssociationFilter) -> Result<Vec<Association>, Error> {
        Ok(self
            .read()?
            .associations
            .values()
            .filter(|association| filter.matches(association))
            .cloned()
            .collect())
    }

    async fn update_association(
        &self,
        id: AssociationId,
        mutation: Mutation<'_, Association>,
    ) -> Result<Association, Error> {
        mutate(&mut self.write()?.associations, &id, "Association", mutation)
    }
}

#[async_trait]
impl InvitationStore for MemoryStore {
    async fn create_invitation(
        &self,
        new: NewInvitation,
        token: InvitationToken,
        created_by: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Invitation, Error> {
        let mut state = self.write()?;
        if state
            .invitations
            .values()
            .any(|invitation| invitation.token == token)
        {
            return Err(RepositoryError::AlreadyExists("Invitation token").into());
        }

        let id = InvitationId(state.sequences.invitation.next());
        let invitation = new.into_invitation(id, token, created_by, now);
        state.invitations.insert(id, invitation.clone());

        Ok(invitation)
    }

    async fn invitation(&self, id: InvitationId) -> Result<Option<Invitation>, Error> {
        Ok(self.read()?.invitations.get(&id).cloned())
    }

    async fn invitation_by_token(
        &self,
        token: &InvitationToken,
    ) -> Result<Option<Invitation>, Error> {
        Ok(self
            .read()?
            .invitations
            .values()
            .find(|invitation| &invitation.token == token)
            .cloned())
    }

    async fn invitations(
        &self,
        advertiser: Option<OrganizationId>,
    ) -> Result<Vec<Invitation>, Error> {
        Ok(self
            .read()?
            .invitations
            .values()
            .filter(|invitation| {
                advertiser.map_or(true, |org| invitation.advertiser_org_id == org)
            })
            .cloned()
            .collect())
    }

    async fn update_invitation(
        &self,
        id: InvitationId,
        mutation: Mutation<'_, Invitation>,
    ) -> Result<Invitation, Error> {
        mutate(&mut self.write()?.invitations, &id, "Invitation", mutation)
    }

    async fn delete_invitation(&self, id: InvitationId) -> Result<(), Error> {
        self.write()?
            .invitations
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound("Invitation").into())
    }

    async fn use_invitation(
        &self,
        attempt: &UseAttempt,
        now: DateTime<Utc>,
    ) -> Result<UseOutcome, Error> {
        let mut state = self.write()?;

        let invitation = state
            .invitations
            .values()
            .find(|invitation| invitation.token == attempt.token)
            .cloned();

        let outcome = match invitation {
            None => UseOutcome::Rejected {
                rejection: primitives::invitation::UseRejection::NotFound,
                invitation: None,
            },
            Some(invitation) => {
                let affiliate = state.organizations.get(&attempt.affiliate_org_id);

                match check_use(&invitation, affiliate, now) {
                    Err(rejection) => UseOutcome::Rejected {
                        rejection,
                        invitation: Some(invitation),
                    },
                    Ok(()) => match state
                        .association_by_pair(invitation.advertiser_org_id, attempt.affiliate_org_id)
                        .cloned()
                    {
                        Some(association) => UseOutcome::Existing {
                            association,
                            invitation,
                        },
                        None => {
                            let request = invitation
                                .association_request(attempt.affiliate_org_id, attempt.message.clone());
                            let association = state.insert_association(
                                request,
                                CreationPath::Request,
                                Some(attempt.used_by),
                                now,
                            )?;

                            let invitation = match state.invitations.get_mut(&invitation.id) {
                                Some(stored) => {
                                    stored.current_uses += 1;
                                    stored.updated_at = now;
                                    stored.clone()
                                }
                                None => return Err(RepositoryError::NotFound("Invitation").into()),
                            };

                            UseOutcome::Created {
                                association,
                                invitation,
                            }
                        }
                    },
                }
            }
        };

        state.append_usage_log(usage_log_entry(attempt, &outcome, now));

        Ok(outcome)
    }

    async fn log_invitation_use(&self, entry: NewUsageLogEntry) -> Result<UsageLogEntry, Error> {
        Ok(self.write()?.append_usage_log(entry))
    }

    async fn invitation_usage(&self, id: InvitationId) -> Result<Vec<UsageLogEntry>, Error> {
        let mut entries: Vec<_> = self
            .read()?
            .usage_log
            .iter()
            .filter(|entry| entry.invitation_id == Some(id))
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.used_at.cmp(&a.used_at).then(b.usage_id.cmp(&a.usage_id)));

        Ok(entries)
    }

    async fn expire_invitations(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        let mut state = self.write()?;
        let mut expired = 0;

        for invitation in state.invitations.values_mut().filter(|invitation| {
            invitation.status == InvitationStatus::Active
                && invitation.expires_at.map_or(false, |expires_at| expires_at < now)
        }) {
            invitation.status = InvitationStatus::Expired;
            invitation.updated_at = now;
            expired += 1;
        }

        Ok(expired)
    }
}

#[async_trait]
impl DelegationStore for MemoryStore {
    async fn create_delegation(
        &self,
        new: NewDelegation,
        delegated_by: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Delegation, Error> {
        let mut state = self.write()?;
        if state.delegations.values().any(|delegation| {
            delegation.agency_org_id == new.agency_org_id
                && delegation.advertiser_org_id == new.advertiser_org_id
        }) {
            return Err(RepositoryError::AlreadyExists("Delegation").into());
        }

        let id = DelegationId(state.sequences.delegation.next());
        let delegation = new.into_pending(id, delegated_by, now);
        state.delegations.insert(id, delegation.clone());

        Ok(delegation)
    }

    async fn delegation(&self, id: DelegationId) -> Result<Option<Delegation>, Error> {
        Ok(self.read()?.delegations.get(&id).cloned())
    }

    async fn delegation_by_pair(
        &self,
        agency: OrganizationId,
        advertiser: OrganizationId,
    ) -> Result<Option<Delegation>, Error> {
        Ok(self
            .read()?
            .delegations
            .values()
            .find(|delegation| {
                delegation.agency_org_id == agency && delegation.advertiser_org_id == advertiser
            })
            .cloned())
    }

    async fn delegations(&self, filter: DelegationFilter) -> Result<Vec<Delegation>, Error> {
        Ok(self
            .read()?
            .delegations
            .values()
            .filter(|delegation| filter.matches(delegation))
            .cloned()
            .collect())
    }

    async fn update_delegation(
        &self,
        id: DelegationId,
        mutation: Mutation<'_, Delegation>,
    ) -> Result<Delegation, Error> {
        mutate(&mut self.write()?.delegations, &id, "Delegation", mutation)
    }

    async fn expire_delegations(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        let mut state = self.write()?;
        let mut expired = 0;

        for delegation in state.delegations.values_mut().filter(|delegation| {
            matches!(
                delegation.status,
                DelegationStatus::Active | DelegationStatus::Suspended
            ) && delegation.is_expired(now)
        }) {
            delegation.status = DelegationStatus::Revoked;
            delegation.updated_at = now;
            expired += 1;
        }

        Ok(expired)
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn billing_account(
        &self,
        organization: OrganizationId,
    ) -> Result<Option<BillingAccount>, Error> {
        Ok(self.read()?.accounts.get(&organization).cloned())
    }

    async fn billing_accounts(&self) -> Result<Vec<BillingAccount>, Error> {
        Ok(self.read()?.accounts.values().cloned().collect())
    }

    async fn create_billing_account(
        &self,
        mut account: BillingAccount,
    ) -> Result<BillingAccount, Error> {
        let mut state = self.write()?;
        if let Some(existing) = state.accounts.get(&account.organization_id) {
            return Ok(existing.clone());
        }

        account.id = BillingAccountId(state.sequences.billing_account.next());
        state.accounts.insert(account.organization_id, account.clone());

        Ok(account)
    }

    async fn update_billing_account(
        &self,
        organization: OrganizationId,
        mutation: Mutation<'_, BillingAccount>,
    ) -> Result<BillingAccount, Error> {
        mutate(
            &mut self.write()?.accounts,
            &organization,
            "Billing account",
            mutation,
        )
    }

    async fn record_transaction(
        &self,
        organization: OrganizationId,
        plan: Plan<'_>,
        now: DateTime<Utc>,
    ) -> Result<(BillingAccount, Transaction), Error> {
        let mut state = self.write()?;

        let mut account = state.account_mut(organization)?.clone();
        let new = plan(&mut account)?;

        if let Some(invoice) = &new.invoice_ref {
            if state
                .transactions
                .values()
                .any(|tx| tx.invoice_ref.as_ref() == Some(invoice))
            {
                return Err(RepositoryError::AlreadyExists("Transaction").into());
            }
        }

        let id = TransactionId(state.sequences.transaction.next());
        let transaction = new.into_transaction(id, &mut account, now);

        state.transactions.insert(id, transaction.clone());
        *state.account_mut(organization)? = account.clone();

        Ok((account, transaction))
    }

    async fn settle_transaction(
        &self,
        id: TransactionId,
        settlement: Settlement<'_>,
    ) -> Result<(BillingAccount, Transaction), Error> {
        let mut state = self.write()?;

        let mut transaction = state
            .transactions
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::NotFound("Transaction"))?;
        let mut account = state.account_mut(transaction.organization_id)?.clone();

        settlement(&mut transaction, &mut account)?;

        state.transactions.insert(id, transaction.clone());
        *state.account_mut(account.organization_id)? = account.clone();

        Ok((account, transaction))
    }

    async fn transaction_by_payment_intent(
        &self,
        payment_intent: &str,
    ) -> Result<Option<Transaction>, Error> {
        Ok(self
            .read()?
            .transactions
            .values()
            .find(|tx| tx.payment_intent_ref.as_deref() == Some(payment_intent))
            .cloned())
    }

    async fn transaction_by_invoice(&self, invoice: &str) -> Result<Option<Transaction>, Error> {
        Ok(self
            .read()?
            .transactions
            .values()
            .find(|tx| tx.invoice_ref.as_deref() == Some(invoice))
            .cloned())
    }

    async fn transaction_by_reference(
        &self,
        reference_type: &str,
        reference_id: &str,
    ) -> Result<Option<Transaction>, Error> {
        Ok(self
            .read()?
            .transactions
            .values()
            .find(|tx| {
                tx.reference_type.as_deref() == Some(reference_type)
                    && tx.reference_id.as_deref() == Some(reference_id)
            })
            .cloned())
    }

    async fn transactions(
        &self,
        organization: OrganizationId,
        filter: &TransactionFilter,
        pagination: Pagination,
    ) -> Result<Vec<Transaction>, Error> {
        let mut transactions: Vec<_> = self
            .read()?
            .transactions
            .values()
            .filter(|tx| tx.organization_id == organization && filter.matches(tx))
            .cloned()
            .collect();
        transactions.sort_by(|a, b| (b.processed_at, b.id).cmp(&(a.processed_at, a.id)));

        Ok(pagination.paginate(transactions))
    }

    async fn add_payment_method(
        &self,
        organization: OrganizationId,
        new: NewPaymentMethod,
        now: DateTime<Utc>,
    ) -> Result<PaymentMethod, Error> {
        let mut state = self.write()?;
        let account = state.account_mut(organization)?.clone();

        let id = PaymentMethodId(state.sequences.payment_method.next());
        let method = new.into_payment_method(id, &account, now);
        state.payment_methods.insert(id, method.clone());

        if method.is_default {
            state.make_default(id, organization, now);
        }

        Ok(method)
    }

    async fn payment_methods(
        &self,
        organization: OrganizationId,
    ) -> Result<Vec<PaymentMethod>, Error> {
        Ok(self
            .read()?
            .payment_methods
            .values()
            .filter(|method| method.organization_id == organization && method.is_active)
            .cloned()
            .collect())
    }

    async fn payment_method(&self, id: PaymentMethodId) -> Result<Option<PaymentMethod>, Error> {
        Ok(self.read()?.payment_methods.get(&id).cloned())
    }

    async fn remove_payment_method(
        &self,
        id: PaymentMethodId,
        now: DateTime<Utc>,
    ) -> Result<PaymentMethod, Error> {
        let mut state = self.write()?;
        let method = state
            .payment_methods
            .get_mut(&id)
            .filter(|method| method.is_active)
            .ok_or(RepositoryError::NotFound("Payment method"))?;

        method.is_active = false;
        method.is_default = false;
        method.updated_at = now;
        let method = method.clone();

        if let Some(account) = state.accounts.get_mut(&method.organization_id) {
            if account.default_payment_method_id == Some(id) {
                account.default_payment_method_id = None;
                account.updated_at = now;
            }
        }

        Ok(method)
    }

    async fn set_default_payment_method(
        &self,
        id: PaymentMethodId,
        now: DateTime<Utc>,
    ) -> Result<PaymentMethod, Error> {
        let mut state = self.write()?;
        let organization = state
            .payment_methods
            .get(&id)
            .filter(|method| method.is_active)
            .map(|method| method.organization_id)
            .ok_or(RepositoryError::NotFound("Payment method"))?;

        state.make_default(id, organization, now);

        state
            .payment_methods
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound("Payment method").into())
    }

    async fn webhook_event(&self, external_id: &str) -> Result<Option<WebhookEvent>, Error> {
        Ok(self.read()?.webhook_events.get(external_id).cloned())
    }

    async fn insert_webhook_event(
        &self,
        external_id: &str,
        event_type: &str,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<WebhookEvent, Error> {
        let mut state = self.write()?;
        if state.webhook_events.contains_key(external_id) {
            return Err(RepositoryError::AlreadyExists("Webhook event").into());
        }

        let event = WebhookEvent {
            id: WebhookEventId(state.sequences.webhook_event.next()),
            external_event_id: external_id.to_owned(),
            event_type: event_type.to_owned(),
            status: WebhookEventStatus::Pending,
            payload,
            organization_id: None,
            transaction_id: None,
            error_message: None,
            retry_count: 0,
            processed_at: None,
            created_at: now,
        };
        state
            .webhook_events
            .insert(external_id.to_owned(), event.clone());

        Ok(event)
    }

    async fn save_webhook_event(&self, event: &WebhookEvent) -> Result<(), Error> {
        self.write()?
            .webhook_events
            .insert(event.external_event_id.clone(), event.clone());

        Ok(())
    }
}

#[async_trait]
impl UsageStore for MemoryStore {
    async fn usage_record(
        &self,
        organization: OrganizationId,
        date: NaiveDate,
    ) -> Result<Option<UsageRecord>, Error> {
        Ok(self
            .read()?
            .usage_records
            .values()
            .find(|record| record.organization_id == organization && record.usage_date == date)
            .cloned())
    }

    async fn usage_record_by_id(&self, id: UsageRecordId) -> Result<Option<UsageRecord>, Error> {
        Ok(self.read()?.usage_records.get(&id).cloned())
    }

    async fn save_calculated_usage(
        &self,
        usage: CalculatedUsage,
        now: DateTime<Utc>,
    ) -> Result<Option<UsageRecord>, Error> {
        let mut guard = self.write()?;
        let state = &mut *guard;

        let existing = state.usage_records.values_mut().find(|record| {
            record.organization_id == usage.organization_id && record.usage_date == usage.usage_date
        });

        match existing {
            Some(record) if record.status.is_settled() => Ok(None),
            Some(record) => {
                usage.recalculate(record, now)?;
                Ok(Some(record.clone()))
            }
            None => {
                let id = UsageRecordId(state.sequences.usage_record.next());
                let record = usage.into_record(id, now);
                state.usage_records.insert(id, record.clone());
                Ok(Some(record))
            }
        }
    }

    async fn update_usage_record(
        &self,
        id: UsageRecordId,
        mutation: Mutation<'_, UsageRecord>,
    ) -> Result<UsageRecord, Error> {
        mutate(&mut self.write()?.usage_records, &id, "Usage record", mutation)
    }

    async fn usage_records(
        &self,
        organization: OrganizationId,
        pagination: Pagination,
    ) -> Result<Vec<UsageRecord>, Error> {
        let mut records: Vec<_> = self
            .read()?
            .usage_records
            .values()
            .filter(|record| record.organization_id == organization)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.usage_date.cmp(&a.usage_date));

        Ok(pagination.paginate(records))
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use primitives::{
        invitation::UseRejection,
        test_util::{dummy_billing_account, dummy_invitation, dummy_organization},
        AssociationStatus, Money, OrganizationKind, TransactionKind, TransactionStatus,
    };

    use super::*;
    use primitives::billing::NewTransaction;

    fn attempt(token: &InvitationToken, affiliate: i64) -> UseAttempt {
        UseAttempt {
            token: token.clone(),
            affiliate_org_id: OrganizationId(affiliate),
            used_by: Uuid::new_v4(),
            message: None,
            ip_address: Some("120.0.0.1".into()),
            user_agent: None,
        }
    }

    #[tokio::test]
    async fn failed_mutations_are_not_stored() {
        let store = MemoryStore::new();
        let organization = store
            .create_organization(
                NewOrganization {
                    name: "Acme".into(),
                    kind: OrganizationKind::Advertiser,
                    description: None,
                },
                Utc::now(),
            )
            .await
            .expect("Should create");

        let result = store
            .update_organization(
                organization.id,
                Box::new(|organization| {
                    organization.name = "Changed".into();
                    Err(Error::InvalidInput("refused".into()))
                }),
            )
            .await;
        assert!(result.is_err());

        let stored = store
            .organization(organization.id)
            .await
            .expect("Should read")
            .expect("Should exist");
        assert_eq!("Acme", stored.name);
    }

    #[tokio::test]
    async fn second_association_for_a_pair_conflicts() {
        let store = MemoryStore::new();
        let new = NewAssociation {
            advertiser_org_id: OrganizationId(1),
            affiliate_org_id: OrganizationId(2),
            visible_affiliate_ids: None,
            visible_campaign_ids: None,
            all_affiliates_visible: None,
            all_campaigns_visible: None,
            message: None,
        };

        let created = store
            .create_association(new.clone(), CreationPath::Invitation, None, Utc::now())
            .await
            .expect("Should create");
        assert_eq!(AssociationStatus::Pending, created.status);

        let second = store
            .create_association(new, CreationPath::Request, None, Utc::now())
            .await
            .expect_err("Should conflict");
        assert_eq!("conflict", second.kind());
    }

    #[tokio::test]
    async fn use_invitation_logs_every_attempt() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .insert_organization(dummy_organization(OrganizationId(1), OrganizationKind::Advertiser))
            .expect("Should insert");
        store
            .insert_organization(dummy_organization(OrganizationId(2), OrganizationKind::Affiliate))
            .expect("Should insert");
        store
            .insert_organization(dummy_organization(OrganizationId(3), OrganizationKind::Agency))
            .expect("Should insert");
        let invitation = dummy_invitation(OrganizationId(1));
        store
            .insert_invitation(invitation.clone())
            .expect("Should insert");

        let unknown = store
            .use_invitation(&attempt(&InvitationToken::generate(), 2), now)
            .await
            .expect("Should decide");
        assert!(matches!(
            unknown,
            UseOutcome::Rejected {
                rejection: UseRejection::NotFound,
                invitation: None
            }
        ));

        let not_affiliate = store
            .use_invitation(&attempt(&invitation.token, 3), now)
            .await
            .expect("Should decide");
        assert!(matches!(
            not_affiliate,
            UseOutcome::Rejected {
                rejection: UseRejection::NotAffiliateOrganization,
                ..
            }
        ));

        let created = store
            .use_invitation(&attempt(&invitation.token, 2), now)
            .await
            .expect("Should decide");
        let association = match created {
            UseOutcome::Created {
                association,
                invitation,
            } => {
                assert_eq!(1, invitation.current_uses);
                association
            }
            outcome => panic!("Expected a new association, got {outcome:?}"),
        };
        assert_eq!(CreationPath::Request, association.creation_path);

        let existing = store
            .use_invitation(&attempt(&invitation.token, 2), now)
            .await
            .expect("Should decide");
        assert!(matches!(existing, UseOutcome::Existing { .. }));

        let usage = store
            .invitation_usage(invitation.id)
            .await
            .expect("Should list the usage");
        // the unknown token is not linked to the invitation
        assert_eq!(3, usage.len());
        assert_eq!(1, usage.iter().filter(|entry| entry.success).count());
        assert_eq!(
            Some("Association already exists".to_string()),
            usage[0].error_message
        );
    }

    #[tokio::test]
    async fn recorded_transactions_move_the_balance() {
        let store = MemoryStore::new();
        let organization = OrganizationId(5);
        store
            .insert_billing_account(dummy_billing_account(organization))
            .expect("Should insert");

        let (account, recharge) = store
            .record_transaction(
                organization,
                Box::new(|_| {
                    Ok(NewTransaction::new(
                        TransactionKind::Recharge,
                        Money::new(20, 0),
                        TransactionStatus::Completed,
                    ))
                }),
                Utc::now(),
            )
            .await
            .expect("Should record");

        assert_eq!(Money::new(20, 0), account.balance);
        assert!(recharge.is_balanced());

        let refused = store
            .record_transaction(
                organization,
                Box::new(|account| {
                    account.check_debit(Money::new(25, 0))?;
                    unreachable!("The debit should be refused")
                }),
                Utc::now(),
            )
            .await
            .expect_err("Should refuse");
        assert_eq!("insufficient_funds", refused.kind());

        let transactions = store
            .transactions(organization, &TransactionFilter::default(), Pagination::default())
            .await
            .expect("Should list");
        assert_eq!(vec![recharge], transactions);
    }

    #[tokio::test]
    async fn an_invoice_is_recorded_once() {
        let store = MemoryStore::new();
        let organization = OrganizationId(5);
        store
            .insert_billing_account(dummy_billing_account(organization))
            .expect("Should insert");
        let payment = || -> Plan<'static> {
            Box::new(|_| {
                let mut new = NewTransaction::new(
                    TransactionKind::InvoicePayment,
                    Money::new(30, 0),
                    TransactionStatus::Completed,
                );
                new.invoice_ref = Some("in_1".into());
                Ok(new)
            })
        };

        let (_, recorded) = store
            .record_transaction(organization, payment(), Utc::now())
            .await
            .expect("Should record");

        let duplicate = store
            .record_transaction(organization, payment(), Utc::now())
            .await
            .expect_err("Should refuse the same invoice");
        assert_eq!("conflict", duplicate.kind());

        let account = store
            .billing_account(organization)
            .await
            .expect("Should load")
            .expect("Should exist");
        assert_eq!(Money::new(30, 0), account.balance);
        assert_eq!(
            Some(recorded),
            store
                .transaction_by_invoice("in_1")
                .await
                .expect("Should load")
        );
    }
}
