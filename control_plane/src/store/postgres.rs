//! The production [`Store`](super::Store).
//!
//! Every mutation reads the record with `SELECT ... FOR UPDATE` inside a
//! transaction, so concurrent mutations of one record are applied one after
//! the other and always see the latest committed version.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use deadpool_postgres::Client;
use tokio_postgres::error::SqlState;
use uuid::Uuid;

use primitives::{
    affiliate::NewAffiliate,
    api::Pagination,
    association::{CreationPath, NewAssociation},
    billing::NewPaymentMethod,
    campaign::NewCampaign,
    delegation::NewDelegation,
    invitation::{NewInvitation, NewUsageLogEntry, UsageLogEntry, UseAttempt, UseOutcome, UseRejection},
    organization::NewOrganization,
    profile::UpsertProfile,
    usage::CalculatedUsage,
    Affiliate, AffiliateId, Association, AssociationId, BillingAccount, Campaign, CampaignId,
    Delegation, DelegationId, Invitation, InvitationId, InvitationToken, Organization,
    OrganizationId, PaymentMethod, PaymentMethodId, Profile, Transaction, TransactionId,
    UsageRecord, UsageRecordId, WebhookEvent,
};

use super::{
    check_use, usage_log_entry, AssociationFilter, AssociationStore, CatalogStore,
    DelegationFilter, DelegationStore, IdentityStore, InvitationStore, LedgerStore, Mutation,
    Plan, RepositoryError, Settlement, TransactionFilter, UsageStore,
};
use crate::{
    db::{self, DbPool, PoolError},
    error::Error,
};

/// Reads a record for update, applies the mutation and writes it back in a
/// single transaction.
macro_rules! mutate_row {
    ($store:expr, $fetch:path, $update:path, $id:expr, $what:literal, $mutation:expr) => {{
        let mut client = $store.client().await?;
        let transaction = client.transaction().await?;

        let mut record = $fetch(&transaction, $id, true)
            .await?
            .ok_or(RepositoryError::NotFound($what))?;
        ($mutation)(&mut record)?;
        $update(&transaction, &record).await?;

        transaction.commit().await?;

        Ok(record)
    }};
}

fn is_unique_violation(error: &PoolError) -> bool {
    match error {
        PoolError::Backend(error) => error.code() == Some(&SqlState::UNIQUE_VIOLATION),
        _ => false,
    }
}

#[derive(Clone)]
pub struct PostgresStore {
    pool: DbPool,
}

impl PostgresStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn client(&self) -> Result<Client, PoolError> {
        self.pool.get().await
    }
}

#[async_trait]
impl IdentityStore for PostgresStore {
    async fn create_organization(
        &self,
        new: NewOrganization,
        now: DateTime<Utc>,
    ) -> Result<Organization, Error> {
        let client = self.client().await?;

        match db::insert_organization(&client, &new, now).await {
            Ok(organization) => Ok(organization),
            Err(error) if is_unique_violation(&error) => {
                Err(RepositoryError::AlreadyExists("Platform owner organization").into())
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn organization(&self, id: OrganizationId) -> Result<Option<Organization>, Error> {
        let client = self.client().await?;

        Ok(db::fetch_organization(&client, id, false).await?)
    }

    async fn organizations(&self, pagination: Pagination) -> Result<Vec<Organization>, Error> {
        let client = self.client().await?;

        Ok(db::list_organizations(
            &client,
            pagination.limit() as i64,
            pagination.offset() as i64,
        )
        .await?)
    }

    async fn update_organization(
        &self,
        id: OrganizationId,
        mutation: Mutation<'_, Organization>,
    ) -> Result<Organization, Error> {
        mutate_row!(
            self,
            db::fetch_organization,
            db::update_organization,
            id,
            "Organization",
            mutation
        )
    }

    async fn delete_organization(&self, id: OrganizationId) -> Result<(), Error> {
        let client = self.client().await?;

        if db::delete_organization(&client, id).await? {
            Ok(())
        } else {
            Err(RepositoryError::NotFound("Organization").into())
        }
    }

    async fn profile(&self, id: Uuid) -> Result<Option<Profile>, Error> {
        let client = self.client().await?;

        Ok(db::fetch_profile(&client, id, false).await?)
    }

    async fn create_profile(&self, profile: Profile) -> Result<Profile, Error> {
        let client = self.client().await?;

        if db::insert_profile(&client, &profile).await? {
            Ok(profile)
        } else {
            Err(RepositoryError::AlreadyExists("Profile").into())
        }
    }

    async fn upsert_profile(
        &self,
        upsert: UpsertProfile,
        now: DateTime<Utc>,
    ) -> Result<Profile, Error> {
        let mut client = self.client().await?;
        let transaction = client.transaction().await?;

        let profile = match db::fetch_profile(&transaction, upsert.id, true).await? {
            Some(mut profile) => {
                if upsert.merge_into(&mut profile, now) {
                    db::update_profile(&transaction, &profile).await?;
                }
                profile
            }
            None => {
                let profile = upsert.clone().into_new(now);
                if db::insert_profile(&transaction, &profile).await? {
                    profile
                } else {
                    // created concurrently, merge into the winner
                    let mut profile = db::fetch_profile(&transaction, upsert.id, true)
                        .await?
                        .ok_or(RepositoryError::NotFound("Profile"))?;
                    if upsert.merge_into(&mut profile, now) {
                        db::update_profile(&transaction, &profile).await?;
                    }
                    profile
                }
            }
        };

        transaction.commit().await?;

        Ok(profile)
    }

    async fn update_profile(
        &self,
        id: Uuid,
        mutation: Mutation<'_, Profile>,
    ) -> Result<Profile, Error> {
        mutate_row!(
            self,
            db::fetch_profile,
            db::update_profile,
            id,
            "Profile",
            mutation
        )
    }

    async fn delete_profile(&self, id: Uuid) -> Result<(), Error> {
        let client = self.client().await?;

        if db::delete_profile(&client, id).await? {
            Ok(())
        } else {
            Err(RepositoryError::NotFound("Profile").into())
        }
    }
}

#[async_trait]
impl CatalogStore for PostgresStore {
    async fn create_campaign(
        &self,
        new: NewCampaign,
        now: DateTime<Utc>,
    ) -> Result<Campaign, Error> {
        let client = self.client().await?;

        Ok(db::insert_campaign(&client, new, now).await?)
    }

    async fn campaign(&self, id: CampaignId) -> Result<Option<Campaign>, Error> {
        let client = self.client().await?;

        Ok(db::fetch_campaign(&client, id, false).await?)
    }

    async fn campaigns(
        &self,
        organization: Option<OrganizationId>,
    ) -> Result<Vec<Campaign>, Error> {
        let client = self.client().await?;

        Ok(db::list_campaigns(&client, organization).await?)
    }

    async fn update_campaign(
        &self,
        id: CampaignId,
        mutation: Mutation<'_, Campaign>,
    ) -> Result<Campaign, Error> {
        mutate_row!(
            self,
            db::fetch_campaign,
            db::update_campaign,
            id,
            "Campaign",
            mutation
        )
    }

    async fn delete_campaign(&self, id: CampaignId) -> Result<(), Error> {
        let client = self.client().await?;

        if db::delete_campaign(&client, id).await? {
            Ok(())
        } else {
            Err(RepositoryError::NotFound("Campaign").into())
        }
    }

    async fn create_affiliate(
        &self,
        new: NewAffiliate,
        now: DateTime<Utc>,
    ) -> Result<Affiliate, Error> {
        let client = self.client().await?;

        Ok(db::insert_affiliate(&client, new, now).await?)
    }

    async fn affiliate(&self, id: AffiliateId) -> Result<Option<Affiliate>, Error> {
        let client = self.client().await?;

        Ok(db::fetch_affiliate(&client, id, false).await?)
    }

    async fn affiliates(
        &self,
        organization: Option<OrganizationId>,
    ) -> Result<Vec<Affiliate>, Error> {
        let client = self.client().await?;

        Ok(db::list_affiliates(&client, organization).await?)
    }

    async fn update_affiliate(
        &self,
        id: AffiliateId,
        mutation: Mutation<'_, Affiliate>,
    ) -> Result<Affiliate, Error> {
        mutate_row!(
            self,
            db::fetch_affiliate,
            db::update_affiliate,
            id,
            "Affiliate",
            mutation
        )
    }

    async fn delete_affiliate(&self, id: AffiliateId) -> Result<(), Error> {
        let client = self.client().await?;

        if db::delete_affiliate(&client, id).await? {
            Ok(())
        } else {
            Err(RepositoryError::NotFound("Affiliate").into())
        }
    }
}

#[async_trait]
impl AssociationStore for PostgresStore {
    async fn create_association(
        &self,
        new: NewAssociation,
        path: CreationPath,
        requested_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Association, Error> {
        let client = self.client().await?;
        let pending = new.into_pending(AssociationId(0), path, requested_by, now);

        db::insert_association(&client, &pending)
            .await?
            .ok_or_else(|| RepositoryError::AlreadyExists("Association").into())
    }

    async fn association(&self, id: AssociationId) -> Result<Option<Association>, Error> {
        let client = self.client().await?;

        Ok(db::fetch_association(&client, id, false).await?)
    }

    async fn association_by_pair(
        &self,
        advertiser: OrganizationId,
        affiliate: OrganizationId,
    ) -> Result<Option<Association>, Error> {
        let client = self.client().await?;

        Ok(db::fetch_association_by_pair(&client, advertiser, affiliate).await?)
    }

    async fn associations(&self, filter: AssociationFilter) -> Result<Vec<Association>, Error> {
        let client = self.client().await?;

        Ok(db::list_associations(&client, &filter).await?)
    }

    async fn update_association(
        &self,
        id: AssociationId,
        mutation: Mutation<'_, Association>,
    ) -> Result<Association, Error> {
        mutate_row!(
            self,
            db::fetch_association,
            db::update_association,
            id,
            "Association",
            mutation
        )
    }
}

#[async_trait]
impl InvitationStore for PostgresStore {
    async fn create_invitation(
        &self,
        new: NewInvitation,
        token: InvitationToken,
        created_by: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Invitation, Error> {
        let client = self.client().await?;
        let invitation = new.into_invitation(InvitationId(0), token, created_by, now);

        db::insert_invitation(&client, &invitation)
            .await?
            .ok_or_else(|| RepositoryError::AlreadyExists("Invitation token").into())
    }

    async fn invitation(&self, id: InvitationId) -> Result<Option<Invitation>, Error> {
        let client = self.client().await?;

        Ok(db::fetch_invitation(&client, id, false).await?)
    }

    async fn invitation_by_token(
        &self,
        token: &InvitationToken,
    ) -> Result<Option<Invitation>, Error> {
        let client = self.client().await?;

        Ok(db::fetch_invitation_by_token(&client, token, false).await?)
    }

    async fn invitations(
        &self,
        advertiser: Option<OrganizationId>,
    ) -> Result<Vec<Invitation>, Error> {
        let client = self.client().await?;

        Ok(db::list_invitations(&client, advertiser).await?)
    }

    async fn update_invitation(
        &self,
        id: InvitationId,
        mutation: Mutation<'_, Invitation>,
    ) -> Result<Invitation, Error> {
        mutate_row!(
            self,
            db::fetch_invitation,
            db::update_invitation,
            id,
            "Invitation",
            mutation
        )
    }

    async fn delete_invitation(&self, id: InvitationId) -> Result<(), Error> {
        let client = self.client().await?;

        if db::delete_invitation(&client, id).await? {
            Ok(())
        } else {
            Err(RepositoryError::NotFound("Invitation").into())
        }
    }

    async fn use_invitation(
        &self,
        attempt: &UseAttempt,
        now: DateTime<Utc>,
    ) -> Result<UseOutcome, Error> {
        let mut client = self.client().await?;
        let transaction = client.transaction().await?;

        // the row lock serializes every use of this invitation
        let invitation = db::fetch_invitation_by_token(&transaction, &attempt.token, true).await?;

        let outcome = match invitation {
            None => UseOutcome::Rejected {
                rejection: UseRejection::NotFound,
                invitation: None,
            },
            Some(mut invitation) => {
                let affiliate =
                    db::fetch_organization(&transaction, attempt.affiliate_org_id, false).await?;

                match check_use(&invitation, affiliate.as_ref(), now) {
                    Err(rejection) => UseOutcome::Rejected {
                        rejection,
                        invitation: Some(invitation),
                    },
                    Ok(()) => {
                        let existing = db::fetch_association_by_pair(
                            &transaction,
                            invitation.advertiser_org_id,
                            attempt.affiliate_org_id,
                        )
                        .await?;

                        match existing {
                            Some(association) => UseOutcome::Existing {
                                association,
                                invitation,
                            },
                            None => {
                                let pending = invitation
                                    .association_request(
                                        attempt.affiliate_org_id,
                                        attempt.message.clone(),
                                    )
                                    .into_pending(
                                        AssociationId(0),
                                        CreationPath::Request,
                                        Some(attempt.used_by),
                                        now,
                                    );

                                match db::insert_association(&transaction, &pending).await? {
                                    Some(association) => {
                                        invitation.current_uses += 1;
                                        invitation.updated_at = now;
                                        db::update_invitation(&transaction, &invitation).await?;

                                        UseOutcome::Created {
                                            association,
                                            invitation,
                                        }
                                    }
                                    // the pair was associated through another path meanwhile
                                    None => UseOutcome::Existing {
                                        association: db::fetch_association_by_pair(
                                            &transaction,
                                            invitation.advertiser_org_id,
                                            attempt.affiliate_org_id,
                                        )
                                        .await?
                                        .ok_or(RepositoryError::NotFound("Association"))?,
                                        invitation,
                                    },
                                }
                            }
                        }
                    }
                }
            }
        };

        db::insert_usage_log(&transaction, &usage_log_entry(attempt, &outcome, now)).await?;
        transaction.commit().await?;

        Ok(outcome)
    }

    async fn log_invitation_use(&self, entry: NewUsageLogEntry) -> Result<UsageLogEntry, Error> {
        let client = self.client().await?;

        Ok(db::insert_usage_log(&client, &entry).await?)
    }

    async fn invitation_usage(&self, id: InvitationId) -> Result<Vec<UsageLogEntry>, Error> {
        let client = self.client().await?;

        Ok(db::list_usage_log(&client, id).await?)
    }

    async fn expire_invitations(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        let client = self.client().await?;

        Ok(db::expire_invitations(&client, now).await?)
    }
}

#[async_trait]
impl DelegationStore for PostgresStore {
    async fn create_delegation(
        &self,
        new: NewDelegation,
        delegated_by: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Delegation, Error> {
        let client = self.client().await?;
        let pending = new.into_pending(DelegationId(0), delegated_by, now);

        db::insert_delegation(&client, &pending)
            .await?
            .ok_or_else(|| RepositoryError::AlreadyExists("Delegation").into())
    }

    async fn delegation(&self, id: DelegationId) -> Result<Option<Delegation>, Error> {
        let client = self.client().await?;

        Ok(db::fetch_delegation(&client, id, false).await?)
    }

    async fn delegation_by_pair(
        &self,
        agency: OrganizationId,
        advertiser: OrganizationId,
    ) -> Result<Option<Delegation>, Error> {
        let client = self.client().await?;

        Ok(db::fetch_delegation_by_pair(&client, agency, advertiser).await?)
    }

    async fn delegations(&self, filter: DelegationFilter) -> Result<Vec<Delegation>, Error> {
        let client = self.client().await?;

        Ok(db::list_delegations(&client, &filter).await?)
    }

    async fn update_delegation(
        &self,
        id: DelegationId,
        mutation: Mutation<'_, Delegation>,
    ) -> Result<Delegation, Error> {
        mutate_row!(
            self,
            db::fetch_delegation,
            db::update_delegation,
            id,
            "Delegation",
            mutation
        )
    }

    async fn expire_delegations(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        let client = self.client().await?;

        Ok(db::expire_delegations(&client, now).await?)
    }
}

#[async_trait]
impl LedgerStore for PostgresStore {
    async fn billing_account(
        &self,
        organization: OrganizationId,
    ) -> Result<Option<BillingAccount>, Error> {
        let client = self.client().await?;

        Ok(db::fetch_billing_account(&client, organization, false).await?)
    }

    async fn billing_accounts(&self) -> Result<Vec<BillingAccount>, Error> {
        let client = self.client().await?;

        Ok(db::list_billing_accounts(&client).await?)
    }

    async fn create_billing_account(
        &self,
        account: BillingAccount,
    ) -> Result<BillingAccount, Error> {
        let client = self.client().await?;

        Ok(db::insert_billing_account(&client, &account).await?)
    }

    async fn update_billing_account(
        &self,
        organization: OrganizationId,
        mutation: Mutation<'_, BillingAccount>,
    ) -> Result<BillingAccount, Error> {
        mutate_row!(
            self,
            db::fetch_billing_account,
            db::update_billing_account,
            organization,
            "Billing account",
            mutation
        )
    }

    async fn record_transaction(
        &self,
        organization: OrganizationId,
        plan: Plan<'_>,
        now: DateTime<Utc>,
    ) -> Result<(BillingAccount, Transaction), Error> {
        let mut client = self.client().await?;
        let transaction = client.transaction().await?;

        let mut account = db::fetch_billing_account(&transaction, organization, true)
            .await?
            .ok_or(RepositoryError::NotFound("Billing account"))?;

        let new = plan(&mut account)?;
        let entry = new.into_transaction(TransactionId(0), &mut account, now);

        let entry = match db::insert_transaction(&transaction, &entry).await {
            Ok(entry) => entry,
            Err(error) if is_unique_violation(&error) => {
                return Err(RepositoryError::AlreadyExists("Transaction").into())
            }
            Err(error) => return Err(error.into()),
        };
        db::update_billing_account(&transaction, &account).await?;

        transaction.commit().await?;

        Ok((account, entry))
    }

    async fn settle_transaction(
        &self,
        id: TransactionId,
        settlement: Settlement<'_>,
    ) -> Result<(BillingAccount, Transaction), Error> {
        let mut client = self.client().await?;
        let transaction = client.transaction().await?;

        let mut entry = db::fetch_transaction(&transaction, id, true)
            .await?
            .ok_or(RepositoryError::NotFound("Transaction"))?;
        let mut account = db::fetch_billing_account(&transaction, entry.organization_id, true)
            .await?
            .ok_or(RepositoryError::NotFound("Billing account"))?;

        settlement(&mut entry, &mut account)?;

        db::update_transaction(&transaction, &entry).await?;
        db::update_billing_account(&transaction, &account).await?;

        transaction.commit().await?;

        Ok((account, entry))
    }

    async fn transaction_by_payment_intent(
        &self,
        payment_intent: &str,
    ) -> Result<Option<Transaction>, Error> {
        let client = self.client().await?;

        Ok(db::fetch_transaction_by_payment_intent(&client, payment_intent).await?)
    }

    async fn transaction_by_invoice(&self, invoice: &str) -> Result<Option<Transaction>, Error> {
        let client = self.client().await?;

        Ok(db::fetch_transaction_by_invoice(&client, invoice).await?)
    }

    async fn transaction_by_reference(
        &self,
        reference_type: &str,
        reference_id: &str,
    ) -> Result<Option<Transaction>, Error> {
        let client = self.client().await?;

        Ok(db::fetch_transaction_by_reference(&client, reference_type, reference_id).await?)
    }

    async fn transactions(
        &self,
        organization: OrganizationId,
        filter: &TransactionFilter,
        pagination: Pagination,
    ) -> Result<Vec<Transaction>, Error> {
        let client = self.client().await?;

        Ok(db::list_transactions(
            &client,
            organization,
            filter,
            pagination.limit() as i64,
            pagination.offset() as i64,
        )
        .await?)
    }

    async fn add_payment_method(
        &self,
        organization: OrganizationId,
        new: NewPaymentMethod,
        now: DateTime<Utc>,
    ) -> Result<PaymentMethod, Error> {
        let mut client = self.client().await?;
        let transaction = client.transaction().await?;

        let account = db::fetch_billing_account(&transaction, organization, true)
            .await?
            .ok_or(RepositoryError::NotFound("Billing account"))?;

        let method = new.into_payment_method(PaymentMethodId(0), &account, now);
        let method = db::insert_payment_method(&transaction, &method).await?;
        if method.is_default {
            db::set_default_payment_method(&transaction, organization, method.id, now).await?;
        }

        transaction.commit().await?;

        Ok(method)
    }

    async fn payment_methods(
        &self,
        organization: OrganizationId,
    ) -> Result<Vec<PaymentMethod>, Error> {
        let client = self.client().await?;

        Ok(db::list_payment_methods(&client, organization).await?)
    }

    async fn payment_method(&self, id: PaymentMethodId) -> Result<Option<PaymentMethod>, Error> {
        let client = self.client().await?;

        Ok(db::fetch_payment_method(&client, id, false).await?)
    }

    async fn remove_payment_method(
        &self,
        id: PaymentMethodId,
        now: DateTime<Utc>,
    ) -> Result<PaymentMethod, Error> {
        let mut client = self.client().await?;
        let transaction = client.transaction().await?;

        let mut method = db::fetch_payment_method(&transaction, id, true)
            .await?
            .filter(|method| method.is_active)
            .ok_or(RepositoryError::NotFound("Payment method"))?;

        method.is_active = false;
        method.is_default = false;
        method.updated_at = now;
        db::update_payment_method(&transaction, &method).await?;

        if let Some(mut account) =
            db::fetch_billing_account(&transaction, method.organization_id, true).await?
        {
            if account.default_payment_method_id == Some(id) {
                account.default_payment_method_id = None;
                account.updated_at = now;
                db::update_billing_account(&transaction, &account).await?;
            }
        }

        transaction.commit().await?;

        Ok(method)
    }

    async fn set_default_payment_method(
        &self,
        id: PaymentMethodId,
        now: DateTime<Utc>,
    ) -> Result<PaymentMethod, Error> {
        let mut client = self.client().await?;
        let transaction = client.transaction().await?;

        let method = db::fetch_payment_method(&transaction, id, true)
            .await?
            .filter(|method| method.is_active)
            .ok_or(RepositoryError::NotFound("Payment method"))?;

        db::set_default_payment_method(&transaction, method.organization_id, id, now).await?;
        let method = db::fetch_payment_method(&transaction, id, false)
            .await?
            .ok_or(RepositoryError::NotFound("Payment method"))?;

        transaction.commit().await?;

        Ok(method)
    }

    async fn webhook_event(&self, external_id: &str) -> Result<Option<WebhookEvent>, Error> {
        let client = self.client().await?;

        Ok(db::fetch_webhook_event(&client, external_id).await?)
    }

    async fn insert_webhook_event(
        &self,
        external_id: &str,
        event_type: &str,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<WebhookEvent, Error> {
        let client = self.client().await?;

        db::insert_webhook_event(&client, external_id, event_type, &payload, now)
            .await?
            .ok_or_else(|| RepositoryError::AlreadyExists("Webhook event").into())
    }

    async fn save_webhook_event(&self, event: &WebhookEvent) -> Result<(), Error> {
        let client = self.client().await?;

        Ok(db::update_webhook_event(&client, event).await?)
    }
}

#[async_trait]
impl UsageStore for PostgresStore {
    async fn usage_record(
        &self,
        organization: OrganizationId,
        date: NaiveDate,
    ) -> Result<Option<UsageRecord>, Error> {
        let client = self.client().await?;

        Ok(db::fetch_usage_record(&client, organization, date, false).await?)
    }

    async fn usage_record_by_id(&self, id: UsageRecordId) -> Result<Option<UsageRecord>, Error> {
        let client = self.client().await?;

        Ok(db::fetch_usage_record_by_id(&client, id, false).await?)
    }

    async fn save_calculated_usage(
        &self,
        usage: CalculatedUsage,
        now: DateTime<Utc>,
    ) -> Result<Option<UsageRecord>, Error> {
        let mut client = self.client().await?;
        let transaction = client.transaction().await?;

        let existing =
            db::fetch_usage_record(&transaction, usage.organization_id, usage.usage_date, true)
                .await?;

        let record = match existing {
            Some(record) if record.status.is_settled() => None,
            Some(mut record) => {
                usage.recalculate(&mut record, now)?;
                db::update_usage_record(&transaction, &record).await?;
                Some(record)
            }
            None => {
                let record = usage.into_record(UsageRecordId(0), now);
                Some(db::insert_usage_record(&transaction, &record).await?)
            }
        };

        transaction.commit().await?;

        Ok(record)
    }

    async fn update_usage_record(
        &self,
        id: UsageRecordId,
        mutation: Mutation<'_, UsageRecord>,
    ) -> Result<UsageRecord, Error> {
        mutate_row!(
            self,
            db::fetch_usage_record_by_id,
            db::update_usage_record,
            id,
            "Usage record",
            mutation
        )
    }

    async fn usage_records(
        &self,
        organization: OrganizationId,
        pagination: Pagination,
    ) -> Result<Vec<UsageRecord>, Error> {
        let client = self.client().await?;

        Ok(db::list_usage_records(
            &client,
            organization,
            pagination.limit() as i64,
            pagination.offset() as i64,
        )
        .await?)
    }
}
