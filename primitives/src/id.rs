//! Numeric identifiers of the stored entities.
//!
//! Every id is a `BIGSERIAL` in the database and a plain number in JSON.
//! Distinct types keep an [`OrganizationId`] from being passed where a
//! [`CampaignId`] is expected.

use parse_display::{Display, FromStr};
use serde::{Deserialize, Serialize};

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            Serialize,
            Deserialize,
            Display,
            FromStr,
        )]
        #[serde(transparent)]
        #[display("{0}")]
        #[cfg_attr(
            feature = "postgres",
            derive(postgres_types::ToSql, postgres_types::FromSql),
            postgres(transparent)
        )]
        pub struct $name(pub i64);

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl $name {
            pub fn as_i64(&self) -> i64 {
                self.0
            }
        }
    };
}

entity_id!(OrganizationId);
entity_id!(CampaignId);
entity_id!(AffiliateId);
entity_id!(AssociationId);
entity_id!(InvitationId);
entity_id!(DelegationId);
entity_id!(BillingAccountId);
entity_id!(PaymentMethodId);
entity_id!(
    /// Ordered by insertion, which together with `processed_at` gives the
    /// total order of the transactions of a single account.
    TransactionId
);
entity_id!(UsageRecordId);
entity_id!(WebhookEventId);

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn ids_are_plain_json_numbers() {
        let id: OrganizationId = serde_json::from_value(json!(101)).expect("Should deserialize");

        assert_eq!(OrganizationId(101), id);
        assert_eq!(json!(101), serde_json::to_value(id).expect("Should serialize"));
        assert_eq!("101", id.to_string());
        assert_eq!(Ok(CampaignId(7)), "7".parse::<CampaignId>().map_err(|_| ()));
    }
}
