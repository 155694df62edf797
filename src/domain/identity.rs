//! Durable registration record written once ownership is verified.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::IntentId;

/// One registered domain. Keyed by `domain_name`; resyncs upsert in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// `label.tld`, globally unique.
    pub domain_name: String,
    /// Label part.
    pub label: String,
    /// Application user the name was bought for.
    pub user_id: String,
    /// Verified on-chain owner.
    pub owner_address: String,
    /// On-chain expiry of the name.
    pub expires_at: DateTime<Utc>,
    /// Intent that produced the registration.
    pub intent_id: IntentId,
    /// Whether this is the user's primary name.
    pub is_primary: bool,
    /// First write.
    pub created_at: DateTime<Utc>,
    /// Last resync.
    pub updated_at: DateTime<Utc>,
}

/// On-chain facts gathered before confirming a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipCheck {
    /// `nameExpires(labelhash)`; `None` when the name was never registered.
    pub expires_at: Option<DateTime<Utc>>,
    /// `ownerOf(labelhash)`, lower-case; `None` when unowned or expired.
    pub owner: Option<String>,
}

/// Result of comparing an [`OwnershipCheck`] with the intent's wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnershipVerdict {
    /// Live and owned by the intent wallet.
    Verified {
        /// On-chain expiry.
        expires_at: DateTime<Utc>,
    },
    /// Not registered yet, or the registration already lapsed.
    NotLive,
    /// Live but owned by another address.
    OwnerMismatch {
        /// The address that actually owns the name.
        actual_owner: String,
    },
}

impl OwnershipCheck {
    /// Checks expiry first, then owner.
    #[must_use]
    pub fn verdict(&self, wallet: &str, now: DateTime<Utc>) -> OwnershipVerdict {
        let Some(expires_at) = self.expires_at.filter(|exp| *exp > now) else {
            return OwnershipVerdict::NotLive;
        };
        match &self.owner {
            Some(owner) if owner.eq_ignore_ascii_case(wallet) => {
                OwnershipVerdict::Verified { expires_at }
            }
            Some(owner) => OwnershipVerdict::OwnerMismatch {
                actual_owner: owner.clone(),
            },
            None => OwnershipVerdict::NotLive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const WALLET: &str = "0x00000000000000000000000000000000000000aa";

    #[test]
    fn expired_name_is_never_verified_even_with_matching_owner() {
        let now = Utc::now();
        let check = OwnershipCheck {
            expires_at: Some(now - Duration::days(1)),
            owner: Some(WALLET.to_string()),
        };
        assert_eq!(check.verdict(WALLET, now), OwnershipVerdict::NotLive);
    }

    #[test]
    fn foreign_owner_is_a_mismatch() {
        let now = Utc::now();
        let check = OwnershipCheck {
            expires_at: Some(now + Duration::days(365)),
            owner: Some("0x00000000000000000000000000000000000000bb".to_string()),
        };
        assert!(matches!(
            check.verdict(WALLET, now),
            OwnershipVerdict::OwnerMismatch { .. }
        ));
    }

    #[test]
    fn live_and_owned_is_verified() {
        let now = Utc::now();
        let expires_at = now + Duration::days(365);
        let check = OwnershipCheck {
            expires_at: Some(expires_at),
            owner: Some(WALLET.to_uppercase().replace("0X", "0x")),
        };
        assert_eq!(
            check.verdict(WALLET, now),
            OwnershipVerdict::Verified { expires_at }
        );
    }
}
