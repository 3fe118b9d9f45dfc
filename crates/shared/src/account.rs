//! Billing account identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The entity that owns a usage-based subscription
///
/// Serialized as `user:<id>` or `team:<id>`, the same form the billing
/// backend uses for attribution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BillingAccount {
    /// An individual user
    User(String),
    /// An organization (team)
    Organization(String),
}

impl BillingAccount {
    const USER_PREFIX: &'static str = "user";
    const ORGANIZATION_PREFIX: &'static str = "team";

    /// Organization id, if this account belongs to an organization
    pub fn organization_id(&self) -> Option<&str> {
        match self {
            BillingAccount::Organization(id) => Some(id),
            BillingAccount::User(_) => None,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            BillingAccount::User(id) | BillingAccount::Organization(id) => id,
        }
    }
}

impl fmt::Display for BillingAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BillingAccount::User(id) => write!(f, "{}:{}", Self::USER_PREFIX, id),
            BillingAccount::Organization(id) => {
                write!(f, "{}:{}", Self::ORGANIZATION_PREFIX, id)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid billing account '{0}' (expected user:<id> or team:<id>)")]
pub struct ParseBillingAccountError(pub String);

impl FromStr for BillingAccount {
    type Err = ParseBillingAccountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, id) = s
            .split_once(':')
            .ok_or_else(|| ParseBillingAccountError(s.to_string()))?;
        if id.is_empty() {
            return Err(ParseBillingAccountError(s.to_string()));
        }
        match prefix {
            Self::USER_PREFIX => Ok(BillingAccount::User(id.to_string())),
            Self::ORGANIZATION_PREFIX => Ok(BillingAccount::Organization(id.to_string())),
            _ => Err(ParseBillingAccountError(s.to_string())),
        }
    }
}

impl TryFrom<String> for BillingAccount {
    type Error = ParseBillingAccountError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BillingAccount> for String {
    fn from(account: BillingAccount) -> Self {
        account.to_string()
    }
}

/// An organization the current user belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_display_round_trips_through_from_str() {
        let user = BillingAccount::User("u-1".to_string());
        let org = BillingAccount::Organization("org-9".to_string());

        assert_eq!(user.to_string(), "user:u-1");
        assert_eq!(org.to_string(), "team:org-9");
        assert_eq!("team:org-9".parse::<BillingAccount>().unwrap(), org);
    }

    #[test]
    fn test_rejects_unknown_prefix_and_empty_id() {
        assert!("project:abc".parse::<BillingAccount>().is_err());
        assert!("user:".parse::<BillingAccount>().is_err());
        assert!("no-separator".parse::<BillingAccount>().is_err());
    }

    #[test]
    fn test_organization_id_only_for_organizations() {
        let org = BillingAccount::Organization("org-1".to_string());
        assert_eq!(org.organization_id(), Some("org-1"));
        assert_eq!(BillingAccount::User("u".to_string()).organization_id(), None);
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let org = BillingAccount::Organization("org-1".to_string());
        let json = serde_json::to_string(&org).unwrap();
        assert_eq!(json, "\"team:org-1\"");
        let back: BillingAccount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, org);
    }
}
