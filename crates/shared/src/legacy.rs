//! Legacy subscription kinds

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which generation of quantity-based subscription is being retired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LegacyKind {
    /// Per-user paid plan
    #[serde(rename = "personal")]
    PersonalSubscription,
    /// First-generation team subscription (seat slots, no owning organization)
    #[serde(rename = "team-v1")]
    TeamSubscriptionV1,
    /// Second-generation team subscription attached to a team
    #[serde(rename = "team-v2")]
    TeamSubscriptionV2,
}

impl LegacyKind {
    /// Order in which entry URL markers are examined; the first present wins
    pub const MARKER_PRIORITY: [LegacyKind; 3] = [
        LegacyKind::TeamSubscriptionV1,
        LegacyKind::TeamSubscriptionV2,
        LegacyKind::PersonalSubscription,
    ];

    /// Query parameter that selects this kind and carries its reference
    pub fn query_marker(&self) -> &'static str {
        match self {
            LegacyKind::TeamSubscriptionV1 => "teamSubscription",
            LegacyKind::TeamSubscriptionV2 => "teamid",
            LegacyKind::PersonalSubscription => "subscription",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LegacyKind::PersonalSubscription => "personal",
            LegacyKind::TeamSubscriptionV1 => "team-v1",
            LegacyKind::TeamSubscriptionV2 => "team-v2",
        }
    }
}

impl fmt::Display for LegacyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
