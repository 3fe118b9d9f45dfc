//! Entry URL parameter resolution
//!
//! The migration page is entered with exactly one legacy-kind marker in its
//! query string. After the payment processor redirects back, the same URL
//! additionally carries the processor's setup identifier and status.

use std::collections::HashMap;

use paygo_shared::LegacyKind;

/// Query parameter carrying the payment-setup identifier
pub const PAYMENT_SETUP_MARKER: &str = "setup_intent";

/// Query parameter carrying the processor's redirect status
pub const PAYMENT_STATUS_MARKER: &str = "redirect_status";

/// The only processor status that surfaces a payment-setup identifier
pub const PAYMENT_STATUS_SUCCEEDED: &str = "succeeded";

/// Query parameter carrying the organization selected on the page
pub const ORGANIZATION_MARKER: &str = "organization";

/// Which legacy subscription is being migrated, resolved from the entry URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationParams {
    pub legacy_ref: String,
    pub legacy_kind: LegacyKind,
    /// Present only right after a successful return from the processor
    pub payment_setup_ref: Option<String>,
    /// Transient owner selection for first-generation team subscriptions
    pub selected_organization: Option<String>,
}

impl MigrationParams {
    /// Resolve parameters from a raw query string (with or without leading `?`)
    ///
    /// Returns `None` when no legacy-kind marker is present, in which case the
    /// workflow is inert.
    pub fn from_query(query: &str) -> Option<Self> {
        let query = query.strip_prefix('?').unwrap_or(query);
        // First occurrence of each key wins
        let mut pairs: HashMap<String, String> = HashMap::new();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            pairs
                .entry(key.into_owned())
                .or_insert_with(|| value.into_owned());
        }

        let non_empty = |key: &str| {
            pairs
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let (legacy_kind, legacy_ref) = LegacyKind::MARKER_PRIORITY
            .iter()
            .find_map(|kind| non_empty(kind.query_marker()).map(|value| (*kind, value)))?;

        let payment_setup_ref = match non_empty(PAYMENT_STATUS_MARKER) {
            Some(status) if status == PAYMENT_STATUS_SUCCEEDED => non_empty(PAYMENT_SETUP_MARKER),
            _ => None,
        };

        Some(Self {
            legacy_ref,
            legacy_kind,
            payment_setup_ref,
            selected_organization: non_empty(ORGANIZATION_MARKER),
        })
    }
}
