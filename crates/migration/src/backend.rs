//! Billing backend operations consumed by the migration
//!
//! The backend owns every billing record; the migration only asks it
//! questions and requests changes. [`HttpBillingBackend`] talks to the
//! backend's JSON API.

use async_trait::async_trait;
use paygo_shared::{BillingAccount, LegacyKind, Organization};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{MigrationError, MigrationResult};

/// Current record of a legacy subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacySubscriptionStatus {
    pub active: bool,
    pub cancelled: bool,
    pub plan_id: String,
    /// User that owns the subscription (or team, for team subscriptions)
    pub owner_ref: String,
    pub quantity: u32,
    /// The subscription's own identifier
    pub subscription_ref: String,
}

impl LegacySubscriptionStatus {
    /// Whether the legacy subscription still charges the customer
    pub fn is_chargeable(&self) -> bool {
        self.active && !self.cancelled
    }
}

#[async_trait]
pub trait BillingBackend: Send + Sync {
    /// `Ok(None)` when no such legacy subscription exists
    async fn get_legacy_subscription_status(
        &self,
        kind: LegacyKind,
        legacy_ref: &str,
    ) -> MigrationResult<Option<LegacySubscriptionStatus>>;

    /// Usage-based subscription owned by the account, if any
    async fn find_subscription(&self, account: &BillingAccount)
        -> MigrationResult<Option<String>>;

    async fn create_subscription(
        &self,
        account: &BillingAccount,
        payment_setup_ref: &str,
        usage_limit: u64,
    ) -> MigrationResult<()>;

    async fn cancel_legacy_subscription(
        &self,
        kind: LegacyKind,
        legacy_ref: &str,
    ) -> MigrationResult<()>;

    async fn migrate_members_to_organization(
        &self,
        legacy_team_ref: &str,
        organization_id: &str,
    ) -> MigrationResult<()>;

    async fn list_organizations(&self) -> MigrationResult<Vec<Organization>>;
}

#[derive(Debug, Deserialize)]
struct FindSubscriptionResponse {
    subscription_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateSubscriptionRequest<'a> {
    payment_setup_ref: &'a str,
    usage_limit: u64,
}

#[derive(Debug, Serialize)]
struct MigrateMembersRequest<'a> {
    organization_id: &'a str,
}

/// Billing backend reached over HTTP
#[derive(Clone)]
pub struct HttpBillingBackend {
    client: Client,
    base_url: Url,
    authorization: Option<String>,
}

impl HttpBillingBackend {
    pub fn new(client: Client, base_url: &str) -> MigrationResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| MigrationError::Config(format!("invalid billing API URL: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(MigrationError::Config(format!(
                "billing API URL cannot be a base: {}",
                base_url
            )));
        }
        Ok(Self {
            client,
            base_url,
            authorization: None,
        })
    }

    /// Forward a caller's `Authorization` header value on every request
    pub fn with_authorization(mut self, value: Option<String>) -> Self {
        self.authorization = value;
        self
    }

    pub fn with_bearer_token(self, token: &str) -> Self {
        self.with_authorization(Some(format!("Bearer {}", token)))
    }

    fn endpoint(&self, segments: &[&str]) -> MigrationResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| MigrationError::Config("billing API URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.authorization {
            Some(value) => request.header(reqwest::header::AUTHORIZATION, value),
            None => request,
        }
    }

    async fn expect_success(operation: &str, response: Response) -> MigrationResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(
            operation = operation,
            status = %status,
            body = %body,
            "Billing backend request failed"
        );
        Err(MigrationError::Backend(format!(
            "{} returned {}: {}",
            operation, status, body
        )))
    }
}

#[async_trait]
impl BillingBackend for HttpBillingBackend {
    async fn get_legacy_subscription_status(
        &self,
        kind: LegacyKind,
        legacy_ref: &str,
    ) -> MigrationResult<Option<LegacySubscriptionStatus>> {
        let url = self.endpoint(&["legacy-subscriptions", kind.as_str(), legacy_ref])?;
        let response = self.authorize(self.client.get(url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::expect_success("get_legacy_subscription_status", response).await?;
        Ok(Some(response.json().await?))
    }

    async fn find_subscription(
        &self,
        account: &BillingAccount,
    ) -> MigrationResult<Option<String>> {
        let account = account.to_string();
        let url = self.endpoint(&["billing-accounts", &account, "subscription"])?;
        let response = self.authorize(self.client.get(url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::expect_success("find_subscription", response).await?;
        let body: FindSubscriptionResponse = response.json().await?;
        Ok(body.subscription_id.filter(|id| !id.is_empty()))
    }

    async fn create_subscription(
        &self,
        account: &BillingAccount,
        payment_setup_ref: &str,
        usage_limit: u64,
    ) -> MigrationResult<()> {
        let account = account.to_string();
        let url = self.endpoint(&["billing-accounts", &account, "subscription"])?;
        let response = self
            .authorize(self.client.post(url))
            .json(&CreateSubscriptionRequest {
                payment_setup_ref,
                usage_limit,
            })
            .send()
            .await
            .map_err(|e| MigrationError::CreationFailure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MigrationError::CreationFailure(if body.is_empty() {
                status.to_string()
            } else {
                body
            }));
        }
        Ok(())
    }

    async fn cancel_legacy_subscription(
        &self,
        kind: LegacyKind,
        legacy_ref: &str,
    ) -> MigrationResult<()> {
        let url = self.endpoint(&["legacy-subscriptions", kind.as_str(), legacy_ref, "cancel"])?;
        let response = self.authorize(self.client.post(url)).send().await?;
        Self::expect_success("cancel_legacy_subscription", response).await?;
        Ok(())
    }

    async fn migrate_members_to_organization(
        &self,
        legacy_team_ref: &str,
        organization_id: &str,
    ) -> MigrationResult<()> {
        let url = self.endpoint(&["team-subscriptions", legacy_team_ref, "migrate-members"])?;
        let response = self
            .authorize(self.client.post(url))
            .json(&MigrateMembersRequest { organization_id })
            .send()
            .await?;
        Self::expect_success("migrate_members_to_organization", response).await?;
        Ok(())
    }

    async fn list_organizations(&self) -> MigrationResult<Vec<Organization>> {
        let url = self.endpoint(&["organizations"])?;
        let response = self.authorize(self.client.get(url)).send().await?;
        let response = Self::expect_success("list_organizations", response).await?;
        Ok(response.json().await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn backend(server: &mockito::Server) -> HttpBillingBackend {
        HttpBillingBackend::new(Client::new(), &server.url())
            .unwrap()
            .with_bearer_token("test-token")
    }

    #[test]
    fn test_rejects_invalid_base_url() {
        assert!(HttpBillingBackend::new(Client::new(), "not a url").is_err());
        assert!(HttpBillingBackend::new(Client::new(), "mailto:billing@example.com").is_err());
    }

    #[tokio::test]
    async fn test_status_lookup_maps_404_to_none() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/legacy-subscriptions/personal/sub-404")
            .with_status(404)
            .create_async()
            .await;

        let status = backend(&server)
            .get_legacy_subscription_status(LegacyKind::PersonalSubscription, "sub-404")
            .await
            .unwrap();

        assert!(status.is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_status_lookup_forwards_authorization() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/legacy-subscriptions/team-v2/team-1")
            .match_header("authorization", "Bearer test-token")
            .with_status(200)
            .with_body(
                r#"{"active":true,"cancelled":false,"plan_id":"team-professional-eur",
                    "owner_ref":"team-1","quantity":5,"subscription_ref":"ts2-9"}"#,
            )
            .create_async()
            .await;

        let status = backend(&server)
            .get_legacy_subscription_status(LegacyKind::TeamSubscriptionV2, "team-1")
            .await
            .unwrap()
            .unwrap();

        assert!(status.is_chargeable());
        assert_eq!(status.quantity, 5);
        assert_eq!(status.subscription_ref, "ts2-9");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_find_subscription_treats_null_as_absent() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/billing-accounts/team:org-1/subscription")
            .with_status(200)
            .with_body(r#"{"subscription_id":null}"#)
            .create_async()
            .await;

        let found = backend(&server)
            .find_subscription(&BillingAccount::Organization("org-1".into()))
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_create_subscription_sends_setup_and_limit() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/billing-accounts/user:u-1/subscription")
            .match_body(Matcher::Json(serde_json::json!({
                "payment_setup_ref": "seti_1",
                "usage_limit": 1000
            })))
            .with_status(201)
            .create_async()
            .await;

        backend(&server)
            .create_subscription(&BillingAccount::User("u-1".into()), "seti_1", 1000)
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_subscription_rejection_is_creation_failure() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/billing-accounts/user:u-1/subscription")
            .with_status(402)
            .with_body("card_declined")
            .create_async()
            .await;

        let err = backend(&server)
            .create_subscription(&BillingAccount::User("u-1".into()), "seti_1", 1000)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::CreationFailure(ref m) if m == "card_declined"));
    }

    #[tokio::test]
    async fn test_cancel_failure_is_backend_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/legacy-subscriptions/team-v1/ts-1/cancel")
            .with_status(500)
            .create_async()
            .await;

        let err = backend(&server)
            .cancel_legacy_subscription(LegacyKind::TeamSubscriptionV1, "ts-1")
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::Backend(_)));
    }

    #[tokio::test]
    async fn test_migrate_members_sends_organization() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/team-subscriptions/ts-1/migrate-members")
            .match_header("authorization", "Bearer test-token")
            .match_body(Matcher::Json(serde_json::json!({
                "organization_id": "org-5"
            })))
            .with_status(200)
            .create_async()
            .await;

        backend(&server)
            .migrate_members_to_organization("ts-1", "org-5")
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_list_organizations() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/organizations")
            .with_status(200)
            .with_body(r#"[{"id":"org-1","name":"Acme"},{"id":"org-2","name":"Globex"}]"#)
            .create_async()
            .await;

        let orgs = backend(&server).list_organizations().await.unwrap();
        assert_eq!(orgs.len(), 2);
        assert_eq!(orgs[0].name, "Acme");
    }
}
