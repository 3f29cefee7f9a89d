//! Typed taskboard endpoints over the request gateway

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::credentials::{Credential, CredentialStore};
use crate::error::Result;
use crate::gateway::RequestGateway;
use crate::models::*;
use crate::request::RequestDescriptor;

/// Taskboard API client.
///
/// Every call goes through [`RequestGateway::send`], so credential renewal and
/// challenges are handled transparently.
///
/// # Example
///
/// ```rust,no_run
/// use taskboard_client::{ClientConfig, RequestGateway, TaskboardApi};
///
/// # async fn example() -> taskboard_client::Result<()> {
/// let gateway = RequestGateway::builder(ClientConfig::default()).build()?;
/// let api = TaskboardApi::new(gateway);
///
/// api.login("alice", "hunter2").await?;
/// let unread = api.unread_count().await?;
/// println!("{} unread", unread.count);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TaskboardApi {
    gateway: RequestGateway,
}

impl TaskboardApi {
    pub fn new(gateway: RequestGateway) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &RequestGateway {
        &self.gateway
    }

    async fn call<T: DeserializeOwned>(&self, request: RequestDescriptor) -> Result<T> {
        self.gateway.send(request).await?.json()
    }

    // ==================== Auth ====================

    pub async fn register(&self, request: &RegisterRequest) -> Result<User> {
        self.call(RequestDescriptor::post("/auth/register/").json(request)?)
            .await
    }

    pub async fn verify_email(&self, token: &str) -> Result<Value> {
        self.call(RequestDescriptor::post("/auth/verify-email/").json(&json!({ "token": token }))?)
            .await
    }

    /// Log in and store the returned access credential.
    ///
    /// The refresh credential arrives as a cookie and stays in the HTTP
    /// client's cookie store.
    pub async fn login(&self, username: &str, password: &str) -> Result<AuthResponse> {
        let body = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let auth: AuthResponse = self
            .call(RequestDescriptor::post("/auth/login/").json(&body)?)
            .await?;

        if !auth.access.is_empty() {
            self.gateway.credentials().set(Credential::new(auth.access.clone()));
        }
        info!(user = %auth.user.username, "Logged in");
        Ok(auth)
    }

    /// Best-effort server logout. Local credentials are cleared regardless.
    pub async fn logout(&self) {
        let request = RequestDescriptor::post("/auth/logout/").json(&json!({}));
        let outcome = match request {
            Ok(request) => self.gateway.send(request).await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            warn!(error = %e, "Logout call failed");
        }
        self.gateway.credentials().clear();
    }

    pub async fn current_user(&self) -> Result<User> {
        self.call(RequestDescriptor::get("/auth/users/me/")).await
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        self.call(RequestDescriptor::get("/auth/users/")).await
    }

    // ==================== Tasks ====================

    pub async fn list_tasks(&self) -> Result<Vec<Task>> {
        self.call(RequestDescriptor::get("/tasks/")).await
    }

    pub async fn get_task(&self, id: TaskId) -> Result<Task> {
        self.call(RequestDescriptor::get(format!("/tasks/{}/", id)))
            .await
    }

    pub async fn create_task(&self, payload: &TaskCreatePayload) -> Result<Task> {
        self.call(RequestDescriptor::post("/tasks/").json(payload)?)
            .await
    }

    pub async fn update_task(&self, id: TaskId, payload: &TaskUpdatePayload) -> Result<Task> {
        self.call(RequestDescriptor::patch(format!("/tasks/{}/", id)).json(payload)?)
            .await
    }

    pub async fn delete_task(&self, id: TaskId) -> Result<()> {
        self.gateway
            .send(RequestDescriptor::delete(format!("/tasks/{}/", id)))
            .await?;
        Ok(())
    }

    /// Move several tasks to one status. Returns the backend's summary body.
    pub async fn bulk_update_status(&self, payload: &BulkUpdatePayload) -> Result<Value> {
        self.call(RequestDescriptor::post("/tasks/bulk-update/").json(payload)?)
            .await
    }

    pub async fn analytics(&self) -> Result<AnalyticsData> {
        self.call(RequestDescriptor::get("/tasks/analytics/")).await
    }

    // ==================== Notifications ====================

    pub async fn list_notifications(&self) -> Result<Vec<Notification>> {
        self.call(RequestDescriptor::get("/notifications/")).await
    }

    pub async fn get_notification(&self, id: NotificationId) -> Result<Notification> {
        self.call(RequestDescriptor::get(format!("/notifications/{}/", id)))
            .await
    }

    pub async fn mark_notification_read(&self, id: NotificationId) -> Result<()> {
        self.gateway
            .send(RequestDescriptor::post(format!("/notifications/{}/mark_read/", id)))
            .await?;
        Ok(())
    }

    pub async fn mark_all_notifications_read(&self) -> Result<()> {
        self.gateway
            .send(RequestDescriptor::post("/notifications/mark_all_read/"))
            .await?;
        Ok(())
    }

    pub async fn unread_count(&self) -> Result<UnreadCount> {
        self.call(RequestDescriptor::get("/notifications/unread_count/"))
            .await
    }
}
