//! Single-flight credential renewal
//!
//! ```text
//!   Idle --(expired credential)--> Refreshing --(renewal resolves)--> Idle
//! ```
//!
//! The first expired call becomes the leader and performs the renewal
//! itself. Calls failing while a renewal is in flight park a [`PendingCall`]
//! and issue nothing. Leaving `Refreshing` takes the whole queue in the same
//! critical section that resets the state, so a call arriving after that
//! point starts fresh instead of joining a flush already underway.
//!
//! Parked calls are released with the renewal outcome in FIFO order and each
//! replays itself from its own future. The leader replays only its own call,
//! so no caller waits on another caller's replay.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::credentials::Credential;
use crate::error::{ClientError, Result};
use crate::events::{SessionEvent, SessionEvents};
use crate::gateway::RequestGateway;
use crate::request::{RequestDescriptor, Response};

/// A caller parked behind an in-flight renewal.
struct PendingCall {
    released: oneshot::Sender<Result<()>>,
}

enum RefreshState {
    Idle,
    Refreshing { queue: VecDeque<PendingCall> },
}

enum Role {
    Leader,
    Follower(oneshot::Receiver<Result<()>>),
}

#[derive(Debug, Deserialize)]
struct RenewalResponse {
    access: Option<String>,
}

/// Coordinates credential renewal across concurrent callers.
pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
    refresh_path: String,
    timeout: Duration,
    events: SessionEvents,
}

impl RefreshCoordinator {
    pub fn new(refresh_path: impl Into<String>, timeout: Duration, events: SessionEvents) -> Self {
        Self {
            state: Mutex::new(RefreshState::Idle),
            refresh_path: refresh_path.into(),
            timeout,
            events,
        }
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(*self.lock(), RefreshState::Refreshing { .. })
    }

    /// Number of callers parked behind the current renewal.
    pub fn queued(&self) -> usize {
        match &*self.lock() {
            RefreshState::Idle => 0,
            RefreshState::Refreshing { queue } => queue.len(),
        }
    }

    pub fn refresh_path(&self) -> &str {
        &self.refresh_path
    }

    /// Renew the credential (or wait for the renewal in flight) and replay
    /// `request` with the result.
    pub(crate) async fn refresh_and_retry(
        &self,
        gateway: &RequestGateway,
        mut request: RequestDescriptor,
    ) -> Result<Response> {
        request.retried = true;

        let role = {
            let mut state = self.lock();
            let role = match &mut *state {
                RefreshState::Idle => Role::Leader,
                RefreshState::Refreshing { queue } => {
                    let (released, outcome) = oneshot::channel();
                    queue.push_back(PendingCall { released });
                    debug!(path = %request.path, queued = queue.len(), "Waiting for credential renewal");
                    Role::Follower(outcome)
                }
            };
            if matches!(role, Role::Leader) {
                *state = RefreshState::Refreshing {
                    queue: VecDeque::new(),
                };
            }
            role
        };

        match role {
            Role::Follower(outcome) => {
                outcome.await.unwrap_or_else(|_| {
                    Err(ClientError::FatalAuth("credential renewal abandoned".into()))
                })?;
                debug!(path = %request.path, "Replaying after renewal");
                gateway.send(request).await
            }
            Role::Leader => self.lead(gateway, request).await,
        }
    }

    async fn lead(&self, gateway: &RequestGateway, request: RequestDescriptor) -> Result<Response> {
        let mut guard = LeaderGuard {
            coordinator: self,
            armed: true,
        };

        info!(path = %request.path, "Credential expired, renewing");
        let renewal = self.renew(gateway).await;

        match renewal {
            Ok(credential) => {
                gateway.credentials().set(credential);
                let queue = self.finish();
                guard.armed = false;
                info!(queued = queue.len(), "Credential renewed, releasing parked calls");

                for call in queue {
                    let _ = call.released.send(Ok(()));
                }
                gateway.send(request).await
            }
            Err(err) => {
                let queue = self.finish();
                guard.armed = false;
                warn!(error = %err, rejected = queue.len(), "Credential renewal failed, ending session");

                for call in queue {
                    let _ = call.released.send(Err(err.clone()));
                }
                gateway.credentials().clear();
                self.events.emit(SessionEvent::SessionEnded {
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// The renewal exchange. The refresh credential travels as a cookie, so
    /// the body is empty and no bearer is attached.
    async fn renew(&self, gateway: &RequestGateway) -> Result<Credential> {
        let request = RequestDescriptor::post(self.refresh_path.clone()).json(&json!({}))?;

        let response = tokio::time::timeout(self.timeout, gateway.send(request))
            .await
            .map_err(|_| {
                ClientError::FatalAuth(format!(
                    "credential renewal timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| ClientError::FatalAuth(e.to_string()))?;

        let body: RenewalResponse = response
            .json()
            .map_err(|e| ClientError::FatalAuth(format!("invalid renewal response: {}", e)))?;

        body.access
            .filter(|access| !access.is_empty())
            .map(Credential::new)
            .ok_or_else(|| ClientError::FatalAuth("renewal response carried no credential".into()))
    }

    /// Return to Idle, taking every parked call.
    fn finish(&self) -> VecDeque<PendingCall> {
        let mut state = self.lock();
        match std::mem::replace(&mut *state, RefreshState::Idle) {
            RefreshState::Idle => VecDeque::new(),
            RefreshState::Refreshing { queue } => queue,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RefreshState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Releases parked callers if the leader is dropped mid-renewal.
struct LeaderGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    armed: bool,
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            for call in self.coordinator.finish() {
                let _ = call
                    .released
                    .send(Err(ClientError::FatalAuth("credential renewal abandoned".into())));
            }
        }
    }
}
