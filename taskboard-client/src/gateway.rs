//! Request gateway
//!
//! The single entry point for outbound calls. Attaches the current
//! credential, applies passive credential rotation, and routes expired
//! credentials to the [`RefreshCoordinator`] and anti-abuse challenges to the
//! [`CaptchaChallengeBroker`]. Everything else is returned to the caller as-is.
//!
//! ```text
//!  caller ──► RequestGateway::send ──► HttpTransport
//!                 │   401 ──► RefreshCoordinator ──► send (replay, once)
//!                 │   403 + captcha ──► CaptchaChallengeBroker ──► send (answered)
//!                 └── other ──► ClientError::Api
//! ```

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use reqwest::header::AUTHORIZATION;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::challenge::{CaptchaChallengeBroker, ChallengeHandler, DeclineChallenges};
use crate::config::ClientConfig;
use crate::credentials::{Credential, CredentialStore, MemoryCredentialStore};
use crate::error::{extract_message, extract_message_from_bytes, value_text, ClientError, Result};
use crate::events::SessionEvents;
use crate::refresh::RefreshCoordinator;
use crate::request::{RequestDescriptor, Response};
use crate::transport::{HttpTransport, ReqwestTransport};

/// Why a non-success response was returned.
#[derive(Debug, PartialEq, Eq)]
enum Failure {
    Expired,
    Challenge { question: String },
    Other,
}

struct GatewayInner {
    config: ClientConfig,
    transport: Arc<dyn HttpTransport>,
    credentials: Arc<dyn CredentialStore>,
    refresh: RefreshCoordinator,
    challenges: CaptchaChallengeBroker,
    events: SessionEvents,
}

/// Outbound call surface shared by the whole application.
///
/// Cheap to clone; all clones share the same renewal state and challenge
/// broker.
#[derive(Clone)]
pub struct RequestGateway {
    inner: Arc<GatewayInner>,
}

impl RequestGateway {
    pub fn builder(config: ClientConfig) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    /// Send a request, absorbing credential renewal and challenges.
    pub fn send(&self, request: RequestDescriptor) -> BoxFuture<'_, Result<Response>> {
        async move { self.dispatch(request).await }.boxed()
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.credentials
    }

    pub fn events(&self) -> &SessionEvents {
        &self.inner.events
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn refresh_coordinator(&self) -> &RefreshCoordinator {
        &self.inner.refresh
    }

    async fn dispatch(&self, mut request: RequestDescriptor) -> Result<Response> {
        let renewal = self.is_renewal(&request);
        let attached = if renewal {
            request.headers.remove(AUTHORIZATION);
            None
        } else {
            self.attach_credential(&mut request)?
        };

        let response = self.inner.transport.execute(&request).await?;
        self.apply_passive_refresh(&response);

        if response.is_success() {
            return Ok(response);
        }

        let body = response.json_value();
        let message = body
            .as_ref()
            .map(extract_message)
            .unwrap_or_else(|| extract_message_from_bytes(&response.body));

        match self.classify(&response, body.as_ref(), renewal) {
            Failure::Expired if request.retried => {
                warn!(path = %request.path, "Credential rejected after renewal");
                Err(ClientError::FatalAuth(message))
            }
            Failure::Expired => {
                let current = self.inner.credentials.get();
                if current.is_some() && current != attached {
                    debug!(path = %request.path, "Credential rotated meanwhile, replaying");
                    request.retried = true;
                    return self.send(request).await;
                }
                self.inner.refresh.refresh_and_retry(self, request).await
            }
            Failure::Challenge { question } => {
                info!(path = %request.path, "Request challenged");
                let original = ClientError::ChallengeRequired {
                    status: response.status,
                    question: question.clone(),
                    message,
                };
                self.inner
                    .challenges
                    .challenge_and_retry(self, request, question, original)
                    .await
            }
            Failure::Other => Err(ClientError::Api {
                status: response.status,
                message,
            }),
        }
    }

    fn is_renewal(&self, request: &RequestDescriptor) -> bool {
        request.path == self.inner.refresh.refresh_path()
    }

    /// Attach the credential as read right now, returning what was attached.
    fn attach_credential(&self, request: &mut RequestDescriptor) -> Result<Option<Credential>> {
        let credential = self.inner.credentials.get();
        match credential {
            Some(ref credential) => request.set_header(AUTHORIZATION.as_str(), &credential.bearer())?,
            None => {
                request.headers.remove(AUTHORIZATION);
            }
        }
        Ok(credential)
    }

    fn apply_passive_refresh(&self, response: &Response) {
        if let Some(access) = response.header(&self.inner.config.passive_refresh_header) {
            if !access.is_empty() {
                debug!("Credential rotated by response header");
                self.inner.credentials.set(Credential::new(access));
            }
        }
    }

    fn classify(&self, response: &Response, body: Option<&Value>, renewal: bool) -> Failure {
        let config = &self.inner.config;
        if response.status == config.expired_status && !renewal {
            return Failure::Expired;
        }
        if response.status == config.challenge_status {
            if let Some(question) = body.and_then(|b| b.get("captcha")).and_then(challenge_question) {
                return Failure::Challenge { question };
            }
        }
        Failure::Other
    }
}

/// Question text of a `captcha` field. Empty strings, zero, `false` and
/// `null` do not count as a challenge.
fn challenge_question(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::Number(n) if n.as_f64() == Some(0.0) => None,
        other => Some(value_text(other)),
    }
}

/// Assembles a [`RequestGateway`] from its collaborators.
pub struct GatewayBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn HttpTransport>>,
    credentials: Option<Arc<dyn CredentialStore>>,
    challenge_handler: Option<Arc<dyn ChallengeHandler>>,
    events: Option<SessionEvents>,
}

impl GatewayBuilder {
    fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            credentials: None,
            challenge_handler: None,
            events: None,
        }
    }

    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn challenge_handler(mut self, handler: Arc<dyn ChallengeHandler>) -> Self {
        self.challenge_handler = Some(handler);
        self
    }

    pub fn events(mut self, events: SessionEvents) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the gateway. Without an explicit transport a `reqwest` one is
    /// created from the config.
    pub fn build(self) -> Result<RequestGateway> {
        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(self.config.clone())?),
        };
        let credentials = self
            .credentials
            .unwrap_or_else(|| Arc::new(MemoryCredentialStore::new()));
        let handler = self
            .challenge_handler
            .unwrap_or_else(|| Arc::new(DeclineChallenges));
        let events = self.events.unwrap_or_default();

        let refresh = RefreshCoordinator::new(
            self.config.refresh_path.clone(),
            self.config.refresh_timeout,
            events.clone(),
        );
        let challenges = CaptchaChallengeBroker::new(
            handler,
            self.config.challenge_answer_header.clone(),
            self.config.challenge_timeout,
        );

        Ok(RequestGateway {
            inner: Arc::new(GatewayInner {
                config: self.config,
                transport,
                credentials,
                refresh,
                challenges,
                events,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::ChannelChallengeHandler;
    use crate::events::SessionEvent;
    use crate::testing::ScriptedTransport;
    use futures::future::join_all;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn gateway_with(
        transport: Arc<ScriptedTransport>,
        store: Arc<MemoryCredentialStore>,
    ) -> RequestGateway {
        RequestGateway::builder(ClientConfig::default())
            .transport(transport)
            .credentials(store)
            .build()
            .unwrap()
    }

    fn bearer(request: &RequestDescriptor) -> Option<String> {
        request
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    /// 401 unless the request carries `Bearer fresh`; renewal hands out `fresh`.
    fn expiring_backend(request: &RequestDescriptor) -> Response {
        if request.path == "/auth/refresh/" {
            return Response::json_body(200, &json!({"access": "fresh"}));
        }
        match bearer(request).as_deref() {
            Some("Bearer fresh") => Response::json_body(200, &json!({"path": request.path})),
            _ => Response::json_body(401, &json!({"detail": "Token expired"})),
        }
    }

    #[tokio::test]
    async fn test_attaches_bearer_except_on_renewal() {
        let transport = Arc::new(ScriptedTransport::new(|_| Response::json_body(200, &json!({}))));
        let store = Arc::new(MemoryCredentialStore::with_credential(Credential::new("abc")));
        let gateway = gateway_with(transport.clone(), store);

        gateway.send(RequestDescriptor::get("/tasks/")).await.unwrap();
        gateway
            .send(RequestDescriptor::post("/auth/refresh/").header("Authorization", "Bearer stale").unwrap())
            .await
            .unwrap();

        let requests = transport.requests();
        assert_eq!(bearer(&requests[0]).as_deref(), Some("Bearer abc"));
        assert_eq!(bearer(&requests[1]), None);
    }

    #[tokio::test]
    async fn test_passive_renewal_on_success() {
        let transport = Arc::new(ScriptedTransport::new(|_| {
            Response::json_body(200, &json!([])).with_header("x-new-access-token", "rotated")
        }));
        let store = Arc::new(MemoryCredentialStore::with_credential(Credential::new("old")));
        let gateway = gateway_with(transport.clone(), store.clone());

        let response = gateway.send(RequestDescriptor::get("/tasks/")).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(store.get(), Some(Credential::new("rotated")));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_single_flight_renewal() {
        let transport = Arc::new(ScriptedTransport::new(expiring_backend));
        let gate = transport.hold("/auth/refresh/");
        let store = Arc::new(MemoryCredentialStore::with_credential(Credential::new("stale")));
        let gateway = gateway_with(transport.clone(), store.clone());

        let calls = (0..5).map(|i| gateway.send(RequestDescriptor::get(format!("/tasks/{}/", i))));
        let release = async {
            while gateway.refresh_coordinator().queued() < 4 {
                tokio::task::yield_now().await;
            }
            gate.notify_one();
        };
        let (results, ()) = tokio::join!(join_all(calls), release);

        for (i, result) in results.iter().enumerate() {
            let response = result.as_ref().unwrap();
            let body: Value = response.json().unwrap();
            assert_eq!(body["path"], format!("/tasks/{}/", i));
        }
        assert_eq!(transport.count("/auth/refresh/"), 1);
        assert_eq!(store.get(), Some(Credential::new("fresh")));

        let replayed: Vec<String> = transport
            .requests()
            .into_iter()
            .filter(|r| bearer(r).as_deref() == Some("Bearer fresh"))
            .map(|r| r.path)
            .collect();
        let expected: Vec<String> = (0..5).map(|i| format!("/tasks/{}/", i)).collect();
        assert_eq!(replayed, expected);
        assert!(!gateway.refresh_coordinator().is_refreshing());
    }

    #[tokio::test]
    async fn test_renewal_failure_clears_state() {
        let transport = Arc::new(ScriptedTransport::new(|request| {
            if request.path == "/auth/refresh/" {
                Response::json_body(401, &json!({"detail": "Refresh token expired"}))
            } else {
                Response::json_body(401, &json!({"detail": "Token expired"}))
            }
        }));
        let gate = transport.hold("/auth/refresh/");
        let store = Arc::new(MemoryCredentialStore::with_credential(Credential::new("stale")));
        let gateway = gateway_with(transport.clone(), store.clone());
        let mut events = gateway.events().subscribe();

        let calls = (0..3).map(|i| gateway.send(RequestDescriptor::get(format!("/tasks/{}/", i))));
        let release = async {
            while gateway.refresh_coordinator().queued() < 2 {
                tokio::task::yield_now().await;
            }
            gate.notify_one();
        };
        let (results, ()) = tokio::join!(join_all(calls), release);

        assert!(results.iter().all(|r| matches!(r, Err(ClientError::FatalAuth(_)))));
        assert!(store.get().is_none());
        assert_eq!(transport.count("/auth/refresh/"), 1);
        assert!(matches!(
            events.try_recv(),
            Ok(SessionEvent::SessionEnded { .. })
        ));
    }

    #[tokio::test]
    async fn test_second_expiry_is_fatal() {
        let transport = Arc::new(ScriptedTransport::new(|request| {
            if request.path == "/auth/refresh/" {
                Response::json_body(200, &json!({"access": "fresh"}))
            } else {
                Response::json_body(401, &json!({"detail": "Still expired"}))
            }
        }));
        let store = Arc::new(MemoryCredentialStore::with_credential(Credential::new("stale")));
        let gateway = gateway_with(transport.clone(), store.clone());

        let err = gateway.send(RequestDescriptor::get("/tasks/")).await.unwrap_err();
        assert_eq!(err, ClientError::FatalAuth("Still expired".into()));
        assert_eq!(transport.count("/tasks/"), 2);
        assert_eq!(transport.count("/auth/refresh/"), 1);
        // Only a failed renewal ends the session.
        assert_eq!(store.get(), Some(Credential::new("fresh")));
    }

    #[tokio::test]
    async fn test_rotated_credential_replays_without_renewal() {
        let store = Arc::new(MemoryCredentialStore::with_credential(Credential::new("stale")));
        let rotating = store.clone();
        let transport = Arc::new(ScriptedTransport::new(move |request| {
            if bearer(request).as_deref() == Some("Bearer stale") {
                // Another caller rotated the credential while this one was in flight.
                rotating.set(Credential::new("fresh"));
            }
            expiring_backend(request)
        }));
        let gateway = gateway_with(transport.clone(), store);

        gateway.send(RequestDescriptor::get("/tasks/")).await.unwrap();
        assert_eq!(transport.count("/auth/refresh/"), 0);
        assert_eq!(transport.count("/tasks/"), 2);
    }

    fn challenging_backend(request: &RequestDescriptor) -> Response {
        match request.headers.get("x-captcha-answer").and_then(|v| v.to_str().ok()) {
            Some("42") => Response::json_body(200, &json!({"ok": true})),
            _ => Response::json_body(
                403,
                &json!({"detail": "IP blocked. Solve CAPTCHA.", "captcha": "6 * 7"}),
            ),
        }
    }

    #[tokio::test]
    async fn test_challenge_answered() {
        let transport = Arc::new(ScriptedTransport::new(challenging_backend));
        let (handler, mut prompts) = ChannelChallengeHandler::channel(1);
        let gateway = RequestGateway::builder(ClientConfig::default())
            .transport(transport.clone())
            .challenge_handler(Arc::new(handler))
            .build()
            .unwrap();

        let ui = tokio::spawn(async move {
            let prompt = prompts.recv().await.unwrap();
            assert_eq!(prompt.challenge.question, "6 * 7");
            prompt.answer("42");
        });

        let response = gateway.send(RequestDescriptor::post("/auth/login/")).await.unwrap();
        assert_eq!(response.status, 200);
        ui.await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].headers.get("x-captcha-answer").is_none());
        assert_eq!(requests[1].headers.get("x-captcha-answer").unwrap(), "42");
    }

    #[tokio::test]
    async fn test_challenge_cancelled() {
        let transport = Arc::new(ScriptedTransport::new(challenging_backend));
        let (handler, mut prompts) = ChannelChallengeHandler::channel(1);
        let gateway = RequestGateway::builder(ClientConfig::default())
            .transport(transport.clone())
            .challenge_handler(Arc::new(handler))
            .build()
            .unwrap();

        let ui = tokio::spawn(async move {
            prompts.recv().await.unwrap().cancel();
        });

        let err = gateway.send(RequestDescriptor::post("/auth/login/")).await.unwrap_err();
        assert_eq!(
            err,
            ClientError::ChallengeRequired {
                status: 403,
                question: "6 * 7".into(),
                message: "IP blocked. Solve CAPTCHA.".into(),
            }
        );
        assert_eq!(transport.requests().len(), 1);
        ui.await.unwrap();
    }

    #[tokio::test]
    async fn test_validation_error_surfaced() {
        let transport = Arc::new(ScriptedTransport::new(|_| {
            Response::json_body(400, &json!({"deadline": ["Deadline must be in the future."]}))
        }));
        let gateway = gateway_with(transport.clone(), Arc::new(MemoryCredentialStore::new()));

        let err = gateway.send(RequestDescriptor::post("/tasks/")).await.unwrap_err();
        assert_eq!(
            err,
            ClientError::Api {
                status: 400,
                message: "Deadline must be in the future.".into(),
            }
        );
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_forbidden_without_captcha_is_plain_error() {
        let transport = Arc::new(ScriptedTransport::new(|_| {
            Response::json_body(403, &json!({"detail": "Only managers can delete tasks."}))
        }));
        let gateway = gateway_with(transport, Arc::new(MemoryCredentialStore::new()));

        let err = gateway.send(RequestDescriptor::delete("/tasks/1/")).await.unwrap_err();
        assert_eq!(err.status(), Some(403));
        assert!(matches!(err, ClientError::Api { .. }));
    }

    /// `/slow/` is challenged once it carries the renewed credential.
    fn slow_replay_backend(request: &RequestDescriptor) -> Response {
        if request.path == "/auth/refresh/" {
            return Response::json_body(200, &json!({"access": "fresh"}));
        }
        match (bearer(request).as_deref(), request.path.as_str()) {
            (Some("Bearer fresh"), "/slow/") => {
                Response::json_body(403, &json!({"detail": "Solve CAPTCHA.", "captcha": "6 * 7"}))
            }
            (Some("Bearer fresh"), _) => Response::json_body(200, &json!({"path": request.path})),
            _ => Response::json_body(401, &json!({"detail": "Token expired"})),
        }
    }

    fn challenged_gateway(
        transport: Arc<ScriptedTransport>,
        store: Arc<MemoryCredentialStore>,
        handler: ChannelChallengeHandler,
    ) -> RequestGateway {
        RequestGateway::builder(ClientConfig::default())
            .transport(transport)
            .credentials(store)
            .challenge_handler(Arc::new(handler))
            .build()
            .unwrap()
    }

    fn spawn_send(
        gateway: &RequestGateway,
        path: &str,
    ) -> tokio::task::JoinHandle<Result<Response>> {
        let gateway = gateway.clone();
        let request = RequestDescriptor::get(path);
        tokio::spawn(async move { gateway.send(request).await })
    }

    #[tokio::test]
    async fn test_leader_not_held_by_parked_replay() {
        let transport = Arc::new(ScriptedTransport::new(slow_replay_backend));
        let gate = transport.hold("/auth/refresh/");
        let store = Arc::new(MemoryCredentialStore::with_credential(Credential::new("stale")));
        // Prompts are never answered, so the parked replay stays challenged.
        let (handler, _prompts) = ChannelChallengeHandler::channel(4);
        let gateway = challenged_gateway(transport.clone(), store, handler);

        let leader = spawn_send(&gateway, "/fast/");
        while !gateway.refresh_coordinator().is_refreshing() {
            tokio::task::yield_now().await;
        }
        let parked = spawn_send(&gateway, "/slow/");
        while gateway.refresh_coordinator().queued() < 1 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();

        let own = tokio::time::timeout(Duration::from_secs(2), leader)
            .await
            .expect("leader waited on a parked replay")
            .unwrap()
            .unwrap();
        assert_eq!(own.status, 200);
        assert!(!parked.is_finished());
        parked.abort();
    }

    #[tokio::test]
    async fn test_parked_calls_survive_leader_cancellation() {
        let transport = Arc::new(ScriptedTransport::new(slow_replay_backend));
        let gate = transport.hold("/auth/refresh/");
        let store = Arc::new(MemoryCredentialStore::with_credential(Credential::new("stale")));
        let (handler, mut prompts) = ChannelChallengeHandler::channel(4);
        let gateway = challenged_gateway(transport.clone(), store.clone(), handler);

        let leader = spawn_send(&gateway, "/slow/");
        while !gateway.refresh_coordinator().is_refreshing() {
            tokio::task::yield_now().await;
        }
        let parked = spawn_send(&gateway, "/fast/");
        while gateway.refresh_coordinator().queued() < 1 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();

        // The leader's own replay is now waiting on a challenge.
        let prompt = prompts.recv().await.unwrap();
        leader.abort();
        assert!(leader.await.unwrap_err().is_cancelled());

        let outcome = parked.await.unwrap().unwrap();
        assert_eq!(outcome.status, 200);
        assert_eq!(store.get(), Some(Credential::new("fresh")));
        drop(prompt);
    }

    #[tokio::test]
    async fn test_expiry_after_flush_starts_new_renewal() {
        let renewals = Arc::new(AtomicUsize::new(0));
        let counter = renewals.clone();
        let transport = Arc::new(ScriptedTransport::new(move |request| {
            if request.path == "/auth/refresh/" {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                return Response::json_body(200, &json!({"access": format!("fresh-{}", n)}));
            }
            let token = bearer(request).unwrap_or_default();
            let accepted = match request.path.as_str() {
                "/late/" => token == "Bearer fresh-2",
                _ => token.starts_with("Bearer fresh-"),
            };
            if accepted {
                Response::json_body(200, &json!({"path": request.path}))
            } else {
                Response::json_body(401, &json!({"detail": "Token expired"}))
            }
        }));
        let replay_gate = transport.hold_when(|request| {
            request.path == "/first/" && bearer(request).as_deref() == Some("Bearer fresh-1")
        });
        let store = Arc::new(MemoryCredentialStore::with_credential(Credential::new("stale")));
        let gateway = gateway_with(transport.clone(), store.clone());

        let first = spawn_send(&gateway, "/first/");
        while transport.count("/first/") < 2 {
            tokio::task::yield_now().await;
        }
        assert!(!gateway.refresh_coordinator().is_refreshing());

        let late = gateway.send(RequestDescriptor::get("/late/")).await.unwrap();
        assert_eq!(late.status, 200);
        assert_eq!(transport.count("/auth/refresh/"), 2);
        assert_eq!(renewals.load(Ordering::SeqCst), 2);
        assert!(!first.is_finished());

        replay_gate.notify_one();
        let first = first.await.unwrap().unwrap();
        assert_eq!(first.status, 200);
        assert_eq!(store.get(), Some(Credential::new("fresh-2")));
    }

    #[tokio::test]
    async fn test_passive_renewal_on_error_response() {
        let transport = Arc::new(ScriptedTransport::new(|_| {
            Response::json_body(400, &json!({"title": ["This field is required."]}))
                .with_header("x-new-access-token", "rotated")
        }));
        let store = Arc::new(MemoryCredentialStore::with_credential(Credential::new("old")));
        let gateway = gateway_with(transport, store.clone());

        let err = gateway.send(RequestDescriptor::post("/tasks/")).await.unwrap_err();
        assert_eq!(
            err,
            ClientError::Api {
                status: 400,
                message: "This field is required.".into(),
            }
        );
        assert_eq!(store.get(), Some(Credential::new("rotated")));
    }

    #[tokio::test]
    async fn test_numeric_captcha_on_custom_status() {
        let transport = Arc::new(ScriptedTransport::new(|_| {
            Response::json_body(429, &json!({"detail": "Slow down.", "captcha": 12}))
        }));
        let (handler, mut prompts) = ChannelChallengeHandler::channel(1);
        let config = ClientConfig {
            challenge_status: 429,
            ..Default::default()
        };
        let gateway = RequestGateway::builder(config)
            .transport(transport)
            .challenge_handler(Arc::new(handler))
            .build()
            .unwrap();

        let ui = tokio::spawn(async move {
            let prompt = prompts.recv().await.unwrap();
            assert_eq!(prompt.challenge.question, "12");
            prompt.cancel();
        });

        let err = gateway.send(RequestDescriptor::post("/auth/login/")).await.unwrap_err();
        assert_eq!(err.status(), Some(429));
        assert_eq!(
            err,
            ClientError::ChallengeRequired {
                status: 429,
                question: "12".into(),
                message: "Slow down.".into(),
            }
        );
        ui.await.unwrap();
    }

    #[test]
    fn test_falsy_captcha_is_not_a_challenge() {
        assert_eq!(challenge_question(&json!("")), None);
        assert_eq!(challenge_question(&json!(0)), None);
        assert_eq!(challenge_question(&json!(false)), None);
        assert_eq!(challenge_question(&json!(null)), None);
        assert_eq!(challenge_question(&json!("2 + 2")), Some("2 + 2".into()));
        assert_eq!(challenge_question(&json!(7)), Some("7".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_timeout_is_fatal() {
        let transport = Arc::new(ScriptedTransport::new(expiring_backend));
        let _gate = transport.hold("/auth/refresh/");
        let store = Arc::new(MemoryCredentialStore::with_credential(Credential::new("stale")));
        let config = ClientConfig {
            refresh_timeout: Duration::from_secs(10),
            ..Default::default()
        };
        let gateway = RequestGateway::builder(config)
            .transport(transport)
            .credentials(store.clone())
            .build()
            .unwrap();

        let err = gateway.send(RequestDescriptor::get("/tasks/")).await.unwrap_err();
        assert!(err.is_fatal_auth());
        assert!(store.get().is_none());
    }
}
