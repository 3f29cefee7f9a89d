//! In-memory transports for exercising the client without a backend.
//!
//! [`ScriptedTransport`] answers HTTP calls from a closure and records every
//! request it sees. [`MemoryConnector`] hands out push connections whose server
//! ends are delivered to the test as [`MemoryServer`]s.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::channel::mpsc as frames;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

use crate::error::{ClientError, Result};
use crate::realtime::{PushConnection, PushConnector};
use crate::request::{RequestDescriptor, Response};
use crate::transport::HttpTransport;

type Responder = Box<dyn Fn(&RequestDescriptor) -> Response + Send + Sync>;
type Matcher = Box<dyn Fn(&RequestDescriptor) -> bool + Send + Sync>;

/// HTTP transport answering from a closure.
pub struct ScriptedTransport {
    responder: Responder,
    requests: Mutex<Vec<RequestDescriptor>>,
    holds: Mutex<Vec<(Matcher, Arc<Notify>)>>,
}

impl ScriptedTransport {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&RequestDescriptor) -> Response + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
            holds: Mutex::new(Vec::new()),
        }
    }

    /// Park calls to `path` until the returned handle is notified.
    pub fn hold(&self, path: &str) -> Arc<Notify> {
        let path = path.to_string();
        self.hold_when(move |request| request.path == path)
    }

    /// Park every call matching `matcher` until the returned handle is
    /// notified. The first matching hold wins.
    pub fn hold_when<F>(&self, matcher: F) -> Arc<Notify>
    where
        F: Fn(&RequestDescriptor) -> bool + Send + Sync + 'static,
    {
        let gate = Arc::new(Notify::new());
        self.holds
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((Box::new(matcher), Arc::clone(&gate)));
        gate
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<RequestDescriptor> {
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Number of requests received for exactly `path`.
    pub fn count(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .filter(|r| r.path == path)
            .count()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(&self, request: &RequestDescriptor) -> Result<Response> {
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(request.clone());

        let gate = self
            .holds
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .find(|(matches, _)| matches(request))
            .map(|(_, gate)| Arc::clone(gate));
        if let Some(gate) = gate {
            gate.notified().await;
        }

        Ok((self.responder)(request))
    }
}

/// Push connector backed by in-memory channels.
pub struct MemoryConnector {
    attempts: Mutex<Vec<Instant>>,
    refuse: AtomicBool,
    servers: mpsc::UnboundedSender<MemoryServer>,
}

impl MemoryConnector {
    /// Connector plus the stream of server ends, one per accepted connection.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MemoryServer>) {
        let (servers, accepted) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            attempts: Mutex::new(Vec::new()),
            refuse: AtomicBool::new(false),
            servers,
        });
        (connector, accepted)
    }

    /// Fail every subsequent connection attempt.
    pub fn refuse_all(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    /// When each connection attempt was made.
    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl PushConnector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<PushConnection> {
        self.attempts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(Instant::now());

        if self.refuse.load(Ordering::SeqCst) {
            return Err(ClientError::Channel("connection refused".into()));
        }

        let (to_client, inbound) = frames::unbounded::<Result<String>>();
        let (outbound, from_client) = frames::unbounded::<String>();

        let server = MemoryServer {
            url: url.to_string(),
            to_client: Some(to_client),
            from_client,
        };
        if self.servers.send(server).is_err() {
            return Err(ClientError::Channel("no server accepting".into()));
        }

        let outbound =
            outbound.sink_map_err(|e| ClientError::Channel(format!("push send failed: {}", e)));
        Ok(PushConnection {
            outbound: Box::pin(outbound),
            inbound: Box::pin(inbound),
        })
    }
}

/// Server end of an in-memory push connection.
pub struct MemoryServer {
    url: String,
    to_client: Option<frames::UnboundedSender<Result<String>>>,
    from_client: frames::UnboundedReceiver<String>,
}

impl MemoryServer {
    /// URL the client connected with.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Deliver a text frame to the client.
    pub fn push(&self, text: impl Into<String>) {
        if let Some(ref to_client) = self.to_client {
            let _ = to_client.unbounded_send(Ok(text.into()));
        }
    }

    /// Close the connection from the server side.
    pub fn close(mut self) {
        self.to_client = None;
    }

    /// Next action sent by the client, parsed as JSON.
    pub async fn next_action(&mut self) -> Option<Value> {
        let text = self.from_client.next().await?;
        serde_json::from_str(&text).ok()
    }

    /// Resolves once the client has closed its sending half.
    pub async fn closed(&mut self) {
        while self.from_client.next().await.is_some() {}
    }
}
