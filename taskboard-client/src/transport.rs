//! HTTP transport
//!
//! Single responsibility: put one descriptor on the wire and return whatever
//! came back. No knowledge of credentials, renewal or challenges; every
//! status is a successful exchange at this layer.

use async_trait::async_trait;
use reqwest::{header, Client};
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::request::{RequestDescriptor, Response};

/// Dispatches fully prepared requests.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: &RequestDescriptor) -> Result<Response>;
}

/// `reqwest`-backed transport.
///
/// The cookie store is enabled so the refresh credential set by the login
/// endpoint rides along with the renewal call.
pub struct ReqwestTransport {
    client: Client,
    config: ClientConfig,
}

impl ReqwestTransport {
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .cookie_store(true)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: &RequestDescriptor) -> Result<Response> {
        let url = self.config.url_for(&request.path);
        debug!(method = %request.method, url = %url, "Dispatching request");

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(request.headers.clone());
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        debug!(status = status, url = %url, "Response received");
        Ok(Response {
            status,
            headers,
            body,
        })
    }
}
