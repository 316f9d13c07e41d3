//! HTTP transport used to POST push requests.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
use ureq::{Agent, AgentBuilder};

use crate::config::{AuthConfig, LokiConfig};
use crate::error::{ConfigError, TransportError};

/// Seam between the delivery client and the network.
///
/// `push` returns the HTTP status for any response the server sent, success
/// or not; only failures below the HTTP layer are errors.
pub trait PushTransport: Send + Sync {
    fn push(&self, body: &[u8], timeout: Option<Duration>) -> Result<u16, TransportError>;
}

/// [`PushTransport`] backed by a pooled `ureq` agent.
pub struct UreqTransport {
    agent: Agent,
    url: String,
    headers: Vec<(String, String)>,
    authorization: Option<String>,
}

impl UreqTransport {
    pub fn new(config: &LokiConfig) -> Result<Self, ConfigError> {
        let mut builder = AgentBuilder::new()
            .timeout_connect(config.connect_timeout)
            .timeout_read(config.read_timeout);
        if config.use_tls {
            let connector = native_tls::TlsConnector::new().map_err(|err| {
                ConfigError::InvalidConfig(format!("failed to initialise TLS: {err}"))
            })?;
            builder = builder.tls_connector(Arc::new(connector));
        }
        Ok(Self {
            agent: builder.build(),
            url: config.push_url(),
            headers: config
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            authorization: authorization_header(&config.auth),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn authorization_header(auth: &AuthConfig) -> Option<String> {
    match auth {
        AuthConfig::None => None,
        AuthConfig::Basic { username, password } => {
            let encoded = BASE64_STANDARD.encode(format!("{username}:{password}"));
            Some(format!("Basic {encoded}"))
        }
        AuthConfig::Bearer { token } => Some(format!("Bearer {token}")),
    }
}

/// Read the body to the end so the connection returns to the agent's pool.
fn discard_body(response: ureq::Response) -> u16 {
    let status = response.status();
    let _ = io::copy(&mut response.into_reader(), &mut io::sink());
    status
}

impl PushTransport for UreqTransport {
    fn push(&self, body: &[u8], timeout: Option<Duration>) -> Result<u16, TransportError> {
        let mut req = self
            .agent
            .post(&self.url)
            .set("Content-Type", "application/json");
        if let Some(auth) = &self.authorization {
            req = req.set("Authorization", auth);
        }
        for (key, value) in &self.headers {
            req = req.set(key, value);
        }
        if let Some(timeout) = timeout {
            req = req.timeout(timeout);
        }
        match req.send_bytes(body) {
            Ok(response) => Ok(discard_body(response)),
            Err(ureq::Error::Status(_, response)) => Ok(discard_body(response)),
            Err(ureq::Error::Transport(err)) => Err(TransportError(err.to_string())),
        }
    }
}

impl std::fmt::Debug for UreqTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UreqTransport")
            .field("url", &self.url)
            .field("headers", &self.headers.len())
            .field("authorization", &self.authorization.is_some())
            .finish()
    }
}
