// reqwest-backed controller transport.
//
// TLS uses rustls with optional extra trust material. A relative truststore
// path resolves against the agent installation directory — the instrumented
// application's working directory is untrusted and unknown.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::debug;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Certificate, Client};

use super::message::DestinationVerb;
use super::sender::{AgentMessageTransport, TransportConfig, TransportError};

const API_KEY_HEADER: &str = "X-Api-Key";

/// HTTP exchange with the controller.
pub struct HttpAgentMessageTransport {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpAgentMessageTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        if config.controller_address.is_empty() {
            return Err(TransportError::Address("empty controller address".into()));
        }

        let mut builder = Client::builder()
            .use_rustls_tls()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout);

        if let Some(truststore) = &config.truststore {
            let resolved = resolve_truststore_path(truststore, &config.installation_dir);
            debug!("configure: loading trust material from {:?}", resolved);
            let pem = std::fs::read(&resolved)?;
            builder = builder.add_root_certificate(Certificate::from_pem(&pem)?);
        }

        Ok(HttpAgentMessageTransport {
            client: builder.build()?,
            base_url: config.controller_address.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl AgentMessageTransport for HttpAgentMessageTransport {
    async fn exchange(
        &self,
        verb: DestinationVerb,
        path: &str,
        body: &[u8],
    ) -> Result<u16, TransportError> {
        let url = format!("{}/{}", self.base_url, path);
        let mut request = match verb {
            DestinationVerb::Post => self.client.post(&url),
            DestinationVerb::Put => self.client.put(&url),
        };
        request = request
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_vec());
        if let Some(api_key) = &self.api_key {
            request = request.header(API_KEY_HEADER, api_key);
        }
        let response = request.send().await?;
        Ok(response.status().as_u16())
    }
}

/// Resolves the configured trust-store path.
///
/// An existing path passes through; a relative non-existing path is joined
/// to the installation directory, never to the process working directory.
pub fn resolve_truststore_path(path: &Path, installation_dir: &Path) -> PathBuf {
    if path.exists() || path.is_absolute() {
        path.to_path_buf()
    } else {
        installation_dir.join(path)
    }
}
