//! Network collaborators: request transport and public IP discovery.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::{ClientConfig, IpDiscoveryConfig};
use crate::error::{BankError, BankResult};

/// One request/response round trip to the service.
///
/// Any error is fatal to the operation in progress; implementations must
/// not retry on their own.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, url: &str, body: String, headers: &[(String, String)])
        -> BankResult<Vec<u8>>;
}

/// Source of the caller's public IP, sent once at login.
#[async_trait]
pub trait IpDiscovery: Send + Sync {
    async fn public_ip(&self) -> BankResult<String>;
}

/// Transport over HTTPS using reqwest.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> BankResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http.timeout())
            .gzip(config.http.accept_gzip)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        url: &str,
        body: String,
        headers: &[(String, String)],
    ) -> BankResult<Vec<u8>> {
        let mut request = self.client.post(url).body(body);
        for (name, value) in headers {
            // reqwest only decompresses when it sets Accept-Encoding itself.
            if name.eq_ignore_ascii_case("accept-encoding") {
                continue;
            }
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            // SOAP faults arrive with 500; the body still has to be parsed.
            warn!(url = %url, status = status.as_u16(), "Non-success HTTP status");
        }

        let bytes = response.bytes().await?;
        debug!(url = %url, status = status.as_u16(), bytes = bytes.len(), "Response received");
        Ok(bytes.to_vec())
    }
}

/// Asks a plain-text "what is my IP" service.
pub struct HttpIpDiscovery {
    client: reqwest::Client,
    url: String,
}

impl HttpIpDiscovery {
    pub fn new(config: &ClientConfig) -> BankResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http.timeout())
            .build()?;
        Ok(Self {
            client,
            url: config.ip_discovery.url.clone(),
        })
    }
}

#[async_trait]
impl IpDiscovery for HttpIpDiscovery {
    async fn public_ip(&self) -> BankResult<String> {
        debug!(url = %self.url, "Discovering public IP");
        let ip = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?
            .trim()
            .to_string();

        if ip.is_empty() {
            return Err(BankError::Transport(format!(
                "empty response from IP discovery service {}",
                self.url
            )));
        }
        debug!(public_ip = %ip, "Public IP discovered");
        Ok(ip)
    }
}

/// A fixed public IP.
#[derive(Debug, Clone)]
pub struct StaticIp(pub String);

#[async_trait]
impl IpDiscovery for StaticIp {
    async fn public_ip(&self) -> BankResult<String> {
        Ok(self.0.clone())
    }
}

/// IP source selected by configuration: the override when set, else the
/// discovery service.
pub fn ip_discovery_from_config(config: &ClientConfig) -> BankResult<Box<dyn IpDiscovery>> {
    match &config.ip_discovery {
        IpDiscoveryConfig {
            public_ip: Some(ip),
            ..
        } => Ok(Box::new(StaticIp(ip.clone()))),
        _ => Ok(Box::new(HttpIpDiscovery::new(config)?)),
    }
}

#[async_trait]
impl<T: IpDiscovery + ?Sized> IpDiscovery for Box<T> {
    async fn public_ip(&self) -> BankResult<String> {
        (**self).public_ip().await
    }
}
