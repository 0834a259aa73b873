//! Configuration types for the Openbank client.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::BankResult;

/// Main configuration for the Openbank client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Config version
    pub version: String,

    /// Service endpoints
    pub endpoints: EndpointsConfig,

    /// Fixed protocol header (`datosCabecera`) values
    pub protocol: ProtocolConfig,

    /// HTTP settings
    pub http: HttpConfig,

    /// Public IP discovery used at login
    pub ip_discovery: IpDiscoveryConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            endpoints: EndpointsConfig::default(),
            protocol: ProtocolConfig::default(),
            http: HttpConfig::default(),
            ip_discovery: IpDiscoveryConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> BankResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> BankResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn login_url(&self) -> String {
        self.endpoints.url(&self.endpoints.login_path)
    }

    pub fn products_url(&self) -> String {
        self.endpoints.url(&self.endpoints.products_path)
    }

    pub fn transactions_url(&self) -> String {
        self.endpoints.url(&self.endpoints.transactions_path)
    }

    /// Fixed headers sent with every request.
    pub fn request_headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            (
                "Content-Type".to_string(),
                "text/xml; charset=utf-8".to_string(),
            ),
            ("User-Agent".to_string(), self.http.user_agent.clone()),
            ("Host".to_string(), self.http.host.clone()),
            ("Connection".to_string(), "Keep-Alive".to_string()),
        ];
        if self.http.accept_gzip {
            headers.push(("Accept-Encoding".to_string(), "gzip".to_string()));
        }
        headers
    }
}

/// Service endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    /// Scheme and host all paths are joined to
    pub base_url: String,

    /// Path of the `authenticateCredential` listener
    pub login_path: String,

    /// Path of the `obtenerPosGlobal_LIP` listener
    pub products_path: String,

    /// Path of the `listaMovCuentasFechas_LIP` listener
    pub transactions_path: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.openbank.mobi".to_string(),
            login_path: "/OPBMOV_IPAD_NSeg_ENS/ws/QUIZ_Def_Listener".to_string(),
            products_path: "/OPB_BAMOBI_WS_ENS/ws/BAMOBI_WS_Def_Listener".to_string(),
            transactions_path: "/OPB_BAMOBI_WS_ENS/ws/BAMOBI_WS_Def_Listener".to_string(),
        }
    }
}

impl EndpointsConfig {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// Values of the `datosCabecera` block embedded in every envelope body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Client protocol version
    pub version: String,

    /// Terminal identifier
    pub terminal_id: String,

    /// Locale
    pub locale: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            version: "3.0.4".to_string(),
            terminal_id: "Android".to_string(),
            locale: "es-ES".to_string(),
        }
    }
}

/// HTTP settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// User-Agent header
    pub user_agent: String,

    /// Host header
    pub host: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Advertise gzip support
    pub accept_gzip: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: "Dalvik/1.6.0 (Linux; U; Android 4.4.4; XT1032 Build/KXB21.14-L1.40)"
                .to_string(),
            host: "www.openbank.mobi".to_string(),
            timeout_secs: 30,
            accept_gzip: true,
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Public IP discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpDiscoveryConfig {
    /// Service returning the caller's public IP as plain text
    pub url: String,

    /// Fixed address to use instead of asking the service
    pub public_ip: Option<String>,
}

impl Default for IpDiscoveryConfig {
    fn default() -> Self {
        Self {
            url: "http://api.ipify.org".to_string(),
            public_ip: None,
        }
    }
}
