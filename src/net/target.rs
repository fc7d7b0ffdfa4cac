//! The fixed upstream target, derived once from configuration.

use axum::http::uri::{Authority, Scheme};
use url::{Host, Url};

/// Transport security of the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetScheme {
    Plain,
    Tls,
}

impl TargetScheme {
    pub fn default_port(self) -> u16 {
        match self {
            TargetScheme::Plain => 80,
            TargetScheme::Tls => 443,
        }
    }

    /// HTTP scheme used for pass-through requests.
    pub fn http_scheme(self) -> Scheme {
        match self {
            TargetScheme::Plain => Scheme::HTTP,
            TargetScheme::Tls => Scheme::HTTPS,
        }
    }
}

/// Error building an [`UpstreamTarget`].
#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    #[error("invalid upstream url: {0}")]
    Parse(#[from] url::ParseError),

    #[error("unsupported upstream scheme `{0}`")]
    Scheme(String),

    #[error("upstream url has no host")]
    MissingHost,

    #[error("invalid upstream authority `{0}`")]
    Authority(String),
}

/// Scheme, host and port of the single upstream. Immutable for the process lifetime.
#[derive(Debug, Clone)]
pub struct UpstreamTarget {
    scheme: TargetScheme,
    host: String,
    port: u16,
    authority: Authority,
    base_path: String,
    base_query: Option<String>,
}

impl UpstreamTarget {
    pub fn parse(url: &str) -> Result<Self, TargetError> {
        Self::from_url(&Url::parse(url)?)
    }

    pub fn from_url(url: &Url) -> Result<Self, TargetError> {
        let scheme = match url.scheme() {
            "http" | "ws" => TargetScheme::Plain,
            "https" | "wss" => TargetScheme::Tls,
            other => return Err(TargetError::Scheme(other.to_string())),
        };

        let host = match url.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => return Err(TargetError::MissingHost),
        };

        // Host header form: brackets kept for IPv6, port only when given explicitly.
        let host_str = url.host_str().ok_or(TargetError::MissingHost)?;
        let authority = match url.port() {
            Some(port) => format!("{host_str}:{port}"),
            None => host_str.to_string(),
        };
        let authority =
            Authority::try_from(authority.as_str()).map_err(|_| TargetError::Authority(authority))?;

        Ok(Self {
            scheme,
            port: url.port().unwrap_or(scheme.default_port()),
            host,
            authority,
            base_path: url.path().to_string(),
            base_query: url.query().map(str::to_string),
        })
    }

    pub fn scheme(&self) -> TargetScheme {
        self.scheme
    }

    /// Host to dial and to present as TLS server name.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Value for the `Host` header sent to the upstream.
    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// `host:port` for logs and errors.
    pub fn dial_address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn base_query(&self) -> Option<&str> {
        self.base_query.as_deref()
    }
}
