use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use hyper::header::HeaderValue;
use hyper::{Request, Uri};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::connect::proxy::Tunnel;
use hyper_util::client::legacy::{Client, ResponseFuture};
use hyper_util::rt::TokioExecutor;

use crate::common::error::{DavError, Result};

/// Request body shared by fixed XML payloads and streamed uploads.
pub type DavBody = BoxBody<Bytes, std::io::Error>;

/// Hyper client talking to the origin directly.
pub type HyperClient = Client<HttpsConnector<HttpConnector>, DavBody>;

/// Hyper client that reaches the origin through a `CONNECT` tunnel.
pub type ProxiedHyperClient = Client<HttpsConnector<Tunnel<HttpConnector>>, DavBody>;

/// HTTP proxy used by [`Auth::BasicViaProxy`].
#[derive(Debug, Clone)]
pub struct Proxy {
    uri: Uri,
    authorization: Option<HeaderValue>,
}

impl Proxy {
    pub fn new(proxy_url: &str) -> Result<Self> {
        Ok(Self {
            uri: proxy_url.parse()?,
            authorization: None,
        })
    }

    /// Send `Proxy-Authorization: Basic ...` when opening the tunnel.
    pub fn with_basic_auth(mut self, username: &str, password: &str) -> Result<Self> {
        self.authorization = Some(basic_header(username, password)?);
        Ok(self)
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }
}

/// How requests authenticate against the server. Fixed for the lifetime of a client.
#[derive(Debug, Clone, Default)]
pub enum Auth {
    #[default]
    Anonymous,
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        password: String,
    },
    BasicViaProxy {
        username: String,
        password: String,
        proxy: Proxy,
    },
}

impl Auth {
    pub fn bearer(token: impl Into<String>) -> Self {
        Auth::Bearer {
            token: token.into(),
        }
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Auth::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    /// `Authorization` header value sent with every request, if any.
    pub fn authorization(&self) -> Result<Option<HeaderValue>> {
        match self {
            Auth::Anonymous => Ok(None),
            Auth::Bearer { token } => {
                let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
                value.set_sensitive(true);
                Ok(Some(value))
            }
            Auth::Basic { username, password }
            | Auth::BasicViaProxy {
                username, password, ..
            } => Ok(Some(basic_header(username, password)?)),
        }
    }

    pub fn proxy(&self) -> Option<&Proxy> {
        match self {
            Auth::BasicViaProxy { proxy, .. } => Some(proxy),
            _ => None,
        }
    }
}

fn basic_header(username: &str, password: &str) -> Result<HeaderValue> {
    let token = format!("{}:{}", username, password);
    let mut value = HeaderValue::from_str(&format!("Basic {}", B64.encode(token)))?;
    value.set_sensitive(true);
    Ok(value)
}

/// Pooled transport selected once from the [`Auth`] variant.
#[derive(Clone)]
pub enum Transport {
    Direct(HyperClient),
    Proxied(ProxiedHyperClient),
}

impl Transport {
    pub fn request(&self, req: Request<DavBody>) -> ResponseFuture {
        match self {
            Transport::Direct(client) => client.request(req),
            Transport::Proxied(client) => client.request(req),
        }
    }
}

/// Build the transport for `auth`: a direct connector, or a tunnelling one when a proxy is set.
pub fn build_transport(auth: &Auth) -> Result<Transport> {
    match auth.proxy() {
        None => Ok(Transport::Direct(build_hyper_client()?)),
        Some(proxy) => Ok(Transport::Proxied(build_proxied_client(proxy)?)),
    }
}

/// Build a Hyper client configured with HTTP/2, connection pooling, and a TLS connector
/// that prefers native roots but falls back to the bundled WebPKI store.
pub fn build_hyper_client() -> Result<HyperClient> {
    let https = https_builder()
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .build();

    Ok(Client::builder(TokioExecutor::new())
        .http2_adaptive_window(true)
        .pool_max_idle_per_host(128)
        .build::<_, DavBody>(https))
}

fn build_proxied_client(proxy: &Proxy) -> Result<ProxiedHyperClient> {
    if proxy.uri.host().is_none() {
        return Err(DavError::invalid(format!(
            "proxy URL {} has no host",
            proxy.uri
        )));
    }

    let mut tunnel = Tunnel::new(proxy.uri.clone(), HttpConnector::new());
    if let Some(auth) = &proxy.authorization {
        tunnel = tunnel.with_auth(auth.clone());
    }

    let https = https_builder()
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .wrap_connector(tunnel);

    Ok(Client::builder(TokioExecutor::new())
        .http2_adaptive_window(true)
        .pool_max_idle_per_host(128)
        .build::<_, DavBody>(https))
}

fn https_builder() -> HttpsConnectorBuilder<hyper_rustls::builderstates::WantsSchemes> {
    HttpsConnectorBuilder::new()
        .with_native_roots()
        .unwrap_or_else(|err| {
            tracing::debug!("falling back to webpki roots (native roots unavailable: {err})");
            HttpsConnectorBuilder::new().with_webpki_roots()
        })
}
