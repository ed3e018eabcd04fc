use std::path::Path;
use std::pin::pin;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{HeaderMap, Method, Request, Response, Uri, header};
use tokio::time::{Duration, timeout};

use crate::common::compression::{add_accept_encoding, decompress_stream, detect_encodings};
use crate::common::error::{DavError, Result};
use crate::common::http::{Auth, DavBody, Transport, build_transport};
use crate::webdav::resource::{Resource, push_resource};
use crate::webdav::status::{validate_exists, validate_response};
use crate::webdav::streaming::{MultistatusError, parse_multistatus_stream_visit};
use crate::webdav::transfer::{
    Download, ProgressListener, PutSource, borrow_listener, is_body_closed, upload_channel,
};
use crate::webdav::types::{Depth, PropertyRequest, PutOptions, QualifiedName};
use crate::webdav::xml::build_propfind_body;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

/// Everything a client is configured with. Fixed at construction.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub auth: Auth,
    /// Upper bound on waiting for the response head. Uploads are exempt once streaming.
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            auth: Auth::Anonymous,
            request_timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// WebDAV client. Cheap to clone; clones share the connection pool.
///
/// Operations take either absolute `http(s)://` URLs or paths resolved against the
/// base URL. Every operation is a single request: nothing is retried, and dropping
/// the returned future cancels the request.
#[derive(Clone)]
pub struct WebDavClient {
    base: Uri,
    transport: Transport,
    auth: Auth,
    auth_header: Option<header::HeaderValue>,
    request_timeout: Duration,
}

impl std::fmt::Debug for WebDavClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebDavClient")
            .field("base", &self.base)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl WebDavClient {
    /// Create a new client from a **base URL** and an authentication mode.
    ///
    /// The base may be `https://` **or** `http://` (both are supported by the connector).
    pub fn new(base_url: &str, auth: Auth) -> Result<Self> {
        Self::with_config(
            base_url,
            ClientConfig {
                auth,
                ..ClientConfig::default()
            },
        )
    }

    pub fn with_config(base_url: &str, config: ClientConfig) -> Result<Self> {
        let base: Uri = base_url.parse()?;
        let transport = build_transport(&config.auth)?;
        let auth_header = config.auth.authorization()?;

        Ok(Self {
            base,
            transport,
            auth: config.auth,
            auth_header,
            request_timeout: config.request_timeout,
        })
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn build_uri(&self, path: &str) -> Result<Uri> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Ok(path.parse()?);
        }

        let mut parts = self.base.clone().into_parts();
        let existing_path = parts
            .path_and_query
            .as_ref()
            .map(|pq| pq.path())
            .unwrap_or("/");

        let (path_only, query) = if let Some((p, q)) = path.split_once('?') {
            (p, Some(q))
        } else {
            (path, None)
        };

        let mut combined = if path_only.is_empty() {
            existing_path.to_string()
        } else if path_only.starts_with('/') {
            path_only.to_string()
        } else {
            let mut base = existing_path.trim_end_matches('/').to_string();
            base.push('/');
            base.push_str(path_only);
            base
        };

        if combined.is_empty() {
            combined.push('/');
        }

        let path_and_query = if let Some(q) = query {
            format!("{}?{}", combined, q).parse()?
        } else {
            combined.parse()?
        };

        parts.path_and_query = Some(path_and_query);
        Ok(Uri::from_parts(parts)?)
    }

    // ----------- Request plumbing -----------

    /// Assemble a request. Derived headers go first; `extra` is merged last and
    /// replaces any derived header with the same name.
    fn build_request(
        &self,
        method: Method,
        uri: Uri,
        mut headers: HeaderMap,
        extra: HeaderMap,
        body: DavBody,
    ) -> Result<Request<DavBody>> {
        if let Some(auth) = &self.auth_header {
            headers.insert(header::AUTHORIZATION, auth.clone());
        }
        headers.extend(extra);

        let mut req = Request::builder().method(method).uri(uri).body(body)?;
        *req.headers_mut() = headers;
        Ok(req)
    }

    /// Hand a request to the transport, bounded by `limit` while waiting for the response head.
    async fn dispatch(
        &self,
        req: Request<DavBody>,
        target: &str,
        limit: Option<Duration>,
    ) -> Result<Response<Incoming>> {
        tracing::debug!(method = %req.method(), uri = %target, "sending request");
        let fut = self.transport.request(req);
        let resp = match limit {
            Some(limit) => timeout(limit, fut).await.map_err(|_| DavError::Timeout {
                url: target.to_string(),
            })??,
            None => fut.await?,
        };
        tracing::debug!(uri = %target, status = %resp.status(), "received response");
        Ok(resp)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        headers: HeaderMap,
        extra: HeaderMap,
        body: DavBody,
    ) -> Result<(String, Response<Incoming>)> {
        let uri = self.build_uri(path)?;
        let target = uri.to_string();
        let req = self.build_request(method, uri, headers, extra, body)?;
        let resp = self
            .dispatch(req, &target, Some(self.request_timeout))
            .await?;
        Ok((target, resp))
    }

    // ----------- PROPFIND -----------

    /// List `url` with `PROPFIND`.
    ///
    /// The result includes the resource itself followed by its members down to `depth`
    /// (negative depths mean infinity). Entries with an unusable href are skipped.
    pub async fn list(
        &self,
        url: &str,
        depth: impl Into<Depth>,
        request: PropertyRequest,
    ) -> Result<Vec<Resource>> {
        let body = build_propfind_body(&request);
        self.propfind_resources(url, depth.into(), body).await
    }

    /// `list(url, 1, AllProps)`.
    pub async fn list_all(&self, url: &str) -> Result<Vec<Resource>> {
        self.list(url, Depth::One, PropertyRequest::AllProps).await
    }

    /// `PROPFIND` asking for exactly `properties`.
    pub async fn propfind(
        &self,
        url: &str,
        depth: impl Into<Depth>,
        properties: &[QualifiedName],
    ) -> Result<Vec<Resource>> {
        self.list(url, depth, PropertyRequest::Exact(properties.to_vec()))
            .await
    }

    async fn propfind_resources(
        &self,
        url: &str,
        depth: Depth,
        body: String,
    ) -> Result<Vec<Resource>> {
        let mut h = HeaderMap::new();
        h.insert("Depth", header::HeaderValue::from_str(&depth.as_header())?);
        h.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static(XML_CONTENT_TYPE),
        );
        add_accept_encoding(&mut h);

        let (target, resp) = self
            .send(propfind_method()?, url, h, HeaderMap::new(), full_body(body))
            .await?;
        validate_response(&target, resp.status())?;

        let encodings = detect_encodings(resp.headers());
        let mut resources = Vec::new();
        parse_multistatus_stream_visit(resp.into_body(), &encodings, |response| {
            push_resource(&mut resources, response);
            Ok(())
        })
        .await
        .map_err(|err| multistatus_error(&target, err))?;

        Ok(resources)
    }

    /// `PROPFIND` with depth 0 and no body: `true` on 2xx, `false` on 404.
    pub async fn exists(&self, url: &str) -> Result<bool> {
        let mut h = HeaderMap::new();
        h.insert("Depth", header::HeaderValue::from_str(&Depth::Zero.as_header())?);
        let (target, resp) = self
            .send(propfind_method()?, url, h, HeaderMap::new(), empty_body())
            .await?;
        validate_exists(&target, resp.status())
    }

    // ----------- Collections and namespace operations -----------

    /// Send a WebDAV `MKCOL`.
    pub async fn create_directory(&self, url: &str) -> Result<()> {
        let (target, resp) = self
            .send(
                Method::from_bytes(b"MKCOL")?,
                url,
                HeaderMap::new(),
                HeaderMap::new(),
                empty_body(),
            )
            .await?;
        validate_response(&target, resp.status())
    }

    /// Send a `DELETE`. Collections need their trailing slash on most servers.
    pub async fn delete(&self, url: &str, headers: HeaderMap) -> Result<()> {
        let (target, resp) = self
            .send(Method::DELETE, url, HeaderMap::new(), headers, empty_body())
            .await?;
        validate_response(&target, resp.status())
    }

    /// Send a WebDAV `MOVE`. Failures report the destination URL.
    pub async fn r#move(
        &self,
        src: &str,
        dst: &str,
        overwrite: bool,
        headers: HeaderMap,
    ) -> Result<()> {
        self.transfer_to(Method::from_bytes(b"MOVE")?, src, dst, overwrite, headers)
            .await
    }

    /// Send a WebDAV `COPY`. Failures report the destination URL.
    pub async fn copy(
        &self,
        src: &str,
        dst: &str,
        overwrite: bool,
        headers: HeaderMap,
    ) -> Result<()> {
        self.transfer_to(Method::from_bytes(b"COPY")?, src, dst, overwrite, headers)
            .await
    }

    async fn transfer_to(
        &self,
        method: Method,
        src: &str,
        dst: &str,
        overwrite: bool,
        headers: HeaderMap,
    ) -> Result<()> {
        let destination = self.build_uri(dst)?.to_string();
        let mut h = HeaderMap::new();
        h.insert("Destination", header::HeaderValue::from_str(&destination)?);
        h.insert(
            "Overwrite",
            header::HeaderValue::from_static(if overwrite { "T" } else { "F" }),
        );
        let (_, resp) = self.send(method, src, h, headers, empty_body()).await?;
        validate_response(&destination, resp.status())
    }

    // ----------- Payload transfer -----------

    /// `GET` `url` and pass the streaming body to `block`.
    ///
    /// The body is never buffered by the client; `block` decides whether to stream it
    /// somewhere ([`Download::copy_to`]) or collect it. Progress, when requested, is
    /// reported as `block` reads through [`Download::copy_to`].
    pub async fn get<T, F, Fut>(
        &self,
        url: &str,
        headers: HeaderMap,
        progress: Option<ProgressListener>,
        block: F,
    ) -> Result<T>
    where
        F: FnOnce(Download) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let (target, resp) = self
            .send(Method::GET, url, HeaderMap::new(), headers, empty_body())
            .await?;
        validate_response(&target, resp.status())?;

        let encodings = detect_encodings(resp.headers());
        let content_length = if encodings.is_empty() {
            resp.headers()
                .get(header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
        } else {
            None
        };

        let (parts, body) = resp.into_parts();
        let reader = decompress_stream(body, &encodings);
        let download = Download::new(
            parts.status,
            parts.headers,
            content_length,
            reader,
            progress,
        );
        block(download).await.map_err(DavError::Callback)
    }

    /// `PUT` the payload of `source` to `url`.
    ///
    /// Without `options.content_length` the body is sent with chunked transfer encoding
    /// and no `Content-Length` header; with it, at most that many bytes are read from the
    /// source. Only [`PutSource::is_repeatable`] sources may be sent again after a failure.
    pub async fn put(
        &self,
        url: &str,
        source: PutSource,
        options: PutOptions,
        mut progress: Option<ProgressListener>,
    ) -> Result<()> {
        let uri = self.build_uri(url)?;
        let target = uri.to_string();

        let mut h = HeaderMap::new();
        if let Some(content_type) = &options.content_type {
            h.insert(
                header::CONTENT_TYPE,
                header::HeaderValue::from_str(content_type)?,
            );
        }
        if let Some(length) = options.content_length {
            h.insert(header::CONTENT_LENGTH, header::HeaderValue::from(length));
        }
        if options.expect_continue {
            h.insert(
                header::EXPECT,
                header::HeaderValue::from_static("100-continue"),
            );
        }

        let (writer, body, abort) = upload_channel();
        let req = self.build_request(Method::PUT, uri, h, options.headers, body.boxed())?;

        let limit = options.content_length;
        let upload = async {
            match source
                .write_to(writer, limit, borrow_listener(&mut progress))
                .await
            {
                Ok(sent) => {
                    drop(abort);
                    Ok(sent)
                }
                Err(err) => {
                    abort
                        .abort(std::io::Error::other(err.to_string()))
                        .await;
                    Err(err)
                }
            }
        };

        let mut response = pin!(self.dispatch(req, &target, None));
        let mut upload = pin!(upload);
        // The body may stream for as long as it needs; the timeout starts once it is sent.
        let (response, uploaded) = tokio::select! {
            response = &mut response => (response, upload.await),
            uploaded = &mut upload => {
                let response = match timeout(self.request_timeout, response).await {
                    Ok(response) => response,
                    Err(_) => Err(DavError::Timeout { url: target.clone() }),
                };
                (response, uploaded)
            }
        };

        match (response, uploaded) {
            (Ok(resp), Ok(sent)) => {
                tracing::debug!(uri = %target, bytes = sent, "upload finished");
                validate_response(&target, resp.status())
            }
            (Ok(resp), Err(err)) => {
                validate_response(&target, resp.status())?;
                Err(err)
            }
            (Err(err), Ok(_)) => Err(err),
            (Err(err), Err(upload_err)) if is_body_closed(&upload_err) => Err(err),
            // An aborted body surfaces as a transport error; the upload error is the cause.
            (Err(_), Err(err)) => Err(err),
        }
    }

    /// `PUT` an in-memory buffer with its length declared.
    pub async fn put_bytes(
        &self,
        url: &str,
        data: impl Into<Bytes>,
        content_type: Option<&str>,
    ) -> Result<()> {
        let data = data.into();
        let options = PutOptions {
            content_type: content_type.map(str::to_string),
            content_length: Some(data.len() as u64),
            ..PutOptions::default()
        };
        self.put(url, PutSource::Bytes(data), options, None).await
    }

    /// `PUT` a local file, declaring its size from the file metadata.
    pub async fn put_file(
        &self,
        url: &str,
        path: impl AsRef<Path>,
        content_type: Option<&str>,
        expect_continue: bool,
        progress: Option<ProgressListener>,
    ) -> Result<()> {
        let source = PutSource::file(path.as_ref());
        let options = PutOptions {
            content_type: content_type.map(str::to_string),
            expect_continue,
            content_length: Some(tokio::fs::metadata(path.as_ref()).await?.len()),
            ..PutOptions::default()
        };
        self.put(url, source, options, progress).await
    }
}

fn propfind_method() -> Result<Method> {
    Ok(Method::from_bytes(b"PROPFIND")?)
}

fn full_body(payload: impl Into<Bytes>) -> DavBody {
    Full::new(payload.into())
        .map_err(|never| match never {})
        .boxed()
}

fn empty_body() -> DavBody {
    full_body(Bytes::new())
}

fn multistatus_error(url: &str, err: MultistatusError) -> DavError {
    match err {
        MultistatusError::Io(source) => DavError::Body {
            url: url.to_string(),
            source,
        },
        other => DavError::MalformedResponse {
            url: url.to_string(),
            reason: other.to_string(),
        },
    }
}
