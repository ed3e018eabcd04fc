//! Streaming `207 Multi-Status` parser.
//!
//! The body is read event by event with a namespace-aware reader; each
//! `response` entry is handed to a consumer as soon as its end tag is seen,
//! so arbitrarily large listings never sit in memory as a whole document.

use std::collections::BTreeMap;
use std::io::{BufRead, Cursor};

use hyper::body::Incoming;
use quick_xml::NsReader;
use quick_xml::escape::{resolve_predefined_entity, unescape};
use quick_xml::events::{BytesRef, BytesStart, Event};
use quick_xml::name::ResolveResult;
use thiserror::Error;

use crate::common::compression::{ContentEncoding, decompress_stream};
use crate::webdav::types::QualifiedName;
use crate::webdav::xml::{DAV_NAMESPACE, escape_xml};

/// Failure to read a body as a multistatus document.
#[derive(Debug, Error)]
pub enum MultistatusError {
    #[error("XML parsing error: {0}")]
    Xml(String),
    #[error("root element is not DAV:multistatus")]
    NotMultistatus,
    #[error("I/O error while reading body: {0}")]
    Io(#[from] std::io::Error),
    #[error("consumer rejected entry: {0}")]
    Consumer(String),
}

impl From<quick_xml::Error> for MultistatusError {
    fn from(err: quick_xml::Error) -> Self {
        match err {
            quick_xml::Error::Io(io) => {
                MultistatusError::Io(std::io::Error::new(io.kind(), io.to_string()))
            }
            other => MultistatusError::Xml(other.to_string()),
        }
    }
}

/// Parsed `multistatus` document.
#[derive(Debug, Clone, Default)]
pub struct MultistatusDocument {
    pub responses: Vec<DavResponse>,
    /// Top-level `sync-token`, present in sync-collection style responses.
    pub sync_token: Option<String>,
}

/// One `response` entry, exactly as the server reported it.
#[derive(Debug, Clone, Default)]
pub struct DavResponse {
    pub hrefs: Vec<String>,
    /// Response-level status line, used instead of `propstat` by some servers.
    pub status: Option<String>,
    pub propstats: Vec<Propstat>,
    pub description: Option<String>,
}

/// A `propstat` pair: one status line and the properties it applies to.
#[derive(Debug, Clone, Default)]
pub struct Propstat {
    pub status: Option<String>,
    pub prop: PropValues,
}

/// Raw (still textual) property values of one `prop` element.
#[derive(Debug, Clone, Default)]
pub struct PropValues {
    pub creation_date: Option<String>,
    pub display_name: Option<String>,
    pub content_language: Option<String>,
    pub content_length: Option<String>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub is_collection: bool,
    /// Children of `resourcetype` other than `collection`.
    pub resource_types: Vec<QualifiedName>,
    pub lock_tokens: Vec<String>,
    pub quota_used_bytes: Option<String>,
    pub quota_available_bytes: Option<String>,
    pub supported_reports: Vec<QualifiedName>,
    pub owner: Option<String>,
    pub principal_url: Option<String>,
    /// Every other property, keyed by qualified name, as text or serialized inner XML.
    pub custom: BTreeMap<QualifiedName, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementName {
    Multistatus,
    Response,
    Propstat,
    Prop,
    Href,
    Status,
    Responsedescription,
    SyncToken,
    Creationdate,
    Displayname,
    Getcontentlanguage,
    Getcontentlength,
    Getcontenttype,
    Getetag,
    Getlastmodified,
    Resourcetype,
    Collection,
    Lockdiscovery,
    Activelock,
    Locktoken,
    Supportedlock,
    QuotaAvailableBytes,
    QuotaUsedBytes,
    SupportedReportSet,
    SupportedReport,
    Report,
    Owner,
    PrincipalUrl,
    Other,
}

impl ElementName {
    /// Elements that are recognised as properties when they appear directly under `prop`.
    fn is_known_property(self) -> bool {
        !matches!(
            self,
            ElementName::Multistatus
                | ElementName::Response
                | ElementName::Propstat
                | ElementName::Prop
                | ElementName::Href
                | ElementName::Status
                | ElementName::Responsedescription
                | ElementName::Collection
                | ElementName::Activelock
                | ElementName::Locktoken
                | ElementName::SupportedReport
                | ElementName::Report
                | ElementName::Other
        )
    }
}

/// Classify an element. Elements outside the `DAV:` namespace are always [`ElementName::Other`];
/// elements without any namespace are accepted as DAV elements for lenient servers.
pub fn element_from_bytes(namespace: Option<&[u8]>, local: &[u8]) -> ElementName {
    if let Some(ns) = namespace
        && ns != DAV_NAMESPACE.as_bytes()
    {
        return ElementName::Other;
    }

    match local {
        b"multistatus" => ElementName::Multistatus,
        b"response" => ElementName::Response,
        b"propstat" => ElementName::Propstat,
        b"prop" => ElementName::Prop,
        b"href" => ElementName::Href,
        b"status" => ElementName::Status,
        b"responsedescription" => ElementName::Responsedescription,
        b"sync-token" => ElementName::SyncToken,
        b"creationdate" => ElementName::Creationdate,
        b"displayname" => ElementName::Displayname,
        b"getcontentlanguage" => ElementName::Getcontentlanguage,
        b"getcontentlength" => ElementName::Getcontentlength,
        b"getcontenttype" => ElementName::Getcontenttype,
        b"getetag" => ElementName::Getetag,
        b"getlastmodified" => ElementName::Getlastmodified,
        b"resourcetype" => ElementName::Resourcetype,
        b"collection" => ElementName::Collection,
        b"lockdiscovery" => ElementName::Lockdiscovery,
        b"activelock" => ElementName::Activelock,
        b"locktoken" => ElementName::Locktoken,
        b"supportedlock" => ElementName::Supportedlock,
        b"quota-available-bytes" => ElementName::QuotaAvailableBytes,
        b"quota-used-bytes" => ElementName::QuotaUsedBytes,
        b"supported-report-set" => ElementName::SupportedReportSet,
        b"supported-report" => ElementName::SupportedReport,
        b"report" => ElementName::Report,
        b"owner" => ElementName::Owner,
        b"principal-URL" => ElementName::PrincipalUrl,
        _ => ElementName::Other,
    }
}

pub(crate) trait ResponseConsumer {
    fn consume(&mut self, response: DavResponse) -> anyhow::Result<()>;
}

impl ResponseConsumer for Vec<DavResponse> {
    fn consume(&mut self, response: DavResponse) -> anyhow::Result<()> {
        self.push(response);
        Ok(())
    }
}

impl<F> ResponseConsumer for F
where
    F: FnMut(DavResponse) -> anyhow::Result<()>,
{
    fn consume(&mut self, response: DavResponse) -> anyhow::Result<()> {
        (self)(response)
    }
}

/// Custom property being collected verbatim.
struct Capture {
    name: QualifiedName,
    /// Stack depth of the property element itself.
    depth: usize,
    text: String,
    markup: String,
    has_children: bool,
}

pub(crate) struct MultistatusParser<C> {
    stack: Vec<ElementName>,
    current: DavResponse,
    propstat: Propstat,
    capture: Option<Capture>,
    sync_token: Option<String>,
    seen_root: bool,
    sink: C,
}

impl<C: ResponseConsumer> MultistatusParser<C> {
    pub fn new(sink: C) -> Self {
        Self {
            stack: Vec::with_capacity(16),
            current: DavResponse::default(),
            propstat: Propstat::default(),
            capture: None,
            sync_token: None,
            seen_root: false,
            sink,
        }
    }

    fn finish(self) -> Result<(C, Option<String>), MultistatusError> {
        if !self.seen_root {
            return Err(MultistatusError::NotMultistatus);
        }
        if !self.stack.is_empty() {
            return Err(MultistatusError::Xml(
                "unexpected end of document".to_string(),
            ));
        }
        Ok((self.sink, self.sync_token.map(|t| t.trim().to_string())))
    }

    fn path_ends_with(&self, needle: &[ElementName]) -> bool {
        self.stack.len() >= needle.len()
            && self.stack[self.stack.len() - needle.len()..] == needle[..]
    }

    fn in_prop(&self) -> bool {
        self.path_ends_with(&[ElementName::Propstat, ElementName::Prop])
    }

    fn on_start(
        &mut self,
        namespace: Option<&[u8]>,
        event: &BytesStart<'_>,
    ) -> Result<(), MultistatusError> {
        let local = event.local_name();
        let element = element_from_bytes(namespace, local.as_ref());

        if let Some(capture) = self.capture.as_mut() {
            capture.has_children = true;
            capture.markup.push('<');
            capture
                .markup
                .push_str(&String::from_utf8_lossy(event.as_ref()));
            capture.markup.push('>');
            self.stack.push(ElementName::Other);
            return Ok(());
        }

        if self.stack.is_empty() {
            if element != ElementName::Multistatus {
                return Err(MultistatusError::NotMultistatus);
            }
            self.seen_root = true;
        }

        if self.in_prop() && !element.is_known_property() {
            self.capture = Some(Capture {
                name: qualified(namespace, local.as_ref()),
                depth: self.stack.len() + 1,
                text: String::new(),
                markup: String::new(),
                has_children: false,
            });
            self.stack.push(ElementName::Other);
            return Ok(());
        }

        let in_resourcetype = self.path_ends_with(&[
            ElementName::Propstat,
            ElementName::Prop,
            ElementName::Resourcetype,
        ]);
        let in_report = self.path_ends_with(&[
            ElementName::SupportedReportSet,
            ElementName::SupportedReport,
            ElementName::Report,
        ]);
        self.stack.push(element);

        match element {
            ElementName::Response => {
                self.current = DavResponse::default();
            }
            ElementName::Propstat => {
                self.propstat = Propstat::default();
            }
            ElementName::Href
                if self.path_ends_with(&[ElementName::Response, ElementName::Href]) =>
            {
                self.current.hrefs.push(String::new());
            }
            ElementName::Collection if in_resourcetype => {
                self.propstat.prop.is_collection = true;
            }
            _ if in_resourcetype => {
                self.propstat
                    .prop
                    .resource_types
                    .push(qualified(namespace, local.as_ref()));
            }
            _ if in_report => {
                self.propstat
                    .prop
                    .supported_reports
                    .push(qualified(namespace, local.as_ref()));
            }
            _ => {}
        }

        Ok(())
    }

    fn on_empty(
        &mut self,
        namespace: Option<&[u8]>,
        event: &BytesStart<'_>,
    ) -> Result<(), MultistatusError> {
        if let Some(capture) = self.capture.as_mut() {
            capture.has_children = true;
            capture.markup.push('<');
            capture
                .markup
                .push_str(&String::from_utf8_lossy(event.as_ref()));
            capture.markup.push_str("/>");
            return Ok(());
        }
        self.on_start(namespace, event)?;
        self.on_end(event.name().as_ref())
    }

    fn on_end(&mut self, raw_name: &[u8]) -> Result<(), MultistatusError> {
        if let Some(capture) = self.capture.as_mut() {
            if self.stack.len() == capture.depth {
                if let Some(finished) = self.capture.take() {
                    let value = if finished.has_children {
                        finished.markup.trim().to_string()
                    } else {
                        finished.text.trim().to_string()
                    };
                    self.propstat.prop.custom.insert(finished.name, value);
                }
            } else {
                capture.markup.push_str("</");
                capture.markup.push_str(&String::from_utf8_lossy(raw_name));
                capture.markup.push('>');
            }
            self.stack.pop();
            return Ok(());
        }

        match self.stack.pop() {
            Some(ElementName::Response) => {
                let finished = std::mem::take(&mut self.current);
                self.sink
                    .consume(finished)
                    .map_err(|e| MultistatusError::Consumer(e.to_string()))?;
            }
            Some(ElementName::Propstat) if self.path_ends_with(&[ElementName::Response]) => {
                let finished = std::mem::take(&mut self.propstat);
                self.current.propstats.push(finished);
            }
            _ => {}
        }
        Ok(())
    }

    fn on_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }

        if let Some(capture) = self.capture.as_mut() {
            capture.text.push_str(text);
            capture.markup.push_str(&escape_xml(text));
            return;
        }

        let stack = &self.stack;
        let prop = &mut self.propstat.prop;

        if ends_with(stack, &[ElementName::Response, ElementName::Href]) {
            if let Some(last) = self.current.hrefs.last_mut() {
                last.push_str(text);
            }
        } else if ends_with(stack, &[ElementName::Response, ElementName::Status]) {
            append(&mut self.current.status, text);
        } else if ends_with(
            stack,
            &[ElementName::Response, ElementName::Responsedescription],
        ) {
            append(&mut self.current.description, text);
        } else if ends_with(stack, &[ElementName::Propstat, ElementName::Status]) {
            append(&mut self.propstat.status, text);
        } else if ends_with(stack, &[ElementName::Multistatus, ElementName::SyncToken]) {
            append(&mut self.sync_token, text);
        } else if in_prop(stack, &[ElementName::Creationdate]) {
            append(&mut prop.creation_date, text);
        } else if in_prop(stack, &[ElementName::Displayname]) {
            append(&mut prop.display_name, text);
        } else if in_prop(stack, &[ElementName::Getcontentlanguage]) {
            append(&mut prop.content_language, text);
        } else if in_prop(stack, &[ElementName::Getcontentlength]) {
            append(&mut prop.content_length, text);
        } else if in_prop(stack, &[ElementName::Getcontenttype]) {
            append(&mut prop.content_type, text);
        } else if in_prop(stack, &[ElementName::Getetag]) {
            append(&mut prop.etag, text);
        } else if in_prop(stack, &[ElementName::Getlastmodified]) {
            append(&mut prop.last_modified, text);
        } else if in_prop(stack, &[ElementName::QuotaUsedBytes]) {
            append(&mut prop.quota_used_bytes, text);
        } else if in_prop(stack, &[ElementName::QuotaAvailableBytes]) {
            append(&mut prop.quota_available_bytes, text);
        } else if in_prop(stack, &[ElementName::Owner, ElementName::Href]) {
            append(&mut prop.owner, text);
        } else if in_prop(stack, &[ElementName::PrincipalUrl, ElementName::Href]) {
            append(&mut prop.principal_url, text);
        } else if ends_with(
            stack,
            &[
                ElementName::Activelock,
                ElementName::Locktoken,
                ElementName::Href,
            ],
        ) {
            let token = text.trim();
            if !token.is_empty() {
                prop.lock_tokens.push(token.to_string());
            }
        }
    }
}

/// `needle` sits directly inside a `propstat/prop` element.
fn in_prop(stack: &[ElementName], needle: &[ElementName]) -> bool {
    let n = needle.len();
    stack.len() >= n + 2
        && ends_with(stack, needle)
        && stack[stack.len() - n - 2..stack.len() - n] == [ElementName::Propstat, ElementName::Prop]
}

fn ends_with(stack: &[ElementName], needle: &[ElementName]) -> bool {
    stack.len() >= needle.len() && stack[stack.len() - needle.len()..] == needle[..]
}

fn append(slot: &mut Option<String>, text: &str) {
    match slot {
        Some(existing) => existing.push_str(text),
        None => *slot = Some(text.to_string()),
    }
}

fn qualified(namespace: Option<&[u8]>, local: &[u8]) -> QualifiedName {
    QualifiedName::new(
        namespace
            .map(|ns| String::from_utf8_lossy(ns).into_owned())
            .unwrap_or_default(),
        String::from_utf8_lossy(local).into_owned(),
    )
}

fn namespace_of<'a>(resolved: &'a ResolveResult<'_>) -> Option<&'a [u8]> {
    match resolved {
        ResolveResult::Bound(ns) => Some(ns.as_ref()),
        _ => None,
    }
}

/// Resolve `&name;` / `&#NN;` references, which the reader reports separately from text.
fn resolve_reference(reference: &BytesRef<'_>) -> Result<String, MultistatusError> {
    if let Some(ch) = reference
        .resolve_char_ref()
        .map_err(|e| MultistatusError::Xml(e.to_string()))?
    {
        return Ok(ch.to_string());
    }
    let name = reference
        .decode()
        .map_err(|e| MultistatusError::Xml(e.to_string()))?;
    Ok(match resolve_predefined_entity(&name) {
        Some(resolved) => resolved.to_string(),
        None => format!("&{name};"),
    })
}

pub fn decode_text(raw: &[u8]) -> Result<String, MultistatusError> {
    match std::str::from_utf8(raw) {
        Ok(s) => Ok(unescape(s)
            .map_err(|err| MultistatusError::Xml(format!("XML decode error: {err}")))?
            .into_owned()),
        Err(_) => Ok(String::from_utf8_lossy(raw).into_owned()),
    }
}

async fn parse_multistatus_stream_with<C>(
    resp_body: Incoming,
    encodings: &[ContentEncoding],
    sink: C,
) -> Result<(C, Option<String>), MultistatusError>
where
    C: ResponseConsumer + Send,
{
    let reader = decompress_stream(resp_body, encodings);
    let mut xml = NsReader::from_reader(reader);
    xml.config_mut().trim_text(false);

    let mut buf = Vec::with_capacity(8 * 1024);
    let mut parser = MultistatusParser::new(sink);

    loop {
        let (resolved, event) = xml.read_resolved_event_into_async(&mut buf).await?;
        let namespace = namespace_of(&resolved);
        match event {
            Event::Start(e) => parser.on_start(namespace, &e)?,
            Event::Empty(e) => parser.on_empty(namespace, &e)?,
            Event::Text(e) => parser.on_text(&decode_text(e.as_ref())?),
            Event::CData(e) => parser.on_text(&String::from_utf8_lossy(e.as_ref())),
            Event::GeneralRef(e) => parser.on_text(&resolve_reference(&e)?),
            Event::End(e) => parser.on_end(e.name().as_ref())?,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    parser.finish()
}

fn parse_multistatus_bytes_with<R, C>(
    reader: R,
    sink: C,
) -> Result<(C, Option<String>), MultistatusError>
where
    R: BufRead,
    C: ResponseConsumer,
{
    let mut xml = NsReader::from_reader(reader);
    xml.config_mut().trim_text(false);

    let mut buf = Vec::with_capacity(8 * 1024);
    let mut parser = MultistatusParser::new(sink);

    loop {
        let (resolved, event) = xml.read_resolved_event_into(&mut buf)?;
        let namespace = namespace_of(&resolved);
        match event {
            Event::Start(e) => parser.on_start(namespace, &e)?,
            Event::Empty(e) => parser.on_empty(namespace, &e)?,
            Event::Text(e) => parser.on_text(&decode_text(e.as_ref())?),
            Event::CData(e) => parser.on_text(&String::from_utf8_lossy(e.as_ref())),
            Event::GeneralRef(e) => parser.on_text(&resolve_reference(&e)?),
            Event::End(e) => parser.on_end(e.name().as_ref())?,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    parser.finish()
}

/// Parse a WebDAV `207 Multi-Status` XML body in **streaming mode**, with optional
/// decompression (br, gzip, zstd).
pub async fn parse_multistatus_stream(
    resp_body: Incoming,
    encodings: &[ContentEncoding],
) -> Result<MultistatusDocument, MultistatusError> {
    let (responses, sync_token) =
        parse_multistatus_stream_with(resp_body, encodings, Vec::<DavResponse>::new()).await?;
    Ok(MultistatusDocument {
        responses,
        sync_token,
    })
}

/// Stream parse a `207 Multi-Status` response and invoke a callback for each entry.
///
/// Returns the top-level sync-token, if any.
pub async fn parse_multistatus_stream_visit<F>(
    resp_body: Incoming,
    encodings: &[ContentEncoding],
    on_response: F,
) -> Result<Option<String>, MultistatusError>
where
    F: FnMut(DavResponse) -> anyhow::Result<()> + Send,
{
    let (_, sync_token) = parse_multistatus_stream_with(resp_body, encodings, on_response).await?;
    Ok(sync_token)
}

/// Parse a WebDAV `207 Multi-Status` XML body from an already aggregated buffer.
pub fn parse_multistatus_bytes(body: &[u8]) -> Result<MultistatusDocument, MultistatusError> {
    let (responses, sync_token) =
        parse_multistatus_bytes_with(Cursor::new(body), Vec::<DavResponse>::new())?;
    Ok(MultistatusDocument {
        responses,
        sync_token,
    })
}
