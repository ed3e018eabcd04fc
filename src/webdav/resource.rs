//! Projection of `multistatus` entries into [`Resource`] values.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use hyper::{StatusCode, Uri};

use crate::webdav::streaming::{DavResponse, MultistatusDocument, PropValues, Propstat};
use crate::webdav::types::QualifiedName;

/// One resource reported by the server. Immutable once assembled.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    /// Raw `href` as sent by the server.
    pub href: String,
    /// Percent-decoded path component of the href.
    pub path: String,
    pub is_directory: bool,
    pub creation_date: Option<DateTime<Utc>>,
    pub modified_date: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
    /// Zero when absent, unparseable, or for collections.
    pub content_length: u64,
    pub etag: Option<String>,
    pub display_name: Option<String>,
    pub content_language: Option<String>,
    pub status: Option<StatusCode>,
    pub resource_types: Vec<QualifiedName>,
    pub custom_properties: BTreeMap<QualifiedName, String>,
    pub lock_tokens: Vec<String>,
    pub quota_used_bytes: Option<u64>,
    pub quota_available_bytes: Option<u64>,
    pub supported_reports: Vec<QualifiedName>,
    pub owner: Option<String>,
    pub principal_url: Option<String>,
}

impl Resource {
    /// Last path segment, without the trailing slash of collections.
    pub fn name(&self) -> &str {
        self.path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
    }

    pub fn custom_property(&self, name: &QualifiedName) -> Option<&str> {
        self.custom_properties.get(name).map(String::as_str)
    }
}

/// Why a `response` entry could not become a [`Resource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryError {
    MissingHref,
    InvalidHref { href: String, reason: String },
}

impl std::fmt::Display for EntryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryError::MissingHref => f.write_str("response entry has no href"),
            EntryError::InvalidHref { href, reason } => {
                write!(f, "invalid href {href:?}: {reason}")
            }
        }
    }
}

impl TryFrom<DavResponse> for Resource {
    type Error = EntryError;

    fn try_from(response: DavResponse) -> Result<Self, Self::Error> {
        let href = response
            .hrefs
            .first()
            .map(|h| h.trim().to_string())
            .ok_or(EntryError::MissingHref)?;
        let path = decode_href(&href)?;

        let chosen = select_propstat(&response.propstats);
        let status = response
            .status
            .as_deref()
            .and_then(parse_status_line)
            .or_else(|| {
                chosen
                    .and_then(|p| p.status.as_deref())
                    .and_then(parse_status_line)
            });

        let empty = PropValues::default();
        let prop = chosen.map(|p| &p.prop).unwrap_or(&empty);

        let is_directory = prop.is_collection;
        let content_length = if is_directory {
            0
        } else {
            parse_u64(prop.content_length.as_deref()).unwrap_or(0)
        };

        Ok(Resource {
            href,
            path,
            is_directory,
            creation_date: prop.creation_date.as_deref().and_then(parse_date),
            modified_date: prop.last_modified.as_deref().and_then(parse_date),
            content_type: non_empty(prop.content_type.as_deref()),
            content_length,
            etag: non_empty(prop.etag.as_deref()),
            display_name: non_empty(prop.display_name.as_deref()),
            content_language: non_empty(prop.content_language.as_deref()),
            status,
            resource_types: prop.resource_types.clone(),
            custom_properties: prop.custom.clone(),
            lock_tokens: prop.lock_tokens.clone(),
            quota_used_bytes: parse_u64(prop.quota_used_bytes.as_deref()),
            quota_available_bytes: parse_u64(prop.quota_available_bytes.as_deref()),
            supported_reports: prop.supported_reports.clone(),
            owner: non_empty(prop.owner.as_deref()),
            principal_url: non_empty(prop.principal_url.as_deref()),
        })
    }
}

/// Project every entry of `document`, dropping (and logging) the ones whose href is unusable.
pub fn assemble_resources(document: MultistatusDocument) -> Vec<Resource> {
    document
        .responses
        .into_iter()
        .fold(Vec::new(), |mut resources, response| {
            push_resource(&mut resources, response);
            resources
        })
}

/// Fold step shared with the streaming listing path.
pub(crate) fn push_resource(resources: &mut Vec<Resource>, response: DavResponse) {
    match Resource::try_from(response) {
        Ok(resource) => resources.push(resource),
        Err(err) => tracing::warn!("ignoring resource: {err}"),
    }
}

/// First propstat with a 2xx status. A propstat without a status line is accepted too.
fn select_propstat(propstats: &[Propstat]) -> Option<&Propstat> {
    propstats.iter().find(|p| match p.status.as_deref() {
        Some(line) => parse_status_line(line).is_some_and(|s| s.is_success()),
        None => true,
    })
}

/// Parse `HTTP/1.1 200 OK` into its status code.
pub fn parse_status_line(line: &str) -> Option<StatusCode> {
    let code = line.split_whitespace().nth(1)?;
    StatusCode::from_bytes(code.as_bytes()).ok()
}

fn decode_href(href: &str) -> Result<String, EntryError> {
    let invalid = |reason: String| EntryError::InvalidHref {
        href: href.to_string(),
        reason,
    };
    if href.is_empty() {
        return Err(invalid("empty".to_string()));
    }
    let uri: Uri = href.parse().map_err(|e: hyper::http::uri::InvalidUri| invalid(e.to_string()))?;
    let decoded = urlencoding::decode(uri.path()).map_err(|e| invalid(e.to_string()))?;
    Ok(decoded.into_owned())
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_u64(value: Option<&str>) -> Option<u64> {
    value.and_then(|v| v.trim().parse().ok())
}

/// Timestamp layouts tried in order; the first one that parses wins.
const NAIVE_UTC_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%a %b %d %H:%M:%S GMT %Y",
    "%a %b %d %H:%M:%S UTC %Y",
    "%A, %d-%b-%y %H:%M:%S GMT",
    "%a %b %e %H:%M:%S %Y",
];

/// Best-effort timestamp parsing across the formats DAV servers are known to emit:
/// RFC 3339 / ISO-8601 (with or without fraction or offset), RFC 1123, RFC 850,
/// `Date.toString()`-style and asctime. Returns `None` instead of failing.
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_UTC_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}
