use std::fmt;

use hyper::HeaderMap;

use crate::webdav::xml::DAV_NAMESPACE;

/// WebDAV Depth
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
    Infinity,
    /// Any other finite depth. Servers are only required to honour 0, 1 and infinity.
    Level(u32),
}

impl Depth {
    /// Header value: the decimal depth, or `infinity`.
    pub fn as_header(self) -> String {
        match self {
            Depth::Zero => "0".to_string(),
            Depth::One => "1".to_string(),
            Depth::Infinity => "infinity".to_string(),
            Depth::Level(n) => n.to_string(),
        }
    }
}

impl From<i32> for Depth {
    /// Negative depths mean the whole subtree.
    fn from(depth: i32) -> Self {
        match depth {
            d if d < 0 => Depth::Infinity,
            0 => Depth::Zero,
            1 => Depth::One,
            d => Depth::Level(d.unsigned_abs()),
        }
    }
}

impl fmt::Display for Depth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_header())
    }
}

/// Namespace-qualified XML element name, e.g. `{DAV:}getetag`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedName {
    /// Namespace URI; empty for elements in no namespace.
    pub namespace: String,
    pub local_name: String,
}

impl QualifiedName {
    pub fn new(namespace: impl Into<String>, local_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            local_name: local_name.into(),
        }
    }

    /// Name in the `DAV:` namespace.
    pub fn dav(local_name: impl Into<String>) -> Self {
        Self::new(DAV_NAMESPACE, local_name)
    }

    pub fn is_dav(&self) -> bool {
        self.namespace == DAV_NAMESPACE
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}{}", self.namespace, self.local_name)
    }
}

/// Which properties a `PROPFIND` asks for.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PropertyRequest {
    /// `<D:allprop/>`: every live DAV property plus dead properties the server chooses to return.
    #[default]
    AllProps,
    /// The well-known DAV properties plus the extra names given.
    Basic(Vec<QualifiedName>),
    /// Exactly the names given, nothing else.
    Exact(Vec<QualifiedName>),
}

/// Progress of a streamed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    /// Bytes handed to the sink so far.
    pub transferred: u64,
    /// Total payload size, `None` for chunked transfers of unknown length.
    pub total: Option<u64>,
}

/// Request options for `PUT`.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// `Content-Type` of the payload; omitted when `None`.
    pub content_type: Option<String>,
    /// Send `Expect: 100-continue`.
    pub expect_continue: bool,
    /// Declared payload size. `None` streams the body with chunked transfer encoding.
    pub content_length: Option<u64>,
    /// Extra headers, applied last so they can override the ones above.
    pub headers: HeaderMap,
}
