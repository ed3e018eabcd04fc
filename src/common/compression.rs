//! Response content-encoding handling.
//!
//! PROPFIND responses can be large; servers are invited to compress them and
//! the body is decoded while it streams, never aggregated first.

use std::fmt;

use async_compression::tokio::bufread::{BrotliDecoder, GzipDecoder, ZstdDecoder};
use futures_util::{TryStreamExt, future};
use http_body_util::BodyStream;
use hyper::body::Incoming;
use hyper::{HeaderMap, header, http};
use tokio::io::{AsyncBufRead, BufReader};
use tokio_util::io::StreamReader;

/// Buffered, possibly decoding, view of a response body.
pub type BodyReader = Box<dyn AsyncBufRead + Unpin + Send>;

/// Value advertised in `Accept-Encoding` on PROPFIND requests.
pub const ACCEPTED_ENCODINGS: &str = "br, zstd, gzip";

/// Content codings this client can undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Identity,
    Br,
    Gzip,
    Zstd,
}

impl ContentEncoding {
    /// Parse one `Content-Encoding` token, case-insensitively.
    pub fn from_token(token: &str) -> Option<Self> {
        let token = token.trim();
        [
            ("identity", ContentEncoding::Identity),
            ("br", ContentEncoding::Br),
            ("gzip", ContentEncoding::Gzip),
            ("x-gzip", ContentEncoding::Gzip),
            ("zstd", ContentEncoding::Zstd),
            ("zst", ContentEncoding::Zstd),
        ]
        .into_iter()
        .find(|(name, _)| token.eq_ignore_ascii_case(name))
        .map(|(_, encoding)| encoding)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentEncoding::Identity => "identity",
            ContentEncoding::Br => "br",
            ContentEncoding::Gzip => "gzip",
            ContentEncoding::Zstd => "zstd",
        }
    }

    fn wrap(self, inner: BodyReader) -> BodyReader {
        match self {
            ContentEncoding::Identity => inner,
            ContentEncoding::Br => Box::new(BufReader::new(BrotliDecoder::new(inner))),
            ContentEncoding::Gzip => Box::new(BufReader::new(GzipDecoder::new(inner))),
            ContentEncoding::Zstd => Box::new(BufReader::new(ZstdDecoder::new(inner))),
        }
    }
}

impl fmt::Display for ContentEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Codings applied to a response, in the order the server applied them.
///
/// `identity` and unknown tokens are skipped, so an empty result means the body is
/// passed through untouched. Repeated `Content-Encoding` lines are concatenated.
pub fn detect_encodings(headers: &HeaderMap) -> Vec<ContentEncoding> {
    headers
        .get_all(header::CONTENT_ENCODING)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(ContentEncoding::from_token)
        .filter(|encoding| *encoding != ContentEncoding::Identity)
        .collect()
}

/// Advertise [`ACCEPTED_ENCODINGS`] unless the caller already chose an `Accept-Encoding`.
pub fn add_accept_encoding(h: &mut HeaderMap) {
    h.entry(header::ACCEPT_ENCODING)
        .or_insert(http::HeaderValue::from_static(ACCEPTED_ENCODINGS));
}

/// Stack decoders over `reader`, undoing the last applied coding first.
pub fn decode_reader(reader: BodyReader, encodings: &[ContentEncoding]) -> BodyReader {
    encodings
        .iter()
        .rev()
        .fold(reader, |inner, encoding| encoding.wrap(inner))
}

/// Turn a response body into a buffered reader, decoding `encodings` on the fly.
/// Trailer frames are skipped.
pub fn decompress_stream(body: Incoming, encodings: &[ContentEncoding]) -> BodyReader {
    let data = BodyStream::new(body)
        .map_err(std::io::Error::other)
        .try_filter_map(|frame| future::ready(Ok(frame.into_data().ok())));
    decode_reader(Box::new(StreamReader::new(data)), encodings)
}
