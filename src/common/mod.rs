pub mod compression;
pub mod error;
pub mod http;

pub use compression::{
    ACCEPTED_ENCODINGS, BodyReader, ContentEncoding, add_accept_encoding, decode_reader,
    decompress_stream, detect_encodings,
};
pub use error::{DavError, Result};
pub use http::{Auth, DavBody, Proxy, Transport, build_hyper_client, build_transport};
