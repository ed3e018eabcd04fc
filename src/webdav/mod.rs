pub mod client;
pub mod resource;
pub mod status;
pub mod streaming;
pub mod transfer;
pub mod types;
pub mod xml;

pub use client::{ClientConfig, DEFAULT_TIMEOUT, WebDavClient};
pub use resource::{EntryError, Resource, assemble_resources, parse_date, parse_status_line};
pub use status::{StatusClass, classify, validate_exists, validate_response};
pub use streaming::{
    DavResponse, MultistatusDocument, MultistatusError, PropValues, Propstat,
    parse_multistatus_bytes, parse_multistatus_stream, parse_multistatus_stream_visit,
};
pub use transfer::{
    BodyClosed, BodyWriter, Download, ProgressListener, PutSource, copy_with_progress,
};
pub use types::{Depth, PropertyRequest, PutOptions, QualifiedName, TransferProgress};
pub use xml::{BASIC_PROPERTIES, DAV_NAMESPACE, build_propfind_body, escape_xml};
