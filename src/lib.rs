//! Lean WebDAV client library for Rust.
//!
//! An asynchronous WebDAV (RFC 4918) client built on hyper 1.x, rustls and tokio.
//! It covers the everyday file operations: listing collections, reading and writing
//! payloads, and moving things around on the server.
//!
//! # Features
//!
//! - HTTP/2 and connection pooling through a shared hyper client
//! - Anonymous, Bearer and Basic authentication, optionally through an HTTP proxy
//! - Streaming `PROPFIND` parsing: entries are assembled as the body arrives
//! - Tolerant listings: one bad entry is skipped, not the whole response
//! - Streaming uploads and downloads with progress reporting
//! - Automatic response decompression (br/zstd/gzip)
//!
//! # Examples
//!
//! ## Listing a collection
//!
//! ```no_run
//! use lean_dav_rs::{Auth, Depth, PropertyRequest, WebDavClient};
//! use anyhow::Result;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = WebDavClient::new(
//!         "https://dav.example.com/remote.php/dav/files/alice/",
//!         Auth::basic("alice", "secret"),
//!     )?;
//!
//!     // The first entry is the collection itself.
//!     let entries = client.list("docs/", Depth::One, PropertyRequest::AllProps).await?;
//!     for entry in entries.iter().skip(1) {
//!         println!(
//!             "{}{} ({} bytes)",
//!             entry.name(),
//!             if entry.is_directory { "/" } else { "" },
//!             entry.content_length
//!         );
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Custom properties
//!
//! ```no_run
//! use lean_dav_rs::{PropertyRequest, QualifiedName, WebDavClient};
//! use anyhow::Result;
//!
//! # async fn example(client: WebDavClient) -> Result<()> {
//! let fileid = QualifiedName::new("http://owncloud.org/ns", "fileid");
//! let entries = client
//!     .list("docs/", 1, PropertyRequest::Basic(vec![fileid.clone()]))
//!     .await?;
//! for entry in &entries {
//!     println!("{} -> {:?}", entry.path, entry.custom_property(&fileid));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Uploading and downloading
//!
//! ```no_run
//! use lean_dav_rs::{Auth, HeaderMap, PutOptions, PutSource, TransferProgress, WebDavClient};
//! use anyhow::Result;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = WebDavClient::new("https://dav.example.com/files/", Auth::bearer("token"))?;
//!
//!     client.create_directory("reports/").await?;
//!     client
//!         .put_file("reports/q3.pdf", "/tmp/q3.pdf", Some("application/pdf"), true, None)
//!         .await?;
//!
//!     // Stream a reader of unknown length (chunked transfer encoding).
//!     let reader = tokio::fs::File::open("/var/log/app.log").await?;
//!     client
//!         .put(
//!             "reports/app.log",
//!             PutSource::reader(reader),
//!             PutOptions::default(),
//!             Some(Box::new(|p: TransferProgress| println!("sent {} bytes", p.transferred))),
//!         )
//!         .await?;
//!
//!     // The body is handed to the closure; nothing is buffered by the client.
//!     let copied = client
//!         .get("reports/q3.pdf", HeaderMap::new(), None, |mut download| async move {
//!             let mut out = tokio::fs::File::create("/tmp/q3-copy.pdf").await?;
//!             Ok::<_, anyhow::Error>(download.copy_to(&mut out).await?)
//!         })
//!         .await?;
//!     println!("downloaded {copied} bytes");
//!
//!     client
//!         .r#move("reports/q3.pdf", "archive/q3.pdf", false, HeaderMap::new())
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Handling errors
//!
//! ```no_run
//! use lean_dav_rs::{DavError, HeaderMap, WebDavClient};
//! use hyper::StatusCode;
//!
//! # async fn example(client: WebDavClient) -> Result<(), DavError> {
//! match client.copy("a.txt", "b.txt", false, HeaderMap::new()).await {
//!     Ok(()) => {}
//!     Err(err) if err.status() == Some(StatusCode::PRECONDITION_FAILED) => {
//!         println!("{} already exists", err.url().unwrap_or("destination"));
//!     }
//!     Err(err) => return Err(err),
//! }
//! # Ok(())
//! # }
//! ```

pub mod common;
pub mod webdav;

pub use common::compression::{ContentEncoding, add_accept_encoding, detect_encodings};
pub use common::error::{DavError, Result};
pub use common::http::{Auth, Proxy};
pub use hyper::HeaderMap;
pub use webdav::{
    BodyWriter, ClientConfig, DavResponse, Depth, Download, EntryError, MultistatusDocument,
    MultistatusError, ProgressListener, PropValues, PropertyRequest, Propstat, PutOptions,
    PutSource, QualifiedName, Resource, TransferProgress, WebDavClient, assemble_resources,
    build_propfind_body, parse_multistatus_bytes, parse_multistatus_stream,
    parse_multistatus_stream_visit,
};
