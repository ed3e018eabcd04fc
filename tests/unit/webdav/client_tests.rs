use std::sync::{Arc, Mutex};
use std::time::Duration;

use hyper::StatusCode;
use hyper::header::{HeaderName, HeaderValue};
use lean_dav_rs::{
    Auth, ClientConfig, DavError, Depth, HeaderMap, PropertyRequest, PutOptions, PutSource,
    QualifiedName, TransferProgress, WebDavClient,
};
use tokio::io::AsyncWriteExt;

use super::mock_server::{Canned, MockServer};

const TWO_ENTRIES: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:href>/dav/docs/</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype><d:collection/></d:resourcetype>
        <d:getlastmodified>Tue, 05 Mar 2024 10:00:00 GMT</d:getlastmodified>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/dav/docs/report%20final.txt</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype/>
        <d:getcontentlength>1234</d:getcontentlength>
        <d:getcontenttype>text/plain</d:getcontenttype>
        <d:getetag>"abc"</d:getetag>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
</d:multistatus>"#;

fn client(server: &MockServer) -> WebDavClient {
    WebDavClient::new(&server.base, Auth::Anonymous).expect("client")
}

#[test]
fn test_client_creation() {
    let client = WebDavClient::new("https://example.com/dav/", Auth::basic("user", "pass"));
    assert!(client.is_ok());
}

#[test]
fn test_client_default_timeout() {
    let client = WebDavClient::new("https://example.com/dav/", Auth::Anonymous).unwrap();
    assert_eq!(client.request_timeout(), Duration::from_secs(15));
}

#[test]
fn test_client_rejects_invalid_base() {
    let err = WebDavClient::new("http://exa mple.com/", Auth::Anonymous).unwrap_err();
    assert!(matches!(err, DavError::InvalidRequest(_)));
}

#[test]
fn test_build_uri_relative() {
    let client = WebDavClient::new("https://example.com/dav/user/", Auth::Anonymous).unwrap();
    let uri = client.build_uri("docs/").unwrap();
    assert_eq!(uri.to_string(), "https://example.com/dav/user/docs/");
}

#[test]
fn test_build_uri_absolute_path() {
    let client = WebDavClient::new("https://example.com/dav/user/", Auth::Anonymous).unwrap();
    let uri = client.build_uri("/other/file.txt").unwrap();
    assert_eq!(uri.to_string(), "https://example.com/other/file.txt");
}

#[test]
fn test_build_uri_absolute_url() {
    let client = WebDavClient::new("https://example.com/dav/user/", Auth::Anonymous).unwrap();
    let uri = client.build_uri("https://other.com/test/").unwrap();
    assert_eq!(uri.to_string(), "https://other.com/test/");
}

#[test]
fn test_build_uri_with_query_and_empty_path() {
    let client = WebDavClient::new("https://example.com/dav/user/", Auth::Anonymous).unwrap();
    assert_eq!(
        client.build_uri("docs/?x=1").unwrap().to_string(),
        "https://example.com/dav/user/docs/?x=1"
    );
    assert_eq!(
        client.build_uri("").unwrap().to_string(),
        "https://example.com/dav/user/"
    );
}

#[tokio::test]
async fn test_list_returns_self_and_children() {
    let server = MockServer::start(vec![Canned::multistatus(TWO_ENTRIES)]).await;
    let client = client(&server);

    let resources = client
        .list("docs/", 1, PropertyRequest::AllProps)
        .await
        .unwrap();
    let seen = server.finish().await;

    assert_eq!(resources.len(), 2);
    assert!(resources[0].is_directory);
    assert_eq!(resources[0].content_length, 0);
    assert_eq!(resources[0].path, "/dav/docs/");
    assert_eq!(resources[1].name(), "report final.txt");
    assert_eq!(resources[1].content_length, 1234);
    assert_eq!(resources[1].content_type.as_deref(), Some("text/plain"));
    assert_eq!(resources[1].etag.as_deref(), Some("\"abc\""));

    let req = &seen[0];
    assert_eq!(req.method, "PROPFIND");
    assert_eq!(req.target, "/dav/docs/");
    assert_eq!(req.header("depth"), Some("1"));
    assert!(req.header("accept-encoding").is_some());
    assert!(req.body_str().contains("<D:allprop/>"));
}

#[tokio::test]
async fn test_list_depth_infinity_header() {
    let server = MockServer::start(vec![Canned::multistatus(TWO_ENTRIES)]).await;
    let client = client(&server);

    client
        .list("docs/", -1, PropertyRequest::Basic(Vec::new()))
        .await
        .unwrap();
    let seen = server.finish().await;

    assert_eq!(seen[0].header("depth"), Some("infinity"));
    assert!(seen[0].body_str().contains("<D:getetag/>"));
}

#[tokio::test]
async fn test_list_skips_entry_with_invalid_href() {
    let xml = r#"<d:multistatus xmlns:d="DAV:">
      <d:response><d:href>http://[broken/x</d:href>
        <d:propstat><d:prop><d:displayname>bad</d:displayname></d:prop>
        <d:status>HTTP/1.1 200 OK</d:status></d:propstat></d:response>
      <d:response><d:href>/dav/good.txt</d:href>
        <d:propstat><d:prop><d:displayname>good</d:displayname></d:prop>
        <d:status>HTTP/1.1 200 OK</d:status></d:propstat></d:response>
    </d:multistatus>"#;
    let server = MockServer::start(vec![Canned::multistatus(xml)]).await;

    let resources = client(&server).list_all("").await.unwrap();
    server.finish().await;

    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0].display_name.as_deref(), Some("good"));
}

#[tokio::test]
async fn test_list_fails_on_malformed_body() {
    let server =
        MockServer::start(vec![Canned::multistatus("<d:multistatus xmlns:d=\"DAV:\"><d:response>")])
            .await;

    let err = client(&server).list_all("").await.unwrap_err();
    server.finish().await;

    assert!(matches!(err, DavError::MalformedResponse { .. }));
}

#[tokio::test]
async fn test_list_error_status() {
    let server = MockServer::start(vec![Canned::new(403)]).await;
    let err = client(&server).list_all("secret/").await.unwrap_err();
    server.finish().await;

    assert_eq!(err.status(), Some(StatusCode::FORBIDDEN));
    assert!(err.url().unwrap().ends_with("/dav/secret/"));
}

#[tokio::test]
async fn test_list_body_read_failure_reports_url() {
    let partial = r#"<d:multistatus xmlns:d="DAV:"><d:response><d:href>/dav/docs/</d:href>"#;
    let server = MockServer::start(vec![
        Canned::multistatus(partial).declare_length(4096),
    ])
    .await;

    let err = client(&server).list_all("docs/").await.unwrap_err();
    server.finish().await;

    assert!(matches!(err, DavError::Body { .. }), "unexpected error: {err}");
    assert!(err.url().unwrap().ends_with("/dav/docs/"));
}

#[tokio::test]
async fn test_propfind_custom_property() {
    let xml = r#"<d:multistatus xmlns:d="DAV:" xmlns:oc="http://owncloud.org/ns">
      <d:response><d:href>/dav/a.txt</d:href>
        <d:propstat><d:prop><oc:fileid>00042</oc:fileid></d:prop>
        <d:status>HTTP/1.1 200 OK</d:status></d:propstat></d:response>
    </d:multistatus>"#;
    let server = MockServer::start(vec![Canned::multistatus(xml)]).await;
    let fileid = QualifiedName::new("http://owncloud.org/ns", "fileid");

    let resources = client(&server)
        .propfind("a.txt", Depth::Zero, &[fileid.clone()])
        .await
        .unwrap();
    let seen = server.finish().await;

    assert_eq!(resources[0].custom_property(&fileid), Some("00042"));
    let body = seen[0].body_str();
    assert!(body.contains(r#"<x:fileid xmlns:x="http://owncloud.org/ns"/>"#));
    assert!(!body.contains("allprop"));
    assert_eq!(seen[0].header("depth"), Some("0"));
}

#[tokio::test]
async fn test_exists_true_false_and_error() {
    let server = MockServer::start(vec![
        Canned::multistatus(TWO_ENTRIES),
        Canned::new(404),
        Canned::new(500),
    ])
    .await;
    let client = client(&server);

    assert!(client.exists("docs/").await.unwrap());
    assert!(!client.exists("missing.txt").await.unwrap());
    let err = client.exists("broken").await.unwrap_err();
    let seen = server.finish().await;

    assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    assert!(seen.iter().all(|r| r.method == "PROPFIND"));
    assert!(seen.iter().all(|r| r.header("depth") == Some("0")));
    assert!(seen.iter().all(|r| r.body.is_empty()));
}

#[tokio::test]
async fn test_create_directory_and_delete() {
    let server = MockServer::start(vec![Canned::new(201), Canned::new(204)]).await;
    let client = client(&server);

    client.create_directory("new/").await.unwrap();
    let mut headers = HeaderMap::new();
    headers.insert("If-Match", HeaderValue::from_static("\"v1\""));
    client.delete("new/", headers).await.unwrap();
    let seen = server.finish().await;

    assert_eq!(seen[0].method, "MKCOL");
    assert_eq!(seen[0].target, "/dav/new/");
    assert_eq!(seen[1].method, "DELETE");
    assert_eq!(seen[1].header("if-match"), Some("\"v1\""));
}

#[tokio::test]
async fn test_move_sends_destination_and_overwrite() {
    let server = MockServer::start(vec![Canned::new(201)]).await;
    let client = client(&server);
    let dst = server.url("b.txt");

    client
        .r#move("a.txt", &dst, true, HeaderMap::new())
        .await
        .unwrap();
    let seen = server.finish().await;

    assert_eq!(seen[0].method, "MOVE");
    assert_eq!(seen[0].target, "/dav/a.txt");
    assert_eq!(seen[0].header("destination"), Some(dst.as_str()));
    assert_eq!(seen[0].header("overwrite"), Some("T"));
}

#[tokio::test]
async fn test_copy_precondition_failed_reports_destination() {
    let server = MockServer::start(vec![Canned::new(412)]).await;
    let client = client(&server);
    let dst = server.url("b.txt");

    let err = client
        .copy("a.txt", &dst, false, HeaderMap::new())
        .await
        .unwrap_err();
    let seen = server.finish().await;

    assert_eq!(seen[0].method, "COPY");
    assert_eq!(seen[0].header("overwrite"), Some("F"));
    assert_eq!(err.status(), Some(StatusCode::PRECONDITION_FAILED));
    assert_eq!(err.url(), Some(dst.as_str()));
}

#[tokio::test]
async fn test_move_precondition_failed_reports_destination() {
    let server = MockServer::start(vec![Canned::new(412)]).await;
    let client = client(&server);
    let dst = server.url("taken.txt");

    let err = client
        .r#move("a.txt", &dst, false, HeaderMap::new())
        .await
        .unwrap_err();
    let seen = server.finish().await;

    assert_eq!(seen[0].method, "MOVE");
    assert_eq!(seen[0].header("overwrite"), Some("F"));
    assert_eq!(seen[0].header("destination"), Some(dst.as_str()));
    assert_eq!(err.status(), Some(StatusCode::PRECONDITION_FAILED));
    assert_eq!(err.url(), Some(dst.as_str()));
}

#[tokio::test]
async fn test_caller_headers_override_derived_ones() {
    let server = MockServer::start(vec![Canned::new(204)]).await;
    let client = client(&server);
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static("overwrite"),
        HeaderValue::from_static("T"),
    );

    client
        .copy("a.txt", "b.txt", false, headers)
        .await
        .unwrap();
    let seen = server.finish().await;

    assert_eq!(seen[0].header("overwrite"), Some("T"));
    assert!(seen[0].header("destination").unwrap().ends_with("/dav/b.txt"));
}

#[tokio::test]
async fn test_bearer_auth_header() {
    let server = MockServer::start(vec![Canned::new(201)]).await;
    let client = WebDavClient::new(&server.base, Auth::bearer("t0ken")).unwrap();

    client.create_directory("x/").await.unwrap();
    let seen = server.finish().await;

    assert_eq!(seen[0].header("authorization"), Some("Bearer t0ken"));
}

#[tokio::test]
async fn test_basic_auth_header() {
    let server = MockServer::start(vec![Canned::new(201)]).await;
    let client = WebDavClient::new(&server.base, Auth::basic("alice", "secret")).unwrap();

    client.create_directory("x/").await.unwrap();
    let seen = server.finish().await;

    // base64("alice:secret")
    assert_eq!(
        seen[0].header("authorization"),
        Some("Basic YWxpY2U6c2VjcmV0")
    );
}

#[tokio::test]
async fn test_anonymous_sends_no_authorization() {
    let server = MockServer::start(vec![Canned::new(201)]).await;
    client(&server).create_directory("x/").await.unwrap();
    let seen = server.finish().await;
    assert!(seen[0].header("authorization").is_none());
}

#[tokio::test]
async fn test_timeout_waiting_for_response() {
    let server = MockServer::start(vec![
        Canned::new(201).delayed(Duration::from_secs(5)),
    ])
    .await;
    let client = WebDavClient::with_config(
        &server.base,
        ClientConfig {
            auth: Auth::Anonymous,
            request_timeout: Duration::from_millis(200),
        },
    )
    .unwrap();

    let err = client.create_directory("slow/").await.unwrap_err();
    assert!(matches!(err, DavError::Timeout { .. }));
    assert!(err.url().unwrap().ends_with("/dav/slow/"));
}

#[tokio::test]
async fn test_put_bytes_declares_length() {
    let server = MockServer::start(vec![Canned::new(201)]).await;
    client(&server)
        .put_bytes("hello.txt", &b"hello world"[..], Some("text/plain"))
        .await
        .unwrap();
    let seen = server.finish().await;

    let req = &seen[0];
    assert_eq!(req.method, "PUT");
    assert_eq!(req.header("content-length"), Some("11"));
    assert_eq!(req.header("content-type"), Some("text/plain"));
    assert!(req.header("transfer-encoding").is_none());
    assert_eq!(req.body, b"hello world");
}

#[tokio::test]
async fn test_put_reader_without_length_is_chunked() {
    let server = MockServer::start(vec![Canned::new(201)]).await;
    let payload = vec![7u8; 20_000];
    let reader = std::io::Cursor::new(payload.clone());

    let reports = Arc::new(Mutex::new(Vec::<TransferProgress>::new()));
    let sink = reports.clone();
    client(&server)
        .put(
            "big.bin",
            PutSource::reader(reader),
            PutOptions::default(),
            Some(Box::new(move |p| sink.lock().unwrap().push(p))),
        )
        .await
        .unwrap();
    let seen = server.finish().await;

    let req = &seen[0];
    assert!(req.header("content-length").is_none());
    assert_eq!(req.header("transfer-encoding"), Some("chunked"));
    assert!(req.header("content-type").is_none());
    assert_eq!(req.body, payload);

    let reports = reports.lock().unwrap();
    assert!(reports.windows(2).all(|w| w[0].transferred < w[1].transferred));
    assert_eq!(reports.last().unwrap().transferred, 20_000);
    assert!(reports.iter().all(|p| p.total.is_none()));
}

#[tokio::test]
async fn test_put_file_with_expect_continue() {
    let server = MockServer::start(vec![Canned::new(201)]).await;
    let path = std::env::temp_dir().join(format!("lean-dav-put-{}.txt", std::process::id()));
    tokio::fs::write(&path, b"file payload").await.unwrap();

    client(&server)
        .put_file("upload.txt", &path, Some("text/plain"), true, None)
        .await
        .unwrap();
    let seen = server.finish().await;
    let _ = tokio::fs::remove_file(&path).await;

    let req = &seen[0];
    assert_eq!(req.header("expect"), Some("100-continue"));
    assert_eq!(req.header("content-length"), Some("12"));
    assert_eq!(req.body, b"file payload");
}

#[tokio::test]
async fn test_put_writer_callback() {
    let server = MockServer::start(vec![Canned::new(204)]).await;
    let source = PutSource::writer(|mut writer| async move {
        writer.write_all(b"part one, ").await?;
        writer.write_all(b"part two").await?;
        writer.shutdown().await?;
        Ok::<(), anyhow::Error>(())
    });

    client(&server)
        .put("w.txt", source, PutOptions::default(), None)
        .await
        .unwrap();
    let seen = server.finish().await;

    assert_eq!(seen[0].body_str(), "part one, part two");
}

#[tokio::test]
async fn test_put_caller_headers_applied_last() {
    let server = MockServer::start(vec![Canned::new(201)]).await;
    let mut headers = HeaderMap::new();
    headers.insert("Content-Type", HeaderValue::from_static("application/json"));
    headers.insert("If-None-Match", HeaderValue::from_static("*"));
    let options = PutOptions {
        content_type: Some("text/plain".to_string()),
        content_length: Some(2),
        headers,
        ..PutOptions::default()
    };

    client(&server)
        .put("h.json", PutSource::bytes("{}"), options, None)
        .await
        .unwrap();
    let seen = server.finish().await;

    assert_eq!(seen[0].header("content-type"), Some("application/json"));
    assert_eq!(seen[0].header("if-none-match"), Some("*"));
}

#[tokio::test]
async fn test_put_error_status() {
    let server = MockServer::start(vec![Canned::new(507)]).await;
    let err = client(&server)
        .put_bytes("full.txt", &b"data"[..], None)
        .await
        .unwrap_err();
    server.finish().await;

    assert_eq!(err.status(), Some(StatusCode::INSUFFICIENT_STORAGE));
}

struct FailingReader {
    served: bool,
}

impl tokio::io::AsyncRead for FailingReader {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        if self.served {
            return std::task::Poll::Ready(Err(std::io::Error::other("disk went away")));
        }
        self.served = true;
        buf.put_slice(&[1u8; 100]);
        std::task::Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn test_put_source_failure_aborts_body() {
    let server = MockServer::start(vec![Canned::new(201)]).await;

    let err = client(&server)
        .put(
            "partial.bin",
            PutSource::reader(FailingReader { served: false }),
            PutOptions::default(),
            None,
        )
        .await
        .unwrap_err();
    let seen = server.finish().await;

    assert!(matches!(err, DavError::Io(_)), "unexpected error: {err}");
    assert!(
        seen.first().is_none_or(|r| !r.complete),
        "server must not see a terminated body"
    );
}

#[tokio::test]
async fn test_put_to_closed_port_reports_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let client = WebDavClient::new(&format!("http://{addr}/dav/"), Auth::Anonymous).unwrap();

    // Larger than the upload channel, so the writer blocks until the transport gives up.
    let err = client
        .put(
            "big.bin",
            PutSource::bytes(vec![7u8; 256 * 1024]),
            PutOptions::default(),
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DavError::Transport(_)), "unexpected error: {err}");
}

#[tokio::test]
async fn test_put_times_out_waiting_for_response() {
    let server = MockServer::start(vec![
        Canned::new(201).delayed(Duration::from_secs(5)),
    ])
    .await;
    let client = WebDavClient::with_config(
        &server.base,
        ClientConfig {
            auth: Auth::Anonymous,
            request_timeout: Duration::from_millis(200),
        },
    )
    .unwrap();

    let err = tokio::time::timeout(
        Duration::from_secs(3),
        client.put_bytes("slow.txt", &b"payload"[..], None),
    )
    .await
    .expect("put must not hang once the body is sent")
    .unwrap_err();

    assert!(matches!(err, DavError::Timeout { .. }), "unexpected error: {err}");
    assert!(err.url().unwrap().ends_with("/dav/slow.txt"));
}

#[tokio::test]
async fn test_get_streams_body_with_progress() {
    let payload = vec![42u8; 30_000];
    let server = MockServer::start(vec![
        Canned::new(200)
            .header("Content-Type", "application/octet-stream")
            .header("ETag", "\"e1\"")
            .body(&payload),
    ])
    .await;

    let reports = Arc::new(Mutex::new(Vec::<TransferProgress>::new()));
    let sink = reports.clone();
    let (bytes, etag, length) = client(&server)
        .get(
            "blob.bin",
            HeaderMap::new(),
            Some(Box::new(move |p| sink.lock().unwrap().push(p))),
            |download| async move {
                let etag = download.etag().map(str::to_string);
                let length = download.content_length();
                Ok::<_, anyhow::Error>((download.bytes().await?, etag, length))
            },
        )
        .await
        .unwrap();
    let seen = server.finish().await;

    assert_eq!(seen[0].method, "GET");
    assert_eq!(bytes.len(), 30_000);
    assert_eq!(etag.as_deref(), Some("\"e1\""));
    assert_eq!(length, Some(30_000));

    let reports = reports.lock().unwrap();
    assert_eq!(reports.last().unwrap().transferred, 30_000);
    assert_eq!(reports.last().unwrap().total, Some(30_000));
}

#[tokio::test]
async fn test_get_not_found_does_not_run_block() {
    let server = MockServer::start(vec![Canned::new(404)]).await;
    let ran = Arc::new(Mutex::new(false));
    let flag = ran.clone();

    let err = client(&server)
        .get("gone.txt", HeaderMap::new(), None, |_download| async move {
            *flag.lock().unwrap() = true;
            Ok(())
        })
        .await
        .unwrap_err();
    server.finish().await;

    assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
    assert!(!*ran.lock().unwrap());
}

#[tokio::test]
async fn test_get_block_error_is_callback_error() {
    let server = MockServer::start(vec![Canned::new(200).body(b"abc")]).await;

    let err = client(&server)
        .get("a.txt", HeaderMap::new(), None, |_download| async move {
            Err::<(), _>(anyhow::anyhow!("refused"))
        })
        .await
        .unwrap_err();
    server.finish().await;

    assert!(matches!(err, DavError::Callback(_)));
}
