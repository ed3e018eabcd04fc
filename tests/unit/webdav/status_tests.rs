use hyper::StatusCode;
use lean_dav_rs::DavError;
use lean_dav_rs::webdav::status::{StatusClass, classify, validate_exists, validate_response};

#[test]
fn test_classify() {
    assert_eq!(classify(StatusCode::OK), StatusClass::Success);
    assert_eq!(classify(StatusCode::MULTI_STATUS), StatusClass::Success);
    assert_eq!(classify(StatusCode::NO_CONTENT), StatusClass::Success);
    assert_eq!(classify(StatusCode::NOT_FOUND), StatusClass::NotFound);
    assert_eq!(classify(StatusCode::MOVED_PERMANENTLY), StatusClass::Failure);
    assert_eq!(classify(StatusCode::LOCKED), StatusClass::Failure);
}

#[test]
fn test_validate_response() {
    assert!(validate_response("http://h/a", StatusCode::CREATED).is_ok());

    let err = validate_response("http://h/a", StatusCode::NOT_FOUND).unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
    assert_eq!(err.url(), Some("http://h/a"));
    assert_eq!(err.to_string(), "unexpected response http://h/a (404 Not Found)");
}

#[test]
fn test_validate_exists() {
    assert!(validate_exists("u", StatusCode::MULTI_STATUS).unwrap());
    assert!(!validate_exists("u", StatusCode::NOT_FOUND).unwrap());
    let err = validate_exists("u", StatusCode::UNAUTHORIZED).unwrap_err();
    assert!(matches!(
        err,
        DavError::Status { status: StatusCode::UNAUTHORIZED, .. }
    ));
}
