use hyper::StatusCode;

use crate::common::error::{DavError, Result};

/// Outcome buckets for a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 200-299
    Success,
    /// 404; only meaningful for existence checks.
    NotFound,
    Failure,
}

pub fn classify(status: StatusCode) -> StatusClass {
    if status.is_success() {
        StatusClass::Success
    } else if status == StatusCode::NOT_FOUND {
        StatusClass::NotFound
    } else {
        StatusClass::Failure
    }
}

/// Fail with a protocol error unless `status` is 2xx.
pub fn validate_response(url: &str, status: StatusCode) -> Result<()> {
    match classify(status) {
        StatusClass::Success => Ok(()),
        StatusClass::NotFound | StatusClass::Failure => Err(DavError::Status {
            url: url.to_string(),
            status,
        }),
    }
}

/// `true` for 2xx, `false` for 404, protocol error otherwise.
pub fn validate_exists(url: &str, status: StatusCode) -> Result<bool> {
    match classify(status) {
        StatusClass::Success => Ok(true),
        StatusClass::NotFound => Ok(false),
        StatusClass::Failure => Err(DavError::Status {
            url: url.to_string(),
            status,
        }),
    }
}
