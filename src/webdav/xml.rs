use crate::webdav::types::{PropertyRequest, QualifiedName};

pub const DAV_NAMESPACE: &str = "DAV:";
pub const DAV_PREFIX: &str = "D";

/// Properties requested by [`PropertyRequest::Basic`], in request order.
pub const BASIC_PROPERTIES: &[&str] = &[
    "getcontentlength",
    "getlastmodified",
    "creationdate",
    "displayname",
    "getcontenttype",
    "resourcetype",
    "getetag",
    "lockdiscovery",
];

pub fn escape_xml(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Serialize a `propfind` request body.
///
/// DAV properties use the `D` prefix; every other namespace gets its own
/// `xmlns` declaration on the property element. Duplicate names are sent once.
pub fn build_propfind_body(request: &PropertyRequest) -> String {
    let mut body = String::from(r#"<?xml version="1.0" encoding="utf-8"?>"#);
    body.push_str(r#"<D:propfind xmlns:D="DAV:">"#);

    match request {
        PropertyRequest::AllProps => body.push_str("<D:allprop/>"),
        PropertyRequest::Basic(extra) => {
            let mut names: Vec<QualifiedName> = BASIC_PROPERTIES
                .iter()
                .map(|local| QualifiedName::dav(*local))
                .collect();
            for name in extra {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
            push_prop(&mut body, &names);
        }
        PropertyRequest::Exact(names) => {
            let mut unique: Vec<QualifiedName> = Vec::with_capacity(names.len());
            for name in names {
                if !unique.contains(name) {
                    unique.push(name.clone());
                }
            }
            push_prop(&mut body, &unique);
        }
    }

    body.push_str("</D:propfind>");
    body
}

fn push_prop(body: &mut String, names: &[QualifiedName]) {
    body.push_str("<D:prop>");
    for name in names {
        let local = escape_xml(&name.local_name);
        if name.is_dav() {
            body.push_str(&format!("<{DAV_PREFIX}:{local}/>"));
        } else if name.namespace.is_empty() {
            body.push_str(&format!(r#"<{local} xmlns=""/>"#));
        } else {
            body.push_str(&format!(
                r#"<x:{local} xmlns:x="{}"/>"#,
                escape_xml(&name.namespace)
            ));
        }
    }
    body.push_str("</D:prop>");
}
