//! Turns a call's parameters into the bytes that go on the wire.
//!
//! All-string parameter sets become `application/x-www-form-urlencoded`,
//! either in the query string or the body depending on the method. A single
//! binary parameter switches the whole call to `multipart/form-data`.

use bytes::{BufMut, Bytes, BytesMut};
use reqwest::Method;
use serde::Serialize;
use url::form_urlencoded;

use crate::error::{RestError, Result};
use crate::params::{Params, ParamValue};

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Request body with its content type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub content_type: String,
    pub body: Bytes,
}

impl Payload {
    pub fn new(content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Payload {
            content_type: content_type.into(),
            body: body.into(),
        }
    }

    /// JSON body, for services that take their arguments as a document
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Payload::new("application/json", serde_json::to_vec(value)?))
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// How a call's parameters are encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// url-encoded pairs appended to the URL
    Query,
    /// url-encoded pairs in the body
    Form,
    Multipart,
}

/// Methods whose parameters travel in the body
pub fn has_body(method: &Method) -> bool {
    *method == Method::POST || *method == Method::PUT || *method == Method::PATCH
}

/// Choose the encoding for a parameter set
pub fn encoding_for(method: &Method, params: &Params) -> Encoding {
    if !params.are_strings() {
        Encoding::Multipart
    } else if has_body(method) {
        Encoding::Form
    } else {
        Encoding::Query
    }
}

/// Substitute `%s` placeholders of a URL template, in order
pub fn bind_url(format: &str, args: &[&str]) -> Result<String> {
    let pieces: Vec<&str> = format.split("%s").collect();
    let expected = pieces.len() - 1;
    if expected != args.len() {
        return Err(RestError::Binding(format!(
            "URL template expects {} value(s), got {}",
            expected,
            args.len()
        )));
    }

    let mut url = String::from(pieces[0]);
    for (arg, piece) in args.iter().zip(&pieces[1..]) {
        url.push_str(arg);
        url.push_str(piece);
    }
    Ok(url)
}

/// Join a base URL and a function path, adding `/` only when neither side has one
pub fn join_url(base: &str, function: Option<&str>) -> String {
    match function {
        None | Some("") => base.to_string(),
        Some(function) => {
            if base.ends_with('/') || function.starts_with('/') {
                format!("{}{}", base, function)
            } else {
                format!("{}/{}", base, function)
            }
        }
    }
}

/// url-encode the string parameters
pub fn form_encode(params: &Params) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.string_pairs())
        .finish()
}

/// Append url-encoded pairs to a URL's query string
pub fn append_query(url: &str, query: &str) -> String {
    if query.is_empty() {
        url.to_string()
    } else if url.contains('?') {
        format!("{}&{}", url, query)
    } else {
        format!("{}?{}", url, query)
    }
}

/// Serialize the parameters for a request, returning the final URL and body
pub fn serialize(method: &Method, url: &str, params: &Params) -> Result<(String, Option<Payload>)> {
    match encoding_for(method, params) {
        Encoding::Query => Ok((append_query(url, &form_encode(params)), None)),
        Encoding::Form => Ok((
            url.to_string(),
            Some(Payload::new(FORM_CONTENT_TYPE, form_encode(params))),
        )),
        Encoding::Multipart => {
            if !has_body(method) {
                return Err(RestError::RequestBuild(format!(
                    "binary parameters cannot be sent with {}",
                    method
                )));
            }
            Ok((url.to_string(), Some(multipart(params, &new_boundary()))))
        }
    }
}

fn new_boundary() -> String {
    format!("restproxy-{:016x}{:016x}", rand::random::<u64>(), rand::random::<u64>())
}

fn escape_quoted(s: &str) -> String {
    s.replace('"', "%22").replace('\r', "%0D").replace('\n', "%0A")
}

/// Encode every parameter as a `multipart/form-data` part.
/// String parameters become fields; binary ones become file parts.
pub fn multipart(params: &Params, boundary: &str) -> Payload {
    let mut body = BytesMut::new();

    for param in params {
        body.put_slice(format!("--{}\r\n", boundary).as_bytes());
        let mut disposition = format!("Content-Disposition: form-data; name=\"{}\"", escape_quoted(param.name()));

        match param.value() {
            ParamValue::String(value) => {
                disposition.push_str("\r\n\r\n");
                body.put_slice(disposition.as_bytes());
                body.put_slice(value.as_bytes());
            }
            ParamValue::Binary {
                content,
                content_type,
                file_name,
            } => {
                if let Some(file_name) = file_name {
                    disposition.push_str(&format!("; filename=\"{}\"", escape_quoted(file_name)));
                }
                disposition.push_str(&format!("\r\nContent-Type: {}\r\n\r\n", content_type));
                body.put_slice(disposition.as_bytes());
                body.put_slice(content);
            }
        }
        body.put_slice(b"\r\n");
    }
    body.put_slice(format!("--{}--\r\n", boundary).as_bytes());

    Payload::new(format!("multipart/form-data; boundary={}", boundary), body.freeze())
}
