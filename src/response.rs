use bytes::Bytes;
use reqwest::header::HeaderMap;
use serde_json::Value;

use crate::error::{RestError, Result};
use crate::xml::XmlNode;

/// Response of a completed call: status line, headers and payload.
///
/// Continuous calls leave `payload` empty since chunks are handed to the
/// caller as they arrive.
#[derive(Debug, Clone, Default)]
pub struct Response {
    /// HTTP status code
    pub status: u16,
    /// Canonical reason phrase for `status`, not the text the server sent.
    /// Empty for codes without a standard phrase, such as 599.
    pub reason: String,
    pub headers: HeaderMap,
    pub payload: Bytes,
}

impl Response {
    pub fn new(status: u16, reason: impl Into<String>, headers: HeaderMap, payload: Bytes) -> Self {
        Response {
            status,
            reason: reason.into(),
            headers,
            payload,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Map a non-2xx status to [`RestError::Http`]
    pub fn error_for_status(&self) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(RestError::http(self.status, self.reason.clone(), self.text()))
        }
    }

    /// Get a response header value as a string
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Payload decoded as (lossy) UTF-8
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Deserialize the JSON payload into the target type
    pub fn json<T>(&self) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    pub fn json_value(&self) -> Result<Value> {
        self.json()
    }

    /// Parse the payload as an XML document
    pub fn xml(&self) -> Result<XmlNode> {
        let text = std::str::from_utf8(&self.payload)
            .map_err(|e| RestError::InvalidResponse(format!("XML payload is not UTF-8: {}", e)))?;
        XmlNode::parse(text)
    }

    /// Get a value from the JSON payload by a slash-separated path.
    /// For example, "user/name" would access the "name" field inside the "user" object.
    pub fn get(&self, path: &str) -> Option<Value> {
        let root = self.json_value().ok()?;
        lookup(&root, path).cloned()
    }

    /// Get a string value from the JSON payload by a slash-separated path
    pub fn get_string(&self, path: &str) -> Option<String> {
        self.get(path).and_then(|v| v.as_str().map(|s| s.to_string()))
    }
}

/// Walk a JSON value along a slash-separated path; array segments are indices
pub fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;

    for part in path.split('/').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(arr) => {
                let index: usize = part.parse().ok()?;
                arr.get(index)?
            }
            _ => return None,
        };
    }

    Some(current)
}
