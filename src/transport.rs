//! The HTTP collaborator: sends a [`PreparedRequest`] with reqwest and
//! collects status, headers and body into a [`Response`].

#[cfg(feature = "async")]
use std::time::Duration;

#[cfg(feature = "async")]
use bytes::Bytes;
use reqwest::StatusCode;

use crate::call::PreparedRequest;
#[cfg(feature = "async")]
use crate::call::UploadProgressFn;
#[cfg(feature = "async")]
use crate::error::Result;
use crate::response::Response;

/// Size of the body chunks handed to the connection during uploads
#[cfg(feature = "async")]
pub const UPLOAD_CHUNK_SIZE: usize = 8192;

/// Canonical reason phrase; empty for codes without one (e.g. 599)
fn reason(status: StatusCode) -> &'static str {
    status.canonical_reason().unwrap_or("")
}

#[cfg(feature = "blocking")]
pub(crate) fn send_blocking(
    client: &reqwest::blocking::Client,
    request: &PreparedRequest,
) -> crate::error::Result<Response> {
    let mut builder = client.request(request.method.clone(), &request.url);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(ref payload) = request.payload {
        builder = builder.body(payload.body.to_vec());
    }

    let response = builder.send()?;
    let status = response.status();
    let headers = response.headers().clone();
    let payload = response.bytes()?;

    Ok(Response::new(status.as_u16(), reason(status), headers, payload))
}

#[cfg(feature = "async")]
fn async_builder(client: &reqwest::Client, request: &PreparedRequest) -> reqwest::RequestBuilder {
    let mut builder = client.request(request.method.clone(), &request.url);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}

/// Send and buffer the whole response
#[cfg(feature = "async")]
pub(crate) async fn send_async(
    client: &reqwest::Client,
    request: &PreparedRequest,
    timeout: Duration,
) -> Result<Response> {
    let mut builder = async_builder(client, request).timeout(timeout);
    if let Some(ref payload) = request.payload {
        builder = builder.body(payload.body.clone());
    }

    let response = builder.send().await?;
    let status = response.status();
    let headers = response.headers().clone();
    let payload = response.bytes().await?;

    Ok(Response::new(status.as_u16(), reason(status), headers, payload))
}

/// Send and hand each body chunk to `on_chunk` as it arrives.
///
/// Successful responses are not accumulated; error responses are buffered so
/// the status error can carry the body.
#[cfg(feature = "async")]
pub(crate) async fn send_streaming<F>(
    client: &reqwest::Client,
    request: &PreparedRequest,
    mut on_chunk: F,
) -> Result<Response>
where
    F: FnMut(&[u8]),
{
    let mut builder = async_builder(client, request);
    if let Some(ref payload) = request.payload {
        builder = builder.body(payload.body.clone());
    }

    let mut response = builder.send().await?;
    let status = response.status();
    let headers = response.headers().clone();

    if !status.is_success() {
        let payload = response.bytes().await?;
        return Ok(Response::new(status.as_u16(), reason(status), headers, payload));
    }

    while let Some(chunk) = response.chunk().await? {
        on_chunk(&chunk);
    }

    Ok(Response::new(status.as_u16(), reason(status), headers, Bytes::new()))
}

/// Send with the body split in chunks, reporting `(sent, total)` bytes as
/// each chunk is pulled by the connection
#[cfg(feature = "async")]
pub(crate) async fn send_upload(
    client: &reqwest::Client,
    request: &PreparedRequest,
    timeout: Duration,
    progress: UploadProgressFn,
) -> Result<Response> {
    use futures::StreamExt;

    let mut builder = async_builder(client, request).timeout(timeout);

    let body = request.payload.as_ref().map(|p| p.body.clone()).unwrap_or_default();
    let total = body.len() as u64;
    progress(0, total);

    if total > 0 {
        let chunks: Vec<Bytes> = (0..body.len())
            .step_by(UPLOAD_CHUNK_SIZE)
            .map(|start| body.slice(start..(start + UPLOAD_CHUNK_SIZE).min(body.len())))
            .collect();

        let mut sent = 0u64;
        let stream = futures::stream::iter(chunks).map(move |chunk| {
            sent += chunk.len() as u64;
            progress(sent, total);
            Ok::<Bytes, std::io::Error>(chunk)
        });

        builder = builder
            .header(reqwest::header::CONTENT_LENGTH, total)
            .body(reqwest::Body::wrap_stream(stream));
    }

    let response = builder.send().await?;
    let status = response.status();
    let headers = response.headers().clone();
    let payload = response.bytes().await?;

    Ok(Response::new(status.as_u16(), reason(status), headers, payload))
}
