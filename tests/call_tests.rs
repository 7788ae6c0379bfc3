use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use httpmock::prelude::*;
use restproxy::{
    CallState, CancellationToken, Config, DebugFlags, Method, Param, Proxy, RestError, TransportErrorKind,
};

fn proxy_for(server: &MockServer) -> Proxy {
    Proxy::new(Config::new(server.base_url()))
}

#[test]
fn test_blocking_get_with_query() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/users").query_param("id", "123");
        then.status(200)
            .header("Content-Type", "application/json")
            .body(r#"{"user":{"name":"Ann","tags":["a","b"]}}"#);
    });

    let proxy = proxy_for(&server);
    let mut call = proxy.new_call();
    call.set_function("users");
    call.add_param("id", "123");

    let response = call.invoke().expect("call failed");
    assert_eq!(response.status, 200);
    assert_eq!(response.get_string("user/name").as_deref(), Some("Ann"));
    assert_eq!(response.get_string("user/tags/1").as_deref(), Some("b"));

    assert_eq!(call.state(), CallState::Completed);
    assert_eq!(call.status_code(), Some(200));
    assert_eq!(call.status_message(), Some("OK"));
    assert_eq!(call.response_header("content-type"), Some("application/json"));
    mock.assert();
}

#[test]
fn test_blocking_form_post() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/users")
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("X-Trace", "1")
            .body("name=a+b&id=7");
        then.status(201).body("created");
    });

    let proxy = proxy_for(&server);
    let mut call = proxy.new_call();
    call.set_method(Method::POST);
    call.set_function("/users");
    call.add_header("X-Trace", "1");
    call.add_params([("name", "a b"), ("id", "7")]);

    let response = call.invoke().expect("call failed");
    assert_eq!(response.status, 201);
    assert_eq!(response.text(), "created");
    mock.assert();
}

#[test]
fn test_blocking_multipart_on_the_wire() {
    let server = MockServer::start();
    let proxy = proxy_for(&server);

    let mut call = proxy.new_call();
    call.set_method(Method::POST);
    call.set_function("upload");
    call.add_param("title", "holiday");
    call.add_param_full(Param::file("photo", &b"not really a jpeg"[..], "image/jpeg", "beach.jpg"));

    let payload = call.prepare().expect("prepare failed").payload.clone().expect("no body");
    assert!(payload.content_type.starts_with("multipart/form-data; boundary="));
    let body = String::from_utf8(payload.body.to_vec()).unwrap();
    assert!(body.contains("name=\"photo\"; filename=\"beach.jpg\"\r\nContent-Type: image/jpeg\r\n\r\nnot really a jpeg\r\n"));

    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/upload")
            .header("Content-Type", payload.content_type.as_str())
            .body(body.as_str());
        then.status(200);
    });

    call.invoke().expect("call failed");
    mock.assert();
}

#[test]
fn test_blocking_http_error() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/missing");
        then.status(404).body("no such thing");
    });

    let proxy = proxy_for(&server);
    let mut call = proxy.new_call();
    call.set_function("missing");

    match call.invoke().unwrap_err() {
        RestError::Http { status, reason, body } => {
            assert_eq!(status, 404);
            assert_eq!(reason, "Not Found");
            assert_eq!(body, "no such thing");
        }
        other => panic!("expected RestError::Http, got {:?}", other),
    }
    assert_eq!(call.state(), CallState::Failed);
    assert_eq!(call.status_code(), Some(404));
    assert_eq!(call.payload(), Some(&b"no such thing"[..]));
    mock.assert();
}

#[test]
fn test_blocking_call_cannot_be_reused() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/ping");
        then.status(200).body("pong");
    });

    let proxy = proxy_for(&server);
    let mut call = proxy.new_call();
    call.set_function("ping");
    call.invoke().expect("call failed");

    assert!(matches!(call.invoke().unwrap_err(), RestError::CallReused));
    assert_eq!(call.state(), CallState::Completed);
    mock.assert();
}

#[test]
fn test_blocking_xml_response() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/rsp");
        then.status(200)
            .body(r#"<rsp stat="ok"><user id="42"><name>Ann &amp; Bob</name></user></rsp>"#);
    });

    let proxy = Proxy::new(Config::new(server.base_url()).with_debug(DebugFlags::parse("xml-parser")));
    let mut call = proxy.new_call();
    call.set_function("rsp");
    let root = call.invoke().expect("call failed").xml().expect("invalid xml");
    assert_eq!(call.xml().expect("invalid xml"), root);

    assert_eq!(root.name, "rsp");
    assert_eq!(root.attr("stat"), Some("ok"));
    let user = root.find("user").expect("no user");
    assert_eq!(user.attr("id"), Some("42"));
    assert_eq!(user.find("name").and_then(|n| n.content.as_deref()), Some("Ann & Bob"));
}

#[test]
fn test_blocking_connect_error() {
    let proxy = Proxy::new(Config::new("http://127.0.0.1:9/").with_connect_timeout(Duration::from_secs(2)));
    let mut call = proxy.new_call();

    let err = call.invoke().unwrap_err();
    assert!(err.is_transport(), "expected transport error, got {:?}", err);
    assert_eq!(err.transport_kind(), Some(TransportErrorKind::Connect));
    assert_eq!(call.state(), CallState::Failed);
}

#[test]
fn test_bound_proxy() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/v2/items");
        then.status(200);
    });

    let proxy = Proxy::new(Config::new(format!("{}/%s/", server.base_url())));
    let mut unbound = proxy.new_call();
    assert!(matches!(unbound.invoke().unwrap_err(), RestError::Binding(_)));

    proxy.bind(&["v2"]).unwrap();
    let mut call = proxy.new_call();
    call.set_function("items");
    call.invoke().expect("call failed");
    mock.assert();
}

#[tokio::test]
async fn test_async_invoke() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path("/items/1")
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body("state=done");
            then.status(200).body(r#"{"ok":true}"#);
        })
        .await;

    let proxy = proxy_for(&server);
    let mut call = proxy.new_call();
    call.set_method(Method::PUT);
    call.set_function("items/1");
    call.add_param("state", "done");

    let response = call.invoke_async(&CancellationToken::new()).await.expect("call failed");
    assert_eq!(response.get("ok"), Some(serde_json::json!(true)));
    assert_eq!(call.state(), CallState::Completed);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_async_cancel_in_flight() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/slow");
            then.status(200).delay(Duration::from_secs(5));
        })
        .await;

    let proxy = proxy_for(&server);
    let mut call = proxy.new_call();
    call.set_function("slow");

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let result = tokio::time::timeout(Duration::from_secs(3), call.invoke_async(&token))
        .await
        .expect("cancellation did not interrupt the call");
    assert!(matches!(result.unwrap_err(), RestError::Cancelled));
    assert_eq!(call.state(), CallState::Cancelled);
    assert!(call.response().is_none());
}

#[tokio::test]
async fn test_spawn_callback_fires_once() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/ok");
            then.status(200).body("fine");
        })
        .await;

    let proxy = proxy_for(&server);
    let mut call = proxy.new_call();
    call.set_function("ok");

    let fired = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(None));
    let (fired_cb, seen_cb) = (fired.clone(), seen.clone());
    let handle = call.spawn(None, move |call, result| {
        fired_cb.fetch_add(1, Ordering::SeqCst);
        *seen_cb.lock().unwrap() = Some((call.state(), result.is_ok(), call.payload().map(<[u8]>::to_vec)));
    });

    handle.join().await.expect("join failed");
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(
        seen.lock().unwrap().take(),
        Some((CallState::Completed, true, Some(b"fine".to_vec())))
    );
}

#[tokio::test]
async fn test_spawn_cancel_fires_callback_with_cancelled() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/slow");
            then.status(200).delay(Duration::from_secs(5));
        })
        .await;

    let proxy = proxy_for(&server);
    let mut call = proxy.new_call();
    call.set_function("slow");

    let fired = Arc::new(AtomicUsize::new(0));
    let cancelled = Arc::new(Mutex::new(false));
    let (fired_cb, cancelled_cb) = (fired.clone(), cancelled.clone());
    let handle = call.spawn(None, move |call, result| {
        fired_cb.fetch_add(1, Ordering::SeqCst);
        *cancelled_cb.lock().unwrap() =
            matches!(result, Err(RestError::Cancelled)) && call.state() == CallState::Cancelled;
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.cancel();
    tokio::time::timeout(Duration::from_secs(3), handle.join())
        .await
        .expect("callback did not run")
        .expect("join failed");

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(*cancelled.lock().unwrap());
}

#[tokio::test]
async fn test_owner_drop_cancels_spawned_call() {
    struct Owner {
        _guard: tokio_util::sync::DropGuard,
    }

    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/slow");
            then.status(200).delay(Duration::from_secs(5));
        })
        .await;

    let owner_token = CancellationToken::new();
    let owner = Owner {
        _guard: owner_token.clone().drop_guard(),
    };

    let proxy = proxy_for(&server);
    let mut call = proxy.new_call();
    call.set_function("slow");

    let (tx, rx) = tokio::sync::oneshot::channel();
    let handle = call.spawn(Some(&owner_token), move |_call, result| {
        let _ = tx.send(result.is_err_and(|e| e.is_cancelled()));
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(owner);

    let was_cancelled = tokio::time::timeout(Duration::from_secs(3), rx)
        .await
        .expect("callback did not run")
        .expect("callback dropped");
    assert!(was_cancelled);
    handle.join().await.expect("join failed");
}

#[tokio::test]
async fn test_continuous_streams_chunks() {
    let server = MockServer::start_async().await;
    let body = "line\n".repeat(5000);
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/stream");
            then.status(200).body(body.as_str());
        })
        .await;

    let proxy = proxy_for(&server);
    let mut call = proxy.new_call();
    call.set_function("stream");

    let mut received = Vec::new();
    let response = call
        .invoke_continuous(&CancellationToken::new(), |chunk| received.extend_from_slice(chunk))
        .await
        .expect("call failed");

    assert_eq!(response.status, 200);
    assert!(response.payload.is_empty());
    assert_eq!(received, body.as_bytes());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_upload_reports_progress() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/upload");
            then.status(200).body("stored");
        })
        .await;

    let proxy = proxy_for(&server);
    let mut call = proxy.new_call();
    call.set_method(Method::POST);
    call.set_function("upload");
    call.add_param_full(Param::binary("blob", vec![7u8; 20_000], "application/octet-stream"));

    let total = call.prepare().expect("prepare failed").payload.as_ref().map(|p| p.len()).unwrap() as u64;

    let events = Arc::new(Mutex::new(Vec::new()));
    let recorder = events.clone();
    let response = call
        .invoke_upload(
            &CancellationToken::new(),
            Arc::new(move |sent, total| recorder.lock().unwrap().push((sent, total))),
        )
        .await
        .expect("upload failed");
    assert_eq!(response.text(), "stored");

    let events = events.lock().unwrap();
    assert_eq!(events.first(), Some(&(0, total)));
    assert_eq!(events.last(), Some(&(total, total)));
    assert!(events.len() >= 4);
    assert!(events.windows(2).all(|w| w[0].0 <= w[1].0));
    mock.assert_async().await;
}
