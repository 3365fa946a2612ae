//! Protocol-engine tests against a scripted gateway server.
//!
//! The server side accepts real WebSocket connections and plays the
//! gateway's role: Hello, READY/RESUMED dispatches, invalid sessions,
//! close codes. REST discovery and the credential check are served by
//! wiremock.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lanyard::{ClientConfig, Error, EventKind, Handlers, Session};

type Ws = WebSocketStream<TcpStream>;

/// Route engine traces to the test harness; `RUST_LOG=lanyard=trace`
/// surfaces the full opcode flow on failures.
fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

async fn rest_server(gateway_addr: &str) -> MockServer {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gateway"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "url": format!("ws://{gateway_addr}") })),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/@me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "u1",
            "username": "selfbot",
            "bot": true
        })))
        .mount(&server)
        .await;
    server
}

fn config(server: &MockServer) -> ClientConfig {
    ClientConfig {
        token: "t".into(),
        api_url: server.uri(),
        ..ClientConfig::default()
    }
}

async fn accept(listener: &TcpListener) -> Ws {
    let (stream, _) = listener.accept().await.expect("accept");
    accept_async(stream).await.expect("websocket handshake")
}

async fn send_json(ws: &mut Ws, value: Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("server send");
}

/// Read the next text frame as JSON, skipping control frames.
async fn next_json(ws: &mut Ws) -> Value {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(&text).expect("client sent valid JSON")
            }
            Some(Ok(Message::Close(frame))) => panic!("client closed early: {frame:?}"),
            Some(Ok(_)) => {}
            Some(Err(err)) => panic!("server read error: {err}"),
            None => panic!("client hung up"),
        }
    }
}

/// Read frames until the client closes, returning the close code if any.
async fn read_until_close(ws: &mut Ws) -> Option<u16> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Close(frame))) => return frame.map(|f| u16::from(f.code)),
            Some(Ok(_)) => {}
            Some(Err(_)) | None => return None,
        }
    }
}

async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let result = tokio::time::timeout(Duration::from_secs(10), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {what}");
}

fn hello(interval_ms: u64) -> Value {
    json!({ "op": 10, "d": { "heartbeat_interval": interval_ms, "_trace": ["fake-gateway"] } })
}

#[tokio::test]
async fn cold_connect_identifies_heartbeats_and_mirrors_ready() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let rest = rest_server(&addr).await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        send_json(&mut ws, hello(150)).await;

        let identify = next_json(&mut ws).await;
        assert_eq!(identify["op"], 2);
        assert_eq!(identify["d"]["token"], "t");
        assert_eq!(identify["d"]["compress"], false);
        assert_eq!(identify["d"]["large_threshold"], 50);
        assert_eq!(identify["d"]["shard"], json!([0, 1]));
        assert!(identify["d"]["properties"]["$os"].is_string());

        send_json(
            &mut ws,
            json!({
                "op": 0, "t": "READY", "s": 1,
                "d": {
                    "session_id": "abc",
                    "user": { "id": "u1", "username": "selfbot" },
                    "guilds": [{ "id": "g1", "unavailable": true }],
                    "private_channels": []
                }
            }),
        )
        .await;

        // Two heartbeats at the advertised cadence, each acked.
        let first = next_json(&mut ws).await;
        assert_eq!(first["op"], 1);
        send_json(&mut ws, json!({ "op": 11 })).await;

        let second = next_json(&mut ws).await;
        assert_eq!(second["op"], 1);
        assert_eq!(second["d"], 1);
        send_json(&mut ws, json!({ "op": 11 })).await;
    });

    let session = Session::connect(config(&rest), |_| {}).await.unwrap();

    wait_for("READY state", || session.state().self_user.is_some()).await;
    assert_eq!(session.self_user().unwrap().id, "u1");
    assert!(session.state().guilds.contains_key("g1"));
    assert_eq!(session.sequence(), Some(1));
    assert_eq!(session.session_id().as_deref(), Some("abc"));

    server.await.unwrap();
    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn ready_events_reach_registered_handlers_before_user_code_runs() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let rest = rest_server(&addr).await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        send_json(&mut ws, hello(45_000)).await;
        let identify = next_json(&mut ws).await;
        assert_eq!(identify["op"], 2);
        send_json(
            &mut ws,
            json!({
                "op": 0, "t": "READY", "s": 1,
                "d": { "session_id": "abc", "user": { "id": "u1" }, "guilds": [], "private_channels": [] }
            }),
        )
        .await;
        send_json(
            &mut ws,
            json!({ "op": 0, "t": "GUILD_CREATE", "s": 2, "d": { "id": "g9", "name": "nine" } }),
        )
        .await;
        // Keep the socket open until the client disconnects.
        read_until_close(&mut ws).await;
    });

    let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
    let session = Session::connect(config(&rest), |handlers: &mut Handlers| {
        handlers.on(EventKind::GuildCreate, move |session, event| {
            let seen_tx = seen_tx.clone();
            async move {
                let mirrored = session.state().guilds.contains_key("g9");
                seen_tx.send((event.data["id"].as_str().unwrap().to_string(), mirrored)).ok();
                Ok(())
            }
        });
    })
    .await
    .unwrap();

    let (guild_id, mirrored) = tokio::time::timeout(Duration::from_secs(10), seen_rx.recv())
        .await
        .expect("handler ran")
        .unwrap();
    assert_eq!(guild_id, "g9");
    assert!(mirrored, "built-in handler must run before the user handler");

    session.disconnect().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn close_resumes_with_session_and_sequence() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let rest = rest_server(&addr).await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        send_json(&mut ws, hello(45_000)).await;
        assert_eq!(next_json(&mut ws).await["op"], 2);
        send_json(
            &mut ws,
            json!({
                "op": 0, "t": "READY", "s": 1,
                "d": { "session_id": "abc", "user": { "id": "u1" }, "guilds": [], "private_channels": [] }
            }),
        )
        .await;

        ws.close(Some(CloseFrame {
            code: 1001.into(),
            reason: "".into(),
        }))
        .await
        .ok();
        while ws.next().await.is_some() {}
        drop(ws);

        // The client reconnects after backoff and resumes.
        let mut ws = accept(&listener).await;
        send_json(&mut ws, hello(45_000)).await;

        let resume = next_json(&mut ws).await;
        assert_eq!(resume["op"], 6, "first frame after reconnect must be Resume");
        assert_eq!(resume["d"]["token"], "t");
        assert_eq!(resume["d"]["session_id"], "abc");
        assert_eq!(resume["d"]["seq"], 1);

        send_json(
            &mut ws,
            json!({ "op": 0, "t": "RESUMED", "s": 2, "d": { "_trace": ["fake-gateway"] } }),
        )
        .await;
        read_until_close(&mut ws).await;
    });

    let session = Session::connect(config(&rest), |_| {}).await.unwrap();

    wait_for("resume completion", || session.sequence() == Some(2)).await;
    assert_eq!(session.session_id().as_deref(), Some("abc"));

    session.disconnect().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn invalid_session_discards_state_and_reidentifies() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let rest = rest_server(&addr).await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        send_json(&mut ws, hello(45_000)).await;
        assert_eq!(next_json(&mut ws).await["op"], 2);
        send_json(
            &mut ws,
            json!({
                "op": 0, "t": "READY", "s": 1,
                "d": { "session_id": "abc", "user": { "id": "u1" }, "guilds": [], "private_channels": [] }
            }),
        )
        .await;

        send_json(&mut ws, json!({ "op": 9, "d": false })).await;

        // A fresh Identify arrives on the same connection after the
        // randomized 1-5 s wait.
        let reidentify = tokio::time::timeout(Duration::from_secs(8), next_json(&mut ws))
            .await
            .expect("identify after invalid session");
        assert_eq!(reidentify["op"], 2);
        assert_eq!(reidentify["d"]["token"], "t");

        send_json(
            &mut ws,
            json!({
                "op": 0, "t": "READY", "s": 2,
                "d": { "session_id": "def", "user": { "id": "u1" }, "guilds": [], "private_channels": [] }
            }),
        )
        .await;
        read_until_close(&mut ws).await;
    });

    let session = Session::connect(config(&rest), |_| {}).await.unwrap();

    wait_for("fresh session id", || {
        session.session_id().as_deref() == Some("def")
    })
    .await;
    assert_eq!(session.sequence(), Some(2));

    session.disconnect().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn unacknowledged_heartbeat_forces_resume() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let rest = rest_server(&addr).await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        send_json(&mut ws, hello(100)).await;
        assert_eq!(next_json(&mut ws).await["op"], 2);
        send_json(
            &mut ws,
            json!({
                "op": 0, "t": "READY", "s": 1,
                "d": { "session_id": "abc", "user": { "id": "u1" }, "guilds": [], "private_channels": [] }
            }),
        )
        .await;

        // Never ack; the client declares the connection zombied and closes
        // with 4000.
        let close_code = read_until_close(&mut ws).await;
        assert_eq!(close_code, Some(4000));
        drop(ws);

        let mut ws = accept(&listener).await;
        send_json(&mut ws, hello(45_000)).await;
        let resume = next_json(&mut ws).await;
        assert_eq!(resume["op"], 6);
        assert_eq!(resume["d"]["session_id"], "abc");
        send_json(
            &mut ws,
            json!({ "op": 0, "t": "RESUMED", "s": 2, "d": {} }),
        )
        .await;
        read_until_close(&mut ws).await;
    });

    let session = Session::connect(config(&rest), |_| {}).await.unwrap();

    wait_for("resume after zombie", || session.sequence() == Some(2)).await;

    session.disconnect().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn authentication_close_code_is_permanent() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let rest = rest_server(&addr).await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        send_json(&mut ws, hello(45_000)).await;
        assert_eq!(next_json(&mut ws).await["op"], 2);

        ws.close(Some(CloseFrame {
            code: 4004.into(),
            reason: "Authentication failed".into(),
        }))
        .await
        .ok();
        while ws.next().await.is_some() {}
    });

    let session = Session::connect(config(&rest), |_| {}).await.unwrap();

    wait_for("permanent failure", || session.is_closed()).await;
    assert!(matches!(
        session.take_failure(),
        Some(Error::Auth { code: 4004 })
    ));
    // No second connection is attempted: the listener has no pending accept
    // by the time the session reports failure, and operations now refuse.
    assert!(matches!(
        session.send_message("c", "hi").await,
        Err(Error::Closed)
    ));

    server.await.unwrap();
}
