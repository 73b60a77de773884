//! ==============================================================================
//! realtime_db.rs - hosted realtime database over server-sent events
//! ==============================================================================
//!
//! purpose:
//!     subscribes to `{database_url}/{path}.json` with
//!     `Accept: text/event-stream`. the server answers with a stream of
//!     `put` / `patch` events describing changes below the path, plus
//!     `keep-alive` pings. we keep a local copy of the tree at the path and
//!     publish the whole value after every change.
//!
//! event handling:
//!     - put   {"path": p, "data": d} : replace the node at p with d
//!     - patch {"path": p, "data": d} : merge the keys of d into the node at p
//!     - keep-alive                   : ignored
//!     - cancel / auth_revoked        : published as a failed subscription
//!
//! ```text
//!     a null tree is published as `DataEvent::Absent`.
//! ```
//!
//! liveness:
//!     `LinkMonitor` goes up on a 2xx response and down when the stream ends
//!     or errors. reconnects happen here after `reconnect_delay`; the session
//!     controller only ever sees the resulting connectivity events.
//!
//! ==============================================================================

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::link::LinkMonitor;
use super::{subscription, ConnectivityEvent, DataEvent, Publisher, PushSource, Subscription};
use crate::error::SourceError;

pub struct RealtimeDbSource {
    client: reqwest::Client,
    database_url: String,
    reconnect_delay: Duration,
    link: LinkMonitor,
}

impl RealtimeDbSource {
    pub fn new(database_url: impl Into<String>, reconnect_delay: Duration) -> Result<Self, SourceError> {
        let database_url = database_url.into();
        if !(database_url.starts_with("http://") || database_url.starts_with("https://")) {
            return Err(SourceError::InvalidAddress(database_url));
        }
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client, database_url, reconnect_delay, link: LinkMonitor::new() })
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}.json",
            self.database_url.trim_end_matches('/'),
            path.trim_matches('/')
        )
    }
}

impl PushSource for RealtimeDbSource {
    fn subscribe_data(&self, path: &str) -> Result<Subscription<DataEvent>, SourceError> {
        let (publisher, sub) = subscription();
        let url = self.endpoint(path);
        debug!("[SOURCE] streaming {}", url);
        tokio::spawn(run(
            self.client.clone(),
            url,
            self.reconnect_delay,
            self.link.clone(),
            publisher,
        ));
        Ok(sub)
    }

    fn subscribe_connectivity(&self) -> Result<Subscription<ConnectivityEvent>, SourceError> {
        Ok(self.link.subscribe())
    }

    fn describe(&self) -> String {
        format!("realtime database {}", self.database_url)
    }
}

// ==============================================================================
// stream loop
// ==============================================================================

async fn run(
    client: reqwest::Client,
    url: String,
    delay: Duration,
    link: LinkMonitor,
    publisher: Publisher<DataEvent>,
) {
    loop {
        let response = tokio::select! {
            res = client.get(&url).header(ACCEPT, "text/event-stream").send() => res,
            _ = publisher.closed() => return,
        };

        match response {
            Ok(resp) if resp.status().is_success() => {
                info!("[SOURCE] stream open: {}", url);
                link.set_up();

                let mut body = Box::pin(resp.bytes_stream());
                let mut parser = SseParser::default();
                let mut tree = Value::Null;

                loop {
                    let chunk = tokio::select! {
                        chunk = body.next() => chunk,
                        _ = publisher.closed() => return,
                    };
                    match chunk {
                        Some(Ok(bytes)) => {
                            for frame in parser.feed(&bytes) {
                                let Some(event) = handle_frame(&mut tree, &frame) else {
                                    continue;
                                };
                                if !publisher.publish(event).await {
                                    return;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            warn!("[SOURCE] stream error: {}", e);
                            link.set_down(Some(format!("stream error: {}", e)));
                            break;
                        }
                        None => {
                            warn!("[SOURCE] stream closed by server");
                            link.set_down(None);
                            break;
                        }
                    }
                }
            }
            Ok(resp) => {
                warn!("[SOURCE] {} answered {}", url, resp.status());
                link.set_down(Some(format!("realtime database answered {}", resp.status())));
            }
            Err(e) => {
                debug!("[SOURCE] request to {} failed: {}", url, e);
                link.set_down(Some(format!("cannot reach realtime database: {}", e)));
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = publisher.closed() => return,
        }
    }
}

/// apply one server-sent event to the cached tree
///
/// returns the event to publish, if any.
pub fn handle_frame(tree: &mut Value, frame: &SseFrame) -> Option<DataEvent> {
    match frame.event.as_str() {
        "put" | "patch" => {
            let body: Value = match serde_json::from_str(&frame.data) {
                Ok(v) => v,
                Err(e) => return Some(DataEvent::Malformed(format!("undecodable {} event: {}", frame.event, e))),
            };
            let Some(path) = body.get("path").and_then(Value::as_str) else {
                return Some(DataEvent::Malformed(format!("{} event without a path", frame.event)));
            };
            let data = body.get("data").cloned().unwrap_or(Value::Null);
            if frame.event == "put" {
                put(tree, path, data);
            } else {
                patch(tree, path, data);
            }
            Some(if tree.is_null() { DataEvent::Absent } else { DataEvent::Value(tree.clone()) })
        }
        "keep-alive" => None,
        "cancel" => Some(DataEvent::Failed("subscription cancelled by the database".to_string())),
        "auth_revoked" => Some(DataEvent::Failed("database credential revoked".to_string())),
        other => {
            debug!("[SOURCE] ignoring event '{}'", other);
            None
        }
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// replace the node at `path`; null removes it
fn put(tree: &mut Value, path: &str, data: Value) {
    put_at(tree, &segments(path), data);
    if is_empty_node(tree) {
        *tree = Value::Null;
    }
}

/// children left null or empty are dropped from their parent, so removing
/// the last leaf below a key removes the key too
fn put_at(node: &mut Value, segs: &[&str], data: Value) {
    let Some((first, rest)) = segs.split_first() else {
        *node = data;
        return;
    };
    if !node.is_object() {
        if data.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    let Value::Object(map) = &mut *node else { return };
    let child = map.entry(first.to_string()).or_insert(Value::Null);
    put_at(child, rest, data);
    if is_empty_node(child) {
        map.remove(*first);
    }
    let emptied = map.is_empty();
    if emptied {
        *node = Value::Null;
    }
}

fn is_empty_node(node: &Value) -> bool {
    match node {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// merge each child of `data` into the node at `path`
fn patch(tree: &mut Value, path: &str, data: Value) {
    let base = path.trim_end_matches('/');
    match data {
        Value::Object(children) => {
            for (key, value) in children {
                put(tree, &format!("{}/{}", base, key), value);
            }
        }
        other => put(tree, path, other),
    }
}

// ==============================================================================
// server-sent events parser
// ==============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

/// incremental `text/event-stream` parser; chunks may split lines anywhere
#[derive(Debug, Default)]
pub struct SseParser {
    pending: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.pending.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(frame) = self.dispatch() {
                    frames.push(frame);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }
        frames
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        let data = std::mem::take(&mut self.data);
        if event.is_none() && data.is_empty() {
            return None;
        }
        Some(SseFrame {
            event: event.unwrap_or_else(|| "message".to_string()),
            data: data.join("\n"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    fn frame(event: &str, data: Value) -> SseFrame {
        SseFrame { event: event.to_string(), data: data.to_string() }
    }

    #[test]
    fn parser_handles_split_chunks() {
        let mut p = SseParser::default();
        assert!(p.feed(b"event: put\nda").is_empty());
        let frames = p.feed(b"ta: {\"path\":\"/\",\"data\":null}\n\nevent: keep-alive\ndata: null\n\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event, "put");
        assert_eq!(frames[0].data, r#"{"path":"/","data":null}"#);
        assert_eq!(frames[1].event, "keep-alive");
    }

    #[test]
    fn parser_ignores_comments_and_crlf() {
        let mut p = SseParser::default();
        let frames = p.feed(b": hello\r\nevent: cancel\r\ndata: null\r\n\r\n");
        assert_eq!(frames, vec![SseFrame { event: "cancel".into(), data: "null".into() }]);
    }

    #[test]
    fn root_put_replaces_tree() {
        let mut tree = Value::Null;
        let ev = handle_frame(&mut tree, &frame("put", json!({"path": "/", "data": {"CPS": 80, "Dose_uSv": 0.5}})));
        assert_eq!(ev, Some(DataEvent::Value(json!({"CPS": 80, "Dose_uSv": 0.5}))));
    }

    #[test]
    fn null_root_is_absent() {
        let mut tree = json!({"CPS": 1});
        let ev = handle_frame(&mut tree, &frame("put", json!({"path": "/", "data": null})));
        assert_eq!(ev, Some(DataEvent::Absent));
    }

    #[test]
    fn child_put_and_patch_update_cached_tree() {
        let mut tree = json!({"CPS": 80, "Dose_uSv": 0.5});
        let ev = handle_frame(&mut tree, &frame("put", json!({"path": "/Dose_uSv", "data": 3.2})));
        assert_eq!(ev, Some(DataEvent::Value(json!({"CPS": 80, "Dose_uSv": 3.2}))));

        let ev = handle_frame(&mut tree, &frame("patch", json!({"path": "/", "data": {"CPS": 90, "CPM": 5000}})));
        assert_eq!(ev, Some(DataEvent::Value(json!({"CPS": 90, "CPM": 5000, "Dose_uSv": 3.2}))));
    }

    #[test]
    fn removing_last_child_empties_tree() {
        let mut tree = json!({"CPS": 80});
        let ev = handle_frame(&mut tree, &frame("put", json!({"path": "/CPS", "data": null})));
        assert_eq!(ev, Some(DataEvent::Absent));
    }

    #[test]
    fn nested_delete_prunes_empty_parents() {
        let mut tree = json!({"reading": {"CPS": 1}});
        let ev = handle_frame(&mut tree, &frame("put", json!({"path": "/reading/CPS", "data": null})));
        assert_eq!(ev, Some(DataEvent::Absent));
        assert_eq!(tree, Value::Null);

        let mut tree = json!({"reading": {"CPS": 1}, "Dose_uSv": 0.2});
        let ev = handle_frame(&mut tree, &frame("put", json!({"path": "/reading/CPS", "data": null})));
        assert_eq!(ev, Some(DataEvent::Value(json!({"Dose_uSv": 0.2}))));
    }

    #[test]
    fn deleting_a_missing_key_changes_nothing() {
        let mut tree = json!({"CPS": 1});
        let ev = handle_frame(&mut tree, &frame("put", json!({"path": "/gone/deeper", "data": null})));
        assert_eq!(ev, Some(DataEvent::Value(json!({"CPS": 1}))));
    }

    #[test]
    fn control_events() {
        let mut tree = Value::Null;
        assert_eq!(handle_frame(&mut tree, &frame("keep-alive", Value::Null)), None);
        assert!(matches!(handle_frame(&mut tree, &frame("cancel", Value::Null)), Some(DataEvent::Failed(_))));
        assert!(matches!(
            handle_frame(&mut tree, &SseFrame { event: "put".into(), data: "{oops".into() }),
            Some(DataEvent::Malformed(_))
        ));
    }

    #[test]
    fn endpoint_joins_path() {
        let src = RealtimeDbSource::new("https://example.test/", Duration::from_secs(1)).unwrap();
        assert_eq!(src.endpoint("/sensor/"), "https://example.test/sensor.json");
        assert!(RealtimeDbSource::new("example.test", Duration::from_secs(1)).is_err());
    }

    // ------------------------------------------------------------------
    // stream loop against a local http server
    // ------------------------------------------------------------------

    const WAIT: Duration = Duration::from_secs(5);

    async fn read_request(sock: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = sock.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    async fn serve_put(sock: &mut TcpStream, data: Value) {
        read_request(sock).await;
        let body = format!(
            "event: put\ndata: {}\n\n",
            json!({"path": "/", "data": data})
        );
        let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n";
        sock.write_all(head.as_bytes()).await.unwrap();
        sock.write_all(body.as_bytes()).await.unwrap();
    }

    async fn next<T>(sub: &mut Subscription<T>) -> T {
        tokio::time::timeout(WAIT, sub.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("subscription closed")
    }

    #[tokio::test]
    async fn stream_goes_up_down_and_reconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (step, mut steps) = mpsc::unbounded_channel::<()>();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            serve_put(&mut sock, json!({"Dose_uSv": 0.5})).await;
            steps.recv().await;
            drop(sock);

            // the client has reconnected by now and waits for an answer
            steps.recv().await;
            let (mut sock, _) = listener.accept().await.unwrap();
            serve_put(&mut sock, json!({"Dose_uSv": 2.5})).await;
            steps.recv().await;
        });

        let source = RealtimeDbSource::new(format!("http://{}", addr), Duration::from_millis(50)).unwrap();
        let mut conn = source.subscribe_connectivity().unwrap();
        let mut data = source.subscribe_data("sensor").unwrap();

        assert_eq!(next(&mut data).await, DataEvent::Value(json!({"Dose_uSv": 0.5})));
        assert_eq!(next(&mut conn).await, ConnectivityEvent::Connected(true));

        step.send(()).unwrap();
        assert_eq!(next(&mut conn).await, ConnectivityEvent::Connected(false));

        step.send(()).unwrap();
        assert_eq!(next(&mut conn).await, ConnectivityEvent::Connected(true));
        assert_eq!(next(&mut data).await, DataEvent::Value(json!({"Dose_uSv": 2.5})));
    }

    #[tokio::test]
    async fn error_status_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else { return };
                read_request(&mut sock).await;
                let reply = "HTTP/1.1 401 Unauthorized\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
                let _ = sock.write_all(reply.as_bytes()).await;
            }
        });

        let source = RealtimeDbSource::new(format!("http://{}", addr), Duration::from_millis(50)).unwrap();
        let mut conn = source.subscribe_connectivity().unwrap();
        let _data = source.subscribe_data("sensor").unwrap();

        match next(&mut conn).await {
            ConnectivityEvent::Error(msg) => assert!(msg.contains("answered 401"), "{}", msg),
            other => panic!("expected a transport error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unreachable_database_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let source = RealtimeDbSource::new(format!("http://{}", addr), Duration::from_millis(50)).unwrap();
        let mut conn = source.subscribe_connectivity().unwrap();
        let _data = source.subscribe_data("sensor").unwrap();

        match next(&mut conn).await {
            ConnectivityEvent::Error(msg) => assert!(msg.contains("cannot reach"), "{}", msg),
            other => panic!("expected a transport error, got {:?}", other),
        }
    }
}
