//! Raw-socket push source.
//!
//! The serial-to-network bridge writes one json object per line over tcp.
//! The connection is re-established after `reconnect_delay` whenever it
//! drops; the connectivity channel reflects each attempt.

use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use super::link::LinkMonitor;
use super::{subscription, ConnectivityEvent, DataEvent, Publisher, PushSource, Subscription};
use crate::error::SourceError;

pub struct SocketSource {
    addr: String,
    reconnect_delay: Duration,
    link: LinkMonitor,
}

impl SocketSource {
    pub fn new(addr: impl Into<String>, reconnect_delay: Duration) -> Result<Self, SourceError> {
        let addr = addr.into();
        if addr.trim().is_empty() {
            return Err(SourceError::InvalidAddress(addr));
        }
        Ok(Self { addr, reconnect_delay, link: LinkMonitor::new() })
    }
}

/// map one line from the bridge to a data event; blank lines are skipped
pub fn decode_line(line: &str) -> Option<DataEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let event = match serde_json::from_str::<Value>(line) {
        Ok(Value::Null) => DataEvent::Absent,
        Ok(Value::Object(map)) if map.is_empty() => DataEvent::Absent,
        Ok(value) => DataEvent::Value(value),
        Err(e) => DataEvent::Malformed(format!("undecodable sensor line: {}", e)),
    };
    Some(event)
}

impl PushSource for SocketSource {
    fn subscribe_data(&self, path: &str) -> Result<Subscription<DataEvent>, SourceError> {
        let (publisher, sub) = subscription();
        debug!("[SOURCE] socket {} (path '{}' is implied by the stream)", self.addr, path);
        tokio::spawn(run(
            self.addr.clone(),
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
        format!("socket tcp://{}", self.addr)
    }
}

async fn run(addr: String, delay: Duration, link: LinkMonitor, publisher: Publisher<DataEvent>) {
    loop {
        let connected = tokio::select! {
            res = TcpStream::connect(&addr) => res,
            _ = publisher.closed() => return,
        };

        match connected {
            Ok(stream) => {
                info!("[SOURCE] connected to {}", addr);
                link.set_up();
                let mut lines = BufReader::new(stream).lines();
                loop {
                    let next = tokio::select! {
                        next = lines.next_line() => next,
                        _ = publisher.closed() => return,
                    };
                    match next {
                        Ok(Some(line)) => {
                            if let Some(event) = decode_line(&line) {
                                if !publisher.publish(event).await {
                                    return;
                                }
                            }
                        }
                        Ok(None) => {
                            warn!("[SOURCE] {} closed the stream", addr);
                            link.set_down(None);
                            break;
                        }
                        Err(e) => {
                            warn!("[SOURCE] read from {} failed: {}", addr, e);
                            link.set_down(Some(format!("socket read failed: {}", e)));
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                debug!("[SOURCE] connect to {} failed: {}", addr, e);
                link.set_down(Some(format!("cannot reach {}: {}", addr, e)));
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = publisher.closed() => return,
        }
    }
}
