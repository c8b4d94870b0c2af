//! Push channel reading the relay's `/sse/changes` stream over HTTP.

use std::sync::Arc;

use async_stream::stream;
use futures::{FutureExt, Stream, StreamExt, future::BoxFuture, pin_mut};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    dto::sse::{ChangeEvent, ChangeKind, LAGGED_EVENT, Topic},
    services::sync::{
        TOPICS,
        push::{LocalPushChannel, PushChannel, PushError, Subscription, SubscriptionId},
    },
};

const EVENT_STREAM: &str = "text/event-stream";

/// Push channel backed by one long-lived SSE connection.
///
/// The connection is opened in [`SsePushChannel::connect`] so that an unreachable relay
/// is reported before any subscription is attempted. When the connection ends every
/// subscription stream ends with it.
pub struct SsePushChannel {
    hub: Arc<LocalPushChannel>,
    reader: JoinHandle<()>,
}

impl SsePushChannel {
    pub async fn connect(url: &str) -> Result<Self, PushError> {
        let connect_error = |source: reqwest::Error| PushError::Connect {
            url: url.to_string(),
            source: Box::new(source),
        };

        let client = reqwest::Client::builder().build().map_err(connect_error)?;
        let response = client
            .get(url)
            .header(ACCEPT, EVENT_STREAM)
            .send()
            .await
            .map_err(connect_error)?;

        let status = response.status();
        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with(EVENT_STREAM));
        if !status.is_success() || !is_event_stream {
            return Err(PushError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        info!(url, "push stream connected");
        let hub = Arc::new(LocalPushChannel::new(64));
        let reader = tokio::spawn(read_events(response, Arc::clone(&hub)));
        Ok(Self { hub, reader })
    }
}

impl Drop for SsePushChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl PushChannel for SsePushChannel {
    fn subscribe(&self, topic: Topic) -> BoxFuture<'_, Result<Subscription, PushError>> {
        if self.reader.is_finished() {
            return async move { Err(PushError::Unavailable("push stream closed".into())) }.boxed();
        }
        self.hub.subscribe(topic)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> BoxFuture<'_, ()> {
        self.hub.unsubscribe(id)
    }
}

async fn read_events(response: reqwest::Response, hub: Arc<LocalPushChannel>) {
    let events = decode_events(response);
    pin_mut!(events);
    while let Some(event) = events.next().await {
        hub.publish(event);
    }
    hub.close();
}

fn decode_events(response: reqwest::Response) -> impl Stream<Item = ChangeEvent> {
    stream! {
        let mut body = response.bytes_stream();
        let mut parser = EventStreamParser::default();
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    for event in parser.feed(&bytes) {
                        yield event;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "push stream failed");
                    return;
                }
            }
        }
        info!("push stream closed by the relay");
    }
}

/// Incremental `text/event-stream` decoder yielding change events.
#[derive(Debug, Default)]
pub struct EventStreamParser {
    buffer: Vec<u8>,
}

impl EventStreamParser {
    /// Append `chunk` and return every change event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ChangeEvent> {
        self.buffer
            .extend(chunk.iter().copied().filter(|byte| *byte != b'\r'));

        let mut events = Vec::new();
        while let Some(end) = self.buffer.windows(2).position(|pair| pair == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
            events.extend(parse_block(&String::from_utf8_lossy(&block)));
        }
        events
    }
}

fn parse_block(block: &str) -> Vec<ChangeEvent> {
    let mut name = None;
    let mut data = Vec::new();
    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => name = Some(value),
            "data" => data.push(value),
            _ => {}
        }
    }

    let Some(name) = name else {
        return Vec::new();
    };
    if name == LAGGED_EVENT {
        debug!("push stream lagged on the relay; resyncing every topic");
        return TOPICS.into_iter().map(resync).collect();
    }
    let Some(topic) = Topic::from_event_name(name) else {
        return Vec::new();
    };

    let payload = data.join("\n");
    match serde_json::from_str::<ChangeEvent>(&payload) {
        Ok(event) if event.topic == topic => vec![event],
        Ok(_) | Err(_) => {
            debug!(topic = topic.event_name(), "unexpected push payload; treating as update");
            vec![resync(topic)]
        }
    }
}

fn resync(topic: Topic) -> ChangeEvent {
    ChangeEvent {
        topic,
        kind: ChangeKind::Update,
        session_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_split_across_chunks_are_reassembled() {
        let mut parser = EventStreamParser::default();
        assert!(parser.feed(b"event: presence\ndata: {\"topic\":\"pres").is_empty());
        let events = parser.feed(b"ence\",\"kind\":\"insert\",\"session_id\":\"alice\"}\n\n");
        assert_eq!(
            events,
            vec![ChangeEvent {
                topic: Topic::Presence,
                kind: ChangeKind::Insert,
                session_id: Some("alice".into()),
            }]
        );
    }

    #[test]
    fn keep_alive_comments_and_unknown_events_are_skipped() {
        let mut parser = EventStreamParser::default();
        let events = parser.feed(b": keep-alive\n\nevent: status\ndata: {}\n\n");
        assert!(events.is_empty());
    }

    #[test]
    fn crlf_framing_and_bad_payloads_still_signal_a_change() {
        let mut parser = EventStreamParser::default();
        let events = parser.feed(b"event: readiness\r\ndata: not json\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].topic, Topic::Readiness);
        assert_eq!(events[0].kind, ChangeKind::Update);
    }

    #[test]
    fn relay_lag_marker_resyncs_every_topic() {
        let mut parser = EventStreamParser::default();
        let events = parser.feed(b"event: lagged\ndata: {}\n\n");
        let topics: Vec<Topic> = events.iter().map(|event| event.topic).collect();
        assert_eq!(topics, vec![Topic::Presence, Topic::Readiness]);
        assert!(events.iter().all(|event| event.kind == ChangeKind::Update));
    }
}
