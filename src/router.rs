//! Event router.
//!
//! Turns raw inbound frames into [`TypedEvent`]s and publishes each one on
//! the broadcast channel of its category. Subscribers of one category never
//! see another category's events, and a frame that fails to decode is
//! dropped on its own without disturbing anything else.
//!
//! # Pipeline
//!
//! ```text
//! InboundFrame ─► Envelope ─► EventTag ─► payload ─► category channel
//!                   │            │           │
//!                   └ Dropped    └ Dropped   └ Dropped      heartbeat/ack ─► Consumed
//! ```

use std::collections::HashMap;

use tokio::sync::broadcast;

use crate::constants::CATEGORY_CHANNEL_CAPACITY;
use crate::error::ConnectionError;
use crate::events::{self, DecodeError, EventCategory, EventTag, TypedEvent};
use crate::transport::InboundFrame;

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Decoded and published on this category.
    Published(EventCategory),
    /// A heartbeat or acknowledgement, handled internally.
    Consumed,
    /// Not routable; the error says why.
    Dropped(ConnectionError),
}

/// Short label for a decode failure, for log lines.
fn drop_reason(err: &DecodeError) -> &'static str {
    match err {
        DecodeError::Envelope(_) => "bad envelope",
        DecodeError::UnknownTag(_) => "unknown tag",
        DecodeError::Payload { .. } => "bad payload",
    }
}

/// Per-category publication table.
#[derive(Debug, Clone)]
pub struct EventRouter {
    channels: HashMap<EventCategory, broadcast::Sender<TypedEvent>>,
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new(CATEGORY_CHANNEL_CAPACITY)
    }
}

impl EventRouter {
    /// Build one broadcast channel per category.
    pub fn new(capacity: usize) -> Self {
        let channels = EventCategory::ALL
            .into_iter()
            .map(|category| {
                let (tx, _) = broadcast::channel(capacity.max(1));
                (category, tx)
            })
            .collect();
        Self { channels }
    }

    /// Receive every event of `category` published from now on.
    pub fn subscribe(&self, category: EventCategory) -> broadcast::Receiver<TypedEvent> {
        self.sender(category).subscribe()
    }

    fn sender(&self, category: EventCategory) -> &broadcast::Sender<TypedEvent> {
        // The table is built from EventCategory::ALL and never shrinks.
        &self.channels[&category]
    }

    /// Decode and route one raw text message.
    pub fn handle_message(&self, raw: &str) -> RouteOutcome {
        let envelope = match events::decode_envelope(raw) {
            Ok(envelope) => envelope,
            Err(e) => return Self::dropped(&e),
        };

        let Some(tag) = EventTag::parse(&envelope.event_type) else {
            return Self::dropped(&DecodeError::UnknownTag(envelope.event_type));
        };

        let event = match events::decode_tagged(raw, tag, envelope) {
            Ok(event) => event,
            Err(e) => return Self::dropped(&e),
        };

        match event.category() {
            Some(category) => {
                let receivers = self.sender(category).send(event).unwrap_or(0);
                log::trace!("[Router] {} event to {} subscriber(s)", category, receivers);
                RouteOutcome::Published(category)
            }
            None => {
                match &event {
                    TypedEvent::Acknowledgement(ack) => log::debug!(
                        "[Router] Ack {} status={:?} error={:?}",
                        ack.id.as_deref().unwrap_or("-"),
                        ack.payload.status,
                        ack.payload.error
                    ),
                    _ => log::trace!("[Router] Heartbeat"),
                }
                RouteOutcome::Consumed
            }
        }
    }

    /// Route a text frame; binary frames must hold UTF-8 JSON.
    pub fn handle_frame(&self, frame: &InboundFrame) -> RouteOutcome {
        match frame {
            InboundFrame::Text(text) => self.handle_message(text),
            InboundFrame::Binary(data) => match std::str::from_utf8(data) {
                Ok(text) => self.handle_message(text),
                Err(e) => {
                    log::warn!("[Router] Dropping non-UTF-8 binary frame: {}", e);
                    RouteOutcome::Dropped(ConnectionError::DecodeFailed(e.to_string()))
                }
            },
        }
    }

    /// Route frames from `inbound` until it closes.
    pub async fn run(self, mut inbound: broadcast::Receiver<InboundFrame>) {
        loop {
            match inbound.recv().await {
                Ok(frame) => {
                    self.handle_frame(&frame);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("[Router] Lagged, {} inbound frame(s) skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    log::debug!("[Router] Inbound stream closed");
                    return;
                }
            }
        }
    }

    fn dropped(err: &DecodeError) -> RouteOutcome {
        log::warn!("[Router] Dropping message ({}): {}", drop_reason(err), err);
        RouteOutcome::Dropped(ConnectionError::DecodeFailed(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: &str, fields: &str) -> String {
        let sep = if fields.is_empty() { "" } else { "," };
        format!(r#"{{"type":"{tag}","timestamp":"2024-01-01T00:00:00Z"{sep}{fields}}}"#)
    }

    fn sample(category: EventCategory) -> String {
        match category {
            EventCategory::Project => frame("project.update", r#""projectId":"p1""#),
            EventCategory::Chat => frame("chat.message", r#""chatId":"c1""#),
            EventCategory::File => frame("file.change", r#""path":"a.rs""#),
            EventCategory::Terminal => frame("terminal.output", r#""sessionId":"s1","content":"hi""#),
            EventCategory::Collaboration => frame("collaboration.join", r#""userId":"u1""#),
            EventCategory::System => frame("system.notification", r#""message":"hello""#),
        }
    }

    #[test]
    fn test_chat_message_published_on_chat_only() {
        let router = EventRouter::default();
        let mut chat = router.subscribe(EventCategory::Chat);
        let mut project = router.subscribe(EventCategory::Project);

        let outcome = router.handle_message(&frame(
            "chat.message",
            r#""chatId":"c1","action":"messageAdded","messageId":"m1""#,
        ));
        assert_eq!(outcome, RouteOutcome::Published(EventCategory::Chat));

        let TypedEvent::Chat(event) = chat.try_recv().expect("chat event") else {
            panic!("expected chat event");
        };
        assert_eq!(event.payload.chat_id, "c1");
        assert_eq!(event.payload.message_id.as_deref(), Some("m1"));
        assert!(project.try_recv().is_err());
    }

    #[test]
    fn test_category_isolation() {
        let router = EventRouter::default();
        let mut receivers: Vec<_> = EventCategory::ALL
            .into_iter()
            .map(|c| (c, router.subscribe(c)))
            .collect();

        for category in EventCategory::ALL {
            assert_eq!(
                router.handle_message(&sample(category)),
                RouteOutcome::Published(category)
            );
        }

        for (category, rx) in &mut receivers {
            let event = rx.try_recv().expect("one event");
            assert_eq!(event.category(), Some(*category));
            assert!(rx.try_recv().is_err(), "{category} saw a second event");
        }
    }

    #[test]
    fn test_decode_isolation() {
        let router = EventRouter::default();
        let mut file = router.subscribe(EventCategory::File);

        let outcomes = [
            router.handle_message(&frame("file.create", r#""path":"a.rs""#)),
            router.handle_message(r#"{"type":"file.create","timestamp":"2024-01-01T00:00:00Z","path":"#),
            router.handle_message(&frame("file.update", r#""path":"b.rs""#)),
        ];
        assert!(matches!(outcomes[1], RouteOutcome::Dropped(ConnectionError::DecodeFailed(_))));

        let paths: Vec<String> = std::iter::from_fn(|| file.try_recv().ok())
            .map(|e| match e {
                TypedEvent::File(e) => e.payload.path,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(paths, vec!["a.rs", "b.rs"]);
    }

    #[test]
    fn test_unknown_tag_and_bad_payload_dropped() {
        let router = EventRouter::default();
        let mut terminal = router.subscribe(EventCategory::Terminal);

        assert!(matches!(
            router.handle_message(&frame("terminal.resize", r#""sessionId":"s1""#)),
            RouteOutcome::Dropped(_)
        ));
        assert!(matches!(
            router.handle_message(&frame("terminal.output", r#""content":"no session""#)),
            RouteOutcome::Dropped(_)
        ));
        assert!(matches!(router.handle_message("[]"), RouteOutcome::Dropped(_)));
        assert!(terminal.try_recv().is_err());
    }

    #[test]
    fn test_heartbeat_and_ack_are_consumed() {
        let router = EventRouter::default();
        let mut receivers: Vec<_> = EventCategory::ALL.into_iter().map(|c| router.subscribe(c)).collect();

        assert_eq!(router.handle_message(&frame("heartbeat", "")), RouteOutcome::Consumed);
        assert_eq!(
            router.handle_message(&frame("ack", r#""id":"cmd-1","status":"ok""#)),
            RouteOutcome::Consumed
        );
        for rx in &mut receivers {
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn test_binary_frames_decoded_as_utf8() {
        let router = EventRouter::default();
        let bytes = sample(EventCategory::System).into_bytes();
        assert_eq!(
            router.handle_frame(&InboundFrame::Binary(bytes)),
            RouteOutcome::Published(EventCategory::System)
        );
        assert!(matches!(
            router.handle_frame(&InboundFrame::Binary(vec![0xff, 0xfe])),
            RouteOutcome::Dropped(_)
        ));
    }

    #[test]
    fn test_publish_without_subscribers_still_reports_category() {
        let router = EventRouter::default();
        assert_eq!(
            router.handle_message(&sample(EventCategory::Project)),
            RouteOutcome::Published(EventCategory::Project)
        );
    }

    #[tokio::test]
    async fn test_run_routes_until_closed() {
        let router = EventRouter::default();
        let mut chat = router.subscribe(EventCategory::Chat);
        let (tx, rx) = broadcast::channel(8);

        let task = tokio::spawn(router.run(rx));
        tx.send(InboundFrame::Text("garbage".into())).expect("send");
        tx.send(InboundFrame::Text(sample(EventCategory::Chat))).expect("send");

        let event = chat.recv().await.expect("routed");
        assert_eq!(event.category(), Some(EventCategory::Chat));

        drop(tx);
        task.await.expect("router exits");
    }

    #[tokio::test]
    async fn test_run_survives_lag() {
        let router = EventRouter::default();
        let mut chat = router.subscribe(EventCategory::Chat);
        let (tx, rx) = broadcast::channel(2);

        // Overflow before the router starts reading.
        for _ in 0..5 {
            tx.send(InboundFrame::Text(sample(EventCategory::Chat))).expect("send");
        }
        let task = tokio::spawn(router.run(rx));

        chat.recv().await.expect("first after lag");
        chat.recv().await.expect("second after lag");
        drop(tx);
        task.await.expect("router exits");
    }
}
