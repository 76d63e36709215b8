//! Broadcast sink
//!
//! Fan-out of stream messages to every registered subscriber.
//! - Subscribers register for one or more topics
//! - Registration and removal may happen while a broadcast is in progress
//! - A subscriber whose delivery fails is removed and never retried
//! - One failing subscriber never stops delivery to the others

use crate::error::DeliveryError;
use crate::events::{StreamMessage, Topic};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Receiving end of the stream.
///
/// `deliver` must not block: the analysis loop calls it inline.
pub trait Subscriber: Send + Sync {
    fn deliver(&self, message: &StreamMessage) -> Result<(), DeliveryError>;
}

impl Subscriber for mpsc::Sender<StreamMessage> {
    fn deliver(&self, message: &StreamMessage) -> Result<(), DeliveryError> {
        self.try_send(*message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

impl Subscriber for mpsc::UnboundedSender<StreamMessage> {
    fn deliver(&self, message: &StreamMessage) -> Result<(), DeliveryError> {
        self.send(*message).map_err(|_| DeliveryError::Closed)
    }
}

/// Handle identifying one registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

struct Registration {
    id: SubscriberId,
    topics: Vec<Topic>,
    subscriber: Arc<dyn Subscriber>,
}

/// Outcome of one broadcast
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Subscribers that accepted the message
    pub delivered: usize,
    /// Subscribers removed because delivery failed
    pub removed: Vec<SubscriberId>,
}

/// Set of active subscribers shared between the loop and the network layer
#[derive(Default)]
pub struct BroadcastSink {
    registrations: Mutex<Vec<Registration>>,
    next_id: AtomicU64,
}

impl BroadcastSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for the given topics
    pub fn subscribe(&self, topics: &[Topic], subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut topics = topics.to_vec();
        topics.sort_by_key(|t| t.as_str());
        topics.dedup();

        debug!(subscriber = id.0, ?topics, "subscriber registered");
        self.lock().push(Registration {
            id,
            topics,
            subscriber,
        });
        id
    }

    /// Register a bounded channel and return its receiving end.
    ///
    /// A full channel counts as a failed delivery, so slow consumers are dropped.
    pub fn subscribe_channel(
        &self,
        topics: &[Topic],
        capacity: usize,
    ) -> (SubscriberId, mpsc::Receiver<StreamMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = self.subscribe(topics, Arc::new(tx));
        (id, rx)
    }

    /// Remove a subscriber; returns whether it was registered
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut registrations = self.lock();
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        let removed = registrations.len() != before;
        if removed {
            debug!(subscriber = id.0, "subscriber unregistered");
        }
        removed
    }

    /// Deliver a message to every subscriber of its topic
    pub fn broadcast(&self, message: &StreamMessage) -> DeliveryReport {
        let topic = message.topic();

        // Deliver outside the lock so subscribers may (un)register concurrently
        let targets: Vec<(SubscriberId, Arc<dyn Subscriber>)> = self
            .lock()
            .iter()
            .filter(|r| r.topics.contains(&topic))
            .map(|r| (r.id, Arc::clone(&r.subscriber)))
            .collect();

        let mut report = DeliveryReport::default();
        for (id, subscriber) in targets {
            match subscriber.deliver(message) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(subscriber = id.0, %topic, error = %e, "delivery failed, removing subscriber");
                    report.removed.push(id);
                }
            }
        }

        if !report.removed.is_empty() {
            self.lock().retain(|r| !report.removed.contains(&r.id));
        }
        report
    }

    /// Broadcast messages in order
    pub fn broadcast_all(&self, messages: &[StreamMessage]) -> DeliveryReport {
        let mut total = DeliveryReport::default();
        for message in messages {
            let report = self.broadcast(message);
            total.delivered += report.delivered;
            total.removed.extend(report.removed);
        }
        total
    }

    /// Number of active subscribers
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.lock().iter().any(|r| r.id == id)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Registration>> {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::AlertEvent;
    use crate::types::PostureState;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct Recorder {
        received: Mutex<Vec<StreamMessage>>,
    }

    impl Subscriber for Recorder {
        fn deliver(&self, message: &StreamMessage) -> Result<(), DeliveryError> {
            self.received.lock().unwrap().push(*message);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FailsOnce {
        failed: AtomicBool,
    }

    impl Subscriber for FailsOnce {
        fn deliver(&self, _message: &StreamMessage) -> Result<(), DeliveryError> {
            if self.failed.swap(true, Ordering::SeqCst) {
                Ok(())
            } else {
                Err(DeliveryError::Other("connection reset".to_string()))
            }
        }
    }

    /// Registers another subscriber from inside a delivery
    struct Registrar {
        sink: Arc<BroadcastSink>,
    }

    impl Subscriber for Registrar {
        fn deliver(&self, _message: &StreamMessage) -> Result<(), DeliveryError> {
            self.sink
                .subscribe(&Topic::ALL, Arc::new(Recorder::default()));
            Ok(())
        }
    }

    #[test]
    fn test_failed_subscriber_removed_others_still_receive() {
        let sink = BroadcastSink::new();
        let a = Arc::new(Recorder::default());
        let a_id = sink.subscribe(&Topic::ALL, a.clone());
        let b_id = sink.subscribe(&Topic::ALL, Arc::new(FailsOnce::default()));

        let first = sink.broadcast(&StreamMessage::posture(PostureState::Good));
        assert_eq!(first.delivered, 1);
        assert_eq!(first.removed, vec![b_id]);
        assert!(!sink.contains(b_id));
        assert!(sink.contains(a_id));

        let second = sink.broadcast(&StreamMessage::posture(PostureState::Bad));
        assert_eq!(second, DeliveryReport { delivered: 1, removed: vec![] });
        assert_eq!(
            *a.received.lock().unwrap(),
            vec![
                StreamMessage::posture(PostureState::Good),
                StreamMessage::posture(PostureState::Bad),
            ]
        );
    }

    #[test]
    fn test_topic_filtering() {
        let sink = BroadcastSink::new();
        let posture = Arc::new(Recorder::default());
        let events = Arc::new(Recorder::default());
        sink.subscribe(&[Topic::Posture], posture.clone());
        sink.subscribe(&[Topic::Events], events.clone());

        sink.broadcast_all(&[
            StreamMessage::posture(PostureState::Bad),
            StreamMessage::blink(Some(3)),
            AlertEvent::posture_warning(60.0).into(),
        ]);

        assert_eq!(
            *posture.received.lock().unwrap(),
            vec![StreamMessage::posture(PostureState::Bad)]
        );
        assert_eq!(
            *events.received.lock().unwrap(),
            vec![AlertEvent::posture_warning(60.0).into()]
        );
    }

    #[test]
    fn test_register_during_broadcast() {
        let sink = Arc::new(BroadcastSink::new());
        sink.subscribe(&Topic::ALL, Arc::new(Registrar { sink: sink.clone() }));

        let report = sink.broadcast(&StreamMessage::blink(None));
        assert_eq!(report.delivered, 1);
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn test_unsubscribe() {
        let sink = BroadcastSink::new();
        let id = sink.subscribe(&[Topic::Blink], Arc::new(Recorder::default()));
        assert!(sink.unsubscribe(id));
        assert!(!sink.unsubscribe(id));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_channel_subscriber() {
        let sink = BroadcastSink::new();
        let (id, mut rx) = sink.subscribe_channel(&[Topic::Blink], 1);

        sink.broadcast(&StreamMessage::blink(Some(7)));
        assert_eq!(rx.recv().await, Some(StreamMessage::blink(Some(7))));

        // Second message overflows the unread channel
        sink.broadcast(&StreamMessage::blink(Some(8)));
        let report = sink.broadcast(&StreamMessage::blink(Some(9)));
        assert_eq!(report.removed, vec![id]);

        drop(rx);
        let (_, rx) = sink.subscribe_channel(&[Topic::Blink], 4);
        drop(rx);
        let report = sink.broadcast(&StreamMessage::blink(Some(10)));
        assert_eq!(report.delivered, 0);
        assert_eq!(report.removed.len(), 1);
        assert!(sink.is_empty());
    }
}
