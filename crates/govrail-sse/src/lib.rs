//! SSE fabric (C8): a process-wide publisher with channel-based fan-out,
//! per-channel replay buffers, and subscribe-time filtering. The publisher
//! never blocks on a slow subscriber — a full queue drops the event, and a
//! subscriber that drops consecutively past a configurable threshold is
//! removed ("dead subscriber" cleanup).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use govrail_types::{EventChannel, StreamEvent};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const CONCRETE_CHANNELS: [EventChannel; 6] = [
    EventChannel::Audit,
    EventChannel::Lifecycle,
    EventChannel::Metrics,
    EventChannel::Reflex,
    EventChannel::Governor,
    EventChannel::Enforcement,
];

/// Filter applied at subscribe time. `channels` is required and non-empty;
/// `event_types`/`entity_ids` narrow further when present.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    pub channels: Vec<EventChannel>,
    pub event_types: Option<Vec<String>>,
    pub entity_ids: Option<Vec<String>>,
}

impl SubscriptionFilter {
    fn wants_channel(&self, channel: EventChannel) -> bool {
        self.channels.iter().any(|c| *c == channel || *c == EventChannel::All)
    }

    fn matches(&self, event: &StreamEvent) -> bool {
        if !self.wants_channel(event.channel) {
            return false;
        }
        if let Some(types) = &self.event_types {
            if !types.iter().any(|t| t == &event.event_type) {
                return false;
            }
        }
        if let Some(entity_ids) = &self.entity_ids {
            if !event.matches_entity_ids(entity_ids) {
                return false;
            }
        }
        true
    }
}

struct Subscriber {
    tx: mpsc::Sender<StreamEvent>,
    filter: SubscriptionFilter,
    consecutive_drops: u32,
}

struct RingBuffer {
    capacity: usize,
    events: VecDeque<StreamEvent>,
}

impl RingBuffer {
    fn new(capacity: usize) -> Self {
        Self { capacity, events: VecDeque::with_capacity(capacity) }
    }

    fn push(&mut self, event: StreamEvent) {
        if self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    fn tail(&self, n: usize) -> Vec<StreamEvent> {
        self.events.iter().rev().take(n).rev().cloned().collect()
    }
}

struct State {
    buffers: HashMap<EventChannel, RingBuffer>,
    subscribers: HashMap<Uuid, Subscriber>,
}

/// Publisher configuration: per-channel replay capacity and the
/// consecutive-drop threshold before a subscriber is evicted.
#[derive(Debug, Clone, Copy)]
pub struct SsePublisherConfig {
    pub buffer_size: usize,
    pub queue_capacity: usize,
    pub max_consecutive_drops: u32,
}

impl Default for SsePublisherConfig {
    fn default() -> Self {
        Self { buffer_size: 100, queue_capacity: 256, max_consecutive_drops: 5 }
    }
}

/// A subscription handle: the receiver half plus the id used to
/// unsubscribe. Dropping the receiver is sufficient to eventually have the
/// publisher reclaim the slot (the very next publish sees a closed channel).
pub struct Subscription {
    pub subscriber_id: Uuid,
    pub receiver: mpsc::Receiver<StreamEvent>,
}

#[derive(Debug, Default, Clone)]
pub struct SsePublisherStats {
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub evicted_subscribers: u64,
    pub active_subscribers: usize,
}

/// Process-wide publisher. Cheaply cloneable; all clones share the same
/// buffers and subscriber table.
pub struct SsePublisher {
    config: SsePublisherConfig,
    state: Mutex<State>,
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    evicted: AtomicU64,
}

impl SsePublisher {
    pub fn new(config: SsePublisherConfig) -> Self {
        let mut buffers = HashMap::new();
        for channel in CONCRETE_CHANNELS {
            buffers.insert(channel, RingBuffer::new(config.buffer_size));
        }
        Self {
            config,
            state: Mutex::new(State { buffers, subscribers: HashMap::new() }),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// Subscribes with `filter`, optionally replaying the last `replay_n`
    /// buffered events per requested concrete channel (chronological order,
    /// oldest first) before any live events are delivered.
    pub fn subscribe(&self, filter: SubscriptionFilter, replay_n: usize) -> Subscription {
        let subscriber_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.config.queue_capacity);

        let mut state = self.state.lock().expect("sse publisher poisoned");
        if replay_n > 0 {
            for channel in CONCRETE_CHANNELS {
                if !filter.wants_channel(channel) {
                    continue;
                }
                if let Some(buffer) = state.buffers.get(&channel) {
                    for event in buffer.tail(replay_n) {
                        if filter.matches(&event) {
                            let _ = tx.try_send(event);
                        }
                    }
                }
            }
        }
        state.subscribers.insert(
            subscriber_id,
            Subscriber { tx, filter, consecutive_drops: 0 },
        );
        debug!(%subscriber_id, "sse subscriber registered");
        Subscription { subscriber_id, receiver: rx }
    }

    pub fn unsubscribe(&self, subscriber_id: Uuid) {
        let mut state = self.state.lock().expect("sse publisher poisoned");
        state.subscribers.remove(&subscriber_id);
    }

    /// Publishes `event` to its channel's replay buffer and fans it out to
    /// every matching, non-evicted subscriber. Never blocks: a full queue
    /// drops the event for that subscriber and counts toward eviction.
    pub fn publish(&self, event: StreamEvent) {
        self.published.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock().expect("sse publisher poisoned");

        if let Some(buffer) = state.buffers.get_mut(&event.channel) {
            buffer.push(event.clone());
        }

        let mut evict = Vec::new();
        for (id, subscriber) in state.subscribers.iter_mut() {
            if !subscriber.filter.matches(&event) {
                continue;
            }
            match subscriber.tx.try_send(event.clone()) {
                Ok(()) => {
                    subscriber.consecutive_drops = 0;
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    evict.push(*id);
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    subscriber.consecutive_drops += 1;
                    if subscriber.consecutive_drops >= self.config.max_consecutive_drops {
                        evict.push(*id);
                    }
                }
            }
        }

        for id in evict {
            state.subscribers.remove(&id);
            self.evicted.fetch_add(1, Ordering::Relaxed);
            warn!(subscriber_id = %id, "sse subscriber evicted after consecutive drops or closed queue");
        }
    }

    pub fn stats(&self) -> SsePublisherStats {
        let active_subscribers = self.state.lock().expect("sse publisher poisoned").subscribers.len();
        SsePublisherStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            evicted_subscribers: self.evicted.load(Ordering::Relaxed),
            active_subscribers,
        }
    }
}

impl Default for SsePublisher {
    fn default() -> Self {
        Self::new(SsePublisherConfig::default())
    }
}

/// Encodes a stream of outgoing `StreamEvent`s into wire-format SSE text
/// suitable for a response body, one chunk per event.
pub fn encode(event: &StreamEvent) -> String {
    event.to_sse_format()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdMap;

    fn event(channel: EventChannel, event_type: &str) -> StreamEvent {
        StreamEvent::new(channel, event_type, StdMap::new())
    }

    #[tokio::test]
    async fn subscriber_receives_events_on_subscribed_channel_only() {
        let publisher = SsePublisher::new(SsePublisherConfig::default());
        let mut sub = publisher.subscribe(
            SubscriptionFilter { channels: vec![EventChannel::Reflex], ..Default::default() },
            0,
        );
        publisher.publish(event(EventChannel::Reflex, "job.suspended"));
        publisher.publish(event(EventChannel::Governor, "decision.made"));

        let received = sub.receiver.recv().await.unwrap();
        assert_eq!(received.event_type, "job.suspended");
        assert!(sub.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn all_channel_subscriber_receives_every_concrete_channel() {
        let publisher = SsePublisher::new(SsePublisherConfig::default());
        let mut sub = publisher.subscribe(
            SubscriptionFilter { channels: vec![EventChannel::All], ..Default::default() },
            0,
        );
        publisher.publish(event(EventChannel::Audit, "a"));
        publisher.publish(event(EventChannel::Metrics, "b"));
        assert_eq!(sub.receiver.recv().await.unwrap().event_type, "a");
        assert_eq!(sub.receiver.recv().await.unwrap().event_type, "b");
    }

    #[tokio::test]
    async fn replay_buffer_delivers_past_events_on_subscribe() {
        let publisher = SsePublisher::new(SsePublisherConfig::default());
        publisher.publish(event(EventChannel::Lifecycle, "job.started"));
        publisher.publish(event(EventChannel::Lifecycle, "job.completed"));

        let mut sub = publisher.subscribe(
            SubscriptionFilter { channels: vec![EventChannel::Lifecycle], ..Default::default() },
            10,
        );
        assert_eq!(sub.receiver.recv().await.unwrap().event_type, "job.started");
        assert_eq!(sub.receiver.recv().await.unwrap().event_type, "job.completed");
    }

    #[tokio::test]
    async fn event_type_filter_narrows_delivery() {
        let publisher = SsePublisher::new(SsePublisherConfig::default());
        let mut sub = publisher.subscribe(
            SubscriptionFilter {
                channels: vec![EventChannel::Reflex],
                event_types: Some(vec!["job.suspended".to_string()]),
                entity_ids: None,
            },
            0,
        );
        publisher.publish(event(EventChannel::Reflex, "job.throttled"));
        publisher.publish(event(EventChannel::Reflex, "job.suspended"));
        let received = sub.receiver.recv().await.unwrap();
        assert_eq!(received.event_type, "job.suspended");
    }

    #[tokio::test]
    async fn saturated_queue_eventually_evicts_subscriber() {
        let publisher = SsePublisher::new(SsePublisherConfig {
            buffer_size: 10,
            queue_capacity: 1,
            max_consecutive_drops: 2,
        });
        let sub = publisher.subscribe(
            SubscriptionFilter { channels: vec![EventChannel::Metrics], ..Default::default() },
            0,
        );
        // Fill the one queue slot, then overflow it past the drop threshold.
        for _ in 0..4 {
            publisher.publish(event(EventChannel::Metrics, "tick"));
        }
        assert_eq!(publisher.stats().active_subscribers, 0);
        drop(sub);
    }

    #[tokio::test]
    async fn closing_receiver_does_not_block_future_publishes() {
        let publisher = SsePublisher::new(SsePublisherConfig::default());
        let sub = publisher.subscribe(
            SubscriptionFilter { channels: vec![EventChannel::Audit], ..Default::default() },
            0,
        );
        drop(sub);
        publisher.publish(event(EventChannel::Audit, "after-close"));
        let stats = publisher.stats();
        assert_eq!(stats.active_subscribers, 0);
    }
}
