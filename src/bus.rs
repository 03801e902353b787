//! Priority publish/subscribe message bus for inter-agent communication.
//!
//! Messages are ordered by priority, then by publish timestamp, mirroring
//! `agent_protocol.py`'s `Message.__lt__`. History is capped at the most
//! recent 1000 messages (oldest evicted first) and only records messages
//! that were actually delivered to a handler.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::path::Path;
use thiserror::Error;

use crate::domain_types::{AgentId, MessageId};
use crate::persistence;

const MAX_HISTORY: usize = 1000;

/// The kind of message being sent, closing the set of message shapes
/// agents exchange over the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    /// A task has been assigned to an agent.
    TaskAssignment,
    /// A task has completed.
    TaskCompletion,
    /// A free-form status update.
    StatusUpdate,
    /// An error was encountered.
    ErrorReport,
    /// An agent is requesting work to steal.
    WorkStealRequest,
    /// A response to a work-steal request.
    WorkStealResponse,
    /// A liveness heartbeat.
    Heartbeat,
    /// A shutdown notification.
    Shutdown,
}

/// Delivery priority; lower-priority messages sort after higher ones at
/// equal timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessagePriority {
    /// Lowest delivery priority.
    Low,
    /// Default delivery priority.
    Normal,
    /// Elevated delivery priority.
    High,
    /// Highest delivery priority; delivered before all others.
    Urgent,
}

/// A single bus message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique id of this message.
    pub id: MessageId,
    /// The sending agent.
    pub sender: AgentId,
    /// The receiving agent, or `None` to broadcast to all subscribers.
    pub recipient: Option<AgentId>,
    /// The message kind.
    pub msg_type: MessageType,
    /// Delivery priority.
    pub priority: MessagePriority,
    /// Arbitrary JSON payload.
    pub payload: serde_json::Value,
    /// Publish time.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Message {
    fn ordering_key(&self) -> (MessagePriority, std::cmp::Reverse<chrono::DateTime<chrono::Utc>>) {
        (self.priority, std::cmp::Reverse(self.timestamp))
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Message {}

impl PartialOrd for Message {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Message {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ordering_key().cmp(&other.ordering_key())
    }
}

/// A subscriber's callback, invoked with each message routed to it.
pub type Handler = Box<dyn FnMut(&Message) + Send>;

/// Errors the bus surfaces. The bus never propagates subscriber failures;
/// this enum only covers the bus's own operations.
#[derive(Error, Debug)]
pub enum BusError {
    /// Persistence failure saving/loading history.
    #[error(transparent)]
    Persistence(#[from] crate::error::PersistenceError),
}

#[derive(Debug, Serialize, Deserialize)]
struct BusSnapshot {
    history: Vec<Message>,
    delivered: u64,
}

/// The message bus itself.
///
/// Subscribers register a handler closure; `deliver` drains the entire
/// pending queue, invoking the handler(s) for each message's recipient (or
/// every handler, for a broadcast message) in priority order.
#[derive(Default)]
pub struct MessageBus {
    queue: BinaryHeap<Message>,
    subscribers: HashMap<AgentId, Handler>,
    history: VecDeque<Message>,
    delivered: u64,
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("queue_len", &self.queue.len())
            .field("subscriber_ids", &self.subscribers.keys().collect::<Vec<_>>())
            .field("history_len", &self.history.len())
            .field("delivered", &self.delivered)
            .finish()
    }
}

impl MessageBus {
    /// Builds an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `agent` as a subscriber, with `handler` invoked for every
    /// message routed to it during `deliver`.
    pub fn subscribe(&mut self, agent: AgentId, handler: Handler) {
        self.subscribers.insert(agent, handler);
    }

    /// Removes `agent` as a subscriber.
    pub fn unsubscribe(&mut self, agent: AgentId) {
        self.subscribers.remove(&agent);
    }

    /// Publishes `message`, enqueuing it for delivery. Not recorded in
    /// history until it is actually delivered.
    pub fn publish(&mut self, message: Message) {
        self.queue.push(message);
    }

    /// Drains the entire pending queue in priority order. For each popped
    /// message, invokes the recipient's handler (or every subscriber's
    /// handler, for a broadcast message), then appends it to history,
    /// evicting the oldest entry if at capacity. Returns the number of
    /// messages delivered.
    pub fn deliver(&mut self) -> usize {
        let mut count = 0;
        while let Some(message) = self.queue.pop() {
            match message.recipient {
                Some(recipient) => {
                    if let Some(handler) = self.subscribers.get_mut(&recipient) {
                        handler(&message);
                    }
                }
                None => {
                    for handler in self.subscribers.values_mut() {
                        handler(&message);
                    }
                }
            }

            self.history.push_back(message);
            if self.history.len() > MAX_HISTORY {
                self.history.pop_front();
            }
            self.delivered += 1;
            count += 1;
        }
        count
    }

    /// Number of messages waiting for delivery.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    /// Total messages delivered since construction.
    #[must_use]
    pub fn delivered_count(&self) -> u64 {
        self.delivered
    }

    /// The full retained history, oldest first.
    #[must_use]
    pub fn get_history(&self) -> Vec<Message> {
        self.history.iter().cloned().collect()
    }

    /// Saves history and delivery count to `path`.
    pub fn save_history(&self, path: &Path) -> Result<(), BusError> {
        let snapshot = BusSnapshot {
            history: self.get_history(),
            delivered: self.delivered,
        };
        persistence::save_json(path, &snapshot)?;
        Ok(())
    }

    /// Loads history and delivery count from `path`, replacing the
    /// current history (the pending queue is untouched).
    pub fn load_history(&mut self, path: &Path) -> Result<(), BusError> {
        let snapshot: BusSnapshot = persistence::load_json(path)?;
        self.history = snapshot.history.into();
        self.delivered = snapshot.delivered;
        Ok(())
    }
}

/// A convenience wrapper bundling an agent's identity with bus access and
/// pre-shaped senders for the common message kinds, so callers don't
/// hand-build a `Message` for every interaction.
pub struct AgentLink<'a> {
    agent_id: AgentId,
    bus: &'a mut MessageBus,
}

impl<'a> AgentLink<'a> {
    /// Binds `agent_id` to `bus`.
    pub fn new(agent_id: AgentId, bus: &'a mut MessageBus) -> Self {
        Self { agent_id, bus }
    }

    fn send(
        &mut self,
        recipient: Option<AgentId>,
        msg_type: MessageType,
        priority: MessagePriority,
        payload: serde_json::Value,
    ) {
        self.bus.publish(Message {
            id: MessageId::generate(),
            sender: self.agent_id,
            recipient,
            msg_type,
            priority,
            payload,
            timestamp: chrono::Utc::now(),
        });
    }

    /// Announces a completed task to its requester.
    pub fn send_task_completion(&mut self, recipient: AgentId, result: serde_json::Value) {
        self.send(
            Some(recipient),
            MessageType::TaskCompletion,
            MessagePriority::Normal,
            result,
        );
    }

    /// Broadcasts a status update to all subscribers.
    pub fn send_status_update(&mut self, status: serde_json::Value) {
        self.send(None, MessageType::StatusUpdate, MessagePriority::Low, status);
    }

    /// Reports an error, at elevated priority.
    pub fn send_error_report(&mut self, recipient: Option<AgentId>, error: serde_json::Value) {
        self.send(recipient, MessageType::ErrorReport, MessagePriority::High, error);
    }

    /// Broadcasts a request for idle agents to steal work.
    pub fn request_work_steal(&mut self, capacity: u32) {
        self.send(
            None,
            MessageType::WorkStealRequest,
            MessagePriority::Normal,
            serde_json::json!({ "capacity": capacity }),
        );
    }

    /// Sends a liveness heartbeat, at low priority.
    pub fn send_heartbeat(&mut self) {
        self.send(
            None,
            MessageType::Heartbeat,
            MessagePriority::Low,
            serde_json::json!({}),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn msg(priority: MessagePriority, ts_offset_secs: i64) -> Message {
        Message {
            id: MessageId::generate(),
            sender: AgentId::generate(),
            recipient: None,
            msg_type: MessageType::StatusUpdate,
            priority,
            payload: serde_json::json!({}),
            timestamp: chrono::Utc::now() + chrono::Duration::seconds(ts_offset_secs),
        }
    }

    fn recording_handler() -> (Handler, Arc<Mutex<Vec<MessagePriority>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let handler: Handler = Box::new(move |m: &Message| recorder.lock().unwrap().push(m.priority));
        (handler, seen)
    }

    #[test]
    fn handler_sees_broadcast_messages_in_priority_order() {
        let mut bus = MessageBus::new();
        let (handler, seen) = recording_handler();
        bus.subscribe(AgentId::generate(), handler);

        bus.publish(msg(MessagePriority::Low, 0));
        bus.publish(msg(MessagePriority::Urgent, 0));
        bus.publish(msg(MessagePriority::Normal, 0));

        let count = bus.deliver();
        assert_eq!(count, 3);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![MessagePriority::Urgent, MessagePriority::Normal, MessagePriority::Low]
        );
    }

    #[test]
    fn only_the_named_recipient_handler_runs_for_a_directed_message() {
        let mut bus = MessageBus::new();
        let recipient = AgentId::generate();
        let (recipient_handler, recipient_seen) = recording_handler();
        let (other_handler, other_seen) = recording_handler();
        bus.subscribe(recipient, recipient_handler);
        bus.subscribe(AgentId::generate(), other_handler);

        bus.publish(Message {
            id: MessageId::generate(),
            sender: AgentId::generate(),
            recipient: Some(recipient),
            msg_type: MessageType::TaskAssignment,
            priority: MessagePriority::Normal,
            payload: serde_json::json!({}),
            timestamp: chrono::Utc::now(),
        });
        bus.deliver();

        assert_eq!(recipient_seen.lock().unwrap().len(), 1);
        assert!(other_seen.lock().unwrap().is_empty());
    }

    #[test]
    fn undelivered_messages_do_not_appear_in_history() {
        let mut bus = MessageBus::new();
        bus.publish(msg(MessagePriority::Normal, 0));
        assert!(bus.get_history().is_empty());
        bus.deliver();
        assert_eq!(bus.get_history().len(), 1);
    }

    #[test]
    fn history_is_capped_at_1000_evicting_oldest() {
        let mut bus = MessageBus::new();
        for _ in 0..1005 {
            bus.publish(msg(MessagePriority::Normal, 0));
        }
        bus.deliver();
        assert_eq!(bus.get_history().len(), 1000);
    }

    #[test]
    fn agent_link_helpers_publish_expected_types() {
        let mut bus = MessageBus::new();
        let agent = AgentId::generate();
        let (handler, seen) = recording_handler();
        bus.subscribe(AgentId::generate(), handler);
        let mut link = AgentLink::new(agent, &mut bus);
        link.send_heartbeat();
        drop(link);
        bus.deliver();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
