use crate::config::BusConfig;
use crate::message::{secs_to_duration, AgentMessage, MessagePriority, MessageType};
use chrono::{DateTime, Utc};
use conductor_core::{ConductorError, ConductorResult};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Unordered pair of participants identifying a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ChannelKey(String, String);

impl ChannelKey {
    fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self(a.to_string(), b.to_string())
        } else {
            Self(b.to_string(), a.to_string())
        }
    }
}

/// A request still waiting for its response.
#[derive(Debug, Clone, Serialize)]
pub struct PendingResponse {
    pub message_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub created_at: DateTime<Utc>,
    pub timeout_secs: u64,
}

impl PendingResponse {
    fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > secs_to_duration(self.timeout_secs)
    }
}

#[derive(Debug, Default)]
struct Counters {
    sent: u64,
    delivered: u64,
    retries: u64,
    failed: u64,
    expired: u64,
    broadcasts: u64,
    responses: u64,
    response_timeouts: u64,
    late_responses: u64,
}

/// Read-only snapshot of bus activity.
#[derive(Debug, Clone, Serialize)]
pub struct CommunicationMetrics {
    pub messages_sent: u64,
    pub messages_delivered: u64,
    pub delivery_retries: u64,
    pub messages_failed: u64,
    pub messages_expired: u64,
    pub broadcasts: u64,
    pub responses: u64,
    pub response_timeouts: u64,
    pub late_responses: u64,
    pub pending_responses: usize,
    pub failed_buffer_len: usize,
    pub registered_agents: usize,
    pub topics: usize,
    pub delivery_rate: f64,
}

struct BusInner {
    config: BusConfig,
    queue_tx: mpsc::UnboundedSender<AgentMessage>,
    queue_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<AgentMessage>>,
    mailboxes: RwLock<HashMap<String, mpsc::UnboundedSender<AgentMessage>>>,
    topics: RwLock<HashMap<String, HashSet<String>>>,
    pending: Mutex<HashMap<ChannelKey, Vec<PendingResponse>>>,
    /// Timed-out requests, kept so a late response can still be routed.
    orphaned: Mutex<VecDeque<PendingResponse>>,
    failed: Mutex<VecDeque<AgentMessage>>,
    counters: Mutex<Counters>,
}

/// Asynchronous point-to-point and topic messaging between agents.
///
/// `send` only enqueues; a single delivery loop started by [`start`](Self::start)
/// drains the queue in FIFO order into per-agent mailboxes.
pub struct CommunicationBus {
    inner: Arc<BusInner>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl CommunicationBus {
    pub fn new(config: BusConfig) -> ConductorResult<Self> {
        config.validate()?;
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Ok(Self {
            inner: Arc::new(BusInner {
                config,
                queue_tx,
                queue_rx: tokio::sync::Mutex::new(queue_rx),
                mailboxes: RwLock::new(HashMap::new()),
                topics: RwLock::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                orphaned: Mutex::new(VecDeque::new()),
                failed: Mutex::new(VecDeque::new()),
                counters: Mutex::new(Counters::default()),
            }),
            handles: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Spawn the delivery and response-cleanup loops. Calling twice is a no-op.
    pub fn start(&self) {
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            return;
        }
        let inner = self.inner.clone();
        handles.push(tokio::spawn(async move { inner.delivery_loop().await }));
        let inner = self.inner.clone();
        handles.push(tokio::spawn(async move { inner.cleanup_loop().await }));
        info!("Communication bus started");
    }

    /// Abort the background loops. Queued messages stay queued.
    pub fn stop(&self) {
        let mut handles = self.handles.lock();
        if handles.is_empty() {
            return;
        }
        for handle in handles.drain(..) {
            handle.abort();
        }
        info!("Communication bus stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.handles.lock().is_empty()
    }

    /// Create (or replace) the mailbox for an agent.
    pub fn register(&self, agent_id: &str) -> mpsc::UnboundedReceiver<AgentMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.mailboxes.write().insert(agent_id.to_string(), tx);
        debug!(agent_id, "Mailbox registered");
        rx
    }

    /// Remove an agent's mailbox and topic subscriptions.
    pub fn unregister(&self, agent_id: &str) {
        self.inner.mailboxes.write().remove(agent_id);
        for members in self.inner.topics.write().values_mut() {
            members.remove(agent_id);
        }
    }

    pub fn is_registered(&self, agent_id: &str) -> bool {
        self.inner.mailboxes.read().contains_key(agent_id)
    }

    pub fn subscribe(&self, agent_id: &str, topic: &str) {
        self.inner
            .topics
            .write()
            .entry(topic.to_string())
            .or_default()
            .insert(agent_id.to_string());
    }

    pub fn unsubscribe(&self, agent_id: &str, topic: &str) {
        let mut topics = self.inner.topics.write();
        if let Some(members) = topics.get_mut(topic) {
            members.remove(agent_id);
            if members.is_empty() {
                topics.remove(topic);
            }
        }
    }

    /// Subscribers of a topic, sorted.
    pub fn subscribers(&self, topic: &str) -> Vec<String> {
        let mut members: Vec<String> = self
            .inner
            .topics
            .read()
            .get(topic)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    /// Enqueue a message and return its id without waiting for delivery.
    pub fn send(
        &self,
        sender_id: &str,
        recipient_id: &str,
        message_type: MessageType,
        payload: serde_json::Value,
        priority: MessagePriority,
        requires_response: bool,
    ) -> ConductorResult<String> {
        let mut message =
            AgentMessage::new(sender_id, recipient_id, message_type, payload, priority);
        if requires_response {
            message = message.expecting_response();
        }
        self.submit(message)
    }

    /// Enqueue a prebuilt message.
    ///
    /// High, urgent and critical messages without an explicit expiry get one
    /// `urgent_expiry_secs` after their creation time.
    pub fn submit(&self, mut message: AgentMessage) -> ConductorResult<String> {
        if message.sender_id.trim().is_empty() || message.recipient_id.trim().is_empty() {
            return Err(ConductorError::Validation(
                "sender and recipient ids must not be empty".to_string(),
            ));
        }
        if message.expires_at.is_none() && message.priority.expires() {
            message.expires_at =
                Some(message.created_at + secs_to_duration(self.inner.config.urgent_expiry_secs));
        }
        if message.requires_response {
            let entry = PendingResponse {
                message_id: message.id.clone(),
                sender_id: message.sender_id.clone(),
                recipient_id: message.recipient_id.clone(),
                created_at: message.created_at,
                timeout_secs: message
                    .response_timeout_secs
                    .unwrap_or_else(|| message.priority.response_timeout_secs()),
            };
            self.inner
                .pending
                .lock()
                .entry(ChannelKey::new(&message.sender_id, &message.recipient_id))
                .or_default()
                .push(entry);
        }

        let id = message.id.clone();
        debug!(
            message_id = %id,
            sender = %message.sender_id,
            recipient = %message.recipient_id,
            kind = %message.message_type,
            priority = %message.priority,
            "Message enqueued"
        );
        self.inner
            .queue_tx
            .send(message)
            .map_err(|_| ConductorError::Bus("delivery queue closed".to_string()))?;
        self.inner.counters.lock().sent += 1;
        Ok(id)
    }

    /// Fan out to every subscriber of `topic` except the sender.
    pub fn broadcast(
        &self,
        sender_id: &str,
        topic: &str,
        message_type: MessageType,
        payload: serde_json::Value,
        priority: MessagePriority,
    ) -> ConductorResult<Vec<String>> {
        let recipients: Vec<String> = self
            .subscribers(topic)
            .into_iter()
            .filter(|r| r != sender_id)
            .collect();

        let mut ids = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let mut message =
                AgentMessage::new(sender_id, recipient, message_type, payload.clone(), priority);
            message.topic = Some(topic.to_string());
            ids.push(self.submit(message)?);
        }
        self.inner.counters.lock().broadcasts += 1;
        debug!(topic, sender = sender_id, fanout = ids.len(), "Broadcast enqueued");
        Ok(ids)
    }

    /// Answer a message that required a response.
    ///
    /// Responses to requests that already timed out are still routed to the
    /// original sender, flagged `late`.
    pub fn respond(
        &self,
        original_message_id: &str,
        responder_id: &str,
        payload: serde_json::Value,
    ) -> ConductorResult<String> {
        let (request, late) = match self.take_pending(original_message_id) {
            Some(entry) => (entry, false),
            None => {
                let mut orphaned = self.inner.orphaned.lock();
                let position = orphaned
                    .iter()
                    .position(|p| p.message_id == original_message_id)
                    .ok_or_else(|| {
                        ConductorError::NotFound(format!(
                            "no pending request with id {original_message_id}"
                        ))
                    })?;
                match orphaned.remove(position) {
                    Some(entry) => (entry, true),
                    None => {
                        return Err(ConductorError::NotFound(format!(
                            "no pending request with id {original_message_id}"
                        )))
                    }
                }
            }
        };

        if request.recipient_id != responder_id {
            warn!(
                message_id = original_message_id,
                expected = %request.recipient_id,
                responder = responder_id,
                "Response from an agent other than the original recipient"
            );
        }

        let mut response = AgentMessage::new(
            responder_id,
            request.sender_id.clone(),
            MessageType::Acknowledgment,
            payload,
            MessagePriority::Normal,
        );
        response.correlation_id = Some(request.message_id.clone());
        response.late = late;

        {
            let mut counters = self.inner.counters.lock();
            counters.responses += 1;
            if late {
                counters.late_responses += 1;
            }
        }
        if late {
            warn!(
                message_id = original_message_id,
                sender = %request.sender_id,
                "Late response delivered after request timed out"
            );
        }
        self.submit(response)
    }

    fn take_pending(&self, message_id: &str) -> Option<PendingResponse> {
        let mut pending = self.inner.pending.lock();
        let mut found = None;
        pending.retain(|_, entries| {
            if found.is_none() {
                if let Some(pos) = entries.iter().position(|e| e.message_id == message_id) {
                    found = Some(entries.remove(pos));
                }
            }
            !entries.is_empty()
        });
        found
    }

    /// Evict pending-response entries older than their timeout. Returns the
    /// number evicted.
    pub fn sweep_pending_responses(&self, now: DateTime<Utc>) -> usize {
        self.inner.sweep_pending(now)
    }

    pub fn pending_response_count(&self) -> usize {
        self.inner.pending.lock().values().map(Vec::len).sum()
    }

    /// Messages that exhausted their delivery attempts, oldest first.
    pub fn failed_messages(&self) -> Vec<AgentMessage> {
        self.inner.failed.lock().iter().cloned().collect()
    }

    pub fn communication_metrics(&self) -> CommunicationMetrics {
        let counters = self.inner.counters.lock();
        let delivery_rate = if counters.sent == 0 {
            1.0
        } else {
            counters.delivered as f64 / counters.sent as f64
        };
        CommunicationMetrics {
            messages_sent: counters.sent,
            messages_delivered: counters.delivered,
            delivery_retries: counters.retries,
            messages_failed: counters.failed,
            messages_expired: counters.expired,
            broadcasts: counters.broadcasts,
            responses: counters.responses,
            response_timeouts: counters.response_timeouts,
            late_responses: counters.late_responses,
            pending_responses: self.pending_response_count(),
            failed_buffer_len: self.inner.failed.lock().len(),
            registered_agents: self.inner.mailboxes.read().len(),
            topics: self.inner.topics.read().len(),
            delivery_rate,
        }
    }
}

impl Drop for CommunicationBus {
    fn drop(&mut self) {
        for handle in self.handles.get_mut().drain(..) {
            handle.abort();
        }
    }
}

impl BusInner {
    async fn delivery_loop(self: Arc<Self>) {
        let mut queue = self.queue_rx.lock().await;
        while let Some(message) = queue.recv().await {
            self.deliver(message);
        }
    }

    async fn cleanup_loop(self: Arc<Self>) {
        let period = std::time::Duration::from_secs(self.config.cleanup_interval_secs);
        let mut ticker = tokio::time::interval(period);
        // First tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = self.sweep_pending(Utc::now());
            if evicted > 0 {
                info!(evicted, "Pending responses timed out");
            }
        }
    }

    fn deliver(self: &Arc<Self>, mut message: AgentMessage) {
        if message.is_expired(Utc::now()) {
            self.counters.lock().expired += 1;
            warn!(
                message_id = %message.id,
                recipient = %message.recipient_id,
                priority = %message.priority,
                "Dropping expired message"
            );
            return;
        }

        message.delivery_attempts += 1;
        let attempt = message.delivery_attempts;

        let undelivered = {
            let mailboxes = self.mailboxes.read();
            match mailboxes.get(&message.recipient_id) {
                Some(tx) => tx.send(message).err().map(|e| e.0),
                None => Some(message),
            }
        };

        let Some(message) = undelivered else {
            self.counters.lock().delivered += 1;
            return;
        };

        if attempt >= self.config.max_delivery_attempts {
            warn!(
                message_id = %message.id,
                recipient = %message.recipient_id,
                attempts = attempt,
                "Delivery failed permanently"
            );
            self.counters.lock().failed += 1;
            let mut failed = self.failed.lock();
            if failed.len() >= self.config.failed_buffer_size {
                failed.pop_front();
            }
            failed.push_back(message);
            return;
        }

        let delay = self.config.retry_delay_ms(attempt);
        self.counters.lock().retries += 1;
        debug!(
            message_id = %message.id,
            recipient = %message.recipient_id,
            attempt,
            delay_ms = delay,
            "Delivery failed, retrying"
        );
        let queue = self.queue_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            let _ = queue.send(message);
        });
    }

    fn sweep_pending(&self, now: DateTime<Utc>) -> usize {
        let mut evicted = Vec::new();
        {
            let mut pending = self.pending.lock();
            pending.retain(|_, entries| {
                let (overdue, keep): (Vec<_>, Vec<_>) =
                    entries.drain(..).partition(|e| e.is_overdue(now));
                *entries = keep;
                evicted.extend(overdue);
                !entries.is_empty()
            });
        }

        for entry in &evicted {
            warn!(
                message_id = %entry.message_id,
                sender = %entry.sender_id,
                recipient = %entry.recipient_id,
                timeout_secs = entry.timeout_secs,
                "Response timed out"
            );
        }

        let count = evicted.len();
        if count > 0 {
            self.counters.lock().response_timeouts += count as u64;
            let mut orphaned = self.orphaned.lock();
            for entry in evicted {
                if orphaned.len() >= self.config.failed_buffer_size {
                    orphaned.pop_front();
                }
                orphaned.push_back(entry);
            }
        }
        count
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn bus() -> CommunicationBus {
        CommunicationBus::new(BusConfig::default()).unwrap()
    }

    #[test]
    fn test_channel_key_is_unordered() {
        assert_eq!(ChannelKey::new("a", "b"), ChannelKey::new("b", "a"));
    }

    #[test]
    fn test_send_rejects_empty_ids() {
        let bus = bus();
        let err = bus
            .send("", "b", MessageType::System, json!({}), MessagePriority::Normal, false)
            .unwrap_err();
        assert!(matches!(err, ConductorError::Validation(_)));
        let err = bus
            .send("a", "  ", MessageType::System, json!({}), MessagePriority::Normal, false)
            .unwrap_err();
        assert!(matches!(err, ConductorError::Validation(_)));
    }

    #[test]
    fn test_send_returns_immediately_without_loop() {
        let bus = bus();
        let id = bus
            .send("a", "b", MessageType::TaskUpdate, json!({}), MessagePriority::Low, false)
            .unwrap();
        assert!(!id.is_empty());
        assert_eq!(bus.communication_metrics().messages_sent, 1);
        assert_eq!(bus.communication_metrics().messages_delivered, 0);
    }

    #[test]
    fn test_urgent_messages_get_expiry() {
        let bus = bus();
        bus.send("a", "b", MessageType::System, json!({}), MessagePriority::Critical, false)
            .unwrap();
        bus.send("a", "b", MessageType::System, json!({}), MessagePriority::Normal, false)
            .unwrap();
        let mut queue = bus.inner.queue_rx.try_lock().unwrap();
        let critical = queue.try_recv().unwrap();
        let normal = queue.try_recv().unwrap();
        assert_eq!(
            critical.expires_at.unwrap() - critical.created_at,
            Duration::seconds(1_800)
        );
        assert!(normal.expires_at.is_none());
    }

    #[test]
    fn test_pending_response_tracking_and_sweep() {
        let bus = bus();
        let id = bus
            .send("a", "b", MessageType::DataRequest, json!({}), MessagePriority::Critical, true)
            .unwrap();
        assert_eq!(bus.pending_response_count(), 1);

        assert_eq!(bus.sweep_pending_responses(Utc::now()), 0);
        let later = Utc::now() + Duration::seconds(31);
        assert_eq!(bus.sweep_pending_responses(later), 1);
        assert_eq!(bus.pending_response_count(), 0);
        assert_eq!(bus.communication_metrics().response_timeouts, 1);

        // still routable as a late response
        bus.respond(&id, "b", json!({"ok": true})).unwrap();
        assert_eq!(bus.communication_metrics().late_responses, 1);
    }

    #[test]
    fn test_respond_unknown_request() {
        let bus = bus();
        assert!(matches!(
            bus.respond("nope", "b", json!({})),
            Err(ConductorError::NotFound(_))
        ));
    }

    #[test]
    fn test_unsubscribe_drops_empty_topic() {
        let bus = bus();
        bus.subscribe("a", "research");
        bus.subscribe("b", "research");
        assert_eq!(bus.subscribers("research"), vec!["a", "b"]);
        bus.unsubscribe("a", "research");
        bus.unsubscribe("b", "research");
        assert!(bus.subscribers("research").is_empty());
        assert_eq!(bus.communication_metrics().topics, 0);
    }

    #[test]
    fn test_unregister_removes_subscriptions() {
        let bus = bus();
        let _rx = bus.register("a");
        bus.subscribe("a", "ops");
        bus.unregister("a");
        assert!(!bus.is_registered("a"));
        assert!(bus.subscribers("ops").is_empty());
    }
}
