//! Event Bus Bindings
//!
//! Durable partitioned log contracts: a publisher bound to one topic per
//! producer, and a subscriber with fetch-then-commit discipline. Commit is
//! manual and only ever follows a successful handle.
//!
//! `InMemoryBus` is the in-process log. It keeps per-partition order,
//! routes keyed records by SipHash of the key, tracks consumer-group
//! committed offsets across consumer restarts and honours the start offset
//! and max-wait of each consumer. Records every group has committed past
//! are dropped, and each partition retains at most a fixed number of
//! records; offsets stay absolute.
//!
//! [`ProducerConfig`] and the `min_bytes`/`commit_interval` fields of
//! [`ConsumerConfig`] are transport descriptors for a broker client. The
//! in-process log does not read them: every publish is written and
//! acknowledged immediately, fetches return as soon as one record is
//! available, and commits apply when called.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use siphasher::sip::SipHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{PipelineError, Result};

pub const DEFAULT_PARTITIONS: u32 = 6;

/// Records kept per partition regardless of consumer progress
pub const DEFAULT_RETENTION: usize = 10_000;

/// One record as seen by a consumer
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: String,
    pub headers: Vec<(String, String)>,
    pub payload: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

impl BusMessage {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Where the acknowledged record landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordPosition {
    pub partition: u32,
    pub offset: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredAcks {
    None,
    Leader,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Snappy,
}

/// Partition choice for records without a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Balancer {
    LeastBytes,
    RoundRobin,
}

/// Broker producer settings, carried by [`TopicProducer`] for a broker
/// transport. `InMemoryBus` ignores all of them.
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerConfig {
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub required_acks: RequiredAcks,
    pub compression: Compression,
    pub balancer: Balancer,
    /// Fire-and-forget writes; the pipeline always waits for the ack
    pub async_writes: bool,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_timeout: Duration::from_secs(1),
            required_acks: RequiredAcks::Leader,
            compression: Compression::Snappy,
            balancer: Balancer::LeastBytes,
            async_writes: false,
        }
    }
}

impl ProducerConfig {
    pub fn for_price_updates() -> Self {
        Self {
            batch_size: 50,
            ..Self::default()
        }
    }

    pub fn for_discovery() -> Self {
        Self {
            batch_size: 20,
            ..Self::default()
        }
    }

    pub fn for_alerts() -> Self {
        Self::default()
    }
}

/// Offset used when a group has nothing committed for a partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOffset {
    Earliest,
    Latest,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerConfig {
    pub topic: String,
    pub group_id: String,
    /// Broker fetch threshold, not read by `InMemoryBus`
    pub min_bytes: usize,
    pub max_bytes: usize,
    pub max_wait: Duration,
    /// Broker commit flush period, not read by `InMemoryBus`
    pub commit_interval: Duration,
    pub start_offset: StartOffset,
}

impl ConsumerConfig {
    pub fn new(topic: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            group_id: group_id.into(),
            min_bytes: 1,
            max_bytes: 10 * 1024 * 1024,
            max_wait: Duration::from_secs(10),
            commit_interval: Duration::from_secs(1),
            start_offset: StartOffset::Latest,
        }
    }

    pub fn start_offset(mut self, start: StartOffset) -> Self {
        self.start_offset = start;
        self
    }

    pub fn max_wait(mut self, wait: Duration) -> Self {
        self.max_wait = wait;
        self
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        headers: Vec<(String, String)>,
        payload: Vec<u8>,
    ) -> Result<RecordPosition>;
}

#[async_trait]
pub trait EventSubscriber: Send {
    /// Next record of the subscribed topic. Blocks until one is available
    /// or `cancel` fires, in which case `Cancelled` is returned.
    async fn fetch_message(&mut self, cancel: &CancellationToken) -> Result<BusMessage>;

    /// Marks `message` and everything before it on its partition as done
    /// for the group.
    async fn commit(&mut self, message: &BusMessage) -> Result<()>;
}

/// Publisher bound to a single topic
#[derive(Clone)]
pub struct TopicProducer {
    publisher: Arc<dyn EventPublisher>,
    topic: String,
    config: ProducerConfig,
}

impl TopicProducer {
    pub fn new(publisher: Arc<dyn EventPublisher>, topic: impl Into<String>, config: ProducerConfig) -> Self {
        Self {
            publisher,
            topic: topic.into(),
            config,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    pub async fn publish_json<T: Serialize + ?Sized>(&self, key: &str, event: &T) -> Result<RecordPosition> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| PipelineError::Bus(format!("encode for {}: {}", self.topic, e)))?;
        let headers = vec![("content-type".to_string(), "application/json".to_string())];
        let position = self.publisher.publish(&self.topic, key, headers, payload).await?;
        trace!(
            topic = %self.topic,
            key = key,
            partition = position.partition,
            offset = position.offset,
            "Published event"
        );
        Ok(position)
    }
}

/// Partition of a keyed record
pub fn partition_for_key(key: &str, partitions: u32) -> u32 {
    let mut hasher = SipHasher::new();
    key.as_bytes().hash(&mut hasher);
    (hasher.finish() % partitions.max(1) as u64) as u32
}

#[derive(Default)]
struct PartitionLog {
    /// Absolute offset of the first retained record
    base: u64,
    records: VecDeque<BusMessage>,
    bytes: usize,
}

impl PartitionLog {
    fn end(&self) -> u64 {
        self.base + self.records.len() as u64
    }

    fn get(&self, offset: u64) -> Option<&BusMessage> {
        offset
            .checked_sub(self.base)
            .and_then(|i| self.records.get(i as usize))
    }

    fn trim_below(&mut self, offset: u64) -> usize {
        let mut dropped = 0;
        while self.base < offset {
            let Some(record) = self.records.pop_front() else { break };
            self.bytes -= record.payload.len();
            self.base += 1;
            dropped += 1;
        }
        dropped
    }
}

struct TopicLog {
    partitions: Vec<PartitionLog>,
    round_robin: u32,
}

#[derive(Default)]
struct BusState {
    topics: HashMap<String, TopicLog>,
    /// (group, topic, partition) -> next offset to consume
    committed: HashMap<(String, String, u32), u64>,
    /// Lowest offset each attached group may still read: its committed
    /// offset, or its start position before the first commit
    floors: HashMap<(String, String, u32), u64>,
}

impl BusState {
    /// Drops records below the slowest group's floor
    fn compact(&mut self, topic: &str, partition: u32) -> usize {
        let floor = self
            .floors
            .iter()
            .filter(|((_, t, p), _)| t == topic && *p == partition)
            .map(|(_, offset)| *offset)
            .min();
        match (floor, self.topics.get_mut(topic)) {
            (Some(floor), Some(log)) => log
                .partitions
                .get_mut(partition as usize)
                .map(|p| p.trim_below(floor))
                .unwrap_or(0),
            _ => 0,
        }
    }
}

/// In-process partitioned log
pub struct InMemoryBus {
    partitions: u32,
    retention: usize,
    balancer: Balancer,
    state: Mutex<BusState>,
    appended: Notify,
}

impl InMemoryBus {
    pub fn new(partitions: u32) -> Self {
        Self::with_retention(partitions, DEFAULT_RETENTION)
    }

    pub fn with_retention(partitions: u32, retention: usize) -> Self {
        Self {
            partitions: partitions.max(1),
            retention: retention.max(1),
            balancer: Balancer::LeastBytes,
            state: Mutex::new(BusState::default()),
            appended: Notify::new(),
        }
    }

    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    fn topic_mut<'a>(state: &'a mut BusState, topic: &str, partitions: u32) -> &'a mut TopicLog {
        state
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicLog {
                partitions: (0..partitions).map(|_| PartitionLog::default()).collect(),
                round_robin: 0,
            })
    }

    fn pick_partition(&self, log: &mut TopicLog, key: &str) -> u32 {
        if !key.is_empty() {
            return partition_for_key(key, self.partitions);
        }
        match self.balancer {
            Balancer::LeastBytes => log
                .partitions
                .iter()
                .enumerate()
                .min_by_key(|(_, p)| p.bytes)
                .map(|(i, _)| i as u32)
                .unwrap_or(0),
            Balancer::RoundRobin => {
                let p = log.round_robin % self.partitions;
                log.round_robin = log.round_robin.wrapping_add(1);
                p
            }
        }
    }

    /// Attach a consumer for one group. Positions come from the group's
    /// committed offsets, else from the configured start offset.
    pub fn subscribe(self: &Arc<Self>, config: ConsumerConfig) -> BusConsumer {
        let mut state = self.state.lock();
        let bounds: Vec<(u64, u64)> = Self::topic_mut(&mut state, &config.topic, self.partitions)
            .partitions
            .iter()
            .map(|p| (p.base, p.end()))
            .collect();

        let positions: Vec<(u32, u64)> = bounds
            .iter()
            .enumerate()
            .map(|(partition, (base, end))| {
                let committed = state
                    .committed
                    .get(&(config.group_id.clone(), config.topic.clone(), partition as u32))
                    .copied();
                let start = committed.unwrap_or(match config.start_offset {
                    StartOffset::Earliest => *base,
                    StartOffset::Latest => *end,
                });
                (partition as u32, start.max(*base))
            })
            .collect();
        for (partition, start) in &positions {
            state
                .floors
                .insert((config.group_id.clone(), config.topic.clone(), *partition), *start);
        }
        drop(state);

        debug!(topic = %config.topic, group = %config.group_id, "Consumer attached");
        BusConsumer {
            bus: Arc::clone(self),
            config,
            positions,
            next_partition: 0,
        }
    }

    /// Every retained record of a topic in publish order
    pub fn messages(&self, topic: &str) -> Vec<BusMessage> {
        let state = self.state.lock();
        let mut all: Vec<BusMessage> = state
            .topics
            .get(topic)
            .map(|log| {
                log.partitions
                    .iter()
                    .flat_map(|p| p.records.iter().cloned())
                    .collect()
            })
            .unwrap_or_default();
        all.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.offset.cmp(&b.offset)));
        all
    }

    pub fn committed_offset(&self, group: &str, topic: &str, partition: u32) -> Option<u64> {
        self.state
            .lock()
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }

    /// Records retained for a partition
    pub fn retained(&self, topic: &str, partition: u32) -> usize {
        self.state
            .lock()
            .topics
            .get(topic)
            .and_then(|log| log.partitions.get(partition as usize))
            .map(|p| p.records.len())
            .unwrap_or(0)
    }

    /// Record at `offset`, or at the first retained offset when `offset`
    /// was already dropped. Returns the offset actually read from.
    fn read_at(&self, topic: &str, partition: u32, offset: u64) -> (u64, Option<BusMessage>) {
        let state = self.state.lock();
        match state
            .topics
            .get(topic)
            .and_then(|log| log.partitions.get(partition as usize))
        {
            Some(p) => {
                let offset = offset.max(p.base);
                (offset, p.get(offset).cloned())
            }
            None => (offset, None),
        }
    }

    fn commit_offset(&self, group: &str, message: &BusMessage) {
        let mut state = self.state.lock();
        let key = (group.to_string(), message.topic.clone(), message.partition);
        let next = message.offset + 1;
        let slot = state.committed.entry(key.clone()).or_insert(0);
        *slot = (*slot).max(next);
        let floor = state.floors.entry(key).or_insert(0);
        *floor = (*floor).max(next);

        let dropped = state.compact(&message.topic, message.partition);
        if dropped > 0 {
            trace!(topic = %message.topic, partition = message.partition, dropped = dropped, "Compacted partition");
        }
    }
}

#[async_trait]
impl EventPublisher for InMemoryBus {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        headers: Vec<(String, String)>,
        payload: Vec<u8>,
    ) -> Result<RecordPosition> {
        let position = {
            let mut state = self.state.lock();
            let partitions = self.partitions;
            let log = Self::topic_mut(&mut state, topic, partitions);
            let partition = self.pick_partition(log, key);
            let part = &mut log.partitions[partition as usize];
            let offset = part.end();
            part.bytes += payload.len();
            part.records.push_back(BusMessage {
                topic: topic.to_string(),
                partition,
                offset,
                key: key.to_string(),
                headers,
                payload,
                timestamp: Utc::now(),
            });
            if part.records.len() > self.retention {
                let cut = part.end() - self.retention as u64;
                part.trim_below(cut);
            }
            RecordPosition { partition, offset }
        };
        self.appended.notify_waiters();
        Ok(position)
    }
}

/// Group member reading every partition of one topic, one record at a time
pub struct BusConsumer {
    bus: Arc<InMemoryBus>,
    config: ConsumerConfig,
    positions: Vec<(u32, u64)>,
    next_partition: usize,
}

impl BusConsumer {
    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Round-robins partitions so one busy item cannot starve the rest.
    fn poll_once(&mut self) -> Option<BusMessage> {
        let count = self.positions.len();
        for step in 0..count {
            let idx = (self.next_partition + step) % count;
            let (partition, requested) = self.positions[idx];
            let (offset, found) = self.bus.read_at(&self.config.topic, partition, requested);
            if offset != requested {
                debug!(
                    topic = %self.config.topic,
                    partition = partition,
                    skipped = offset - requested,
                    "Position fell behind retention, resuming at oldest record"
                );
                self.positions[idx].1 = offset;
            }
            if let Some(message) = found {
                if message.payload.len() > self.config.max_bytes {
                    debug!(
                        topic = %self.config.topic,
                        partition = partition,
                        offset = offset,
                        "Skipping record larger than max_bytes"
                    );
                    self.positions[idx].1 += 1;
                    continue;
                }
                self.positions[idx].1 += 1;
                self.next_partition = (idx + 1) % count;
                return Some(message);
            }
        }
        None
    }
}

#[async_trait]
impl EventSubscriber for BusConsumer {
    async fn fetch_message(&mut self, cancel: &CancellationToken) -> Result<BusMessage> {
        loop {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let bus = Arc::clone(&self.bus);
            let appended = bus.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            if let Some(message) = self.poll_once() {
                return Ok(message);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                _ = &mut appended => {}
                _ = tokio::time::sleep(self.config.max_wait) => {}
            }
        }
    }

    async fn commit(&mut self, message: &BusMessage) -> Result<()> {
        if message.topic != self.config.topic {
            return Err(PipelineError::Bus(format!(
                "commit for topic {} on consumer of {}",
                message.topic, self.config.topic
            )));
        }
        self.bus.commit_offset(&self.config.group_id, message);
        Ok(())
    }
}
