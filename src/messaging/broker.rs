//! In-process partitioned log with consumer groups.
//!
//! Records are kept per topic partition until every subscribed group has
//! committed past them. A subscribed topic whose uncommitted backlog reaches
//! the broker capacity rejects new records with [`QueueError::QueueFull`].
//! A topic nobody subscribes to never pushes back: it keeps its newest
//! records up to the capacity and drops older ones.

use super::{Consumer, Header, Message, Producer, QueueError, Record};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct StoredRecord {
    key: String,
    value: Vec<u8>,
    headers: Vec<Header>,
}

#[derive(Debug, Default)]
struct Partition {
    /// Offset of `records[0]`.
    base: u64,
    records: VecDeque<StoredRecord>,
}

impl Partition {
    fn next_offset(&self) -> u64 {
        self.base + self.records.len() as u64
    }

    fn get(&self, offset: u64) -> Option<&StoredRecord> {
        offset
            .checked_sub(self.base)
            .and_then(|index| self.records.get(index as usize))
    }
}

#[derive(Debug)]
struct Topic {
    partitions: Vec<Partition>,
    /// Next offset to consume per partition, per consumer group.
    committed: HashMap<String, Vec<u64>>,
}

impl Topic {
    fn new(partitions: usize) -> Self {
        Self {
            partitions: (0..partitions).map(|_| Partition::default()).collect(),
            committed: HashMap::new(),
        }
    }

    fn backlog(&self) -> usize {
        self.partitions.iter().map(|p| p.records.len()).sum()
    }

    /// Drops the oldest records of `partition` until one more fits within
    /// `retain`.
    fn evict(&mut self, partition: usize, retain: usize) {
        let partition = &mut self.partitions[partition];
        while partition.records.len() >= retain {
            partition.records.pop_front();
            partition.base += 1;
        }
    }

    fn trim(&mut self) {
        if self.committed.is_empty() {
            return;
        }
        for (index, partition) in self.partitions.iter_mut().enumerate() {
            let floor = self
                .committed
                .values()
                .map(|offsets| offsets[index])
                .min()
                .unwrap_or(partition.base);
            while partition.base < floor && !partition.records.is_empty() {
                partition.records.pop_front();
                partition.base += 1;
            }
        }
    }
}

struct BrokerInner {
    topics: Mutex<HashMap<String, Topic>>,
    notify: Notify,
    capacity: usize,
    partitions: usize,
}

#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl InMemoryBroker {
    pub fn new(capacity: usize, partitions: usize) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                topics: Mutex::new(HashMap::new()),
                notify: Notify::new(),
                capacity: capacity.max(1),
                partitions: partitions.max(1),
            }),
        }
    }

    fn topics(&self) -> MutexGuard<'_, HashMap<String, Topic>> {
        // A poisoned lock only means another thread panicked mid-update of
        // plain data; the map itself is still usable.
        self.inner
            .topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn partition_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.inner.partitions as u64) as usize
    }

    /// Joins `group` on `topics`. A group that has never committed starts at
    /// the earliest retained record; an existing group resumes at its
    /// committed offsets, so uncommitted messages are delivered again.
    pub fn subscribe(&self, group: &str, topics: &[&str]) -> InMemoryConsumer {
        let mut positions = HashMap::new();
        {
            let mut all = self.topics();
            for name in topics {
                let partitions = self.inner.partitions;
                let topic = all
                    .entry(name.to_string())
                    .or_insert_with(|| Topic::new(partitions));
                let bases: Vec<u64> = topic.partitions.iter().map(|p| p.base).collect();
                let committed = topic.committed.entry(group.to_string()).or_insert(bases);
                positions.insert(name.to_string(), committed.clone());
            }
        }

        InMemoryConsumer {
            broker: self.clone(),
            group: group.to_string(),
            positions,
            cursor: 0,
        }
    }

    /// Every retained record of `topic`, in partition then offset order.
    pub fn messages(&self, topic: &str) -> Vec<Message> {
        let all = self.topics();
        let Some(found) = all.get(topic) else {
            return Vec::new();
        };

        let mut messages = Vec::new();
        for (index, partition) in found.partitions.iter().enumerate() {
            for (i, record) in partition.records.iter().enumerate() {
                messages.push(Message {
                    topic: topic.to_string(),
                    partition: index,
                    offset: partition.base + i as u64,
                    key: record.key.clone(),
                    value: record.value.clone(),
                    headers: record.headers.clone(),
                });
            }
        }
        messages
    }

    /// Committed next-offsets of `group` on `topic`.
    pub fn committed(&self, group: &str, topic: &str) -> Option<Vec<u64>> {
        self.topics()
            .get(topic)
            .and_then(|t| t.committed.get(group).cloned())
    }
}

#[async_trait]
impl Producer for InMemoryBroker {
    async fn produce(&self, record: Record) -> Result<(), QueueError> {
        let partition = self.partition_for(&record.key);
        {
            let mut all = self.topics();
            let partitions = self.inner.partitions;
            let topic = all
                .entry(record.topic.clone())
                .or_insert_with(|| Topic::new(partitions));

            if topic.committed.is_empty() {
                topic.evict(partition, (self.inner.capacity / partitions).max(1));
            } else if topic.backlog() >= self.inner.capacity {
                return Err(QueueError::QueueFull(record.topic));
            }

            topic.partitions[partition].records.push_back(StoredRecord {
                key: record.key,
                value: record.value,
                headers: record.headers,
            });
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }
}

pub struct InMemoryConsumer {
    broker: InMemoryBroker,
    group: String,
    /// Next offset to hand out per partition, per topic.
    positions: HashMap<String, Vec<u64>>,
    cursor: usize,
}

impl InMemoryConsumer {
    fn try_next(&mut self) -> Option<Message> {
        let all = self.broker.topics();
        let mut names: Vec<&String> = self.positions.keys().collect();
        names.sort();

        let mut slots = Vec::new();
        for name in names {
            if let Some(topic) = all.get(name.as_str()) {
                for index in 0..topic.partitions.len() {
                    slots.push((name.clone(), index));
                }
            }
        }
        if slots.is_empty() {
            return None;
        }

        for step in 0..slots.len() {
            let (name, index) = &slots[(self.cursor + step) % slots.len()];
            let topic = &all[name.as_str()];
            let position = self.positions[name.as_str()][*index];
            let partition = &topic.partitions[*index];
            let position = position.max(partition.base);

            if position >= partition.next_offset() {
                continue;
            }
            let Some(record) = partition.get(position) else {
                continue;
            };

            let message = Message {
                topic: name.clone(),
                partition: *index,
                offset: position,
                key: record.key.clone(),
                value: record.value.clone(),
                headers: record.headers.clone(),
            };

            // Stay on this partition so its records come out in order.
            self.cursor = (self.cursor + step) % slots.len();
            if let Some(offsets) = self.positions.get_mut(name.as_str()) {
                offsets[*index] = position + 1;
            }
            return Some(message);
        }

        None
    }
}

#[async_trait]
impl Consumer for InMemoryConsumer {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<Message>, QueueError> {
        let deadline = Instant::now() + timeout;

        let inner = self.broker.inner.clone();

        loop {
            let notified = inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.try_next() {
                return Ok(Some(message));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn commit(&mut self, message: &Message) -> Result<(), QueueError> {
        let mut all = self.broker.topics();
        let topic = all
            .get_mut(&message.topic)
            .ok_or_else(|| QueueError::NotSubscribed(message.topic.clone()))?;
        let offsets = topic
            .committed
            .get_mut(&self.group)
            .ok_or_else(|| QueueError::NotSubscribed(message.topic.clone()))?;

        let next = message.offset + 1;
        if offsets[message.partition] < next {
            offsets[message.partition] = next;
        }
        topic.trim();
        Ok(())
    }
}
