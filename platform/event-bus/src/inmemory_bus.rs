//! In-memory broker for tests and local development

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

use crate::consumer::{Acker, ConsumerGroup, Delivery};
use crate::producer::{AckFuture, Transport};
use crate::{BusError, BusResult, Message};

/// Broker implementation backed by in-process partition logs
///
/// This implementation is suitable for:
/// - Unit tests (no external dependencies)
/// - Local development without Docker
///
/// Each topic is split into a fixed number of partitions; a message lands in
/// the partition chosen by hashing its key. Consumer groups track acked
/// offsets per partition. A session starts from the first unacked offset, so
/// anything left unacked is redelivered after [`rebalance`](Self::rebalance).
///
/// Members of a group own disjoint partitions: with `n` members, the member
/// at position `i` (in join order) reads partitions where `p % n == i`. A
/// member joining for the first time or closing rebalances the group.
///
/// # Example
/// ```rust
/// use event_bus::{InMemoryBus, Message};
///
/// # async fn example() -> Result<(), event_bus::BusError> {
/// let bus = InMemoryBus::new();
/// bus.produce(Message::new("user-registered", b"{}".to_vec())).await?;
/// assert_eq!(bus.published("user-registered").len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryBus {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    // Bumped on every publish, ack, close and rebalance to wake idle sessions
    changed: watch::Sender<u64>,
    partitions: usize,
}

#[derive(Default)]
struct State {
    topics: HashMap<String, Vec<Vec<Record>>>,
    groups: HashMap<String, GroupState>,
    fail_publishes: usize,
    next_member: u64,
}

#[derive(Default)]
struct GroupState {
    acked: HashMap<(String, i32), BTreeSet<i64>>,
    generation: u64,
    // Live members in join order
    members: Vec<u64>,
    closed: BTreeSet<u64>,
}

impl GroupState {
    fn owns(&self, member: u64, partition: usize) -> Option<bool> {
        let index = self.members.iter().position(|m| *m == member)?;
        Some(partition % self.members.len() == index)
    }
}

#[derive(Clone)]
struct Record {
    key: Vec<u8>,
    value: Vec<u8>,
    headers: HashMap<String, Vec<u8>>,
    timestamp: DateTime<Utc>,
}

enum Step {
    Deliver(Message),
    Idle,
    Rebalanced,
    Closed,
}

impl InMemoryBus {
    /// Create a bus with a single partition per topic
    pub fn new() -> Self {
        Self::with_partitions(1)
    }

    pub fn with_partitions(partitions: usize) -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                changed,
                partitions: partitions.max(1),
            }),
        }
    }

    /// A new member of consumer group `group_id`.
    ///
    /// The member takes its share of partitions on its first `join` and
    /// keeps it until [`close`](ConsumerGroup::close).
    pub fn group(&self, group_id: &str) -> InMemoryGroup {
        let member = {
            let mut state = self.state();
            state.next_member += 1;
            state.next_member
        };
        InMemoryGroup {
            bus: self.clone(),
            group_id: group_id.to_string(),
            member,
        }
    }

    /// Publish and wait for the ack.
    pub async fn produce(&self, msg: Message) -> BusResult<()> {
        self.dispatch(&msg).await?.await
    }

    /// Make the next `n` publishes fail at acknowledgement time.
    pub fn fail_next_publishes(&self, n: usize) {
        self.state().fail_publishes = n;
    }

    /// Every message on `topic`, partition by partition, in offset order.
    pub fn published(&self, topic: &str) -> Vec<Message> {
        let state = self.state();
        let Some(partitions) = state.topics.get(topic) else {
            return Vec::new();
        };
        partitions
            .iter()
            .enumerate()
            .flat_map(|(p, records)| {
                records
                    .iter()
                    .enumerate()
                    .map(move |(o, r)| r.to_message(topic, p as i32, o as i64))
            })
            .collect()
    }

    /// End the current session of every member of `group_id`.
    pub fn rebalance(&self, group_id: &str) {
        self.state()
            .groups
            .entry(group_id.to_string())
            .or_default()
            .generation += 1;
        self.notify();
    }

    pub fn is_acked(&self, group_id: &str, topic: &str, partition: i32, offset: i64) -> bool {
        self.state()
            .groups
            .get(group_id)
            .and_then(|g| g.acked.get(&(topic.to_string(), partition)))
            .is_some_and(|acked| acked.contains(&offset))
    }

    /// First offset of the partition not yet acked by `group_id`.
    pub fn committed(&self, group_id: &str, topic: &str, partition: i32) -> i64 {
        let state = self.state();
        let acked = state
            .groups
            .get(group_id)
            .and_then(|g| g.acked.get(&(topic.to_string(), partition)));
        first_unacked(acked)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.inner.changed.send_modify(|v| *v = v.wrapping_add(1));
    }

    fn partition_for(&self, key: &[u8]) -> usize {
        if self.inner.partitions == 1 {
            return 0;
        }
        // FNV-1a keeps key -> partition stable across runs
        let hash = key.iter().fold(0xcbf2_9ce4_8422_2325_u64, |h, b| {
            (h ^ u64::from(*b)).wrapping_mul(0x0100_0000_01b3)
        });
        (hash % self.inner.partitions as u64) as usize
    }

    fn next_step(
        &self,
        group_id: &str,
        member: u64,
        topics: &[String],
        generation: u64,
        cursors: &mut HashMap<(String, i32), i64>,
    ) -> Step {
        let state = self.state();
        let Some(group) = state.groups.get(group_id) else {
            return Step::Idle;
        };
        if group.closed.contains(&member) {
            return Step::Closed;
        }
        if group.generation != generation {
            return Step::Rebalanced;
        }

        for topic in topics {
            let Some(partitions) = state.topics.get(topic) else {
                continue;
            };
            for (p, records) in partitions.iter().enumerate() {
                match group.owns(member, p) {
                    Some(true) => {}
                    Some(false) => continue,
                    None => return Step::Closed,
                }
                let partition = p as i32;
                let acked = group.acked.get(&(topic.clone(), partition));
                let cursor = cursors
                    .entry((topic.clone(), partition))
                    .or_insert_with(|| first_unacked(acked));
                while acked.is_some_and(|a| a.contains(&*cursor)) {
                    *cursor += 1;
                }
                if let Some(record) = records.get(*cursor as usize) {
                    let offset = *cursor;
                    *cursor += 1;
                    return Step::Deliver(record.to_message(topic, partition, offset));
                }
            }
        }
        Step::Idle
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Record {
    fn to_message(&self, topic: &str, partition: i32, offset: i64) -> Message {
        Message {
            key: self.key.clone(),
            value: self.value.clone(),
            headers: self.headers.clone(),
            topic: topic.to_string(),
            partition,
            offset,
            timestamp: Some(self.timestamp),
            metadata: None,
        }
    }
}

fn first_unacked(acked: Option<&BTreeSet<i64>>) -> i64 {
    let mut offset = 0;
    if let Some(acked) = acked {
        while acked.contains(&offset) {
            offset += 1;
        }
    }
    offset
}

#[async_trait]
impl Transport for InMemoryBus {
    async fn dispatch(&self, msg: &Message) -> BusResult<AckFuture> {
        let partition = self.partition_for(&msg.key);
        let acked = {
            let mut state = self.state();
            if state.fail_publishes > 0 {
                state.fail_publishes -= 1;
                Err(BusError::PublishError("injected publish failure".to_string()))
            } else {
                let partitions = self.inner.partitions;
                state
                    .topics
                    .entry(msg.topic.clone())
                    .or_insert_with(|| vec![Vec::new(); partitions])[partition]
                    .push(Record {
                        key: msg.key.clone(),
                        value: msg.value.clone(),
                        headers: msg.headers.clone(),
                        timestamp: Utc::now(),
                    });
                Ok(())
            }
        };
        self.notify();
        Ok(Box::pin(futures::future::ready(acked)))
    }
}

/// Consumer group member on an [`InMemoryBus`]
pub struct InMemoryGroup {
    bus: InMemoryBus,
    group_id: String,
    member: u64,
}

struct InMemoryAcker {
    bus: InMemoryBus,
    group_id: String,
    topic: String,
    partition: i32,
    offset: i64,
}

#[async_trait]
impl Acker for InMemoryAcker {
    async fn ack(self: Box<Self>) -> BusResult<()> {
        self.bus
            .state()
            .groups
            .entry(self.group_id.clone())
            .or_default()
            .acked
            .entry((self.topic.clone(), self.partition))
            .or_default()
            .insert(self.offset);
        self.bus.notify();
        Ok(())
    }
}

#[async_trait]
impl ConsumerGroup for InMemoryGroup {
    async fn join(&self, topics: &[String]) -> BusResult<BoxStream<'static, BusResult<Delivery>>> {
        let (generation, joined) = {
            let mut state = self.bus.state();
            let group = state.groups.entry(self.group_id.clone()).or_default();
            if group.closed.contains(&self.member) {
                return Err(BusError::GroupClosed);
            }
            let joined = !group.members.contains(&self.member);
            if joined {
                group.members.push(self.member);
                group.generation += 1;
            }
            (group.generation, joined)
        };
        if joined {
            // Existing members end their sessions and pick up the new split
            self.bus.notify();
        }

        let bus = self.bus.clone();
        let group_id = self.group_id.clone();
        let member = self.member;
        let topics = topics.to_vec();
        let mut changes = bus.inner.changed.subscribe();

        let stream = async_stream::stream! {
            let mut cursors = HashMap::new();
            loop {
                // Mark the current version seen before looking at state so a
                // concurrent publish always wakes the wait below.
                drop(changes.borrow_and_update());
                match bus.next_step(&group_id, member, &topics, generation, &mut cursors) {
                    Step::Deliver(message) => {
                        let acker = InMemoryAcker {
                            bus: bus.clone(),
                            group_id: group_id.clone(),
                            topic: message.topic.clone(),
                            partition: message.partition,
                            offset: message.offset,
                        };
                        yield Ok(Delivery::new(message, Box::new(acker)));
                    }
                    Step::Idle => {
                        if changes.changed().await.is_err() {
                            break;
                        }
                    }
                    Step::Rebalanced => break,
                    Step::Closed => {
                        yield Err(BusError::GroupClosed);
                        break;
                    }
                }
            }
        };

        Ok(stream.boxed())
    }

    /// Leave the group; the remaining members take over its partitions.
    async fn close(&self) -> BusResult<()> {
        {
            let mut state = self.bus.state();
            let group = state.groups.entry(self.group_id.clone()).or_default();
            if group.closed.insert(self.member) {
                group.members.retain(|m| *m != self.member);
                group.generation += 1;
            }
        }
        self.bus.notify();
        Ok(())
    }
}
