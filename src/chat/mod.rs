//! Topic hub for chat rooms.
//!
//! Members join a named topic, receive the topic's retained history, and
//! exchange chat frames with the other members. A topic is created by its
//! first member and deleted when its last member leaves.
//!
//! ## Locking
//!
//! The hub lock only guards the name to topic map. Membership and history
//! live behind each topic's own lock, so traffic in one topic never waits on
//! another. Delivery to members is a non-blocking enqueue; a member whose
//! queue is full is evicted rather than waited on.
//!
//! The hub is transport-agnostic: the WebSocket glue in `web` owns the
//! socket and drains each member's outbound queue.

pub mod protocol;
mod topic;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use tracing::{info, warn};
use uuid::Uuid;

use protocol::TopicFrame;
use topic::Topic;

/// Hub and member transport settings.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Frames retained per topic for late joiners
    pub history_limit: usize,
    /// Per-member outbound queue depth
    pub outbound_capacity: usize,
    /// Read deadline; refreshed by any inbound frame including pongs
    pub pong_wait: Duration,
    /// Deadline for a single frame write
    pub write_wait: Duration,
    /// Largest accepted inbound message
    pub max_message_bytes: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_limit: 100,
            outbound_capacity: 256,
            pong_wait: Duration::from_secs(60),
            write_wait: Duration::from_secs(10),
            max_message_bytes: 512,
        }
    }
}

impl ChatConfig {
    pub fn history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity.max(1);
        self
    }

    pub fn pong_wait(mut self, wait: Duration) -> Self {
        self.pong_wait = wait;
        self
    }

    pub fn write_wait(mut self, wait: Duration) -> Self {
        self.write_wait = wait;
        self
    }

    pub fn max_message_bytes(mut self, max: usize) -> Self {
        self.max_message_bytes = max;
        self
    }

    /// Keep-alive cadence: nine tenths of the read deadline.
    pub fn ping_period(&self) -> Duration {
        self.pong_wait * 9 / 10
    }
}

/// Identity of one joined member, fixed at join time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberHandle {
    pub id: Uuid,
    pub username: String,
    pub room: String,
}

/// Returned by [`Hub::join`]: the member identity plus the queue its writer
/// task drains. The queue closes when the member leaves or is evicted.
pub struct Membership {
    pub member: MemberHandle,
    pub outbound: mpsc::Receiver<Arc<str>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomStats {
    pub name: String,
    pub clients: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubStats {
    pub total_clients: usize,
    pub total_rooms: usize,
    pub rooms: Vec<RoomStats>,
}

pub struct Hub {
    config: ChatConfig,
    topics: RwLock<HashMap<String, Arc<Topic>>>,
    /// Set by `close_all`; no room is created or joined afterwards.
    closed: AtomicBool,
}

impl Hub {
    pub fn new(config: ChatConfig) -> Self {
        Self {
            config,
            topics: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Join `room`, creating it if needed.
    ///
    /// The new member receives the room history (if any) before any other
    /// frame, then everyone in the room is told about the join. Returns
    /// `None` once the hub has been closed.
    pub async fn join(&self, room: &str, username: &str) -> Option<Membership> {
        let (tx, rx) = mpsc::channel(self.config.outbound_capacity.max(1));
        let id = Uuid::now_v7();

        let topic = loop {
            let topic = {
                let mut topics = self.topics.write().await;
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
                topics
                    .entry(room.to_string())
                    .or_insert_with(|| {
                        info!(room = %room, "Created room");
                        Arc::new(Topic::new(room, self.config.history_limit))
                    })
                    .clone()
            };

            if topic.admit(id, username, tx.clone()).await {
                break topic;
            }
            // Lost a race with the last member leaving; replace the retired topic.
            self.retire(&topic).await;
        };
        drop(tx);

        let clients = topic.member_count().await;
        info!(room = %room, username = %username, clients, "Member joined room");

        self.broadcast_on(&topic, TopicFrame::system(format!("{} joined the room", username)), None)
            .await;

        Some(Membership {
            member: MemberHandle {
                id,
                username: username.to_string(),
                room: room.to_string(),
            },
            outbound: rx,
        })
    }

    /// Remove a member. Idempotent; the member may already have been evicted.
    pub async fn leave(&self, member: &MemberHandle) {
        let Some(topic) = self.topic(&member.room).await else {
            return;
        };

        let (removed, empty) = topic.remove(&member.id).await;
        if removed {
            info!(room = %member.room, username = %member.username, "Member left room");
        }

        if empty {
            self.retire(&topic).await;
        } else if removed {
            self.broadcast_on(
                &topic,
                TopicFrame::system(format!("{} left the room", member.username)),
                None,
            )
            .await;
        }
    }

    /// Publish chat text authored by `member`, stamped with the member's
    /// join-time identity and the server clock.
    ///
    /// Returns the number of members the frame was queued for, or `None`
    /// if the author is no longer in the room.
    pub async fn post(&self, member: &MemberHandle, text: impl Into<String>) -> Option<usize> {
        let topic = self.topic(&member.room).await?;
        let frame = TopicFrame::chat(&member.room, &member.username, text);
        self.broadcast_on(&topic, frame, Some(&member.id)).await
    }

    async fn broadcast_on(&self, topic: &Arc<Topic>, frame: TopicFrame, author: Option<&Uuid>) -> Option<usize> {
        let outcome = topic.broadcast(frame, author).await?;

        for username in &outcome.evicted {
            warn!(room = %topic.name(), username = %username, "Evicted slow chat member");
        }
        if outcome.emptied {
            self.retire(topic).await;
        }
        Some(outcome.delivered)
    }

    /// Drop `topic` from the map if it is still the registered instance.
    async fn retire(&self, topic: &Arc<Topic>) {
        let mut topics = self.topics.write().await;
        if topics
            .get(topic.name())
            .is_some_and(|current| Arc::ptr_eq(current, topic))
        {
            topics.remove(topic.name());
            info!(room = %topic.name(), "Deleted empty room");
        }
    }

    async fn topic(&self, room: &str) -> Option<Arc<Topic>> {
        self.topics.read().await.get(room).cloned()
    }

    pub async fn room_exists(&self, room: &str) -> bool {
        self.topics.read().await.contains_key(room)
    }

    pub async fn member_count(&self, room: &str) -> usize {
        match self.topic(room).await {
            Some(topic) => topic.member_count().await,
            None => 0,
        }
    }

    /// Retained history of `room`, oldest first.
    pub async fn history(&self, room: &str) -> Vec<TopicFrame> {
        match self.topic(room).await {
            Some(topic) => topic.history().await,
            None => Vec::new(),
        }
    }

    pub async fn stats(&self) -> HubStats {
        let topics: Vec<Arc<Topic>> = self.topics.read().await.values().cloned().collect();

        let mut stats = HubStats::default();
        for topic in topics {
            let clients = topic.member_count().await;
            stats.total_clients += clients;
            stats.rooms.push(RoomStats {
                name: topic.name().to_string(),
                clients,
            });
        }
        stats.rooms.sort_by(|a, b| a.name.cmp(&b.name));
        stats.total_rooms = stats.rooms.len();
        stats
    }

    /// Close every member queue and delete every room. Used on shutdown;
    /// later joins are refused.
    pub async fn close_all(&self) {
        let topics: Vec<Arc<Topic>> = {
            let mut map = self.topics.write().await;
            self.closed.store(true, Ordering::Release);
            map.drain().map(|(_, topic)| topic).collect()
        };

        let mut members = 0;
        for topic in topics {
            members += topic.close().await;
        }
        info!(members, "Closed all chat rooms");
    }
}
