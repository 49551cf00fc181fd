//! A single chat topic: members plus bounded history behind the topic's own
//! lock.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tracing::warn;
use uuid::Uuid;

use super::protocol::TopicFrame;

pub type Outbound = mpsc::Sender<Arc<str>>;

struct Member {
    username: String,
    outbound: Outbound,
    /// Frames held back while the history replay is encoded outside the
    /// lock. `None` once the replay has been queued.
    backlog: Option<Vec<Arc<str>>>,
}

impl Member {
    /// Queue `frame` without waiting. `false` means the member must go.
    fn offer(&mut self, frame: &Arc<str>) -> bool {
        match &mut self.backlog {
            // One slot stays reserved for the replay itself.
            Some(backlog) if backlog.len() + 1 < self.outbound.max_capacity() => {
                backlog.push(frame.clone());
                true
            }
            Some(_) => false,
            None => self.outbound.try_send(frame.clone()).is_ok(),
        }
    }
}

#[derive(Default)]
struct TopicState {
    members: HashMap<Uuid, Member>,
    history: VecDeque<TopicFrame>,
    /// Set once membership drops to zero. A retired topic accepts no new
    /// members; joiners create a fresh topic instead.
    retired: bool,
}

/// Result of a broadcast under the topic lock.
#[derive(Debug, Default)]
pub(super) struct Broadcast {
    pub delivered: usize,
    pub evicted: Vec<String>,
    /// Membership reached zero during this call
    pub emptied: bool,
}

pub(super) struct Topic {
    name: String,
    history_limit: usize,
    state: Mutex<TopicState>,
}

impl Topic {
    pub fn new(name: impl Into<String>, history_limit: usize) -> Self {
        Self {
            name: name.into(),
            history_limit,
            state: Mutex::new(TopicState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a member and hand it the retained history before anything else.
    ///
    /// History is copied under the lock and encoded after releasing it.
    /// Frames broadcast in between are held in the member's backlog and
    /// queued right after the replay. Returns `false` if the topic was
    /// retired in the meantime.
    pub async fn admit(&self, id: Uuid, username: &str, outbound: Outbound) -> bool {
        let history: Vec<TopicFrame> = {
            let mut state = self.state.lock().await;
            if state.retired {
                return false;
            }
            let history: Vec<TopicFrame> = state.history.iter().cloned().collect();
            state.members.insert(
                id,
                Member {
                    username: username.to_string(),
                    outbound,
                    backlog: (!history.is_empty()).then(Vec::new),
                },
            );
            history
        };
        if history.is_empty() {
            return true;
        }

        let replay = match serde_json::to_string(&TopicFrame::History { messages: history }) {
            Ok(json) => Some(Arc::<str>::from(json)),
            Err(e) => {
                warn!(room = %self.name, error = %e, "Failed to encode history");
                None
            }
        };

        let mut state = self.state.lock().await;
        // Gone already if the hub was closed while encoding.
        if let Some(member) = state.members.get_mut(&id) {
            let backlog = member.backlog.take().unwrap_or_default();
            // The queue is fresh and the backlog leaves room for the replay.
            for frame in replay.into_iter().chain(backlog) {
                let _ = member.outbound.try_send(frame);
            }
        }
        true
    }

    /// Remove a member, closing its outbound queue.
    ///
    /// Returns `(was_member, now_empty)`.
    pub async fn remove(&self, id: &Uuid) -> (bool, bool) {
        let mut state = self.state.lock().await;
        let removed = state.members.remove(id).is_some();
        let empty = state.members.is_empty();
        if empty {
            state.retired = true;
        }
        (removed, empty)
    }

    /// Record `frame` in history and offer it to every member queue.
    ///
    /// When `author` is set the frame is only accepted if that member still
    /// belongs to the topic. Members whose queue is full or closed are
    /// evicted instead of waited on.
    pub async fn broadcast(&self, frame: TopicFrame, author: Option<&Uuid>) -> Option<Broadcast> {
        let json: Arc<str> = match serde_json::to_string(&frame) {
            Ok(json) => Arc::from(json),
            Err(e) => {
                warn!(room = %self.name, error = %e, "Failed to encode chat frame");
                return None;
            }
        };

        let mut state = self.state.lock().await;
        if state.retired {
            return None;
        }
        if let Some(author) = author {
            if !state.members.contains_key(author) {
                return None;
            }
        }

        state.history.push_back(frame);
        while state.history.len() > self.history_limit {
            state.history.pop_front();
        }

        let mut outcome = Broadcast::default();
        state.members.retain(|_, member| {
            if member.offer(&json) {
                outcome.delivered += 1;
                true
            } else {
                // Dropping the sender closes the queue; the writer task exits.
                outcome.evicted.push(member.username.clone());
                false
            }
        });

        if state.members.is_empty() {
            state.retired = true;
            outcome.emptied = true;
        }
        Some(outcome)
    }

    pub async fn history(&self) -> Vec<TopicFrame> {
        let state = self.state.lock().await;
        state.history.iter().cloned().collect()
    }

    pub async fn member_count(&self) -> usize {
        self.state.lock().await.members.len()
    }

    /// Drop every member queue and retire the topic.
    pub async fn close(&self) -> usize {
        let mut state = self.state.lock().await;
        let count = state.members.len();
        state.members.clear();
        state.retired = true;
        count
    }
}
