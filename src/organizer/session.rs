//! Organizer Run Session
//!
//! Move observers (learning from manual corrections) must not react to moves
//! the organizer performs itself. A session answers "was this move ours?":
//!
//! - while a run is active every move is ignored
//! - for a grace window after the run ends every move is ignored
//! - a bookmark moved by the run stays ignored for its TTL

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::constants::organizer as consts;

#[derive(Debug, Default)]
struct SessionState {
    active: bool,
    ended_at: Option<Instant>,
    moved: HashMap<String, Instant>,
}

#[derive(Debug)]
pub struct RunSession {
    grace: Duration,
    ttl: Duration,
    state: Mutex<SessionState>,
}

impl Default for RunSession {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(consts::SUPPRESSION_WINDOW_SECS),
            Duration::from_secs(consts::MOVED_ITEM_TTL_SECS),
        )
    }
}

impl RunSession {
    pub fn new(grace: Duration, ttl: Duration) -> Self {
        Self {
            grace,
            ttl,
            state: Mutex::new(SessionState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn begin(&self) {
        let mut state = self.lock();
        state.active = true;
        state.ended_at = None;
        debug!("Organizer run started");
    }

    /// End the run and open the grace window
    pub fn end(&self) {
        let mut state = self.lock();
        state.active = false;
        state.ended_at = Some(Instant::now());
        debug!(moved = state.moved.len(), "Organizer run ended");
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    pub fn mark_moved(&self, id: &str) {
        self.lock().moved.insert(id.to_string(), Instant::now());
    }

    pub fn should_ignore_move(&self, id: &str) -> bool {
        let state = self.lock();
        if state.active {
            return true;
        }
        if let Some(ended) = state.ended_at
            && ended.elapsed() < self.grace
        {
            return true;
        }
        state
            .moved
            .get(id)
            .is_some_and(|at| at.elapsed() < self.ttl)
    }

    /// Drop moved ids past their TTL. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut state = self.lock();
        let before = state.moved.len();
        let ttl = self.ttl;
        state.moved.retain(|_, at| at.elapsed() < ttl);
        before - state.moved.len()
    }

    pub fn tracked(&self) -> usize {
        self.lock().moved.len()
    }
}
