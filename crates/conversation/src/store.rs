//! The keyed conversation store.
//!
//! Every user has one slot holding a `tokio::sync::Mutex` around their
//! history. A [`Session`] is an owned guard on that slot, so all work for a
//! user (chat requests, resets, batch runs) is serialized while different
//! users never contend.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use learnpath_core::message::{ConversationHistory, Turn, UserId, pairing_violations};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::compaction::{CompactionPolicy, CompactionReport};

type Slot = Arc<AsyncMutex<ConversationHistory>>;

/// Per-user histories, created lazily, kept for the process lifetime.
pub struct ConversationStore {
    slots: Mutex<HashMap<UserId, Slot>>,
    /// Users whose committed history is non-empty.
    active: Arc<Mutex<BTreeSet<UserId>>>,
    compaction: Arc<CompactionPolicy>,
    system_directive: Arc<str>,
}

impl ConversationStore {
    /// `system_directive` seeds every new history; `{user_id}` is substituted.
    pub fn new(system_directive: impl Into<String>, compaction: CompactionPolicy) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            active: Arc::new(Mutex::new(BTreeSet::new())),
            compaction: Arc::new(compaction),
            system_directive: Arc::from(system_directive.into()),
        }
    }

    fn slot(&self, user_id: UserId) -> Slot {
        let mut slots = match self.slots.lock() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots
            .entry(user_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(ConversationHistory::new(user_id))))
            .clone()
    }

    /// Check out a user's history, waiting for any in-flight work on it.
    pub async fn session(&self, user_id: UserId) -> Session {
        let guard = self.slot(user_id).lock_owned().await;
        let working = guard.turns.clone();
        Session {
            user_id,
            guard,
            working,
            active: Arc::clone(&self.active),
            compaction: Arc::clone(&self.compaction),
            system_directive: Arc::clone(&self.system_directive),
        }
    }

    /// Append one turn to a user's stored history.
    pub async fn append(&self, user_id: UserId, turn: Turn) {
        let mut session = self.session(user_id).await;
        session.append(turn);
        session.commit();
    }

    /// Compact a user's stored history if it exceeds the threshold.
    pub async fn compact_if_needed(&self, user_id: UserId) -> Option<CompactionReport> {
        let mut session = self.session(user_id).await;
        let report = session.compact_if_needed().await;
        session.commit();
        report
    }

    /// Discard a user's history. The next message starts a fresh one.
    pub async fn reset(&self, user_id: UserId) {
        let mut session = self.session(user_id).await;
        session.working.clear();
        session.commit();
        info!(user_id, "Conversation history reset");
    }

    /// A copy of a user's stored history.
    pub async fn snapshot(&self, user_id: UserId) -> Vec<Turn> {
        self.session(user_id).await.working
    }

    /// Users with a non-empty committed history, ascending.
    ///
    /// Lookups, resets and failed requests do not count.
    pub fn known_users(&self) -> Vec<UserId> {
        let active = match self.active.lock() {
            Ok(active) => active,
            Err(poisoned) => poisoned.into_inner(),
        };
        active.iter().copied().collect()
    }
}

/// Exclusive checkout of one user's history.
///
/// Edits go to a working copy. [`Session::commit`] writes it back; dropping
/// the session without committing leaves the stored history untouched.
pub struct Session {
    user_id: UserId,
    guard: OwnedMutexGuard<ConversationHistory>,
    working: Vec<Turn>,
    active: Arc<Mutex<BTreeSet<UserId>>>,
    compaction: Arc<CompactionPolicy>,
    system_directive: Arc<str>,
}

impl Session {
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// The working copy.
    pub fn turns(&self) -> &[Turn] {
        &self.working
    }

    /// Mutable access to the working copy, for the tool loop.
    pub fn turns_mut(&mut self) -> &mut Vec<Turn> {
        &mut self.working
    }

    /// Append a turn, seeding the system directive first if the history is empty.
    pub fn append(&mut self, turn: Turn) {
        if self.working.is_empty() {
            let directive = self
                .system_directive
                .replace("{user_id}", &self.user_id.to_string());
            self.working.push(Turn::user(directive));
            debug!(user_id = self.user_id, "Seeded new conversation");
        }
        self.working.push(turn);
    }

    /// Append without seeding. Used for model and tool-result turns.
    pub fn push(&mut self, turn: Turn) {
        self.working.push(turn);
    }

    pub async fn compact_if_needed(&mut self) -> Option<CompactionReport> {
        self.compaction.compact(self.user_id, &mut self.working).await
    }

    /// Write the working copy back and release the user's slot.
    pub fn commit(mut self) {
        debug_assert!(
            pairing_violations(&self.working).is_empty(),
            "committing a history with broken tool call pairing"
        );
        let is_empty = self.working.is_empty();
        self.guard.turns = std::mem::take(&mut self.working);
        self.guard.updated_at = chrono::Utc::now();

        let mut active = match self.active.lock() {
            Ok(active) => active,
            Err(poisoned) => poisoned.into_inner(),
        };
        if is_empty {
            active.remove(&self.user_id);
        } else {
            active.insert(self.user_id);
        }
    }
}
