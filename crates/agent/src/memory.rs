use std::collections::{HashMap, VecDeque};

use helios_core::{ConversationTurn, SessionId};
use tokio::sync::Mutex;

/// Conversation history partitioned by session, each partition bounded to `window` turns.
///
/// When more than `max_sessions` sessions are live, the least recently used one is dropped.
pub struct ConversationMemory {
    window: usize,
    max_sessions: usize,
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    sessions: HashMap<SessionId, SessionHistory>,
    clock: u64,
}

struct SessionHistory {
    turns: VecDeque<ConversationTurn>,
    last_used: u64,
}

impl ConversationMemory {
    pub fn new(window: usize, max_sessions: usize) -> Self {
        Self {
            window: window.max(1),
            max_sessions: max_sessions.max(1),
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Turns for `session`, most recent last. Unknown sessions have no history.
    pub async fn load(&self, session: &SessionId) -> Vec<ConversationTurn> {
        let mut state = self.state.lock().await;
        state.clock += 1;
        let now = state.clock;
        match state.sessions.get_mut(session) {
            Some(history) => {
                history.last_used = now;
                history.turns.iter().cloned().collect()
            }
            None => Vec::new(),
        }
    }

    pub async fn append(&self, session: &SessionId, turn: ConversationTurn) {
        let mut state = self.state.lock().await;
        state.clock += 1;
        let now = state.clock;

        let history = state
            .sessions
            .entry(session.clone())
            .or_insert_with(|| SessionHistory { turns: VecDeque::new(), last_used: now });
        history.last_used = now;
        history.turns.push_back(turn);
        while history.turns.len() > self.window {
            history.turns.pop_front();
        }

        if state.sessions.len() > self.max_sessions {
            let oldest = state
                .sessions
                .iter()
                .min_by_key(|(_, history)| history.last_used)
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                state.sessions.remove(&oldest);
                tracing::debug!(
                    event_name = "system.agent.memory.session_evicted",
                    session_id = %oldest,
                    "least recently used session evicted"
                );
            }
        }
    }

    pub async fn session_count(&self) -> usize {
        self.state.lock().await.sessions.len()
    }
}
