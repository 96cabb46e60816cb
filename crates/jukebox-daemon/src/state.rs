use jukebox_proto::protocol::JukeboxState;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Latest published snapshot, shared with the HTTP and socket servers.  Only
/// `DaemonCore` writes to it.
pub struct StateManager {
    state: Arc<RwLock<JukeboxState>>,
}

impl StateManager {
    pub fn new(initial: JukeboxState) -> Self {
        Self {
            state: Arc::new(RwLock::new(JukeboxState { rev: 1, ..initial })),
        }
    }

    pub async fn get_state(&self) -> JukeboxState {
        self.state.read().await.clone()
    }

    /// For threads outside the runtime.  Panics if called from async code.
    pub fn blocking_state(&self) -> JukeboxState {
        self.state.blocking_read().clone()
    }

    /// Stores `next` if it differs from the current snapshot.  Returns the
    /// new revision, or `None` when nothing changed.
    pub async fn publish(&self, next: JukeboxState) -> Option<u64> {
        let mut state = self.state.write().await;
        let rev = state.rev;
        if (JukeboxState { rev, ..next.clone() }) == *state {
            return None;
        }
        *state = JukeboxState { rev: rev + 1, ..next };
        Some(state.rev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_bumps_rev_only_on_change() {
        let sm = StateManager::new(JukeboxState::default());
        assert_eq!(sm.get_state().await.rev, 1);

        let mut next = sm.get_state().await;
        assert_eq!(sm.publish(next.clone()).await, None);

        next.is_playing = true;
        next.rev = 999;
        assert_eq!(sm.publish(next).await, Some(2));
        let state = sm.get_state().await;
        assert_eq!(state.rev, 2);
        assert!(state.is_playing);
    }

    #[test]
    fn test_blocking_state_off_the_runtime() {
        let sm = StateManager::new(JukeboxState::default());
        let state = std::thread::spawn(move || sm.blocking_state()).join().unwrap();
        assert_eq!(state.rev, 1);
    }
}
