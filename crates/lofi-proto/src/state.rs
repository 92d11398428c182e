use crate::protocol::PlayerSnapshot;
use std::sync::Arc;
use tokio::sync::RwLock;

/// The daemon's published view of the player.  The core loop is the only
/// writer; socket and HTTP handlers read copies.
pub struct StateManager {
    state: Arc<RwLock<PlayerSnapshot>>,
}

impl StateManager {
    pub fn new(initial: PlayerSnapshot) -> Self {
        Self {
            state: Arc::new(RwLock::new(initial)),
        }
    }

    pub async fn get_state(&self) -> PlayerSnapshot {
        self.state.read().await.clone()
    }

    /// Replace the snapshot if anything changed, bumping `rev`.  Returns
    /// whether a new revision was published.
    pub async fn publish(&self, mut next: PlayerSnapshot) -> bool {
        let mut state = self.state.write().await;
        next.rev = state.rev;
        if same_content(&state, &next) {
            return false;
        }
        next.rev += 1;
        *state = next;
        true
    }
}

fn same_content(a: &PlayerSnapshot, b: &PlayerSnapshot) -> bool {
    a.current_station == b.current_station
        && a.phase == b.phase
        && a.is_playing == b.is_playing
        && a.volume == b.volume
        && a.is_muted == b.is_muted
        && a.mood == b.mood
        && a.last_error == b.last_error
        && a.media_health == b.media_health
        && a.stations == b.stations
}
