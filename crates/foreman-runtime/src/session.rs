use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as TokioMutex, OwnedMutexGuard};

type LockMap = HashMap<String, Arc<TokioMutex<()>>>;

/// Per-session turn locks. Turns against one session run one at a time;
/// turns against different sessions never contend. An entry lives only
/// while some turn holds or waits for it.
#[derive(Clone, Default)]
pub struct SessionLocks {
    locks: Arc<Mutex<LockMap>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for `session_id`, created on first use.
    pub fn run_lock(&self, session_id: &str) -> Arc<TokioMutex<()>> {
        Arc::clone(
            self.locks
                .lock()
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(TokioMutex::new(()))),
        )
    }

    /// Wait for the session to be free and hold it until the guard drops.
    pub async fn acquire(&self, session_id: &str) -> SessionGuard {
        let guard = self.run_lock(session_id).lock_owned().await;
        SessionGuard {
            guard: Some(guard),
            session_id: session_id.to_string(),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Sessions with a turn running or waiting.
    pub fn active_sessions(&self) -> usize {
        self.locks.lock().len()
    }
}

/// Holds one session's turn lock. Dropping it releases the session and
/// forgets the lock when no other turn is waiting on it.
pub struct SessionGuard {
    guard: Option<OwnedMutexGuard<()>>,
    session_id: String,
    locks: Arc<Mutex<LockMap>>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock();
        // Only the map's own handle left: nobody holds or waits
        if locks
            .get(&self.session_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.session_id);
        }
    }
}
