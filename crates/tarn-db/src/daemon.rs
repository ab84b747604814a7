use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::database::Database;
use crate::document::now_millis;

/// Handle to a background task. Dropping it stops the thread.
pub struct DaemonHandle {
    shutdown: Arc<AtomicBool>,
    notify: Arc<(Mutex<()>, Condvar)>,
    handle: Option<thread::JoinHandle<()>>,
}

impl DaemonHandle {
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.notify.1.notify_one();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for DaemonHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_periodic<F>(interval_ms: u64, mut tick: F) -> Option<DaemonHandle>
where
    F: FnMut() + Send + 'static,
{
    if interval_ms == u64::MAX || interval_ms == 0 {
        return None;
    }
    let shutdown = Arc::new(AtomicBool::new(false));
    let notify = Arc::new((Mutex::new(()), Condvar::new()));
    let task_flag = Arc::clone(&shutdown);
    let task_notify = Arc::clone(&notify);
    let interval = Duration::from_millis(interval_ms);
    let handle = thread::spawn(move || loop {
        let (lock, cvar) = &*task_notify;
        if let Ok(guard) = lock.lock() {
            let _ = cvar.wait_timeout(guard, interval);
        }
        if task_flag.load(Ordering::Relaxed) {
            break;
        }
        tick();
    });
    Some(DaemonHandle {
        shutdown,
        notify,
        handle: Some(handle),
    })
}

/// Spawn the TTL sweep thread: every `interval_ms` it visits each
/// collection with a configured TTL and removes expired documents through
/// the standard remove path. `u64::MAX` (or 0) disables the sweep.
pub fn spawn_ttl_sweep(db: Arc<RwLock<Database>>, interval_ms: u64) -> Option<DaemonHandle> {
    spawn_periodic(interval_ms, move || {
        let Ok(mut db) = db.write() else {
            return;
        };
        let now = now_millis();
        for collection in db.collections_mut() {
            if let Err(e) = collection.ttl_sweep_at(now) {
                warn!(collection = %collection.name, error = %e, "ttl sweep failed");
            }
        }
    })
}

/// Spawn the autosave thread: every `interval_ms` it saves the database
/// through its adapter if any collection is dirty. `u64::MAX` (or 0)
/// disables autosave.
pub fn spawn_autosave(db: Arc<RwLock<Database>>, interval_ms: u64) -> Option<DaemonHandle> {
    spawn_periodic(interval_ms, move || {
        let Ok(mut db) = db.write() else {
            return;
        };
        if db.autosave_dirty() {
            if let Err(e) = db.save_database() {
                warn!(error = %e, "autosave failed");
            }
        }
    })
}
