use tracing::debug;

/// Coalescing state machine for save requests: at most one save runs at a
/// time, and any number of requests arriving while it runs collapse into a
/// single follow-up save.
///
/// The caller drives it:
///
/// ```ignore
/// if throttle.begin() {
///     loop {
///         do_save()?;
///         if !throttle.finish() {
///             break;
///         }
///     }
/// }
/// ```
#[derive(Debug, Default)]
pub struct ThrottledSaves {
    save_running: bool,
    pending: bool,
}

impl ThrottledSaves {
    pub fn new() -> ThrottledSaves {
        ThrottledSaves::default()
    }

    /// Request a save. Returns `true` when the caller should perform it now;
    /// `false` when one is already running and this request was coalesced.
    pub fn begin(&mut self) -> bool {
        if self.save_running {
            debug!("save already in progress, coalescing request");
            self.pending = true;
            return false;
        }
        self.save_running = true;
        true
    }

    /// Mark the running save complete. Returns `true` when coalesced
    /// requests arrived meanwhile and exactly one follow-up save should run
    /// (the throttle stays held); `false` once fully drained.
    pub fn finish(&mut self) -> bool {
        if self.pending {
            self.pending = false;
            return true;
        }
        self.save_running = false;
        false
    }

    pub fn save_running(&self) -> bool {
        self.save_running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_save_runs_and_drains() {
        let mut t = ThrottledSaves::new();
        assert!(t.begin());
        assert!(!t.finish());
        assert!(!t.save_running());
    }

    #[test]
    fn concurrent_requests_coalesce_into_one_follow_up() {
        let mut t = ThrottledSaves::new();
        assert!(t.begin());
        // three requests land while the save runs
        assert!(!t.begin());
        assert!(!t.begin());
        assert!(!t.begin());
        // one coalesced follow-up, then drained
        assert!(t.finish());
        assert!(!t.finish());
        assert!(!t.save_running());
    }
}
