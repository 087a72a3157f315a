//! The out-of-band snapshot trigger.
//!
//! SIGUSR1 asks the server to dump every event's seat grid. The handler
//! itself must not touch locks or I/O, so it does exactly one thing: set a
//! process-wide atomic flag. The accept loop polls [`DumpFlag::take`] once
//! per iteration, right before blocking on the control channel, and does the
//! actual dump on its own thread.

use signal_hook::consts::SIGUSR1;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cloneable handle to the snapshot-requested flag.
///
/// The flag's synchronization is independent of every other lock in the
/// process, so the handler can never deadlock with queue or store
/// operations.
#[derive(Debug, Clone, Default)]
pub struct DumpFlag {
    requested: Arc<AtomicBool>,
}

impl DumpFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the SIGUSR1 handler for the rest of the process lifetime.
    pub fn install(&self) -> io::Result<()> {
        signal_hook::flag::register(SIGUSR1, Arc::clone(&self.requested))?;
        tracing::debug!("SIGUSR1 snapshot handler installed");
        Ok(())
    }

    /// Request a snapshot. What the signal handler does; also handy for
    /// driving the flag without a real signal.
    pub fn set(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    /// Clear the flag, reporting whether it was set. At most one caller
    /// observes `true` per request.
    pub fn take(&self) -> bool {
        self.requested.swap(false, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_clears_the_flag() {
        let flag = DumpFlag::new();
        assert!(!flag.take());
        flag.set();
        assert!(flag.take());
        assert!(!flag.take());
    }

    #[test]
    fn clones_share_one_flag() {
        let flag = DumpFlag::new();
        let other = flag.clone();
        other.set();
        assert!(flag.take());
        assert!(!other.take());
    }

    #[test]
    fn sigusr1_sets_the_flag() {
        let flag = DumpFlag::new();
        flag.install().unwrap();
        signal_hook::low_level::raise(SIGUSR1).unwrap();

        // Signal delivery is asynchronous; give it a moment.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        let mut seen = false;
        while std::time::Instant::now() < deadline {
            if flag.take() {
                seen = true;
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(seen, "flag should be set after SIGUSR1");
    }
}
