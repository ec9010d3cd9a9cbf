//! Emulation session state

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Session has not started yet
    Stopped,
    /// Guest threads are executing
    Running,
    /// Guest threads are held at block boundaries
    Paused,
}

/// Shared emulation session
///
/// One instance is shared by the thread registry and the kernel so that
/// `sys_process_exit` can stop every guest thread, not just the caller.
pub struct Session {
    state: Mutex<SessionState>,
    stop_requested: AtomicBool,
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Stopped),
            stop_requested: AtomicBool::new(false),
        }
    }

    /// Get the current state
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
        if state == SessionState::Running {
            self.stop_requested.store(false, Ordering::Release);
        }
        tracing::info!("session state: {:?}", state);
    }

    /// Ask every execution loop to wind down at its next block boundary
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        *self.state.lock() = SessionState::Stopped;
        tracing::info!("session stop requested");
    }

    /// Checked by execution loops between blocks
    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_transitions() {
        let session = Session::new();
        assert_eq!(session.state(), SessionState::Stopped);

        session.set_state(SessionState::Running);
        assert!(session.is_running());
        assert!(!session.stop_requested());

        session.set_state(SessionState::Paused);
        assert_eq!(session.state(), SessionState::Paused);

        session.request_stop();
        assert!(session.stop_requested());
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[test]
    fn test_run_clears_stop_request() {
        let session = Session::new();
        session.request_stop();
        session.set_state(SessionState::Running);
        assert!(!session.stop_requested());
    }
}
