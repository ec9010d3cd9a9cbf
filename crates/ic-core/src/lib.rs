//! Core emulator logic for ironcell
//!
//! Configuration, error taxonomy, logging setup, the emulation session
//! state machine and the collaborator device interfaces shared by the
//! rest of the workspace.

pub mod config;
pub mod device;
pub mod error;
pub mod logging;
pub mod session;

pub use config::Config;
pub use error::{CoreError, Result};
pub use session::{Session, SessionState};
