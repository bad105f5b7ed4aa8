pub mod actions;
pub mod apply;
pub mod checklist;
pub mod config;
pub mod environment;
pub mod error;
pub mod io;
pub mod local;
pub mod paths;
pub mod ports;
pub mod requirements;
pub mod session;
pub mod snapshot;
pub mod store;
pub mod timeline;
pub mod types;

#[cfg(test)]
mod fakes;

pub use error::{LifecycleError, Result};
pub use session::{LifecycleSession, RefreshMode, SessionPorts};
