//! The four OS collectors.
//!
//! Each is a single async operation with a hard timeout. Failures degrade to
//! empty containers (or `None` for signatures) and are logged; nothing here
//! raises past the orchestrator.

pub mod codesign;
pub mod connections;
pub mod launchd;
pub mod processes;

pub use codesign::signature_of;
pub use connections::connection_summary;
pub use launchd::launchd_services;
pub use processes::{list_processes, RawProcess};
