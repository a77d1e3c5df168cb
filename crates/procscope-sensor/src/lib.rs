//! OS-facing collection for procscope.
//!
//! Everything that shells out to the operating system lives here: the three
//! scan collectors and the code-signature extractor, plus the signature
//! cache and the worker pool that keeps signature extraction off the scan
//! loop's critical path.

pub mod collectors;
pub mod command;
pub mod pool;
pub mod sigcache;

pub use collectors::{connection_summary, launchd_services, list_processes, RawProcess};
pub use pool::{CodesignPool, InlineCodesign, PoolError, SignatureProvider};
pub use sigcache::SignatureCache;
