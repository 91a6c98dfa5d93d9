//! In-memory subscription registry.
//!
//! Maps request keys to backend endpoints ("nodes") that have announced
//! themselves able to serve that key, and picks the next live node for a
//! request via round robin. Lazy, on-the-hot-path eviction keeps dead
//! nodes out of the selection path without a background sweeper task; a
//! node's reference count defers its removal until any in-flight use of
//! it has completed.
//!
//! Single-threaded cooperative: a [`Registry`] holds no internal locks and
//! performs no I/O. Each routing process owns its own registry.

mod error;
mod node;
mod pool;
mod registry;

pub use error::AnnounceError;
pub use node::Node;
pub use pool::{Mode, NodeKey};
pub use registry::{AnnounceRequest, Config, LookupMode, NodeId, PoolId, Registry, Selection};
