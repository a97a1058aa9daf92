//! Concrete copy algorithms
//!
//! Two strategies ship with the engine: [`DefaultAlgorithm`] favors
//! throughput (kernel range copy with a chunked fallback), [`SyncAlgorithm`]
//! favors durability (synchronous writes, tiered chunk sizes).

mod default;
mod sync;

pub use default::{CHUNK_SIZE, DefaultAlgorithm};
pub use sync::SyncAlgorithm;
