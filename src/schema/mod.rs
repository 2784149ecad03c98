// ============================================================================
// Schema Resolution
// ============================================================================
//
// Revision-aware schema handling: a registry collaborator trait, compiled
// per-revision decoders, and a process-lifetime cache with latest-revision
// fallback.
//
// ============================================================================

mod cache;
mod decoder;
mod memory;
mod registry;

pub use cache::RevisionCache;
pub use decoder::RevisionDecoder;
pub use memory::MemoryRegistry;
pub use registry::{SchemaRegistry, SchemaRevision};
