//! Tagged content cache subsystem.
//!
//! # Data Flow
//! ```text
//! Handler needs a document
//!     → content.rs (key + tags for the document)
//!     → tagged.rs get_or_compute
//!         hit  → cached value
//!         miss → single flight → upstream fetch → store + index tags
//!
//! Upstream content change
//!     → revalidation gateway
//!     → tagged.rs invalidate_by_tag (entry store + tag index together)
//! ```
//!
//! # Design Decisions
//! - In-process memory only; the data server stays the system of record
//! - Invalidation is proportional to affected entries, not cache size
//! - TTL is optional and lazily enforced

pub mod content;
pub mod entry;
pub mod tagged;

pub use content::{ContentCache, ContentKind, ContentService, CMS_TAG};
pub use entry::{CacheEntry, CacheOptions};
pub use tagged::{CacheError, CacheStats, TaggedCache, Ticket};
