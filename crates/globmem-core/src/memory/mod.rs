//! Dynamic global memory
//!
//! Buckets and the per-unit bucket table hold local memory; the layout,
//! resolver and references address it team-wide; the commit protocol moves
//! the team from one layout to the next.

pub mod segment;
pub mod bucket;
pub mod bucket_table;
pub mod layout;
pub mod resolver;
pub mod gref;
pub mod commit;
pub mod glob_dynamic_mem;

pub use bucket::{Bucket, BucketState};
pub use bucket_table::LocalBucketTable;
pub use commit::CommitReport;
pub use glob_dynamic_mem::GlobDynamicMem;
pub use gref::{GlobPos, GlobRange, GlobalRef, LocalPos, Resolved};
pub use layout::{BucketExtent, GlobalLayout, UnitLayout};
pub use resolver::{Placement, Resolver};
pub use segment::Segment;

#[cfg(test)]
mod tests;
