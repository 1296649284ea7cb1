//! # rook-table: Document-layer operations for RookDB
//!
//! This crate implements the document layer of a B-tree-backed JSON
//! document store: rows are JSON documents keyed by a table-configured
//! primary-key attribute, stored as blob references in the primary tree.
//!
//! - **Point operations** — `point_get`, `point_set`, `point_delete`,
//!   each write producing a modification report
//! - **Replace engine** — the unified conditional mutation behind insert,
//!   update, replace, and delete-by-function
//! - **Range scans** — ordered traversal with a map/filter/concat-map
//!   pipeline and count/reduce/group-by terminals, size-bounded streaming
//! - **Range erasure** and the **distribution sampler**
//! - **Backfill** — the ordered change stream replicas consume
//! - **Secondary indexes** — per-write maintenance fanned out under a
//!   drain barrier, plus online post-construction of new indexes
//!
//! # Write Path
//!
//! ```text
//! point_set / point_delete / replace
//!         │  (one Txn: locate, read old, write new, release old blob)
//!         ▼
//!   ModReport (deleted?, added?)
//!         │
//!         ▼
//!   update_sindexes ── one task per index, joined before return
//! ```
//!
//! A report is consumed by the sindex layer before the next mutation of
//! the same row is acknowledged; no-op reports suppress the fan-out.

mod backfill;
mod distribution;
mod erase;
mod error;
mod point;
mod post_construct;
mod replace;
mod report;
mod scan;
mod sindex;
mod table;
mod transform;
mod value;

#[cfg(test)]
mod tests;

// Public API
pub use backfill::{BackfillConsumer, BackfillItem, backfill};
pub use distribution::{DistributionResponse, distribution_get};
pub use erase::{erase_half_open, erase_range};
pub use error::{EvalError, TableError};
pub use point::{
    PointDeleteResponse, PointDeleteResult, PointReadResponse, PointWriteResponse,
    PointWriteResult, point_delete, point_get, point_set,
};
pub use post_construct::post_construct_sindexes;
pub use replace::{ReplaceResponse, delete_transform, insert_transform, replace};
pub use report::ModReport;
pub use scan::{RGET_MAX_CHUNK_SIZE, RgetResponse, RgetResult, ScanRequest, rget};
pub use sindex::{
    SINDEX_CATALOG_TREE, SindexDef, SindexState, create_sindex, encode_secondary,
    mark_sindexes_ready, sindex_catalog, update_single_sindex, update_sindexes,
};
pub use table::Table;
pub use transform::{
    Accumulator, COMPACT_EVERY, FilterExpr, MapExpr, ReduceExpr, Terminal, Transform,
    cmp_values,
};
pub use value::{DocRef, estimate_doc_size};
