//! The range scan engine.
//!
//! Ascending traversal over a half-open key range, feeding each document
//! through the transform chain and either streaming `(key, doc)` pairs or
//! folding them into a terminal accumulator.
//!
//! Streamed scans are size-bounded: once the cumulative estimated response
//! size reaches the chunk budget, traversal stops and the response is
//! marked truncated; `last_considered_key` is the resumption point for
//! paging. Terminal scans are unbounded in output size and bounded in
//! memory by accumulator compaction.
//!
//! Any evaluation failure — in a transform stage or the terminal — is
//! captured as the scan's result and stops traversal; it does not surface
//! as an operation error.

use rook_store::{Key, KeyRange, Store};
use serde_json::Value;

use crate::error::{EvalError, TableError};
use crate::table::Table;
use crate::transform::{Terminal, Transform};
use crate::value::{DocRef, estimate_doc_size};

/// Default size budget for one streamed response chunk.
pub const RGET_MAX_CHUNK_SIZE: usize = 1 << 20;

/// A range scan request.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub range: KeyRange,
    /// Per-row pipeline, applied in order.
    pub transforms: Vec<Transform>,
    /// Final aggregator; None streams the rows.
    pub terminal: Option<Terminal>,
    /// Size budget for streamed responses.
    pub max_chunk_size: usize,
}

impl ScanRequest {
    pub fn new(range: KeyRange) -> Self {
        Self {
            range,
            transforms: Vec::new(),
            terminal: None,
            max_chunk_size: RGET_MAX_CHUNK_SIZE,
        }
    }
}

/// The result half of a scan response.
#[derive(Debug, Clone, PartialEq)]
pub enum RgetResult {
    /// Streamed `(key, doc)` pairs in ascending key order.
    Stream(Vec<(Key, Value)>),
    /// The finalized terminal accumulator.
    Atom(Value),
    /// An evaluation failure captured mid-scan.
    Error(EvalError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RgetResponse {
    pub result: RgetResult,
    /// Highest key the traversal considered; the paging resumption point.
    pub last_considered_key: Key,
    /// True when the stream stopped early on the size budget.
    pub truncated: bool,
}

/// Runs a range scan.
pub fn rget(
    store: &Store,
    table: &Table,
    req: &ScanRequest,
) -> Result<RgetResponse, TableError> {
    let mut last_considered_key = req.range.left.clone();
    let mut accumulator = req.terminal.as_ref().map(Terminal::accumulator);
    let mut stream: Vec<(Key, Value)> = Vec::new();
    let mut cumulative_size = 0usize;
    let mut captured: Option<EvalError> = None;
    let mut from = req.range.left.clone();

    'traversal: loop {
        // Read one leaf's worth of rows under the store lock, then process
        // them outside it.
        let (rows, next) = {
            let mut txn = store.begin();
            let Some(chunk) = txn.leaf_chunk(table.tree(), &from)? else {
                break;
            };

            let mut rows = Vec::with_capacity(chunk.entries.len());
            let mut past_right = false;
            for entry in &chunk.entries {
                if !req.range.contains(&entry.key) {
                    past_right = true;
                    break;
                }
                let doc =
                    DocRef::from_leaf(entry.value.clone())?.read_document(&mut txn)?;
                rows.push((entry.key.clone(), doc));
            }

            let next = if past_right {
                None
            } else {
                chunk.resume.filter(|resume| req.range.contains(resume))
            };
            (rows, next)
        };

        for (key, doc) in rows {
            if last_considered_key < key {
                last_considered_key = key.clone();
            }

            // Push the document through the transform chain.
            let mut data = vec![doc];
            for stage in &req.transforms {
                let mut staged = Vec::new();
                for d in &data {
                    if let Err(e) = stage.apply(d, &mut staged) {
                        captured = Some(e);
                        break 'traversal;
                    }
                }
                data = staged;
            }

            match &mut accumulator {
                None => {
                    for d in data {
                        cumulative_size += estimate_doc_size(&d);
                        stream.push((key.clone(), d));
                    }
                    if cumulative_size >= req.max_chunk_size {
                        break 'traversal;
                    }
                }
                Some(acc) => {
                    for d in &data {
                        if let Err(e) = acc.feed(d) {
                            captured = Some(e);
                            break 'traversal;
                        }
                    }
                }
            }
        }

        match next {
            Some(resume) => from = resume,
            None => break,
        }
    }

    let truncated = accumulator.is_none() && cumulative_size >= req.max_chunk_size;

    let result = match (captured, accumulator) {
        (Some(e), _) => RgetResult::Error(e),
        (None, Some(acc)) => match acc.finalize() {
            Ok(v) => RgetResult::Atom(v),
            Err(e) => RgetResult::Error(e),
        },
        (None, None) => RgetResult::Stream(stream),
    };

    Ok(RgetResponse {
        result,
        last_considered_key,
        truncated,
    })
}
