//! Error types for document-layer operations.

use rook_store::StoreError;
use rook_types::Interrupted;

/// Errors that can occur during document-layer operations.
///
/// User-domain failures (bad transform output, primary-key changes,
/// evaluation errors inside user functions) are [`EvalError`]s; the
/// replace engine and the range scan recover them locally into their
/// responses, so they only surface as `TableError::Eval` where the spec
/// of the operation says they propagate (secondary-index functions).
#[derive(thiserror::Error, Debug)]
pub enum TableError {
    /// Substrate failure (I/O, page or blob corruption).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Document-layer corruption: undecodable document bytes, malformed
    /// secondary-index definition, bad wire tag. Fatal for the operation.
    #[error("corruption detected: {0}")]
    Corruption(String),

    /// An external interruption signal fired.
    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    /// A user-domain evaluation failure that propagates to the caller.
    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// A user-domain evaluation failure: the user's transform, predicate, or
/// indexing function rejected or mangled a document.
///
/// These never indicate storage damage and never leave the tree in a
/// partial state.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{msg}")]
pub struct EvalError {
    msg: String,
}

impl EvalError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }

    pub fn msg(&self) -> &str {
        &self.msg
    }
}
