//! Table handles.

use rook_store::TreeId;

use crate::sindex::SINDEX_CATALOG_TREE;

/// A handle naming one table: its primary B-tree and the document
/// attribute that serves as the primary key.
///
/// The handle is plain data; all state lives in the [`Store`] it is used
/// against.
///
/// [`Store`]: rook_store::Store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    tree: TreeId,
    pk_attr: String,
}

impl Table {
    /// Creates a handle for the table stored in `tree`, keyed by the
    /// `pk_attr` attribute of each document.
    pub fn new(tree: TreeId, pk_attr: impl Into<String>) -> Self {
        debug_assert_ne!(
            tree, SINDEX_CATALOG_TREE,
            "tree id {tree:?} is reserved for the sindex catalogue"
        );
        Self {
            tree,
            pk_attr: pk_attr.into(),
        }
    }

    /// The primary B-tree backing this table.
    pub fn tree(&self) -> TreeId {
        self.tree
    }

    /// The name of the primary-key attribute.
    pub fn pk_attr(&self) -> &str {
        &self.pk_attr
    }
}
