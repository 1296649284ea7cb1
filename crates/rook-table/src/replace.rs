//! The replace engine: the unified mutation behind insert, update,
//! replace, and delete-by-function.
//!
//! A transform `f: Document|null -> Document|null` is applied to the
//! current row (JSON null when absent) and the result is committed
//! according to the decision table:
//!
//! | started empty | ended empty | pk        | action      | counter   |
//! |---------------|-------------|-----------|-------------|-----------|
//! | yes           | yes         | —         | no-op       | skipped   |
//! | yes           | no          | —         | install new | inserted  |
//! | no            | yes         | —         | remove      | deleted   |
//! | no            | no          | same, ==  | no-op       | unchanged |
//! | no            | no          | same, !=  | install new | replaced  |
//! | no            | no          | changed   | error       | errors    |
//!
//! Evaluation failures — from `f` itself, from a non-object result, from
//! a missing or changed primary key — are recovered locally: the tree is
//! untouched and the response carries `errors = 1` with `first_error`.
//! Exactly one counter is incremented per invocation.

use rook_store::{Key, Store, Txn};
use rook_types::WriteStamp;
use serde_json::{Map, Value};

use crate::error::{EvalError, TableError};
use crate::point::{kv_delete, kv_set};
use crate::report::ModReport;
use crate::table::Table;
use crate::transform::{cmp_values, type_name};
use crate::value::DocRef;

// ============================================================================
// Response
// ============================================================================

/// Outcome counters for one replace invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaceResponse {
    pub skipped: u64,
    pub inserted: u64,
    pub deleted: u64,
    pub replaced: u64,
    pub unchanged: u64,
    pub errors: u64,
    pub first_error: Option<String>,
}

impl ReplaceResponse {
    fn tally(outcome: Outcome) -> Self {
        let mut resp = Self::default();
        match outcome {
            Outcome::Skipped => resp.skipped = 1,
            Outcome::Inserted => resp.inserted = 1,
            Outcome::Deleted => resp.deleted = 1,
            Outcome::Unchanged => resp.unchanged = 1,
            Outcome::Replaced => resp.replaced = 1,
        }
        resp
    }

    fn error(err: &EvalError) -> Self {
        Self {
            errors: 1,
            first_error: Some(err.msg().to_string()),
            ..Self::default()
        }
    }

    /// Renders the response as a JSON object carrying exactly one counter
    /// (plus `first_error` alongside `errors`).
    pub fn as_datum(&self) -> Value {
        let total = self.skipped
            + self.inserted
            + self.deleted
            + self.replaced
            + self.unchanged
            + self.errors;
        debug_assert_eq!(total, 1, "exactly one counter must be incremented");

        let mut obj = Map::new();
        for (name, count) in [
            ("skipped", self.skipped),
            ("inserted", self.inserted),
            ("deleted", self.deleted),
            ("replaced", self.replaced),
            ("unchanged", self.unchanged),
            ("errors", self.errors),
        ] {
            if count > 0 {
                obj.insert(name.to_string(), Value::from(count));
            }
        }
        if let Some(msg) = &self.first_error {
            obj.insert("first_error".to_string(), Value::from(msg.clone()));
        }
        Value::Object(obj)
    }
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Skipped,
    Inserted,
    Deleted,
    Unchanged,
    Replaced,
}

/// Failure channel of the engine's inner step: user-domain failures fold
/// into the response, everything else propagates.
enum Failure {
    Eval(EvalError),
    Fatal(TableError),
}

impl From<EvalError> for Failure {
    fn from(e: EvalError) -> Self {
        Failure::Eval(e)
    }
}

impl From<TableError> for Failure {
    fn from(e: TableError) -> Self {
        Failure::Fatal(e)
    }
}

// ============================================================================
// The Engine
// ============================================================================

/// Applies `f` to the row at `key` and commits the outcome.
pub fn replace<F>(
    store: &Store,
    table: &Table,
    key: &Key,
    f: F,
    stamp: WriteStamp,
    report: &mut ModReport,
) -> Result<ReplaceResponse, TableError>
where
    F: Fn(&Value) -> Result<Value, EvalError>,
{
    let mut txn = store.begin();
    match apply(&mut txn, table, key, &f, stamp, report) {
        Ok(outcome) => Ok(ReplaceResponse::tally(outcome)),
        Err(Failure::Eval(e)) => Ok(ReplaceResponse::error(&e)),
        Err(Failure::Fatal(e)) => Err(e),
    }
}

fn apply<F>(
    txn: &mut Txn<'_>,
    table: &Table,
    key: &Key,
    f: &F,
    stamp: WriteStamp,
    report: &mut ModReport,
) -> Result<Outcome, Failure>
where
    F: Fn(&Value) -> Result<Value, EvalError>,
{
    let pk_attr = table.pk_attr();

    // Locate and read the existing row, if any.
    let mut old_ref = None;
    let old_val = match txn.lookup(table.tree(), key).map_err(TableError::from)? {
        None => Value::Null,
        Some(entry) => {
            let doc_ref = DocRef::from_leaf(entry.value)?;
            let doc = doc_ref.read_document(txn)?;
            // A stored row without its primary-key attribute is not a user
            // mistake; the tree is damaged.
            if doc.get(pk_attr).is_none() {
                return Err(Failure::Fatal(TableError::Corruption(format!(
                    "stored row at {key} is missing primary key `{pk_attr}`"
                ))));
            }
            old_ref = Some(doc_ref);
            doc
        }
    };
    let started_empty = old_ref.is_none();

    let new_val = f(&old_val)?;

    let ended_empty = match &new_val {
        Value::Null => true,
        Value::Object(obj) => {
            if !obj.contains_key(pk_attr) {
                return Err(EvalError::new(format!(
                    "Inserted object must have primary key `{pk_attr}`:\n{new_val}"
                ))
                .into());
            }
            false
        }
        other => {
            return Err(EvalError::new(format!(
                "Inserted value must be an OBJECT (got {}):\n{other}",
                type_name(other)
            ))
            .into());
        }
    };

    match (old_ref, ended_empty) {
        (None, true) => Ok(Outcome::Skipped),
        (None, false) => {
            kv_set(txn, table, key, None, &new_val, stamp)?;
            report.added = Some(new_val);
            Ok(Outcome::Inserted)
        }
        (Some(old_ref), true) => {
            kv_delete(txn, table, key, old_ref, stamp)?;
            report.deleted = Some(old_val);
            Ok(Outcome::Deleted)
        }
        (Some(old_ref), false) => {
            debug_assert!(!started_empty);
            let old_pk = &old_val[pk_attr];
            let new_pk = &new_val[pk_attr];
            if cmp_values(old_pk, new_pk) != std::cmp::Ordering::Equal {
                return Err(EvalError::new(format!(
                    "Primary key `{pk_attr}` cannot be changed ({old_pk} -> {new_pk})"
                ))
                .into());
            }
            if old_val == new_val {
                Ok(Outcome::Unchanged)
            } else {
                kv_set(txn, table, key, Some(old_ref), &new_val, stamp)?;
                report.deleted = Some(old_val);
                report.added = Some(new_val);
                Ok(Outcome::Replaced)
            }
        }
    }
}

// ============================================================================
// Standard Transforms
// ============================================================================

/// The insert operation as a replace transform: errors on conflict unless
/// upserting.
pub fn insert_transform(
    doc: Value,
    upsert: bool,
) -> impl Fn(&Value) -> Result<Value, EvalError> {
    move |old| {
        if old.is_null() || upsert {
            Ok(doc.clone())
        } else {
            Err(EvalError::new("Duplicate primary key."))
        }
    }
}

/// The delete operation as a replace transform.
pub fn delete_transform() -> impl Fn(&Value) -> Result<Value, EvalError> {
    |_| Ok(Value::Null)
}
