//! The scan pipeline: per-row transforms and terminal aggregators.
//!
//! Transforms and terminals are tagged sums with one evaluator per
//! variant, driven by a small serializable expression language. The same
//! expressions double as secondary-index functions, which is why
//! [`MapExpr`] is serde-serializable: a sindex definition stores one in
//! serialized form.
//!
//! Terminal accumulators follow a builder pattern: rows land in a cheap
//! pending buffer and are folded into the result when a size watermark is
//! exceeded (plain reductions) or once per [`COMPACT_EVERY`] rows (grouped
//! reductions, where materializing the map is expensive). `finalize`
//! folds whatever is still pending.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::EvalError;
use crate::value::estimate_doc_size;

/// Grouped accumulators attempt compaction once per this many rows.
pub const COMPACT_EVERY: usize = 10_000;

/// Plain reductions fold their pending buffer once it grows past this
/// many estimated bytes.
const REDUCE_COMPACT_BYTES: usize = 64 * 1024;

// ============================================================================
// Expressions
// ============================================================================

/// A document-to-value mapping. Also the secondary-index function shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MapExpr {
    /// The document itself.
    Identity,
    /// One top-level attribute; missing attribute is an error.
    Field(String),
    /// A chain of attribute lookups; any missing step is an error.
    Path(Vec<String>),
    /// An object holding just the named attributes (missing ones skipped).
    Pluck(Vec<String>),
    /// A constant, ignoring the document.
    Const(Value),
}

impl MapExpr {
    pub fn eval(&self, doc: &Value) -> Result<Value, EvalError> {
        match self {
            MapExpr::Identity => Ok(doc.clone()),
            MapExpr::Field(name) => get_field(doc, name),
            MapExpr::Path(names) => {
                let mut current = doc.clone();
                for name in names {
                    current = get_field(&current, name)?;
                }
                Ok(current)
            }
            MapExpr::Pluck(names) => {
                let obj = as_object(doc)?;
                let mut out = Map::new();
                for name in names {
                    if let Some(v) = obj.get(name) {
                        out.insert(name.clone(), v.clone());
                    }
                }
                Ok(Value::Object(out))
            }
            MapExpr::Const(v) => Ok(v.clone()),
        }
    }
}

/// A row predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterExpr {
    /// The attribute exists.
    HasField(String),
    /// The attribute exists and equals the value.
    FieldEq(String, Value),
    /// The attribute exists and orders below the value.
    FieldLt(String, Value),
    /// The attribute exists and orders above the value.
    FieldGt(String, Value),
}

impl FilterExpr {
    pub fn eval(&self, doc: &Value) -> Result<bool, EvalError> {
        let lookup = |name: &str| as_object(doc).map(|obj| obj.get(name).cloned());
        match self {
            FilterExpr::HasField(name) => Ok(lookup(name)?.is_some()),
            FilterExpr::FieldEq(name, rhs) => Ok(lookup(name)?
                .is_some_and(|v| cmp_values(&v, rhs) == Ordering::Equal)),
            FilterExpr::FieldLt(name, rhs) => Ok(lookup(name)?
                .is_some_and(|v| cmp_values(&v, rhs) == Ordering::Less)),
            FilterExpr::FieldGt(name, rhs) => Ok(lookup(name)?
                .is_some_and(|v| cmp_values(&v, rhs) == Ordering::Greater)),
        }
    }
}

/// A pairwise reduction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReduceExpr {
    /// Numeric sum of the values (or of one attribute of each value).
    Sum(Option<String>),
    /// Smallest value in document order.
    Min,
    /// Largest value in document order.
    Max,
}

impl ReduceExpr {
    /// Projects the piece of `v` this reduction consumes.
    fn extract(&self, v: &Value) -> Result<Value, EvalError> {
        match self {
            ReduceExpr::Sum(Some(field)) => get_field(v, field),
            _ => Ok(v.clone()),
        }
    }

    /// Folds one more value into the accumulator.
    fn merge(&self, acc: Value, v: &Value) -> Result<Value, EvalError> {
        let x = self.extract(v)?;
        match self {
            ReduceExpr::Sum(_) => add_numbers(&acc, &x),
            ReduceExpr::Min => Ok(if cmp_values(&x, &acc) == Ordering::Less {
                x
            } else {
                acc
            }),
            ReduceExpr::Max => Ok(if cmp_values(&x, &acc) == Ordering::Greater {
                x
            } else {
                acc
            }),
        }
    }
}

// ============================================================================
// Transforms
// ============================================================================

/// One stage of a scan's per-row pipeline. Each input document becomes
/// zero or more output documents; stages compose by flat-mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Transform {
    Map(MapExpr),
    Filter(FilterExpr),
    ConcatMap(MapExpr),
}

impl Transform {
    /// Applies the stage to one document, appending outputs to `out`.
    pub fn apply(&self, doc: &Value, out: &mut Vec<Value>) -> Result<(), EvalError> {
        match self {
            Transform::Map(expr) => {
                out.push(expr.eval(doc)?);
                Ok(())
            }
            Transform::Filter(pred) => {
                if pred.eval(doc)? {
                    out.push(doc.clone());
                }
                Ok(())
            }
            Transform::ConcatMap(expr) => match expr.eval(doc)? {
                Value::Array(items) => {
                    out.extend(items);
                    Ok(())
                }
                other => Err(EvalError::new(format!(
                    "Cannot concat-map a value of type {} (expected ARRAY)",
                    type_name(&other)
                ))),
            },
        }
    }
}

// ============================================================================
// Terminals
// ============================================================================

/// The final reducer of a range scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Terminal {
    /// Number of rows reaching the terminal.
    Count,
    /// A single pairwise reduction over all rows.
    Reduce(ReduceExpr),
    /// Rows bucketed by a grouping expression, reduced per bucket.
    GroupedReduce { group: MapExpr, reduce: ReduceExpr },
}

impl Terminal {
    /// Creates the accumulator this terminal folds rows into.
    pub fn accumulator(&self) -> Accumulator {
        match self {
            Terminal::Count => Accumulator::Count(0),
            Terminal::Reduce(expr) => Accumulator::Reduce {
                expr: expr.clone(),
                folded: None,
                pending: Vec::new(),
                pending_bytes: 0,
            },
            Terminal::GroupedReduce { group, reduce } => Accumulator::Grouped {
                group: group.clone(),
                reduce: reduce.clone(),
                merged: BTreeMap::new(),
                pending: Vec::new(),
                rows_seen: 0,
            },
        }
    }
}

/// Intermediate reduction state.
///
/// Kept deliberately separate from the terminal description so that
/// compaction policy lives with the state it manages.
#[derive(Debug)]
pub enum Accumulator {
    Count(u64),
    Reduce {
        expr: ReduceExpr,
        folded: Option<Value>,
        pending: Vec<Value>,
        pending_bytes: usize,
    },
    Grouped {
        group: MapExpr,
        reduce: ReduceExpr,
        merged: BTreeMap<String, Value>,
        pending: Vec<(String, Value)>,
        rows_seen: usize,
    },
}

impl Accumulator {
    /// Folds one row in, compacting intermediate state when warranted.
    pub fn feed(&mut self, doc: &Value) -> Result<(), EvalError> {
        let compact_now = match self {
            Accumulator::Count(n) => {
                *n += 1;
                false
            }
            Accumulator::Reduce {
                pending,
                pending_bytes,
                ..
            } => {
                *pending_bytes += estimate_doc_size(doc);
                pending.push(doc.clone());
                *pending_bytes > REDUCE_COMPACT_BYTES
            }
            Accumulator::Grouped {
                group,
                pending,
                rows_seen,
                ..
            } => {
                let key = canonical_key(&group.eval(doc)?);
                pending.push((key, doc.clone()));
                *rows_seen += 1;
                // Materializing the grouped map is expensive, so only try
                // periodically rather than on a byte watermark.
                *rows_seen % COMPACT_EVERY == 0
            }
        };

        if compact_now {
            self.compact()?;
        }
        Ok(())
    }

    /// Folds pending rows into the materialized result.
    fn compact(&mut self) -> Result<(), EvalError> {
        match self {
            Accumulator::Count(_) => Ok(()),
            Accumulator::Reduce {
                expr,
                folded,
                pending,
                pending_bytes,
            } => {
                for v in pending.drain(..) {
                    *folded = Some(match folded.take() {
                        None => expr.extract(&v)?,
                        Some(acc) => expr.merge(acc, &v)?,
                    });
                }
                *pending_bytes = 0;
                Ok(())
            }
            Accumulator::Grouped {
                reduce,
                merged,
                pending,
                ..
            } => {
                for (key, v) in pending.drain(..) {
                    match merged.remove(&key) {
                        None => {
                            merged.insert(key, reduce.extract(&v)?);
                        }
                        Some(acc) => {
                            merged.insert(key, reduce.merge(acc, &v)?);
                        }
                    }
                }
                Ok(())
            }
        }
    }

    /// Converts any remaining builder state into the immutable result.
    pub fn finalize(mut self) -> Result<Value, EvalError> {
        self.compact()?;
        match self {
            Accumulator::Count(n) => Ok(Value::from(n)),
            Accumulator::Reduce { folded, .. } => Ok(folded.unwrap_or(Value::Null)),
            Accumulator::Grouped { merged, .. } => {
                Ok(Value::Object(merged.into_iter().collect()))
            }
        }
    }
}

// ============================================================================
// Value Ordering & Arithmetic
// ============================================================================

/// Total order over documents: null < booleans < numbers < strings <
/// arrays < objects, recursing into composites.
pub fn cmp_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (xi, yi) in x.iter().zip(y.iter()) {
                let ord = cmp_values(xi, yi);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            for ((xk, xv), (yk, yv)) in x.iter().zip(y.iter()) {
                let ord = xk.cmp(yk).then_with(|| cmp_values(xv, yv));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Canonical string form of a value, used as a grouping key.
pub fn canonical_key(v: &Value) -> String {
    v.to_string()
}

/// Human-readable type name for error messages.
pub fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "NULL",
        Value::Bool(_) => "BOOL",
        Value::Number(_) => "NUMBER",
        Value::String(_) => "STRING",
        Value::Array(_) => "ARRAY",
        Value::Object(_) => "OBJECT",
    }
}

fn get_field(doc: &Value, name: &str) -> Result<Value, EvalError> {
    as_object(doc)?
        .get(name)
        .cloned()
        .ok_or_else(|| EvalError::new(format!("No attribute `{name}` in object")))
}

fn as_object(doc: &Value) -> Result<&Map<String, Value>, EvalError> {
    doc.as_object().ok_or_else(|| {
        EvalError::new(format!(
            "Cannot access attributes of a value of type {}",
            type_name(doc)
        ))
    })
}

fn add_numbers(a: &Value, b: &Value) -> Result<Value, EvalError> {
    let (Value::Number(x), Value::Number(y)) = (a, b) else {
        let bad = if a.is_number() { b } else { a };
        return Err(EvalError::new(format!(
            "Cannot sum a value of type {}",
            type_name(bad)
        )));
    };

    if let (Some(xi), Some(yi)) = (x.as_i64(), y.as_i64()) {
        if let Some(sum) = xi.checked_add(yi) {
            return Ok(Value::from(sum));
        }
    }
    let sum = x.as_f64().unwrap_or(f64::NAN) + y.as_f64().unwrap_or(f64::NAN);
    Number::from_f64(sum)
        .map(Value::Number)
        .ok_or_else(|| EvalError::new("Sum is not a finite number"))
}

#[cfg(test)]
mod transform_tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn map_field_and_missing_attribute() {
        let doc = json!({"id": 1, "a": 10});
        assert_eq!(MapExpr::Field("a".into()).eval(&doc).unwrap(), json!(10));

        let err = MapExpr::Field("nope".into()).eval(&doc).unwrap_err();
        assert!(err.msg().contains("No attribute `nope`"));
    }

    #[test]
    fn path_and_pluck() {
        let doc = json!({"id": 1, "addr": {"city": "berlin", "zip": "10117"}});
        assert_eq!(
            MapExpr::Path(vec!["addr".into(), "city".into()])
                .eval(&doc)
                .unwrap(),
            json!("berlin")
        );
        assert_eq!(
            MapExpr::Pluck(vec!["id".into(), "missing".into()])
                .eval(&doc)
                .unwrap(),
            json!({"id": 1})
        );
    }

    #[test]
    fn filter_missing_attribute_is_false() {
        let doc = json!({"id": 1});
        assert!(!FilterExpr::FieldEq("a".into(), json!(1)).eval(&doc).unwrap());
        assert!(FilterExpr::FieldEq("id".into(), json!(1)).eval(&doc).unwrap());
        assert!(FilterExpr::FieldLt("id".into(), json!(5)).eval(&doc).unwrap());
        assert!(!FilterExpr::HasField("a".into()).eval(&doc).unwrap());
    }

    #[test]
    fn concat_map_flattens_and_rejects_non_arrays() {
        let doc = json!({"id": 1, "tags": ["x", "y"]});
        let mut out = Vec::new();
        Transform::ConcatMap(MapExpr::Field("tags".into()))
            .apply(&doc, &mut out)
            .unwrap();
        assert_eq!(out, vec![json!("x"), json!("y")]);

        let err = Transform::ConcatMap(MapExpr::Field("id".into()))
            .apply(&doc, &mut Vec::new())
            .unwrap_err();
        assert!(err.msg().contains("NUMBER"));
    }

    #[test]
    fn count_and_sum_terminals() {
        let rows = [
            json!({"id": 1, "v": 10}),
            json!({"id": 2, "v": 20}),
            json!({"id": 3, "v": 5}),
        ];

        let mut count = Terminal::Count.accumulator();
        let mut sum = Terminal::Reduce(ReduceExpr::Sum(Some("v".into()))).accumulator();
        for row in &rows {
            count.feed(row).unwrap();
            sum.feed(row).unwrap();
        }
        assert_eq!(count.finalize().unwrap(), json!(3));
        assert_eq!(sum.finalize().unwrap(), json!(35));
    }

    #[test]
    fn reduce_over_empty_stream_is_null() {
        let acc = Terminal::Reduce(ReduceExpr::Min).accumulator();
        assert_eq!(acc.finalize().unwrap(), Value::Null);
    }

    #[test]
    fn grouped_reduce_buckets_rows() {
        let terminal = Terminal::GroupedReduce {
            group: MapExpr::Field("color".into()),
            reduce: ReduceExpr::Sum(Some("n".into())),
        };
        let mut acc = terminal.accumulator();
        for row in [
            json!({"color": "red", "n": 1}),
            json!({"color": "blue", "n": 10}),
            json!({"color": "red", "n": 2}),
        ] {
            acc.feed(&row).unwrap();
        }

        assert_eq!(
            acc.finalize().unwrap(),
            json!({"\"blue\"": 10, "\"red\"": 3})
        );
    }

    #[test]
    fn reduce_compacts_at_watermark() {
        let mut acc = Terminal::Reduce(ReduceExpr::Max).accumulator();
        // Rows big enough that the pending buffer must fold along the way.
        for i in 0..2000i64 {
            let row = json!({"pad": "x".repeat(100), "i": i});
            acc.feed(&row).unwrap();
        }
        if let Accumulator::Reduce { pending, folded, .. } = &acc {
            assert!(folded.is_some(), "watermark compaction never ran");
            assert!(pending.len() < 2000);
        } else {
            unreachable!();
        }
        // Max of whole documents: the one with the largest `i` (objects
        // compare by sorted fields; `i` sorts before `pad`).
        let result = acc.finalize().unwrap();
        assert_eq!(result["i"], json!(1999));
    }

    #[test]
    fn cross_type_ordering_is_stable() {
        let ordered = [
            Value::Null,
            json!(false),
            json!(true),
            json!(-3),
            json!(2.5),
            json!("a"),
            json!("b"),
            json!(["a"]),
            json!(["a", "b"]),
            json!({"k": 1}),
        ];
        for pair in ordered.windows(2) {
            assert_eq!(cmp_values(&pair[0], &pair[1]), Ordering::Less);
        }
        assert_eq!(cmp_values(&json!(1), &json!(1.0)), Ordering::Equal);
    }
}
