//! Aggregation framework: factories that create per-bucket accumulators,
//! combine independently computed partials (associatively and commutatively),
//! and finalize intermediate values; plus pure post-aggregators evaluated in
//! dependency order after finalization.
//!
//! Aggregator kinds are a closed tagged variant — a new kind adds an enum
//! arm, not a reflective registry entry.

use crate::error::{Error, Result};
use crate::segment::Cursor;
use crate::types::{MetricValue, NumericKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Immutable descriptor of one aggregation: output name, input column, and
/// accumulation kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AggregatorFactory {
    /// Row count.
    Count { name: String },
    /// Sum of a metric coerced to long.
    LongSum { name: String, field: String },
    /// Sum of a metric coerced to double.
    DoubleSum { name: String, field: String },
}

impl AggregatorFactory {
    pub fn count(name: &str) -> AggregatorFactory {
        AggregatorFactory::Count {
            name: name.to_string(),
        }
    }

    pub fn long_sum(name: &str, field: &str) -> AggregatorFactory {
        AggregatorFactory::LongSum {
            name: name.to_string(),
            field: field.to_string(),
        }
    }

    pub fn double_sum(name: &str, field: &str) -> AggregatorFactory {
        AggregatorFactory::DoubleSum {
            name: name.to_string(),
            field: field.to_string(),
        }
    }

    /// Output name the accumulated value is attached under.
    pub fn name(&self) -> &str {
        match self {
            AggregatorFactory::Count { name }
            | AggregatorFactory::LongSum { name, .. }
            | AggregatorFactory::DoubleSum { name, .. } => name,
        }
    }

    /// Numeric kind this aggregator reads its input column as.
    pub fn input_kind(&self) -> NumericKind {
        match self {
            AggregatorFactory::Count { .. } | AggregatorFactory::LongSum { .. } => {
                NumericKind::Long
            }
            AggregatorFactory::DoubleSum { .. } => NumericKind::Double,
        }
    }

    /// Fold identity: the accumulated value over zero rows.
    pub fn identity(&self) -> MetricValue {
        match self {
            AggregatorFactory::Count { .. } | AggregatorFactory::LongSum { .. } => {
                MetricValue::Long(0)
            }
            AggregatorFactory::DoubleSum { .. } => MetricValue::Double(0.0),
        }
    }

    /// Fresh accumulator for one cursor bucket.
    pub fn create(&self) -> Aggregator {
        match self {
            AggregatorFactory::Count { .. } => Aggregator::Count { count: 0 },
            AggregatorFactory::LongSum { field, .. } => Aggregator::LongSum {
                field: field.clone(),
                sum: 0,
            },
            AggregatorFactory::DoubleSum { field, .. } => Aggregator::DoubleSum {
                field: field.clone(),
                sum: 0.0,
            },
        }
    }

    /// Combines two independently accumulated values. For any split of a row
    /// multiset into two parts, `combine(fold(a), fold(b)) == fold(a ∪ b)`;
    /// the operation is associative and commutative, which is what makes
    /// per-segment and per-bucket parallel execution reconcilable.
    pub fn combine(&self, a: MetricValue, b: MetricValue) -> MetricValue {
        match self {
            AggregatorFactory::Count { .. } | AggregatorFactory::LongSum { .. } => {
                MetricValue::Long(a.as_long() + b.as_long())
            }
            AggregatorFactory::DoubleSum { .. } => {
                MetricValue::Double(a.as_double() + b.as_double())
            }
        }
    }

    /// Converts an accumulated value into its externally visible form. For
    /// these arithmetic aggregators the intermediate already is the final
    /// form; kinds whose intermediate differs (sketches) override this, which
    /// is why finalize must run only after all combining is done.
    pub fn finalize(&self, value: MetricValue) -> MetricValue {
        value
    }
}

/// Mutable accumulator bound to one cursor's position stream. The caller
/// advances the cursor between `aggregate` calls; `get` may be called at any
/// time and reflects all rows folded so far.
#[derive(Debug)]
pub enum Aggregator {
    Count { count: i64 },
    LongSum { field: String, sum: i64 },
    DoubleSum { field: String, sum: f64 },
}

impl Aggregator {
    /// Folds the cursor's current row into the accumulated state.
    pub fn aggregate(&mut self, cursor: &dyn Cursor) {
        match self {
            Aggregator::Count { count } => *count += 1,
            Aggregator::LongSum { field, sum } => *sum += cursor.metric_long(field),
            Aggregator::DoubleSum { field, sum } => *sum += cursor.metric_double(field),
        }
    }

    pub fn get(&self) -> MetricValue {
        match self {
            Aggregator::Count { count } => MetricValue::Long(*count),
            Aggregator::LongSum { sum, .. } => MetricValue::Long(*sum),
            Aggregator::DoubleSum { sum, .. } => MetricValue::Double(*sum),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Pure derived computation over finalized aggregator values (and earlier
/// post-aggregator values), evaluated only after finalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PostAggregator {
    /// Reads a named finalized value.
    FieldAccess { name: String, field: String },
    Constant { name: String, value: f64 },
    /// Arithmetic combination of inline operand post-aggregators, folded left
    /// to right. Division by zero yields 0.0.
    Arithmetic {
        name: String,
        op: ArithmeticOp,
        operands: Vec<PostAggregator>,
    },
}

impl PostAggregator {
    pub fn field_access(name: &str, field: &str) -> PostAggregator {
        PostAggregator::FieldAccess {
            name: name.to_string(),
            field: field.to_string(),
        }
    }

    pub fn constant(name: &str, value: f64) -> PostAggregator {
        PostAggregator::Constant {
            name: name.to_string(),
            value,
        }
    }

    pub fn arithmetic(name: &str, op: ArithmeticOp, operands: Vec<PostAggregator>) -> PostAggregator {
        PostAggregator::Arithmetic {
            name: name.to_string(),
            op,
            operands,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            PostAggregator::FieldAccess { name, .. }
            | PostAggregator::Constant { name, .. }
            | PostAggregator::Arithmetic { name, .. } => name,
        }
    }

    /// Evaluates against a mapping of finalized values. Fields were resolved
    /// at planning time, so a miss here is a framework bug.
    pub fn compute(&self, values: &BTreeMap<String, f64>) -> f64 {
        match self {
            PostAggregator::FieldAccess { field, .. } => *values
                .get(field)
                .expect("post-aggregator field resolved at planning time"),
            PostAggregator::Constant { value, .. } => *value,
            PostAggregator::Arithmetic { op, operands, .. } => {
                let mut iter = operands.iter().map(|o| o.compute(values));
                let first = match iter.next() {
                    Some(v) => v,
                    None => return 0.0,
                };
                iter.fold(first, |acc, v| match op {
                    ArithmeticOp::Add => acc + v,
                    ArithmeticOp::Sub => acc - v,
                    ArithmeticOp::Mul => acc * v,
                    ArithmeticOp::Div => {
                        if v == 0.0 {
                            0.0
                        } else {
                            acc / v
                        }
                    }
                })
            }
        }
    }

    /// Names of every field this post-aggregator reads, transitively through
    /// inline operands.
    fn collect_references(&self, out: &mut BTreeSet<String>) {
        match self {
            PostAggregator::FieldAccess { field, .. } => {
                out.insert(field.clone());
            }
            PostAggregator::Constant { .. } => {}
            PostAggregator::Arithmetic { operands, .. } => {
                for operand in operands {
                    operand.collect_references(out);
                }
            }
        }
    }

    pub fn references(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_references(&mut out);
        out
    }
}

/// Computes an evaluation order for `post_aggregators` in which every
/// referenced post-aggregator value is available before it is read, tolerating
/// forward references.
///
/// Run before execution: a dependency cycle is
/// [`Error::CyclicPostAggregator`]; a reference to a name that is neither an
/// aggregator output nor a post-aggregator is [`Error::UnknownField`].
pub fn plan_post_aggregators<'a>(
    aggregators: &[AggregatorFactory],
    post_aggregators: &'a [PostAggregator],
) -> Result<Vec<&'a PostAggregator>> {
    let aggregator_names: BTreeSet<&str> = aggregators.iter().map(|a| a.name()).collect();
    let post_index: BTreeMap<&str, usize> = post_aggregators
        .iter()
        .enumerate()
        .map(|(i, p)| (p.name(), i))
        .collect();

    // Edges dependency -> dependent, over post-aggregator indices only;
    // aggregator references are always satisfied.
    let mut pending: Vec<BTreeSet<usize>> = Vec::with_capacity(post_aggregators.len());
    for post in post_aggregators {
        let mut deps = BTreeSet::new();
        for field in post.references() {
            if let Some(&dep) = post_index.get(field.as_str()) {
                deps.insert(dep);
            } else if !aggregator_names.contains(field.as_str()) {
                return Err(Error::UnknownField {
                    post_aggregator: post.name().to_string(),
                    field,
                });
            }
        }
        pending.push(deps);
    }

    // Kahn's algorithm, preferring declaration order among ready nodes.
    let mut order = Vec::with_capacity(post_aggregators.len());
    let mut emitted = vec![false; post_aggregators.len()];
    while order.len() < post_aggregators.len() {
        let ready = (0..post_aggregators.len())
            .find(|&i| !emitted[i] && pending[i].iter().all(|&d| emitted[d]));
        match ready {
            Some(i) => {
                emitted[i] = true;
                order.push(&post_aggregators[i]);
            }
            None => {
                let stuck = (0..post_aggregators.len()).find(|&i| !emitted[i]).unwrap();
                return Err(Error::CyclicPostAggregator {
                    name: post_aggregators[stuck].name().to_string(),
                });
            }
        }
    }
    Ok(order)
}
