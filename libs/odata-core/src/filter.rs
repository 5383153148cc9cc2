//! Filter model shared by every storage backend.
//!
//! A [`Predicate`] maps field names to operator clauses (implicit AND within a
//! field and across fields) and carries optional logical composition
//! (`$and`, `$or`, `$not`, `$nor`). The empty predicate matches everything.

use std::cmp::Ordering;
use std::fmt;

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::Record;
use crate::wire::WireType;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Regex,
}

impl Operator {
    pub const ALL: [Operator; 9] = [
        Operator::Eq,
        Operator::Ne,
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
        Operator::In,
        Operator::Nin,
        Operator::Regex,
    ];

    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Operator::Eq => "$eq",
            Operator::Ne => "$ne",
            Operator::Gt => "$gt",
            Operator::Gte => "$gte",
            Operator::Lt => "$lt",
            Operator::Lte => "$lte",
            Operator::In => "$in",
            Operator::Nin => "$nin",
            Operator::Regex => "$regex",
        }
    }

    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.key() == key)
    }

    /// Ordering comparisons (`$gt`, `$gte`, `$lt`, `$lte`).
    #[must_use]
    pub fn is_range(self) -> bool {
        matches!(
            self,
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("unsupported filter operator '{key}'")]
    MalformedFilter { key: String },

    #[error("invalid operand for {op}: {reason}")]
    InvalidOperand { op: Operator, reason: String },

    #[error("invalid $regex pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("invalid filter expression: {0}")]
    InvalidExpression(String),

    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("type mismatch for field {field}: expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: WireType,
        got: String,
    },
}

#[derive(Clone, Debug)]
pub enum Operand {
    Value(Value),
    List(Vec<Value>),
    Pattern(Regex),
}

impl Operand {
    fn to_json(&self) -> Value {
        match self {
            Operand::Value(v) => v.clone(),
            Operand::List(items) => Value::Array(items.clone()),
            Operand::Pattern(re) => Value::String(re.as_str().to_owned()),
        }
    }
}

/// One operator applied to one field.
#[derive(Clone, Debug)]
pub struct Clause {
    op: Operator,
    operand: Operand,
}

impl Clause {
    /// Build a clause, checking the operand shape the operator needs.
    ///
    /// # Errors
    /// `$in`/`$nin` need an array; `$regex` needs a string that compiles.
    pub fn new(op: Operator, value: Value) -> Result<Self, FilterError> {
        let operand = match op {
            Operator::In | Operator::Nin => match value {
                Value::Array(items) => Operand::List(items),
                other => {
                    return Err(FilterError::InvalidOperand {
                        op,
                        reason: format!("expected an array, got {}", json_kind(&other)),
                    });
                }
            },
            Operator::Regex => match value {
                Value::String(pattern) => Operand::Pattern(compile(&pattern)?),
                other => {
                    return Err(FilterError::InvalidOperand {
                        op,
                        reason: format!("expected a string pattern, got {}", json_kind(&other)),
                    });
                }
            },
            _ => Operand::Value(value),
        };
        Ok(Self { op, operand })
    }

    #[must_use]
    pub fn eq(value: impl Into<Value>) -> Self {
        Self {
            op: Operator::Eq,
            operand: Operand::Value(value.into()),
        }
    }

    #[must_use]
    pub fn one_of(values: Vec<Value>) -> Self {
        Self {
            op: Operator::In,
            operand: Operand::List(values),
        }
    }

    /// # Errors
    /// Returns `FilterError::InvalidPattern` if the pattern does not compile.
    pub fn regex(pattern: &str) -> Result<Self, FilterError> {
        Ok(Self {
            op: Operator::Regex,
            operand: Operand::Pattern(compile(pattern)?),
        })
    }

    #[must_use]
    pub fn op(&self) -> Operator {
        self.op
    }

    #[must_use]
    pub fn operand(&self) -> &Operand {
        &self.operand
    }

    /// Test a field value (`Null` when the record lacks the field).
    #[must_use]
    pub fn matches(&self, actual: &Value) -> bool {
        match (&self.operand, self.op) {
            (Operand::Value(expected), Operator::Eq) => values_equal(actual, expected),
            (Operand::Value(expected), Operator::Ne) => !values_equal(actual, expected),
            (Operand::Value(expected), op) if op.is_range() => {
                match compare_values(actual, expected) {
                    Some(ord) => match op {
                        Operator::Gt => ord == Ordering::Greater,
                        Operator::Gte => ord != Ordering::Less,
                        Operator::Lt => ord == Ordering::Less,
                        _ => ord != Ordering::Greater,
                    },
                    None => false,
                }
            }
            (Operand::List(items), Operator::In) => items.iter().any(|v| values_equal(actual, v)),
            (Operand::List(items), Operator::Nin) => !items.iter().any(|v| values_equal(actual, v)),
            (Operand::Pattern(re), _) => match actual {
                Value::Null => false,
                Value::String(s) => re.is_match(s),
                other => re.is_match(&other.to_string()),
            },
            _ => false,
        }
    }

    fn values(&self) -> Vec<&Value> {
        match &self.operand {
            Operand::Value(v) => vec![v],
            Operand::List(items) => items.iter().collect(),
            Operand::Pattern(_) => Vec::new(),
        }
    }
}

fn compile(pattern: &str) -> Result<Regex, FilterError> {
    Regex::new(pattern).map_err(|e| FilterError::InvalidPattern {
        pattern: pattern.to_owned(),
        reason: e.to_string(),
    })
}

#[derive(Clone, Debug)]
pub enum Logical {
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Nor(Vec<Predicate>),
}

impl Logical {
    fn key(&self) -> &'static str {
        match self {
            Logical::And(_) => "$and",
            Logical::Or(_) => "$or",
            Logical::Not(_) => "$not",
            Logical::Nor(_) => "$nor",
        }
    }

    fn evaluate(&self, record: &Record) -> bool {
        match self {
            Logical::And(items) => items.iter().all(|p| p.evaluate(record)),
            Logical::Or(items) => items.iter().any(|p| p.evaluate(record)),
            Logical::Not(inner) => !inner.evaluate(record),
            Logical::Nor(items) => !items.iter().any(|p| p.evaluate(record)),
        }
    }

    fn children(&self) -> &[Predicate] {
        match self {
            Logical::And(items) | Logical::Or(items) | Logical::Nor(items) => items,
            Logical::Not(inner) => std::slice::from_ref(inner.as_ref()),
        }
    }
}

/// Field → clauses mapping plus logical composition.
#[derive(Clone, Debug, Default)]
#[must_use]
pub struct Predicate {
    fields: Vec<(String, Vec<Clause>)>,
    logic: Vec<Logical>,
}

impl Predicate {
    /// The predicate that matches every record.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn field(name: impl Into<String>, clause: Clause) -> Self {
        Self::default().with(name, clause)
    }

    /// Add a clause; clauses on the same field are AND-ed.
    pub fn with(mut self, name: impl Into<String>, clause: Clause) -> Self {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, clauses)) => clauses.push(clause),
            None => self.fields.push((name, vec![clause])),
        }
        self
    }

    /// Conjunction; merges the other predicate's clauses into this one.
    pub fn and(mut self, other: Predicate) -> Self {
        for (name, clauses) in other.fields {
            for clause in clauses {
                self = self.with(name.clone(), clause);
            }
        }
        self.logic.extend(other.logic);
        self
    }

    pub fn or(self, other: Predicate) -> Self {
        Self {
            fields: Vec::new(),
            logic: vec![Logical::Or(vec![self, other])],
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self {
            fields: Vec::new(),
            logic: vec![Logical::Not(Box::new(self))],
        }
    }

    pub fn nor(items: Vec<Predicate>) -> Self {
        Self {
            fields: Vec::new(),
            logic: vec![Logical::Nor(items)],
        }
    }

    /// True when the predicate has no constraints at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.logic.is_empty() && self.fields.iter().all(|(_, c)| c.is_empty())
    }

    #[must_use]
    pub fn fields(&self) -> &[(String, Vec<Clause>)] {
        &self.fields
    }

    #[must_use]
    pub fn logic(&self) -> &[Logical] {
        &self.logic
    }

    #[must_use]
    pub fn evaluate(&self, record: &Record) -> bool {
        self.fields.iter().all(|(name, clauses)| {
            let actual = record.get(name).unwrap_or(&Value::Null);
            clauses.iter().all(|c| c.matches(actual))
        }) && self.logic.iter().all(|l| l.evaluate(record))
    }

    /// Read a Mongo-style predicate document.
    ///
    /// ```text
    /// {"age": {"$gte": 18}, "name": "bob", "$or": [{"role": "admin"}, {"role": "owner"}]}
    /// ```
    ///
    /// Bare field values mean `$eq`; an empty operator object means no
    /// constraint on that field.
    ///
    /// # Errors
    /// `FilterError::MalformedFilter` names any unsupported `$` key.
    pub fn from_json(doc: &Value) -> Result<Self, FilterError> {
        let Value::Object(map) = doc else {
            return Err(FilterError::InvalidExpression(format!(
                "predicate must be an object, got {}",
                json_kind(doc)
            )));
        };

        let mut out = Predicate::default();
        for (key, value) in map {
            if key.starts_with('$') {
                out.logic.push(logical_from_json(key, value)?);
                continue;
            }
            match value {
                Value::Object(ops) if ops.keys().all(|k| k.starts_with('$')) => {
                    let mut clauses = Vec::with_capacity(ops.len());
                    for (op_key, operand) in ops {
                        let op = Operator::from_key(op_key).ok_or_else(|| {
                            FilterError::MalformedFilter {
                                key: op_key.clone(),
                            }
                        })?;
                        clauses.push(Clause::new(op, operand.clone())?);
                    }
                    out.fields.push((key.clone(), clauses));
                }
                other => out.fields.push((key.clone(), vec![Clause::eq(other.clone())])),
            }
        }
        Ok(out)
    }

    /// Render back into the Mongo-style document form.
    ///
    /// Parts that would share a key in one document (two `$or` groups, or
    /// the same operator twice on a field) are wrapped in a single `$and`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut parts: Vec<(String, Value)> = Vec::new();
        for (name, clauses) in &self.fields {
            let mut ops = Map::new();
            for clause in clauses {
                let key = clause.op.key();
                if ops.contains_key(key) {
                    parts.push((name.clone(), Value::Object(std::mem::take(&mut ops))));
                }
                ops.insert(key.to_owned(), clause.operand.to_json());
            }
            parts.push((name.clone(), Value::Object(ops)));
        }
        for logical in &self.logic {
            let rendered = match logical {
                Logical::Not(inner) => inner.to_json(),
                other => Value::Array(other.children().iter().map(Predicate::to_json).collect()),
            };
            parts.push((logical.key().to_owned(), rendered));
        }

        let distinct = {
            let mut seen = std::collections::HashSet::new();
            parts.iter().all(|(key, _)| seen.insert(key.as_str()))
        };
        if distinct {
            return Value::Object(parts.into_iter().collect());
        }
        let all = parts
            .into_iter()
            .map(|part| Value::Object([part].into_iter().collect()))
            .collect();
        let mut doc = Map::new();
        doc.insert("$and".to_owned(), Value::Array(all));
        Value::Object(doc)
    }

    /// Check every clause against the declared wire types.
    ///
    /// Values must be acceptable to the field's wire type, and ordering
    /// operators are rejected on boolean fields.
    ///
    /// # Errors
    /// `UnknownField` or `TypeMismatch` for the first offending clause.
    pub fn validate(&self, field_type: &dyn Fn(&str) -> Option<WireType>) -> Result<(), FilterError> {
        for (name, clauses) in &self.fields {
            let ty = field_type(name).ok_or_else(|| FilterError::UnknownField(name.clone()))?;
            for clause in clauses {
                if clause.op.is_range() && ty == WireType::Boolean {
                    return Err(FilterError::TypeMismatch {
                        field: name.clone(),
                        expected: ty,
                        got: format!("ordering operator {}", clause.op),
                    });
                }
                if let Some(bad) = clause.values().into_iter().find(|v| !ty.accepts(v)) {
                    return Err(FilterError::TypeMismatch {
                        field: name.clone(),
                        expected: ty,
                        got: json_kind(bad).to_owned(),
                    });
                }
            }
        }
        for logical in &self.logic {
            for child in logical.children() {
                child.validate(field_type)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

fn logical_from_json(key: &str, value: &Value) -> Result<Logical, FilterError> {
    let list = |v: &Value| -> Result<Vec<Predicate>, FilterError> {
        match v {
            Value::Array(items) => items.iter().map(Predicate::from_json).collect(),
            other => Err(FilterError::InvalidExpression(format!(
                "{key} expects an array, got {}",
                json_kind(other)
            ))),
        }
    };
    match key {
        "$and" => Ok(Logical::And(list(value)?)),
        "$or" => Ok(Logical::Or(list(value)?)),
        "$nor" => Ok(Logical::Nor(list(value)?)),
        "$not" => Ok(Logical::Not(Box::new(Predicate::from_json(value)?))),
        other => Err(FilterError::MalformedFilter {
            key: other.to_owned(),
        }),
    }
}

/// Evaluate `predicate` against `record`.
#[must_use]
pub fn evaluate(record: &Record, predicate: &Predicate) -> bool {
    predicate.evaluate(record)
}

/// Compare two JSON scalars of the same kind.
///
/// Numbers compare numerically (integers exactly, otherwise as floats),
/// strings lexically, booleans `false < true`. Values of different kinds
/// are unordered.
#[must_use]
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_values(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

pub(crate) fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
