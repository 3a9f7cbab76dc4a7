//! Filter expression trees over record properties.
//!
//! A filter is an immutable value: combinators consume the receiver and
//! return a new tree. Combining with the combinator a composite already
//! uses appends to its children instead of nesting.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::QueryError;
use crate::property::{self, PropertyValue};
use crate::record::Record;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ComparisonOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
}

impl ComparisonOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Neq => "!=",
            ComparisonOp::Lt => "<",
            ComparisonOp::Lte => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Gte => ">=",
            ComparisonOp::In => "IN",
        }
    }

    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            ComparisonOp::Lt => ordering == Ordering::Less,
            ComparisonOp::Lte => ordering != Ordering::Greater,
            ComparisonOp::Gt => ordering == Ordering::Greater,
            ComparisonOp::Gte => ordering != Ordering::Less,
            ComparisonOp::Eq => ordering == Ordering::Equal,
            ComparisonOp::Neq => ordering != Ordering::Equal,
            ComparisonOp::In => false,
        }
    }
}

/// One side of a comparison: a record property name or a literal value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operand {
    Property(String),
    Literal(PropertyValue),
}

impl Operand {
    pub fn property(name: impl Into<String>) -> Self {
        Operand::Property(name.into())
    }

    pub fn literal(value: impl Into<PropertyValue>) -> Self {
        Operand::Literal(value.into())
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Property(name) => write!(f, "{name}"),
            Operand::Literal(PropertyValue::Text(s)) => write!(f, "'{s}'"),
            Operand::Literal(value) => write!(f, "{value}"),
        }
    }
}

/// Leaf node: compares one record property with one literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawComparison")]
pub struct Comparison {
    left: Operand,
    right: Operand,
    op: ComparisonOp,
}

/// Wire shape of a comparison, checked by [`Comparison::new`] on the way in.
#[derive(Deserialize)]
struct RawComparison {
    left: Operand,
    right: Operand,
    op: ComparisonOp,
}

impl TryFrom<RawComparison> for Comparison {
    type Error = QueryError;

    fn try_from(raw: RawComparison) -> Result<Self, Self::Error> {
        Comparison::new(raw.left, raw.right, raw.op)
    }
}

impl Comparison {
    /// Builds a comparison; exactly one side must reference a property.
    pub fn new(left: Operand, right: Operand, op: ComparisonOp) -> Result<Self, QueryError> {
        let properties = [&left, &right]
            .iter()
            .filter(|o| matches!(o, Operand::Property(_)))
            .count();
        if properties != 1 {
            return Err(QueryError::PropertySides(properties));
        }
        Ok(Self { left, right, op })
    }

    pub fn left(&self) -> &Operand {
        &self.left
    }

    pub fn right(&self) -> &Operand {
        &self.right
    }

    pub fn op(&self) -> ComparisonOp {
        self.op
    }

    /// Name of the property side.
    pub fn property(&self) -> &str {
        match (&self.left, &self.right) {
            (Operand::Property(name), _) | (_, Operand::Property(name)) => name,
            _ => "",
        }
    }

    /// The literal side.
    pub fn literal(&self) -> &PropertyValue {
        match (&self.left, &self.right) {
            (Operand::Literal(value), _) | (_, Operand::Literal(value)) => value,
            _ => &PropertyValue::Null,
        }
    }

    /// Evaluates the comparison against `record`.
    pub fn matches(&self, record: &Record) -> Result<bool, QueryError> {
        let name = self.property();
        let actual = property::resolve(record, name)?;
        let literal = self.literal();

        match self.op {
            ComparisonOp::Eq => Ok(actual.equals(literal)),
            ComparisonOp::Neq => Ok(!actual.equals(literal)),
            ComparisonOp::In => match literal {
                PropertyValue::List(items) => Ok(items.iter().any(|item| actual.equals(item))),
                _ => Err(QueryError::InRequiresList(name.to_string())),
            },
            op => {
                if actual.is_null() {
                    return Ok(false);
                }
                if !actual.is_orderable() {
                    return Err(QueryError::NotOrderable(name.to_string()));
                }
                let ordering = match (&self.left, &self.right) {
                    (Operand::Property(_), _) => actual.compare(literal)?,
                    _ => literal.compare(&actual)?,
                };
                Ok(op.accepts(ordering))
            }
        }
    }
}

/// Composite node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeKind {
    And,
    Or,
}

/// Per-kind behavior: child accessor, constructor and rendering keyword.
struct CompositeOps {
    children: fn(&Filter) -> Option<&[Filter]>,
    build: fn(Vec<Filter>) -> Filter,
    keyword: &'static str,
}

fn and_children(filter: &Filter) -> Option<&[Filter]> {
    match filter {
        Filter::And(children) => Some(children.as_slice()),
        _ => None,
    }
}

fn or_children(filter: &Filter) -> Option<&[Filter]> {
    match filter {
        Filter::Or(children) => Some(children.as_slice()),
        _ => None,
    }
}

static AND_OPS: CompositeOps = CompositeOps {
    children: and_children,
    build: Filter::And,
    keyword: "AND",
};

static OR_OPS: CompositeOps = CompositeOps {
    children: or_children,
    build: Filter::Or,
    keyword: "OR",
};

impl CompositeKind {
    fn ops(&self) -> &'static CompositeOps {
        match self {
            CompositeKind::And => &AND_OPS,
            CompositeKind::Or => &OR_OPS,
        }
    }

    pub fn keyword(&self) -> &'static str {
        self.ops().keyword
    }
}

/// A filter expression over record properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
    Comparison(Comparison),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl From<Comparison> for Filter {
    fn from(c: Comparison) -> Self {
        Filter::Comparison(c)
    }
}

impl Filter {
    /// `property <op> value`.
    pub fn compare(property: impl Into<String>, op: ComparisonOp, value: impl Into<PropertyValue>) -> Self {
        Filter::Comparison(Comparison {
            left: Operand::Property(property.into()),
            right: Operand::Literal(value.into()),
            op,
        })
    }

    pub fn eq(property: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        Self::compare(property, ComparisonOp::Eq, value)
    }

    pub fn neq(property: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        Self::compare(property, ComparisonOp::Neq, value)
    }

    pub fn lt(property: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        Self::compare(property, ComparisonOp::Lt, value)
    }

    pub fn lte(property: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        Self::compare(property, ComparisonOp::Lte, value)
    }

    pub fn gt(property: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        Self::compare(property, ComparisonOp::Gt, value)
    }

    pub fn gte(property: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        Self::compare(property, ComparisonOp::Gte, value)
    }

    pub fn is_in(property: impl Into<String>, values: impl Into<PropertyValue>) -> Self {
        Self::compare(property, ComparisonOp::In, values)
    }

    pub fn and(self, other: impl Into<Filter>) -> Self {
        self.combine(CompositeKind::And, other.into())
    }

    pub fn or(self, other: impl Into<Filter>) -> Self {
        self.combine(CompositeKind::Or, other.into())
    }

    fn combine(self, kind: CompositeKind, other: Filter) -> Self {
        let ops = kind.ops();
        let children = match (ops.children)(&self) {
            Some(existing) => {
                let mut children = existing.to_vec();
                children.push(other);
                children
            }
            None => vec![self, other],
        };
        (ops.build)(children)
    }

    /// Composite kind and children, `None` for a leaf.
    pub fn composite(&self) -> Option<(CompositeKind, &[Filter])> {
        [CompositeKind::And, CompositeKind::Or]
            .into_iter()
            .find_map(|kind| (kind.ops().children)(self).map(|children| (kind, children)))
    }

    /// Evaluates the filter; `And` stops at the first failing child and `Or`
    /// at the first passing one.
    pub fn matches(&self, record: &Record) -> Result<bool, QueryError> {
        match self {
            Filter::Comparison(c) => c.matches(record),
            Filter::And(children) => {
                for child in children {
                    if !child.matches(record)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Filter::Or(children) => {
                for child in children {
                    if child.matches(record)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    pub fn accept<V: FilterVisitor + ?Sized>(&self, visitor: &mut V) {
        match self {
            Filter::Comparison(c) => visitor.visit_comparison(c),
            Filter::And(children) => visitor.visit_composite(CompositeKind::And, children),
            Filter::Or(children) => visitor.visit_composite(CompositeKind::Or, children),
        }
    }
}

/// Walks a filter tree. The default composite handling visits every child
/// in order; backends translating filters (e.g. into SQL) override the
/// hooks they need.
pub trait FilterVisitor {
    fn visit_comparison(&mut self, comparison: &Comparison);

    fn visit_composite(&mut self, kind: CompositeKind, children: &[Filter]) {
        let _ = kind;
        for child in children {
            child.accept(self);
        }
    }
}

/// Renders `(a AND b AND ...)` strings for diagnostics.
struct Renderer<'a, 'b> {
    out: &'a mut fmt::Formatter<'b>,
    result: fmt::Result,
}

impl FilterVisitor for Renderer<'_, '_> {
    fn visit_comparison(&mut self, c: &Comparison) {
        if self.result.is_ok() {
            self.result = write!(self.out, "{} {} {}", c.left, c.op.as_str(), c.right);
        }
    }

    fn visit_composite(&mut self, kind: CompositeKind, children: &[Filter]) {
        if self.result.is_err() {
            return;
        }
        self.result = write!(self.out, "(");
        for (i, child) in children.iter().enumerate() {
            if i > 0 && self.result.is_ok() {
                self.result = write!(self.out, " {} ", kind.keyword());
            }
            child.accept(self);
        }
        if self.result.is_ok() {
            self.result = write!(self.out, ")");
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut renderer = Renderer { out: f, result: Ok(()) };
        self.accept(&mut renderer);
        renderer.result
    }
}
