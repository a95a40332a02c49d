#![allow(missing_docs)]

//! Structured query descriptors (filter, sort, join and projection sections).

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::hash::Hasher;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use xxhash_rust::xxh64::Xxh64;

use super::model::{Descriptor, DescriptorKind};
use crate::types::{ValidationError, ValidationResult};

/// Filter tree depth limit enforced during validation.
pub const MAX_FILTER_DEPTH: usize = 64;

/// Comparison operators usable in filters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Exists,
}

impl CompareOp {
    fn as_str(self) -> &'static str {
        match self {
            CompareOp::Eq => "eq",
            CompareOp::Ne => "ne",
            CompareOp::Lt => "lt",
            CompareOp::Le => "le",
            CompareOp::Gt => "gt",
            CompareOp::Ge => "ge",
            CompareOp::In => "in",
            CompareOp::Exists => "exists",
        }
    }
}

/// Boolean filter tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterExpr {
    /// Conjunction.
    And(Vec<FilterExpr>),
    /// Disjunction.
    Or(Vec<FilterExpr>),
    /// Negation.
    Not(Box<FilterExpr>),
    /// Comparison leaf.
    Compare {
        /// Field path the comparison reads.
        field: String,
        /// Operator.
        op: CompareOp,
        /// Literal operand.
        #[serde(default)]
        value: Value,
    },
}

impl FilterExpr {
    /// Comparison leaf helper.
    pub fn compare(field: impl Into<String>, op: CompareOp, value: Value) -> Self {
        FilterExpr::Compare {
            field: field.into(),
            op,
            value,
        }
    }

    /// Depth of the tree; a single comparison has depth 1.
    pub fn depth(&self) -> usize {
        match self {
            FilterExpr::And(children) | FilterExpr::Or(children) => {
                1 + children.iter().map(FilterExpr::depth).max().unwrap_or(0)
            }
            FilterExpr::Not(inner) => 1 + inner.depth(),
            FilterExpr::Compare { .. } => 1,
        }
    }

    /// Whether the tree is deeper than `max`, descending at most `max + 1`
    /// levels.
    pub fn exceeds_depth(&self, max: usize) -> bool {
        if max == 0 {
            return true;
        }
        match self {
            FilterExpr::And(children) | FilterExpr::Or(children) => {
                children.iter().any(|child| child.exceeds_depth(max - 1))
            }
            FilterExpr::Not(inner) => inner.exceeds_depth(max - 1),
            FilterExpr::Compare { .. } => false,
        }
    }

    /// Copy with every `and`/`or` group's children in a stable order.
    ///
    /// Two filters with equal canonical forms select the same rows.
    pub fn canonical(&self) -> FilterExpr {
        match self {
            FilterExpr::And(children) => FilterExpr::And(canonical_group(children)),
            FilterExpr::Or(children) => FilterExpr::Or(canonical_group(children)),
            FilterExpr::Not(inner) => FilterExpr::Not(Box::new(inner.canonical())),
            FilterExpr::Compare { .. } => self.clone(),
        }
    }

    /// Collects every field path referenced by the tree.
    pub fn collect_fields(&self, out: &mut BTreeSet<String>) {
        match self {
            FilterExpr::And(children) | FilterExpr::Or(children) => {
                for child in children {
                    child.collect_fields(out);
                }
            }
            FilterExpr::Not(inner) => inner.collect_fields(out),
            FilterExpr::Compare { field, .. } => {
                out.insert(field.clone());
            }
        }
    }

    fn validate(&self) -> ValidationResult<()> {
        match self {
            FilterExpr::And(children) if children.is_empty() => {
                Err(ValidationError::EmptyFilterGroup { group: "and" })
            }
            FilterExpr::Or(children) if children.is_empty() => {
                Err(ValidationError::EmptyFilterGroup { group: "or" })
            }
            FilterExpr::And(children) | FilterExpr::Or(children) => {
                children.iter().try_for_each(FilterExpr::validate)
            }
            FilterExpr::Not(inner) => inner.validate(),
            FilterExpr::Compare { field, .. } if field.trim().is_empty() => {
                Err(ValidationError::EmptyFieldName {
                    path: field.clone(),
                })
            }
            FilterExpr::Compare { .. } => Ok(()),
        }
    }
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterExpr::And(children) | FilterExpr::Or(children) => {
                let group = if matches!(self, FilterExpr::And(_)) {
                    "and"
                } else {
                    "or"
                };
                write!(f, "{group}(")?;
                for (index, child) in children.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{child}")?;
                }
                f.write_str(")")
            }
            FilterExpr::Not(inner) => write!(f, "not({inner})"),
            FilterExpr::Compare { field, op, value } => {
                write!(f, "{field} {} {value}", op.as_str())
            }
        }
    }
}

fn canonical_group(children: &[FilterExpr]) -> Vec<FilterExpr> {
    let mut keyed: Vec<(String, FilterExpr)> = children
        .iter()
        .map(|child| {
            let child = child.canonical();
            (filter_text(&child), child)
        })
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed.into_iter().map(|(_, child)| child).collect()
}

/// Sort direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// One ordering key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    /// Field path to order by.
    pub field: String,
    /// Direction.
    #[serde(default)]
    pub direction: SortDirection,
}

/// Join flavour.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
}

impl JoinKind {
    fn as_str(self) -> &'static str {
        match self {
            JoinKind::Inner => "inner",
            JoinKind::Left => "left",
        }
    }
}

/// Join against another source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSpec {
    /// Joined source.
    pub target: String,
    /// Name the joined document is exposed under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Field on the primary source.
    pub local_field: String,
    /// Field on the joined source.
    pub foreign_field: String,
    /// Join flavour.
    #[serde(default)]
    pub kind: JoinKind,
}

/// Bookkeeping written by query strategies.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryMetadata {
    /// Names of strategies whose rewrites were folded into this query.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applied_rewrites: Vec<String>,
    /// Index names suggested for execution.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub index_hints: Vec<String>,
}

/// Canonical structured query.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    /// Primary source (collection or table).
    pub source: String,
    /// Optional filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterExpr>,
    /// Ordering keys, most significant first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<SortKey>,
    /// Joins, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub joins: Vec<JoinSpec>,
    /// Output projection; `None` returns whole documents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection: Option<Descriptor>,
    /// Row limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// Strategy bookkeeping.
    #[serde(default)]
    pub metadata: QueryMetadata,
}

impl QueryDescriptor {
    /// Creates a query over `source` with no other clauses.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    /// Sets the filter.
    pub fn with_filter(mut self, filter: FilterExpr) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Appends a sort key.
    pub fn with_sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push(SortKey {
            field: field.into(),
            direction,
        });
        self
    }

    /// Appends a join.
    pub fn with_join(mut self, join: JoinSpec) -> Self {
        self.joins.push(join);
        self
    }

    /// Sets the projection.
    pub fn with_projection(mut self, projection: Descriptor) -> Self {
        self.projection = Some(projection.with_kind(DescriptorKind::QueryProjection));
        self
    }

    /// Sets the row limit.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Parses a raw JSON query document and validates it.
    ///
    /// The `projection` section accepts the same raw shapes as
    /// [`Descriptor::from_json`].
    pub fn from_json(value: &Value) -> ValidationResult<QueryDescriptor> {
        let mut value = value.clone();
        let raw_projection = value
            .as_object_mut()
            .and_then(|object| object.remove("projection"));
        let mut query: QueryDescriptor =
            serde_json::from_value(value).map_err(|err| ValidationError::InvalidQuery {
                message: err.to_string(),
            })?;
        if let Some(raw) = raw_projection.filter(|raw| !raw.is_null()) {
            let projection = Descriptor::from_json(&raw)?;
            query = query.with_projection(projection);
        }
        query.validate()?;
        Ok(query)
    }

    /// Checks the structural invariants required before analysis.
    pub fn validate(&self) -> ValidationResult<()> {
        if self.source.trim().is_empty() {
            return Err(ValidationError::EmptySource);
        }
        if let Some(filter) = &self.filter {
            if filter.exceeds_depth(MAX_FILTER_DEPTH) {
                return Err(ValidationError::FilterTooDeep {
                    max: MAX_FILTER_DEPTH,
                });
            }
            filter.validate()?;
        }
        for (index, key) in self.sort.iter().enumerate() {
            if key.field.trim().is_empty() {
                return Err(ValidationError::EmptySortField { index });
            }
        }
        let mut aliases = HashSet::new();
        for (index, join) in self.joins.iter().enumerate() {
            if join.target.trim().is_empty() {
                return Err(ValidationError::EmptyJoinTarget { index });
            }
            let alias = join.alias.as_deref().unwrap_or(&join.target);
            if !aliases.insert(alias.to_string()) {
                return Err(ValidationError::DuplicateJoinAlias {
                    alias: alias.to_string(),
                });
            }
        }
        if let Some(projection) = &self.projection {
            projection.validate()?;
        }
        Ok(())
    }

    /// Field paths referenced by the filter.
    pub fn filter_fields(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        if let Some(filter) = &self.filter {
            filter.collect_fields(&mut out);
        }
        out
    }

    /// Filter with group children in canonical order.
    pub fn canonical_filter(&self) -> Option<FilterExpr> {
        self.filter.as_ref().map(FilterExpr::canonical)
    }

    /// One line per join naming kind, target, exposed name and key fields,
    /// sorted.
    pub fn join_signatures(&self) -> BTreeSet<String> {
        self.joins
            .iter()
            .map(|join| {
                format!(
                    "{} {} as {} on {} = {}",
                    join.kind.as_str(),
                    join.target,
                    join.alias.as_deref().unwrap_or(&join.target),
                    join.local_field,
                    join.foreign_field
                )
            })
            .collect()
    }

    /// Deterministic hash of the query structure.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = Xxh64::new(0);
        hasher.write(self.source.as_bytes());
        // serde_json writes maps in key order, so the text form is stable.
        if let Some(filter) = &self.filter {
            hasher.write(filter_text(filter).as_bytes());
        }
        hasher.write_u64(self.sort.len() as u64);
        for key in &self.sort {
            hasher.write(key.field.as_bytes());
            hasher.write_u8(key.direction as u8);
        }
        hasher.write_u64(self.joins.len() as u64);
        for join in &self.joins {
            hasher.write(join.target.as_bytes());
            hasher.write(join.alias.as_deref().unwrap_or_default().as_bytes());
            hasher.write_u8(join.kind as u8);
            hasher.write(join.local_field.as_bytes());
            hasher.write(join.foreign_field.as_bytes());
        }
        hasher.write_u64(self.projection.as_ref().map_or(0, Descriptor::fingerprint));
        hasher.write_u64(self.limit.unwrap_or(u64::MAX));
        hasher.finish()
    }
}

fn filter_text(filter: &FilterExpr) -> String {
    serde_json::to_string(filter).unwrap_or_default()
}
