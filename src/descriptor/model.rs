use std::collections::BTreeMap;
use std::hash::Hasher;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::Xxh64;

use crate::types::{ValidationError, ValidationResult};

/// Maximum nesting depth accepted for projections.
///
/// Owned descriptor trees cannot contain cycles, so this limit is the only
/// structural bound enforced before analysis.
pub const MAX_NESTING_DEPTH: usize = 64;

fn is_false(value: &bool) -> bool {
    !*value
}

/// Inclusion rule for a single field of a projection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Whether the field is part of the result.
    pub include: bool,
    /// Projection applied to the field's sub-document, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested: Option<Descriptor>,
    /// Deferred fetch annotation written by lazy loading.
    #[serde(default, skip_serializing_if = "is_false")]
    pub lazy: bool,
    /// Source-side evaluation annotation written by pushdown.
    #[serde(default, skip_serializing_if = "is_false")]
    pub source_evaluated: bool,
}

impl FieldSpec {
    /// An included leaf field.
    pub fn included() -> Self {
        Self {
            include: true,
            nested: None,
            lazy: false,
            source_evaluated: false,
        }
    }

    /// An excluded field.
    pub fn excluded() -> Self {
        Self {
            include: false,
            ..Self::included()
        }
    }

    /// An included field carrying a nested projection.
    pub fn nested(descriptor: Descriptor) -> Self {
        Self {
            nested: Some(descriptor),
            ..Self::included()
        }
    }

    /// Returns the spec with every strategy annotation stripped.
    pub fn original(&self) -> FieldSpec {
        FieldSpec {
            include: self.include,
            nested: self.nested.clone(),
            lazy: false,
            source_evaluated: false,
        }
    }

    /// Returns a copy with the lazy annotation set.
    pub fn with_lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    /// Returns a copy with the source-evaluation annotation set.
    pub fn with_source_evaluated(mut self, source_evaluated: bool) -> Self {
        self.source_evaluated = source_evaluated;
        self
    }

    /// True when the field is included and has a nested projection.
    pub fn is_nested(&self) -> bool {
        self.include && self.nested.is_some()
    }
}

/// What a descriptor describes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorKind {
    /// Top-level field projection.
    #[default]
    Projection,
    /// Projection over a sub-document.
    Nested,
    /// Projection section of a structured query.
    QueryProjection,
}

/// Eager/lazy partition recorded by lazy loading.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LazyLoadingPlan {
    /// Always true once a plan is recorded.
    pub enabled: bool,
    /// Fields fetched with the primary read, highest priority first.
    pub eager_fields: Vec<String>,
    /// Fields fetched on demand, highest priority first.
    pub lazy_fields: Vec<String>,
    /// Size of the eager partition the plan was built for.
    pub eager_load_limit: usize,
}

/// Fields marked for evaluation by the data source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PushdownPlan {
    /// Sorted names of the source-evaluated fields.
    pub fields: Vec<String>,
}

/// Record left by field selection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldSelectionReport {
    /// Included top-level fields seen by the strategy.
    pub included_count: usize,
    /// Count above which the descriptor was flagged.
    pub threshold: usize,
    /// Fields removed by a licensed prune, empty when only flagging.
    pub pruned: Vec<String>,
}

/// Derived metadata carried alongside the field map.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DescriptorMetadata {
    /// Descriptor type.
    #[serde(default)]
    pub kind: DescriptorKind,
    /// Lazy-loading partition, when one was accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lazy_loading: Option<LazyLoadingPlan>,
    /// Pushdown plan, when one was accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pushdown: Option<PushdownPlan>,
    /// Field selection record, when one was accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_selection: Option<FieldSelectionReport>,
}

/// Canonical projection descriptor.
///
/// Field order carries no meaning; the map is ordered only so that
/// iteration, hashing and serialization are deterministic. Descriptors are
/// never mutated once handed to the optimizer: strategies build new ones.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(default)]
    fields: BTreeMap<String, FieldSpec>,
    #[serde(default)]
    metadata: DescriptorMetadata,
}

impl Descriptor {
    /// Creates an empty projection descriptor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a descriptor from its parts.
    pub fn from_parts(fields: BTreeMap<String, FieldSpec>, metadata: DescriptorMetadata) -> Self {
        Self { fields, metadata }
    }

    /// Creates a descriptor including every name in `names`.
    pub fn including<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields = names
            .into_iter()
            .map(|name| (name.into(), FieldSpec::included()))
            .collect();
        Self::from_parts(fields, DescriptorMetadata::default())
    }

    /// Adds or replaces a field.
    pub fn with_field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields.insert(name.into(), spec);
        self
    }

    /// Replaces the metadata record.
    pub fn with_metadata(mut self, metadata: DescriptorMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Sets the descriptor kind.
    pub fn with_kind(mut self, kind: DescriptorKind) -> Self {
        self.metadata.kind = kind;
        self
    }

    /// Field map.
    pub fn fields(&self) -> &BTreeMap<String, FieldSpec> {
        &self.fields
    }

    /// Looks up one field.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    /// Metadata record.
    pub fn metadata(&self) -> &DescriptorMetadata {
        &self.metadata
    }

    /// Splits the descriptor into its parts.
    pub fn into_parts(self) -> (BTreeMap<String, FieldSpec>, DescriptorMetadata) {
        (self.fields, self.metadata)
    }

    /// Number of declared fields, included or not.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when no field is declared.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Names of the included top-level fields.
    pub fn included_names(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|(_, spec)| spec.include)
            .map(|(name, _)| name.as_str())
    }

    /// Checks the structural invariants required before analysis.
    pub fn validate(&self) -> ValidationResult<()> {
        self.validate_at("", 0)
    }

    fn validate_at(&self, prefix: &str, depth: usize) -> ValidationResult<()> {
        if depth > MAX_NESTING_DEPTH {
            return Err(ValidationError::NestingTooDeep {
                path: prefix.to_string(),
                max: MAX_NESTING_DEPTH,
            });
        }
        for (name, spec) in &self.fields {
            let path = join_path(prefix, name);
            if name.trim().is_empty() {
                return Err(ValidationError::EmptyFieldName { path });
            }
            match (&spec.nested, spec.include) {
                (Some(_), false) => return Err(ValidationError::ExcludedNested { field: path }),
                (Some(child), true) => child.validate_at(&path, depth + 1)?,
                (None, _) => {}
            }
        }
        Ok(())
    }

    /// Deterministic hash of the field structure and annotations.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = Xxh64::new(0);
        hash_descriptor(self, &mut hasher);
        hasher.finish()
    }
}

pub(crate) fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn hash_descriptor(descriptor: &Descriptor, hasher: &mut Xxh64) {
    hasher.write_u64(descriptor.fields.len() as u64);
    for (name, spec) in &descriptor.fields {
        hasher.write(name.as_bytes());
        hasher.write_u8(spec.include as u8);
        hasher.write_u8(spec.lazy as u8);
        hasher.write_u8(spec.source_evaluated as u8);
        match &spec.nested {
            Some(child) => {
                hasher.write_u8(1);
                hash_descriptor(child, hasher);
            }
            None => hasher.write_u8(0),
        }
    }
}
