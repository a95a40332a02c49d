//! Conversion of raw projection input into canonical [`Descriptor`]s.
//!
//! Accepted raw shapes:
//!
//! * an array of field names: `["title", "author"]`
//! * an object of flags: `{"title": true, "body": false, "views": 1}`
//! * an object with nested projections: `{"author": {"name": true}}`
//!
//! An empty nested object is normalized to a plain include. Converting a
//! [`Descriptor`] is the identity, so normalization is idempotent.

use std::collections::BTreeMap;

use serde_json::Value;

use super::model::{join_path, Descriptor, DescriptorKind, DescriptorMetadata, FieldSpec};
use super::MAX_NESTING_DEPTH;
use crate::types::{ValidationError, ValidationResult};

/// Input that can be normalized into a canonical descriptor.
pub trait IntoDescriptor {
    /// Performs the conversion.
    fn into_descriptor(self) -> ValidationResult<Descriptor>;
}

/// Normalizes `input` into a canonical descriptor.
pub fn to_descriptor(input: impl IntoDescriptor) -> ValidationResult<Descriptor> {
    input.into_descriptor()
}

impl IntoDescriptor for Descriptor {
    fn into_descriptor(self) -> ValidationResult<Descriptor> {
        Ok(self)
    }
}

impl IntoDescriptor for &Descriptor {
    fn into_descriptor(self) -> ValidationResult<Descriptor> {
        Ok(self.clone())
    }
}

impl IntoDescriptor for &Value {
    fn into_descriptor(self) -> ValidationResult<Descriptor> {
        Descriptor::from_json(self)
    }
}

impl IntoDescriptor for Value {
    fn into_descriptor(self) -> ValidationResult<Descriptor> {
        Descriptor::from_json(&self)
    }
}

impl IntoDescriptor for &[&str] {
    fn into_descriptor(self) -> ValidationResult<Descriptor> {
        from_names(self.iter().copied())
    }
}

impl<const N: usize> IntoDescriptor for [&str; N] {
    fn into_descriptor(self) -> ValidationResult<Descriptor> {
        from_names(self)
    }
}

impl IntoDescriptor for Vec<String> {
    fn into_descriptor(self) -> ValidationResult<Descriptor> {
        from_names(self)
    }
}

impl IntoDescriptor for Vec<&str> {
    fn into_descriptor(self) -> ValidationResult<Descriptor> {
        from_names(self)
    }
}

fn from_names<I, S>(names: I) -> ValidationResult<Descriptor>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let descriptor = Descriptor::including(names);
    descriptor.validate()?;
    Ok(descriptor)
}

impl Descriptor {
    /// Builds a descriptor from a raw JSON projection.
    pub fn from_json(value: &Value) -> ValidationResult<Descriptor> {
        let fields = parse_fields(value, "", 0)?;
        Ok(Descriptor::from_parts(fields, DescriptorMetadata::default()))
    }
}

fn parse_fields(
    value: &Value,
    prefix: &str,
    depth: usize,
) -> ValidationResult<BTreeMap<String, FieldSpec>> {
    if depth > MAX_NESTING_DEPTH {
        return Err(ValidationError::NestingTooDeep {
            path: prefix.to_string(),
            max: MAX_NESTING_DEPTH,
        });
    }
    let mut fields = BTreeMap::new();
    match value {
        Value::Array(names) => {
            for name in names {
                let Value::String(name) = name else {
                    return Err(ValidationError::InvalidFieldValue {
                        field: prefix.to_string(),
                        found: json_type(name).to_string(),
                    });
                };
                check_name(prefix, name)?;
                fields.insert(name.clone(), FieldSpec::included());
            }
        }
        Value::Object(entries) => {
            for (name, raw) in entries {
                check_name(prefix, name)?;
                let path = join_path(prefix, name);
                let spec = match raw {
                    Value::Bool(include) => {
                        if *include {
                            FieldSpec::included()
                        } else {
                            FieldSpec::excluded()
                        }
                    }
                    Value::Number(flag) => {
                        if flag.as_f64().unwrap_or(0.0) != 0.0 {
                            FieldSpec::included()
                        } else {
                            FieldSpec::excluded()
                        }
                    }
                    Value::Object(inner) if inner.is_empty() => FieldSpec::included(),
                    Value::Object(_) | Value::Array(_) => {
                        let nested = parse_fields(raw, &path, depth + 1)?;
                        let child = Descriptor::from_parts(
                            nested,
                            DescriptorMetadata {
                                kind: DescriptorKind::Nested,
                                ..DescriptorMetadata::default()
                            },
                        );
                        FieldSpec::nested(child)
                    }
                    other => {
                        return Err(ValidationError::InvalidFieldValue {
                            field: path,
                            found: json_type(other).to_string(),
                        })
                    }
                };
                fields.insert(name.clone(), spec);
            }
        }
        other if prefix.is_empty() => {
            return Err(ValidationError::InvalidProjection {
                found: json_type(other).to_string(),
            })
        }
        other => {
            return Err(ValidationError::InvalidFieldValue {
                field: prefix.to_string(),
                found: json_type(other).to_string(),
            })
        }
    }
    Ok(fields)
}

fn check_name(prefix: &str, name: &str) -> ValidationResult<()> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyFieldName {
            path: join_path(prefix, name),
        });
    }
    Ok(())
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
