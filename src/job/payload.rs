// src/job/payload.rs

//! Concrete payload structures and cardinality resolution.
//!
//! A [`Payload`] is the fully-resolved argument structure handed to a tool
//! interface. Its structural equality (via `PartialEq` on the serde-derived
//! types) is what the result cache uses to decide whether persisted work is
//! still applicable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::data::Datum;
use crate::errors::{EngineError, Result};
use crate::types::SampleId;

/// A fully-resolved value for one input or output argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArgumentValue {
    /// Hidden URL-typed arguments flatten to a plain tuple of values.
    Flat(Vec<String>),
    /// Non-hidden arguments keep a mapping keyed by sub-sample id.
    Mapped(BTreeMap<SampleId, Vec<String>>),
    /// Automatic (engine-determined) outputs resolve to a requested flag
    /// instead of a value list.
    Auto(bool),
}

impl ArgumentValue {
    /// Number of concrete values carried, across all sub-samples.
    pub fn value_count(&self) -> usize {
        match self {
            ArgumentValue::Flat(values) => values.len(),
            ArgumentValue::Mapped(map) => map.values().map(Vec::len).sum(),
            ArgumentValue::Auto(_) => 0,
        }
    }

    /// The single value, if exactly one is carried.
    pub fn single_value(&self) -> Option<&str> {
        match self {
            ArgumentValue::Flat(values) if values.len() == 1 => Some(&values[0]),
            ArgumentValue::Mapped(map) => {
                let mut all = map.values().flatten();
                match (all.next(), all.next()) {
                    (Some(v), None) => Some(v),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

/// The concrete `{inputs, outputs}` structure passed to a tool interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub inputs: BTreeMap<String, ArgumentValue>,
    pub outputs: BTreeMap<String, ArgumentValue>,
}

impl Payload {
    /// Look up an already-resolved argument by name, inputs first.
    pub fn lookup(&self, name: &str) -> Option<&ArgumentValue> {
        self.inputs.get(name).or_else(|| self.outputs.get(name))
    }
}

/// Expected value count for an output, possibly referencing another argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    /// A literal count.
    Count(usize),
    /// `as:<ref>` — the length of the referenced resolved argument.
    AsRef(String),
    /// `val:<ref>` — the referenced argument must resolve to exactly one
    /// value, which is parsed as the count.
    ValRef(String),
}

impl Cardinality {
    /// Parse a cardinality description: a literal integer, `as:<ref>` or
    /// `val:<ref>`.
    pub fn parse(spec: &str) -> Result<Self> {
        if let Some(reference) = spec.strip_prefix("as:") {
            if reference.is_empty() {
                return Err(EngineError::UnresolvableCardinality(spec.to_string()));
            }
            return Ok(Cardinality::AsRef(reference.to_string()));
        }
        if let Some(reference) = spec.strip_prefix("val:") {
            if reference.is_empty() {
                return Err(EngineError::UnresolvableCardinality(spec.to_string()));
            }
            return Ok(Cardinality::ValRef(reference.to_string()));
        }
        spec.trim()
            .parse::<usize>()
            .map(Cardinality::Count)
            .map_err(|_| EngineError::UnresolvableCardinality(spec.to_string()))
    }

    /// Resolve to a concrete count against the already-resolved arguments.
    ///
    /// An unresolvable reference is a hard error.
    pub fn resolve(&self, payload: &Payload) -> Result<usize> {
        match self {
            Cardinality::Count(n) => Ok(*n),
            Cardinality::AsRef(reference) => {
                let value = payload.lookup(reference).ok_or_else(|| {
                    EngineError::UnresolvableCardinality(format!("as:{reference}"))
                })?;
                Ok(value.value_count())
            }
            Cardinality::ValRef(reference) => {
                let value = payload.lookup(reference).ok_or_else(|| {
                    EngineError::UnresolvableCardinality(format!("val:{reference}"))
                })?;
                let single = value.single_value().ok_or_else(|| {
                    EngineError::UnresolvableCardinality(format!(
                        "val:{reference} does not resolve to exactly one value"
                    ))
                })?;
                single.trim().parse::<usize>().map_err(|_| {
                    EngineError::UnresolvableCardinality(format!(
                        "val:{reference} value '{single}' is not an integer"
                    ))
                })
            }
        }
    }
}

impl Default for Cardinality {
    fn default() -> Self {
        Cardinality::Count(1)
    }
}

/// One abstract input argument prior to payload resolution.
///
/// Values are [`Datum`]s keyed by sub-sample id; the annotations they carry
/// are what the completion callback walks when propagating upstream failures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argument {
    pub hidden: bool,
    pub url_typed: bool,
    /// Static default substituted when the argument resolves to zero values.
    pub default: Option<Vec<String>>,
    pub data: BTreeMap<SampleId, Vec<Datum>>,
}

impl Argument {
    pub fn with_data(data: BTreeMap<SampleId, Vec<Datum>>) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    pub fn value_count(&self) -> usize {
        self.data.values().map(Vec::len).sum()
    }

    /// Resolve into a payload argument value.
    pub fn resolve(&self) -> ArgumentValue {
        if self.value_count() == 0 {
            if let Some(default) = &self.default {
                return ArgumentValue::Flat(default.clone());
            }
        }

        if self.hidden && self.url_typed {
            let flat = self
                .data
                .values()
                .flatten()
                .map(|d| d.value.clone())
                .collect();
            return ArgumentValue::Flat(flat);
        }

        let mapped = self
            .data
            .iter()
            .map(|(sample, data)| {
                let values = data.iter().map(|d| d.value.clone()).collect();
                (sample.clone(), values)
            })
            .collect();
        ArgumentValue::Mapped(mapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload_with_input(name: &str, values: &[&str]) -> Payload {
        let mut payload = Payload::default();
        payload.inputs.insert(
            name.to_string(),
            ArgumentValue::Flat(values.iter().map(|s| s.to_string()).collect()),
        );
        payload
    }

    #[test]
    fn parse_literal_and_refs() {
        assert_eq!(Cardinality::parse("3").unwrap(), Cardinality::Count(3));
        assert_eq!(
            Cardinality::parse("as:in").unwrap(),
            Cardinality::AsRef("in".to_string())
        );
        assert_eq!(
            Cardinality::parse("val:n").unwrap(),
            Cardinality::ValRef("n".to_string())
        );
        assert!(Cardinality::parse("lots").is_err());
        assert!(Cardinality::parse("as:").is_err());
    }

    #[test]
    fn as_ref_resolves_to_length() {
        let payload = payload_with_input("in", &["a", "b", "c"]);
        let card = Cardinality::AsRef("in".to_string());
        assert_eq!(card.resolve(&payload).unwrap(), 3);
    }

    #[test]
    fn val_ref_parses_single_value() {
        let payload = payload_with_input("n", &["5"]);
        let card = Cardinality::ValRef("n".to_string());
        assert_eq!(card.resolve(&payload).unwrap(), 5);
    }

    #[test]
    fn val_ref_rejects_multiple_values() {
        let payload = payload_with_input("n", &["5", "6"]);
        let card = Cardinality::ValRef("n".to_string());
        assert!(card.resolve(&payload).is_err());
    }

    #[test]
    fn unresolvable_reference_is_hard_error() {
        let payload = Payload::default();
        assert!(Cardinality::AsRef("ghost".to_string()).resolve(&payload).is_err());
        assert!(Cardinality::ValRef("ghost".to_string()).resolve(&payload).is_err());
    }

    #[test]
    fn hidden_url_argument_flattens() {
        let mut data = BTreeMap::new();
        data.insert("s1".to_string(), vec![Datum::new("vfs://a", "Url")]);
        data.insert("s2".to_string(), vec![Datum::new("vfs://b", "Url")]);
        let arg = Argument {
            hidden: true,
            url_typed: true,
            default: None,
            data,
        };
        assert_eq!(
            arg.resolve(),
            ArgumentValue::Flat(vec!["vfs://a".to_string(), "vfs://b".to_string()])
        );
    }

    #[test]
    fn empty_argument_uses_default() {
        let arg = Argument {
            hidden: false,
            url_typed: false,
            default: Some(vec!["fallback".to_string()]),
            data: BTreeMap::new(),
        };
        assert_eq!(
            arg.resolve(),
            ArgumentValue::Flat(vec!["fallback".to_string()])
        );
    }
}
