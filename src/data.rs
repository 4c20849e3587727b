// src/data.rs

//! Data values flowing between jobs.
//!
//! A [`Datum`] is one resolved value together with its datatype name and any
//! failure annotations picked up from upstream jobs. Datatypes are a pluggable
//! seam: the engine only needs to coerce raw tool output into a canonical
//! typed form and to ask a value whether it is valid, both of which go through
//! the [`Datatype`] trait.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::job::state::JobState;
use crate::types::JobId;

/// A failure record attached to an output value and propagated transitively
/// to every downstream job that consumes the value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedAnnotation {
    pub job_id: JobId,
    pub state: JobState,
    pub message: String,
    /// Path to the failing job's log, relative to the run workspace.
    pub log_path: String,
}

/// One resolved, typed value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datum {
    pub value: String,
    pub datatype: String,
    pub annotations: Vec<FailedAnnotation>,
}

impl Datum {
    pub fn new(value: impl Into<String>, datatype: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            datatype: datatype.into(),
            annotations: Vec::new(),
        }
    }

    /// Content checksum of this value, delegated to blake3 over the datatype
    /// name and the canonical value form.
    pub fn checksum(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.datatype.as_bytes());
        hasher.update(b"\0");
        hasher.update(self.value.as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    /// Whether any upstream failure annotation is attached.
    pub fn is_failed(&self) -> bool {
        !self.annotations.is_empty()
    }
}

/// Outcome of a single coercion attempt against one datatype.
#[derive(Debug, Clone)]
pub enum CoercionOutcome {
    Accepted(Datum),
    Rejected(String),
}

/// Minimal datatype contract the engine relies on.
pub trait Datatype: Send + Sync {
    fn name(&self) -> &str;

    /// Try to interpret a raw tool-output value as this datatype.
    fn coerce(&self, raw: &str) -> CoercionOutcome;

    /// Whether an already-coerced value is valid for this datatype.
    fn is_valid(&self, value: &str) -> bool;
}

/// Datatype accepting any value unchanged.
#[derive(Debug, Clone)]
pub struct AnyType {
    name: String,
}

impl AnyType {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Datatype for AnyType {
    fn name(&self) -> &str {
        &self.name
    }

    fn coerce(&self, raw: &str) -> CoercionOutcome {
        CoercionOutcome::Accepted(Datum::new(raw, &self.name))
    }

    fn is_valid(&self, _value: &str) -> bool {
        true
    }
}

/// Integer datatype; rejects values that do not parse as `i64`.
#[derive(Debug, Clone, Default)]
pub struct IntType;

impl Datatype for IntType {
    fn name(&self) -> &str {
        "Int"
    }

    fn coerce(&self, raw: &str) -> CoercionOutcome {
        match raw.trim().parse::<i64>() {
            Ok(v) => CoercionOutcome::Accepted(Datum::new(v.to_string(), self.name())),
            Err(e) => CoercionOutcome::Rejected(format!("'{raw}' is not an integer: {e}")),
        }
    }

    fn is_valid(&self, value: &str) -> bool {
        value.trim().parse::<i64>().is_ok()
    }
}

/// URL datatype; requires an explicit scheme.
#[derive(Debug, Clone, Default)]
pub struct UrlType;

impl Datatype for UrlType {
    fn name(&self) -> &str {
        "Url"
    }

    fn coerce(&self, raw: &str) -> CoercionOutcome {
        if raw.contains("://") {
            CoercionOutcome::Accepted(Datum::new(raw, self.name()))
        } else {
            CoercionOutcome::Rejected(format!("'{raw}' has no URL scheme"))
        }
    }

    fn is_valid(&self, value: &str) -> bool {
        value.contains("://")
    }
}

/// Registry of datatypes known to this run, keyed by name.
pub struct DatatypeRegistry {
    types: HashMap<String, Arc<dyn Datatype>>,
}

impl DatatypeRegistry {
    /// Registry with the built-in types (`Any`, `Int`, `Url`) pre-registered.
    pub fn with_builtins() -> Self {
        let mut reg = Self {
            types: HashMap::new(),
        };
        reg.register(Arc::new(AnyType::named("Any")));
        reg.register(Arc::new(IntType));
        reg.register(Arc::new(UrlType));
        reg
    }

    pub fn register(&mut self, datatype: Arc<dyn Datatype>) {
        self.types.insert(datatype.name().to_string(), datatype);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Datatype>> {
        self.types.get(name).cloned()
    }

    /// Whether a datum reports itself valid for its declared datatype.
    ///
    /// Unknown datatypes are treated as valid; validity is a best-effort
    /// check, not a gate on unknown type plugins.
    pub fn datum_is_valid(&self, datum: &Datum) -> bool {
        match self.types.get(&datum.datatype) {
            Some(dt) => dt.is_valid(&datum.value),
            None => true,
        }
    }

    /// Resolve one raw tool-output value against the declared datatype,
    /// falling back to the preferred types in order. First acceptance wins.
    ///
    /// Returns the rejection reasons when every attempt fails.
    pub fn resolve_raw(
        &self,
        raw: &str,
        declared: &str,
        preferred: &[String],
    ) -> std::result::Result<Datum, Vec<String>> {
        let mut reasons = Vec::new();

        let candidates = std::iter::once(declared).chain(preferred.iter().map(String::as_str));
        for name in candidates {
            let Some(dt) = self.types.get(name) else {
                reasons.push(format!("unknown datatype '{name}'"));
                continue;
            };
            match dt.coerce(raw) {
                CoercionOutcome::Accepted(datum) => return Ok(datum),
                CoercionOutcome::Rejected(reason) => {
                    reasons.push(format!("{name}: {reason}"));
                }
            }
        }

        Err(reasons)
    }
}

impl std::fmt::Debug for DatatypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatatypeRegistry")
            .field("types", &self.types.keys().collect::<Vec<_>>())
            .finish()
    }
}
