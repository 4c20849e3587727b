// src/version.rs

//! Engine version compatibility checking.
//!
//! A job records the engine version it was created under; at execution time
//! that is compared against the running engine. Instead of raising-or-warning
//! as control flow, the check returns an explicit [`CompatibilityCheck`] with
//! a severity, and the caller decides what to do with it.

use serde::{Deserialize, Serialize};

/// Version of the running engine.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Deployment channel of the running engine.
///
/// On `Stable` a version mismatch is fatal; on `Develop` it only warns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Stable,
    #[default]
    Develop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Fatal,
    Warning,
}

/// Result of comparing a job's recorded engine version against the running
/// engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompatibilityCheck {
    Compatible,
    Mismatch { severity: Severity, message: String },
}

/// Compare the engine version a job was created under with the version of
/// the engine about to execute it.
pub fn check_compatibility(
    job_version: &str,
    engine_version: &str,
    channel: Channel,
) -> CompatibilityCheck {
    if job_version == engine_version {
        return CompatibilityCheck::Compatible;
    }

    let severity = match channel {
        Channel::Stable => Severity::Fatal,
        Channel::Develop => Severity::Warning,
    };

    CompatibilityCheck::Mismatch {
        severity,
        message: format!(
            "job was created under engine version {job_version}, running engine is {engine_version}"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_versions_are_compatible() {
        assert_eq!(
            check_compatibility("1.0.0", "1.0.0", Channel::Stable),
            CompatibilityCheck::Compatible
        );
    }

    #[test]
    fn stable_mismatch_is_fatal() {
        match check_compatibility("1.0.0", "1.1.0", Channel::Stable) {
            CompatibilityCheck::Mismatch { severity, .. } => {
                assert_eq!(severity, Severity::Fatal)
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn develop_mismatch_only_warns() {
        match check_compatibility("1.0.0", "1.1.0", Channel::Develop) {
            CompatibilityCheck::Mismatch { severity, .. } => {
                assert_eq!(severity, Severity::Warning)
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }
}
