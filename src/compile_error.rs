// Error taxonomy for policy compilation.
//
// Configuration errors come from malformed caller input and are reported as
// is. Invariant violations either point at a caller-supplied custom rule that
// clashes with the generated ones, or (InternalInvariant, BandExhausted) at a
// defect in the allocator/assembler itself.

use thiserror::Error;

use crate::priority_band::PriorityBand;

/// Every way a `PolicyConfig -> Policy` compilation can fail.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("Invalid pattern in {field}: {pattern:?} - {reason}")]
    InvalidPattern {
        field: String,
        pattern: String,
        reason: String,
    },

    #[error("Invalid address in {field}: {address:?} - {reason}")]
    InvalidAddress {
        field: String,
        address: String,
        reason: String,
    },

    #[error("Missing or unrecognized value for {field}: {reason}")]
    EmptyRequiredField { field: String, reason: String },

    #[error("Invalid rate limit threshold {threshold}: must be between {min} and {max}")]
    InvalidRateLimit { threshold: u64, min: u64, max: u64 },

    #[error("Priority collision: rule {rule_name} has priority {priority} - {reason}")]
    PriorityCollision {
        rule_name: String,
        priority: u32,
        reason: String,
    },

    #[error("Band {band} exhausted: requested {requested} slot(s), {available} available")]
    BandExhausted {
        band: PriorityBand,
        requested: usize,
        available: usize,
    },

    #[error("Duplicate priority {priority}: rules {first} and {second}")]
    DuplicatePriority {
        priority: u32,
        first: String,
        second: String,
    },

    #[error("Duplicate rule name: {0}")]
    DuplicateName(String),

    #[error("Internal invariant violated: {0}")]
    InternalInvariant(String),
}

impl CompileError {
    /// True when the error indicates a compiler defect rather than bad input
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            CompileError::InternalInvariant(_) | CompileError::BandExhausted { .. }
        )
    }

    /// The configuration field or rule the error is about, when there is one
    pub fn subject(&self) -> Option<&str> {
        match self {
            CompileError::InvalidPattern { field, .. }
            | CompileError::InvalidAddress { field, .. }
            | CompileError::EmptyRequiredField { field, .. } => Some(field),
            CompileError::PriorityCollision { rule_name, .. } => Some(rule_name),
            CompileError::DuplicatePriority { second, .. } => Some(second),
            CompileError::DuplicateName(name) => Some(name),
            CompileError::InvalidRateLimit { .. }
            | CompileError::BandExhausted { .. }
            | CompileError::InternalInvariant(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_errors_are_flagged() {
        assert!(CompileError::InternalInvariant("unsorted".into()).is_internal());
        assert!(CompileError::BandExhausted {
            band: PriorityBand::BlockV4,
            requested: 3,
            available: 2,
        }
        .is_internal());
        assert!(!CompileError::DuplicateName("custom".into()).is_internal());
    }

    #[test]
    fn test_error_messages_name_the_offender() {
        let err = CompileError::PriorityCollision {
            rule_name: "custom".into(),
            priority: 15,
            reason: "outside pre-custom range".into(),
        };
        assert_eq!(err.subject(), Some("custom"));
        assert!(err.to_string().contains("priority 15"));

        let err = CompileError::InvalidPattern {
            field: "allowedPaths".into(),
            pattern: "([".into(),
            reason: "unclosed group".into(),
        };
        assert_eq!(err.subject(), Some("allowedPaths"));
        assert!(err.to_string().starts_with("Invalid pattern in allowedPaths"));
    }
}
