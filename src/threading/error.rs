use std::fmt;

/// Errors reported by needle, context and pool constructors and by id
/// allocation.
///
/// Contention is not an error: operations that decline under contention
/// return `false` or `None` instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NeedleError {
    /// A required argument was missing or out of its domain (zero capacity,
    /// mismatched flag array, id outside the allocator).
    InvalidArgument(&'static str),
    /// Every id in the domain is currently claimed.
    CapacityExhausted { capacity: usize },
}

impl fmt::Display for NeedleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NeedleError::InvalidArgument(what) => write!(f, "invalid argument: {what}"),
            NeedleError::CapacityExhausted { capacity } => {
                write!(f, "capacity exhausted: all {capacity} ids are captured")
            }
        }
    }
}

impl std::error::Error for NeedleError {}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            NeedleError::InvalidArgument("capacity").to_string(),
            "invalid argument: capacity"
        );
        assert_eq!(
            NeedleError::CapacityExhausted { capacity: 4 }.to_string(),
            "capacity exhausted: all 4 ids are captured"
        );
    }
}
