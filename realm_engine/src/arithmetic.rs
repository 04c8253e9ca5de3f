/// RealmEngine v1 — Counter Arithmetic
///
/// Reference counts, identities and step numbers are u64 counters.
/// Every increment is checked; a decrement below zero is an engine bug.

use crate::error::{EngineError, Result};

/// Checked increment. Fails on u64 overflow.
pub fn checked_inc(value: u64, what: &'static str) -> Result<u64> {
    value.checked_add(1).ok_or(EngineError::Overflow(what))
}

/// Checked decrement. Going below zero means a reference was released
/// twice, which the engine never does on a sound graph.
pub fn checked_dec(value: u64, what: &'static str) -> Result<u64> {
    value.checked_sub(1).ok_or_else(|| {
        EngineError::invariant(
            "ref_count_non_negative",
            format!("{} would drop below zero", what),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_inc_ok() {
        assert_eq!(checked_inc(0, "ref_count").unwrap(), 1);
        assert_eq!(checked_inc(41, "ref_count").unwrap(), 42);
    }

    #[test]
    fn test_checked_inc_overflow() {
        let err = checked_inc(u64::MAX, "identity").unwrap_err();
        assert_eq!(err, EngineError::Overflow("identity"));
    }

    #[test]
    fn test_checked_dec_ok() {
        assert_eq!(checked_dec(2, "ref_count").unwrap(), 1);
    }

    #[test]
    fn test_checked_dec_below_zero_is_invariant_violation() {
        let err = checked_dec(0, "ref_count").unwrap_err();
        assert!(err.is_fatal_fault());
        assert!(err.to_string().contains("ref_count_non_negative"));
    }
}
