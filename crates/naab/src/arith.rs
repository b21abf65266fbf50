//! Checked integer arithmetic and bounds checks.
//!
//! Every integer operation the evaluator performs goes through these helpers
//! so overflow, underflow, `INT_MIN / -1`, and division by zero surface as
//! tagged errors instead of undefined or wrapping behavior.

use crate::exception::{ErrorKind, RunError, RunResult};

pub(crate) fn safe_add(a: i64, b: i64) -> RunResult<i64> {
    a.checked_add(b)
        .ok_or_else(|| overflow("add", a, b))
}

pub(crate) fn safe_sub(a: i64, b: i64) -> RunResult<i64> {
    a.checked_sub(b)
        .ok_or_else(|| overflow("subtract", a, b))
}

pub(crate) fn safe_mul(a: i64, b: i64) -> RunResult<i64> {
    a.checked_mul(b)
        .ok_or_else(|| overflow("multiply", a, b))
}

pub(crate) fn safe_div(a: i64, b: i64) -> RunResult<i64> {
    if b == 0 {
        return Err(RunError::err(ErrorKind::DivisionByZero, "integer division by zero"));
    }
    a.checked_div(b).ok_or_else(|| overflow("divide", a, b))
}

pub(crate) fn safe_rem(a: i64, b: i64) -> RunResult<i64> {
    if b == 0 {
        return Err(RunError::err(ErrorKind::DivisionByZero, "integer modulo by zero"));
    }
    a.checked_rem(b).ok_or_else(|| overflow("modulo", a, b))
}

pub(crate) fn safe_neg(a: i64) -> RunResult<i64> {
    a.checked_neg().ok_or_else(|| {
        RunError::err(
            ErrorKind::ArithmeticError,
            format!("integer overflow: cannot negate {a}"),
        )
    })
}

fn overflow(op: &str, a: i64, b: i64) -> RunError {
    RunError::err(
        ErrorKind::ArithmeticError,
        format!("integer overflow: cannot {op} {a} and {b}"),
    )
}

/// Validates a container index against a length. Negative indices are
/// rejected; so is anything at or past `len`.
pub(crate) fn check_array_bounds(index: i64, len: usize) -> RunResult<usize> {
    if index < 0 {
        return Err(RunError::err(
            ErrorKind::IndexError,
            format!("index {index} is negative"),
        ));
    }
    let idx = index as usize;
    if idx >= len {
        return Err(RunError::err(
            ErrorKind::IndexError,
            format!("index {index} out of range for length {len}"),
        ));
    }
    Ok(idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::ErrorKind;

    fn kind_of<T>(result: RunResult<T>) -> ErrorKind {
        match result {
            Err(err) => err.kind().expect("expected a tagged error"),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[test]
    fn overflow_is_reported() {
        assert_eq!(kind_of(safe_add(i64::MAX, 1)), ErrorKind::ArithmeticError);
        assert_eq!(kind_of(safe_sub(i64::MIN, 1)), ErrorKind::ArithmeticError);
        assert_eq!(kind_of(safe_mul(i64::MAX, 2)), ErrorKind::ArithmeticError);
        assert_eq!(kind_of(safe_neg(i64::MIN)), ErrorKind::ArithmeticError);
        // INT_MIN / -1 overflows even though the divisor is nonzero.
        assert_eq!(kind_of(safe_div(i64::MIN, -1)), ErrorKind::ArithmeticError);
    }

    #[test]
    fn zero_divisor_is_its_own_kind() {
        assert_eq!(kind_of(safe_div(1, 0)), ErrorKind::DivisionByZero);
        assert_eq!(kind_of(safe_rem(1, 0)), ErrorKind::DivisionByZero);
    }

    #[test]
    fn bounds_check_rejects_negative_and_past_end() {
        assert_eq!(check_array_bounds(2, 3).unwrap(), 2);
        assert_eq!(kind_of(check_array_bounds(-1, 3)), ErrorKind::IndexError);
        assert_eq!(kind_of(check_array_bounds(3, 3)), ErrorKind::IndexError);
    }

    #[test]
    fn negation_round_trips_in_range() {
        for i in [i64::MIN + 1, -1, 0, 1, i64::MAX] {
            assert_eq!(safe_neg(safe_neg(i).unwrap()).unwrap(), i);
        }
    }
}
