//! Append-label verification: checks the append-dimension coordinate
//! values a slice contributes are consistent with `append_step` and with
//! whatever the target's last existing value was, before any chunk is
//! written.

use crate::config::AppendStep;
use crate::error::{Result, ZappendError};

/// Verifies `new_values` (the slice's append-dim coordinate, in order) are
/// internally consistent with `step`, and consistent with `previous_last`
/// (the target's current last append-dim value, `None` when the target is
/// being created). A `step` of `None` means append-label verification is
/// disabled (an `append_step` of `null`).
pub fn verify_append_labels(previous_last: Option<i64>, new_values: &[i64], step: Option<&AppendStep>) -> Result<()> {
    let Some(step) = step else { return Ok(()) };
    if new_values.is_empty() {
        return Ok(());
    }
    let mut prev = previous_last;
    for &v in new_values {
        if let Some(p) = prev {
            check_step(p, v, step)?;
        }
        prev = Some(v);
    }
    Ok(())
}

fn check_step(prev: i64, next: i64, step: &AppendStep) -> Result<()> {
    match step {
        AppendStep::Increasing => {
            if next <= prev {
                return Err(ZappendError::append_label(format!(
                    "must be monotonically increasing: {prev} followed by {next}"
                )));
            }
        }
        AppendStep::Decreasing => {
            if next >= prev {
                return Err(ZappendError::append_label(format!(
                    "must be monotonically decreasing: {prev} followed by {next}"
                )));
            }
        }
        AppendStep::Fixed(n) => {
            let actual = next - prev;
            if actual != *n {
                return Err(ZappendError::append_label(format!(
                    "would result in an invalid step size: expected {n}, got {actual} ({prev} followed by {next})"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_step_configured_skips_verification() {
        assert!(verify_append_labels(Some(5), &[1, 1, 1], None).is_ok());
    }

    #[test]
    fn increasing_accepts_strictly_increasing_run() {
        assert!(verify_append_labels(Some(1), &[2, 3, 4], Some(&AppendStep::Increasing)).is_ok());
    }

    #[test]
    fn increasing_rejects_a_repeat() {
        assert!(verify_append_labels(Some(4), &[4, 5], Some(&AppendStep::Increasing)).is_err());
    }

    #[test]
    fn decreasing_rejects_an_increase() {
        assert!(verify_append_labels(Some(10), &[9, 11], Some(&AppendStep::Decreasing)).is_err());
    }

    #[test]
    fn fixed_step_requires_exact_spacing() {
        assert!(verify_append_labels(Some(0), &[86400, 172800], Some(&AppendStep::Fixed(86400))).is_ok());
        assert!(verify_append_labels(Some(0), &[86400, 200000], Some(&AppendStep::Fixed(86400))).is_err());
    }

    #[test]
    fn no_previous_value_only_checks_within_the_new_slice() {
        assert!(verify_append_labels(None, &[1, 2, 3], Some(&AppendStep::Increasing)).is_ok());
        assert!(verify_append_labels(None, &[1], Some(&AppendStep::Increasing)).is_ok());
    }
}
