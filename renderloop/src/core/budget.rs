//! Wall-clock budget helper for per-attempt deadlines.

use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};

/// Return the remaining budget until the provided deadline.
///
/// Each container command within an attempt consumes from one shared
/// deadline, so a hung render cannot stretch the attempt past its budget.
pub fn remaining_budget(deadline: Instant) -> Result<Duration> {
    let remaining = deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(Duration::from_secs(0));
    if remaining.is_zero() {
        return Err(anyhow!("attempt timed out"));
    }
    Ok(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn future_deadline_has_budget() {
        let deadline = Instant::now() + Duration::from_secs(60);
        let remaining = remaining_budget(deadline).expect("budget");
        assert!(remaining > Duration::from_secs(50));
    }

    #[test]
    fn past_deadline_errors() {
        let deadline = Instant::now() - Duration::from_millis(1);
        let err = remaining_budget(deadline).expect_err("expired");
        assert!(err.to_string().contains("timed out"));
    }
}
