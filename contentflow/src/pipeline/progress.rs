//! Weighted progress reporting.

/// Derives run progress from completed-stage weights.
///
/// `percent_after(k) = floor(100 * Σ weights[0..k] / Σ weights)`, which is
/// exactly 100 once every stage has completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressReporter {
    cumulative: Vec<u64>,
}

impl ProgressReporter {
    /// Creates a reporter for the given stage weights, in stage order.
    #[must_use]
    pub fn from_weights(weights: impl IntoIterator<Item = u32>) -> Self {
        let mut cumulative = vec![0u64];
        let mut sum = 0u64;
        for weight in weights {
            sum += u64::from(weight);
            cumulative.push(sum);
        }
        Self { cumulative }
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.cumulative.len() - 1
    }

    /// Returns the sum of all weights.
    #[must_use]
    pub fn total_weight(&self) -> u64 {
        self.cumulative.last().copied().unwrap_or(0)
    }

    /// Progress after the first `completed` stages are done.
    #[must_use]
    pub fn percent_after(&self, completed: usize) -> u8 {
        let total = self.total_weight();
        if total == 0 || completed >= self.stage_count() {
            return 100;
        }
        let done = self.cumulative[completed];
        // done < total here, so the quotient is below 100
        u8::try_from(done * 100 / total).unwrap_or(100)
    }

    /// Progress after `completed` stages, never lower than `previous`.
    #[must_use]
    pub fn next_percent(&self, previous: u8, completed: usize) -> u8 {
        previous.max(self.percent_after(completed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_weights() {
        let progress = ProgressReporter::from_weights([1, 1, 1, 1]);
        assert_eq!(progress.percent_after(0), 0);
        assert_eq!(progress.percent_after(1), 25);
        assert_eq!(progress.percent_after(2), 50);
        assert_eq!(progress.percent_after(3), 75);
        assert_eq!(progress.percent_after(4), 100);
    }

    #[test]
    fn test_non_uniform_weights_floor() {
        // 1 + 1 + 6 + 1 = 9
        let progress = ProgressReporter::from_weights([1, 1, 6, 1]);
        assert_eq!(progress.percent_after(1), 11);
        assert_eq!(progress.percent_after(2), 22);
        assert_eq!(progress.percent_after(3), 88);
        assert_eq!(progress.percent_after(4), 100);
    }

    #[test]
    fn test_thirds_reach_exactly_100() {
        let progress = ProgressReporter::from_weights([1, 1, 1]);
        assert_eq!(progress.percent_after(2), 66);
        assert_eq!(progress.percent_after(3), 100);
    }

    #[test]
    fn test_next_percent_is_monotonic() {
        let progress = ProgressReporter::from_weights([1, 1]);
        assert_eq!(progress.next_percent(80, 1), 80);
        assert_eq!(progress.next_percent(10, 1), 50);
    }

    #[test]
    fn test_totals() {
        let progress = ProgressReporter::from_weights([2, 3]);
        assert_eq!(progress.stage_count(), 2);
        assert_eq!(progress.total_weight(), 5);
    }
}
