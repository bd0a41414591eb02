/// Result Classifier
///
/// Pure decision table from (tests passed, line %, branch %, has branches)
/// to a [`Verdict`]. Rows are checked top to bottom and the first match wins:
///
/// | # | Condition                                   | Verdict                                   |
/// |---|---------------------------------------------|-------------------------------------------|
/// | 1 | tests failed                                | FailedIncomplete                          |
/// | 2 | line = 100 and (branch full or no branches) | PerfectCoverage                           |
/// | 3 | line >= 90                                  | HighLineLowBranch if branch < 80, else Excellent |
/// | 4 | line >= 70                                  | GoodLineLowBranch if branch < 60, else Good |
/// | 5 | line >= 50                                  | Moderate                                  |
/// | 6 | otherwise                                   | Low                                       |
///
/// The low-branch variants of rows 3 and 4 only apply when branches exist.

use covharness_common::types::{BranchCoverage, CoverageSample, Verdict};

use crate::coverage::{branch_coverage_exact, line_coverage_exact};

pub fn classify(
    tests_passed: bool,
    line_cov: f64,
    branch_cov: BranchCoverage,
    has_branches: bool,
) -> Verdict {
    if !tests_passed {
        return Verdict::FailedIncomplete;
    }

    let branch = branch_cov.as_percent();

    if line_cov >= 100.0 && (branch_cov.is_full() || !has_branches) {
        Verdict::PerfectCoverage
    } else if line_cov >= 90.0 {
        if has_branches && branch < 80.0 {
            Verdict::HighLineLowBranch
        } else {
            Verdict::Excellent
        }
    } else if line_cov >= 70.0 {
        if has_branches && branch < 60.0 {
            Verdict::GoodLineLowBranch
        } else {
            Verdict::Good
        }
    } else if line_cov >= 50.0 {
        Verdict::Moderate
    } else {
        Verdict::Low
    }
}

/// Classify an evaluation whose coverage may be absent.
///
/// Missing coverage can't support any coverage claim, so it is treated like
/// a failed run. Thresholds apply to the unrounded percentages.
pub fn classify_sample(tests_passed: bool, sample: Option<&CoverageSample>) -> Verdict {
    match sample {
        Some(sample) => classify(
            tests_passed,
            line_coverage_exact(sample),
            branch_coverage_exact(sample),
            sample.has_branches(),
        ),
        None => Verdict::FailedIncomplete,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covharness_common::types::BranchCoverage::{Full, Percent};

    #[test]
    fn test_failed_tests_win_over_everything() {
        assert_eq!(classify(false, 100.0, Full, false), Verdict::FailedIncomplete);
        assert_eq!(classify(false, 0.0, Percent(0.0), true), Verdict::FailedIncomplete);
    }

    #[test]
    fn test_perfect_coverage() {
        assert_eq!(classify(true, 100.0, Full, false), Verdict::PerfectCoverage);
        assert_eq!(classify(true, 100.0, Percent(100.0), true), Verdict::PerfectCoverage);
        // Full line coverage with partial branches drops to row 3
        assert_eq!(classify(true, 100.0, Percent(75.0), true), Verdict::HighLineLowBranch);
        assert_eq!(classify(true, 100.0, Percent(85.0), true), Verdict::Excellent);
    }

    #[test]
    fn test_high_line_rows() {
        assert_eq!(classify(true, 90.0, Percent(79.9), true), Verdict::HighLineLowBranch);
        assert_eq!(classify(true, 90.0, Percent(80.0), true), Verdict::Excellent);
        assert_eq!(classify(true, 95.0, Full, false), Verdict::Excellent);
        // Without branches the low-branch variant never applies
        assert_eq!(classify(true, 95.0, Percent(0.0), false), Verdict::Excellent);
    }

    #[test]
    fn test_good_line_rows() {
        assert_eq!(classify(true, 70.0, Percent(59.9), true), Verdict::GoodLineLowBranch);
        assert_eq!(classify(true, 89.9, Percent(60.0), true), Verdict::Good);
        assert_eq!(classify(true, 75.0, Full, false), Verdict::Good);
    }

    #[test]
    fn test_lower_rows() {
        assert_eq!(classify(true, 50.0, Percent(0.0), true), Verdict::Moderate);
        assert_eq!(classify(true, 69.9, Full, false), Verdict::Moderate);
        assert_eq!(classify(true, 49.9, Full, false), Verdict::Low);
        assert_eq!(classify(true, 0.0, Percent(0.0), true), Verdict::Low);
    }

    #[test]
    fn test_full_behaves_like_hundred() {
        for line in [0.0, 49.0, 55.0, 72.0, 91.0, 100.0] {
            for has_branches in [true, false] {
                assert_eq!(
                    classify(true, line, Full, has_branches),
                    classify(true, line, Percent(100.0), has_branches)
                );
            }
        }
    }

    #[test]
    fn test_classifier_is_total() {
        let mut seen = std::collections::HashSet::new();
        for passed in [true, false] {
            for line in (0..=1000).map(|v| v as f64 / 10.0) {
                for branch in [Full, Percent(0.0), Percent(59.9), Percent(60.0), Percent(79.9), Percent(80.0), Percent(100.0)] {
                    for has_branches in [true, false] {
                        seen.insert(classify(passed, line, branch, has_branches));
                    }
                }
            }
        }
        assert_eq!(seen.len(), Verdict::ALL.len());
    }

    #[test]
    fn test_classify_sample() {
        let sample = CoverageSample {
            num_statements: 4,
            covered_lines: 4,
            missing_lines: 0,
            num_branches: 0,
            covered_branches: 0,
            reported_percent: 100.0,
        };
        assert_eq!(classify_sample(true, Some(&sample)), Verdict::PerfectCoverage);
        assert_eq!(classify_sample(true, None), Verdict::FailedIncomplete);
    }

    fn line_sample(covered: u64, total: u64) -> CoverageSample {
        CoverageSample {
            num_statements: total,
            covered_lines: covered,
            missing_lines: total - covered,
            num_branches: 0,
            covered_branches: 0,
            reported_percent: 0.0,
        }
    }

    #[test]
    fn test_classify_sample_ignores_display_rounding() {
        // 89.95% shows as 90.0 but stays below the 90 threshold
        assert_eq!(classify_sample(true, Some(&line_sample(197, 219))), Verdict::Good);
        // 99.95% shows as 100.0 but is not full coverage
        assert_eq!(classify_sample(true, Some(&line_sample(1999, 2000))), Verdict::Excellent);
        assert_eq!(classify_sample(true, Some(&line_sample(2000, 2000))), Verdict::PerfectCoverage);
    }

    #[test]
    fn test_classify_sample_branch_threshold_unrounded() {
        // 79.96% branch coverage rounds to 80.0 but is still low
        let sample = CoverageSample {
            num_branches: 2500,
            covered_branches: 1999,
            ..line_sample(10, 10)
        };
        assert_eq!(classify_sample(true, Some(&sample)), Verdict::HighLineLowBranch);
    }
}
