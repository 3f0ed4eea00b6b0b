//! Largest income that keeps standard income (ordinary income plus the taxable
//! part of Social Security) at or below a ceiling.
//!
//! Taxable benefits grow with income until they saturate at 85%, so the target
//! equation is piecewise linear with kinks at the provisional-income base
//! amounts. A coarse scan picks a seed away from the saturated stretch, then the
//! bracketed root finder refines it.

use tracing::debug;

use super::solver::{RootFinder, SolverError};
use super::tax::{self, SS_MAX_TAXABLE_SHARE};
use super::types::FilingStatus;

const SATURATION_EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy)]
pub struct TargetIncomeSolver {
    pub finder: RootFinder,
    pub scan_step: f64,
}

impl Default for TargetIncomeSolver {
    fn default() -> Self {
        Self {
            finder: RootFinder::default(),
            scan_step: 1_000.0,
        }
    }
}

impl TargetIncomeSolver {
    /// Solves `non_adjustable + x + TaxableSS(non_adjustable + x + gains) = ceiling`.
    pub fn max_additional_ordinary_income(
        &self,
        non_adjustable_ordinary: f64,
        lt_cap_gains: f64,
        total_social_security: f64,
        ceiling: f64,
        filing_status: FilingStatus,
    ) -> Result<f64, SolverError> {
        let taxable_ss = |x: f64| {
            tax::taxable_social_security(
                non_adjustable_ordinary + x + lt_cap_gains,
                total_social_security,
                filing_status,
            )
        };
        self.solve_for_ceiling(
            |x| non_adjustable_ordinary + x + taxable_ss(x),
            |x| is_saturated(taxable_ss(x), total_social_security),
            ceiling,
        )
    }

    /// Solves `x + TaxableSS(x) = ceiling` with no ordinary income.
    pub fn max_capital_gains(
        &self,
        total_social_security: f64,
        ceiling: f64,
        filing_status: FilingStatus,
    ) -> Result<f64, SolverError> {
        let taxable_ss =
            |x: f64| tax::taxable_social_security(x, total_social_security, filing_status);
        self.solve_for_ceiling(
            |x| x + taxable_ss(x),
            |x| is_saturated(taxable_ss(x), total_social_security),
            ceiling,
        )
    }

    fn solve_for_ceiling<F, S>(
        &self,
        income: F,
        saturated: S,
        ceiling: f64,
    ) -> Result<f64, SolverError>
    where
        F: Fn(f64) -> f64,
        S: Fn(f64) -> bool,
    {
        if income(0.0) >= ceiling {
            return Ok(0.0);
        }

        let seed = self.scan_seed(&income, &saturated, ceiling);
        debug!(seed, ceiling, "income ceiling seed");

        let root = self
            .finder
            .solve_bracketed(|x| income(x) - ceiling, seed, 0.0, ceiling)?;
        Ok(root.max(0.0))
    }

    /// Candidate closest to the ceiling, skipping saturated points unless every
    /// candidate is saturated.
    fn scan_seed<F, S>(&self, income: &F, saturated: &S, ceiling: f64) -> f64
    where
        F: Fn(f64) -> f64,
        S: Fn(f64) -> bool,
    {
        let step = if self.scan_step > 0.0 {
            self.scan_step
        } else {
            ceiling.max(1.0)
        };
        let steps = (ceiling / step).floor().max(0.0) as usize;
        let mut candidates: Vec<f64> = (0..=steps).map(|i| i as f64 * step).collect();
        if candidates.last().is_some_and(|&last| last < ceiling) {
            candidates.push(ceiling);
        }

        let mut best: Option<(f64, f64)> = None;
        let mut best_saturated: Option<(f64, f64)> = None;
        for candidate in candidates {
            let gap = (ceiling - income(candidate)).abs();
            let slot = if saturated(candidate) {
                &mut best_saturated
            } else {
                &mut best
            };
            if slot.is_none_or(|(best_gap, _)| gap < best_gap) {
                *slot = Some((gap, candidate));
            }
        }

        best.or(best_saturated).map(|(_, x)| x).unwrap_or(0.0)
    }
}

fn is_saturated(taxable_ss: f64, total_social_security: f64) -> bool {
    total_social_security > 0.0
        && taxable_ss >= SS_MAX_TAXABLE_SHARE * total_social_security - SATURATION_EPS
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, proptest};
    use proptest::sample::select;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= 1e-6,
            "expected {expected}, got {actual}"
        );
    }

    fn joint_twelve_percent_ceiling() -> f64 {
        tax::bracket_ceiling(0.12, FilingStatus::MarriedFilingJointly).expect("bounded bracket")
    }

    #[test]
    fn without_benefits_room_is_ceiling_minus_income() {
        let solver = TargetIncomeSolver::default();
        let ceiling = joint_twelve_percent_ceiling();
        let x = solver
            .max_additional_ordinary_income(
                10_000.0,
                0.0,
                0.0,
                ceiling,
                FilingStatus::MarriedFilingJointly,
            )
            .expect("must solve");
        assert_approx(x, ceiling - 10_000.0);
    }

    #[test]
    fn no_room_returns_zero() {
        let solver = TargetIncomeSolver::default();
        let x = solver
            .max_additional_ordinary_income(
                200_000.0,
                0.0,
                30_000.0,
                joint_twelve_percent_ceiling(),
                FilingStatus::MarriedFilingJointly,
            )
            .expect("must solve");
        assert_approx(x, 0.0);
    }

    #[test]
    fn root_past_benefit_saturation_is_found() {
        // 30,000 of benefits saturate at 25,500 taxable once x exceeds ~51,941,
        // so the root sits on the saturated stretch: x + 25,500 = 109,450.
        let solver = TargetIncomeSolver::default();
        let x = solver
            .max_additional_ordinary_income(
                0.0,
                0.0,
                30_000.0,
                joint_twelve_percent_ceiling(),
                FilingStatus::MarriedFilingJointly,
            )
            .expect("must solve");
        assert_approx(x, 83_950.0);
    }

    #[test]
    fn capital_gains_room_accounts_for_benefit_taxation() {
        // Single, 20,000 of benefits: above the second base, f(x) = 1.85x - 15,900.
        let ceiling = tax::capital_gains_zero_rate_ceiling(FilingStatus::Single);
        let solver = TargetIncomeSolver::default();
        let x = solver
            .max_capital_gains(20_000.0, ceiling, FilingStatus::Single)
            .expect("must solve");
        assert_approx(x, (ceiling + 15_900.0) / 1.85);
    }

    #[test]
    fn non_finite_ceiling_fails_to_converge() {
        let solver = TargetIncomeSolver::default();
        let err = solver
            .max_capital_gains(20_000.0, f64::NAN, FilingStatus::Single)
            .expect_err("nan ceiling has no solution");
        assert!(matches!(err, SolverError::NonFinite { .. }));
    }

    proptest! {
        #[test]
        fn prop_solved_income_meets_ceiling(
            non_adjustable in 0u32..60_000,
            gains in 0u32..40_000,
            benefits in 0u32..70_000,
            rate in select(vec![0.10, 0.12, 0.22, 0.24]),
            status in select(FilingStatus::ALL.to_vec())
        ) {
            let (non_adj, gains, ss) = (non_adjustable as f64, gains as f64, benefits as f64);
            let ceiling = tax::bracket_ceiling(rate, status).unwrap_or(0.0);
            let solver = TargetIncomeSolver::default();
            let x = solver.max_additional_ordinary_income(non_adj, gains, ss, ceiling, status);
            prop_assert!(x.is_ok());
            let x = x.unwrap_or(f64::NAN);
            prop_assert!(x >= 0.0);

            let taxable_ss = tax::taxable_social_security(non_adj + x + gains, ss, status);
            let standard = non_adj + x + taxable_ss;
            if x > 0.0 {
                prop_assert!((standard - ceiling).abs() < 1e-6);
            } else {
                prop_assert!(standard >= ceiling - 1e-6);
            }
        }
    }
}
