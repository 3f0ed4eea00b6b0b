use thiserror::Error;

const MIN_DERIVATIVE: f64 = 1e-12;
const MIN_BRACKET_WIDTH: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum SolverError {
    #[error("no convergence after {iterations} iterations (last x = {last_x})")]
    MaxIterationsExceeded { iterations: u32, last_x: f64 },

    #[error("derivative vanished at x = {x}")]
    Diverged { x: f64 },

    #[error("non-finite value near x = {x}")]
    NonFinite { x: f64 },
}

/// Newton-Raphson with a central-difference derivative.
#[derive(Debug, Clone, Copy)]
pub struct RootFinder {
    /// Convergence test on `|f(x)|`.
    pub tolerance: f64,
    pub max_iterations: u32,
    pub derivative_step: f64,
}

impl Default for RootFinder {
    fn default() -> Self {
        Self {
            tolerance: 1e-9,
            max_iterations: 100,
            derivative_step: 1e-3,
        }
    }
}

impl RootFinder {
    pub fn solve<F>(&self, f: F, initial_guess: f64) -> Result<f64, SolverError>
    where
        F: Fn(f64) -> f64,
    {
        let mut x = initial_guess;
        for _ in 0..self.max_iterations {
            let fx = eval(&f, x)?;
            if fx.abs() <= self.tolerance {
                return Ok(x);
            }
            let d = self.derivative(&f, x)?;
            if d.abs() < MIN_DERIVATIVE {
                return Err(SolverError::Diverged { x });
            }
            let next = x - fx / d;
            if !next.is_finite() {
                return Err(SolverError::NonFinite { x });
            }
            x = next;
        }

        if eval(&f, x)?.abs() <= self.tolerance {
            return Ok(x);
        }
        Err(SolverError::MaxIterationsExceeded {
            iterations: self.max_iterations,
            last_x: x,
        })
    }

    /// Newton steps kept inside `[lo, hi]`. When `f(lo)` and `f(hi)` straddle
    /// zero, any step leaving the bracket (or taken from a flat point) is
    /// replaced by bisection, so flat stretches of `f` cannot stall the search.
    /// Without a sign change this is plain [`RootFinder::solve`].
    pub fn solve_bracketed<F>(
        &self,
        f: F,
        initial_guess: f64,
        lo: f64,
        hi: f64,
    ) -> Result<f64, SolverError>
    where
        F: Fn(f64) -> f64,
    {
        let (mut lo, mut hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        let mut f_lo = eval(&f, lo)?;
        let f_hi = eval(&f, hi)?;
        if f_lo.abs() <= self.tolerance {
            return Ok(lo);
        }
        if f_hi.abs() <= self.tolerance {
            return Ok(hi);
        }
        if f_lo.signum() == f_hi.signum() {
            return self.solve(f, initial_guess);
        }

        let mut x = if initial_guess.is_finite() {
            initial_guess.clamp(lo, hi)
        } else {
            0.5 * (lo + hi)
        };
        for _ in 0..self.max_iterations {
            let fx = eval(&f, x)?;
            if fx.abs() <= self.tolerance {
                return Ok(x);
            }
            if fx.signum() == f_lo.signum() {
                lo = x;
                f_lo = fx;
            } else {
                hi = x;
            }
            if hi - lo <= MIN_BRACKET_WIDTH * x.abs().max(1.0) {
                return Ok(x);
            }

            let d = self.derivative(&f, x)?;
            let newton = if d.abs() >= MIN_DERIVATIVE {
                x - fx / d
            } else {
                f64::NAN
            };
            x = if newton.is_finite() && newton > lo && newton < hi {
                newton
            } else {
                0.5 * (lo + hi)
            };
        }

        Err(SolverError::MaxIterationsExceeded {
            iterations: self.max_iterations,
            last_x: x,
        })
    }

    fn derivative<F>(&self, f: &F, x: f64) -> Result<f64, SolverError>
    where
        F: Fn(f64) -> f64,
    {
        let h = self.derivative_step;
        let d = (eval(f, x + h)? - eval(f, x - h)?) / (2.0 * h);
        if d.is_finite() {
            Ok(d)
        } else {
            Err(SolverError::NonFinite { x })
        }
    }
}

fn eval<F>(f: &F, x: f64) -> Result<f64, SolverError>
where
    F: Fn(f64) -> f64,
{
    let y = f(x);
    if y.is_finite() {
        Ok(y)
    } else {
        Err(SolverError::NonFinite { x })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, proptest};

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= 1e-6,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn newton_finds_square_root() {
        let root = RootFinder::default()
            .solve(|x| x * x - 2.0, 1.0)
            .expect("must converge");
        assert_approx(root, 2.0_f64.sqrt());
    }

    #[test]
    fn flat_function_reports_divergence() {
        let err = RootFinder::default()
            .solve(|_| 5.0, 3.0)
            .expect_err("flat function has no root");
        assert_eq!(err, SolverError::Diverged { x: 3.0 });
    }

    #[test]
    fn oscillating_newton_hits_iteration_bound() {
        // Newton on cbrt doubles |x| every step.
        let finder = RootFinder {
            max_iterations: 20,
            ..RootFinder::default()
        };
        let err = finder
            .solve(f64::cbrt, 1.0)
            .expect_err("cbrt diverges under Newton");
        assert!(matches!(
            err,
            SolverError::MaxIterationsExceeded { iterations: 20, .. }
        ));
    }

    #[test]
    fn non_finite_function_value_is_an_error() {
        let err = RootFinder::default()
            .solve(|_| f64::NAN, 1.0)
            .expect_err("nan is never a root");
        assert!(matches!(err, SolverError::NonFinite { .. }));
    }

    #[test]
    fn bracketed_search_escapes_a_flat_seed() {
        // Flat beyond 10; plain Newton from 50 would report a vanished derivative.
        let f = |x: f64| x.min(10.0) - 5.0;
        assert!(RootFinder::default().solve(f, 50.0).is_err());

        let root = RootFinder::default()
            .solve_bracketed(f, 50.0, 0.0, 100.0)
            .expect("bracket contains the root");
        assert_approx(root, 5.0);
    }

    #[test]
    fn bracketed_search_handles_kinked_functions() {
        let f = |x: f64| {
            let taxed = if x < 30.0 { 0.0 } else { 0.85 * (x - 30.0) };
            x + taxed.min(20.0) - 60.0
        };
        let root = RootFinder::default()
            .solve_bracketed(f, 0.0, 0.0, 100.0)
            .expect("must converge");
        assert!(f(root).abs() < 1e-6);
    }

    proptest! {
        #[test]
        fn prop_linear_roots_have_small_residual(
            slope in 0.1f64..10.0,
            intercept in -1_000_000.0f64..1_000_000.0,
            guess in -1_000.0f64..1_000.0
        ) {
            let f = |x: f64| slope * x + intercept;
            let root = RootFinder::default().solve(f, guess);
            prop_assert!(root.is_ok());
            let root = root.unwrap_or(f64::NAN);
            prop_assert!(f(root).abs() < 1e-6);
        }
    }
}
