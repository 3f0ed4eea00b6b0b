use tracing::{debug, warn};

use super::accounts::{
    PenaltyRules, Timeline, withdraw_pretax, withdraw_pretax_457b, withdraw_pretax_457b_stepped,
    withdraw_pretax_stepped, withdraw_roth, withdraw_roth_with_penalty, withdraw_taxable,
};
use super::benefits::{AgeSource, BenefitSource, IncomeCeiling};
use super::error::PlanError;
use super::tax;
use super::target::TargetIncomeSolver;
use super::types::{PlanConfig, WithdrawalStrategy};

/// Cash difference treated as zero.
pub const CASH_EPS: f64 = 1e-6;

const STEP_SEARCH_ITERATIONS: u32 = 200;
const STEP_SEARCH_TOLERANCE: f64 = 1e-9;
const GAIN_ESTIMATE_ITERATIONS: u32 = 64;
const GAIN_ESTIMATE_TOLERANCE: f64 = 1e-9;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum YearPhase {
    Initial,
    DrainOrdered,
    SteppedSearch,
    SingleAccountRemainder,
    Done,
}

#[derive(Copy, Clone, Debug)]
pub struct YearRequest {
    pub year: usize,
    pub cash_needed: f64,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct YearOutcome {
    pub cash_needed: f64,
    pub total_cash: f64,
    pub shortfall: f64,
    pub social_security: f64,
    pub penalties: f64,
    pub max_standard: f64,
    /// Long-term gains that would still be taxed at 0% with no ordinary income.
    pub capital_gains_capacity: f64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum PreTaxKind {
    PreTax,
    Deferred457b,
}

#[derive(Copy, Clone, Debug)]
struct StepSource {
    kind: PreTaxKind,
    person: usize,
    age: u32,
}

#[derive(Copy, Clone, Debug, Default)]
struct Progress {
    drained: bool,
    stepped: bool,
}

/// Decides, for one year, how much each account contributes to the cash need.
pub struct WithdrawalOrchestrator<'a> {
    config: &'a PlanConfig,
    target: TargetIncomeSolver,
    rules: PenaltyRules,
    benefits: &'a dyn BenefitSource,
    ceiling: &'a dyn IncomeCeiling,
    ages: &'a dyn AgeSource,
}

impl<'a> WithdrawalOrchestrator<'a> {
    pub fn new(
        config: &'a PlanConfig,
        benefits: &'a dyn BenefitSource,
        ceiling: &'a dyn IncomeCeiling,
        ages: &'a dyn AgeSource,
    ) -> Self {
        Self {
            config,
            target: TargetIncomeSolver::default(),
            rules: PenaltyRules {
                exempt_age: config.penalty_exempt_age,
                rate: config.early_withdrawal_penalty_rate,
            },
            benefits,
            ceiling,
            ages,
        }
    }

    pub fn run_year(
        &self,
        timeline: &mut Timeline,
        request: YearRequest,
    ) -> Result<YearOutcome, PlanError> {
        let year = request.year;
        let mut phase = YearPhase::Initial;
        let mut progress = Progress::default();
        let mut capital_gains_capacity = 0.0;

        loop {
            debug!(year, ?phase, total_cash = timeline.total_cash[year], "withdrawal phase");
            phase = match phase {
                YearPhase::Initial => {
                    capital_gains_capacity = self.initial(timeline, year)?;
                    self.next_phase(phase, progress, remaining(timeline, request))
                }
                YearPhase::DrainOrdered => {
                    self.drain_ordered(timeline, request)?;
                    progress.drained = true;
                    self.next_phase(phase, progress, remaining(timeline, request))
                }
                YearPhase::SteppedSearch => {
                    progress.stepped = true;
                    if self.stepped_search(timeline, request) {
                        YearPhase::SingleAccountRemainder
                    } else {
                        self.next_phase(phase, progress, remaining(timeline, request))
                    }
                }
                YearPhase::SingleAccountRemainder => {
                    self.single_account_remainder(timeline, request);
                    self.next_phase(phase, progress, remaining(timeline, request))
                }
                YearPhase::Done => break,
            };
        }

        Ok(self.finish(timeline, request, capital_gains_capacity))
    }

    fn next_phase(&self, from: YearPhase, progress: Progress, remaining: f64) -> YearPhase {
        let need_left = remaining > CASH_EPS;
        match self.config.strategy {
            WithdrawalStrategy::TaxEfficient => match from {
                // Room fillers run even when benefits already cover the need,
                // so early conversions still happen.
                YearPhase::Initial => YearPhase::DrainOrdered,
                _ if need_left && !progress.stepped => YearPhase::SteppedSearch,
                _ => YearPhase::Done,
            },
            WithdrawalStrategy::ProportionalPreTax => match from {
                YearPhase::Initial if need_left => YearPhase::SteppedSearch,
                _ if !progress.drained => YearPhase::DrainOrdered,
                _ => YearPhase::Done,
            },
        }
    }

    /// Adds benefits to cash and sets the year's ordinary-income ceiling.
    /// Returns the 0% capital gains capacity.
    fn initial(&self, timeline: &mut Timeline, year: usize) -> Result<f64, PlanError> {
        let filing_status = self.config.filing_status;
        let social_security: f64 = (0..timeline.persons)
            .map(|person| self.benefits.annual_benefit(person, year).max(0.0))
            .sum();
        timeline.social_security[year] = social_security;
        timeline.total_cash[year] += social_security;

        let gains_so_far = timeline.income.total(year) - timeline.income.total_standard(year);
        let max_standard = self.solve_max_standard(timeline, year, gains_so_far)?;
        timeline.income.set_max_standard(year, max_standard);

        let capacity = self
            .target
            .max_capital_gains(
                social_security,
                tax::capital_gains_zero_rate_ceiling(filing_status),
                filing_status,
            )
            .map_err(|source| PlanError::Convergence { year, source })?;

        debug!(
            year,
            social_security,
            max_standard,
            capital_gains_capacity = capacity,
            "income ceiling resolved"
        );
        Ok(capacity)
    }

    /// Highest standard income for `year` once `gains` of long-term gains are
    /// realised alongside it.
    fn solve_max_standard(
        &self,
        timeline: &Timeline,
        year: usize,
        gains: f64,
    ) -> Result<f64, PlanError> {
        let filing_status = self.config.filing_status;
        let ceiling = self.ceiling.standard_income_ceiling(year, filing_status);
        let non_adjustable = timeline.income.total_standard(year);
        let additional = self
            .target
            .max_additional_ordinary_income(
                non_adjustable,
                gains,
                timeline.social_security[year],
                ceiling,
                filing_status,
            )
            .map_err(|source| PlanError::Convergence { year, source })?;
        Ok(non_adjustable + additional)
    }

    fn filler_order(&self) -> [PreTaxKind; 2] {
        if self.config.withdraw_457b_first {
            [PreTaxKind::Deferred457b, PreTaxKind::PreTax]
        } else {
            [PreTaxKind::PreTax, PreTaxKind::Deferred457b]
        }
    }

    /// Cash the room fillers would raise given `room` and `need`, without
    /// touching the timeline. Conversions use up room but raise no cash.
    fn filler_cash(&self, timeline: &Timeline, year: usize, mut room: f64, mut need: f64) -> f64 {
        let mut cash = 0.0;
        for kind in self.filler_order() {
            for person in 0..timeline.persons {
                if room <= 0.0 {
                    break;
                }
                let age = self.ages.age(year, person);
                let (balance, converts) = match kind {
                    PreTaxKind::Deferred457b => (timeline.pretax_457b.balance(year, person), false),
                    PreTaxKind::PreTax => {
                        (timeline.pretax.balance(year, person), self.rules.applies(age))
                    }
                };
                let drawn = if converts {
                    balance.min(room)
                } else if need > CASH_EPS {
                    balance.min(room).min(need)
                } else {
                    0.0
                };
                room -= drawn;
                if !converts {
                    cash += drawn;
                    need -= drawn;
                }
            }
        }
        cash
    }

    /// Gains the taxable draw will realise after the room fillers have run.
    /// Iterates down from the largest possible taxable draw; every iterate
    /// stays at or above the gains actually realised.
    fn expected_taxable_gains(
        &self,
        timeline: &Timeline,
        request: YearRequest,
    ) -> Result<f64, PlanError> {
        let year = request.year;
        let need = remaining(timeline, request).max(0.0);
        let taxable = timeline.taxable.total(year);
        let fraction = self.config.taxable_gain_fraction;
        let gains_after = |filler_cash: f64| fraction * taxable.min((need - filler_cash).max(0.0));

        let mut gains = gains_after(0.0);
        for _ in 0..GAIN_ESTIMATE_ITERATIONS {
            let room = self.solve_max_standard(timeline, year, gains)?
                - timeline.income.total_standard(year);
            let next = gains_after(self.filler_cash(timeline, year, room, need)).min(gains);
            let settled = gains - next <= GAIN_ESTIMATE_TOLERANCE;
            gains = next;
            if settled {
                break;
            }
        }
        Ok(gains)
    }

    fn fill_room(&self, timeline: &mut Timeline, request: YearRequest) {
        let year = request.year;
        for kind in self.filler_order() {
            for person in 0..timeline.persons {
                let room = timeline.income.room(year);
                if room <= 0.0 {
                    break;
                }
                let need = remaining(timeline, request);
                let age = self.ages.age(year, person);
                match kind {
                    PreTaxKind::Deferred457b if need > CASH_EPS => {
                        withdraw_pretax_457b(timeline, year, person, room.min(need));
                    }
                    // Conversions fill the whole room regardless of the cash need.
                    PreTaxKind::PreTax if self.rules.applies(age) => {
                        withdraw_pretax(timeline, &self.rules, year, person, room, age);
                    }
                    PreTaxKind::PreTax if need > CASH_EPS => {
                        withdraw_pretax(timeline, &self.rules, year, person, room.min(need), age);
                    }
                    _ => {}
                }
            }
        }
    }

    /// Room fillers, then taxable, then Roth. With benefits in play the room
    /// is sized for the gains the taxable draw will realise.
    fn drain_ordered(
        &self,
        timeline: &mut Timeline,
        request: YearRequest,
    ) -> Result<(), PlanError> {
        let year = request.year;
        let gains_matter = timeline.social_security[year] > 0.0
            && timeline.income.room(year) > 0.0
            && timeline.taxable.total(year) > 0.0
            && self.config.taxable_gain_fraction > 0.0;

        if gains_matter {
            let gains = self.expected_taxable_gains(timeline, request)?;
            let max_standard = self.solve_max_standard(timeline, year, gains)?;
            timeline.income.set_max_standard(year, max_standard);
            debug!(year, expected_gains = gains, max_standard, "room sized for taxable gains");
        }

        self.fill_room(timeline, request);

        for person in 0..timeline.persons {
            let need = remaining(timeline, request);
            if need <= CASH_EPS {
                break;
            }
            withdraw_taxable(timeline, year, person, need);
        }

        for person in 0..timeline.persons {
            let need = remaining(timeline, request);
            if need <= CASH_EPS {
                break;
            }
            let age = self.ages.age(year, person);
            if self.rules.applies(age) {
                withdraw_roth_with_penalty(timeline, &self.rules, year, person, need, age);
            } else {
                withdraw_roth(timeline, &self.rules, year, person, need, age);
            }
        }
        Ok(())
    }

    fn active_sources(&self, timeline: &Timeline, year: usize) -> Vec<StepSource> {
        let mut sources = Vec::with_capacity(2 * timeline.persons);
        for kind in [PreTaxKind::PreTax, PreTaxKind::Deferred457b] {
            for person in 0..timeline.persons {
                let balance = match kind {
                    PreTaxKind::PreTax => timeline.pretax.balance(year, person),
                    PreTaxKind::Deferred457b => timeline.pretax_457b.balance(year, person),
                };
                if balance > CASH_EPS {
                    sources.push(StepSource {
                        kind,
                        person,
                        age: self.ages.age(year, person),
                    });
                }
            }
        }
        sources
    }

    fn step(
        &self,
        timeline: &mut Timeline,
        year: usize,
        source: StepSource,
        step: f64,
        execute: bool,
    ) -> f64 {
        match source.kind {
            PreTaxKind::PreTax => withdraw_pretax_stepped(
                timeline,
                &self.rules,
                year,
                source.person,
                step,
                source.age,
                execute,
            ),
            PreTaxKind::Deferred457b => {
                withdraw_pretax_457b_stepped(timeline, year, source.person, step, execute)
            }
        }
        .amount
    }

    fn probe(
        &self,
        timeline: &mut Timeline,
        year: usize,
        sources: &[StepSource],
        step: f64,
    ) -> f64 {
        sources
            .iter()
            .map(|&source| self.step(timeline, year, source, step, false))
            .sum()
    }

    /// Draws every funded pre-tax account by one shared step. The step is
    /// bisected over `[0, largest balance]` with dry-run probes and committed
    /// at the lower bound, so the need is never overshot. Returns `true` when
    /// a single funded account is left to cover what remains.
    fn stepped_search(&self, timeline: &mut Timeline, request: YearRequest) -> bool {
        let year = request.year;
        let need = remaining(timeline, request);
        let sources = self.active_sources(timeline, year);
        if need <= CASH_EPS || sources.is_empty() {
            return false;
        }
        if sources.len() == 1 {
            return true;
        }

        let max_balance = sources
            .iter()
            .map(|source| match source.kind {
                PreTaxKind::PreTax => timeline.pretax.balance(year, source.person),
                PreTaxKind::Deferred457b => timeline.pretax_457b.balance(year, source.person),
            })
            .fold(0.0, f64::max);

        let step = if self.probe(timeline, year, &sources, max_balance) <= need {
            max_balance
        } else {
            let (mut lo, mut hi) = (0.0, max_balance);
            for _ in 0..STEP_SEARCH_ITERATIONS {
                let mid = 0.5 * (lo + hi);
                if self.probe(timeline, year, &sources, mid) <= need {
                    lo = mid;
                } else {
                    hi = mid;
                }
                let short_by = need - self.probe(timeline, year, &sources, lo);
                if short_by <= STEP_SEARCH_TOLERANCE || hi - lo <= f64::EPSILON * max_balance {
                    break;
                }
            }
            lo
        };

        debug!(year, step, need, accounts = sources.len(), "stepped withdrawal");
        for &source in &sources {
            self.step(timeline, year, source, step, true);
        }

        remaining(timeline, request) > CASH_EPS && self.active_sources(timeline, year).len() == 1
    }

    fn single_account_remainder(&self, timeline: &mut Timeline, request: YearRequest) {
        let year = request.year;
        let need = remaining(timeline, request);
        if need <= CASH_EPS {
            return;
        }
        if let Some(&source) = self.active_sources(timeline, year).first() {
            // Clamped to the balance inside the stepped primitive.
            self.step(timeline, year, source, need, true);
        }
    }

    fn finish(
        &self,
        timeline: &mut Timeline,
        request: YearRequest,
        capital_gains_capacity: f64,
    ) -> YearOutcome {
        let year = request.year;
        timeline.finalize_year(year);

        let total_cash = timeline.total_cash[year];
        let mut shortfall = request.cash_needed - total_cash;
        if shortfall <= CASH_EPS {
            shortfall = 0.0;
        } else {
            warn!(
                year,
                cash_needed = request.cash_needed,
                total_cash,
                shortfall,
                "insufficient funds to meet cash need"
            );
        }

        YearOutcome {
            cash_needed: request.cash_needed,
            total_cash,
            shortfall,
            social_security: timeline.social_security[year],
            penalties: timeline.penalties[year],
            max_standard: timeline.income.max_standard(year),
            capital_gains_capacity,
        }
    }
}

fn remaining(timeline: &Timeline, request: YearRequest) -> f64 {
    request.cash_needed - timeline.total_cash[request.year]
}
