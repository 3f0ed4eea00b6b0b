//! Per-year, per-person account tables and the withdrawal primitives that
//! mutate one `(year, person)` cell of them.
//!
//! Every primitive clamps to the available balance, never drives a balance
//! negative, and is a no-op when the balance or the requested amount is not
//! positive.

use serde::Serialize;

use super::types::MAX_PERSONS;

#[derive(Debug, Clone)]
pub struct AccountSeries {
    balance: Vec<[f64; MAX_PERSONS]>,
    withdrawn: Vec<[f64; MAX_PERSONS]>,
    total: Vec<f64>,
    total_withdrawn: Vec<f64>,
}

impl AccountSeries {
    pub fn new(years: usize) -> Self {
        Self {
            balance: vec![[0.0; MAX_PERSONS]; years],
            withdrawn: vec![[0.0; MAX_PERSONS]; years],
            total: vec![0.0; years],
            total_withdrawn: vec![0.0; years],
        }
    }

    pub fn balance(&self, year: usize, person: usize) -> f64 {
        self.balance[year][person]
    }

    pub fn withdrawn(&self, year: usize, person: usize) -> f64 {
        self.withdrawn[year][person]
    }

    pub fn total(&self, year: usize) -> f64 {
        self.total[year]
    }

    pub fn total_withdrawn(&self, year: usize) -> f64 {
        self.total_withdrawn[year]
    }

    pub fn set_balance(&mut self, year: usize, person: usize, amount: f64) {
        self.balance[year][person] = amount.max(0.0);
        self.refresh_total(year);
    }

    pub fn deposit(&mut self, year: usize, person: usize, amount: f64) {
        if amount > 0.0 {
            self.balance[year][person] += amount;
            self.refresh_total(year);
        }
    }

    /// Opens `year` with last year's closing balances grown by `growth`.
    pub fn carry_forward(&mut self, year: usize, growth: f64) {
        if year == 0 {
            return;
        }
        let previous = self.balance[year - 1];
        for (slot, prior) in self.balance[year].iter_mut().zip(previous) {
            *slot = (prior * (1.0 + growth)).max(0.0);
        }
        self.withdrawn[year] = [0.0; MAX_PERSONS];
        self.refresh_total(year);
    }

    /// Recomputes the year aggregates from the per-person cells.
    pub fn finalize_year(&mut self, year: usize) {
        self.refresh_total(year);
        self.total_withdrawn[year] = self.withdrawn[year].iter().sum();
    }

    fn refresh_total(&mut self, year: usize) {
        self.total[year] = self.balance[year].iter().sum();
    }

    /// Removes up to `amount` without recording it as cash withdrawn.
    fn remove(&mut self, year: usize, person: usize, amount: f64) -> f64 {
        let available = self.balance[year][person].max(0.0);
        let taken = amount.max(0.0).min(available);
        if taken > 0.0 {
            self.balance[year][person] = available - taken;
            self.refresh_total(year);
        }
        taken
    }

    fn take(&mut self, year: usize, person: usize, amount: f64) -> f64 {
        let taken = self.remove(year, person, amount);
        if taken > 0.0 {
            self.withdrawn[year][person] += taken;
            self.total_withdrawn[year] += taken;
        }
        taken
    }
}

/// One pre-tax to Roth conversion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloverEntry {
    pub amount: f64,
    pub age: u32,
    pub person: usize,
    pub year: usize,
}

#[derive(Debug, Clone)]
pub struct RothAccount {
    pub series: AccountSeries,
    pub rollovers: Vec<RolloverEntry>,
}

impl RothAccount {
    pub fn new(years: usize) -> Self {
        Self {
            series: AccountSeries::new(years),
            rollovers: Vec::new(),
        }
    }

    pub fn rolled_in(&self, year: usize) -> f64 {
        self.rollovers
            .iter()
            .filter(|entry| entry.year == year)
            .map(|entry| entry.amount)
            .sum()
    }
}

#[derive(Debug, Clone)]
pub struct IncomeSeries {
    total_standard: Vec<f64>,
    total: Vec<f64>,
    max_standard: Vec<f64>,
}

impl IncomeSeries {
    pub fn new(years: usize) -> Self {
        Self {
            total_standard: vec![0.0; years],
            total: vec![0.0; years],
            max_standard: vec![0.0; years],
        }
    }

    pub fn total_standard(&self, year: usize) -> f64 {
        self.total_standard[year]
    }

    pub fn total(&self, year: usize) -> f64 {
        self.total[year]
    }

    pub fn max_standard(&self, year: usize) -> f64 {
        self.max_standard[year]
    }

    /// Ordinary income that still fits under the ceiling. Negative once a
    /// forced withdrawal has pushed past it.
    pub fn room(&self, year: usize) -> f64 {
        self.max_standard[year] - self.total_standard[year]
    }

    pub fn set_max_standard(&mut self, year: usize, amount: f64) {
        self.max_standard[year] = amount;
    }

    pub fn add_standard(&mut self, year: usize, amount: f64) {
        self.total_standard[year] += amount;
        self.total[year] += amount;
    }

    pub fn add_capital_gains(&mut self, year: usize, amount: f64) {
        self.total[year] += amount;
    }
}

/// All tables for one simulated household, allocated for the whole horizon.
#[derive(Debug, Clone)]
pub struct Timeline {
    pub years: usize,
    pub persons: usize,
    pub taxable: AccountSeries,
    pub roth: RothAccount,
    pub pretax: AccountSeries,
    pub pretax_457b: AccountSeries,
    pub income: IncomeSeries,
    pub total_cash: Vec<f64>,
    pub penalties: Vec<f64>,
    pub social_security: Vec<f64>,
}

impl Timeline {
    pub fn new(years: usize, persons: usize) -> Self {
        Self {
            years,
            persons: persons.min(MAX_PERSONS),
            taxable: AccountSeries::new(years),
            roth: RothAccount::new(years),
            pretax: AccountSeries::new(years),
            pretax_457b: AccountSeries::new(years),
            income: IncomeSeries::new(years),
            total_cash: vec![0.0; years],
            penalties: vec![0.0; years],
            social_security: vec![0.0; years],
        }
    }

    pub fn carry_forward(&mut self, year: usize, growth: f64) {
        self.taxable.carry_forward(year, growth);
        self.roth.series.carry_forward(year, growth);
        self.pretax.carry_forward(year, growth);
        self.pretax_457b.carry_forward(year, growth);
    }

    pub fn finalize_year(&mut self, year: usize) {
        self.taxable.finalize_year(year);
        self.roth.series.finalize_year(year);
        self.pretax.finalize_year(year);
        self.pretax_457b.finalize_year(year);
    }

    pub fn total_balance(&self, year: usize) -> f64 {
        self.taxable.total(year)
            + self.roth.series.total(year)
            + self.pretax.total(year)
            + self.pretax_457b.total(year)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PenaltyRules {
    pub exempt_age: u32,
    pub rate: f64,
}

impl Default for PenaltyRules {
    fn default() -> Self {
        Self {
            exempt_age: 60,
            rate: 0.10,
        }
    }
}

impl PenaltyRules {
    pub fn applies(&self, age: u32) -> bool {
        age < self.exempt_age
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Withdrawal {
    pub amount: f64,
    pub penalty: f64,
}

pub fn withdraw_taxable(timeline: &mut Timeline, year: usize, person: usize, amount: f64) -> f64 {
    let taken = timeline.taxable.take(year, person, amount);
    timeline.total_cash[year] += taken;
    taken
}

/// Deferred compensation: ordinary income, never penalised.
pub fn withdraw_pretax_457b(timeline: &mut Timeline, year: usize, person: usize, room: f64) -> f64 {
    if room <= 0.0 {
        return 0.0;
    }
    let taken = timeline.pretax_457b.take(year, person, room);
    timeline.total_cash[year] += taken;
    timeline.income.add_standard(year, taken);
    taken
}

/// Fills `room` from the pre-tax account. Before the exempt age the amount is
/// converted to Roth and recorded in the rollover ledger instead of paid out.
/// Taxable as ordinary income either way.
pub fn withdraw_pretax(
    timeline: &mut Timeline,
    rules: &PenaltyRules,
    year: usize,
    person: usize,
    room: f64,
    age: u32,
) -> f64 {
    if room <= 0.0 {
        return 0.0;
    }

    let taken = if rules.applies(age) {
        let moved = timeline.pretax.remove(year, person, room);
        if moved > 0.0 {
            timeline.roth.series.deposit(year, person, moved);
            timeline.roth.rollovers.push(RolloverEntry {
                amount: moved,
                age,
                person,
                year,
            });
        }
        moved
    } else {
        let cash = timeline.pretax.take(year, person, room);
        timeline.total_cash[year] += cash;
        cash
    };
    timeline.income.add_standard(year, taken);
    taken
}

/// Cash withdrawal of up to `step`, penalised before the exempt age. With
/// `execute == false` nothing is mutated and the would-be result is returned.
pub fn withdraw_pretax_stepped(
    timeline: &mut Timeline,
    rules: &PenaltyRules,
    year: usize,
    person: usize,
    step: f64,
    age: u32,
    execute: bool,
) -> Withdrawal {
    let rate = if rules.applies(age) { rules.rate } else { 0.0 };
    stepped(timeline, pretax_series, year, person, step, rate, execute)
}

/// Stepped counterpart for deferred compensation; never penalised.
pub fn withdraw_pretax_457b_stepped(
    timeline: &mut Timeline,
    year: usize,
    person: usize,
    step: f64,
    execute: bool,
) -> Withdrawal {
    stepped(timeline, pretax_457b_series, year, person, step, 0.0, execute)
}

fn pretax_series(timeline: &mut Timeline) -> &mut AccountSeries {
    &mut timeline.pretax
}

fn pretax_457b_series(timeline: &mut Timeline) -> &mut AccountSeries {
    &mut timeline.pretax_457b
}

fn stepped(
    timeline: &mut Timeline,
    account: fn(&mut Timeline) -> &mut AccountSeries,
    year: usize,
    person: usize,
    step: f64,
    rate: f64,
    execute: bool,
) -> Withdrawal {
    let available = account(timeline).balance(year, person).max(0.0);
    let amount = step.max(0.0).min(available);
    let probe = Withdrawal {
        amount,
        penalty: amount * rate,
    };
    if !execute || amount <= 0.0 {
        return probe;
    }

    let taken = account(timeline).take(year, person, amount);
    timeline.total_cash[year] += taken;
    timeline.income.add_standard(year, taken);
    timeline.penalties[year] += probe.penalty;
    probe
}

/// Early Roth access with the penalty rounded to the cent. Conversion
/// seasoning is not checked. No-op at or above the exempt age.
pub fn withdraw_roth_with_penalty(
    timeline: &mut Timeline,
    rules: &PenaltyRules,
    year: usize,
    person: usize,
    need: f64,
    age: u32,
) -> Withdrawal {
    if !rules.applies(age) || need <= 0.0 {
        return Withdrawal::default();
    }
    let amount = timeline.roth.series.take(year, person, need);
    let penalty = (amount * rules.rate * 100.0).round() / 100.0;
    timeline.total_cash[year] += amount;
    timeline.penalties[year] += penalty;
    Withdrawal { amount, penalty }
}

/// Penalty-free Roth access at or above the exempt age. No-op below it.
pub fn withdraw_roth(
    timeline: &mut Timeline,
    rules: &PenaltyRules,
    year: usize,
    person: usize,
    need: f64,
    age: u32,
) -> f64 {
    if rules.applies(age) || need <= 0.0 {
        return 0.0;
    }
    let amount = timeline.roth.series.take(year, person, need);
    timeline.total_cash[year] += amount;
    amount
}
