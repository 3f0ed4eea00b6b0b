use tracing::info;

use super::accounts::Timeline;
use super::benefits::{
    AgeSource, BenefitSource, BracketCeiling, ClaimSchedule, IncomeCeiling, StartAges,
};
use super::error::PlanError;
use super::orchestrator::{CASH_EPS, WithdrawalOrchestrator, YearRequest};
use super::tax;
use super::types::{PlanConfig, PlanResult, YearResult};

/// Runs the plan with the built-in collaborators: a claiming-age benefit
/// schedule, the target bracket as the income ceiling and ages counted from
/// each person's start age.
pub fn run_plan(config: &PlanConfig) -> Result<PlanResult, PlanError> {
    config.validate()?;
    let benefits = ClaimSchedule::from_config(config);
    let ceiling = BracketCeiling::new(config.target_bracket_rate)?;
    let ages = StartAges::from_config(config);
    simulate(config, &benefits, &ceiling, &ages)
}

/// Year-by-year driver. Taxes and penalties of one year are paid from the
/// next year's withdrawals; surplus cash is reinvested in the first person's
/// taxable account. A shortfall is recorded and the simulation continues.
pub fn simulate(
    config: &PlanConfig,
    benefits: &dyn BenefitSource,
    ceiling: &dyn IncomeCeiling,
    ages: &dyn AgeSource,
) -> Result<PlanResult, PlanError> {
    config.validate()?;
    info!(
        years = config.years,
        persons = config.persons(),
        strategy = ?config.strategy,
        filing_status = %config.filing_status,
        "running drawdown plan"
    );

    let mut timeline = Timeline::new(config.years, config.persons());
    for (person, p) in config.people.iter().enumerate() {
        timeline.taxable.set_balance(0, person, p.taxable_start);
        timeline.roth.series.set_balance(0, person, p.roth_start);
        timeline.pretax.set_balance(0, person, p.pretax_start);
        timeline.pretax_457b.set_balance(0, person, p.pretax_457b_start);
    }

    let orchestrator = WithdrawalOrchestrator::new(config, benefits, ceiling, ages);
    let mut years = Vec::with_capacity(config.years);
    let mut first_shortfall_year = None;
    let mut tax_in_arrears = 0.0;

    for year in 0..config.years {
        timeline.carry_forward(year, config.investment_return);
        if config.other_ordinary_income > 0.0 {
            timeline.income.add_standard(year, config.other_ordinary_income);
            timeline.total_cash[year] += config.other_ordinary_income;
        }

        let cash_needed = config.annual_spending + tax_in_arrears;
        let request = YearRequest { year, cash_needed };
        let outcome = orchestrator.run_year(&mut timeline, request)?;

        let capital_gains =
            timeline.taxable.total_withdrawn(year) * config.taxable_gain_fraction;
        timeline.income.add_capital_gains(year, capital_gains);

        let ordinary = timeline.income.total_standard(year);
        let taxable_social_security = tax::taxable_social_security(
            ordinary + capital_gains,
            outcome.social_security,
            config.filing_status,
        );
        let due = tax::tax_due(
            ordinary + taxable_social_security,
            capital_gains,
            config.filing_status,
        );
        tax_in_arrears = due.total() + outcome.penalties;

        let surplus = outcome.total_cash - cash_needed;
        if surplus > CASH_EPS {
            timeline.taxable.deposit(year, 0, surplus);
        }

        if outcome.shortfall > 0.0 && first_shortfall_year.is_none() {
            first_shortfall_year = Some(year);
        }

        years.push(YearResult {
            year,
            ages: (0..timeline.persons).map(|p| ages.age(year, p)).collect(),
            cash_needed,
            total_cash: outcome.total_cash,
            shortfall: outcome.shortfall,
            social_security: outcome.social_security,
            taxable_social_security,
            withdrawn_taxable: timeline.taxable.total_withdrawn(year),
            withdrawn_roth: timeline.roth.series.total_withdrawn(year),
            withdrawn_pretax: timeline.pretax.total_withdrawn(year),
            withdrawn_457b: timeline.pretax_457b.total_withdrawn(year),
            rolled_to_roth: timeline.roth.rolled_in(year),
            total_standard: ordinary,
            max_standard: outcome.max_standard,
            total_income: timeline.income.total(year),
            capital_gains,
            capital_gains_capacity: outcome.capital_gains_capacity,
            ordinary_tax: due.ordinary,
            capital_gains_tax: due.capital_gains,
            penalties: outcome.penalties,
            end_taxable: timeline.taxable.total(year),
            end_roth: timeline.roth.series.total(year),
            end_pretax: timeline.pretax.total(year),
            end_457b: timeline.pretax_457b.total(year),
            end_total: timeline.total_balance(year),
        });
    }

    info!(
        years = years.len(),
        first_shortfall_year = ?first_shortfall_year,
        conversions = timeline.roth.rollovers.len(),
        "drawdown plan finished"
    );

    Ok(PlanResult {
        years,
        first_shortfall_year,
        rollovers: timeline.roth.rollovers,
    })
}
