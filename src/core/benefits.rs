//! Inputs the withdrawal engine consumes per year: Social Security benefits,
//! the standard-income ceiling and ages.

use super::error::PlanError;
use super::tax;
use super::types::{FilingStatus, PlanConfig};

pub trait BenefitSource {
    /// Annual Social Security benefit paid to `person` in `year`.
    fn annual_benefit(&self, person: usize, year: usize) -> f64;
}

pub trait IncomeCeiling {
    /// Gross standard income (ordinary income plus taxable benefits) allowed in `year`.
    fn standard_income_ceiling(&self, year: usize, filing_status: FilingStatus) -> f64;
}

pub trait AgeSource {
    fn age(&self, year: usize, person: usize) -> u32;
}

/// Monthly benefit paid in whole dollars.
pub fn truncate_monthly_benefit(amount: f64) -> f64 {
    amount.floor()
}

/// PIA drops to the next lower dime.
pub fn truncate_pia(amount: f64) -> f64 {
    (amount * 10.0).floor() / 10.0
}

/// AIME drops its cents, truncating toward zero.
pub fn truncate_aime(amount: f64) -> f64 {
    amount.trunc()
}

/// Benefits starting at each person's claiming age, with the PIA re-truncated
/// after every cost-of-living adjustment.
#[derive(Debug, Clone)]
pub struct ClaimSchedule {
    annual: Vec<Vec<f64>>,
}

impl ClaimSchedule {
    pub fn from_config(config: &PlanConfig) -> Self {
        let annual: Vec<Vec<f64>> = config
            .people
            .iter()
            .map(|person| {
                let claim_year = person.ss_claim_age.saturating_sub(person.start_age) as usize;
                let mut pia = truncate_pia(person.ss_monthly_benefit.max(0.0));
                (0..config.years)
                    .map(|year| {
                        if year < claim_year {
                            return 0.0;
                        }
                        if year > claim_year {
                            pia = truncate_pia(pia * (1.0 + config.ss_cola_rate));
                        }
                        12.0 * truncate_monthly_benefit(pia)
                    })
                    .collect::<Vec<f64>>()
            })
            .collect();
        Self { annual }
    }
}

impl BenefitSource for ClaimSchedule {
    fn annual_benefit(&self, person: usize, year: usize) -> f64 {
        self.annual
            .get(person)
            .and_then(|years| years.get(year))
            .copied()
            .unwrap_or(0.0)
    }
}

/// Top of a fixed target bracket, the same every year.
#[derive(Debug, Clone, Copy)]
pub struct BracketCeiling {
    rate: f64,
}

impl BracketCeiling {
    pub fn new(rate: f64) -> Result<Self, PlanError> {
        let bounded = FilingStatus::ALL
            .iter()
            .all(|&status| tax::bracket_ceiling(rate, status).is_some());
        if !bounded {
            return Err(PlanError::Configuration(format!(
                "target bracket rate {rate} has no upper bound"
            )));
        }
        Ok(Self { rate })
    }
}

impl IncomeCeiling for BracketCeiling {
    fn standard_income_ceiling(&self, _year: usize, filing_status: FilingStatus) -> f64 {
        tax::bracket_ceiling(self.rate, filing_status).unwrap_or(0.0)
    }
}

#[derive(Debug, Clone)]
pub struct StartAges {
    start_ages: Vec<u32>,
}

impl StartAges {
    pub fn from_config(config: &PlanConfig) -> Self {
        Self {
            start_ages: config.people.iter().map(|p| p.start_age).collect(),
        }
    }
}

impl AgeSource for StartAges {
    fn age(&self, year: usize, person: usize) -> u32 {
        let start = self.start_ages.get(person).copied().unwrap_or(0);
        start.saturating_add(u32::try_from(year).unwrap_or(u32::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    fn one_person(monthly: f64, start_age: u32, claim_age: u32, cola: f64) -> PlanConfig {
        let mut config = PlanConfig {
            ss_cola_rate: cola,
            years: 10,
            ..PlanConfig::default()
        };
        config.people.truncate(1);
        config.people[0].start_age = start_age;
        config.people[0].ss_monthly_benefit = monthly;
        config.people[0].ss_claim_age = claim_age;
        config
    }

    #[test]
    fn rounding_helpers_truncate() {
        assert_approx(truncate_monthly_benefit(1_234.99), 1_234.0);
        assert_approx(truncate_pia(1_234.56), 1_234.5);
        assert_approx(truncate_aime(5_678.9), 5_678.0);
        assert_approx(truncate_aime(-2.7), -2.0);
    }

    #[test]
    fn benefits_start_at_claiming_age() {
        let schedule = ClaimSchedule::from_config(&one_person(2_100.75, 65, 67, 0.0));
        assert_approx(schedule.annual_benefit(0, 0), 0.0);
        assert_approx(schedule.annual_benefit(0, 1), 0.0);
        assert_approx(schedule.annual_benefit(0, 2), 12.0 * 2_100.0);
        assert_approx(schedule.annual_benefit(0, 9), 12.0 * 2_100.0);
        assert_approx(schedule.annual_benefit(1, 2), 0.0);
    }

    #[test]
    fn cola_truncates_pia_each_year() {
        let schedule = ClaimSchedule::from_config(&one_person(1_000.0, 67, 67, 0.05));
        // 1,000 -> 1,050.0 -> 1,102.5 -> 1,157.625 (PIA 1,157.6).
        assert_approx(schedule.annual_benefit(0, 0), 12_000.0);
        assert_approx(schedule.annual_benefit(0, 1), 12.0 * 1_050.0);
        assert_approx(schedule.annual_benefit(0, 2), 12.0 * 1_102.0);
        assert_approx(schedule.annual_benefit(0, 3), 12.0 * 1_157.0);
    }

    #[test]
    fn bracket_ceiling_rejects_top_bracket() {
        assert!(BracketCeiling::new(0.37).is_err());
        let ceiling = BracketCeiling::new(0.22).expect("bounded bracket");
        assert_approx(
            ceiling.standard_income_ceiling(3, FilingStatus::Single),
            89_075.0 + 12_950.0,
        );
    }

    #[test]
    fn ages_advance_with_years() {
        let ages = StartAges::from_config(&PlanConfig::default());
        assert_eq!(ages.age(0, 0), 45);
        assert_eq!(ages.age(15, 1), 58);
    }
}
