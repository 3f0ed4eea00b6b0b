use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::accounts::RolloverEntry;
use super::error::PlanError;
use super::tax;

pub const MAX_PERSONS: usize = 2;

/// Longest plan horizon accepted, in years.
pub const MAX_YEARS: usize = 120;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilingStatus {
    Single,
    MarriedFilingJointly,
    MarriedFilingSeparately,
    HeadOfHousehold,
}

impl FilingStatus {
    pub const ALL: [FilingStatus; 4] = [
        FilingStatus::Single,
        FilingStatus::MarriedFilingJointly,
        FilingStatus::MarriedFilingSeparately,
        FilingStatus::HeadOfHousehold,
    ];
}

impl fmt::Display for FilingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FilingStatus::Single => "single",
            FilingStatus::MarriedFilingJointly => "married-filing-jointly",
            FilingStatus::MarriedFilingSeparately => "married-filing-separately",
            FilingStatus::HeadOfHousehold => "head-of-household",
        };
        f.write_str(label)
    }
}

impl FromStr for FilingStatus {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        match normalized.as_str() {
            "single" | "s" => Ok(FilingStatus::Single),
            "married-filing-jointly" | "mfj" | "joint" => Ok(FilingStatus::MarriedFilingJointly),
            "married-filing-separately" | "mfs" => Ok(FilingStatus::MarriedFilingSeparately),
            "head-of-household" | "hoh" => Ok(FilingStatus::HeadOfHousehold),
            _ => Err(PlanError::Configuration(format!(
                "unknown filing status '{s}'"
            ))),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WithdrawalStrategy {
    /// Fill the ordinary-income room from deferred accounts, then taxable, then Roth,
    /// and only then draw pre-tax balances above the ceiling.
    TaxEfficient,
    /// Draw all pre-tax balances down together by a shared step before anything else.
    ProportionalPreTax,
}

#[derive(Debug, Clone)]
pub struct PersonConfig {
    pub start_age: u32,
    pub taxable_start: f64,
    pub roth_start: f64,
    pub pretax_start: f64,
    pub pretax_457b_start: f64,
    /// Monthly benefit at the claiming age, before any COLA.
    pub ss_monthly_benefit: f64,
    pub ss_claim_age: u32,
}

#[derive(Debug, Clone)]
pub struct PlanConfig {
    pub filing_status: FilingStatus,
    pub strategy: WithdrawalStrategy,
    pub withdraw_457b_first: bool,
    pub penalty_exempt_age: u32,
    pub early_withdrawal_penalty_rate: f64,
    pub target_bracket_rate: f64,
    pub annual_spending: f64,
    pub other_ordinary_income: f64,
    pub investment_return: f64,
    pub taxable_gain_fraction: f64,
    pub ss_cola_rate: f64,
    pub years: usize,
    pub people: Vec<PersonConfig>,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            filing_status: FilingStatus::MarriedFilingJointly,
            strategy: WithdrawalStrategy::TaxEfficient,
            withdraw_457b_first: true,
            penalty_exempt_age: 60,
            early_withdrawal_penalty_rate: 0.10,
            target_bracket_rate: 0.12,
            annual_spending: 60_000.0,
            other_ordinary_income: 0.0,
            investment_return: 0.04,
            taxable_gain_fraction: 0.5,
            ss_cola_rate: 0.0,
            years: 40,
            people: vec![
                PersonConfig {
                    start_age: 45,
                    taxable_start: 300_000.0,
                    roth_start: 80_000.0,
                    pretax_start: 400_000.0,
                    pretax_457b_start: 0.0,
                    ss_monthly_benefit: 2_100.0,
                    ss_claim_age: 67,
                },
                PersonConfig {
                    start_age: 43,
                    taxable_start: 0.0,
                    roth_start: 40_000.0,
                    pretax_start: 150_000.0,
                    pretax_457b_start: 120_000.0,
                    ss_monthly_benefit: 1_400.0,
                    ss_claim_age: 67,
                },
            ],
        }
    }
}

impl PlanConfig {
    pub fn persons(&self) -> usize {
        self.people.len()
    }

    pub fn validate(&self) -> Result<(), PlanError> {
        let fail = |msg: String| Err(PlanError::Configuration(msg));

        if self.people.is_empty() || self.people.len() > MAX_PERSONS {
            return fail(format!(
                "household must have 1 or {MAX_PERSONS} people, got {}",
                self.people.len()
            ));
        }
        if self.years == 0 || self.years > MAX_YEARS {
            return fail(format!("years must be between 1 and {MAX_YEARS}, got {}", self.years));
        }
        if !(0.0..=1.0).contains(&self.early_withdrawal_penalty_rate) {
            return fail("early_withdrawal_penalty_rate must be between 0 and 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.taxable_gain_fraction) {
            return fail("taxable_gain_fraction must be between 0 and 1".to_string());
        }
        if !self.investment_return.is_finite() || self.investment_return <= -1.0 {
            return fail("investment_return must be > -1".to_string());
        }
        if !self.ss_cola_rate.is_finite() || self.ss_cola_rate <= -1.0 {
            return fail("ss_cola_rate must be > -1".to_string());
        }
        if !self.annual_spending.is_finite() || self.annual_spending < 0.0 {
            return fail("annual_spending must be >= 0".to_string());
        }
        if !self.other_ordinary_income.is_finite() || self.other_ordinary_income < 0.0 {
            return fail("other_ordinary_income must be >= 0".to_string());
        }
        if tax::bracket_ceiling(self.target_bracket_rate, self.filing_status).is_none() {
            return fail(format!(
                "target_bracket_rate {} is not a bounded {} bracket",
                self.target_bracket_rate, self.filing_status
            ));
        }

        for (idx, person) in self.people.iter().enumerate() {
            for (name, value) in [
                ("taxable_start", person.taxable_start),
                ("roth_start", person.roth_start),
                ("pretax_start", person.pretax_start),
                ("pretax_457b_start", person.pretax_457b_start),
                ("ss_monthly_benefit", person.ss_monthly_benefit),
            ] {
                if !value.is_finite() || value < 0.0 {
                    return fail(format!("people[{idx}].{name} must be >= 0"));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearResult {
    pub year: usize,
    pub ages: Vec<u32>,
    pub cash_needed: f64,
    pub total_cash: f64,
    pub shortfall: f64,
    pub social_security: f64,
    pub taxable_social_security: f64,
    pub withdrawn_taxable: f64,
    pub withdrawn_roth: f64,
    pub withdrawn_pretax: f64,
    pub withdrawn_457b: f64,
    pub rolled_to_roth: f64,
    pub total_standard: f64,
    pub max_standard: f64,
    pub total_income: f64,
    pub capital_gains: f64,
    pub capital_gains_capacity: f64,
    pub ordinary_tax: f64,
    pub capital_gains_tax: f64,
    pub penalties: f64,
    pub end_taxable: f64,
    pub end_roth: f64,
    pub end_pretax: f64,
    pub end_457b: f64,
    pub end_total: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanResult {
    pub years: Vec<YearResult>,
    pub first_shortfall_year: Option<usize>,
    pub rollovers: Vec<RolloverEntry>,
}
