mod accounts;
mod benefits;
mod engine;
mod error;
mod orchestrator;
mod solver;
mod target;
pub mod tax;
mod types;

pub use accounts::{
    AccountSeries, IncomeSeries, PenaltyRules, RolloverEntry, RothAccount, Timeline, Withdrawal,
    withdraw_pretax, withdraw_pretax_457b, withdraw_pretax_457b_stepped, withdraw_pretax_stepped,
    withdraw_roth, withdraw_roth_with_penalty, withdraw_taxable,
};
pub use benefits::{
    AgeSource, BenefitSource, BracketCeiling, ClaimSchedule, IncomeCeiling, StartAges,
    truncate_aime, truncate_monthly_benefit, truncate_pia,
};
pub use engine::{run_plan, simulate};
pub use error::PlanError;
pub use orchestrator::{CASH_EPS, WithdrawalOrchestrator, YearOutcome, YearPhase, YearRequest};
pub use solver::{RootFinder, SolverError};
pub use target::TargetIncomeSolver;
pub use tax::{TaxDue, tax_due, taxable_social_security};
pub use types::{
    FilingStatus, MAX_PERSONS, MAX_YEARS, PersonConfig, PlanConfig, PlanResult, WithdrawalStrategy,
    YearResult,
};
