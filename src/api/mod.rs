use axum::{
    Router,
    extract::{Json, Query},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::core::{
    FilingStatus, PersonConfig, PlanConfig, PlanError, PlanResult, RolloverEntry,
    WithdrawalStrategy, YearResult, run_plan,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
enum ApiWithdrawalStrategy {
    #[serde(alias = "taxEfficient", alias = "tax_efficient")]
    TaxEfficient,
    #[serde(
        alias = "proportionalPreTax",
        alias = "proportional_pretax",
        alias = "proportional-pretax",
        alias = "proportional"
    )]
    ProportionalPreTax,
}

impl From<ApiWithdrawalStrategy> for WithdrawalStrategy {
    fn from(value: ApiWithdrawalStrategy) -> Self {
        match value {
            ApiWithdrawalStrategy::TaxEfficient => WithdrawalStrategy::TaxEfficient,
            ApiWithdrawalStrategy::ProportionalPreTax => WithdrawalStrategy::ProportionalPreTax,
        }
    }
}

impl From<WithdrawalStrategy> for ApiWithdrawalStrategy {
    fn from(value: WithdrawalStrategy) -> Self {
        match value {
            WithdrawalStrategy::TaxEfficient => ApiWithdrawalStrategy::TaxEfficient,
            WithdrawalStrategy::ProportionalPreTax => ApiWithdrawalStrategy::ProportionalPreTax,
        }
    }
}

/// Overrides on top of [`PlanConfig::default`]. Rates are given in percent.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    filing_status: Option<String>,
    strategy: Option<ApiWithdrawalStrategy>,
    withdraw_457b_first: Option<bool>,
    penalty_exempt_age: Option<u32>,
    early_withdrawal_penalty: Option<f64>,
    target_bracket: Option<f64>,

    annual_spending: Option<f64>,
    other_income: Option<f64>,
    investment_return: Option<f64>,
    taxable_gain_fraction: Option<f64>,
    ss_cola: Option<f64>,
    years: Option<usize>,

    people: Option<Vec<PersonPayload>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PersonPayload {
    start_age: Option<u32>,
    taxable_start: Option<f64>,
    roth_start: Option<f64>,
    pretax_start: Option<f64>,
    pretax_457b_start: Option<f64>,
    ss_monthly_benefit: Option<f64>,
    ss_claim_age: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse {
    filing_status: FilingStatus,
    strategy: ApiWithdrawalStrategy,
    years: usize,
    first_shortfall_year: Option<usize>,
    plan_succeeds: bool,
    total_tax: f64,
    total_penalties: f64,
    total_rolled_to_roth: f64,
    ending_balance: f64,
    yearly: Vec<YearResult>,
    rollovers: Vec<RolloverEntry>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router();

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "drawdown HTTP API listening");

    axum::serve(listener, app).await
}

fn router() -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .fallback(not_found_handler)
}

async fn health_handler() -> Response {
    json_response(StatusCode::OK, HealthResponse { status: "ok" })
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_get_handler(Query(payload): Query<SimulatePayload>) -> Response {
    simulate_handler_impl(payload).await
}

async fn simulate_post_handler(Json(payload): Json<SimulatePayload>) -> Response {
    simulate_handler_impl(payload).await
}

async fn simulate_handler_impl(payload: SimulatePayload) -> Response {
    let config = match api_request_from_payload(payload) {
        Ok(config) => config,
        Err(err) => return plan_error_response(&err),
    };

    let outcome = tokio::task::spawn_blocking(move || {
        let result = run_plan(&config);
        (config, result)
    })
    .await;

    match outcome {
        Ok((config, Ok(plan))) => {
            json_response(StatusCode::OK, build_simulate_response(&config, plan))
        }
        Ok((_, Err(err))) => plan_error_response(&err),
        Err(join_err) => {
            error!(error = %join_err, "simulation task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Simulation task failed")
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

fn plan_error_response(err: &PlanError) -> Response {
    let status = match err {
        PlanError::Configuration(_) => StatusCode::BAD_REQUEST,
        PlanError::Convergence { .. } => StatusCode::UNPROCESSABLE_ENTITY,
    };
    error_response(status, &err.to_string())
}

#[cfg(test)]
fn api_request_from_json(json: &str) -> Result<PlanConfig, PlanError> {
    let payload = serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| PlanError::Configuration(format!("Invalid API JSON payload: {e}")))?;
    api_request_from_payload(payload)
}

fn api_request_from_payload(payload: SimulatePayload) -> Result<PlanConfig, PlanError> {
    let mut config = PlanConfig::default();

    if let Some(v) = payload.filing_status {
        config.filing_status = v.parse()?;
    }
    if let Some(v) = payload.strategy {
        config.strategy = v.into();
    }
    if let Some(v) = payload.withdraw_457b_first {
        config.withdraw_457b_first = v;
    }
    if let Some(v) = payload.penalty_exempt_age {
        config.penalty_exempt_age = v;
    }
    if let Some(v) = payload.early_withdrawal_penalty {
        config.early_withdrawal_penalty_rate = v / 100.0;
    }
    if let Some(v) = payload.target_bracket {
        config.target_bracket_rate = v / 100.0;
    }

    if let Some(v) = payload.annual_spending {
        config.annual_spending = v;
    }
    if let Some(v) = payload.other_income {
        config.other_ordinary_income = v;
    }
    if let Some(v) = payload.investment_return {
        config.investment_return = v / 100.0;
    }
    if let Some(v) = payload.taxable_gain_fraction {
        config.taxable_gain_fraction = v / 100.0;
    }
    if let Some(v) = payload.ss_cola {
        config.ss_cola_rate = v / 100.0;
    }
    if let Some(v) = payload.years {
        config.years = v;
    }

    if let Some(people) = payload.people {
        let defaults = config.people.clone();
        config.people = people
            .into_iter()
            .enumerate()
            .map(|(idx, person)| {
                let base = defaults.get(idx).or(defaults.first()).cloned();
                apply_person(base.unwrap_or_else(empty_person), person)
            })
            .collect();
    }

    config.validate()?;
    Ok(config)
}

fn empty_person() -> PersonConfig {
    PersonConfig {
        start_age: 60,
        taxable_start: 0.0,
        roth_start: 0.0,
        pretax_start: 0.0,
        pretax_457b_start: 0.0,
        ss_monthly_benefit: 0.0,
        ss_claim_age: 67,
    }
}

fn apply_person(mut person: PersonConfig, payload: PersonPayload) -> PersonConfig {
    if let Some(v) = payload.start_age {
        person.start_age = v;
    }
    if let Some(v) = payload.taxable_start {
        person.taxable_start = v;
    }
    if let Some(v) = payload.roth_start {
        person.roth_start = v;
    }
    if let Some(v) = payload.pretax_start {
        person.pretax_start = v;
    }
    if let Some(v) = payload.pretax_457b_start {
        person.pretax_457b_start = v;
    }
    if let Some(v) = payload.ss_monthly_benefit {
        person.ss_monthly_benefit = v;
    }
    if let Some(v) = payload.ss_claim_age {
        person.ss_claim_age = v;
    }
    person
}

fn build_simulate_response(config: &PlanConfig, plan: PlanResult) -> SimulateResponse {
    let total_tax = plan
        .years
        .iter()
        .map(|y| y.ordinary_tax + y.capital_gains_tax)
        .sum();
    let total_penalties = plan.years.iter().map(|y| y.penalties).sum();
    let total_rolled_to_roth = plan.rollovers.iter().map(|r| r.amount).sum();
    let ending_balance = plan.years.last().map(|y| y.end_total).unwrap_or(0.0);

    SimulateResponse {
        filing_status: config.filing_status,
        strategy: config.strategy.into(),
        years: plan.years.len(),
        first_shortfall_year: plan.first_shortfall_year,
        plan_succeeds: plan.first_shortfall_year.is_none(),
        total_tax,
        total_penalties,
        total_rolled_to_roth,
        ending_balance,
        yearly: plan.years,
        rollovers: plan.rollovers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn api_request_from_json_parses_web_keys() {
        let json = r#"{
          "filingStatus": "single",
          "strategy": "proportional-pre-tax",
          "withdraw457bFirst": false,
          "penaltyExemptAge": 59,
          "earlyWithdrawalPenalty": 10,
          "targetBracket": 22,
          "annualSpending": 48000,
          "otherIncome": 5000,
          "investmentReturn": 3.5,
          "taxableGainFraction": 40,
          "ssCola": 2,
          "years": 25,
          "people": [
            {
              "startAge": 52,
              "taxableStart": 250000,
              "rothStart": 60000,
              "pretaxStart": 400000,
              "pretax457bStart": 90000,
              "ssMonthlyBenefit": 2300,
              "ssClaimAge": 70
            }
          ]
        }"#;
        let config = api_request_from_json(json).expect("json should parse");

        assert_eq!(config.filing_status, FilingStatus::Single);
        assert_eq!(config.strategy, WithdrawalStrategy::ProportionalPreTax);
        assert!(!config.withdraw_457b_first);
        assert_eq!(config.penalty_exempt_age, 59);
        assert_approx(config.early_withdrawal_penalty_rate, 0.10);
        assert_approx(config.target_bracket_rate, 0.22);
        assert_approx(config.annual_spending, 48_000.0);
        assert_approx(config.other_ordinary_income, 5_000.0);
        assert_approx(config.investment_return, 0.035);
        assert_approx(config.taxable_gain_fraction, 0.40);
        assert_approx(config.ss_cola_rate, 0.02);
        assert_eq!(config.years, 25);
        assert_eq!(config.people.len(), 1);

        let person = &config.people[0];
        assert_eq!(person.start_age, 52);
        assert_approx(person.taxable_start, 250_000.0);
        assert_approx(person.roth_start, 60_000.0);
        assert_approx(person.pretax_start, 400_000.0);
        assert_approx(person.pretax_457b_start, 90_000.0);
        assert_approx(person.ss_monthly_benefit, 2_300.0);
        assert_eq!(person.ss_claim_age, 70);
    }

    #[test]
    fn partial_people_fall_back_to_defaults() {
        let config =
            api_request_from_json(r#"{ "people": [{}, { "rothStart": 1000 }] }"#).expect("valid");
        let defaults = PlanConfig::default();
        assert_eq!(config.people[0].start_age, defaults.people[0].start_age);
        assert_approx(config.people[1].roth_start, 1_000.0);
        assert_approx(config.people[1].pretax_start, defaults.people[1].pretax_start);
    }

    #[test]
    fn api_request_accepts_strategy_aliases() {
        let config = api_request_from_json(r#"{ "strategy": "taxEfficient" }"#).expect("valid");
        assert_eq!(config.strategy, WithdrawalStrategy::TaxEfficient);
        let config = api_request_from_json(r#"{ "strategy": "proportional" }"#).expect("valid");
        assert_eq!(config.strategy, WithdrawalStrategy::ProportionalPreTax);
    }

    #[test]
    fn api_request_rejects_unknown_filing_status() {
        let err = api_request_from_json(r#"{ "filingStatus": "widowed" }"#)
            .expect_err("must reject unknown status");
        assert!(matches!(err, PlanError::Configuration(_)));
        assert!(err.to_string().contains("widowed"));
    }

    #[test]
    fn api_request_rejects_negative_balance() {
        let err = api_request_from_json(r#"{ "people": [{ "taxableStart": -1 }] }"#)
            .expect_err("must reject negative balance");
        assert!(err.to_string().contains("people[0].taxable_start"));
    }

    #[test]
    fn api_request_rejects_unbounded_horizon() {
        let err = api_request_from_json(r#"{ "years": 1000000000000 }"#)
            .expect_err("horizon must be bounded");
        assert!(matches!(err, PlanError::Configuration(_)));
        assert!(err.to_string().contains("years"));
    }

    #[test]
    fn api_request_rejects_too_many_people() {
        let err = api_request_from_json(r#"{ "people": [{}, {}, {}] }"#)
            .expect_err("must reject three people");
        assert!(matches!(err, PlanError::Configuration(_)));
    }

    #[test]
    fn plan_errors_map_to_status_codes() {
        let response = plan_error_response(&PlanError::Configuration("bad".to_string()));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = plan_error_response(&PlanError::Convergence {
            year: 3,
            source: crate::core::SolverError::Diverged { x: 1.0 },
        });
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL),
            Some(&HeaderValue::from_static("no-store"))
        );
    }

    #[test]
    fn simulate_response_serialization_contains_expected_fields() {
        let config = api_request_from_json(r#"{ "years": 3 }"#).expect("valid");
        let plan = run_plan(&config).expect("plan must run");
        let response = build_simulate_response(&config, plan);
        let value = serde_json::to_value(&response).expect("serializable");

        assert_eq!(value["filingStatus"], "married-filing-jointly");
        assert_eq!(value["strategy"], "tax-efficient");
        assert_eq!(value["years"], 3);
        assert!(value["firstShortfallYear"].is_null());
        assert_eq!(value["planSucceeds"], true);
        assert!(value["totalTax"].is_number());
        assert!(value["endingBalance"].is_number());

        let yearly = value["yearly"].as_array().expect("yearly array");
        assert_eq!(yearly.len(), 3);
        for key in [
            "cashNeeded",
            "totalCash",
            "shortfall",
            "taxableSocialSecurity",
            "withdrawnPretax",
            "withdrawn457b",
            "rolledToRoth",
            "maxStandard",
            "capitalGainsCapacity",
            "ordinaryTax",
            "endTotal",
        ] {
            assert!(yearly[0].get(key).is_some(), "missing key {key}");
        }
        assert!(value["rollovers"].is_array());
    }

    #[tokio::test]
    async fn simulate_handler_returns_json_with_no_store() {
        let payload = SimulatePayload {
            years: Some(2),
            ..SimulatePayload::default()
        };
        let response = simulate_handler_impl(payload).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL),
            Some(&HeaderValue::from_static("no-store"))
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let value: serde_json::Value = serde_json::from_slice(&body).expect("json body");
        assert_eq!(value["yearly"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn simulate_handler_rejects_bad_config() {
        let payload = SimulatePayload {
            years: Some(0),
            ..SimulatePayload::default()
        };
        let response = simulate_handler_impl(payload).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
