use axum::{
    Router,
    extract::{Json, Query},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::core::{
    AllocationSchedule, AssetClass, AssetModel, DEFAULT_BASE_RATE, DEFAULT_PHASE_OFFSETS,
    DepletionAnalysis, DepletionMetrics, Engine, EnsembleSummary, PhaseSchedule,
    ResultEnsemble, SimError, SimulationConfig, SimulationPath, SweepParameter, SweepPoint,
    WithdrawalPolicy, YearPercentiles, summarize, sweep, sweep_grid, yearly_percentiles,
};

const MAX_SAMPLE_PATHS: usize = 20;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiPolicy {
    #[serde(alias = "trinity", alias = "fixedReal", alias = "fixed_real")]
    FixedReal,
    #[serde(alias = "fixed", alias = "fixedNominal", alias = "fixed_nominal")]
    FixedNominal,
    #[serde(alias = "percent", alias = "percentOfBalance", alias = "percent_of_balance")]
    PercentOfBalance,
    #[serde(
        alias = "qol",
        alias = "hauenstein",
        alias = "phased-multiplier",
        alias = "phasedMultiplier",
        alias = "phased_multiplier"
    )]
    Phased,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiSweepParameter {
    #[serde(alias = "baseRealReturn", alias = "base_real_return", alias = "return")]
    BaseRealReturn,
    #[serde(alias = "returnVolatility", alias = "return_volatility", alias = "volatility")]
    ReturnVolatility,
    #[serde(alias = "baseInflation", alias = "base_inflation", alias = "inflation")]
    BaseInflation,
    #[serde(alias = "startingValue", alias = "starting_value")]
    StartingValue,
    #[serde(alias = "withdrawalRate", alias = "withdrawal_rate", alias = "rate")]
    WithdrawalRate,
}

impl From<ApiSweepParameter> for SweepParameter {
    fn from(value: ApiSweepParameter) -> Self {
        match value {
            ApiSweepParameter::BaseRealReturn => SweepParameter::BaseRealReturn,
            ApiSweepParameter::ReturnVolatility => SweepParameter::ReturnVolatility,
            ApiSweepParameter::BaseInflation => SweepParameter::BaseInflation,
            ApiSweepParameter::StartingValue => SweepParameter::StartingValue,
            ApiSweepParameter::WithdrawalRate => SweepParameter::WithdrawalRate,
        }
    }
}

impl ApiSweepParameter {
    /// Swept rates arrive in percent like every other rate in the payload.
    fn scale(self) -> f64 {
        match self {
            ApiSweepParameter::StartingValue => 1.0,
            _ => 0.01,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiAsset {
    name: String,
    #[serde(alias = "real_return")]
    real_return: f64,
    volatility: f64,
}

/// Optional overrides layered on [`SimulationConfig::default`]. Rates,
/// volatilities and allocation weights are in percent (`4` means 4%).
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    #[serde(alias = "starting_value")]
    starting_value: Option<f64>,
    #[serde(alias = "starting_age")]
    starting_age: Option<u32>,
    #[serde(alias = "horizon_years", alias = "years")]
    horizon_years: Option<u32>,
    simulations: Option<u32>,
    seed: Option<u64>,

    #[serde(alias = "base_real_return")]
    base_real_return: Option<f64>,
    #[serde(alias = "return_volatility")]
    return_volatility: Option<f64>,
    #[serde(alias = "base_inflation")]
    base_inflation: Option<f64>,
    #[serde(alias = "inflation_volatility")]
    inflation_volatility: Option<f64>,
    #[serde(alias = "inflation_variability")]
    inflation_variability: Option<bool>,

    policy: Option<ApiPolicy>,
    #[serde(alias = "base_rate", alias = "withdrawalRate", alias = "withdrawal_rate")]
    rate: Option<f64>,
    #[serde(alias = "phase_offsets")]
    phase_offsets: Option<Vec<u32>>,
    #[serde(alias = "phase_rates")]
    phase_rates: Option<Vec<f64>>,
    #[serde(alias = "phase_multipliers")]
    phase_multipliers: Option<Vec<f64>>,

    assets: Option<Vec<ApiAsset>>,
    #[serde(alias = "correlation_matrix")]
    correlation_matrix: Option<Vec<Vec<f64>>>,
    allocation: Option<Vec<f64>>,
    #[serde(alias = "glide_path")]
    glide_path: Option<bool>,

    #[serde(alias = "success_threshold")]
    success_threshold: Option<f64>,
    #[serde(alias = "sample_paths")]
    sample_paths: Option<usize>,

    #[serde(alias = "sweep_parameter")]
    sweep_parameter: Option<ApiSweepParameter>,
    #[serde(alias = "sweep_values")]
    sweep_values: Option<Vec<f64>>,
    #[serde(alias = "grid_parameter")]
    grid_parameter: Option<ApiSweepParameter>,
    #[serde(alias = "grid_values")]
    grid_values: Option<Vec<f64>>,
}

#[derive(Copy, Clone, Debug)]
struct ApiOptions {
    success_threshold: f64,
    sample_paths: usize,
}

#[derive(Debug)]
struct ApiRequest {
    config: SimulationConfig,
    options: ApiOptions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PolicyReport {
    summary: EnsembleSummary,
    depletion: DepletionMetrics,
    survival_curve: Vec<f64>,
    yearly: Vec<YearPercentiles>,
    sample_paths: Vec<SimulationPath>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse {
    seed: u64,
    starting_value: f64,
    starting_age: u32,
    horizon_years: u32,
    #[serde(flatten)]
    report: PolicyReport,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompareResponse {
    seed: u64,
    starting_value: f64,
    starting_age: u32,
    horizon_years: u32,
    trinity: PolicyReport,
    quality_of_life: PolicyReport,
    success_rate_delta: f64,
    median_utility_delta: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SweepResponse {
    parameter: &'static str,
    policy: &'static str,
    points: Vec<SweepPoint>,
}

/// Row `i` of `grid` is `values[i]` of `parameter`; each cell's `value` is
/// the `gridParameter` value.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SweepGridResponse {
    parameter: &'static str,
    grid_parameter: &'static str,
    policy: &'static str,
    values: Vec<f64>,
    grid: Vec<Vec<SweepPoint>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum SweepOutcome {
    Line(SweepResponse),
    Grid(SweepGridResponse),
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .route(
            "/api/compare",
            get(compare_get_handler).post(compare_post_handler),
        )
        .route("/api/sweep", post(sweep_post_handler))
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "simulation API listening");

    axum::serve(listener, app).await
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

async fn compare_get_handler(Query(payload): Query<SimulatePayload>) -> Response {
    compare_handler_impl(payload).await
}

async fn compare_post_handler(Json(payload): Json<SimulatePayload>) -> Response {
    compare_handler_impl(payload).await
}

async fn sweep_post_handler(Json(payload): Json<SimulatePayload>) -> Response {
    let axes = match sweep_request(&payload) {
        Ok(axes) => axes,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    match build_sweep_response(&request, axes) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(err) => sim_error_response(&err),
    }
}

async fn simulate_handler_impl(payload: SimulatePayload) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    match build_simulate_response(&request) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(err) => sim_error_response(&err),
    }
}

async fn compare_handler_impl(payload: SimulatePayload) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    match build_compare_response(&request) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(err) => sim_error_response(&err),
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

fn status_for(err: &SimError) -> StatusCode {
    match err {
        SimError::Configuration(_) => StatusCode::BAD_REQUEST,
        SimError::Numerical(_) => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

fn sim_error_response(err: &SimError) -> Response {
    warn!(%err, "simulation request failed");
    error_response(status_for(err), &err.to_string())
}

#[cfg(test)]
fn api_request_from_json(json: &str) -> Result<ApiRequest, String> {
    let payload = serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    api_request_from_payload(payload)
}

fn percent(v: f64) -> f64 {
    v / 100.0
}

fn api_request_from_payload(payload: SimulatePayload) -> Result<ApiRequest, String> {
    let mut config = SimulationConfig::default();
    let mut options = ApiOptions {
        success_threshold: 0.0,
        sample_paths: 0,
    };

    if let Some(v) = payload.starting_value {
        config.starting_value = v;
    }
    if let Some(v) = payload.starting_age {
        config.starting_age = v;
    }
    if let Some(v) = payload.horizon_years {
        config.horizon_years = v;
    }
    if let Some(v) = payload.simulations {
        config.simulations = v;
    }
    if let Some(v) = payload.seed {
        config.seed = v;
    }

    if let Some(v) = payload.base_real_return {
        config.market.base_real_return = percent(v);
    }
    if let Some(v) = payload.return_volatility {
        config.market.return_volatility = percent(v);
    }
    if let Some(v) = payload.base_inflation {
        config.market.base_inflation = percent(v);
    }
    if let Some(v) = payload.inflation_volatility {
        config.market.inflation_volatility = percent(v);
    }
    if let Some(v) = payload.inflation_variability {
        config.market.inflation_variability = v;
    }

    config.policy = policy_from_payload(&payload, config.starting_age)?;
    config.market.assets = asset_model_from_payload(&payload)?;

    if let Some(v) = payload.success_threshold {
        if !(v.is_finite() && v >= 0.0) {
            return Err("successThreshold must be >= 0".to_string());
        }
        options.success_threshold = v;
    }
    if let Some(v) = payload.sample_paths {
        options.sample_paths = v.min(MAX_SAMPLE_PATHS);
    }

    Ok(ApiRequest { config, options })
}

fn policy_from_payload(
    payload: &SimulatePayload,
    starting_age: u32,
) -> Result<WithdrawalPolicy, String> {
    let base_rate = payload.rate.map(percent).unwrap_or(DEFAULT_BASE_RATE);

    let policy = match payload.policy.unwrap_or(ApiPolicy::FixedReal) {
        ApiPolicy::FixedReal => WithdrawalPolicy::FixedReal(base_rate),
        ApiPolicy::FixedNominal => WithdrawalPolicy::FixedNominal(base_rate),
        ApiPolicy::PercentOfBalance => WithdrawalPolicy::PercentOfBalance(base_rate),
        ApiPolicy::Phased => WithdrawalPolicy::PhasedMultiplier {
            base_rate,
            schedule: phase_schedule_from_payload(payload, starting_age, base_rate)?,
        },
    };
    Ok(policy)
}

fn phase_schedule_from_payload(
    payload: &SimulatePayload,
    starting_age: u32,
    base_rate: f64,
) -> Result<PhaseSchedule, String> {
    let offsets = payload
        .phase_offsets
        .clone()
        .unwrap_or_else(|| DEFAULT_PHASE_OFFSETS.to_vec());

    let schedule = match (&payload.phase_multipliers, &payload.phase_rates) {
        (Some(_), Some(_)) => {
            return Err("use either phaseMultipliers or phaseRates, not both".to_string());
        }
        (Some(multipliers), None) => {
            if multipliers.len() != offsets.len() {
                return Err(format!(
                    "{} phase offsets but {} phase multipliers",
                    offsets.len(),
                    multipliers.len()
                ));
            }
            let pairs: Vec<(u32, f64)> =
                offsets.iter().copied().zip(multipliers.iter().copied()).collect();
            PhaseSchedule::relative(starting_age, &pairs)
        }
        (None, Some(rates)) => {
            let rates: Vec<f64> = rates.iter().copied().map(percent).collect();
            PhaseSchedule::from_rates(starting_age, &offsets, &rates, base_rate)
        }
        (None, None) if payload.phase_offsets.is_some() => {
            return Err("phaseOffsets needs phaseMultipliers or phaseRates".to_string());
        }
        (None, None) => PhaseSchedule::default_for(starting_age),
    };
    schedule.map_err(|err| err.to_string())
}

fn asset_model_from_payload(payload: &SimulatePayload) -> Result<Option<AssetModel>, String> {
    let Some(assets) = &payload.assets else {
        if payload.correlation_matrix.is_some() || payload.allocation.is_some() {
            return Err("correlationMatrix and allocation need an assets list".to_string());
        }
        if payload.glide_path == Some(true) {
            return Err("glidePath needs an assets list of equity and bonds".to_string());
        }
        return Ok(None);
    };

    let asset_classes: Vec<AssetClass> = assets
        .iter()
        .map(|a| AssetClass::new(a.name.clone(), percent(a.real_return), percent(a.volatility)))
        .collect();
    let n = asset_classes.len();

    let correlation_matrix = payload.correlation_matrix.clone().unwrap_or_else(|| {
        (0..n)
            .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
            .collect()
    });

    let allocation = match (payload.glide_path.unwrap_or(false), &payload.allocation) {
        (true, Some(_)) => {
            return Err("use either glidePath or allocation, not both".to_string());
        }
        (true, None) => AllocationSchedule::age_rule(),
        (false, Some(weights)) => {
            AllocationSchedule::Static(weights.iter().copied().map(percent).collect())
        }
        (false, None) if n > 0 => AllocationSchedule::Static(vec![1.0 / n as f64; n]),
        (false, None) => AllocationSchedule::Static(Vec::new()),
    };

    Ok(Some(AssetModel {
        asset_classes,
        correlation_matrix,
        allocation,
    }))
}

#[derive(Debug)]
struct SweepAxes {
    parameter: SweepParameter,
    values: Vec<f64>,
    grid: Option<(SweepParameter, Vec<f64>)>,
}

fn sweep_axis(
    parameter: Option<ApiSweepParameter>,
    values: Option<&[f64]>,
    name: &str,
) -> Result<(SweepParameter, Vec<f64>), String> {
    let Some(parameter) = parameter else {
        return Err(format!("{name}Parameter is required"));
    };
    let values = match values {
        Some(values) if !values.is_empty() => values,
        _ => return Err(format!("{name}Values must list at least one value")),
    };
    let scale = parameter.scale();
    Ok((
        parameter.into(),
        values.iter().map(|v| v * scale).collect(),
    ))
}

fn sweep_request(payload: &SimulatePayload) -> Result<SweepAxes, String> {
    let (parameter, values) = sweep_axis(
        payload.sweep_parameter,
        payload.sweep_values.as_deref(),
        "sweep",
    )?;
    let grid = if payload.grid_parameter.is_some() || payload.grid_values.is_some() {
        Some(sweep_axis(
            payload.grid_parameter,
            payload.grid_values.as_deref(),
            "grid",
        )?)
    } else {
        None
    };
    Ok(SweepAxes {
        parameter,
        values,
        grid,
    })
}

fn build_sweep_response(request: &ApiRequest, axes: SweepAxes) -> Result<SweepOutcome, SimError> {
    let config = &request.config;
    let threshold = request.options.success_threshold;
    let outcome = match axes.grid {
        None => SweepOutcome::Line(SweepResponse {
            parameter: axes.parameter.name(),
            policy: config.policy.name(),
            points: sweep(config, axes.parameter, &axes.values, threshold)?,
        }),
        Some((grid_parameter, grid_values)) => SweepOutcome::Grid(SweepGridResponse {
            parameter: axes.parameter.name(),
            grid_parameter: grid_parameter.name(),
            policy: config.policy.name(),
            grid: sweep_grid(
                config,
                (axes.parameter, &axes.values),
                (grid_parameter, &grid_values),
                threshold,
            )?,
            values: axes.values,
        }),
    };
    Ok(outcome)
}

fn policy_report(ensemble: &ResultEnsemble, options: ApiOptions) -> PolicyReport {
    let depletion = DepletionAnalysis::new(ensemble);
    PolicyReport {
        summary: summarize(ensemble, options.success_threshold),
        depletion: depletion.metrics(),
        survival_curve: depletion.survival_curve(),
        yearly: yearly_percentiles(ensemble),
        sample_paths: ensemble.paths().take(options.sample_paths).collect(),
    }
}

fn build_simulate_response(request: &ApiRequest) -> Result<SimulateResponse, SimError> {
    let config = &request.config;
    let ensemble = Engine::new(config.clone())?.run();
    Ok(SimulateResponse {
        seed: config.seed,
        starting_value: config.starting_value,
        starting_age: config.starting_age,
        horizon_years: config.horizon_years,
        report: policy_report(&ensemble, request.options),
    })
}

/// Trinity at the configured rate against the phased policy, on one set of
/// market paths.
fn build_compare_response(request: &ApiRequest) -> Result<CompareResponse, SimError> {
    let config = &request.config;
    let base_rate = match &config.policy {
        WithdrawalPolicy::FixedReal(rate)
        | WithdrawalPolicy::FixedNominal(rate)
        | WithdrawalPolicy::PercentOfBalance(rate) => *rate,
        WithdrawalPolicy::PhasedMultiplier { base_rate, .. } => *base_rate,
    };
    let phased = match &config.policy {
        WithdrawalPolicy::PhasedMultiplier { .. } => config.policy.clone(),
        _ => WithdrawalPolicy::PhasedMultiplier {
            base_rate,
            schedule: PhaseSchedule::default_for(config.starting_age)?,
        },
    };

    let mut trinity_config = config.clone();
    trinity_config.policy = WithdrawalPolicy::FixedReal(base_rate);
    let engine = Engine::new(trinity_config)?;
    let trinity = policy_report(&engine.run(), request.options);
    let quality_of_life = policy_report(&engine.run_with(&phased)?, request.options);

    Ok(CompareResponse {
        seed: config.seed,
        starting_value: config.starting_value,
        starting_age: config.starting_age,
        horizon_years: config.horizon_years,
        success_rate_delta: quality_of_life.summary.success_rate - trinity.summary.success_rate,
        median_utility_delta: quality_of_life.summary.median_utility
            - trinity.summary.median_utility,
        trinity,
        quality_of_life,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn empty_payload_uses_defaults() {
        let request = api_request_from_json("{}").expect("valid request");
        assert_eq!(request.config, SimulationConfig::default());
        assert_approx(request.options.success_threshold, 0.0);
        assert_eq!(request.options.sample_paths, 0);
    }

    #[test]
    fn api_request_from_json_parses_camel_case_keys() {
        let json = r#"{
          "startingValue": 750000,
          "startingAge": 62,
          "horizonYears": 25,
          "simulations": 200,
          "seed": 9,
          "baseRealReturn": 3,
          "returnVolatility": 12,
          "baseInflation": 2,
          "inflationVolatility": 0.5,
          "inflationVariability": false,
          "policy": "percent-of-balance",
          "rate": 5,
          "successThreshold": 1000,
          "samplePaths": 3
        }"#;

        let request = api_request_from_json(json).expect("valid request");
        let config = &request.config;
        assert_approx(config.starting_value, 750_000.0);
        assert_eq!(config.starting_age, 62);
        assert_eq!(config.horizon_years, 25);
        assert_eq!(config.simulations, 200);
        assert_eq!(config.seed, 9);
        assert_approx(config.market.base_real_return, 0.03);
        assert_approx(config.market.return_volatility, 0.12);
        assert_approx(config.market.base_inflation, 0.02);
        assert_approx(config.market.inflation_volatility, 0.005);
        assert!(!config.market.inflation_variability);
        assert_eq!(config.policy, WithdrawalPolicy::PercentOfBalance(0.05));
        assert_approx(request.options.success_threshold, 1_000.0);
        assert_eq!(request.options.sample_paths, 3);
    }

    #[test]
    fn api_request_accepts_snake_case_and_policy_aliases() {
        let json = r#"{
          "starting_value": 500000,
          "horizon_years": 10,
          "base_inflation": 3,
          "policy": "trinity"
        }"#;
        let request = api_request_from_json(json).expect("valid request");
        assert_approx(request.config.starting_value, 500_000.0);
        assert_eq!(request.config.horizon_years, 10);
        assert_approx(request.config.market.base_inflation, 0.03);
        assert_eq!(request.config.policy, WithdrawalPolicy::FixedReal(0.04));

        let request = api_request_from_json(r#"{"policy": "qol", "startingAge": 70}"#)
            .expect("valid request");
        assert_eq!(
            request.config.policy,
            WithdrawalPolicy::PhasedMultiplier {
                base_rate: 0.04,
                schedule: PhaseSchedule::default_for(70).unwrap(),
            }
        );
    }

    #[test]
    fn phase_rates_convert_to_multipliers() {
        let json = r#"{
          "policy": "phased",
          "startingAge": 60,
          "phaseOffsets": [0, 15],
          "phaseRates": [6, 3]
        }"#;
        let request = api_request_from_json(json).expect("valid request");
        let WithdrawalPolicy::PhasedMultiplier { schedule, .. } = &request.config.policy else {
            panic!("expected phased policy");
        };
        let phases = schedule.phases();
        assert_eq!(phases.len(), 2);
        assert_eq!(phases[1].start_age, 75);
        assert!((phases[0].multiplier - 1.5).abs() < 1e-12);
        assert!((phases[1].multiplier - 0.75).abs() < 1e-12);
    }

    #[test]
    fn api_request_rejects_inconsistent_phase_input() {
        let err = api_request_from_json(
            r#"{"policy": "phased", "phaseMultipliers": [1.2], "phaseOffsets": [0, 10]}"#,
        )
        .expect_err("length mismatch");
        assert!(err.contains("phase multipliers"));

        let err = api_request_from_json(
            r#"{"policy": "phased", "phaseMultipliers": [1.2], "phaseRates": [5]}"#,
        )
        .expect_err("both schedules");
        assert!(err.contains("not both"));

        let err = api_request_from_json(
            r#"{"policy": "phased", "phaseOffsets": [5, 0], "phaseMultipliers": [1.0, 1.0]}"#,
        )
        .expect_err("unordered phases");
        assert!(err.contains("configuration error"));
    }

    #[test]
    fn api_request_rejects_unknown_policy() {
        let err = api_request_from_json(r#"{"policy": "yolo"}"#).expect_err("unknown policy");
        assert!(err.contains("Invalid API JSON payload"));
    }

    #[test]
    fn huge_ages_and_offsets_are_rejected_without_overflow() {
        let err = api_request_from_json(r#"{"policy": "qol", "startingAge": 4294967295}"#)
            .expect_err("age overflow");
        assert!(err.contains("overflows"));

        let err = api_request_from_json(
            r#"{"policy": "phased", "phaseOffsets": [0, 4294967290], "phaseMultipliers": [1.2, 1.0], "startingAge": 65}"#,
        )
        .expect_err("offset overflow");
        assert!(err.contains("configuration error"));

        let request = api_request_from_json(r#"{"startingAge": 4294967295}"#).expect("parses");
        let err = build_compare_response(&request).expect_err("age overflow");
        assert!(matches!(err, SimError::Configuration(_)));
        let err = build_simulate_response(&request).expect_err("age overflow");
        assert!(matches!(err, SimError::Configuration(_)));
    }

    #[test]
    fn asset_model_parses_with_glide_path() {
        let json = r#"{
          "assets": [
            {"name": "equity", "realReturn": 5, "volatility": 17},
            {"name": "bonds", "real_return": 1.5, "volatility": 6}
          ],
          "correlationMatrix": [[1.0, 0.1], [0.1, 1.0]],
          "glidePath": true
        }"#;
        let request = api_request_from_json(json).expect("valid request");
        let model = request.config.market.assets.expect("asset model");
        assert_eq!(model.asset_classes.len(), 2);
        assert_approx(model.asset_classes[0].real_return, 0.05);
        assert_approx(model.asset_classes[1].volatility, 0.06);
        assert_eq!(model.allocation, AllocationSchedule::age_rule());
    }

    #[test]
    fn asset_model_defaults_to_identity_and_equal_weights() {
        let json = r#"{
          "assets": [
            {"name": "a", "realReturn": 4, "volatility": 10},
            {"name": "b", "realReturn": 2, "volatility": 5},
            {"name": "c", "realReturn": 1, "volatility": 2}
          ]
        }"#;
        let request = api_request_from_json(json).expect("valid request");
        let model = request.config.market.assets.expect("asset model");
        assert_eq!(model.correlation_matrix[1], vec![0.0, 1.0, 0.0]);
        let AllocationSchedule::Static(weights) = &model.allocation else {
            panic!("expected static allocation");
        };
        assert_eq!(weights.len(), 3);
        assert_approx(weights.iter().sum::<f64>(), 1.0);
    }

    #[test]
    fn allocation_without_assets_is_rejected() {
        let err = api_request_from_json(r#"{"allocation": [60, 40]}"#).expect_err("no assets");
        assert!(err.contains("assets"));
    }

    #[test]
    fn simulate_response_carries_summary_and_yearly_rows() {
        let json = r#"{
          "horizonYears": 5,
          "simulations": 50,
          "samplePaths": 2,
          "returnVolatility": 0,
          "inflationVariability": false
        }"#;
        let request = api_request_from_json(json).expect("valid request");
        let response = build_simulate_response(&request).expect("simulation runs");

        assert_eq!(response.report.summary.simulations, 50);
        assert_eq!(response.report.yearly.len(), 5);
        assert_eq!(response.report.survival_curve.len(), 6);
        assert_eq!(response.report.sample_paths.len(), 2);
        assert_eq!(response.report.depletion.depleted_simulations, 0);

        let value = serde_json::to_value(&response).expect("serializes");
        assert_eq!(value["seed"], 42);
        assert!(value.get("summary").is_some());
        assert!(value.get("survivalCurve").is_some());
        assert_eq!(value["summary"]["policy"], "fixed-real");
    }

    #[test]
    fn simulate_response_maps_configuration_errors() {
        let request = api_request_from_json(r#"{"simulations": 0}"#).expect("parses");
        let err = build_simulate_response(&request).expect_err("zero simulations");
        assert!(matches!(err, SimError::Configuration(_)));
        assert_eq!(status_for(&err), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&SimError::Numerical("pivot".to_string())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn compare_runs_both_policies_on_shared_markets() {
        let json = r#"{"horizonYears": 20, "simulations": 100, "seed": 11}"#;
        let request = api_request_from_json(json).expect("valid request");
        let response = build_compare_response(&request).expect("comparison runs");

        assert_eq!(response.trinity.summary.policy, "fixed-real");
        assert_eq!(response.quality_of_life.summary.policy, "phased-multiplier");
        // Year-0 withdrawals are deterministic: 4% against 5.4% of 1,000,000.
        assert_approx(response.trinity.yearly[0].median_withdrawal, 40_000.0);
        assert!((response.quality_of_life.yearly[0].median_withdrawal - 54_000.0).abs() < 1e-6);
        assert_approx(
            response.success_rate_delta,
            response.quality_of_life.summary.success_rate - response.trinity.summary.success_rate,
        );
    }

    #[test]
    fn sweep_request_scales_percent_values() {
        let payload: SimulatePayload = serde_json::from_str(
            r#"{"sweepParameter": "withdrawalRate", "sweepValues": [3, 4, 5]}"#,
        )
        .expect("parses");
        let axes = sweep_request(&payload).expect("valid sweep");
        assert_eq!(axes.parameter, SweepParameter::WithdrawalRate);
        assert_approx(axes.values[1], 0.04);
        assert!(axes.grid.is_none());

        let payload: SimulatePayload =
            serde_json::from_str(r#"{"sweepParameter": "starting_value", "sweepValues": [5e5]}"#)
                .expect("parses");
        let axes = sweep_request(&payload).expect("valid sweep");
        assert_approx(axes.values[0], 500_000.0);

        let payload: SimulatePayload =
            serde_json::from_str(r#"{"sweepParameter": "rate", "sweepValues": []}"#)
                .expect("parses");
        assert!(sweep_request(&payload).is_err());

        let payload: SimulatePayload = serde_json::from_str(
            r#"{"sweepParameter": "rate", "sweepValues": [4], "gridValues": [2]}"#,
        )
        .expect("parses");
        let err = sweep_request(&payload).expect_err("grid axis without parameter");
        assert!(err.contains("gridParameter"));
    }

    #[test]
    fn grid_sweep_response_has_one_row_per_first_axis_value() {
        let json = r#"{
          "horizonYears": 10,
          "simulations": 20,
          "returnVolatility": 0,
          "baseRealReturn": 0,
          "baseInflation": 0,
          "inflationVariability": false,
          "policy": "fixed-nominal",
          "sweepParameter": "startingValue",
          "sweepValues": [500000, 1000000],
          "gridParameter": "withdrawalRate",
          "gridValues": [5, 10]
        }"#;
        let payload: SimulatePayload = serde_json::from_str(json).expect("parses");
        let axes = sweep_request(&payload).expect("valid sweep");
        let request = api_request_from_payload(payload).expect("valid request");
        let SweepOutcome::Grid(response) = build_sweep_response(&request, axes).expect("runs")
        else {
            panic!("expected a grid response");
        };

        assert_eq!(response.grid_parameter, "withdrawal-rate");
        assert_eq!(response.grid.len(), 2);
        assert_approx(response.grid[0][0].value, 0.05);
        assert!((response.grid[0][0].median_final_value - 250_000.0).abs() < 1e-6);
        assert!((response.grid[1][1].median_final_value).abs() < 1e-6);

        let value = serde_json::to_value(&response).expect("serializes");
        assert!(value.get("gridParameter").is_some());
    }
}
