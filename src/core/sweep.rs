use serde::Serialize;
use tracing::info;

use super::engine::simulate;
use super::error::{Result, SimError};
use super::stats::{percentile_in_place, success_rate};
use super::types::SimulationConfig;

/// A single input varied by [`sweep`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepParameter {
    BaseRealReturn,
    ReturnVolatility,
    BaseInflation,
    StartingValue,
    /// The rate of the configured policy (base rate for phased policies).
    WithdrawalRate,
}

impl SweepParameter {
    pub fn name(self) -> &'static str {
        match self {
            SweepParameter::BaseRealReturn => "base-real-return",
            SweepParameter::ReturnVolatility => "return-volatility",
            SweepParameter::BaseInflation => "base-inflation",
            SweepParameter::StartingValue => "starting-value",
            SweepParameter::WithdrawalRate => "withdrawal-rate",
        }
    }

    fn apply(self, config: &SimulationConfig, value: f64) -> SimulationConfig {
        let mut config = config.clone();
        match self {
            SweepParameter::BaseRealReturn => config.market.base_real_return = value,
            SweepParameter::ReturnVolatility => config.market.return_volatility = value,
            SweepParameter::BaseInflation => config.market.base_inflation = value,
            SweepParameter::StartingValue => config.starting_value = value,
            SweepParameter::WithdrawalRate => config.policy = config.policy.with_rate(value),
        }
        config
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepPoint {
    pub value: f64,
    pub success_rate: f64,
    pub median_final_value: f64,
    pub p10_final_value: f64,
    pub median_total_withdrawn: f64,
}

/// Reruns `config` once per entry of `values`, overriding `parameter` each time.
///
/// Every point keeps the base seed, so neighbouring points differ only by the
/// swept input. Asset-model runs ignore the single-asset return overrides.
pub fn sweep(
    config: &SimulationConfig,
    parameter: SweepParameter,
    values: &[f64],
    success_threshold: f64,
) -> Result<Vec<SweepPoint>> {
    if values.is_empty() {
        return Err(SimError::config("sweep needs at least one value"));
    }

    info!(
        parameter = parameter.name(),
        points = values.len(),
        simulations = config.simulations,
        "starting sensitivity sweep"
    );

    values
        .iter()
        .map(|&value| {
            let point = evaluate(&parameter.apply(config, value), value, success_threshold)?;
            info!(
                parameter = parameter.name(),
                value,
                success_rate = point.success_rate,
                "sweep point complete"
            );
            Ok(point)
        })
        .collect()
}

/// Two-parameter grid: row `i` holds `first.1[i]`, and each point in it
/// carries the `second` value it was run with.
pub fn sweep_grid(
    config: &SimulationConfig,
    first: (SweepParameter, &[f64]),
    second: (SweepParameter, &[f64]),
    success_threshold: f64,
) -> Result<Vec<Vec<SweepPoint>>> {
    let (p1, v1) = first;
    let (p2, v2) = second;
    if p1 == p2 {
        return Err(SimError::config(format!(
            "grid sweep needs two different parameters, got {} twice",
            p1.name()
        )));
    }
    if v1.is_empty() || v2.is_empty() {
        return Err(SimError::config("grid sweep needs at least one value per axis"));
    }

    info!(
        first = p1.name(),
        second = p2.name(),
        cells = v1.len() * v2.len(),
        "starting grid sweep"
    );

    v1.iter()
        .map(|&a| {
            let row_config = p1.apply(config, a);
            v2.iter()
                .map(|&b| evaluate(&p2.apply(&row_config, b), b, success_threshold))
                .collect()
        })
        .collect()
}

fn evaluate(config: &SimulationConfig, value: f64, success_threshold: f64) -> Result<SweepPoint> {
    let ensemble = simulate(config.clone())?;
    let mut finals = ensemble.final_values();
    let mut totals = ensemble.total_withdrawals();
    Ok(SweepPoint {
        value,
        success_rate: success_rate(&ensemble, success_threshold),
        median_final_value: percentile_in_place(&mut finals, 50.0),
        p10_final_value: percentile_in_place(&mut finals, 10.0),
        median_total_withdrawn: percentile_in_place(&mut totals, 50.0),
    })
}
