use rayon::prelude::*;
use tracing::{debug, warn};

use super::ensemble::ResultEnsemble;
use super::error::{Result, SimError};
use super::paths::{MarketPaths, PathGenerator, cholesky};
use super::policy::PolicyContext;
use super::types::{AllocationSchedule, AssetClass, AssetModel, SimulationConfig, WithdrawalPolicy};

const SYMMETRY_TOLERANCE: f64 = 1e-9;

/// A validated configuration together with its pre-generated market paths.
///
/// Every run withdraws first and then applies the year's return to what is
/// left: `next = max(0, (balance - withdrawal) * (1 + r))`. A path that starts a
/// year at zero is depleted and records zero withdrawal and zero return for
/// the rest of the horizon.
#[derive(Debug, Clone)]
pub struct Engine {
    config: SimulationConfig,
    assets: Vec<AssetClass>,
    allocation: AllocationSchedule,
    market: MarketPaths,
}

#[derive(Debug)]
struct PathRows {
    portfolio: Vec<f64>,
    withdrawals: Vec<f64>,
    returns: Vec<f64>,
}

impl Engine {
    pub fn new(config: SimulationConfig) -> Result<Self> {
        if let Err(err) = validate_config(&config) {
            warn!(%err, "rejected simulation config");
            return Err(err);
        }

        let (assets, correlation, allocation) = resolve_assets(&config);
        let market = PathGenerator::new(config.seed).generate(
            &assets,
            &correlation,
            config.market.base_inflation,
            config.market.inflation_volatility,
            config.market.inflation_variability,
            config.horizon_years as usize,
            config.simulations as usize,
        )?;

        debug!(
            simulations = config.simulations,
            years = config.horizon_years,
            assets = assets.len(),
            seed = config.seed,
            "generated market paths"
        );

        Ok(Self {
            config,
            assets,
            allocation,
            market,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn market(&self) -> &MarketPaths {
        &self.market
    }

    /// Runs the configured withdrawal policy.
    pub fn run(&self) -> ResultEnsemble {
        self.evolve(&self.config.policy)
    }

    /// Runs another policy over the same market paths, so strategies are
    /// compared on identical return and inflation draws.
    pub fn run_with(&self, policy: &WithdrawalPolicy) -> Result<ResultEnsemble> {
        policy.validate(self.config.starting_age)?;
        Ok(self.evolve(policy))
    }

    fn evolve(&self, policy: &WithdrawalPolicy) -> ResultEnsemble {
        let config = &self.config;
        let ages: Vec<u32> = (0..config.horizon_years)
            .map(|year| config.starting_age + year)
            .collect();
        let allocations: Vec<Vec<f64>> = ages
            .iter()
            .map(|&age| self.allocation.weights_at(age, self.assets.len()))
            .collect();
        let phases = ages.iter().map(|&age| policy.phase_index(age)).collect();

        let rows: Vec<PathRows> = self
            .market
            .inflation
            .par_iter()
            .zip(self.market.asset_returns.par_iter())
            .map(|(inflation, asset_returns)| {
                simulate_path(config, policy, &allocations, inflation, asset_returns)
            })
            .collect();

        let mut portfolio = Vec::with_capacity(rows.len());
        let mut withdrawals = Vec::with_capacity(rows.len());
        let mut returns = Vec::with_capacity(rows.len());
        for row in rows {
            portfolio.push(row.portfolio);
            withdrawals.push(row.withdrawals);
            returns.push(row.returns);
        }

        let asset_returns = (0..self.assets.len())
            .map(|asset| {
                self.market
                    .asset_returns
                    .iter()
                    .map(|sim| sim.iter().map(|year| year[asset]).collect())
                    .collect()
            })
            .collect();

        debug!(policy = policy.name(), "completed simulation run");

        ResultEnsemble {
            starting_value: config.starting_value,
            starting_age: config.starting_age,
            policy: policy.clone(),
            portfolio,
            withdrawals,
            returns,
            inflation: self.market.inflation.clone(),
            asset_returns,
            asset_names: self.assets.iter().map(|a| a.name.clone()).collect(),
            allocations,
            phases,
        }
    }
}

/// Validates `config`, generates paths and runs its policy.
pub fn simulate(config: SimulationConfig) -> Result<ResultEnsemble> {
    Ok(Engine::new(config)?.run())
}

fn simulate_path(
    config: &SimulationConfig,
    policy: &WithdrawalPolicy,
    allocations: &[Vec<f64>],
    inflation: &[f64],
    asset_returns: &[Vec<f64>],
) -> PathRows {
    let years = allocations.len();
    let mut portfolio = Vec::with_capacity(years + 1);
    let mut withdrawals = Vec::with_capacity(years);
    let mut returns = Vec::with_capacity(years);

    let mut balance = config.starting_value;
    let mut cumulative_inflation = 1.0;
    portfolio.push(balance);

    for (year, weights) in allocations.iter().enumerate() {
        let (withdrawal, applied_return) = if balance > 0.0 {
            let ctx = PolicyContext {
                year: year as u32,
                age: config.starting_age + year as u32,
                cumulative_inflation,
                balance,
                starting_value: config.starting_value,
            };
            let withdrawal = policy.withdrawal(&ctx).min(balance);
            let blended = blended_return(weights, &asset_returns[year]);
            balance = ((balance - withdrawal) * (1.0 + blended)).max(0.0);
            (withdrawal, blended)
        } else {
            balance = 0.0;
            (0.0, 0.0)
        };

        cumulative_inflation *= 1.0 + inflation[year];
        withdrawals.push(withdrawal);
        returns.push(applied_return);
        portfolio.push(balance);
    }

    PathRows {
        portfolio,
        withdrawals,
        returns,
    }
}

fn blended_return(weights: &[f64], returns: &[f64]) -> f64 {
    weights.iter().zip(returns).map(|(w, r)| w * r).sum()
}

fn resolve_assets(config: &SimulationConfig) -> (Vec<AssetClass>, Vec<Vec<f64>>, AllocationSchedule) {
    match &config.market.assets {
        Some(model) => (
            model.asset_classes.clone(),
            model.correlation_matrix.clone(),
            model.allocation.clone(),
        ),
        None => (
            vec![AssetClass::new(
                "portfolio",
                config.market.base_real_return,
                config.market.return_volatility,
            )],
            vec![vec![1.0]],
            AllocationSchedule::Static(vec![1.0]),
        ),
    }
}

pub fn validate_config(config: &SimulationConfig) -> Result<()> {
    if !(config.starting_value.is_finite() && config.starting_value > 0.0) {
        return Err(SimError::config(format!(
            "starting value must be > 0, got {}",
            config.starting_value
        )));
    }
    if config.horizon_years == 0 {
        return Err(SimError::config("horizon years must be > 0"));
    }
    if config.simulations == 0 {
        return Err(SimError::config("simulation count must be > 0"));
    }
    if config
        .starting_age
        .checked_add(config.horizon_years)
        .is_none()
    {
        return Err(SimError::config("starting age + horizon overflows"));
    }

    let market = &config.market;
    if !market.base_real_return.is_finite() {
        return Err(SimError::config("base real return must be finite"));
    }
    if !(market.return_volatility.is_finite() && market.return_volatility >= 0.0) {
        return Err(SimError::config("return volatility must be >= 0"));
    }
    if !(market.base_inflation.is_finite() && market.base_inflation > -1.0) {
        return Err(SimError::config("base inflation must be > -100%"));
    }
    if !(market.inflation_volatility.is_finite() && market.inflation_volatility >= 0.0) {
        return Err(SimError::config("inflation volatility must be >= 0"));
    }

    if let Some(model) = &market.assets {
        validate_asset_model(model, config)?;
    }

    config.policy.validate(config.starting_age)
}

fn validate_asset_model(model: &AssetModel, config: &SimulationConfig) -> Result<()> {
    let n = model.asset_classes.len();
    if n == 0 {
        return Err(SimError::config("asset model needs at least one asset class"));
    }
    for (idx, asset) in model.asset_classes.iter().enumerate() {
        if asset.name.trim().is_empty() {
            return Err(SimError::config(format!("asset class {idx} has an empty name")));
        }
        if model.asset_classes[..idx].iter().any(|a| a.name == asset.name) {
            return Err(SimError::config(format!(
                "duplicate asset class name {:?}",
                asset.name
            )));
        }
        if !asset.real_return.is_finite() {
            return Err(SimError::config(format!(
                "{}: real return must be finite",
                asset.name
            )));
        }
        if !(asset.volatility.is_finite() && asset.volatility >= 0.0) {
            return Err(SimError::config(format!(
                "{}: volatility must be >= 0",
                asset.name
            )));
        }
    }

    let corr = &model.correlation_matrix;
    if corr.len() != n || corr.iter().any(|row| row.len() != n) {
        return Err(SimError::config(format!(
            "correlation matrix must be {n}x{n} to match the asset classes"
        )));
    }
    for i in 0..n {
        if (corr[i][i] - 1.0).abs() > SYMMETRY_TOLERANCE {
            return Err(SimError::config(format!(
                "correlation matrix diagonal must be 1, got {} at {i}",
                corr[i][i]
            )));
        }
        for j in 0..i {
            let v = corr[i][j];
            if !(v.is_finite() && (-1.0..=1.0).contains(&v)) {
                return Err(SimError::config(format!(
                    "correlation ({i}, {j}) = {v} is outside [-1, 1]"
                )));
            }
            if (v - corr[j][i]).abs() > SYMMETRY_TOLERANCE {
                return Err(SimError::config(format!(
                    "correlation matrix is not symmetric at ({i}, {j})"
                )));
            }
        }
    }
    cholesky(corr).map_err(|err| {
        SimError::config(format!("correlation matrix is not positive semi-definite: {err}"))
    })?;

    let ages = config.starting_age..config.starting_age + config.horizon_years;
    model.allocation.validate(n, ages)
}
