use serde::Serialize;

use super::error::Result;

pub const DEFAULT_BASE_RATE: f64 = 0.04;
pub const DEFAULT_PHASE_OFFSETS: [u32; 3] = [0, 10, 20];
pub const DEFAULT_PHASE_MULTIPLIERS: [f64; 3] = [1.35, 1.125, 0.875];
pub const DEFAULT_PHASE_RATES: [f64; 3] = [0.054, 0.045, 0.035];

#[derive(Debug, Clone, PartialEq)]
pub struct AssetClass {
    pub name: String,
    pub real_return: f64,
    pub volatility: f64,
}

impl AssetClass {
    pub fn new(name: impl Into<String>, real_return: f64, volatility: f64) -> Self {
        Self {
            name: name.into(),
            real_return,
            volatility,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AllocationPhase {
    pub start_age: u32,
    pub weights: Vec<f64>,
}

/// How the portfolio is split across asset classes as the retiree ages.
#[derive(Debug, Clone, PartialEq)]
pub enum AllocationSchedule {
    Static(Vec<f64>),
    /// Age-keyed weights; the active entry is the last one whose start age is <= age.
    Phased(Vec<AllocationPhase>),
    /// Two-asset (equity, bond) glide path: equity percent = clamp(base - age, floor, cap).
    AgeRule { base: f64, floor: f64, cap: f64 },
}

impl AllocationSchedule {
    pub fn age_rule() -> Self {
        AllocationSchedule::AgeRule {
            base: 110.0,
            floor: 20.0,
            cap: 80.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssetModel {
    pub asset_classes: Vec<AssetClass>,
    pub correlation_matrix: Vec<Vec<f64>>,
    pub allocation: AllocationSchedule,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarketAssumptions {
    pub base_real_return: f64,
    pub return_volatility: f64,
    pub base_inflation: f64,
    pub inflation_volatility: f64,
    pub inflation_variability: bool,
    /// Multi-asset extension. When absent, a single asset with
    /// `base_real_return`/`return_volatility` is modeled.
    pub assets: Option<AssetModel>,
}

impl Default for MarketAssumptions {
    fn default() -> Self {
        Self {
            base_real_return: 0.015,
            return_volatility: 0.15,
            base_inflation: 0.025,
            inflation_volatility: 0.01,
            inflation_variability: true,
            assets: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Phase {
    pub start_age: u32,
    pub multiplier: f64,
}

/// Contiguous age phases, sorted by strictly increasing start age.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseSchedule {
    pub(crate) phases: Vec<Phase>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WithdrawalPolicy {
    /// Trinity rule: `rate * starting_value`, inflated every year.
    FixedReal(f64),
    /// `rate * starting_value` with no inflation adjustment.
    FixedNominal(f64),
    PercentOfBalance(f64),
    /// Quality-of-life rule: Trinity base rescaled by the multiplier of the age phase.
    PhasedMultiplier {
        base_rate: f64,
        schedule: PhaseSchedule,
    },
}

impl WithdrawalPolicy {
    pub fn trinity() -> Self {
        WithdrawalPolicy::FixedReal(DEFAULT_BASE_RATE)
    }

    pub fn quality_of_life(starting_age: u32) -> Result<Self> {
        Ok(WithdrawalPolicy::PhasedMultiplier {
            base_rate: DEFAULT_BASE_RATE,
            schedule: PhaseSchedule::default_for(starting_age)?,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            WithdrawalPolicy::FixedReal(_) => "fixed-real",
            WithdrawalPolicy::FixedNominal(_) => "fixed-nominal",
            WithdrawalPolicy::PercentOfBalance(_) => "percent-of-balance",
            WithdrawalPolicy::PhasedMultiplier { .. } => "phased-multiplier",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub starting_value: f64,
    pub starting_age: u32,
    pub horizon_years: u32,
    pub simulations: u32,
    pub seed: u64,
    pub market: MarketAssumptions,
    pub policy: WithdrawalPolicy,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            starting_value: 1_000_000.0,
            starting_age: 65,
            horizon_years: 30,
            simulations: 1_000,
            seed: 42,
            market: MarketAssumptions::default(),
            policy: WithdrawalPolicy::trinity(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearRecord {
    pub year: u32,
    pub age: u32,
    pub balance_start: f64,
    pub withdrawal: f64,
    pub balance_end: f64,
    pub return_applied: f64,
    pub inflation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationPath {
    pub initial_value: f64,
    pub years: Vec<YearRecord>,
}

impl SimulationPath {
    pub fn final_value(&self) -> f64 {
        self.years
            .last()
            .map(|y| y.balance_end)
            .unwrap_or(self.initial_value)
    }
}
