mod depletion;
mod engine;
mod ensemble;
mod error;
mod paths;
mod policy;
mod stats;
mod sweep;
mod types;
mod utility;

pub use depletion::{DepletionAnalysis, DepletionMetrics};
pub use engine::{Engine, simulate, validate_config};
pub use ensemble::ResultEnsemble;
pub use error::{Result, SimError};
pub use paths::{INFLATION_FLOOR, MarketPaths, PathGenerator, cholesky};
pub use policy::{PolicyContext, trinity_base};
pub use stats::{
    EnsembleSummary, YearPercentiles, mean, percentile, std_dev, success_rate, summarize,
    yearly_percentiles,
};
pub use sweep::{SweepParameter, SweepPoint, sweep, sweep_grid};
pub use types::{
    AllocationPhase, AllocationSchedule, AssetClass, AssetModel, DEFAULT_BASE_RATE,
    DEFAULT_PHASE_MULTIPLIERS, DEFAULT_PHASE_OFFSETS, DEFAULT_PHASE_RATES, MarketAssumptions,
    Phase, PhaseSchedule, SimulationConfig, SimulationPath, WithdrawalPolicy, YearRecord,
};
pub use utility::EnjoymentCurve;
