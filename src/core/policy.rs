use super::error::{Result, SimError};
use super::types::{
    AllocationSchedule, DEFAULT_BASE_RATE, DEFAULT_PHASE_MULTIPLIERS, DEFAULT_PHASE_OFFSETS,
    Phase, PhaseSchedule, WithdrawalPolicy,
};

const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

/// Everything a withdrawal policy may look at for one (simulation, year) cell.
#[derive(Debug, Clone, Copy)]
pub struct PolicyContext {
    pub year: u32,
    pub age: u32,
    /// Product of `(1 + inflation)` over all years before `year`.
    pub cumulative_inflation: f64,
    pub balance: f64,
    pub starting_value: f64,
}

pub fn trinity_base(starting_value: f64, base_rate: f64, cumulative_inflation: f64) -> f64 {
    starting_value * base_rate * cumulative_inflation
}

impl PhaseSchedule {
    pub fn new(phases: Vec<Phase>) -> Result<Self> {
        if phases.is_empty() {
            return Err(SimError::config("phase schedule needs at least one phase"));
        }
        for pair in phases.windows(2) {
            if pair[1].start_age <= pair[0].start_age {
                return Err(SimError::config(format!(
                    "phase start ages must be strictly increasing ({} then {})",
                    pair[0].start_age, pair[1].start_age
                )));
            }
        }
        if let Some(bad) = phases
            .iter()
            .find(|p| !p.multiplier.is_finite() || p.multiplier < 0.0)
        {
            return Err(SimError::config(format!(
                "phase multiplier must be finite and >= 0, got {} at age {}",
                bad.multiplier, bad.start_age
            )));
        }
        Ok(Self { phases })
    }

    /// Phases whose boundaries are offsets in years from `starting_age`.
    pub fn relative(starting_age: u32, offsets_and_multipliers: &[(u32, f64)]) -> Result<Self> {
        let phases = offsets_and_multipliers
            .iter()
            .map(|&(offset, multiplier)| {
                let start_age = starting_age.checked_add(offset).ok_or_else(|| {
                    SimError::config(format!(
                        "phase offset {offset} from age {starting_age} overflows"
                    ))
                })?;
                Ok(Phase {
                    start_age,
                    multiplier,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(phases)
    }

    /// Converts per-phase withdrawal rates to multipliers of `base_rate`
    /// (5.4% over a 4% base is 1.35x).
    pub fn from_rates(
        starting_age: u32,
        offsets: &[u32],
        rates: &[f64],
        base_rate: f64,
    ) -> Result<Self> {
        if offsets.len() != rates.len() {
            return Err(SimError::config(format!(
                "{} phase offsets but {} phase rates",
                offsets.len(),
                rates.len()
            )));
        }
        if !(base_rate.is_finite() && base_rate > 0.0) {
            return Err(SimError::config("base rate must be > 0"));
        }
        let pairs: Vec<(u32, f64)> = offsets
            .iter()
            .zip(rates)
            .map(|(&offset, &rate)| (offset, rate / base_rate))
            .collect();
        Self::relative(starting_age, &pairs)
    }

    /// +0/+10/+20 years at 1.35x / 1.125x / 0.875x.
    pub fn default_for(starting_age: u32) -> Result<Self> {
        let pairs: Vec<(u32, f64)> = DEFAULT_PHASE_OFFSETS
            .into_iter()
            .zip(DEFAULT_PHASE_MULTIPLIERS)
            .collect();
        Self::relative(starting_age, &pairs)
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn phase_index(&self, age: u32) -> Option<usize> {
        self.phases.iter().rposition(|p| p.start_age <= age)
    }

    pub fn multiplier(&self, age: u32) -> Option<f64> {
        self.phase_index(age).map(|idx| self.phases[idx].multiplier)
    }
}

impl WithdrawalPolicy {
    /// Intended (pre-clamp) withdrawal for one cell. Never negative.
    pub fn withdrawal(&self, ctx: &PolicyContext) -> f64 {
        let amount = match self {
            WithdrawalPolicy::FixedReal(rate) => {
                trinity_base(ctx.starting_value, *rate, ctx.cumulative_inflation)
            }
            WithdrawalPolicy::FixedNominal(rate) => rate * ctx.starting_value,
            WithdrawalPolicy::PercentOfBalance(rate) => rate * ctx.balance,
            WithdrawalPolicy::PhasedMultiplier {
                base_rate,
                schedule,
            } => {
                // Validation guarantees the first phase covers the starting age.
                let multiplier = schedule.multiplier(ctx.age).unwrap_or(1.0);
                trinity_base(ctx.starting_value, *base_rate, ctx.cumulative_inflation) * multiplier
            }
        };
        amount.max(0.0)
    }

    pub fn phase_index(&self, age: u32) -> Option<usize> {
        match self {
            WithdrawalPolicy::PhasedMultiplier { schedule, .. } => schedule.phase_index(age),
            _ => None,
        }
    }

    pub fn validate(&self, starting_age: u32) -> Result<()> {
        let check_rate = |rate: f64| {
            if rate.is_finite() && (0.0..=1.0).contains(&rate) {
                Ok(())
            } else {
                Err(SimError::config(format!(
                    "{} rate must be between 0 and 1, got {rate}",
                    self.name()
                )))
            }
        };

        match self {
            WithdrawalPolicy::FixedReal(rate)
            | WithdrawalPolicy::FixedNominal(rate)
            | WithdrawalPolicy::PercentOfBalance(rate) => check_rate(*rate),
            WithdrawalPolicy::PhasedMultiplier {
                base_rate,
                schedule,
            } => {
                check_rate(*base_rate)?;
                // Re-run construction checks in case the schedule was built by hand in-crate.
                let schedule = PhaseSchedule::new(schedule.phases.clone())?;
                let first = schedule.phases[0].start_age;
                if first > starting_age {
                    return Err(SimError::config(format!(
                        "first phase starts at age {first}, after starting age {starting_age}"
                    )));
                }
                Ok(())
            }
        }
    }

    pub fn with_rate(&self, rate: f64) -> Self {
        match self {
            WithdrawalPolicy::FixedReal(_) => WithdrawalPolicy::FixedReal(rate),
            WithdrawalPolicy::FixedNominal(_) => WithdrawalPolicy::FixedNominal(rate),
            WithdrawalPolicy::PercentOfBalance(_) => WithdrawalPolicy::PercentOfBalance(rate),
            WithdrawalPolicy::PhasedMultiplier { schedule, .. } => {
                WithdrawalPolicy::PhasedMultiplier {
                    base_rate: rate,
                    schedule: schedule.clone(),
                }
            }
        }
    }
}

impl Default for WithdrawalPolicy {
    fn default() -> Self {
        WithdrawalPolicy::FixedReal(DEFAULT_BASE_RATE)
    }
}

impl AllocationSchedule {
    /// Asset weights at `age` for a portfolio of `assets` classes.
    pub fn weights_at(&self, age: u32, assets: usize) -> Vec<f64> {
        match self {
            AllocationSchedule::Static(weights) => weights.clone(),
            AllocationSchedule::Phased(phases) => phases
                .iter()
                .rev()
                .find(|p| p.start_age <= age)
                .or_else(|| phases.first())
                .map(|p| p.weights.clone())
                .unwrap_or_else(|| equal_weights(assets)),
            AllocationSchedule::AgeRule { base, floor, cap } => {
                let equity = (base - age as f64).clamp(*floor, *cap) / 100.0;
                vec![equity, 1.0 - equity]
            }
        }
    }

    pub fn validate(&self, assets: usize, ages: impl IntoIterator<Item = u32>) -> Result<()> {
        match self {
            AllocationSchedule::Phased(phases) => {
                if phases.is_empty() {
                    return Err(SimError::config("allocation schedule needs at least one phase"));
                }
                for pair in phases.windows(2) {
                    if pair[1].start_age <= pair[0].start_age {
                        return Err(SimError::config(
                            "allocation phase start ages must be strictly increasing",
                        ));
                    }
                }
            }
            AllocationSchedule::AgeRule { floor, cap, .. } => {
                if assets != 2 {
                    return Err(SimError::config(format!(
                        "age-rule glide path needs exactly 2 asset classes, got {assets}"
                    )));
                }
                if !(0.0 <= *floor && floor <= cap && *cap <= 100.0) {
                    return Err(SimError::config(
                        "age-rule glide path needs 0 <= floor <= cap <= 100",
                    ));
                }
            }
            AllocationSchedule::Static(_) => {}
        }

        for age in ages {
            validate_weights(&self.weights_at(age, assets), assets, age)?;
        }
        Ok(())
    }
}

fn validate_weights(weights: &[f64], assets: usize, age: u32) -> Result<()> {
    if weights.len() != assets {
        return Err(SimError::config(format!(
            "allocation at age {age} has {} weights for {assets} asset classes",
            weights.len()
        )));
    }
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(SimError::config(format!(
            "allocation weights at age {age} must be finite and >= 0"
        )));
    }
    let total: f64 = weights.iter().sum();
    if (total - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(SimError::config(format!(
            "allocation weights at age {age} sum to {total}, expected 1"
        )));
    }
    Ok(())
}

fn equal_weights(assets: usize) -> Vec<f64> {
    vec![1.0 / assets.max(1) as f64; assets]
}
