use serde::Serialize;

use super::ensemble::ResultEnsemble;
use super::stats::{mean, percentile, std_dev};

/// When and how often paths run out of money.
///
/// A path's depletion year is the first portfolio column (0..=years) whose
/// value is at or below zero.
#[derive(Debug, Clone, PartialEq)]
pub struct DepletionAnalysis {
    starting_age: u32,
    columns: usize,
    depletion_years: Vec<Option<usize>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepletionMetrics {
    pub total_simulations: usize,
    pub depleted_simulations: usize,
    pub depletion_rate: f64,
    pub never_depleted_rate: f64,
    pub mean_depletion_year: Option<f64>,
    pub median_depletion_year: Option<f64>,
    /// Population standard deviation of the depletion year; 0 when nothing depletes.
    pub depletion_std: f64,
    pub earliest_depletion_year: Option<usize>,
    pub earliest_depletion_age: Option<u32>,
    /// 5th and 1st percentile depletion years (the early tail) and their ages.
    pub var_95_year: Option<f64>,
    pub var_95_age: Option<f64>,
    pub var_99_year: Option<f64>,
    pub var_99_age: Option<f64>,
    pub survival_at_80: f64,
    pub survival_at_90: f64,
    pub survival_at_100: f64,
}

impl DepletionAnalysis {
    pub fn new(ensemble: &ResultEnsemble) -> Self {
        let depletion_years = ensemble
            .portfolio_values()
            .iter()
            .map(|row| row.iter().position(|&v| v <= 0.0))
            .collect();
        Self {
            starting_age: ensemble.starting_age(),
            columns: ensemble.years() + 1,
            depletion_years,
        }
    }

    pub fn depletion_years(&self) -> &[Option<usize>] {
        &self.depletion_years
    }

    pub fn depletion_ages(&self) -> Vec<Option<u32>> {
        self.depletion_years
            .iter()
            .map(|year| year.map(|y| self.starting_age + y as u32))
            .collect()
    }

    fn depleted(&self) -> Vec<f64> {
        self.depletion_years
            .iter()
            .flatten()
            .map(|&y| y as f64)
            .collect()
    }

    pub fn depletion_rate(&self) -> f64 {
        if self.depletion_years.is_empty() {
            return 0.0;
        }
        self.depletion_years.iter().flatten().count() as f64 / self.depletion_years.len() as f64
    }

    /// Percentile of depletion year among paths that deplete; `None` when none do.
    pub fn depletion_year_percentile(&self, p: f64) -> Option<f64> {
        let depleted = self.depleted();
        if depleted.is_empty() {
            None
        } else {
            Some(percentile(&depleted, p))
        }
    }

    pub fn depletion_age_percentile(&self, p: f64) -> Option<f64> {
        self.depletion_year_percentile(p)
            .map(|year| self.starting_age as f64 + year)
    }

    /// Fraction of paths not yet depleted at each year index.
    pub fn survival_curve(&self) -> Vec<f64> {
        let n = self.depletion_years.len().max(1) as f64;
        (0..self.columns)
            .map(|year| {
                self.depletion_years
                    .iter()
                    .filter(|d| d.is_none_or(|depleted| depleted > year))
                    .count() as f64
                    / n
            })
            .collect()
    }

    /// Survival probability at `age`: 1.0 before the start age and the final
    /// value past the end of the horizon.
    pub fn survival_at_age(&self, age: u32) -> f64 {
        if age < self.starting_age {
            return 1.0;
        }
        let curve = self.survival_curve();
        let idx = ((age - self.starting_age) as usize).min(curve.len().saturating_sub(1));
        curve.get(idx).copied().unwrap_or(1.0)
    }

    pub fn metrics(&self) -> DepletionMetrics {
        let depleted = self.depleted();
        let earliest = self.depletion_years.iter().flatten().min().copied();
        let rate = self.depletion_rate();
        let var_95 = self.depletion_year_percentile(5.0);
        let var_99 = self.depletion_year_percentile(1.0);
        let to_age = |year: f64| self.starting_age as f64 + year;
        DepletionMetrics {
            total_simulations: self.depletion_years.len(),
            depleted_simulations: depleted.len(),
            depletion_rate: rate,
            never_depleted_rate: 1.0 - rate,
            mean_depletion_year: (!depleted.is_empty()).then(|| mean(&depleted)),
            median_depletion_year: self.depletion_year_percentile(50.0),
            depletion_std: std_dev(&depleted),
            earliest_depletion_year: earliest,
            earliest_depletion_age: earliest.map(|y| self.starting_age + y as u32),
            var_95_year: var_95,
            var_95_age: var_95.map(to_age),
            var_99_year: var_99,
            var_99_age: var_99.map(to_age),
            survival_at_80: self.survival_at_age(80),
            survival_at_90: self.survival_at_age(90),
            survival_at_100: self.survival_at_age(100),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::simulate;
    use crate::core::types::{MarketAssumptions, SimulationConfig, WithdrawalPolicy};

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn config(policy: WithdrawalPolicy) -> SimulationConfig {
        SimulationConfig {
            starting_value: 100_000.0,
            starting_age: 70,
            horizon_years: 10,
            simulations: 3,
            seed: 5,
            market: MarketAssumptions {
                base_real_return: 0.0,
                return_volatility: 0.0,
                base_inflation: 0.0,
                inflation_volatility: 0.0,
                inflation_variability: false,
                assets: None,
            },
            policy,
        }
    }

    #[test]
    fn deterministic_depletion_lands_on_expected_year() {
        // 25,000 a year from 100,000 empties the portfolio after year 3.
        let ensemble = simulate(config(WithdrawalPolicy::FixedNominal(0.25))).unwrap();
        let analysis = DepletionAnalysis::new(&ensemble);

        assert_eq!(analysis.depletion_years(), &[Some(4), Some(4), Some(4)]);
        assert_eq!(analysis.depletion_ages(), vec![Some(74); 3]);
        assert_approx(analysis.depletion_rate(), 1.0);
        assert_approx(analysis.depletion_age_percentile(50.0).unwrap(), 74.0);

        let curve = analysis.survival_curve();
        assert_eq!(curve.len(), 11);
        assert_approx(curve[3], 1.0);
        assert_approx(curve[4], 0.0);
        assert_approx(analysis.survival_at_age(60), 1.0);
        assert_approx(analysis.survival_at_age(73), 1.0);
        assert_approx(analysis.survival_at_age(74), 0.0);
        assert_approx(analysis.survival_at_age(120), 0.0);

        let metrics = analysis.metrics();
        assert_eq!(metrics.depleted_simulations, 3);
        assert_eq!(metrics.earliest_depletion_age, Some(74));
        assert_approx(metrics.mean_depletion_year.unwrap(), 4.0);
        assert_approx(metrics.depletion_std, 0.0);
        assert_approx(metrics.var_99_age.unwrap(), 74.0);
        assert_approx(metrics.survival_at_80, 0.0);
    }

    #[test]
    fn sustainable_policy_never_depletes() {
        let ensemble = simulate(config(WithdrawalPolicy::PercentOfBalance(0.05))).unwrap();
        let analysis = DepletionAnalysis::new(&ensemble);
        assert!(analysis.depletion_years().iter().all(Option::is_none));
        assert_eq!(analysis.depletion_year_percentile(50.0), None);
        assert!(analysis.survival_curve().iter().all(|&p| p == 1.0));

        let metrics = analysis.metrics();
        assert_approx(metrics.never_depleted_rate, 1.0);
        assert_eq!(metrics.mean_depletion_year, None);
        assert_eq!(metrics.earliest_depletion_year, None);
        assert_approx(metrics.depletion_std, 0.0);
        assert_eq!(metrics.var_95_year, None);
        assert_approx(metrics.survival_at_80, 1.0);
    }

    #[test]
    fn risk_metrics_cover_spread_tail_and_milestones() {
        let analysis = DepletionAnalysis {
            starting_age: 65,
            columns: 31,
            depletion_years: vec![Some(10), Some(20), None, None],
        };
        let metrics = analysis.metrics();

        assert_approx(metrics.mean_depletion_year.unwrap(), 15.0);
        assert_approx(metrics.depletion_std, 5.0);
        assert_approx(metrics.var_95_year.unwrap(), 10.5);
        assert_approx(metrics.var_95_age.unwrap(), 75.5);
        assert_approx(metrics.var_99_year.unwrap(), 10.1);
        assert_approx(metrics.var_99_age.unwrap(), 75.1);
        // Age 80 is year 15: only the path depleting at year 10 is gone.
        assert_approx(metrics.survival_at_80, 0.75);
        assert_approx(metrics.survival_at_90, 0.5);
        // Past the horizon the final survival probability holds.
        assert_approx(metrics.survival_at_100, 0.5);

        let json = serde_json::to_value(&metrics).unwrap();
        assert!(json.get("var95Year").is_some());
        assert!(json.get("survivalAt100").is_some());
    }

    #[test]
    fn survival_curve_is_non_increasing_under_volatility() {
        let mut cfg = config(WithdrawalPolicy::FixedReal(0.07));
        cfg.simulations = 400;
        cfg.horizon_years = 35;
        cfg.market.base_real_return = 0.02;
        cfg.market.return_volatility = 0.18;
        let ensemble = simulate(cfg).unwrap();
        let analysis = DepletionAnalysis::new(&ensemble);

        let curve = analysis.survival_curve();
        assert_approx(curve[0], 1.0);
        for pair in curve.windows(2) {
            assert!(pair[1] <= pair[0]);
        }
        assert_approx(curve[35], 1.0 - analysis.depletion_rate());
    }
}
