use super::types::{SimulationPath, WithdrawalPolicy, YearRecord};

/// All paths from one run as parallel `[simulation][year]` matrices.
///
/// `portfolio` has `years + 1` columns: column 0 is the starting value and
/// column `k + 1` is the balance after year `k`'s withdrawal and return.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultEnsemble {
    pub(crate) starting_value: f64,
    pub(crate) starting_age: u32,
    pub(crate) policy: WithdrawalPolicy,
    pub(crate) portfolio: Vec<Vec<f64>>,
    pub(crate) withdrawals: Vec<Vec<f64>>,
    pub(crate) returns: Vec<Vec<f64>>,
    pub(crate) inflation: Vec<Vec<f64>>,
    /// `[asset][simulation][year]`, the draws before blending.
    pub(crate) asset_returns: Vec<Vec<Vec<f64>>>,
    pub(crate) asset_names: Vec<String>,
    /// Per-year allocation weights (same for every simulation).
    pub(crate) allocations: Vec<Vec<f64>>,
    /// Per-year active withdrawal phase, for phased policies.
    pub(crate) phases: Vec<Option<usize>>,
}

impl ResultEnsemble {
    pub fn simulations(&self) -> usize {
        self.portfolio.len()
    }

    pub fn years(&self) -> usize {
        self.withdrawals.first().map_or(0, Vec::len)
    }

    pub fn starting_value(&self) -> f64 {
        self.starting_value
    }

    pub fn starting_age(&self) -> u32 {
        self.starting_age
    }

    pub fn policy(&self) -> &WithdrawalPolicy {
        &self.policy
    }

    pub fn age_at(&self, year: usize) -> u32 {
        self.starting_age + year as u32
    }

    pub fn portfolio_values(&self) -> &[Vec<f64>] {
        &self.portfolio
    }

    pub fn withdrawals(&self) -> &[Vec<f64>] {
        &self.withdrawals
    }

    pub fn returns(&self) -> &[Vec<f64>] {
        &self.returns
    }

    pub fn inflation(&self) -> &[Vec<f64>] {
        &self.inflation
    }

    pub fn asset_names(&self) -> &[String] {
        &self.asset_names
    }

    pub fn asset_returns(&self, asset: usize) -> Option<&[Vec<f64>]> {
        self.asset_returns.get(asset).map(Vec::as_slice)
    }

    pub fn allocations(&self) -> &[Vec<f64>] {
        &self.allocations
    }

    pub fn phases(&self) -> &[Option<usize>] {
        &self.phases
    }

    /// Portfolio values across simulations at column `index` (0 = start).
    pub fn portfolio_at(&self, index: usize) -> Vec<f64> {
        self.portfolio.iter().map(|row| row[index]).collect()
    }

    pub fn withdrawals_at(&self, year: usize) -> Vec<f64> {
        self.withdrawals.iter().map(|row| row[year]).collect()
    }

    pub fn final_values(&self) -> Vec<f64> {
        self.portfolio
            .iter()
            .map(|row| row.last().copied().unwrap_or(self.starting_value))
            .collect()
    }

    pub fn total_withdrawals(&self) -> Vec<f64> {
        self.withdrawals.iter().map(|row| row.iter().sum()).collect()
    }

    /// Cumulative inflation factor in effect for `year` of `sim` (1.0 for year 0).
    pub fn deflator(&self, sim: usize, year: usize) -> f64 {
        self.inflation[sim][..year]
            .iter()
            .fold(1.0, |acc, rate| acc * (1.0 + rate))
    }

    /// Withdrawals of `sim` deflated to year-0 purchasing power.
    pub fn real_withdrawals(&self, sim: usize) -> Vec<f64> {
        let mut factor = 1.0;
        self.withdrawals[sim]
            .iter()
            .zip(&self.inflation[sim])
            .map(|(withdrawal, rate)| {
                let real = withdrawal / factor;
                factor *= 1.0 + rate;
                real
            })
            .collect()
    }

    pub fn total_withdrawals_real(&self) -> Vec<f64> {
        (0..self.simulations())
            .map(|sim| self.real_withdrawals(sim).iter().sum())
            .collect()
    }

    pub fn path(&self, sim: usize) -> SimulationPath {
        let row = &self.portfolio[sim];
        let years = (0..self.years())
            .map(|year| YearRecord {
                year: year as u32,
                age: self.age_at(year),
                balance_start: row[year],
                withdrawal: self.withdrawals[sim][year],
                balance_end: row[year + 1],
                return_applied: self.returns[sim][year],
                inflation: self.inflation[sim][year],
            })
            .collect();
        SimulationPath {
            initial_value: row[0],
            years,
        }
    }

    pub fn paths(&self) -> impl Iterator<Item = SimulationPath> + '_ {
        (0..self.simulations()).map(|sim| self.path(sim))
    }
}
