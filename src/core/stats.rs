use serde::Serialize;

use super::depletion::DepletionAnalysis;
use super::ensemble::ResultEnsemble;
use super::utility::EnjoymentCurve;

/// Linear-interpolated percentile, `p` in 0..=100. Empty input yields 0.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    let mut sorted = values.to_vec();
    percentile_in_place(&mut sorted, p)
}

pub(crate) fn percentile_in_place(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p.clamp(0.0, 100.0) / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

/// Fraction of simulations whose final balance is strictly above `threshold`.
pub fn success_rate(ensemble: &ResultEnsemble, threshold: f64) -> f64 {
    let finals = ensemble.final_values();
    if finals.is_empty() {
        return 0.0;
    }
    finals.iter().filter(|&&v| v > threshold).count() as f64 / finals.len() as f64
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearPercentiles {
    pub year: u32,
    pub age: u32,
    pub p10_portfolio: f64,
    pub median_portfolio: f64,
    pub p90_portfolio: f64,
    pub median_withdrawal: f64,
    pub median_real_withdrawal: f64,
    pub survival_probability: f64,
}

pub fn yearly_percentiles(ensemble: &ResultEnsemble) -> Vec<YearPercentiles> {
    let real: Vec<Vec<f64>> = (0..ensemble.simulations())
        .map(|sim| ensemble.real_withdrawals(sim))
        .collect();
    let survival = DepletionAnalysis::new(ensemble).survival_curve();

    (0..ensemble.years())
        .map(|year| {
            let mut end = ensemble.portfolio_at(year + 1);
            let mut withdrawals = ensemble.withdrawals_at(year);
            let mut real_withdrawals: Vec<f64> = real.iter().map(|row| row[year]).collect();
            YearPercentiles {
                year: year as u32,
                age: ensemble.age_at(year),
                p10_portfolio: percentile_in_place(&mut end, 10.0),
                median_portfolio: percentile_in_place(&mut end, 50.0),
                p90_portfolio: percentile_in_place(&mut end, 90.0),
                median_withdrawal: percentile_in_place(&mut withdrawals, 50.0),
                median_real_withdrawal: percentile_in_place(&mut real_withdrawals, 50.0),
                survival_probability: survival[year],
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsembleSummary {
    pub policy: &'static str,
    pub simulations: usize,
    pub years: usize,
    pub success_threshold: f64,
    pub success_rate: f64,
    pub mean_final_value: f64,
    pub median_final_value: f64,
    pub p10_final_value: f64,
    pub p90_final_value: f64,
    pub median_total_withdrawn: f64,
    pub median_total_withdrawn_real: f64,
    pub depletion_rate: f64,
    pub median_depletion_age: Option<f64>,
    pub median_utility: f64,
}

pub fn summarize(ensemble: &ResultEnsemble, success_threshold: f64) -> EnsembleSummary {
    let mut finals = ensemble.final_values();
    let mut totals = ensemble.total_withdrawals();
    let mut totals_real = ensemble.total_withdrawals_real();
    let mut utility = EnjoymentCurve::default().utility_scores(ensemble);
    let depletion = DepletionAnalysis::new(ensemble);

    EnsembleSummary {
        policy: ensemble.policy().name(),
        simulations: ensemble.simulations(),
        years: ensemble.years(),
        success_threshold,
        success_rate: success_rate(ensemble, success_threshold),
        mean_final_value: mean(&finals),
        median_final_value: percentile_in_place(&mut finals, 50.0),
        p10_final_value: percentile_in_place(&mut finals, 10.0),
        p90_final_value: percentile_in_place(&mut finals, 90.0),
        median_total_withdrawn: percentile_in_place(&mut totals, 50.0),
        median_total_withdrawn_real: percentile_in_place(&mut totals_real, 50.0),
        depletion_rate: depletion.depletion_rate(),
        median_depletion_age: depletion
            .depletion_year_percentile(50.0)
            .map(|year| ensemble.starting_age() as f64 + year),
        median_utility: percentile_in_place(&mut utility, 50.0),
    }
}
