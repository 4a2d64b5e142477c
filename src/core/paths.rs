use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;

use super::error::{Result, SimError};
use super::types::AssetClass;

const INFLATION_STREAM: u64 = 0x1F1A_7104_0000_0001;
const RETURN_STREAM: u64 = 0x5E7A_0A55_0000_0002;

/// Lowest yearly inflation a random draw may produce. A draw at or below
/// -100% would make the cumulative price level non-positive.
pub const INFLATION_FLOOR: f64 = -0.99;

// Diagonal pivots at or below this are treated as zero (semi-definite input).
const PIVOT_TOLERANCE: f64 = 1e-10;
const NEGATIVE_PIVOT_TOLERANCE: f64 = 1e-9;

/// Pre-generated market draws consumed by the portfolio simulator.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketPaths {
    /// `[simulation][year]`
    pub inflation: Vec<Vec<f64>>,
    /// `[simulation][year][asset]`
    pub asset_returns: Vec<Vec<Vec<f64>>>,
}

/// Seeded source of inflation and return draws.
///
/// Each simulation reads from its own ChaCha stream, so a matrix is identical
/// whether rows are produced sequentially or across rayon workers.
#[derive(Debug, Clone, Copy)]
pub struct PathGenerator {
    seed: u64,
}

impl PathGenerator {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Inflation rates, `[simulation][year]`. With variability disabled every
    /// cell is exactly `mean`; otherwise draws are floored at [`INFLATION_FLOOR`].
    pub fn generate_inflation(
        &self,
        mean: f64,
        std: f64,
        years: usize,
        simulations: usize,
        variability_enabled: bool,
    ) -> Vec<Vec<f64>> {
        if !variability_enabled {
            return vec![vec![mean; years]; simulations];
        }

        (0..simulations)
            .into_par_iter()
            .map(|sim| {
                let mut rng = self.stream(INFLATION_STREAM, sim);
                (0..years)
                    .map(|_| {
                        let z: f64 = rng.sample(StandardNormal);
                        (mean + std * z).max(INFLATION_FLOOR)
                    })
                    .collect()
            })
            .collect()
    }

    /// Asset returns, `[simulation][year][asset]`.
    ///
    /// Independent standard normals are correlated through the Cholesky factor of
    /// `correlation` and mapped to `real_return + volatility * z`. A single asset
    /// skips the correlation step.
    pub fn generate_returns(
        &self,
        assets: &[AssetClass],
        correlation: &[Vec<f64>],
        years: usize,
        simulations: usize,
    ) -> Result<Vec<Vec<Vec<f64>>>> {
        if assets.is_empty() {
            return Err(SimError::config("at least one asset class is required"));
        }

        let factor = if assets.len() > 1 {
            if correlation.len() != assets.len() {
                return Err(SimError::numerical(format!(
                    "correlation matrix is {}x{} but {} asset classes were given",
                    correlation.len(),
                    correlation.len(),
                    assets.len()
                )));
            }
            Some(cholesky(correlation)?)
        } else {
            None
        };

        let paths = (0..simulations)
            .into_par_iter()
            .map(|sim| {
                let mut rng = self.stream(RETURN_STREAM, sim);
                let mut independent = vec![0.0; assets.len()];
                (0..years)
                    .map(|_| {
                        for z in independent.iter_mut() {
                            *z = rng.sample(StandardNormal);
                        }
                        let correlated = match &factor {
                            Some(l) => lower_triangular_mul(l, &independent),
                            None => independent.clone(),
                        };
                        assets
                            .iter()
                            .zip(correlated)
                            .map(|(asset, z)| asset.real_return + asset.volatility * z)
                            .collect()
                    })
                    .collect()
            })
            .collect();

        Ok(paths)
    }

    pub fn generate(
        &self,
        assets: &[AssetClass],
        correlation: &[Vec<f64>],
        inflation_mean: f64,
        inflation_std: f64,
        variability_enabled: bool,
        years: usize,
        simulations: usize,
    ) -> Result<MarketPaths> {
        let asset_returns = self.generate_returns(assets, correlation, years, simulations)?;
        let inflation = self.generate_inflation(
            inflation_mean,
            inflation_std,
            years,
            simulations,
            variability_enabled,
        );
        Ok(MarketPaths {
            inflation,
            asset_returns,
        })
    }

    fn stream(&self, salt: u64, sim: usize) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::seed_from_u64(splitmix64(self.seed ^ salt));
        rng.set_stream(sim as u64);
        rng
    }
}

/// Lower-triangular `L` with `L * L^T = matrix` for a symmetric positive
/// semi-definite matrix. Zero pivots are allowed when the rest of their column
/// is also zero (perfectly correlated assets).
pub fn cholesky(matrix: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
    let n = matrix.len();
    if matrix.iter().any(|row| row.len() != n) {
        return Err(SimError::numerical("correlation matrix is not square"));
    }

    let mut l = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[i][k] * l[j][k]).sum();
            let residual = matrix[i][j] - sum;
            if !residual.is_finite() {
                return Err(SimError::numerical(format!(
                    "non-finite entry at ({i}, {j}) during factorization"
                )));
            }

            if i == j {
                if residual < -NEGATIVE_PIVOT_TOLERANCE {
                    return Err(SimError::numerical(format!(
                        "matrix is not positive semi-definite (pivot {i} = {residual})"
                    )));
                }
                l[i][i] = residual.max(0.0).sqrt();
            } else if l[j][j] > PIVOT_TOLERANCE {
                l[i][j] = residual / l[j][j];
            } else if residual.abs() > NEGATIVE_PIVOT_TOLERANCE {
                return Err(SimError::numerical(format!(
                    "matrix is not positive semi-definite (zero pivot {j} with residual {residual} at row {i})"
                )));
            }
        }
    }

    Ok(l)
}

fn lower_triangular_mul(l: &[Vec<f64>], z: &[f64]) -> Vec<f64> {
    l.iter()
        .enumerate()
        .map(|(i, row)| row[..=i].iter().zip(z).map(|(a, b)| a * b).sum())
        .collect()
}

pub(crate) fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}
