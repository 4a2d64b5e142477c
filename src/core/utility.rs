use super::ensemble::ResultEnsemble;

/// Age-dependent capacity to enjoy spending, used to weight real withdrawals.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum EnjoymentCurve {
    /// 1.0 until 65, -2%/yr to 75, -4%/yr to 85, then -3%/yr with a 0.2 floor.
    #[default]
    Decay,
    Flat,
}

impl EnjoymentCurve {
    pub fn factor(self, age: u32) -> f64 {
        match self {
            EnjoymentCurve::Flat => 1.0,
            EnjoymentCurve::Decay => {
                let age = age as f64;
                if age < 65.0 {
                    1.0
                } else if age < 75.0 {
                    1.0 - (age - 65.0) * 0.02
                } else if age < 85.0 {
                    0.8 - (age - 75.0) * 0.04
                } else {
                    (0.4 - (age - 85.0) * 0.03).max(0.2)
                }
            }
        }
    }

    /// Sum over years of real withdrawal times the enjoyment factor at that age.
    pub fn utility_scores(self, ensemble: &ResultEnsemble) -> Vec<f64> {
        let factors: Vec<f64> = (0..ensemble.years())
            .map(|year| self.factor(ensemble.age_at(year)))
            .collect();
        (0..ensemble.simulations())
            .map(|sim| {
                ensemble
                    .real_withdrawals(sim)
                    .iter()
                    .zip(&factors)
                    .map(|(w, f)| w * f)
                    .sum()
            })
            .collect()
    }
}
