use serde::{Deserialize, Serialize};

/// Per-column standardisation fitted on training rows only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    mean: Vec<f64>,
    std: Vec<f64>,
}

impl Scaler {
    /// Fit column means and standard deviations.
    ///
    /// Constant columns get a unit scale so transform stays finite.
    pub fn fit<'a, I>(rows: I, columns: usize) -> Self
    where
        I: IntoIterator<Item = &'a [f64]>,
    {
        let mut count = 0usize;
        let mut mean = vec![0.0; columns];
        let mut m2 = vec![0.0; columns];

        // Welford per column
        for row in rows {
            count += 1;
            for (c, &value) in row.iter().take(columns).enumerate() {
                let delta = value - mean[c];
                mean[c] += delta / count as f64;
                m2[c] += delta * (value - mean[c]);
            }
        }

        let std = m2
            .iter()
            .map(|&m| {
                let s = if count > 1 {
                    (m / count as f64).sqrt()
                } else {
                    0.0
                };
                if s > 1e-12 && s.is_finite() {
                    s
                } else {
                    1.0
                }
            })
            .collect();

        Self { mean, std }
    }

    pub fn columns(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, row: &mut [f64]) {
        for (c, value) in row.iter_mut().enumerate().take(self.mean.len()) {
            *value = (*value - self.mean[c]) / self.std[c];
        }
    }

    pub fn inverse(&self, row: &mut [f64]) {
        for (c, value) in row.iter_mut().enumerate().take(self.mean.len()) {
            *value = *value * self.std[c] + self.mean[c];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standardises_columns() {
        let rows = [vec![1.0, 10.0], vec![3.0, 10.0], vec![5.0, 10.0]];
        let scaler = Scaler::fit(rows.iter().map(|r| r.as_slice()), 2);

        let mut row = vec![3.0, 10.0];
        scaler.transform(&mut row);
        assert!(row[0].abs() < 1e-12);
        // constant column keeps unit scale
        assert_eq!(row[1], 0.0);

        let mut high = vec![5.0, 12.0];
        scaler.transform(&mut high);
        assert!((high[0] - 1.224744871391589).abs() < 1e-9);
        assert_eq!(high[1], 2.0);

        scaler.inverse(&mut high);
        assert!((high[0] - 5.0).abs() < 1e-9);
        assert!((high[1] - 12.0).abs() < 1e-9);
    }
}
