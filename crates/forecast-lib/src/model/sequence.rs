//! Recurrent sequence model
//!
//! Two stacked LSTM layers with dropout between them, then a dense
//! projection to the target vector. Built only with the `sequence`
//! feature; otherwise [`runtime_available`] is false and fitting fails.

pub use imp::{fit, SequenceModel};

/// Whether this build can train and run the sequence model
pub fn runtime_available() -> bool {
    cfg!(feature = "sequence")
}

#[cfg(feature = "sequence")]
mod imp {
    use crate::error::{ForecastError, ForecastResult};
    use crate::features::{Scaler, TrainingSet, TrainingWindow, STEP_FEATURES};
    use crate::model::{ResourceBudget, TrainingGuard};
    use crate::models::{TargetValues, NUM_TARGETS};
    use anyhow::{anyhow, Result};
    use burn::backend::{Autodiff, NdArray};
    use burn::module::AutodiffModule;
    use burn::nn::loss::{MseLoss, Reduction};
    use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig, Lstm, LstmConfig, Relu};
    use burn::optim::{AdamConfig, GradientsParams, Optimizer};
    use burn::prelude::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use std::sync::Mutex;
    use tracing::debug;

    const HIDDEN_1: usize = 64;
    const HIDDEN_2: usize = 32;
    const DENSE: usize = 16;
    const DROPOUT: f64 = 0.2;
    const LEARNING_RATE: f64 = 1e-3;
    const EARLY_STOPPING_PATIENCE: usize = 10;

    type TrainBackend = Autodiff<NdArray>;

    #[derive(Module, Debug)]
    pub struct SequenceNet<B: Backend> {
        lstm1: Lstm<B>,
        dropout: Dropout,
        lstm2: Lstm<B>,
        dense: Linear<B>,
        activation: Relu,
        output: Linear<B>,
    }

    impl<B: Backend> SequenceNet<B> {
        fn new(device: &B::Device) -> Self {
            Self {
                lstm1: LstmConfig::new(STEP_FEATURES, HIDDEN_1, true).init(device),
                dropout: DropoutConfig::new(DROPOUT).init(),
                lstm2: LstmConfig::new(HIDDEN_1, HIDDEN_2, true).init(device),
                dense: LinearConfig::new(HIDDEN_2, DENSE).init(device),
                activation: Relu::new(),
                output: LinearConfig::new(DENSE, NUM_TARGETS).init(device),
            }
        }

        /// `[batch, steps, features]` to `[batch, targets]`
        fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 2> {
            let (seq, _) = self.lstm1.forward(input, None);
            let seq = self.dropout.forward(seq);
            let (seq, _) = self.lstm2.forward(seq, None);
            let [batch, steps, hidden] = seq.dims();
            let last = seq
                .slice([0..batch, steps - 1..steps, 0..hidden])
                .reshape([batch, hidden]);
            let last = self.dropout.forward(last);
            let x = self.activation.forward(self.dense.forward(last));
            self.output.forward(x)
        }
    }

    /// Trained network plus the scalers fitted on its training split
    #[derive(Debug)]
    pub struct SequenceModel {
        net: Mutex<SequenceNet<NdArray>>,
        features: Scaler,
        targets: Scaler,
        epochs: usize,
    }

    impl SequenceModel {
        pub fn epochs(&self) -> usize {
            self.epochs
        }

        pub fn predict(&self, window: &TrainingWindow) -> Result<TargetValues> {
            let device = Default::default();
            let input = input_tensor::<NdArray>(&[window], &self.features, &device);
            let output = {
                let net = self
                    .net
                    .lock()
                    .map_err(|_| anyhow!("sequence model lock poisoned"))?;
                net.forward(input)
            };
            let values: Vec<f32> = output
                .into_data()
                .to_vec()
                .map_err(|e| anyhow!("reading sequence output: {:?}", e))?;
            if values.len() != NUM_TARGETS {
                return Err(anyhow!("sequence output has {} values", values.len()));
            }
            let mut row: Vec<f64> = values.iter().map(|&v| v as f64).collect();
            self.targets.inverse(&mut row);
            Ok(TargetValues::from_array([row[0], row[1], row[2], row[3]]))
        }
    }

    fn input_tensor<B: Backend>(
        windows: &[&TrainingWindow],
        scaler: &Scaler,
        device: &B::Device,
    ) -> Tensor<B, 3> {
        let steps = windows.first().map(|w| w.len()).unwrap_or(0);
        let mut data = Vec::with_capacity(windows.len() * steps * STEP_FEATURES);
        for window in windows {
            for row in window.steps() {
                let mut scaled = *row;
                scaler.transform(&mut scaled);
                data.extend(scaled.iter().map(|&v| v as f32));
            }
        }
        Tensor::<B, 1>::from_floats(data.as_slice(), device).reshape([
            windows.len(),
            steps,
            STEP_FEATURES,
        ])
    }

    fn target_tensor<B: Backend>(
        targets: &[&TargetValues],
        scaler: &Scaler,
        device: &B::Device,
    ) -> Tensor<B, 2> {
        let mut data = Vec::with_capacity(targets.len() * NUM_TARGETS);
        for target in targets {
            let mut row = target.to_array();
            scaler.transform(&mut row);
            data.extend(row.iter().map(|&v| v as f32));
        }
        Tensor::<B, 1>::from_floats(data.as_slice(), device).reshape([targets.len(), NUM_TARGETS])
    }

    fn scalar<B: Backend>(loss: Tensor<B, 1>) -> f32 {
        loss.into_data()
            .to_vec::<f32>()
            .ok()
            .and_then(|v| v.first().copied())
            .unwrap_or(f32::NAN)
    }

    /// Fit on `set[..split]`, early-stopping on `set[split..]`
    pub fn fit(
        set: &TrainingSet,
        split: usize,
        budget: &ResourceBudget,
        seed: u64,
        guard: &TrainingGuard,
    ) -> ForecastResult<SequenceModel> {
        if split == 0 || split >= set.len() {
            return Err(ForecastError::TrainingFailed(
                "sequence model needs both training and validation samples".to_string(),
            ));
        }
        let windows = set.windows();
        let targets = set.targets();

        let features = Scaler::fit(
            windows[..split]
                .iter()
                .flat_map(|w| w.steps().iter().map(|row| row.as_slice())),
            STEP_FEATURES,
        );
        let target_rows: Vec<[f64; NUM_TARGETS]> =
            targets[..split].iter().map(|t| t.to_array()).collect();
        let target_scaler = Scaler::fit(target_rows.iter().map(|r| r.as_slice()), NUM_TARGETS);

        let device = Default::default();
        let mut model = SequenceNet::<TrainBackend>::new(&device);
        let mut optimizer = AdamConfig::new().init();
        let loss_fn = MseLoss::new();
        let mut rng = StdRng::seed_from_u64(seed);

        let valid_windows: Vec<&TrainingWindow> = windows[split..].iter().collect();
        let valid_targets: Vec<&TargetValues> = targets[split..].iter().collect();

        let mut best: Option<SequenceNet<TrainBackend>> = None;
        let mut best_loss = f32::MAX;
        let mut stale = 0;
        let mut epochs = 0;
        let mut order: Vec<usize> = (0..split).collect();

        for epoch in 0..budget.max_epochs {
            guard.check()?;
            order.shuffle(&mut rng);

            for batch in order.chunks(budget.max_batch_size) {
                let bw: Vec<&TrainingWindow> = batch.iter().map(|&i| &windows[i]).collect();
                let bt: Vec<&TargetValues> = batch.iter().map(|&i| &targets[i]).collect();
                let input = input_tensor::<TrainBackend>(&bw, &features, &device);
                let expected = target_tensor::<TrainBackend>(&bt, &target_scaler, &device);

                let loss = loss_fn.forward(model.forward(input), expected, Reduction::Mean);
                if !scalar(loss.clone()).is_finite() {
                    return Err(ForecastError::TrainingFailed(format!(
                        "sequence loss diverged at epoch {}",
                        epoch + 1
                    )));
                }
                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optimizer.step(LEARNING_RATE, model, grads);
            }
            epochs = epoch + 1;

            let valid = model.valid();
            let input = input_tensor::<NdArray>(&valid_windows, &features, &device);
            let expected = target_tensor::<NdArray>(&valid_targets, &target_scaler, &device);
            let valid_loss = scalar(loss_fn.forward(valid.forward(input), expected, Reduction::Mean));
            if !valid_loss.is_finite() {
                return Err(ForecastError::TrainingFailed(
                    "non-finite validation loss".to_string(),
                ));
            }
            debug!(epoch = epochs, valid_loss = valid_loss, "Sequence epoch");

            if valid_loss < best_loss {
                best_loss = valid_loss;
                best = Some(model.clone());
                stale = 0;
            } else {
                stale += 1;
                if stale >= EARLY_STOPPING_PATIENCE {
                    debug!(epoch = epochs, "Early stopping");
                    break;
                }
            }
        }

        let net = best.unwrap_or(model).valid();
        Ok(SequenceModel {
            net: Mutex::new(net),
            features,
            targets: target_scaler,
            epochs,
        })
    }

}

#[cfg(not(feature = "sequence"))]
mod imp {
    use crate::error::{ForecastError, ForecastResult};
    use crate::features::{TrainingSet, TrainingWindow};
    use crate::model::{ResourceBudget, TrainingGuard};
    use crate::models::TargetValues;
    use anyhow::Result;

    /// Uninhabited without the `sequence` feature
    #[derive(Debug)]
    pub enum SequenceModel {}

    impl SequenceModel {
        pub fn epochs(&self) -> usize {
            match *self {}
        }

        pub fn predict(&self, _window: &TrainingWindow) -> Result<TargetValues> {
            match *self {}
        }
    }

    pub fn fit(
        _set: &TrainingSet,
        _split: usize,
        _budget: &ResourceBudget,
        _seed: u64,
        _guard: &TrainingGuard,
    ) -> ForecastResult<SequenceModel> {
        Err(ForecastError::TrainingFailed(
            "sequence runtime not available in this build".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_flag_matches_build() {
        assert_eq!(runtime_available(), cfg!(feature = "sequence"));
    }
}
