//! Bagged regression trees
//!
//! Trees are stored as flat arrays: internal node `i` splits on
//! `split_features[i] <= thresholds[i]`; a negative child `c` refers to
//! leaf `-c - 1`.

use super::TrainingGuard;
use crate::error::{ForecastError, ForecastResult};
use crate::models::{TargetValues, NUM_TARGETS};
use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Minimum rows on each side of a split
pub const MIN_SAMPLES_LEAF: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Features considered per split; `None` uses the square root of the width
    pub max_features: Option<usize>,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 20,
            min_samples_leaf: MIN_SAMPLES_LEAF,
            max_features: None,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    split_features: Vec<usize>,
    thresholds: Vec<f64>,
    left_child: Vec<i32>,
    right_child: Vec<i32>,
    leaf_values: Vec<f64>,
}

impl RegressionTree {
    pub fn node_count(&self) -> usize {
        self.split_features.len() + self.leaf_values.len()
    }

    pub fn predict(&self, features: &[f64]) -> f64 {
        if self.split_features.is_empty() {
            return self.leaf_values.first().copied().unwrap_or_default();
        }
        let mut node = 0usize;
        loop {
            let feature = self.split_features[node];
            let value = features.get(feature).copied().unwrap_or(0.0);
            let child = if value <= self.thresholds[node] {
                self.left_child[node]
            } else {
                self.right_child[node]
            };
            if child < 0 {
                let leaf = (-child - 1) as usize;
                return self.leaf_values.get(leaf).copied().unwrap_or_default();
            }
            node = child as usize;
        }
    }

    fn is_consistent(&self) -> bool {
        let internal = self.split_features.len();
        let leaves = self.leaf_values.len() as i32;
        let child_ok = |c: i32| (c < 0 && -c - 1 < leaves) || (c >= 0 && (c as usize) < internal);
        self.thresholds.len() == internal
            && self.left_child.len() == internal
            && self.right_child.len() == internal
            && !self.leaf_values.is_empty()
            && self.left_child.iter().all(|&c| child_ok(c))
            && self.right_child.iter().all(|&c| child_ok(c))
    }
}

/// Averaged trees for a single target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forest {
    trees: Vec<RegressionTree>,
}

impl Forest {
    pub fn predict(&self, features: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return f64::NAN;
        }
        self.trees.iter().map(|t| t.predict(features)).sum::<f64>() / self.trees.len() as f64
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }
}

/// One forest per target field, over a fixed-width feature vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestSet {
    feature_len: usize,
    forests: Vec<Forest>,
}

impl ForestSet {
    pub fn feature_len(&self) -> usize {
        self.feature_len
    }

    pub fn forests(&self) -> &[Forest] {
        &self.forests
    }

    pub fn predict(&self, features: &[f64]) -> Result<TargetValues> {
        if features.len() != self.feature_len {
            return Err(anyhow!(
                "feature vector has {} values, forest expects {}",
                features.len(),
                self.feature_len
            ));
        }
        let mut out = [0.0; NUM_TARGETS];
        for (slot, forest) in out.iter_mut().zip(&self.forests) {
            *slot = forest.predict(features);
        }
        Ok(TargetValues::from_array(out))
    }

    /// Structural check for sets loaded from disk
    pub fn validate(&self) -> Result<()> {
        if self.forests.len() != NUM_TARGETS {
            return Err(anyhow!(
                "expected {} forests, found {}",
                NUM_TARGETS,
                self.forests.len()
            ));
        }
        for forest in &self.forests {
            if forest.is_empty() || !forest.trees.iter().all(|t| t.is_consistent()) {
                return Err(anyhow!("malformed tree in forest set"));
            }
        }
        Ok(())
    }
}

/// Row-major design matrix borrowed from the trainer
#[derive(Debug, Clone, Copy)]
pub struct Matrix<'a> {
    data: &'a [f64],
    cols: usize,
}

impl<'a> Matrix<'a> {
    pub fn new(data: &'a [f64], cols: usize) -> Self {
        debug_assert!(cols > 0 && data.len() % cols == 0);
        Self { data, cols }
    }

    pub fn rows(&self) -> usize {
        self.data.len() / self.cols
    }

    #[inline]
    fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }
}

/// Fit one forest per target on a dedicated thread pool.
///
/// `targets[r]` holds the targets of row `r`. Returns `Cancelled` or
/// `TrainingFailed` as soon as the guard trips between tree fits.
pub fn fit_forest_set(
    x: Matrix<'_>,
    targets: &[TargetValues],
    params: &ForestParams,
    threads: usize,
    guard: &TrainingGuard,
) -> ForecastResult<ForestSet> {
    if x.rows() == 0 || x.rows() != targets.len() {
        return Err(ForecastError::TrainingFailed(format!(
            "design matrix has {} rows for {} targets",
            x.rows(),
            targets.len()
        )));
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .thread_name(|i| format!("airq-train-{}", i))
        .build()
        .map_err(|e| ForecastError::TrainingFailed(format!("thread pool: {}", e)))?;

    let mut forests = Vec::with_capacity(NUM_TARGETS);
    for target in 0..NUM_TARGETS {
        let y: Vec<f64> = targets.iter().map(|t| t.to_array()[target]).collect();
        let trees: ForecastResult<Vec<RegressionTree>> = pool.install(|| {
            (0..params.n_trees)
                .into_par_iter()
                .map(|i| {
                    guard.check()?;
                    let seed = params
                        .seed
                        .wrapping_add((target * params.n_trees + i) as u64)
                        .wrapping_mul(0x9E37_79B9_7F4A_7C15);
                    Ok(fit_tree(x, &y, params, seed))
                })
                .collect()
        });
        forests.push(Forest { trees: trees? });
    }

    Ok(ForestSet {
        feature_len: x.cols,
        forests,
    })
}

fn fit_tree(x: Matrix<'_>, y: &[f64], params: &ForestParams, seed: u64) -> RegressionTree {
    let mut rng = StdRng::seed_from_u64(seed);
    let n = x.rows();
    let mut rows: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();

    let mut builder = TreeBuilder {
        x,
        y,
        params,
        rng,
        tree: RegressionTree {
            split_features: Vec::new(),
            thresholds: Vec::new(),
            left_child: Vec::new(),
            right_child: Vec::new(),
            leaf_values: Vec::new(),
        },
    };
    builder.grow(&mut rows, 0);
    builder.tree
}

struct TreeBuilder<'a> {
    x: Matrix<'a>,
    y: &'a [f64],
    params: &'a ForestParams,
    rng: StdRng,
    tree: RegressionTree,
}

struct Split {
    feature: usize,
    threshold: f64,
    score: f64,
}

impl TreeBuilder<'_> {
    /// Grow the subtree over `rows`; returns the child reference
    fn grow(&mut self, rows: &mut [usize], depth: usize) -> i32 {
        let min_leaf = self.params.min_samples_leaf.max(1);
        if depth >= self.params.max_depth || rows.len() < 2 * min_leaf {
            return self.leaf(rows);
        }

        let split = match self.best_split(rows) {
            Some(split) => split,
            None => return self.leaf(rows),
        };

        let node = self.tree.split_features.len();
        self.tree.split_features.push(split.feature);
        self.tree.thresholds.push(split.threshold);
        self.tree.left_child.push(0);
        self.tree.right_child.push(0);

        let mid = partition(rows, |&r| self.x.get(r, split.feature) <= split.threshold);
        let (left, right) = rows.split_at_mut(mid);
        let l = self.grow(left, depth + 1);
        let r = self.grow(right, depth + 1);
        self.tree.left_child[node] = l;
        self.tree.right_child[node] = r;
        node as i32
    }

    fn leaf(&mut self, rows: &[usize]) -> i32 {
        let mean = if rows.is_empty() {
            0.0
        } else {
            rows.iter().map(|&r| self.y[r]).sum::<f64>() / rows.len() as f64
        };
        self.tree.leaf_values.push(mean);
        -(self.tree.leaf_values.len() as i32)
    }

    /// Maximise sum_l^2/n_l + sum_r^2/n_r, which minimises the children's SSE
    fn best_split(&mut self, rows: &[usize]) -> Option<Split> {
        let n = rows.len();
        let min_leaf = self.params.min_samples_leaf.max(1);
        let total: f64 = rows.iter().map(|&r| self.y[r]).sum();
        let parent_score = total * total / n as f64;

        let width = self.x.cols;
        let k = self
            .params
            .max_features
            .unwrap_or_else(|| (width as f64).sqrt().ceil() as usize)
            .clamp(1, width);

        let mut best: Option<Split> = None;
        let mut pairs: Vec<(f64, f64)> = Vec::with_capacity(n);

        for feature in sample(&mut self.rng, width, k).into_iter() {
            pairs.clear();
            pairs.extend(rows.iter().map(|&r| (self.x.get(r, feature), self.y[r])));
            pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

            let mut left_sum = 0.0;
            for i in 0..n - 1 {
                left_sum += pairs[i].1;
                let n_left = i + 1;
                if n_left < min_leaf || n - n_left < min_leaf {
                    continue;
                }
                if pairs[i].0 == pairs[i + 1].0 {
                    continue;
                }
                let right_sum = total - left_sum;
                let score = left_sum * left_sum / n_left as f64
                    + right_sum * right_sum / (n - n_left) as f64;
                if score > parent_score + 1e-12 && best.as_ref().map_or(true, |b| score > b.score) {
                    best = Some(Split {
                        feature,
                        threshold: (pairs[i].0 + pairs[i + 1].0) / 2.0,
                        score,
                    });
                }
            }
        }
        best
    }
}

/// In-place partition; returns the count of rows satisfying `pred`
fn partition<F: Fn(&usize) -> bool>(rows: &mut [usize], pred: F) -> usize {
    let mut i = 0;
    for j in 0..rows.len() {
        if pred(&rows[j]) {
            rows.swap(i, j);
            i += 1;
        }
    }
    i
}
