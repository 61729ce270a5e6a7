//! Random forest regression: bagged CART trees with squared-error splits

use crate::config::ForestConfig;
use crate::error::RfmlError;
use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// A single regression tree stored as a flat node arena
#[derive(Debug, Clone, PartialEq)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut index = 0;
        loop {
            match self.nodes[index] {
                Node::Leaf { value } => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if row[feature] <= threshold { left } else { right };
                }
            }
        }
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| matches!(node, Node::Leaf { .. }))
            .count()
    }

    /// Length of the longest root-to-leaf path, in edges
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], index: usize) -> usize {
            match nodes[index] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, left).max(walk(nodes, right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

struct Split {
    feature: usize,
    threshold: f64,
    /// Sum of squared child sums over child sizes, larger is a purer split
    score: f64,
}

struct TreeBuilder<'a> {
    x: &'a Array2<f64>,
    y: &'a Array1<f64>,
    config: &'a ForestConfig,
    max_features: usize,
    nodes: Vec<Node>,
}

impl<'a> TreeBuilder<'a> {
    fn new(x: &'a Array2<f64>, y: &'a Array1<f64>, config: &'a ForestConfig) -> Self {
        let n_features = x.ncols();
        let max_features = config
            .max_features
            .map_or(n_features, |m| m.min(n_features));
        Self {
            x,
            y,
            config,
            max_features,
            nodes: Vec::new(),
        }
    }

    fn build(mut self, rows: Vec<usize>, rng: &mut StdRng) -> RegressionTree {
        self.grow(rows, 0, rng);
        RegressionTree { nodes: self.nodes }
    }

    /// Grow the subtree for `rows` and return its root index
    fn grow(&mut self, rows: Vec<usize>, depth: usize, rng: &mut StdRng) -> usize {
        let index = self.nodes.len();
        let mean = rows.iter().map(|&r| self.y[r]).sum::<f64>() / rows.len() as f64;
        self.nodes.push(Node::Leaf { value: mean });

        let depth_left = self.config.max_depth.map_or(true, |max| depth < max);
        if !depth_left || rows.len() < self.config.min_samples_split || self.is_pure(&rows) {
            return index;
        }

        let Some(split) = self.best_split(&rows, rng) else {
            return index;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .copied()
            .partition(|&r| self.x[[r, split.feature]] <= split.threshold);

        let left = self.grow(left_rows, depth + 1, rng);
        let right = self.grow(right_rows, depth + 1, rng);
        self.nodes[index] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        index
    }

    fn is_pure(&self, rows: &[usize]) -> bool {
        let first = self.y[rows[0]];
        rows.iter().all(|&r| self.y[r] == first)
    }

    /// Best threshold over a random subset of features, honouring `min_samples_leaf`
    fn best_split(&self, rows: &[usize], rng: &mut StdRng) -> Option<Split> {
        let n = rows.len();
        let min_leaf = self.config.min_samples_leaf;
        let total: f64 = rows.iter().map(|&r| self.y[r]).sum();
        let mut order = rows.to_vec();
        let mut best: Option<Split> = None;

        for feature in sample(rng, self.x.ncols(), self.max_features).into_iter() {
            order.sort_by(|&a, &b| self.x[[a, feature]].total_cmp(&self.x[[b, feature]]));

            let mut left_sum = 0.0;
            for i in 0..n - 1 {
                left_sum += self.y[order[i]];
                let left_n = i + 1;
                let right_n = n - left_n;
                if left_n < min_leaf || right_n < min_leaf {
                    continue;
                }

                let current = self.x[[order[i], feature]];
                let next = self.x[[order[i + 1], feature]];
                if current == next {
                    continue;
                }

                let right_sum = total - left_sum;
                let score = left_sum * left_sum / left_n as f64 + right_sum * right_sum / right_n as f64;
                if best.as_ref().map_or(true, |b| score > b.score) {
                    let mut threshold = current / 2.0 + next / 2.0;
                    if threshold >= next {
                        threshold = current;
                    }
                    best = Some(Split {
                        feature,
                        threshold,
                        score,
                    });
                }
            }
        }

        best
    }
}

/// Ensemble of regression trees averaged at prediction time
#[derive(Debug, Clone, PartialEq)]
pub struct RandomForestRegressor {
    trees: Vec<RegressionTree>,
    n_features: usize,
}

impl RandomForestRegressor {
    /// Fit `config.n_estimators` trees on `x` against `y`.
    ///
    /// Every tree is seeded from a generator seeded with `config.seed`, so
    /// identical inputs always grow identical forests.
    pub fn fit(x: &Array2<f64>, y: &Array1<f64>, config: &ForestConfig) -> crate::Result<Self> {
        config.validate()?;
        if x.nrows() != y.len() {
            return Err(RfmlError::ShapeMismatch {
                expected: x.nrows(),
                actual: y.len(),
            });
        }
        if x.nrows() == 0 || x.ncols() == 0 {
            return Err(RfmlError::schema("cannot fit a forest on an empty matrix"));
        }

        let n = x.nrows();
        let mut seeder = StdRng::seed_from_u64(config.seed);
        let trees = (0..config.n_estimators)
            .map(|_| {
                let mut rng = StdRng::seed_from_u64(seeder.gen());
                let rows: Vec<usize> = if config.bootstrap {
                    (0..n).map(|_| rng.gen_range(0..n)).collect()
                } else {
                    (0..n).collect()
                };
                TreeBuilder::new(x, y, config).build(rows, &mut rng)
            })
            .collect();

        Ok(Self {
            trees,
            n_features: x.ncols(),
        })
    }

    pub fn predict(&self, x: &Array2<f64>) -> crate::Result<Array1<f64>> {
        if x.ncols() != self.n_features {
            return Err(RfmlError::ShapeMismatch {
                expected: self.n_features,
                actual: x.ncols(),
            });
        }

        let n_trees = self.trees.len() as f64;
        Ok(x
            .outer_iter()
            .map(|row| {
                self.trees
                    .iter()
                    .map(|tree| tree.predict_row(row.view()))
                    .sum::<f64>()
                    / n_trees
            })
            .collect())
    }

    pub fn n_estimators(&self) -> usize {
        self.trees.len()
    }

    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }
}
