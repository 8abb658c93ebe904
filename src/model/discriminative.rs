use std::collections::BTreeMap;

use ndarray::{Array2, ArrayView1, ArrayView2};

/// The discriminative (push/pull) loss on pixel embeddings.
///
/// For the clusters `c` found in the instance label, with means `mu_c`:
/// * variance term: `1/C sum_c 1/n_c sum_i relu(|mu_c - x_i| - delta_v)^2`
/// * distance term: `1/(C(C-1)) sum_{a != b} relu(2 delta_d - |mu_a - mu_b|)^2`
/// * regularization term: `1/C sum_c |mu_c|`
///
/// The background is a cluster like any other.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiscriminativeLoss {
    pub delta_v: f32,
    pub delta_d: f32,
    pub var_weight: f32,
    pub dist_weight: f32,
    pub reg_weight: f32,
}

impl Default for DiscriminativeLoss {
    fn default() -> Self {
        Self {
            delta_v: 0.5,
            delta_d: 3.0,
            var_weight: 1.0,
            dist_weight: 1.0,
            reg_weight: 0.001,
        }
    }
}

struct Clusters {
    /// Cluster index of every pixel.
    assignment: Vec<usize>,
    counts: Vec<usize>,
    /// `[clusters, dims]`
    means: Array2<f32>,
}

impl Clusters {
    fn new(embedding: ArrayView2<f32>, labels: ArrayView1<u8>) -> Self {
        let mut ids = BTreeMap::new();
        for &label in labels {
            let next = ids.len();
            ids.entry(label).or_insert(next);
        }

        let assignment: Vec<usize> = labels.iter().map(|label| ids[label]).collect();
        let mut counts = vec![0; ids.len()];
        let mut means = Array2::zeros((ids.len(), embedding.ncols()));

        for (row, &c) in embedding.rows().into_iter().zip(&assignment) {
            counts[c] += 1;
            let mut mean = means.row_mut(c);
            mean += &row;
        }

        for (mut mean, &n) in means.rows_mut().into_iter().zip(&counts) {
            mean /= n as f32;
        }

        Self {
            assignment,
            counts,
            means,
        }
    }

    fn len(&self) -> usize {
        self.counts.len()
    }
}

impl DiscriminativeLoss {
    /// Computes the loss of one frame and it's gradient.
    ///
    /// # Arguments
    /// * `embedding` - The pixel embeddings, `[pixels, dims]`.
    /// * `labels` - The instance label of every pixel.
    ///
    /// # Returns
    /// The weighted loss and `d loss / d embedding`, shaped like `embedding`.
    pub fn loss_and_grad(
        &self,
        embedding: ArrayView2<f32>,
        labels: ArrayView1<u8>,
    ) -> (f32, Array2<f32>) {
        let mut grad = Array2::zeros(embedding.raw_dim());
        if embedding.nrows() == 0 {
            return (0.0, grad);
        }

        let clusters = Clusters::new(embedding, labels);
        let c = clusters.len() as f32;
        let dims = embedding.ncols();

        // d loss / d mu, spread evenly over each cluster's pixels at the end.
        let mut mean_grads = Array2::<f32>::zeros((clusters.len(), dims));

        // Pull term.
        let mut var_sums = vec![0.0f32; clusters.len()];
        let mut pulls = Array2::<f32>::zeros(embedding.raw_dim());
        let mut pull_sums = Array2::<f32>::zeros((clusters.len(), dims));

        for (i, (row, &k)) in embedding.rows().into_iter().zip(&clusters.assignment).enumerate() {
            let diff = &row - &clusters.means.row(k);
            let dist = norm(diff.view());
            let hinge = (dist - self.delta_v).max(0.0);
            var_sums[k] += hinge * hinge;

            if hinge > 0.0 && dist > 0.0 {
                let pull = diff * (hinge / dist);
                pull_sums.row_mut(k).scaled_add(1.0, &pull);
                pulls.row_mut(i).assign(&pull);
            }
        }

        let var_loss = var_sums
            .iter()
            .zip(&clusters.counts)
            .map(|(sum, &n)| sum / n as f32)
            .sum::<f32>()
            / c;

        for (i, (mut g, &k)) in grad.rows_mut().into_iter().zip(&clusters.assignment).enumerate() {
            let n = clusters.counts[k] as f32;
            let scale = self.var_weight * 2.0 / (c * n);
            g.scaled_add(scale, &pulls.row(i));
            g.scaled_add(-scale / n, &pull_sums.row(k));
        }

        // Push term.
        let mut dist_loss = 0.0;
        if clusters.len() > 1 {
            let pairs = c * (c - 1.0);

            for a in 0..clusters.len() {
                for b in 0..clusters.len() {
                    if a == b {
                        continue;
                    }

                    let diff = &clusters.means.row(a) - &clusters.means.row(b);
                    let dist = norm(diff.view());
                    let hinge = (2.0 * self.delta_d - dist).max(0.0);
                    dist_loss += hinge * hinge;

                    if hinge > 0.0 && dist > 0.0 {
                        let step = 2.0 * hinge / (dist * pairs) * self.dist_weight;
                        mean_grads.row_mut(a).scaled_add(-step, &diff);
                        mean_grads.row_mut(b).scaled_add(step, &diff);
                    }
                }
            }

            dist_loss /= pairs;
        }

        // Regularization term.
        let mut reg_loss = 0.0;
        for (k, mean) in clusters.means.rows().into_iter().enumerate() {
            let magnitude = norm(mean);
            reg_loss += magnitude;

            if magnitude > 0.0 {
                mean_grads
                    .row_mut(k)
                    .scaled_add(self.reg_weight / (c * magnitude), &mean);
            }
        }
        reg_loss /= c;

        for (mut g, &k) in grad.rows_mut().into_iter().zip(&clusters.assignment) {
            let n = clusters.counts[k] as f32;
            g.scaled_add(1.0 / n, &mean_grads.row(k));
        }

        let loss =
            self.var_weight * var_loss + self.dist_weight * dist_loss + self.reg_weight * reg_loss;
        (loss, grad)
    }
}

fn norm(v: ArrayView1<f32>) -> f32 {
    v.dot(&v).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, arr1, arr2};

    fn numeric_grad(
        loss: &DiscriminativeLoss,
        embedding: &Array2<f32>,
        labels: &Array1<u8>,
    ) -> Array2<f32> {
        let eps = 1e-2;
        let mut grad = Array2::zeros(embedding.raw_dim());

        for idx in 0..embedding.len() {
            let (r, c) = (idx / embedding.ncols(), idx % embedding.ncols());
            let mut plus = embedding.clone();
            let mut minus = embedding.clone();
            plus[[r, c]] += eps;
            minus[[r, c]] -= eps;

            let (lp, _) = loss.loss_and_grad(plus.view(), labels.view());
            let (lm, _) = loss.loss_and_grad(minus.view(), labels.view());
            grad[[r, c]] = (lp - lm) / (2.0 * eps);
        }

        grad
    }

    #[test]
    fn tight_far_clusters_only_pay_regularization() {
        let loss = DiscriminativeLoss::default();
        let embedding = arr2(&[[0.0, 0.0], [0.0, 0.0], [10.0, 0.0], [10.0, 0.0]]);
        let labels = arr1(&[0u8, 0, 1, 1]);

        let (value, _) = loss.loss_and_grad(embedding.view(), labels.view());

        // reg = (0 + 10) / 2
        assert!((value - 0.001 * 5.0).abs() < 1e-6);
    }

    #[test]
    fn analytic_gradient_matches_finite_differences() {
        let loss = DiscriminativeLoss::default();
        let embedding = arr2(&[
            [0.3, -1.2],
            [1.9, 0.4],
            [-0.7, 0.8],
            [2.5, 1.1],
            [1.2, -0.6],
        ]);
        let labels = arr1(&[0u8, 0, 20, 20, 70]);

        let (_, analytic) = loss.loss_and_grad(embedding.view(), labels.view());
        let numeric = numeric_grad(&loss, &embedding, &labels);

        for (a, n) in analytic.iter().zip(numeric.iter()) {
            assert!((a - n).abs() < 1e-2, "analytic {a} vs numeric {n}");
        }
    }
}
