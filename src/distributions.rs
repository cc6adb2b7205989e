/*!
Ready-made probability models.

[`GaussianTarget`] is the standard test landscape: a multivariate Gaussian
parameterised by its precision matrix, with analytic gradient, constant
Fisher information and vanishing Fisher derivative. [`LogisticRegression`]
is a Bayesian logistic-regression likelihood with the analytic Fisher matrix
and its derivative tensors, exercising every part of the Riemannian sampler.
[`GaussianPrior`] and [`FlatPrior`] are the two priors used throughout the
tests.

# Examples

```rust
use geodesic_mcmc::distributions::GaussianTarget;
use geodesic_mcmc::model::ProbabilityModel;
use geodesic_mcmc::state::State;

let target = GaussianTarget::diagonal(&[0.0, 0.0], &[1.0, 4.0]);
let x = State::from_slice(&[1.0, 1.0]);
assert_eq!(target.log_prob(&x), -2.5);
```
*/

use nalgebra::{DMatrix, DVector};

use crate::model::{FisherModel, Prior, ProbabilityModel};
use crate::state::{State, Tensor};

/// Multivariate Gaussian defined by its mean and precision matrix.
///
/// The log-density is the unnormalized quadratic form
/// `-(x - μ)ᵀ P (x - μ) / 2`; the normalizer is position-independent and
/// cancels in every acceptance test. The Fisher information equals the
/// precision matrix everywhere, so the Fisher derivative tensors are zero
/// and the Riemannian sampler degenerates to its fixed-metric form on this
/// target.
#[derive(Debug, Clone)]
pub struct GaussianTarget {
    mean: DVector<f64>,
    precision: DMatrix<f64>,
}

impl GaussianTarget {
    pub fn new(mean: DVector<f64>, precision: DMatrix<f64>) -> Self {
        assert_eq!(mean.len(), precision.nrows());
        assert_eq!(precision.nrows(), precision.ncols());
        Self { mean, precision }
    }

    /// Independent components with the given per-dimension precisions.
    pub fn diagonal(mean: &[f64], precisions: &[f64]) -> Self {
        assert_eq!(mean.len(), precisions.len());
        Self::new(
            DVector::from_column_slice(mean),
            DMatrix::from_diagonal(&DVector::from_column_slice(precisions)),
        )
    }

    /// Standard normal in `dim` dimensions.
    pub fn standard(dim: usize) -> Self {
        Self::new(DVector::zeros(dim), DMatrix::identity(dim, dim))
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }
}

impl ProbabilityModel for GaussianTarget {
    fn log_prob(&self, state: &State) -> f64 {
        let centered = state.vector() - &self.mean;
        -(&self.precision * &centered).dot(&centered) / 2.0
    }

    fn log_prob_with_gradient(&self, state: &State, gradient: &mut State) -> f64 {
        let centered = state.vector() - &self.mean;
        let precision_centered = &self.precision * &centered;
        gradient.vector_mut().copy_from(&(-&precision_centered));
        -precision_centered.dot(&centered) / 2.0
    }
}

impl FisherModel for GaussianTarget {
    fn log_prob_with_fisher(
        &self,
        state: &State,
        gradient: &mut State,
        fisher: &mut Tensor,
    ) -> f64 {
        fisher.matrix_mut().copy_from(&self.precision);
        self.log_prob_with_gradient(state, gradient)
    }

    fn log_prob_with_fisher_gradient(
        &self,
        state: &State,
        gradient: &mut State,
        fisher: &mut Tensor,
        fisher_gradient: &mut [Tensor],
    ) -> f64 {
        for tensor in fisher_gradient.iter_mut() {
            tensor.zero();
        }
        self.log_prob_with_fisher(state, gradient, fisher)
    }
}

/// Bernoulli logistic-regression likelihood over a fixed design matrix.
///
/// For rows `x_i` and labels `y_i ∈ {0, 1}`:
///
/// - log-likelihood: `Σ_i y_i x_iᵀβ − ln(1 + exp(x_iᵀβ))`
/// - gradient: `Xᵀ (y − σ)`
/// - Fisher: `Xᵀ diag(σ (1 − σ)) X`
/// - Fisher derivative: `dW/dβ_k = Xᵀ diag(σ (1 − σ)(1 − 2σ) x_{·k}) X`
///
/// where `σ_i = 1 / (1 + exp(−x_iᵀβ))`. The position-dependent Fisher makes
/// this the canonical workout for the non-separable leapfrog.
#[derive(Debug, Clone)]
pub struct LogisticRegression {
    design: DMatrix<f64>,
    labels: DVector<f64>,
}

impl LogisticRegression {
    /// `design` is n×d, `labels` holds n values in {0, 1}.
    pub fn new(design: DMatrix<f64>, labels: DVector<f64>) -> Self {
        assert_eq!(design.nrows(), labels.len());
        Self { design, labels }
    }

    pub fn dim(&self) -> usize {
        self.design.ncols()
    }

    fn probabilities(&self, state: &State) -> DVector<f64> {
        let logits = &self.design * state.vector();
        logits.map(|l| 1.0 / (1.0 + (-l).exp()))
    }
}

impl ProbabilityModel for LogisticRegression {
    fn log_prob(&self, state: &State) -> f64 {
        let logits = &self.design * state.vector();
        let mut log_prob = 0.0;
        for i in 0..logits.len() {
            // Stable softplus: ln(1 + e^l) = max(l, 0) + ln(1 + e^-|l|).
            let softplus = logits[i].max(0.0) + (-logits[i].abs()).exp().ln_1p();
            log_prob += self.labels[i] * logits[i] - softplus;
        }
        log_prob
    }

    fn log_prob_with_gradient(&self, state: &State, gradient: &mut State) -> f64 {
        let probs = self.probabilities(state);
        let residual = &self.labels - &probs;
        gradient
            .vector_mut()
            .copy_from(&(self.design.transpose() * residual));
        self.log_prob(state)
    }
}

impl FisherModel for LogisticRegression {
    fn log_prob_with_fisher(
        &self,
        state: &State,
        gradient: &mut State,
        fisher: &mut Tensor,
    ) -> f64 {
        let probs = self.probabilities(state);
        let dim = self.dim();

        fisher.zero();
        for i in 0..self.design.nrows() {
            let weight = probs[i] * (1.0 - probs[i]);
            for j in 0..dim {
                for k in 0..dim {
                    fisher[(j, k)] += weight * self.design[(i, j)] * self.design[(i, k)];
                }
            }
        }

        self.log_prob_with_gradient(state, gradient)
    }

    fn log_prob_with_fisher_gradient(
        &self,
        state: &State,
        gradient: &mut State,
        fisher: &mut Tensor,
        fisher_gradient: &mut [Tensor],
    ) -> f64 {
        debug_assert_eq!(fisher_gradient.len(), self.dim());
        let probs = self.probabilities(state);
        let dim = self.dim();

        for tensor in fisher_gradient.iter_mut() {
            tensor.zero();
        }
        for i in 0..self.design.nrows() {
            let w = probs[i] * (1.0 - probs[i]);
            let dw = w * (1.0 - 2.0 * probs[i]);
            for (k, tensor) in fisher_gradient.iter_mut().enumerate() {
                let weight = dw * self.design[(i, k)];
                for j in 0..dim {
                    for l in 0..dim {
                        tensor[(j, l)] += weight * self.design[(i, j)] * self.design[(i, l)];
                    }
                }
            }
        }

        self.log_prob_with_fisher(state, gradient, fisher)
    }
}

/// Isotropic zero-mean Gaussian prior with standard deviation `sigma`.
#[derive(Debug, Clone)]
pub struct GaussianPrior {
    sigma: f64,
}

impl GaussianPrior {
    pub fn new(sigma: f64) -> Self {
        assert!(sigma > 0.0);
        Self { sigma }
    }
}

impl ProbabilityModel for GaussianPrior {
    fn log_prob(&self, state: &State) -> f64 {
        -state.norm2() / (2.0 * self.sigma * self.sigma)
    }

    fn log_prob_with_gradient(&self, state: &State, gradient: &mut State) -> f64 {
        let inv_var = 1.0 / (self.sigma * self.sigma);
        gradient
            .vector_mut()
            .copy_from(&(state.vector() * -inv_var));
        self.log_prob(state)
    }
}

impl FisherModel for GaussianPrior {
    fn log_prob_with_fisher(
        &self,
        state: &State,
        gradient: &mut State,
        fisher: &mut Tensor,
    ) -> f64 {
        fisher.zero();
        fisher.add_diagonal(1.0 / (self.sigma * self.sigma));
        self.log_prob_with_gradient(state, gradient)
    }

    fn log_prob_with_fisher_gradient(
        &self,
        state: &State,
        gradient: &mut State,
        fisher: &mut Tensor,
        fisher_gradient: &mut [Tensor],
    ) -> f64 {
        for tensor in fisher_gradient.iter_mut() {
            tensor.zero();
        }
        self.log_prob_with_fisher(state, gradient, fisher)
    }
}

impl Prior for GaussianPrior {
    fn component_names(&self) -> Vec<String> {
        vec!["gaussian_prior".to_string()]
    }

    fn component_values(&self, state: &State) -> Vec<(String, f64)> {
        vec![("gaussian_prior".to_string(), self.log_prob(state))]
    }
}

/// Improper flat prior: zero log-density and curvature everywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatPrior;

impl ProbabilityModel for FlatPrior {
    fn log_prob(&self, _state: &State) -> f64 {
        0.0
    }

    fn log_prob_with_gradient(&self, _state: &State, gradient: &mut State) -> f64 {
        gradient.zero();
        0.0
    }
}

impl FisherModel for FlatPrior {
    fn log_prob_with_fisher(
        &self,
        _state: &State,
        gradient: &mut State,
        fisher: &mut Tensor,
    ) -> f64 {
        gradient.zero();
        fisher.zero();
        0.0
    }

    fn log_prob_with_fisher_gradient(
        &self,
        state: &State,
        gradient: &mut State,
        fisher: &mut Tensor,
        fisher_gradient: &mut [Tensor],
    ) -> f64 {
        for tensor in fisher_gradient.iter_mut() {
            tensor.zero();
        }
        self.log_prob_with_fisher(state, gradient, fisher)
    }
}

impl Prior for FlatPrior {
    fn component_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn component_values(&self, _state: &State) -> Vec<(String, f64)> {
        Vec::new()
    }
}
