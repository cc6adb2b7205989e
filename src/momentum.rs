/*!
Auxiliary momentum variables for the Hamiltonian and Riemannian samplers.

Three variants with increasingly rich metrics:

- [`Momentum`]: identity mass, used by plain HMC. Step sizes carry all
  per-dimension scaling.
- [`WeightedMomentum`]: refreshed as `N(0, W)` for a fixed weighting (Fisher)
  matrix supplied as a Cholesky factor; kinetic energy includes the full
  Gaussian normalizer because the metric no longer cancels between states.
- [`NonSeparableMomentum`]: position-dependent metric. The momentum half-step
  solves an implicit equation by fixed-point (Newton) iteration against the
  metric's derivative tensors.

Sign convention: this crate searches for probability *maxima*, so the
gradient is added in the momentum kick where the textbook algorithm
subtracts the gradient of the negative log-density. Every energy formula
here mirrors that choice; do not "fix" one side without the other.

All solves against the metric go through its Cholesky factor; no explicit
matrix inverse is ever formed.
*/

use nalgebra::DVector;

use crate::error::{McmcError, NanInfError};
use crate::proposal::{step_sizes_from_template, ProposalDistribution};
use crate::state::{ln_determinant, State, Tensor, TensorCholesky};

pub const STEP_SCALE_DEFAULT: f64 = 0.05;

const LN_2_PI: f64 = 1.8378770664093453;

/// Identity-mass momentum for the fixed-metric Hamiltonian sampler.
///
/// The momentum vector is invalid (NaN) until the first [`Momentum::randomize`].
#[derive(Debug, Clone)]
pub struct Momentum<P> {
    momentum: DVector<f64>,
    step_sizes: DVector<f64>,
    distr: P,
}

impl<P: ProposalDistribution> Momentum<P> {
    pub fn new(distr: P, step_sizes: DVector<f64>) -> Self {
        Self {
            momentum: DVector::from_element(step_sizes.len(), f64::NAN),
            step_sizes,
            distr,
        }
    }

    /// Same step size in every dimension.
    pub fn uniform(distr: P, dim: usize, step_scale: f64) -> Self {
        Self::new(distr, DVector::from_element(dim, step_scale))
    }

    /// Step sizes from a template state (length 1 broadcasts, length `dim`
    /// is elementwise, anything else is a fatal setup error), times
    /// `step_scale`.
    pub fn from_template(
        distr: P,
        template: &State,
        dim: usize,
        step_scale: f64,
    ) -> Result<Self, McmcError> {
        Ok(Self::new(
            distr,
            step_sizes_from_template(template, dim, step_scale)?,
        ))
    }

    pub fn len(&self) -> usize {
        self.momentum.len()
    }

    pub fn is_empty(&self) -> bool {
        self.momentum.len() == 0
    }

    pub fn momentum(&self) -> &DVector<f64> {
        &self.momentum
    }

    pub fn step_sizes(&self) -> &DVector<f64> {
        &self.step_sizes
    }

    pub(crate) fn set_momentum(&mut self, momentum: DVector<f64>) {
        self.momentum = momentum;
    }

    /// Redraws every component as `distr.sample(0, 1)`; called at the start
    /// of each sample's leapfrog chain.
    pub fn randomize(&mut self) {
        for i in 0..self.momentum.len() {
            self.momentum[i] = self.distr.sample(0.0, 1.0);
        }
    }

    /// Half leapfrog kick: `p += dir * step .* gradient / 2`.
    pub fn half_update(&mut self, gradient: &State, time_direction: f64) {
        debug_assert!(time_direction == 1.0 || time_direction == -1.0);
        for i in 0..self.momentum.len() {
            self.momentum[i] += time_direction * gradient[i] * self.step_sizes[i] / 2.0;
        }
    }

    /// Full leapfrog drift: `state += dir * step .* p`.
    pub fn update_state(&self, state: &mut State, time_direction: f64) {
        debug_assert!(time_direction == 1.0 || time_direction == -1.0);
        for i in 0..self.momentum.len() {
            state[i] += time_direction * self.momentum[i] * self.step_sizes[i];
        }
    }

    /// Standard-normal kinetic energy, `sum(p^2)/2`.
    pub fn log_kinetic_energy(&self) -> f64 {
        self.momentum.norm_squared() / 2.0
    }

    /// Predicted change in log-probability over one drift (diagnostic only).
    pub fn predicted_change(&self, gradient: &State, time_direction: f64) -> f64 {
        debug_assert!(time_direction == 1.0 || time_direction == -1.0);
        let mut change = 0.0;
        for i in 0..self.momentum.len() {
            change += time_direction * self.momentum[i] * gradient[i] * self.step_sizes[i];
        }
        change
    }

    /// Returns this momentum with its refresh distribution reseeded.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.distr = self.distr.set_seed(seed);
        self
    }
}

/// Momentum refreshed as `N(0, W)` for a weighting matrix `W` given by its
/// lower Cholesky factor `L` (`L Lᵀ = W`).
#[derive(Debug, Clone)]
pub struct WeightedMomentum<P> {
    inner: Momentum<P>,
}

impl<P: ProposalDistribution> WeightedMomentum<P> {
    pub fn new(distr: P, step_sizes: DVector<f64>) -> Self {
        Self {
            inner: Momentum::new(distr, step_sizes),
        }
    }

    pub fn uniform(distr: P, dim: usize, step_scale: f64) -> Self {
        Self {
            inner: Momentum::uniform(distr, dim, step_scale),
        }
    }

    pub fn from_template(
        distr: P,
        template: &State,
        dim: usize,
        step_scale: f64,
    ) -> Result<Self, McmcError> {
        Ok(Self {
            inner: Momentum::from_template(distr, template, dim, step_scale)?,
        })
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn momentum(&self) -> &DVector<f64> {
        self.inner.momentum()
    }

    pub fn step_sizes(&self) -> &DVector<f64> {
        self.inner.step_sizes()
    }

    /// Draws `p = L z` with `z ~ N(0, 1)` per element, giving `p ~ N(0, W)`.
    pub fn randomize(&mut self, chol: &TensorCholesky) {
        let dim = self.len();
        let mut z = DVector::zeros(dim);
        for i in 0..dim {
            z[i] = self.inner.distr.sample(0.0, 1.0);
        }
        self.inner.momentum = chol.l() * z;
    }

    /// Weighted kinetic energy with the full Gaussian normalizer:
    /// `0.5 pᵀ W⁻¹ p + 0.5 (D ln 2π + ln |W|)`.
    ///
    /// The normalizer matters here (unlike the identity-mass case) because
    /// the metric varies with position across the chain, so it no longer
    /// cancels between the two ends of an acceptance test.
    pub fn log_kinetic_energy(&self, chol: &TensorCholesky) -> f64 {
        let weighted = chol.solve(&self.inner.momentum);
        let quadratic = weighted.dot(&self.inner.momentum) / 2.0;
        quadratic + 0.5 * (self.len() as f64 * LN_2_PI + ln_determinant(chol))
    }

    /// Drift against the metric: `state += dir * step .* (W⁻¹ p)`.
    pub fn update_state(&self, state: &mut State, chol: &TensorCholesky, time_direction: f64) {
        debug_assert!(time_direction == 1.0 || time_direction == -1.0);
        let weighted = chol.solve(&self.inner.momentum);
        for i in 0..self.len() {
            state[i] += time_direction * weighted[i] * self.inner.step_sizes[i];
        }
    }

    /// Diagnostic dot product of `W⁻¹ p` with the gradient.
    pub fn predicted_change(
        &self,
        gradient: &State,
        chol: &TensorCholesky,
        time_direction: f64,
    ) -> f64 {
        debug_assert!(time_direction == 1.0 || time_direction == -1.0);
        let weighted = chol.solve(&self.inner.momentum);
        let mut change = 0.0;
        for i in 0..self.len() {
            change += weighted[i] * gradient[i] * self.inner.step_sizes[i];
        }
        change * time_direction
    }

    pub fn set_seed(mut self, seed: u64) -> Self {
        self.inner = self.inner.set_seed(seed);
        self
    }
}

/// Momentum for a position-dependent metric (non-separable Hamiltonian).
///
/// The half-kick is implicit: the update depends on the momentum being
/// solved for, so it is iterated as a fixed point. All working vectors are
/// fresh per-call allocations; nothing is reused across calls.
#[derive(Debug, Clone)]
pub struct NonSeparableMomentum<P> {
    inner: WeightedMomentum<P>,
}

impl<P: ProposalDistribution> NonSeparableMomentum<P> {
    pub fn new(distr: P, step_sizes: DVector<f64>) -> Self {
        Self {
            inner: WeightedMomentum::new(distr, step_sizes),
        }
    }

    pub fn uniform(distr: P, dim: usize, step_scale: f64) -> Self {
        Self {
            inner: WeightedMomentum::uniform(distr, dim, step_scale),
        }
    }

    pub fn from_template(
        distr: P,
        template: &State,
        dim: usize,
        step_scale: f64,
    ) -> Result<Self, McmcError> {
        Ok(Self {
            inner: WeightedMomentum::from_template(distr, template, dim, step_scale)?,
        })
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn momentum(&self) -> &DVector<f64> {
        self.inner.momentum()
    }

    pub fn step_sizes(&self) -> &DVector<f64> {
        self.inner.step_sizes()
    }

    pub fn randomize(&mut self, chol: &TensorCholesky) {
        self.inner.randomize(chol);
    }

    pub fn log_kinetic_energy(&self, chol: &TensorCholesky) -> f64 {
        self.inner.log_kinetic_energy(chol)
    }

    pub fn predicted_change(
        &self,
        gradient: &State,
        chol: &TensorCholesky,
        time_direction: f64,
    ) -> f64 {
        self.inner.predicted_change(gradient, chol, time_direction)
    }

    /// Implicit momentum half-kick for a position-dependent metric.
    ///
    /// Given the gradient, the metric's Cholesky factor and the derivative
    /// tensors `dW/dx_k`, iterates
    ///
    /// ```text
    /// p'[k] = p[k] + dir * step[k]/2 * (g[k] - tr(W⁻¹ dW/dx_k)/2
    ///                                        + (W⁻¹ dW/dx_k W⁻¹ p') · p' / 2)
    /// ```
    ///
    /// for `num_newton_steps` iterations starting from the current momentum.
    /// The samplers pass their configured count for the opening half-kick of
    /// each leapfrog step and exactly 1 for the closing one.
    ///
    /// NaN or Inf anywhere in the iterate aborts the sample attempt.
    pub fn half_update(
        &mut self,
        gradient: &State,
        chol: &TensorCholesky,
        metric_gradient: &[Tensor],
        time_direction: f64,
        num_newton_steps: usize,
    ) -> Result<(), NanInfError> {
        debug_assert!(time_direction == 1.0 || time_direction == -1.0);
        let dim = self.len();
        debug_assert_eq!(metric_gradient.len(), dim);

        // W⁻¹ dW/dx_k via per-column back-substitution, never an inverse.
        let mut winv_dwdx = Vec::with_capacity(dim);
        let mut trace_term = DVector::zeros(dim);
        for k in 0..dim {
            let solved = chol.solve(metric_gradient[k].matrix());
            trace_term[k] = solved.trace() / 2.0;
            winv_dwdx.push(solved);
        }

        let step_sizes = self.inner.step_sizes().clone();
        let start = self.momentum().clone();
        let mut current = start.clone();

        for _ in 0..num_newton_steps {
            let weighted = chol.solve(&current);
            let mut next = DVector::zeros(dim);
            for k in 0..dim {
                let correction = (&winv_dwdx[k] * &weighted).dot(&current) / 2.0;
                next[k] = start[k]
                    + 0.5
                        * time_direction
                        * step_sizes[k]
                        * (gradient[k] - trace_term[k] + correction);
                if !next[k].is_finite() {
                    return Err(NanInfError);
                }
            }
            current = next;
        }

        self.inner.inner.set_momentum(current);
        Ok(())
    }

    pub fn set_seed(mut self, seed: u64) -> Self {
        self.inner = self.inner.set_seed(seed);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposal::GaussianProposal;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    fn identity_chol(dim: usize) -> TensorCholesky {
        Tensor::from_matrix(DMatrix::identity(dim, dim))
            .cholesky()
            .unwrap()
    }

    #[test]
    fn half_update_adds_scaled_gradient() {
        let mut momentum = Momentum::uniform(GaussianProposal::new().set_seed(3), 2, 0.1);
        momentum.set_momentum(DVector::from_column_slice(&[1.0, -1.0]));
        let gradient = State::from_slice(&[2.0, 4.0]);

        momentum.half_update(&gradient, 1.0);
        assert_relative_eq!(momentum.momentum()[0], 1.0 + 0.1 * 2.0 / 2.0);
        assert_relative_eq!(momentum.momentum()[1], -1.0 + 0.1 * 4.0 / 2.0);
    }

    #[test]
    fn update_state_drifts_by_scaled_momentum() {
        let mut momentum = Momentum::uniform(GaussianProposal::new().set_seed(3), 2, 0.5);
        momentum.set_momentum(DVector::from_column_slice(&[1.0, 2.0]));
        let mut state = State::from_slice(&[0.0, 0.0]);

        momentum.update_state(&mut state, 1.0);
        assert_eq!(state, State::from_slice(&[0.5, 1.0]));

        momentum.update_state(&mut state, -1.0);
        assert_eq!(state, State::from_slice(&[0.0, 0.0]));
    }

    #[test]
    fn kinetic_energy_is_half_norm2() {
        let mut momentum = Momentum::uniform(GaussianProposal::new().set_seed(3), 2, 1.0);
        momentum.set_momentum(DVector::from_column_slice(&[3.0, 4.0]));
        assert_relative_eq!(momentum.log_kinetic_energy(), 12.5);
    }

    #[test]
    fn weighted_randomize_matches_identity_metric() {
        // With W = I the weighted refresh reduces to the plain refresh.
        let seed = 11;
        let mut plain = Momentum::uniform(GaussianProposal::new().set_seed(seed), 3, 1.0);
        let mut weighted = WeightedMomentum::uniform(GaussianProposal::new().set_seed(seed), 3, 1.0);

        plain.randomize();
        weighted.randomize(&identity_chol(3));
        for i in 0..3 {
            assert_relative_eq!(plain.momentum()[i], weighted.momentum()[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn weighted_kinetic_energy_includes_normalizer() {
        let mut momentum = WeightedMomentum::uniform(GaussianProposal::new().set_seed(1), 2, 1.0);
        momentum.inner.set_momentum(DVector::from_column_slice(&[1.0, 2.0]));

        // W = I: quadratic term + 0.5 * D * ln(2π).
        let expected = 2.5 + 0.5 * 2.0 * LN_2_PI;
        assert_relative_eq!(
            momentum.log_kinetic_energy(&identity_chol(2)),
            expected,
            epsilon = 1e-12
        );
    }

    #[test]
    fn non_separable_reduces_to_weighted_for_constant_metric() {
        // Position-independent Fisher: derivative tensors vanish, so one
        // Newton iteration must reproduce the separable half-kick.
        let dim = 3;
        let p0 = DVector::from_column_slice(&[0.4, -0.2, 1.1]);
        let gradient = State::from_slice(&[1.0, -3.0, 0.5]);
        let chol = Tensor::from_matrix(DMatrix::from_row_slice(
            3,
            3,
            &[2.0, 0.3, 0.0, 0.3, 1.5, 0.2, 0.0, 0.2, 1.0],
        ))
        .cholesky()
        .unwrap();
        let zero_gradients = vec![Tensor::zeros(dim); dim];

        let mut non_separable =
            NonSeparableMomentum::uniform(GaussianProposal::new().set_seed(9), dim, 0.25);
        non_separable.inner.inner.set_momentum(p0.clone());
        non_separable
            .half_update(&gradient, &chol, &zero_gradients, 1.0, 1)
            .unwrap();

        let mut separable = Momentum::uniform(GaussianProposal::new().set_seed(9), dim, 0.25);
        separable.set_momentum(p0);
        separable.half_update(&gradient, 1.0);

        for i in 0..dim {
            assert_relative_eq!(
                non_separable.momentum()[i],
                separable.momentum()[i],
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn non_separable_detects_divergence() {
        let dim = 2;
        let mut momentum =
            NonSeparableMomentum::uniform(GaussianProposal::new().set_seed(2), dim, 0.1);
        momentum
            .inner
            .inner
            .set_momentum(DVector::from_column_slice(&[0.0, 0.0]));
        let gradient = State::from_slice(&[f64::NAN, 0.0]);
        let chol = identity_chol(dim);
        let zero_gradients = vec![Tensor::zeros(dim); dim];

        assert!(momentum
            .half_update(&gradient, &chol, &zero_gradients, 1.0, 3)
            .is_err());
    }
}
