/*!
Riemannian-manifold HMC with a position-dependent Fisher metric.

The metric at each position is the combined Fisher information of the
likelihood and the prior (plus an optional constant diagonal
preconditioner), assembled by [`Posterior`]. Because the metric varies with
position the Hamiltonian is non-separable and both leapfrog half-steps
become implicit: the momentum kick is fixed-point iterated by
[`crate::momentum::NonSeparableMomentum`] and the position drift is iterated
here against freshly factorised metrics at the trial point.

Divergence handling: NaN or Inf appearing anywhere in a trajectory abandons
that sample attempt with a warning; the previous state is kept and the
sample is still recorded (with an infinite proposed Hamiltonian). A Fisher
matrix that fails its Cholesky factorisation is a fatal error.

# Examples

```rust
use geodesic_mcmc::distributions::{FlatPrior, GaussianTarget};
use geodesic_mcmc::io::MemorySink;
use geodesic_mcmc::proposal::GaussianProposal;
use geodesic_mcmc::momentum::NonSeparableMomentum;
use geodesic_mcmc::riemannian::Riemannian;
use geodesic_mcmc::state::State;

let target = GaussianTarget::standard(2);
let prior = FlatPrior;
let momentum = NonSeparableMomentum::uniform(GaussianProposal::new(), 2, 0.1);
let mut sampler = Riemannian::new(&target, &prior, momentum, State::zeros(2))
    .set_seed(42)
    .samples(10)
    .leapfrog_steps(10);

let mut sink = MemorySink::new();
sampler.run(&mut sink).unwrap();
assert_eq!(sink.len(), 10);
```
*/

use indicatif::ProgressBar;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::core::accept;
use crate::error::McmcError;
use crate::io::{NullSink, SampleSink};
use crate::model::{FisherModel, Prior, ProbabilityModel};
use crate::momentum::NonSeparableMomentum;
use crate::proposal::ProposalDistribution;
use crate::state::{State, Tensor, TensorCholesky};

pub const SAMPLES_DEFAULT: usize = 100;
pub const LEAPFROG_STEPS_DEFAULT: usize = 30;
pub const NEWTON_STEPS_DEFAULT: usize = 6;
pub const PRECONDITION_DEFAULT: f64 = 0.0;

/// Posterior model combining a likelihood and a prior, both with Fisher
/// information.
///
/// Log-density, gradient, Fisher and Fisher-derivative tensors are the sums
/// of the two parts; `precondition` is added to the Fisher diagonal before
/// every factorisation to keep near-degenerate metrics positive definite.
/// Under `prior_only` the likelihood is skipped entirely.
#[derive(Debug, Clone, Copy)]
pub struct Posterior<'a, L, P> {
    likelihood: &'a L,
    prior: &'a P,
    precondition: f64,
    prior_only: bool,
}

impl<'a, L, P> Posterior<'a, L, P>
where
    L: FisherModel,
    P: Prior,
{
    pub fn new(likelihood: &'a L, prior: &'a P, precondition: f64, prior_only: bool) -> Self {
        Self {
            likelihood,
            prior,
            precondition,
            prior_only,
        }
    }
}

impl<'a, L, P> ProbabilityModel for Posterior<'a, L, P>
where
    L: FisherModel,
    P: Prior,
{
    fn log_prob(&self, state: &State) -> f64 {
        let prior_px = self.prior.log_prob(state);
        if self.prior_only {
            prior_px
        } else {
            self.likelihood.log_prob(state) + prior_px
        }
    }

    fn log_prob_with_gradient(&self, state: &State, gradient: &mut State) -> f64 {
        let mut prior_gradient = state.zero_like();
        let prior_px = self.prior.log_prob_with_gradient(state, &mut prior_gradient);
        if self.prior_only {
            gradient.clone_from(&prior_gradient);
            return prior_px;
        }
        let likelihood_px = self.likelihood.log_prob_with_gradient(state, gradient);
        *gradient = &*gradient + &prior_gradient;
        likelihood_px + prior_px
    }
}

impl<'a, L, P> FisherModel for Posterior<'a, L, P>
where
    L: FisherModel,
    P: Prior,
{
    fn log_prob_with_fisher(
        &self,
        state: &State,
        gradient: &mut State,
        fisher: &mut Tensor,
    ) -> f64 {
        let mut prior_gradient = state.zero_like();
        let mut prior_fisher = Tensor::zeros(state.len());
        let prior_px =
            self.prior
                .log_prob_with_fisher(state, &mut prior_gradient, &mut prior_fisher);

        let log_px = if self.prior_only {
            gradient.clone_from(&prior_gradient);
            fisher.zero();
            prior_px
        } else {
            let likelihood_px = self.likelihood.log_prob_with_fisher(state, gradient, fisher);
            *gradient = &*gradient + &prior_gradient;
            likelihood_px + prior_px
        };

        fisher.add_assign(&prior_fisher);
        fisher.add_diagonal(self.precondition);
        log_px
    }

    fn log_prob_with_fisher_gradient(
        &self,
        state: &State,
        gradient: &mut State,
        fisher: &mut Tensor,
        fisher_gradient: &mut [Tensor],
    ) -> f64 {
        let dim = state.len();
        let mut prior_gradient = state.zero_like();
        let mut prior_fisher = Tensor::zeros(dim);
        let mut prior_fisher_gradient = vec![Tensor::zeros(dim); dim];
        let prior_px = self.prior.log_prob_with_fisher_gradient(
            state,
            &mut prior_gradient,
            &mut prior_fisher,
            &mut prior_fisher_gradient,
        );

        let log_px = if self.prior_only {
            gradient.clone_from(&prior_gradient);
            fisher.zero();
            for tensor in fisher_gradient.iter_mut() {
                tensor.zero();
            }
            prior_px
        } else {
            let likelihood_px = self.likelihood.log_prob_with_fisher_gradient(
                state,
                gradient,
                fisher,
                fisher_gradient,
            );
            *gradient = &*gradient + &prior_gradient;
            likelihood_px + prior_px
        };

        fisher.add_assign(&prior_fisher);
        fisher.add_diagonal(self.precondition);
        for (tensor, prior_tensor) in fisher_gradient.iter_mut().zip(&prior_fisher_gradient) {
            tensor.add_assign(prior_tensor);
        }
        log_px
    }
}

/// Everything the sampler caches about a position: log-density, gradient,
/// Fisher matrix with its derivative tensors, and the Cholesky factor.
#[derive(Debug, Clone)]
struct Evaluated {
    position: State,
    log_px: f64,
    gradient: State,
    fisher: Tensor,
    fisher_gradient: Vec<Tensor>,
    chol: TensorCholesky,
}

impl Evaluated {
    fn at<M: FisherModel>(model: &M, position: State) -> Result<Self, McmcError> {
        let dim = position.len();
        let mut gradient = position.zero_like();
        let mut fisher = Tensor::zeros(dim);
        let mut fisher_gradient = vec![Tensor::zeros(dim); dim];
        let log_px = model.log_prob_with_fisher_gradient(
            &position,
            &mut gradient,
            &mut fisher,
            &mut fisher_gradient,
        );
        let chol = fisher.cholesky()?;
        Ok(Self {
            position,
            log_px,
            gradient,
            fisher,
            fisher_gradient,
            chol,
        })
    }
}

/// RMHMC sampler with an implicit generalized leapfrog.
#[derive(Debug, Clone)]
pub struct Riemannian<'a, L, P, D> {
    likelihood: &'a L,
    prior: &'a P,
    momentum: NonSeparableMomentum<D>,
    current: State,
    rng: SmallRng,
    num_samples: usize,
    num_leapfrog_steps: usize,
    num_newton_steps: usize,
    precondition: f64,
    prior_only: bool,
    verbose: bool,
}

impl<'a, L, P, D> Riemannian<'a, L, P, D>
where
    L: FisherModel,
    P: Prior,
    D: ProposalDistribution,
{
    pub fn new(
        likelihood: &'a L,
        prior: &'a P,
        momentum: NonSeparableMomentum<D>,
        initial: State,
    ) -> Self {
        Self {
            likelihood,
            prior,
            momentum,
            current: initial,
            rng: SmallRng::seed_from_u64(rand::random()),
            num_samples: SAMPLES_DEFAULT,
            num_leapfrog_steps: LEAPFROG_STEPS_DEFAULT,
            num_newton_steps: NEWTON_STEPS_DEFAULT,
            precondition: PRECONDITION_DEFAULT,
            prior_only: false,
            verbose: false,
        }
    }

    /// Reseeds the time-direction/acceptance RNG and the momentum refresh
    /// distribution.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.rng = SmallRng::seed_from_u64(seed);
        self.momentum = self.momentum.set_seed(seed.wrapping_add(1));
        self
    }

    pub fn samples(mut self, num_samples: usize) -> Self {
        self.num_samples = num_samples;
        self
    }

    pub fn leapfrog_steps(mut self, num_leapfrog_steps: usize) -> Self {
        self.num_leapfrog_steps = num_leapfrog_steps;
        self
    }

    /// Fixed-point iterations for the opening momentum half-kick and the
    /// implicit position drift. The closing half-kick always uses one.
    pub fn newton_steps(mut self, num_newton_steps: usize) -> Self {
        self.num_newton_steps = num_newton_steps.max(1);
        self
    }

    /// Constant added to the Fisher diagonal before every factorisation.
    pub fn precondition(mut self, precondition: f64) -> Self {
        self.precondition = precondition;
        self
    }

    pub fn prior_only(mut self, prior_only: bool) -> Self {
        self.prior_only = prior_only;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Last accepted state.
    pub fn current(&self) -> &State {
        &self.current
    }

    pub fn run<S: SampleSink>(&mut self, sink: &mut S) -> Result<(), McmcError> {
        self.run_inner(sink, None::<&mut NullSink>, None)
    }

    /// As [`Riemannian::run`], advancing `progress` once per sample.
    pub fn run_progress<S: SampleSink>(
        &mut self,
        sink: &mut S,
        progress: &ProgressBar,
    ) -> Result<(), McmcError> {
        progress.set_length(self.num_samples as u64);
        self.run_inner(sink, None::<&mut NullSink>, Some(progress))
    }

    /// As [`Riemannian::run`], also appending one record per leapfrog step
    /// to `trace` (same schema as the Hamiltonian sampler's trace).
    pub fn run_with_trace<S: SampleSink, T: SampleSink>(
        &mut self,
        sink: &mut S,
        trace: &mut T,
    ) -> Result<(), McmcError> {
        self.run_inner(sink, Some(trace), None)
    }

    fn run_inner<S: SampleSink, T: SampleSink>(
        &mut self,
        sink: &mut S,
        mut trace: Option<&mut T>,
        progress: Option<&ProgressBar>,
    ) -> Result<(), McmcError> {
        let posterior = Posterior::new(
            self.likelihood,
            self.prior,
            self.precondition,
            self.prior_only,
        );
        let mut current = Evaluated::at(&posterior, self.current.clone())?;

        if let Some(pb) = progress {
            pb.set_length(self.num_samples as u64);
        }

        for sample in 1..=self.num_samples {
            let time_direction = if self.rng.gen::<f64>() > 0.5 { 1.0 } else { -1.0 };
            self.momentum.randomize(&current.chol);
            let hamiltonian = self.momentum.log_kinetic_energy(&current.chol) - current.log_px;

            let trajectory = leapfrog_trajectory(
                &posterior,
                &mut self.momentum,
                &current,
                time_direction,
                self.num_leapfrog_steps,
                self.num_newton_steps,
                trace.as_deref_mut(),
            )?;

            let proposed_hamiltonian = match &trajectory {
                Some(end) => self.momentum.log_kinetic_energy(&end.chol) - end.log_px,
                None => {
                    eprintln!(
                        "warning: NaN or Inf values found in sample {}, \
                         keeping previous state",
                        sample
                    );
                    f64::INFINITY
                }
            };

            if let Some(end) = trajectory {
                if accept(&mut self.rng, -(proposed_hamiltonian - hamiltonian)) {
                    current = end;
                }
            }
            self.current.clone_from(&current.position);

            let components = self.prior.component_values(&self.current);
            let mut diagnostics: Vec<(&str, f64)> = vec![
                ("log_px", current.log_px),
                ("H", hamiltonian),
                ("proposed_H", proposed_hamiltonian),
            ];
            diagnostics.extend(components.iter().map(|(n, v)| (n.as_str(), *v)));
            sink.append(&self.current, &diagnostics)?;

            if self.verbose {
                println!(
                    "sample {}: log_px = {:.6}, H = {:.6}, proposed H = {:.6}",
                    sample, current.log_px, hamiltonian, proposed_hamiltonian
                );
            }
            if let Some(pb) = progress {
                pb.inc(1);
            }
        }

        if let Some(pb) = progress {
            pb.finish();
        }
        Ok(())
    }
}

/// One generalized-leapfrog trajectory. `Ok(None)` marks a divergent
/// attempt; a failed Cholesky factorisation is fatal and propagates.
fn leapfrog_trajectory<M, D, T>(
    posterior: &M,
    momentum: &mut NonSeparableMomentum<D>,
    start: &Evaluated,
    time_direction: f64,
    num_leapfrog_steps: usize,
    num_newton_steps: usize,
    mut trace: Option<&mut T>,
) -> Result<Option<Evaluated>, McmcError>
where
    M: FisherModel,
    D: ProposalDistribution,
    T: SampleSink,
{
    let dim = start.position.len();
    let step_sizes = momentum.step_sizes().clone();
    let mut eval = start.clone();

    for _ in 0..num_leapfrog_steps {
        if momentum
            .half_update(
                &eval.gradient,
                &eval.chol,
                &eval.fisher_gradient,
                time_direction,
                num_newton_steps,
            )
            .is_err()
        {
            return Ok(None);
        }

        let predicted_change =
            momentum.predicted_change(&eval.gradient, &eval.chol, time_direction);
        let before_log_px = eval.log_px;

        // Implicit drift: the velocity is averaged between the step's start
        // and the trial point, with the metric re-factorised at each trial.
        let w0 = eval.chol.solve(momentum.momentum());
        let mut trial = eval.position.clone();
        let mut trial_gradient = eval.position.zero_like();
        let mut trial_fisher = Tensor::zeros(dim);
        for _ in 0..num_newton_steps {
            posterior.log_prob_with_fisher(&trial, &mut trial_gradient, &mut trial_fisher);
            let trial_chol = trial_fisher.cholesky()?;
            let w1 = trial_chol.solve(momentum.momentum());
            for i in 0..dim {
                trial[i] = eval.position[i]
                    + (w0[i] + w1[i]) * step_sizes[i] * time_direction / 2.0;
            }
            if !trial.all_finite() {
                return Ok(None);
            }
        }
        eval.position = trial;

        eval.log_px = posterior.log_prob_with_fisher_gradient(
            &eval.position,
            &mut eval.gradient,
            &mut eval.fisher,
            &mut eval.fisher_gradient,
        );
        if !eval.log_px.is_finite() || !eval.gradient.all_finite() {
            return Ok(None);
        }
        eval.chol = eval.fisher.cholesky()?;

        // Closing half-kick is a single fixed-point iteration.
        if momentum
            .half_update(
                &eval.gradient,
                &eval.chol,
                &eval.fisher_gradient,
                time_direction,
                1,
            )
            .is_err()
        {
            return Ok(None);
        }

        if let Some(t) = trace.as_deref_mut() {
            let diagnostics = [
                ("log_px", eval.log_px),
                ("pred_d_log_px", predicted_change),
                ("act_d_log_px", eval.log_px - before_log_px),
                ("grad_norm2", eval.gradient.norm2()),
                (
                    "log_kinetic_energy",
                    momentum.log_kinetic_energy(&eval.chol),
                ),
            ];
            t.append(&eval.position, &diagnostics)?;
        }
    }

    Ok(Some(eval))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{FlatPrior, GaussianPrior, GaussianTarget, LogisticRegression};
    use crate::io::MemorySink;
    use crate::proposal::GaussianProposal;
    use approx::assert_relative_eq;
    use nalgebra::{DMatrix, DVector};

    #[test]
    fn posterior_sums_fisher_and_applies_precondition() {
        let target = GaussianTarget::diagonal(&[0.0, 0.0], &[1.0, 4.0]);
        let prior = GaussianPrior::new(2.0);
        let posterior = Posterior::new(&target, &prior, 0.5, false);

        let x = State::from_slice(&[0.0, 0.0]);
        let mut gradient = x.zero_like();
        let mut fisher = Tensor::zeros(2);
        posterior.log_prob_with_fisher(&x, &mut gradient, &mut fisher);

        // likelihood precision + prior 1/sigma^2 + precondition
        assert_relative_eq!(fisher[(0, 0)], 1.0 + 0.25 + 0.5);
        assert_relative_eq!(fisher[(1, 1)], 4.0 + 0.25 + 0.5);
        assert_relative_eq!(fisher[(0, 1)], 0.0);
    }

    #[test]
    fn posterior_prior_only_skips_likelihood() {
        let target = GaussianTarget::diagonal(&[50.0, 50.0], &[1.0, 1.0]);
        let prior = GaussianPrior::new(1.0);
        let posterior = Posterior::new(&target, &prior, 0.0, true);

        let x = State::from_slice(&[1.0, 0.0]);
        assert_relative_eq!(posterior.log_prob(&x), prior.log_prob(&x));
    }

    #[test]
    fn constant_metric_chain_samples_the_gaussian() {
        // Zero Fisher derivative: the generalized leapfrog reduces to the
        // weighted one, acceptance should be near-perfect at this step size.
        let target = GaussianTarget::diagonal(&[0.0, 0.0], &[1.0, 4.0]);
        let prior = FlatPrior;
        let momentum = NonSeparableMomentum::uniform(GaussianProposal::new(), 2, 0.1);
        let mut sampler = Riemannian::new(&target, &prior, momentum, State::zeros(2))
            .set_seed(21)
            .samples(50)
            .leapfrog_steps(10)
            .newton_steps(4);

        let mut sink = MemorySink::new();
        sampler.run(&mut sink).unwrap();
        assert_eq!(sink.len(), 50);

        let mut accepted_energy_errors = 0;
        for record in sink.records() {
            let delta = record.diagnostic("proposed_H").unwrap() - record.diagnostic("H").unwrap();
            assert!(delta.is_finite());
            if delta.abs() < 0.05 {
                accepted_energy_errors += 1;
            }
        }
        assert!(accepted_energy_errors > 40, "{accepted_energy_errors}/50");
    }

    #[test]
    fn logistic_regression_chain_stays_finite() {
        let design = DMatrix::from_row_slice(
            6,
            2,
            &[
                1.0, 0.5, 1.0, -1.0, 1.0, 2.0, 1.0, 0.0, 1.0, -0.5, 1.0, 1.5,
            ],
        );
        let labels = DVector::from_column_slice(&[1.0, 0.0, 1.0, 1.0, 0.0, 1.0]);
        let model = LogisticRegression::new(design, labels);
        let prior = GaussianPrior::new(10.0);
        let momentum = NonSeparableMomentum::uniform(GaussianProposal::new(), 2, 0.1);
        let mut sampler = Riemannian::new(&model, &prior, momentum, State::zeros(2))
            .set_seed(33)
            .samples(30)
            .leapfrog_steps(10)
            .newton_steps(6);

        let mut sink = MemorySink::new();
        sampler.run(&mut sink).unwrap();
        assert_eq!(sink.len(), 30);
        for record in sink.records() {
            assert!(record.state.all_finite());
            assert!(record.diagnostic("log_px").unwrap().is_finite());
            assert!(record.diagnostic("gaussian_prior").unwrap().is_finite());
        }
    }

    #[test]
    fn same_seed_gives_identical_chains() {
        let target = GaussianTarget::standard(2);
        let prior = FlatPrior;

        let mut run = |seed: u64| {
            let momentum = NonSeparableMomentum::uniform(GaussianProposal::new(), 2, 0.1);
            let mut sampler = Riemannian::new(&target, &prior, momentum, State::zeros(2))
                .set_seed(seed)
                .samples(10)
                .leapfrog_steps(5);
            let mut sink = MemorySink::new();
            sampler.run(&mut sink).unwrap();
            sink.to_matrix()
        };

        assert_eq!(run(9), run(9));
    }
}
