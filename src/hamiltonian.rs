/*!
Hamiltonian Monte Carlo with a fixed (identity) metric.

Each sample refreshes the auxiliary momentum, integrates Hamilton's
equations with `num_leapfrog_steps` leapfrog steps and applies a Metropolis
test on the total-energy change. The Hamiltonian is `H = KE - log_px`
(log-probability is maximized, so the potential enters with a minus sign and
the momentum kick *adds* the gradient).

Every sample attempt is recorded, accepted or not, with its `log_px`, the
starting Hamiltonian `H` and the proposed Hamiltonian `proposed_H`; a
rejected attempt records the retained state. An optional trace sink receives
one record per leapfrog step for integrator diagnostics.

# Examples

```rust
use geodesic_mcmc::distributions::{FlatPrior, GaussianTarget};
use geodesic_mcmc::hamiltonian::Hamiltonian;
use geodesic_mcmc::io::MemorySink;
use geodesic_mcmc::momentum::Momentum;
use geodesic_mcmc::proposal::GaussianProposal;
use geodesic_mcmc::state::State;

let target = GaussianTarget::standard(2);
let prior = FlatPrior;
let momentum = Momentum::uniform(GaussianProposal::new(), 2, 0.1);
let mut sampler = Hamiltonian::new(&target, &prior, momentum, State::zeros(2))
    .set_seed(42)
    .samples(10)
    .leapfrog_steps(20);

let mut sink = MemorySink::new();
sampler.run(&mut sink).unwrap();
assert_eq!(sink.len(), 10);
```
*/

use indicatif::ProgressBar;
use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::core::accept;
use crate::error::McmcError;
use crate::io::{NullSink, SampleSink};
use crate::model::{Prior, ProbabilityModel};
use crate::momentum::Momentum;
use crate::proposal::ProposalDistribution;
use crate::state::State;

pub const SAMPLES_DEFAULT: usize = 20;
pub const LEAPFROG_STEPS_DEFAULT: usize = 30;

/// Fixed-metric HMC sampler.
#[derive(Debug, Clone)]
pub struct Hamiltonian<'a, L, P, D> {
    likelihood: &'a L,
    prior: &'a P,
    momentum: Momentum<D>,
    current: State,
    rng: SmallRng,
    num_samples: usize,
    num_leapfrog_steps: usize,
    prior_only: bool,
    verbose: bool,
}

impl<'a, L, P, D> Hamiltonian<'a, L, P, D>
where
    L: ProbabilityModel,
    P: Prior,
    D: ProposalDistribution,
{
    pub fn new(likelihood: &'a L, prior: &'a P, momentum: Momentum<D>, initial: State) -> Self {
        Self {
            likelihood,
            prior,
            momentum,
            current: initial,
            rng: SmallRng::seed_from_u64(rand::random()),
            num_samples: SAMPLES_DEFAULT,
            num_leapfrog_steps: LEAPFROG_STEPS_DEFAULT,
            prior_only: false,
            verbose: false,
        }
    }

    /// Reseeds the acceptance RNG and the momentum refresh distribution.
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

    /// Combined posterior log-density and gradient (likelihood + prior, or
    /// prior alone under `prior_only`).
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

    pub fn run<S: SampleSink>(&mut self, sink: &mut S) -> Result<(), McmcError> {
        self.run_inner(sink, None::<&mut NullSink>, None)
    }

    /// As [`Hamiltonian::run`], advancing `progress` once per sample.
    pub fn run_progress<S: SampleSink>(
        &mut self,
        sink: &mut S,
        progress: &ProgressBar,
    ) -> Result<(), McmcError> {
        progress.set_length(self.num_samples as u64);
        self.run_inner(sink, None::<&mut NullSink>, Some(progress))
    }

    /// As [`Hamiltonian::run`], also appending one record per leapfrog step
    /// to `trace`: the intermediate state with `log_px`, the predicted and
    /// actual log-probability change over the drift, the squared gradient
    /// norm and the kinetic energy.
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
        let mut gradient = self.current.zero_like();
        let initial = self.current.clone();
        let mut log_px = self.log_prob_with_gradient(&initial, &mut gradient);

        for sample in 1..=self.num_samples {
            self.momentum.randomize();

            let hamiltonian = self.momentum.log_kinetic_energy() - log_px;

            let mut position = self.current.clone();
            let mut trial_gradient = gradient.clone();
            let mut trial_log_px = log_px;

            for _ in 0..self.num_leapfrog_steps {
                self.momentum.half_update(&trial_gradient, 1.0);

                let predicted_change = self.momentum.predicted_change(&trial_gradient, 1.0);
                let before_log_px = trial_log_px;

                self.momentum.update_state(&mut position, 1.0);
                trial_log_px = self.log_prob_with_gradient(&position, &mut trial_gradient);

                if let Some(t) = trace.as_deref_mut() {
                    let diagnostics = [
                        ("log_px", trial_log_px),
                        ("pred_d_log_px", predicted_change),
                        ("act_d_log_px", trial_log_px - before_log_px),
                        ("grad_norm2", trial_gradient.norm2()),
                        ("log_kinetic_energy", self.momentum.log_kinetic_energy()),
                    ];
                    t.append(&position, &diagnostics)?;
                }

                self.momentum.half_update(&trial_gradient, 1.0);
            }

            let proposed_hamiltonian = self.momentum.log_kinetic_energy() - trial_log_px;

            if accept(&mut self.rng, -(proposed_hamiltonian - hamiltonian)) {
                self.current.clone_from(&position);
                gradient.clone_from(&trial_gradient);
                log_px = trial_log_px;
            }

            let components = self.prior.component_values(&self.current);
            let mut diagnostics: Vec<(&str, f64)> = vec![
                ("log_px", log_px),
                ("H", hamiltonian),
                ("proposed_H", proposed_hamiltonian),
            ];
            diagnostics.extend(components.iter().map(|(n, v)| (n.as_str(), *v)));
            sink.append(&self.current, &diagnostics)?;

            if self.verbose {
                println!(
                    "sample {}: log_px = {:.6}, H = {:.6}, proposed H = {:.6}",
                    sample, log_px, hamiltonian, proposed_hamiltonian
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
