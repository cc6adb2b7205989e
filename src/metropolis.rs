/*!
Random-walk Metropolis sampler with simulated annealing.

The annealing schedule tempers the likelihood (and only the likelihood): the
working score is `likelihood * factor + prior`, with `factor` rising from
`start_fraction` to 1.0 over the run. The walker's step is scaled by
`1/sqrt(factor)` so early, flat iterations explore with larger moves. With
`start_fraction = 1.0` (the default) this is plain Metropolis.

One record is appended to the sink every `sample_period` elementary
iterations; burn-in is just a leading run with its own constants into a
[`crate::io::NullSink`].

# Examples

```rust
use geodesic_mcmc::distributions::{FlatPrior, GaussianTarget};
use geodesic_mcmc::io::MemorySink;
use geodesic_mcmc::metropolis::Metropolis;
use geodesic_mcmc::proposal::{GaussianProposal, Walker};
use geodesic_mcmc::state::State;

let target = GaussianTarget::standard(2);
let prior = FlatPrior;
let walker = Walker::uniform(GaussianProposal::new(), 2, 0.5);
let mut sampler = Metropolis::new(&target, &prior, walker, State::zeros(2))
    .set_seed(42)
    .iterations(1000)
    .sample_period(100);

let mut sink = MemorySink::new();
sampler.run(&mut sink).unwrap();
assert_eq!(sink.len(), 10);
```
*/

use std::time::Instant;

use indicatif::ProgressBar;
use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::annealer::Annealer;
use crate::core::accept;
use crate::error::McmcError;
use crate::io::SampleSink;
use crate::model::{Prior, ProbabilityModel};
use crate::proposal::{ProposalDistribution, Walker};
use crate::state::State;

pub const ITERATIONS_DEFAULT: usize = 100_000;
pub const SAMPLE_PERIOD_DEFAULT: usize = 1_000;
pub const ANNEAL_START_FRACTION_DEFAULT: f64 = 1.0;

/// Annealed random-walk Metropolis sampler.
#[derive(Debug)]
pub struct Metropolis<'a, L, P, D> {
    likelihood: &'a L,
    prior: &'a P,
    walker: Walker<D>,
    current: State,
    rng: SmallRng,
    num_iterations: usize,
    sample_period: usize,
    anneal_start_fraction: f64,
    prior_only: bool,
    verbose: bool,
}

impl<'a, L, P, D> Clone for Metropolis<'a, L, P, D>
where
    D: Clone,
{
    fn clone(&self) -> Self {
        Self {
            likelihood: self.likelihood,
            prior: self.prior,
            walker: self.walker.clone(),
            current: self.current.clone(),
            rng: self.rng.clone(),
            num_iterations: self.num_iterations,
            sample_period: self.sample_period,
            anneal_start_fraction: self.anneal_start_fraction,
            prior_only: self.prior_only,
            verbose: self.verbose,
        }
    }
}

impl<'a, L, P, D> Metropolis<'a, L, P, D>
where
    L: ProbabilityModel,
    P: Prior,
    D: ProposalDistribution,
{
    pub fn new(likelihood: &'a L, prior: &'a P, walker: Walker<D>, initial: State) -> Self {
        Self {
            likelihood,
            prior,
            walker,
            current: initial,
            rng: SmallRng::seed_from_u64(rand::random()),
            num_iterations: ITERATIONS_DEFAULT,
            sample_period: SAMPLE_PERIOD_DEFAULT,
            anneal_start_fraction: ANNEAL_START_FRACTION_DEFAULT,
            prior_only: false,
            verbose: false,
        }
    }

    /// Reseeds the acceptance RNG and the walker's proposal distribution.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.rng = SmallRng::seed_from_u64(seed);
        self.walker = self.walker.set_seed(seed.wrapping_add(1));
        self
    }

    /// Total number of elementary iterations per run.
    pub fn iterations(mut self, num_iterations: usize) -> Self {
        self.num_iterations = num_iterations;
        self
    }

    /// Number of elementary iterations between recorded samples.
    pub fn sample_period(mut self, sample_period: usize) -> Self {
        self.sample_period = sample_period.max(1);
        self
    }

    /// Starting fraction of the annealing schedule (1.0 disables annealing).
    pub fn anneal_start_fraction(mut self, start_fraction: f64) -> Self {
        self.anneal_start_fraction = start_fraction;
        self
    }

    /// Samples the prior alone, scoring the likelihood as 0 everywhere.
    pub fn prior_only(mut self, prior_only: bool) -> Self {
        self.prior_only = prior_only;
        self
    }

    /// Prints a one-line summary for every recorded sample.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Last accepted state.
    pub fn current(&self) -> &State {
        &self.current
    }

    fn likelihood_log_prob(&self, state: &State) -> f64 {
        if self.prior_only {
            0.0
        } else {
            self.likelihood.log_prob(state)
        }
    }

    /// Runs the sampler, appending one record to `sink` every
    /// `sample_period` iterations.
    pub fn run<S: SampleSink>(&mut self, sink: &mut S) -> Result<(), McmcError> {
        self.run_inner(sink, None)
    }

    /// As [`Metropolis::run`], advancing `progress` once per iteration.
    pub fn run_progress<S: SampleSink>(
        &mut self,
        sink: &mut S,
        progress: &ProgressBar,
    ) -> Result<(), McmcError> {
        progress.set_length(self.num_iterations as u64);
        self.run_inner(sink, Some(progress))
    }

    fn run_inner<S: SampleSink>(
        &mut self,
        sink: &mut S,
        progress: Option<&ProgressBar>,
    ) -> Result<(), McmcError> {
        let mut annealer = Annealer::new(self.num_iterations, self.anneal_start_fraction);

        let mut likelihood_px = self.likelihood_log_prob(&self.current);
        let mut prior_px = self.prior.log_prob(&self.current);
        let mut px = likelihood_px * annealer.factor() + prior_px;

        let mut proposed = self.current.zero_like();
        let mut period_accepted = 0usize;
        let mut period_total = 0usize;
        let mut block_start = Instant::now();

        for iteration in 1..=self.num_iterations {
            let scalar = 1.0 / annealer.factor().sqrt();
            self.walker.step(&self.current, &mut proposed, scalar);

            let proposed_likelihood = self.likelihood_log_prob(&proposed);
            let proposed_prior = self.prior.log_prob(&proposed);
            let proposed_px = proposed_likelihood * annealer.factor() + proposed_prior;

            period_total += 1;
            if accept(&mut self.rng, proposed_px - px) {
                self.current.clone_from(&proposed);
                likelihood_px = proposed_likelihood;
                prior_px = proposed_prior;
                period_accepted += 1;
            }

            // The cached score tracks the schedule, not just the state.
            annealer.increment();
            px = likelihood_px * annealer.factor() + prior_px;

            if let Some(pb) = progress {
                pb.inc(1);
            }

            if iteration % self.sample_period == 0 {
                let log_px = likelihood_px + prior_px;
                let acceptance_ratio = period_accepted as f64 / period_total as f64;
                // Time spent in this sample block, not since the run began.
                let elapsed_time = block_start.elapsed().as_secs_f64();

                let components = self.prior.component_values(&self.current);
                let mut diagnostics: Vec<(&str, f64)> = vec![
                    ("log_px", log_px),
                    ("anneal_log_px", px),
                    ("likelihood", likelihood_px),
                    ("prior", prior_px),
                    ("acceptance_ratio", acceptance_ratio),
                    ("elapsed_time", elapsed_time),
                ];
                diagnostics.extend(components.iter().map(|(n, v)| (n.as_str(), *v)));
                sink.append(&self.current, &diagnostics)?;

                if self.verbose {
                    println!(
                        "iteration {}: log_px = {:.6}, acceptance ratio = {:.3}",
                        iteration, log_px, acceptance_ratio
                    );
                }
                period_accepted = 0;
                period_total = 0;
                block_start = Instant::now();
            }
        }

        if let Some(pb) = progress {
            pb.finish();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{FlatPrior, GaussianPrior, GaussianTarget};
    use crate::io::MemorySink;
    use crate::proposal::GaussianProposal;

    fn sampler<'a>(
        target: &'a GaussianTarget,
        prior: &'a FlatPrior,
    ) -> Metropolis<'a, GaussianTarget, FlatPrior, GaussianProposal> {
        let walker = Walker::uniform(GaussianProposal::new(), 2, 0.5);
        Metropolis::new(target, prior, walker, State::zeros(2))
    }

    #[test]
    fn emits_one_record_per_period() {
        let target = GaussianTarget::standard(2);
        let prior = FlatPrior;
        let mut sampler = sampler(&target, &prior)
            .set_seed(1)
            .iterations(500)
            .sample_period(50);

        let mut sink = MemorySink::new();
        sampler.run(&mut sink).unwrap();
        assert_eq!(sink.len(), 10);
        for record in sink.records() {
            assert!(record.diagnostic("log_px").is_some());
            assert!(record.diagnostic("anneal_log_px").is_some());
            let ratio = record.diagnostic("acceptance_ratio").unwrap();
            assert!((0.0..=1.0).contains(&ratio));
        }
    }

    #[test]
    fn same_seed_gives_identical_chains() {
        let target = GaussianTarget::standard(2);
        let prior = FlatPrior;

        let mut run = |seed: u64| {
            let mut sampler = sampler(&target, &prior)
                .set_seed(seed)
                .iterations(200)
                .sample_period(10);
            let mut sink = MemorySink::new();
            sampler.run(&mut sink).unwrap();
            sink.to_matrix()
        };

        assert_eq!(run(7), run(7));
        assert_ne!(run(7), run(8));
    }

    #[test]
    fn prior_only_ignores_likelihood() {
        // Likelihood centred far away; prior-only samples must stay near 0.
        let target = GaussianTarget::diagonal(&[100.0, 100.0], &[100.0, 100.0]);
        let prior = GaussianPrior::new(1.0);
        let walker = Walker::uniform(GaussianProposal::new(), 2, 0.5);
        let mut sampler = Metropolis::new(&target, &prior, walker, State::zeros(2))
            .set_seed(3)
            .iterations(5_000)
            .sample_period(10)
            .prior_only(true);

        let mut sink = MemorySink::new();
        sampler.run(&mut sink).unwrap();

        let matrix = sink.to_matrix();
        let mean = matrix.row_mean();
        assert!(mean[0].abs() < 0.5, "mean[0] = {}", mean[0]);
        assert!(mean[1].abs() < 0.5, "mean[1] = {}", mean[1]);
    }

    #[test]
    fn records_split_likelihood_and_prior() {
        let target = GaussianTarget::standard(2);
        let prior = GaussianPrior::new(1.0);
        let walker = Walker::uniform(GaussianProposal::new(), 2, 0.5);
        let mut sampler = Metropolis::new(&target, &prior, walker, State::zeros(2))
            .set_seed(13)
            .iterations(200)
            .sample_period(50);

        let mut sink = MemorySink::new();
        sampler.run(&mut sink).unwrap();

        for record in sink.records() {
            let likelihood = record.diagnostic("likelihood").unwrap();
            let prior_px = record.diagnostic("prior").unwrap();
            let log_px = record.diagnostic("log_px").unwrap();
            assert!((likelihood + prior_px - log_px).abs() < 1e-12);
        }
    }

    #[test]
    fn elapsed_time_covers_one_block_not_the_run() {
        let target = GaussianTarget::standard(2);
        let prior = FlatPrior;
        let mut sampler = sampler(&target, &prior)
            .set_seed(19)
            .iterations(100_000)
            .sample_period(10_000);

        let mut sink = MemorySink::new();
        let start = std::time::Instant::now();
        sampler.run(&mut sink).unwrap();
        let total = start.elapsed().as_secs_f64();

        // Per-block durations sum to roughly the whole run; a clock counted
        // from the start of the run would sum to several multiples of it.
        let block_sum: f64 = sink
            .records()
            .iter()
            .map(|r| r.diagnostic("elapsed_time").unwrap())
            .sum();
        assert!(
            block_sum <= total * 1.05,
            "block_sum = {block_sum}, total = {total}"
        );
        for record in sink.records() {
            assert!(record.diagnostic("elapsed_time").unwrap() >= 0.0);
        }
    }

    #[test]
    fn prior_components_are_recorded() {
        let target = GaussianTarget::standard(2);
        let prior = GaussianPrior::new(1.0);
        let walker = Walker::uniform(GaussianProposal::new(), 2, 0.5);
        let mut sampler = Metropolis::new(&target, &prior, walker, State::zeros(2))
            .set_seed(5)
            .iterations(100)
            .sample_period(100);

        let mut sink = MemorySink::new();
        sampler.run(&mut sink).unwrap();
        assert!(sink.records()[0].diagnostic("gaussian_prior").is_some());
    }
}
