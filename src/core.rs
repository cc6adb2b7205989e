/*!
Machinery shared by all samplers: the Metropolis acceptance rule and a
parallel runner for independent Metropolis chains.

# Examples

```rust
use geodesic_mcmc::core::run_parallel;
use geodesic_mcmc::distributions::{FlatPrior, GaussianTarget};
use geodesic_mcmc::metropolis::Metropolis;
use geodesic_mcmc::proposal::{GaussianProposal, Walker};
use geodesic_mcmc::state::State;

let target = GaussianTarget::standard(2);
let prior = FlatPrior;
let walker = Walker::uniform(GaussianProposal::new(), 2, 0.5);
let prototype = Metropolis::new(&target, &prior, walker, State::zeros(2))
    .iterations(500)
    .sample_period(50);

let sinks = run_parallel(&prototype, 4, 42).unwrap();
assert_eq!(sinks.len(), 4);
assert!(sinks.iter().all(|s| s.len() == 10));
```
*/

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use rand::Rng;
use rayon::prelude::*;

use crate::error::McmcError;
use crate::io::MemorySink;
use crate::metropolis::Metropolis;
use crate::model::{Prior, ProbabilityModel};
use crate::proposal::ProposalDistribution;

/// The Metropolis acceptance rule over log-score differences.
///
/// Accepts deterministically when `log_ratio >= 0` (equal scores accept
/// without consulting the RNG) and with probability `exp(log_ratio)`
/// otherwise. A NaN `log_ratio` fails both comparisons, so divergent
/// proposals are always rejected.
pub fn accept<R: Rng>(rng: &mut R, log_ratio: f64) -> bool {
    log_ratio >= 0.0 || rng.gen::<f64>().ln() <= log_ratio
}

pub(crate) fn chain_progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        .unwrap()
        .progress_chars("##-")
}

/// Runs `num_chains` independent copies of a Metropolis sampler in parallel.
///
/// Chain `i` is a clone of `prototype` reseeded with `seed + i`, so a run is
/// reproducible for a fixed `(prototype, num_chains, seed)` triple and the
/// chains are mutually independent.
pub fn run_parallel<L, P, D>(
    prototype: &Metropolis<'_, L, P, D>,
    num_chains: usize,
    seed: u64,
) -> Result<Vec<MemorySink>, McmcError>
where
    L: ProbabilityModel + Sync,
    P: Prior + Sync,
    D: ProposalDistribution + Send + Sync,
{
    (0..num_chains)
        .into_par_iter()
        .map(|i| {
            let mut chain = prototype.clone().set_seed(seed + i as u64);
            let mut sink = MemorySink::new();
            chain.run(&mut sink)?;
            Ok(sink)
        })
        .collect()
}

/// As [`run_parallel`], with one progress bar per chain.
pub fn run_parallel_progress<L, P, D>(
    prototype: &Metropolis<'_, L, P, D>,
    num_chains: usize,
    seed: u64,
) -> Result<Vec<MemorySink>, McmcError>
where
    L: ProbabilityModel + Sync,
    P: Prior + Sync,
    D: ProposalDistribution + Send + Sync,
{
    let multi = MultiProgress::new();
    let style = chain_progress_style();

    (0..num_chains)
        .into_par_iter()
        .map(|i| {
            let pb = multi.add(ProgressBar::new(0));
            pb.set_prefix(format!("Chain {i}"));
            pb.set_style(style.clone());

            let mut chain = prototype.clone().set_seed(seed + i as u64);
            let mut sink = MemorySink::new();
            chain.run_progress(&mut sink, &pb)?;
            pb.finish_with_message("Done!");
            Ok(sink)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{FlatPrior, GaussianTarget};
    use crate::metropolis::Metropolis;
    use crate::proposal::{GaussianProposal, Walker};
    use crate::state::State;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn accepts_non_negative_log_ratio() {
        let mut rng = SmallRng::seed_from_u64(0);
        assert!(accept(&mut rng, 0.0));
        assert!(accept(&mut rng, 1.5));
        assert!(accept(&mut rng, f64::INFINITY));
    }

    #[test]
    fn rejects_nan_and_very_negative() {
        let mut rng = SmallRng::seed_from_u64(0);
        assert!(!accept(&mut rng, f64::NAN));
        for _ in 0..100 {
            assert!(!accept(&mut rng, -1000.0));
        }
    }

    #[test]
    fn acceptance_frequency_tracks_exp_of_log_ratio() {
        let mut rng = SmallRng::seed_from_u64(123);
        let log_ratio: f64 = -1.0;
        let trials = 100_000;
        let accepted = (0..trials).filter(|_| accept(&mut rng, log_ratio)).count();
        let frequency = accepted as f64 / trials as f64;
        assert!(
            (frequency - log_ratio.exp()).abs() < 0.01,
            "frequency = {frequency}"
        );
    }

    #[test]
    fn parallel_chains_are_reproducible_and_distinct() {
        let target = GaussianTarget::standard(2);
        let prior = FlatPrior;
        let walker = Walker::uniform(GaussianProposal::new(), 2, 0.5);
        let prototype = Metropolis::new(&target, &prior, walker, State::zeros(2))
            .iterations(200)
            .sample_period(20);

        let a = run_parallel(&prototype, 3, 7).unwrap();
        let b = run_parallel(&prototype, 3, 7).unwrap();
        for (left, right) in a.iter().zip(&b) {
            assert_eq!(left.to_matrix(), right.to_matrix());
        }
        assert_ne!(a[0].to_matrix(), a[1].to_matrix());
    }
}
