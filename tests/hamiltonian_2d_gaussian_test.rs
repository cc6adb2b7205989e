//! Verifies the leapfrog integrator and the HMC acceptance behavior on a 2D
//! Gaussian target.

use geodesic_mcmc::distributions::{FlatPrior, GaussianTarget};
use geodesic_mcmc::hamiltonian::Hamiltonian;
use geodesic_mcmc::io::MemorySink;
use geodesic_mcmc::model::ProbabilityModel;
use geodesic_mcmc::momentum::Momentum;
use geodesic_mcmc::proposal::{GaussianProposal, ProposalDistribution};
use geodesic_mcmc::state::State;

const SEED: u64 = 42;

/// With 30 leapfrog steps at step size 0.05 the energy error on a Gaussian
/// is tiny, so the expected acceptance probability must exceed 0.8.
#[test]
fn acceptance_rate_exceeds_080() {
    let target = GaussianTarget::diagonal(&[0.0, 0.0], &[1.0, 4.0]);
    let prior = FlatPrior;
    let momentum = Momentum::uniform(GaussianProposal::new(), 2, 0.05);
    let mut sampler = Hamiltonian::new(&target, &prior, momentum, State::zeros(2))
        .set_seed(SEED)
        .samples(100)
        .leapfrog_steps(30);

    let mut sink = MemorySink::new();
    sampler.run(&mut sink).expect("sampler run failed");
    assert_eq!(sink.len(), 100);

    // Average Metropolis acceptance probability min(1, exp(-dH)).
    let mean_acceptance: f64 = sink
        .records()
        .iter()
        .map(|r| {
            let delta = r.diagnostic("proposed_H").unwrap() - r.diagnostic("H").unwrap();
            (-delta).exp().min(1.0)
        })
        .sum::<f64>()
        / sink.len() as f64;
    assert!(mean_acceptance > 0.8, "mean acceptance = {mean_acceptance}");
}

/// Runs the leapfrog forward and then with the time direction negated; the
/// integrator must retrace its path exactly (up to floating-point noise).
#[test]
fn leapfrog_is_reversible() {
    let target = GaussianTarget::diagonal(&[0.0, 0.0], &[1.0, 4.0]);
    let steps = 25;

    let mut momentum = Momentum::uniform(GaussianProposal::new().set_seed(SEED), 2, 0.1);
    momentum.randomize();
    let p0 = momentum.momentum().clone();

    let mut x = State::from_slice(&[0.7, -0.3]);
    let x0 = x.clone();
    let mut gradient = x.zero_like();
    target.log_prob_with_gradient(&x, &mut gradient);

    for direction in [1.0, -1.0] {
        for _ in 0..steps {
            momentum.half_update(&gradient, direction);
            momentum.update_state(&mut x, direction);
            target.log_prob_with_gradient(&x, &mut gradient);
            momentum.half_update(&gradient, direction);
        }
    }

    for i in 0..2 {
        assert!((x[i] - x0[i]).abs() < 1e-9, "x[{i}] drifted: {}", x[i]);
        assert!(
            (momentum.momentum()[i] - p0[i]).abs() < 1e-9,
            "p[{i}] drifted: {}",
            momentum.momentum()[i]
        );
    }
}
