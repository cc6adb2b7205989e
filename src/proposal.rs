/*!
Elementary proposal distributions and the random-walk `Walker`.

A [`ProposalDistribution`] is the single source of elementary randomness for
the proposal side of every sampler: the Metropolis [`Walker`] perturbs each
dimension with it, and the momentum variables in [`crate::momentum`] draw
their refresh values from it. Implementations are cloneable so composed
objects can own independent copies, and are seeded through the same
`set_seed` builder convention as the samplers.

# Examples

```rust
use geodesic_mcmc::proposal::{GaussianProposal, ProposalDistribution, Walker};
use geodesic_mcmc::state::State;

let mut walker = Walker::uniform(GaussianProposal::new().set_seed(7), 2, 0.5);
let current = State::from_slice(&[0.0, 0.0]);
let mut proposed = current.zero_like();
walker.step(&current, &mut proposed, 1.0);
assert_eq!(proposed.len(), 2);
```
*/

use nalgebra::DVector;
use rand::rngs::SmallRng;
use rand::{thread_rng, Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::error::McmcError;
use crate::state::State;

/// An elementary randomized step: a perturbation of `current` with spread
/// `scale`. Never fails; must be seeded externally for reproducibility.
pub trait ProposalDistribution: Clone {
    /// Draws a new value centred on `current` with standard deviation `scale`.
    fn sample(&mut self, current: f64, scale: f64) -> f64;

    /// Returns this distribution reseeded with `seed`.
    fn set_seed(self, seed: u64) -> Self;
}

/// Gaussian perturbation: `current + scale * z`, `z ~ N(0, 1)`.
#[derive(Debug, Clone)]
pub struct GaussianProposal {
    rng: SmallRng,
}

impl GaussianProposal {
    pub fn new() -> Self {
        Self {
            rng: SmallRng::seed_from_u64(thread_rng().gen::<u64>()),
        }
    }
}

impl Default for GaussianProposal {
    fn default() -> Self {
        Self::new()
    }
}

impl ProposalDistribution for GaussianProposal {
    fn sample(&mut self, current: f64, scale: f64) -> f64 {
        let z: f64 = self.rng.sample(StandardNormal);
        current + scale * z
    }

    fn set_seed(mut self, seed: u64) -> Self {
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }
}

/// Per-dimension random-walk proposal for the Metropolis sampler.
///
/// Holds a step-size vector fixed for the run; the caller shrinks or grows
/// the whole step with the `scalar` argument of [`Walker::step`] (the
/// Metropolis sampler passes `1/sqrt(annealing factor)`).
#[derive(Debug, Clone)]
pub struct Walker<P> {
    distr: P,
    step_sizes: DVector<f64>,
}

impl<P: ProposalDistribution> Walker<P> {
    /// A walker with the same step size in every dimension.
    pub fn uniform(distr: P, dim: usize, step_scale: f64) -> Self {
        Self {
            distr,
            step_sizes: DVector::from_element(dim, step_scale),
        }
    }

    /// A walker whose relative step sizes come from a template state.
    ///
    /// A length-1 template broadcasts to every dimension; a length-`dim`
    /// template is used elementwise; anything else is a setup error. The
    /// loaded sizes are multiplied by `step_scale`.
    pub fn from_template(
        distr: P,
        template: &State,
        dim: usize,
        step_scale: f64,
    ) -> Result<Self, McmcError> {
        let step_sizes = step_sizes_from_template(template, dim, step_scale)?;
        Ok(Self { distr, step_sizes })
    }

    /// Fills `proposed` with a perturbation of `current`:
    /// `proposed[i] = distr.sample(current[i], step_sizes[i] * scalar)`.
    pub fn step(&mut self, current: &State, proposed: &mut State, scalar: f64) {
        assert_eq!(current.len(), proposed.len());
        assert_eq!(current.len(), self.step_sizes.len());

        for i in 0..current.len() {
            proposed[i] = self.distr.sample(current[i], self.step_sizes[i] * scalar);
        }
    }

    pub fn step_sizes(&self) -> &DVector<f64> {
        &self.step_sizes
    }

    /// Returns this walker with its proposal distribution reseeded.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.distr = self.distr.set_seed(seed);
        self
    }
}

/// Broadcast-or-exact-length rule shared by `Walker` and the momenta.
pub(crate) fn step_sizes_from_template(
    template: &State,
    dim: usize,
    step_scale: f64,
) -> Result<DVector<f64>, McmcError> {
    let sizes = if template.len() == 1 {
        DVector::from_element(dim, template[0])
    } else if template.len() == dim {
        template.vector().clone()
    } else {
        return Err(McmcError::DimensionMismatch {
            expected: dim,
            found: template.len(),
        });
    };
    Ok(sizes * step_scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gaussian_proposal_is_reproducible() {
        let mut a = GaussianProposal::new().set_seed(42);
        let mut b = GaussianProposal::new().set_seed(42);
        for _ in 0..10 {
            assert_eq!(a.sample(1.0, 0.3), b.sample(1.0, 0.3));
        }
    }

    #[test]
    fn zero_scale_returns_current() {
        let mut distr = GaussianProposal::new().set_seed(1);
        assert_eq!(distr.sample(2.5, 0.0), 2.5);
    }

    #[test]
    fn template_broadcast_and_exact() {
        let distr = GaussianProposal::new().set_seed(0);

        let single = State::from_slice(&[2.0]);
        let w = Walker::from_template(distr.clone(), &single, 3, 0.5).unwrap();
        assert_eq!(w.step_sizes().as_slice(), &[1.0, 1.0, 1.0]);

        let exact = State::from_slice(&[1.0, 2.0, 3.0]);
        let w = Walker::from_template(distr.clone(), &exact, 3, 2.0).unwrap();
        assert_eq!(w.step_sizes().as_slice(), &[2.0, 4.0, 6.0]);

        let wrong = State::from_slice(&[1.0, 2.0]);
        assert!(matches!(
            Walker::from_template(distr, &wrong, 3, 1.0),
            Err(McmcError::DimensionMismatch { expected: 3, found: 2 })
        ));
    }

    #[test]
    fn walker_scalar_shrinks_steps() {
        // With a zero scalar the proposal collapses onto the current state.
        let mut walker = Walker::uniform(GaussianProposal::new().set_seed(5), 2, 1.0);
        let current = State::from_slice(&[1.0, -1.0]);
        let mut proposed = current.zero_like();
        walker.step(&current, &mut proposed, 0.0);
        assert_eq!(proposed, State::from_slice(&[1.0, -1.0]));
    }
}
