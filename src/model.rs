/*!
Traits connecting probability models to the samplers.

The samplers never know what they are sampling: they see a
[`ProbabilityModel`] (log-density and gradient), a [`FisherModel`] (adds the
Fisher-information matrix and its derivative tensors, required by the
Riemannian sampler) and a [`Prior`] (adds named per-component diagnostics
that the sinks write alongside each sample).

Models are stateless per call and may own fixed data (observations, design
matrices). They return the log-density and fill caller-supplied containers
for the gradient and curvature, so the hot loops allocate nothing on the
model side.
*/

use crate::state::{State, Tensor};

/// A log-density over [`State`] with an analytic gradient.
pub trait ProbabilityModel {
    /// Unnormalized log-density at `state`.
    fn log_prob(&self, state: &State) -> f64;

    /// Log-density at `state`, writing `d log p / d x` into `gradient`.
    ///
    /// `gradient` must have the same dimension as `state`; its previous
    /// contents are overwritten.
    fn log_prob_with_gradient(&self, state: &State, gradient: &mut State) -> f64;
}

/// A model that also supplies Fisher information.
///
/// `fisher` receives the D×D Fisher-information matrix at `state` and
/// `fisher_gradient[k]` receives `dW/dx_k`. Both are overwritten, never
/// accumulated into; the Riemannian sampler's `Posterior` does the summing.
pub trait FisherModel: ProbabilityModel {
    fn log_prob_with_fisher(
        &self,
        state: &State,
        gradient: &mut State,
        fisher: &mut Tensor,
    ) -> f64;

    fn log_prob_with_fisher_gradient(
        &self,
        state: &State,
        gradient: &mut State,
        fisher: &mut Tensor,
        fisher_gradient: &mut [Tensor],
    ) -> f64;
}

/// A prior with named diagnostic components.
///
/// Every sampler writes the per-component values into each sample record, so
/// the breakdown of the prior score can be followed through a run.
pub trait Prior: FisherModel {
    /// Names of the diagnostic components, in a fixed order.
    fn component_names(&self) -> Vec<String>;

    /// Component values at `state`, in the same order as
    /// [`Prior::component_names`].
    fn component_values(&self, state: &State) -> Vec<(String, f64)>;
}
