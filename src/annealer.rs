//! Simulated-annealing schedule for the Metropolis sampler.
//!
//! The tempering factor starts at `start_fraction` and rises monotonically to
//! 1.0 over `num_steps` elementary MCMC steps, moving linearly in log space.
//! The Metropolis loop multiplies the likelihood term (and only the
//! likelihood term) by this factor.

/// Monotone tempering-factor schedule, advanced once per elementary step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Annealer {
    /// Natural log of the current tempering factor.
    t: f64,
    /// Constant increment per step; reaches `ln(1.0)` after `num_steps`.
    t_inc: f64,
}

pub const START_FRACTION_DEFAULT: f64 = 0.01;

impl Annealer {
    /// Schedule that anneals from `start_fraction` to 1.0 over `num_steps`.
    pub fn new(num_steps: usize, start_fraction: f64) -> Self {
        let t = start_fraction.ln();
        let t_inc = if num_steps == 0 {
            0.0
        } else {
            -t / num_steps as f64
        };
        Self { t, t_inc }
    }

    /// Current tempering factor, `exp(t)`.
    pub fn factor(&self) -> f64 {
        self.t.exp()
    }

    /// Advances the schedule by one elementary step.
    pub fn increment(&mut self) {
        self.t += self.t_inc;
    }
}
