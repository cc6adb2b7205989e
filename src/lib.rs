pub mod annealer;
pub mod core;
pub mod distributions;
pub mod error;
pub mod hamiltonian;
pub mod io;
pub mod metropolis;
pub mod model;
pub mod momentum;
pub mod proposal;
pub mod riemannian;
pub mod state;
pub mod stats;
