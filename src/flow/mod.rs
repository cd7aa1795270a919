//! Entropy-stable discretization of the Euler equations.
pub mod fluxes;
pub mod integrators;
pub mod variables;

mod residual;

pub use residual::FlowResidual;
