//! Linear operators and iterative linear solvers used by `mach`.
pub mod gmres;
pub mod operator;
pub mod preconditioner;

pub use gmres::{Gmres, GmresOutput, GmresWorkspace, ResidualCriterion};
pub use operator::{CsrTranspose, DiagonalOperator, IdentityOperator, LinearOperator};
pub use preconditioner::{BlockJacobi, Jacobi, PreconditionerError};
