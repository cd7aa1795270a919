/// Calculus helper traits and numerical differentiation
pub mod calculus;
/// Line search strategies shared by the Newton-type solvers
pub mod line_search;
/// Newton's method globalized by a line search
pub mod newton;
/// BFGS quasi-Newton solver
pub mod bfgs;
