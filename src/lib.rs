pub mod error;
pub mod flow;
pub mod inputs;
pub mod linear;
pub mod load;
pub mod mesh;
pub mod nonlinear_form;
pub mod ode;
pub mod operator;
pub mod options;
pub mod output;
pub mod residual;
pub mod sbp;
pub mod solver;
pub mod space;
pub mod thermal;

pub mod optimize {
    pub use mach_optimize::*;
}

pub mod sparse {
    pub use mach_sparse::*;
}

#[cfg(feature = "proptest")]
pub mod proptest;

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;

pub use error::{MachError, Result};
pub use inputs::{InputValue, MachInputs};
pub use residual::Residual;
