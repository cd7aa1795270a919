//! The residual protocol shared by all physics, and its adapter to the nonlinear solvers.
use crate::error::{MachError, Result};
use crate::inputs::{check_size, MachInputs};
use crate::linear::{LinearSolver, Preconditioner};
use crate::operator::JacobianOperator;
use crate::options::NonlinSolverOptions;
use crate::output::MachOutput;
use mach_optimize::calculus::{DifferentiableVectorFunction, VectorFunction};
use mach_optimize::newton::{NewtonResult, NewtonSettings, RelaxedNewton};
use mach_sparse::LinearOperator;
use nalgebra::{DVectorView, DVectorViewMut};
use std::borrow::Cow;
use std::error::Error;

/// A discrete residual `R(state; params)`.
///
/// Residuals are used behind `dyn Residual` by the time steppers and the solver, so any
/// type implementing this trait can be driven by them.
///
/// # Linearization point
///
/// `set_inputs` and `evaluate` update the point that later Jacobian, entropy and
/// product queries refer to. [`Residual::jacobian`] hands out a reference to an operator
/// owned by the residual; it is tied to the mutable borrow of the residual and therefore
/// cannot outlive the next call that changes the linearization point.
///
/// # Products
///
/// `jacobian_vector_product` and `vector_jacobian_product` *accumulate* into their output,
/// so that contributions of several residuals can be summed in one buffer.
pub trait Residual {
    /// Number of scalar unknowns.
    fn size(&self) -> usize;

    fn set_options(&mut self, _options: &serde_json::Value) -> Result<()> {
        Ok(())
    }

    fn set_inputs(&mut self, inputs: &MachInputs) -> Result<()>;

    /// Computes `R(inputs)` into `res`, which must have length [`Residual::size`].
    fn evaluate(&mut self, inputs: &MachInputs, res: &mut [f64]) -> Result<()>;

    /// The Jacobian `dR/d(wrt)` at `inputs`.
    fn jacobian(&mut self, inputs: &MachInputs, wrt: &str) -> Result<&JacobianOperator>;

    /// Sets the linearization point for subsequent products.
    fn linearize(&mut self, inputs: &MachInputs) -> Result<()> {
        self.set_inputs(inputs)
    }

    fn calc_entropy(&mut self, _inputs: &MachInputs) -> Result<f64> {
        Err(MachError::Unsupported("entropy is not defined for this residual".to_string()))
    }

    fn calc_entropy_change(&mut self, _inputs: &MachInputs) -> Result<f64> {
        Err(MachError::Unsupported("entropy change is not defined for this residual".to_string()))
    }

    /// `res_dot += dR/d(wrt) * wrt_dot` at the linearization point.
    fn jacobian_vector_product(&mut self, wrt: &str, _wrt_dot: &[f64], _res_dot: &mut [f64]) -> Result<()> {
        Err(MachError::Unsupported(format!("Jacobian-vector product with respect to \"{}\"", wrt)))
    }

    /// `wrt_bar += res_bar^T * dR/d(wrt)` at the linearization point.
    fn vector_jacobian_product(&mut self, wrt: &str, _res_bar: &[f64], _wrt_bar: &mut [f64]) -> Result<()> {
        Err(MachError::Unsupported(format!("vector-Jacobian product with respect to \"{}\"", wrt)))
    }

    /// `res_bar^T * dR/d(wrt)` for a scalar input `wrt`.
    fn scalar_vector_jacobian_product(&mut self, wrt: &str, _res_bar: &[f64]) -> Result<f64> {
        Err(MachError::Unsupported(format!("vector-Jacobian product with respect to \"{}\"", wrt)))
    }

    /// Size of the diagonal blocks used by block preconditioners.
    fn block_size(&self) -> usize {
        1
    }

    /// The mass operator `M` of the semi-discrete system `M du/dt + R(u) = 0`.
    ///
    /// Residuals that assemble a mass operator hand out a borrow of it.
    fn mass_matrix(&self) -> Cow<'_, JacobianOperator> {
        Cow::Owned(JacobianOperator::Identity(self.size()))
    }

    /// Builds the preconditioner described by the `lin-prec` options from the Jacobian
    /// with respect to the state.
    fn get_preconditioner(&mut self, inputs: &MachInputs, options: &serde_json::Value) -> Result<Preconditioner> {
        let block_size = self.block_size();
        let jacobian = self.jacobian(inputs, "state")?;
        Preconditioner::from_options(jacobian, options, block_size)
    }

    /// Largest stable explicit time step for the given CFL number.
    fn min_cfl_time_step(&mut self, _cfl: f64, _state: &[f64]) -> Result<f64> {
        Err(MachError::Unsupported("CFL time step is not defined for this residual".to_string()))
    }

    /// Creates the named output for this residual's discretization.
    fn create_output(&self, name: &str, _options: &serde_json::Value) -> Result<Box<dyn MachOutput>> {
        Err(MachError::UnknownOutput(name.to_string()))
    }
}

impl<R: Residual + ?Sized> Residual for Box<R> {
    fn size(&self) -> usize {
        R::size(self)
    }

    fn set_options(&mut self, options: &serde_json::Value) -> Result<()> {
        R::set_options(self, options)
    }

    fn set_inputs(&mut self, inputs: &MachInputs) -> Result<()> {
        R::set_inputs(self, inputs)
    }

    fn evaluate(&mut self, inputs: &MachInputs, res: &mut [f64]) -> Result<()> {
        R::evaluate(self, inputs, res)
    }

    fn jacobian(&mut self, inputs: &MachInputs, wrt: &str) -> Result<&JacobianOperator> {
        R::jacobian(self, inputs, wrt)
    }

    fn linearize(&mut self, inputs: &MachInputs) -> Result<()> {
        R::linearize(self, inputs)
    }

    fn calc_entropy(&mut self, inputs: &MachInputs) -> Result<f64> {
        R::calc_entropy(self, inputs)
    }

    fn calc_entropy_change(&mut self, inputs: &MachInputs) -> Result<f64> {
        R::calc_entropy_change(self, inputs)
    }

    fn jacobian_vector_product(&mut self, wrt: &str, wrt_dot: &[f64], res_dot: &mut [f64]) -> Result<()> {
        R::jacobian_vector_product(self, wrt, wrt_dot, res_dot)
    }

    fn vector_jacobian_product(&mut self, wrt: &str, res_bar: &[f64], wrt_bar: &mut [f64]) -> Result<()> {
        R::vector_jacobian_product(self, wrt, res_bar, wrt_bar)
    }

    fn scalar_vector_jacobian_product(&mut self, wrt: &str, res_bar: &[f64]) -> Result<f64> {
        R::scalar_vector_jacobian_product(self, wrt, res_bar)
    }

    fn block_size(&self) -> usize {
        R::block_size(self)
    }

    fn mass_matrix(&self) -> Cow<'_, JacobianOperator> {
        R::mass_matrix(self)
    }

    fn get_preconditioner(&mut self, inputs: &MachInputs, options: &serde_json::Value) -> Result<Preconditioner> {
        R::get_preconditioner(self, inputs, options)
    }

    fn min_cfl_time_step(&mut self, cfl: f64, state: &[f64]) -> Result<f64> {
        R::min_cfl_time_step(self, cfl, state)
    }

    fn create_output(&self, name: &str, options: &serde_json::Value) -> Result<Box<dyn MachOutput>> {
        R::create_output(self, name, options)
    }
}

/// Computes `res_dot += J * wrt_dot` for a state Jacobian.
pub(crate) fn apply_jacobian_add(jacobian: &JacobianOperator, wrt_dot: &[f64], res_dot: &mut [f64]) -> Result<()> {
    let mut product = nalgebra::DVector::zeros(res_dot.len());
    jacobian
        .apply(DVectorViewMut::from(&mut product), DVectorView::from_slice(wrt_dot, wrt_dot.len()))
        .map_err(|err| MachError::Other(err.to_string()))?;
    for (r, p) in res_dot.iter_mut().zip(product.iter()) {
        *r += p;
    }
    Ok(())
}

/// Computes `wrt_bar += J^T * res_bar` for a state Jacobian.
pub(crate) fn apply_jacobian_transpose_add(jacobian: &JacobianOperator, res_bar: &[f64], wrt_bar: &mut [f64]) {
    let mut result = nalgebra::DVector::from_column_slice(wrt_bar);
    jacobian.transpose_apply_add(&mut result, 1.0, DVectorView::from_slice(res_bar, res_bar.len()));
    wrt_bar.copy_from_slice(result.as_slice());
}

/// Presents a residual as a differentiable vector function of one of its inputs, so that
/// it can be solved with [`mach_optimize::newton::RelaxedNewton`].
///
/// Every other input is held fixed. The Jacobian system is solved with the given linear
/// solver, preconditioned as described by `prec_options`.
pub struct ResidualFunction<'r, 'i, 'a> {
    residual: &'r mut dyn Residual,
    inputs: &'i MachInputs<'a>,
    unknown: &'static str,
    linear_solver: &'r mut LinearSolver,
    prec_options: serde_json::Value,
    jacobian: Option<JacobianOperator>,
}

impl<'r, 'i, 'a> ResidualFunction<'r, 'i, 'a> {
    pub fn new(
        residual: &'r mut dyn Residual,
        inputs: &'i MachInputs<'a>,
        unknown: &'static str,
        linear_solver: &'r mut LinearSolver,
        prec_options: serde_json::Value,
    ) -> Self {
        Self {
            residual,
            inputs,
            unknown,
            linear_solver,
            prec_options,
            jacobian: None,
        }
    }
}

impl<'r, 'i, 'a> VectorFunction<f64> for ResidualFunction<'r, 'i, 'a> {
    fn dimension(&self) -> usize {
        self.residual.size()
    }

    fn eval_into(&mut self, f: &mut DVectorViewMut<f64>, x: &DVectorView<f64>) -> std::result::Result<(), Box<dyn Error>> {
        let mut inputs = self.inputs.clone();
        inputs.insert(self.unknown, x.as_slice());
        self.residual.evaluate(&inputs, f.as_mut_slice())?;
        Ok(())
    }
}

impl<'r, 'i, 'a> DifferentiableVectorFunction<f64> for ResidualFunction<'r, 'i, 'a> {
    fn solve_jacobian_system(
        &mut self,
        sol: &mut DVectorViewMut<f64>,
        x: &DVectorView<f64>,
        rhs: &DVectorView<f64>,
    ) -> std::result::Result<(), Box<dyn Error>> {
        let mut inputs = self.inputs.clone();
        inputs.insert(self.unknown, x.as_slice());
        let block_size = self.residual.block_size();
        let jacobian = self.residual.jacobian(&inputs, self.unknown)?.clone();
        let preconditioner = Preconditioner::from_options(&jacobian, &self.prec_options, block_size)?;
        sol.fill(0.0);
        self.linear_solver
            .solve(&jacobian, &preconditioner, rhs.as_slice(), sol.as_mut_slice())?;
        self.jacobian = Some(jacobian);
        Ok(())
    }

    fn apply_jacobian(&mut self, y: &mut DVectorViewMut<f64>, direction: &DVectorView<f64>) -> std::result::Result<(), Box<dyn Error>> {
        let jacobian = self
            .jacobian
            .as_ref()
            .ok_or_else(|| MachError::Other("Jacobian applied before linearization".to_string()))?;
        jacobian.apply(DVectorViewMut::from(&mut *y), DVectorView::from(direction))
    }
}

/// Relaxed Newton configured by a `nonlin-solver` option section, whose optional
/// `"linesearch"` entry selects the globalization.
pub fn newton_from_options(nonlin_solver: &serde_json::Value) -> Result<RelaxedNewton<f64>> {
    let options: NonlinSolverOptions = serde_json::from_value(nonlin_solver.clone())?;
    if options.solver_type != "newton" {
        return Err(MachError::UnknownOption {
            key: "nonlin-solver.type".to_string(),
            value: options.solver_type,
        });
    }
    let settings = NewtonSettings {
        max_iter: options.maxiter,
        rel_tol: options.reltol,
        abs_tol: options.abstol,
        print_level: options.printlevel,
    };
    Ok(RelaxedNewton::from_options(settings, nonlin_solver.get("linesearch"))?)
}

/// Solves `R(inputs, unknown = x) = 0` for `x`, starting from the content of `x`.
///
/// Reaching the iteration limit is reported through [`NewtonResult::converged`].
pub fn solve_residual(
    residual: &mut dyn Residual,
    inputs: &MachInputs,
    unknown: &'static str,
    x: &mut [f64],
    newton: &mut RelaxedNewton<f64>,
    linear_solver: &mut LinearSolver,
    prec_options: serde_json::Value,
) -> Result<NewtonResult<f64>> {
    check_size(residual.size(), x.len())?;
    let function = ResidualFunction::new(residual, inputs, unknown, linear_solver, prec_options);
    let n = x.len();
    Ok(newton.solve(function, None, DVectorViewMut::from_slice(x, n))?)
}
