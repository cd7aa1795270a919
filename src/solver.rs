//! The solver that owns a residual, its time integration and its outputs.
use crate::error::{MachError, Result};
use crate::flow::FlowResidual;
use crate::inputs::{check_size, MachInputs};
use crate::linear::LinearSolver;
use crate::mesh::CartesianMesh;
use crate::ode::{time_dis_options, FirstOrderOde, TimeStepper};
use crate::options::{with_defaults, TimeDisOptions};
use crate::output::MachOutput;
use crate::residual::Residual;
use crate::thermal::ThermalResidual;
use eyre::{eyre, WrapErr};
use log::{debug, info, warn};
use rustc_hash::FxHashMap;
use std::path::Path;

/// Callbacks invoked by [`PdeSolver::solve_for_state`] around each time step.
///
/// All methods default to doing nothing.
pub trait SolverHook {
    fn initial_hook(&mut self, _iter: usize, _time: f64, _dt: f64, _state: &[f64]) -> Result<()> {
        Ok(())
    }

    fn iteration_hook(&mut self, _iter: usize, _time: f64, _dt: f64, _state: &[f64]) -> Result<()> {
        Ok(())
    }

    fn terminal_hook(&mut self, _iter: usize, _time: f64, _state: &[f64]) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateSolveResult {
    /// For unsteady problems, whether the final time was reached; otherwise whether the
    /// residual norm met the steady tolerances.
    pub converged: bool,
    pub iterations: usize,
    pub time: f64,
}

pub struct PdeSolver {
    options: serde_json::Value,
    time_dis: TimeDisOptions,
    ode: FirstOrderOde,
    linear_solver: LinearSolver,
    adjoint_solver: LinearSolver,
    prec_options: serde_json::Value,
    outputs: FxHashMap<String, Box<dyn MachOutput>>,
    hooks: Vec<Box<dyn SolverHook>>,
    entropy_history: Vec<(f64, f64)>,
    linear_state: Option<Vec<f64>>,
}

impl PdeSolver {
    /// Creates a solver for `residual`, with `options` merged over the default options.
    pub fn new(residual: Box<dyn Residual>, options: &serde_json::Value) -> Result<Self> {
        let options = with_defaults(options);
        let time_dis = time_dis_options(&options["time-dis"])?;
        let ode = FirstOrderOde::new(residual, &options)?;
        let linear_solver = LinearSolver::from_options(&options["lin-solver"])?;
        let adjoint_solver = LinearSolver::from_options(&options["adj-solver"])?;
        let prec_options = options["lin-prec"].clone();
        Ok(Self {
            options,
            time_dis,
            ode,
            linear_solver,
            adjoint_solver,
            prec_options,
            outputs: FxHashMap::default(),
            hooks: Vec::new(),
            entropy_history: Vec::new(),
            linear_state: None,
        })
    }

    /// Loads an option file and builds the residual named by its `"physics"` entry
    /// (`"flow"` or `"thermal"`) on the mesh described by its `"mesh"` section.
    pub fn from_json_file(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).wrap_err_with(|| format!("failed to read {}", path.display()))?;
        let options: serde_json::Value =
            serde_json::from_str(&text).wrap_err_with(|| format!("failed to parse {}", path.display()))?;
        Self::from_options(&options).map_err(|err| eyre!("failed to set up solver from {}: {}", path.display(), err))
    }

    pub fn from_options(options: &serde_json::Value) -> Result<Self> {
        let mesh_options = options
            .get("mesh")
            .ok_or_else(|| MachError::MissingInput("mesh".to_string()))?;
        let mesh = CartesianMesh::from_options(mesh_options)?;
        let physics = options.get("physics").and_then(|p| p.as_str()).unwrap_or("flow");
        let residual: Box<dyn Residual> = match physics {
            "flow" => Box::new(FlowResidual::new(options, mesh)?),
            "thermal" => Box::new(ThermalResidual::new(options, mesh)?),
            other => {
                return Err(MachError::UnknownOption {
                    key: "physics".to_string(),
                    value: other.to_string(),
                })
            }
        };
        Self::new(residual, options)
    }

    /// The merged option document.
    pub fn options(&self) -> &serde_json::Value {
        &self.options
    }

    pub fn size(&self) -> usize {
        self.ode.residual().size()
    }

    pub fn residual(&self) -> &dyn Residual {
        self.ode.residual().spatial()
    }

    pub fn residual_mut(&mut self) -> &mut dyn Residual {
        self.ode.residual_mut().spatial_mut()
    }

    pub fn ode(&self) -> &FirstOrderOde {
        &self.ode
    }

    pub fn add_hook(&mut self, hook: Box<dyn SolverHook>) {
        self.hooks.push(hook);
    }

    /// `(time, entropy)` pairs recorded by the last unsteady solve when `entropy-log` is set.
    pub fn entropy_history(&self) -> &[(f64, f64)] {
        &self.entropy_history
    }

    fn is_steady(&self) -> bool {
        self.ode.stepper() == TimeStepper::Steady
    }

    /// Solves for the state, starting from the content of `state`.
    ///
    /// Inputs other than the state (design parameters, sources) are passed to the residual
    /// before solving.
    pub fn solve_for_state(&mut self, inputs: &MachInputs, state: &mut [f64]) -> Result<StateSolveResult> {
        check_size(self.size(), state.len())?;
        self.residual_mut().set_inputs(inputs)?;
        self.linear_state = None;
        if self.is_steady() {
            self.solve_steady(state)
        } else {
            self.solve_unsteady(state)
        }
    }

    fn solve_steady(&mut self, state: &mut [f64]) -> Result<StateSolveResult> {
        let time = self.time_dis.t_initial;
        for hook in &mut self.hooks {
            hook.initial_hook(0, time, 0.0, state)?;
        }
        let result = self.ode.solve_steady(state, time)?;
        if !result.converged {
            warn!("Steady solve did not converge in {} iterations", result.iterations);
        }
        for hook in &mut self.hooks {
            hook.terminal_hook(result.iterations, time, state)?;
        }
        Ok(StateSolveResult {
            converged: result.converged,
            iterations: result.iterations,
            time,
        })
    }

    fn solve_unsteady(&mut self, state: &mut [f64]) -> Result<StateSolveResult> {
        let opts = self.time_dis.clone();
        let pseudo_transient = self.ode.stepper() == TimeStepper::PseudoTransient;
        let mut time = opts.t_initial;
        let mut dt = opts.dt;
        let res_norm0 = if pseudo_transient { self.calc_residual_norm(state)? } else { 0.0 };
        let steady_goal = opts.steady_abstol.max(opts.steady_reltol * res_norm0);

        self.entropy_history.clear();
        self.log_entropy(time, state)?;
        for hook in &mut self.hooks {
            hook.initial_hook(0, time, dt, state)?;
        }

        let mut iter = 0;
        let converged = loop {
            if pseudo_transient {
                let res_norm = self.calc_residual_norm(state)?;
                if res_norm <= steady_goal {
                    info!("Steady state reached: ||R|| = {}", res_norm);
                    break true;
                }
                if res_norm > 0.0 {
                    // Ramp the pseudo time step as the residual drops; never shrink it.
                    dt = dt.max(opts.dt * (res_norm0 / res_norm).powf(opts.res_exp));
                }
            } else {
                if time >= opts.t_final - 1e-14 * opts.t_final.abs().max(1.0) {
                    break true;
                }
                if opts.const_cfl {
                    dt = self.ode.residual_mut().min_cfl_time_step(opts.cfl, state)?;
                }
                if opts.exact_t_final && time + dt > opts.t_final {
                    dt = opts.t_final - time;
                }
            }
            if iter >= opts.max_iter {
                break false;
            }

            info!("iter {}: time = {}: dt = {}", iter, time, dt);
            let taken = self.ode.step(state, time, dt)?;
            time += taken;
            iter += 1;

            self.log_entropy(time, state)?;
            for hook in &mut self.hooks {
                hook.iteration_hook(iter, time, dt, state)?;
            }
        };

        if !converged {
            warn!("Time marching stopped after {} iterations at time {}", iter, time);
        }
        for hook in &mut self.hooks {
            hook.terminal_hook(iter, time, state)?;
        }
        Ok(StateSolveResult {
            converged,
            iterations: iter,
            time,
        })
    }

    fn log_entropy(&mut self, time: f64, state: &[f64]) -> Result<()> {
        if self.time_dis.entropy_log {
            let entropy = self
                .residual_mut()
                .calc_entropy(&MachInputs::new().with("state", state))?;
            debug!("time = {}: entropy = {}", time, entropy);
            self.entropy_history.push((time, entropy));
        }
        Ok(())
    }

    /// Solves `(dR/du)^T adjoint = dJ/du` for the named output at `state`.
    ///
    /// Total derivatives then follow as `dJ/dx = pJ/px - adjoint^T pR/px`.
    pub fn solve_for_adjoint(&mut self, output: &str, state: &[f64], adjoint: &mut [f64]) -> Result<()> {
        if !self.is_steady() {
            return Err(MachError::Unsupported("adjoint of an unsteady problem".to_string()));
        }
        check_size(self.size(), state.len())?;
        check_size(self.size(), adjoint.len())?;
        let inputs = MachInputs::new().with("state", state);
        let mut rhs = vec![0.0; state.len()];
        self.output_mut(output)?
            .calc_output_partial("state", &inputs, &mut rhs)?;

        let prec_options = self.prec_options.clone();
        let residual = self.ode.residual_mut().spatial_mut();
        let preconditioner = residual.get_preconditioner(&inputs, &prec_options)?;
        let jacobian = residual.jacobian(&inputs, "state")?;
        adjoint.fill(0.0);
        let iterations = self
            .adjoint_solver
            .solve_transpose(jacobian, &preconditioner, &rhs, adjoint)?;
        debug!("Adjoint solve for \"{}\" took {} iterations", output, iterations);
        Ok(())
    }

    /// Evaluates the spatial residual `R(state)`.
    pub fn calc_residual(&mut self, state: &[f64], residual: &mut [f64]) -> Result<()> {
        let inputs = MachInputs::new().with("state", state);
        self.residual_mut().evaluate(&inputs, residual)
    }

    pub fn calc_residual_norm(&mut self, state: &[f64]) -> Result<f64> {
        let mut residual = vec![0.0; state.len()];
        self.calc_residual(state, &mut residual)?;
        Ok(residual.iter().map(|r| r * r).sum::<f64>().sqrt())
    }

    /// Creates the output `name` from the residual's discretization and registers it
    /// for the by-name queries below.
    pub fn create_output(&mut self, name: &str, options: &serde_json::Value) -> Result<()> {
        let output = self.residual().create_output(name, options)?;
        self.outputs.insert(name.to_string(), output);
        Ok(())
    }

    fn output_mut(&mut self, name: &str) -> Result<&mut Box<dyn MachOutput>> {
        self.outputs
            .get_mut(name)
            .ok_or_else(|| MachError::UnknownOutput(name.to_string()))
    }

    pub fn calc_output(&mut self, name: &str, inputs: &MachInputs) -> Result<f64> {
        self.output_mut(name)?.calc_output(inputs)
    }

    pub fn calc_output_partial(&mut self, name: &str, wrt: &str, inputs: &MachInputs, partial: &mut [f64]) -> Result<()> {
        self.output_mut(name)?
            .calc_output_partial(wrt, inputs, partial)
    }

    pub fn output_jacobian_vector_product(&mut self, name: &str, wrt: &str, wrt_dot: &[f64]) -> Result<f64> {
        self.output_mut(name)?.jacobian_vector_product(wrt, wrt_dot)
    }

    pub fn output_vector_jacobian_product(
        &mut self,
        name: &str,
        wrt: &str,
        out_bar: f64,
        wrt_bar: &mut [f64],
    ) -> Result<()> {
        self.output_mut(name)?
            .vector_jacobian_product(wrt, out_bar, wrt_bar)
    }

    /// Sets the linearization point of the residual and every registered output.
    ///
    /// `inputs` must contain the converged `"state"`.
    pub fn linearize(&mut self, inputs: &MachInputs) -> Result<()> {
        let state = inputs.require_field("state")?;
        check_size(self.size(), state.len())?;
        self.residual_mut().linearize(inputs)?;
        for output in self.outputs.values_mut() {
            output.set_inputs(inputs)?;
        }
        self.linear_state = Some(state.to_vec());
        Ok(())
    }

    fn linear_state(&self) -> Result<Vec<f64>> {
        if !self.is_steady() {
            return Err(MachError::Unsupported("state sensitivities of an unsteady problem".to_string()));
        }
        self.linear_state
            .clone()
            .ok_or_else(|| MachError::Other("solver sensitivities requested before linearize".to_string()))
    }

    /// `state_dot += du/d(wrt) * wrt_dot` for the converged state, from
    /// `dR/du du/d(wrt) = -dR/d(wrt)`.
    pub fn jacobian_vector_product(&mut self, wrt: &str, wrt_dot: &[f64], state_dot: &mut [f64]) -> Result<()> {
        let state = self.linear_state()?;
        check_size(self.size(), state_dot.len())?;
        let mut res_dot = vec![0.0; state.len()];
        self.residual_mut()
            .jacobian_vector_product(wrt, wrt_dot, &mut res_dot)?;

        let inputs = MachInputs::new().with("state", &state);
        let prec_options = self.prec_options.clone();
        let residual = self.ode.residual_mut().spatial_mut();
        let preconditioner = residual.get_preconditioner(&inputs, &prec_options)?;
        let jacobian = residual.jacobian(&inputs, "state")?;
        let mut solution = vec![0.0; state.len()];
        self.linear_solver
            .solve(jacobian, &preconditioner, &res_dot, &mut solution)?;
        for (s, x) in state_dot.iter_mut().zip(&solution) {
            *s -= x;
        }
        Ok(())
    }

    /// `wrt_bar += state_bar^T du/d(wrt)` for the converged state, through the adjoint
    /// `(dR/du)^T psi = state_bar`.
    pub fn vector_jacobian_product(&mut self, wrt: &str, state_bar: &[f64], wrt_bar: &mut [f64]) -> Result<()> {
        let minus_psi = self.negative_adjoint(state_bar)?;
        self.residual_mut()
            .vector_jacobian_product(wrt, &minus_psi, wrt_bar)
    }

    /// `state_bar^T du/d(wrt)` for a scalar input `wrt`.
    pub fn scalar_vector_jacobian_product(&mut self, wrt: &str, state_bar: &[f64]) -> Result<f64> {
        let minus_psi = self.negative_adjoint(state_bar)?;
        self.residual_mut()
            .scalar_vector_jacobian_product(wrt, &minus_psi)
    }

    /// `-psi` with `(dR/du)^T psi = state_bar` at the linearization point.
    fn negative_adjoint(&mut self, state_bar: &[f64]) -> Result<Vec<f64>> {
        let state = self.linear_state()?;
        check_size(self.size(), state_bar.len())?;

        let inputs = MachInputs::new().with("state", &state);
        let prec_options = self.prec_options.clone();
        let residual = self.ode.residual_mut().spatial_mut();
        let preconditioner = residual.get_preconditioner(&inputs, &prec_options)?;
        let jacobian = residual.jacobian(&inputs, "state")?;
        let mut psi = vec![0.0; state.len()];
        self.adjoint_solver
            .solve_transpose(jacobian, &preconditioner, state_bar, &mut psi)?;
        Ok(psi.into_iter().map(|p| -p).collect())
    }
}
