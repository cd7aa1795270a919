use super::{periodic_flow_options, vortex_like_state};
use mach::flow::FlowResidual;
use mach::load::VolumeSourceLoad;
use mach::mesh::CartesianMesh;
use mach::options::merge_patch;
use mach::solver::{PdeSolver, SolverHook};
use mach::thermal::ThermalResidual;
use mach::{MachError, MachInputs, Residual};
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use nalgebra::DVector;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// `-u'' = 2` on the unit interval with `u(0) = u(1) = 0`.
fn heat_residual() -> ThermalResidual {
    let options = json!({
        "thermal": { "degree": 2 },
        "ess-bdr": [1, 2]
    });
    let mut residual = ThermalResidual::new(&options, CartesianMesh::unit_box(&[6])).unwrap();
    let load = VolumeSourceLoad::new(residual.space(), |_, g| g[0] = 2.0);
    residual.set_load(Box::new(load));
    residual
}

fn steady_options() -> Value {
    json!({
        "time-dis": { "steady": true },
        "lin-solver": { "type": "direct" },
        "nonlin-solver": { "abstol": 1e-12, "reltol": 1e-12 }
    })
}

fn exact_heat_solution(residual: &ThermalResidual) -> DVector<f64> {
    let mut u = vec![0.0; residual.size()];
    residual.space().project(&mut u, |x, u| u[0] = x[0] * (1.0 - x[0]));
    DVector::from(u)
}

fn steady_heat_solver() -> (PdeSolver, DVector<f64>) {
    let residual = heat_residual();
    let exact = exact_heat_solution(&residual);
    let solver = PdeSolver::new(Box::new(residual), &steady_options()).unwrap();
    (solver, exact)
}

#[derive(Debug, Default)]
struct HookCalls {
    initial: usize,
    iterations: Vec<usize>,
    terminal: Option<(usize, f64)>,
}

struct RecordingHook(Rc<RefCell<HookCalls>>);

impl SolverHook for RecordingHook {
    fn initial_hook(&mut self, _iter: usize, _time: f64, _dt: f64, _state: &[f64]) -> mach::Result<()> {
        self.0.borrow_mut().initial += 1;
        Ok(())
    }

    fn iteration_hook(&mut self, iter: usize, _time: f64, _dt: f64, _state: &[f64]) -> mach::Result<()> {
        self.0.borrow_mut().iterations.push(iter);
        Ok(())
    }

    fn terminal_hook(&mut self, iter: usize, time: f64, _state: &[f64]) -> mach::Result<()> {
        self.0.borrow_mut().terminal = Some((iter, time));
        Ok(())
    }
}

#[test]
fn steady_solve_reproduces_the_quadratic_temperature() {
    let (mut solver, exact) = steady_heat_solver();
    let calls = Rc::new(RefCell::new(HookCalls::default()));
    solver.add_hook(Box::new(RecordingHook(calls.clone())));

    let mut state = vec![0.0; solver.size()];
    let result = solver.solve_for_state(&MachInputs::new(), &mut state).unwrap();
    assert!(result.converged);
    assert_matrix_eq!(DVector::from(state.clone()), exact, comp = abs, tol = 1e-10);
    assert!(solver.calc_residual_norm(&state).unwrap() < 1e-10);

    let calls = calls.borrow();
    assert_eq!(calls.initial, 1);
    assert!(calls.iterations.is_empty());
    assert_eq!(calls.terminal.map(|(iter, _)| iter), Some(result.iterations));
}

#[test]
fn pseudo_transient_continuation_reaches_the_steady_state() {
    let residual = heat_residual();
    let exact = exact_heat_solution(&residual);
    let mut options = steady_options();
    merge_patch(
        &mut options,
        &json!({
            "time-dis": {
                "type": "PTC",
                "dt": 0.1,
                "max-iter": 200,
                "steady-abstol": 1e-11,
                "steady-reltol": 1e-11
            }
        }),
    );
    let mut solver = PdeSolver::new(Box::new(residual), &options).unwrap();
    let mut state = vec![0.0; solver.size()];
    let result = solver.solve_for_state(&MachInputs::new(), &mut state).unwrap();
    assert!(result.converged);
    assert!(result.iterations > 1);
    assert_matrix_eq!(DVector::from(state), exact, comp = abs, tol = 1e-8);
}

#[test]
fn adjoint_sensitivity_matches_finite_differences() {
    let (mut solver, _) = steady_heat_solver();
    solver.create_output("average-temperature", &Value::Null).unwrap();
    let n = solver.size();

    let average_for = |k0: f64, solver: &mut PdeSolver| {
        let mut state = vec![0.0; n];
        let inputs = MachInputs::new().with("conductivity", k0);
        solver.solve_for_state(&inputs, &mut state).unwrap();
        let average = solver
            .calc_output("average-temperature", &MachInputs::new().with("state", &state))
            .unwrap();
        (average, state)
    };
    let h = 1e-6;
    let fd = (average_for(1.0 + h, &mut solver).0 - average_for(1.0 - h, &mut solver).0) / (2.0 * h);
    let (average, state) = average_for(1.0, &mut solver);
    // u scales with 1 / k0, and the average of x (1 - x) is 1/6
    assert_scalar_eq!(average, 1.0 / 6.0, comp = abs, tol = 1e-12);
    assert_scalar_eq!(fd, -1.0 / 6.0, comp = abs, tol = 1e-7);

    let inputs = MachInputs::new().with("state", &state).with("conductivity", 1.0);
    solver.linearize(&inputs).unwrap();
    let mut dj_du = vec![0.0; n];
    solver
        .calc_output_partial("average-temperature", "state", &inputs, &mut dj_du)
        .unwrap();

    // Reverse mode through the solver
    let total = solver.scalar_vector_jacobian_product("conductivity", &dj_du).unwrap();
    assert_scalar_eq!(total, fd, comp = abs, tol = 1e-7);

    // Forward mode through the solver
    let mut state_dot = vec![0.0; n];
    solver
        .jacobian_vector_product("conductivity", &[1.0], &mut state_dot)
        .unwrap();
    let forward: f64 = dj_du.iter().zip(&state_dot).map(|(a, b)| a * b).sum();
    assert_scalar_eq!(forward, fd, comp = abs, tol = 1e-7);

    // The adjoint of the output gives the same derivative: dJ/dk = -psi^T dR/dk
    let mut adjoint = vec![0.0; n];
    solver
        .solve_for_adjoint("average-temperature", &state, &mut adjoint)
        .unwrap();
    solver.residual_mut().linearize(&inputs).unwrap();
    let psi_dr = solver
        .residual_mut()
        .scalar_vector_jacobian_product("conductivity", &adjoint)
        .unwrap();
    assert_scalar_eq!(-psi_dr, fd, comp = abs, tol = 1e-7);
}

#[test]
fn sensitivities_require_a_linearization() {
    let (mut solver, _) = steady_heat_solver();
    let n = solver.size();
    assert!(matches!(
        solver.scalar_vector_jacobian_product("conductivity", &vec![1.0; n]),
        Err(MachError::Other(_))
    ));
    assert!(matches!(
        solver.calc_output("average-temperature", &MachInputs::new()),
        Err(MachError::UnknownOutput(_))
    ));
    assert!(matches!(
        solver.create_output("heat-flux", &Value::Null),
        Err(MachError::UnknownOutput(_))
    ));
}

fn unsteady_flow_options() -> Value {
    let mut options = periodic_flow_options(1);
    merge_patch(
        &mut options,
        &json!({
            "physics": "flow",
            "mesh": { "num-cells": [4], "periodic": [0] },
            "time-dis": { "type": "RK4", "dt": 0.03, "t-final": 0.1, "entropy-log": true }
        }),
    );
    options
}

#[test]
fn unsteady_solve_lands_on_the_final_time() {
    let mut solver = PdeSolver::from_options(&unsteady_flow_options()).unwrap();
    let calls = Rc::new(RefCell::new(HookCalls::default()));
    solver.add_hook(Box::new(RecordingHook(calls.clone())));

    let options = unsteady_flow_options();
    let flow = FlowResidual::new(&options, CartesianMesh::from_options(&options["mesh"]).unwrap()).unwrap();
    let mut state = vec![0.0; solver.size()];
    flow.space().project(&mut state, vortex_like_state);

    let result = solver.solve_for_state(&MachInputs::new(), &mut state).unwrap();
    assert!(result.converged);
    // Three full steps and a final step of 0.01
    assert_eq!(result.iterations, 4);
    assert_scalar_eq!(result.time, 0.1, comp = abs, tol = 1e-14);

    let calls = calls.borrow();
    assert_eq!(calls.initial, 1);
    assert_eq!(calls.iterations, vec![1, 2, 3, 4]);
    assert_eq!(calls.terminal.map(|(iter, _)| iter), Some(4));

    let history = solver.entropy_history();
    assert_eq!(history.len(), 5);
    assert_eq!(history[0].0, 0.0);
    let drift = (history[4].1 - history[0].1).abs();
    assert!(drift < 1e-5, "entropy drift {}", drift);

    let mut adjoint = vec![0.0; solver.size()];
    solver.create_output("entropy", &Value::Null).unwrap();
    assert!(matches!(
        solver.solve_for_adjoint("entropy", &state, &mut adjoint),
        Err(MachError::Unsupported(_))
    ));
}

#[test]
fn solver_setup_errors() {
    let mut options = unsteady_flow_options();
    merge_patch(&mut options, &json!({ "mesh": null }));
    assert!(matches!(
        PdeSolver::from_options(&options),
        Err(MachError::MissingInput(key)) if key == "mesh"
    ));

    let mut options = unsteady_flow_options();
    merge_patch(&mut options, &json!({ "physics": "magnetics" }));
    assert!(matches!(
        PdeSolver::from_options(&options),
        Err(MachError::UnknownOption { key, .. }) if key == "physics"
    ));
}

#[test]
fn solver_from_json_file() {
    let mut options = unsteady_flow_options();
    merge_patch(&mut options, &json!({ "time-dis": { "type": "MIDPOINT" } }));
    let path = std::env::temp_dir().join(format!("mach-solver-options-{}.json", std::process::id()));
    std::fs::write(&path, serde_json::to_string_pretty(&options).unwrap()).unwrap();
    let solver = PdeSolver::from_json_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(solver.ode().stepper(), mach::ode::TimeStepper::ImplicitMidpoint);
    // Defaults fill in what the file leaves out
    assert_eq!(solver.options()["lin-solver"]["type"], "gmres");
    assert_eq!(solver.options()["time-dis"]["dt"], 0.03);

    assert!(PdeSolver::from_json_file(std::env::temp_dir().join("mach-no-such-file.json")).is_err());
}
