use super::{periodic_flow_options, periodic_mesh, vortex_like_state};
use mach::flow::FlowResidual;
use mach::ode::{time_dis_options, FirstOrderOde, TimeStepper};
use mach::operator::JacobianOperator;
use mach::options::merge_patch;
use mach::{MachError, MachInputs, Residual};
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use nalgebra::{DMatrix, DVector};
use serde_json::{json, Value};

/// `R(u) = A u - b`, with entropy `|u|^2 / 2`.
struct LinearResidual {
    a: DMatrix<f64>,
    b: DVector<f64>,
    state: DVector<f64>,
    jacobian: Option<JacobianOperator>,
}

impl LinearResidual {
    /// `du/dt = -A u` rotates `u` counterclockwise with unit angular velocity.
    fn rotation() -> Self {
        Self {
            a: DMatrix::from_row_slice(2, 2, &[0.0, 1.0, -1.0, 0.0]),
            b: DVector::zeros(2),
            state: DVector::zeros(2),
            jacobian: None,
        }
    }
}

impl Residual for LinearResidual {
    fn size(&self) -> usize {
        self.b.len()
    }

    fn set_inputs(&mut self, inputs: &MachInputs) -> mach::Result<()> {
        if let Some(state) = inputs.field("state")? {
            self.state.copy_from_slice(state);
        }
        Ok(())
    }

    fn evaluate(&mut self, inputs: &MachInputs, res: &mut [f64]) -> mach::Result<()> {
        self.set_inputs(inputs)?;
        let r = &self.a * &self.state - &self.b;
        res.copy_from_slice(r.as_slice());
        Ok(())
    }

    fn jacobian(&mut self, inputs: &MachInputs, _wrt: &str) -> mach::Result<&JacobianOperator> {
        self.set_inputs(inputs)?;
        Ok(&*self.jacobian.insert(JacobianOperator::Dense(self.a.clone())))
    }

    fn calc_entropy(&mut self, inputs: &MachInputs) -> mach::Result<f64> {
        self.set_inputs(inputs)?;
        Ok(0.5 * self.state.norm_squared())
    }

    fn calc_entropy_change(&mut self, inputs: &MachInputs) -> mach::Result<f64> {
        self.set_inputs(inputs)?;
        let state_dot = DVector::from_column_slice(inputs.require_field("state_dot")?);
        let dt = inputs.scalar("dt")?.unwrap_or(0.0);
        let work = &self.state + dt * state_dot;
        Ok(-work.dot(&(&self.a * &work - &self.b)))
    }
}

fn ode_options(time_dis: Value) -> Value {
    let mut options = json!({
        "lin-solver": { "type": "direct" },
        "lin-prec": { "type": "none" },
        "nonlin-solver": { "abstol": 1e-13, "reltol": 1e-13, "printlevel": -1 }
    });
    merge_patch(&mut options, &json!({ "time-dis": time_dis }));
    options
}

fn march(ode: &mut FirstOrderOde, state: &mut [f64], dt: f64, steps: usize) -> f64 {
    let mut time = 0.0;
    for _ in 0..steps {
        time += ode.step(state, time, dt).unwrap();
    }
    time
}

#[test]
fn stepper_names() {
    assert_eq!(TimeStepper::from_name("RK1").unwrap(), TimeStepper::ForwardEuler);
    assert_eq!(TimeStepper::from_name("RK4").unwrap(), TimeStepper::Rk4);
    assert_eq!(TimeStepper::from_name("MIDPOINT").unwrap(), TimeStepper::ImplicitMidpoint);
    assert_eq!(TimeStepper::from_name("RRK").unwrap(), TimeStepper::RelaxationMidpoint);
    assert_eq!(TimeStepper::from_name("RRKMIDPOINT").unwrap(), TimeStepper::RelaxationMidpoint);
    assert_eq!(TimeStepper::from_name("PTC").unwrap(), TimeStepper::PseudoTransient);
    assert!(matches!(
        TimeStepper::from_name("RK45"),
        Err(MachError::UnknownOption { key, value }) if key == "time-dis.type" && value == "RK45"
    ));
    assert!(!TimeStepper::Rk4.is_implicit());
    assert!(!TimeStepper::ForwardEuler.is_implicit());
    assert!(TimeStepper::PseudoTransient.is_implicit());
}

#[test]
fn retired_ode_solver_key_is_rejected() {
    let result = time_dis_options(&json!({ "ode-solver": "RK4" }));
    match result {
        Err(MachError::Other(message)) => assert_eq!(
            message,
            "The option key \"ode-solver\" is deprecated. Please use the key \"type\" instead."
        ),
        other => panic!("unexpected result {:?}", other.map(|_| ())),
    }
    let options = time_dis_options(&json!({ "type": "MIDPOINT", "dt": 0.5 })).unwrap();
    assert_eq!(options.ode_type, "MIDPOINT");
    assert_eq!(options.dt, 0.5);
    assert!(FirstOrderOde::new(Box::new(LinearResidual::rotation()), &ode_options(json!({ "ode-solver": "RK4" }))).is_err());
}

#[test]
fn steady_flag_selects_the_steady_solver_unless_pseudo_transient() {
    let ode = FirstOrderOde::new(Box::new(LinearResidual::rotation()), &ode_options(json!({ "steady": true }))).unwrap();
    assert_eq!(ode.stepper(), TimeStepper::Steady);
    let ode = FirstOrderOde::new(
        Box::new(LinearResidual::rotation()),
        &ode_options(json!({ "steady": true, "type": "PTC" })),
    )
    .unwrap();
    assert_eq!(ode.stepper(), TimeStepper::PseudoTransient);
    // No time-dis section: the default stepper
    let ode = FirstOrderOde::new(Box::new(LinearResidual::rotation()), &json!({})).unwrap();
    assert_eq!(ode.stepper(), TimeStepper::Rk4);
}

#[test]
fn forward_euler_step() {
    let mut ode = FirstOrderOde::new(Box::new(LinearResidual::rotation()), &ode_options(json!({ "type": "RK1" }))).unwrap();
    let mut state = vec![1.0, 2.0];
    let taken = ode.step(&mut state, 0.0, 0.1).unwrap();
    assert_eq!(taken, 0.1);
    // u - dt A u with A u = (2, -1)
    assert_matrix_eq!(DVector::from(state), DVector::from(vec![0.8, 2.1]), comp = abs, tol = 1e-15);
}

#[test]
fn rk4_follows_the_rotation() {
    let mut ode = FirstOrderOde::new(Box::new(LinearResidual::rotation()), &ode_options(json!({ "type": "RK4" }))).unwrap();
    let mut state = vec![1.0, 0.0];
    let time = march(&mut ode, &mut state, 0.05, 20);
    assert_scalar_eq!(time, 1.0, comp = abs, tol = 1e-14);
    let exact = DVector::from(vec![1f64.cos(), 1f64.sin()]);
    assert_matrix_eq!(DVector::from(state), exact, comp = abs, tol = 1e-6);
}

#[test]
fn implicit_midpoint_preserves_the_norm() {
    let mut ode =
        FirstOrderOde::new(Box::new(LinearResidual::rotation()), &ode_options(json!({ "type": "MIDPOINT" }))).unwrap();
    assert!(ode.stepper().is_implicit());
    let mut state = vec![0.6, 0.8];
    march(&mut ode, &mut state, 0.1, 10);
    assert_scalar_eq!(DVector::from(state.clone()).norm(), 1.0, comp = abs, tol = 1e-12);

    // Second order: the phase error after t = 1 is O(dt^2)
    let angle = 0.8f64.atan2(0.6) + 1.0;
    let exact = DVector::from(vec![angle.cos(), angle.sin()]);
    assert_matrix_eq!(DVector::from(state), exact, comp = abs, tol = 1e-2);
}

#[test]
fn explicit_stage_solves_use_the_mass_directly() {
    let mut ode = FirstOrderOde::new(Box::new(LinearResidual::rotation()), &json!({})).unwrap();
    let mut k = vec![0.0; 2];
    ode.solve(0.0, &[1.0, 2.0], 0.0, &mut k).unwrap();
    // M k = -R(u) with M = I
    assert_eq!(k, vec![-2.0, 1.0]);
}

#[test]
fn steady_solve_finds_the_root() {
    let mut residual = LinearResidual::rotation();
    residual.b = DVector::from(vec![1.0, 3.0]);
    let mut ode = FirstOrderOde::new(Box::new(residual), &ode_options(json!({ "steady": true }))).unwrap();
    let mut state = vec![0.0; 2];
    let result = ode.solve_steady(&mut state, 0.0).unwrap();
    assert!(result.converged);
    // A u = b with A = [[0, 1], [-1, 0]]
    assert_matrix_eq!(DVector::from(state.clone()), DVector::from(vec![-3.0, 1.0]), comp = abs, tol = 1e-12);

    // A steady "step" is the same solve
    let mut state = vec![5.0, 5.0];
    ode.step(&mut state, 0.0, 1.0).unwrap();
    assert_matrix_eq!(DVector::from(state), DVector::from(vec![-3.0, 1.0]), comp = abs, tol = 1e-12);
}

#[test]
fn time_dependent_jacobian_is_with_respect_to_the_stage() {
    let mut ode = FirstOrderOde::new(Box::new(LinearResidual::rotation()), &json!({})).unwrap();
    let state = vec![1.0, 0.0];
    let state_dot = vec![0.0, 0.0];
    let inputs = MachInputs::new()
        .with("state", &state)
        .with("state_dot", &state_dot)
        .with("dt", 0.5);
    let residual = ode.residual_mut();
    let jacobian = residual.jacobian(&inputs, "state_dot").unwrap().to_dense();
    let expected = DMatrix::from_row_slice(2, 2, &[1.0, 0.5, -0.5, 1.0]);
    assert_matrix_eq!(jacobian, expected, comp = abs, tol = 1e-15);
    let by_state = residual.jacobian(&inputs, "state").unwrap().to_dense();
    assert_matrix_eq!(by_state, expected, comp = abs, tol = 1e-15);
    assert!(matches!(
        residual.jacobian(&inputs, "dt"),
        Err(MachError::Unsupported(_))
    ));

    // dt = 0: the mass alone
    let inputs = MachInputs::new().with("state", &state).with("state_dot", &state_dot);
    assert_eq!(residual.jacobian(&inputs, "state_dot").unwrap().to_dense(), DMatrix::identity(2, 2));
}

#[test]
fn relaxation_midpoint_conserves_flow_entropy() {
    let mut options = periodic_flow_options(1);
    merge_patch(&mut options, &ode_options(json!({ "type": "RRK" })));
    let residual = FlowResidual::new(&options, periodic_mesh(&[4])).unwrap();
    let mut state = vec![0.0; residual.size()];
    residual.space().project(&mut state, vortex_like_state);

    let mut ode = FirstOrderOde::new(Box::new(residual), &options).unwrap();
    assert_eq!(ode.stepper(), TimeStepper::RelaxationMidpoint);
    let entropy = |ode: &mut FirstOrderOde, state: &[f64]| {
        ode.residual_mut()
            .calc_entropy(&MachInputs::new().with("state", state))
            .unwrap()
    };
    let entropy0 = entropy(&mut ode, &state);

    let dt = 0.02;
    let mut time = 0.0;
    for _ in 0..3 {
        let taken = ode.step(&mut state, time, dt).unwrap();
        assert!((taken / dt - 1.0).abs() < 0.1, "relaxed step {} for dt = {}", taken, dt);
        time += taken;
    }
    assert_scalar_eq!(entropy(&mut ode, &state), entropy0, comp = abs, tol = 1e-12);
}
