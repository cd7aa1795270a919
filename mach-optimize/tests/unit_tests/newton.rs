use mach_optimize::calculus::{DifferentiableVectorFunction, VectorFunction};
use mach_optimize::line_search::{BacktrackingLineSearch, NoLineSearch};
use mach_optimize::newton::*;
use nalgebra::{DVector, DVectorView, DVectorViewMut, Matrix3, Vector3};
use numeric_literals::replace_numeric_literals;
use serde_json::json;
use std::error::Error;

struct MockLinearVectorFunction;

impl MockLinearVectorFunction {
    #[replace_numeric_literals(f64::from(literal))]
    fn matrix() -> Matrix3<f64> {
        Matrix3::new(5, 1, 2, 1, 4, 2, 2, 2, 4)
    }
}

impl VectorFunction<f64> for MockLinearVectorFunction {
    fn dimension(&self) -> usize {
        3
    }

    fn eval_into(&mut self, f: &mut DVectorViewMut<f64>, x: &DVectorView<f64>) -> Result<(), Box<dyn Error>> {
        let b = Vector3::new(1.0, 2.0, 3.0);
        let r = Self::matrix() * x - b;
        f.copy_from(&r);
        Ok(())
    }
}

impl DifferentiableVectorFunction<f64> for MockLinearVectorFunction {
    fn solve_jacobian_system(
        &mut self,
        sol: &mut DVectorViewMut<f64>,
        _x: &DVectorView<f64>,
        rhs: &DVectorView<f64>,
    ) -> Result<(), Box<dyn Error>> {
        let a_inv = Self::matrix().try_inverse().ok_or("singular")?;
        sol.copy_from(&(a_inv * rhs));
        Ok(())
    }

    fn apply_jacobian(&mut self, y: &mut DVectorViewMut<f64>, direction: &DVectorView<f64>) -> Result<(), Box<dyn Error>> {
        y.copy_from(&(Self::matrix() * direction));
        Ok(())
    }
}

/// Componentwise `F(x) = atan(x)`, whose undamped Newton iteration diverges for `|x_0| > 1.39`.
struct Arctan {
    x_lin: DVector<f64>,
}

impl VectorFunction<f64> for Arctan {
    fn dimension(&self) -> usize {
        self.x_lin.len()
    }

    fn eval_into(&mut self, f: &mut DVectorViewMut<f64>, x: &DVectorView<f64>) -> Result<(), Box<dyn Error>> {
        f.zip_apply(x, |f_i, x_i| *f_i = x_i.atan());
        Ok(())
    }
}

impl DifferentiableVectorFunction<f64> for Arctan {
    fn solve_jacobian_system(
        &mut self,
        sol: &mut DVectorViewMut<f64>,
        x: &DVectorView<f64>,
        rhs: &DVectorView<f64>,
    ) -> Result<(), Box<dyn Error>> {
        self.x_lin.copy_from(x);
        for i in 0..x.len() {
            sol[i] = rhs[i] * (1.0 + x[i] * x[i]);
        }
        Ok(())
    }

    fn apply_jacobian(&mut self, y: &mut DVectorViewMut<f64>, direction: &DVectorView<f64>) -> Result<(), Box<dyn Error>> {
        for i in 0..direction.len() {
            y[i] = direction[i] / (1.0 + self.x_lin[i] * self.x_lin[i]);
        }
        Ok(())
    }
}

fn settings() -> NewtonSettings<f64> {
    NewtonSettings {
        max_iter: 50,
        rel_tol: 1e-12,
        abs_tol: 1e-14,
        print_level: -1,
    }
}

#[test]
fn newton_converges_in_single_iteration_for_linear_system() {
    let expected_solution = Vector3::new(-0.125, 0.16666667, 0.72916667);

    let mut x = DVector::zeros(3);
    let mut newton = RelaxedNewton::new(settings(), NoLineSearch);
    let result = newton
        .solve(MockLinearVectorFunction, None, &mut x)
        .expect("Newton iterations must succeed");

    assert!(result.converged);
    assert_eq!(result.iterations, 1);
    assert!((x - expected_solution).norm() < 1e-6);
}

#[test]
fn newton_with_right_hand_side() {
    // Solve A x - b0 = b1, i.e. A x = b0 + b1
    let b1 = DVector::from_column_slice(&[1.0, 0.0, -1.0]);
    let mut x = DVector::zeros(3);
    let mut newton = RelaxedNewton::new(settings(), BacktrackingLineSearch::default());
    let result = newton
        .solve(MockLinearVectorFunction, Some((&b1).into()), &mut x)
        .unwrap();
    assert!(result.converged);

    let residual = MockLinearVectorFunction::matrix() * &x - Vector3::new(2.0, 2.0, 2.0);
    assert!(residual.norm() < 1e-10);
}

#[test]
fn backtracking_globalizes_arctan() {
    // Far outside the region where full Newton steps converge (|x| < 1.39)
    let x0 = DVector::from_column_slice(&[10.0]);

    // Full steps diverge
    let mut x = x0.clone();
    let mut undamped = RelaxedNewton::new(
        NewtonSettings {
            max_iter: 5,
            ..settings()
        },
        NoLineSearch,
    );
    let result = undamped
        .solve(Arctan { x_lin: DVector::zeros(1) }, None, &mut x);
    let diverged = match result {
        Ok(result) => !result.converged,
        Err(NewtonError::NonFiniteResidual { .. }) => true,
        Err(err) => panic!("unexpected error: {}", err),
    };
    assert!(diverged);

    // Relaxed steps converge
    let mut x = x0;
    let mut relaxed = RelaxedNewton::new(
        settings(),
        BacktrackingLineSearch {
            max_iter: 30,
            ..Default::default()
        },
    );
    let result = relaxed
        .solve(Arctan { x_lin: DVector::zeros(1) }, None, &mut x)
        .unwrap();
    assert!(result.converged);
    assert!(x.amax() < 1e-10);
}

#[test]
fn newton_reports_non_convergence_without_error() {
    let mut x = DVector::from_column_slice(&[1.0, 1.0]);
    let mut newton = RelaxedNewton::new(
        NewtonSettings {
            max_iter: 1,
            rel_tol: 1e-30,
            abs_tol: 0.0,
            print_level: -1,
        },
        NoLineSearch,
    );
    let result = newton
        .solve(Arctan { x_lin: DVector::zeros(2) }, None, &mut x)
        .unwrap();
    assert!(!result.converged);
    assert_eq!(result.iterations, 1);
    assert!(result.final_norm < result.initial_norm);
}

#[test]
fn relaxed_newton_from_options() {
    let opts = json!({"type": "backtracking", "mu": 1e-3, "maxiter": 20});
    assert!(RelaxedNewton::<f64>::from_options(settings(), Some(&opts)).is_ok());
    assert!(RelaxedNewton::<f64>::from_options(settings(), None).is_ok());

    let bad = json!("wolfe");
    assert!(RelaxedNewton::<f64>::from_options(settings(), Some(&bad)).is_err());
}
