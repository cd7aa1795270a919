use mach::sbp::{SbpFamily, SbpOperator};
use mach::MachError;
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use nalgebra::{DMatrix, DVector};

fn operators() -> Vec<SbpOperator> {
    let mut ops: Vec<_> = (1..=4).map(SbpOperator::lobatto).collect();
    ops.extend((1..=3).map(|p| SbpOperator::new(p, SbpFamily::Gauss)));
    ops
}

#[test]
fn sbp_property_holds() {
    for op in operators() {
        let t_l = op.face_interpolation(false);
        let t_r = op.face_interpolation(true);
        let boundary = t_r * t_r.transpose() - t_l * t_l.transpose();
        let q = op.q();
        assert_matrix_eq!(q + q.transpose(), boundary, comp = abs, tol = 1e-12);
        assert_matrix_eq!(op.skew().clone(), q - q.transpose(), comp = abs, tol = 1e-14);
    }
}

#[test]
fn norm_integrates_constants() {
    for op in operators() {
        assert_scalar_eq!(op.weights().sum(), 2.0, comp = abs, tol = 1e-13);
        assert!(op.weights().iter().all(|&w| w > 0.0));
    }
}

#[test]
fn derivative_is_exact_for_polynomials_up_to_the_degree() {
    for op in operators() {
        let x = op.nodes();
        for k in 0..=op.degree() {
            let u = x.map(|x_i| x_i.powi(k as i32));
            let du_exact = if k == 0 {
                DVector::zeros(x.len())
            } else {
                x.map(|x_i| k as f64 * x_i.powi(k as i32 - 1))
            };
            assert_matrix_eq!(op.derivative() * u, du_exact, comp = abs, tol = 1e-11);
        }
    }
}

#[test]
fn face_interpolation_reproduces_end_values() {
    let op = SbpOperator::new(3, SbpFamily::Gauss);
    let u = op.nodes().map(|x| 1.0 + 2.0 * x - x * x * x);
    assert_scalar_eq!(op.face_interpolation(false).dot(&u), 1.0 - 2.0 + 1.0, comp = abs, tol = 1e-12);
    assert_scalar_eq!(op.face_interpolation(true).dot(&u), 1.0 + 2.0 - 1.0, comp = abs, tol = 1e-12);

    // Lobatto nodes contain the end points
    let lobatto = SbpOperator::lobatto(2);
    assert_scalar_eq!(lobatto.face_interpolation(false)[0], 1.0, comp = abs, tol = 1e-14);
    assert_scalar_eq!(lobatto.face_interpolation(true)[2], 1.0, comp = abs, tol = 1e-14);
}

#[test]
fn projection_keeps_lower_degree_polynomials() {
    let op = SbpOperator::lobatto(3);
    let x = op.nodes();
    let p = op.projection();
    let quadratic = x.map(|x_i| 0.5 - x_i + 3.0 * x_i * x_i);
    assert_matrix_eq!(p * &quadratic, quadratic, comp = abs, tol = 1e-12);
    assert_matrix_eq!(p * p, p.clone(), comp = abs, tol = 1e-12);
}

#[test]
fn degree_zero_is_a_single_node_operator() {
    let op = SbpOperator::lobatto(0);
    assert_eq!(op.num_nodes(), 1);
    assert_matrix_eq!(op.q().clone(), DMatrix::zeros(1, 1), comp = abs, tol = 0.0);
    assert_matrix_eq!(op.projection().clone(), DMatrix::zeros(1, 1), comp = abs, tol = 0.0);
    assert_scalar_eq!(op.weights()[0], 2.0, comp = abs, tol = 0.0);
}

#[test]
fn basis_type_option_selects_family() {
    assert_eq!(SbpFamily::from_basis_type("csbp").unwrap(), SbpFamily::Lobatto);
    assert_eq!(SbpFamily::from_basis_type("dsbp").unwrap(), SbpFamily::Gauss);
    assert!(matches!(
        SbpFamily::from_basis_type("hsbp"),
        Err(MachError::UnknownOption { key, value }) if key == "space-dis.basis-type" && value == "hsbp"
    ));
}
