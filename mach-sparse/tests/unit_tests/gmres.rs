use mach_sparse::gmres::SolveErrorKind;
use mach_sparse::{Gmres, GmresWorkspace, Jacobi, ResidualCriterion};
use matrixcompare::assert_matrix_eq;
use nalgebra::{DMatrix, DVector};
use proptest::prelude::*;
use util::{convection_diffusion_1d, laplacian_1d, scrambled_vector, spd_matrix};

#[test]
fn gmres_solves_nonsymmetric_sparse_system() {
    let a = convection_diffusion_1d(40, 3.0);
    let x_exact = scrambled_vector(40, 7);
    let b = &a * &x_exact;

    let mut x = DVector::zeros(40);
    let output = Gmres::new()
        .with_operator(&a)
        .with_stopping_criterion(ResidualCriterion::new(1e-12, 0.0))
        .solve_with_guess(&b, &mut x)
        .unwrap();

    assert!(output.num_iterations <= 40);
    assert_matrix_eq!(x, x_exact, comp = abs, tol = 1e-8);
}

#[test]
fn gmres_with_restart_and_preconditioner() {
    let a = convection_diffusion_1d(30, 1.0);
    let x_exact = scrambled_vector(30, 1);
    let b = &a * &x_exact;
    let jacobi = Jacobi::from_csr(&a).unwrap();

    let mut x = DVector::zeros(30);
    Gmres::new()
        .with_operator(&a)
        .with_preconditioner(&jacobi)
        .with_restart(8)
        .with_max_iter(2000)
        .with_stopping_criterion(ResidualCriterion::new(1e-11, 0.0))
        .solve_with_guess(&b, &mut x)
        .unwrap();

    assert_matrix_eq!(x, x_exact, comp = abs, tol = 1e-7);
}

#[test]
fn gmres_zero_rhs_gives_zero_solution() {
    let a = laplacian_1d(5);
    let b = DVector::zeros(5);
    let mut x = DVector::repeat(5, 3.0);
    let output = Gmres::new()
        .with_operator(&a)
        .with_stopping_criterion(ResidualCriterion::default())
        .solve_with_guess(&b, &mut x)
        .unwrap();
    assert_eq!(output.num_iterations, 0);
    assert_eq!(x, DVector::zeros(5));
}

#[test]
fn gmres_reports_max_iterations() {
    let a = laplacian_1d(50);
    let b = DVector::repeat(50, 1.0);
    let mut x = DVector::zeros(50);
    let err = Gmres::new()
        .with_operator(&a)
        .with_restart(2)
        .with_max_iter(3)
        .with_stopping_criterion(ResidualCriterion::new(1e-14, 0.0))
        .solve_with_guess(&b, &mut x)
        .unwrap_err();
    assert!(matches!(err.kind, SolveErrorKind::MaxIterationsReached { max_iter: 3 }));
}

#[test]
fn workspace_does_not_change_result() {
    let a = spd_matrix(12, 4);
    let mut workspace = GmresWorkspace::default();

    for seed in 0..3 {
        let x_exact = scrambled_vector(12, seed);
        let b = &a * &x_exact;

        let mut x_ws = DVector::zeros(12);
        let out_ws = Gmres::with_workspace(&mut workspace)
            .with_operator(&a)
            .with_stopping_criterion(ResidualCriterion::new(1e-12, 0.0))
            .solve_with_guess(&b, &mut x_ws)
            .unwrap();

        let mut x_fresh = DVector::zeros(12);
        let out_fresh = Gmres::new()
            .with_operator(&a)
            .with_stopping_criterion(ResidualCriterion::new(1e-12, 0.0))
            .solve_with_guess(&b, &mut x_fresh)
            .unwrap();

        assert_eq!(x_ws, x_fresh);
        assert_eq!(out_ws.num_iterations, out_fresh.num_iterations);
    }
}

proptest! {
    #[test]
    fn gmres_solves_random_spd_systems(seed in 0u64..1000, n in 1usize..10) {
        let a: DMatrix<f64> = spd_matrix(n, seed);
        let x_exact = scrambled_vector(n, seed + 1);
        let b = &a * &x_exact;
        let mut x = DVector::zeros(n);
        Gmres::new()
            .with_operator(&a)
            .with_stopping_criterion(ResidualCriterion::new(1e-13, 0.0))
            .solve_with_guess(&b, &mut x)
            .unwrap();
        prop_assert!((x - x_exact).amax() <= 1e-9);
    }
}
