use mach::load::VolumeSourceLoad;
use mach::mesh::CartesianMesh;
use mach::optimize::calculus::approximate_jacobian_fd;
use mach::thermal::ThermalResidual;
use mach::{MachError, MachInputs, Residual};
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use nalgebra::DVector;
use serde_json::{json, Value};

fn thermal_options(degree: usize, beta: f64, ess_bdr: &[usize]) -> Value {
    json!({
        "thermal": { "degree": degree, "conductivity": 1.0, "beta": beta },
        "ess-bdr": ess_bdr
    })
}

/// Residual of `-u'' = 2` on the unit interval (or slab), whose solution is `x (1 - x)`.
fn quadratic_problem(cells: &[usize], ess_bdr: &[usize]) -> ThermalResidual {
    let mut residual = ThermalResidual::new(&thermal_options(2, 0.0, ess_bdr), CartesianMesh::unit_box(cells)).unwrap();
    let load = VolumeSourceLoad::new(residual.space(), |_, g| g[0] = 2.0);
    residual.set_load(Box::new(load));
    residual
}

fn exact_quadratic(residual: &ThermalResidual) -> Vec<f64> {
    let mut u = vec![0.0; residual.size()];
    residual.space().project(&mut u, |x, u| u[0] = x[0] * (1.0 - x[0]));
    u
}

fn perturbed_state(residual: &ThermalResidual) -> Vec<f64> {
    let mut u = vec![0.0; residual.size()];
    residual
        .space()
        .project(&mut u, |x, u| u[0] = 0.5 + 0.3 * (3.0 * x[0]).sin() + 0.1 * x.iter().sum::<f64>());
    u
}

#[test]
fn quadratic_temperature_is_reproduced_exactly() {
    for (cells, ess_bdr) in [(vec![4], vec![1, 2]), (vec![2, 3], vec![2, 4])] {
        let mut residual = quadratic_problem(&cells, &ess_bdr);
        let u = exact_quadratic(&residual);
        let mut res = vec![1.0; residual.size()];
        residual.evaluate(&MachInputs::new().with("state", &u), &mut res).unwrap();
        let norm = DVector::from(res).norm();
        assert!(norm < 1e-12, "residual norm {} on {:?}", norm, cells);
    }
}

#[test]
fn essential_rows_hold_the_boundary_temperature() {
    let options = json!({
        "thermal": { "degree": 1, "boundary-temperature": 3.0 },
        "ess-bdr": [1]
    });
    let mut residual = ThermalResidual::new(&options, CartesianMesh::unit_box(&[3])).unwrap();
    let u = vec![5.0; residual.size()];
    let mut res = vec![0.0; residual.size()];
    residual.evaluate(&MachInputs::new().with("state", &u), &mut res).unwrap();
    // The first node of the first element is on boundary 1
    assert_eq!(residual.form().essential_dofs(), &[0]);
    assert_eq!(res[0], 2.0);
    // Constant temperature away from the boundary is an equilibrium
    assert!(res[1..].iter().all(|r| r.abs() < 1e-12));
}

#[test]
fn thermal_jacobian_matches_finite_differences() {
    let mut residual = ThermalResidual::new(&thermal_options(2, 0.5, &[1]), CartesianMesh::unit_box(&[2, 2])).unwrap();
    let u = perturbed_state(&residual);
    let n = residual.size();
    let jacobian = residual
        .jacobian(&MachInputs::new().with("state", &u), "state")
        .unwrap()
        .to_dense();
    let mut x = DVector::from_column_slice(&u);
    let fd = approximate_jacobian_fd(
        n,
        |x, mut out| {
            let mut r = vec![0.0; n];
            residual
                .evaluate(&MachInputs::new().with("state", x.as_slice()), &mut r)
                .unwrap();
            out.copy_from_slice(&r);
        },
        &mut x,
        1e-6,
    );
    assert_matrix_eq!(jacobian, fd, comp = abs, tol = 1e-6);
}

#[test]
fn conductivity_sensitivity_matches_finite_differences() {
    let mut residual = ThermalResidual::new(&thermal_options(1, 0.2, &[1, 2]), CartesianMesh::unit_box(&[3])).unwrap();
    let u = perturbed_state(&residual);
    let n = residual.size();
    let h = 1e-6;
    let mut evaluate = |k0: f64| {
        let mut r = vec![0.0; n];
        let inputs = MachInputs::new().with("state", &u).with("conductivity", k0);
        residual.evaluate(&inputs, &mut r).unwrap();
        DVector::from(r)
    };
    let fd = (evaluate(1.0 + h) - evaluate(1.0 - h)) / (2.0 * h);

    residual
        .linearize(&MachInputs::new().with("state", &u).with("conductivity", 1.0))
        .unwrap();
    let mut res_dot = vec![0.0; n];
    residual
        .jacobian_vector_product("conductivity", &[1.0], &mut res_dot)
        .unwrap();
    assert_matrix_eq!(DVector::from(res_dot), fd.clone(), comp = abs, tol = 1e-8);

    let res_bar = util::scrambled_vector(n, 4);
    let product = residual
        .scalar_vector_jacobian_product("conductivity", res_bar.as_slice())
        .unwrap();
    assert_scalar_eq!(product, res_bar.dot(&fd), comp = abs, tol = 1e-8);
}

#[test]
fn heat_source_sensitivity_is_minus_the_masked_load() {
    let mut residual = quadratic_problem(&[3], &[1, 2]);
    let u = exact_quadratic(&residual);
    let n = residual.size();
    residual.linearize(&MachInputs::new().with("state", &u)).unwrap();

    let res_bar = vec![1.0; n];
    let product = residual
        .scalar_vector_jacobian_product("heat_source", &res_bar)
        .unwrap();
    // dR/ds is minus the load of unit scale, which vanishes in essential rows
    let ess = residual.form().essential_dofs().to_vec();
    let mass = residual.mass_matrix().to_dense();
    let expected: f64 = -(0..n).filter(|i| !ess.contains(i)).map(|i| 2.0 * mass[(i, i)]).sum::<f64>();
    assert_scalar_eq!(product, expected, comp = abs, tol = 1e-13);

    let mut res_dot = vec![0.0; n];
    residual
        .jacobian_vector_product("heat_source", &[2.0], &mut res_dot)
        .unwrap();
    let total: f64 = res_dot.iter().sum();
    assert_scalar_eq!(total, 2.0 * expected, comp = abs, tol = 1e-13);
}

#[test]
fn unknown_inputs_without_a_load_are_reported() {
    let mut residual = ThermalResidual::new(&thermal_options(1, 0.0, &[1]), CartesianMesh::unit_box(&[2])).unwrap();
    let n = residual.size();
    assert!(matches!(
        residual.scalar_vector_jacobian_product("heat_source", &vec![0.0; n]),
        Err(MachError::UnknownInput(_))
    ));
    assert!(matches!(
        residual.jacobian(&MachInputs::new(), "conductivity"),
        Err(MachError::Unsupported(_))
    ));
    let bad = ThermalResidual::new(&thermal_options(1, 0.0, &[3]), CartesianMesh::unit_box(&[2]));
    assert!(matches!(bad, Err(MachError::UnknownOption { .. })));
}

#[test]
fn thermal_outputs() {
    let residual = ThermalResidual::new(&thermal_options(1, 0.0, &[]), CartesianMesh::new(&[2, 2], &[0.0, 0.0], &[2.0, 0.5])).unwrap();
    let u = vec![3.5; residual.size()];
    let inputs = MachInputs::new().with("state", &u);

    let mut volume = residual.create_output("volume", &Value::Null).unwrap();
    assert_scalar_eq!(volume.calc_output(&inputs).unwrap(), 1.0, comp = abs, tol = 1e-14);
    let mut average = residual.create_output("average-temperature", &Value::Null).unwrap();
    assert_scalar_eq!(average.calc_output(&inputs).unwrap(), 3.5, comp = abs, tol = 1e-14);
    let mut max = residual
        .create_output("max-temperature", &json!({ "rho": 50.0 }))
        .unwrap();
    assert_scalar_eq!(max.calc_output(&inputs).unwrap(), 3.5, comp = abs, tol = 1e-13);

    assert!(matches!(
        residual.create_output("heat-flux", &Value::Null),
        Err(MachError::UnknownOutput(_))
    ));
}
