use mach::load::{MachLoad, VolumeSourceLoad};
use mach::mesh::CartesianMesh;
use mach::sbp::SbpOperator;
use mach::space::SbpSpace;
use mach::{MachError, MachInputs};
use matrixcompare::assert_scalar_eq;

fn space() -> SbpSpace {
    SbpSpace::new(CartesianMesh::unit_box(&[2, 2]), SbpOperator::lobatto(2), 1)
}

#[test]
fn source_load_integrates_the_source() {
    let space = space();
    // Exact for a linear source with the degree 2 quadrature
    let mut load = VolumeSourceLoad::new(&space, |x, g| g[0] = 1.0 + x[0] + 2.0 * x[1]);
    let mut tv = vec![0.0; load.size()];
    load.add_load(&mut tv);
    assert_scalar_eq!(tv.iter().sum::<f64>(), 2.5, comp = abs, tol = 1e-14);

    // Loads accumulate
    load.add_load(&mut tv);
    assert_scalar_eq!(tv.iter().sum::<f64>(), 5.0, comp = abs, tol = 1e-14);
}

#[test]
fn heat_source_input_scales_the_load() {
    let space = space();
    let mut load = VolumeSourceLoad::new(&space, |_, g| g[0] = 1.0);
    assert_eq!(load.scale(), 1.0);
    load.set_inputs(&MachInputs::new().with("heat_source", 3.0)).unwrap();
    assert_eq!(load.scale(), 3.0);
    let mut tv = vec![0.0; load.size()];
    load.add_load(&mut tv);
    assert_scalar_eq!(tv.iter().sum::<f64>(), 3.0, comp = abs, tol = 1e-14);

    // Other inputs leave the scale alone
    load.set_inputs(&MachInputs::new().with("conductivity", 2.0)).unwrap();
    assert_eq!(load.scale(), 3.0);

    let field = vec![1.0; 4];
    assert!(matches!(
        load.set_inputs(&MachInputs::new().with("heat_source", &field)),
        Err(MachError::BadInputType { .. })
    ));
}

#[test]
fn load_derivatives_with_respect_to_the_scale() {
    let space = space();
    let mut load = VolumeSourceLoad::new(&space, |x, g| g[0] = x[0]);
    let n = load.size();
    let mut unit = vec![0.0; n];
    load.add_load(&mut unit);

    let mut load_dot = vec![1.0; n];
    load.jacobian_vector_product("heat_source", &[0.5], &mut load_dot).unwrap();
    for (dot, l) in load_dot.iter().zip(&unit) {
        assert_scalar_eq!(*dot, 1.0 + 0.5 * l, comp = abs, tol = 1e-15);
    }

    let load_bar = util::scrambled_vector(n, 1);
    let product = load
        .scalar_vector_jacobian_product("heat_source", load_bar.as_slice())
        .unwrap();
    let expected: f64 = load_bar.iter().zip(&unit).map(|(b, l)| b * l).sum();
    assert_scalar_eq!(product, expected, comp = abs, tol = 1e-14);

    // Inputs the load does not depend on have zero derivative
    assert_eq!(load.scalar_vector_jacobian_product("conductivity", load_bar.as_slice()).unwrap(), 0.0);
    assert!(matches!(
        load.vector_jacobian_product("mesh_coords", load_bar.as_slice(), &mut vec![0.0; n]),
        Err(MachError::Unsupported(_))
    ));
}
