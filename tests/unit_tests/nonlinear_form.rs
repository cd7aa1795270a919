use mach::mesh::CartesianMesh;
use mach::nonlinear_form::{
    BoundaryFaceContext, BoundaryFaceKernel, DomainKernel, ElementContext, InteriorFaceContext, InteriorFaceKernel,
    KernelScalar, MachNonlinearForm,
};
use mach::optimize::calculus::approximate_jacobian_fd;
use mach::sbp::SbpOperator;
use mach::space::SbpSpace;
use mach::MachError;
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use nalgebra::{DMatrix, DVector};

/// `r_i = w_i u_i^3`, the gradient of `sum_i w_i u_i^4 / 4`.
struct CubicReaction;

impl DomainKernel for CubicReaction {
    fn eval<T: KernelScalar>(&self, ctx: &ElementContext, u: &[T], r: &mut [T]) {
        for (i, (r_i, &u_i)) in r.iter_mut().zip(u).enumerate() {
            let weight = T::from(ctx.space.node_weight(&ctx.element, i));
            *r_i = *r_i + weight * u_i.powi(3);
        }
    }

    fn energy<T: KernelScalar>(&self, ctx: &ElementContext, u: &[T]) -> T {
        u.iter().enumerate().fold(T::zero(), |acc, (i, &u_i)| {
            acc + T::from(0.25 * ctx.space.node_weight(&ctx.element, i)) * u_i.powi(4)
        })
    }

    fn scalar_sensitivity(&self, name: &str, _ctx: &ElementContext, _u: &[f64], dr: &mut [f64]) -> bool {
        if name != "offset" {
            return false;
        }
        dr.iter_mut().for_each(|d| *d += 1.0);
        true
    }
}

/// Couples the first nodes of the two elements of a face with `(u_l - u_r)^2`.
struct SquaredJump;

impl InteriorFaceKernel for SquaredJump {
    fn eval<T: KernelScalar>(
        &self,
        _ctx: &InteriorFaceContext,
        u_left: &[T],
        u_right: &[T],
        r_left: &mut [T],
        r_right: &mut [T],
    ) {
        let jump = u_left[0] - u_right[0];
        r_left[0] = r_left[0] + jump * jump;
        r_right[0] = r_right[0] - jump * jump * u_right[0];
    }
}

/// Adds `sin(u)` to every node of the element and counts the faces it is applied to.
struct SineBoundary;

impl BoundaryFaceKernel for SineBoundary {
    fn eval<T: KernelScalar>(&self, _ctx: &BoundaryFaceContext, u: &[T], r: &mut [T]) {
        for (r_i, &u_i) in r.iter_mut().zip(u) {
            *r_i = *r_i + u_i.sin();
        }
    }

    fn energy<T: KernelScalar>(&self, _ctx: &BoundaryFaceContext, u: &[T]) -> T {
        T::one() + u[0] * u[1]
    }
}

fn test_form(attributes: Option<&[usize]>) -> MachNonlinearForm {
    let space = SbpSpace::new(CartesianMesh::unit_box(&[2, 2]), SbpOperator::lobatto(1), 1);
    let mut form = MachNonlinearForm::new(space);
    form.add_domain_integrator(CubicReaction);
    form.add_interior_face_integrator(SquaredJump);
    form.add_bdr_face_integrator(SineBoundary, attributes);
    form
}

fn fd_jacobian(form: &MachNonlinearForm, u: &[f64]) -> DMatrix<f64> {
    let n = u.len();
    let mut x = DVector::from_column_slice(u);
    approximate_jacobian_fd(n, |x, mut out| {
        let mut r = vec![0.0; n];
        form.mult(x.as_slice(), &mut r);
        out.copy_from_slice(&r);
    }, &mut x, 1e-6)
}

#[test]
fn assembled_jacobian_matches_finite_differences() {
    let form = test_form(Some(&[1, 2][..]));
    let u = util::scrambled_vector(form.size(), 9);
    let jacobian = form.jacobian(u.as_slice()).to_dense();
    assert_matrix_eq!(jacobian, fd_jacobian(&form, u.as_slice()), comp = abs, tol = 1e-7);
}

#[test]
fn jacobian_vector_product_accumulates() {
    let form = test_form(None);
    let n = form.size();
    let u = util::scrambled_vector(n, 2);
    let v = util::scrambled_vector(n, 3);
    let jacobian = form.jacobian(u.as_slice()).to_dense();
    let mut jv = vec![2.0; n];
    form.jacobian_vector_product(u.as_slice(), v.as_slice(), &mut jv);
    assert_matrix_eq!(DVector::from(jv), &jacobian * &v + DVector::repeat(n, 2.0), comp = abs, tol = 1e-13);

    let transpose = form.jacobian_transpose(u.as_slice()).to_dense();
    assert_matrix_eq!(transpose, jacobian.transpose(), comp = abs, tol = 0.0);
}

#[test]
fn essential_rows_become_identity() {
    let mut form = test_form(None);
    form.set_essential_boundaries(&[4]).unwrap();
    let n = form.size();
    // Left edge of the 2x2 mesh: two elements with two nodes each
    assert_eq!(form.essential_dofs().len(), 4);

    let mut g = vec![0.0; n];
    for &i in form.essential_dofs() {
        g[i] = 0.5;
    }
    form.set_essential_values(&g);
    let u = util::scrambled_vector(n, 4);
    let mut r = vec![0.0; n];
    form.mult(u.as_slice(), &mut r);
    let jacobian = form.jacobian(u.as_slice()).to_dense();
    let v = util::scrambled_vector(n, 5);
    let mut jv = vec![0.0; n];
    form.jacobian_vector_product(u.as_slice(), v.as_slice(), &mut jv);
    for &i in form.essential_dofs() {
        assert_eq!(r[i], u[i] - 0.5);
        for j in 0..n {
            assert_eq!(jacobian[(i, j)], if i == j { 1.0 } else { 0.0 });
        }
        assert_eq!(jv[i], v[i]);
    }

    assert!(matches!(form.set_essential_boundaries(&[5]), Err(MachError::UnknownOption { .. })));
    assert!(matches!(form.set_essential_boundaries(&[0]), Err(MachError::UnknownOption { .. })));
}

#[test]
fn boundary_integrators_respect_attributes() {
    let u = vec![0.0; test_form(None).size()];
    // One per face: 8 faces on the boundary of a 2x2 mesh, 2 on the bottom
    assert_eq!(test_form(None).energy(&u), 8.0);
    assert_eq!(test_form(Some(&[1][..])).energy(&u), 2.0);
    assert_eq!(test_form(Some(&[1, 3][..])).energy(&u), 4.0);
}

#[test]
fn energy_gradient_matches_finite_differences() {
    let form = test_form(Some(&[2, 3][..]));
    let n = form.size();
    let u = util::scrambled_vector(n, 6);
    let mut grad = vec![1.0; n];
    form.energy_gradient(u.as_slice(), &mut grad);
    let mut x = u.clone();
    let fd = approximate_jacobian_fd(1, |x, mut out| out[0] = form.energy(x.as_slice()), &mut x, 1e-6);
    assert_matrix_eq!(DVector::from(grad), fd.transpose(), comp = abs, tol = 1e-7);
}

#[test]
fn scalar_sensitivities_are_collected_from_integrators() {
    let mut form = test_form(None);
    form.set_essential_boundaries(&[1]).unwrap();
    let n = form.size();
    let u = vec![0.3; n];
    let mut dr = vec![0.0; n];
    form.scalar_sensitivity("offset", &u, &mut dr).unwrap();
    for i in 0..n {
        let expected = if form.essential_dofs().contains(&i) { 0.0 } else { 1.0 };
        assert_scalar_eq!(dr[i], expected, comp = abs, tol = 0.0);
    }
    assert!(matches!(
        form.scalar_sensitivity("mach", &u, &mut dr),
        Err(MachError::Unsupported(_))
    ));
}
