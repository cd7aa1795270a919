//! Assembly of element, interior-face and boundary-face integrators into a global residual.
//!
//! Integrator kernels are written once, generic over the scalar type, and evaluated with
//! `f64` for residuals and with dual numbers for local Jacobians.
use crate::error::{MachError, Result};
use crate::mesh::{BoundaryFace, Element, InteriorFace, Side};
use crate::operator::JacobianOperator;
use crate::space::SbpSpace;
use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use num_dual::{Dual64, DualNum};
use rustc_hash::FxHashSet;

/// Scalar types integrator kernels are evaluated with.
pub trait KernelScalar: DualNum<f64> + Copy {}

impl<T: DualNum<f64> + Copy> KernelScalar for T {}

pub struct ElementContext<'a> {
    pub space: &'a SbpSpace,
    pub element: Element,
}

pub struct InteriorFaceContext<'a> {
    pub space: &'a SbpSpace,
    pub left: Element,
    pub right: Element,
    pub axis: usize,
}

pub struct BoundaryFaceContext<'a> {
    pub space: &'a SbpSpace,
    pub element: Element,
    pub face: BoundaryFace,
}

/// Local residual of one element. Contributions are added to `r`.
pub trait DomainKernel {
    fn eval<T: KernelScalar>(&self, ctx: &ElementContext, u: &[T], r: &mut [T]);

    /// Contribution of the element to the form's scalar energy.
    fn energy<T: KernelScalar>(&self, _ctx: &ElementContext, _u: &[T]) -> T {
        T::zero()
    }

    /// Adds `dR/dp` for a named scalar parameter `p`, returning whether `p` is recognized.
    fn scalar_sensitivity(&self, _name: &str, _ctx: &ElementContext, _u: &[f64], _dr: &mut [f64]) -> bool {
        false
    }
}

/// Local residual of a face shared by two elements.
pub trait InteriorFaceKernel {
    fn eval<T: KernelScalar>(
        &self,
        ctx: &InteriorFaceContext,
        u_left: &[T],
        u_right: &[T],
        r_left: &mut [T],
        r_right: &mut [T],
    );

    /// Adds `dR/dp` for a named scalar parameter `p`, returning whether `p` is recognized.
    fn scalar_sensitivity(
        &self,
        _name: &str,
        _ctx: &InteriorFaceContext,
        _u_left: &[f64],
        _u_right: &[f64],
        _dr_left: &mut [f64],
        _dr_right: &mut [f64],
    ) -> bool {
        false
    }
}

/// Local residual of a boundary face, added to the residual of its element.
pub trait BoundaryFaceKernel {
    fn eval<T: KernelScalar>(&self, ctx: &BoundaryFaceContext, u: &[T], r: &mut [T]);

    fn energy<T: KernelScalar>(&self, _ctx: &BoundaryFaceContext, _u: &[T]) -> T {
        T::zero()
    }
}

pub trait DomainIntegrator {
    fn assemble_element_vector(&self, ctx: &ElementContext, u: &[f64], r: &mut [f64]);
    fn assemble_element_grad(&self, ctx: &ElementContext, u: &[f64], jac: &mut DMatrix<f64>);
    fn element_energy(&self, ctx: &ElementContext, u: &[f64]) -> f64;
    /// Accumulates the gradient of the element energy into `grad`.
    fn element_energy_gradient(&self, ctx: &ElementContext, u: &[f64], grad: &mut [f64]);
    fn element_scalar_sensitivity(&self, name: &str, ctx: &ElementContext, u: &[f64], dr: &mut [f64]) -> bool;
    /// Accumulates the directional derivative `dR/du v` into `jv`.
    fn element_directional_derivative(&self, ctx: &ElementContext, u: &[f64], v: &[f64], jv: &mut [f64]);
}

pub trait InteriorFaceIntegrator {
    /// `r` holds the left element's residual followed by the right element's.
    fn assemble_face_vector(&self, ctx: &InteriorFaceContext, u_left: &[f64], u_right: &[f64], r: &mut [f64]);
    fn assemble_face_grad(&self, ctx: &InteriorFaceContext, u_left: &[f64], u_right: &[f64], jac: &mut DMatrix<f64>);
    /// `u`, `v` and `jv` hold the left element's data followed by the right element's.
    fn face_directional_derivative(&self, ctx: &InteriorFaceContext, u: &[f64], v: &[f64], jv: &mut [f64]);
    fn face_scalar_sensitivity(
        &self,
        name: &str,
        ctx: &InteriorFaceContext,
        u_left: &[f64],
        u_right: &[f64],
        dr: &mut [f64],
    ) -> bool;
}

pub trait BoundaryFaceIntegrator {
    fn assemble_face_vector(&self, ctx: &BoundaryFaceContext, u: &[f64], r: &mut [f64]);
    fn assemble_face_grad(&self, ctx: &BoundaryFaceContext, u: &[f64], jac: &mut DMatrix<f64>);
    fn face_energy(&self, ctx: &BoundaryFaceContext, u: &[f64]) -> f64;
    fn face_energy_gradient(&self, ctx: &BoundaryFaceContext, u: &[f64], grad: &mut [f64]);
    fn face_directional_derivative(&self, ctx: &BoundaryFaceContext, u: &[f64], v: &[f64], jv: &mut [f64]);
}

impl<K: DomainKernel> DomainIntegrator for K {
    fn assemble_element_vector(&self, ctx: &ElementContext, u: &[f64], r: &mut [f64]) {
        self.eval(ctx, u, r);
    }

    fn assemble_element_grad(&self, ctx: &ElementContext, u: &[f64], jac: &mut DMatrix<f64>) {
        dual_jacobian(u, jac, |u, r| self.eval(ctx, u, r));
    }

    fn element_energy(&self, ctx: &ElementContext, u: &[f64]) -> f64 {
        self.energy(ctx, u)
    }

    fn element_energy_gradient(&self, ctx: &ElementContext, u: &[f64], grad: &mut [f64]) {
        dual_gradient(u, grad, |u| self.energy(ctx, u));
    }

    fn element_scalar_sensitivity(&self, name: &str, ctx: &ElementContext, u: &[f64], dr: &mut [f64]) -> bool {
        self.scalar_sensitivity(name, ctx, u, dr)
    }

    fn element_directional_derivative(&self, ctx: &ElementContext, u: &[f64], v: &[f64], jv: &mut [f64]) {
        dual_directional_derivative(u, v, jv, |u, r| self.eval(ctx, u, r));
    }
}

impl<K: InteriorFaceKernel> InteriorFaceIntegrator for K {
    fn assemble_face_vector(&self, ctx: &InteriorFaceContext, u_left: &[f64], u_right: &[f64], r: &mut [f64]) {
        let (r_left, r_right) = r.split_at_mut(u_left.len());
        self.eval(ctx, u_left, u_right, r_left, r_right);
    }

    fn assemble_face_grad(&self, ctx: &InteriorFaceContext, u_left: &[f64], u_right: &[f64], jac: &mut DMatrix<f64>) {
        let m = u_left.len();
        let u: Vec<f64> = u_left.iter().chain(u_right).copied().collect();
        dual_jacobian(&u, jac, |u, r| {
            let (u_left, u_right) = u.split_at(m);
            let (r_left, r_right) = r.split_at_mut(m);
            self.eval(ctx, u_left, u_right, r_left, r_right);
        });
    }

    fn face_directional_derivative(&self, ctx: &InteriorFaceContext, u: &[f64], v: &[f64], jv: &mut [f64]) {
        let m = u.len() / 2;
        dual_directional_derivative(u, v, jv, |u, r| {
            let (u_left, u_right) = u.split_at(m);
            let (r_left, r_right) = r.split_at_mut(m);
            self.eval(ctx, u_left, u_right, r_left, r_right);
        });
    }

    fn face_scalar_sensitivity(
        &self,
        name: &str,
        ctx: &InteriorFaceContext,
        u_left: &[f64],
        u_right: &[f64],
        dr: &mut [f64],
    ) -> bool {
        let (dr_left, dr_right) = dr.split_at_mut(u_left.len());
        self.scalar_sensitivity(name, ctx, u_left, u_right, dr_left, dr_right)
    }
}

impl<K: BoundaryFaceKernel> BoundaryFaceIntegrator for K {
    fn assemble_face_vector(&self, ctx: &BoundaryFaceContext, u: &[f64], r: &mut [f64]) {
        self.eval(ctx, u, r);
    }

    fn assemble_face_grad(&self, ctx: &BoundaryFaceContext, u: &[f64], jac: &mut DMatrix<f64>) {
        dual_jacobian(u, jac, |u, r| self.eval(ctx, u, r));
    }

    fn face_energy(&self, ctx: &BoundaryFaceContext, u: &[f64]) -> f64 {
        self.energy(ctx, u)
    }

    fn face_energy_gradient(&self, ctx: &BoundaryFaceContext, u: &[f64], grad: &mut [f64]) {
        dual_gradient(u, grad, |u| self.energy(ctx, u));
    }

    fn face_directional_derivative(&self, ctx: &BoundaryFaceContext, u: &[f64], v: &[f64], jv: &mut [f64]) {
        dual_directional_derivative(u, v, jv, |u, r| self.eval(ctx, u, r));
    }
}

/// Accumulates the Jacobian of a square local map into `jac` with one forward-mode sweep
/// per input.
pub fn dual_jacobian(u: &[f64], jac: &mut DMatrix<f64>, mut eval: impl FnMut(&[Dual64], &mut [Dual64])) {
    let n = u.len();
    assert_eq!(jac.nrows(), n);
    assert_eq!(jac.ncols(), n);
    let mut u_dual: Vec<Dual64> = u.iter().map(|&x| Dual64::from(x)).collect();
    let mut r_dual = vec![Dual64::from(0.0); n];
    for j in 0..n {
        u_dual[j] = Dual64::new(u[j], 1.0);
        r_dual.fill(Dual64::from(0.0));
        eval(&u_dual, &mut r_dual);
        for (i, r_i) in r_dual.iter().enumerate() {
            jac[(i, j)] += r_i.eps;
        }
        u_dual[j] = Dual64::from(u[j]);
    }
}

/// Accumulates the gradient of a local scalar function into `grad`.
pub fn dual_gradient(u: &[f64], grad: &mut [f64], mut eval: impl FnMut(&[Dual64]) -> Dual64) {
    assert_eq!(u.len(), grad.len());
    let mut u_dual: Vec<Dual64> = u.iter().map(|&x| Dual64::from(x)).collect();
    for j in 0..u.len() {
        u_dual[j] = Dual64::new(u[j], 1.0);
        grad[j] += eval(&u_dual).eps;
        u_dual[j] = Dual64::from(u[j]);
    }
}

/// Directional derivative `J(u) v` of a square local map, accumulated into `jv`.
pub fn dual_directional_derivative(
    u: &[f64],
    v: &[f64],
    jv: &mut [f64],
    mut eval: impl FnMut(&[Dual64], &mut [Dual64]),
) {
    let u_dual: Vec<Dual64> = u.iter().zip(v).map(|(&x, &dx)| Dual64::new(x, dx)).collect();
    let mut r_dual = vec![Dual64::from(0.0); jv.len()];
    eval(&u_dual, &mut r_dual);
    for (jv_i, r_i) in jv.iter_mut().zip(&r_dual) {
        *jv_i += r_i.eps;
    }
}

struct MarkedBoundaryIntegrator {
    integrator: Box<dyn BoundaryFaceIntegrator>,
    /// `None` applies the integrator on every boundary face.
    marker: Option<Vec<bool>>,
}

impl MarkedBoundaryIntegrator {
    fn applies_to(&self, attribute: usize) -> bool {
        match &self.marker {
            None => true,
            Some(marker) => marker.get(attribute - 1).copied().unwrap_or(false),
        }
    }
}

/// A nonlinear operator assembled from integrators over an [`SbpSpace`].
///
/// Rows of essential degrees of freedom are replaced by `u_i - g_i` in the residual and
/// by identity rows in the Jacobian.
pub struct MachNonlinearForm {
    space: SbpSpace,
    domain: Vec<Box<dyn DomainIntegrator>>,
    interior: Vec<Box<dyn InteriorFaceIntegrator>>,
    boundary: Vec<MarkedBoundaryIntegrator>,
    interior_faces: Vec<InteriorFace>,
    boundary_faces: Vec<BoundaryFace>,
    ess_tdofs: Vec<usize>,
    ess_values: Vec<f64>,
}

impl MachNonlinearForm {
    pub fn new(space: SbpSpace) -> Self {
        let interior_faces = space.mesh().interior_faces();
        let boundary_faces = space.mesh().boundary_faces();
        Self {
            space,
            domain: Vec::new(),
            interior: Vec::new(),
            boundary: Vec::new(),
            interior_faces,
            boundary_faces,
            ess_tdofs: Vec::new(),
            ess_values: Vec::new(),
        }
    }

    pub fn space(&self) -> &SbpSpace {
        &self.space
    }

    pub fn size(&self) -> usize {
        self.space.size()
    }

    pub fn add_domain_integrator(&mut self, integrator: impl DomainIntegrator + 'static) {
        self.domain.push(Box::new(integrator));
    }

    pub fn add_interior_face_integrator(&mut self, integrator: impl InteriorFaceIntegrator + 'static) {
        self.interior.push(Box::new(integrator));
    }

    /// Adds a boundary integrator restricted to the given 1-based attributes, or applied on
    /// all boundary faces if `attributes` is `None`.
    ///
    /// # Panics
    ///
    /// Panics if an attribute is zero. Attributes read from options are checked with
    /// [`CartesianMesh::check_boundary_attributes`](crate::mesh::CartesianMesh::check_boundary_attributes)
    /// first.
    pub fn add_bdr_face_integrator(
        &mut self,
        integrator: impl BoundaryFaceIntegrator + 'static,
        attributes: Option<&[usize]>,
    ) {
        let marker = attributes.map(|attributes| {
            let len = attributes.iter().copied().max().unwrap_or(0);
            let mut marker = vec![false; len];
            for &attr in attributes {
                assert!(attr > 0, "boundary attributes are 1-based");
                marker[attr - 1] = true;
            }
            marker
        });
        self.boundary.push(MarkedBoundaryIntegrator {
            integrator: Box::new(integrator),
            marker,
        });
    }

    /// Reads `"ess-bdr"`, a list of 1-based boundary attributes whose nodes become
    /// essential degrees of freedom.
    pub fn set_options(&mut self, options: &serde_json::Value) -> Result<()> {
        if let Some(ess_bdr) = options.get("ess-bdr") {
            let attributes: Vec<usize> = serde_json::from_value(ess_bdr.clone())?;
            self.set_essential_boundaries(&attributes)?;
        }
        Ok(())
    }

    pub fn set_essential_boundaries(&mut self, attributes: &[usize]) -> Result<()> {
        self.space.mesh().check_boundary_attributes("ess-bdr", attributes)?;
        let n1 = self.space.sbp().num_nodes();
        let ns = self.space.num_states();
        let mut dofs = FxHashSet::default();
        for face in &self.boundary_faces {
            if !attributes.contains(&face.attribute) {
                continue;
            }
            let end = match face.side {
                Side::Lower => 0,
                Side::Upper => n1 - 1,
            };
            let offset = self.space.element_offset(face.element);
            for local in 0..self.space.nodes_per_element() {
                if self.space.node_multi_index(local)[face.axis] == end {
                    dofs.extend((0..ns).map(|s| offset + local * ns + s));
                }
            }
        }
        let mut dofs: Vec<usize> = dofs.into_iter().collect();
        dofs.sort_unstable();
        self.ess_values = vec![0.0; dofs.len()];
        self.ess_tdofs = dofs;
        Ok(())
    }

    /// Sorted indices of the essential degrees of freedom.
    pub fn essential_dofs(&self) -> &[usize] {
        &self.ess_tdofs
    }

    /// Sets the prescribed values `g` of the essential degrees of freedom from a full-size
    /// vector.
    pub fn set_essential_values(&mut self, values: &[f64]) {
        assert_eq!(values.len(), self.size());
        self.ess_values = self.ess_tdofs.iter().map(|&i| values[i]).collect();
    }

    /// Computes the residual `r = R(u)`.
    pub fn mult(&self, u: &[f64], r: &mut [f64]) {
        assert_eq!(u.len(), self.size(), "state has the wrong size");
        assert_eq!(r.len(), self.size(), "residual has the wrong size");
        r.fill(0.0);
        let space = &self.space;
        let m = space.element_size();

        if !self.domain.is_empty() {
            for element in space.mesh().elements() {
                let ctx = ElementContext { space, element };
                let u_e = space.element_slice(u, element.index);
                let r_e = space.element_slice_mut(r, element.index);
                for integrator in &self.domain {
                    integrator.assemble_element_vector(&ctx, u_e, r_e);
                }
            }
        }

        let mut r_face = vec![0.0; 2 * m];
        for face in &self.interior_faces {
            let ctx = self.interior_context(face);
            let u_left = space.element_slice(u, face.left);
            let u_right = space.element_slice(u, face.right);
            r_face.fill(0.0);
            for integrator in &self.interior {
                integrator.assemble_face_vector(&ctx, u_left, u_right, &mut r_face);
            }
            add_to(space.element_slice_mut(r, face.left), &r_face[..m]);
            add_to(space.element_slice_mut(r, face.right), &r_face[m..]);
        }

        for face in &self.boundary_faces {
            let ctx = self.boundary_context(face);
            let u_e = space.element_slice(u, face.element);
            let r_e = space.element_slice_mut(r, face.element);
            for marked in self.boundary.iter().filter(|b| b.applies_to(face.attribute)) {
                marked.integrator.assemble_face_vector(&ctx, u_e, r_e);
            }
        }

        for (&i, &g) in self.ess_tdofs.iter().zip(&self.ess_values) {
            r[i] = u[i] - g;
        }
    }

    /// Assembles the sparse Jacobian `dR/du`.
    pub fn gradient(&self, u: &[f64]) -> CsrMatrix<f64> {
        assert_eq!(u.len(), self.size(), "state has the wrong size");
        let space = &self.space;
        let n = self.size();
        let m = space.element_size();
        let mut coo = CooMatrix::new(n, n);
        let essential: FxHashSet<usize> = self.ess_tdofs.iter().copied().collect();
        let push_block = |coo: &mut CooMatrix<f64>, rows: usize, cols: usize, block: &DMatrix<f64>| {
            for j in 0..block.ncols() {
                for i in 0..block.nrows() {
                    let row = rows + i;
                    if block[(i, j)] != 0.0 && !essential.contains(&row) {
                        coo.push(row, cols + j, block[(i, j)]);
                    }
                }
            }
        };

        let mut faces_of_element = vec![Vec::new(); space.num_elements()];
        for face in &self.boundary_faces {
            faces_of_element[face.element].push(face);
        }

        let mut jac_e = DMatrix::zeros(m, m);
        for element in space.mesh().elements() {
            let ctx = ElementContext { space, element };
            let u_e = space.element_slice(u, element.index);
            jac_e.fill(0.0);
            for integrator in &self.domain {
                integrator.assemble_element_grad(&ctx, u_e, &mut jac_e);
            }
            for face in &faces_of_element[element.index] {
                let ctx = self.boundary_context(face);
                for marked in self.boundary.iter().filter(|b| b.applies_to(face.attribute)) {
                    marked.integrator.assemble_face_grad(&ctx, u_e, &mut jac_e);
                }
            }
            let offset = space.element_offset(element.index);
            push_block(&mut coo, offset, offset, &jac_e);
        }

        if !self.interior.is_empty() {
            let mut jac_f = DMatrix::zeros(2 * m, 2 * m);
            for face in &self.interior_faces {
                let ctx = self.interior_context(face);
                let u_left = space.element_slice(u, face.left);
                let u_right = space.element_slice(u, face.right);
                jac_f.fill(0.0);
                for integrator in &self.interior {
                    integrator.assemble_face_grad(&ctx, u_left, u_right, &mut jac_f);
                }
                let offsets = [space.element_offset(face.left), space.element_offset(face.right)];
                for (bi, &row_offset) in offsets.iter().enumerate() {
                    for (bj, &col_offset) in offsets.iter().enumerate() {
                        let block = jac_f.view((bi * m, bj * m), (m, m)).clone_owned();
                        push_block(&mut coo, row_offset, col_offset, &block);
                    }
                }
            }
        }

        for &i in &self.ess_tdofs {
            coo.push(i, i, 1.0);
        }
        CsrMatrix::from(&coo)
    }

    pub fn jacobian(&self, u: &[f64]) -> JacobianOperator {
        JacobianOperator::Sparse(self.gradient(u))
    }

    /// The transposed Jacobian, the operator of the adjoint system.
    pub fn jacobian_transpose(&self, u: &[f64]) -> JacobianOperator {
        JacobianOperator::Sparse(self.gradient(u).transpose())
    }

    /// Accumulates `jv += dR/du(u) v` without assembling the Jacobian.
    pub fn jacobian_vector_product(&self, u: &[f64], v: &[f64], jv: &mut [f64]) {
        assert_eq!(u.len(), self.size(), "state has the wrong size");
        assert_eq!(v.len(), self.size());
        assert_eq!(jv.len(), self.size());
        let space = &self.space;
        let m = space.element_size();
        let mut product = vec![0.0; self.size()];

        for element in space.mesh().elements() {
            let ctx = ElementContext { space, element };
            let u_e = space.element_slice(u, element.index);
            let v_e = space.element_slice(v, element.index);
            let p_e = space.element_slice_mut(&mut product, element.index);
            for integrator in &self.domain {
                integrator.element_directional_derivative(&ctx, u_e, v_e, p_e);
            }
        }

        if !self.interior.is_empty() {
            let mut u_face = vec![0.0; 2 * m];
            let mut v_face = vec![0.0; 2 * m];
            let mut p_face = vec![0.0; 2 * m];
            for face in &self.interior_faces {
                let ctx = self.interior_context(face);
                u_face[..m].copy_from_slice(space.element_slice(u, face.left));
                u_face[m..].copy_from_slice(space.element_slice(u, face.right));
                v_face[..m].copy_from_slice(space.element_slice(v, face.left));
                v_face[m..].copy_from_slice(space.element_slice(v, face.right));
                p_face.fill(0.0);
                for integrator in &self.interior {
                    integrator.face_directional_derivative(&ctx, &u_face, &v_face, &mut p_face);
                }
                add_to(space.element_slice_mut(&mut product, face.left), &p_face[..m]);
                add_to(space.element_slice_mut(&mut product, face.right), &p_face[m..]);
            }
        }

        for face in &self.boundary_faces {
            let ctx = self.boundary_context(face);
            let u_e = space.element_slice(u, face.element);
            let v_e = space.element_slice(v, face.element);
            let p_e = space.element_slice_mut(&mut product, face.element);
            for marked in self.boundary.iter().filter(|b| b.applies_to(face.attribute)) {
                marked.integrator.face_directional_derivative(&ctx, u_e, v_e, p_e);
            }
        }

        for &i in &self.ess_tdofs {
            product[i] = v[i];
        }
        add_to(jv, &product);
    }

    /// Sum of the integrator energies, the scalar output defined by the form.
    pub fn energy(&self, u: &[f64]) -> f64 {
        assert_eq!(u.len(), self.size(), "state has the wrong size");
        let space = &self.space;
        let mut energy = 0.0;
        for element in space.mesh().elements() {
            let ctx = ElementContext { space, element };
            let u_e = space.element_slice(u, element.index);
            energy += self
                .domain
                .iter()
                .map(|integrator| integrator.element_energy(&ctx, u_e))
                .sum::<f64>();
        }
        for face in &self.boundary_faces {
            let ctx = self.boundary_context(face);
            let u_e = space.element_slice(u, face.element);
            energy += self
                .boundary
                .iter()
                .filter(|b| b.applies_to(face.attribute))
                .map(|b| b.integrator.face_energy(&ctx, u_e))
                .sum::<f64>();
        }
        energy
    }

    /// Gradient of [`MachNonlinearForm::energy`] with respect to the state.
    pub fn energy_gradient(&self, u: &[f64], grad: &mut [f64]) {
        assert_eq!(u.len(), self.size(), "state has the wrong size");
        assert_eq!(grad.len(), self.size());
        grad.fill(0.0);
        let space = &self.space;
        for element in space.mesh().elements() {
            let ctx = ElementContext { space, element };
            let u_e = space.element_slice(u, element.index);
            let g_e = space.element_slice_mut(grad, element.index);
            for integrator in &self.domain {
                integrator.element_energy_gradient(&ctx, u_e, g_e);
            }
        }
        for face in &self.boundary_faces {
            let ctx = self.boundary_context(face);
            let u_e = space.element_slice(u, face.element);
            let g_e = space.element_slice_mut(grad, face.element);
            for marked in self.boundary.iter().filter(|b| b.applies_to(face.attribute)) {
                marked.integrator.face_energy_gradient(&ctx, u_e, g_e);
            }
        }
    }

    /// Computes `dR/dp` for the named scalar parameter into `dr`.
    ///
    /// Essential rows do not depend on parameters and are zero.
    pub fn scalar_sensitivity(&self, name: &str, u: &[f64], dr: &mut [f64]) -> Result<()> {
        assert_eq!(dr.len(), self.size());
        dr.fill(0.0);
        let space = &self.space;
        let mut recognized = false;
        for element in space.mesh().elements() {
            let ctx = ElementContext { space, element };
            let u_e = space.element_slice(u, element.index);
            let dr_e = space.element_slice_mut(dr, element.index);
            for integrator in &self.domain {
                recognized |= integrator.element_scalar_sensitivity(name, &ctx, u_e, dr_e);
            }
        }
        if !self.interior.is_empty() {
            let m = space.element_size();
            let mut dr_face = vec![0.0; 2 * m];
            for face in &self.interior_faces {
                let ctx = self.interior_context(face);
                let u_left = space.element_slice(u, face.left);
                let u_right = space.element_slice(u, face.right);
                dr_face.fill(0.0);
                for integrator in &self.interior {
                    recognized |= integrator.face_scalar_sensitivity(name, &ctx, u_left, u_right, &mut dr_face);
                }
                add_to(space.element_slice_mut(dr, face.left), &dr_face[..m]);
                add_to(space.element_slice_mut(dr, face.right), &dr_face[m..]);
            }
        }
        if !recognized {
            return Err(MachError::Unsupported(format!("sensitivity with respect to \"{}\"", name)));
        }
        for &i in &self.ess_tdofs {
            dr[i] = 0.0;
        }
        Ok(())
    }

    fn interior_context(&self, face: &InteriorFace) -> InteriorFaceContext {
        InteriorFaceContext {
            space: &self.space,
            left: self.space.mesh().element(face.left),
            right: self.space.mesh().element(face.right),
            axis: face.axis,
        }
    }

    fn boundary_context(&self, face: &BoundaryFace) -> BoundaryFaceContext {
        BoundaryFaceContext {
            space: &self.space,
            element: self.space.mesh().element(face.element),
            face: *face,
        }
    }
}

fn add_to(target: &mut [f64], values: &[f64]) {
    for (t, v) in target.iter_mut().zip(values) {
        *t += v;
    }
}
