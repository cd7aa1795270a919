//! Element, interface and boundary integrators of the entropy-stable Euler discretization.
use crate::flow::fluxes::{far_field_flux, slip_wall_flux, DissipativeFlux, FluxFunction, FluxKernel};
use crate::flow::variables::{apply_dqdw, entropy, entropy_vars, spectral_radius};
use crate::mesh::Side;
use crate::nonlinear_form::{
    BoundaryFaceContext, BoundaryFaceKernel, DomainKernel, ElementContext, InteriorFaceContext, InteriorFaceKernel,
    KernelScalar,
};
use crate::space::SbpSpace;

const MAX_STATES: usize = 5;

fn c<T: KernelScalar>(value: f64) -> T {
    T::from(value)
}

fn axis_direction<T: KernelScalar>(axis: usize, sign: f64) -> [T; 3] {
    let mut dir = [T::zero(); 3];
    dir[axis] = c(sign);
    dir
}

/// Interpolates the states of `line` with the weights `t` into `q_face`.
fn interpolate_line<T: KernelScalar>(t: &[f64], nodes: &[usize], u: &[T], ns: usize, q_face: &mut [T]) {
    q_face.fill(T::zero());
    for (&t_j, &node) in t.iter().zip(nodes) {
        if t_j != 0.0 {
            for k in 0..ns {
                q_face[k] = q_face[k] + c::<T>(t_j) * u[node * ns + k];
            }
        }
    }
}

/// Distributes `scale * t_j * flux` to the nodes of `line`.
fn distribute_line<T: KernelScalar>(t: &[f64], nodes: &[usize], scale: T, flux: &[T], ns: usize, r: &mut [T]) {
    for (&t_j, &node) in t.iter().zip(nodes) {
        if t_j != 0.0 {
            let weight = scale * c::<T>(t_j);
            for k in 0..ns {
                r[node * ns + k] = r[node * ns + k] + weight * flux[k];
            }
        }
    }
}

/// Skew-symmetric flux differencing `sum_j (Q - Q^T)_ij F(u_i, u_j)` along each axis.
#[derive(Debug, Clone, Copy)]
pub struct FluxDifferencingIntegrator {
    pub flux: FluxFunction,
}

impl DomainKernel for FluxDifferencingIntegrator {
    fn eval<T: KernelScalar>(&self, ctx: &ElementContext, u: &[T], r: &mut [T]) {
        let space = ctx.space;
        let dim = space.dim();
        let ns = space.num_states();
        let skew = space.sbp().skew();
        let n1 = space.sbp().num_nodes();
        let mut f = [T::zero(); MAX_STATES];

        for axis in 0..dim {
            let dir = axis_direction::<T>(axis, 1.0);
            let scale = space.face_scaling(&ctx.element, axis);
            for line in space.lines(axis) {
                let omega = line.weight * scale;
                for i in 0..n1 {
                    for j in (i + 1)..n1 {
                        let s_ij = skew[(i, j)];
                        if s_ij == 0.0 {
                            continue;
                        }
                        let (a, b) = (line.nodes[i], line.nodes[j]);
                        self.flux.two_point(
                            &dir[..dim],
                            &u[a * ns..(a + 1) * ns],
                            &u[b * ns..(b + 1) * ns],
                            &mut f[..ns],
                        );
                        let weight = c::<T>(omega * s_ij);
                        for k in 0..ns {
                            r[a * ns + k] = r[a * ns + k] + weight * f[k];
                            r[b * ns + k] = r[b * ns + k] - weight * f[k];
                        }
                    }
                }
            }
        }
    }
}

/// Two-point flux between neighboring elements with Lax-Friedrichs dissipation scaled by
/// `iface-coeff`.
#[derive(Debug, Clone, Copy)]
pub struct InterfaceIntegrator {
    pub flux: DissipativeFlux,
}

impl InteriorFaceKernel for InterfaceIntegrator {
    fn eval<T: KernelScalar>(
        &self,
        ctx: &InteriorFaceContext,
        u_left: &[T],
        u_right: &[T],
        r_left: &mut [T],
        r_right: &mut [T],
    ) {
        let space = ctx.space;
        let dim = space.dim();
        let ns = space.num_states();
        let t_right = space.sbp().face_interpolation(true).as_slice();
        let t_left = space.sbp().face_interpolation(false).as_slice();
        let dir = axis_direction::<T>(ctx.axis, 1.0);
        let scale = space.face_scaling(&ctx.left, ctx.axis);

        let mut q = [T::zero(); 2 * MAX_STATES];
        let mut f = [T::zero(); MAX_STATES];
        for line in space.lines(ctx.axis) {
            interpolate_line(t_right, &line.nodes, u_left, ns, &mut q[..ns]);
            interpolate_line(t_left, &line.nodes, u_right, ns, &mut q[ns..2 * ns]);
            self.flux.eval(&dir[..dim], &q[..2 * ns], &mut f[..ns]);
            let omega = c::<T>(line.weight * scale);
            distribute_line(t_right, &line.nodes, omega, &f[..ns], ns, r_left);
            distribute_line(t_left, &line.nodes, -omega, &f[..ns], ns, r_right);
        }
    }
}

/// Loops over the node lines of a boundary face, handing the interpolated state, the
/// outward direction and the face weight to `face_flux`.
fn boundary_face_loop<T: KernelScalar>(
    ctx: &BoundaryFaceContext,
    u: &[T],
    r: &mut [T],
    mut face_flux: impl FnMut(&[T], &[T], &mut [T]),
) {
    let space = ctx.space;
    let dim = space.dim();
    let ns = space.num_states();
    let axis = ctx.face.axis;
    let t = space.sbp().face_interpolation(ctx.face.side == Side::Upper).as_slice();
    let dir = axis_direction::<T>(axis, ctx.face.side.sign());
    let scale = space.face_scaling(&ctx.element, axis);

    let mut q = [T::zero(); MAX_STATES];
    let mut f = [T::zero(); MAX_STATES];
    for line in space.lines(axis) {
        interpolate_line(t, &line.nodes, u, ns, &mut q[..ns]);
        face_flux(&dir[..dim], &q[..ns], &mut f[..ns]);
        distribute_line(t, &line.nodes, c::<T>(line.weight * scale), &f[..ns], ns, r);
    }
}

/// Inviscid wall: the only flux through the boundary is the pressure.
#[derive(Debug, Clone, Copy)]
pub struct SlipWallIntegrator;

impl BoundaryFaceKernel for SlipWallIntegrator {
    fn eval<T: KernelScalar>(&self, ctx: &BoundaryFaceContext, u: &[T], r: &mut [T]) {
        boundary_face_loop(ctx, u, r, |dir, q, f| slip_wall_flux(dir, q, f));
    }
}

/// Far-field boundary with the free-stream state imposed weakly.
#[derive(Debug, Clone)]
pub struct FarFieldIntegrator {
    pub q_far: Vec<f64>,
}

impl BoundaryFaceKernel for FarFieldIntegrator {
    fn eval<T: KernelScalar>(&self, ctx: &BoundaryFaceContext, u: &[T], r: &mut [T]) {
        boundary_face_loop(ctx, u, r, |dir, q, f| far_field_flux(dir, q, &self.q_far, f));
    }
}

/// Pressure force on a wall projected on `direction` and divided by `scale`.
///
/// Used as the energy of a boundary form, so it has no residual contribution.
#[derive(Debug, Clone)]
pub struct PressureForceIntegrator {
    pub direction: Vec<f64>,
    pub scale: f64,
}

impl BoundaryFaceKernel for PressureForceIntegrator {
    fn eval<T: KernelScalar>(&self, _ctx: &BoundaryFaceContext, _u: &[T], _r: &mut [T]) {}

    fn energy<T: KernelScalar>(&self, ctx: &BoundaryFaceContext, u: &[T]) -> T {
        let mut force = T::zero();
        let mut r = vec![T::zero(); u.len()];
        // The slip-wall flux is (0, p n, 0), so the momentum residual carries the force
        boundary_face_loop(ctx, u, &mut r, |dir, q, f| slip_wall_flux(dir, q, f));
        let ns = ctx.space.num_states();
        for node in 0..u.len() / ns {
            for (i, &d) in self.direction.iter().enumerate() {
                force = force + r[node * ns + 1 + i] * c::<T>(d);
            }
        }
        force / c::<T>(self.scale)
    }
}

/// Local-projection stabilization `c L^T H diag(lambda A0) L w` on the entropy variables,
/// where `L = I - P` removes the part of `w` representable at one degree lower.
#[derive(Debug, Clone, Copy)]
pub struct LpsIntegrator {
    pub coeff: f64,
}

impl LpsIntegrator {
    /// Applies `L = I - P` to nodal data with `ns` components per node, or its transpose.
    fn apply_filter<T: KernelScalar>(space: &SbpSpace, input: &[T], output: &mut [T], ns: usize, transpose: bool) {
        let projection = space.sbp().projection();
        let n1 = space.sbp().num_nodes();
        let mut projected = input.to_vec();
        let mut buffer = vec![T::zero(); input.len()];
        for axis in 0..space.dim() {
            buffer.fill(T::zero());
            for line in space.lines(axis) {
                for i in 0..n1 {
                    for j in 0..n1 {
                        let p_ij = if transpose { projection[(j, i)] } else { projection[(i, j)] };
                        if p_ij == 0.0 {
                            continue;
                        }
                        let (a, b) = (line.nodes[i], line.nodes[j]);
                        for k in 0..ns {
                            buffer[a * ns + k] = buffer[a * ns + k] + c::<T>(p_ij) * projected[b * ns + k];
                        }
                    }
                }
            }
            std::mem::swap(&mut projected, &mut buffer);
        }
        for ((out, &x), &px) in output.iter_mut().zip(input).zip(&projected) {
            *out = x - px;
        }
    }
}

impl DomainKernel for LpsIntegrator {
    fn eval<T: KernelScalar>(&self, ctx: &ElementContext, u: &[T], r: &mut [T]) {
        let space = ctx.space;
        if self.coeff == 0.0 || space.sbp().degree() == 0 {
            return;
        }
        let dim = space.dim();
        let ns = space.num_states();
        let num_nodes = space.nodes_per_element();

        let mut w = vec![T::zero(); u.len()];
        for node in 0..num_nodes {
            entropy_vars(&u[node * ns..(node + 1) * ns], &mut w[node * ns..(node + 1) * ns]);
        }
        let mut lw = vec![T::zero(); u.len()];
        Self::apply_filter(space, &w, &mut lw, ns, false);

        // Scale by H, the averaged spectral radius and dq/dw at every node
        let mut scaled = vec![T::zero(); u.len()];
        for node in 0..num_nodes {
            let q = &u[node * ns..(node + 1) * ns];
            let mut lambda = T::zero();
            for axis in 0..dim {
                let mut dir = [T::zero(); 3];
                dir[axis] = c(space.face_scaling(&ctx.element, axis));
                lambda = lambda + spectral_radius(&dir[..dim], q);
            }
            lambda = lambda / c::<T>(dim as f64);
            let weight = c::<T>(self.coeff * space.reference_weight(node)) * lambda;
            apply_dqdw(q, &lw[node * ns..(node + 1) * ns], &mut scaled[node * ns..(node + 1) * ns]);
            for value in &mut scaled[node * ns..(node + 1) * ns] {
                *value = *value * weight;
            }
        }

        let mut contribution = vec![T::zero(); u.len()];
        Self::apply_filter(space, &scaled, &mut contribution, ns, true);
        for (r_i, c_i) in r.iter_mut().zip(&contribution) {
            *r_i = *r_i + *c_i;
        }
    }
}

/// Integral of the mathematical entropy, used as the energy of an output form.
#[derive(Debug, Clone, Copy)]
pub struct EntropyIntegrator;

impl DomainKernel for EntropyIntegrator {
    fn eval<T: KernelScalar>(&self, _ctx: &ElementContext, _u: &[T], _r: &mut [T]) {}

    fn energy<T: KernelScalar>(&self, ctx: &ElementContext, u: &[T]) -> T {
        let space = ctx.space;
        let ns = space.num_states();
        (0..space.nodes_per_element()).fold(T::zero(), |acc, node| {
            let weight = c::<T>(space.node_weight(&ctx.element, node));
            acc + weight * entropy(&u[node * ns..(node + 1) * ns])
        })
    }
}
