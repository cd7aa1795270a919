//! Numerical flux functions for the Euler equations.
//!
//! Fluxes are directional: `dir` is a (not necessarily unit) vector and the flux is the
//! normal flux through a face with area-weighted normal `dir`. Two-point fluxes satisfy
//! `F(a, b, -n) = -F(b, a, n)`.
use crate::error::{MachError, Result};
use crate::flow::variables::{pressure, spectral_radius, GAMI, GAMMA};
use crate::nonlinear_form::KernelScalar;
use nalgebra::DMatrix;
use num_dual::Dual64;
use numeric_literals::replace_float_literals;

fn c<T: KernelScalar>(value: f64) -> T {
    T::from(value)
}

/// Analytical Euler flux `f(q) . dir`.
pub fn euler_flux<T: KernelScalar>(dir: &[T], q: &[T], flux: &mut [T]) {
    let dim = q.len() - 2;
    let rho = q[0];
    let p = pressure(q);
    let mut u_n = T::zero();
    for i in 0..dim {
        u_n = u_n + q[i + 1] * dir[i];
    }
    u_n = u_n / rho;
    flux[0] = rho * u_n;
    for i in 0..dim {
        flux[i + 1] = q[i + 1] * u_n + p * dir[i];
    }
    flux[dim + 1] = (q[dim + 1] + p) * u_n;
}

/// Arithmetic mean of the Euler fluxes of the two states.
#[replace_float_literals(T::from(literal))]
pub fn central_flux<T: KernelScalar>(dir: &[T], q_l: &[T], q_r: &[T], flux: &mut [T]) {
    let n = q_l.len();
    let mut f_r = [T::zero(); 5];
    euler_flux(dir, q_l, flux);
    euler_flux(dir, q_r, &mut f_r[..n]);
    for i in 0..n {
        flux[i] = 0.5 * (flux[i] + f_r[i]);
    }
}

/// Logarithmic mean `(a_l - a_r) / (ln a_l - ln a_r)`, evaluated stably when the
/// arguments are close.
pub fn log_average<T: KernelScalar>(a_l: T, a_r: T) -> T {
    let xi = a_l / a_r;
    let f = (xi - T::one()) / (xi + T::one());
    let u = f * f;
    let big_f = if u.re() < 1e-2 {
        T::one() + u * (c::<T>(1.0 / 3.0) + u * (c::<T>(0.2) + u * (c::<T>(1.0 / 7.0) + u / c::<T>(9.0))))
    } else {
        xi.ln() / (c::<T>(2.0) * f)
    };
    (a_l + a_r) / (c::<T>(2.0) * big_f)
}

/// The entropy-conservative flux of Ismail and Roe.
pub fn ismail_roe_flux<T: KernelScalar>(dir: &[T], q_l: &[T], q_r: &[T], flux: &mut [T]) {
    let dim = q_l.len() - 2;
    let p_l = pressure(q_l);
    let p_r = pressure(q_r);
    let z0_l = (q_l[0] / p_l).sqrt();
    let z0_r = (q_r[0] / p_r).sqrt();
    let zp_l = (q_l[0] * p_l).sqrt();
    let zp_r = (q_r[0] * p_r).sqrt();

    let z0_sum = z0_l + z0_r;
    let zp_avg = log_average(zp_l, zp_r);
    let rho_hat = c::<T>(0.5) * z0_sum * zp_avg;

    let mut u_hat = [T::zero(); 3];
    let mut u_n = T::zero();
    let mut u_hat2 = T::zero();
    for i in 0..dim {
        u_hat[i] = (z0_l * q_l[i + 1] / q_l[0] + z0_r * q_r[i + 1] / q_r[0]) / z0_sum;
        u_n = u_n + u_hat[i] * dir[i];
        u_hat2 = u_hat2 + u_hat[i] * u_hat[i];
    }
    let p1 = (zp_l + zp_r) / z0_sum;
    let p2 = (c::<T>(GAMMA + 1.0) * zp_avg / log_average(z0_l, z0_r) + c::<T>(GAMI) * (zp_l + zp_r) / z0_sum)
        / c::<T>(2.0 * GAMMA);
    let h_hat = c::<T>(GAMMA) * p2 / (rho_hat * c::<T>(GAMI)) + c::<T>(0.5) * u_hat2;

    flux[0] = rho_hat * u_n;
    for i in 0..dim {
        flux[i + 1] = rho_hat * u_n * u_hat[i] + p1 * dir[i];
    }
    flux[dim + 1] = rho_hat * h_hat * u_n;
}

/// Adds the local Lax-Friedrichs dissipation `coeff / 2 * lambda_max * (q_l - q_r)`.
pub fn add_lax_friedrichs_dissipation<T: KernelScalar>(coeff: f64, dir: &[T], q_l: &[T], q_r: &[T], flux: &mut [T]) {
    let lambda_l = spectral_radius(dir, q_l);
    let lambda_r = spectral_radius(dir, q_r);
    let lambda = if lambda_l.re() > lambda_r.re() { lambda_l } else { lambda_r };
    let scale = c::<T>(0.5 * coeff) * lambda;
    for i in 0..q_l.len() {
        flux[i] = flux[i] + scale * (q_l[i] - q_r[i]);
    }
}

/// Inviscid wall flux: only pressure acts through the wall.
pub fn slip_wall_flux<T: KernelScalar>(dir: &[T], q: &[T], flux: &mut [T]) {
    let dim = q.len() - 2;
    let p = pressure(q);
    flux[0] = T::zero();
    for i in 0..dim {
        flux[i + 1] = p * dir[i];
    }
    flux[dim + 1] = T::zero();
}

/// Characteristic-free far-field flux: central flux against the far-field state plus
/// Lax-Friedrichs dissipation.
pub fn far_field_flux<T: KernelScalar>(dir: &[T], q: &[T], q_far: &[f64], flux: &mut [T]) {
    let n = q.len();
    let mut q_bnd = [T::zero(); 5];
    for i in 0..n {
        q_bnd[i] = c::<T>(q_far[i]);
    }
    central_flux(dir, q, &q_bnd[..n], flux);
    add_lax_friedrichs_dissipation(1.0, dir, q, &q_bnd[..n], flux);
}

/// The two-point flux used for volume and interface terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FluxFunction {
    /// Central average of the analytical fluxes.
    Euler,
    /// Ismail-Roe entropy-conservative flux.
    IsmailRoe,
}

impl FluxFunction {
    /// Maps the `flux-fun` option to a flux.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "Euler" => Ok(Self::Euler),
            "IR" => Ok(Self::IsmailRoe),
            other => Err(MachError::UnknownOption {
                key: "space-dis.flux-fun".to_string(),
                value: other.to_string(),
            }),
        }
    }

    pub fn two_point<T: KernelScalar>(&self, dir: &[T], q_l: &[T], q_r: &[T], flux: &mut [T]) {
        match self {
            Self::Euler => central_flux(dir, q_l, q_r, flux),
            Self::IsmailRoe => ismail_roe_flux(dir, q_l, q_r, flux),
        }
    }
}

/// A flux of one or more states, used to differentiate flux functions uniformly.
///
/// `q` holds the states the flux depends on, one after another; the flux has `dir.len() + 2`
/// components.
pub trait FluxKernel {
    fn eval<T: KernelScalar>(&self, dir: &[T], q: &[T], flux: &mut [T]);
}

impl FluxKernel for FluxFunction {
    fn eval<T: KernelScalar>(&self, dir: &[T], q: &[T], flux: &mut [T]) {
        let (q_l, q_r) = q.split_at(q.len() / 2);
        self.two_point(dir, q_l, q_r, flux);
    }
}

/// The analytical flux of a single state.
#[derive(Debug, Clone, Copy)]
pub struct AnalyticalFlux;

impl FluxKernel for AnalyticalFlux {
    fn eval<T: KernelScalar>(&self, dir: &[T], q: &[T], flux: &mut [T]) {
        euler_flux(dir, q, flux);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SlipWallFlux;

impl FluxKernel for SlipWallFlux {
    fn eval<T: KernelScalar>(&self, dir: &[T], q: &[T], flux: &mut [T]) {
        slip_wall_flux(dir, q, flux);
    }
}

#[derive(Debug, Clone)]
pub struct FarFieldFlux {
    pub q_far: Vec<f64>,
}

impl FluxKernel for FarFieldFlux {
    fn eval<T: KernelScalar>(&self, dir: &[T], q: &[T], flux: &mut [T]) {
        far_field_flux(dir, q, &self.q_far, flux);
    }
}

/// Two-point flux with Lax-Friedrichs dissipation scaled by `coeff`.
#[derive(Debug, Clone, Copy)]
pub struct DissipativeFlux {
    pub flux: FluxFunction,
    pub coeff: f64,
}

impl FluxKernel for DissipativeFlux {
    fn eval<T: KernelScalar>(&self, dir: &[T], q: &[T], flux: &mut [T]) {
        let (q_l, q_r) = q.split_at(q.len() / 2);
        self.flux.two_point(dir, q_l, q_r, flux);
        if self.coeff != 0.0 {
            add_lax_friedrichs_dissipation(self.coeff, dir, q_l, q_r, flux);
        }
    }
}

fn dual_dir(dir: &[f64]) -> Vec<Dual64> {
    dir.iter().map(|&d| Dual64::from(d)).collect()
}

/// Jacobian of the flux with respect to the states, of size `(dim + 2) x q.len()`.
pub fn calc_flux_jac_state<K: FluxKernel>(kernel: &K, dir: &[f64], q: &[f64]) -> DMatrix<f64> {
    let n_out = dir.len() + 2;
    let dir = dual_dir(dir);
    let mut q_dual: Vec<Dual64> = q.iter().map(|&x| Dual64::from(x)).collect();
    let mut flux = vec![Dual64::from(0.0); n_out];
    let mut jac = DMatrix::zeros(n_out, q.len());
    for j in 0..q.len() {
        q_dual[j] = Dual64::new(q[j], 1.0);
        kernel.eval(&dir, &q_dual, &mut flux);
        for i in 0..n_out {
            jac[(i, j)] = flux[i].eps;
        }
        q_dual[j] = Dual64::from(q[j]);
    }
    jac
}

/// Jacobian of the flux with respect to the direction, of size `(dim + 2) x dim`.
pub fn calc_flux_jac_dir<K: FluxKernel>(kernel: &K, dir: &[f64], q: &[f64]) -> DMatrix<f64> {
    let n_out = dir.len() + 2;
    let q_dual: Vec<Dual64> = q.iter().map(|&x| Dual64::from(x)).collect();
    let mut dir_dual = dual_dir(dir);
    let mut flux = vec![Dual64::from(0.0); n_out];
    let mut jac = DMatrix::zeros(n_out, dir.len());
    for j in 0..dir.len() {
        dir_dual[j] = Dual64::new(dir[j], 1.0);
        kernel.eval(&dir_dual, &q_dual, &mut flux);
        for i in 0..n_out {
            jac[(i, j)] = flux[i].eps;
        }
        dir_dual[j] = Dual64::from(dir[j]);
    }
    jac
}

/// Evaluates a flux kernel on `f64` data.
pub fn calc_flux<K: FluxKernel>(kernel: &K, dir: &[f64], q: &[f64]) -> Vec<f64> {
    let mut flux = vec![0.0; dir.len() + 2];
    kernel.eval(dir, q, &mut flux);
    flux
}
