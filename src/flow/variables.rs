//! Thermodynamic relations and variable transformations for the Euler equations.
//!
//! States are slices `[rho, rho*u_1, ..., rho*u_d, e]` of length `d + 2`. All functions are
//! generic over the scalar so that they can be differentiated with dual numbers.
use crate::nonlinear_form::KernelScalar;
use numeric_literals::replace_float_literals;

/// Ratio of specific heats.
pub const GAMMA: f64 = 1.4;
/// `GAMMA - 1`.
pub const GAMI: f64 = GAMMA - 1.0;

fn c<T: KernelScalar>(value: f64) -> T {
    T::from(value)
}

/// Squared velocity magnitude.
pub fn velocity_squared<T: KernelScalar>(q: &[T]) -> T {
    let dim = q.len() - 2;
    let rho = q[0];
    (1..=dim).fold(T::zero(), |acc, i| acc + q[i] * q[i]) / (rho * rho)
}

#[replace_float_literals(T::from(literal))]
pub fn pressure<T: KernelScalar>(q: &[T]) -> T {
    let dim = q.len() - 2;
    let rho = q[0];
    let kinetic = (1..=dim).fold(T::zero(), |acc, i| acc + q[i] * q[i]) / rho;
    c::<T>(GAMI) * (q[dim + 1] - 0.5 * kinetic)
}

pub fn speed_of_sound<T: KernelScalar>(q: &[T]) -> T {
    (c::<T>(GAMMA) * pressure(q) / q[0]).sqrt()
}

/// Mathematical entropy `S = -rho s / (gamma - 1)` with `s = ln(p / rho^gamma)`.
pub fn entropy<T: KernelScalar>(q: &[T]) -> T {
    let rho = q[0];
    let s = (pressure(q) / rho.powf(GAMMA)).ln();
    -rho * s / c::<T>(GAMI)
}

/// Entropy variables `w = dS/dq`.
#[replace_float_literals(T::from(literal))]
pub fn entropy_vars<T: KernelScalar>(q: &[T], w: &mut [T]) {
    let dim = q.len() - 2;
    assert_eq!(w.len(), q.len());
    let rho = q[0];
    let p = pressure(q);
    let s = (p / rho.powf(GAMMA)).ln();
    let vel2 = velocity_squared(q);
    w[0] = (c::<T>(GAMMA) - s) / c::<T>(GAMI) - 0.5 * vel2 * rho / p;
    for i in 1..=dim {
        w[i] = q[i] / p;
    }
    w[dim + 1] = -rho / p;
}

/// Inverse of [`entropy_vars`].
pub fn conservative_vars<T: KernelScalar>(w: &[T], q: &mut [T]) {
    let dim = w.len() - 2;
    assert_eq!(w.len(), q.len());
    let w_last = w[dim + 1];
    let mut vel2 = T::zero();
    for i in 1..=dim {
        let u_i = -w[i] / w_last;
        vel2 = vel2 + u_i * u_i;
    }
    let s = c::<T>(GAMMA) + c::<T>(GAMI) * (c::<T>(0.5) * vel2 * w_last - w[0]);
    let rho = (-(-s).exp() / w_last).powf(1.0 / GAMI);
    let p = -rho / w_last;
    q[0] = rho;
    for i in 1..=dim {
        q[i] = -rho * w[i] / w_last;
    }
    q[dim + 1] = p / c::<T>(GAMI) + c::<T>(0.5) * rho * vel2;
}

/// Spectral radius `|u . dir| + a |dir|` of the flux Jacobian in direction `dir`.
pub fn spectral_radius<T: KernelScalar>(dir: &[T], q: &[T]) -> T {
    let dim = q.len() - 2;
    assert_eq!(dir.len(), dim);
    let rho = q[0];
    let mut u_n = T::zero();
    let mut dir_norm2 = T::zero();
    for i in 0..dim {
        u_n = u_n + q[i + 1] * dir[i];
        dir_norm2 = dir_norm2 + dir[i] * dir[i];
    }
    abs(u_n / rho) + speed_of_sound(q) * dir_norm2.sqrt()
}

/// Product `(dq/dw) v` of the change of variables Jacobian with `v`.
///
/// `dq/dw` is symmetric positive definite for admissible states.
pub fn apply_dqdw<T: KernelScalar>(q: &[T], v: &[T], out: &mut [T]) {
    let dim = q.len() - 2;
    let rho = q[0];
    let e = q[dim + 1];
    let p = pressure(q);
    let rho_h = e + p;
    let a2 = c::<T>(GAMMA) * p / rho;
    let h = rho_h / rho;

    let mut q_dot_v = T::zero();
    for i in 1..=dim {
        q_dot_v = q_dot_v + q[i] * v[i];
    }
    out[0] = rho * v[0] + q_dot_v + e * v[dim + 1];
    for j in 0..dim {
        let u_j = q[j + 1] / rho;
        out[j + 1] = q[j + 1] * v[0] + u_j * q_dot_v + p * v[j + 1] + q[j + 1] * h * v[dim + 1];
    }
    out[dim + 1] = e * v[0] + h * q_dot_v + (rho * h * h - a2 * p / c::<T>(GAMI)) * v[dim + 1];
}

/// Free-stream conservative state with unit density.
///
/// The velocity has magnitude `mach` and makes the angle `aoa` (radians) with the
/// `roll_axis`, rotating towards the `pitch_axis`.
pub fn free_stream_state(dim: usize, mach: f64, aoa: f64, roll_axis: usize, pitch_axis: usize) -> Vec<f64> {
    let mut q = vec![0.0; dim + 2];
    q[0] = 1.0;
    q[roll_axis + 1] = mach * aoa.cos();
    if dim > 1 {
        q[pitch_axis + 1] = mach * aoa.sin();
    }
    q[dim + 1] = 1.0 / (GAMMA * GAMI) + 0.5 * mach * mach;
    q
}

/// Absolute value that keeps the derivative of the branch taken.
pub fn abs<T: KernelScalar>(x: T) -> T {
    if x.re() < 0.0 {
        -x
    } else {
        x
    }
}

/// Whether the state has positive density and pressure.
pub fn is_admissible(q: &[f64]) -> bool {
    q[0] > 0.0 && pressure(q) > 0.0
}
