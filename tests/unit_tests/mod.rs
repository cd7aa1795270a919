mod inputs;
mod load;
mod mesh;
mod nonlinear_form;
mod ode;
mod operator;
mod sbp;
mod solver;
mod thermal;

use mach::mesh::CartesianMesh;
use serde_json::{json, Value};

/// Options of an entropy-conserving discretization on a fully periodic mesh.
pub fn periodic_flow_options(degree: usize) -> Value {
    json!({
        "flow-param": { "mach": 0.5, "aoa": 0.0 },
        "space-dis": {
            "degree": degree,
            "lps-coeff": 0.0,
            "iface-coeff": 0.0,
            "flux-fun": "IR"
        }
    })
}

pub fn periodic_mesh(cells: &[usize]) -> CartesianMesh {
    let axes: Vec<usize> = (0..cells.len()).collect();
    CartesianMesh::unit_box(cells).with_periodic_axes(&axes)
}

/// A smooth, admissible perturbation of the free stream.
pub fn vortex_like_state(x: &[f64], q: &mut [f64]) {
    use std::f64::consts::PI;
    let dim = x.len();
    let phase: f64 = x.iter().map(|x_k| (2.0 * PI * x_k).sin()).sum();
    let rho = 1.0 + 0.1 * phase;
    q[0] = rho;
    let mut u2 = 0.0;
    for k in 0..dim {
        let u_k = 0.3 + 0.05 * (2.0 * PI * x[(k + 1) % dim]).cos();
        q[k + 1] = rho * u_k;
        u2 += u_k * u_k;
    }
    let p = 1.0 / 1.4 + 0.05 * phase;
    q[dim + 1] = p / 0.4 + 0.5 * rho * u2;
}
