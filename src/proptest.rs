use crate::flow::variables::GAMI;
use ::proptest::prelude::*;

/// Admissible conservative states `(rho, rho u, e)` in `dim` dimensions.
pub fn flow_state(dim: usize) -> impl Strategy<Value = Vec<f64>> {
    // Keep density and pressure away from zero so that entropy variables stay well scaled
    let velocity = prop::collection::vec(-2.0..2.0, dim);
    (0.2..2.0, velocity, 0.2..2.0).prop_map(move |(rho, u, p): (f64, Vec<f64>, f64)| {
        let u2: f64 = u.iter().map(|u_i| u_i * u_i).sum();
        let mut q = Vec::with_capacity(dim + 2);
        q.push(rho);
        q.extend(u.iter().map(|u_i| rho * u_i));
        q.push(p / GAMI + 0.5 * rho * u2);
        q
    })
}

/// Nonzero face directions (scaled normals) in `dim` dimensions.
pub fn direction(dim: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-2.0..2.0, dim)
        .prop_filter("direction must be nonzero", |d: &Vec<f64>| {
            d.iter().map(|d_i| d_i * d_i).sum::<f64>() > 1e-4
        })
}
