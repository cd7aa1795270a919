//! One-dimensional diagonal-norm summation-by-parts operators.
//!
//! Multidimensional operators are tensor products of these, see [`crate::space::SbpSpace`].
use crate::error::{MachError, Result};
use nalgebra::{DMatrix, DVector};
use std::f64::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SbpFamily {
    /// Legendre-Gauss-Lobatto nodes, which include the element end points.
    Lobatto,
    /// Legendre-Gauss nodes; face values are interpolated.
    Gauss,
}

impl SbpFamily {
    /// Maps the `basis-type` option to an operator family.
    pub fn from_basis_type(basis_type: &str) -> Result<Self> {
        match basis_type {
            "csbp" => Ok(Self::Lobatto),
            "dsbp" => Ok(Self::Gauss),
            other => Err(MachError::UnknownOption {
                key: "space-dis.basis-type".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// A diagonal-norm SBP operator on `[-1, 1]` exact for polynomials of degree `p`.
///
/// The operator satisfies `Q + Q^T = t_R t_R^T - t_L t_L^T` where `Q = H D` and
/// `t_L`, `t_R` interpolate nodal values to the left and right end points.
#[derive(Debug, Clone, PartialEq)]
pub struct SbpOperator {
    degree: usize,
    family: SbpFamily,
    nodes: DVector<f64>,
    weights: DVector<f64>,
    derivative: DMatrix<f64>,
    q: DMatrix<f64>,
    skew: DMatrix<f64>,
    t_left: DVector<f64>,
    t_right: DVector<f64>,
    projection: DMatrix<f64>,
}

impl SbpOperator {
    pub fn new(degree: usize, family: SbpFamily) -> Self {
        let (nodes, weights) = match (family, degree) {
            (_, 0) => (DVector::from_element(1, 0.0), DVector::from_element(1, 2.0)),
            (SbpFamily::Lobatto, p) => lobatto_nodes_and_weights(p),
            (SbpFamily::Gauss, p) => gauss_nodes_and_weights(p + 1),
        };
        let n = nodes.len();
        let bary = barycentric_weights(&nodes);

        let mut derivative = DMatrix::zeros(n, n);
        for i in 0..n {
            let mut diag = 0.0;
            for j in 0..n {
                if i != j {
                    let d_ij = (bary[j] / bary[i]) / (nodes[i] - nodes[j]);
                    derivative[(i, j)] = d_ij;
                    diag -= d_ij;
                }
            }
            derivative[(i, i)] = diag;
        }

        let q = DMatrix::from_diagonal(&weights) * &derivative;
        let skew = &q - q.transpose();
        let t_left = interpolation_row(&nodes, &bary, -1.0);
        let t_right = interpolation_row(&nodes, &bary, 1.0);
        let projection = legendre_projection(&nodes, &weights, degree);

        Self {
            degree,
            family,
            nodes,
            weights,
            derivative,
            q,
            skew,
            t_left,
            t_right,
            projection,
        }
    }

    pub fn lobatto(degree: usize) -> Self {
        Self::new(degree, SbpFamily::Lobatto)
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn family(&self) -> SbpFamily {
        self.family
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> &DVector<f64> {
        &self.nodes
    }

    /// Diagonal of the norm matrix `H`.
    pub fn weights(&self) -> &DVector<f64> {
        &self.weights
    }

    pub fn derivative(&self) -> &DMatrix<f64> {
        &self.derivative
    }

    pub fn q(&self) -> &DMatrix<f64> {
        &self.q
    }

    /// The skew-symmetric part `Q - Q^T`.
    pub fn skew(&self) -> &DMatrix<f64> {
        &self.skew
    }

    /// Interpolation to the end point on the given side (`t_L` or `t_R`).
    pub fn face_interpolation(&self, upper: bool) -> &DVector<f64> {
        if upper {
            &self.t_right
        } else {
            &self.t_left
        }
    }

    /// The `H`-orthogonal projection onto polynomials of degree `p - 1`.
    ///
    /// For degree zero this is the zero matrix, so `I - P` is the identity.
    pub fn projection(&self) -> &DMatrix<f64> {
        &self.projection
    }
}

/// Evaluates the Legendre polynomial `P_n` and its derivative at `x`.
pub fn legendre(n: usize, x: f64) -> (f64, f64) {
    let (mut p_prev, mut p) = (1.0, x);
    if n == 0 {
        return (1.0, 0.0);
    }
    for k in 2..=n {
        let k = k as f64;
        let p_next = ((2.0 * k - 1.0) * x * p - (k - 1.0) * p_prev) / k;
        p_prev = p;
        p = p_next;
    }
    let n_f = n as f64;
    let dp = if (x.abs() - 1.0).abs() < 1e-14 {
        x.signum().powi(n as i32 + 1) * 0.5 * n_f * (n_f + 1.0)
    } else {
        n_f * (x * p - p_prev) / (x * x - 1.0)
    };
    (p, dp)
}

fn lobatto_nodes_and_weights(p: usize) -> (DVector<f64>, DVector<f64>) {
    let n = p + 1;
    let pf = p as f64;
    let mut nodes = DVector::from_fn(n, |i, _| -(PI * i as f64 / pf).cos());
    for _ in 0..100 {
        let mut max_update: f64 = 0.0;
        for i in 1..p {
            let x = nodes[i];
            let (p_n, _) = legendre(p, x);
            let (p_nm1, _) = legendre(p - 1, x);
            // Newton on (1 - x^2) P_p'(x), written in terms of P_p and P_{p-1}
            let update = (x * p_n - p_nm1) / ((pf + 1.0) * p_n);
            nodes[i] = x - update;
            max_update = max_update.max(update.abs());
        }
        if max_update < 1e-15 {
            break;
        }
    }
    let weights = nodes.map(|x| {
        let (p_n, _) = legendre(p, x);
        2.0 / (pf * (pf + 1.0) * p_n * p_n)
    });
    (nodes, weights)
}

fn gauss_nodes_and_weights(n: usize) -> (DVector<f64>, DVector<f64>) {
    let nf = n as f64;
    let mut nodes = DVector::from_fn(n, |i, _| -(PI * (i as f64 + 0.75) / (nf + 0.5)).cos());
    for i in 0..n {
        for _ in 0..100 {
            let (p, dp) = legendre(n, nodes[i]);
            let update = p / dp;
            nodes[i] -= update;
            if update.abs() < 1e-15 {
                break;
            }
        }
    }
    let weights = nodes.map(|x| {
        let (_, dp) = legendre(n, x);
        2.0 / ((1.0 - x * x) * dp * dp)
    });
    (nodes, weights)
}

fn barycentric_weights(nodes: &DVector<f64>) -> DVector<f64> {
    let n = nodes.len();
    DVector::from_fn(n, |j, _| {
        let prod: f64 = (0..n)
            .filter(|&k| k != j)
            .map(|k| nodes[j] - nodes[k])
            .product();
        1.0 / prod
    })
}

/// Row vector of Lagrange basis values `l_j(x)`.
fn interpolation_row(nodes: &DVector<f64>, bary: &DVector<f64>, x: f64) -> DVector<f64> {
    let n = nodes.len();
    if let Some(k) = nodes.iter().position(|&x_k| (x_k - x).abs() < 1e-14) {
        let mut row = DVector::zeros(n);
        row[k] = 1.0;
        return row;
    }
    let terms = DVector::from_fn(n, |j, _| bary[j] / (x - nodes[j]));
    let sum = terms.sum();
    terms / sum
}

fn legendre_projection(nodes: &DVector<f64>, weights: &DVector<f64>, degree: usize) -> DMatrix<f64> {
    let n = nodes.len();
    if degree == 0 {
        return DMatrix::zeros(n, n);
    }
    let v = DMatrix::from_fn(n, degree, |i, k| legendre(k, nodes[i]).0);
    let h = DMatrix::from_diagonal(weights);
    let vth = v.transpose() * &h;
    // V^T H V is diagonal and positive for Legendre polynomials up to degree p - 1
    let gram_inv = DMatrix::from_diagonal(&(&vth * &v).diagonal().map(|g| 1.0 / g));
    v * gram_inv * vth
}
