//! Tensor-product SBP spaces on Cartesian meshes.
use crate::mesh::{CartesianMesh, Element};
use crate::sbp::SbpOperator;
use nalgebra::DVector;

/// A line of nodes along one axis of an element.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeLine {
    /// Local node indices, ordered along the axis.
    pub nodes: Vec<usize>,
    /// Product of the reference norm weights in the other axes.
    pub weight: f64,
}

/// Nodal space with `num_states` unknowns per node.
///
/// Degrees of freedom are stored element by element, node by node, with the states of a
/// node contiguous. Element data is therefore a contiguous slice of a global vector.
#[derive(Debug, Clone)]
pub struct SbpSpace {
    mesh: CartesianMesh,
    sbp: SbpOperator,
    num_states: usize,
    lines: Vec<Vec<NodeLine>>,
}

impl SbpSpace {
    pub fn new(mesh: CartesianMesh, sbp: SbpOperator, num_states: usize) -> Self {
        assert!(num_states > 0);
        let mut space = Self {
            mesh,
            sbp,
            num_states,
            lines: Vec::new(),
        };
        space.lines = (0..space.dim()).map(|axis| space.build_lines(axis)).collect();
        space
    }

    fn build_lines(&self, axis: usize) -> Vec<NodeLine> {
        let n1 = self.sbp.num_nodes();
        let w = self.sbp.weights();
        (0..self.nodes_per_element())
            .filter(|&local| self.node_multi_index(local)[axis] == 0)
            .map(|start| {
                let base = self.node_multi_index(start);
                let nodes = (0..n1)
                    .map(|i| {
                        let mut multi = base;
                        multi[axis] = i;
                        self.local_index(multi)
                    })
                    .collect();
                let weight = (0..self.dim())
                    .filter(|&l| l != axis)
                    .map(|l| w[base[l]])
                    .product();
                NodeLine { nodes, weight }
            })
            .collect()
    }

    pub fn mesh(&self) -> &CartesianMesh {
        &self.mesh
    }

    pub fn sbp(&self) -> &SbpOperator {
        &self.sbp
    }

    pub fn dim(&self) -> usize {
        self.mesh.dim()
    }

    pub fn num_states(&self) -> usize {
        self.num_states
    }

    pub fn num_elements(&self) -> usize {
        self.mesh.num_elements()
    }

    pub fn nodes_per_element(&self) -> usize {
        self.sbp.num_nodes().pow(self.dim() as u32)
    }

    pub fn element_size(&self) -> usize {
        self.nodes_per_element() * self.num_states
    }

    /// Number of scalar unknowns.
    pub fn size(&self) -> usize {
        self.num_elements() * self.element_size()
    }

    pub fn num_nodes(&self) -> usize {
        self.num_elements() * self.nodes_per_element()
    }

    pub fn element_offset(&self, element: usize) -> usize {
        element * self.element_size()
    }

    /// The element's part of a global vector.
    pub fn element_slice<'a>(&self, global: &'a [f64], element: usize) -> &'a [f64] {
        let offset = self.element_offset(element);
        &global[offset..offset + self.element_size()]
    }

    pub fn element_slice_mut<'a>(&self, global: &'a mut [f64], element: usize) -> &'a mut [f64] {
        let offset = self.element_offset(element);
        let size = self.element_size();
        &mut global[offset..offset + size]
    }

    pub fn node_multi_index(&self, local: usize) -> [usize; 3] {
        let n1 = self.sbp.num_nodes();
        let mut multi = [0; 3];
        let mut rest = local;
        for entry in multi.iter_mut().take(self.dim()) {
            *entry = rest % n1;
            rest /= n1;
        }
        multi
    }

    pub fn local_index(&self, multi: [usize; 3]) -> usize {
        let n1 = self.sbp.num_nodes();
        (0..self.dim()).rev().fold(0, |acc, k| acc * n1 + multi[k])
    }

    /// Lines of nodes along `axis`, the same for every element.
    pub fn lines(&self, axis: usize) -> &[NodeLine] {
        &self.lines[axis]
    }

    /// Product of the half widths of an element in every axis except `axis`.
    pub fn face_scaling(&self, element: &Element, axis: usize) -> f64 {
        (0..self.dim())
            .filter(|&l| l != axis)
            .map(|l| 0.5 * element.widths[l])
            .product()
    }

    /// Determinant of the reference-to-physical map of an element.
    pub fn jacobian_determinant(&self, element: &Element) -> f64 {
        (0..self.dim()).map(|k| 0.5 * element.widths[k]).product()
    }

    /// Reference norm weight of a node, the product of the 1D weights.
    pub fn reference_weight(&self, local: usize) -> f64 {
        let w = self.sbp.weights();
        let multi = self.node_multi_index(local);
        (0..self.dim()).map(|k| w[multi[k]]).product()
    }

    /// Diagonal mass (norm) entry of a node.
    pub fn node_weight(&self, element: &Element, local: usize) -> f64 {
        self.reference_weight(local) * self.jacobian_determinant(element)
    }

    pub fn node_coords(&self, element: &Element, local: usize) -> [f64; 3] {
        let multi = self.node_multi_index(local);
        let xi = self.sbp.nodes();
        let mut x = [0.0; 3];
        for k in 0..self.dim() {
            x[k] = element.origin[k] + 0.5 * (xi[multi[k]] + 1.0) * element.widths[k];
        }
        x
    }

    /// Diagonal of the mass matrix, repeated for every state.
    pub fn mass_diagonal(&self) -> DVector<f64> {
        let mut mass = DVector::zeros(self.size());
        let ns = self.num_states;
        for element in self.mesh.elements() {
            let offset = self.element_offset(element.index);
            for local in 0..self.nodes_per_element() {
                let weight = self.node_weight(&element, local);
                for s in 0..ns {
                    mass[offset + local * ns + s] = weight;
                }
            }
        }
        mass
    }

    /// Sets every node to `f(x)`, where `f` writes the states of the node at `x`.
    pub fn project(&self, state: &mut [f64], mut f: impl FnMut(&[f64], &mut [f64])) {
        assert_eq!(state.len(), self.size());
        let ns = self.num_states;
        let dim = self.dim();
        for element in self.mesh.elements() {
            let element_state = self.element_slice_mut(state, element.index);
            for local in 0..self.nodes_per_element() {
                let x = self.node_coords(&element, local);
                f(&x[..dim], &mut element_state[local * ns..(local + 1) * ns]);
            }
        }
    }
}
