//! Axis-aligned tensor-product meshes.
use crate::error::{MachError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Lower,
    Upper,
}

impl Side {
    /// Sign of the outward normal along the face axis.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Lower => -1.0,
            Side::Upper => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Element {
    pub index: usize,
    /// Lower corner of the element. Entries beyond the mesh dimension are zero.
    pub origin: [f64; 3],
    /// Edge lengths. Entries beyond the mesh dimension are one.
    pub widths: [f64; 3],
}

/// A face shared by two elements. `left` lies on the lower side along `axis`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InteriorFace {
    pub left: usize,
    pub right: usize,
    pub axis: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryFace {
    pub element: usize,
    pub axis: usize,
    pub side: Side,
    /// 1-based boundary attribute.
    pub attribute: usize,
}

/// Uniform Cartesian mesh on a box in one, two or three dimensions.
///
/// Elements are numbered with the first axis running fastest. Boundary attributes follow
/// the usual numbering of generated Cartesian meshes:
///
/// - 1D: `1` at x-min, `2` at x-max.
/// - 2D: `1` bottom, `2` right, `3` top, `4` left.
/// - 3D: `1` z-min, `2` y-min, `3` x-max, `4` y-max, `5` x-min, `6` z-max.
///
/// Periodic axes have no boundary faces; the last and first element along the axis share
/// an interior face instead.
#[derive(Debug, Clone, PartialEq)]
pub struct CartesianMesh {
    dim: usize,
    cells: [usize; 3],
    lower: [f64; 3],
    upper: [f64; 3],
    periodic: [bool; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MeshOptions {
    pub num_cells: Vec<usize>,
    #[serde(default)]
    pub lower: Option<Vec<f64>>,
    #[serde(default)]
    pub upper: Option<Vec<f64>>,
    #[serde(default)]
    pub periodic: Vec<usize>,
}

impl CartesianMesh {
    /// Mesh of `[lower, upper]` with the given number of cells along each axis.
    ///
    /// # Panics
    ///
    /// Panics if the dimension is not 1, 2 or 3, if any cell count is zero or if the
    /// box is degenerate.
    pub fn new(cells: &[usize], lower: &[f64], upper: &[f64]) -> Self {
        let dim = cells.len();
        assert!((1..=3).contains(&dim), "mesh dimension must be 1, 2 or 3");
        assert_eq!(lower.len(), dim);
        assert_eq!(upper.len(), dim);
        let mut mesh = Self {
            dim,
            cells: [1; 3],
            lower: [0.0; 3],
            upper: [1.0; 3],
            periodic: [false; 3],
        };
        for k in 0..dim {
            assert!(cells[k] > 0, "number of cells must be positive");
            assert!(upper[k] > lower[k], "upper bound must exceed lower bound");
            mesh.cells[k] = cells[k];
            mesh.lower[k] = lower[k];
            mesh.upper[k] = upper[k];
        }
        mesh
    }

    /// Mesh of the unit box `[0, 1]^dim`.
    pub fn unit_box(cells: &[usize]) -> Self {
        let dim = cells.len();
        Self::new(cells, &vec![0.0; dim], &vec![1.0; dim])
    }

    pub fn with_periodic_axes(mut self, axes: &[usize]) -> Self {
        for &axis in axes {
            assert!(axis < self.dim, "periodic axis out of range");
            self.periodic[axis] = true;
        }
        self
    }

    /// Mesh described by a `"mesh"` option section.
    pub fn from_options(options: &serde_json::Value) -> Result<Self> {
        let opts: MeshOptions = serde_json::from_value(options.clone())?;
        let dim = opts.num_cells.len();
        if !(1..=3).contains(&dim) || opts.num_cells.contains(&0) {
            return Err(MachError::UnknownOption {
                key: "mesh.num-cells".to_string(),
                value: format!("{:?}", opts.num_cells),
            });
        }
        let lower = opts.lower.unwrap_or_else(|| vec![0.0; dim]);
        let upper = opts.upper.unwrap_or_else(|| vec![1.0; dim]);
        if lower.len() != dim || upper.len() != dim {
            return Err(MachError::SizeMismatch {
                expected: dim,
                actual: lower.len().min(upper.len()),
            });
        }
        if opts.periodic.iter().any(|&axis| axis >= dim) {
            return Err(MachError::UnknownOption {
                key: "mesh.periodic".to_string(),
                value: format!("{:?}", opts.periodic),
            });
        }
        Ok(Self::new(&opts.num_cells, &lower, &upper).with_periodic_axes(&opts.periodic))
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn cells(&self) -> &[usize] {
        &self.cells[..self.dim]
    }

    pub fn is_periodic(&self, axis: usize) -> bool {
        self.periodic[axis]
    }

    pub fn num_elements(&self) -> usize {
        self.cells().iter().product()
    }

    pub fn volume(&self) -> f64 {
        (0..self.dim).map(|k| self.upper[k] - self.lower[k]).product()
    }

    fn cell_width(&self, axis: usize) -> f64 {
        (self.upper[axis] - self.lower[axis]) / self.cells[axis] as f64
    }

    /// Multi-index of an element.
    pub fn element_cell(&self, index: usize) -> [usize; 3] {
        let [nx, ny, _] = self.cells;
        [index % nx, (index / nx) % ny, index / (nx * ny)]
    }

    fn element_index(&self, cell: [usize; 3]) -> usize {
        cell[0] + self.cells[0] * (cell[1] + self.cells[1] * cell[2])
    }

    pub fn element(&self, index: usize) -> Element {
        assert!(index < self.num_elements(), "element index out of bounds");
        let cell = self.element_cell(index);
        let mut origin = [0.0; 3];
        let mut widths = [1.0; 3];
        for k in 0..self.dim {
            widths[k] = self.cell_width(k);
            origin[k] = self.lower[k] + cell[k] as f64 * widths[k];
        }
        Element { index, origin, widths }
    }

    pub fn elements(&self) -> impl Iterator<Item = Element> + '_ {
        (0..self.num_elements()).map(move |i| self.element(i))
    }

    pub fn interior_faces(&self) -> Vec<InteriorFace> {
        let mut faces = Vec::new();
        for axis in 0..self.dim {
            let n = self.cells[axis];
            for left in 0..self.num_elements() {
                let mut cell = self.element_cell(left);
                if cell[axis] + 1 < n {
                    cell[axis] += 1;
                } else if self.periodic[axis] {
                    cell[axis] = 0;
                } else {
                    continue;
                }
                faces.push(InteriorFace {
                    left,
                    right: self.element_index(cell),
                    axis,
                });
            }
        }
        faces
    }

    pub fn boundary_faces(&self) -> Vec<BoundaryFace> {
        let mut faces = Vec::new();
        for axis in 0..self.dim {
            if self.periodic[axis] {
                continue;
            }
            let n = self.cells[axis];
            for element in 0..self.num_elements() {
                let cell = self.element_cell(element);
                for (side, at_boundary) in [(Side::Lower, cell[axis] == 0), (Side::Upper, cell[axis] + 1 == n)] {
                    if at_boundary {
                        faces.push(BoundaryFace {
                            element,
                            axis,
                            side,
                            attribute: boundary_attribute(self.dim, axis, side),
                        });
                    }
                }
            }
        }
        faces
    }

    /// The largest boundary attribute used by meshes of this dimension.
    pub fn max_boundary_attribute(&self) -> usize {
        2 * self.dim
    }

    /// Checks that every attribute names a face of the box, reporting the first bad one
    /// under the option `key`.
    pub fn check_boundary_attributes(&self, key: &str, attributes: &[usize]) -> Result<()> {
        let max_attr = self.max_boundary_attribute();
        match attributes.iter().find(|&&a| a == 0 || a > max_attr) {
            Some(bad) => Err(MachError::UnknownOption {
                key: key.to_string(),
                value: bad.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// Boundary attribute of the box face normal to `axis` on the given side.
pub fn boundary_attribute(dim: usize, axis: usize, side: Side) -> usize {
    use Side::*;
    match (dim, axis, side) {
        (1, 0, Lower) => 1,
        (1, 0, Upper) => 2,
        (2, 1, Lower) => 1,
        (2, 0, Upper) => 2,
        (2, 1, Upper) => 3,
        (2, 0, Lower) => 4,
        (3, 2, Lower) => 1,
        (3, 1, Lower) => 2,
        (3, 0, Upper) => 3,
        (3, 1, Upper) => 4,
        (3, 0, Lower) => 5,
        (3, 2, Upper) => 6,
        _ => panic!("no boundary attribute for axis {} in {} dimensions", axis, dim),
    }
}
