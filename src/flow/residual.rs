use crate::error::{MachError, Result};
use crate::flow::fluxes::{DissipativeFlux, FluxFunction};
use crate::flow::integrators::{
    EntropyIntegrator, FarFieldIntegrator, FluxDifferencingIntegrator, InterfaceIntegrator, LpsIntegrator,
    PressureForceIntegrator, SlipWallIntegrator,
};
use crate::flow::variables::{entropy_vars, free_stream_state, spectral_radius};
use crate::inputs::{check_size, MachInputs};
use crate::mesh::CartesianMesh;
use crate::nonlinear_form::MachNonlinearForm;
use crate::operator::JacobianOperator;
use crate::options::{section, with_defaults, FlowParamOptions, SpaceDisOptions};
use crate::output::{FunctionalOutput, MachOutput};
use crate::residual::{apply_jacobian_transpose_add, Residual};
use crate::sbp::{SbpFamily, SbpOperator};
use crate::space::SbpSpace;
use log::debug;
use serde::Deserialize;
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Boundary groups of the `"bcs"` option.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct FlowBoundaryConditions {
    #[serde(default)]
    far_field: Vec<usize>,
    #[serde(default)]
    slip_wall: Vec<usize>,
}

impl FlowBoundaryConditions {
    fn from_options(bcs: Option<&serde_json::Value>) -> Result<Self> {
        let bcs = match bcs {
            None => return Ok(Self::default()),
            Some(bcs) => bcs,
        };
        let groups: BTreeMap<String, serde_json::Value> = serde_json::from_value(bcs.clone())?;
        let mut conditions = Self::default();
        for (name, attributes) in groups {
            match name.as_str() {
                "far-field" => conditions.far_field = serde_json::from_value(attributes)?,
                "slip-wall" => conditions.slip_wall = serde_json::from_value(attributes)?,
                // Periodicity is a property of the mesh
                "periodic" => {}
                other => {
                    return Err(MachError::UnknownOption {
                        key: "bcs".to_string(),
                        value: other.to_string(),
                    })
                }
            }
        }
        Ok(conditions)
    }
}

/// Options of the `drag` and `lift` outputs.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
struct ForceOutputOptions {
    /// Boundary attributes to integrate over; the slip walls if absent.
    #[serde(default)]
    boundaries: Option<Vec<usize>>,
}

/// The semi-discrete Euler equations `R(q)` in conservative variables.
///
/// The residual is the sum of skew-symmetric flux differencing in the elements, a
/// two-point interface flux with Lax-Friedrichs dissipation, weakly imposed boundary
/// conditions and local-projection stabilization. With the Ismail-Roe flux and both
/// dissipation coefficients zero the scheme conserves entropy on periodic meshes.
///
/// The residual is defined so that `M dq/dt + R(q) = 0`, where `M` is the diagonal
/// mass matrix.
pub struct FlowResidual {
    flow: FlowParamOptions,
    space_dis: SpaceDisOptions,
    bcs: FlowBoundaryConditions,
    q_far: Vec<f64>,
    form: MachNonlinearForm,
    entropy_form: MachNonlinearForm,
    mass: JacobianOperator,
    state: Vec<f64>,
    implicit: bool,
    jacobian: Option<JacobianOperator>,
}

impl FlowResidual {
    /// Builds the residual from the option document (merged over the defaults) and a mesh.
    pub fn new(options: &serde_json::Value, mesh: CartesianMesh) -> Result<Self> {
        let options = with_defaults(options);
        let flow: FlowParamOptions = section(&options, "flow-param")?;
        let space_dis: SpaceDisOptions = section(&options, "space-dis")?;
        if flow.viscous {
            return Err(MachError::Unsupported("viscous flow terms".to_string()));
        }
        if flow.entropy_state {
            return Err(MachError::Unsupported("entropy variables as state".to_string()));
        }
        let dim = mesh.dim();
        if flow.roll_axis >= dim || (dim > 1 && flow.pitch_axis >= dim) {
            return Err(MachError::UnknownOption {
                key: "flow-param.roll-axis".to_string(),
                value: format!("{}/{}", flow.roll_axis, flow.pitch_axis),
            });
        }

        let family = SbpFamily::from_basis_type(&space_dis.basis_type)?;
        let flux = FluxFunction::from_name(&space_dis.flux_fun)?;
        let bcs = FlowBoundaryConditions::from_options(options.get("bcs"))?;
        mesh.check_boundary_attributes("bcs", &bcs.far_field)?;
        mesh.check_boundary_attributes("bcs", &bcs.slip_wall)?;
        let sbp = SbpOperator::new(space_dis.degree, family);
        let space = SbpSpace::new(mesh, sbp, dim + 2);
        let q_far = free_stream_state(dim, flow.mach, flow.aoa.to_radians(), flow.roll_axis, flow.pitch_axis);

        let mut form = MachNonlinearForm::new(space.clone());
        form.add_domain_integrator(FluxDifferencingIntegrator { flux });
        form.add_interior_face_integrator(InterfaceIntegrator {
            flux: DissipativeFlux {
                flux,
                coeff: space_dis.iface_coeff,
            },
        });
        if space_dis.lps_coeff != 0.0 {
            form.add_domain_integrator(LpsIntegrator {
                coeff: space_dis.lps_coeff,
            });
        }
        if !bcs.far_field.is_empty() {
            form.add_bdr_face_integrator(FarFieldIntegrator { q_far: q_far.clone() }, Some(bcs.far_field.as_slice()));
        }
        if !bcs.slip_wall.is_empty() {
            form.add_bdr_face_integrator(SlipWallIntegrator, Some(bcs.slip_wall.as_slice()));
        }
        form.set_options(&options)?;

        let mut entropy_form = MachNonlinearForm::new(space.clone());
        entropy_form.add_domain_integrator(EntropyIntegrator);

        let mass = JacobianOperator::Diagonal(space.mass_diagonal());
        let state = vec![0.0; space.size()];
        debug!(
            "Flow residual: {} elements, degree {}, {} unknowns",
            space.num_elements(),
            space_dis.degree,
            space.size()
        );
        Ok(Self {
            flow,
            space_dis,
            bcs,
            q_far,
            form,
            entropy_form,
            mass,
            state,
            implicit: true,
            jacobian: None,
        })
    }

    pub fn space(&self) -> &SbpSpace {
        self.form.space()
    }

    pub fn form(&self) -> &MachNonlinearForm {
        &self.form
    }

    pub fn space_dis_options(&self) -> &SpaceDisOptions {
        &self.space_dis
    }

    /// The free-stream conservative state.
    pub fn free_stream(&self) -> &[f64] {
        &self.q_far
    }

    /// Sets every node of `state` to the free stream.
    pub fn set_free_stream(&self, state: &mut [f64]) {
        self.space().project(state, |_, q| q.copy_from_slice(&self.q_far));
    }

    /// Norm-weighted L2 error between `state` and the exact solution `u_exact`, in the
    /// state component `entry`, or in all components if `entry` is `None`.
    pub fn calc_conservative_vars_l2_error(
        &self,
        state: &[f64],
        mut u_exact: impl FnMut(&[f64], &mut [f64]),
        entry: Option<usize>,
    ) -> f64 {
        let space = self.space();
        assert_eq!(state.len(), space.size(), "state has the wrong size");
        let ns = space.num_states();
        let dim = space.dim();
        let mut exact = vec![0.0; ns];
        let mut error = 0.0;
        for element in space.mesh().elements() {
            let u_e = space.element_slice(state, element.index);
            for local in 0..space.nodes_per_element() {
                let x = space.node_coords(&element, local);
                u_exact(&x[..dim], &mut exact);
                let weight = space.node_weight(&element, local);
                let q = &u_e[local * ns..(local + 1) * ns];
                error += match entry {
                    Some(k) => weight * (q[k] - exact[k]).powi(2),
                    None => weight * q.iter().zip(&exact).map(|(a, b)| (a - b).powi(2)).sum::<f64>(),
                };
            }
        }
        error.sqrt()
    }

    /// Node coordinates, `dim` values per node in degree of freedom order.
    fn mesh_coords(&self) -> Vec<f64> {
        let space = self.space();
        let dim = space.dim();
        let mut coords = Vec::with_capacity(space.num_nodes() * dim);
        for element in space.mesh().elements() {
            for local in 0..space.nodes_per_element() {
                coords.extend_from_slice(&space.node_coords(&element, local)[..dim]);
            }
        }
        coords
    }

    fn force_output(&self, direction: Vec<f64>, options: &serde_json::Value) -> Result<Box<dyn MachOutput>> {
        let opts: ForceOutputOptions = if options.is_null() {
            ForceOutputOptions::default()
        } else {
            serde_json::from_value(options.clone())?
        };
        let boundaries = opts.boundaries.unwrap_or_else(|| self.bcs.slip_wall.clone());
        self.space()
            .mesh()
            .check_boundary_attributes("boundaries", &boundaries)?;
        let mut form = MachNonlinearForm::new(self.space().clone());
        form.add_bdr_face_integrator(
            PressureForceIntegrator {
                direction,
                scale: 0.5 * self.flow.mach * self.flow.mach,
            },
            Some(boundaries.as_slice()),
        );
        Ok(Box::new(FunctionalOutput::new(form)))
    }
}

impl Residual for FlowResidual {
    fn size(&self) -> usize {
        self.form.size()
    }

    /// Recognizes `"implicit"`; the Jacobian is only available to implicit time marching
    /// and steady solves.
    fn set_options(&mut self, options: &serde_json::Value) -> Result<()> {
        if let Some(implicit) = options.get("implicit") {
            self.implicit = serde_json::from_value(implicit.clone())?;
        }
        self.form.set_options(options)
    }

    fn set_inputs(&mut self, inputs: &MachInputs) -> Result<()> {
        if let Some(state) = inputs.field("state")? {
            check_size(self.size(), state.len())?;
            self.state.copy_from_slice(state);
            self.jacobian = None;
        }
        if let Some(coords) = inputs.field("mesh_coords")? {
            let current = self.mesh_coords();
            check_size(current.len(), coords.len())?;
            if current.iter().zip(coords).any(|(a, b)| a != b) {
                return Err(MachError::Unsupported("mesh motion on a Cartesian mesh".to_string()));
            }
        }
        Ok(())
    }

    fn evaluate(&mut self, inputs: &MachInputs, res: &mut [f64]) -> Result<()> {
        self.set_inputs(inputs)?;
        check_size(self.size(), res.len())?;
        self.form.mult(&self.state, res);
        Ok(())
    }

    fn jacobian(&mut self, inputs: &MachInputs, wrt: &str) -> Result<&JacobianOperator> {
        self.set_inputs(inputs)?;
        if wrt != "state" {
            return Err(MachError::Unsupported(format!("flow Jacobian with respect to \"{}\"", wrt)));
        }
        if !self.implicit {
            return Err(MachError::Unsupported(
                "Jacobian of a residual configured for explicit time marching".to_string(),
            ));
        }
        let jacobian = self.form.jacobian(&self.state);
        Ok(&*self.jacobian.insert(jacobian))
    }

    fn calc_entropy(&mut self, inputs: &MachInputs) -> Result<f64> {
        self.set_inputs(inputs)?;
        Ok(self.entropy_form.energy(&self.state))
    }

    /// Computes `-w^T R(q + dt dq/dt)` with the entropy variables `w` of `q + dt dq/dt`,
    /// the rate of change of the total entropy.
    fn calc_entropy_change(&mut self, inputs: &MachInputs) -> Result<f64> {
        self.set_inputs(inputs)?;
        let state_dot = inputs.require_field("state_dot")?;
        check_size(self.size(), state_dot.len())?;
        let dt = inputs.scalar("dt")?.unwrap_or(0.0);

        let work: Vec<f64> = self
            .state
            .iter()
            .zip(state_dot)
            .map(|(q, dq)| q + dt * dq)
            .collect();
        let mut res = vec![0.0; self.size()];
        self.form.mult(&work, &mut res);

        let ns = self.space().num_states();
        let mut w = vec![0.0; ns];
        let mut change = 0.0;
        for (q, r) in work.chunks_exact(ns).zip(res.chunks_exact(ns)) {
            entropy_vars(q, &mut w);
            change -= w.iter().zip(r).map(|(w_k, r_k)| w_k * r_k).sum::<f64>();
        }
        Ok(change)
    }

    fn jacobian_vector_product(&mut self, wrt: &str, wrt_dot: &[f64], res_dot: &mut [f64]) -> Result<()> {
        if wrt != "state" {
            return Err(MachError::Unsupported(format!("flow Jacobian with respect to \"{}\"", wrt)));
        }
        check_size(self.size(), wrt_dot.len())?;
        check_size(self.size(), res_dot.len())?;
        self.form.jacobian_vector_product(&self.state, wrt_dot, res_dot);
        Ok(())
    }

    fn vector_jacobian_product(&mut self, wrt: &str, res_bar: &[f64], wrt_bar: &mut [f64]) -> Result<()> {
        if wrt != "state" {
            return Err(MachError::Unsupported(format!("flow Jacobian with respect to \"{}\"", wrt)));
        }
        check_size(self.size(), res_bar.len())?;
        check_size(self.size(), wrt_bar.len())?;
        let jacobian = self.form.jacobian(&self.state);
        apply_jacobian_transpose_add(&jacobian, res_bar, wrt_bar);
        Ok(())
    }

    /// No scalar input enters the inviscid residual, so every name is unknown.
    fn scalar_vector_jacobian_product(&mut self, wrt: &str, res_bar: &[f64]) -> Result<f64> {
        check_size(self.size(), res_bar.len())?;
        Err(MachError::UnknownInput(wrt.to_string()))
    }

    fn block_size(&self) -> usize {
        self.space().element_size()
    }

    fn mass_matrix(&self) -> Cow<'_, JacobianOperator> {
        Cow::Borrowed(&self.mass)
    }

    /// Minimum over elements of `cfl * |dx|^2 / lambda(dx, q)` for every pair of distinct
    /// nodes of the element.
    fn min_cfl_time_step(&mut self, cfl: f64, state: &[f64]) -> Result<f64> {
        let space = self.space();
        check_size(space.size(), state.len())?;
        let dim = space.dim();
        let ns = space.num_states();
        let num_nodes = space.nodes_per_element();
        let mut dt_min = f64::INFINITY;
        for element in space.mesh().elements() {
            let u_e = space.element_slice(state, element.index);
            if num_nodes == 1 {
                // A single node: use the element widths as spacing
                let q = &u_e[..ns];
                for axis in 0..dim {
                    let mut dx = [0.0; 3];
                    dx[axis] = element.widths[axis];
                    let lambda = spectral_radius(&dx[..dim], q);
                    dt_min = dt_min.min(cfl * dx[axis] * dx[axis] / lambda);
                }
                continue;
            }
            for i in 0..num_nodes {
                let x_i = space.node_coords(&element, i);
                let q = &u_e[i * ns..(i + 1) * ns];
                for j in (0..num_nodes).filter(|&j| j != i) {
                    let x_j = space.node_coords(&element, j);
                    let mut dx = [0.0; 3];
                    for k in 0..dim {
                        dx[k] = x_i[k] - x_j[k];
                    }
                    let dist2: f64 = dx[..dim].iter().map(|d| d * d).sum();
                    let lambda = spectral_radius(&dx[..dim], q);
                    dt_min = dt_min.min(cfl * dist2 / lambda);
                }
            }
        }
        Ok(dt_min)
    }

    /// Creates `"entropy"`, `"drag"` or `"lift"`.
    ///
    /// Forces are integrated over the slip walls unless the options list `"boundaries"`,
    /// and are divided by the free-stream dynamic pressure.
    fn create_output(&self, name: &str, options: &serde_json::Value) -> Result<Box<dyn MachOutput>> {
        let dim = self.space().dim();
        let aoa = self.flow.aoa.to_radians();
        let (roll, pitch) = (self.flow.roll_axis, self.flow.pitch_axis);
        match name {
            "entropy" => {
                let mut form = MachNonlinearForm::new(self.space().clone());
                form.add_domain_integrator(EntropyIntegrator);
                Ok(Box::new(FunctionalOutput::new(form)))
            }
            "drag" => {
                let mut direction = vec![0.0; dim];
                direction[roll] = aoa.cos();
                if dim > 1 {
                    direction[pitch] = aoa.sin();
                }
                self.force_output(direction, options)
            }
            "lift" if dim > 1 => {
                let mut direction = vec![0.0; dim];
                direction[roll] = -aoa.sin();
                direction[pitch] = aoa.cos();
                self.force_output(direction, options)
            }
            other => Err(MachError::UnknownOutput(other.to_string())),
        }
    }
}
