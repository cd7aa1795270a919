//! Steady nonlinear heat conduction, `-div(k(u) grad u) = g` with `k(u) = k0 (1 + beta u)`.
//!
//! The operator is discretized with a symmetric interior penalty method on the same SBP
//! spaces as the flow equations. Essential boundaries are imposed strongly.
use crate::error::{MachError, Result};
use crate::inputs::{check_size, MachInputs};
use crate::load::MachLoad;
use crate::mesh::CartesianMesh;
use crate::nonlinear_form::{DomainKernel, ElementContext, InteriorFaceContext, InteriorFaceKernel, KernelScalar, MachNonlinearForm};
use crate::operator::JacobianOperator;
use crate::options::{section, ThermalOptions};
use crate::output::{IEAggregateFunctional, MachOutput, StateAverageFunctional, VolumeFunctional};
use crate::residual::{apply_jacobian_transpose_add, Residual};
use crate::sbp::SbpOperator;
use crate::space::SbpSpace;
use std::borrow::Cow;
use std::cell::Cell;
use std::rc::Rc;

fn conductivity<T: KernelScalar>(k0: f64, beta: f64, u: T) -> T {
    T::from(k0) * (T::one() + T::from(beta) * u)
}

/// Volume term `D^T H K(u) D u`, summed over the axes.
#[derive(Debug, Clone)]
pub struct ConductionIntegrator {
    k0: Rc<Cell<f64>>,
    beta: f64,
}

impl ConductionIntegrator {
    fn residual<T: KernelScalar>(&self, k0: f64, ctx: &ElementContext, u: &[T], r: &mut [T]) {
        let space = ctx.space;
        let sbp = space.sbp();
        let d = sbp.derivative();
        let w = sbp.weights();
        let n1 = sbp.num_nodes();
        let jacobian_determinant = space.jacobian_determinant(&ctx.element);
        for axis in 0..space.dim() {
            let to_physical = 2.0 / ctx.element.widths[axis];
            for line in space.lines(axis) {
                for i in 0..n1 {
                    let mut gradient = T::zero();
                    for j in 0..n1 {
                        if d[(i, j)] != 0.0 {
                            gradient = gradient + T::from(d[(i, j)] * to_physical) * u[line.nodes[j]];
                        }
                    }
                    let weight = w[i] * line.weight * jacobian_determinant;
                    let flux = T::from(weight) * conductivity(k0, self.beta, u[line.nodes[i]]) * gradient;
                    for a in 0..n1 {
                        if d[(i, a)] != 0.0 {
                            let node = line.nodes[a];
                            r[node] = r[node] + T::from(d[(i, a)] * to_physical) * flux;
                        }
                    }
                }
            }
        }
    }
}

impl DomainKernel for ConductionIntegrator {
    fn eval<T: KernelScalar>(&self, ctx: &ElementContext, u: &[T], r: &mut [T]) {
        self.residual(self.k0.get(), ctx, u, r);
    }

    fn scalar_sensitivity(&self, name: &str, ctx: &ElementContext, u: &[f64], dr: &mut [f64]) -> bool {
        if name != "conductivity" {
            return false;
        }
        // The term is linear in k0
        self.residual(1.0, ctx, u, dr);
        true
    }
}

/// Symmetric interior penalty coupling of neighboring elements.
#[derive(Debug, Clone)]
pub struct InteriorPenaltyIntegrator {
    k0: Rc<Cell<f64>>,
    beta: f64,
    penalty: f64,
}

impl InteriorPenaltyIntegrator {
    fn residual<T: KernelScalar>(
        &self,
        k0: f64,
        ctx: &InteriorFaceContext,
        u_left: &[T],
        u_right: &[T],
        r_left: &mut [T],
        r_right: &mut [T],
    ) {
        let space = ctx.space;
        let sbp = space.sbp();
        let n1 = sbp.num_nodes();
        let d = sbp.derivative();
        let t_upper = sbp.face_interpolation(true);
        let t_lower = sbp.face_interpolation(false);
        let h = ctx.left.widths[ctx.axis];
        let to_physical = 2.0 / h;
        let p = sbp.degree();
        let sigma = if p == 0 {
            // Two-point flux between cell centers
            1.0 / h
        } else {
            self.penalty * ((p + 1) * (p + 1)) as f64 / h
        };
        // Normal derivative at the face, as a row acting on the nodes of a line
        let dn_upper: Vec<f64> = (0..n1)
            .map(|j| (0..n1).map(|i| t_upper[i] * d[(i, j)]).sum::<f64>() * to_physical)
            .collect();
        let dn_lower: Vec<f64> = (0..n1)
            .map(|j| (0..n1).map(|i| t_lower[i] * d[(i, j)]).sum::<f64>() * to_physical)
            .collect();
        let scale = space.face_scaling(&ctx.left, ctx.axis);

        for line in space.lines(ctx.axis) {
            let mut u_l = T::zero();
            let mut du_l = T::zero();
            let mut u_r = T::zero();
            let mut du_r = T::zero();
            for (j, &node) in line.nodes.iter().enumerate() {
                u_l = u_l + T::from(t_upper[j]) * u_left[node];
                du_l = du_l + T::from(dn_upper[j]) * u_left[node];
                u_r = u_r + T::from(t_lower[j]) * u_right[node];
                du_r = du_r + T::from(dn_lower[j]) * u_right[node];
            }
            let k_l = conductivity(k0, self.beta, u_l);
            let k_r = conductivity(k0, self.beta, u_r);
            let jump = u_l - u_r;
            let half = T::from(0.5);
            let average_flux = half * (k_l * du_l + k_r * du_r);
            let penalty = T::from(sigma) * half * (k_l + k_r) * jump;
            let omega = T::from(line.weight * scale);
            for (j, &node) in line.nodes.iter().enumerate() {
                let (t_u, t_d) = (T::from(t_upper[j]), T::from(t_lower[j]));
                let left = -average_flux * t_u - half * k_l * T::from(dn_upper[j]) * jump + penalty * t_u;
                let right = average_flux * t_d - half * k_r * T::from(dn_lower[j]) * jump - penalty * t_d;
                r_left[node] = r_left[node] + omega * left;
                r_right[node] = r_right[node] + omega * right;
            }
        }
    }
}

impl InteriorFaceKernel for InteriorPenaltyIntegrator {
    fn eval<T: KernelScalar>(
        &self,
        ctx: &InteriorFaceContext,
        u_left: &[T],
        u_right: &[T],
        r_left: &mut [T],
        r_right: &mut [T],
    ) {
        self.residual(self.k0.get(), ctx, u_left, u_right, r_left, r_right);
    }

    fn scalar_sensitivity(
        &self,
        name: &str,
        ctx: &InteriorFaceContext,
        u_left: &[f64],
        u_right: &[f64],
        dr_left: &mut [f64],
        dr_right: &mut [f64],
    ) -> bool {
        if name != "conductivity" {
            return false;
        }
        self.residual(1.0, ctx, u_left, u_right, dr_left, dr_right);
        true
    }
}

/// The residual `A(u) - L` of the heat equation.
///
/// Scalar inputs: `"conductivity"` (k0), and whatever the load recognizes (for a
/// [`crate::load::VolumeSourceLoad`], `"heat_source"`).
pub struct ThermalResidual {
    options: ThermalOptions,
    k0: Rc<Cell<f64>>,
    form: MachNonlinearForm,
    load: Option<Box<dyn MachLoad>>,
    mass: JacobianOperator,
    state: Vec<f64>,
    jacobian: Option<JacobianOperator>,
}

impl ThermalResidual {
    /// Builds the residual from the `"thermal"` option section and `"ess-bdr"`.
    pub fn new(options: &serde_json::Value, mesh: CartesianMesh) -> Result<Self> {
        let thermal: ThermalOptions = section(options, "thermal")?;
        let space = SbpSpace::new(mesh, SbpOperator::lobatto(thermal.degree), 1);
        let k0 = Rc::new(Cell::new(thermal.conductivity));

        let mut form = MachNonlinearForm::new(space.clone());
        form.add_domain_integrator(ConductionIntegrator {
            k0: k0.clone(),
            beta: thermal.beta,
        });
        form.add_interior_face_integrator(InteriorPenaltyIntegrator {
            k0: k0.clone(),
            beta: thermal.beta,
            penalty: thermal.penalty,
        });

        let mass = JacobianOperator::Diagonal(space.mass_diagonal());
        let state = vec![0.0; space.size()];
        let mut residual = Self {
            options: thermal,
            k0,
            form,
            load: None,
            mass,
            state,
            jacobian: None,
        };
        residual.set_options(options)?;
        Ok(residual)
    }

    pub fn space(&self) -> &SbpSpace {
        self.form.space()
    }

    pub fn form(&self) -> &MachNonlinearForm {
        &self.form
    }

    pub fn conductivity(&self) -> f64 {
        self.k0.get()
    }

    pub fn set_load(&mut self, load: Box<dyn MachLoad>) {
        assert_eq!(load.size(), self.form.size(), "load does not match the residual");
        self.load = Some(load);
    }

    /// The load vector with essential rows removed.
    fn load_vector(&mut self) -> Vec<f64> {
        let mut load = vec![0.0; self.form.size()];
        if let Some(l) = &mut self.load {
            l.add_load(&mut load);
        }
        for &i in self.form.essential_dofs() {
            load[i] = 0.0;
        }
        load
    }

    fn masked(&self, values: &[f64]) -> Vec<f64> {
        let mut masked = values.to_vec();
        for &i in self.form.essential_dofs() {
            masked[i] = 0.0;
        }
        masked
    }

    fn conductivity_sensitivity(&self) -> Result<Vec<f64>> {
        let mut dr = vec![0.0; self.form.size()];
        self.form.scalar_sensitivity("conductivity", &self.state, &mut dr)?;
        Ok(dr)
    }
}

impl Residual for ThermalResidual {
    fn size(&self) -> usize {
        self.form.size()
    }

    /// Reads `"ess-bdr"`; essential nodes are held at the boundary temperature.
    fn set_options(&mut self, options: &serde_json::Value) -> Result<()> {
        self.form.set_options(options)?;
        let values = vec![self.options.boundary_temperature; self.form.size()];
        self.form.set_essential_values(&values);
        Ok(())
    }

    fn set_inputs(&mut self, inputs: &MachInputs) -> Result<()> {
        if let Some(state) = inputs.field("state")? {
            check_size(self.size(), state.len())?;
            self.state.copy_from_slice(state);
            self.jacobian = None;
        }
        if let Some(k0) = inputs.scalar("conductivity")? {
            self.k0.set(k0);
            self.jacobian = None;
        }
        if let Some(load) = &mut self.load {
            load.set_inputs(inputs)?;
        }
        Ok(())
    }

    fn evaluate(&mut self, inputs: &MachInputs, res: &mut [f64]) -> Result<()> {
        self.set_inputs(inputs)?;
        check_size(self.size(), res.len())?;
        self.form.mult(&self.state, res);
        let load = self.load_vector();
        for (r, l) in res.iter_mut().zip(load) {
            *r -= l;
        }
        Ok(())
    }

    fn jacobian(&mut self, inputs: &MachInputs, wrt: &str) -> Result<&JacobianOperator> {
        self.set_inputs(inputs)?;
        if wrt != "state" {
            return Err(MachError::Unsupported(format!("thermal Jacobian with respect to \"{}\"", wrt)));
        }
        let jacobian = self.form.jacobian(&self.state);
        Ok(&*self.jacobian.insert(jacobian))
    }

    fn jacobian_vector_product(&mut self, wrt: &str, wrt_dot: &[f64], res_dot: &mut [f64]) -> Result<()> {
        check_size(self.size(), res_dot.len())?;
        match wrt {
            "state" => {
                check_size(self.size(), wrt_dot.len())?;
                self.form.jacobian_vector_product(&self.state, wrt_dot, res_dot);
            }
            "conductivity" => {
                check_size(1, wrt_dot.len())?;
                for (r, dr) in res_dot.iter_mut().zip(self.conductivity_sensitivity()?) {
                    *r += dr * wrt_dot[0];
                }
            }
            _ => {
                let mut load_dot = vec![0.0; self.size()];
                match &mut self.load {
                    Some(load) => load.jacobian_vector_product(wrt, wrt_dot, &mut load_dot)?,
                    None => return Err(MachError::UnknownInput(wrt.to_string())),
                }
                for (r, l) in res_dot.iter_mut().zip(self.masked(&load_dot)) {
                    *r -= l;
                }
            }
        }
        Ok(())
    }

    fn vector_jacobian_product(&mut self, wrt: &str, res_bar: &[f64], wrt_bar: &mut [f64]) -> Result<()> {
        check_size(self.size(), res_bar.len())?;
        match wrt {
            "state" => {
                check_size(self.size(), wrt_bar.len())?;
                let jacobian = self.form.jacobian(&self.state);
                apply_jacobian_transpose_add(&jacobian, res_bar, wrt_bar);
                Ok(())
            }
            _ => {
                let masked = self.masked(res_bar);
                let mut load_bar = vec![0.0; wrt_bar.len()];
                match &mut self.load {
                    Some(load) => load.vector_jacobian_product(wrt, &masked, &mut load_bar)?,
                    None => return Err(MachError::UnknownInput(wrt.to_string())),
                }
                for (w, l) in wrt_bar.iter_mut().zip(load_bar) {
                    *w -= l;
                }
                Ok(())
            }
        }
    }

    fn scalar_vector_jacobian_product(&mut self, wrt: &str, res_bar: &[f64]) -> Result<f64> {
        check_size(self.size(), res_bar.len())?;
        match wrt {
            "conductivity" => Ok(self
                .conductivity_sensitivity()?
                .iter()
                .zip(res_bar)
                .map(|(dr, bar)| dr * bar)
                .sum()),
            _ => {
                let masked = self.masked(res_bar);
                match &mut self.load {
                    Some(load) => Ok(-load.scalar_vector_jacobian_product(wrt, &masked)?),
                    None => Err(MachError::UnknownInput(wrt.to_string())),
                }
            }
        }
    }

    fn block_size(&self) -> usize {
        self.space().element_size()
    }

    fn mass_matrix(&self) -> Cow<'_, JacobianOperator> {
        Cow::Borrowed(&self.mass)
    }

    /// Creates `"average-temperature"`, `"max-temperature"` (an induced-exponential
    /// aggregate, option `"rho"`, default 10) or `"volume"`.
    fn create_output(&self, name: &str, options: &serde_json::Value) -> Result<Box<dyn MachOutput>> {
        let space = self.space().clone();
        let mut output: Box<dyn MachOutput> = match name {
            "average-temperature" => Box::new(StateAverageFunctional::new(space, 0)),
            "max-temperature" => Box::new(IEAggregateFunctional::new(space, 0, 10.0)),
            "volume" => Box::new(VolumeFunctional::new(space)),
            other => return Err(MachError::UnknownOutput(other.to_string())),
        };
        if !options.is_null() {
            output.set_options(options)?;
        }
        Ok(output)
    }
}
