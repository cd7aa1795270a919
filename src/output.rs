//! Scalar outputs (functionals) of the state and their derivatives.
use crate::error::{MachError, Result};
use crate::inputs::{check_size, MachInputs};
use crate::nonlinear_form::{DomainKernel, ElementContext, KernelScalar, MachNonlinearForm};
use crate::space::SbpSpace;

/// A scalar quantity of interest computed from the state and other inputs.
///
/// Like [`crate::residual::Residual`], products refer to the inputs of the most recent
/// `set_inputs` (or `calc_output`) call and `vector_jacobian_product` accumulates.
pub trait MachOutput {
    /// Number of values produced by the output.
    fn size(&self) -> usize {
        1
    }

    fn set_options(&mut self, _options: &serde_json::Value) -> Result<()> {
        Ok(())
    }

    fn set_inputs(&mut self, inputs: &MachInputs) -> Result<()>;

    fn calc_output(&mut self, inputs: &MachInputs) -> Result<f64>;

    /// Writes the partial derivative with respect to the field `wrt` into `partial`.
    fn calc_output_partial(&mut self, wrt: &str, inputs: &MachInputs, partial: &mut [f64]) -> Result<()>;

    /// Partial derivative with respect to the scalar input `wrt`.
    ///
    /// Outputs return zero for scalars they do not depend on.
    fn calc_output_scalar_partial(&mut self, _wrt: &str, _inputs: &MachInputs) -> Result<f64> {
        Ok(0.0)
    }

    /// `d(out)/d(wrt) * wrt_dot`.
    fn jacobian_vector_product(&mut self, wrt: &str, wrt_dot: &[f64]) -> Result<f64>;

    /// `wrt_bar += out_bar * d(out)/d(wrt)`.
    fn vector_jacobian_product(&mut self, wrt: &str, out_bar: f64, wrt_bar: &mut [f64]) -> Result<()>;
}

impl<O: MachOutput + ?Sized> MachOutput for Box<O> {
    fn size(&self) -> usize {
        O::size(self)
    }

    fn set_options(&mut self, options: &serde_json::Value) -> Result<()> {
        O::set_options(self, options)
    }

    fn set_inputs(&mut self, inputs: &MachInputs) -> Result<()> {
        O::set_inputs(self, inputs)
    }

    fn calc_output(&mut self, inputs: &MachInputs) -> Result<f64> {
        O::calc_output(self, inputs)
    }

    fn calc_output_partial(&mut self, wrt: &str, inputs: &MachInputs, partial: &mut [f64]) -> Result<()> {
        O::calc_output_partial(self, wrt, inputs, partial)
    }

    fn calc_output_scalar_partial(&mut self, wrt: &str, inputs: &MachInputs) -> Result<f64> {
        O::calc_output_scalar_partial(self, wrt, inputs)
    }

    fn jacobian_vector_product(&mut self, wrt: &str, wrt_dot: &[f64]) -> Result<f64> {
        O::jacobian_vector_product(self, wrt, wrt_dot)
    }

    fn vector_jacobian_product(&mut self, wrt: &str, out_bar: f64, wrt_bar: &mut [f64]) -> Result<()> {
        O::vector_jacobian_product(self, wrt, out_bar, wrt_bar)
    }
}

fn unsupported_wrt(wrt: &str) -> MachError {
    MachError::Unsupported(format!("output derivative with respect to \"{}\"", wrt))
}

/// Copies the `"state"` input, if present, into `state`.
fn update_state(inputs: &MachInputs, state: &mut Vec<f64>) -> Result<()> {
    if let Some(field) = inputs.field("state")? {
        check_size(state.len(), field.len())?;
        state.copy_from_slice(field);
    }
    Ok(())
}

/// The energy of a nonlinear form, evaluated at the `"state"` input.
pub struct FunctionalOutput {
    form: MachNonlinearForm,
    state: Vec<f64>,
}

impl FunctionalOutput {
    pub fn new(form: MachNonlinearForm) -> Self {
        let state = vec![0.0; form.size()];
        Self { form, state }
    }

    pub fn form(&self) -> &MachNonlinearForm {
        &self.form
    }

    fn gradient(&self) -> Vec<f64> {
        let mut grad = vec![0.0; self.state.len()];
        self.form.energy_gradient(&self.state, &mut grad);
        grad
    }
}

impl MachOutput for FunctionalOutput {
    fn set_inputs(&mut self, inputs: &MachInputs) -> Result<()> {
        update_state(inputs, &mut self.state)
    }

    fn calc_output(&mut self, inputs: &MachInputs) -> Result<f64> {
        self.set_inputs(inputs)?;
        Ok(self.form.energy(&self.state))
    }

    fn calc_output_partial(&mut self, wrt: &str, inputs: &MachInputs, partial: &mut [f64]) -> Result<()> {
        if wrt != "state" {
            return Err(unsupported_wrt(wrt));
        }
        self.set_inputs(inputs)?;
        check_size(self.state.len(), partial.len())?;
        self.form.energy_gradient(&self.state, partial);
        Ok(())
    }

    fn jacobian_vector_product(&mut self, wrt: &str, wrt_dot: &[f64]) -> Result<f64> {
        if wrt != "state" {
            return Err(unsupported_wrt(wrt));
        }
        check_size(self.state.len(), wrt_dot.len())?;
        Ok(self.gradient().iter().zip(wrt_dot).map(|(g, v)| g * v).sum())
    }

    fn vector_jacobian_product(&mut self, wrt: &str, out_bar: f64, wrt_bar: &mut [f64]) -> Result<()> {
        if wrt != "state" {
            return Err(unsupported_wrt(wrt));
        }
        check_size(self.state.len(), wrt_bar.len())?;
        for (bar, g) in wrt_bar.iter_mut().zip(self.gradient()) {
            *bar += out_bar * g;
        }
        Ok(())
    }
}

/// Integrates one.
#[derive(Debug, Clone, Copy)]
pub struct VolumeIntegrator;

impl DomainKernel for VolumeIntegrator {
    fn eval<T: KernelScalar>(&self, _ctx: &ElementContext, _u: &[T], _r: &mut [T]) {}

    fn energy<T: KernelScalar>(&self, ctx: &ElementContext, _u: &[T]) -> T {
        let space = ctx.space;
        let volume: f64 = (0..space.nodes_per_element())
            .map(|node| space.node_weight(&ctx.element, node))
            .sum();
        T::from(volume)
    }
}

/// Integrates one component of the state.
#[derive(Debug, Clone, Copy)]
pub struct StateIntegrator {
    pub component: usize,
}

impl DomainKernel for StateIntegrator {
    fn eval<T: KernelScalar>(&self, _ctx: &ElementContext, _u: &[T], _r: &mut [T]) {}

    fn energy<T: KernelScalar>(&self, ctx: &ElementContext, u: &[T]) -> T {
        let space = ctx.space;
        let ns = space.num_states();
        (0..space.nodes_per_element()).fold(T::zero(), |acc, node| {
            acc + T::from(space.node_weight(&ctx.element, node)) * u[node * ns + self.component]
        })
    }
}

/// Volume of the domain. Independent of the state.
pub struct VolumeFunctional {
    output: FunctionalOutput,
}

impl VolumeFunctional {
    pub fn new(space: SbpSpace) -> Self {
        let mut form = MachNonlinearForm::new(space);
        form.add_domain_integrator(VolumeIntegrator);
        Self {
            output: FunctionalOutput::new(form),
        }
    }
}

impl MachOutput for VolumeFunctional {
    fn set_inputs(&mut self, inputs: &MachInputs) -> Result<()> {
        self.output.set_inputs(inputs)
    }

    fn calc_output(&mut self, inputs: &MachInputs) -> Result<f64> {
        self.output.calc_output(inputs)
    }

    fn calc_output_partial(&mut self, wrt: &str, inputs: &MachInputs, partial: &mut [f64]) -> Result<()> {
        self.output.calc_output_partial(wrt, inputs, partial)
    }

    fn jacobian_vector_product(&mut self, wrt: &str, wrt_dot: &[f64]) -> Result<f64> {
        self.output.jacobian_vector_product(wrt, wrt_dot)
    }

    fn vector_jacobian_product(&mut self, wrt: &str, out_bar: f64, wrt_bar: &mut [f64]) -> Result<()> {
        self.output.vector_jacobian_product(wrt, out_bar, wrt_bar)
    }
}

/// Average of one state component, the state integral divided by the volume.
pub struct StateAverageFunctional {
    state_integral: FunctionalOutput,
    volume: VolumeFunctional,
}

impl StateAverageFunctional {
    pub fn new(space: SbpSpace, component: usize) -> Self {
        assert!(component < space.num_states());
        let mut form = MachNonlinearForm::new(space.clone());
        form.add_domain_integrator(StateIntegrator { component });
        Self {
            state_integral: FunctionalOutput::new(form),
            volume: VolumeFunctional::new(space),
        }
    }

    fn volume(&mut self) -> Result<f64> {
        self.volume.calc_output(&MachInputs::new())
    }
}

impl MachOutput for StateAverageFunctional {
    fn set_inputs(&mut self, inputs: &MachInputs) -> Result<()> {
        self.state_integral.set_inputs(inputs)
    }

    fn calc_output(&mut self, inputs: &MachInputs) -> Result<f64> {
        let integral = self.state_integral.calc_output(inputs)?;
        Ok(integral / self.volume()?)
    }

    fn calc_output_partial(&mut self, wrt: &str, inputs: &MachInputs, partial: &mut [f64]) -> Result<()> {
        self.state_integral.calc_output_partial(wrt, inputs, partial)?;
        let volume = self.volume()?;
        partial.iter_mut().for_each(|p| *p /= volume);
        Ok(())
    }

    fn jacobian_vector_product(&mut self, wrt: &str, wrt_dot: &[f64]) -> Result<f64> {
        let product = self.state_integral.jacobian_vector_product(wrt, wrt_dot)?;
        Ok(product / self.volume()?)
    }

    fn vector_jacobian_product(&mut self, wrt: &str, out_bar: f64, wrt_bar: &mut [f64]) -> Result<()> {
        let volume = self.volume()?;
        self.state_integral.vector_jacobian_product(wrt, out_bar / volume, wrt_bar)
    }
}

/// Induced-exponential aggregate of one state component, a smooth approximation of its
/// maximum:
///
/// $$ J = \frac{\sum_i w_i u_i e^{\rho u_i}}{\sum_i w_i e^{\rho u_i}}. $$
///
/// The option `"rho"` sets the aggregation parameter.
pub struct IEAggregateFunctional {
    space: SbpSpace,
    component: usize,
    rho: f64,
    state: Vec<f64>,
}

impl IEAggregateFunctional {
    pub fn new(space: SbpSpace, component: usize, rho: f64) -> Self {
        assert!(component < space.num_states());
        let state = vec![0.0; space.size()];
        Self {
            space,
            component,
            rho,
            state,
        }
    }

    /// Weighted exponentials `a_i` of every node, indexed by degree of freedom, and their sum.
    fn exponentials(&self) -> (Vec<(usize, f64)>, f64) {
        let ns = self.space.num_states();
        let mut terms = Vec::with_capacity(self.space.num_nodes());
        for element in self.space.mesh().elements() {
            let offset = self.space.element_offset(element.index);
            for local in 0..self.space.nodes_per_element() {
                let dof = offset + local * ns + self.component;
                terms.push((dof, self.space.node_weight(&element, local)));
            }
        }
        // Shift by the maximum; J is invariant under the shift
        let max = terms
            .iter()
            .map(|&(dof, _)| self.state[dof])
            .fold(f64::NEG_INFINITY, f64::max);
        let mut denominator = 0.0;
        for (dof, weight) in terms.iter_mut() {
            *weight *= (self.rho * (self.state[*dof] - max)).exp();
            denominator += *weight;
        }
        (terms, denominator)
    }

    fn value(&self) -> f64 {
        let (terms, denominator) = self.exponentials();
        terms.iter().map(|&(dof, a)| a * self.state[dof]).sum::<f64>() / denominator
    }

    fn gradient(&self) -> Vec<f64> {
        let (terms, denominator) = self.exponentials();
        let value = terms.iter().map(|&(dof, a)| a * self.state[dof]).sum::<f64>() / denominator;
        let mut grad = vec![0.0; self.state.len()];
        for (dof, a) in terms {
            grad[dof] = a / denominator * (1.0 + self.rho * (self.state[dof] - value));
        }
        grad
    }
}

impl MachOutput for IEAggregateFunctional {
    fn set_options(&mut self, options: &serde_json::Value) -> Result<()> {
        if let Some(rho) = options.get("rho") {
            self.rho = serde_json::from_value(rho.clone())?;
        }
        Ok(())
    }

    fn set_inputs(&mut self, inputs: &MachInputs) -> Result<()> {
        update_state(inputs, &mut self.state)
    }

    fn calc_output(&mut self, inputs: &MachInputs) -> Result<f64> {
        self.set_inputs(inputs)?;
        Ok(self.value())
    }

    fn calc_output_partial(&mut self, wrt: &str, inputs: &MachInputs, partial: &mut [f64]) -> Result<()> {
        if wrt != "state" {
            return Err(unsupported_wrt(wrt));
        }
        self.set_inputs(inputs)?;
        check_size(self.state.len(), partial.len())?;
        partial.copy_from_slice(&self.gradient());
        Ok(())
    }

    fn jacobian_vector_product(&mut self, wrt: &str, wrt_dot: &[f64]) -> Result<f64> {
        if wrt != "state" {
            return Err(unsupported_wrt(wrt));
        }
        check_size(self.state.len(), wrt_dot.len())?;
        Ok(self.gradient().iter().zip(wrt_dot).map(|(g, v)| g * v).sum())
    }

    fn vector_jacobian_product(&mut self, wrt: &str, out_bar: f64, wrt_bar: &mut [f64]) -> Result<()> {
        if wrt != "state" {
            return Err(unsupported_wrt(wrt));
        }
        check_size(self.state.len(), wrt_bar.len())?;
        for (bar, g) in wrt_bar.iter_mut().zip(self.gradient()) {
            *bar += out_bar * g;
        }
        Ok(())
    }
}
