//! Right-hand side loads added to residuals.
use crate::error::{MachError, Result};
use crate::inputs::{check_size, MachInputs};
use crate::space::SbpSpace;

/// A load vector `L(params)` that residuals subtract from their operator part.
pub trait MachLoad {
    fn size(&self) -> usize;

    fn set_options(&mut self, _options: &serde_json::Value) -> Result<()> {
        Ok(())
    }

    fn set_inputs(&mut self, inputs: &MachInputs) -> Result<()>;

    /// `tv += L`.
    fn add_load(&mut self, tv: &mut [f64]);

    /// `load_dot += dL/d(wrt) * wrt_dot`.
    fn jacobian_vector_product(&mut self, wrt: &str, wrt_dot: &[f64], load_dot: &mut [f64]) -> Result<()>;

    /// `load_bar^T * dL/d(wrt)` for a scalar input.
    fn scalar_vector_jacobian_product(&mut self, wrt: &str, load_bar: &[f64]) -> Result<f64>;

    /// `wrt_bar += load_bar^T * dL/d(wrt)` for a field input.
    fn vector_jacobian_product(&mut self, wrt: &str, _load_bar: &[f64], _wrt_bar: &mut [f64]) -> Result<()> {
        Err(MachError::Unsupported(format!("load derivative with respect to \"{}\"", wrt)))
    }
}

impl<L: MachLoad + ?Sized> MachLoad for Box<L> {
    fn size(&self) -> usize {
        L::size(self)
    }

    fn set_options(&mut self, options: &serde_json::Value) -> Result<()> {
        L::set_options(self, options)
    }

    fn set_inputs(&mut self, inputs: &MachInputs) -> Result<()> {
        L::set_inputs(self, inputs)
    }

    fn add_load(&mut self, tv: &mut [f64]) {
        L::add_load(self, tv)
    }

    fn jacobian_vector_product(&mut self, wrt: &str, wrt_dot: &[f64], load_dot: &mut [f64]) -> Result<()> {
        L::jacobian_vector_product(self, wrt, wrt_dot, load_dot)
    }

    fn scalar_vector_jacobian_product(&mut self, wrt: &str, load_bar: &[f64]) -> Result<f64> {
        L::scalar_vector_jacobian_product(self, wrt, load_bar)
    }

    fn vector_jacobian_product(&mut self, wrt: &str, load_bar: &[f64], wrt_bar: &mut [f64]) -> Result<()> {
        L::vector_jacobian_product(self, wrt, load_bar, wrt_bar)
    }
}

/// Volumetric source `s * g(x)` integrated against the nodal basis.
///
/// The scale `s` is the scalar input `"heat_source"` and defaults to one.
#[derive(Debug, Clone)]
pub struct VolumeSourceLoad {
    /// `w_i g(x_i)` for every degree of freedom.
    weighted_source: Vec<f64>,
    scale: f64,
}

impl VolumeSourceLoad {
    pub fn new(space: &SbpSpace, source: impl FnMut(&[f64], &mut [f64])) -> Self {
        let mut weighted_source = vec![0.0; space.size()];
        space.project(&mut weighted_source, source);
        let mass = space.mass_diagonal();
        for (value, weight) in weighted_source.iter_mut().zip(mass.iter()) {
            *value *= weight;
        }
        Self {
            weighted_source,
            scale: 1.0,
        }
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }
}

impl MachLoad for VolumeSourceLoad {
    fn size(&self) -> usize {
        self.weighted_source.len()
    }

    fn set_inputs(&mut self, inputs: &MachInputs) -> Result<()> {
        if let Some(scale) = inputs.scalar("heat_source")? {
            self.scale = scale;
        }
        Ok(())
    }

    fn add_load(&mut self, tv: &mut [f64]) {
        assert_eq!(tv.len(), self.size(), "load vector has the wrong size");
        for (t, g) in tv.iter_mut().zip(&self.weighted_source) {
            *t += self.scale * g;
        }
    }

    fn jacobian_vector_product(&mut self, wrt: &str, wrt_dot: &[f64], load_dot: &mut [f64]) -> Result<()> {
        check_size(self.size(), load_dot.len())?;
        match wrt {
            "heat_source" => {
                check_size(1, wrt_dot.len())?;
                for (l, g) in load_dot.iter_mut().zip(&self.weighted_source) {
                    *l += wrt_dot[0] * g;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn scalar_vector_jacobian_product(&mut self, wrt: &str, load_bar: &[f64]) -> Result<f64> {
        check_size(self.size(), load_bar.len())?;
        match wrt {
            "heat_source" => Ok(load_bar.iter().zip(&self.weighted_source).map(|(b, g)| b * g).sum()),
            _ => Ok(0.0),
        }
    }
}
