//! Solver options.
//!
//! Options are JSON documents. User options are merged over [`default_options`] with
//! merge-patch semantics, and each component deserializes the section it consumes into one
//! of the typed structs below.
use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// The default option document.
pub fn default_options() -> Value {
    json!({
        "flow-param": {
            "entropy-state": false,
            "mach": 0.5,
            "aoa": 0.0,
            "roll-axis": 0,
            "pitch-axis": 1,
            "viscous": false,
            "Re": 0.0,
            "Pr": 0.72,
            "mu": -1.0
        },
        "space-dis": {
            "degree": 1,
            "lps-coeff": 1.0,
            "iface-coeff": 1.0,
            "basis-type": "csbp",
            "flux-fun": "IR"
        },
        "time-dis": {
            "type": "RK4",
            "steady": false,
            "steady-abstol": 1e-12,
            "steady-reltol": 1e-10,
            "res-exp": 2.0,
            "const-cfl": false,
            "exact-t-final": true,
            "t-initial": 0.0,
            "t-final": 1.0,
            "dt": 0.01,
            "cfl": 1.0,
            "max-iter": 10000,
            "entropy-log": false
        },
        "nonlin-solver": {
            "type": "newton",
            "maxiter": 100,
            "reltol": 1e-14,
            "abstol": 1e-14,
            "printlevel": 1
        },
        "lin-solver": {
            "type": "gmres",
            "maxiter": 100,
            "reltol": 1e-12,
            "abstol": 1e-12,
            "kdim": 100,
            "printlevel": 0
        },
        "lin-prec": {
            "type": "block-jacobi"
        },
        "adj-solver": {
            "type": "gmres",
            "maxiter": 100,
            "reltol": 1e-8,
            "abstol": 1e-10,
            "kdim": 100,
            "printlevel": 0
        },
        "bcs": {},
        "outputs": {}
    })
}

/// Applies `patch` to `target` following JSON merge patch (RFC 7396): objects merge
/// recursively, `null` deletes a key, anything else replaces.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(patch_map) => {
            if !target.is_object() {
                *target = Value::Object(Default::default());
            }
            if let Value::Object(target_map) = target {
                for (key, value) in patch_map {
                    if value.is_null() {
                        target_map.remove(key);
                    } else {
                        merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
                    }
                }
            }
        }
        _ => *target = patch.clone(),
    }
}

/// Default options with `user` merged on top.
pub fn with_defaults(user: &Value) -> Value {
    let mut options = default_options();
    merge_patch(&mut options, user);
    options
}

/// Deserializes `options[key]`, falling back to the type's defaults if the section is absent.
pub fn section<T: DeserializeOwned + Default>(options: &Value, key: &str) -> Result<T> {
    match options.get(key) {
        Some(value) => Ok(serde_json::from_value(value.clone())?),
        None => Ok(T::default()),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FlowParamOptions {
    pub entropy_state: bool,
    pub mach: f64,
    pub aoa: f64,
    pub roll_axis: usize,
    pub pitch_axis: usize,
    pub viscous: bool,
    #[serde(rename = "Re")]
    pub re: f64,
    #[serde(rename = "Pr")]
    pub pr: f64,
    pub mu: f64,
}

impl Default for FlowParamOptions {
    fn default() -> Self {
        Self {
            entropy_state: false,
            mach: 0.5,
            aoa: 0.0,
            roll_axis: 0,
            pitch_axis: 1,
            viscous: false,
            re: 0.0,
            pr: 0.72,
            mu: -1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SpaceDisOptions {
    pub degree: usize,
    pub lps_coeff: f64,
    pub iface_coeff: f64,
    pub basis_type: String,
    pub flux_fun: String,
}

impl Default for SpaceDisOptions {
    fn default() -> Self {
        Self {
            degree: 1,
            lps_coeff: 1.0,
            iface_coeff: 1.0,
            basis_type: "csbp".to_string(),
            flux_fun: "IR".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct TimeDisOptions {
    #[serde(rename = "type")]
    pub ode_type: String,
    pub steady: bool,
    pub steady_abstol: f64,
    pub steady_reltol: f64,
    pub res_exp: f64,
    pub const_cfl: bool,
    pub exact_t_final: bool,
    pub t_initial: f64,
    pub t_final: f64,
    pub dt: f64,
    pub cfl: f64,
    pub max_iter: usize,
    pub entropy_log: bool,
}

impl Default for TimeDisOptions {
    fn default() -> Self {
        Self {
            ode_type: "RK4".to_string(),
            steady: false,
            steady_abstol: 1e-12,
            steady_reltol: 1e-10,
            res_exp: 2.0,
            const_cfl: false,
            exact_t_final: true,
            t_initial: 0.0,
            t_final: 1.0,
            dt: 0.01,
            cfl: 1.0,
            max_iter: 10000,
            entropy_log: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NonlinSolverOptions {
    #[serde(rename = "type")]
    pub solver_type: String,
    pub maxiter: usize,
    pub reltol: f64,
    pub abstol: f64,
    pub printlevel: i32,
}

impl Default for NonlinSolverOptions {
    fn default() -> Self {
        Self {
            solver_type: "newton".to_string(),
            maxiter: 100,
            reltol: 1e-14,
            abstol: 1e-14,
            printlevel: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinSolverOptions {
    #[serde(rename = "type")]
    pub solver_type: String,
    pub maxiter: usize,
    pub reltol: f64,
    pub abstol: f64,
    pub kdim: usize,
    pub printlevel: i32,
}

impl Default for LinSolverOptions {
    fn default() -> Self {
        Self {
            solver_type: "gmres".to_string(),
            maxiter: 100,
            reltol: 1e-12,
            abstol: 1e-12,
            kdim: 100,
            printlevel: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinPrecOptions {
    #[serde(rename = "type")]
    pub prec_type: String,
}

impl Default for LinPrecOptions {
    fn default() -> Self {
        Self {
            prec_type: "block-jacobi".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ThermalOptions {
    /// Reference conductivity `k0`.
    pub conductivity: f64,
    /// Linear temperature coefficient `beta` in `k(u) = k0 (1 + beta u)`.
    pub beta: f64,
    /// Interior penalty scaling.
    pub penalty: f64,
    pub degree: usize,
    /// Temperature imposed on the `ess-bdr` boundaries.
    pub boundary_temperature: f64,
}

impl Default for ThermalOptions {
    fn default() -> Self {
        Self {
            conductivity: 1.0,
            beta: 0.0,
            penalty: 4.0,
            degree: 1,
            boundary_temperature: 0.0,
        }
    }
}
