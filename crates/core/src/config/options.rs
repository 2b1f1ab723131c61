//! # Adaptation Options
//!
//! Validated, typed view of the `PYADAP_*` options plus the solver keys the
//! pipeline needs (mesh/restart names, objective function).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{parse_f64, Config};
use crate::error::ConfigError;

/// Options that only drive adaptation; they are stripped before a
/// configuration is handed to the flow solver.
pub const ADAPTATION_OPTIONS: &[&str] = &[
    "PYADAP_COMPLEXITY",
    "PYADAP_SUBITE",
    "PYADAP_SENSOR",
    "PYADAP_BACK",
    "PYADAP_HMAX",
    "PYADAP_HMIN",
    "PYADAP_HGRAD",
    "PYADAP_RESIDUAL_REDUCTION",
    "PYADAP_FLOW_ITER",
    "PYADAP_ADJ_ITER",
    "PYADAP_CFL",
    "PYADAP_INV_BACK",
    "PYADAP_ORTHO",
    "PYADAP_RDG",
    "PYADAP_PYTHON",
];

/// Options every adaptation run must provide.
pub const REQUIRED_OPTIONS: &[&str] = &[
    "PYADAP_COMPLEXITY",
    "PYADAP_SUBITE",
    "PYADAP_SENSOR",
    "MESH_FILENAME",
    "RESTART_SOL",
    "MESH_OUT_FILENAME",
    "RESTART_FILENAME",
    "PYADAP_HGRAD",
    "PYADAP_HMIN",
    "PYADAP_HMAX",
    "ADAP_NORM",
];

/// Fail with every missing required option listed at once.
pub fn check_required(config: &Config) -> Result<(), ConfigError> {
    let missing: Vec<String> = REQUIRED_OPTIONS
        .iter()
        .filter(|opt| !config.contains(opt))
        .map(|opt| opt.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::MissingOptions(missing))
    }
}

/// Field that drives adaptation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SensorKind {
    /// Mach number
    Mach,
    /// Static pressure
    Pres,
    /// Mach number and pressure as two scalar fields
    MachPres,
    /// Goal-oriented metric computed from the adjoint solution
    Goal,
}

impl SensorKind {
    pub fn all() -> [SensorKind; 4] {
        [
            SensorKind::Mach,
            SensorKind::Pres,
            SensorKind::MachPres,
            SensorKind::Goal,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Mach => "MACH",
            SensorKind::Pres => "PRES",
            SensorKind::MachPres => "MACH_PRES",
            SensorKind::Goal => "GOAL",
        }
    }

    pub fn is_goal(&self) -> bool {
        matches!(self, SensorKind::Goal)
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        SensorKind::all()
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(value))
            .ok_or_else(|| ConfigError::UnknownSensor(value.to_string()))
    }
}

/// Which remeshing implementation runs the ADAPT stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Out-of-process engine driven through GMF files
    #[default]
    External,
    /// In-process library call
    Library,
}

impl BackendKind {
    /// `PYADAP_PYTHON= YES` selects the in-process library.
    pub fn from_config(config: &Config) -> Self {
        if config.is_yes("PYADAP_PYTHON") {
            BackendKind::Library
        } else {
            BackendKind::External
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::External => f.write_str("external"),
            BackendKind::Library => f.write_str("library"),
        }
    }
}

/// Restart-file suffix SU2 appends to adjoint solutions of an objective.
pub fn adjoint_suffix(objective: &str) -> Option<&'static str> {
    let names: Vec<String> = super::split_list(objective)
        .into_iter()
        .map(|n| n.to_ascii_uppercase())
        .collect();
    if names.len() > 1 {
        return Some("combo");
    }

    let suffix = match names.first()?.as_str() {
        "DRAG" => "cd",
        "LIFT" => "cl",
        "SIDEFORCE" => "csf",
        "MOMENT_X" => "cmx",
        "MOMENT_Y" => "cmy",
        "MOMENT_Z" => "cmz",
        "FORCE_X" => "cfx",
        "FORCE_Y" => "cfy",
        "FORCE_Z" => "cfz",
        "EFFICIENCY" => "eff",
        "INVERSE_DESIGN_PRESSURE" => "invpress",
        "INVERSE_DESIGN_HEAT" => "invheat",
        "MASS_FLOW_RATE" | "SURFACE_MASSFLOW" => "mfr",
        "SURFACE_TOTAL_PRESSURE" => "pt",
        "SURFACE_STATIC_PRESSURE" => "pe",
        "SURFACE_MACH" => "mach",
        "TOTAL_HEATFLUX" => "totheat",
        "MAXIMUM_HEATFLUX" => "maxheat",
        "EQUIVALENT_AREA" => "ea",
        "NEARFIELD_PRESSURE" => "nfp",
        "FREE_SURFACE" => "fs",
        "TOPOL_COMPLIANCE" => "tcomp",
        "COMBO" => "combo",
        _ => return None,
    };
    Some(suffix)
}

/// `ite0_adj.csv` + `cd` -> `ite0_adj_cd.csv`. An empty suffix is a no-op.
pub fn add_suffix(name: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        return name.to_string();
    }
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{}_{}{}", &name[..dot], suffix, &name[dot..]),
        _ => format!("{}_{}", name, suffix),
    }
}

/// Typed adaptation options.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdaptOptions {
    pub sensor: SensorKind,
    pub backend: BackendKind,
    /// Size gradation
    pub hgrad: f64,
    pub hmin: f64,
    pub hmax: f64,
    /// Lp norm used for the complexity constraint
    pub norm: f64,
    pub mesh_in: String,
    pub mesh_out: String,
    pub restart_out: String,
    pub restart_sol: bool,
    /// Supplied flow solution (RESTART_SOL= YES)
    pub solution_in: Option<String>,
    /// Supplied adjoint solution, without objective suffix (RESTART_SOL= YES)
    pub adjoint_in: Option<String>,
    pub objective: Option<String>,
    /// Objective suffix for adjoint artifacts; empty unless the sensor is GOAL
    pub adjoint_suffix: String,
    pub background: Option<String>,
    pub invert_background: bool,
    pub orthogonal_only: bool,
    pub ridge_detection: bool,
    /// Also keep GMF snapshots of interpolated and final states
    pub write_native: bool,
}

impl AdaptOptions {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        check_required(config)?;

        let sensor: SensorKind = config.require("PYADAP_SENSOR")?.parse()?;

        let restart_sol = config.is_yes("RESTART_SOL");
        let (solution_in, adjoint_in) = if restart_sol {
            let missing: Vec<String> = ["SOLUTION_FILENAME", "SOLUTION_ADJ_FILENAME"]
                .iter()
                .filter(|k| !config.contains(k))
                .map(|k| k.to_string())
                .collect();
            if !missing.is_empty() {
                return Err(ConfigError::MissingRestartSolution(missing));
            }
            (
                config.get("SOLUTION_FILENAME").map(str::to_string),
                config.get("SOLUTION_ADJ_FILENAME").map(str::to_string),
            )
        } else {
            (None, None)
        };

        let objective = config.get("OBJECTIVE_FUNCTION").map(str::to_string);
        let adjoint_suffix = if sensor.is_goal() {
            let objective = objective
                .as_deref()
                .ok_or_else(|| ConfigError::MissingOptions(vec!["OBJECTIVE_FUNCTION".into()]))?;
            adjoint_suffix(objective)
                .ok_or_else(|| ConfigError::InvalidValue {
                    option: "OBJECTIVE_FUNCTION".into(),
                    value: objective.to_string(),
                    reason: "no adjoint restart suffix is known for this objective".into(),
                })?
                .to_string()
        } else {
            String::new()
        };

        let hmin = config.require_f64("PYADAP_HMIN")?;
        let hmax = config.require_f64("PYADAP_HMAX")?;
        if hmin <= 0.0 || hmin > hmax {
            return Err(ConfigError::InvalidValue {
                option: "PYADAP_HMIN".into(),
                value: hmin.to_string(),
                reason: format!("must be positive and not exceed PYADAP_HMAX ({})", hmax),
            });
        }

        Ok(Self {
            sensor,
            backend: BackendKind::from_config(config),
            hgrad: config.require_f64("PYADAP_HGRAD")?,
            hmin,
            hmax,
            norm: parse_f64("ADAP_NORM", config.require("ADAP_NORM")?)?,
            mesh_in: config.require("MESH_FILENAME")?.to_string(),
            mesh_out: config.require("MESH_OUT_FILENAME")?.to_string(),
            restart_out: config.require("RESTART_FILENAME")?.to_string(),
            restart_sol,
            solution_in,
            adjoint_in,
            objective,
            adjoint_suffix,
            background: config.get("PYADAP_BACK").map(str::to_string),
            invert_background: config.is_yes("PYADAP_INV_BACK"),
            orthogonal_only: config.is_yes("PYADAP_ORTHO"),
            // Ridge detection stays off unless explicitly enabled.
            ridge_detection: config.is_yes("PYADAP_RDG"),
            write_native: config.is_yes("WRT_INRIA_MESH"),
        })
    }

    /// Printable `KEY= value` lines for every adaptation option that is set.
    pub fn describe(config: &Config) -> Vec<String> {
        ADAPTATION_OPTIONS
            .iter()
            .filter_map(|key| config.get(key).map(|v| format!("{}= {}", key, v)))
            .collect()
    }
}
