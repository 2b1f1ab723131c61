//! # Adaptation Schedule
//!
//! Turns the per-level option arrays (target complexity, sub-iterations,
//! flow/adjoint iterations, CFL) into an immutable, ordered schedule.

use serde::Serialize;

use super::{check_required, parse_f64, Config, SensorKind};
use crate::error::ConfigError;

/// One mesh-size level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdaptationLevel {
    pub index: usize,
    /// Target mesh complexity
    pub target_size: u64,
    pub sub_iterations: u32,
    pub flow_iters: u32,
    pub adj_iters: u32,
    pub cfl: f64,
}

/// Ordered, validated levels. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdaptationSchedule {
    levels: Vec<AdaptationLevel>,
}

/// One sub-iteration of the schedule, tagged with its global iteration.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleStep<'a> {
    pub global_iter: u32,
    /// Zero-based index within the level
    pub sub_index: u32,
    pub level: &'a AdaptationLevel,
}

impl ScheduleStep<'_> {
    /// `(1/2)`-style progress label, padded for aligned narration.
    pub fn progress(&self) -> String {
        format!(
            "{:<9}",
            format!("({}/{})", self.sub_index + 1, self.level.sub_iterations)
        )
    }
}

impl AdaptationSchedule {
    pub fn levels(&self) -> &[AdaptationLevel] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn first(&self) -> &AdaptationLevel {
        // Builder guarantees at least one level.
        &self.levels[0]
    }

    /// Sum of sub-iterations over all levels. The builder rejects schedules
    /// whose sum does not fit a `u32`.
    pub fn total_sub_iterations(&self) -> u32 {
        self.levels
            .iter()
            .fold(0u32, |total, l| total.saturating_add(l.sub_iterations))
    }

    /// Every sub-iteration in execution order, global counter starting at 0.
    pub fn steps(&self) -> impl Iterator<Item = ScheduleStep<'_>> {
        self.levels
            .iter()
            .flat_map(|level| (0..level.sub_iterations).map(move |sub| (level, sub)))
            .enumerate()
            .map(|(global, (level, sub_index))| ScheduleStep {
                global_iter: global as u32,
                sub_index,
                level,
            })
    }
}

/// Builds an [`AdaptationSchedule`] from a [`Config`].
pub struct ScheduleBuilder<'a> {
    config: &'a Config,
}

/// A per-level option: an explicit list, or one value for every level.
enum PerLevel {
    List { option: &'static str, values: Vec<String> },
    Uniform { option: &'static str, value: String },
}

impl PerLevel {
    fn at(&self, level: usize) -> Result<(&'static str, &str), ConfigError> {
        match self {
            PerLevel::List { option, values } => values
                .get(level)
                .map(|v| (*option, v.as_str()))
                .ok_or_else(|| ConfigError::LevelOutOfRange {
                    option: option.to_string(),
                    level,
                    len: values.len(),
                }),
            PerLevel::Uniform { option, value } => Ok((*option, value.as_str())),
        }
    }
}

impl<'a> ScheduleBuilder<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    pub fn build(&self) -> Result<AdaptationSchedule, ConfigError> {
        check_required(self.config)?;
        self.config.require("PYADAP_SENSOR")?.parse::<SensorKind>()?;

        let sizes = self.list("PYADAP_COMPLEXITY")?;
        let sub_iters = self.list("PYADAP_SUBITE")?;
        if sizes.len() != sub_iters.len() {
            return Err(ConfigError::ScheduleMismatch {
                sizes: sizes.len(),
                sub_iterations: sub_iters.len(),
            });
        }

        let flow_iters = self.per_level("PYADAP_FLOW_ITER", &["ITER", "EXT_ITER"])?;
        let adj_iters = self.per_level("PYADAP_ADJ_ITER", &["ITER", "EXT_ITER"])?;
        let cfl = self.per_level("PYADAP_CFL", &["CFL_NUMBER"])?;

        let mut levels = Vec::with_capacity(sizes.len());
        let mut total: u32 = 0;
        for (index, (size, sub)) in sizes.iter().zip(&sub_iters).enumerate() {
            let (flow_opt, flow) = flow_iters.at(index)?;
            let (adj_opt, adj) = adj_iters.at(index)?;
            let (cfl_opt, cfl_value) = cfl.at(index)?;

            let sub_iterations = parse_u32("PYADAP_SUBITE", sub)?;
            total = total
                .checked_add(sub_iterations)
                .ok_or_else(|| ConfigError::InvalidValue {
                    option: "PYADAP_SUBITE".to_string(),
                    value: sub_iters.join(", "),
                    reason: "total sub-iterations overflow".to_string(),
                })?;

            levels.push(AdaptationLevel {
                index,
                target_size: parse_count("PYADAP_COMPLEXITY", size)?,
                sub_iterations,
                flow_iters: parse_u32(flow_opt, flow)?,
                adj_iters: parse_u32(adj_opt, adj)?,
                cfl: parse_f64(cfl_opt, cfl_value)?,
            });
        }

        let schedule = AdaptationSchedule { levels };
        if total == 0 {
            return Err(ConfigError::EmptySchedule);
        }
        Ok(schedule)
    }

    fn list(&self, option: &str) -> Result<Vec<String>, ConfigError> {
        self.config
            .get_list(option)
            .ok_or_else(|| ConfigError::MissingOptions(vec![option.to_string()]))
    }

    fn per_level(
        &self,
        option: &'static str,
        fallbacks: &[&'static str],
    ) -> Result<PerLevel, ConfigError> {
        if let Some(values) = self.config.get_list(option) {
            return Ok(PerLevel::List { option, values });
        }
        for fallback in fallbacks {
            if let Some(value) = self.config.get(fallback) {
                return Ok(PerLevel::Uniform {
                    option: *fallback,
                    value: value.to_string(),
                });
            }
        }
        let mut wanted = vec![option.to_string()];
        wanted.extend(fallbacks.iter().map(|f| f.to_string()));
        Err(ConfigError::MissingOptions(vec![wanted.join(" or ")]))
    }
}

/// Non-negative integer option; `1e4` and `2000.0` are accepted.
fn parse_count(option: &str, value: &str) -> Result<u64, ConfigError> {
    let parsed = parse_f64(option, value)?;
    if parsed < 0.0 {
        return Err(ConfigError::InvalidValue {
            option: option.to_string(),
            value: value.to_string(),
            reason: "expected a non-negative count".to_string(),
        });
    }
    Ok(parsed as u64)
}

/// Count option stored as a `u32`.
fn parse_u32(option: &str, value: &str) -> Result<u32, ConfigError> {
    u32::try_from(parse_count(option, value)?).map_err(|_| ConfigError::InvalidValue {
        option: option.to_string(),
        value: value.to_string(),
        reason: format!("count exceeds {}", u32::MAX),
    })
}
