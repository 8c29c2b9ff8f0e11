//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/odx.toml
//!
//! Every key is optional; a missing section falls back to its defaults.

use anyhow::{ensure, Context};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Seconds a tap may follow the scheduled departure (window starts at `t - early`)
    pub match_time_tolerance_early: u32,
    /// Seconds a tap may precede the scheduled departure (window ends at `t + late`)
    pub match_time_tolerance_late: u32,
    /// Score bonus (seconds) for candidates on the tap's route hint
    pub route_hint_bonus: u32,
    /// Confidence ceiling when candidates span several routes
    pub ambiguity_confidence_floor: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            match_time_tolerance_early: 120,
            match_time_tolerance_late: 600,
            route_hint_bonus: 0,
            ambiguity_confidence_floor: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InterchangeConfig {
    pub max_interchange_wait: u64,
    /// Meters
    pub max_interchange_walk: f64,
    pub allow_same_route_interchange: bool,
    /// 0 disables the circuity check
    pub max_circuity_ratio: f64,
}

impl Default for InterchangeConfig {
    fn default() -> Self {
        Self {
            max_interchange_wait: 1800,
            max_interchange_walk: 750.0,
            allow_same_route_interchange: false,
            max_circuity_ratio: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DestinationConfig {
    pub max_activity_duration: u64,
    /// Meters between an alighting candidate and the stop it anchors on
    pub max_alighting_distance: f64,
    pub alighting_fallback_penalty: f64,
    pub return_to_origin_confidence_factor: f64,
    pub unknown_destination_confidence_cap: f64,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            max_activity_duration: 16 * 3600,
            max_alighting_distance: 750.0,
            alighting_fallback_penalty: 0.3,
            return_to_origin_confidence_factor: 0.8,
            unknown_destination_confidence_cap: 0.2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Hour of day at which a new service day starts
    pub new_day_hour: u32,
    pub duplicate_tap_window: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self { new_day_hour: 4, duplicate_tap_window: 30 }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct JourneysConfig {
    /// Meters; 0 keeps loop journeys intact
    pub min_journey_length: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// File path for OD-X journey records (JSONL format)
    pub journeys_file: String,
    /// File path for the aggregated OD matrix (JSON)
    pub matrix_file: String,
    /// Append to the journeys file instead of truncating it
    pub append: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            journeys_file: "odx.jsonl".to_string(),
            matrix_file: "od_matrix.json".to_string(),
            append: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RunConfig {
    /// Worker threads for card fan-out, 0 = one per core
    pub workers: usize,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TomlConfig {
    pub matching: MatchingConfig,
    pub interchange: InterchangeConfig,
    pub destination: DestinationConfig,
    pub service: ServiceConfig,
    pub journeys: JourneysConfig,
    pub output: OutputConfig,
    pub run: RunConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    match_time_tolerance_early: u32,
    match_time_tolerance_late: u32,
    route_hint_bonus: u32,
    ambiguity_confidence_floor: f64,
    max_interchange_wait: u64,
    max_interchange_walk: f64,
    allow_same_route_interchange: bool,
    max_circuity_ratio: Option<f64>,
    max_activity_duration: u64,
    max_alighting_distance: f64,
    alighting_fallback_penalty: f64,
    return_to_origin_confidence_factor: f64,
    unknown_destination_confidence_cap: f64,
    new_day_hour: u32,
    duplicate_tap_window: u64,
    min_journey_length: f64,
    journeys_file: String,
    matrix_file: String,
    output_append: bool,
    workers: usize,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

impl Config {
    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/odx.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        Self::from_toml_str(&content, &path.display().to_string())
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Parse and validate TOML content; `source` is reported by `config_file()`
    pub fn from_toml_str(content: &str, source: &str) -> anyhow::Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content)?;
        let config = Self::from_toml(toml_config, source);
        config.validate()?;
        Ok(config)
    }

    fn from_toml(toml_config: TomlConfig, source: &str) -> Self {
        let ratio = toml_config.interchange.max_circuity_ratio;
        Self {
            match_time_tolerance_early: toml_config.matching.match_time_tolerance_early,
            match_time_tolerance_late: toml_config.matching.match_time_tolerance_late,
            route_hint_bonus: toml_config.matching.route_hint_bonus,
            ambiguity_confidence_floor: toml_config.matching.ambiguity_confidence_floor,
            max_interchange_wait: toml_config.interchange.max_interchange_wait,
            max_interchange_walk: toml_config.interchange.max_interchange_walk,
            allow_same_route_interchange: toml_config.interchange.allow_same_route_interchange,
            max_circuity_ratio: (ratio > 0.0).then_some(ratio),
            max_activity_duration: toml_config.destination.max_activity_duration,
            max_alighting_distance: toml_config.destination.max_alighting_distance,
            alighting_fallback_penalty: toml_config.destination.alighting_fallback_penalty,
            return_to_origin_confidence_factor: toml_config
                .destination
                .return_to_origin_confidence_factor,
            unknown_destination_confidence_cap: toml_config
                .destination
                .unknown_destination_confidence_cap,
            new_day_hour: toml_config.service.new_day_hour,
            duplicate_tap_window: toml_config.service.duplicate_tap_window,
            min_journey_length: toml_config.journeys.min_journey_length,
            journeys_file: toml_config.output.journeys_file,
            matrix_file: toml_config.output.matrix_file,
            output_append: toml_config.output.append,
            workers: toml_config.run.workers,
            config_file: source.to_string(),
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            u64::from(self.match_time_tolerance_early) + u64::from(self.match_time_tolerance_late)
                > 0,
            "matching tolerances must not both be zero"
        );
        ensure!(
            (0.0..=1.0).contains(&self.ambiguity_confidence_floor),
            "ambiguity_confidence_floor must be within [0, 1]"
        );
        ensure!(
            (0.0..=1.0).contains(&self.alighting_fallback_penalty),
            "alighting_fallback_penalty must be within [0, 1]"
        );
        ensure!(
            (0.0..=1.0).contains(&self.return_to_origin_confidence_factor),
            "return_to_origin_confidence_factor must be within [0, 1]"
        );
        ensure!(
            (0.0..=1.0).contains(&self.unknown_destination_confidence_cap),
            "unknown_destination_confidence_cap must be within [0, 1]"
        );
        ensure!(self.max_interchange_walk >= 0.0, "max_interchange_walk must not be negative");
        ensure!(self.max_alighting_distance >= 0.0, "max_alighting_distance must not be negative");
        ensure!(self.new_day_hour < 24, "new_day_hour must be below 24");
        ensure!(
            self.max_activity_duration >= self.max_interchange_wait,
            "max_activity_duration must be at least max_interchange_wait"
        );
        Ok(())
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        Self::load_from_path(&Self::resolve_config_path(args))
    }

    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(config_file = %path, error = %format!("{:#}", e), "config_fallback_to_defaults");
                Self::default()
            }
        }
    }

    // Getters for all config fields
    pub fn match_time_tolerance_early(&self) -> u32 {
        self.match_time_tolerance_early
    }

    pub fn match_time_tolerance_late(&self) -> u32 {
        self.match_time_tolerance_late
    }

    pub fn route_hint_bonus(&self) -> u32 {
        self.route_hint_bonus
    }

    pub fn ambiguity_confidence_floor(&self) -> f64 {
        self.ambiguity_confidence_floor
    }

    pub fn max_interchange_wait(&self) -> u64 {
        self.max_interchange_wait
    }

    pub fn max_interchange_walk(&self) -> f64 {
        self.max_interchange_walk
    }

    pub fn allow_same_route_interchange(&self) -> bool {
        self.allow_same_route_interchange
    }

    pub fn max_circuity_ratio(&self) -> Option<f64> {
        self.max_circuity_ratio
    }

    pub fn max_activity_duration(&self) -> u64 {
        self.max_activity_duration
    }

    pub fn max_alighting_distance(&self) -> f64 {
        self.max_alighting_distance
    }

    pub fn alighting_fallback_penalty(&self) -> f64 {
        self.alighting_fallback_penalty
    }

    pub fn return_to_origin_confidence_factor(&self) -> f64 {
        self.return_to_origin_confidence_factor
    }

    pub fn unknown_destination_confidence_cap(&self) -> f64 {
        self.unknown_destination_confidence_cap
    }

    pub fn new_day_hour(&self) -> u32 {
        self.new_day_hour
    }

    pub fn duplicate_tap_window(&self) -> u64 {
        self.duplicate_tap_window
    }

    pub fn min_journey_length(&self) -> f64 {
        self.min_journey_length
    }

    pub fn journeys_file(&self) -> &str {
        &self.journeys_file
    }

    pub fn matrix_file(&self) -> &str {
        &self.matrix_file
    }

    pub fn output_append(&self) -> bool {
        self.output_append
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Command-line overrides applied after loading
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_journeys_file(mut self, path: &str) -> Self {
        self.journeys_file = path.to_string();
        self
    }

    pub fn with_matrix_file(mut self, path: &str) -> Self {
        self.matrix_file = path.to_string();
        self
    }

    /// Builder method for tests to set the late matching tolerance
    #[cfg(test)]
    pub fn with_match_time_tolerance_late(mut self, secs: u32) -> Self {
        self.match_time_tolerance_late = secs;
        self
    }

    #[cfg(test)]
    pub fn with_route_hint_bonus(mut self, secs: u32) -> Self {
        self.route_hint_bonus = secs;
        self
    }

    #[cfg(test)]
    pub fn with_allow_same_route_interchange(mut self, allow: bool) -> Self {
        self.allow_same_route_interchange = allow;
        self
    }

    #[cfg(test)]
    pub fn with_max_circuity_ratio(mut self, ratio: f64) -> Self {
        self.max_circuity_ratio = (ratio > 0.0).then_some(ratio);
        self
    }

    #[cfg(test)]
    pub fn with_min_journey_length(mut self, meters: f64) -> Self {
        self.min_journey_length = meters;
        self
    }

    #[cfg(test)]
    pub fn with_duplicate_tap_window(mut self, secs: u64) -> Self {
        self.duplicate_tap_window = secs;
        self
    }
}
