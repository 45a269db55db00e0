use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::env;

use crate::models::PatternKind;

/// How each feature dimension is rescaled across a run's ticker batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalization {
    ZScore,
    MinMax,
}

impl Normalization {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "zscore" | "z_score" | "z-score" => Ok(Self::ZScore),
            "minmax" | "min_max" | "min-max" => Ok(Self::MinMax),
            other => Err(anyhow!(
                "FEATURE_NORMALIZATION must be ZSCORE or MINMAX (value: {})",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// Days of history handed to the per-ticker stages.
    pub lookback_days: usize,
    /// Days retained per ticker before the oldest are evicted.
    pub horizon_days: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            lookback_days: 30,
            horizon_days: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeltaConfig {
    /// Days back used for the new-strike-concentration comparison.
    pub concentration_lookback: usize,
    pub concentration_abs_threshold: u64,
    /// Share of the day's total OI that also qualifies a strike as concentrated.
    pub concentration_rel_threshold: f64,
    pub large_block_threshold: u64,
    pub unusual_pc_shift: f64,
    pub unusual_max_pain_shift: f64,
    pub unusual_total_oi_change: f64,
}

impl Default for DeltaConfig {
    fn default() -> Self {
        Self {
            concentration_lookback: 1,
            concentration_abs_threshold: 1_000,
            concentration_rel_threshold: 0.10,
            large_block_threshold: 5_000,
            unusual_pc_shift: 0.30,
            unusual_max_pain_shift: 10.0,
            unusual_total_oi_change: 0.20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreakThresholds {
    pub min_days: usize,
    pub min_increase: f64,
}

impl Default for StreakThresholds {
    fn default() -> Self {
        Self {
            min_days: 5,
            min_increase: 0.15,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GammaSqueezeThresholds {
    pub min_days: usize,
    pub oi_concentration: f64,
    /// Half-width of the near-the-money band, as a fraction of the underlying price.
    pub strike_range: f64,
    pub min_volume_oi_ratio: f64,
}

impl Default for GammaSqueezeThresholds {
    fn default() -> Self {
        Self {
            min_days: 1,
            oi_concentration: 0.30,
            strike_range: 0.05,
            min_volume_oi_ratio: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PutWallThresholds {
    pub min_days: usize,
    pub min_pc_ratio: f64,
    pub min_pc_increase: f64,
    pub oi_concentration: f64,
    pub strike_range: f64,
}

impl Default for PutWallThresholds {
    fn default() -> Self {
        Self {
            min_days: 5,
            min_pc_ratio: 1.5,
            min_pc_increase: 0.20,
            oi_concentration: 0.30,
            strike_range: 0.10,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PatternThresholds {
    pub accumulation: StreakThresholds,
    pub distribution: StreakThresholds,
    pub gamma_squeeze: GammaSqueezeThresholds,
    pub put_wall: PutWallThresholds,
}

#[derive(Debug, Clone)]
pub struct FeatureConfig {
    pub normalization: Normalization,
    /// Build vectors for tickers without any pattern match as well.
    pub include_unmatched: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            normalization: Normalization::ZScore,
            include_unmatched: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClusteringConfig {
    pub epsilon: f64,
    pub min_samples: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.5,
            min_samples: 3,
        }
    }
}

/// Stop distance and reward multiple applied to the underlying price.
#[derive(Debug, Clone, Copy)]
pub struct RiskReward {
    pub stop_loss_pct: f64,
    pub reward_multiple: f64,
}

#[derive(Debug, Clone)]
pub struct RiskRewardByPattern {
    pub accumulation: RiskReward,
    pub distribution: RiskReward,
    pub gamma_squeeze: RiskReward,
    pub put_wall: RiskReward,
}

impl Default for RiskRewardByPattern {
    fn default() -> Self {
        Self {
            accumulation: RiskReward {
                stop_loss_pct: 0.05,
                reward_multiple: 2.0,
            },
            distribution: RiskReward {
                stop_loss_pct: 0.05,
                reward_multiple: 2.0,
            },
            gamma_squeeze: RiskReward {
                stop_loss_pct: 0.04,
                reward_multiple: 3.0,
            },
            put_wall: RiskReward {
                stop_loss_pct: 0.05,
                reward_multiple: 2.0,
            },
        }
    }
}

impl RiskRewardByPattern {
    pub fn for_kind(&self, kind: PatternKind) -> RiskReward {
        match kind {
            PatternKind::Accumulation => self.accumulation,
            PatternKind::Distribution => self.distribution,
            PatternKind::GammaSqueeze => self.gamma_squeeze,
            PatternKind::PutWall => self.put_wall,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignalConfig {
    pub min_confidence: f64,
    pub target_dte_min: i64,
    pub target_dte_max: i64,
    pub dte_tolerance: i64,
    pub max_positions: usize,
    pub position_size: f64,
    pub otm_offset: f64,
    pub entry_band: f64,
    pub success_rate_weight: f64,
    pub risk: RiskRewardByPattern,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.70,
            target_dte_min: 60,
            target_dte_max: 70,
            dte_tolerance: 7,
            max_positions: 10,
            position_size: 0.02,
            otm_offset: 0.025,
            entry_band: 0.01,
            success_rate_weight: 0.5,
            risk: RiskRewardByPattern::default(),
        }
    }
}

/// Main pipeline configuration struct that groups all stage parameters
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub history: HistoryConfig,
    pub delta: DeltaConfig,
    pub patterns: PatternThresholds,
    pub features: FeatureConfig,
    pub clustering: ClusteringConfig,
    pub signals: SignalConfig,
    /// Share of the universe that must have data on the run date.
    pub min_universe_coverage: f64,
    pub worker_threads: usize,
    /// Volatility index used only for market context, never traded.
    pub reference_ticker: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            history: HistoryConfig::default(),
            delta: DeltaConfig::default(),
            patterns: PatternThresholds::default(),
            features: FeatureConfig::default(),
            clustering: ClusteringConfig::default(),
            signals: SignalConfig::default(),
            min_universe_coverage: 0.5,
            worker_threads: num_cpus::get().max(1),
            reference_ticker: Some("VIX".to_string()),
        }
    }
}

pub const REFERENCE_TICKER_KEY: &str = "REFERENCE_TICKER";

pub const SETTING_KEYS: [&str; 27] = [
    "LOOKBACK_DAYS",
    "HORIZON_DAYS",
    "MIN_CONFIDENCE",
    "ACCUMULATION_MIN_DAYS",
    "ACCUMULATION_MIN_INCREASE",
    "DISTRIBUTION_MIN_DAYS",
    "DISTRIBUTION_MIN_INCREASE",
    "GAMMA_OI_CONCENTRATION",
    "GAMMA_STRIKE_RANGE",
    "GAMMA_MIN_VOLUME_OI_RATIO",
    "PUT_WALL_MIN_DAYS",
    "PUT_WALL_MIN_PC_RATIO",
    "PUT_WALL_MIN_PC_INCREASE",
    "PUT_WALL_OI_CONCENTRATION",
    "PUT_WALL_STRIKE_RANGE",
    "FEATURE_NORMALIZATION",
    "FEATURE_INCLUDE_UNMATCHED",
    "CLUSTER_EPSILON",
    "CLUSTER_MIN_SAMPLES",
    "TARGET_DTE_MIN",
    "TARGET_DTE_MAX",
    "DTE_TOLERANCE",
    "MAX_POSITIONS",
    "POSITION_SIZE",
    "SUCCESS_RATE_WEIGHT",
    "MIN_UNIVERSE_COVERAGE",
    "WORKER_THREADS",
];

impl PipelineConfig {
    /// Build a config from defaults overlaid with any recognised settings.
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let mut config = Self::default();
        config.apply_settings(settings)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay recognised keys from the process environment.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        let mut from_env: HashMap<String, String> = SETTING_KEYS
            .iter()
            .filter_map(|key| env::var(key).ok().map(|value| (key.to_string(), value)))
            .collect();
        if let Ok(reference) = env::var(REFERENCE_TICKER_KEY) {
            from_env.insert(REFERENCE_TICKER_KEY.to_string(), reference);
        }
        self.apply_settings(&from_env)?;
        self.validate()?;
        Ok(self)
    }

    /// Overlay recognised keys from a settings map. Unknown keys are ignored.
    pub fn apply_settings(&mut self, settings: &HashMap<String, String>) -> Result<()> {
        if let Some(reference) = settings.get(REFERENCE_TICKER_KEY) {
            // An empty value disables the reference ticker.
            self.reference_ticker = crate::history::normalize_ticker_symbol(reference);
        }
        if let Some(v) = optional_setting_usize(settings, "LOOKBACK_DAYS", 1)? {
            self.history.lookback_days = v;
        }
        if let Some(v) = optional_setting_usize(settings, "HORIZON_DAYS", 1)? {
            self.history.horizon_days = v;
        }
        if let Some(v) = optional_setting_f64(settings, "MIN_CONFIDENCE", Some(0.0), Some(1.0))? {
            self.signals.min_confidence = v;
        }
        if let Some(v) = optional_setting_usize(settings, "ACCUMULATION_MIN_DAYS", 1)? {
            self.patterns.accumulation.min_days = v;
        }
        if let Some(v) =
            optional_setting_f64(settings, "ACCUMULATION_MIN_INCREASE", Some(0.0), None)?
        {
            self.patterns.accumulation.min_increase = v;
        }
        if let Some(v) = optional_setting_usize(settings, "DISTRIBUTION_MIN_DAYS", 1)? {
            self.patterns.distribution.min_days = v;
        }
        if let Some(v) =
            optional_setting_f64(settings, "DISTRIBUTION_MIN_INCREASE", Some(0.0), None)?
        {
            self.patterns.distribution.min_increase = v;
        }
        if let Some(v) =
            optional_setting_f64(settings, "GAMMA_OI_CONCENTRATION", Some(0.0), Some(1.0))?
        {
            self.patterns.gamma_squeeze.oi_concentration = v;
        }
        if let Some(v) = optional_setting_f64(settings, "GAMMA_STRIKE_RANGE", Some(0.0), Some(1.0))?
        {
            self.patterns.gamma_squeeze.strike_range = v;
        }
        if let Some(v) =
            optional_setting_f64(settings, "GAMMA_MIN_VOLUME_OI_RATIO", Some(0.0), None)?
        {
            self.patterns.gamma_squeeze.min_volume_oi_ratio = v;
        }
        if let Some(v) = optional_setting_usize(settings, "PUT_WALL_MIN_DAYS", 2)? {
            self.patterns.put_wall.min_days = v;
        }
        if let Some(v) = optional_setting_f64(settings, "PUT_WALL_MIN_PC_RATIO", Some(0.0), None)? {
            self.patterns.put_wall.min_pc_ratio = v;
        }
        if let Some(v) =
            optional_setting_f64(settings, "PUT_WALL_MIN_PC_INCREASE", Some(0.0), None)?
        {
            self.patterns.put_wall.min_pc_increase = v;
        }
        if let Some(v) =
            optional_setting_f64(settings, "PUT_WALL_OI_CONCENTRATION", Some(0.0), Some(1.0))?
        {
            self.patterns.put_wall.oi_concentration = v;
        }
        if let Some(v) =
            optional_setting_f64(settings, "PUT_WALL_STRIKE_RANGE", Some(0.0), Some(1.0))?
        {
            self.patterns.put_wall.strike_range = v;
        }
        if let Some(raw) = optional_setting(settings, "FEATURE_NORMALIZATION") {
            self.features.normalization = Normalization::parse(raw)?;
        }
        if let Some(v) = optional_setting_bool(settings, "FEATURE_INCLUDE_UNMATCHED")? {
            self.features.include_unmatched = v;
        }
        if let Some(v) = optional_setting_f64(settings, "CLUSTER_EPSILON", Some(0.0), None)? {
            self.clustering.epsilon = v;
        }
        if let Some(v) = optional_setting_usize(settings, "CLUSTER_MIN_SAMPLES", 1)? {
            self.clustering.min_samples = v;
        }
        if let Some(v) = optional_setting_usize(settings, "TARGET_DTE_MIN", 0)? {
            self.signals.target_dte_min = v as i64;
        }
        if let Some(v) = optional_setting_usize(settings, "TARGET_DTE_MAX", 0)? {
            self.signals.target_dte_max = v as i64;
        }
        if let Some(v) = optional_setting_usize(settings, "DTE_TOLERANCE", 0)? {
            self.signals.dte_tolerance = v as i64;
        }
        if let Some(v) = optional_setting_usize(settings, "MAX_POSITIONS", 0)? {
            self.signals.max_positions = v;
        }
        if let Some(v) = optional_setting_f64(settings, "POSITION_SIZE", Some(0.0), Some(1.0))? {
            self.signals.position_size = v;
        }
        if let Some(v) =
            optional_setting_f64(settings, "SUCCESS_RATE_WEIGHT", Some(0.0), Some(1.0))?
        {
            self.signals.success_rate_weight = v;
        }
        if let Some(v) =
            optional_setting_f64(settings, "MIN_UNIVERSE_COVERAGE", Some(0.0), Some(1.0))?
        {
            self.min_universe_coverage = v;
        }
        if let Some(v) = optional_setting_usize(settings, "WORKER_THREADS", 1)? {
            self.worker_threads = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.history.lookback_days > self.history.horizon_days {
            return Err(anyhow!(
                "LOOKBACK_DAYS ({}) must be <= HORIZON_DAYS ({})",
                self.history.lookback_days,
                self.history.horizon_days
            ));
        }
        if self.signals.target_dte_max < self.signals.target_dte_min {
            return Err(anyhow!(
                "TARGET_DTE_MAX ({}) must be >= TARGET_DTE_MIN ({})",
                self.signals.target_dte_max,
                self.signals.target_dte_min
            ));
        }
        if !(self.clustering.epsilon > 0.0) {
            return Err(anyhow!(
                "CLUSTER_EPSILON must be > 0 (value: {})",
                self.clustering.epsilon
            ));
        }
        Ok(())
    }
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn optional_setting_f64(
    settings: &HashMap<String, String>,
    key: &str,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<Option<f64>> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(None);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if let Some(min_value) = min {
        if value < min_value {
            return Err(anyhow!(
                "Setting {} must be >= {} (value: {})",
                key,
                min_value,
                raw
            ));
        }
    }
    if let Some(max_value) = max {
        if value > max_value {
            return Err(anyhow!(
                "Setting {} must be <= {} (value: {})",
                key,
                max_value,
                raw
            ));
        }
    }
    Ok(Some(value))
}

fn optional_setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    min: usize,
) -> Result<Option<usize>> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(None);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if value.fract() != 0.0 {
        return Err(anyhow!(
            "Setting {} must be an integer (value: {})",
            key,
            raw
        ));
    }
    if value < min as f64 {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(Some(value as usize))
}

fn optional_setting_bool(settings: &HashMap<String, String>, key: &str) -> Result<Option<bool>> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(None);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(anyhow!(
            "Setting {} must be a boolean (value: {})",
            key,
            raw
        )),
    }
}
