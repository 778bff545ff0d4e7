//! v1 cross-boundary contracts for the lotto kernel, its stores, and the presentation layer.

pub mod serde_u64_string;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SCHEMA_VERSION_V1: &str = "1.0";

/// Lower and upper bound of the instability scale.
pub const INSTABILITY_MIN: f64 = 0.0;
pub const INSTABILITY_MAX: f64 = 100.0;

/// Post-pull instability above which the pull result carries a warning flag.
pub const PULL_WARNING_FLOOR: f64 = 85.0;

/// Longest accepted period for either periodic tick.
pub const MAX_TICK_SECS: u64 = 86_400;

pub type UserId = u64;
pub type LootId = u64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TierName {
    Common,
    Rare,
    Epic,
    Legendary,
    Mythic,
    RealityBreaker,
}

impl TierName {
    /// Most common first. Position in this list is the tier's rank.
    pub const ALL: [TierName; 6] = [
        TierName::Common,
        TierName::Rare,
        TierName::Epic,
        TierName::Legendary,
        TierName::Mythic,
        TierName::RealityBreaker,
    ];

    pub fn rank(self) -> usize {
        self as usize
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Common => "Common",
            Self::Rare => "Rare",
            Self::Epic => "Epic",
            Self::Legendary => "Legendary",
            Self::Mythic => "Mythic",
            Self::RealityBreaker => "Reality Breaker",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Common => "common",
            Self::Rare => "rare",
            Self::Epic => "epic",
            Self::Legendary => "legendary",
            Self::Mythic => "mythic",
            Self::RealityBreaker => "reality_breaker",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|tier| tier.as_str() == raw || tier.display_name() == raw)
    }
}

impl fmt::Display for TierName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Closed interval `[min, max]` sampled uniformly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct UniformRange {
    pub min: f64,
    pub max: f64,
}

impl UniformRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    fn check(&self, field: &'static str, lower: f64, upper: f64) -> Result<(), ConfigError> {
        if !self.min.is_finite() || !self.max.is_finite() {
            return Err(ConfigError::NonFinite(field));
        }
        if self.min > self.max {
            return Err(ConfigError::InvertedRange {
                field,
                min: self.min,
                max: self.max,
            });
        }
        if self.min < lower || self.max > upper {
            return Err(ConfigError::OutOfBounds { field, lower, upper });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub schema_version: String,
    #[serde(with = "serde_u64_string::option")]
    pub seed: Option<u64>,
    pub message_increment: f64,
    pub pull_increment: UniformRange,
    pub stabilize_reduction: UniformRange,
    pub passive_increment: UniformRange,
    pub collapse_threshold: UniformRange,
    pub wipe_fraction: UniformRange,
    pub pull_cost: i64,
    pub stabilize_cost: i64,
    pub starting_credits: i64,
    pub passive_tick_secs: u64,
    pub collapse_check_secs: u64,
    pub top_holders_limit: usize,
    pub tremor_floor: f64,
    pub tremor_chance: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            seed: None,
            message_increment: 0.3,
            pull_increment: UniformRange::new(1.5, 3.5),
            stabilize_reduction: UniformRange::new(5.0, 15.0),
            passive_increment: UniformRange::new(0.5, 2.0),
            collapse_threshold: UniformRange::new(95.0, 99.0),
            wipe_fraction: UniformRange::new(0.5, 0.8),
            pull_cost: 1,
            stabilize_cost: 10,
            starting_credits: 10,
            passive_tick_secs: 300,
            collapse_check_secs: 30,
            top_holders_limit: 10,
            tremor_floor: 80.0,
            tremor_chance: 0.02,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.schema_version != SCHEMA_VERSION_V1 {
            return Err(ConfigError::UnsupportedSchema(self.schema_version.clone()));
        }
        if !self.message_increment.is_finite() {
            return Err(ConfigError::NonFinite("message_increment"));
        }
        if !(0.0..=INSTABILITY_MAX).contains(&self.message_increment) {
            return Err(ConfigError::OutOfBounds {
                field: "message_increment",
                lower: 0.0,
                upper: INSTABILITY_MAX,
            });
        }
        self.pull_increment
            .check("pull_increment", 0.0, INSTABILITY_MAX)?;
        self.stabilize_reduction
            .check("stabilize_reduction", 0.0, INSTABILITY_MAX)?;
        self.passive_increment
            .check("passive_increment", 0.0, INSTABILITY_MAX)?;
        self.collapse_threshold
            .check("collapse_threshold", INSTABILITY_MIN, INSTABILITY_MAX)?;
        self.wipe_fraction.check("wipe_fraction", 0.0, 1.0)?;

        if self.pull_cost <= 0 {
            return Err(ConfigError::NonPositive("pull_cost"));
        }
        if self.stabilize_cost <= 0 {
            return Err(ConfigError::NonPositive("stabilize_cost"));
        }
        if self.starting_credits < 0 {
            return Err(ConfigError::Negative("starting_credits"));
        }
        check_period("passive_tick_secs", self.passive_tick_secs)?;
        check_period("collapse_check_secs", self.collapse_check_secs)?;
        if !self.tremor_chance.is_finite() || !(0.0..=1.0).contains(&self.tremor_chance) {
            return Err(ConfigError::OutOfBounds {
                field: "tremor_chance",
                lower: 0.0,
                upper: 1.0,
            });
        }
        Ok(())
    }
}

fn check_period(field: &'static str, secs: u64) -> Result<(), ConfigError> {
    if secs == 0 {
        return Err(ConfigError::NonPositive(field));
    }
    if secs > MAX_TICK_SECS {
        return Err(ConfigError::OutOfBounds {
            field,
            lower: 1.0,
            upper: MAX_TICK_SECS as f64,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    UnsupportedSchema(String),
    NonFinite(&'static str),
    NonPositive(&'static str),
    Negative(&'static str),
    InvertedRange {
        field: &'static str,
        min: f64,
        max: f64,
    },
    OutOfBounds {
        field: &'static str,
        lower: f64,
        upper: f64,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedSchema(version) => {
                write!(f, "unsupported config schema_version {version}")
            }
            Self::NonFinite(field) => write!(f, "{field} must be finite"),
            Self::NonPositive(field) => write!(f, "{field} must be positive"),
            Self::Negative(field) => write!(f, "{field} must not be negative"),
            Self::InvertedRange { field, min, max } => {
                write!(f, "{field} has min {min} greater than max {max}")
            }
            Self::OutOfBounds {
                field,
                lower,
                upper,
            } => write!(f, "{field} must lie within [{lower}, {upper}]"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    #[serde(with = "serde_u64_string")]
    pub user_id: UserId,
    pub credits: i64,
    pub total_pulls: u64,
    pub total_stabilizations: u64,
}

impl Account {
    pub fn new(user_id: UserId, credits: i64) -> Self {
        Self {
            user_id,
            credits,
            total_pulls: 0,
            total_stabilizations: 0,
        }
    }
}

/// A drawn item that has not been assigned a store id yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LootDraft {
    #[serde(with = "serde_u64_string")]
    pub owner_id: UserId,
    pub tier: TierName,
    pub item_name: String,
    pub acquired_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LootItem {
    pub loot_id: LootId,
    #[serde(with = "serde_u64_string")]
    pub owner_id: UserId,
    pub tier: TierName,
    pub item_name: String,
    pub acquired_at: DateTime<Utc>,
}

impl LootItem {
    pub fn from_draft(loot_id: LootId, draft: LootDraft) -> Self {
        Self {
            loot_id,
            owner_id: draft.owner_id,
            tier: draft.tier,
            item_name: draft.item_name,
            acquired_at: draft.acquired_at,
        }
    }
}

/// Persisted form of the global universe singleton.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UniverseRecord {
    pub instability: f64,
    pub collapse_threshold: f64,
    pub last_collapse_at: Option<DateTime<Utc>>,
    pub total_messages: u64,
    pub collapse_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HolderStanding {
    #[serde(with = "serde_u64_string")]
    pub user_id: UserId,
    pub item_count: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TierRate {
    pub tier: TierName,
    pub probability: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TierCount {
    pub tier: TierName,
    pub count: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InstabilityLevel {
    Stable,
    MinorFluctuations,
    QuantumTurbulence,
    CriticalInstability,
    ImminentCollapse,
    RealityFailure,
}

impl InstabilityLevel {
    pub fn from_instability(instability: f64) -> Self {
        if instability < 20.0 {
            Self::Stable
        } else if instability < 40.0 {
            Self::MinorFluctuations
        } else if instability < 60.0 {
            Self::QuantumTurbulence
        } else if instability < 80.0 {
            Self::CriticalInstability
        } else if instability < 95.0 {
            Self::ImminentCollapse
        } else {
            Self::RealityFailure
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::Stable => "Stable Universe",
            Self::MinorFluctuations => "Minor Fluctuations",
            Self::QuantumTurbulence => "Quantum Turbulence",
            Self::CriticalInstability => "Critical Instability",
            Self::ImminentCollapse => "Imminent Collapse",
            Self::RealityFailure => "Reality Failure",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RejectReason {
    InsufficientCredits { required: i64, available: i64 },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientCredits {
                required,
                available,
            } => write!(
                f,
                "insufficient credits: need {required}, have {available}"
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PullOutcome {
    pub success: bool,
    pub loot: Option<LootItem>,
    pub reason: Option<RejectReason>,
    pub instability: f64,
    pub credits_remaining: i64,
    pub warning: bool,
}

impl PullOutcome {
    pub fn rejected(reason: RejectReason, instability: f64, credits: i64) -> Self {
        Self {
            success: false,
            loot: None,
            reason: Some(reason),
            instability,
            credits_remaining: credits,
            warning: false,
        }
    }

    pub fn tier(&self) -> Option<TierName> {
        self.loot.as_ref().map(|loot| loot.tier)
    }

    pub fn item(&self) -> Option<&str> {
        self.loot.as_ref().map(|loot| loot.item_name.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StabilizeOutcome {
    pub success: bool,
    /// Reduction that was drawn; the applied change can be smaller near the floor.
    pub delta: Option<f64>,
    pub reason: Option<RejectReason>,
    pub instability_before: f64,
    pub instability: f64,
    pub credits_remaining: i64,
}

impl StabilizeOutcome {
    pub fn rejected(reason: RejectReason, instability: f64, credits: i64) -> Self {
        Self {
            success: false,
            delta: None,
            reason: Some(reason),
            instability_before: instability,
            instability,
            credits_remaining: credits,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MessageOutcome {
    pub instability: f64,
    pub total_messages: u64,
    pub tremor: bool,
}

/// Broadcast payload emitted when a collapse has been committed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollapseReport {
    pub removed_items: u64,
    pub total_items_before: u64,
    pub wipe_fraction: f64,
    pub new_threshold: f64,
    pub collapse_count: u64,
    pub collapsed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusView {
    pub schema_version: String,
    pub instability: f64,
    pub threshold: f64,
    pub level: InstabilityLevel,
    pub top_holders: Vec<HolderStanding>,
    pub drop_rates: Vec<TierRate>,
    pub collapse_count: u64,
    pub last_collapse_at: Option<DateTime<Utc>>,
    pub total_messages: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InsufficientCredits,
    InvalidInstability,
    PersistenceUnavailable,
    InvalidConfig,
    InternalError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    pub schema_version: String,
    pub error_code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(error_code: ErrorCode, message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            error_code,
            message: message.into(),
            details,
        }
    }
}

impl From<RejectReason> for ApiError {
    fn from(reason: RejectReason) -> Self {
        match reason {
            RejectReason::InsufficientCredits { .. } => {
                Self::new(ErrorCode::InsufficientCredits, reason.to_string(), None)
            }
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.error_code, self.message)?;
        if let Some(details) = &self.details {
            write!(f, " ({details})")?;
        }
        Ok(())
    }
}
