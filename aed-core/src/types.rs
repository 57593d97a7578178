//! Shared types, error enum, and decoded report types for aed-core.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors produced by aed-core.
#[derive(Debug, Error)]
pub enum AedError {
    #[error("config error: {0}")]
    Config(String),
    #[error("unknown category: {0}")]
    InvalidCategory(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, AedError>;

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// A point on the earth's surface in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
}

impl Position {
    pub fn new(lat: f64, lon: f64) -> Self {
        Position { lat, lon }
    }

    /// True if both coordinates are finite and within ±90 / ±180 degrees.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && self.lat.abs() <= 90.0
            && self.lon.abs() <= 180.0
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}, {:.6}", self.lat, self.lon)
    }
}

// ---------------------------------------------------------------------------
// Mic-E categories
// ---------------------------------------------------------------------------

/// Standard Mic-E message types (M0..M6 plus Emergency).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MicECategory {
    #[serde(alias = "M0: Off Duty")]
    OffDuty,
    #[serde(alias = "M1: En Route")]
    EnRoute,
    #[serde(alias = "M2: In Service")]
    InService,
    #[serde(alias = "M3: Returning")]
    Returning,
    #[serde(alias = "M4: Committed")]
    Committed,
    #[serde(alias = "M5: Special")]
    Special,
    #[serde(alias = "M6: Priority")]
    Priority,
    Emergency,
}

impl MicECategory {
    pub const ALL: [MicECategory; 8] = [
        MicECategory::OffDuty,
        MicECategory::EnRoute,
        MicECategory::InService,
        MicECategory::Returning,
        MicECategory::Committed,
        MicECategory::Special,
        MicECategory::Priority,
        MicECategory::Emergency,
    ];

    /// Config-file spelling, e.g. `EN_ROUTE`.
    pub fn name(&self) -> &'static str {
        match self {
            MicECategory::OffDuty => "OFF_DUTY",
            MicECategory::EnRoute => "EN_ROUTE",
            MicECategory::InService => "IN_SERVICE",
            MicECategory::Returning => "RETURNING",
            MicECategory::Committed => "COMMITTED",
            MicECategory::Special => "SPECIAL",
            MicECategory::Priority => "PRIORITY",
            MicECategory::Emergency => "EMERGENCY",
        }
    }

    /// Text an APRS decoder reports for this message type.
    pub fn aprs_text(&self) -> &'static str {
        match self {
            MicECategory::OffDuty => "M0: Off Duty",
            MicECategory::EnRoute => "M1: En Route",
            MicECategory::InService => "M2: In Service",
            MicECategory::Returning => "M3: Returning",
            MicECategory::Committed => "M4: Committed",
            MicECategory::Special => "M5: Special",
            MicECategory::Priority => "M6: Priority",
            MicECategory::Emergency => "Emergency",
        }
    }
}

impl fmt::Display for MicECategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MicECategory {
    type Err = AedError;

    /// Accepts the config spelling (case-insensitive) or the APRS text.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        MicECategory::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(s) || c.aprs_text() == s)
            .ok_or_else(|| AedError::InvalidCategory(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Extended alarm types
// ---------------------------------------------------------------------------

/// Alarm types carried in the TOCALL of extended emergency beacons.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum AlarmType {
    #[serde(rename = "ALARM")]
    Alarm,
    #[serde(rename = "ALERT")]
    Alert,
    #[serde(rename = "WARNING")]
    Warning,
    #[serde(rename = "WXALARM")]
    WxAlarm,
    #[serde(rename = "EM")]
    Em,
}

impl AlarmType {
    pub const ALL: [AlarmType; 5] = [
        AlarmType::Alarm,
        AlarmType::Alert,
        AlarmType::Warning,
        AlarmType::WxAlarm,
        AlarmType::Em,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AlarmType::Alarm => "ALARM",
            AlarmType::Alert => "ALERT",
            AlarmType::Warning => "WARNING",
            AlarmType::WxAlarm => "WXALARM",
            AlarmType::Em => "EM",
        }
    }
}

impl fmt::Display for AlarmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AlarmType {
    type Err = AedError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        AlarmType::ALL
            .into_iter()
            .find(|a| a.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| AedError::InvalidCategory(s.to_string()))
    }
}

/// Category of a decoded report: a Mic-E status or an extended alarm type.
///
/// Serialized as the bare name, e.g. `"EMERGENCY"` or `"WXALARM"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReportCategory {
    MicE(MicECategory),
    Alarm(AlarmType),
}

impl ReportCategory {
    pub fn is_alarm(&self) -> bool {
        matches!(self, ReportCategory::Alarm(_))
    }

    /// Human label used in notification text.
    pub fn label(&self) -> &'static str {
        match self {
            ReportCategory::MicE(c) => c.aprs_text(),
            ReportCategory::Alarm(a) => a.name(),
        }
    }
}

impl fmt::Display for ReportCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportCategory::MicE(c) => c.fmt(f),
            ReportCategory::Alarm(a) => a.fmt(f),
        }
    }
}

impl FromStr for ReportCategory {
    type Err = AedError;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<MicECategory>()
            .map(ReportCategory::MicE)
            .or_else(|_| s.parse::<AlarmType>().map(ReportCategory::Alarm))
    }
}

// ---------------------------------------------------------------------------
// Decoded report (input)
// ---------------------------------------------------------------------------

/// One beacon message as handed over by the APRS decoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedReport {
    pub source_id: String,
    #[serde(default)]
    pub position: Option<Position>,
    /// Degrees in `[0, 360)`; `None` when unknown.
    #[serde(default)]
    pub course: Option<u16>,
    /// Non-negative; `None` when unknown.
    #[serde(default)]
    pub speed: Option<f64>,
    pub category: ReportCategory,
    pub received_at: DateTime<Utc>,
}

/// Defects that make a report unusable for classification.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputDefect {
    #[error("empty source id")]
    EmptySource,
    #[error("invalid position {lat}, {lon}")]
    InvalidPosition { lat: f64, lon: f64 },
    #[error("invalid speed {0}")]
    InvalidSpeed(f64),
    #[error("course {0} out of range")]
    InvalidCourse(u16),
}

impl DecodedReport {
    /// Return the first defect found, if any.
    pub fn defect(&self) -> Option<InputDefect> {
        if self.source_id.trim().is_empty() {
            return Some(InputDefect::EmptySource);
        }
        if let Some(pos) = self.position {
            if !pos.is_valid() {
                return Some(InputDefect::InvalidPosition {
                    lat: pos.lat,
                    lon: pos.lon,
                });
            }
        }
        if let Some(speed) = self.speed {
            if !speed.is_finite() || speed < 0.0 {
                return Some(InputDefect::InvalidSpeed(speed));
            }
        }
        match self.course {
            Some(course) if course >= 360 => Some(InputDefect::InvalidCourse(course)),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Notification event (output)
// ---------------------------------------------------------------------------

/// A watched, in-range, non-duplicate report ready for rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationEvent {
    pub source_id: String,
    pub category: ReportCategory,
    pub position: Option<Position>,
    pub distance_km: Option<f64>,
    pub bearing_deg: Option<f64>,
    pub heading: Option<&'static str>,
    pub course: Option<u16>,
    pub speed: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
