//! Category filter: which reports the operator wants to hear about.
//!
//! The extended-mode switch is resolved once into a `WatchPolicy` so the
//! classifier never re-reads the boolean.

use std::collections::BTreeSet;

use crate::config::WatchConfig;
use crate::types::{AlarmType, DecodedReport, MicECategory, ReportCategory};

/// APRS-IS server-side filter for position packets.
pub const FEED_FILTER_POSITIONS: &str = "t/p";

/// Resolved watch policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchPolicy {
    /// Mic-E categories only; alarm-type reports never match.
    Standard { active: BTreeSet<MicECategory> },
    /// Mic-E categories plus the listed alarm types.
    Extended {
        active: BTreeSet<MicECategory>,
        alarms: BTreeSet<AlarmType>,
    },
}

impl WatchPolicy {
    pub fn from_config(config: &WatchConfig) -> Self {
        let active = config.active_categories.clone();
        if config.extended_mode {
            WatchPolicy::Extended {
                active,
                alarms: config.extended_alarm_categories.clone(),
            }
        } else {
            WatchPolicy::Standard { active }
        }
    }

    pub fn is_watched(&self, category: &ReportCategory) -> bool {
        match (self, category) {
            (WatchPolicy::Standard { active }, ReportCategory::MicE(c))
            | (WatchPolicy::Extended { active, .. }, ReportCategory::MicE(c)) => {
                active.contains(c)
            }
            (WatchPolicy::Standard { .. }, ReportCategory::Alarm(_)) => false,
            (WatchPolicy::Extended { alarms, .. }, ReportCategory::Alarm(a)) => alarms.contains(a),
        }
    }

    /// One-line summary, e.g. `standard: PRIORITY, EMERGENCY`.
    pub fn describe(&self) -> String {
        fn join<T: ToString>(items: impl Iterator<Item = T>) -> String {
            let names: Vec<String> = items.map(|i| i.to_string()).collect();
            if names.is_empty() {
                "-".into()
            } else {
                names.join(", ")
            }
        }
        match self {
            WatchPolicy::Standard { active } => format!("standard: {}", join(active.iter())),
            WatchPolicy::Extended { active, alarms } => format!(
                "extended: {} + alarms {}",
                join(active.iter()),
                join(alarms.iter())
            ),
        }
    }
}

/// True if the report's category is one the config monitors.
pub fn is_watched(report: &DecodedReport, config: &WatchConfig) -> bool {
    WatchPolicy::from_config(config).is_watched(&report.category)
}

/// APRS-IS filter string for the feed connection.
///
/// Adds a range filter (`r/lat/lon/km`) around the observer when a range
/// limit is configured, so the server drops far-away traffic early.
pub fn feed_filter(config: &WatchConfig) -> String {
    match config.range_limit_km {
        Some(km) => format!(
            "{} r/{:.4}/{:.4}/{}",
            FEED_FILTER_POSITIONS,
            config.observer.lat,
            config.observer.lon,
            km.ceil() as u64
        ),
        None => FEED_FILTER_POSITIONS.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
