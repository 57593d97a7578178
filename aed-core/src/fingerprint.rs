//! Motion/status fingerprint used for duplicate detection.
//!
//! Coordinates are rounded to 4 decimal places (~11 m at the equator), so
//! GPS jitter counts as "unchanged" while real movement does not. Course is
//! kept in whole degrees and speed is rounded to whole units.

use crate::types::{DecodedReport, ReportCategory};

/// Latitude/longitude scale: 4 decimal places.
const COORD_SCALE: f64 = 10_000.0;

/// Comparable digest of a report's category, position, course and speed.
///
/// Rounded values are stored as scaled integers so equality is exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    category: ReportCategory,
    position: Option<(i32, i32)>,
    course: Option<u16>,
    speed: Option<i64>,
}

impl Fingerprint {
    pub fn compute(report: &DecodedReport) -> Self {
        Fingerprint {
            category: report.category,
            position: report
                .position
                .map(|p| (scale_coord(p.lat), scale_coord(p.lon))),
            course: report.course.map(|c| c % 360),
            speed: report.speed.map(|s| s.round() as i64),
        }
    }
}

// `as` saturates and maps NaN to 0, so this never fails.
fn scale_coord(deg: f64) -> i32 {
    (deg * COORD_SCALE).round() as i32
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
