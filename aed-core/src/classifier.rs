//! Per-report classification: category filter, range check, dedup.
//!
//! Each report moves through `Received -> CategoryChecked -> RangeChecked ->
//! Deduplicated` and ends as either `Emitted` (one `NotificationEvent`) or
//! `Suppressed` with a reason. Nothing is retried and nothing panics across
//! this boundary; a bad report is logged and suppressed.
//!
//! The cache lock is held for the whole check-and-update, so concurrent
//! duplicates for one source cannot both be emitted. If the lock is poisoned
//! the classifier fails closed: it logs the fault and emits.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::cache::{CacheCheck, ExpiringCache};
use crate::clock::{Clock, SystemClock};
use crate::config::WatchConfig;
use crate::filter::WatchPolicy;
use crate::fingerprint::Fingerprint;
use crate::geo;
use crate::types::{DecodedReport, InputDefect, NotificationEvent};

/// Why a report produced no notification.
#[derive(Debug, Clone, PartialEq)]
pub enum SuppressReason {
    CategoryNotWatched,
    OutOfRange { distance_km: f64 },
    Duplicate,
    Malformed(InputDefect),
}

impl fmt::Display for SuppressReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuppressReason::CategoryNotWatched => write!(f, "category not watched"),
            SuppressReason::OutOfRange { distance_km } => {
                write!(f, "out of range ({distance_km:.1} km)")
            }
            SuppressReason::Duplicate => write!(f, "duplicate"),
            SuppressReason::Malformed(defect) => write!(f, "malformed: {defect}"),
        }
    }
}

/// Terminal outcome for one report.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Emitted(NotificationEvent),
    Suppressed(SuppressReason),
}

impl Classification {
    pub fn is_emitted(&self) -> bool {
        matches!(self, Classification::Emitted(_))
    }

    pub fn event(&self) -> Option<&NotificationEvent> {
        match self {
            Classification::Emitted(e) => Some(e),
            Classification::Suppressed(_) => None,
        }
    }

    pub fn into_event(self) -> Option<NotificationEvent> {
        match self {
            Classification::Emitted(e) => Some(e),
            Classification::Suppressed(_) => None,
        }
    }

    pub fn reason(&self) -> Option<&SuppressReason> {
        match self {
            Classification::Emitted(_) => None,
            Classification::Suppressed(r) => Some(r),
        }
    }
}

/// Snapshot of classifier counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassifierStats {
    pub received: u64,
    pub emitted: u64,
    pub not_watched: u64,
    pub out_of_range: u64,
    pub duplicates: u64,
    pub malformed: u64,
    pub cache_faults: u64,
}

impl ClassifierStats {
    pub fn suppressed(&self) -> u64 {
        self.not_watched + self.out_of_range + self.duplicates + self.malformed
    }
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    emitted: AtomicU64,
    not_watched: AtomicU64,
    out_of_range: AtomicU64,
    duplicates: AtomicU64,
    malformed: AtomicU64,
    cache_faults: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Decides, per report, whether the operator gets notified.
///
/// `Send + Sync`; share it behind an `Arc` when several feeds deliver
/// reports concurrently.
pub struct EventClassifier {
    config: WatchConfig,
    policy: WatchPolicy,
    cache: Mutex<ExpiringCache>,
    clock: Arc<dyn Clock>,
    counters: Counters,
}

impl EventClassifier {
    /// Build a classifier on the wall clock. `config` must already be validated.
    pub fn new(config: WatchConfig) -> Self {
        EventClassifier::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: WatchConfig, clock: Arc<dyn Clock>) -> Self {
        let cache = ExpiringCache::from_config(&config);
        EventClassifier::with_cache(config, cache, clock)
    }

    pub fn with_cache(config: WatchConfig, cache: ExpiringCache, clock: Arc<dyn Clock>) -> Self {
        EventClassifier {
            policy: WatchPolicy::from_config(&config),
            config,
            cache: Mutex::new(cache),
            clock,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    pub fn policy(&self) -> &WatchPolicy {
        &self.policy
    }

    /// Classify a report at the injected clock's current time.
    pub fn classify(&self, report: &DecodedReport) -> Classification {
        self.classify_at(report, self.clock.now())
    }

    /// Classify a report at an explicit instant.
    pub fn classify_at(&self, report: &DecodedReport, now: DateTime<Utc>) -> Classification {
        bump(&self.counters.received);

        if let Some(defect) = report.defect() {
            warn!(source = %report.source_id, %defect, "dropping malformed report");
            bump(&self.counters.malformed);
            return Classification::Suppressed(SuppressReason::Malformed(defect));
        }

        // Received -> CategoryChecked
        if !self.policy.is_watched(&report.category) {
            debug!(
                source = %report.source_id,
                category = %report.category,
                "category not watched"
            );
            bump(&self.counters.not_watched);
            return Classification::Suppressed(SuppressReason::CategoryNotWatched);
        }

        // CategoryChecked -> RangeChecked (reports without a position pass)
        let distance_km = report
            .position
            .map(|pos| geo::distance_km(self.config.observer, pos));
        if let Some(distance_km) = distance_km {
            if !geo::within_limit(distance_km, self.config.range_limit_km) {
                debug!(
                    source = %report.source_id,
                    distance_km,
                    limit = ?self.config.range_limit_km,
                    "out of range"
                );
                bump(&self.counters.out_of_range);
                return Classification::Suppressed(SuppressReason::OutOfRange { distance_km });
            }
        }

        // RangeChecked -> Deduplicated
        let fingerprint = Fingerprint::compute(report);
        let check = self.check_cache(&report.source_id, fingerprint, now);
        if check.is_duplicate {
            debug!(source = %report.source_id, "duplicate within ttl");
            bump(&self.counters.duplicates);
            return Classification::Suppressed(SuppressReason::Duplicate);
        }

        // Deduplicated -> Emitted
        let event = self.build_event(report, distance_km);
        info!(
            source = %event.source_id,
            category = %event.category,
            distance_km = ?event.distance_km,
            "emergency report"
        );
        bump(&self.counters.emitted);
        Classification::Emitted(event)
    }

    fn check_cache(
        &self,
        source_id: &str,
        fingerprint: Fingerprint,
        now: DateTime<Utc>,
    ) -> CacheCheck {
        match self.cache.lock() {
            Ok(mut cache) => cache.check_and_update(source_id, fingerprint, now),
            Err(poisoned) => {
                error!(source = %source_id, "dedup cache lock poisoned; treating report as new");
                bump(&self.counters.cache_faults);
                self.cache.clear_poison();
                let mut cache = poisoned.into_inner();
                cache.check_and_update(source_id, fingerprint, now);
                CacheCheck {
                    is_duplicate: false,
                }
            }
        }
    }

    fn build_event(&self, report: &DecodedReport, distance_km: Option<f64>) -> NotificationEvent {
        let bearing_deg = report
            .position
            .map(|pos| geo::bearing_deg(self.config.observer, pos));
        NotificationEvent {
            source_id: report.source_id.clone(),
            category: report.category,
            position: report.position,
            distance_km,
            bearing_deg,
            heading: bearing_deg.map(geo::compass_heading),
            course: report.course,
            speed: report.speed,
            timestamp: report.received_at,
        }
    }

    /// Number of sources currently held in the dedup cache.
    pub fn tracked_sources(&self) -> usize {
        match self.cache.lock() {
            Ok(cache) => cache.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Drop expired cache entries. Optional; expiry is also enforced on lookup.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        match self.cache.lock() {
            Ok(mut cache) => cache.prune(now),
            Err(poisoned) => poisoned.into_inner().prune(now),
        }
    }

    pub fn stats(&self) -> ClassifierStats {
        let c = &self.counters;
        ClassifierStats {
            received: c.received.load(Ordering::Relaxed),
            emitted: c.emitted.load(Ordering::Relaxed),
            not_watched: c.not_watched.load(Ordering::Relaxed),
            out_of_range: c.out_of_range.load(Ordering::Relaxed),
            duplicates: c.duplicates.load(Ordering::Relaxed),
            malformed: c.malformed.load(Ordering::Relaxed),
            cache_faults: c.cache_faults.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::types::{AlarmType, MicECategory, Position, ReportCategory};
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeSet;

    const OBSERVER: Position = Position {
        lat: 51.838879,
        lon: 8.32678,
    };

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn make_config() -> WatchConfig {
        WatchConfig::new(
            OBSERVER,
            BTreeSet::from([MicECategory::Priority, MicECategory::Emergency]),
        )
    }

    fn make_classifier(config: WatchConfig) -> (EventClassifier, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(t0()));
        (EventClassifier::with_clock(config, clock.clone()), clock)
    }

    fn report(source: &str, category: ReportCategory, position: Option<Position>) -> DecodedReport {
        DecodedReport {
            source_id: source.into(),
            position,
            course: Some(270),
            speed: Some(5.0),
            category,
            received_at: t0(),
        }
    }

    fn emergency(source: &str) -> DecodedReport {
        report(source, ReportCategory::MicE(MicECategory::Emergency), Some(OBSERVER))
    }

    #[test]
    fn test_first_sighting_emitted() {
        let (classifier, _) = make_classifier(make_config());
        let result = classifier.classify(&emergency("DF1JSL-1"));
        let event = result.event().expect("emitted");
        assert_eq!(event.source_id, "DF1JSL-1");
        assert_eq!(event.course, Some(270));
        assert_eq!(event.timestamp, t0());
        assert!(event.distance_km.unwrap() < 1e-6);
    }

    #[test]
    fn test_not_watched_suppressed() {
        let (classifier, _) = make_classifier(make_config());
        let r = report("A", ReportCategory::MicE(MicECategory::OffDuty), Some(OBSERVER));
        assert_eq!(
            classifier.classify(&r),
            Classification::Suppressed(SuppressReason::CategoryNotWatched)
        );
        // Rejected before the cache is touched
        assert_eq!(classifier.tracked_sources(), 0);
    }

    #[test]
    fn test_alarm_in_standard_mode_suppressed() {
        let mut config = make_config();
        config.extended_alarm_categories = BTreeSet::from([AlarmType::Alarm]);
        let (classifier, _) = make_classifier(config);
        let r = report("A", ReportCategory::Alarm(AlarmType::Alarm), Some(OBSERVER));
        assert_eq!(
            classifier.classify(&r).reason(),
            Some(&SuppressReason::CategoryNotWatched)
        );
    }

    #[test]
    fn test_alarm_in_extended_mode_emitted() {
        let mut config = make_config();
        config.extended_mode = true;
        config.extended_alarm_categories = BTreeSet::from([AlarmType::Alarm]);
        let (classifier, _) = make_classifier(config);

        let r = report("A", ReportCategory::Alarm(AlarmType::Alarm), None);
        let result = classifier.classify(&r);
        assert!(result.is_emitted());
        let event = result.into_event().unwrap();
        assert!(event.distance_km.is_none());
        assert!(event.heading.is_none());
    }

    #[test]
    fn test_no_position_skips_range_check() {
        let mut config = make_config();
        config.range_limit_km = Some(1.0);
        let (classifier, _) = make_classifier(config);
        let r = report("A", ReportCategory::MicE(MicECategory::Emergency), None);
        assert!(classifier.classify(&r).is_emitted());
    }

    #[test]
    fn test_out_of_range_suppressed() {
        let mut config = make_config();
        config.range_limit_km = Some(10.0);
        let (classifier, _) = make_classifier(config);
        let far = Position::new(52.288, 8.32678); // ~50 km north
        let r = report("A", ReportCategory::MicE(MicECategory::Emergency), Some(far));
        match classifier.classify(&r) {
            Classification::Suppressed(SuppressReason::OutOfRange { distance_km }) => {
                assert!(distance_km > 45.0 && distance_km < 55.0, "got {distance_km}");
            }
            other => panic!("expected out of range, got {other:?}"),
        }
        assert_eq!(classifier.tracked_sources(), 0);
    }

    #[test]
    fn test_range_boundary_inclusive() {
        let point = Position::new(51.9, 8.4);
        let d = geo::distance_km(OBSERVER, point);

        let mut config = make_config();
        config.range_limit_km = Some(d);
        let (classifier, _) = make_classifier(config);
        let r = report("A", ReportCategory::MicE(MicECategory::Emergency), Some(point));
        assert!(classifier.classify(&r).is_emitted());

        let mut config = make_config();
        config.range_limit_km = Some(d - 1.0);
        let (classifier, _) = make_classifier(config);
        assert!(!classifier.classify(&r).is_emitted());
    }

    #[test]
    fn test_range_check_matches_within_range() {
        let mut config = make_config();
        config.range_limit_km = Some(25.0);
        let (classifier, _) = make_classifier(config);
        let points = [
            Position::new(51.9, 8.4),
            Position::new(52.0, 8.5),
            Position::new(52.1, 8.3),
            Position::new(51.5, 8.0),
            Position::new(-10.0, 120.0),
        ];
        for (i, point) in points.into_iter().enumerate() {
            let r = report(
                &format!("SRC-{i}"),
                ReportCategory::MicE(MicECategory::Emergency),
                Some(point),
            );
            assert_eq!(
                classifier.classify(&r).is_emitted(),
                geo::within_range(OBSERVER, point, Some(25.0)),
                "{point}"
            );
        }
    }

    #[test]
    fn test_duplicate_then_expiry() {
        let mut config = make_config();
        config.ttl_minutes = 5;
        let (classifier, clock) = make_classifier(config);
        let r = emergency("A");

        assert!(classifier.classify(&r).is_emitted());
        clock.advance(Duration::minutes(2));
        assert_eq!(classifier.classify(&r).reason(), Some(&SuppressReason::Duplicate));
        clock.advance(Duration::minutes(8));
        assert!(classifier.classify(&r).is_emitted());
    }

    #[test]
    fn test_movement_emits_again() {
        let (classifier, _) = make_classifier(make_config());
        let a = emergency("A");
        let mut b = a.clone();
        b.position = Some(Position::new(OBSERVER.lat + 0.01, OBSERVER.lon));

        assert!(classifier.classify(&a).is_emitted());
        assert!(classifier.classify(&b).is_emitted());
        assert!(!classifier.classify(&b).is_emitted());
    }

    #[test]
    fn test_malformed_suppressed() {
        let (classifier, _) = make_classifier(make_config());
        let mut r = emergency("A");
        r.position = Some(Position::new(f64::NAN, 8.0));
        assert!(matches!(
            classifier.classify(&r),
            Classification::Suppressed(SuppressReason::Malformed(
                InputDefect::InvalidPosition { .. }
            ))
        ));

        // Stream processing continues
        assert!(classifier.classify(&emergency("A")).is_emitted());
    }

    #[test]
    fn test_event_bearing() {
        let (classifier, _) = make_classifier(make_config());
        let east = Position::new(OBSERVER.lat, OBSERVER.lon + 0.5);
        let r = report("A", ReportCategory::MicE(MicECategory::Priority), Some(east));
        let event = classifier.classify(&r).into_event().unwrap();
        assert_eq!(event.heading, Some("E"));
        assert!(event.distance_km.unwrap() > 30.0);
    }

    #[test]
    fn test_stats() {
        let mut config = make_config();
        config.range_limit_km = Some(10.0);
        let (classifier, _) = make_classifier(config);

        classifier.classify(&emergency("A"));
        classifier.classify(&emergency("A"));
        classifier.classify(&report("B", ReportCategory::MicE(MicECategory::Special), None));
        classifier.classify(&report(
            "C",
            ReportCategory::MicE(MicECategory::Emergency),
            Some(Position::new(0.0, 0.0)),
        ));
        classifier.classify(&report("", ReportCategory::MicE(MicECategory::Emergency), None));

        let stats = classifier.stats();
        assert_eq!(stats.received, 5);
        assert_eq!(stats.emitted, 1);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.not_watched, 1);
        assert_eq!(stats.out_of_range, 1);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.suppressed(), 4);
    }

    #[test]
    fn test_poisoned_cache_fails_closed() {
        let (classifier, _) = make_classifier(make_config());
        assert!(classifier.classify(&emergency("A")).is_emitted());

        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = classifier.cache.lock().unwrap();
            panic!("poison the cache");
        }));
        assert!(classifier.cache.is_poisoned());

        // Would be a duplicate, but the fault forces emission
        assert!(classifier.classify(&emergency("A")).is_emitted());
        assert_eq!(classifier.stats().cache_faults, 1);

        // Lock recovered; dedup works again
        assert!(!classifier.cache.is_poisoned());
        assert!(!classifier.classify(&emergency("A")).is_emitted());
    }

    #[test]
    fn test_concurrent_duplicates_emit_once() {
        let (classifier, _) = make_classifier(make_config());
        let classifier = Arc::new(classifier);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = Arc::clone(&classifier);
                std::thread::spawn(move || c.classify(&emergency("A")).is_emitted())
            })
            .collect();
        let emitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|e| *e)
            .count();
        assert_eq!(emitted, 1);
    }
}
