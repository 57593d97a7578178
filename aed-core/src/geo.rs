//! Great-circle distance, bearing and range checks.

use std::fmt;

use crate::types::Position;

/// Earth mean radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

const KM_TO_MILES: f64 = 0.621371;

/// 16-point compass rose, clockwise from north.
const HEADINGS: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW",
    "NNW",
];

/// Great-circle distance in kilometres (haversine).
pub fn distance_km(a: Position, b: Position) -> f64 {
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();
    let h = (dlat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    // Rounding can push h slightly outside [0, 1] near antipodes.
    let h = h.clamp(0.0, 1.0);
    EARTH_RADIUS_KM * 2.0 * h.sqrt().atan2((1.0 - h).sqrt())
}

/// True if `point` lies within `limit_km` of `observer`. `None` means no limit.
///
/// The boundary is inclusive.
pub fn within_range(observer: Position, point: Position, limit_km: Option<f64>) -> bool {
    within_limit(distance_km(observer, point), limit_km)
}

/// Range rule on an already computed distance. Inclusive; `None` means no limit.
pub fn within_limit(distance_km: f64, limit_km: Option<f64>) -> bool {
    limit_km.map_or(true, |limit| distance_km <= limit)
}

/// Initial bearing from `a` to `b` in degrees, normalized to `[0, 360)`.
pub fn bearing_deg(a: Position, b: Position) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlon = (b.lon - a.lon).to_radians();
    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    let bearing = y.atan2(x).to_degrees();
    (bearing + 360.0) % 360.0
}

/// Compass label (N, NNE, ... NNW) for a bearing in degrees.
pub fn compass_heading(bearing: f64) -> &'static str {
    let step = 360.0 / HEADINGS.len() as f64;
    let idx = (bearing.rem_euclid(360.0) / step).round() as usize;
    HEADINGS[idx % HEADINGS.len()]
}

pub fn km_to_miles(km: f64) -> f64 {
    km * KM_TO_MILES
}

/// Maidenhead locator subdivisions: field, square, subsquare, extended square.
const LOCATOR_PAIRS: [(u8, u32); 4] = [(b'A', 18), (b'0', 10), (b'a', 24), (b'0', 10)];

/// Maidenhead grid locator with `pairs` character pairs (1..=4).
///
/// Three pairs give the usual 6-character form, e.g. `JO41du`. Coordinates
/// on the upper edge (lat 90, lon 180) fall into the last cell.
pub fn maidenhead(pos: Position, pairs: usize) -> String {
    let mut lon = (pos.lon + 180.0).clamp(0.0, 360.0);
    let mut lat = (pos.lat + 90.0).clamp(0.0, 180.0);
    let (mut lon_size, mut lat_size) = (360.0, 180.0);
    let mut out = String::with_capacity(pairs * 2);

    for &(base, cells) in LOCATOR_PAIRS.iter().take(pairs.clamp(1, 4)) {
        lon_size /= f64::from(cells);
        lat_size /= f64::from(cells);
        let lon_idx = ((lon / lon_size) as u32).min(cells - 1);
        let lat_idx = ((lat / lat_size) as u32).min(cells - 1);
        lon -= f64::from(lon_idx) * lon_size;
        lat -= f64::from(lat_idx) * lat_size;
        out.push(char::from(base + lon_idx as u8));
        out.push(char::from(base + lat_idx as u8));
    }
    out
}

/// One coordinate as degrees, minutes and seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dms {
    pub degrees: u32,
    pub minutes: u32,
    /// Seconds in hundredths, so `1996` is 19.96".
    pub centiseconds: u32,
    pub hemisphere: char,
}

impl Dms {
    fn from_degrees(value: f64, positive: char, negative: char) -> Self {
        let total = (value.abs() * 360_000.0).round() as u64;
        Dms {
            degrees: (total / 360_000) as u32,
            minutes: (total % 360_000 / 6_000) as u32,
            centiseconds: (total % 6_000) as u32,
            hemisphere: if value < 0.0 { negative } else { positive },
        }
    }

    pub fn latitude(lat: f64) -> Self {
        Dms::from_degrees(lat, 'N', 'S')
    }

    pub fn longitude(lon: f64) -> Self {
        Dms::from_degrees(lon, 'E', 'W')
    }
}

impl fmt::Display for Dms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}°{:02}'{:02}.{:02}\"{}",
            self.degrees,
            self.minutes,
            self.centiseconds / 100,
            self.centiseconds % 100,
            self.hemisphere
        )
    }
}

/// `51°50'19.96"N, 8°19'36.41"E`
pub fn format_dms(pos: Position) -> String {
    format!("{}, {}", Dms::latitude(pos.lat), Dms::longitude(pos.lon))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
