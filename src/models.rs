use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Serialize, Serializer};
use tracing::warn;

/// Placeholder for feed fields that are absent but must serialize as text.
pub const MISSING: &str = "N/A";

/// Realtime route identifier: `"<agency_id>_<short_name>"`.
///
/// Split on the first underscore only, so short names such as `53/3` or
/// `T_1` stay intact. Without an underscore the whole string is the short
/// name and the agency is unknown.
#[derive(Debug, Clone)]
pub struct RouteId {
    raw: String,
    /// Byte offset of the separating underscore, if any.
    split: Option<usize>,
}

impl RouteId {
    pub fn parse(s: &str) -> Result<Self, RouteIdError> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(RouteIdError::Empty);
        }

        let split = raw.find('_');
        let short_name = match split {
            Some(i) => &raw[i + 1..],
            None => raw,
        };
        if short_name.is_empty() {
            return Err(RouteIdError::MissingShortName(raw.to_string()));
        }

        Ok(RouteId {
            raw: raw.to_string(),
            split,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn agency(&self) -> Option<&str> {
        self.split.map(|i| &self.raw[..i])
    }

    pub fn short_name(&self) -> &str {
        match self.split {
            Some(i) => &self.raw[i + 1..],
            None => &self.raw,
        }
    }
}

// Identity is the raw string; `split` is derived from it.
impl PartialEq for RouteId {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for RouteId {}

impl Hash for RouteId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl PartialOrd for RouteId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RouteId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl Borrow<str> for RouteId {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RouteId {
    type Err = RouteIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RouteId::parse(s)
    }
}

impl Serialize for RouteId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Route identifier parse errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteIdError {
    Empty,
    MissingShortName(String),
}

impl fmt::Display for RouteIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteIdError::Empty => write!(f, "empty route identifier"),
            RouteIdError::MissingShortName(raw) => {
                write!(f, "route identifier '{}' has no short name", raw)
            }
        }
    }
}

impl std::error::Error for RouteIdError {}

/// A set of requested routes. Ordered, so `"53,50"` and `"50,53"` are equal
/// and hash the same.
pub type RouteSet = BTreeSet<RouteId>;

/// Parse a comma-separated `routes` query value.
///
/// Blank entries are dropped; entries that fail to parse are skipped with a
/// warning.
pub fn parse_route_list(list: Option<&str>) -> RouteSet {
    let Some(list) = list else {
        return RouteSet::new();
    };

    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match RouteId::parse(s) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("[WEB] Skipping route '{}': {}", s, e);
                None
            }
        })
        .collect()
}

/// A single polyline vertex.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

/// Ordered path of at least two points.
pub type Polyline = Vec<LatLng>;

/// Distinct polylines per requested route. Targets with no shape are absent.
pub type ResolvedShapes = BTreeMap<RouteId, Vec<Polyline>>;

/// One vehicle from the realtime feed that matched a requested route.
///
/// Absent text fields hold [`MISSING`]; absent numeric fields serialize as
/// `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehiclePosition {
    pub route_id: String,
    pub trip_id: String,
    pub vehicle_id: String,
    pub latitude: Option<f32>,
    pub longitude: Option<f32>,
    pub bearing: Option<f32>,
    /// `"36.0 km/h"`, `"N/A"` or `"Data Error"`.
    pub speed: String,
    /// Local time, RFC 3339.
    pub timestamp: Option<String>,
    pub raw_timestamp: Option<u64>,
}

/// Agency entry for the route picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Agency {
    pub id: String,
    pub name: String,
}

/// A selectable route, keyed by its realtime identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteSummary {
    pub realtime_id: String,
    pub short_name: String,
    pub long_name: String,
    pub agency_id: String,
    pub color: Option<String>,
}
