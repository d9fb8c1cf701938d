//! Route shape resolution.
//!
//! Maps realtime route identifiers (`"2606_55"`) to polylines by joining
//! `routes` → `trips` → `shapes`. Each scan keeps only rows reachable from the
//! previous one, so the shapes table (one row per point, by far the largest)
//! is never materialized beyond the requested routes.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io::Read;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use lru::LruCache;
use tracing::{debug, error, info};

use super::tables::{non_empty, scan_rows, RouteRow, ShapeRow, TripRow};
use super::{open_table, StaticDataError, StaticFiles};
use crate::models::{LatLng, Polyline, ResolvedShapes, RouteId, RouteSet};

/// Static route ids per requested route.
type RouteMatches<'a> = BTreeMap<&'a RouteId, BTreeSet<String>>;

/// Shape ids per static route id.
type TripShapes = HashMap<String, BTreeSet<String>>;

/// Requested routes indexed for the routes-table scan.
struct TargetIndex<'a> {
    short_names: HashSet<&'a str>,
    /// agency id → short name → requested route.
    by_agency: HashMap<&'a str, HashMap<&'a str, &'a RouteId>>,
}

impl<'a> TargetIndex<'a> {
    fn new(targets: &'a RouteSet) -> Self {
        let mut short_names = HashSet::new();
        let mut by_agency: HashMap<&str, HashMap<&str, &RouteId>> = HashMap::new();

        for target in targets {
            short_names.insert(target.short_name());
            // Without an agency there is no pair to join on.
            match target.agency() {
                Some(agency) => {
                    by_agency
                        .entry(agency)
                        .or_default()
                        .insert(target.short_name(), target);
                }
                None => debug!("[GTFS] '{}' has no agency prefix, cannot resolve", target),
            }
        }

        TargetIndex {
            short_names,
            by_agency,
        }
    }

    fn lookup(&self, agency: &str, short_name: &str) -> Option<&'a RouteId> {
        if !self.short_names.contains(short_name) {
            return None;
        }
        self.by_agency
            .get(agency)
            .and_then(|names| names.get(short_name))
            .copied()
    }
}

/// Scan `routes.txt`: requested route → static route ids.
fn join_routes<'a, R: Read>(
    reader: R,
    index: &TargetIndex<'a>,
) -> Result<RouteMatches<'a>, csv::Error> {
    let mut matches: RouteMatches<'a> = BTreeMap::new();

    scan_rows(reader, "routes", |row: RouteRow| {
        let (Some(route_id), Some(agency), Some(short_name)) = (
            non_empty(&row.route_id),
            non_empty(&row.agency_id),
            non_empty(&row.route_short_name),
        ) else {
            return;
        };

        if let Some(target) = index.lookup(agency, short_name) {
            matches
                .entry(target)
                .or_default()
                .insert(route_id.to_string());
        }
    })?;

    Ok(matches)
}

/// Scan `trips.txt`: static route id → shape ids, for the given routes only.
fn join_trips<R: Read>(reader: R, route_ids: &HashSet<&str>) -> Result<TripShapes, csv::Error> {
    let mut shapes: TripShapes = HashMap::new();

    scan_rows(reader, "trips", |row: TripRow| {
        let (Some(route_id), Some(shape_id)) = (non_empty(&row.route_id), non_empty(&row.shape_id))
        else {
            return;
        };

        if route_ids.contains(route_id) {
            shapes
                .entry(route_id.to_string())
                .or_default()
                .insert(shape_id.to_string());
        }
    })?;

    Ok(shapes)
}

/// Scan `shapes.txt`: shape id → points ordered by sequence.
///
/// Shapes left with fewer than two points are dropped.
fn load_shapes<R: Read>(
    reader: R,
    shape_ids: &HashSet<&str>,
) -> Result<HashMap<String, Polyline>, csv::Error> {
    let mut points: HashMap<String, Vec<(u32, LatLng)>> = HashMap::new();

    let stats = scan_rows(reader, "shapes", |row: ShapeRow| {
        if !shape_ids.contains(row.shape_id.as_str()) {
            return;
        }
        points.entry(row.shape_id).or_default().push((
            row.shape_pt_sequence,
            LatLng {
                lat: row.shape_pt_lat,
                lng: row.shape_pt_lon,
            },
        ));
    })?;

    debug!(
        "[GTFS] Scanned {} shape rows, {} malformed",
        stats.rows, stats.skipped
    );

    Ok(points
        .into_iter()
        .filter_map(|(shape_id, mut pts)| {
            pts.sort_by_key(|(seq, _)| *seq);
            let line: Polyline = pts.into_iter().map(|(_, p)| p).collect();
            (line.len() >= 2).then_some((shape_id, line))
        })
        .collect())
}

/// Structural identity of a polyline. Two shapes with the same ordered
/// points collapse to one entry.
fn polyline_key(line: &Polyline) -> Vec<(u64, u64)> {
    line.iter()
        .map(|p| (p.lat.to_bits(), p.lng.to_bits()))
        .collect()
}

/// Collect the distinct polylines of every requested route.
fn assemble(
    routes: &RouteMatches<'_>,
    trips: &TripShapes,
    shapes: &HashMap<String, Polyline>,
) -> ResolvedShapes {
    let mut resolved = ResolvedShapes::new();

    for (&target, static_ids) in routes {
        let mut seen = HashSet::new();
        let mut lines = Vec::new();

        let shape_ids = static_ids
            .iter()
            .filter_map(|id| trips.get(id))
            .flatten();
        for shape_id in shape_ids {
            if let Some(line) = shapes.get(shape_id) {
                if seen.insert(polyline_key(line)) {
                    lines.push(line.clone());
                }
            }
        }

        if !lines.is_empty() {
            resolved.insert(target.clone(), lines);
        }
    }

    resolved
}

/// Resolve polylines for `targets` by reading the static tables.
///
/// An empty target set returns immediately without touching the files. No
/// matching routes, trips or shapes is not an error: those targets are simply
/// absent from the result.
pub fn resolve_shapes(
    files: &StaticFiles,
    targets: &RouteSet,
) -> Result<ResolvedShapes, StaticDataError> {
    if targets.is_empty() {
        return Ok(ResolvedShapes::new());
    }

    for path in [&files.routes, &files.trips, &files.shapes] {
        if !path.exists() {
            return Err(StaticDataError::Missing(path.clone()));
        }
    }

    let index = TargetIndex::new(targets);
    let routes = join_routes(open_table(&files.routes)?, &index)
        .map_err(|e| StaticDataError::csv(&files.routes, e))?;
    if routes.is_empty() {
        debug!("[GTFS] No routes match {} requested identifiers", targets.len());
        return Ok(ResolvedShapes::new());
    }

    let route_ids: HashSet<&str> = routes.values().flatten().map(String::as_str).collect();
    let trips = join_trips(open_table(&files.trips)?, &route_ids)
        .map_err(|e| StaticDataError::csv(&files.trips, e))?;
    if trips.is_empty() {
        debug!("[GTFS] No trips with shapes for {} static routes", route_ids.len());
    }

    let shape_ids: HashSet<&str> = trips.values().flatten().map(String::as_str).collect();
    let shapes = load_shapes(open_table(&files.shapes)?, &shape_ids)
        .map_err(|e| StaticDataError::csv(&files.shapes, e))?;

    Ok(assemble(&routes, &trips, &shapes))
}

/// Shape resolution with an LRU cache keyed by the exact requested set.
///
/// The lock is held only for lookup and insert. Two concurrent misses on the
/// same set both compute; the results are equal, so the later insert is
/// harmless.
pub struct ShapeResolver {
    cache: Mutex<LruCache<RouteSet, Arc<ResolvedShapes>>>,
}

impl ShapeResolver {
    pub fn new(capacity: NonZeroUsize) -> Self {
        ShapeResolver {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Cached resolution for `targets`.
    ///
    /// Failures to read a required table are logged and yield an empty
    /// mapping that is not cached, so a dataset installed later is picked up.
    pub fn resolve(&self, files: &StaticFiles, targets: &RouteSet) -> Arc<ResolvedShapes> {
        if targets.is_empty() {
            return Arc::new(ResolvedShapes::new());
        }

        if let Some(hit) = self.lock().get(targets) {
            debug!("[GTFS] Shape cache hit for {} routes", targets.len());
            return Arc::clone(hit);
        }

        let started = Instant::now();
        match resolve_shapes(files, targets) {
            Ok(resolved) => {
                info!(
                    "[GTFS] Resolved shapes for {} of {} routes in {:?}",
                    resolved.len(),
                    targets.len(),
                    started.elapsed()
                );
                let resolved = Arc::new(resolved);
                self.lock().put(targets.clone(), Arc::clone(&resolved));
                resolved
            }
            Err(e) => {
                error!("[GTFS] Shape resolution failed: {}", e);
                Arc::new(ResolvedShapes::new())
            }
        }
    }

    /// Drop every cached entry and apply a new capacity. Returns the number
    /// of entries removed.
    pub fn reset(&self, capacity: NonZeroUsize) -> usize {
        let mut cache = self.lock();
        let cleared = cache.len();
        cache.clear();
        cache.resize(capacity);
        cleared
    }

    pub fn cached_sets(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<RouteSet, Arc<ResolvedShapes>>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}
