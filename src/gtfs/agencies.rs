use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use tracing::{info, warn};

use super::tables::{non_empty, scan_rows, AgencyRow, RouteRow};
use super::{open_table, StaticDataError};
use crate::models::{Agency, RouteSummary};

/// Read `agency.txt` into `agency_id → agency_name`.
///
/// The table is optional: a missing or unreadable file yields an empty map
/// and callers fall back to placeholder names.
pub fn load_agency_names(path: &Path) -> HashMap<String, String> {
    let file = match open_table(path) {
        Ok(f) => f,
        Err(StaticDataError::Missing(_)) => {
            warn!("[GTFS] {} not found, agency names unavailable", path.display());
            return HashMap::new();
        }
        Err(e) => {
            warn!("[GTFS] {}", e);
            return HashMap::new();
        }
    };

    let mut names = HashMap::new();
    let scanned = scan_rows(file, "agency", |row: AgencyRow| {
        if let (Some(id), Some(name)) = (non_empty(&row.agency_id), non_empty(&row.agency_name)) {
            names.insert(id.to_string(), name.to_string());
        }
    });

    if let Err(e) = scanned {
        warn!("[GTFS] Failed to read {}: {}", path.display(), e);
        return HashMap::new();
    }

    info!("[GTFS] Agency name map loaded with {} entries", names.len());
    names
}

/// Display name for an agency, with a placeholder for unknown ids.
pub fn agency_name(names: &HashMap<String, String>, id: &str) -> String {
    names
        .get(id)
        .cloned()
        .unwrap_or_else(|| format!("Unknown Agency (ID: {})", id))
}

/// Every agency that operates at least one route, sorted by id.
pub fn list_agencies(
    routes_path: &Path,
    names: &HashMap<String, String>,
) -> Result<Vec<Agency>, StaticDataError> {
    let mut ids = BTreeSet::new();
    scan_rows(open_table(routes_path)?, "routes", |row: RouteRow| {
        if let Some(id) = non_empty(&row.agency_id) {
            ids.insert(id.to_string());
        }
    })
    .map_err(|e| StaticDataError::csv(routes_path, e))?;

    if ids.is_empty() {
        warn!("[GTFS] No agency ids found in {}", routes_path.display());
    }

    Ok(ids
        .into_iter()
        .map(|id| Agency {
            name: agency_name(names, &id),
            id,
        })
        .collect())
}

/// Routes operated by any of `agency_ids`, one entry per realtime id.
///
/// Sorted by the leading number of the short name (`53` and `53/3` sort
/// together), then by the full short name; non-numeric names go last.
pub fn routes_by_agency(
    routes_path: &Path,
    agency_ids: &HashSet<String>,
) -> Result<Vec<RouteSummary>, StaticDataError> {
    let mut seen = HashSet::new();
    let mut routes = Vec::new();

    scan_rows(open_table(routes_path)?, "routes", |row: RouteRow| {
        let (Some(agency_id), Some(short_name)) =
            (non_empty(&row.agency_id), non_empty(&row.route_short_name))
        else {
            return;
        };
        if !agency_ids.contains(agency_id) {
            return;
        }

        let realtime_id = format!("{}_{}", agency_id, short_name);
        if !seen.insert(realtime_id.clone()) {
            return;
        }

        routes.push(RouteSummary {
            realtime_id,
            short_name: short_name.to_string(),
            long_name: row.route_long_name.clone().unwrap_or_default(),
            agency_id: agency_id.to_string(),
            color: non_empty(&row.route_color).map(str::to_string),
        });
    })
    .map_err(|e| StaticDataError::csv(routes_path, e))?;

    routes.sort_by(|a, b| route_sort_key(&a.short_name).cmp(&route_sort_key(&b.short_name)));
    Ok(routes)
}

/// `(non_numeric, leading number, short name)`.
fn route_sort_key(short_name: &str) -> (bool, i64, &str) {
    let primary = short_name
        .split('/')
        .next()
        .and_then(|part| part.trim().parse::<i64>().ok());
    match primary {
        Some(n) => (false, n, short_name),
        None => (true, 0, short_name),
    }
}
