//! Row types for the static tables and a tolerant CSV scanner.
//!
//! Only the columns this service uses are declared; extra columns are ignored.
//! Optional columns default to `None` so a table missing one still loads.

use std::io::Read;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

/// One row of `routes.txt`.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteRow {
    #[serde(default)]
    pub route_id: Option<String>,
    #[serde(default)]
    pub agency_id: Option<String>,
    #[serde(default)]
    pub route_short_name: Option<String>,
    #[serde(default)]
    pub route_long_name: Option<String>,
    #[serde(default)]
    pub route_color: Option<String>,
}

/// One row of `trips.txt`. Trips without a shape are common.
#[derive(Debug, Clone, Deserialize)]
pub struct TripRow {
    #[serde(default)]
    pub route_id: Option<String>,
    #[serde(default)]
    pub shape_id: Option<String>,
}

/// One row of `shapes.txt`. All four columns are required; a row with a
/// blank or non-numeric value fails to deserialize and is skipped.
#[derive(Debug, Clone, Deserialize)]
pub struct ShapeRow {
    pub shape_id: String,
    pub shape_pt_lat: f64,
    pub shape_pt_lon: f64,
    pub shape_pt_sequence: u32,
}

/// One row of `agency.txt`.
#[derive(Debug, Clone, Deserialize)]
pub struct AgencyRow {
    #[serde(default)]
    pub agency_id: Option<String>,
    #[serde(default)]
    pub agency_name: Option<String>,
}

/// Row counts from a single table scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub rows: usize,
    pub skipped: usize,
}

/// Stream every well-formed row of a CSV table into `visit`.
///
/// Rows that fail to deserialize are counted and skipped. Only I/O errors
/// abort the scan.
pub fn scan_rows<R, T, F>(reader: R, table: &str, mut visit: F) -> Result<ScanStats, csv::Error>
where
    R: Read,
    T: DeserializeOwned,
    F: FnMut(T),
{
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut stats = ScanStats::default();
    for result in rdr.deserialize::<T>() {
        match result {
            Ok(row) => {
                stats.rows += 1;
                visit(row);
            }
            Err(e) if matches!(e.kind(), csv::ErrorKind::Io(_)) => return Err(e),
            Err(e) => {
                stats.skipped += 1;
                debug!("[GTFS] Skipping malformed {} row: {}", table, e);
            }
        }
    }

    Ok(stats)
}

/// Treat empty strings the same as absent values.
pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_skips_non_numeric_rows() {
        let data = "shape_id,shape_pt_lat,shape_pt_lon,shape_pt_sequence\n\
                    S1,-33.1,151.1,1\n\
                    S1,abc,151.2,2\n\
                    S1,-33.3,151.3,3\n";
        let mut rows: Vec<ShapeRow> = Vec::new();
        let stats = scan_rows(data.as_bytes(), "shapes", |row| rows.push(row)).unwrap();

        assert_eq!(stats, ScanStats { rows: 2, skipped: 1 });
        assert_eq!(rows[0].shape_pt_sequence, 1);
        assert_eq!(rows[1].shape_pt_sequence, 3);
    }

    #[test]
    fn test_scan_ignores_extra_columns_and_whitespace() {
        let data = "route_id, agency_id ,route_short_name,route_type,route_desc\n\
                    R1, 2606 ,55,3,Somewhere\n";
        let mut rows: Vec<RouteRow> = Vec::new();
        scan_rows(data.as_bytes(), "routes", |row| rows.push(row)).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].agency_id.as_deref(), Some("2606"));
        assert_eq!(rows[0].route_short_name.as_deref(), Some("55"));
        assert_eq!(rows[0].route_long_name, None);
    }

    #[test]
    fn test_scan_tolerates_short_rows() {
        let data = "route_id,shape_id\nR1,S1\nR2\n";
        let mut rows: Vec<TripRow> = Vec::new();
        let stats = scan_rows(data.as_bytes(), "trips", |row| rows.push(row)).unwrap();

        assert_eq!(stats.skipped, 0);
        assert_eq!(rows[1].route_id.as_deref(), Some("R2"));
        assert_eq!(rows[1].shape_id, None);
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(&Some("x".into())), Some("x"));
        assert_eq!(non_empty(&Some(String::new())), None);
        assert_eq!(non_empty(&None), None);
    }
}
