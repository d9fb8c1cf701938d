use chrono::{DateTime, Local};

use super::transit_realtime::{self, FeedMessage};
use crate::models::{RouteSet, VehiclePosition, MISSING};

/// Shown instead of a speed the feed reported but that cannot be converted.
pub const SPEED_ERROR: &str = "Data Error";

/// Vehicles in `feed` whose trip belongs to one of `targets`.
///
/// Entities without a vehicle position, a trip descriptor or a route id are
/// ignored.
pub fn filter_vehicles(feed: &FeedMessage, targets: &RouteSet) -> Vec<VehiclePosition> {
    feed.entity
        .iter()
        .filter_map(|entity| {
            let vehicle = entity.vehicle.as_ref()?;
            let trip = vehicle.trip.as_ref()?;
            let route_id = trip.route_id.as_deref()?;
            if !targets.contains(route_id) {
                return None;
            }
            Some(to_vehicle_position(route_id, trip, vehicle))
        })
        .collect()
}

fn to_vehicle_position(
    route_id: &str,
    trip: &transit_realtime::TripDescriptor,
    vehicle: &transit_realtime::VehiclePosition,
) -> VehiclePosition {
    let position = vehicle.position.as_ref();

    VehiclePosition {
        route_id: route_id.to_string(),
        trip_id: trip.trip_id.clone().unwrap_or_else(|| MISSING.to_string()),
        vehicle_id: vehicle
            .vehicle
            .as_ref()
            .and_then(|v| v.id.clone())
            .unwrap_or_else(|| MISSING.to_string()),
        latitude: position.and_then(|p| p.latitude),
        longitude: position.and_then(|p| p.longitude),
        bearing: position.and_then(|p| p.bearing),
        speed: format_speed(position.and_then(|p| p.speed)),
        timestamp: vehicle.timestamp.and_then(format_timestamp),
        raw_timestamp: vehicle.timestamp,
    }
}

/// Meters per second to `"X.X km/h"`.
pub fn format_speed(meters_per_second: Option<f32>) -> String {
    match meters_per_second {
        None => MISSING.to_string(),
        Some(mps) if !mps.is_finite() => SPEED_ERROR.to_string(),
        Some(mps) => format!("{:.1} km/h", f64::from(mps) * 3.6),
    }
}

/// POSIX seconds as local-time RFC 3339. `None` if out of range.
pub fn format_timestamp(epoch_secs: u64) -> Option<String> {
    let secs = i64::try_from(epoch_secs).ok()?;
    let utc = DateTime::from_timestamp(secs, 0)?;
    Some(utc.with_timezone(&Local).to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::parse_route_list;
    use transit_realtime::{FeedEntity, FeedHeader, Position, TripDescriptor, VehicleDescriptor};

    fn entity(id: &str, route_id: Option<&str>, trip_id: Option<&str>) -> FeedEntity {
        FeedEntity {
            id: id.into(),
            vehicle: Some(transit_realtime::VehiclePosition {
                trip: Some(TripDescriptor {
                    trip_id: trip_id.map(Into::into),
                    route_id: route_id.map(Into::into),
                    ..Default::default()
                }),
                vehicle: Some(VehicleDescriptor {
                    id: Some(format!("bus-{}", id)),
                    ..Default::default()
                }),
                position: Some(Position {
                    latitude: Some(-33.7),
                    longitude: Some(151.0),
                    bearing: Some(90.0),
                    speed: Some(10.0),
                    ..Default::default()
                }),
                timestamp: Some(1_700_000_000),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn feed(entities: Vec<FeedEntity>) -> FeedMessage {
        FeedMessage {
            header: FeedHeader {
                gtfs_realtime_version: "2.0".into(),
                timestamp: Some(1_700_000_000),
            },
            entity: entities,
        }
    }

    #[test]
    fn test_filter_returns_only_targeted_routes() {
        let feed = feed(vec![
            entity("1", Some("A"), Some("t1")),
            entity("2", Some("B"), Some("t2")),
            entity("3", Some("C"), Some("t3")),
            entity("4", Some("B"), Some("t4")),
        ]);

        let vehicles = filter_vehicles(&feed, &parse_route_list(Some("B")));
        assert_eq!(vehicles.len(), 2);
        assert!(vehicles.iter().all(|v| v.route_id == "B"));
        assert_eq!(vehicles[0].trip_id, "t2");
        assert_eq!(vehicles[1].vehicle_id, "bus-4");
    }

    #[test]
    fn test_entities_without_trip_or_route_ignored() {
        let mut no_trip = entity("1", Some("2606_55"), None);
        if let Some(v) = no_trip.vehicle.as_mut() {
            v.trip = None;
        }
        let no_vehicle = FeedEntity {
            id: "2".into(),
            ..Default::default()
        };
        let no_route = entity("3", None, Some("t3"));

        let feed = feed(vec![no_trip, no_vehicle, no_route]);
        assert!(filter_vehicles(&feed, &parse_route_list(Some("2606_55"))).is_empty());
    }

    #[test]
    fn test_vehicle_fields() {
        let feed = feed(vec![entity("1", Some("2606_55"), Some("trip-9"))]);
        let v = &filter_vehicles(&feed, &parse_route_list(Some("2606_55")))[0];

        assert_eq!(v.route_id, "2606_55");
        assert_eq!(v.trip_id, "trip-9");
        assert_eq!(v.vehicle_id, "bus-1");
        assert_eq!(v.latitude, Some(-33.7));
        assert_eq!(v.bearing, Some(90.0));
        assert_eq!(v.speed, "36.0 km/h");
        assert_eq!(v.raw_timestamp, Some(1_700_000_000));
        assert!(v.timestamp.is_some());
    }

    #[test]
    fn test_missing_fields_use_sentinels() {
        let mut e = entity("1", Some("2606_55"), None);
        if let Some(v) = e.vehicle.as_mut() {
            v.vehicle = None;
            v.position = None;
            v.timestamp = None;
        }

        let vehicles = filter_vehicles(&feed(vec![e]), &parse_route_list(Some("2606_55")));
        let v = &vehicles[0];
        assert_eq!(v.trip_id, "N/A");
        assert_eq!(v.vehicle_id, "N/A");
        assert_eq!(v.speed, "N/A");
        assert_eq!(v.latitude, None);
        assert_eq!(v.timestamp, None);
        assert_eq!(v.raw_timestamp, None);

        let json = serde_json::to_value(v).unwrap();
        assert_eq!(json["trip_id"], "N/A");
        assert!(json["bearing"].is_null());
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(Some(10.0)), "36.0 km/h");
        assert_eq!(format_speed(Some(0.0)), "0.0 km/h");
        assert_eq!(format_speed(Some(12.5)), "45.0 km/h");
        assert_eq!(format_speed(None), "N/A");
        assert_eq!(format_speed(Some(f32::NAN)), SPEED_ERROR);
        assert_eq!(format_speed(Some(f32::INFINITY)), SPEED_ERROR);
    }

    #[test]
    fn test_format_timestamp_round_trips() {
        let formatted = format_timestamp(1_700_000_000).unwrap();
        let parsed = DateTime::parse_from_rfc3339(&formatted).unwrap();
        assert_eq!(parsed.timestamp(), 1_700_000_000);
        assert_eq!(format_timestamp(u64::MAX), None);
    }
}
