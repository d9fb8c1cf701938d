use std::time::Duration;

use prost::Message;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, StatusCode};
use tracing::{debug, info};

use super::transit_realtime::FeedMessage;
use super::vehicles::filter_vehicles;
use crate::models::{RouteSet, VehiclePosition};

/// GTFS-RT vehicle-position client.
///
/// One call is one upstream request: there is no retry and no caching, so a
/// failure is reported straight back to the caller.
pub struct FeedClient {
    http: Client,
}

impl FeedClient {
    pub fn new() -> Result<Self, FeedError> {
        let http = Client::builder()
            .user_agent(concat!("bus-map/", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| FeedError::Network(format!("failed to create HTTP client: {}", e)))?;

        Ok(FeedClient { http })
    }

    /// Fetch the feed and keep the vehicles running on `targets`.
    pub async fn fetch_vehicles(
        &self,
        url: &str,
        api_key: &str,
        targets: &RouteSet,
        timeout: Duration,
    ) -> Result<Vec<VehiclePosition>, FeedError> {
        let feed = self.fetch_feed(url, api_key, timeout).await?;
        let vehicles = filter_vehicles(&feed, targets);

        info!(
            "[FEED] {} of {} entities match {} routes",
            vehicles.len(),
            feed.entity.len(),
            targets.len()
        );
        Ok(vehicles)
    }

    /// Fetch and decode one feed message.
    ///
    /// Fails before any network traffic if the key or URL is blank.
    pub async fn fetch_feed(
        &self,
        url: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<FeedMessage, FeedError> {
        if api_key.trim().is_empty() {
            return Err(FeedError::MissingApiKey);
        }
        if url.trim().is_empty() {
            return Err(FeedError::MissingUrl);
        }

        debug!("[FEED] Fetching {}", url);
        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, format!("apikey {}", api_key))
            .timeout(timeout)
            .send()
            .await
            .map_err(FeedError::from_transport)?;

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(FeedError::Unauthorized(status.as_u16()))
            }
            StatusCode::NOT_FOUND => return Err(FeedError::NotFound),
            s if !s.is_success() => return Err(FeedError::Status(s.as_u16())),
            _ => {}
        }

        let bytes = response.bytes().await.map_err(FeedError::from_transport)?;
        FeedMessage::decode(bytes.as_ref()).map_err(|e| FeedError::Decode(e.to_string()))
    }
}

/// Realtime feed failures. None of these carry the API key.
#[derive(Debug)]
pub enum FeedError {
    MissingApiKey,
    MissingUrl,
    Timeout,
    Network(String),
    Unauthorized(u16),
    NotFound,
    Status(u16),
    Decode(String),
}

impl FeedError {
    fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FeedError::Timeout
        } else {
            FeedError::Network(err.without_url().to_string())
        }
    }

    /// Server-side misconfiguration, as opposed to an upstream failure.
    pub fn is_configuration(&self) -> bool {
        matches!(self, FeedError::MissingApiKey | FeedError::MissingUrl)
    }
}

impl std::fmt::Display for FeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedError::MissingApiKey => write!(f, "realtime feed API key is not configured"),
            FeedError::MissingUrl => write!(f, "realtime feed URL is not configured"),
            FeedError::Timeout => write!(f, "realtime feed request timed out"),
            FeedError::Network(msg) => write!(f, "realtime feed request failed: {}", msg),
            FeedError::Unauthorized(code) => {
                write!(f, "realtime feed rejected the API key (HTTP {})", code)
            }
            FeedError::NotFound => write!(f, "realtime feed endpoint not found (HTTP 404)"),
            FeedError::Status(code) => write!(f, "realtime feed returned HTTP {}", code),
            FeedError::Decode(msg) => write!(f, "failed to decode realtime feed: {}", msg),
        }
    }
}

impl std::error::Error for FeedError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::parse_route_list;
    use crate::realtime::transit_realtime::{
        FeedEntity, FeedHeader, Position, TripDescriptor, VehiclePosition as RtVehiclePosition,
    };

    use axum::http::HeaderMap;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;

    const KEY: &str = "secret";
    const TIMEOUT: Duration = Duration::from_secs(5);

    fn feed_bytes() -> Vec<u8> {
        let entity = |id: &str, route: &str| FeedEntity {
            id: id.into(),
            vehicle: Some(RtVehiclePosition {
                trip: Some(TripDescriptor {
                    trip_id: Some(format!("trip-{}", id)),
                    route_id: Some(route.into()),
                    ..Default::default()
                }),
                position: Some(Position {
                    latitude: Some(-33.7),
                    longitude: Some(151.0),
                    speed: Some(10.0),
                    ..Default::default()
                }),
                timestamp: Some(1_700_000_000),
                ..Default::default()
            }),
            ..Default::default()
        };

        FeedMessage {
            header: FeedHeader {
                gtfs_realtime_version: "2.0".into(),
                timestamp: Some(1_700_000_000),
            },
            entity: vec![entity("1", "2606_55"), entity("2", "2606_60")],
        }
        .encode_to_vec()
    }

    /// Serve `router` on an ephemeral port and return the feed URL.
    async fn spawn_upstream(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });
        format!("http://{}/feed", addr)
    }

    fn upstream_with_body(body: Vec<u8>) -> Router {
        Router::new().route(
            "/feed",
            get(move |headers: HeaderMap| {
                let body = body.clone();
                async move {
                    let authorized = headers
                        .get(AUTHORIZATION)
                        .and_then(|v| v.to_str().ok())
                        == Some("apikey secret");
                    if authorized {
                        (StatusCode::OK, body).into_response()
                    } else {
                        StatusCode::UNAUTHORIZED.into_response()
                    }
                }
            }),
        )
    }

    #[tokio::test]
    async fn test_missing_key_fails_without_request() {
        let client = FeedClient::new().unwrap();
        let targets = parse_route_list(Some("2606_55"));

        // Unroutable URL: any network attempt would not return MissingApiKey.
        let err = client
            .fetch_vehicles("http://127.0.0.1:9/feed", "  ", &targets, TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::MissingApiKey));
        assert!(err.is_configuration());

        let err = client.fetch_vehicles("", KEY, &targets, TIMEOUT).await.unwrap_err();
        assert!(matches!(err, FeedError::MissingUrl));
    }

    #[tokio::test]
    async fn test_fetch_filters_vehicles() {
        let url = spawn_upstream(upstream_with_body(feed_bytes())).await;
        let client = FeedClient::new().unwrap();

        let vehicles = client
            .fetch_vehicles(&url, KEY, &parse_route_list(Some("2606_55")), TIMEOUT)
            .await
            .unwrap();

        assert_eq!(vehicles.len(), 1);
        assert_eq!(vehicles[0].route_id, "2606_55");
        assert_eq!(vehicles[0].trip_id, "trip-1");
        assert_eq!(vehicles[0].speed, "36.0 km/h");
    }

    #[tokio::test]
    async fn test_zero_matches_is_success() {
        let url = spawn_upstream(upstream_with_body(feed_bytes())).await;
        let client = FeedClient::new().unwrap();

        let vehicles = client
            .fetch_vehicles(&url, KEY, &parse_route_list(Some("9999_1")), TIMEOUT)
            .await
            .unwrap();
        assert!(vehicles.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_key() {
        let url = spawn_upstream(upstream_with_body(feed_bytes())).await;
        let client = FeedClient::new().unwrap();

        let err = client.fetch_feed(&url, "wrong", TIMEOUT).await.unwrap_err();
        assert!(matches!(err, FeedError::Unauthorized(401)));
        assert!(!err.to_string().contains("wrong"));
    }

    #[tokio::test]
    async fn test_not_found() {
        let url = spawn_upstream(upstream_with_body(feed_bytes())).await;
        let client = FeedClient::new().unwrap();

        let missing = url.replace("/feed", "/nope");
        let err = client.fetch_feed(&missing, KEY, TIMEOUT).await.unwrap_err();
        assert!(matches!(err, FeedError::NotFound));
    }

    #[tokio::test]
    async fn test_server_error_status() {
        let router = Router::new().route(
            "/feed",
            get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        );
        let url = spawn_upstream(router).await;
        let client = FeedClient::new().unwrap();

        let err = client.fetch_feed(&url, KEY, TIMEOUT).await.unwrap_err();
        assert!(matches!(err, FeedError::Status(503)));
        assert!(!err.is_configuration());
    }

    #[tokio::test]
    async fn test_undecodable_body() {
        let url = spawn_upstream(upstream_with_body(vec![0xff, 0xff, 0xff])).await;
        let client = FeedClient::new().unwrap();

        let err = client.fetch_feed(&url, KEY, TIMEOUT).await.unwrap_err();
        assert!(matches!(err, FeedError::Decode(_)));
    }

    #[tokio::test]
    async fn test_timeout() {
        let router = Router::new().route(
            "/feed",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                StatusCode::OK
            }),
        );
        let url = spawn_upstream(router).await;
        let client = FeedClient::new().unwrap();

        let err = client
            .fetch_feed(&url, KEY, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::Timeout));
    }
}
