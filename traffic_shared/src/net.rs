//! Networking primitives.
//!
//! Goals:
//! - Provide the snapshot records reported by the simulation authority.
//! - Provide a thin request/response transport (HTTP) behind a trait.
//! - Keep decoding explicit: a body either matches the schema or is `Malformed`.
//!
//! Transport failures are reported, never retried.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{config::EndpointPaths, math::Vec3, render::EntityKind};

/// Failure of a single poll request.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PollError {
    /// The request could not be completed (connect error, non-success status).
    #[error("authority unreachable: {0}")]
    Unreachable(String),
    /// The response did not match the expected schema.
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Which collection an endpoint reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointKind {
    Cars,
    Obstacles,
    TrafficLights,
    Roads,
    Destinations,
}

impl EndpointKind {
    pub const ALL: [EndpointKind; 5] = [
        EndpointKind::Cars,
        EndpointKind::Obstacles,
        EndpointKind::TrafficLights,
        EndpointKind::Roads,
        EndpointKind::Destinations,
    ];

    pub fn path(self, paths: &EndpointPaths) -> &str {
        match self {
            EndpointKind::Cars => &paths.cars,
            EndpointKind::Obstacles => &paths.obstacles,
            EndpointKind::TrafficLights => &paths.traffic_lights,
            EndpointKind::Roads => &paths.roads,
            EndpointKind::Destinations => &paths.destinations,
        }
    }

    /// What the renderer should spawn for records of this endpoint.
    pub fn entity_kind(self) -> EntityKind {
        match self {
            EndpointKind::Cars => EntityKind::Car,
            EndpointKind::Obstacles => EntityKind::Obstacle,
            EndpointKind::TrafficLights => EntityKind::TrafficLight,
            EndpointKind::Roads => EntityKind::Road,
            EndpointKind::Destinations => EntityKind::Destination,
        }
    }

    /// Only cars move; everything else is placed once.
    pub fn is_movable(self) -> bool {
        matches!(self, EndpointKind::Cars)
    }
}

/// One server-reported entity state.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySnapshot {
    pub id: String,
    pub position: Vec3,
    /// Destination in the ground plane, `(x, z)`.
    pub destination: (f32, f32),
    /// Signal state, reported for traffic lights only.
    pub state: Option<bool>,
}

impl EntitySnapshot {
    /// True when the position sits exactly on the destination.
    pub fn at_destination(&self) -> bool {
        self.position.x == self.destination.0 && self.position.z == self.destination.1
    }
}

/// Wire shape of one entry in `positions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRecord {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    #[serde(rename = "destX", default, skip_serializing_if = "Option::is_none")]
    pub dest_x: Option<f32>,
    #[serde(rename = "destZ", default, skip_serializing_if = "Option::is_none")]
    pub dest_z: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<bool>,
}

/// Wire shape of every GET response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionsPayload {
    pub positions: Vec<PositionRecord>,
}

impl From<PositionRecord> for EntitySnapshot {
    fn from(r: PositionRecord) -> Self {
        // Static entities omit the destination; it then equals the position.
        let destination = (r.dest_x.unwrap_or(r.x), r.dest_z.unwrap_or(r.z));
        Self {
            id: r.id,
            position: Vec3::new(r.x, r.y, r.z),
            destination,
            state: r.state,
        }
    }
}

impl From<&EntitySnapshot> for PositionRecord {
    fn from(s: &EntitySnapshot) -> Self {
        Self {
            id: s.id.clone(),
            x: s.position.x,
            y: s.position.y,
            z: s.position.z,
            dest_x: Some(s.destination.0),
            dest_z: Some(s.destination.1),
            state: s.state,
        }
    }
}

/// Decodes a `{ "positions": [...] }` body.
pub fn decode_positions(body: &[u8]) -> Result<Vec<EntitySnapshot>, PollError> {
    let payload: PositionsPayload =
        serde_json::from_slice(body).map_err(|e| PollError::Malformed(e.to_string()))?;
    Ok(payload.positions.into_iter().map(EntitySnapshot::from).collect())
}

/// Encodes snapshots into a `{ "positions": [...] }` body.
pub fn encode_positions(snaps: &[EntitySnapshot]) -> anyhow::Result<Bytes> {
    let payload = PositionsPayload {
        positions: snaps.iter().map(PositionRecord::from).collect(),
    };
    let body = serde_json::to_vec(&payload).context("serialize positions")?;
    Ok(Bytes::from(body))
}

/// Request/response channel to the simulation authority.
#[async_trait]
pub trait Transport: Send + Sync {
    /// POSTs a URL-encoded form; only success matters.
    async fn post_form(&self, path: &str, fields: &[(String, String)]) -> Result<(), PollError>;

    /// GETs a path and returns the raw body.
    async fn get(&self, path: &str) -> Result<Bytes, PollError>;
}

/// HTTP transport over `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    base: Url,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Option<Duration>) -> anyhow::Result<Self> {
        let base = Url::parse(base_url).with_context(|| format!("parse server url {base_url}"))?;
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().context("build http client")?;
        Ok(Self { http, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url(&self, path: &str) -> Result<Url, PollError> {
        self.base
            .join(path)
            .map_err(|e| PollError::Unreachable(format!("bad endpoint {path}: {e}")))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_form(&self, path: &str, fields: &[(String, String)]) -> Result<(), PollError> {
        let url = self.url(path)?;
        debug!(%url, fields = fields.len(), "POST form");
        let response = self
            .http
            .post(url)
            .form(fields)
            .send()
            .await
            .map_err(|e| PollError::Unreachable(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PollError::Unreachable(format!("{path} returned {status}")));
        }
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Bytes, PollError> {
        let url = self.url(path)?;
        debug!(%url, "GET");
        let response = self
            .http
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| PollError::Unreachable(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PollError::Unreachable(format!("{path} returned {status}")));
        }
        response
            .bytes()
            .await
            .map_err(|e| PollError::Unreachable(e.to_string()))
    }
}

/// Fetches and decodes one endpoint.
pub async fn fetch(
    transport: &dyn Transport,
    paths: &EndpointPaths,
    kind: EndpointKind,
) -> Result<Vec<EntitySnapshot>, PollError> {
    let body = transport.get(kind.path(paths)).await?;
    decode_positions(&body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_car_records() {
        let body = br#"{"positions":[{"id":"car1","x":1,"y":1,"z":2,"destX":5,"destZ":7}]}"#;
        let snaps = decode_positions(body).unwrap();
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].id, "car1");
        assert_eq!(snaps[0].position, Vec3::new(1.0, 1.0, 2.0));
        assert_eq!(snaps[0].destination, (5.0, 7.0));
        assert!(!snaps[0].at_destination());
    }

    #[test]
    fn static_records_default_destination_to_position() {
        let body = br#"{"positions":[{"id":"ob_3","x":4,"y":1,"z":9}]}"#;
        let snaps = decode_positions(body).unwrap();
        assert_eq!(snaps[0].destination, (4.0, 9.0));
        assert_eq!(snaps[0].state, None);
    }

    #[test]
    fn traffic_light_state_is_kept() {
        let body = br#"{"positions":[{"id":"tl_1","x":0,"y":1,"z":0,"state":true}]}"#;
        assert_eq!(decode_positions(body).unwrap()[0].state, Some(true));
    }

    #[test]
    fn schema_mismatch_is_malformed() {
        for body in [&br#"{"cars":[]}"#[..], b"not json", br#"{"positions":[{"id":7}]}"#] {
            assert!(matches!(decode_positions(body), Err(PollError::Malformed(_))));
        }
    }

    #[test]
    fn destination_match_ignores_height() {
        let snap = EntitySnapshot {
            id: "car2".into(),
            position: Vec3::new(3.0, 1.0, 4.0),
            destination: (3.0, 4.0),
            state: None,
        };
        assert!(snap.at_destination());
    }

    #[test]
    fn endpoint_paths_follow_config() {
        let paths = EndpointPaths::default();
        assert_eq!(EndpointKind::TrafficLights.path(&paths), "/getTrafficLights");
        assert_eq!(EndpointKind::Roads.path(&paths), "/getRoad");
        assert!(EndpointKind::Cars.is_movable());
        assert!(!EndpointKind::Destinations.is_movable());
    }

    #[test]
    fn encoded_body_uses_wire_field_names() {
        let snap = EntitySnapshot {
            id: "car7".into(),
            position: Vec3::new(1.0, 1.0, 2.0),
            destination: (4.0, 6.0),
            state: None,
        };
        let body = encode_positions(std::slice::from_ref(&snap)).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let record = &value["positions"][0];
        assert_eq!(record["destX"], 4.0);
        assert_eq!(record["destZ"], 6.0);
        assert!(record.get("state").is_none());
        assert_eq!(decode_positions(&body).unwrap(), vec![snap]);
    }

    struct CannedTransport(&'static [u8]);

    #[async_trait]
    impl Transport for CannedTransport {
        async fn post_form(&self, _path: &str, _fields: &[(String, String)]) -> Result<(), PollError> {
            Ok(())
        }

        async fn get(&self, path: &str) -> Result<Bytes, PollError> {
            if path == "/getCars" {
                Ok(Bytes::from_static(self.0))
            } else {
                Err(PollError::Unreachable(format!("no route {path}")))
            }
        }
    }

    #[tokio::test]
    async fn fetch_routes_by_kind() {
        let transport = CannedTransport(br#"{"positions":[]}"#);
        let paths = EndpointPaths::default();
        assert_eq!(fetch(&transport, &paths, EndpointKind::Cars).await, Ok(Vec::new()));
        assert!(matches!(
            fetch(&transport, &paths, EndpointKind::Roads).await,
            Err(PollError::Unreachable(_))
        ));
    }

    #[test]
    fn http_transport_rejects_bad_base() {
        assert!(HttpTransport::new("not a url", None).is_err());
    }
}
