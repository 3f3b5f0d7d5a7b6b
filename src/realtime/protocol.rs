//! WebSocket wire format
//!
//! Every frame is a JSON object tagged by a `type` field. Inbound frames are
//! parsed in two steps: the envelope first (so auth gating can run before the
//! body is looked at), then the typed body for the matching message.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::db::{NewDetection, TelemetryReading};

// Client -> server
pub const AUTHENTICATE: &str = "authenticate";
pub const UPDATE_TELEMETRY: &str = "update_telemetry";
pub const NEW_DETECTION: &str = "new_detection";

// Server -> client
pub const AUTH_REQUIRED: &str = "auth_required";
pub const AUTH_ERROR: &str = "auth_error";
pub const AUTH_SUCCESS: &str = "auth_success";
pub const ERROR: &str = "error";

pub const INITIAL_VEHICLES: &str = "initial_vehicles";
pub const INITIAL_TELEMETRY: &str = "initial_telemetry";
pub const INITIAL_RISK_ZONES: &str = "initial_risk_zones";
pub const INITIAL_ALERTS: &str = "initial_alerts";
pub const INITIAL_ROUTES: &str = "initial_routes";
pub const INITIAL_VEHICLE_ASSIGNMENTS: &str = "initial_vehicle_assignments";

pub const VEHICLE_CREATED: &str = "vehicle_created";
pub const VEHICLE_UPDATED: &str = "vehicle_updated";
pub const TELEMETRY_UPDATED: &str = "telemetry_updated";
pub const DETECTION_CREATED: &str = "detection_created";
pub const ALERT_CREATED: &str = "alert_created";
pub const ALERT_UPDATED: &str = "alert_updated";
pub const ALERT_ESCALATED: &str = "alert_escalated";
pub const ROUTE_CREATED: &str = "route_created";
pub const RISK_ZONE_CREATED: &str = "risk_zone_created";
pub const NEW_VEHICLE_ASSIGNMENT: &str = "new_vehicle_assignment";
pub const UPDATED_VEHICLE_ASSIGNMENT: &str = "updated_vehicle_assignment";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("frame has no string `type` field")]
    MissingType,
}

/// A parsed inbound frame whose body has not been interpreted yet
#[derive(Debug, Clone)]
pub struct Envelope {
    pub kind: String,
    pub body: Map<String, Value>,
}

impl Envelope {
    /// Deserialize the frame body into a typed message
    pub fn decode<T: for<'de> Deserialize<'de>>(self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.body))
    }

    pub fn token(&self) -> Option<&str> {
        self.body.get("token").and_then(Value::as_str).filter(|t| !t.is_empty())
    }
}

pub fn parse_envelope(raw: &str) -> Result<Envelope, ProtocolError> {
    let value: Value = serde_json::from_str(raw)?;
    let Value::Object(mut body) = value else {
        return Err(ProtocolError::NotAnObject);
    };
    let kind = match body.remove("type") {
        Some(Value::String(kind)) => kind,
        _ => return Err(ProtocolError::MissingType),
    };
    Ok(Envelope { kind, body })
}

/// Body of an `update_telemetry` frame
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySubmission {
    pub vehicle_id: String,
    pub telemetry: TelemetryReading,
}

/// Body of a `new_detection` frame
#[derive(Debug, Deserialize)]
pub struct DetectionSubmission {
    pub detection: NewDetection,
}

/// Build an outbound frame: the payload's fields with `type` merged in.
/// Non-object payloads are carried under `data`.
pub fn encode_frame<T: Serialize + ?Sized>(kind: &str, payload: &T) -> Result<String, serde_json::Error> {
    let mut object = match serde_json::to_value(payload)? {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("data".to_string(), other);
            map
        }
    };
    object.insert("type".to_string(), Value::String(kind.to_string()));
    serde_json::to_string(&Value::Object(object))
}
