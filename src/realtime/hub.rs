//! Connected dashboard clients, their auth state, and broadcast fan-out
//!
//! Each client starts unauthenticated and only receives broadcasts once it
//! has presented a valid token. Frames are queued on a bounded per-client
//! channel; when a client's queue is full further frames to it are dropped,
//! so a stalled socket never holds up the hub or grows without limit.

use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::protocol::{self, DetectionSubmission, Envelope, TelemetrySubmission};
use crate::alerts::{policy, AlertDistributor, DispatchResult};
use crate::auth::JwtAuth;
use crate::config::Config;
use crate::db::{Alert, Database, Detection, NewAlert, NewDetection, Telemetry, TelemetryReading, User};
use crate::validation;

pub type ClientId = Uuid;

/// A serialized frame, shared between every client it is sent to
pub type Frame = Arc<str>;

/// Alerts included in the post-auth snapshot
const SNAPSHOT_ALERT_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Unauthenticated,
    Authenticated { user_id: i64 },
}

struct ConnectedClient {
    state: ClientState,
    outbox: mpsc::Sender<Frame>,
}

impl ConnectedClient {
    fn is_authenticated(&self) -> bool {
        matches!(self.state, ClientState::Authenticated { .. })
    }

    /// False once the socket side has gone away. A full queue drops the
    /// frame but keeps the client.
    fn send(&self, id: ClientId, frame: &Frame) -> bool {
        match self.outbox.try_send(frame.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(client = %id, "Client outbox full, dropping frame");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HubSettings {
    pub weapon_confidence_threshold: f64,
    pub report_malformed: bool,
    pub outbox_capacity: usize,
}

impl HubSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            weapon_confidence_threshold: config.alerts.weapon_confidence_threshold,
            report_malformed: config.realtime.report_malformed,
            outbox_capacity: config.realtime.outbox_capacity,
        }
    }
}

/// What the detection pipeline produced
#[derive(Debug, Clone)]
pub struct DetectionOutcome {
    pub detection: Detection,
    pub alert: Option<Alert>,
    pub distribution: Option<DispatchResult>,
}

#[derive(Debug, Clone)]
pub struct TelemetryOutcome {
    pub telemetry: Telemetry,
    pub alert: Option<Alert>,
    pub distribution: Option<DispatchResult>,
}

pub struct RealtimeHub {
    clients: RwLock<HashMap<ClientId, ConnectedClient>>,
    db: Database,
    auth: Arc<JwtAuth>,
    distributor: Arc<AlertDistributor>,
    settings: HubSettings,
}

impl RealtimeHub {
    pub fn new(db: Database, auth: Arc<JwtAuth>, distributor: Arc<AlertDistributor>, settings: HubSettings) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            db,
            auth,
            distributor,
            settings,
        }
    }

    pub fn distributor(&self) -> &AlertDistributor {
        &self.distributor
    }

    /// Register a new connection. The returned receiver yields the frames
    /// destined for it, starting with `auth_required`.
    pub async fn connect(&self) -> (ClientId, mpsc::Receiver<Frame>) {
        let id = Uuid::new_v4();
        let (outbox, inbox) = mpsc::channel(self.settings.outbox_capacity);

        self.clients.write().await.insert(
            id,
            ConnectedClient {
                state: ClientState::Unauthenticated,
                outbox,
            },
        );
        info!(client = %id, "WebSocket client connected");

        self.send_to(id, protocol::AUTH_REQUIRED, &()).await;
        (id, inbox)
    }

    pub async fn disconnect(&self, id: ClientId) {
        if let Some(client) = self.clients.write().await.remove(&id) {
            info!(client = %id, state = ?client.state, "WebSocket client disconnected");
        }
    }

    pub async fn client_state(&self, id: ClientId) -> Option<ClientState> {
        self.clients.read().await.get(&id).map(|c| c.state)
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn authenticated_count(&self) -> usize {
        self.clients.read().await.values().filter(|c| c.is_authenticated()).count()
    }

    /// Handle one inbound text frame. Runs to completion before the
    /// connection's next frame is read.
    pub async fn handle_message(&self, id: ClientId, raw: &str) {
        let envelope = match protocol::parse_envelope(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(client = %id, "Dropping malformed message: {}", e);
                if self.settings.report_malformed {
                    self.send_to(id, protocol::ERROR, &json!({ "message": e.to_string() })).await;
                }
                return;
            }
        };

        if envelope.kind == protocol::AUTHENTICATE {
            self.authenticate(id, &envelope).await;
            return;
        }

        let Some(ClientState::Authenticated { user_id }) = self.client_state(id).await else {
            debug!(client = %id, kind = %envelope.kind, "Rejecting message before authentication");
            self.send_to(id, protocol::AUTH_REQUIRED, &()).await;
            return;
        };

        match envelope.kind.as_str() {
            protocol::UPDATE_TELEMETRY => self.on_update_telemetry(id, envelope).await,
            protocol::NEW_DETECTION => self.on_new_detection(id, envelope).await,
            other => debug!(client = %id, user_id, "Ignoring unsupported message type '{}'", other),
        }
    }

    async fn authenticate(&self, id: ClientId, envelope: &Envelope) {
        let Some(token) = envelope.token() else {
            self.send_to(id, protocol::AUTH_ERROR, &json!({ "message": "Authentication token required" }))
                .await;
            return;
        };

        let user = match self.auth.verify_token(token) {
            Ok(user_id) => self.db.get_user(user_id).await,
            Err(e) => {
                warn!(client = %id, "WebSocket authentication failed: {}", e);
                None
            }
        };
        let Some(user) = user else {
            self.send_to(id, protocol::AUTH_ERROR, &json!({ "message": "Invalid or expired token" }))
                .await;
            return;
        };

        {
            let mut clients = self.clients.write().await;
            let Some(client) = clients.get_mut(&id) else {
                return;
            };
            client.state = ClientState::Authenticated { user_id: user.id };
        }
        info!(client = %id, user_id = user.id, "WebSocket client authenticated");

        self.send_to(id, protocol::AUTH_SUCCESS, &json!({ "user": user.summary() })).await;
        self.push_initial_snapshot(id, &user).await;
    }

    /// One-time state push after authentication. Vehicle assignments are
    /// scoped to the user unless they are an admin.
    async fn push_initial_snapshot(&self, id: ClientId, user: &User) {
        let vehicles = self.db.get_vehicles().await;
        self.send_to(id, protocol::INITIAL_VEHICLES, &json!({ "vehicles": vehicles })).await;

        let telemetry = self.db.get_telemetry_data(None).await;
        self.send_to(id, protocol::INITIAL_TELEMETRY, &json!({ "telemetry": telemetry })).await;

        let risk_zones = self.db.get_risk_zones().await;
        self.send_to(id, protocol::INITIAL_RISK_ZONES, &json!({ "riskZones": risk_zones })).await;

        let alerts = self.db.get_alerts(Some(SNAPSHOT_ALERT_LIMIT)).await;
        self.send_to(id, protocol::INITIAL_ALERTS, &json!({ "alerts": alerts })).await;

        let routes = self.db.get_routes().await;
        self.send_to(id, protocol::INITIAL_ROUTES, &json!({ "routes": routes })).await;

        let assignments = self.db.assignments_visible_to(user).await;
        self.send_to(
            id,
            protocol::INITIAL_VEHICLE_ASSIGNMENTS,
            &json!({ "vehicleAssignments": assignments }),
        )
        .await;
    }

    async fn on_update_telemetry(&self, id: ClientId, envelope: Envelope) {
        let submission: TelemetrySubmission = match envelope.decode() {
            Ok(submission) => submission,
            Err(e) => {
                warn!(client = %id, "Dropping invalid telemetry update: {}", e);
                return;
            }
        };
        let checked = validation::validate_vehicle_id(&submission.vehicle_id).and_then(|_| {
            validation::validate_coordinates(submission.telemetry.latitude, submission.telemetry.longitude)
        });
        if let Err(e) = checked {
            warn!(client = %id, "Dropping invalid telemetry update: {}", e);
            return;
        }

        self.record_telemetry(&submission.vehicle_id, submission.telemetry).await;
    }

    async fn on_new_detection(&self, id: ClientId, envelope: Envelope) {
        let submission: DetectionSubmission = match envelope.decode() {
            Ok(submission) => submission,
            Err(e) => {
                warn!(client = %id, "Dropping invalid detection: {}", e);
                return;
            }
        };
        if let Err(e) = validation::validate_detection(&submission.detection) {
            warn!(client = %id, "Dropping invalid detection: {}", e);
            return;
        }

        self.ingest_detection(submission.detection).await;
    }

    /// Persist a telemetry fix, push it to dashboards, and raise
    /// `entering_risk_zone` when the vehicle crossed into a zone.
    pub async fn record_telemetry(&self, vehicle_id: &str, reading: TelemetryReading) -> TelemetryOutcome {
        if self.db.get_vehicle(vehicle_id).await.is_none() {
            debug!(vehicle_id, "Telemetry for unregistered vehicle");
        }
        let previous = self.db.latest_telemetry_for(vehicle_id).await;
        let telemetry = self.db.create_telemetry(vehicle_id, reading).await;
        self.broadcast(protocol::TELEMETRY_UPDATED, &json!({ "telemetry": &telemetry })).await;

        let zones = self.db.get_risk_zones().await;
        let Some(decision) = policy::evaluate_telemetry(previous.as_ref(), &telemetry, &zones) else {
            return TelemetryOutcome {
                telemetry,
                alert: None,
                distribution: None,
            };
        };

        let (alert, distribution) = self.raise_alert(decision.alert, decision.high_priority).await;
        TelemetryOutcome {
            telemetry,
            alert: Some(alert),
            distribution: Some(distribution),
        }
    }

    /// Persist a validated detection, push it, and raise an alert when the
    /// policy says it is alert-worthy.
    pub async fn ingest_detection(&self, new: NewDetection) -> DetectionOutcome {
        let detection = self.db.create_detection(new).await;
        info!(
            detection_id = detection.id,
            vehicle_id = %detection.vehicle_id,
            kind = %detection.detection_type,
            confidence = detection.confidence,
            "Detection recorded"
        );
        self.broadcast(protocol::DETECTION_CREATED, &json!({ "detection": &detection })).await;

        let Some(decision) = policy::evaluate_detection(&detection, self.settings.weapon_confidence_threshold) else {
            return DetectionOutcome {
                detection,
                alert: None,
                distribution: None,
            };
        };

        let (alert, distribution) = self.raise_alert(decision.alert, decision.high_priority).await;
        DetectionOutcome {
            detection,
            alert: Some(alert),
            distribution: Some(distribution),
        }
    }

    /// Persist an alert, push `alert_created`, then hand it to the distributor
    pub async fn raise_alert(&self, new: NewAlert, high_priority: bool) -> (Alert, DispatchResult) {
        let alert = self.db.create_alert(new).await;
        warn!(
            alert_id = alert.id,
            vehicle_id = %alert.vehicle_id,
            kind = %alert.alert_type,
            severity = %alert.severity,
            "Alert raised"
        );
        self.broadcast(protocol::ALERT_CREATED, &json!({ "alert": &alert })).await;

        let distribution = self.distributor.distribute(&alert, high_priority).await;
        (alert, distribution)
    }

    /// Serialize once and offer the frame to every authenticated client.
    /// Returns how many live clients it was offered to, including any whose
    /// full queue dropped it.
    pub async fn broadcast<T: Serialize + ?Sized>(&self, kind: &str, payload: &T) -> usize {
        let Some(frame) = encode(kind, payload) else {
            return 0;
        };

        let clients = self.clients.read().await;
        let delivered = clients
            .iter()
            .filter(|(_, client)| client.is_authenticated())
            .filter(|(id, client)| client.send(**id, &frame))
            .count();
        debug!(kind, delivered, "Broadcast");
        delivered
    }

    async fn send_to<T: Serialize + ?Sized>(&self, id: ClientId, kind: &str, payload: &T) {
        let Some(frame) = encode(kind, payload) else {
            return;
        };
        if let Some(client) = self.clients.read().await.get(&id) {
            if !client.send(id, &frame) {
                debug!(client = %id, kind, "Client outbox closed");
            }
        }
    }
}

fn encode<T: Serialize + ?Sized>(kind: &str, payload: &T) -> Option<Frame> {
    match protocol::encode_frame(kind, payload) {
        Ok(frame) => Some(Frame::from(frame)),
        Err(e) => {
            error!(kind, "Failed to serialize frame: {}", e);
            None
        }
    }
}
