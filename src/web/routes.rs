//! HTTP API handlers

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use super::error::{ApiError, ApiResult};
use super::extract::AuthUser;
use super::AppState;
use crate::alerts::{policy, DispatchResult};
use crate::db::{
    Alert, AssignmentUpdate, Detection, NewAlert, NewDetection, NewRiskZone, NewRoute, NewVehicle,
    NewVehicleAssignment, RiskZone, Route, Telemetry, UserSummary, Vehicle, VehicleAssignment, VehicleUpdate,
};
use crate::realtime::protocol::{self, TelemetrySubmission};
use crate::validation::{self, ValidationError};

type Body<T> = Result<Json<T>, JsonRejection>;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub clients: usize,
    pub authenticated_clients: usize,
}

/// API: Liveness plus connected client counts
pub async fn api_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        clients: state.hub.client_count().await,
        authenticated_clients: state.hub.authenticated_count().await,
    })
}

pub async fn api_vehicles(State(state): State<Arc<AppState>>, _user: AuthUser) -> Json<Vec<Vehicle>> {
    Json(state.db.get_vehicles().await)
}

pub async fn api_create_vehicle(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    payload: Body<NewVehicle>,
) -> ApiResult<(StatusCode, Json<Vehicle>)> {
    user.require_admin()?;
    let Json(new) = payload?;
    validation::validate_vehicle(&new)?;

    let vehicle_id = new.vehicle_id.clone();
    let vehicle = state
        .db
        .create_vehicle(new)
        .await
        .ok_or_else(|| ApiError::Conflict(format!("Vehicle {} already exists", vehicle_id)))?;
    state.hub.broadcast(protocol::VEHICLE_CREATED, &json!({ "vehicle": &vehicle })).await;
    Ok((StatusCode::CREATED, Json(vehicle)))
}

pub async fn api_update_vehicle(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(vehicle_id): Path<String>,
    payload: Body<VehicleUpdate>,
) -> ApiResult<Json<Vehicle>> {
    user.require_admin()?;
    let Json(update) = payload?;

    let vehicle = state
        .db
        .update_vehicle(&vehicle_id, update)
        .await
        .ok_or(ApiError::NotFound("Vehicle"))?;
    state.hub.broadcast(protocol::VEHICLE_UPDATED, &json!({ "vehicle": &vehicle })).await;
    Ok(Json(vehicle))
}

pub async fn api_telemetry(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    query: Result<Query<ListQuery>, axum::extract::rejection::QueryRejection>,
) -> ApiResult<Json<Vec<Telemetry>>> {
    let Query(query) = query?;
    Ok(Json(state.db.get_telemetry_data(query.limit).await))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryResponse {
    pub telemetry: Telemetry,
    pub alert: Option<Alert>,
    pub alert_distribution: Option<DispatchResult>,
}

pub async fn api_create_telemetry(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    payload: Body<TelemetrySubmission>,
) -> ApiResult<(StatusCode, Json<TelemetryResponse>)> {
    let Json(submission) = payload?;
    validation::validate_vehicle_id(&submission.vehicle_id)?;
    validation::validate_coordinates(submission.telemetry.latitude, submission.telemetry.longitude)?;

    let outcome = state.hub.record_telemetry(&submission.vehicle_id, submission.telemetry).await;
    Ok((
        StatusCode::CREATED,
        Json(TelemetryResponse {
            telemetry: outcome.telemetry,
            alert: outcome.alert,
            alert_distribution: outcome.distribution,
        }),
    ))
}

pub async fn api_alerts(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    query: Result<Query<ListQuery>, axum::extract::rejection::QueryRejection>,
) -> ApiResult<Json<Vec<Alert>>> {
    let Query(query) = query?;
    Ok(Json(state.db.get_alerts(query.limit).await))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertResponse {
    pub alert: Alert,
    pub alert_distribution: DispatchResult,
}

/// API: Create an alert directly. Policy decides whether it skips the cooldown.
pub async fn api_create_alert(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    payload: Body<NewAlert>,
) -> ApiResult<(StatusCode, Json<AlertResponse>)> {
    let Json(new) = payload?;
    validation::validate_alert(&new)?;

    let high_priority = policy::is_high_priority(&new.alert_type);
    let (alert, alert_distribution) = state.hub.raise_alert(new, high_priority).await;
    Ok((StatusCode::CREATED, Json(AlertResponse { alert, alert_distribution })))
}

pub async fn api_acknowledge_alert(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Alert>> {
    let alert = state.db.acknowledge_alert(id).await.ok_or(ApiError::NotFound("Alert"))?;
    info!(alert_id = alert.id, user_id = user.id, "Alert acknowledged");

    state.hub.broadcast(protocol::ALERT_UPDATED, &json!({ "alert": &alert })).await;
    Ok(Json(alert))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationRequest {
    pub alert_id: i64,
    pub reason: String,
    #[serde(default)]
    pub escalate_to: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Escalation {
    pub alert_id: i64,
    pub alert: Alert,
    pub reason: String,
    pub escalate_to: Option<String>,
    pub escalated_by: UserSummary,
    pub escalated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationResponse {
    pub escalation: Escalation,
    pub alert_distribution: DispatchResult,
}

/// API: Escalate an existing alert. Always notified, regardless of cooldown.
pub async fn api_escalate_alert(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    payload: Body<EscalationRequest>,
) -> ApiResult<Json<EscalationResponse>> {
    let Json(request) = payload?;
    if request.reason.trim().is_empty() {
        return Err(ValidationError::Empty("reason").into());
    }

    let alert = state.db.get_alert(request.alert_id).await.ok_or(ApiError::NotFound("Alert"))?;
    let escalation = Escalation {
        alert_id: alert.id,
        alert,
        reason: request.reason,
        escalate_to: request.escalate_to,
        escalated_by: user.summary(),
        escalated_at: Utc::now(),
    };
    info!(alert_id = escalation.alert_id, user_id = user.id, "Alert escalated");

    state.hub.broadcast(protocol::ALERT_ESCALATED, &escalation).await;
    let alert_distribution = state.hub.distributor().distribute(&escalation.alert, true).await;

    Ok(Json(EscalationResponse {
        escalation,
        alert_distribution,
    }))
}

pub async fn api_detections(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    query: Result<Query<ListQuery>, axum::extract::rejection::QueryRejection>,
) -> ApiResult<Json<Vec<Detection>>> {
    let Query(query) = query?;
    Ok(Json(state.db.get_detections(query.limit).await))
}

/// Reference to the captured media behind a detection
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    pub detection_id: i64,
    pub vehicle_id: String,
    pub captured_at: DateTime<Utc>,
    pub image_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResponse {
    pub detection: Detection,
    pub evidence: Evidence,
    pub alert: Option<Alert>,
    pub alert_distribution: Option<DispatchResult>,
}

pub async fn api_create_detection(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    payload: Body<NewDetection>,
) -> ApiResult<(StatusCode, Json<DetectionResponse>)> {
    let Json(new) = payload?;
    validation::validate_detection(&new)?;

    let outcome = state.hub.ingest_detection(new).await;
    let evidence = Evidence {
        detection_id: outcome.detection.id,
        vehicle_id: outcome.detection.vehicle_id.clone(),
        captured_at: outcome.detection.timestamp,
        image_url: outcome.detection.image_url.clone(),
    };

    Ok((
        StatusCode::CREATED,
        Json(DetectionResponse {
            detection: outcome.detection,
            evidence,
            alert: outcome.alert,
            alert_distribution: outcome.distribution,
        }),
    ))
}

pub async fn api_risk_zones(State(state): State<Arc<AppState>>, _user: AuthUser) -> Json<Vec<RiskZone>> {
    Json(state.db.get_risk_zones().await)
}

pub async fn api_create_risk_zone(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    payload: Body<NewRiskZone>,
) -> ApiResult<(StatusCode, Json<RiskZone>)> {
    user.require_admin()?;
    let Json(new) = payload?;
    if new.name.trim().is_empty() {
        return Err(ValidationError::Empty("name").into());
    }
    validation::validate_coordinates(new.latitude, new.longitude)?;
    if !(new.radius_meters > 0.0) {
        return Err(ValidationError::OutOfRange {
            field: "radiusMeters",
            min: 0.0,
            max: f64::MAX,
            actual: new.radius_meters,
        }
        .into());
    }

    let zone = state.db.create_risk_zone(new).await;
    state.hub.broadcast(protocol::RISK_ZONE_CREATED, &json!({ "riskZone": &zone })).await;
    Ok((StatusCode::CREATED, Json(zone)))
}

pub async fn api_routes(State(state): State<Arc<AppState>>, _user: AuthUser) -> Json<Vec<Route>> {
    Json(state.db.get_routes().await)
}

pub async fn api_create_route(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    payload: Body<NewRoute>,
) -> ApiResult<(StatusCode, Json<Route>)> {
    let Json(new) = payload?;
    validation::validate_vehicle_id(&new.vehicle_id)?;
    if new.name.trim().is_empty() {
        return Err(ValidationError::Empty("name").into());
    }
    for waypoint in &new.waypoints {
        validation::validate_coordinates(waypoint.lat, waypoint.lng)?;
    }

    let route = state.db.create_route(new).await;
    state.hub.broadcast(protocol::ROUTE_CREATED, &json!({ "route": &route })).await;
    Ok((StatusCode::CREATED, Json(route)))
}

/// API: Assignments visible to the caller (all of them for admins)
pub async fn api_vehicle_assignments(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Json<Vec<VehicleAssignment>> {
    Json(state.db.assignments_visible_to(&user).await)
}

pub async fn api_create_vehicle_assignment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    payload: Body<NewVehicleAssignment>,
) -> ApiResult<(StatusCode, Json<VehicleAssignment>)> {
    user.require_admin()?;
    let Json(new) = payload?;
    validation::validate_vehicle_id(&new.vehicle_id)?;
    if state.db.get_user(new.user_id).await.is_none() {
        return Err(ApiError::NotFound("User"));
    }

    let assignment = state.db.create_vehicle_assignment(new).await;
    state
        .hub
        .broadcast(protocol::NEW_VEHICLE_ASSIGNMENT, &json!({ "vehicleAssignment": &assignment }))
        .await;
    Ok((StatusCode::CREATED, Json(assignment)))
}

pub async fn api_update_vehicle_assignment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
    payload: Body<AssignmentUpdate>,
) -> ApiResult<Json<VehicleAssignment>> {
    user.require_admin()?;
    let Json(update) = payload?;
    if let Some(vehicle_id) = &update.vehicle_id {
        validation::validate_vehicle_id(vehicle_id)?;
    }

    let assignment = state
        .db
        .update_vehicle_assignment(id, update)
        .await
        .ok_or(ApiError::NotFound("Vehicle assignment"))?;
    state
        .hub
        .broadcast(protocol::UPDATED_VEHICLE_ASSIGNMENT, &json!({ "vehicleAssignment": &assignment }))
        .await;
    Ok(Json(assignment))
}
