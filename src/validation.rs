//! Input validation for inbound fleet events

use thiserror::Error;

use crate::db::{NewAlert, NewDetection, NewVehicle};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{0} cannot be empty")]
    Empty(&'static str),

    #[error("{field} must be between {min} and {max}, got {actual}")]
    OutOfRange {
        field: &'static str,
        min: f64,
        max: f64,
        actual: f64,
    },

    #[error("Malformed payload: {0}")]
    Malformed(String),
}

/// Maximum accepted length for vehicle identifiers
pub const MAX_VEHICLE_ID_LENGTH: usize = 64;

/// Ids are stored and keyed verbatim, so padded ids are refused rather than trimmed
pub fn validate_vehicle_id(vehicle_id: &str) -> Result<(), ValidationError> {
    if vehicle_id.trim().is_empty() {
        return Err(ValidationError::Empty("vehicleId"));
    }
    if vehicle_id.trim() != vehicle_id {
        return Err(ValidationError::Malformed(
            "vehicleId must not have leading or trailing whitespace".to_string(),
        ));
    }
    if vehicle_id.len() > MAX_VEHICLE_ID_LENGTH {
        return Err(ValidationError::Malformed(format!(
            "vehicleId is too long ({} chars, max {})",
            vehicle_id.len(),
            MAX_VEHICLE_ID_LENGTH
        )));
    }
    Ok(())
}

/// Check a detection against the detection schema
pub fn validate_detection(detection: &NewDetection) -> Result<(), ValidationError> {
    validate_vehicle_id(&detection.vehicle_id)?;

    // NaN fails the range check too
    if !(0.0..=1.0).contains(&detection.confidence) {
        return Err(ValidationError::OutOfRange {
            field: "confidence",
            min: 0.0,
            max: 1.0,
            actual: detection.confidence,
        });
    }
    Ok(())
}

pub fn validate_alert(alert: &NewAlert) -> Result<(), ValidationError> {
    validate_vehicle_id(&alert.vehicle_id)?;
    if alert.alert_type.trim().is_empty() {
        return Err(ValidationError::Empty("type"));
    }
    if alert.message.trim().is_empty() {
        return Err(ValidationError::Empty("message"));
    }
    Ok(())
}

pub fn validate_vehicle(vehicle: &NewVehicle) -> Result<(), ValidationError> {
    validate_vehicle_id(&vehicle.vehicle_id)?;
    if vehicle.name.trim().is_empty() {
        return Err(ValidationError::Empty("name"));
    }
    Ok(())
}

pub fn validate_coordinates(latitude: f64, longitude: f64) -> Result<(), ValidationError> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(ValidationError::OutOfRange {
            field: "latitude",
            min: -90.0,
            max: 90.0,
            actual: latitude,
        });
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(ValidationError::OutOfRange {
            field: "longitude",
            min: -180.0,
            max: 180.0,
            actual: longitude,
        });
    }
    Ok(())
}
