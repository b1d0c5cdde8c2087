//! Pure request validation.
//!
//! Validation is total: every rejection path produces an explicit
//! [`Error::InvalidRequest`] with a message naming the offending field.
//! No I/O happens here; feature gating against the selected model (for
//! example vision for image parts) is the router's responsibility.

use crate::catalog::{AUTO_MODEL, ModelCatalog};
use crate::error::{Error, Result};
use crate::messages::ModelRequest;

const TEMPERATURE_RANGE: (f32, f32) = (0.0, 2.0);
const TOP_P_RANGE: (f32, f32) = (0.0, 1.0);
const PENALTY_RANGE: (f32, f32) = (-2.0, 2.0);

/// Validate a request against structural rules and the catalog.
pub fn validate_request(request: &ModelRequest, catalog: &ModelCatalog) -> Result<()> {
    if request.model.is_empty() {
        return Err(Error::InvalidRequest("model must not be empty".into()));
    }

    if request.model != AUTO_MODEL && !catalog.contains(&request.model) {
        // An unknown model is not an error by itself: the router falls
        // through to eligible models. It must still be shaped like an id.
        if !request.model.contains('/') {
            return Err(Error::InvalidRequest(format!(
                "model '{}' is neither a catalog id nor '{AUTO_MODEL}'",
                request.model
            )));
        }
    }

    if request.messages.is_empty() {
        return Err(Error::InvalidRequest("messages must not be empty".into()));
    }

    check_range("temperature", request.temperature, TEMPERATURE_RANGE)?;
    check_range("top_p", request.top_p, TOP_P_RANGE)?;
    check_range("frequency_penalty", request.frequency_penalty, PENALTY_RANGE)?;
    check_range("presence_penalty", request.presence_penalty, PENALTY_RANGE)?;

    if let Some(max_tokens) = request.max_tokens
        && max_tokens == 0
    {
        return Err(Error::InvalidRequest("max_tokens must be positive".into()));
    }

    Ok(())
}

fn check_range(name: &str, value: Option<f32>, (min, max): (f32, f32)) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };

    if !value.is_finite() {
        return Err(Error::InvalidRequest(format!("{name} must be a finite number")));
    }

    if value < min || value > max {
        return Err(Error::InvalidRequest(format!(
            "{name} must be between {min} and {max}, got {value}"
        )));
    }

    Ok(())
}
