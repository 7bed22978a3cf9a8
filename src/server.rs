//! HTTP boundary: `POST /predict`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use log::{error, info, warn};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::PredictError;
use crate::pipeline::{Prediction, Predictor};

/// Request body of `POST /predict`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PredictionInput {
    #[serde(deserialize_with = "lax_integer")]
    pub cycle_number: i64,
}

/// Integer field that also takes a whole float (`100.0`) or an integer
/// string (`"100"`). Fractions and other text are rejected.
fn lax_integer<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Lax {
        Int(i64),
        Float(f64),
        Text(String),
    }

    // 2^63, the first float past i64::MAX
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;

    let value = match Lax::deserialize(deserializer)? {
        Lax::Int(v) => Some(v),
        Lax::Float(v) if v.fract() == 0.0 && (-LIMIT..LIMIT).contains(&v) => Some(v as i64),
        Lax::Float(_) => None,
        Lax::Text(text) => text.trim().parse::<i64>().ok(),
    };
    value.ok_or_else(|| D::Error::custom("Input should be a valid integer"))
}

/// Error body, `{"detail": "..."}`.
#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

/// Every way a request can fail, with its status code.
#[derive(Debug)]
pub enum ApiError {
    InvalidBody(JsonRejection),
    Predict(PredictError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidBody(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Predict(PredictError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ApiError::Predict(PredictError::Transform(_) | PredictError::Prediction(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn detail(&self) -> String {
        match self {
            ApiError::InvalidBody(rejection) => rejection.body_text(),
            ApiError::Predict(err) => err.to_string(),
        }
    }
}

impl From<PredictError> for ApiError {
    fn from(err: PredictError) -> Self {
        ApiError::Predict(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(ErrorBody { detail: self.detail() })).into_response()
    }
}

/// Build the application router around a loaded predictor.
pub fn router(predictor: Arc<Predictor>) -> Router {
    Router::new()
        .route("/predict", post(predict))
        .with_state(predictor)
}

async fn predict(
    State(predictor): State<Arc<Predictor>>,
    payload: Result<Json<PredictionInput>, JsonRejection>,
) -> Result<Json<Prediction>, ApiError> {
    let Json(input) = payload.map_err(|rejection| {
        warn!("Rejected /predict body: {}", rejection.body_text());
        ApiError::InvalidBody(rejection)
    })?;

    match predictor.predict(input.cycle_number) {
        Ok(prediction) => {
            info!(
                "cycle {} -> {} ({})",
                input.cycle_number, prediction.condition, prediction.classification
            );
            Ok(Json(prediction))
        }
        Err(err @ PredictError::NotFound { .. }) => {
            info!("cycle {} not found", input.cycle_number);
            Err(err.into())
        }
        Err(err) => {
            error!("cycle {}: {err}", input.cycle_number);
            Err(err.into())
        }
    }
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(addr: SocketAddr, predictor: Predictor) -> anyhow::Result<()> {
    let app = router(Arc::new(predictor));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cycle_number(body: &str) -> Result<i64, serde_json::Error> {
        serde_json::from_str::<PredictionInput>(body).map(|input| input.cycle_number)
    }

    #[test]
    fn whole_numbers_in_any_form_are_accepted() {
        assert_eq!(cycle_number(r#"{"cycle_number": 100}"#).unwrap(), 100);
        assert_eq!(cycle_number(r#"{"cycle_number": 100.0}"#).unwrap(), 100);
        assert_eq!(cycle_number(r#"{"cycle_number": "100"}"#).unwrap(), 100);
        assert_eq!(cycle_number(r#"{"cycle_number": " -3 "}"#).unwrap(), -3);
    }

    #[test]
    fn non_integers_are_rejected() {
        for body in [
            r#"{"cycle_number": 1.5}"#,
            r#"{"cycle_number": "abc"}"#,
            r#"{"cycle_number": "1.5"}"#,
            r#"{"cycle_number": 1e300}"#,
            r#"{"cycle_number": null}"#,
            r#"{"cycle_number": true}"#,
            r#"{}"#,
        ] {
            assert!(cycle_number(body).is_err(), "{body}");
        }
        let err = cycle_number(r#"{"cycle_number": 1.5}"#).unwrap_err();
        assert!(err.to_string().contains("Input should be a valid integer"), "{err}");
    }
}
