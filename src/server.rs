use std::sync::Arc;

use axum::http::StatusCode;
use axum::{Json, Router, routing::post};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::engine::{Plan, ResolveOptions};
use crate::error::{PartakeError, Result};
use crate::interface::{BuildInterface, JobOptions};
use crate::time::{Grain, parse_instant};

#[derive(Deserialize)]
pub struct PlanRequest {
    pub rule: String,
    pub start: String,
    pub stop: String,
    #[serde(default)]
    pub window: Option<u32>,
    #[serde(default)]
    pub grain: Option<String>,
}

#[derive(Serialize)]
pub struct PlanResponse {
    pub status: String,
    pub elapsed_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Turns the request into a dry-run job; shortened instants are read in `timezone`.
pub fn job_for(request: &PlanRequest, timezone: FixedOffset) -> Result<JobOptions> {
    // both ends must parse before anything is resolved
    parse_instant(&request.start, timezone)?;
    parse_instant(&request.stop, timezone)?;
    let report_grain = request
        .grain
        .as_deref()
        .map(str::parse::<Grain>)
        .transpose()?;
    Ok(JobOptions {
        resolve: ResolveOptions {
            window: request.window,
            report_grain,
        },
        dry_run: true,
    })
}

fn status_of(e: &PartakeError) -> StatusCode {
    if e.is_input_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

fn failure(e: &PartakeError, elapsed_ms: f64) -> (StatusCode, Json<PlanResponse>) {
    let status = status_of(e);
    let msg = e.to_string();
    warn!(%msg, code = %status.as_u16(), "plan error");
    let body = PlanResponse {
        status: "error".into(),
        elapsed_ms,
        plan: None,
        error: Some(msg),
    };
    (status, Json(body))
}

pub fn router(interface: Arc<BuildInterface>, timezone: FixedOffset) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::POST])
        .allow_headers(Any);
    Router::new()
        .route(
            "/v1/plan",
            post(move |Json(req): Json<PlanRequest>| {
                let iface = Arc::clone(&interface);
                async move {
                    let started = std::time::Instant::now();
                    let elapsed_ms = || started.elapsed().as_secs_f64() * 1000.0;
                    let job = match job_for(&req, timezone) {
                        Ok(job) => job,
                        Err(e) => return failure(&e, elapsed_ms()),
                    };
                    // the engine is synchronous, so it gets a blocking thread
                    let outcome = tokio::task::spawn_blocking(move || {
                        let start = parse_instant(&req.start, timezone)?;
                        let stop = parse_instant(&req.stop, timezone)?;
                        iface.run_sync(&req.rule, start, stop, &job)
                    })
                    .await
                    .unwrap_or_else(|e| Err(PartakeError::Execution(format!("join error: {e}"))));
                    match outcome {
                        Ok(plan) => {
                            info!(ms = elapsed_ms(), steps = plan.steps.len(), "plan complete");
                            let body = PlanResponse {
                                status: "ok".into(),
                                elapsed_ms: elapsed_ms(),
                                plan: Some(plan),
                                error: None,
                            };
                            (StatusCode::OK, Json(body))
                        }
                        Err(e) => failure(&e, elapsed_ms()),
                    }
                }
            }),
        )
        .layer(cors)
}
