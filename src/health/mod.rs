//! Liveness endpoint.
//!
//! `GET /healthz` answers locally and never touches the upstream, so a
//! load balancer can tell "proxy is up" apart from "Emby is up".

use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
}

pub async fn healthz() -> Json<HealthStatus> {
    Json(HealthStatus { status: "healthy" })
}
