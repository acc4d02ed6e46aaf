//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the upload directory and the worker

use crate::services::pipeline_service::PipelineService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::HashMap, path::Path};
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`
///
/// Very small liveness probe. Always returns 200 OK with a plain JSON body
/// and never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness probe that:
/// 1. Performs a write/read/delete against the upload base directory.
/// 2. Asks the worker whether it could be started.
///
/// Returns JSON describing each check. HTTP 200 when all checks pass,
/// HTTP 503 when any check fails.
pub async fn readyz(State(service): State<PipelineService>) -> impl IntoResponse {
    let disk_check = disk_probe(service.workspaces().base_dir()).await;
    let worker_check = match service.worker().check_ready().await {
        Ok(detail) => CheckStatus {
            ok: true,
            detail: Some(detail).filter(|d| !d.is_empty()),
        },
        Err(err) => CheckStatus {
            ok: false,
            detail: Some(err),
        },
    };

    let overall_ok = disk_check.ok && worker_check.ok;
    let mut checks = HashMap::new();
    checks.insert("disk", disk_check);
    checks.insert("worker", worker_check);

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn disk_probe(base: &Path) -> CheckStatus {
    let tmp_path = base.join(format!(".readyz-{}", Uuid::new_v4()));
    let (ok, detail) = match fs::write(&tmp_path, b"readyz").await {
        Ok(_) => match fs::read(&tmp_path).await {
            Ok(bytes) if bytes == b"readyz" => match fs::remove_file(&tmp_path).await {
                Ok(_) => (true, None),
                Err(e) => (true, Some(format!("could not remove tmp file: {}", e))),
            },
            Ok(_) => {
                let _ = fs::remove_file(&tmp_path).await; // best-effort cleanup
                (false, Some("file content mismatch".to_string()))
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp_path).await; // best-effort cleanup
                (false, Some(format!("could not read tmp file: {}", e)))
            }
        },
        Err(e) => (false, Some(format!("could not write tmp file: {}", e))),
    };
    CheckStatus { ok, detail }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    detail: Option<String>,
}
