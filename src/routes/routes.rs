//! Defines routes for the document tools.
//!
//! ## Structure
//! - **Probes**
//!   - `GET  /healthz` - liveness
//!   - `GET  /readyz` - upload directory and worker readiness
//!
//! - **Tools**
//!   - `GET  /tools` - list tool profiles and upload limits
//!   - `GET  /tools/{tool}` - tool page; `?download=<token>` redeems a result
//!   - `POST /tools/{tool}` - multipart upload in field `files`

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        tool_handlers::{list_tools, tool_page, upload_batch},
    },
    services::pipeline_service::PipelineService,
};
use axum::{Router, extract::DefaultBodyLimit, routing::get};

/// Build the router. `max_body_bytes` caps the total size of one request body.
pub fn routes(max_body_bytes: usize) -> Router<PipelineService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/tools", get(list_tools))
        .route("/tools/{tool}", get(tool_page).post(upload_batch))
        .layer(DefaultBodyLimit::max(max_body_bytes))
}
