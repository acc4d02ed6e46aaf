pub mod archive_service;
pub mod diagnostics;
pub mod download_service;
pub mod pipeline_service;
pub mod sanitize;
pub mod session_store;
pub mod validation_service;
pub mod worker_service;
pub mod workspace_service;
