//! HTTP handlers for the document tools.
//! Uploads are buffered per item up to the per-request ceiling; results are
//! streamed back from disk on redemption.

use crate::{
    config::UploadLimits,
    errors::AppError,
    handlers::session::{presented_session, session_cookie},
    models::{
        report::{ProcessingReport, ReportStatus},
        tool::ToolKind,
        upload::{IntakeBatch, UploadItem},
    },
    services::{
        download_service::Redemption, pipeline_service::PipelineService,
        validation_service::ALLOWED_EXTENSIONS,
    },
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State, multipart::MultipartError},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

const UPLOAD_FIELDS: [&str; 2] = ["files", "files[]"];
const NO_FILES: &str = "No files were received. Select at least one .xml or .zip file.";
const BODY_TOO_LARGE: &str = "The upload exceeds the server's total size limit.";

#[derive(Debug, Deserialize)]
pub struct ToolQuery {
    pub download: Option<String>,
}

#[derive(Serialize)]
struct ToolPage {
    slug: &'static str,
    title: &'static str,
    description: &'static str,
    output: &'static str,
    accepts: Vec<String>,
    limits: UploadLimits,
}

impl ToolPage {
    fn new(tool: ToolKind, limits: UploadLimits) -> Self {
        Self {
            slug: tool.slug(),
            title: tool.title(),
            description: tool.description(),
            output: tool.download_name(),
            accepts: ALLOWED_EXTENSIONS.iter().map(|e| format!(".{}", e)).collect(),
            limits,
        }
    }
}

#[derive(Serialize)]
struct ToolIndex {
    tools: Vec<ToolPage>,
}

/// `GET /tools`
pub async fn list_tools(State(service): State<PipelineService>) -> impl IntoResponse {
    let limits = service.limits();
    Json(ToolIndex {
        tools: ToolKind::ALL
            .iter()
            .map(|tool| ToolPage::new(*tool, limits))
            .collect(),
    })
}

/// `GET /tools/{tool}`: the tool page, or the artifact when `?download=`
/// names a pending result of the caller's session.
pub async fn tool_page(
    State(service): State<PipelineService>,
    Path(tool): Path<String>,
    Query(query): Query<ToolQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let tool = parse_tool(&tool)?;

    if let (Some(token), Some(session)) = (query.download.as_deref(), presented_session(&headers)) {
        if let Some(redemption) = service.redeem(session, token).await {
            return Ok(artifact_response(redemption));
        }
        debug!("download token miss for {}", tool);
    }

    Ok(Json(ToolPage::new(tool, service.limits())).into_response())
}

/// `POST /tools/{tool}`: multipart upload in field `files` (or `files[]`).
pub async fn upload_batch(
    State(service): State<PipelineService>,
    Path(tool): Path<String>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let tool = parse_tool(&tool)?;
    let presented = presented_session(&headers);
    let session = service.sessions().open(presented).await;
    let cookie = (presented != Some(session)).then(|| session_cookie(session));

    let (status, report) = match read_batch(multipart, service.limits().max_file_uploads).await {
        Ok(batch) if batch.is_empty() => (
            StatusCode::BAD_REQUEST,
            ProcessingReport::rejected(tool, NO_FILES),
        ),
        Ok(batch) => {
            info!(
                "{} upload: {} item(s), {} dropped",
                tool,
                batch.items.len(),
                batch.dropped.len()
            );
            let report = service.process(tool, session, batch).await?;
            (report_status(&report), report)
        }
        Err(err) if err.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            warn!("{} upload over the body limit: {}", tool, err);
            (
                StatusCode::PAYLOAD_TOO_LARGE,
                ProcessingReport::rejected(tool, BODY_TOO_LARGE),
            )
        }
        Err(err) => {
            warn!("{} upload could not be read: {}", tool, err);
            (
                StatusCode::BAD_REQUEST,
                ProcessingReport::rejected(tool, NO_FILES),
            )
        }
    };

    let mut response = (status, Json(report)).into_response();
    if let Some(cookie) = cookie {
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
    }
    Ok(response)
}

/// Collect file fields into an intake batch.
///
/// Bodies past `max_items` are never buffered; only their names are kept.
/// A body that fails mid-read becomes an item with a transport error, unless
/// the failure is the body limit, which fails the whole request.
async fn read_batch(mut multipart: Multipart, max_items: usize) -> Result<IntakeBatch, MultipartError> {
    let mut batch = IntakeBatch::default();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) if err.status() == StatusCode::PAYLOAD_TOO_LARGE => return Err(err),
            Err(err) if batch.is_empty() => return Err(err),
            Err(err) => {
                warn!("multipart stream ended early: {}", err);
                break;
            }
        };

        if !field.name().is_some_and(|name| UPLOAD_FIELDS.contains(&name)) {
            continue;
        }
        let name = match field.file_name() {
            Some(name) if !name.is_empty() => name.to_string(),
            // an empty file input
            _ => continue,
        };

        if batch.items.len() >= max_items {
            batch.dropped.push(name);
            continue;
        }

        match field.bytes().await {
            Ok(data) => batch.items.push(UploadItem::received(&name, data)),
            Err(err) if err.status() == StatusCode::PAYLOAD_TOO_LARGE => return Err(err),
            Err(err) => {
                warn!("upload of {} was interrupted: {}", name, err);
                batch.items.push(UploadItem::failed(&name, err.body_text()));
            }
        }
    }

    Ok(batch)
}

fn parse_tool(slug: &str) -> Result<ToolKind, AppError> {
    slug.parse::<ToolKind>()
        .map_err(|err| AppError::not_found(err.to_string()))
}

fn report_status(report: &ProcessingReport) -> StatusCode {
    match report.status {
        ReportStatus::Succeeded => StatusCode::OK,
        ReportStatus::Failed => StatusCode::UNPROCESSABLE_ENTITY,
        ReportStatus::Rejected => StatusCode::BAD_REQUEST,
    }
}

fn artifact_response(redemption: Redemption) -> Response {
    let body = Body::from_stream(ReaderStream::new(redemption.file));
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(redemption.content_type),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(redemption.len));
    if let Ok(value) =
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", redemption.filename))
    {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}
