//! HTTP ingress.
//!
//! `POST /upload` takes CSV rows and submits each one to the pipeline, in
//! order. The upload is either a multipart form whose `file` field holds the
//! data, or the raw request body. The data may be a zip archive, in which
//! case every `.csv` member is read in archive order, or a plain CSV
//! document. A `traceparent` request header makes every row a continuation
//! of the caller's trace; without one each row starts its own trace.

use std::io::{Cursor, Read};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use opentelemetry::propagation::Extractor;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracebench_core::{Pipeline, SpanContext, TRACEPARENT_HEADER, extract_context};
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::error::{
    AppError, ArchiveSnafu, BindSnafu, BodySnafu, CsvSnafu, MissingFileSnafu, MultipartRequestSnafu,
    MultipartSnafu, ReadMemberSnafu, ServeSnafu, SubmitSnafu, UploadError,
};

/// One CSV record, split into fields.
pub type Row = Vec<String>;

pub type SharedPipeline = Arc<Pipeline<Row>>;

pub const STATUS_SUCCESS: &str = "Success!";
pub const STATUS_FAILURE: &str = "Failed to upload!";

/// Multipart field carrying the upload.
pub const FILE_FIELD: &str = "file";

pub const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub status: String,
    pub code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted: Option<usize>,
}

impl UploadResponse {
    fn success(accepted: usize) -> Self {
        Self {
            status: STATUS_SUCCESS.to_string(),
            code: StatusCode::OK.as_u16(),
            accepted: Some(accepted),
        }
    }

    fn failure() -> Self {
        Self {
            status: STATUS_FAILURE.to_string(),
            code: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            accepted: None,
        }
    }
}

/// Parse a CSV document. There is no header row, blank lines are skipped,
/// and records may differ in width.
pub fn parse_rows(data: &[u8]) -> Result<Vec<Row>, csv::Error> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(data)
        .records()
        .map(|record| record.map(|record| record.iter().map(str::to_owned).collect()))
        .collect()
}

/// Rows from an upload: a zip archive of CSV files or a single CSV document.
pub fn parse_upload(data: &[u8]) -> Result<Vec<Row>, UploadError> {
    if !data.starts_with(ZIP_MAGIC) {
        return parse_rows(data).context(CsvSnafu { origin: "body" });
    }

    let mut archive = ZipArchive::new(Cursor::new(data)).context(ArchiveSnafu)?;
    let mut rows = Vec::new();
    for index in 0..archive.len() {
        let mut member = archive.by_index(index).context(ArchiveSnafu)?;
        if !member.is_file() || !is_csv_name(member.name()) {
            continue;
        }
        let name = member.name().to_string();
        let mut contents = Vec::new();
        member
            .read_to_end(&mut contents)
            .context(ReadMemberSnafu { member: name.clone() })?;
        let parsed = parse_rows(&contents).context(CsvSnafu { origin: name.clone() })?;
        debug!(member = %name, rows = parsed.len(), "Read archive member");
        rows.extend(parsed);
    }
    Ok(rows)
}

fn is_csv_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}

/// Reads propagation headers off an HTTP request.
struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(HeaderName::as_str).collect()
    }
}

fn upstream_context(headers: &HeaderMap) -> SpanContext {
    let context = extract_context(&HeaderExtractor(headers));
    if !context.is_valid() && headers.contains_key(TRACEPARENT_HEADER) {
        debug!("Ignoring malformed traceparent header");
    }
    context
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| {
            value
                .trim_start()
                .to_ascii_lowercase()
                .starts_with("multipart/form-data")
        })
}

async fn read_upload(request: Request) -> Result<Bytes, UploadError> {
    if !is_multipart(request.headers()) {
        return axum::body::to_bytes(request.into_body(), MAX_UPLOAD_BYTES)
            .await
            .context(BodySnafu);
    }

    let mut multipart = Multipart::from_request(request, &())
        .await
        .context(MultipartRequestSnafu)?;
    while let Some(field) = multipart.next_field().await.context(MultipartSnafu)? {
        if field.name() == Some(FILE_FIELD) {
            return field.bytes().await.context(MultipartSnafu);
        }
    }
    MissingFileSnafu { field: FILE_FIELD }.fail()
}

async fn accept_upload(pipeline: &Pipeline<Row>, request: Request) -> Result<usize, UploadError> {
    let parent = upstream_context(request.headers());
    let data = read_upload(request).await?;
    let rows = parse_upload(&data)?;
    let total = rows.len();

    for (row, payload) in rows.into_iter().enumerate() {
        pipeline
            .submit_with_context(payload, parent.clone())
            .await
            .context(SubmitSnafu { row })?;
    }
    Ok(total)
}

pub fn router(pipeline: SharedPipeline) -> Router {
    Router::new()
        .route("/upload", post(upload_handler))
        .route("/health", get(crate::metrics::health_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(pipeline)
}

async fn upload_handler(
    State(pipeline): State<SharedPipeline>,
    request: Request,
) -> (StatusCode, Json<UploadResponse>) {
    match accept_upload(&pipeline, request).await {
        Ok(accepted) => {
            debug!(rows = accepted, "Upload accepted");
            (StatusCode::OK, Json(UploadResponse::success(accepted)))
        }
        Err(e) => {
            warn!(error = %e, "Upload failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(UploadResponse::failure()),
            )
        }
    }
}

/// Serve the ingress routes until `shutdown` fires.
pub async fn serve(
    addr: SocketAddr,
    pipeline: SharedPipeline,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    let listener = TcpListener::bind(addr).await.context(BindSnafu {
        component: "ingress",
        address: addr,
    })?;
    info!(%addr, "Ingress server started");

    axum::serve(listener, router(pipeline))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context(ServeSnafu)
}
