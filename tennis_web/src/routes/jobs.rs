use crate::{
    jobs::{accepted_extension, JobError, JobSnapshot, OUTPUT_FILE_NAME},
    server::SharedState,
};
use axum::{
    body::Body,
    extract::{
        multipart::{Field, MultipartError},
        Multipart, Path, State,
    },
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use bytes::Bytes;
use futures::{future, stream, Stream, StreamExt};
use serde::Serialize;
use std::io;
use thiserror::Error;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncWriteExt},
};
use tokio_stream::wrappers::WatchStream;
use tracing::instrument;

const VIDEO_CONTENT_TYPE: &str = "video/mp4";
const UPLOAD_FIELD: &str = "file";
const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Job(#[from] JobError),
    #[error("Invalid upload: {0}")]
    Multipart(#[from] MultipartError),
    #[error("No file uploaded, expected a multipart field named \"file\"")]
    MissingFile,
    #[error("I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("HTTP builder failed: {0}")]
    HttpBuilder(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Job(JobError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Job(JobError::UnsupportedFileType(_)) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::Job(JobError::StillProcessing(_)) | ApiError::Job(JobError::NoOutput(_)) => {
                StatusCode::CONFLICT
            }
            ApiError::Multipart(e) => e.status(),
            ApiError::MissingFile => StatusCode::BAD_REQUEST,
            ApiError::Job(JobError::Workspace(_)) | ApiError::Io(_) | ApiError::HttpBuilder(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!("{}", self);
        }
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Serialize)]
pub struct JobCreated {
    pub id: String,
}

#[instrument(skip(state, multipart))]
pub async fn create_job(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<JobCreated>), ApiError> {
    state.metrics.record_request("create_job");

    while let Some(mut field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        let extension = accepted_extension(&file_name)?;
        let job = state.jobs.create(&extension)?;

        match save_upload(&mut field, &job.input_path).await {
            Ok(bytes) => tracing::info!("Job {} received {:?} ({} bytes)", job.id, file_name, bytes),
            Err(e) => {
                state.jobs.discard(&job.id);
                return Err(e);
            }
        }

        let id = job.id.clone();
        state.runner.spawn(job);
        return Ok((StatusCode::ACCEPTED, Json(JobCreated { id })));
    }

    Err(ApiError::MissingFile)
}

async fn save_upload(field: &mut Field<'_>, path: &std::path::Path) -> Result<u64, ApiError> {
    let mut file = File::create(path).await?;
    let mut written = 0;
    while let Some(chunk) = field.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

#[instrument(skip(state))]
pub async fn job_status(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<JobSnapshot>, ApiError> {
    state.metrics.record_request("job_status");
    Ok(Json(state.jobs.snapshot(&id)?))
}

/// Streams status snapshots until the job finishes.
#[instrument(skip(state))]
pub async fn job_events(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    state.metrics.record_request("job_events");
    let receiver = state.jobs.subscribe(&id)?;

    let events = WatchStream::new(receiver)
        .scan(false, |finished, snapshot| {
            if *finished {
                return future::ready(None);
            }
            *finished = snapshot.status.is_finished();
            future::ready(Some(snapshot))
        })
        .map(|snapshot| Event::default().json_data(&snapshot));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

#[instrument(skip(state))]
pub async fn job_video(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    state.metrics.record_request("job_video");
    serve_output(&state, &id, "inline").await
}

#[instrument(skip(state))]
pub async fn job_download(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    state.metrics.record_request("job_download");
    let disposition = format!("attachment; filename=\"{}\"", OUTPUT_FILE_NAME);
    serve_output(&state, &id, &disposition).await
}

#[instrument(skip(state))]
pub async fn delete_job(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.metrics.record_request("delete_job");
    state.jobs.remove(&id)?;
    tracing::info!("Deleted job {}", id);
    Ok(StatusCode::NO_CONTENT)
}

async fn serve_output(
    state: &SharedState,
    id: &str,
    disposition: &str,
) -> Result<Response, ApiError> {
    let path = state.jobs.output_path(id)?;
    let file = match File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(JobError::NotFound(id.to_string()).into())
        }
        Err(e) => return Err(e.into()),
    };
    let length = file.metadata().await?.len();

    Response::builder()
        .header(header::CONTENT_TYPE, VIDEO_CONTENT_TYPE)
        .header(header::CONTENT_LENGTH, length)
        .header(header::CONTENT_DISPOSITION, disposition)
        .body(Body::from_stream(file_chunks(file)))
        .map_err(|e| ApiError::HttpBuilder(e.to_string()))
}

fn file_chunks(file: File) -> impl Stream<Item = Result<Bytes, io::Error>> {
    stream::unfold(Some(file), |file| async move {
        let mut file = file?;
        let mut buffer = vec![0u8; CHUNK_SIZE];
        match file.read(&mut buffer).await {
            Ok(0) => None,
            Ok(read) => {
                buffer.truncate(read);
                Some((Ok(Bytes::from(buffer)), Some(file)))
            }
            Err(e) => Some((Err(e), None)),
        }
    })
}
