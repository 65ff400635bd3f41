// src/server.rs

use bytes::BufMut;
use futures_util::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tracing::{error, warn};
use warp::{
    http::StatusCode,
    multipart::FormData,
    reject::Rejection,
    reply::{Json, Reply, WithStatus},
    Filter,
};

use crate::{
    error::PipelineError,
    pipeline::{Pipeline, Upload},
};

/// Largest JSON body accepted by `POST /bucket`.
const MAX_JSON_BYTES: u64 = 16 * 1024;

#[derive(Debug, Deserialize)]
struct BucketRequest {
    bucket_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BucketQuery {
    bucket_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransformQuery {
    bucket_name: Option<String>,
    file_name: Option<String>,
}

#[derive(Serialize)]
struct MessageResponse {
    message: &'static str,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn reply<T: Serialize>(body: &T, status: StatusCode) -> WithStatus<Json> {
    warp::reply::with_status(warp::reply::json(body), status)
}

fn error_reply(status: StatusCode, error: String) -> WithStatus<Json> {
    reply(&ErrorResponse { error }, status)
}

/// Run a blocking pipeline call off the async executor and turn its outcome into a
/// JSON reply.
async fn run<T, F>(success: StatusCode, job: F) -> Result<WithStatus<Json>, Rejection>
where
    F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
    T: Serialize + Send + 'static,
{
    match tokio::task::spawn_blocking(job).await {
        Ok(Ok(body)) => Ok(reply(&body, success)),
        Ok(Err(err)) => {
            let status = err.status();
            if status.is_server_error() {
                error!(error = %err, "request failed");
            } else {
                warn!(error = %err, "request rejected");
            }
            Ok(error_reply(status, err.to_string()))
        }
        Err(join_err) => {
            error!(error = %join_err, "pipeline task failed");
            Ok(error_reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("pipeline task failed: {}", join_err),
            ))
        }
    }
}

async fn health_check() -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&serde_json::json!({
        "status": "healthy",
        "service": "salesflow"
    })))
}

async fn create_bucket(
    req: BucketRequest,
    pipeline: Pipeline,
) -> Result<WithStatus<Json>, Rejection> {
    run(StatusCode::CREATED, move || {
        pipeline.create_bucket(req.bucket_name.as_deref())?;
        Ok(MessageResponse {
            message: "Bucket created successfully",
        })
    })
    .await
}

/// Pull the `file` part out of a multipart form, buffering its body.
async fn read_upload(form: FormData) -> Result<Option<Upload>, warp::Error> {
    let mut form = std::pin::pin!(form);
    while let Some(part) = form.try_next().await? {
        if part.name() != "file" {
            continue;
        }
        let file_name = part.filename().unwrap_or_default().to_string();
        let content_type = part.content_type().map(str::to_string);
        let body = part
            .stream()
            .try_fold(Vec::new(), |mut acc, buf| async move {
                acc.put(buf);
                Ok::<_, warp::Error>(acc)
            })
            .await?;
        return Ok(Some(Upload {
            file_name,
            content_type,
            body,
        }));
    }
    Ok(None)
}

async fn ingest_sales(
    query: BucketQuery,
    form: FormData,
    pipeline: Pipeline,
) -> Result<WithStatus<Json>, Rejection> {
    let upload = match read_upload(form).await {
        Ok(upload) => upload,
        Err(e) => {
            warn!(error = %e, "unreadable multipart upload");
            return Ok(error_reply(
                StatusCode::BAD_REQUEST,
                PipelineError::InvalidFileFormat(format!("unreadable upload: {}", e)).to_string(),
            ));
        }
    };

    run(StatusCode::CREATED, move || {
        pipeline.ingest(query.bucket_name.as_deref(), upload)?;
        Ok(MessageResponse {
            message: "File(s) uploaded successfully",
        })
    })
    .await
}

async fn transform_sales(
    query: TransformQuery,
    pipeline: Pipeline,
) -> Result<WithStatus<Json>, Rejection> {
    run(StatusCode::OK, move || {
        pipeline.transform(query.bucket_name.as_deref(), query.file_name.as_deref())
    })
    .await
}

async fn list_buckets(pipeline: Pipeline) -> Result<WithStatus<Json>, Rejection> {
    run(StatusCode::OK, move || pipeline.list_buckets()).await
}

async fn list_objects(
    query: BucketQuery,
    pipeline: Pipeline,
) -> Result<WithStatus<Json>, Rejection> {
    run(StatusCode::OK, move || {
        pipeline.list_objects(query.bucket_name.as_deref())
    })
    .await
}

/// Render rejections (unknown route, bad body, oversized upload) as JSON errors.
async fn handle_rejection(err: Rejection) -> Result<WithStatus<Json>, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if let Some(e) = err.find::<warp::reject::PayloadTooLarge>() {
        (StatusCode::PAYLOAD_TOO_LARGE, e.to_string())
    } else if let Some(e) = err.find::<warp::reject::MethodNotAllowed>() {
        (StatusCode::METHOD_NOT_ALLOWED, e.to_string())
    } else {
        (StatusCode::BAD_REQUEST, format!("{:?}", err))
    };
    Ok(error_reply(status, message))
}

fn with_pipeline(
    pipeline: Pipeline,
) -> impl Filter<Extract = (Pipeline,), Error = Infallible> + Clone {
    warp::any().map(move || pipeline.clone())
}

/// All routes of the service.
pub fn routes(
    pipeline: Pipeline,
    max_upload_bytes: u64,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and_then(health_check);

    let bucket = warp::path("bucket")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_JSON_BYTES))
        .and(warp::body::json())
        .and(with_pipeline(pipeline.clone()))
        .and_then(create_bucket);

    let ingest = warp::path!("ingest" / "sales")
        .and(warp::post())
        .and(warp::query::<BucketQuery>())
        .and(warp::multipart::form().max_length(max_upload_bytes))
        .and(with_pipeline(pipeline.clone()))
        .and_then(ingest_sales);

    let transform = warp::path!("transform" / "sales")
        .and(warp::post())
        .and(warp::query::<TransformQuery>())
        .and(with_pipeline(pipeline.clone()))
        .and_then(transform_sales);

    let buckets = warp::path("buckets")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_pipeline(pipeline.clone()))
        .and_then(list_buckets);

    let objects = warp::path("objects")
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<BucketQuery>())
        .and(with_pipeline(pipeline))
        .and_then(list_objects);

    health
        .or(bucket)
        .or(ingest)
        .or(transform)
        .or(buckets)
        .or(objects)
        .recover(handle_rejection)
        .with(warp::trace::request())
}
