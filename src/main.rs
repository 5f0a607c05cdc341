use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

mod describe;
mod extract;
mod models;

use describe::{DescribeError, Describer};
use extract::ExtractError;
use models::{
    missing_alt_percent, ActionRequest, ActionResponse, DescribeRequest, DescribeResponse,
    ScanRequest, ScanResponse, ScoreBand,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let describer = match Describer::from_env() {
        Ok(describer) => Arc::new(describer),
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/scan", post(scan))
        .route("/describe", post(describe_image))
        .route("/message", post(message))
        .with_state(describer);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await.unwrap();
    tracing::info!("listening on {}", listener.local_addr().unwrap());
    axum::serve(listener, app).await.unwrap();
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// List the page's images with alt status and the aggregate score.
async fn scan(Json(req): Json<ScanRequest>) -> Result<Json<ScanResponse>, AppError> {
    let images = extract::scan_page(&req.url).await?;
    let missing = missing_alt_percent(&images);
    let score = ScoreBand::classify(missing);
    tracing::debug!(url = %req.url, images = images.len(), missing_percent = missing, "scanned page");

    Ok(Json(ScanResponse {
        source_url: req.url,
        total_images: images.len(),
        missing_alt_percent: missing,
        score,
        summary: score.summary(missing),
        images,
    }))
}

/// One per-image action end to end: fetch the page, extract context when
/// enabled, then generate — or refine when feedback is supplied.
async fn describe_image(
    State(describer): State<Arc<Describer>>,
    Json(req): Json<DescribeRequest>,
) -> Result<Json<DescribeResponse>, AppError> {
    let (src, context) =
        extract::image_for_description(&req.url, req.index, req.use_context).await?;
    let context_used = context.is_some();

    let alt_text = match (&req.feedback, &req.original_alt_text) {
        (Some(feedback), Some(original)) => {
            describer
                .refine(&src, original, feedback, context.as_ref())
                .await?
        }
        (Some(_), None) => {
            return Err(AppError::BadRequest(
                "originalAltText is required when feedback is provided".to_string(),
            ))
        }
        _ => describer.generate(&src, context.as_ref()).await?,
    };

    Ok(Json(DescribeResponse {
        alt_text,
        context_used,
    }))
}

/// Extension-style action dispatch: one typed variant per action.
async fn message(
    State(describer): State<Arc<Describer>>,
    Json(req): Json<ActionRequest>,
) -> Result<Json<ActionResponse>, AppError> {
    let response = match req {
        ActionRequest::GetImageContext { url, index } => ActionResponse::Context {
            context_data: extract::page_context(&url, index).await?,
        },
        ActionRequest::ScrollToImage { url, index } => ActionResponse::Location {
            src: extract::locate_image(&url, index).await?,
            index,
        },
        ActionRequest::GenerateAltText {
            image_src,
            context_data,
            use_context,
        } => {
            let context = if use_context { context_data } else { None };
            let context_used = context.is_some();
            ActionResponse::Generated {
                alt_text: describer.generate(&image_src, context.as_ref()).await?,
                context_used,
            }
        }
        ActionRequest::RefineAltText {
            image_src,
            original_alt_text,
            feedback,
            context_data,
            use_context,
        } => {
            let context = if use_context { context_data } else { None };
            ActionResponse::Refined {
                refined_alt_text: describer
                    .refine(&image_src, &original_alt_text, &feedback, context.as_ref())
                    .await?,
            }
        }
    };
    Ok(Json(response))
}

// ── Error mapping ────────────────────────────────────────────────────────────

enum AppError {
    Extract(ExtractError),
    Describe(DescribeError),
    BadRequest(String),
}

impl From<ExtractError> for AppError {
    fn from(e: ExtractError) -> Self {
        AppError::Extract(e)
    }
}

impl From<DescribeError> for AppError {
    fn from(e: DescribeError) -> Self {
        AppError::Describe(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            AppError::Extract(e) => match &e {
                ExtractError::InvalidUrl(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
                ExtractError::NotHtml => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
                ExtractError::Upstream => (StatusCode::BAD_GATEWAY, e.to_string()),
                ExtractError::Request(msg) => (
                    StatusCode::BAD_GATEWAY,
                    format!("Upstream request failed: {}", msg),
                ),
                ExtractError::NotFound(_) | ExtractError::NoSource(_) => {
                    (StatusCode::NOT_FOUND, e.to_string())
                }
            },
            AppError::Describe(e) => match &e {
                DescribeError::Api(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
                DescribeError::EmptyResult => (StatusCode::BAD_GATEWAY, e.to_string()),
                DescribeError::Request(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
                DescribeError::MissingCredentials => {
                    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
                }
            },
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };
        (status, Json(json!({"detail": detail}))).into_response()
    }
}
