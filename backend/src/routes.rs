use actix_multipart::{Multipart, MultipartError};
use actix_web::error::BlockingError;
use actix_web::http::{header, StatusCode};
use actix_web::{web, HttpRequest, HttpResponse, ResponseError};
use futures::{StreamExt, TryStreamExt};
use log::{error, info, warn};
use shared::ErrorResponse;
use uuid::Uuid;

use crate::service::{DiagnosisError, DiagnosisService};

const FILE_FIELD: &str = "file";

/// Largest accepted upload, in bytes.
#[derive(Debug, Clone, Copy)]
pub struct UploadLimit(pub usize);

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("No file part")]
    NoFilePart,
    #[error("No selected file")]
    NoSelectedFile,
    #[error("File too large")]
    FileTooLarge,
    #[error("{0}")]
    Multipart(#[from] MultipartError),
    #[error("Models not loaded")]
    ModelsNotLoaded,
    #[error("{0}")]
    Diagnosis(#[from] DiagnosisError),
    #[error("Inference worker failed: {0}")]
    Blocking(#[from] BlockingError),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NoFilePart | ApiError::NoSelectedFile | ApiError::Multipart(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::FileTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::ModelsNotLoaded | ApiError::Diagnosis(_) | ApiError::Blocking(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
        })
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig, upload_limit: UploadLimit) {
    cfg.app_data(web::Data::new(upload_limit))
        .service(web::resource("/predict").route(web::post().to(predict)))
        .service(web::resource("/health").route(web::get().to(health)));
}

struct Upload {
    file_name: String,
    data: Vec<u8>,
}

fn is_multipart(req: &HttpRequest) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.to_ascii_lowercase().starts_with("multipart/form-data"))
}

/// Pulls the `file` part out of the form. Only a part carrying a filename
/// counts as a file; other fields are drained and ignored.
async fn read_upload(
    req: &HttpRequest,
    mut payload: Multipart,
    limit: UploadLimit,
) -> Result<Upload, ApiError> {
    if !is_multipart(req) {
        return Err(ApiError::NoFilePart);
    }

    let mut upload: Option<Upload> = None;
    while let Some(mut field) = payload.try_next().await? {
        let file_name = match field.content_disposition() {
            Some(cd) if upload.is_none() && cd.get_name() == Some(FILE_FIELD) => {
                cd.get_filename().map(String::from)
            }
            _ => None,
        };

        let Some(file_name) = file_name else {
            while let Some(chunk) = field.next().await {
                chunk?;
            }
            continue;
        };

        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk?;
            if data.len() + chunk.len() > limit.0 {
                return Err(ApiError::FileTooLarge);
            }
            data.extend_from_slice(&chunk);
        }
        upload = Some(Upload { file_name, data });
    }

    let upload = upload.ok_or(ApiError::NoFilePart)?;
    if upload.file_name.is_empty() {
        return Err(ApiError::NoSelectedFile);
    }
    Ok(upload)
}

async fn predict(
    service: web::Data<DiagnosisService>,
    limit: web::Data<UploadLimit>,
    req: HttpRequest,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    if !service.is_ready() {
        error!("Prediction requested but no model is loaded");
        return Err(ApiError::ModelsNotLoaded);
    }

    let upload = read_upload(&req, payload, **limit).await.map_err(|e| {
        warn!("Rejected upload: {}", e);
        e
    })?;

    let request_id = Uuid::new_v4();
    info!(
        "[{}] Received {} ({} bytes)",
        request_id,
        upload.file_name,
        upload.data.len()
    );

    let worker = service.clone();
    let outcome = web::block(move || worker.diagnose(request_id, &upload.data)).await?;
    let response = outcome.map_err(|e| {
        error!("[{}] Prediction failed: {:?}", request_id, e);
        ApiError::Diagnosis(e)
    })?;

    Ok(HttpResponse::Ok().json(response))
}

async fn health(service: web::Data<DiagnosisService>) -> HttpResponse {
    HttpResponse::Ok().json(service.status())
}
