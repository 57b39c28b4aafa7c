use crate::application::IngestDatasetUseCase;
use crate::domain::dataset::DatasetRecord;
use crate::domain::error::AppError;
use crate::domain::summary::TypeDistribution;
use actix_cors::Cors;
use actix_multipart::Multipart;
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::http::StatusCode;
use actix_web::{dev::Server, get, post, web, App, HttpResponse, HttpServer, Responder, ResponseError};
use chrono::{DateTime, Local, Utc};
use futures_util::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const MAX_LOG_ENTRIES: usize = 100;
const UPLOAD_FIELD: &str = "file";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LogEntry {
    pub time: String,
    pub level: String,
    pub source: String,
    pub message: String,
}

pub struct HttpState {
    pub ingest_use_case: Arc<IngestDatasetUseCase>,
    pub logs: Arc<Mutex<Vec<LogEntry>>>,
    pub max_upload_bytes: usize,
}

/// Wire form of a dataset record
#[derive(Debug, Serialize, Deserialize)]
pub struct DatasetResponse {
    pub id: Uuid,
    pub original_filename: String,
    pub uploaded_at: DateTime<Utc>,
    pub total_records: u64,
    pub avg_flowrate: Option<f64>,
    pub avg_pressure: Option<f64>,
    pub avg_temperature: Option<f64>,
    pub type_distribution: TypeDistribution,
    pub summary_pdf: Option<String>,
}

impl From<&DatasetRecord> for DatasetResponse {
    fn from(record: &DatasetRecord) -> Self {
        Self {
            id: record.id,
            original_filename: record.original_filename.clone(),
            uploaded_at: record.uploaded_at,
            total_records: record.summary.total_records,
            avg_flowrate: record.summary.avg_flowrate,
            avg_pressure: record.summary.avg_pressure,
            avg_temperature: record.summary.avg_temperature,
            type_distribution: record.summary.type_distribution.clone(),
            summary_pdf: record
                .has_report()
                .then(|| format!("/api/datasets/{}/report", record.id)),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    pub dataset: DatasetResponse,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::MalformedInput(_) | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Storage(_)
            | AppError::DatabaseError(_)
            | AppError::IoError(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            detail: error_detail(self),
        })
    }
}

fn error_detail(err: &AppError) -> String {
    match err {
        AppError::MalformedInput(msg) => format!("Unable to parse CSV: {}", msg),
        AppError::NotFound(msg) | AppError::ValidationError(msg) => msg.clone(),
        other => other.to_string(),
    }
}

fn parse_dataset_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::from_str(raw).map_err(|_| AppError::NotFound("Dataset not found".to_string()))
}

#[get("/")]
async fn api_root() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "message": "Chemical Equipment API is running",
        "endpoints": {
            "upload": "/api/upload",
            "history": "/api/history",
            "dataset": "/api/datasets/{id}",
            "report": "/api/datasets/{id}/report",
            "logs": "/api/logs"
        }
    }))
}

#[post("/upload")]
async fn upload_csv(
    data: web::Data<HttpState>,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let (filename, bytes) = read_upload(payload, data.max_upload_bytes)
        .await
        .map_err(|e| {
            add_log(&data.logs, "WARN", "Upload", &format!("Upload rejected: {}", e));
            e
        })?;

    add_log(
        &data.logs,
        "INFO",
        "Upload",
        &format!("Processing {} ({} bytes)", filename, bytes.len()),
    );

    match data.ingest_use_case.ingest(&filename, bytes).await {
        Ok(record) => {
            add_log(
                &data.logs,
                "INFO",
                "Upload",
                &format!("Stored dataset {} from {}", record.id, record.original_filename),
            );
            Ok(HttpResponse::Created().json(UploadResponse {
                message: "CSV processed successfully.".to_string(),
                dataset: DatasetResponse::from(&record),
            }))
        }
        Err(e) => {
            add_log(
                &data.logs,
                "ERROR",
                "Upload",
                &format!("Processing {} failed: {}", filename, e),
            );
            Err(e)
        }
    }
}

/// Pull the single `file` field out of a multipart body, enforcing the size limit
async fn read_upload(
    mut payload: Multipart,
    max_upload_bytes: usize,
) -> Result<(String, Vec<u8>), AppError> {
    let mut found: Option<(String, Vec<u8>)> = None;

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| AppError::ValidationError(format!("Invalid multipart payload: {}", e)))?
    {
        let is_upload_field = found.is_none() && field.name() == Some(UPLOAD_FIELD);
        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .unwrap_or_default()
            .to_string();

        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|e| AppError::ValidationError(format!("Invalid multipart payload: {}", e)))?
        {
            if !is_upload_field {
                continue;
            }
            if bytes.len() + chunk.len() > max_upload_bytes {
                return Err(AppError::ValidationError(format!(
                    "Upload exceeds the {} byte limit.",
                    max_upload_bytes
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        if is_upload_field {
            found = Some((filename, bytes));
        }
    }

    found.ok_or_else(|| {
        AppError::ValidationError("CSV file is required under the \"file\" field.".to_string())
    })
}

#[get("/history")]
async fn list_history(data: web::Data<HttpState>) -> Result<HttpResponse, AppError> {
    let records = data.ingest_use_case.history().await.map_err(|e| {
        add_log(&data.logs, "ERROR", "History", &format!("Failed to list history: {}", e));
        e
    })?;

    let body: Vec<DatasetResponse> = records.iter().map(DatasetResponse::from).collect();
    Ok(HttpResponse::Ok().json(body))
}

#[get("/datasets/{id}")]
async fn dataset_detail(
    data: web::Data<HttpState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let id = parse_dataset_id(&path)?;
    let record = data.ingest_use_case.get(&id).await?;
    Ok(HttpResponse::Ok().json(DatasetResponse::from(&record)))
}

#[get("/datasets/{id}/report")]
async fn download_report(
    data: web::Data<HttpState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let id = parse_dataset_id(&path)?;
    let (record, bytes) = data.ingest_use_case.report(&id).await.map_err(|e| {
        if !e.is_not_found() {
            add_log(&data.logs, "ERROR", "Report", &format!("Failed to open report {}: {}", id, e));
        }
        e
    })?;

    Ok(HttpResponse::Ok()
        .content_type("application/pdf")
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(record.report_filename())],
        })
        .body(bytes))
}

#[post("/datasets/{id}/report")]
async fn regenerate_report(
    data: web::Data<HttpState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let id = parse_dataset_id(&path)?;
    let record = data.ingest_use_case.regenerate_report(&id).await?;
    add_log(&data.logs, "INFO", "Report", &format!("Regenerated report for {}", id));
    Ok(HttpResponse::Ok().json(DatasetResponse::from(&record)))
}

#[get("/logs")]
async fn get_logs(data: web::Data<HttpState>) -> impl Responder {
    let logs = match data.logs.lock() {
        Ok(logs) => logs.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    };
    HttpResponse::Ok().json(logs)
}

pub fn add_log_entry(
    logs: &Mutex<Vec<LogEntry>>,
    level: &str,
    source: &str,
    message: &str,
) -> LogEntry {
    match level {
        "ERROR" => tracing::error!(source, "{}", message),
        "WARN" => tracing::warn!(source, "{}", message),
        _ => tracing::info!(source, "{}", message),
    }

    let entry = LogEntry {
        time: Local::now().format("%H:%M:%S").to_string(),
        level: level.to_string(),
        source: source.to_string(),
        message: message.to_string(),
    };
    let mut logs = match logs.lock() {
        Ok(logs) => logs,
        Err(poisoned) => poisoned.into_inner(),
    };
    logs.push(entry.clone());
    if logs.len() > MAX_LOG_ENTRIES {
        logs.remove(0);
    }
    entry
}

pub fn add_log(logs: &Mutex<Vec<LogEntry>>, level: &str, source: &str, message: &str) {
    add_log_entry(logs, level, source, message);
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service(api_root)
            .service(upload_csv)
            .service(list_history)
            .service(dataset_detail)
            .service(download_report)
            .service(regenerate_report)
            .service(get_logs),
    );
}

pub fn start_server(state: HttpState, host: &str, port: u16) -> std::io::Result<Server> {
    let state = web::Data::new(state);

    let server = HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .app_data(state.clone())
            .configure(configure_routes)
    })
    .bind((host, port))?
    .run();

    Ok(server)
}
