use super::protocol::{AnalysisResult, QueryImageRequest};
use super::upload::UploadForm;
use super::WebError;
use crate::config::Settings;
use crate::ollama::{AnalysisRequest, OllamaClient};
use actix_multipart::Multipart;
use actix_web::{get, post, web, Responder};
use serde_json::json;
use tracing::{info, warn};

type Result<T> = std::result::Result<T, WebError>;

/// Ask the backend and fold the outcome into the response envelope
pub async fn analyze(client: &OllamaClient, req: AnalysisRequest) -> AnalysisResult {
    let res = client.chat(&req).await;
    match &res {
        Ok(_) => info!(model = %req.model, "finished serving analysis request"),
        Err(err) => warn!(model = %req.model, "analysis failed: {err:#}"),
    }
    res.into()
}

/// Analyze an image sent as base 64 text
#[post("/query_image")]
pub async fn query_image(
    req: web::Json<QueryImageRequest>,
    client: web::Data<OllamaClient>,
) -> Result<impl Responder> {
    let req = req.into_inner().into_analysis()?;
    Ok(web::Json(analyze(&client, req).await))
}

/// Analyze an image uploaded as a multipart file
#[post("/upload_and_query")]
pub async fn upload_and_query(
    payload: Multipart,
    client: web::Data<OllamaClient>,
    settings: web::Data<Settings>,
) -> Result<impl Responder> {
    let req = UploadForm::read(payload, settings.upload_limit)
        .await?
        .into_analysis()?;
    Ok(web::Json(analyze(&client, req).await))
}

/// Liveness probe
#[get("/health")]
pub async fn health() -> impl Responder {
    web::Json(json!({ "status": "ok" }))
}
