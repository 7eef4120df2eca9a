//! The user-facing JSON web server. Every analysis route answers `200 OK`
//! with either `{"data": ...}` or `{"error": ...}`, including when the request
//! itself cannot be read.

use crate::config::Settings;
use crate::ollama::OllamaClient;
use actix_cors::Cors;
use actix_web::error::JsonPayloadError;
use actix_web::http::header::ContentType;
use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse};
use anyhow::anyhow;
use protocol::AnalysisResult;
use tracing::warn;

pub mod protocol;
pub mod routes;
pub mod upload;

/// Any failure while serving an analysis route. Rendered as the error
/// envelope rather than an error status.
#[derive(Debug)]
pub struct WebError {
    err: anyhow::Error,
}

impl std::fmt::Display for WebError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.err)
    }
}

impl actix_web::error::ResponseError for WebError {
    fn error_response(&self) -> HttpResponse {
        warn!("request rejected: {:#}", self.err);

        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .json(AnalysisResult::Error(self.to_string()))
    }

    fn status_code(&self) -> StatusCode {
        StatusCode::OK
    }
}

impl From<anyhow::Error> for WebError {
    fn from(err: anyhow::Error) -> WebError {
        WebError { err }
    }
}

fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    WebError::from(anyhow!("invalid request body: {err}")).into()
}

/// Register shared state, extractor configuration and the routes
pub fn configure(settings: &Settings, client: OllamaClient) -> impl FnOnce(&mut web::ServiceConfig) {
    let json = web::JsonConfig::default()
        .limit(settings.json_limit)
        .error_handler(json_error);
    let settings = web::Data::new(settings.clone());

    move |cfg: &mut web::ServiceConfig| {
        cfg.app_data(json)
            .app_data(web::Data::new(client))
            .app_data(settings)
            .service(routes::query_image)
            .service(routes::upload_and_query)
            .service(routes::health);
    }
}

/// Fully open CORS: any origin, method and header
pub fn cors() -> Cors {
    Cors::default()
        .allow_any_origin()
        .allow_any_method()
        .allow_any_header()
}
