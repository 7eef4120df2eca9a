use crate::ollama::{
    parse_backend_host, AnalysisRequest, B64Image, DEFAULT_HOST, DEFAULT_MODEL, DEFAULT_NUM_CTX,
    DEFAULT_NUM_GPU, DEFAULT_PROMPT,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The body of every analysis response: either the model's answer or a
/// description of what went wrong
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisResult {
    Data(String),
    Error(String),
}

impl From<Result<String>> for AnalysisResult {
    fn from(res: Result<String>) -> Self {
        match res {
            Ok(text) => AnalysisResult::Data(text),
            Err(err) => AnalysisResult::Error(err.to_string()),
        }
    }
}

/// Optional request fields shared by both analysis routes. Absent or null
/// fields fall back to the defaults in `crate::ollama`.
#[derive(Debug, Default, Deserialize)]
pub struct QueryOptions {
    #[serde(default)]
    pub user_query: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub num_gpu: Option<i32>,
    #[serde(default)]
    pub num_ctx: Option<u32>,
    #[serde(default)]
    pub ollama_host: Option<String>,
    #[serde(default)]
    pub ollama_headers: Option<HashMap<String, String>>,
}

impl QueryOptions {
    /// Apply defaults and validate, producing the request for the backend
    pub fn into_analysis(self, image: B64Image) -> Result<AnalysisRequest> {
        let host = self.ollama_host.as_deref().unwrap_or(DEFAULT_HOST);
        Ok(AnalysisRequest {
            prompt: self.user_query.unwrap_or_else(|| DEFAULT_PROMPT.into()),
            image,
            model: self.model.unwrap_or_else(|| DEFAULT_MODEL.into()),
            num_gpu: self.num_gpu.unwrap_or(DEFAULT_NUM_GPU),
            num_ctx: self.num_ctx.unwrap_or(DEFAULT_NUM_CTX),
            backend_host: parse_backend_host(host)?,
            // An empty mapping means the same as no headers at all
            backend_headers: self.ollama_headers.filter(|h| !h.is_empty()),
        })
    }
}

/// JSON body of `POST /query_image`
#[derive(Debug, Deserialize)]
pub struct QueryImageRequest {
    pub base_64: String,
    #[serde(flatten)]
    pub options: QueryOptions,
}

impl QueryImageRequest {
    pub fn into_analysis(self) -> Result<AnalysisRequest> {
        let image = B64Image::parse(self.base_64)?;
        self.options.into_analysis(image)
    }
}

/// Parse the JSON-encoded `ollama_headers` form field. Blank text means no
/// headers.
pub fn parse_backend_headers(text: Option<&str>) -> Result<Option<HashMap<String, String>>> {
    let text = match text.map(str::trim) {
        None | Some("") => return Ok(None),
        Some(text) => text,
    };
    let headers: HashMap<String, String> = serde_json::from_str(text)
        .context("ollama_headers must be a JSON object of string values")?;
    Ok(Some(headers).filter(|h| !h.is_empty()))
}
