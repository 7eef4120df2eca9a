//! Reading the multipart form of `POST /upload_and_query`

use super::protocol::{parse_backend_headers, QueryOptions};
use crate::ollama::{AnalysisRequest, B64Image};
use actix_multipart::{Field, Multipart};
use anyhow::{anyhow, bail, Context, Result};
use futures_util::TryStreamExt;
use std::str::FromStr;
use tracing::debug;

/// The raw form as received. Text fields stay unparsed until
/// `into_analysis` so that every input error is reported the same way.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub file: Option<Vec<u8>>,
    pub user_query: Option<String>,
    pub model: Option<String>,
    pub num_gpu: Option<String>,
    pub num_ctx: Option<String>,
    pub ollama_host: Option<String>,
    pub ollama_headers: Option<String>,
}

/// Form fields that are kept; anything else is drained and dropped
const FIELDS: [&str; 7] = [
    "file",
    "user_query",
    "model",
    "num_gpu",
    "num_ctx",
    "ollama_host",
    "ollama_headers",
];

impl UploadForm {
    /// Drain the multipart stream. The whole form, unknown fields included,
    /// must not exceed `limit` bytes.
    pub async fn read(mut payload: Multipart, limit: usize) -> Result<Self> {
        let mut form = UploadForm::default();
        let mut remaining = limit;

        while let Some(mut field) = payload
            .try_next()
            .await
            .map_err(|e| anyhow!("failed to read form: {e}"))?
        {
            let name = field
                .content_disposition()
                .get_name()
                .unwrap_or_default()
                .to_owned();
            let keep = FIELDS.contains(&name.as_str());
            let data = read_field(&mut field, &name, &mut remaining, keep).await?;
            if !keep {
                debug!("ignoring unknown form field {name:?}");
                continue;
            }

            let slot = match name.as_str() {
                "file" => {
                    form.file = Some(data);
                    continue;
                }
                "user_query" => &mut form.user_query,
                "model" => &mut form.model,
                "num_gpu" => &mut form.num_gpu,
                "num_ctx" => &mut form.num_ctx,
                "ollama_host" => &mut form.ollama_host,
                "ollama_headers" => &mut form.ollama_headers,
                _ => continue,
            };
            *slot = Some(String::from_utf8(data).with_context(|| format!("{name} is not valid UTF-8"))?);
        }

        Ok(form)
    }

    /// Encode the file and apply the same defaults as the JSON route.
    /// Empty text fields count as absent.
    pub fn into_analysis(self) -> Result<AnalysisRequest> {
        let file = self.file.context("missing file")?;
        if file.is_empty() {
            bail!("uploaded file is empty");
        }

        let options = QueryOptions {
            user_query: non_empty(self.user_query),
            model: non_empty(self.model),
            num_gpu: parse_number(self.num_gpu, "num_gpu")?,
            num_ctx: parse_number(self.num_ctx, "num_ctx")?,
            ollama_host: non_empty(self.ollama_host),
            ollama_headers: parse_backend_headers(self.ollama_headers.as_deref())?,
        };
        options.into_analysis(B64Image::encode(&file))
    }
}

/// Read one field, charging its size against `remaining`. Chunks of fields
/// that are not kept are discarded as they arrive.
async fn read_field(
    field: &mut Field,
    name: &str,
    remaining: &mut usize,
    keep: bool,
) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    while let Some(chunk) = field
        .try_next()
        .await
        .map_err(|e| anyhow!("failed to read form field {name}: {e}"))?
    {
        *remaining = remaining
            .checked_sub(chunk.len())
            .context("upload exceeds the size limit")?;
        if keep {
            data.extend_from_slice(&chunk);
        }
    }
    Ok(data)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_number<T: FromStr>(value: Option<String>, name: &str) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    non_empty(value)
        .map(|v| v.trim().parse::<T>())
        .transpose()
        .with_context(|| format!("{name} must be an integer"))
}
