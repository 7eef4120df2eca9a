//! Client for an Ollama-compatible chat backend. Turns an `AnalysisRequest`
//! into a single-message chat call and pulls the answer text out of the
//! response envelope. Failures are returned as-is to the caller.

use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use tracing::debug;

pub const DEFAULT_HOST: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "gemma3";
pub const DEFAULT_NUM_GPU: i32 = -1;
pub const DEFAULT_NUM_CTX: u32 = 20480;
pub const DEFAULT_PROMPT: &str = "Its a stock trend, Give me candle pairs which might trigger 100 point movement with maximum pullback of 40 points";

const CHAT_PATH: &str = "api/chat";

/// A base 64 image, standard alphabet with padding
#[derive(Clone, PartialEq, Eq)]
pub struct B64Image(String);

impl B64Image {
    /// Encode raw image bytes
    pub fn encode(bytes: &[u8]) -> Self {
        B64Image(general_purpose::STANDARD.encode(bytes))
    }

    /// Accept already-encoded text. The text is kept verbatim; it is only
    /// decoded to check that it is well formed. Line breaks and other ASCII
    /// whitespace are ignored for the check, as the backend skips them too.
    pub fn parse(text: String) -> Result<Self> {
        let compact: Vec<u8> = text
            .bytes()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        if compact.is_empty() {
            bail!("image data is empty");
        }
        general_purpose::STANDARD
            .decode(&compact)
            .context("image data is not valid base64")?;
        Ok(B64Image(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Debug for B64Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "B64Image {{ <{} chars> }}", self.0.len())
    }
}

/// Everything needed to ask the backend about one image
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    pub prompt: String,
    pub image: B64Image,
    pub model: String,
    pub num_gpu: i32,
    pub num_ctx: u32,
    pub backend_host: Url,
    /// Extra headers for the backend call, e.g. auth for a tunnelled host
    pub backend_headers: Option<HashMap<String, String>>,
}

/// Parse a backend host. A bare `host:port` is taken to mean plain http.
pub fn parse_backend_host(host: &str) -> Result<Url> {
    let host = host.trim();
    let url = if host.contains("://") {
        Url::parse(host)
    } else {
        Url::parse(&format!("http://{host}"))
    }
    .with_context(|| format!("invalid backend host {host:?}"))?;

    match url.scheme() {
        "http" | "https" if url.host().is_some() => Ok(url),
        _ => Err(anyhow!("invalid backend host {host:?}: expected an http(s) URL")),
    }
}

fn chat_url(host: &Url) -> Result<Url> {
    let base = host.as_str().trim_end_matches('/');
    Url::parse(&format!("{base}/{CHAT_PATH}")).context("failed to build backend chat URL")
}

fn header_map(headers: &HashMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid backend header name {name:?}"))?;
        let value = HeaderValue::from_str(value)
            .with_context(|| format!("invalid value for backend header {name}"))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Wire body of `POST /api/chat`
#[derive(Debug, Serialize)]
pub struct ChatPayload<'a> {
    model: &'a str,
    options: ChatOptions,
    messages: [ChatMessage<'a>; 1],
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    num_ctx: u32,
    num_gpu: i32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
    images: [&'a str; 1],
}

impl<'a> From<&'a AnalysisRequest> for ChatPayload<'a> {
    fn from(req: &'a AnalysisRequest) -> Self {
        ChatPayload {
            model: &req.model,
            options: ChatOptions {
                num_ctx: req.num_ctx,
                num_gpu: req.num_gpu,
            },
            messages: [ChatMessage {
                role: "user",
                content: &req.prompt,
                images: [req.image.as_str()],
            }],
            stream: false,
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Error body the backend sends alongside a failing status
#[derive(Deserialize)]
struct BackendError {
    error: String,
}

/// Talks to the model backend. Cheap to clone; the underlying connection pool
/// is shared.
#[derive(Debug, Clone, Default)]
pub struct OllamaClient {
    http: reqwest::Client,
}

impl OllamaClient {
    pub fn new(http: reqwest::Client) -> Self {
        OllamaClient { http }
    }

    /// Run one chat completion and return the model's answer
    #[tracing::instrument(skip_all, fields(model = %req.model, host = %req.backend_host))]
    pub async fn chat(&self, req: &AnalysisRequest) -> Result<String> {
        let url = chat_url(&req.backend_host)?;
        let mut request = self.http.post(url).json(&ChatPayload::from(req));
        if let Some(headers) = &req.backend_headers {
            request = request.headers(header_map(headers)?);
        }

        debug!(num_ctx = req.num_ctx, num_gpu = req.num_gpu, "sending chat request");

        let response = request
            .send()
            .await
            .with_context(|| format!("failed to reach model backend at {}", req.backend_host))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .context("failed to read model backend response")?;

        if !status.is_success() {
            let detail = serde_json::from_slice::<BackendError>(&body)
                .map(|e| e.error)
                .unwrap_or_else(|_| String::from_utf8_lossy(&body).trim().to_string());
            bail!("model backend returned {status}: {detail}");
        }

        let chat: ChatResponse =
            serde_json::from_slice(&body).context("malformed response from model backend")?;
        debug!(chars = chat.message.content.len(), "received answer");
        Ok(chat.message.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(host: &str) -> AnalysisRequest {
        AnalysisRequest {
            prompt: "describe the candles".into(),
            image: B64Image::encode(b"\x89PNG fake"),
            model: DEFAULT_MODEL.into(),
            num_gpu: DEFAULT_NUM_GPU,
            num_ctx: DEFAULT_NUM_CTX,
            backend_host: parse_backend_host(host).unwrap(),
            backend_headers: None,
        }
    }

    #[test]
    fn test_payload_shape() {
        let req = request(DEFAULT_HOST);
        let payload = serde_json::to_value(ChatPayload::from(&req)).unwrap();
        assert_eq!(
            payload,
            json!({
                "model": "gemma3",
                "options": { "num_ctx": 20480, "num_gpu": -1 },
                "messages": [{
                    "role": "user",
                    "content": "describe the candles",
                    "images": [req.image.as_str()],
                }],
                "stream": false,
            })
        );
    }

    #[test]
    fn test_b64_image() {
        assert_eq!(B64Image::encode(b"hello").as_str(), "aGVsbG8=");
        assert_eq!(B64Image::parse("aGVsbG8=".into()).unwrap().as_str(), "aGVsbG8=");
        assert!(B64Image::parse(String::new()).is_err());
        assert!(B64Image::parse("not base64!".into()).is_err());
        assert!(!format!("{:?}", B64Image::encode(b"hello")).contains("aGVs"));
    }

    #[test]
    fn test_b64_image_line_wrapped() {
        let encoded = B64Image::encode(&[7u8; 120]);
        let (head, tail) = encoded.as_str().split_at(76);
        let wrapped = format!("{head}\n{tail}\r\n");

        let image = B64Image::parse(wrapped.clone()).unwrap();
        assert_eq!(image.as_str(), wrapped);
        assert!(B64Image::parse(" \n\t".into()).is_err());
    }

    #[test]
    fn test_parse_backend_host() {
        assert_eq!(
            parse_backend_host("http://localhost:11434").unwrap().as_str(),
            "http://localhost:11434/"
        );
        assert_eq!(
            parse_backend_host("10.0.0.5:11434").unwrap().as_str(),
            "http://10.0.0.5:11434/"
        );
        assert!(parse_backend_host("ftp://example.com").is_err());
        assert!(parse_backend_host("http://").is_err());
    }

    #[test]
    fn test_chat_url_keeps_path_prefix() {
        let host = parse_backend_host("https://tunnel.example.com/ollama/").unwrap();
        assert_eq!(
            chat_url(&host).unwrap().as_str(),
            "https://tunnel.example.com/ollama/api/chat"
        );
        let host = parse_backend_host(DEFAULT_HOST).unwrap();
        assert_eq!(chat_url(&host).unwrap().as_str(), "http://localhost:11434/api/chat");
    }

    #[test]
    fn test_invalid_header() {
        let headers = HashMap::from([("bad header".to_string(), "x".to_string())]);
        assert!(header_map(&headers).is_err());
    }

    #[tokio::test]
    async fn test_chat_returns_content() {
        let server = MockServer::start().await;
        let req = request(&server.uri());
        let expected = serde_json::to_value(ChatPayload::from(&req)).unwrap();

        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_json(expected))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "gemma3",
                "message": { "role": "assistant", "content": "  candles 3 and 4\n" },
                "done": true,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let answer = OllamaClient::default().chat(&req).await.unwrap();
        assert_eq!(answer, "  candles 3 and 4\n");
    }

    #[tokio::test]
    async fn test_chat_sends_headers() {
        let server = MockServer::start().await;
        let mut req = request(&server.uri());
        req.backend_headers = Some(HashMap::from([(
            "Authorization".to_string(),
            "Bearer secret".to_string(),
        )]));

        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "message": { "content": "ok" } })),
            )
            .expect(1)
            .mount(&server)
            .await;

        assert_eq!(OllamaClient::default().chat(&req).await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_chat_backend_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({ "error": "model \"gemma3\" not found" })),
            )
            .mount(&server)
            .await;

        let err = OllamaClient::default()
            .chat(&request(&server.uri()))
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("404"), "{msg}");
        assert!(msg.contains("not found"), "{msg}");
    }

    #[tokio::test]
    async fn test_chat_malformed_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "done": true })))
            .mount(&server)
            .await;

        let err = OllamaClient::default()
            .chat(&request(&server.uri()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("malformed"));
    }

    #[tokio::test]
    async fn test_chat_unreachable_backend() {
        // Port 9 on loopback (discard) is not expected to be listening
        let err = OllamaClient::default()
            .chat(&request("http://127.0.0.1:9"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to reach model backend"));
    }
}
