use std::env;
use std::pin::Pin;
use std::time::{Duration, Instant};

use futures::Stream;
use futures::stream;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Response, header};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::observability::{CLIENT_REQUESTS, CLIENT_REQUEST_DURATION, CLIENT_REQUEST_ERRORS};
use crate::sse::process_sse;
use crate::types::{ChatCompletion, ChatCompletionChunk, ChatCompletionParams};

const DEFAULT_API_URL: &str = "https://api.openai.com/v1/";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const API_KEY_VARIABLE: &str = "OPENAI_API_KEY";

/// A boxed stream of completion chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ChatCompletionChunk>> + Send>>;

/// Anything that can answer a chat-completion request with a stream of chunks.
///
/// Non-streaming transports answer with a single chunk holding the whole
/// response.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Issue one completion request.
    async fn chat(&self, params: ChatCompletionParams) -> Result<ChunkStream>;
}

/// Client for OpenAI-compatible chat-completion APIs.
#[derive(Debug, Clone)]
pub struct OpenAi {
    api_key: String,
    client: ReqwestClient,
    base_url: String,
    timeout: Duration,
}

impl OpenAi {
    /// Create a new client.
    ///
    /// The API key can be provided directly or read from the OPENAI_API_KEY
    /// environment variable.
    pub fn new(api_key: Option<String>) -> Result<Self> {
        Self::with_options(api_key, None, None)
    }

    /// Create a new client with custom settings.
    pub fn with_options(
        api_key: Option<String>,
        base_url: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let api_key = match api_key {
            Some(key) => key,
            None => env::var(API_KEY_VARIABLE).map_err(|_| {
                Error::authentication(format!(
                    "API key not provided and {API_KEY_VARIABLE} environment variable not set"
                ))
            })?,
        };

        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        let client = ReqwestClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {}", e),
                    Some(Box::new(e)),
                )
            })?;

        let mut base_url = base_url.unwrap_or_else(|| DEFAULT_API_URL.to_string());
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        url::Url::parse(&base_url)?;

        Ok(Self {
            api_key,
            client,
            base_url,
            timeout,
        })
    }

    /// Create and return default headers for API requests.
    fn default_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|_| Error::authentication("API key is not a valid header value"))?;
        headers.insert(header::AUTHORIZATION, bearer);
        Ok(headers)
    }

    /// Process API response errors and convert to our Error type
    async fn process_error_response(response: Response) -> Error {
        let status = response.status();
        let status_code = status.as_u16();

        let request_id = response
            .headers()
            .get("x-request-id")
            .and_then(|val| val.to_str().ok())
            .map(String::from);

        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|val| val.to_str().ok())
            .and_then(|val| val.parse::<u64>().ok());

        #[derive(Deserialize)]
        struct ErrorResponse {
            error: Option<ErrorDetail>,
        }

        #[derive(Deserialize)]
        struct ErrorDetail {
            #[serde(rename = "type")]
            error_type: Option<String>,
            message: Option<String>,
            param: Option<String>,
        }

        let error_body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Error::http_client(
                    format!("Failed to read error response: {}", e),
                    Some(Box::new(e)),
                );
            }
        };

        let detail = serde_json::from_str::<ErrorResponse>(&error_body)
            .ok()
            .and_then(|e| e.error);
        let error_type = detail.as_ref().and_then(|e| e.error_type.clone());
        let error_param = detail.as_ref().and_then(|e| e.param.clone());
        let error_message = detail
            .and_then(|e| e.message)
            .unwrap_or_else(|| error_body.clone());

        status_error(status_code, error_type, error_param, error_message, request_id, retry_after)
    }

    /// POST `params` to `chat/completions` and return the successful response.
    async fn post(&self, params: &ChatCompletionParams, accept: &'static str) -> Result<Response> {
        let url = format!("{}chat/completions", self.base_url);
        let mut headers = self.default_headers()?;
        headers.insert(header::ACCEPT, HeaderValue::from_static(accept));

        CLIENT_REQUESTS.click();
        let start = Instant::now();
        tracing::debug!(model = %params.model, messages = params.messages.len(), stream = params.stream, "sending completion request");
        let response = self
            .client
            .post(&url)
            .headers(headers)
            .json(params)
            .send()
            .await
            .map_err(|e| {
                CLIENT_REQUEST_ERRORS.click();
                if e.is_timeout() {
                    Error::timeout(format!(
                        "no answer within {}s: {e}",
                        self.timeout.as_secs()
                    ))
                } else if e.is_connect() {
                    Error::connection(format!("Connection error: {}", e), Some(Box::new(e)))
                } else {
                    Error::http_client(format!("Request failed: {}", e), Some(Box::new(e)))
                }
            })?;
        CLIENT_REQUEST_DURATION.add(start.elapsed().as_secs_f64());

        if !response.status().is_success() {
            CLIENT_REQUEST_ERRORS.click();
            let err = Self::process_error_response(response).await;
            tracing::warn!(error = %err, "completion request failed");
            return Err(err);
        }
        Ok(response)
    }

    /// Send a request and get the whole response at once.
    pub async fn send(&self, mut params: ChatCompletionParams) -> Result<ChatCompletion> {
        params.stream = false;
        let response = self.post(&params, "application/json").await?;
        response.json::<ChatCompletion>().await.map_err(|e| {
            Error::serialization(
                format!("Failed to parse response: {}", e),
                Some(Box::new(e)),
            )
        })
    }

    /// Send a request and get a streaming response.
    pub async fn stream(
        &self,
        mut params: ChatCompletionParams,
    ) -> Result<impl Stream<Item = Result<ChatCompletionChunk>> + Send + use<>> {
        params.stream = true;
        let response = self.post(&params, "text/event-stream").await?;
        Ok(process_sse(response.bytes_stream()))
    }
}

/// Map a failed HTTP status and its decoded body to an [`Error`].
fn status_error(
    status: u16,
    kind: Option<String>,
    param: Option<String>,
    message: String,
    request_id: Option<String>,
    retry_after: Option<u64>,
) -> Error {
    match status {
        400 => Error::bad_request(message, param),
        401 | 403 => Error::authentication(message),
        404 => Error::not_found("model", message),
        408 => Error::timeout(message),
        429 | 502..=504 => Error::unavailable(status, message, retry_after),
        _ => Error::api(status, kind, message, request_id),
    }
}

#[async_trait::async_trait]
impl Transport for OpenAi {
    async fn chat(&self, params: ChatCompletionParams) -> Result<ChunkStream> {
        if params.stream {
            Ok(Box::pin(self.stream(params).await?))
        } else {
            let completion = self.send(params).await?;
            Ok(Box::pin(stream::once(async move {
                Ok(completion.into_chunk())
            })))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_creation() {
        let client = OpenAi::new(Some("test-key".to_string())).unwrap();
        assert_eq!(client.api_key, "test-key");
        assert_eq!(client.base_url, DEFAULT_API_URL);
        assert_eq!(client.timeout, DEFAULT_TIMEOUT);

        let client = OpenAi::with_options(
            Some("test-key".to_string()),
            Some("http://localhost:11434/v1".to_string()),
            Some(Duration::from_secs(30)),
        )
        .unwrap();
        assert_eq!(client.base_url, "http://localhost:11434/v1/");
        assert_eq!(client.timeout, Duration::from_secs(30));
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let err = OpenAi::with_options(Some("k".to_string()), Some("not a url".to_string()), None)
            .unwrap_err();
        assert!(matches!(err, Error::Url { .. }));
    }

    #[test]
    fn bearer_header() {
        let client = OpenAi::new(Some("sk-test".to_string())).unwrap();
        let headers = client.default_headers().unwrap();
        assert_eq!(
            headers.get(header::AUTHORIZATION).unwrap(),
            "Bearer sk-test"
        );
    }

    #[test]
    fn header_breaking_key_is_rejected() {
        let client = OpenAi::new(Some("bad\nkey".to_string())).unwrap();
        assert!(client.default_headers().unwrap_err().is_authentication());
    }

    #[test]
    fn statuses_map_to_error_kinds() {
        let err = |status| status_error(status, None, None, "m".to_string(), None, Some(2));
        assert!(err(401).is_authentication());
        assert!(err(403).is_authentication());
        assert!(err(404).is_not_found());
        assert!(matches!(err(400), Error::BadRequest { .. }));
        assert!(matches!(err(429), Error::Unavailable { retry_after: Some(2), .. }));
        assert!(matches!(err(503), Error::Unavailable { status: 503, .. }));
        let server = status_error(
            500,
            Some("server_error".to_string()),
            None,
            "boom".to_string(),
            Some("req_9".to_string()),
            None,
        );
        assert_eq!(server.to_string(), "API error 500 (server_error): boom [request req_9]");
    }
}
