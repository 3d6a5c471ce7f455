//! HTTP transport and the generic HTTP job.

use crate::error::{IvsError, Result};
use crate::events::EventKind;
use crate::jobs::JobRunner;
use crate::session::{JobId, Session};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl std::str::FromStr for Method {
    type Err = IvsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            "HEAD" => Ok(Method::Head),
            other => Err(IvsError::Http {
                message: format!("unsupported method '{other}'"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Bearer(String),
    Basic { user: String, password: String },
}

/// One multipart form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormField {
    Text { name: String, value: String },
    File { name: String, path: PathBuf },
}

/// Request description handed to an [`HttpClient`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub content_type: Option<String>,
    pub body: Option<String>,
    /// Non-empty fields turn the request into a multipart upload.
    pub fields: Vec<FormField>,
    pub headers: Vec<(String, String)>,
    pub credentials: Option<Credentials>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn post_json(url: impl Into<String>, body: String) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            content_type: Some("application/json".to_string()),
            body: Some(body),
            ..Self::default()
        }
    }

    pub fn post_form(url: impl Into<String>, fields: Vec<FormField>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            fields,
            ..Self::default()
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Status code and body of a completed exchange. Non-2xx is not an error here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub code: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

/// Transport used by every HTTP-backed job.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Perform the request. `Err` only for transport failures.
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// Start a generic HTTP job. Always emits exactly one `HttpResult`;
/// a transport failure is reported with code 0 and no body.
pub fn http_request_async(
    runner: &JobRunner,
    session: &Arc<Session>,
    client: Arc<dyn HttpClient>,
    request: HttpRequest,
) -> JobId {
    runner.submit(session, "http", move |jid| async move {
        let (http_code, body) = match client.execute(&request).await {
            Ok(response) => (response.code, Some(response.body)),
            Err(e) => {
                tracing::warn!(jid, url = %request.url, "HTTP job failed: {e}");
                (0, None)
            }
        };
        Some(EventKind::HttpResult { http_code, body })
    })
}

/// Synchronous variant of [`http_request_async`]. Must be called off the runtime.
pub fn http_request(
    runner: &JobRunner,
    client: &dyn HttpClient,
    request: &HttpRequest,
) -> Result<HttpResponse> {
    runner.block_on(client.execute(request))
}

#[cfg(feature = "http")]
pub use reqwest_client::ReqwestClient;

#[cfg(feature = "http")]
mod reqwest_client {
    use super::*;
    use crate::config::HttpConfig;
    use crate::defaults;
    use reqwest::multipart;
    use std::time::Duration;

    /// [`HttpClient`] backed by `reqwest`.
    #[derive(Debug, Clone)]
    pub struct ReqwestClient {
        client: reqwest::Client,
    }

    fn http_error(e: impl std::fmt::Display) -> IvsError {
        IvsError::Http {
            message: e.to_string(),
        }
    }

    impl ReqwestClient {
        pub fn new(config: &HttpConfig) -> Result<Self> {
            let mut builder = reqwest::Client::builder()
                .user_agent(defaults::USER_AGENT)
                .connect_timeout(Duration::from_secs(config.connect_timeout_secs.max(1)));
            if config.request_timeout_secs > 0 {
                builder = builder.timeout(Duration::from_secs(config.request_timeout_secs));
            }
            Ok(Self {
                client: builder.build().map_err(http_error)?,
            })
        }

        async fn form(fields: &[FormField]) -> Result<multipart::Form> {
            let mut form = multipart::Form::new();
            for field in fields {
                form = match field {
                    FormField::Text { name, value } => form.text(name.clone(), value.clone()),
                    FormField::File { name, path } => {
                        let bytes = tokio::fs::read(path).await.map_err(|e| IvsError::Http {
                            message: format!("Failed to read {}: {}", path.display(), e),
                        })?;
                        let file_name = path
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_else(|| "upload".to_string());
                        form.part(name.clone(), multipart::Part::bytes(bytes).file_name(file_name))
                    }
                };
            }
            Ok(form)
        }
    }

    #[async_trait]
    impl HttpClient for ReqwestClient {
        async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse> {
            let method = match request.method {
                Method::Get => reqwest::Method::GET,
                Method::Post => reqwest::Method::POST,
                Method::Put => reqwest::Method::PUT,
                Method::Patch => reqwest::Method::PATCH,
                Method::Delete => reqwest::Method::DELETE,
                Method::Head => reqwest::Method::HEAD,
            };

            let mut builder = self.client.request(method, &request.url);
            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }
            builder = match &request.credentials {
                Some(Credentials::Bearer(token)) => builder.bearer_auth(token),
                Some(Credentials::Basic { user, password }) => {
                    builder.basic_auth(user, Some(password))
                }
                None => builder,
            };

            if !request.fields.is_empty() {
                builder = builder.multipart(Self::form(&request.fields).await?);
            } else if let Some(body) = &request.body {
                if let Some(content_type) = &request.content_type {
                    builder = builder.header(reqwest::header::CONTENT_TYPE, content_type);
                }
                builder = builder.body(body.clone());
            }

            let response = builder.send().await.map_err(http_error)?;
            let code = response.status().as_u16();
            let body = response.text().await.map_err(http_error)?;
            Ok(HttpResponse { code, body })
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::session::MediaParams;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::runtime::Handle;

    /// Replays canned responses and records requests.
    #[derive(Default)]
    pub(crate) struct MockHttpClient {
        pub responses: Mutex<VecDeque<Result<HttpResponse>>>,
        pub requests: Mutex<Vec<HttpRequest>>,
    }

    impl MockHttpClient {
        pub(crate) fn replying(responses: Vec<Result<HttpResponse>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| {
                    Err(IvsError::Http {
                        message: "no canned response".to_string(),
                    })
                })
        }
    }

    pub(crate) fn ok(code: u16, body: &str) -> Result<HttpResponse> {
        Ok(HttpResponse {
            code,
            body: body.to_string(),
        })
    }

    async fn next_event(session: &Session) -> crate::events::Event {
        for _ in 0..500 {
            if let Some(event) = session.events().try_pop() {
                return event;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("no event");
    }

    fn open_session() -> Arc<Session> {
        let session = Session::builder("http", MediaParams::l16(8000, 1, 20)).build();
        session.open();
        session
    }

    #[test]
    fn method_parses_case_insensitive() {
        assert_eq!("post".parse::<Method>().unwrap(), Method::Post);
        assert!("BREW".parse::<Method>().is_err());
    }

    #[test]
    fn success_range() {
        assert!(HttpResponse { code: 204, body: String::new() }.is_success());
        assert!(!HttpResponse { code: 404, body: String::new() }.is_success());
    }

    #[tokio::test]
    async fn http_job_reports_code_and_body() {
        let session = open_session();
        let client = MockHttpClient::replying(vec![ok(404, "missing")]);
        let runner = JobRunner::new(Handle::current());

        let jid = http_request_async(
            &runner,
            &session,
            client.clone(),
            HttpRequest::get("http://localhost/x"),
        );
        let event = next_event(&session).await;
        assert_eq!(event.jid, jid);
        assert_eq!(
            event.kind,
            EventKind::HttpResult {
                http_code: 404,
                body: Some("missing".to_string())
            }
        );
        assert_eq!(client.requests.lock().unwrap()[0].url, "http://localhost/x");
    }

    #[tokio::test]
    async fn http_job_transport_failure_is_code_zero() {
        let session = open_session();
        let client = MockHttpClient::replying(vec![]);
        let runner = JobRunner::new(Handle::current());

        http_request_async(&runner, &session, client, HttpRequest::get("http://x"));
        let event = next_event(&session).await;
        assert_eq!(
            event.kind,
            EventKind::HttpResult {
                http_code: 0,
                body: None
            }
        );
    }

    #[test]
    fn request_builders() {
        let request = HttpRequest::post_json("http://x", "{}".to_string())
            .with_credentials(Credentials::Bearer("k".to_string()))
            .with_header("X-Trace", "1");
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.content_type.as_deref(), Some("application/json"));
        assert_eq!(request.headers.len(), 1);
        assert!(request.fields.is_empty());
    }

    #[test]
    fn sync_variant_runs_off_runtime() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let runner = JobRunner::new(runtime.handle().clone());
        let client = MockHttpClient::replying(vec![ok(200, "pong")]);
        let response = http_request(&runner, client.as_ref(), &HttpRequest::get("http://x")).unwrap();
        assert_eq!(response.body, "pong");
    }
}
