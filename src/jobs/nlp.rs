//! Chat-completion and speech-to-text jobs.

use crate::config::NlpConfig;
use crate::error::{IvsError, Result};
use crate::events::EventKind;
use crate::jobs::JobRunner;
use crate::jobs::http::{Credentials, FormField, HttpClient, HttpRequest, HttpResponse};
use crate::session::{JID_NONE, JobId, Session};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub role: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    pub confidence: f64,
    pub text: String,
}

/// Client for an OpenAI-compatible chat and transcription service.
pub struct NlpClient {
    http: Arc<dyn HttpClient>,
    config: NlpConfig,
    log_http_errors: bool,
}

impl NlpClient {
    pub fn new(http: Arc<dyn HttpClient>, config: NlpConfig, log_http_errors: bool) -> Self {
        Self {
            http,
            config,
            log_http_errors,
        }
    }

    pub fn config(&self) -> &NlpConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: HttpRequest) -> HttpRequest {
        if self.config.api_key.is_empty() {
            request
        } else {
            request.with_credentials(Credentials::Bearer(self.config.api_key.clone()))
        }
    }

    fn chat_request(&self, text: &str) -> HttpRequest {
        let body = json!({
            "model": self.config.chat_model,
            "messages": [{ "role": self.config.role, "content": text }],
        });
        self.authorize(HttpRequest::post_json(
            self.endpoint("chat/completions"),
            body.to_string(),
        ))
    }

    fn transcription_request(&self, path: &Path) -> HttpRequest {
        self.authorize(HttpRequest::post_form(
            self.endpoint("audio/transcriptions"),
            vec![
                FormField::Text {
                    name: "model".to_string(),
                    value: self.config.whisper_model.clone(),
                },
                FormField::File {
                    name: "file".to_string(),
                    path: path.to_path_buf(),
                },
            ],
        ))
    }

    /// Decode a service reply. Non-2xx, an `error` member or an unparsable
    /// body all fail with the response's status code.
    fn service_json(&self, jid: JobId, response: &HttpResponse) -> Result<Value> {
        let code = response.code;
        if !response.is_success() {
            if self.log_http_errors {
                tracing::error!(jid, code, body = %response.body, "HTTP error from service");
            }
            return Err(IvsError::ServiceResponse {
                code,
                message: format!("HTTP status {code}"),
            });
        }

        let value: Value = serde_json::from_str(&response.body).map_err(|e| {
            tracing::error!(jid, body = %response.body, "Malformed response");
            IvsError::ServiceResponse {
                code,
                message: format!("malformed response: {e}"),
            }
        })?;

        if let Some(error) = value.get("error") {
            if self.log_http_errors {
                tracing::error!(jid, body = %response.body, "Service-fail");
            }
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("service reported an error")
                .to_string();
            return Err(IvsError::ServiceResponse { code, message });
        }

        Ok(value)
    }

    fn malformed(jid: JobId, response: &HttpResponse, what: &str) -> IvsError {
        tracing::error!(jid, body = %response.body, "Malformed response");
        IvsError::ServiceResponse {
            code: response.code,
            message: format!("malformed response: missing {what}"),
        }
    }

    async fn run_chat(&self, jid: JobId, text: &str) -> Result<ChatReply> {
        let response = self.http.execute(&self.chat_request(text)).await?;
        let value = self.service_json(jid, &response)?;

        let message = &value["choices"][0]["message"];
        match (message["role"].as_str(), message["content"].as_str()) {
            (Some(role), Some(text)) => Ok(ChatReply {
                role: role.to_string(),
                text: text.to_string(),
            }),
            _ => Err(Self::malformed(jid, &response, "choices[0].message")),
        }
    }

    async fn run_transcription(
        &self,
        jid: JobId,
        path: &Path,
        delete_after: bool,
    ) -> Result<Transcription> {
        let outcome = self.http.execute(&self.transcription_request(path)).await;

        if delete_after {
            if let Err(e) = tokio::fs::remove_file(path).await {
                tracing::warn!(jid, path = %path.display(), "Failed to delete sent file: {e}");
            }
        }

        let response = outcome?;
        let value = self.service_json(jid, &response)?;
        match value.get("text").and_then(Value::as_str) {
            Some(text) => Ok(Transcription {
                confidence: 0.0,
                text: text.to_string(),
            }),
            None => Err(Self::malformed(jid, &response, "text")),
        }
    }

    /// Ask the chat model and wait for the reply. Must be called off the runtime.
    pub fn chat(&self, runner: &JobRunner, text: &str) -> Result<ChatReply> {
        runner.block_on(self.run_chat(JID_NONE, text))
    }

    /// Transcribe a file and wait for the text. Must be called off the runtime.
    pub fn transcribe(
        &self,
        runner: &JobRunner,
        path: &Path,
        delete_after: bool,
    ) -> Result<Transcription> {
        runner.block_on(self.run_transcription(JID_NONE, path, delete_after))
    }

    /// Start a chat job. Emits `nlp-done` or `job-failed`.
    pub fn chat_async(
        self: &Arc<Self>,
        runner: &JobRunner,
        session: &Arc<Session>,
        text: String,
    ) -> JobId {
        let client = Arc::clone(self);
        runner.submit(session, "nlp", move |jid| async move {
            Some(match client.run_chat(jid, &text).await {
                Ok(reply) => EventKind::NlpDone {
                    role: reply.role,
                    text: reply.text,
                },
                Err(e) => failure(jid, e),
            })
        })
    }

    /// Start a transcription job. Emits `transcription-done` or `job-failed`.
    pub fn transcribe_async(
        self: &Arc<Self>,
        runner: &JobRunner,
        session: &Arc<Session>,
        path: PathBuf,
        delete_after: bool,
    ) -> JobId {
        let client = Arc::clone(self);
        runner.submit(session, "transcription", move |jid| async move {
            Some(
                match client.run_transcription(jid, &path, delete_after).await {
                    Ok(result) => EventKind::TranscriptionDone {
                        confidence: result.confidence,
                        text: result.text,
                    },
                    Err(e) => failure(jid, e),
                },
            )
        })
    }
}

fn failure(jid: JobId, error: IvsError) -> EventKind {
    let http_code = match &error {
        IvsError::ServiceResponse { code, .. } => *code,
        _ => 0,
    };
    if http_code != 200 {
        tracing::error!("Job [{jid}] failed, code={http_code}");
    }
    EventKind::JobFailed {
        http_code,
        reason: error.to_string(),
    }
}
