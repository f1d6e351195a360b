use super::{CollaboratorError, CollaboratorRequest, CollaboratorResponse, ReconciliationCollaborator};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::Duration;

const SYSTEM_PROMPT: &str = "You are a data integration and deduplication system for public \
health records. Reply with a single JSON object and nothing else.";

/// Reconciliation collaborator backed by an Ollama-compatible `/api/generate` endpoint.
pub struct OllamaReconciler {
    base_url: String,
    model: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OllamaReconciler {
    /// Creates a client for `base_url` (e.g. `http://localhost:11434`).
    ///
    /// `timeout` bounds each HTTP request; the reconciler applies its own ceiling as well.
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CollaboratorError::Unavailable(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.into(),
            timeout,
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    format: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[async_trait]
impl ReconciliationCollaborator for OllamaReconciler {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn reconcile(
        &self,
        request: &CollaboratorRequest,
    ) -> Result<CollaboratorResponse, CollaboratorError> {
        let url = format!("{}/api/generate", self.base_url);
        let prompt = build_prompt(request);
        let body = GenerateRequest {
            model: &self.model,
            prompt: &prompt,
            system: SYSTEM_PROMPT,
            format: "json",
            stream: false,
        };

        tracing::debug!(
            "requesting merge of {} candidates from {} ({})",
            request.candidates.len(),
            url,
            self.model
        );

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CollaboratorError::Timeout(self.timeout)
                } else if e.is_connect() {
                    CollaboratorError::Unavailable(format!("cannot connect to {}", self.base_url))
                } else {
                    CollaboratorError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Unavailable(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| CollaboratorError::InvalidResponse(e.to_string()))?;

        parse_model_output(&generated.response)
    }
}

/// Renders the merge instructions and the candidate records as a prompt.
fn build_prompt(request: &CollaboratorRequest) -> String {
    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "Merge the following records for NIK {} into one master record.\n",
        request.nik
    );

    for candidate in &request.candidates {
        let record = &candidate.record;
        let _ = writeln!(prompt, "Dataset: {}", candidate.dataset_name);
        let _ = writeln!(prompt, "Record ID: {}", record.id);
        let _ = writeln!(prompt, "- Name: {}", record.name);
        let _ = writeln!(prompt, "- Address: {}", record.address);
        let _ = writeln!(
            prompt,
            "- Date of Birth: {}",
            record.date_of_birth.as_deref().unwrap_or("")
        );
        let _ = writeln!(prompt, "- Phone: {}", record.phone.as_deref().unwrap_or(""));
        let _ = writeln!(
            prompt,
            "- Last Visit: {}",
            record.last_visit.as_deref().unwrap_or("")
        );
        let _ = writeln!(prompt, "---");
    }

    prompt.push_str(
        "\nCompare the records and note typos, formatting differences and missing data. \
For each field (name, address, dob, phone, lastVisit) choose the most accurate and complete \
value, preferring more recent or more complete data. Keep the NIK unchanged. Use the ID of the \
most reliable source.\n\
Respond with JSON of the form \
{\"mergedRecord\": {\"id\": \"\", \"nik\": \"\", \"name\": \"\", \"address\": \"\", \
\"dob\": \"\", \"phone\": \"\", \"lastVisit\": \"\"}, \
\"mergeExplanation\": \"which source each field came from and why\", \
\"confidenceScore\": 0.0}.\n\
confidenceScore is between 0 and 1: the likelihood that all records belong to the same person.\n",
    );
    prompt
}

/// Parses the JSON text a model produced into a [`CollaboratorResponse`].
///
/// Markdown code fences around the JSON are tolerated. Schema errors report the failing path.
pub fn parse_model_output(text: &str) -> Result<CollaboratorResponse, CollaboratorError> {
    let json = strip_code_fence(text);
    let mut deserializer = serde_json::Deserializer::from_str(json);
    serde_path_to_error::deserialize(&mut deserializer).map_err(|err| {
        let path = err.path().to_string();
        CollaboratorError::InvalidResponse(format!("at {path}: {}", err.into_inner()))
    })
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`) on the opening fence line.
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().trim_end_matches("```").trim()
}
