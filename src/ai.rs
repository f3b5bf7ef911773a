//! Client for the language-model API used for document analysis.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::domain::AnalysisType;

const MAX_TEXT_CHARS: usize = 48_000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

/// What the model sees of a document.
#[derive(Debug, Clone)]
pub struct AnalysisInput {
    pub document_name: String,
    pub mime_type: String,
    pub category: String,
    /// Extracted text for text documents; other formats are described by
    /// their identifiers only.
    pub text: Option<String>,
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("AI analysis is not configured")]
    NotConfigured,
    #[error("AI request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("AI service responded with {status}: {body}")]
    Status { status: u16, body: String },
    #[error("AI response could not be parsed: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait AnalysisClient: Send + Sync {
    async fn analyze(
        &self,
        analysis_type: AnalysisType,
        input: &AnalysisInput,
    ) -> Result<Value, AnalysisError>;
}

pub fn client_from_config(config: &AppConfig) -> Arc<dyn AnalysisClient> {
    match (&config.ai_api_url, &config.ai_api_key) {
        (Some(url), key) => Arc::new(HttpAnalysisClient::new(
            url.clone(),
            key.clone(),
            config.ai_model.clone(),
        )),
        (None, _) => {
            warn!("AI_API_URL not set; document analysis is disabled");
            Arc::new(DisabledAnalysisClient)
        }
    }
}

pub struct DisabledAnalysisClient;

#[async_trait]
impl AnalysisClient for DisabledAnalysisClient {
    async fn analyze(
        &self,
        _analysis_type: AnalysisType,
        _input: &AnalysisInput,
    ) -> Result<Value, AnalysisError> {
        Err(AnalysisError::NotConfigured)
    }
}

/// Chat-completions client that asks for one JSON object per analysis.
pub struct HttpAnalysisClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl HttpAnalysisClient {
    pub fn new(endpoint: String, api_key: Option<String>, model: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            endpoint,
            api_key,
            model,
        }
    }
}

#[async_trait]
impl AnalysisClient for HttpAnalysisClient {
    async fn analyze(
        &self,
        analysis_type: AnalysisType,
        input: &AnalysisInput,
    ) -> Result<Value, AnalysisError> {
        let payload = request_body(&self.model, analysis_type, input);
        debug!(
            endpoint = %self.endpoint,
            analysis_type = %analysis_type,
            document = %input.document_name,
            "sending analysis request"
        );

        let mut request = self.client.post(&self.endpoint).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Status { status, body });
        }

        let body: Value = response.json().await?;
        parse_completion(&body)
    }
}

fn instructions(analysis_type: AnalysisType) -> &'static str {
    match analysis_type {
        AnalysisType::SummarizeContract => {
            "Summarize the contract. Respond with JSON {\"summary\": string, \"parties\": [string], \"key_dates\": [string]}."
        }
        AnalysisType::KeyClauses => {
            "List the key clauses. Respond with JSON {\"clauses\": [{\"title\": string, \"summary\": string}]}."
        }
        AnalysisType::RiskIdentification => {
            "Identify legal and commercial risks. Respond with JSON {\"risks\": [{\"risk\": string, \"severity\": \"low\"|\"medium\"|\"high\", \"mitigation\": string}]}."
        }
        AnalysisType::LegalCompliance => {
            "Assess regulatory and legal compliance. Respond with JSON {\"issues\": [{\"area\": string, \"finding\": string}], \"overall\": string}."
        }
        AnalysisType::ObligationsAnalysis => {
            "Extract the obligations of each party. Respond with JSON {\"obligations\": [{\"party\": string, \"obligation\": string, \"deadline\": string|null}]}."
        }
        AnalysisType::FinancialTerms => {
            "Extract the financial terms. Respond with JSON {\"terms\": [{\"term\": string, \"amount\": string|null, \"notes\": string}]}."
        }
    }
}

fn request_body(model: &str, analysis_type: AnalysisType, input: &AnalysisInput) -> Value {
    let document = match &input.text {
        Some(text) => {
            let text: String = text.chars().take(MAX_TEXT_CHARS).collect();
            format!(
                "Document \"{}\" ({}, category {}):\n\n{}",
                input.document_name, input.mime_type, input.category, text
            )
        }
        None => format!(
            "Document \"{}\" ({}, category {}). The content is not available as text; base the analysis on what can be inferred from these identifiers.",
            input.document_name, input.mime_type, input.category
        ),
    };

    json!({
        "model": model,
        "response_format": { "type": "json_object" },
        "messages": [
            {
                "role": "system",
                "content": format!(
                    "You are an M&A transaction analyst reviewing deal-room documents. {}",
                    instructions(analysis_type)
                ),
            },
            { "role": "user", "content": document },
        ],
    })
}

#[derive(Deserialize)]
struct Completion {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

fn parse_completion(body: &Value) -> Result<Value, AnalysisError> {
    let completion: Completion = serde_json::from_value(body.clone())
        .map_err(|err| AnalysisError::Malformed(err.to_string()))?;
    let content = completion
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| AnalysisError::Malformed("response contained no message".into()))?;

    let parsed: Value = serde_json::from_str(content.trim())
        .map_err(|err| AnalysisError::Malformed(err.to_string()))?;
    if !parsed.is_object() {
        return Err(AnalysisError::Malformed(
            "analysis result is not a JSON object".into(),
        ));
    }
    Ok(parsed)
}
