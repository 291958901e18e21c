use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::{EmailType, ExtractedEmailData};

// --- Provider trait ---

pub trait CompletionProvider {
    fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String>;
    #[allow(dead_code)]
    fn model_name(&self) -> &str;
}

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1";

/// Email bodies are cut off here before prompting. Lossy but deterministic;
/// classification quality degrades gracefully on very long emails.
const MAX_BODY_CHARS: usize = 3000;

const CLASSIFY_MAX_TOKENS: u32 = 1500;

// --- Gemini provider ---

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<RequestContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Option<Vec<Part>>,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

#[derive(Debug)]
pub struct GeminiProvider {
    api_key: String,
    model_id: String,
    client: reqwest::blocking::Client,
}

impl GeminiProvider {
    pub fn new(api_key: String, model_id: String) -> Self {
        let client = reqwest::blocking::Client::new();
        Self {
            api_key,
            model_id,
            client,
        }
    }
}

impl CompletionProvider for GeminiProvider {
    fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            GEMINI_API_BASE, self.model_id, self.api_key
        );

        let request = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.0,
                max_output_tokens: max_tokens,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .context("Failed to send request to Gemini API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(anyhow!(
                "Gemini API request failed with status {}: {}",
                status,
                error_text
            ));
        }

        let api_response: GenerateResponse = response
            .json()
            .context("Failed to parse Gemini API response")?;

        let candidate = match api_response.candidates {
            Some(candidates) if !candidates.is_empty() => {
                candidates.into_iter().next().ok_or_else(|| anyhow!("No candidates in Gemini response"))?
            }
            _ => {
                let reason = api_response
                    .prompt_feedback
                    .and_then(|f| f.block_reason)
                    .unwrap_or_else(|| "unknown".to_string());
                return Err(anyhow!(
                    "No candidates in Gemini response (block reason: {})",
                    reason
                ));
            }
        };

        let finish_reason = candidate.finish_reason.clone().unwrap_or_default();
        candidate
            .content
            .and_then(|c| c.parts)
            .and_then(|parts| parts.into_iter().next())
            .map(|part| part.text)
            .ok_or_else(|| {
                anyhow!(
                    "Candidate content is empty or blocked (finish reason: {})",
                    finish_reason
                )
            })
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

/// Capability-list query against the models endpoint.
#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(rename = "supportedGenerationMethods", default)]
    pub supported_generation_methods: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

pub fn list_models(api_key: &str) -> Result<Vec<ModelInfo>> {
    let url = format!("{}/models?key={}", GEMINI_API_BASE, api_key);
    let response = reqwest::blocking::get(&url).context("Failed to reach Gemini API")?;

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response.text().unwrap_or_default();
        return Err(anyhow!(
            "Model listing failed with status {}: {}",
            status,
            error_text
        ));
    }

    let listing: ModelsResponse = response
        .json()
        .context("Failed to parse model listing response")?;
    Ok(listing.models)
}

/// Credential self-test: one tiny completion round-trip.
pub fn self_test(provider: &dyn CompletionProvider) -> Result<String> {
    provider.complete("Say 'Hello' if you can read this.", 50)
}

// --- Classification ---

/// Per-email outcome when no record can be produced. The batch loop logs
/// these and moves on; they never abort the run.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractionFailure {
    #[error("completion call failed: {0}")]
    Api(String),
    #[error("response was not valid JSON")]
    Malformed,
    #[error("response missing email_type")]
    MissingType,
    #[error("response missing both company and position")]
    MissingFields,
}

pub fn classify(
    provider: &dyn CompletionProvider,
    subject: &str,
    body: &str,
) -> Result<ExtractedEmailData, ExtractionFailure> {
    let prompt = build_prompt(subject, body);
    let raw = provider
        .complete(&prompt, CLASSIFY_MAX_TOKENS)
        .map_err(|e| ExtractionFailure::Api(format!("{e:#}")))?;
    parse_extraction(&raw)
}

fn build_prompt(subject: &str, body: &str) -> String {
    let truncated = truncate_body(body);
    format!(
        r#"You are analyzing a job application email. Extract the following information and classify the email type.

Subject: {subject}

Email content:
{truncated}

Return ONLY valid JSON with this exact structure. Use null for missing values (no markdown, no backticks):
{{
  "email_type": "confirmation",
  "company": "company name",
  "position": "job title",
  "location": null,
  "job_id": null
}}

Classification Rules (follow strictly):

email_type = "confirmation" if email says:
- "thank you for applying"
- "we received your application"
- "application submitted"
- "thanks for your interest"
- "we will review your application"
EVEN IF it mentions they may not respond to everyone

email_type = "rejection" if email explicitly says:
- "decided to pursue other candidates"
- "unfortunately"
- "will not be moving forward"
- "not selected"
- "position has been filled"
- "we won't be able to proceed"
- "after reviewing your application... unfortunately"

email_type = "other" for:
- Assessment/coding challenge invitations
- Interview scheduling
- Requests for more information

Key distinction:
- "Thanks for applying, we may not respond to everyone" = CONFIRMATION (not a rejection yet)
- "Unfortunately, we won't be able to invite you" = REJECTION (explicit rejection)

Other fields:
- company: Extract the actual hiring company name (e.g., "Whatnot", "Cloudflare"), NOT the email platform (e.g., not "Ashby" or "Greenhouse")
- position: Extract the exact job title as mentioned in the email
- location: Extract location if clearly mentioned, otherwise null
- job_id: Extract reference/requisition number if present, otherwise null

IMPORTANT: Return complete, valid JSON. If unsure about a field, use null."#
    )
}

fn truncate_body(body: &str) -> String {
    if body.chars().count() > MAX_BODY_CHARS {
        let cut: String = body.chars().take(MAX_BODY_CHARS).collect();
        format!("{cut}... [truncated]")
    } else {
        body.to_string()
    }
}

/// Parse and validate a raw model response into extracted data.
pub fn parse_extraction(raw: &str) -> Result<ExtractedEmailData, ExtractionFailure> {
    let cleaned = strip_code_fences(raw);

    let value = match serde_json::from_str::<Value>(&cleaned) {
        Ok(v) => v,
        Err(_) => {
            // Repair is only worth attempting on output that was cut off
            // mid-object; anything else is garbage.
            if cleaned.contains("\"email_type\"") && !cleaned.ends_with('}') {
                repair_truncated_json(&cleaned).ok_or(ExtractionFailure::Malformed)?
            } else {
                return Err(ExtractionFailure::Malformed);
            }
        }
    };

    validate(&value)
}

fn strip_code_fences(raw: &str) -> String {
    raw.trim()
        .replace("```json", "")
        .replace("```", "")
        .trim()
        .to_string()
}

fn validate(value: &Value) -> Result<ExtractedEmailData, ExtractionFailure> {
    let email_type = match value.get("email_type").and_then(Value::as_str) {
        Some(s) => EmailType::parse(s),
        None => return Err(ExtractionFailure::MissingType),
    };

    let company = field_string(value, "company");
    let position = field_string(value, "position");
    if company.is_none() && position.is_none() {
        return Err(ExtractionFailure::MissingFields);
    }

    Ok(ExtractedEmailData {
        email_type,
        company: company.unwrap_or_else(|| "Unknown".to_string()),
        position: position.unwrap_or_else(|| "Unknown".to_string()),
        location: field_string(value, "location"),
        job_id: field_string(value, "job_id"),
    })
}

/// Empty strings count as absent. Requisition numbers sometimes come back
/// as bare JSON numbers, so those pass through as strings.
fn field_string(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Attempt to complete a model response that was cut off mid-object.
///
/// Narrow contract: the caller has already checked for the email_type key
/// and a missing closing brace. Anything this cannot fix yields None.
fn repair_truncated_json(truncated: &str) -> Option<Value> {
    let mut fixed = truncated.trim_end().to_string();

    if let Some(stripped) = fixed.strip_suffix(',') {
        fixed = stripped.trim_end().to_string();
    }

    // An unterminated value string leaves a `"key": fragment` tail with no
    // closing quote. Check before injecting defaults so an injected
    // `: null` tail is never mistaken for one.
    if let Some(idx) = fixed.rfind('"') {
        let tail = &fixed[idx + 1..];
        if tail.contains(':') && !tail.contains('"') {
            fixed.push('"');
        }
    }

    if !fixed.contains("\"location\"") {
        fixed.push_str(", \"location\": null");
    }
    if !fixed.contains("\"job_id\"") {
        fixed.push_str(", \"job_id\": null");
    }

    if !fixed.ends_with('}') {
        fixed.push_str(" }");
    }

    serde_json::from_str(&fixed).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CannedProvider {
        response: String,
    }

    impl CompletionProvider for CannedProvider {
        fn complete(&self, _prompt: &str, _max_tokens: u32) -> Result<String> {
            Ok(self.response.clone())
        }

        fn model_name(&self) -> &str {
            "canned"
        }
    }

    struct FailingProvider;

    impl CompletionProvider for FailingProvider {
        fn complete(&self, _prompt: &str, _max_tokens: u32) -> Result<String> {
            Err(anyhow!("endpoint unreachable"))
        }

        fn model_name(&self) -> &str {
            "failing"
        }
    }

    #[test]
    fn test_parse_valid_response() {
        let raw = r#"{"email_type": "confirmation", "company": "Whatnot", "position": "Backend Engineer", "location": "Remote", "job_id": "R123"}"#;
        let data = parse_extraction(raw).unwrap();
        assert_eq!(data.email_type, EmailType::Confirmation);
        assert_eq!(data.company, "Whatnot");
        assert_eq!(data.position, "Backend Engineer");
        assert_eq!(data.location, Some("Remote".to_string()));
        assert_eq!(data.job_id, Some("R123".to_string()));
    }

    #[test]
    fn test_parse_strips_code_fences() {
        let raw = "```json\n{\"email_type\": \"rejection\", \"company\": \"Acme\", \"position\": \"Engineer\", \"location\": null, \"job_id\": null}\n```";
        let data = parse_extraction(raw).unwrap();
        assert_eq!(data.email_type, EmailType::Rejection);
        assert_eq!(data.company, "Acme");
        assert_eq!(data.location, None);
    }

    #[test]
    fn test_parse_unknown_type_is_other() {
        let raw = r#"{"email_type": "newsletter", "company": "Acme", "position": "Engineer"}"#;
        let data = parse_extraction(raw).unwrap();
        assert_eq!(data.email_type, EmailType::Other);
    }

    #[test]
    fn test_parse_missing_type_fails() {
        let raw = r#"{"company": "Acme", "position": "Engineer"}"#;
        assert_eq!(
            parse_extraction(raw).unwrap_err(),
            ExtractionFailure::MissingType
        );
    }

    #[test]
    fn test_parse_missing_company_and_position_fails() {
        let raw = r#"{"email_type": "confirmation", "company": "", "position": null}"#;
        assert_eq!(
            parse_extraction(raw).unwrap_err(),
            ExtractionFailure::MissingFields
        );
    }

    #[test]
    fn test_parse_defaults_missing_company() {
        let raw = r#"{"email_type": "confirmation", "position": "Engineer"}"#;
        let data = parse_extraction(raw).unwrap();
        assert_eq!(data.company, "Unknown");
        assert_eq!(data.position, "Engineer");
    }

    #[test]
    fn test_parse_numeric_job_id() {
        let raw = r#"{"email_type": "confirmation", "company": "Acme", "position": "Engineer", "job_id": 48213}"#;
        let data = parse_extraction(raw).unwrap();
        assert_eq!(data.job_id, Some("48213".to_string()));
    }

    #[test]
    fn test_recovery_of_truncated_response() {
        // Cut off before the closing brace, optional fields never emitted.
        let raw = r#"{"email_type":"confirmation","company":"Foo","position":"Engineer""#;
        let data = parse_extraction(raw).unwrap();
        assert_eq!(data.email_type, EmailType::Confirmation);
        assert_eq!(data.company, "Foo");
        assert_eq!(data.position, "Engineer");
        assert_eq!(data.location, None);
        assert_eq!(data.job_id, None);
    }

    #[test]
    fn test_recovery_strips_trailing_comma() {
        let raw = r#"{"email_type": "rejection", "company": "Acme", "position": "Engineer","#;
        let data = parse_extraction(raw).unwrap();
        assert_eq!(data.email_type, EmailType::Rejection);
        assert_eq!(data.location, None);
        assert_eq!(data.job_id, None);
    }

    #[test]
    fn test_no_recovery_without_type_key() {
        // Prose refusals and other junk fail outright, no repair attempt.
        let raw = "I'm sorry, I can't classify this email.";
        assert_eq!(
            parse_extraction(raw).unwrap_err(),
            ExtractionFailure::Malformed
        );
    }

    #[test]
    fn test_unfixable_truncation_is_malformed() {
        // Value string cut mid-word; the repair cannot salvage this.
        let raw = r#"{"email_type":"confirmation","company":"Ac"#;
        assert_eq!(
            parse_extraction(raw).unwrap_err(),
            ExtractionFailure::Malformed
        );
    }

    #[test]
    fn test_truncate_body_appends_marker() {
        let long_body = "x".repeat(5000);
        let truncated = truncate_body(&long_body);
        assert!(truncated.ends_with("... [truncated]"));
        assert_eq!(truncated.chars().count(), 3000 + "... [truncated]".len());
    }

    #[test]
    fn test_truncate_body_short_unchanged() {
        let body = "short email body";
        assert_eq!(truncate_body(body), body);
    }

    #[test]
    fn test_classify_with_canned_provider() {
        let provider = CannedProvider {
            response: r#"{"email_type": "confirmation", "company": "Cloudflare", "position": "Systems Engineer", "location": null, "job_id": null}"#.to_string(),
        };
        let data = classify(&provider, "Thank you for applying", "body").unwrap();
        assert_eq!(data.email_type, EmailType::Confirmation);
        assert_eq!(data.company, "Cloudflare");
    }

    #[test]
    fn test_classify_provider_failure_is_api_failure() {
        let result = classify(&FailingProvider, "subject", "body");
        assert!(matches!(result, Err(ExtractionFailure::Api(_))));
    }

    #[test]
    fn test_prompt_includes_subject_and_body() {
        let prompt = build_prompt("Re: your application", "We received it.");
        assert!(prompt.contains("Subject: Re: your application"));
        assert!(prompt.contains("We received it."));
        assert!(prompt.contains("Return ONLY valid JSON"));
    }
}
