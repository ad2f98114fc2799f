//! LLM provider detection and usage/cost metadata extraction.
//!
//! Extraction operates on captured body previews, so a preview truncated
//! mid-document simply fails to parse and drops the fields that needed it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Known LLM API providers. Adding one is a compile-time-checked extension:
/// every match over `Provider` must handle the new variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Anthropic,
    Mistral,
    Cohere,
    Google,
    Bedrock,
    Together,
    Replicate,
}

impl Provider {
    /// Substring match of the target URL against the known API hosts.
    /// Unmatched hosts are not an error, just not an LLM call.
    pub fn detect(url: &str) -> Option<Self> {
        const REGISTRY: [(&str, Provider); 8] = [
            ("api.openai.com", Provider::OpenAi),
            ("api.anthropic.com", Provider::Anthropic),
            ("api.mistral.ai", Provider::Mistral),
            ("api.cohere.ai", Provider::Cohere),
            ("generativelanguage.googleapis.com", Provider::Google),
            ("bedrock-runtime", Provider::Bedrock),
            ("api.together.xyz", Provider::Together),
            ("api.replicate.com", Provider::Replicate),
        ];
        REGISTRY
            .iter()
            .find(|(host, _)| url.contains(host))
            .map(|&(_, provider)| provider)
    }

    pub fn name(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Mistral => "mistral",
            Provider::Cohere => "cohere",
            Provider::Google => "google",
            Provider::Bedrock => "bedrock",
            Provider::Together => "together",
            Provider::Replicate => "replicate",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmMetadata {
    pub provider: Provider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Approximate price per 1M tokens (input, output).
const PRICING: [(&str, f64, f64); 7] = [
    ("gpt-4", 30.0, 60.0),
    ("gpt-4-turbo", 10.0, 30.0),
    ("gpt-3.5-turbo", 0.5, 1.5),
    ("claude-3-opus", 15.0, 75.0),
    ("claude-3-sonnet", 3.0, 15.0),
    ("claude-3-haiku", 0.25, 1.25),
    ("claude-3-5-sonnet", 3.0, 15.0),
];

/// Dollar cost for a call. Model variants with date stamps or provider
/// suffixes still match their base key by substring containment; unknown
/// models cost 0 rather than erroring. Where several keys match, the most
/// specific (longest) wins so `gpt-4-turbo` is not priced as `gpt-4`.
pub fn estimate_cost(model: &str, prompt_tokens: u64, completion_tokens: u64) -> f64 {
    let Some(&(_, input, output)) = PRICING
        .iter()
        .filter(|(key, _, _)| model.contains(key))
        .max_by_key(|(key, _, _)| key.len())
    else {
        return 0.0;
    };
    (prompt_tokens as f64 / 1_000_000.0) * input + (completion_tokens as f64 / 1_000_000.0) * output
}

/// Derive provider metadata from the captured previews. Returns `None` when
/// the host is not a known provider. Parse failures in either body are
/// non-fatal: fields that needed the unparseable body are simply absent.
pub fn extract(
    url: &str,
    request_preview: Option<&str>,
    response_preview: Option<&str>,
) -> Option<LlmMetadata> {
    let provider = Provider::detect(url)?;

    let req = request_preview.and_then(|body| serde_json::from_str::<Value>(body).ok());
    let res = response_preview.and_then(|body| serde_json::from_str::<Value>(body).ok());

    let mut meta = map_fields(provider, req.as_ref(), res.as_ref());

    if let Some(model) = &meta.model {
        // A one-sided usage block prices as 0, not as a partial sum.
        meta.cost = match (meta.prompt_tokens, meta.completion_tokens) {
            (Some(prompt), Some(completion)) => Some(estimate_cost(model, prompt, completion)),
            _ => Some(0.0),
        };
    }

    Some(meta)
}

fn map_fields(provider: Provider, req: Option<&Value>, res: Option<&Value>) -> LlmMetadata {
    let mut meta = LlmMetadata {
        provider,
        model: field_str(req, &["model"]).or_else(|| field_str(res, &["model"])),
        prompt_tokens: None,
        completion_tokens: None,
        total_tokens: None,
        cost: None,
        temperature: field_f64(req, &["temperature"]),
        max_tokens: field_u64(req, &["max_tokens"]),
        finish_reason: None,
    };

    match provider {
        // OpenAI-compatible completion APIs share a usage shape.
        Provider::OpenAi | Provider::Mistral | Provider::Together => {
            meta.prompt_tokens = field_u64(res, &["usage", "prompt_tokens"]);
            meta.completion_tokens = field_u64(res, &["usage", "completion_tokens"]);
            meta.total_tokens = field_u64(res, &["usage", "total_tokens"]);
            meta.finish_reason = res
                .and_then(|v| v.get("choices"))
                .and_then(|c| c.get(0))
                .and_then(|c| c.get("finish_reason"))
                .and_then(Value::as_str)
                .map(str::to_string);
        }
        Provider::Anthropic | Provider::Bedrock => {
            meta.prompt_tokens = field_u64(res, &["usage", "input_tokens"]);
            meta.completion_tokens = field_u64(res, &["usage", "output_tokens"]);
            meta.total_tokens = match (meta.prompt_tokens, meta.completion_tokens) {
                (None, None) => None,
                (input, output) => Some(input.unwrap_or(0) + output.unwrap_or(0)),
            };
            meta.finish_reason = field_str(res, &["stop_reason"]);
        }
        Provider::Google => {
            meta.prompt_tokens = field_u64(res, &["usageMetadata", "promptTokenCount"]);
            meta.completion_tokens = field_u64(res, &["usageMetadata", "candidatesTokenCount"]);
            meta.total_tokens = field_u64(res, &["usageMetadata", "totalTokenCount"]);
            meta.finish_reason = res
                .and_then(|v| v.get("candidates"))
                .and_then(|c| c.get(0))
                .and_then(|c| c.get("finishReason"))
                .and_then(Value::as_str)
                .map(str::to_string);
        }
        Provider::Cohere => {
            meta.prompt_tokens = field_u64(res, &["meta", "billed_units", "input_tokens"]);
            meta.completion_tokens = field_u64(res, &["meta", "billed_units", "output_tokens"]);
            meta.total_tokens = match (meta.prompt_tokens, meta.completion_tokens) {
                (None, None) => None,
                (input, output) => Some(input.unwrap_or(0) + output.unwrap_or(0)),
            };
            meta.finish_reason = field_str(res, &["finish_reason"]);
        }
        // Replicate responses carry no usage accounting worth normalizing.
        Provider::Replicate => {}
    }

    meta
}

fn field<'a>(root: Option<&'a Value>, path: &[&str]) -> Option<&'a Value> {
    let mut current = root?;
    for key in path {
        current = current.get(key)?;
    }
    Some(current)
}

fn field_str(root: Option<&Value>, path: &[&str]) -> Option<String> {
    field(root, path).and_then(Value::as_str).map(str::to_string)
}

fn field_u64(root: Option<&Value>, path: &[&str]) -> Option<u64> {
    field(root, path).and_then(Value::as_u64)
}

fn field_f64(root: Option<&Value>, path: &[&str]) -> Option<f64> {
    field(root, path).and_then(Value::as_f64)
}
