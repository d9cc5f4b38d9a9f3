//! AI coaching: builds prompts for workout plans and nutrition advice, sends
//! them to an OpenAI-compatible chat completion API and pulls the JSON object
//! out of the model's reply.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::AiConfig;

const SYSTEM_PROMPT: &str = "You are a certified personal trainer and sports nutritionist. \
Answer with a single JSON object and nothing else.";

#[derive(Error, Debug)]
pub enum AiError {
    #[error("AI service is not configured")]
    NotConfigured,
    #[error("AI provider error: {0}")]
    Upstream(String),
    #[error("AI provider returned an empty reply")]
    EmptyReply,
}

/// A text completion backend
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, AiError>;
}

/// Client for `POST {base_url}/chat/completions`
pub struct OpenAiClient {
    http_client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(config: &AiConfig) -> Self {
        Self {
            http_client: Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, AiError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: prompt },
            ],
            temperature: 0.7,
        };

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AiError::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            log::warn!("AI provider answered {}: {}", status, detail);
            return Err(AiError::Upstream(format!("status {}", status)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AiError::Upstream(format!("unreadable response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(AiError::EmptyReply)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutPlanRequest {
    pub goal: String,
    #[serde(default = "default_fitness_level")]
    pub fitness_level: String,
    pub days_per_week: u8,
    #[serde(default)]
    pub session_minutes: Option<u32>,
    #[serde(default)]
    pub equipment: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_fitness_level() -> String {
    "beginner".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NutritionAdviceRequest {
    pub goal: String,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub weight_kg: Option<f64>,
    #[serde(default)]
    pub height_cm: Option<f64>,
    #[serde(default)]
    pub dietary_restrictions: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Model reply: the extracted JSON object when there is one, plus the raw text
#[derive(Debug, Clone)]
pub struct AiReply {
    pub structured: Option<Value>,
    pub raw: String,
}

impl WorkoutPlanRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.goal.trim().is_empty() {
            return Err("goal is required".to_string());
        }
        if !(1..=7).contains(&self.days_per_week) {
            return Err("daysPerWeek must be between 1 and 7".to_string());
        }
        Ok(())
    }

    pub fn to_prompt(&self) -> String {
        let mut prompt = format!(
            "Create a {}-day-per-week workout plan for a {} trainee whose goal is: {}.\n",
            self.days_per_week,
            self.fitness_level.trim(),
            self.goal.trim()
        );
        if let Some(minutes) = self.session_minutes {
            prompt.push_str(&format!("Each session should take about {} minutes.\n", minutes));
        }
        if self.equipment.is_empty() {
            prompt.push_str("Assume bodyweight only, no equipment.\n");
        } else {
            prompt.push_str(&format!("Available equipment: {}.\n", self.equipment.join(", ")));
        }
        if let Some(notes) = self.notes.as_deref().filter(|n| !n.trim().is_empty()) {
            prompt.push_str(&format!("Additional notes: {}\n", notes.trim()));
        }
        prompt.push_str(
            "Respond with JSON shaped like {\"title\": string, \"summary\": string, \
             \"days\": [{\"day\": string, \"focus\": string, \"exercises\": \
             [{\"name\": string, \"sets\": number, \"reps\": string, \"restSeconds\": number}]}], \
             \"tips\": [string]}.",
        );
        prompt
    }
}

impl NutritionAdviceRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.goal.trim().is_empty() {
            return Err("goal is required".to_string());
        }
        if self.weight_kg.is_some_and(|w| !(20.0..=400.0).contains(&w)) {
            return Err("weightKg is out of range".to_string());
        }
        if self.height_cm.is_some_and(|h| !(80.0..=260.0).contains(&h)) {
            return Err("heightCm is out of range".to_string());
        }
        Ok(())
    }

    pub fn to_prompt(&self) -> String {
        let mut prompt = format!("Give nutrition advice for someone whose goal is: {}.\n", self.goal.trim());
        if let Some(age) = self.age {
            prompt.push_str(&format!("Age: {}.\n", age));
        }
        if let Some(weight) = self.weight_kg {
            prompt.push_str(&format!("Weight: {} kg.\n", weight));
        }
        if let Some(height) = self.height_cm {
            prompt.push_str(&format!("Height: {} cm.\n", height));
        }
        if !self.dietary_restrictions.is_empty() {
            prompt.push_str(&format!(
                "Dietary restrictions: {}.\n",
                self.dietary_restrictions.join(", ")
            ));
        }
        if let Some(notes) = self.notes.as_deref().filter(|n| !n.trim().is_empty()) {
            prompt.push_str(&format!("Additional notes: {}\n", notes.trim()));
        }
        prompt.push_str(
            "Respond with JSON shaped like {\"dailyCalories\": number, \"macros\": \
             {\"proteinGrams\": number, \"carbsGrams\": number, \"fatGrams\": number}, \
             \"meals\": [{\"name\": string, \"items\": [string]}], \"tips\": [string]}.",
        );
        prompt
    }
}

/// Front door for the AI endpoints; answers NotConfigured when no client is set
#[derive(Clone, Default)]
pub struct AiService {
    client: Option<Arc<dyn CompletionClient>>,
}

impl AiService {
    pub fn new(client: Option<Arc<dyn CompletionClient>>) -> Self {
        Self { client }
    }

    pub fn from_config(config: Option<&AiConfig>) -> Self {
        Self::new(config.map(|c| Arc::new(OpenAiClient::new(c)) as Arc<dyn CompletionClient>))
    }

    pub fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    pub async fn workout_plan(&self, req: &WorkoutPlanRequest) -> Result<AiReply, AiError> {
        self.ask(&req.to_prompt()).await
    }

    pub async fn nutrition_advice(&self, req: &NutritionAdviceRequest) -> Result<AiReply, AiError> {
        self.ask(&req.to_prompt()).await
    }

    async fn ask(&self, prompt: &str) -> Result<AiReply, AiError> {
        let client = self.client.as_ref().ok_or(AiError::NotConfigured)?;
        let raw = client.complete(SYSTEM_PROMPT, prompt).await?;

        let structured = extract_json(&raw);
        if structured.is_none() {
            log::warn!("AI reply did not contain a JSON object ({} chars)", raw.len());
        }
        Ok(AiReply { structured, raw })
    }
}

/// Pull the JSON object out of a model reply that may wrap it in prose or a code fence
pub fn extract_json(reply: &str) -> Option<Value> {
    let text = strip_code_fence(reply);

    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(text.trim()) {
        return Some(value);
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

fn strip_code_fence(reply: &str) -> &str {
    let Some(open) = reply.find("```") else {
        return reply;
    };
    let body = &reply[open + 3..];
    // skip the language tag line, e.g. ```json
    let body = match body.find('\n') {
        Some(nl) => &body[nl + 1..],
        None => body,
    };
    match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    }
}
