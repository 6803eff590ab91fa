//! OpenAI API client for transcription and recipe generation.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use fittrack_core::RecipeDetails;

/// Error type for OpenAI operations.
#[derive(Debug, thiserror::Error)]
pub enum OpenAiError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// OpenAI API returned an error.
    #[error("OpenAI API error: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
    },

    /// The model answered with something that is not the expected JSON.
    #[error("invalid model response: {0}")]
    InvalidResponse(String),
}

/// Audio to transcribe.
#[derive(Debug, Clone)]
pub struct AudioUpload {
    /// Raw file bytes.
    pub bytes: Vec<u8>,
    /// Original file name; the API infers the format from its extension.
    pub file_name: String,
    /// Content type sent by the client, if any.
    pub content_type: Option<String>,
}

/// Result of a transcription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcription {
    /// Transcribed text.
    pub text: String,
    /// Detected or requested language.
    #[serde(default)]
    pub language: Option<String>,
    /// Audio duration in seconds.
    #[serde(default, rename = "duration")]
    pub duration_seconds: Option<f64>,
}

/// Request for AI generated recipe details.
#[derive(Debug, Clone)]
pub struct RecipePrompt<'a> {
    /// Dish name.
    pub recipe_name: &'a str,
    /// Desired number of servings.
    pub servings: u32,
    /// Dietary constraints ("vegan", "no nuts"...).
    pub dietary_notes: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

const RECIPE_SYSTEM_PROMPT: &str = "You are a nutrition assistant. Answer with a single JSON \
object with keys: title (string), servings (integer), ingredients (array of {name, quantity}), \
steps (array of strings), nutrition ({calories, protein_g, carbs_g, fat_g} per serving, numbers).";

/// OpenAI API client.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: String,
    transcription_model: String,
    chat_model: String,
}

impl OpenAiClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        transcription_model: impl Into<String>,
        chat_model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, OpenAiError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            transcription_model: transcription_model.into(),
            chat_model: chat_model.into(),
        })
    }

    /// Transcribe an audio file.
    pub async fn transcribe(
        &self,
        audio: AudioUpload,
        language: Option<&str>,
    ) -> Result<Transcription, OpenAiError> {
        let url = format!("{}/v1/audio/transcriptions", self.base_url);

        let mut file = Part::bytes(audio.bytes).file_name(audio.file_name);
        if let Some(content_type) = &audio.content_type {
            file = file.mime_str(content_type)?;
        }

        let mut form = Form::new()
            .text("model", self.transcription_model.clone())
            .text("response_format", "verbose_json")
            .part("file", file);
        if let Some(language) = language {
            form = form.text("language", language.to_string());
        }

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let transcription: Transcription = self.handle_response(response).await?;
        tracing::debug!(
            chars = transcription.text.len(),
            language = ?transcription.language,
            "Transcription received"
        );
        Ok(transcription)
    }

    /// Generate structured recipe details in JSON mode.
    pub async fn recipe_details(
        &self,
        prompt: &RecipePrompt<'_>,
    ) -> Result<RecipeDetails, OpenAiError> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        let mut user_prompt = format!(
            "Recipe: {}\nServings: {}",
            prompt.recipe_name, prompt.servings
        );
        if let Some(notes) = prompt.dietary_notes {
            user_prompt.push_str("\nDietary notes: ");
            user_prompt.push_str(notes);
        }

        let body = json!({
            "model": self.chat_model,
            "response_format": { "type": "json_object" },
            "temperature": 0.4,
            "messages": [
                { "role": "system", "content": RECIPE_SYSTEM_PROMPT },
                { "role": "user", "content": user_prompt },
            ],
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let chat: ChatResponse = self.handle_response(response).await?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| OpenAiError::InvalidResponse("no completion choices".into()))?;

        parse_recipe(&content, prompt.servings)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, OpenAiError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        let message = match response.json::<ErrorResponse>().await {
            Ok(body) => body.error.message,
            Err(_) => format!("HTTP {status}"),
        };
        Err(OpenAiError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

/// Parse the model's JSON answer into recipe details.
fn parse_recipe(content: &str, requested_servings: u32) -> Result<RecipeDetails, OpenAiError> {
    let mut details: RecipeDetails = serde_json::from_str(content)
        .map_err(|e| OpenAiError::InvalidResponse(format!("recipe JSON: {e}")))?;

    if details.title.trim().is_empty() {
        return Err(OpenAiError::InvalidResponse("recipe has no title".into()));
    }
    if details.ingredients.is_empty() || details.steps.is_empty() {
        return Err(OpenAiError::InvalidResponse(
            "recipe has no ingredients or steps".into(),
        ));
    }
    if details.servings == 0 {
        details.servings = requested_servings;
    }
    Ok(details)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_recipe_accepts_model_json() {
        let content = r#"{
            "title": "Lentil soup",
            "servings": 0,
            "ingredients": [{"name": "lentils", "quantity": "200 g"}],
            "steps": ["Simmer for 25 minutes"],
            "nutrition": {"calories": 320, "protein_g": 18, "carbs_g": 50, "fat_g": 4}
        }"#;
        let details = parse_recipe(content, 2).unwrap();
        assert_eq!(details.title, "Lentil soup");
        assert_eq!(details.servings, 2);
        assert!((details.nutrition.calories - 320.0).abs() < f64::EPSILON);
    }

    #[test]
    fn parse_recipe_rejects_incomplete_answers() {
        assert!(parse_recipe("not json", 1).is_err());
        assert!(parse_recipe(r#"{"title": "", "servings": 1}"#, 1).is_err());
        assert!(parse_recipe(r#"{"title": "Toast", "servings": 1}"#, 1).is_err());
    }
}
