use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::models::ContextBundle;

// ── Constants ────────────────────────────────────────────────────────────────

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o";

/// Response-length cap for one completion. The prompt stays deliberately
/// lean for the same reason: the provider charges per token.
const MAX_COMPLETION_TOKENS: u32 = 150;

const GENERATE_FALLBACK: &str = "Failed to generate alt text.";
const REFINE_FALLBACK: &str = "Failed to refine alt text.";

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum DescribeError {
    #[error("OPENAI_API_KEY is not set")]
    MissingCredentials,
    /// Provider's own error message, passed through verbatim.
    #[error("{0}")]
    Api(String),
    #[error("model returned no usable text")]
    EmptyResult,
    #[error("{0}")]
    Request(String),
}

// ── Describer ────────────────────────────────────────────────────────────────

/// Client for the vision-capable completion API. Pure function of its inputs:
/// context is passed in per call, never read from ambient state, and each
/// call is exactly one network round trip with no retry or caching.
pub struct Describer {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
}

impl Describer {
    pub fn from_env() -> Result<Self, DescribeError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.is_empty())
            .ok_or(DescribeError::MissingCredentials)?;
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model =
            std::env::var("ALT_AUDIT_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Ok(Self::new(api_key, base_url, model))
    }

    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.into(),
        }
    }

    pub async fn generate(
        &self,
        image_src: &str,
        context: Option<&ContextBundle>,
    ) -> Result<String, DescribeError> {
        let (system, user) = generate_prompts(context);
        self.complete(system, user, image_src, GENERATE_FALLBACK)
            .await
    }

    pub async fn refine(
        &self,
        image_src: &str,
        original_alt_text: &str,
        feedback: &str,
        context: Option<&ContextBundle>,
    ) -> Result<String, DescribeError> {
        let (system, user) = refine_prompts(original_alt_text, feedback, context);
        self.complete(system, user, image_src, REFINE_FALLBACK).await
    }

    async fn complete(
        &self,
        system: String,
        user: String,
        image_src: &str,
        fallback: &str,
    ) -> Result<String, DescribeError> {
        let body = build_request(&self.model, system, user, image_src);
        tracing::debug!(endpoint = %self.endpoint, model = %self.model, "requesting completion");

        let response = self
            .client
            .post(&self.endpoint)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| DescribeError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DescribeError::Api(api_error_message(&text, fallback)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| DescribeError::Request(e.to_string()))?;
        completion_text(parsed).ok_or(DescribeError::EmptyResult)
    }
}

// ── Prompt assembly ──────────────────────────────────────────────────────────

/// System and user prompts for an initial description. Context instructions
/// and field labels appear only when a bundle is supplied.
pub fn generate_prompts(context: Option<&ContextBundle>) -> (String, String) {
    let with_context = context.is_some();

    let mut system =
        String::from("You are an expert at creating accessible and descriptive alt text for images.");
    if with_context {
        system.push_str(
            "\nAlternative text is highly subjective and should be tailored to the context where the image appears.\n\
             When provided with contextual information from the webpage (such as titles, headings, surrounding text),\n\
             use it to inform your description if relevant, but don't include irrelevant details.",
        );
    }
    system.push_str(
        "\nGuidelines for generating good alt text:\n\
         - Be concise but descriptive\n\
         - Focus on the purpose and context of the image on the page\n\
         - Include key visual details that are relevant to the content's purpose\n\
         - Don't start with phrases like \"image of\" or \"picture showing\"\n\
         - For decorative images with no informational value, indicate if a null/empty alt text would be appropriate\n\
         - Don't try to specifically identify people",
    );
    if with_context {
        system.push_str(
            "\n\nAnalyze the provided contextual information and determine what's relevant before creating the alt text.",
        );
    }

    let mut user = String::from("Describe this image in a concise alt text format.");
    match context {
        Some(ctx) => {
            user.push_str("\n\nContextual information from the webpage:");
            push_field(&mut user, "Page title", &ctx.page_title);
            push_field(&mut user, "Page description", &ctx.meta_description);
            if !ctx.relevant_headings.is_empty() {
                user.push_str("\nNearby headings: ");
                user.push_str(&ctx.relevant_headings.join(", "));
            }
            push_field(&mut user, "Image caption", &ctx.figcaption);
            push_field(&mut user, "Surrounding text", &ctx.surrounding_text);
            push_field(&mut user, "Image title attribute", &ctx.img_title);
            push_field(&mut user, "Image aria-label", &ctx.img_aria_label);
            push_field(&mut user, "Existing alt text", &ctx.existing_alt);
            user.push_str("\nPage URL: ");
            user.push_str(&ctx.url);
            user.push_str(
                "\n\nBased on this context and the image itself, provide appropriate alt text that reflects the image's purpose on this page.",
            );
        }
        None => user.push_str(
            "\n\nProvide descriptive alt text based solely on the visual content of the image.",
        ),
    }

    (system, user)
}

/// System and user prompts for a feedback-driven revision. The original text
/// and the user's feedback are embedded verbatim; only a reduced context
/// subset (title, headings, caption, surrounding text) is included.
pub fn refine_prompts(
    original_alt_text: &str,
    feedback: &str,
    context: Option<&ContextBundle>,
) -> (String, String) {
    let mut system = String::from(
        "You are an expert at creating accessible and descriptive alt text for images.\n\
         You will be given an image along with original alt text that was generated for it.\n\
         You will also be given user feedback about how to improve the alt text.\n\n\
         Your task is to refine the alt text based on the user's feedback while ensuring it remains:\n\
         - Concise but descriptive\n\
         - Focused on the purpose of the image\n\
         - Free from phrases like \"image of\" or \"picture showing\"\n\
         - Contextually appropriate\n\
         - Don't try to identify people specifically",
    );
    if context.is_some() {
        system.push_str(
            "\n\nYou will also be given contextual information from the webpage that may help inform your refinements.",
        );
    }

    let mut user = format!(
        "Here is an image that needs refined alt text.\n\n\
         Original alt text: \"{}\"\n\n\
         User feedback for improvement: \"{}\"\n\n\
         Please provide a refined version of the alt text that addresses this feedback.",
        original_alt_text, feedback
    );
    if let Some(ctx) = context {
        user.push_str("\n\nContextual information from the webpage:");
        push_field(&mut user, "Page title", &ctx.page_title);
        if !ctx.relevant_headings.is_empty() {
            user.push_str("\nNearby headings: ");
            user.push_str(&ctx.relevant_headings.join(", "));
        }
        push_field(&mut user, "Image caption", &ctx.figcaption);
        push_field(&mut user, "Surrounding text", &ctx.surrounding_text);
    }
    user.push_str(
        "\n\nPlease provide only the refined alt text without any explanations or additional information.",
    );

    (system, user)
}

fn push_field(prompt: &mut String, label: &str, value: &str) {
    if value.is_empty() {
        return;
    }
    prompt.push('\n');
    prompt.push_str(label);
    prompt.push_str(": ");
    prompt.push_str(value);
}

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

fn build_request<'a>(
    model: &'a str,
    system: String,
    user: String,
    image_src: &str,
) -> ChatRequest<'a> {
    ChatRequest {
        model,
        messages: vec![
            ChatMessage {
                role: "system",
                content: MessageContent::Text(system),
            },
            ChatMessage {
                role: "user",
                content: MessageContent::Parts(vec![
                    ContentPart::Text { text: user },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: image_src.to_string(),
                        },
                    },
                ]),
            },
        ],
        max_tokens: MAX_COMPLETION_TOKENS,
    }
}

/// Provider error message from a non-success body, falling back to a
/// mode-specific message when the body is not the expected shape.
fn api_error_message(body: &str, fallback: &str) -> String {
    serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .map(|parsed| parsed.error.message)
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

/// First completion's text, if any usable text came back.
fn completion_text(response: ChatResponse) -> Option<String> {
    response
        .choices
        .into_iter()
        .next()?
        .message
        .content
        .filter(|text| !text.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_context() -> ContextBundle {
        ContextBundle {
            page_title: "Arctic wildlife".to_string(),
            meta_description: "A field guide".to_string(),
            relevant_headings: vec!["Foxes of the tundra".to_string()],
            figcaption: "A fox mid-pounce".to_string(),
            surrounding_text: "The arctic fox hunts lemmings under the snow.".to_string(),
            img_title: "Fox".to_string(),
            img_aria_label: "pouncing fox".to_string(),
            existing_alt: "fox".to_string(),
            url: "https://example.com/foxes".to_string(),
        }
    }

    #[test]
    fn generate_without_context_has_no_context_labels() {
        let (system, user) = generate_prompts(None);
        assert!(!system.contains("contextual information"));
        assert!(!user.contains("Contextual information from the webpage:"));
        assert!(!user.contains("Page title:"));
        assert!(!user.contains("Page URL:"));
        assert!(user.contains("based solely on the visual content"));
    }

    #[test]
    fn generate_with_context_serializes_every_field() {
        let (system, user) = generate_prompts(Some(&full_context()));
        assert!(system.contains("Analyze the provided contextual information"));
        assert!(user.contains("Page title: Arctic wildlife"));
        assert!(user.contains("Page description: A field guide"));
        assert!(user.contains("Nearby headings: Foxes of the tundra"));
        assert!(user.contains("Image caption: A fox mid-pounce"));
        assert!(user.contains("Surrounding text: The arctic fox hunts lemmings under the snow."));
        assert!(user.contains("Image title attribute: Fox"));
        assert!(user.contains("Image aria-label: pouncing fox"));
        assert!(user.contains("Existing alt text: fox"));
        assert!(user.contains("Page URL: https://example.com/foxes"));
        assert!(user.ends_with("purpose on this page."));
    }

    #[test]
    fn generate_skips_empty_context_fields() {
        let ctx = ContextBundle {
            url: "https://example.com/foxes".to_string(),
            ..ContextBundle::default()
        };
        let (_, user) = generate_prompts(Some(&ctx));
        assert!(user.contains("Contextual information from the webpage:"));
        assert!(user.contains("Page URL: https://example.com/foxes"));
        assert!(!user.contains("Page title:"));
        assert!(!user.contains("Nearby headings:"));
        assert!(!user.contains("Surrounding text:"));
    }

    #[test]
    fn refine_embeds_original_and_feedback_verbatim() {
        let (_, user) = refine_prompts("A fox in snow", "mention the pounce!", None);
        assert!(user.contains("Original alt text: \"A fox in snow\""));
        assert!(user.contains("User feedback for improvement: \"mention the pounce!\""));
        assert!(user.ends_with("without any explanations or additional information."));
    }

    #[test]
    fn refine_uses_reduced_context_subset() {
        let (system, user) = refine_prompts("A fox", "shorter", Some(&full_context()));
        assert!(system.contains("contextual information from the webpage"));
        assert!(user.contains("Page title: Arctic wildlife"));
        assert!(user.contains("Nearby headings: Foxes of the tundra"));
        assert!(user.contains("Image caption: A fox mid-pounce"));
        assert!(user.contains("Surrounding text:"));
        assert!(!user.contains("Page description:"));
        assert!(!user.contains("Image title attribute:"));
        assert!(!user.contains("Image aria-label:"));
        assert!(!user.contains("Existing alt text:"));
        assert!(!user.contains("Page URL:"));
    }

    #[test]
    fn request_body_matches_the_completions_wire_format() {
        let body = build_request(
            "gpt-4o",
            "system prompt".to_string(),
            "user prompt".to_string(),
            "https://example.com/fox.png",
        );
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["model"], "gpt-4o");
        assert_eq!(value["max_tokens"], 150);
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][0]["content"], "system prompt");
        assert_eq!(value["messages"][1]["role"], "user");
        assert_eq!(value["messages"][1]["content"][0]["type"], "text");
        assert_eq!(value["messages"][1]["content"][0]["text"], "user prompt");
        assert_eq!(value["messages"][1]["content"][1]["type"], "image_url");
        assert_eq!(
            value["messages"][1]["content"][1]["image_url"]["url"],
            "https://example.com/fox.png"
        );
    }

    #[test]
    fn provider_error_message_passes_through_verbatim() {
        let body = r#"{"error":{"message":"rate limited"}}"#;
        assert_eq!(api_error_message(body, GENERATE_FALLBACK), "rate limited");
    }

    #[test]
    fn unparseable_error_body_uses_fallback() {
        assert_eq!(
            api_error_message("<html>502</html>", REFINE_FALLBACK),
            "Failed to refine alt text."
        );
        assert_eq!(
            api_error_message(r#"{"error":{"message":""}}"#, GENERATE_FALLBACK),
            "Failed to generate alt text."
        );
    }

    #[test]
    fn completion_text_takes_the_first_choice() {
        let response: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"content":"A fox pouncing in snow"}},{"message":{"content":"second"}}]}"#,
        )
        .unwrap();
        assert_eq!(
            completion_text(response).as_deref(),
            Some("A fox pouncing in snow")
        );
    }

    #[test]
    fn missing_or_blank_completions_are_empty_results() {
        let no_choices: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(completion_text(no_choices).is_none());

        let null_content: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":null}}]}"#).unwrap();
        assert!(completion_text(null_content).is_none());

        let blank: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"  "}}]}"#).unwrap();
        assert!(completion_text(blank).is_none());
    }
}
