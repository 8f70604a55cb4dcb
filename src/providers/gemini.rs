use crate::models::gemini::{GeminiContent, GeminiPart, GeminiRequest, GeminiResponse, InlineData};
use crate::models::ChatRequest;
use crate::providers::{remaining_budget, truncate_body, ChatProvider, ProviderError};
use async_trait::async_trait;
use log::info;
use reqwest::Client;

const GEMINI_MODEL: &str = "gemini-1.5-flash";

/// Google Gemini `generateContent` adapter. One model serves text and images.
pub struct GeminiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    system_prompt: String,
}

impl GeminiProvider {
    pub fn new(base_url: String, api_key: String, system_prompt: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: GEMINI_MODEL.to_string(),
            system_prompt,
        }
    }

    fn build_request(&self, req: &ChatRequest) -> GeminiRequest {
        let mut parts = vec![GeminiPart::Text {
            text: req.message.clone(),
        }];
        if let Some(image) = &req.image {
            parts.push(GeminiPart::InlineData {
                inline_data: InlineData {
                    mime_type: image.mime_type.clone(),
                    data: image.data.clone(),
                },
            });
        }

        GeminiRequest {
            system_instruction: GeminiContent {
                role: None,
                parts: vec![GeminiPart::Text {
                    text: self.system_prompt.clone(),
                }],
            },
            contents: vec![GeminiContent {
                role: Some("user"),
                parts,
            }],
        }
    }
}

#[async_trait]
impl ChatProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn invoke(&self, req: &ChatRequest) -> Result<String, ProviderError> {
        let budget = remaining_budget(req)?;
        info!("Calling gemini with model {}", self.model);

        let response = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, self.model
            ))
            .header("x-goog-api-key", &self.api_key)
            .timeout(budget)
            .json(&self.build_request(req))
            .send()
            .await
            .map_err(ProviderError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Upstream {
                status: status.as_u16(),
                message: truncate_body(&text),
            });
        }

        let data = response
            .json::<GeminiResponse>()
            .await
            .map_err(ProviderError::from_transport)?;

        let reply: String = data
            .candidates
            .into_iter()
            .find_map(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if reply.trim().is_empty() {
            return Err(ProviderError::Parse("No candidate text returned".to_string()));
        }

        info!("gemini replied successfully");
        Ok(reply)
    }
}
