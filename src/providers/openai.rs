use crate::models::openai::{
    ImageUrl, OpenAiContent, OpenAiMessage, OpenAiPart, OpenAiRequest, OpenAiResponse,
};
use crate::models::ChatRequest;
use crate::providers::{remaining_budget, truncate_body, ChatProvider, ProviderError};
use async_trait::async_trait;
use log::info;
use reqwest::Client;

/// Adapter for any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiCompatibleProvider {
    name: String,
    client: Client,
    base_url: String,
    api_key: String,
    text_model: String,
    vision_model: String,
    system_prompt: String,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: String,
        api_key: String,
        text_model: impl Into<String>,
        vision_model: impl Into<String>,
        system_prompt: String,
    ) -> Self {
        Self {
            name: name.into(),
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            text_model: text_model.into(),
            vision_model: vision_model.into(),
            system_prompt,
        }
    }

    pub fn groq(base_url: String, api_key: String, system_prompt: String) -> Self {
        Self::new(
            "groq",
            base_url,
            api_key,
            "llama-3.3-70b-versatile",
            "meta-llama/llama-4-scout-17b-16e-instruct",
            system_prompt,
        )
    }

    pub fn openai(base_url: String, api_key: String, system_prompt: String) -> Self {
        Self::new(
            "openai",
            base_url,
            api_key,
            "gpt-4o-mini",
            "gpt-4o-mini",
            system_prompt,
        )
    }

    fn build_request(&self, req: &ChatRequest) -> OpenAiRequest {
        let (model, content) = match &req.image {
            Some(image) => (
                &self.vision_model,
                OpenAiContent::Parts(vec![
                    OpenAiPart::Text {
                        text: req.message.clone(),
                    },
                    OpenAiPart::ImageUrl {
                        image_url: ImageUrl {
                            url: image.to_data_url(),
                        },
                    },
                ]),
            ),
            None => (&self.text_model, OpenAiContent::Text(req.message.clone())),
        };

        OpenAiRequest {
            model: model.clone(),
            messages: vec![
                OpenAiMessage {
                    role: "system",
                    content: OpenAiContent::Text(self.system_prompt.clone()),
                },
                OpenAiMessage {
                    role: "user",
                    content,
                },
            ],
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, req: &ChatRequest) -> Result<String, ProviderError> {
        let budget = remaining_budget(req)?;
        let body = self.build_request(req);
        info!("Calling {} with model {}", self.name, body.model);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(budget)
            .json(&body)
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
            .json::<OpenAiResponse>()
            .await
            .map_err(ProviderError::from_transport)?;

        let reply = data
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| ProviderError::Parse("No reply content returned".to_string()))?;

        info!("{} replied successfully", self.name);
        Ok(reply)
    }
}
