//! NLQ Client for LLM interactions

use crate::config::{LLMProvider, NLQConfig};
use crate::nlq::{CompletionService, GenerationParams, NLQError, NLQResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Completion returned by the offline `Mock` provider.
pub const MOCK_COMPLETION: &str = "MATCH (n) RETURN n LIMIT 10";

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a Cypher expert. You only write read-only queries.";

pub struct NLQClient {
    client: Client,
    config: NLQConfig,
    api_base_url: String,
}

impl NLQClient {
    pub fn new(config: &NLQConfig) -> NLQResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| NLQError::ConfigError(e.to_string()))?;

        let api_base_url = config
            .api_base_url
            .clone()
            .unwrap_or_else(|| match config.provider {
                LLMProvider::OpenAI => "https://api.openai.com/v1".to_string(),
                LLMProvider::Ollama => "http://localhost:11434".to_string(),
                LLMProvider::Gemini => {
                    "https://generativelanguage.googleapis.com/v1beta".to_string()
                }
                LLMProvider::Mock => String::new(),
            });

        Ok(Self {
            client,
            config: config.clone(),
            api_base_url,
        })
    }

    pub fn provider(&self) -> LLMProvider {
        self.config.provider
    }

    fn system_prompt(&self) -> String {
        self.config
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())
    }

    async fn openai_chat(&self, prompt: &str, params: &GenerationParams) -> NLQResult<String> {
        #[derive(Serialize)]
        struct Message {
            role: String,
            content: String,
        }

        #[derive(Serialize)]
        struct Request<'a> {
            model: &'a str,
            messages: Vec<Message>,
            temperature: f32,
            max_tokens: u32,
        }

        #[derive(Deserialize)]
        struct Response {
            choices: Vec<Choice>,
        }

        #[derive(Deserialize)]
        struct Choice {
            message: MessageContent,
        }

        #[derive(Deserialize)]
        struct MessageContent {
            content: Option<String>,
        }

        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| NLQError::ConfigError("OpenAI requires API key".to_string()))?;

        let url = format!("{}/chat/completions", self.api_base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&Request {
                model: &self.config.model,
                messages: vec![
                    Message {
                        role: "system".to_string(),
                        content: self.system_prompt(),
                    },
                    Message {
                        role: "user".to_string(),
                        content: prompt.to_string(),
                    },
                ],
                temperature: params.temperature,
                max_tokens: params.max_tokens,
            })
            .send()
            .await
            .map_err(|e| NLQError::NetworkError(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(NLQError::ApiError(format!("OpenAI error: {}", resp.status())));
        }

        let result: Response = resp
            .json()
            .await
            .map_err(|e| NLQError::SerializationError(e.to_string()))?;
        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(NLQError::EmptyResponse)
    }

    async fn ollama_chat(&self, prompt: &str, params: &GenerationParams) -> NLQResult<String> {
        #[derive(Serialize)]
        struct Options {
            temperature: f32,
            num_predict: u32,
        }

        #[derive(Serialize)]
        struct Request<'a> {
            model: &'a str,
            prompt: &'a str,
            system: String,
            stream: bool,
            options: Options,
        }

        #[derive(Deserialize)]
        struct Response {
            response: String,
        }

        let url = format!("{}/api/generate", self.api_base_url);
        let resp = self
            .client
            .post(&url)
            .json(&Request {
                model: &self.config.model,
                prompt,
                system: self.system_prompt(),
                stream: false,
                options: Options {
                    temperature: params.temperature,
                    num_predict: params.max_tokens,
                },
            })
            .send()
            .await
            .map_err(|e| NLQError::NetworkError(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(NLQError::ApiError(format!("Ollama error: {}", resp.status())));
        }

        let result: Response = resp
            .json()
            .await
            .map_err(|e| NLQError::SerializationError(e.to_string()))?;
        Ok(result.response)
    }

    async fn gemini_chat(&self, prompt: &str, params: &GenerationParams) -> NLQResult<String> {
        #[derive(Serialize)]
        struct Request {
            contents: Vec<Content>,
            #[serde(rename = "generationConfig")]
            generation_config: GenerationConfig,
        }

        #[derive(Serialize, Deserialize)]
        struct Content {
            role: Option<String>,
            parts: Vec<Part>,
        }

        #[derive(Serialize, Deserialize)]
        struct Part {
            text: String,
        }

        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct GenerationConfig {
            temperature: f32,
            max_output_tokens: u32,
        }

        #[derive(Deserialize)]
        struct Response {
            candidates: Option<Vec<Candidate>>,
        }

        #[derive(Deserialize)]
        struct Candidate {
            content: Content,
        }

        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| NLQError::ConfigError("Gemini requires API key".to_string()))?;

        // The system instruction is prepended to the single user turn.
        let full_prompt = format!("{}\n\nQuestion: {}", self.system_prompt(), prompt);

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.api_base_url, self.config.model, api_key
        );

        let resp = self
            .client
            .post(&url)
            .json(&Request {
                contents: vec![Content {
                    role: Some("user".to_string()),
                    parts: vec![Part { text: full_prompt }],
                }],
                generation_config: GenerationConfig {
                    temperature: params.temperature,
                    max_output_tokens: params.max_tokens,
                },
            })
            .send()
            .await
            .map_err(|e| NLQError::NetworkError(e.to_string()))?;

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(NLQError::ApiError(format!("Gemini error: {}", text)));
        }

        let result: Response = resp
            .json()
            .await
            .map_err(|e| NLQError::SerializationError(e.to_string()))?;

        result
            .candidates
            .and_then(|candidates| candidates.into_iter().next())
            .and_then(|first| first.content.parts.into_iter().next())
            .map(|part| part.text)
            .ok_or(NLQError::EmptyResponse)
    }
}

#[async_trait]
impl CompletionService for NLQClient {
    async fn complete(&self, prompt: &str, params: &GenerationParams) -> NLQResult<String> {
        match self.config.provider {
            LLMProvider::OpenAI => self.openai_chat(prompt, params).await,
            LLMProvider::Ollama => self.ollama_chat(prompt, params).await,
            LLMProvider::Gemini => self.gemini_chat(prompt, params).await,
            LLMProvider::Mock => Ok(MOCK_COMPLETION.to_string()),
        }
    }

    fn is_offline(&self) -> bool {
        self.config.provider == LLMProvider::Mock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: LLMProvider) -> NLQConfig {
        NLQConfig {
            provider,
            ..NLQConfig::default()
        }
    }

    #[test]
    fn test_default_base_urls() {
        let client = NLQClient::new(&config(LLMProvider::Ollama)).unwrap();
        assert_eq!(client.api_base_url, "http://localhost:11434");

        let mut custom = config(LLMProvider::OpenAI);
        custom.api_base_url = Some("http://127.0.0.1:8080/v1".to_string());
        let client = NLQClient::new(&custom).unwrap();
        assert_eq!(client.api_base_url, "http://127.0.0.1:8080/v1");
    }

    #[tokio::test]
    async fn test_openai_without_key_is_config_error() {
        let client = NLQClient::new(&config(LLMProvider::OpenAI)).unwrap();
        let err = client
            .complete("question", &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, NLQError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_mock_provider_is_offline() {
        let client = NLQClient::new(&config(LLMProvider::Mock)).unwrap();
        assert!(client.is_offline());
        let text = client
            .complete("anything", &GenerationParams::default())
            .await
            .unwrap();
        assert_eq!(text, MOCK_COMPLETION);
    }
}
