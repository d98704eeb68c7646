use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::provider::LlmProvider;
use super::types::ChatRequest;
use crate::errors::CoreError;

#[derive(Clone)]
pub struct OpenAiProvider {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl OpenAiProvider {
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, CoreError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| CoreError::upstream("llm", err))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.client.post(url);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn health_check(&self) -> Result<bool, CoreError> {
        let url = format!("{}/v1/models", self.base_url);
        let mut builder = self.client.get(&url);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        match builder.send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    async fn chat(&self, request: ChatRequest, model_id: &str) -> Result<String, CoreError> {
        let mut body = json!({
            "model": model_id,
            "messages": request.messages,
            "stream": false,
        });

        if let Some(obj) = body.as_object_mut() {
            if let Some(t) = request.temperature {
                obj.insert("temperature".to_string(), json!(t));
            }
            if let Some(t) = request.max_tokens {
                obj.insert("max_tokens".to_string(), json!(t));
            }
        }

        let res = self
            .post("/v1/chat/completions")
            .json(&body)
            .send()
            .await
            .map_err(|err| CoreError::upstream("chat", err))?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(CoreError::Upstream {
                service: "chat",
                detail: format!("{status}: {text}"),
            });
        }

        let payload: Value = res
            .json()
            .await
            .map_err(|err| CoreError::upstream("chat", err))?;

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| CoreError::Upstream {
                service: "chat",
                detail: "response carried no message content".to_string(),
            })?;

        Ok(content.to_string())
    }

    async fn embed(
        &self,
        inputs: &[String],
        model_id: &str,
    ) -> Result<Vec<Vec<f32>>, CoreError> {
        let body = json!({
            "model": model_id,
            "input": inputs,
        });

        let res = self
            .post("/v1/embeddings")
            .json(&body)
            .send()
            .await
            .map_err(|err| CoreError::upstream("embedding", err))?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(CoreError::Upstream {
                service: "embedding",
                detail: format!("{status}: {text}"),
            });
        }

        let payload: Value = res
            .json()
            .await
            .map_err(|err| CoreError::upstream("embedding", err))?;

        let data = payload["data"]
            .as_array()
            .ok_or_else(|| CoreError::Upstream {
                service: "embedding",
                detail: "response carried no data array".to_string(),
            })?;

        let mut embeddings = Vec::with_capacity(data.len());
        for item in data {
            let vals = item["embedding"]
                .as_array()
                .ok_or_else(|| CoreError::Upstream {
                    service: "embedding",
                    detail: "response item carried no embedding".to_string(),
                })?;
            let vec: Vec<f32> = vals
                .iter()
                .filter_map(|v| v.as_f64().map(|f| f as f32))
                .collect();
            embeddings.push(vec);
        }

        if embeddings.len() != inputs.len() {
            return Err(CoreError::Upstream {
                service: "embedding",
                detail: format!(
                    "expected {} vectors, got {}",
                    inputs.len(),
                    embeddings.len()
                ),
            });
        }

        Ok(embeddings)
    }
}
