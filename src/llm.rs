//! Abstracción sobre Rig para trabajar con distintos proveedores de LLM.
//! De momento se implementa OpenAI; Gemini/Ollama quedan preparados para el futuro.
//!
//! El resto de la aplicación sólo ve los traits [`Embedder`] y [`TextGenerator`],
//! lo que permite sustituir el proveedor en los tests.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use rig::completion::Prompt;
use rig::embeddings::EmbeddingModel; // <- para .embed_texts

use crate::{
    config::{AppConfig, LlmProvider},
    error::{AppError, Result},
};

/// Genera embeddings para una lista de textos (un vector por texto, en orden).
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>>;
}

/// Colaborador de generación de texto (chat completion sin streaming).
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, preamble: &str, prompt: &str) -> Result<String>;
}

/// Ejecuta una llamada al proveedor con un límite de tiempo.
pub async fn with_timeout<T, F>(limit: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Provider(format!(
            "{operation} timed out after {}s",
            limit.as_secs()
        ))),
    }
}

/// Gestor de LLMs y embeddings.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub embedding_model: String,
    pub chat_model: String,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    ///
    /// Falla si el proveedor elegido no tiene credenciales en el entorno.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        if matches!(cfg.llm_provider, LlmProvider::OpenAI)
            && std::env::var("OPENAI_API_KEY").map_or(true, |k| k.trim().is_empty())
        {
            return Err(AppError::Configuration(
                "OPENAI_API_KEY is not set".to_string(),
            ));
        }

        Ok(Self {
            provider: cfg.llm_provider.clone(),
            embedding_model: cfg.llm_embedding_model.clone(),
            chat_model: cfg.llm_chat_model.clone(),
        })
    }

    async fn embed_with_openai(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>> {
        use rig::providers::openai::{self, TEXT_EMBEDDING_3_SMALL};
        // Trait para client.embedding_model(...)
        use rig::client::EmbeddingsClient as _;

        let client = openai::Client::from_env();

        // Modelo de embeddings: config o default
        let model_name = if self.embedding_model.is_empty() {
            TEXT_EMBEDDING_3_SMALL
        } else {
            self.embedding_model.as_str()
        };
        let embedding_model = client.embedding_model(model_name);

        let expected = texts.len();
        let embeddings = embedding_model
            .embed_texts(texts)
            .await
            .map_err(|e| AppError::Provider(e.to_string()))?;

        if embeddings.len() != expected {
            return Err(AppError::Provider(format!(
                "received {} embeddings for {} texts",
                embeddings.len(),
                expected
            )));
        }

        Ok(embeddings.into_iter().map(|e| e.vec).collect())
    }

    async fn generate_with_openai(&self, preamble: &str, prompt: &str) -> Result<String> {
        use rig::providers::openai;
        // Trait para client.agent(...)
        use rig::client::CompletionClient as _;

        let client = openai::Client::from_env();

        // Modelo de chat por defecto si no se ha configurado otro
        let model_name = if self.chat_model.is_empty() {
            "gpt-4o-mini"
        } else {
            self.chat_model.as_str()
        };

        let agent = client.agent(model_name).preamble(preamble).build();

        agent
            .prompt(prompt)
            .await
            .map_err(|e| AppError::Provider(e.to_string()))
    }
}

#[async_trait]
impl Embedder for LlmManager {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>> {
        match self.provider {
            LlmProvider::OpenAI => self.embed_with_openai(texts).await,
            ref other => Err(AppError::Provider(format!(
                "LLM provider {other:?} is not implemented for embeddings"
            ))),
        }
    }
}

#[async_trait]
impl TextGenerator for LlmManager {
    async fn generate(&self, preamble: &str, prompt: &str) -> Result<String> {
        match self.provider {
            LlmProvider::OpenAI => self.generate_with_openai(preamble, prompt).await,
            ref other => Err(AppError::Provider(format!(
                "LLM provider {other:?} is not implemented for chat"
            ))),
        }
    }
}
