use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::{
    config::AppConfig,
    error::{AppError, Result},
    llm::TextGenerator,
    store::DocumentStore,
    vector_store::SemanticIndex,
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<DocumentStore>,
    /// `None` si no hay proveedor de embeddings configurado.
    pub index: Option<Arc<SemanticIndex>>,
    pub generator: Option<Arc<dyn TextGenerator>>,
    pub status: Arc<Mutex<Status>>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl AppState {
    pub fn index(&self) -> Result<&SemanticIndex> {
        self.index.as_deref().ok_or(AppError::IndexUninitialized)
    }

    pub fn generator(&self) -> Result<&dyn TextGenerator> {
        self.generator
            .as_deref()
            .ok_or_else(|| AppError::Provider("no text generation provider is configured".to_string()))
    }
}

/// Estado de la ingesta en segundo plano.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Status {
    pub pending: usize,
    pub indexed: u64,
    pub failed: u64,
    pub message: String,
}
