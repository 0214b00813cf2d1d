//! Carga y gestión de configuración de la aplicación (servidor, almacén, índice y LLM).

use std::{env, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{anyhow, Context, Result};

#[derive(Clone, Debug)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    /// Único origen autorizado por CORS (el frontend de desarrollo).
    pub cors_origin: String,
    /// Raíz de subida inicial; también puede fijarse después con `/set-config`.
    pub upload_dir: Option<PathBuf>,
    pub index_path: PathBuf,
    pub top_k: usize,
    pub provider_timeout: Duration,
    pub max_upload_bytes: usize,

    pub llm_provider: LlmProvider,
    pub llm_embedding_model: String,
    pub llm_chat_model: String,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:8000".to_string());
        let cors_origin =
            env::var("CORS_ORIGIN").unwrap_or_else(|_| "http://localhost:5173".to_string());

        let upload_dir = env::var("UPLOAD_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let index_path = match env::var("INDEX_PATH") {
            Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => default_index_path()?,
        };

        let top_k = parse_var("RAG_TOP_K", 5usize)?;
        if top_k == 0 {
            return Err(anyhow!("RAG_TOP_K debe ser mayor que 0"));
        }
        let provider_timeout = Duration::from_secs(parse_var("PROVIDER_TIMEOUT_SECS", 60u64)?);
        let max_upload_bytes = parse_var("MAX_UPLOAD_BYTES", 100 * 1024 * 1024usize)?;

        let llm_provider_str =
            env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;

        let llm_embedding_model = env::var("LLM_EMBEDDING_MODEL")
            .unwrap_or_else(|_| "text-embedding-3-small".to_string());
        let llm_chat_model =
            env::var("LLM_CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        Ok(Self {
            server_addr,
            cors_origin,
            upload_dir,
            index_path,
            top_k,
            provider_timeout,
            max_upload_bytes,
            llm_provider,
            llm_embedding_model,
            llm_chat_model,
        })
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            server_addr: "127.0.0.1:0".to_string(),
            cors_origin: "http://localhost:5173".to_string(),
            upload_dir: None,
            index_path: env::temp_dir().join("docvault-test-index.json"),
            top_k: 5,
            provider_timeout: Duration::from_secs(5),
            max_upload_bytes: 10 * 1024 * 1024,
            llm_provider: LlmProvider::OpenAI,
            llm_embedding_model: String::new(),
            llm_chat_model: String::new(),
        }
    }
}

fn default_index_path() -> Result<PathBuf> {
    let base = dirs::data_dir()
        .ok_or_else(|| anyhow!("No se pudo determinar el directorio de datos del usuario"))?;
    Ok(base.join("docvault").join("index.json"))
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("Valor inválido para {name}: {raw}")),
        _ => Ok(default),
    }
}
