//! Índice semántico persistido en disco: un embedding por fichero ingerido.
//!
//! API pública:
//!   - `SemanticIndex::initialize(embedder, ruta, k, timeout)`
//!   - `ingest(path, identidad)` / `retract(identidad)`
//!   - `query(texto)` → top-k por similitud coseno, de mayor a menor.
//!
//! El índice se guarda como JSON; cada escritura va a un fichero temporal que
//! luego se renombra, así un fallo nunca deja el índice a medio escribir.
//!
//! Cada ingesta recibe una generación antes de leer el fichero. Al confirmar,
//! bajo el cerrojo de escritura, se descarta si otra ingesta (o un `retract`)
//! más reciente ya ha escrito esa identidad, o si el fichero ya no existe.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    extract,
    llm::{with_timeout, Embedder},
    models::{IndexRecord, RecordMetadata, SearchHit},
};

/// Máximo de caracteres que se envían al modelo de embeddings por documento.
const EMBED_CHAR_LIMIT: usize = 8000;

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedIndex {
    records: Vec<IndexRecord>,
}

/// Resultado de una ingesta individual.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Indexed { replaced: bool },
    Skipped(String),
}

#[derive(Default)]
struct IndexState {
    records: Vec<IndexRecord>,
    /// Última generación escrita (ingesta o retirada) por identidad.
    committed: HashMap<String, u64>,
}

pub struct SemanticIndex {
    embedder: Arc<dyn Embedder>,
    persistence_path: PathBuf,
    top_k: usize,
    timeout: Duration,
    next_generation: AtomicU64,
    state: RwLock<IndexState>,
}

impl SemanticIndex {
    /// Carga los registros existentes (si los hay) y fija `k` para las consultas.
    pub async fn initialize(
        embedder: Arc<dyn Embedder>,
        persistence_path: impl Into<PathBuf>,
        top_k: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let persistence_path = persistence_path.into();
        let records = match tokio::fs::read_to_string(&persistence_path).await {
            Ok(raw) => serde_json::from_str::<PersistedIndex>(&raw)?.records,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        info!(
            "Índice semántico cargado desde {} ({} registros, k={top_k})",
            persistence_path.display(),
            records.len()
        );

        Ok(Self {
            embedder,
            persistence_path,
            top_k: top_k.max(1),
            timeout,
            next_generation: AtomicU64::new(0),
            state: RwLock::new(IndexState {
                records,
                committed: HashMap::new(),
            }),
        })
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    /// Extrae el texto de `path`, lo embebe y lo guarda bajo `identity`.
    ///
    /// Si ya había un registro para la misma identidad se reemplaza, salvo que
    /// una escritura posterior de esa identidad se haya confirmado antes.
    pub async fn ingest(&self, path: &Path, identity: &str) -> Result<IngestOutcome> {
        let generation = self.begin_generation();
        let text = extract::extract(path).await?;
        if text.trim().is_empty() {
            warn!("Fichero vacío o sin texto útil: {identity}");
            return Ok(IngestOutcome::Skipped("no extractable text".to_string()));
        }

        let content: String = text.chars().take(EMBED_CHAR_LIMIT).collect();
        let embedding = self.embed_one(content.clone(), "document embedding").await?;

        let record = IndexRecord {
            id: Uuid::new_v4().to_string(),
            metadata: RecordMetadata {
                path: identity.to_string(),
                filename: identity.rsplit('/').next().unwrap_or(identity).to_string(),
            },
            content,
            embedding,
            created_at: Utc::now(),
        };

        let mut state = self.state.write().await;
        if state.committed.get(identity).is_some_and(|&c| c > generation) {
            debug!("{identity} ya tiene una versión más reciente en el índice; se descarta");
            return Ok(IngestOutcome::Skipped("superseded by a newer version".to_string()));
        }
        // El fichero pudo borrarse mientras esperábamos al proveedor.
        if !path.exists() {
            debug!("{identity} desapareció durante la ingesta; se descarta");
            return Ok(IngestOutcome::Skipped("file removed during ingestion".to_string()));
        }

        let mut next: Vec<IndexRecord> = state
            .records
            .iter()
            .filter(|r| r.metadata.path != identity)
            .cloned()
            .collect();
        let replaced = next.len() != state.records.len();
        next.push(record);

        self.persist(&next).await?;
        state.records = next;
        state.committed.insert(identity.to_string(), generation);

        Ok(IngestOutcome::Indexed { replaced })
    }

    /// Elimina el registro de `identity`. Devuelve cuántos registros se quitaron.
    /// Las ingestas de `identity` que sigan en curso quedan invalidadas.
    pub async fn retract(&self, identity: &str) -> Result<usize> {
        let generation = self.begin_generation();
        let mut state = self.state.write().await;
        state.committed.insert(identity.to_string(), generation);

        let next: Vec<IndexRecord> = state
            .records
            .iter()
            .filter(|r| r.metadata.path != identity)
            .cloned()
            .collect();
        let removed = state.records.len() - next.len();
        if removed == 0 {
            return Ok(0);
        }

        self.persist(&next).await?;
        state.records = next;
        Ok(removed)
    }

    /// Devuelve los `k` registros más similares a `text`, de mayor a menor similitud.
    pub async fn query(&self, text: &str) -> Result<Vec<SearchHit>> {
        if text.trim().is_empty() {
            return Err(AppError::InvalidRequest("query must not be empty".to_string()));
        }
        let query_vec = self.embed_one(text.to_string(), "query embedding").await?;

        let state = self.state.read().await;
        let mut scored: Vec<(f64, &IndexRecord)> = state
            .records
            .iter()
            .map(|r| (cosine_similarity(&query_vec, &r.embedding), r))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(self.top_k)
            .map(|(score, record)| SearchHit {
                content: record.content.clone(),
                metadata: record.metadata.clone(),
                score,
            })
            .collect())
    }

    fn begin_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn embed_one(&self, text: String, operation: &str) -> Result<Vec<f64>> {
        let embeddings = with_timeout(self.timeout, operation, self.embedder.embed(vec![text])).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Provider(format!("{operation} returned no vector")))
    }

    async fn persist(&self, records: &[IndexRecord]) -> Result<()> {
        if let Some(parent) = self.persistence_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        #[derive(Serialize)]
        struct PersistedRef<'a> {
            records: &'a [IndexRecord],
        }

        let json = serde_json::to_vec(&PersistedRef { records })?;
        let tmp_path = self.persistence_path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, &self.persistence_path).await?;
        Ok(())
    }
}

fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}
