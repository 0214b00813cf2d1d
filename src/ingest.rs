//! Ingesta en segundo plano de los ficheros recién subidos en el índice semántico.
//!
//! La respuesta de la subida nunca espera al proveedor de embeddings: los
//! ficheros se encolan en una tarea `tokio` y cualquier fallo se registra y se
//! contabiliza en el `Status` compartido, sin propagarse al cliente.

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::{
    app_state::Status,
    store::StoredFile,
    vector_store::{IngestOutcome, SemanticIndex},
};

/// Resumen de los resultados de una operación de ingesta.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestionSummary {
    pub files_scanned: u32,
    pub files_ingested: u32,
    pub files_skipped: u32,
    pub files_failed: u32,
}

/// Implementa cómo se mostrará el resumen como texto.
impl std::fmt::Display for IngestionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Resumen: {} ficheros escaneados, {} indexados, {} omitidos, {} con error.",
            self.files_scanned, self.files_ingested, self.files_skipped, self.files_failed
        )
    }
}

/// Lanza la ingesta de `files` en una tarea independiente.
pub fn spawn_ingestion(
    index: Arc<SemanticIndex>,
    status: Arc<Mutex<Status>>,
    files: Vec<StoredFile>,
) -> JoinHandle<IngestionSummary> {
    {
        let mut status = status.lock().unwrap();
        status.pending += files.len();
    }

    tokio::spawn(async move {
        let summary = ingest_files(&index, &status, &files).await;
        info!("Ingesta finalizada. {summary}");
        summary
    })
}

async fn ingest_files(
    index: &SemanticIndex,
    status_arc: &Arc<Mutex<Status>>,
    files: &[StoredFile],
) -> IngestionSummary {
    let mut summary = IngestionSummary::default();
    let total = files.len();

    for (position, file) in files.iter().enumerate() {
        summary.files_scanned += 1;
        let result = index.ingest(&file.absolute_path, &file.relative_path).await;

        let mut status = status_arc.lock().unwrap();
        status.pending = status.pending.saturating_sub(1);
        match result {
            Ok(IngestOutcome::Indexed { replaced }) => {
                summary.files_ingested += 1;
                status.indexed += 1;
                status.message = format!(
                    "[{}/{}] Indexado: {}{}",
                    position + 1,
                    total,
                    file.relative_path,
                    if replaced { " (reemplazado)" } else { "" }
                );
            }
            Ok(IngestOutcome::Skipped(reason)) => {
                summary.files_skipped += 1;
                warn!("Omitido {}: {reason}", file.relative_path);
                status.message = format!("[{}/{}] Omitido: {}", position + 1, total, file.relative_path);
            }
            Err(err) => {
                summary.files_failed += 1;
                status.failed += 1;
                error!("Error ingiriendo {}: {err}", file.relative_path);
                status.message = format!("ERROR en {}: {err}", file.relative_path);
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::{FailingEmbedder, HashEmbedder};
    use crate::llm::Embedder;
    use std::time::Duration;
    use tempfile::TempDir;

    fn stored(dir: &TempDir, relative: &str, text: &str) -> StoredFile {
        let absolute_path = dir.path().join(relative);
        std::fs::write(&absolute_path, text).unwrap();
        StoredFile {
            relative_path: relative.to_string(),
            absolute_path,
        }
    }

    async fn index_with(dir: &TempDir, embedder: Arc<dyn Embedder>) -> Arc<SemanticIndex> {
        Arc::new(
            SemanticIndex::initialize(
                embedder,
                dir.path().join("index.json"),
                5,
                Duration::from_secs(5),
            )
            .await
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn background_ingestion_updates_status() {
        let dir = TempDir::new().unwrap();
        let index = index_with(&dir, Arc::new(HashEmbedder)).await;
        let status = Arc::new(Mutex::new(Status::default()));
        let files = vec![
            stored(&dir, "a.txt", "alpha"),
            stored(&dir, "empty.txt", ""),
        ];

        let summary = spawn_ingestion(index.clone(), status.clone(), files)
            .await
            .unwrap();

        assert_eq!(summary.files_ingested, 1);
        assert_eq!(summary.files_skipped, 1);
        let status = status.lock().unwrap().clone();
        assert_eq!(status.pending, 0);
        assert_eq!(status.indexed, 1);
        assert_eq!(index.len().await, 1);
    }

    #[tokio::test]
    async fn provider_errors_are_counted_not_propagated() {
        let dir = TempDir::new().unwrap();
        let index = index_with(&dir, Arc::new(FailingEmbedder)).await;
        let status = Arc::new(Mutex::new(Status::default()));

        let summary = spawn_ingestion(index, status.clone(), vec![stored(&dir, "a.txt", "alpha")])
            .await
            .unwrap();

        assert_eq!(summary.files_failed, 1);
        let status = status.lock().unwrap().clone();
        assert_eq!(status.failed, 1);
        assert!(status.message.starts_with("ERROR en a.txt"));
    }
}
