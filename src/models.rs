//! Modelos de dominio (ficheros almacenados, registros del índice y resultados).

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identidad de un fichero dentro del índice semántico.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Ruta relativa normalizada (`carpeta/sub/fichero.pdf`).
    pub path: String,
    pub filename: String,
}

/// Un registro del índice: un embedding por fichero ingerido.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRecord {
    pub id: String,
    pub metadata: RecordMetadata,
    pub content: String,
    pub embedding: Vec<f64>,
    pub created_at: DateTime<Utc>,
}

/// Resultado de una consulta top-k, ordenado por similitud descendente.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub content: String,
    pub metadata: RecordMetadata,
    pub score: f64,
}

/// Fichero de una subida por lotes: ruta relativa dentro del lote y contenido.
#[derive(Debug, Clone)]
pub struct BatchEntry {
    pub relative_path: String,
    pub bytes: Vec<u8>,
}

/// Resultado individual de una subida por lotes.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub filename: String,
    /// Ruta final relativa a la raíz; `None` si la entrada falló.
    pub path: Option<String>,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub absolute_path: Option<PathBuf>,
}

impl BatchOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Estado de la raíz de subida para `GET /config`.
#[derive(Debug, Clone, Serialize)]
pub struct UploadRootStatus {
    pub upload_dir: Option<PathBuf>,
    pub upload_dir_exists: bool,
}
