// Módulos de la aplicación
mod api;
mod app_state;
mod config;
mod error;
mod extract;
mod ingest;
mod llm;
mod models;
mod paths;
mod rag;
mod store;
mod vector_store;

use crate::app_state::{AppState, Status};
use crate::llm::TextGenerator;
use crate::store::DocumentStore;
use crate::vector_store::SemanticIndex;
use anyhow::Context;
use axum::http::HeaderValue;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().context("Error al cargar la configuración")?;

    // 3. Almacén de documentos (la raíz puede fijarse más tarde con /set-config)
    let store = Arc::new(DocumentStore::new());
    if let Some(upload_dir) = &cfg.upload_dir {
        store
            .configure(upload_dir)
            .await
            .context("Error configurando UPLOAD_DIR")?;
    }

    // 4. Inicializar gestor de LLMs e índice semántico
    let (index, generator): (Option<Arc<SemanticIndex>>, Option<Arc<dyn TextGenerator>>) =
        match llm::LlmManager::from_config(&cfg) {
            Ok(manager) => {
                let manager = Arc::new(manager);
                let index = SemanticIndex::initialize(
                    manager.clone(),
                    &cfg.index_path,
                    cfg.top_k,
                    cfg.provider_timeout,
                )
                .await
                .context("Error cargando el índice semántico")?;
                (Some(Arc::new(index)), Some(manager as Arc<dyn TextGenerator>))
            }
            Err(e) => {
                warn!("Búsqueda semántica deshabilitada: {e}");
                (None, None)
            }
        };

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 5. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        store,
        index,
        generator,
        status: Arc::new(Mutex::new(Status {
            message: "Servidor listo.".to_string(),
            ..Status::default()
        })),
        shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
    };

    // 6. Configurar el router de la API con CORS restringido al frontend local
    let origin = HeaderValue::from_str(&cfg.cors_origin)
        .with_context(|| format!("CORS_ORIGIN inválido: {}", cfg.cors_origin))?;
    let app = api::create_router(app_state.clone()).layer(
        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    // 7. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {server_addr}"))?;
    info!("🚀 Servidor escuchando en http://{}", server_addr);

    // Configurar el apagado ordenado (endpoint /api/shutdown o Ctrl+C).
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown_rx => {}
                _ = tokio::signal::ctrl_c() => {}
            }
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .context("Error en el servidor HTTP")?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
