//! Consultas RAG sobre el índice semántico.
//!
//! Flujo:
//!   1. Búsqueda top-k en el índice (`SemanticIndex::query`).
//!   2. `search`: se proyecta cada resultado a su identidad de fichero.
//!   3. `answer`: los dos primeros resultados forman el contexto y el LLM responde.
//!   4. `summarize`: se extrae el fichero (máx. 5000 caracteres) y el LLM lo resume.

use std::time::Duration;

use tracing::{debug, info};

use crate::{
    error::{AppError, ExtractionError, Result},
    extract,
    llm::{with_timeout, TextGenerator},
    store::DocumentStore,
    vector_store::SemanticIndex,
};

/// Número de resultados cuyo texto se concatena como contexto de `answer`.
pub const CONTEXT_HITS: usize = 2;
/// Máximo de caracteres del documento que se envían a resumir.
pub const SUMMARY_CHAR_LIMIT: usize = 5000;

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

pub const NO_RESULTS_ANSWER: &str =
    "No relevant information was found in the stored documents to answer this question.";

const ANSWER_PREAMBLE: &str = r#"
You are an assistant that answers questions about the user's stored documents.
Only use the information provided in the context.
If the context does not contain the answer, say explicitly that you do not know.
"#;

const SUMMARY_PREAMBLE: &str = r#"
You summarize documents. Write a concise summary of the main points of the
document provided by the user, in the same language as the document.
"#;

/// Identidades de los ficheros más similares a `query`, en orden de similitud.
/// No se eliminan nombres repetidos.
pub async fn search(index: &SemanticIndex, query: &str) -> Result<Vec<String>> {
    let hits = index.query(query).await?;
    for hit in &hits {
        debug!("Búsqueda '{query}': {} ({:.3})", hit.metadata.filename, hit.score);
    }
    Ok(hits.into_iter().map(|hit| hit.metadata.path).collect())
}

/// Responde a `query` usando como contexto el texto de los primeros resultados.
pub async fn answer(
    index: &SemanticIndex,
    generator: &dyn TextGenerator,
    timeout: Duration,
    query: &str,
) -> Result<String> {
    let hits = index.query(query).await?;
    if hits.is_empty() {
        return Ok(NO_RESULTS_ANSWER.to_string());
    }

    let context = hits
        .iter()
        .take(CONTEXT_HITS)
        .map(|hit| hit.content.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR);

    let prompt = build_answer_prompt(&context, query);
    with_timeout(timeout, "answer generation", generator.generate(ANSWER_PREAMBLE, &prompt)).await
}

/// Resume el documento almacenado en `relative`.
pub async fn summarize(
    store: &DocumentStore,
    generator: &dyn TextGenerator,
    timeout: Duration,
    relative: &str,
) -> Result<String> {
    let (normalized, absolute) = store.resolve(relative).await?;
    if !extract::is_summarizable(&absolute) {
        return Err(ExtractionError::Unsupported(normalized).into());
    }
    if !absolute.is_file() {
        return Err(AppError::NotFound);
    }

    let text = extract::extract(&absolute).await?;
    let excerpt: String = text.chars().take(SUMMARY_CHAR_LIMIT).collect();
    if excerpt.trim().is_empty() {
        return Err(AppError::InvalidRequest(format!(
            "{normalized} has no extractable text"
        )));
    }

    info!("Resumiendo {normalized} ({} caracteres)", excerpt.chars().count());
    with_timeout(timeout, "summary generation", generator.generate(SUMMARY_PREAMBLE, &excerpt)).await
}

fn build_answer_prompt(context: &str, query: &str) -> String {
    format!(
        "Context:\n{context}\n\nQuestion:\n{query}\n\nAnswer the question using only the context above."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::{HashEmbedder, RecordingGenerator};
    use std::sync::Arc;
    use tempfile::TempDir;

    const TIMEOUT: Duration = Duration::from_secs(5);

    async fn seeded_index(dir: &TempDir, docs: &[(&str, &str)]) -> SemanticIndex {
        let index = SemanticIndex::initialize(
            Arc::new(HashEmbedder),
            dir.path().join("index.json"),
            5,
            TIMEOUT,
        )
        .await
        .unwrap();
        for (name, text) in docs {
            let path = dir.path().join(name);
            std::fs::write(&path, text).unwrap();
            index.ingest(&path, name).await.unwrap();
        }
        index
    }

    #[tokio::test]
    async fn search_projects_hits_to_identities() {
        let dir = TempDir::new().unwrap();
        let index = seeded_index(
            &dir,
            &[
                ("rust.txt", "ownership and borrowing in rust"),
                ("cake.txt", "chocolate cake recipe"),
            ],
        )
        .await;

        let names = search(&index, "rust borrowing").await.unwrap();
        assert_eq!(names.len(), 2);
        assert_eq!(names[0], "rust.txt");
    }

    #[tokio::test]
    async fn answer_uses_top_two_hits_as_context() {
        let dir = TempDir::new().unwrap();
        let index = seeded_index(
            &dir,
            &[
                ("one.txt", "alpha alpha alpha"),
                ("two.txt", "alpha alpha beta"),
                ("three.txt", "gamma delta epsilon"),
            ],
        )
        .await;
        let generator = RecordingGenerator::default();

        let reply = answer(&index, &generator, TIMEOUT, "alpha").await.unwrap();
        assert!(reply.starts_with("generated:"));

        let prompts = generator.prompts.lock().unwrap();
        let (_, prompt) = &prompts[0];
        assert!(prompt.contains("alpha alpha alpha"));
        assert!(prompt.contains("alpha alpha beta"));
        assert!(!prompt.contains("gamma delta epsilon"));
        assert!(prompt.ends_with("Answer the question using only the context above."));
    }

    #[tokio::test]
    async fn answer_without_hits_skips_provider() {
        let dir = TempDir::new().unwrap();
        let index = seeded_index(&dir, &[]).await;
        let generator = RecordingGenerator::default();

        let reply = answer(&index, &generator, TIMEOUT, "anything").await.unwrap();
        assert_eq!(reply, NO_RESULTS_ANSWER);
        assert!(generator.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn summarize_caps_text_and_rejects_unsupported() {
        let dir = TempDir::new().unwrap();
        let store = DocumentStore::new();
        store.configure(dir.path()).await.unwrap();
        store.upload("docs/long.txt", "x".repeat(9000).as_bytes()).await.unwrap();
        store.upload("img/photo.png", b"\x89PNG").await.unwrap();
        let generator = RecordingGenerator::default();

        let summary = summarize(&store, &generator, TIMEOUT, "docs/long.txt").await.unwrap();
        assert_eq!(summary, format!("generated:{SUMMARY_CHAR_LIMIT}"));

        let rejected = summarize(&store, &generator, TIMEOUT, "img/photo.png").await;
        assert!(matches!(
            rejected,
            Err(AppError::Extraction(ExtractionError::Unsupported(_)))
        ));
        assert!(matches!(
            summarize(&store, &generator, TIMEOUT, "docs/missing.txt").await,
            Err(AppError::NotFound)
        ));
        assert_eq!(generator.prompts.lock().unwrap().len(), 1);
    }
}
