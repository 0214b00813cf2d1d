//! Extracción de texto plano de los ficheros almacenados.
//!
//! La selección es puramente por extensión (sensible a mayúsculas): `.docx`,
//! `.pdf` y, para todo lo demás, texto UTF-8 con reemplazo de bytes inválidos.

use std::{
    ffi::OsStr,
    io::{Cursor, Read},
    path::Path,
    sync::OnceLock,
};

use regex::Regex;

use crate::error::ExtractionError;

/// Extensiones de texto que `summarize` acepta además de DOCX y PDF.
const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "csv", "json", "log", "rs", "toml", "html", "css", "js", "xml", "yaml", "yml",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extractor {
    Docx,
    Pdf,
    PlainText,
}

impl Extractor {
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(OsStr::to_str) {
            Some("docx") => Self::Docx,
            Some("pdf") => Self::Pdf,
            _ => Self::PlainText,
        }
    }

    pub async fn extract(self, path: &Path) -> Result<String, ExtractionError> {
        let bytes = tokio::fs::read(path).await?;
        match self {
            Self::PlainText => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Self::Docx => tokio::task::spawn_blocking(move || docx_text(&bytes))
                .await
                .map_err(|e| ExtractionError::Docx(e.to_string()))?,
            // pdf-extract puede entrar en pánico con PDFs corruptos; el JoinError lo recoge.
            Self::Pdf => tokio::task::spawn_blocking(move || {
                pdf_extract::extract_text_from_mem(&bytes)
                    .map_err(|e| ExtractionError::Pdf(e.to_string()))
            })
            .await
            .map_err(|e| ExtractionError::Pdf(e.to_string()))?,
        }
    }
}

/// Extrae el texto de `path` con el extractor que corresponda a su extensión.
pub async fn extract(path: &Path) -> Result<String, ExtractionError> {
    Extractor::for_path(path).extract(path).await
}

/// Indica si el documento puede resumirse (DOCX, PDF o una extensión de texto conocida).
pub fn is_summarizable(path: &Path) -> bool {
    match path.extension().and_then(OsStr::to_str) {
        Some("docx") | Some("pdf") => true,
        Some(ext) => TEXT_EXTENSIONS.contains(&ext.to_lowercase().as_str()),
        None => false,
    }
}

fn docx_text(bytes: &[u8]) -> Result<String, ExtractionError> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| ExtractionError::Docx(e.to_string()))?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractionError::Docx(e.to_string()))?
        .read_to_string(&mut xml)
        .map_err(|e| ExtractionError::Docx(e.to_string()))?;
    Ok(document_xml_to_text(&xml))
}

/// Un párrafo por línea, concatenando los runs `<w:t>` de cada `<w:p>`.
fn document_xml_to_text(xml: &str) -> String {
    static PARAGRAPH: OnceLock<Regex> = OnceLock::new();
    static RUN_TEXT: OnceLock<Regex> = OnceLock::new();
    let paragraph = PARAGRAPH.get_or_init(|| {
        // `<w:p .../>` es un párrafo vacío; la apertura no puede terminar en `/`.
        Regex::new(r"(?s)<w:p(?:\s[^>]*)?/>|<w:p(?:\s(?:[^>]*[^/>])?)?>(.*?)</w:p>")
            .expect("valid paragraph regex")
    });
    let run_text = RUN_TEXT
        .get_or_init(|| Regex::new(r"<w:t(?:\s[^>]*)?>([^<]*)</w:t>").expect("valid run regex"));

    paragraph
        .captures_iter(xml)
        .map(|p| {
            let body = p.get(1).map_or("", |m| m.as_str());
            run_text
                .captures_iter(body)
                .map(|t| unescape_xml(&t[1]))
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
