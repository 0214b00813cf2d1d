//! Almacén jerárquico de documentos sobre el directorio de subida.
//!
//! La raíz vive dentro del propio `DocumentStore` (no en un global) y toda
//! operación que modifica el árbol (configurar, subir, borrar) se serializa con
//! un único mutex, de modo que un borrado que poda directorios vacíos nunca
//! compite con una subida al mismo directorio.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::{
    error::{AppError, Result},
    models::{BatchEntry, BatchOutcome, UploadRootStatus},
    paths,
};

/// Fichero recién escrito en el almacén.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub relative_path: String,
    pub absolute_path: PathBuf,
}

/// Contenido del fichero JSON que recibe `/set-config`.
#[derive(Debug, Deserialize)]
struct UploadDirConfig {
    upload_dir: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct DocumentStore {
    root: RwLock<Option<PathBuf>>,
    mutation: Mutex<()>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fija la raíz de subida, creándola si no existe (permisos 0o755 en Unix).
    pub async fn configure(&self, root: &Path) -> Result<PathBuf> {
        if !root.is_absolute() {
            return Err(AppError::Configuration(format!(
                "upload_dir must be an absolute path: {}",
                root.display()
            )));
        }

        let _guard = self.mutation.lock().await;
        tokio::fs::create_dir_all(root).await.map_err(|e| {
            AppError::Configuration(format!("cannot create {}: {e}", root.display()))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(root, std::fs::Permissions::from_mode(0o755))
                .await
                .map_err(|e| {
                    AppError::Configuration(format!(
                        "cannot set permissions on {}: {e}",
                        root.display()
                    ))
                })?;
        }

        *self.root.write().await = Some(root.to_path_buf());
        info!("Directorio de subida fijado en {}", root.display());
        Ok(root.to_path_buf())
    }

    /// Lee `{"upload_dir": "..."}` de `config_path` y reconfigura la raíz.
    pub async fn configure_from_file(&self, config_path: &Path) -> Result<PathBuf> {
        let raw = tokio::fs::read_to_string(config_path).await.map_err(|e| {
            AppError::Configuration(format!("cannot read {}: {e}", config_path.display()))
        })?;
        let parsed: UploadDirConfig = serde_json::from_str(&raw).map_err(|e| {
            AppError::Configuration(format!("invalid config file {}: {e}", config_path.display()))
        })?;
        let upload_dir = parsed
            .upload_dir
            .ok_or_else(|| AppError::Configuration("missing key 'upload_dir'".to_string()))?;

        self.configure(&upload_dir).await
    }

    /// Raíz actual; falla si no está configurada o ha desaparecido del disco.
    pub async fn root(&self) -> Result<PathBuf> {
        let root = self.root.read().await.clone().ok_or_else(|| {
            AppError::Configuration("upload directory is not configured".to_string())
        })?;
        if !root.is_dir() {
            return Err(AppError::Configuration(format!(
                "upload directory {} does not exist",
                root.display()
            )));
        }
        Ok(root)
    }

    pub async fn status(&self) -> UploadRootStatus {
        let upload_dir = self.root.read().await.clone();
        let upload_dir_exists = upload_dir.as_deref().is_some_and(Path::is_dir);
        UploadRootStatus {
            upload_dir,
            upload_dir_exists,
        }
    }

    /// Resuelve una ruta relativa de fichero sin tocar el disco más allá de la comprobación de seguridad.
    pub async fn resolve(&self, relative: &str) -> Result<(String, PathBuf)> {
        let root = self.root().await?;
        paths::resolve_file(&root, relative)
    }

    /// Escribe `bytes` en `relative`, creando los directorios intermedios.
    /// Si el fichero existe se sobrescribe.
    pub async fn upload(&self, relative: &str, bytes: &[u8]) -> Result<StoredFile> {
        let _guard = self.mutation.lock().await;
        let root = self.root().await?;
        Self::write_file(&root, relative, bytes).await
    }

    /// Sube varios ficheros bajo `target_subpath`. Un fallo no deshace los anteriores.
    pub async fn upload_batch(
        &self,
        entries: Vec<BatchEntry>,
        target_subpath: &str,
    ) -> Result<Vec<BatchOutcome>> {
        let _guard = self.mutation.lock().await;
        let root = self.root().await?;
        let prefix = paths::normalize_relative(target_subpath)?;

        let mut outcomes = Vec::with_capacity(entries.len());
        for entry in entries {
            let filename = entry.relative_path.replace('\\', "/");
            let relative = if prefix.is_empty() {
                filename.clone()
            } else {
                format!("{prefix}/{filename}")
            };

            let outcome = match Self::write_file(&root, &relative, &entry.bytes).await {
                Ok(stored) => BatchOutcome {
                    filename,
                    path: Some(stored.relative_path),
                    status: "success",
                    error: None,
                    absolute_path: Some(stored.absolute_path),
                },
                Err(e) => BatchOutcome {
                    filename,
                    path: None,
                    status: "error",
                    error: Some(e.to_string()),
                    absolute_path: None,
                },
            };
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    pub async fn download(&self, relative: &str) -> Result<(String, Vec<u8>)> {
        let root = self.root().await?;
        let (normalized, absolute) = paths::resolve_file(&root, relative)?;
        if !absolute.is_file() {
            return Err(AppError::NotFound);
        }
        let bytes = tokio::fs::read(&absolute).await.map_err(not_found_or_io)?;
        Ok((normalized, bytes))
    }

    /// Borra un fichero y poda los directorios que queden vacíos hasta la raíz.
    pub async fn delete(&self, relative: &str) -> Result<String> {
        let _guard = self.mutation.lock().await;
        let root = self.root().await?;
        let (normalized, absolute) = paths::resolve_file(&root, relative)?;
        if !absolute.is_file() {
            return Err(AppError::NotFound);
        }

        tokio::fs::remove_file(&absolute)
            .await
            .map_err(not_found_or_io)?;
        // El fichero ya no existe: un fallo al podar no invalida el borrado.
        match paths::prune_empty_ancestors(&root, &absolute) {
            Ok(pruned) => {
                info!("Fichero borrado: {normalized} ({pruned} directorios vacíos eliminados)")
            }
            Err(e) => warn!(
                "Fichero borrado: {normalized}, pero no se pudieron podar sus directorios: {e}"
            ),
        }
        Ok(normalized)
    }

    /// Hijos inmediatos de `relative`: carpetas (con `/` final) antes que ficheros,
    /// y dentro de cada grupo orden alfabético sin distinguir mayúsculas.
    ///
    /// Un directorio inexistente devuelve una lista vacía.
    pub async fn list(&self, relative: &str) -> Result<Vec<String>> {
        let root = self.root().await?;
        let (_, absolute) = paths::resolve(&root, relative)?;
        if !absolute.is_dir() {
            debug!("Listado de un directorio inexistente: {}", absolute.display());
            return Ok(Vec::new());
        }

        let mut entries: Vec<(bool, String)> = Vec::new();
        let mut reader = tokio::fs::read_dir(&absolute).await?;
        while let Some(entry) = reader.next_entry().await? {
            let Ok(metadata) = tokio::fs::metadata(entry.path()).await else {
                continue;
            };
            let name = entry.file_name().to_string_lossy().to_string();
            entries.push((metadata.is_dir(), name));
        }

        sort_listing(&mut entries);
        Ok(entries
            .into_iter()
            .map(|(is_dir, name)| if is_dir { format!("{name}/") } else { name })
            .collect())
    }

    async fn write_file(root: &Path, relative: &str, bytes: &[u8]) -> Result<StoredFile> {
        let (normalized, absolute) = paths::resolve_file(root, relative)?;
        if absolute.is_dir() {
            return Err(AppError::InvalidRequest(format!(
                "{normalized} is an existing directory"
            )));
        }

        paths::ensure_parent_dirs(&absolute)?;
        tokio::fs::write(&absolute, bytes).await?;
        debug!("Escritos {} bytes en {normalized}", bytes.len());

        Ok(StoredFile {
            relative_path: normalized,
            absolute_path: absolute,
        })
    }
}

fn sort_listing(entries: &mut [(bool, String)]) {
    entries.sort_by(|(a_dir, a_name), (b_dir, b_name)| {
        b_dir
            .cmp(a_dir)
            .then_with(|| a_name.to_lowercase().cmp(&b_name.to_lowercase()))
            .then_with(|| a_name.cmp(b_name))
    });
}

fn not_found_or_io(err: std::io::Error) -> AppError {
    if err.kind() == std::io::ErrorKind::NotFound {
        AppError::NotFound
    } else {
        AppError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio_test::assert_ok;

    async fn configured_store() -> (TempDir, DocumentStore) {
        let dir = TempDir::new().unwrap();
        let store = DocumentStore::new();
        store.configure(dir.path()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn operations_fail_fast_without_root() {
        let store = DocumentStore::new();
        assert!(matches!(
            store.download("a.txt").await,
            Err(AppError::Configuration(_))
        ));
        assert!(matches!(
            store.upload("a.txt", b"x").await,
            Err(AppError::Configuration(_))
        ));
        assert!(!store.status().await.upload_dir_exists);
    }

    #[tokio::test]
    async fn configure_creates_missing_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("nested/uploads");
        let store = DocumentStore::new();

        assert_ok!(store.configure(&root).await);
        assert!(root.is_dir());
        let status = store.status().await;
        assert_eq!(status.upload_dir.as_deref(), Some(root.as_path()));
        assert!(status.upload_dir_exists);
    }

    #[tokio::test]
    async fn configure_from_file_reads_upload_dir() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("vault");
        let config_path = dir.path().join("config.json");
        std::fs::write(
            &config_path,
            serde_json::json!({ "upload_dir": root }).to_string(),
        )
        .unwrap();

        let store = DocumentStore::new();
        assert_eq!(store.configure_from_file(&config_path).await.unwrap(), root);

        std::fs::write(&config_path, "{}").unwrap();
        assert!(matches!(
            store.configure_from_file(&config_path).await,
            Err(AppError::Configuration(_))
        ));
        assert!(matches!(
            store.configure_from_file(&dir.path().join("missing.json")).await,
            Err(AppError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn upload_then_download_roundtrips_bytes() {
        let (_dir, store) = configured_store().await;
        let payload = b"\x00\x01binary\xffpayload".to_vec();

        let stored = store.upload(r"reports\2024\q1.bin", &payload).await.unwrap();
        assert_eq!(stored.relative_path, "reports/2024/q1.bin");

        let (name, bytes) = store.download("reports/2024/q1.bin").await.unwrap();
        assert_eq!(name, "reports/2024/q1.bin");
        assert_eq!(bytes, payload);
    }

    #[tokio::test]
    async fn upload_overwrites_silently() {
        let (_dir, store) = configured_store().await;
        store.upload("a.txt", b"first").await.unwrap();
        store.upload("a.txt", b"second").await.unwrap();
        assert_eq!(store.download("a.txt").await.unwrap().1, b"second");
    }

    #[tokio::test]
    async fn download_missing_or_directory_is_not_found() {
        let (_dir, store) = configured_store().await;
        store.upload("folder/a.txt", b"x").await.unwrap();

        assert!(matches!(store.download("nope.txt").await, Err(AppError::NotFound)));
        assert!(matches!(store.download("folder").await, Err(AppError::NotFound)));
    }

    #[tokio::test]
    async fn traversal_is_rejected_before_io() {
        let (_dir, store) = configured_store().await;
        assert!(matches!(
            store.upload("../secret", b"x").await,
            Err(AppError::PathSecurity(_))
        ));
        assert!(matches!(
            store.download("../secret").await,
            Err(AppError::PathSecurity(_))
        ));
        assert!(matches!(store.list("..").await, Err(AppError::PathSecurity(_))));
    }

    #[tokio::test]
    async fn delete_prunes_empty_ancestors_but_not_root() {
        let (dir, store) = configured_store().await;
        store.upload("a/b/c/only.txt", b"x").await.unwrap();
        store.upload("a/sibling.txt", b"y").await.unwrap();

        assert_eq!(store.delete("a/b/c/only.txt").await.unwrap(), "a/b/c/only.txt");
        assert!(!dir.path().join("a/b").exists());
        assert!(dir.path().join("a/sibling.txt").exists());

        store.delete("a/sibling.txt").await.unwrap();
        assert!(!dir.path().join("a").exists());
        assert!(dir.path().exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn delete_through_symlinked_directory_succeeds() {
        let (dir, store) = configured_store().await;
        store.upload("real/f.txt", b"data").await.unwrap();
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("link")).unwrap();

        assert_eq!(store.delete("link/f.txt").await.unwrap(), "link/f.txt");
        assert!(!dir.path().join("real/f.txt").exists());
        assert!(dir.path().join("link").exists());
    }

    #[tokio::test]
    async fn delete_missing_or_directory_is_not_found() {
        let (_dir, store) = configured_store().await;
        store.upload("docs/a.txt", b"x").await.unwrap();
        assert!(matches!(store.delete("docs/b.txt").await, Err(AppError::NotFound)));
        assert!(matches!(store.delete("docs").await, Err(AppError::NotFound)));
    }

    #[tokio::test]
    async fn listing_orders_folders_first_case_insensitively() {
        let (_dir, store) = configured_store().await;
        store.upload("Banana/x.txt", b"x").await.unwrap();
        store.upload("apple/y.txt", b"y").await.unwrap();
        store.upload("date.txt", b"d").await.unwrap();
        store.upload("Cherry.txt", b"c").await.unwrap();

        let entries = store.list("").await.unwrap();
        assert_eq!(entries, vec!["apple/", "Banana/", "Cherry.txt", "date.txt"]);

        let nested = store.list("apple").await.unwrap();
        assert_eq!(nested, vec!["y.txt"]);
    }

    #[tokio::test]
    async fn listing_missing_directory_is_empty() {
        let (_dir, store) = configured_store().await;
        assert!(store.list("does/not/exist").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn batch_reports_each_entry_without_rollback() {
        let (dir, store) = configured_store().await;
        store.upload("import/clash", b"file in the way").await.unwrap();

        let entries = vec![
            BatchEntry {
                relative_path: r"sub\one.txt".to_string(),
                bytes: b"1".to_vec(),
            },
            BatchEntry {
                relative_path: "clash/two.txt".to_string(),
                bytes: b"2".to_vec(),
            },
            BatchEntry {
                relative_path: "../escape.txt".to_string(),
                bytes: b"3".to_vec(),
            },
        ];

        let outcomes = store.upload_batch(entries, "import").await.unwrap();
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].succeeded());
        assert_eq!(outcomes[0].filename, "sub/one.txt");
        assert_eq!(outcomes[0].path.as_deref(), Some("import/sub/one.txt"));
        assert!(!outcomes[1].succeeded());
        assert!(!outcomes[2].succeeded());
        assert!(dir.path().join("import/sub/one.txt").is_file());
    }

    #[test]
    fn sort_breaks_case_ties_deterministically() {
        let mut entries = vec![
            (false, "readme".to_string()),
            (false, "README".to_string()),
            (true, "zeta".to_string()),
        ];
        sort_listing(&mut entries);
        let names: Vec<_> = entries.into_iter().map(|(_, n)| n).collect();
        assert_eq!(names, vec!["zeta", "README", "readme"]);
    }
}
