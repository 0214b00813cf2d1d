//! Resolución segura de rutas relativas dentro del directorio de subida.
//!
//! Toda ruta que llega del cliente pasa por aquí antes de tocar el disco:
//!   1. Se normalizan los separadores (`\` → `/`) y se descartan segmentos vacíos o `.`.
//!   2. Cualquier `..` (o prefijo de unidad/raíz) se rechaza con `PathSecurity`.
//!   3. El ancestro existente más cercano se canoniza y debe quedar bajo la raíz
//!      canonizada, lo que también cubre enlaces simbólicos que apunten fuera.

use std::{
    fs, io,
    path::{Component, Path, PathBuf},
};

use crate::error::{AppError, Result};

/// Normaliza una ruta relativa del cliente a la forma canónica `a/b/c.txt`.
///
/// Devuelve una cadena vacía si la ruta apunta a la propia raíz.
pub fn normalize_relative(raw: &str) -> Result<String> {
    let unified = raw.replace('\\', "/");
    let mut segments = Vec::new();

    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(AppError::PathSecurity(raw.to_string())),
            _ => {}
        }
        if segment.contains('\0') {
            return Err(AppError::PathSecurity(raw.to_string()));
        }
        // En Windows "C:" es un prefijo; en cualquier plataforma exigimos un único componente normal.
        let mut components = Path::new(segment).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => segments.push(segment),
            _ => return Err(AppError::PathSecurity(raw.to_string())),
        }
    }

    Ok(segments.join("/"))
}

/// Resuelve `relative` bajo `root`, devolviendo la ruta normalizada y la absoluta.
pub fn resolve(root: &Path, relative: &str) -> Result<(String, PathBuf)> {
    let normalized = normalize_relative(relative)?;
    let absolute = if normalized.is_empty() {
        root.to_path_buf()
    } else {
        root.join(&normalized)
    };
    ensure_within(root, &absolute)?;
    Ok((normalized, absolute))
}

/// Igual que [`resolve`], pero exige que la ruta nombre algo distinto de la raíz.
pub fn resolve_file(root: &Path, relative: &str) -> Result<(String, PathBuf)> {
    let (normalized, absolute) = resolve(root, relative)?;
    if normalized.is_empty() {
        return Err(AppError::InvalidRequest("a file path is required".to_string()));
    }
    Ok((normalized, absolute))
}

/// Comprueba que `target` (exista o no) es descendiente físico de `root`.
pub fn ensure_within(root: &Path, target: &Path) -> Result<()> {
    let canonical_root = root.canonicalize().map_err(|e| {
        AppError::Configuration(format!(
            "upload directory {} is not accessible: {e}",
            root.display()
        ))
    })?;

    let mut probe = Some(target);
    while let Some(candidate) = probe {
        if candidate.exists() {
            let canonical = candidate.canonicalize()?;
            if canonical.starts_with(&canonical_root) {
                return Ok(());
            }
            return Err(AppError::PathSecurity(target.display().to_string()));
        }
        probe = candidate.parent();
    }

    Err(AppError::PathSecurity(target.display().to_string()))
}

/// Crea (idempotentemente) la cadena de directorios padre de `path`.
pub fn ensure_parent_dirs(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent),
        None => Ok(()),
    }
}

/// Tras borrar `leaf`, elimina hacia arriba los directorios que hayan quedado vacíos.
///
/// Se detiene en `root` (que nunca se borra), en el primer ancestro con contenido
/// o en cualquier ancestro que no sea un directorio real (p. ej. un enlace simbólico).
/// Devuelve cuántos directorios se eliminaron.
pub fn prune_empty_ancestors(root: &Path, leaf: &Path) -> io::Result<usize> {
    let mut removed = 0;
    let mut current = leaf.parent();

    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        if !fs::symlink_metadata(dir)?.file_type().is_dir() {
            break;
        }
        if fs::read_dir(dir)?.next().is_some() {
            break;
        }
        fs::remove_dir(dir)?;
        removed += 1;
        current = dir.parent();
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn normalizes_backslashes_and_dot_segments() {
        assert_eq!(
            normalize_relative(r"docs\2024\.\report.pdf").unwrap(),
            "docs/2024/report.pdf"
        );
        assert_eq!(normalize_relative("/a//b/").unwrap(), "a/b");
        assert_eq!(normalize_relative("").unwrap(), "");
    }

    #[test]
    fn rejects_parent_traversal() {
        assert!(matches!(
            normalize_relative("../secret"),
            Err(AppError::PathSecurity(_))
        ));
        assert!(matches!(
            normalize_relative(r"docs\..\..\etc\passwd"),
            Err(AppError::PathSecurity(_))
        ));
    }

    #[test]
    fn resolve_stays_under_root() {
        let dir = TempDir::new().unwrap();
        let (normalized, absolute) = resolve(dir.path(), "a/b/c.txt").unwrap();
        assert_eq!(normalized, "a/b/c.txt");
        assert_eq!(absolute, dir.path().join("a/b/c.txt"));

        assert_err!(resolve(dir.path(), "a/../../x"));
        assert_err!(resolve_file(dir.path(), "/"));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_escaping_root() {
        let root = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.path().join("link")).unwrap();

        let result = resolve(root.path(), "link/stolen.txt");
        assert!(matches!(result, Err(AppError::PathSecurity(_))));
    }

    #[test]
    fn prunes_only_empty_ancestors() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let leaf = root.join("a/b/c/file.txt");
        assert_ok!(ensure_parent_dirs(&leaf));
        fs::write(root.join("a/keep.txt"), b"x").unwrap();

        let removed = prune_empty_ancestors(root, &leaf).unwrap();
        assert_eq!(removed, 2);
        assert!(!root.join("a/b").exists());
        assert!(root.join("a").exists());
    }

    #[cfg(unix)]
    #[test]
    fn prune_stops_at_symlinked_directory() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir(root.join("real")).unwrap();
        std::os::unix::fs::symlink(root.join("real"), root.join("link")).unwrap();

        let removed = prune_empty_ancestors(root, &root.join("link/gone.txt")).unwrap();
        assert_eq!(removed, 0);
        assert!(root.join("link").exists());
        assert!(root.join("real").is_dir());
    }

    #[test]
    fn prune_never_removes_root() {
        let dir = TempDir::new().unwrap();
        let leaf = dir.path().join("file.txt");
        assert_eq!(prune_empty_ancestors(dir.path(), &leaf).unwrap(), 0);
        assert!(dir.path().exists());
    }
}
