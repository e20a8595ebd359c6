use std::fs;
use std::path::{Path, PathBuf};

use evidx_core::domain::{Metadata, Modality, RowWarning};
use evidx_core::error::{codes, AppError};
use evidx_core::ingest::manifest::parse_manifest;
use tracing::{debug, info};

use super::IngestItem;
use crate::processor::ContentRef;

/// Evidence layout under a data directory: `(subdir, modality, description prefix, extensions)`.
/// Sub-directories of `videos/` are frame sequences.
const LAYOUT: [(&str, Modality, &str, &[&str]); 5] = [
    ("images", Modality::Vision, "Image", &["jpg", "jpeg", "png"]),
    ("audios", Modality::Audio, "Audio", &["wav"]),
    ("texts", Modality::Text, "Text", &["txt"]),
    ("depths", Modality::Depth, "Depth Map", &["jpg", "jpeg", "png"]),
    ("videos", Modality::Video, "Video", &["gif"]),
];

fn has_extension(path: &Path, exts: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| exts.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn item_for(path: PathBuf, modality: Modality, kind: &str) -> IngestItem {
    let name = file_name(&path);
    let mut metadata = Metadata::new();
    metadata.insert("file_name".to_string(), name.clone().into());
    IngestItem {
        content_path: Some(path.display().to_string()),
        source: ContentRef::Path(path),
        modality,
        description: format!("{kind}: {name}"),
        metadata,
        store_content: true,
    }
}

/// Scan a data directory laid out as `images/ audios/ texts/ depths/ videos/`.
/// Missing sub-directories are skipped; items come back sorted by path.
pub fn discover_directory(root: &Path) -> Result<Vec<IngestItem>, AppError> {
    if !root.is_dir() {
        return Err(AppError::new(codes::CONTENT_NOT_FOUND, "Data directory does not exist")
            .with_details(format!("path={}", root.display())));
    }

    let mut items = Vec::new();
    for (sub, modality, kind, exts) in LAYOUT {
        let dir = root.join(sub);
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "evidence sub-directory absent");
            continue;
        }
        let entries = fs::read_dir(&dir).map_err(|e| {
            AppError::new(codes::CONTENT_NOT_FOUND, "Failed to list evidence directory")
                .with_details(format!("path={}; err={}", dir.display(), e))
        })?;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_frame_dir = modality == Modality::Video && path.is_dir();
            if is_frame_dir || (path.is_file() && has_extension(&path, exts)) {
                items.push(item_for(path, modality, kind));
            }
        }
    }

    items.sort_by(|a, b| a.content_path.cmp(&b.content_path));
    info!(root = %root.display(), items = items.len(), "discovered evidence");
    Ok(items)
}

#[derive(Debug, Clone)]
pub struct ManifestItems {
    pub items: Vec<IngestItem>,
    pub skipped: usize,
    pub warnings: Vec<RowWarning>,
}

/// Load a CSV manifest. Relative paths resolve against the manifest's directory.
pub fn items_from_manifest(manifest_path: &Path) -> Result<ManifestItems, AppError> {
    let text = fs::read_to_string(manifest_path).map_err(|e| {
        AppError::new(codes::CONTENT_NOT_FOUND, "Failed to read manifest")
            .with_details(format!("path={}; err={}", manifest_path.display(), e))
    })?;
    let parsed = parse_manifest(&text)?;
    let base = manifest_path.parent().unwrap_or_else(|| Path::new("."));

    let items = parsed
        .entries
        .into_iter()
        .map(|entry| {
            let raw = PathBuf::from(&entry.path);
            let path = if raw.is_absolute() { raw } else { base.join(raw) };
            IngestItem {
                content_path: Some(path.display().to_string()),
                source: ContentRef::Path(path),
                modality: entry.modality,
                description: entry.description,
                metadata: entry.metadata,
                store_content: true,
            }
        })
        .collect();

    Ok(ManifestItems {
        items,
        skipped: parsed.skipped,
        warnings: parsed.warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn discovers_layout_with_descriptions() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for sub in ["images", "texts", "videos/clip1"] {
            fs::create_dir_all(root.join(sub)).unwrap();
        }
        fs::write(root.join("images/b.jpg"), b"x").unwrap();
        fs::write(root.join("images/a.PNG"), b"x").unwrap();
        fs::write(root.join("images/notes.md"), b"x").unwrap();
        fs::write(root.join("texts/note.txt"), b"Why so serious?").unwrap();

        let items = discover_directory(root).unwrap();
        let got: Vec<(Modality, String)> = items
            .iter()
            .map(|i| (i.modality, i.description.clone()))
            .collect();
        assert_eq!(
            got,
            vec![
                (Modality::Vision, "Image: a.PNG".to_string()),
                (Modality::Vision, "Image: b.jpg".to_string()),
                (Modality::Text, "Text: note.txt".to_string()),
                (Modality::Video, "Video: clip1".to_string()),
            ]
        );
    }

    #[test]
    fn manifest_paths_resolve_against_manifest_dir() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("manifest.csv");
        fs::write(
            &manifest,
            "path,modality,description\nimages/card.jpg,vision,Joker card\nx.bin,smell,bad\n",
        )
        .unwrap();

        let loaded = items_from_manifest(&manifest).unwrap();
        assert_eq!(loaded.items.len(), 1);
        assert_eq!(loaded.skipped, 1);
        assert_eq!(
            loaded.items[0].source,
            ContentRef::Path(dir.path().join("images/card.jpg"))
        );
        assert_eq!(loaded.items[0].description, "Joker card");
    }
}
