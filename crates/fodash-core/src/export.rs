// SPDX-License-Identifier: MIT
// Copyright (c) 2026 StarTuz

use anyhow::{Context, Result};
use log::info;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// A binary document returned by the export endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportBlob {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub filename: String,
}

fn disposition_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"filename\*?=(?:UTF-8'')?"?([^";]+)"?"#).expect("static disposition pattern")
    })
}

/// Maps a MIME type to the extension used when the server suggests no name.
pub fn extension_for(content_type: &str) -> &'static str {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    match mime.as_str() {
        "application/pdf" => "pdf",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        "application/vnd.ms-excel" => "xls",
        "text/csv" => "csv",
        "application/json" => "json",
        _ => "bin",
    }
}

impl ExportBlob {
    pub fn new(bytes: Vec<u8>, content_type: Option<&str>, disposition: Option<&str>) -> Self {
        let content_type = content_type
            .unwrap_or("application/octet-stream")
            .to_string();

        let suggested = disposition
            .and_then(|d| disposition_pattern().captures(d))
            .map(|cap| cap[1].trim().to_string())
            .and_then(|name| {
                // Never let a server-provided name escape the target directory.
                Path::new(&name)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .filter(|name| !name.is_empty());

        let filename =
            suggested.unwrap_or_else(|| format!("export.{}", extension_for(&content_type)));

        Self {
            bytes,
            content_type,
            filename,
        }
    }

    /// Writes the blob into `dir` under its filename and returns the full path.
    pub fn save_to<P: AsRef<Path>>(&self, dir: P) -> Result<PathBuf> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create export directory {}", dir.display()))?;
        let path = dir.join(&self.filename);
        std::fs::write(&path, &self.bytes)
            .with_context(|| format!("Failed to write export {}", path.display()))?;
        info!(
            "Export saved — path={} bytes={} content_type={}",
            path.display(),
            self.bytes.len(),
            self.content_type
        );
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_from_content_type() {
        let blob = ExportBlob::new(vec![1, 2, 3], Some("application/pdf"), None);
        assert_eq!(blob.filename, "export.pdf");

        let blob = ExportBlob::new(
            vec![],
            Some("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
            None,
        );
        assert_eq!(blob.filename, "export.xlsx");

        let blob = ExportBlob::new(vec![], None, None);
        assert_eq!(blob.filename, "export.bin");
    }

    #[test]
    fn test_filename_from_disposition() {
        let blob = ExportBlob::new(
            vec![],
            Some("text/csv; charset=utf-8"),
            Some(r#"attachment; filename="operaciones_2024.csv""#),
        );
        assert_eq!(blob.filename, "operaciones_2024.csv");

        let blob = ExportBlob::new(
            vec![],
            Some("application/pdf"),
            Some("attachment; filename=../../etc/report.pdf"),
        );
        assert_eq!(blob.filename, "report.pdf");
    }

    #[test]
    fn test_save_to_writes_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let blob = ExportBlob::new(b"%PDF-1.4".to_vec(), Some("application/pdf"), None);
        let path = blob.save_to(dir.path().join("out")).unwrap();
        assert_eq!(path, dir.path().join("out").join("export.pdf"));
        assert_eq!(std::fs::read(path).unwrap(), b"%PDF-1.4");
    }
}
