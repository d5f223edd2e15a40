use std::path::{Path, PathBuf};

/// Extension of an uploaded file name, without the leading dot.
///
/// The original basename is discarded on purpose: client-supplied names may
/// carry characters we do not want on disk. Only the extension survives.
pub fn file_ext(file_name: &str) -> anyhow::Result<&str> {
    match Path::new(file_name).extension().and_then(|e| e.to_str()) {
        Some(ext) if !ext.is_empty() => Ok(ext),
        _ => anyhow::bail!("missing file ext, name={file_name}"),
    }
}

/// Storage path for the `idx`-th uploaded file (1-based): `file-NN.<ext>`.
pub fn upload_file_path(base_dir: &Path, idx: usize, ext: &str) -> PathBuf {
    base_dir.join(format!("file-{idx:02}.{ext}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ext_is_last_component() {
        assert_eq!(file_ext("report.pdf").unwrap(), "pdf");
        assert_eq!(file_ext("archive.tar.gz").unwrap(), "gz");
    }

    #[test]
    fn missing_ext_is_rejected() {
        assert!(file_ext("noext").is_err());
        assert!(file_ext("trailing.").is_err());
    }

    #[test]
    fn stored_names_are_zero_padded() {
        let base = Path::new("/tmp/up");
        assert_eq!(upload_file_path(base, 1, "png"), Path::new("/tmp/up/file-01.png"));
        assert_eq!(upload_file_path(base, 12, "dat"), Path::new("/tmp/up/file-12.dat"));
    }
}
