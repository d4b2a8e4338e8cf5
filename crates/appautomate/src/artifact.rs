//! Local artifact checks performed before anything is uploaded.

use std::path::Path;

use crate::error::{AutomateError, Result};

/// Extensions accepted by the generic app upload endpoint.
pub const APP_EXTENSIONS: &[&str] = &["apk", "ipa", "aab"];

/// Extensions accepted by the XCUITest test-suite endpoint.
pub const TEST_SUITE_EXTENSIONS: &[&str] = &["zip"];

/// Size of the artifact for progress output, e.g. `4.2 MB`.
pub(crate) fn describe_size(path: &Path) -> String {
    match std::fs::metadata(path) {
        Ok(meta) => human_size(meta.len()),
        Err(_) => "size unknown".to_string(),
    }
}

fn human_size(bytes: u64) -> String {
    const UNITS: [(u64, &str); 2] = [(1_000_000, "MB"), (1_000, "KB")];
    UNITS
        .iter()
        .find(|(scale, _)| bytes >= *scale)
        .map(|(scale, unit)| format!("{:.1} {unit}", bytes as f64 / *scale as f64))
        .unwrap_or_else(|| format!("{bytes} bytes"))
}

/// Checks that `path` exists and ends in one of `allowed` extensions.
///
/// The extension is whatever follows the last `.` of the file name, compared
/// case-sensitively: `build.IPA` is rejected, `archive.tar.zip` passes for `zip`.
pub fn validate_file_path(path: &Path, allowed: &[&str]) -> Result<()> {
    if !path.exists() {
        return Err(AutomateError::validation(format!(
            "No file found at '{}'.",
            path.display()
        )));
    }

    let name = path
        .file_name()
        .map(|name| name.to_string_lossy())
        .unwrap_or_default();
    let extension = name.rsplit_once('.').map(|(_, ext)| ext);
    match extension {
        Some(ext) if allowed.contains(&ext) => Ok(()),
        _ => Err(AutomateError::validation(format!(
            "file_path is invalid, only files with extensions {:?} are allowed to be uploaded.",
            allowed
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, name: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, b"artifact").unwrap();
        path
    }

    #[test]
    fn accepts_allowed_extensions() {
        let dir = TempDir::new().unwrap();
        for name in ["app.apk", "app.ipa", "app.aab"] {
            let path = touch(&dir, name);
            assert!(validate_file_path(&path, APP_EXTENSIONS).is_ok(), "{name}");
        }
        let suite = touch(&dir, "Runner.zip");
        assert!(validate_file_path(&suite, TEST_SUITE_EXTENSIONS).is_ok());
    }

    #[test]
    fn rejects_disallowed_extension() {
        let dir = TempDir::new().unwrap();
        let path = touch(&dir, "app.exe");
        let err = validate_file_path(&path, APP_EXTENSIONS).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("only files with extensions"));
        assert!(err.to_string().contains("\"ipa\""));
    }

    #[test]
    fn rejects_path_without_extension() {
        let dir = TempDir::new().unwrap();
        let path = touch(&dir, "ipa");
        let err = validate_file_path(&path, APP_EXTENSIONS).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn extension_match_is_case_sensitive() {
        let dir = TempDir::new().unwrap();
        let path = touch(&dir, "app.IPA");
        assert!(validate_file_path(&path, APP_EXTENSIONS).is_err());
    }

    #[test]
    fn missing_file_fails_regardless_of_extension() {
        for name in ["/tmp/definitely-missing.ipa", "/tmp/definitely-missing.exe"] {
            let err = validate_file_path(Path::new(name), APP_EXTENSIONS).unwrap_err();
            assert!(err.is_validation());
            assert!(err.to_string().starts_with("No file found at"));
        }
    }

    #[test]
    fn formats_sizes() {
        assert_eq!(human_size(512), "512 bytes");
        assert_eq!(human_size(2_048), "2.0 KB");
        assert_eq!(human_size(4_300_000), "4.3 MB");
        assert_eq!(describe_size(Path::new("/definitely/not/here.ipa")), "size unknown");
    }
}
