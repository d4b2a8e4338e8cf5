//! Result-bundle download and extraction.
//!
//! BrowserStack serves each session's `.xcresult` bundle as a zip archive. The
//! archive is written next to its destination, unpacked into
//! `<dir>/<session_id>.xcresult`, and removed again.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;
use zip::ZipArchive;

use crate::browserstack::BrowserStackClient;
use crate::error::{AutomateError, Result, require_non_empty};
use crate::transport::Transport;

const ACTION: &str = "Result bundle download";

/// Directory a session's result bundle is extracted into.
pub fn bundle_dir(dir: &Path, session_id: &str) -> PathBuf {
    dir.join(format!("{session_id}.xcresult"))
}

/// Downloads and extracts the result bundle of each session, in order.
///
/// Returns the bundle directory of every session. Files that already exist
/// under a bundle directory are left untouched, so an interrupted run can be
/// repeated against the same `dir`.
pub fn download_all<T: Transport>(
    client: &BrowserStackClient<T>,
    build_id: &str,
    session_ids: &[String],
    dir: &Path,
) -> Result<Vec<PathBuf>> {
    let build_id = require_non_empty(build_id, "xctest_build_id")?;
    if session_ids.is_empty() {
        return Err(AutomateError::validation("No xctest_sessions_list given."));
    }
    for session_id in session_ids {
        check_session_id(session_id)?;
    }
    fs::create_dir_all(dir).map_err(|err| local_failure("creating", dir, err))?;

    let mut bundles = Vec::with_capacity(session_ids.len());
    for session_id in session_ids {
        println!("Downloading result bundle for session {session_id}...");
        let bytes = client.fetch_result_bundle(build_id, session_id)?;

        let archive = dir.join(format!("{session_id}.zip"));
        fs::write(&archive, &bytes).map_err(|err| local_failure("writing", &archive, err))?;

        let bundle = bundle_dir(dir, session_id);
        let extracted = extract_result_bundle(&archive, &bundle);
        let removed = fs::remove_file(&archive).map_err(|err| local_failure("removing", &archive, err));
        let count = extracted?;
        removed?;

        println!("  Extracted {count} entries to {}", bundle.display());
        bundles.push(bundle);
    }
    Ok(bundles)
}

/// Unpacks `archive` into `bundle`, replacing each entry's first path component.
///
/// Entries at the archive root with no parent directory land inside `bundle`.
/// Existing targets are skipped; entries escaping the archive are ignored.
/// Returns the number of entries written.
pub fn extract_result_bundle(archive: &Path, bundle: &Path) -> Result<usize> {
    let file = File::open(archive).map_err(|err| local_failure("opening", archive, err))?;
    let mut zip = ZipArchive::new(file).map_err(|err| zip_failure(archive, err))?;

    let mut written = 0;
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(|err| zip_failure(archive, err))?;
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            debug!(name = entry.name(), "skipping archive entry outside bundle root");
            continue;
        };

        let mut components = relative.components();
        let root = components.next();
        let rest = components.as_path();
        let target = if rest.as_os_str().is_empty() && !entry.is_dir() {
            match root {
                Some(root) => bundle.join(root.as_os_str()),
                None => continue,
            }
        } else {
            bundle.join(rest)
        };

        if target.exists() {
            debug!(path = %target.display(), "already extracted");
            continue;
        }

        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|err| local_failure("creating", &target, err))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .map_err(|err| local_failure("creating", parent, err))?;
            }
            let mut out =
                File::create(&target).map_err(|err| local_failure("creating", &target, err))?;
            io::copy(&mut entry, &mut out).map_err(|err| local_failure("writing", &target, err))?;
        }
        written += 1;
    }
    Ok(written)
}

/// Session ids name files under `dir`, so they must stay a single path component.
fn check_session_id(session_id: &str) -> Result<()> {
    if session_id.contains(['/', '\\']) || session_id.contains("..") {
        return Err(AutomateError::validation(format!(
            "Invalid session_id '{session_id}'."
        )));
    }
    Ok(())
}

fn local_failure(verb: &str, path: &Path, err: io::Error) -> AutomateError {
    AutomateError::request(ACTION, None, format!("{verb} {}: {err}", path.display()))
}

fn zip_failure(archive: &Path, err: zip::result::ZipError) -> AutomateError {
    AutomateError::request(
        ACTION,
        None,
        format!("reading archive {}: {err}", archive.display()),
    )
}
