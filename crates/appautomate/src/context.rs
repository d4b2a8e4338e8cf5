//! Lane context: the explicit hand-off between pipeline steps.
//!
//! Each action returns its value; the CLI records it here under a well-known
//! key and persists the map as a dotenv file, which the next step loads (and
//! which shell steps can `source`). Lookups fall back to process environment
//! variables of the same name, so values exported by other CI steps work too.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// Keys written by the actions, and keys read from other build steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKey {
    AppId,
    TestSuiteId,
    XcuitestBuildId,
    XctestStatus,
    XctestSessionsList,
    XcresultPathsList,
    /// IPA path published by an iOS build step.
    IpaOutputPath,
    /// APK path published by a Gradle build step.
    GradleApkOutputPath,
}

impl ContextKey {
    pub fn name(self) -> &'static str {
        match self {
            ContextKey::AppId => "BROWSERSTACK_APP_ID",
            ContextKey::TestSuiteId => "BROWSERSTACK_TEST_SUITE_ID",
            ContextKey::XcuitestBuildId => "BROWSERSTACK_XCUITEST_BUILD_ID",
            ContextKey::XctestStatus => "BROWSERSTACK_XCTEST_STATUS",
            ContextKey::XctestSessionsList => "BROWSERSTACK_XCTEST_SESSIONS_LIST",
            ContextKey::XcresultPathsList => "BROWSERSTACK_XCRESULT_PATHS_LIST",
            ContextKey::IpaOutputPath => "IPA_OUTPUT_PATH",
            ContextKey::GradleApkOutputPath => "GRADLE_APK_OUTPUT_PATH",
        }
    }
}

/// Splits a comma-separated list, trimming entries and dropping empty ones.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaneContext {
    values: BTreeMap<String, String>,
}

impl LaneContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a context file; a missing file yields an empty context.
    pub fn load(path: &Path) -> Result<Self> {
        let mut context = Self::new();
        if !path.exists() {
            return Ok(context);
        }
        let entries = dotenvy::from_path_iter(path)
            .with_context(|| format!("opening lane context {:?}", path))?;
        for entry in entries {
            let (key, value) =
                entry.with_context(|| format!("parsing lane context {:?}", path))?;
            context.values.insert(key, value);
        }
        Ok(context)
    }

    /// Rewrites `path` with every entry, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating lane context dir {:?}", parent))?;
        }
        fs::write(path, self.render())
            .with_context(|| format!("writing lane context {:?}", path))
    }

    /// Dotenv rendering, one `KEY='value'` line per entry in key order.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.values {
            out.push_str(key);
            out.push('=');
            out.push_str(&quote(value));
            out.push('\n');
        }
        out
    }

    pub fn get(&self, key: ContextKey) -> Option<&str> {
        self.values
            .get(key.name())
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// Value from the context, else from the environment variable of the same name.
    pub fn lookup(&self, key: ContextKey) -> Option<String> {
        self.get(key).map(str::to_string).or_else(|| {
            std::env::var(key.name())
                .ok()
                .filter(|value| !value.is_empty())
        })
    }

    pub fn lookup_list(&self, key: ContextKey) -> Option<Vec<String>> {
        self.lookup(key).map(|raw| split_list(&raw))
    }

    pub fn set(&mut self, key: ContextKey, value: impl Into<String>) {
        self.values.insert(key.name().to_string(), value.into());
    }

    pub fn set_list<S: AsRef<str>>(&mut self, key: ContextKey, items: &[S]) {
        let joined = items
            .iter()
            .map(|item| item.as_ref())
            .collect::<Vec<_>>()
            .join(",");
        self.set(key, joined);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn quote(value: &str) -> String {
    if !value.contains('\'') {
        return format!("'{value}'");
    }
    let mut escaped = String::with_capacity(value.len() + 2);
    escaped.push('"');
    for ch in value.chars() {
        if matches!(ch, '\\' | '"' | '$') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('"');
    escaped
}
