//! The pipeline actions.
//!
//! Each action resolves its inputs (explicit value first, lane context second),
//! calls the BrowserStack client, records the result in the [`LaneContext`]
//! and returns it.

use std::path::{Path, PathBuf};

use clap::ValueEnum;

use crate::browserstack::{BrowserStackClient, UploadKind, XcuitestRun};
use crate::context::{ContextKey, LaneContext};
use crate::error::{AutomateError, Result};
use crate::transport::Transport;

/// Platform of the app being uploaded; picks the build output to fall back to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
#[clap(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
}

/// Inputs of [`run_xcuitest`]; unset ids come from the lane context.
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    pub app_url: Option<String>,
    pub test_suite_url: Option<String>,
    pub devices: Vec<String>,
    pub only_testing: Vec<String>,
    pub skip_testing: Vec<String>,
    pub enable_result_bundle: bool,
}

fn required(value: Option<String>, context: &LaneContext, key: ContextKey, field: &str) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .or_else(|| context.lookup(key))
        .ok_or_else(|| AutomateError::validation(format!("No {field} given.")))
}

/// Build output to upload when no path is given; anything but iOS is a Gradle build.
fn default_app_path(context: &LaneContext, platform: Option<Platform>) -> Option<PathBuf> {
    let key = match platform {
        Some(Platform::Ios) => ContextKey::IpaOutputPath,
        _ => ContextKey::GradleApkOutputPath,
    };
    context.lookup(key).map(PathBuf::from)
}

/// Uploads an `.ipa`, `.apk` or `.aab` and records `BROWSERSTACK_APP_ID`.
pub fn upload_app<T: Transport>(
    client: &BrowserStackClient<T>,
    context: &mut LaneContext,
    file_path: Option<PathBuf>,
    custom_id: Option<&str>,
    platform: Option<Platform>,
) -> Result<String> {
    let file_path = file_path
        .or_else(|| default_app_path(context, platform))
        .ok_or_else(|| AutomateError::validation("No file_path given."))?;

    println!("Uploading app to BrowserStack AppAutomate...");
    let app_id = client.upload_file(UploadKind::App, &file_path, custom_id)?;
    println!(
        "Successfully uploaded app {} to BrowserStack AppAutomate with app_url : {}",
        file_path.display(),
        app_id
    );

    context.set(ContextKey::AppId, app_id.clone());
    Ok(app_id)
}

/// Uploads a zipped XCUITest runner and records `BROWSERSTACK_TEST_SUITE_ID`.
pub fn upload_test_suite<T: Transport>(
    client: &BrowserStackClient<T>,
    context: &mut LaneContext,
    file_path: &Path,
    custom_id: Option<&str>,
) -> Result<String> {
    println!("Uploading test suite to BrowserStack AppAutomate...");
    let suite_id = client.upload_file(UploadKind::TestSuite, file_path, custom_id)?;
    println!(
        "Successfully uploaded test suite {} to BrowserStack AppAutomate with test_suite_url : {}",
        file_path.display(),
        suite_id
    );

    context.set(ContextKey::TestSuiteId, suite_id.clone());
    Ok(suite_id)
}

/// Launches an XCUITest build and records `BROWSERSTACK_XCUITEST_BUILD_ID`.
pub fn run_xcuitest<T: Transport>(
    client: &BrowserStackClient<T>,
    context: &mut LaneContext,
    args: RunArgs,
) -> Result<String> {
    let run = XcuitestRun {
        app_url: required(args.app_url, context, ContextKey::AppId, "app_url")?,
        test_suite_url: required(
            args.test_suite_url,
            context,
            ContextKey::TestSuiteId,
            "test_suite_url",
        )?,
        devices: args.devices,
        only_testing: Some(args.only_testing).filter(|tests| !tests.is_empty()),
        skip_testing: Some(args.skip_testing).filter(|tests| !tests.is_empty()),
        enable_result_bundle: args.enable_result_bundle.then_some(true),
    };

    println!(
        "Launching XCUITest run on {} device(s): {}",
        run.devices.len(),
        run.devices.join(", ")
    );
    let build_id = client.schedule_xcuitest_run(&run)?;
    println!("Launched XCUITest run with build_id : {build_id}");

    context.set(ContextKey::XcuitestBuildId, build_id.clone());
    Ok(build_id)
}

/// Reads the build status and records `BROWSERSTACK_XCTEST_STATUS`.
pub fn check_status<T: Transport>(
    client: &BrowserStackClient<T>,
    context: &mut LaneContext,
    build_id: Option<String>,
) -> Result<String> {
    let build_id = required(build_id, context, ContextKey::XcuitestBuildId, "xctest_build_id")?;
    let status = client.xcuitest_build_status(&build_id)?;
    println!("Build {build_id} status : {status}");

    context.set(ContextKey::XctestStatus, status.clone());
    Ok(status)
}

/// Lists session ids and records `BROWSERSTACK_XCTEST_SESSIONS_LIST`.
pub fn list_sessions<T: Transport>(
    client: &BrowserStackClient<T>,
    context: &mut LaneContext,
    build_id: Option<String>,
) -> Result<Vec<String>> {
    let build_id = required(build_id, context, ContextKey::XcuitestBuildId, "xctest_build_id")?;
    let sessions = client.xcuitest_sessions(&build_id)?;
    println!("Build {build_id} has {} session(s)", sessions.len());

    context.set_list(ContextKey::XctestSessionsList, &sessions);
    Ok(sessions)
}

/// Downloads every session's result bundle and records
/// `BROWSERSTACK_XCRESULT_PATHS_LIST`.
pub fn download_result_bundles<T: Transport>(
    client: &BrowserStackClient<T>,
    context: &mut LaneContext,
    build_id: Option<String>,
    sessions: Option<Vec<String>>,
    dir_path: &Path,
) -> Result<Vec<PathBuf>> {
    let build_id = required(build_id, context, ContextKey::XcuitestBuildId, "xctest_build_id")?;
    let sessions = sessions
        .filter(|list| !list.is_empty())
        .or_else(|| context.lookup_list(ContextKey::XctestSessionsList))
        .unwrap_or_default();

    let bundles = client.download_result_bundles(&build_id, &sessions, dir_path)?;

    let rendered: Vec<String> = bundles
        .iter()
        .map(|path| path.display().to_string())
        .collect();
    context.set_list(ContextKey::XcresultPathsList, &rendered);
    Ok(bundles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::FakeTransport;
    use crate::transport::{BrowserStackAuth, Payload};
    use serde_json::json;
    use tempfile::TempDir;

    fn client(transport: FakeTransport) -> BrowserStackClient<FakeTransport> {
        BrowserStackClient::with_transport(
            BrowserStackAuth {
                username: "user".into(),
                access_key: "key".into(),
            },
            transport,
        )
    }

    #[test]
    fn upload_app_falls_back_to_build_output_path() {
        let dir = TempDir::new().unwrap();
        let ipa = dir.path().join("App.ipa");
        std::fs::write(&ipa, b"ipa").unwrap();
        let mut context = LaneContext::new();
        context.set(ContextKey::IpaOutputPath, ipa.display().to_string());
        let client = client(FakeTransport::new().respond_json(200, json!({ "app_url": "bs://app" })));

        let app_id = upload_app(&client, &mut context, None, None, Some(Platform::Ios)).unwrap();

        assert_eq!(app_id, "bs://app");
        assert_eq!(context.get(ContextKey::AppId), Some("bs://app"));
        match client.transport().request(0).payload {
            Payload::Multipart { file, .. } => assert_eq!(file, ipa),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn upload_app_without_platform_uses_gradle_output() {
        let dir = TempDir::new().unwrap();
        let ipa = dir.path().join("App.ipa");
        let apk = dir.path().join("app-release.apk");
        std::fs::write(&ipa, b"ipa").unwrap();
        std::fs::write(&apk, b"apk").unwrap();

        for platform in [None, Some(Platform::Android)] {
            let mut context = LaneContext::new();
            context.set(ContextKey::IpaOutputPath, ipa.display().to_string());
            context.set(ContextKey::GradleApkOutputPath, apk.display().to_string());
            let client = client(FakeTransport::new().respond_json(200, json!({ "app_url": "bs://apk" })));

            upload_app(&client, &mut context, None, None, platform).unwrap();

            match client.transport().request(0).payload {
                Payload::Multipart { file, .. } => assert_eq!(file, apk, "platform {platform:?}"),
                other => panic!("unexpected payload {other:?}"),
            }
        }
    }

    #[test]
    fn upload_failure_leaves_context_untouched() {
        let dir = TempDir::new().unwrap();
        let suite = dir.path().join("Runner.zip");
        std::fs::write(&suite, b"zip").unwrap();
        let mut context = LaneContext::new();
        let client = client(FakeTransport::new().respond_json(422, json!({ "error": "bad suite" })));

        let err = upload_test_suite(&client, &mut context, &suite, None).unwrap_err();

        assert_eq!(err.to_string(), "Test suite upload failed!!! Reason : bad suite");
        assert!(context.is_empty());
    }

    #[test]
    fn run_uses_ids_from_context() {
        let mut context = LaneContext::new();
        context.set(ContextKey::AppId, "bs://app");
        context.set(ContextKey::TestSuiteId, "bs://suite");
        let client = client(FakeTransport::new().respond_json(200, json!({ "build_id": "b42" })));

        let build_id = run_xcuitest(
            &client,
            &mut context,
            RunArgs {
                devices: vec!["iPhone 14-16".into()],
                enable_result_bundle: true,
                ..RunArgs::default()
            },
        )
        .unwrap();

        assert_eq!(build_id, "b42");
        assert_eq!(context.get(ContextKey::XcuitestBuildId), Some("b42"));
        let Payload::Json(body) = client.transport().request(0).payload else {
            panic!("expected JSON payload");
        };
        assert_eq!(body["app"], json!("bs://app"));
        assert_eq!(body["testSuite"], json!("bs://suite"));
        assert_eq!(body["enableResultBundle"], json!(true));
        assert!(body.get("only-testing").is_none());
    }

    #[test]
    fn explicit_input_beats_context() {
        let mut context = LaneContext::new();
        context.set(ContextKey::XcuitestBuildId, "from-context");
        let client = client(FakeTransport::new().respond_json(200, json!({ "status": "queued" })));

        check_status(&client, &mut context, Some("explicit".into())).unwrap();

        assert!(client.transport().request(0).url.ends_with("/builds/explicit"));
        assert_eq!(context.get(ContextKey::XctestStatus), Some("queued"));
    }

    #[test]
    fn sessions_are_recorded_as_a_list() {
        let mut context = LaneContext::new();
        context.set(ContextKey::XcuitestBuildId, "b1");
        let client = client(FakeTransport::new().respond_json(
            200,
            json!({ "devices": [
                { "sessions": [{ "id": "s1" }] },
                { "sessions": [{ "id": "s2" }] }
            ]}),
        ));

        let sessions = list_sessions(&client, &mut context, None).unwrap();

        assert_eq!(sessions, vec!["s1", "s2"]);
        assert_eq!(context.get(ContextKey::XctestSessionsList), Some("s1,s2"));
    }

    #[test]
    fn download_without_sessions_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut context = LaneContext::new();
        let client = client(FakeTransport::new());

        let err = download_result_bundles(
            &client,
            &mut context,
            Some("b1".into()),
            Some(vec![]),
            dir.path(),
        )
        .unwrap_err();

        assert!(err.is_validation());
        assert_eq!(client.transport().calls(), 0);
    }
}
