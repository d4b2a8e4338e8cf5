use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::artifact::{describe_size, validate_file_path};
use crate::error::{AutomateError, GENERIC_FAILURE_REASON, Result, require_non_empty};
use crate::transport::{
    ApiRequest, BrowserStackAuth, HttpTransport, Method, Payload, RawResponse, Transport,
};

pub const DEFAULT_BASE_URL: &str = "https://api-cloud.browserstack.com";

const APP_UPLOAD_PATH: &str = "app-automate/upload";
const TEST_SUITE_UPLOAD_PATH: &str = "app-automate/xcuitest/v2/test-suite";
const XCUITEST_BUILD_PATH: &str = "app-automate/xcuitest/v2/build";
const XCUITEST_BUILDS_PATH: &str = "app-automate/xcuitest/v2/builds";

/// Which BrowserStack upload endpoint an artifact goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    App,
    TestSuite,
}

impl UploadKind {
    fn path(self) -> &'static str {
        match self {
            UploadKind::App => APP_UPLOAD_PATH,
            UploadKind::TestSuite => TEST_SUITE_UPLOAD_PATH,
        }
    }

    pub fn action(self) -> &'static str {
        match self {
            UploadKind::App => "App upload",
            UploadKind::TestSuite => "Test suite upload",
        }
    }

    pub fn allowed_extensions(self) -> &'static [&'static str] {
        match self {
            UploadKind::App => crate::artifact::APP_EXTENSIONS,
            UploadKind::TestSuite => crate::artifact::TEST_SUITE_EXTENSIONS,
        }
    }
}

/// Parameters for launching an XCUITest build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XcuitestRun {
    pub app_url: String,
    pub test_suite_url: String,
    pub devices: Vec<String>,
    pub only_testing: Option<Vec<String>>,
    pub skip_testing: Option<Vec<String>>,
    pub enable_result_bundle: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct XcuitestBuildRequest<'a> {
    app: &'a str,
    test_suite: &'a str,
    devices: Vec<&'a str>,
    #[serde(rename = "only-testing", skip_serializing_if = "Option::is_none")]
    only_testing: Option<&'a [String]>,
    #[serde(rename = "skip-testing", skip_serializing_if = "Option::is_none")]
    skip_testing: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    enable_result_bundle: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct BuildResponse {
    build_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
}

/// BrowserStack App Automate (XCUITest) client.
#[derive(Debug, Clone)]
pub struct BrowserStackClient<T = HttpTransport> {
    transport: T,
    auth: BrowserStackAuth,
    base_url: String,
}

impl BrowserStackClient<HttpTransport> {
    pub fn new(auth: BrowserStackAuth) -> Result<Self> {
        let transport = HttpTransport::new()
            .map_err(|err| AutomateError::request("Client setup", None, err.to_string()))?;
        Ok(Self::with_transport(auth, transport))
    }
}

impl<T: Transport> BrowserStackClient<T> {
    pub fn with_transport(auth: BrowserStackAuth, transport: T) -> Self {
        Self {
            transport,
            auth,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Upload an app or test-suite artifact and return its BrowserStack id.
    ///
    /// The file is validated locally first; nothing is sent when it is missing
    /// or carries a disallowed extension. The returned id is the first of
    /// `custom_id`, `app_url`, `test_suite_url` present in the response.
    pub fn upload_file(
        &self,
        kind: UploadKind,
        artifact: &Path,
        custom_id: Option<&str>,
    ) -> Result<String> {
        validate_file_path(artifact, kind.allowed_extensions())?;

        let data = custom_id.map(|id| json!({ "custom_id": id }).to_string());
        let request = ApiRequest {
            method: Method::Post,
            url: self.api(kind.path()),
            payload: Payload::Multipart {
                file: artifact.to_path_buf(),
                data,
            },
        };

        println!(
            "Uploading {} ({})...",
            artifact.display(),
            describe_size(artifact)
        );
        let start = Instant::now();
        let body: Value = self.execute_json(kind.action(), &request)?;
        debug!(elapsed_secs = start.elapsed().as_secs(), "upload finished");

        uploaded_artifact_id(&body).ok_or_else(|| {
            AutomateError::request(
                kind.action(),
                None,
                "response did not include an uploaded artifact id",
            )
        })
    }

    /// Launch an XCUITest build and return its build id.
    pub fn schedule_xcuitest_run(&self, run: &XcuitestRun) -> Result<String> {
        let app = require_non_empty(&run.app_url, "app_url")?;
        let test_suite = require_non_empty(&run.test_suite_url, "test_suite_url")?;
        let devices: Vec<&str> = run
            .devices
            .iter()
            .map(|device| device.trim())
            .filter(|device| !device.is_empty())
            .collect();
        if devices.is_empty() {
            return Err(AutomateError::validation("No devices given."));
        }

        let body = XcuitestBuildRequest {
            app,
            test_suite,
            devices,
            only_testing: run.only_testing.as_deref(),
            skip_testing: run.skip_testing.as_deref(),
            enable_result_bundle: run.enable_result_bundle,
        };
        let payload = serde_json::to_value(&body)
            .map_err(|err| AutomateError::request("XCUITest run", None, err.to_string()))?;
        let request = ApiRequest {
            method: Method::Post,
            url: self.api(XCUITEST_BUILD_PATH),
            payload: Payload::Json(payload),
        };

        let build: BuildResponse = self.execute_json("XCUITest run", &request)?;
        Ok(build.build_id)
    }

    /// Get the status string of an XCUITest build.
    pub fn xcuitest_build_status(&self, build_id: &str) -> Result<String> {
        let request = self.build_request(build_id)?;
        let status: StatusResponse = self.execute_json("Status check", &request)?;
        Ok(status.status)
    }

    /// List session ids of an XCUITest build in device order, then session order.
    pub fn xcuitest_sessions(&self, build_id: &str) -> Result<Vec<String>> {
        let request = self.build_request(build_id)?;
        let body: Value = self.execute_json("Sessions list", &request)?;
        Ok(extract_session_ids(&body))
    }

    /// Fetch the zipped result bundle of one session as raw bytes.
    pub fn fetch_result_bundle(&self, build_id: &str, session_id: &str) -> Result<Vec<u8>> {
        let build_id = require_non_empty(build_id, "xctest_build_id")?;
        let session_id = require_non_empty(session_id, "session_id")?;
        let request = ApiRequest {
            method: Method::Get,
            url: self.api(&format!(
                "{XCUITEST_BUILDS_PATH}/{build_id}/sessions/{session_id}/resultbundle"
            )),
            payload: Payload::Empty,
        };
        self.execute_bytes("Result bundle download", &request)
    }

    /// Download, extract and clean up the result bundle of every session.
    ///
    /// See [`crate::result_bundle::download_all`].
    pub fn download_result_bundles(
        &self,
        build_id: &str,
        session_ids: &[String],
        dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        crate::result_bundle::download_all(self, build_id, session_ids, dir)
    }

    fn build_request(&self, build_id: &str) -> Result<ApiRequest> {
        let build_id = require_non_empty(build_id, "xctest_build_id")?;
        Ok(ApiRequest {
            method: Method::Get,
            url: self.api(&format!("{XCUITEST_BUILDS_PATH}/{build_id}")),
            payload: Payload::Empty,
        })
    }

    fn api(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Performs `request` and decodes a successful body as JSON.
    pub fn execute_json<R: DeserializeOwned>(&self, action: &str, request: &ApiRequest) -> Result<R> {
        let resp = self.execute(action, request)?;
        serde_json::from_slice(&resp.body).map_err(|err| {
            AutomateError::request(
                action,
                Some(resp.status),
                format!("unexpected response body: {err}"),
            )
        })
    }

    /// Performs `request` and returns a successful body untouched.
    pub fn execute_bytes(&self, action: &str, request: &ApiRequest) -> Result<Vec<u8>> {
        Ok(self.execute(action, request)?.body)
    }

    fn execute(&self, action: &str, request: &ApiRequest) -> Result<RawResponse> {
        debug!(
            method = request.method.as_str(),
            url = %request.url,
            payload = request.payload.kind(),
            "sending BrowserStack request"
        );

        let resp = self
            .transport
            .send(&self.auth, request)
            .map_err(|err| AutomateError::request(action, None, format!("{err:#}")))?;

        if !resp.is_success() {
            let reason = failure_reason(&resp.body);
            warn!(status = resp.status, %reason, "BrowserStack {} failed", action);
            return Err(AutomateError::request(action, Some(resp.status), reason));
        }
        debug!(status = resp.status, bytes = resp.body.len(), "BrowserStack response");
        Ok(resp)
    }
}

/// Pulls the `error` field out of a failed response body.
fn failure_reason(body: &[u8]) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("error")
                .and_then(|val| val.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| GENERIC_FAILURE_REASON.to_string())
}

fn uploaded_artifact_id(body: &Value) -> Option<String> {
    ["custom_id", "app_url", "test_suite_url"]
        .iter()
        .find_map(|key| body.get(*key).and_then(|val| val.as_str()))
        .map(str::to_string)
}

fn extract_session_ids(value: &Value) -> Vec<String> {
    let mut ids = Vec::new();
    if let Some(devices) = value.get("devices").and_then(|val| val.as_array()) {
        for device in devices {
            if let Some(sessions) = device.get("sessions").and_then(|val| val.as_array()) {
                for entry in sessions {
                    if let Some(id) = entry.get("id").and_then(|val| val.as_str()) {
                        ids.push(id.to_string());
                    }
                }
            }
        }
    }
    ids
}
