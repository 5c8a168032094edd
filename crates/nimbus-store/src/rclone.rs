//! Best-effort rclone remote-control notifications.
//!
//! The WebDAV tree is often re-exported through an rclone mount; after a
//! mutation the store pokes `vfs/forget` and `vfs/refresh` so the external
//! VFS cache drops stale listings. Failures are logged at debug and never
//! propagate.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::json;
use tracing::{debug, trace};

/// Handle to an rclone RC endpoint.
#[derive(Clone)]
pub struct RcloneNotifier {
    http: reqwest::Client,
    rc_url: String,
    auth_header: Option<String>,
    vfs_name: String,
}

impl RcloneNotifier {
    /// Construct a notifier for the given RC endpoint.
    #[must_use]
    pub fn new(rc_url: String, user: &str, password: &str, vfs_name: String) -> Self {
        let auth_header = (!user.is_empty()).then(|| {
            format!(
                "Basic {}",
                BASE64.encode(format!("{user}:{password}").as_bytes())
            )
        });
        Self {
            http: reqwest::Client::new(),
            rc_url,
            auth_header,
            vfs_name,
        }
    }

    /// Ask rclone to forget and re-scan `dir`.
    pub async fn invalidate(&self, dir: &str) {
        self.post("vfs/forget", dir).await;
        self.post("vfs/refresh", dir).await;
    }

    async fn post(&self, op: &str, dir: &str) {
        let url = format!("{}/{op}", self.rc_url.trim_end_matches('/'));
        let mut body = json!({ "dir": dir });
        if !self.vfs_name.is_empty() {
            body["fs"] = json!(self.vfs_name);
        }
        let mut request = self.http.post(&url).json(&body);
        if let Some(header) = &self.auth_header {
            request = request.header(reqwest::header::AUTHORIZATION, header);
        }
        match request.send().await {
            Ok(response) => {
                trace!(op, dir, status = %response.status(), "rclone rc notified");
            }
            Err(err) => {
                debug!(op, dir, error = %err, "rclone rc notification failed");
            }
        }
    }
}
