use facewatch_core::{NameMode, ServiceConfig, DEFAULT_THRESHOLD};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_MODEL_DIR: &str = "/usr/share/facewatch/models";
const DEFAULT_WHATSAPP_API_BASE: &str = "https://graph.facebook.com/v22.0";

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Socket address the HTTP server binds to.
    pub listen_addr: String,
    /// Path to the SQLite gallery database.
    pub db_path: PathBuf,
    /// Path to the FaceNet-512 ONNX model.
    pub model_path: PathBuf,
    /// Maximum Euclidean distance for a positive match.
    pub threshold: f32,
    /// How enrollment names become identifier stems.
    pub name_mode: NameMode,
    /// Deadline for one extraction, including queue wait. 0 disables it.
    pub extract_timeout_secs: u64,
    /// Number of extraction worker threads (one model instance each).
    pub extract_workers: usize,
    /// Pending extraction requests before callers start waiting.
    pub queue_depth: usize,
    /// Largest accepted request body.
    pub max_upload_bytes: usize,
    pub alert: AlertConfig,
}

/// WhatsApp Cloud API settings; alerting is disabled without token and phone ID.
#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub token: Option<String>,
    pub phone_number_id: Option<String>,
    pub api_base: String,
    /// Recipient used when an alert request names none.
    pub default_number: Option<String>,
    /// SDP offer for the follow-up call; no call is placed without one.
    pub call_sdp: Option<String>,
}

impl Config {
    /// Load configuration from `FACEWATCH_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_source(|key| std::env::var(key).ok())
    }

    fn from_source(var: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facewatch");

        let db_path = var("FACEWATCH_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("gallery.db"));

        let model_path = var("FACEWATCH_MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                var("FACEWATCH_MODEL_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_DIR))
                    .join("facenet512.onnx")
            });

        let name_mode = match var("FACEWATCH_NAME_MODE") {
            Some(raw) => raw.parse().unwrap_or_else(|err| {
                tracing::warn!(%err, "ignoring FACEWATCH_NAME_MODE");
                NameMode::default()
            }),
            None => NameMode::default(),
        };

        Self {
            listen_addr: var("FACEWATCH_LISTEN_ADDR")
                .unwrap_or_else(|| "127.0.0.1:8710".to_string()),
            db_path,
            model_path,
            threshold: Some(parse_or(&var, "FACEWATCH_THRESHOLD", DEFAULT_THRESHOLD))
                .filter(|t| t.is_finite() && *t > 0.0)
                .unwrap_or(DEFAULT_THRESHOLD),
            name_mode,
            extract_timeout_secs: parse_or(&var, "FACEWATCH_EXTRACT_TIMEOUT_SECS", 10),
            extract_workers: parse_or(&var, "FACEWATCH_EXTRACT_WORKERS", 1),
            queue_depth: parse_or(&var, "FACEWATCH_QUEUE_DEPTH", 8),
            max_upload_bytes: parse_or(&var, "FACEWATCH_MAX_UPLOAD_BYTES", 10 * 1024 * 1024),
            alert: AlertConfig {
                token: var("WHATSAPP_TOKEN").filter(|v| !v.is_empty()),
                phone_number_id: var("WHATSAPP_ID").filter(|v| !v.is_empty()),
                api_base: var("FACEWATCH_WHATSAPP_API_BASE")
                    .unwrap_or_else(|| DEFAULT_WHATSAPP_API_BASE.to_string()),
                default_number: var("FACEWATCH_ALERT_NUMBER").filter(|v| !v.is_empty()),
                call_sdp: var("FACEWATCH_ALERT_CALL_SDP").filter(|v| !v.is_empty()),
            },
        }
    }

    pub fn extract_timeout(&self) -> Option<Duration> {
        (self.extract_timeout_secs > 0).then(|| Duration::from_secs(self.extract_timeout_secs))
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            threshold: self.threshold,
            name_mode: self.name_mode,
            ..ServiceConfig::default()
        }
    }
}

fn parse_or<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    var(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}
