use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::services::retry::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Unused by the worker and recorder.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for the analysis job queue
    pub redis_url: String,

    /// Bucket receiving recorded segments
    pub storage_bucket: String,

    /// S3-compatible endpoint URL
    pub storage_endpoint: String,

    pub storage_access_key: String,

    pub storage_secret_key: String,

    /// Inference endpoint running one analysis iteration per request
    pub inference_endpoint: String,

    pub inference_api_token: String,

    /// Camera stream URL; `{camera}` is replaced by the camera slug
    pub camera_feed_url: String,

    /// Local directory for segments awaiting upload
    #[serde(default = "default_recordings_dir")]
    pub recordings_dir: PathBuf,

    /// Recorder executable spawned per camera. Defaults to `recorder` next to
    /// the running binary.
    #[serde(default)]
    pub recorder_bin: Option<PathBuf>,

    /// Seconds a new recorder must survive before it counts as started
    #[serde(default = "default_process_validation_secs")]
    pub process_validation_secs: u64,

    /// Seconds to wait after SIGINT before killing a recorder
    #[serde(default = "default_process_stop_timeout_secs")]
    pub process_stop_timeout_secs: u64,

    #[serde(default = "default_retry_base_secs")]
    pub retry_base_secs: u64,

    #[serde(default = "default_retry_max_delay_secs")]
    pub retry_max_delay_secs: u64,

    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_recordings_dir() -> PathBuf {
    PathBuf::from("./recordings")
}

fn default_process_validation_secs() -> u64 {
    10
}

fn default_process_stop_timeout_secs() -> u64 {
    20
}

fn default_retry_base_secs() -> u64 {
    60
}

fn default_retry_max_delay_secs() -> u64 {
    300
}

fn default_retry_max_attempts() -> u32 {
    3
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(self.retry_base_secs),
            Duration::from_secs(self.retry_max_delay_secs),
            self.retry_max_attempts,
        )
    }

    pub fn process_validation_window(&self) -> Duration {
        Duration::from_secs(self.process_validation_secs)
    }

    pub fn process_stop_timeout(&self) -> Duration {
        Duration::from_secs(self.process_stop_timeout_secs)
    }

    pub fn recorder_path(&self) -> PathBuf {
        if let Some(path) = &self.recorder_bin {
            return path.clone();
        }
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join("recorder")))
            .unwrap_or_else(|| PathBuf::from("recorder"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> Vec<(String, String)> {
        [
            ("DATABASE_URL", "postgres://localhost/guardian"),
            ("REDIS_URL", "redis://localhost"),
            ("STORAGE_BUCKET", "videos"),
            ("STORAGE_ENDPOINT", "http://localhost:9000"),
            ("STORAGE_ACCESS_KEY", "ak"),
            ("STORAGE_SECRET_KEY", "sk"),
            ("INFERENCE_ENDPOINT", "http://localhost:8080/analyze"),
            ("INFERENCE_API_TOKEN", "token"),
            ("CAMERA_FEED_URL", "rtsp://nvr/{camera}"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_defaults() {
        let config: AppConfig = envy::from_iter(vars()).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.recordings_dir, PathBuf::from("./recordings"));
        assert_eq!(config.process_validation_window(), Duration::from_secs(10));
        assert_eq!(config.process_stop_timeout(), Duration::from_secs(20));

        let retry = config.retry_policy();
        assert_eq!(retry.base_delay, Duration::from_secs(60));
        assert_eq!(retry.max_delay, Duration::from_secs(300));
        assert_eq!(retry.max_retries, 3);
    }

    #[test]
    fn test_overrides() {
        let mut env = vars();
        env.push(("RETRY_MAX_ATTEMPTS".into(), "5".into()));
        env.push(("RECORDER_BIN".into(), "/opt/guardian/recorder".into()));
        let config: AppConfig = envy::from_iter(env).unwrap();
        assert_eq!(config.retry_policy().max_retries, 5);
        assert_eq!(config.recorder_path(), PathBuf::from("/opt/guardian/recorder"));
    }

    #[test]
    fn test_missing_required_field() {
        let env: Vec<(String, String)> = vars()
            .into_iter()
            .filter(|(k, _)| k != "DATABASE_URL")
            .collect();
        assert!(envy::from_iter::<_, AppConfig>(env).is_err());
    }
}
