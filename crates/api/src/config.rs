use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use axum::http::HeaderValue;
use splatscan_cluster::{ClusterCredentials, RemoteConfig, DEFAULT_SSH_PORT};
use splatscan_core::backend::BackendKind;
use splatscan_core::local::LocalConfig;
use splatscan_core::staging::{sanitize_file_name, StagingDirs};
use splatscan_core::viewer::ViewerTrigger;

/// Invalid or missing configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key}='{value}' is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Which execution backend runs the jobs, with its settings.
#[derive(Debug, Clone)]
pub enum BackendConfig {
    Local(LocalConfig),
    Remote(RemoteConfig),
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::Local(_) => BackendKind::Local,
            BackendConfig::Remote(_) => BackendKind::Remote,
        }
    }
}

/// Viewer launcher selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerKind {
    /// Log the staged result only.
    Log,
    /// Copy the result into the viewer and start its development server.
    DevServer {
        dir: PathBuf,
        model_dir: PathBuf,
        command: Vec<String>,
        url: String,
        ready_timeout: Duration,
    },
}

#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub kind: ViewerKind,
    pub trigger: ViewerTrigger,
}

/// Server configuration loaded from environment variables.
///
/// All fields except the cluster login have defaults suitable for running
/// the local pipeline next to the gateway.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8080`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<HeaderValue>,
    /// HTTP request timeout in seconds (default: `600`).
    pub request_timeout_secs: u64,
    /// Body limit for `/upload` (default: 4 GiB).
    pub max_upload_bytes: usize,
    pub upload_dir: PathBuf,
    pub download_dir: PathBuf,
    /// Well-known result file name, e.g. `splat.ply`.
    pub result_file_name: String,
    pub poll_interval: Duration,
    /// Upper bound on waiting for a submitted job. `None` waits forever.
    pub job_timeout: Option<Duration>,
    pub backend: BackendConfig,
    pub viewer: ViewerConfig,
}

impl ServerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `8080`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:3000`    |
    /// | `REQUEST_TIMEOUT_SECS` | `600`                      |
    /// | `MAX_UPLOAD_BYTES`     | `4294967296`               |
    /// | `UPLOAD_DIR`           | `uploads`                  |
    /// | `DOWNLOAD_DIR`         | `downloads`                |
    /// | `RESULT_FILE_NAME`     | `splat.ply`                |
    /// | `BACKEND`              | `local` (or `remote`)      |
    /// | `POLL_INTERVAL_SECS`   | `10`                       |
    /// | `JOB_TIMEOUT_SECS`     | unset                      |
    /// | `LOCAL_WORKSPACE`      | `../splat_workspace`       |
    /// | `LOCAL_JOB_SCRIPT`     | `local_job.sh`             |
    /// | `CLUSTER_HOST`         | required for `remote`      |
    /// | `CLUSTER_PORT`         | `22`                       |
    /// | `CLUSTER_USERNAME`     | required for `remote`      |
    /// | `CLUSTER_PASSWORD`     | required for `remote`      |
    /// | `CLUSTER_PATH`         | required for `remote`      |
    /// | `SSH_TIMEOUT_SECS`     | `30`                       |
    /// | `VIEWER`               | `log` (or `dev-server`)    |
    /// | `VIEWER_DIR`           | `../superSplatViewer`      |
    /// | `VIEWER_COMMAND`       | `npm run develop`          |
    /// | `VIEWER_MODEL_DIR`     | `$VIEWER_DIR/dist/model`   |
    /// | `VIEWER_URL`           | `http://localhost:3000`    |
    /// | `VIEWER_READY_TIMEOUT_SECS` | `120`                 |
    /// | `VIEWER_TRIGGER`       | `once` (or `every-poll`)   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let host = env.or("HOST", "0.0.0.0");
        let port: u16 = env.parse("PORT", 8080)?;

        let cors_origins = env
            .or("CORS_ORIGINS", "http://localhost:3000")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|origin| {
                HeaderValue::from_str(origin).map_err(|e| ConfigError::Invalid {
                    key: "CORS_ORIGINS",
                    value: origin.to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let request_timeout_secs: u64 = env.parse("REQUEST_TIMEOUT_SECS", 600)?;
        let max_upload_bytes: usize = env.parse("MAX_UPLOAD_BYTES", 4 * 1024 * 1024 * 1024)?;

        let upload_dir = PathBuf::from(env.or("UPLOAD_DIR", "uploads"));
        let download_dir = PathBuf::from(env.or("DOWNLOAD_DIR", "downloads"));

        let result_file_name = env.or("RESULT_FILE_NAME", "splat.ply");
        if sanitize_file_name(&result_file_name) != Some(result_file_name.as_str())
            || Path::new(&result_file_name).extension().is_none()
        {
            return Err(ConfigError::Invalid {
                key: "RESULT_FILE_NAME",
                value: result_file_name,
                reason: "expected a plain file name with an extension".into(),
            });
        }

        let poll_interval_secs: u64 = env.parse("POLL_INTERVAL_SECS", 10)?;
        if poll_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "POLL_INTERVAL_SECS",
                value: "0".into(),
                reason: "must be greater than zero".into(),
            });
        }
        let job_timeout = env
            .parse_opt::<u64>("JOB_TIMEOUT_SECS")?
            .map(Duration::from_secs);

        let backend = match env.or("BACKEND", "local").to_ascii_lowercase().as_str() {
            "local" => BackendConfig::Local(
                LocalConfig::new(
                    env.or("LOCAL_WORKSPACE", "../splat_workspace"),
                    &upload_dir,
                    &result_file_name,
                )
                .with_script(env.or("LOCAL_JOB_SCRIPT", "local_job.sh")),
            ),
            "remote" => BackendConfig::Remote(RemoteConfig {
                host: env.required("CLUSTER_HOST")?,
                port: env.parse("CLUSTER_PORT", DEFAULT_SSH_PORT)?,
                credentials: ClusterCredentials::new(
                    env.required("CLUSTER_USERNAME")?,
                    env.secret("CLUSTER_PASSWORD")?,
                ),
                cluster_path: env.required("CLUSTER_PATH")?,
                result_file_name: result_file_name.clone(),
                timeout: Duration::from_secs(env.parse("SSH_TIMEOUT_SECS", 30)?),
            }),
            other => {
                return Err(ConfigError::Invalid {
                    key: "BACKEND",
                    value: other.to_string(),
                    reason: "expected 'local' or 'remote'".into(),
                })
            }
        };

        let kind = match env.or("VIEWER", "log").to_ascii_lowercase().as_str() {
            "log" => ViewerKind::Log,
            "dev-server" => {
                let command: Vec<String> = env
                    .or("VIEWER_COMMAND", "npm run develop")
                    .split_whitespace()
                    .map(String::from)
                    .collect();
                if command.is_empty() {
                    return Err(ConfigError::Invalid {
                        key: "VIEWER_COMMAND",
                        value: String::new(),
                        reason: "command is empty".into(),
                    });
                }
                let dir = PathBuf::from(env.or("VIEWER_DIR", "../superSplatViewer"));
                let model_dir = env
                    .get("VIEWER_MODEL_DIR")
                    .map_or_else(|| dir.join("dist").join("model"), PathBuf::from);
                ViewerKind::DevServer {
                    dir,
                    model_dir,
                    command,
                    url: env.or("VIEWER_URL", "http://localhost:3000"),
                    ready_timeout: Duration::from_secs(
                        env.parse("VIEWER_READY_TIMEOUT_SECS", 120)?,
                    ),
                }
            }
            other => {
                return Err(ConfigError::Invalid {
                    key: "VIEWER",
                    value: other.to_string(),
                    reason: "expected 'log' or 'dev-server'".into(),
                })
            }
        };

        let trigger = match env.or("VIEWER_TRIGGER", "once").to_ascii_lowercase().as_str() {
            "once" => ViewerTrigger::Once,
            "every-poll" => ViewerTrigger::EveryPoll,
            other => {
                return Err(ConfigError::Invalid {
                    key: "VIEWER_TRIGGER",
                    value: other.to_string(),
                    reason: "expected 'once' or 'every-poll'".into(),
                })
            }
        };

        Ok(Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            max_upload_bytes,
            upload_dir,
            download_dir,
            result_file_name,
            poll_interval: Duration::from_secs(poll_interval_secs),
            job_timeout,
            backend,
            viewer: ViewerConfig { kind, trigger },
        })
    }

    /// Staging directories described by this configuration.
    pub fn staging(&self) -> StagingDirs {
        StagingDirs::new(
            &self.upload_dir,
            &self.download_dir,
            &self.result_file_name,
        )
    }
}

/// Environment lookup with default and parse helpers.
struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Non-blank value of `key`, trimmed.
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    /// Like [`required`](Self::required) but keeps surrounding whitespace.
    fn secret(&self, key: &'static str) -> Result<String, ConfigError> {
        (self.lookup)(key)
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::Missing(key))
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        Ok(self.parse_opt(key)?.unwrap_or(default))
    }

    fn parse_opt<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.get(key)
            .map(|value| {
                value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                    key,
                    reason: e.to_string(),
                    value,
                })
            })
            .transpose()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
