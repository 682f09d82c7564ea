use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use civica_store::BackendConfig;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    pub backend_endpoint: String,
    pub project_id: String,
    pub database_id: String,
    pub bucket_id: String,
    /// Always starts and ends with `/`.
    pub base_path: String,
    pub backend_timeout_ms: u64,
    pub upload_max_bytes: usize,
    pub list_limit: u64,
    pub metrics_require_auth: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for StartupError {}

impl GatewayConfig {
    pub fn load() -> Result<Self, StartupError> {
        let mut merged = HashMap::new();

        if let Ok(config_path) = std::env::var("CIVICA_CONFIG_PATH") {
            let config_path = config_path.trim();
            if !config_path.is_empty() {
                let file_kv = parse_env_file(config_path)?;
                merged.extend(file_kv);
            }
        }

        merged.extend(std::env::vars());

        Self::from_kv(&merged)
    }

    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self, StartupError> {
        let bind_addr = parse_socket_addr(
            kv.get("CIVICA_BIND_ADDR"),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080),
            "CIVICA_BIND_ADDR",
        )?;

        let backend_endpoint = require_nonempty(kv, "CIVICA_BACKEND_ENDPOINT")?;
        if !(backend_endpoint.starts_with("http://") || backend_endpoint.starts_with("https://")) {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "CIVICA_BACKEND_ENDPOINT must be an http(s) URL".to_string(),
            });
        }
        let backend_endpoint = backend_endpoint.trim_end_matches('/').to_string();

        let project_id = require_nonempty(kv, "CIVICA_PROJECT_ID")?;
        let database_id = require_nonempty(kv, "CIVICA_DATABASE_ID")?;
        let bucket_id = require_nonempty(kv, "CIVICA_BUCKET_ID")?;

        let base_path = parse_base_path(kv.get("CIVICA_BASE_PATH"))?;

        let backend_timeout_ms = parse_u64(
            kv.get("CIVICA_BACKEND_TIMEOUT_MS"),
            5000,
            "CIVICA_BACKEND_TIMEOUT_MS",
        )?;
        if backend_timeout_ms == 0 {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "CIVICA_BACKEND_TIMEOUT_MS must be >= 1".to_string(),
            });
        }

        let upload_max_bytes = parse_usize(
            kv.get("CIVICA_UPLOAD_MAX_BYTES"),
            5 * 1024 * 1024,
            "CIVICA_UPLOAD_MAX_BYTES",
        )?;

        let list_limit = parse_u64(kv.get("CIVICA_LIST_LIMIT"), 500, "CIVICA_LIST_LIMIT")?;
        if !(1..=5000).contains(&list_limit) {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "CIVICA_LIST_LIMIT must be between 1 and 5000".to_string(),
            });
        }

        let metrics_require_auth =
            parse_bool(kv.get("CIVICA_METRICS_REQUIRE_AUTH")).unwrap_or(false);

        Ok(Self {
            bind_addr,
            backend_endpoint,
            project_id,
            database_id,
            bucket_id,
            base_path,
            backend_timeout_ms,
            upload_max_bytes,
            list_limit,
            metrics_require_auth,
        })
    }

    pub fn backend(&self) -> BackendConfig {
        BackendConfig {
            endpoint: self.backend_endpoint.clone(),
            project_id: self.project_id.clone(),
            database_id: self.database_id.clone(),
            bucket_id: self.bucket_id.clone(),
            timeout: Duration::from_millis(self.backend_timeout_ms),
        }
    }
}

fn parse_env_file(path: &str) -> Result<HashMap<String, String>, StartupError> {
    let contents = std::fs::read_to_string(path).map_err(|_| StartupError {
        code: "ERR_CONFIG_FILE_READ",
        message: format!("failed to read config file at {}", path),
    })?;

    let mut kv = HashMap::new();

    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| StartupError {
            code: "ERR_CONFIG_FILE_PARSE",
            message: format!("invalid config line {} (expected KEY=VALUE)", idx + 1),
        })?;

        let key = key.trim();
        if key.is_empty() {
            return Err(StartupError {
                code: "ERR_CONFIG_FILE_PARSE",
                message: format!("invalid config line {} (empty key)", idx + 1),
            });
        }

        kv.insert(key.to_string(), strip_quotes(value.trim()));
    }

    Ok(kv)
}

fn strip_quotes(s: &str) -> String {
    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return s[1..bytes.len() - 1].to_string();
        }
    }
    s.to_string()
}

fn require_nonempty(
    kv: &HashMap<String, String>,
    key: &'static str,
) -> Result<String, StartupError> {
    let value = kv.get(key).map(|v| v.trim()).unwrap_or("");
    if value.is_empty() {
        return Err(StartupError {
            code: "ERR_MISSING_CONFIG",
            message: format!("missing required config key {}", key),
        });
    }

    Ok(value.to_string())
}

/// `app`, `/app` and `/app/` all become `/app/`; unset means `/`.
/// First path segments owned by the API router. Pages mounted under them
/// would collide with API routes.
const RESERVED_ROUTE_ROOTS: [&str; 4] = ["healthz", "readyz", "metrics", "v1"];

fn parse_base_path(value: Option<&String>) -> Result<String, StartupError> {
    let raw = value.map(|v| v.trim()).unwrap_or("");
    let trimmed = raw.trim_matches('/');
    if trimmed.is_empty() {
        return Ok("/".to_string());
    }

    let valid = trimmed
        .split('/')
        .all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
        });
    if !valid {
        return Err(StartupError {
            code: "ERR_INVALID_CONFIG",
            message: "CIVICA_BASE_PATH must be a plain URL path".to_string(),
        });
    }

    let root = trimmed.split('/').next().unwrap_or_default();
    if RESERVED_ROUTE_ROOTS.contains(&root) {
        return Err(StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("CIVICA_BASE_PATH must not start with /{}", root),
        });
    }

    Ok(format!("/{}/", trimmed))
}

fn parse_socket_addr(
    value: Option<&String>,
    default: SocketAddr,
    key: &'static str,
) -> Result<SocketAddr, StartupError> {
    match value {
        None => Ok(default),
        Some(v) => v.trim().parse::<SocketAddr>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be a valid host:port socket address", key),
        }),
    }
}

fn parse_usize(
    value: Option<&String>,
    default: usize,
    key: &'static str,
) -> Result<usize, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<usize>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be an integer", key),
        }),
    }
}

fn parse_u64(value: Option<&String>, default: u64, key: &'static str) -> Result<u64, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<u64>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be an integer", key),
        }),
    }
}

fn parse_bool(value: Option<&String>) -> Option<bool> {
    let value = value.map(|v| v.trim()).filter(|v| !v.is_empty())?;

    match value {
        "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
        _ => None,
    }
}
