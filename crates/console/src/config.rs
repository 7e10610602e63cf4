use std::collections::HashMap;
use std::time::Duration;

use brewdesk_auth::{AuthConfig, VerificationMode};

#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    pub api_url: String,
    pub http_timeout_ms: u64,
    pub auth: AuthConfig,
    pub session_token: Option<String>,
    pub print_metrics: bool,
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

impl ConsoleConfig {
    pub fn load() -> Result<Self, StartupError> {
        let mut merged = HashMap::new();

        if let Ok(config_path) = std::env::var("BREWDESK_CONFIG_PATH") {
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
        let api_url = require_nonempty(kv, "BREWDESK_API_URL")?;
        if !api_url.starts_with("http://") && !api_url.starts_with("https://") {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "BREWDESK_API_URL must be an http(s) URL".to_string(),
            });
        }

        let http_timeout_ms = parse_u64(
            kv.get("BREWDESK_HTTP_TIMEOUT_MS"),
            0,
            "BREWDESK_HTTP_TIMEOUT_MS",
        )?;

        let auth = parse_auth_config(kv)?;

        let session_token = optional(kv, "BREWDESK_TOKEN");

        let print_metrics = match kv.get("BREWDESK_PRINT_METRICS") {
            None => false,
            Some(raw) if raw.trim().is_empty() => false,
            Some(raw) => parse_bool(Some(raw)).ok_or_else(|| StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "BREWDESK_PRINT_METRICS must be a boolean".to_string(),
            })?,
        };

        Ok(Self {
            api_url,
            http_timeout_ms,
            auth,
            session_token,
            print_metrics,
        })
    }

    pub fn http_timeout(&self) -> Option<Duration> {
        (self.http_timeout_ms > 0).then(|| Duration::from_millis(self.http_timeout_ms))
    }
}

fn parse_env_file(path: &str) -> Result<HashMap<String, String>, StartupError> {
    let contents = std::fs::read_to_string(path).map_err(|_| StartupError {
        code: "ERR_CONFIG_FILE_READ",
        message: format!("failed to read config file at {}", path),
    })?;

    parse_env_lines(&contents)
}

fn parse_env_lines(contents: &str) -> Result<HashMap<String, String>, StartupError> {
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
    optional(kv, key).ok_or_else(|| StartupError {
        code: "ERR_MISSING_CONFIG",
        message: format!("missing required config key {}", key),
    })
}

fn optional(kv: &HashMap<String, String>, key: &str) -> Option<String> {
    kv.get(key)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
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

fn parse_verification_mode(value: Option<&String>) -> Result<VerificationMode, StartupError> {
    let mode = value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or("unverified");

    match mode {
        "unverified" => Ok(VerificationMode::Unverified),
        "jwks" => Ok(VerificationMode::Jwks),
        _ => Err(StartupError {
            code: "ERR_INVALID_CONFIG",
            message: "BREWDESK_AUTH_MODE must be unverified or jwks".to_string(),
        }),
    }
}

fn parse_auth_config(kv: &HashMap<String, String>) -> Result<AuthConfig, StartupError> {
    let mode = parse_verification_mode(kv.get("BREWDESK_AUTH_MODE"))?;

    let permissions_claim = optional(kv, "BREWDESK_AUTH_PERMISSIONS_CLAIM")
        .unwrap_or_else(|| "permissions".to_string());

    let jwks_url = optional(kv, "BREWDESK_AUTH_JWKS_URL");
    let jwks_json = optional(kv, "BREWDESK_AUTH_JWKS_JSON");
    if mode == VerificationMode::Jwks && jwks_url.is_none() && jwks_json.is_none() {
        return Err(StartupError {
            code: "ERR_INVALID_CONFIG",
            message: "jwks mode requires BREWDESK_AUTH_JWKS_URL or BREWDESK_AUTH_JWKS_JSON"
                .to_string(),
        });
    }

    let jwks_timeout_ms = parse_u64(
        kv.get("BREWDESK_AUTH_JWKS_TIMEOUT_MS"),
        2000,
        "BREWDESK_AUTH_JWKS_TIMEOUT_MS",
    )?;
    let clock_skew_secs = parse_u64(
        kv.get("BREWDESK_AUTH_CLOCK_SKEW_SECS"),
        60,
        "BREWDESK_AUTH_CLOCK_SKEW_SECS",
    )?;

    Ok(AuthConfig {
        mode,
        permissions_claim,
        issuer: optional(kv, "BREWDESK_AUTH_ISSUER"),
        audience: optional(kv, "BREWDESK_AUTH_AUDIENCE"),
        jwks_url,
        jwks_json,
        jwks_timeout: Duration::from_millis(jwks_timeout_ms),
        clock_skew: Duration::from_secs(clock_skew_secs),
    })
}
