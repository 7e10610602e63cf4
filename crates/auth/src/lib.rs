use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde_json::Value;

pub use brewdesk_contracts::Capability;

/// Identity provider boundary: yields the bearer token of the signed-in actor, if any.
pub trait TokenSource: Send + Sync {
    fn active_token(&self) -> Option<String>;
}

/// Token holder handed out at session start and updated on renewal or sign-out.
#[derive(Clone, Default)]
pub struct SessionToken {
    inner: Arc<RwLock<Option<String>>>,
}

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(token.into()))),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn replace(&self, token: impl Into<String>) {
        *write_guard(&self.inner) = Some(token.into());
    }

    pub fn clear(&self) {
        *write_guard(&self.inner) = None;
    }
}

impl TokenSource for SessionToken {
    fn active_token(&self) -> Option<String> {
        read_guard(&self.inner)
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationMode {
    Unverified,
    Jwks,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub mode: VerificationMode,
    pub permissions_claim: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub jwks_url: Option<String>,
    pub jwks_json: Option<String>,
    pub jwks_timeout: Duration,
    pub clock_skew: Duration,
}

impl AuthConfig {
    pub fn unverified() -> Self {
        Self {
            mode: VerificationMode::Unverified,
            permissions_claim: "permissions".to_string(),
            issuer: None,
            audience: None,
            jwks_url: None,
            jwks_json: None,
            jwks_timeout: Duration::from_millis(2000),
            clock_skew: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AuthError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorClaims {
    pub subject: Option<String>,
    pub permissions: Vec<String>,
}

impl ActorClaims {
    pub fn grants(&self, capability: &str) -> bool {
        self.permissions.iter().any(|p| p == capability)
    }
}

/// Answers capability questions for whoever currently holds the session token.
///
/// Nothing is cached between calls: every `can` decodes the token the
/// [`TokenSource`] returns at that moment, so a renewed or cleared token takes
/// effect on the next check.
#[derive(Clone)]
pub struct PermissionOracle {
    config: AuthConfig,
    tokens: Arc<dyn TokenSource>,
    http: reqwest::Client,
    jwks: Arc<RwLock<Option<JwkSet>>>,
}

impl PermissionOracle {
    pub async fn new(config: AuthConfig, tokens: Arc<dyn TokenSource>) -> Result<Self, AuthError> {
        if config.permissions_claim.trim().is_empty() {
            return Err(AuthError {
                code: "ERR_INVALID_CONFIG",
                message: "permissions claim must be non-empty".to_string(),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(config.jwks_timeout)
            .build()
            .map_err(|_| AuthError {
                code: "ERR_INTERNAL",
                message: "failed to initialize jwks http client".to_string(),
            })?;

        let jwks = match config.mode {
            VerificationMode::Unverified => None,
            VerificationMode::Jwks => Some(load_jwks(&http, &config).await?),
        };

        Ok(Self {
            config,
            tokens,
            http,
            jwks: Arc::new(RwLock::new(jwks)),
        })
    }

    /// Oracle that reads claims without checking signatures, the way a browser
    /// console trusts the token its identity provider handed it.
    pub fn unverified(tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            config: AuthConfig::unverified(),
            tokens,
            http: reqwest::Client::new(),
            jwks: Arc::new(RwLock::new(None)),
        }
    }

    pub fn mode(&self) -> VerificationMode {
        self.config.mode
    }

    pub fn can(&self, capability: impl AsRef<str>) -> bool {
        let capability = capability.as_ref();
        match self.claims() {
            Ok(claims) => claims.grants(capability),
            Err(err) => {
                tracing::debug!(code = err.code, capability, "auth.capability_denied");
                false
            }
        }
    }

    pub fn active_token(&self) -> Option<String> {
        self.tokens.active_token()
    }

    /// `Authorization` header value for outbound requests.
    pub fn authorization(&self) -> Option<String> {
        self.active_token().map(|token| format!("Bearer {}", token))
    }

    pub fn claims(&self) -> Result<ActorClaims, AuthError> {
        let token = self.active_token().ok_or_else(|| AuthError {
            code: "ERR_AUTH_REQUIRED",
            message: "no active session token".to_string(),
        })?;

        let claims = match self.config.mode {
            VerificationMode::Unverified => self.decode_unverified(&token)?,
            VerificationMode::Jwks => self.decode_verified(&token)?,
        };

        let subject = claims
            .get("sub")
            .and_then(|v| v.as_str())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());
        let permissions = claim_string_vec(&claims, &self.config.permissions_claim)?;

        Ok(ActorClaims {
            subject,
            permissions,
        })
    }

    /// Re-fetches signing keys; only meaningful in JWKS mode with a key URL.
    pub async fn refresh_keys(&self) -> Result<(), AuthError> {
        if self.config.mode != VerificationMode::Jwks {
            return Ok(());
        }
        let fresh = load_jwks(&self.http, &self.config).await?;
        *write_guard(&self.jwks) = Some(fresh);
        Ok(())
    }

    fn validation(&self, alg: Algorithm) -> Validation {
        let mut validation = Validation::new(alg);
        validation.required_spec_claims.clear();
        validation.leeway = self.config.clock_skew.as_secs();
        if let Some(issuer) = self.config.issuer.as_ref() {
            validation.set_issuer(std::slice::from_ref(issuer));
        }
        match self.config.audience.as_ref() {
            Some(audience) => validation.set_audience(std::slice::from_ref(audience)),
            None => validation.validate_aud = false,
        }
        validation
    }

    fn decode_unverified(&self, token: &str) -> Result<Value, AuthError> {
        let header = decode_header(token).map_err(|_| AuthError {
            code: "ERR_AUTH_INVALID",
            message: "invalid JWT header".to_string(),
        })?;

        let mut validation = self.validation(header.alg);
        validation.insecure_disable_signature_validation();

        decode::<Value>(token, &DecodingKey::from_secret(&[]), &validation)
            .map(|decoded| decoded.claims)
            .map_err(|_| AuthError {
                code: "ERR_AUTH_INVALID",
                message: "JWT claims failed validation".to_string(),
            })
    }

    fn decode_verified(&self, token: &str) -> Result<Value, AuthError> {
        let header = decode_header(token).map_err(|_| AuthError {
            code: "ERR_AUTH_INVALID",
            message: "invalid JWT header".to_string(),
        })?;

        if header.alg != Algorithm::RS256 {
            return Err(AuthError {
                code: "ERR_AUTH_INVALID",
                message: "unsupported JWT alg (expected RS256)".to_string(),
            });
        }

        let kid = header.kid.ok_or_else(|| AuthError {
            code: "ERR_AUTH_INVALID",
            message: "JWT header missing kid".to_string(),
        })?;

        let decoding_key = {
            let jwks = read_guard(&self.jwks);
            let jwk = jwks
                .as_ref()
                .and_then(|set| set.find(&kid))
                .ok_or_else(|| AuthError {
                    code: "ERR_AUTH_INVALID",
                    message: "JWT kid not found in JWKS".to_string(),
                })?;
            DecodingKey::from_jwk(jwk).map_err(|_| AuthError {
                code: "ERR_AUTH_INVALID",
                message: "failed to parse JWK decoding key".to_string(),
            })?
        };

        decode::<Value>(token, &decoding_key, &self.validation(Algorithm::RS256))
            .map(|decoded| decoded.claims)
            .map_err(|_| AuthError {
                code: "ERR_AUTH_INVALID",
                message: "JWT validation failed".to_string(),
            })
    }
}

async fn load_jwks(http: &reqwest::Client, config: &AuthConfig) -> Result<JwkSet, AuthError> {
    if let Some(jwks_json) = config.jwks_json.as_ref() {
        return serde_json::from_str::<JwkSet>(jwks_json).map_err(|_| AuthError {
            code: "ERR_INVALID_CONFIG",
            message: "BREWDESK_AUTH_JWKS_JSON is not valid JWKS JSON".to_string(),
        });
    }

    let Some(url) = config.jwks_url.as_ref() else {
        return Err(AuthError {
            code: "ERR_INVALID_CONFIG",
            message: "jwks mode requires jwks_url or jwks_json".to_string(),
        });
    };

    http.get(url)
        .send()
        .await
        .map_err(|_| AuthError {
            code: "ERR_AUTH_UNAVAILABLE",
            message: "failed to fetch JWKS".to_string(),
        })?
        .error_for_status()
        .map_err(|_| AuthError {
            code: "ERR_AUTH_UNAVAILABLE",
            message: "JWKS endpoint returned non-success status".to_string(),
        })?
        .json::<JwkSet>()
        .await
        .map_err(|_| AuthError {
            code: "ERR_AUTH_UNAVAILABLE",
            message: "failed to parse JWKS JSON".to_string(),
        })
}

fn claim_string_vec(claims: &Value, claim: &str) -> Result<Vec<String>, AuthError> {
    let Some(value) = claims.get(claim) else {
        return Ok(Vec::new());
    };

    match value {
        Value::String(s) => {
            let mut out = s
                .split_whitespace()
                .map(|s| s.to_string())
                .collect::<Vec<_>>();
            out.sort();
            out.dedup();
            Ok(out)
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let Some(s) = item.as_str() else {
                    return Err(AuthError {
                        code: "ERR_AUTH_INVALID",
                        message: format!("claim `{}` must be a string array", claim),
                    });
                };
                let s = s.trim();
                if !s.is_empty() {
                    out.push(s.to_string());
                }
            }
            out.sort();
            out.dedup();
            Ok(out)
        }
        _ => Err(AuthError {
            code: "ERR_AUTH_INVALID",
            message: format!("claim `{}` must be a string or a string array", claim),
        }),
    }
}

fn read_guard<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_guard<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
