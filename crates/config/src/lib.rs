use serde::Deserialize;
use std::collections::HashMap;
use url::Url;

/// Read a secret from `<name>_FILE` when set, otherwise from `<name>`
fn secret_from_env(name: &str) -> String {
    let file_var = format!("{}_FILE", name);
    if let Ok(path) = std::env::var(&file_var) {
        std::fs::read_to_string(&path)
            .map(|p| p.trim().to_string())
            .unwrap_or_else(|e| panic!("Failed to read {} at {}: {}", file_var, path, e))
    } else {
        std::env::var(name).unwrap_or_default()
    }
}

fn parsed_env<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn url_from_env(name: &str, default: &str) -> Url {
    let raw = std::env::var(name).unwrap_or_else(|_| default.to_string());
    Url::parse(&raw).unwrap_or_else(|e| panic!("{} must be a valid URL: {}", name, e))
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: Option<String>,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub max_connections: u32,
    pub tls_enabled: bool,
    pub tls_ca_cert_path: Option<String>,
    /// Use native-tls and accept self-signed server certificates
    pub tls_accept_invalid_certs: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let password = secret_from_env("DATABASE_PASSWORD");
        Self {
            host: std::env::var("DATABASE_HOST").ok(),
            port: parsed_env("DATABASE_PORT", 5432),
            database: std::env::var("DATABASE_NAME").unwrap_or_else(|_| "chat_billing".to_string()),
            username: std::env::var("DATABASE_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: if password.is_empty() {
                "postgres".to_string()
            } else {
                password
            },
            max_connections: parsed_env("DATABASE_MAX_CONNECTIONS", 10),
            tls_enabled: parsed_env("DATABASE_TLS_ENABLED", false),
            tls_ca_cert_path: std::env::var("DATABASE_TLS_CA_CERT_PATH").ok(),
            tls_accept_invalid_certs: parsed_env("DATABASE_TLS_ACCEPT_INVALID_CERTS", false),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parsed_env("SERVER_PORT", 8080),
        }
    }
}

/// Stripe payment configuration
#[derive(Clone, Deserialize)]
pub struct StripeConfig {
    /// Stripe secret key for API authentication
    pub secret_key: String,
    /// Stripe webhook secret for verifying webhook signatures
    pub webhook_secret: String,
    /// Default redirect after a completed checkout
    pub success_url: Url,
    /// Default redirect after an abandoned checkout
    pub cancel_url: Url,
    /// Price ids keyed by plan name, synced onto the plan catalog at startup
    pub price_ids: HashMap<String, String>,
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("secret_key", &"[REDACTED]")
            .field("webhook_secret", &"[REDACTED]")
            .field("success_url", &self.success_url.as_str())
            .field("cancel_url", &self.cancel_url.as_str())
            .field("price_ids", &self.price_ids)
            .finish()
    }
}

impl Default for StripeConfig {
    fn default() -> Self {
        let mut price_ids = HashMap::new();
        for (plan, var) in [
            ("Starter", "STRIPE_PRICE_ID_STARTER"),
            ("Pro", "STRIPE_PRICE_ID_PRO"),
        ] {
            if let Some(price_id) = std::env::var(var).ok().filter(|v| !v.trim().is_empty()) {
                price_ids.insert(plan.to_string(), price_id.trim().to_string());
            }
        }

        Self {
            secret_key: secret_from_env("STRIPE_SECRET_KEY"),
            webhook_secret: secret_from_env("STRIPE_WEBHOOK_SECRET"),
            success_url: url_from_env(
                "STRIPE_SUCCESS_URL",
                "http://localhost:3000/billing/success",
            ),
            cancel_url: url_from_env("STRIPE_CANCEL_URL", "http://localhost:3000/billing/cancel"),
            price_ids,
        }
    }
}

impl StripeConfig {
    /// Returns true if outbound Stripe calls can be made
    pub fn is_configured(&self) -> bool {
        !self.secret_key.is_empty()
    }
}

/// One entry of the per-model credit rate table
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelRateConfig {
    pub model: String,
    /// Credits per prompt token, as a decimal string
    pub input: String,
    /// Credits per completion token, as a decimal string
    pub output: String,
}

/// Billing behaviour of the subscription core
#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    /// Plan granted by the free-tier bootstrap
    pub free_plan_name: String,
    /// How long a webhook key stays in the in-process dedup set
    pub webhook_dedup_window_secs: u64,
    /// Accepted clock skew for webhook signature timestamps
    pub webhook_tolerance_secs: i64,
    /// Interval between SSE heartbeat comments
    pub sse_heartbeat_secs: u64,
    /// Per-model rates; empty means the built-in table
    pub model_rates: Vec<ModelRateConfig>,
    pub default_input_rate: Option<String>,
    pub default_output_rate: Option<String>,
}

/// Parse `model=input:output` entries separated by commas
fn parse_model_rates(raw: &str) -> Vec<ModelRateConfig> {
    raw.split(',')
        .filter_map(|entry| {
            let (model, rates) = entry.trim().split_once('=')?;
            let (input, output) = rates.split_once(':')?;
            let model = model.trim();
            if model.is_empty() {
                return None;
            }
            Some(ModelRateConfig {
                model: model.to_string(),
                input: input.trim().to_string(),
                output: output.trim().to_string(),
            })
        })
        .collect()
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            free_plan_name: std::env::var("BILLING_FREE_PLAN_NAME")
                .unwrap_or_else(|_| "Free".to_string()),
            webhook_dedup_window_secs: parsed_env("WEBHOOK_DEDUP_WINDOW_SECS", 5),
            webhook_tolerance_secs: parsed_env("WEBHOOK_TOLERANCE_SECS", 300),
            sse_heartbeat_secs: parsed_env("SSE_HEARTBEAT_SECS", 30),
            model_rates: std::env::var("MODEL_RATES")
                .map(|raw| parse_model_rates(&raw))
                .unwrap_or_default(),
            default_input_rate: std::env::var("MODEL_DEFAULT_INPUT_RATE").ok(),
            default_output_rate: std::env::var("MODEL_DEFAULT_OUTPUT_RATE").ok(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    pub exact_matches: Vec<String>,
    pub wildcard_suffixes: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        let raw_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());

        let mut exact_matches = Vec::new();
        let mut wildcard_suffixes = Vec::new();

        for origin in raw_origins.split(',') {
            let s = origin.trim();
            if s.is_empty() {
                continue;
            }

            if let Some(suffix) = s.strip_prefix('*') {
                let safe_suffix = if suffix.starts_with('.') || suffix.starts_with('-') {
                    suffix.to_string()
                } else {
                    format!(".{}", suffix)
                };
                wildcard_suffixes.push(safe_suffix);
            } else {
                exact_matches.push(s.to_string());
            }
        }

        Self {
            exact_matches,
            wildcard_suffixes,
        }
    }
}

impl CorsConfig {
    /// Exact matches, local development hosts, and https origins ending in a wildcard suffix
    pub fn is_allowed(&self, origin: &str) -> bool {
        if self.exact_matches.iter().any(|o| o == origin) {
            return true;
        }

        for local in ["http://localhost", "http://127.0.0.1"] {
            if let Some(remainder) = origin.strip_prefix(local) {
                if remainder.is_empty() || remainder.starts_with(':') {
                    return true;
                }
            }
        }

        origin.starts_with("https://")
            && self
                .wildcard_suffixes
                .iter()
                .any(|suffix| origin.ends_with(suffix.as_str()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Global log level for the application.
    ///
    /// Valid values: "error", "warn", "info", "debug", "trace".
    /// Default: "info" (from LOG_LEVEL env var or fallback).
    pub level: String,
    /// Log output format.
    ///
    /// Valid values: "pretty", "json".
    /// Default: "pretty" (from LOG_FORMAT env var or fallback).
    pub format: String,
    /// Per-module log levels.
    pub modules: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let mut modules = HashMap::new();

        if let Ok(level) = std::env::var("LOG_MODULE_API") {
            modules.insert("api".to_string(), level);
        }
        if let Ok(level) = std::env::var("LOG_MODULE_SERVICES") {
            modules.insert("services".to_string(), level);
        }
        if let Ok(level) = std::env::var("LOG_MODULE_DATABASE") {
            modules.insert("database".to_string(), level);
        }

        Self {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()),
            modules,
        }
    }
}

impl LoggingConfig {
    /// Filter directive for `tracing_subscriber::EnvFilter`
    pub fn filter_directive(&self) -> String {
        let mut modules: Vec<_> = self.modules.iter().collect();
        modules.sort();
        std::iter::once(self.level.clone())
            .chain(
                modules
                    .into_iter()
                    .map(|(module, level)| format!("{}={}", module, level)),
            )
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    /// Stripe payment configuration
    pub stripe: StripeConfig,
    pub billing: BillingConfig,
    pub cors: CorsConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database: DatabaseConfig::default(),
            server: ServerConfig::default(),
            stripe: StripeConfig::default(),
            billing: BillingConfig::default(),
            cors: CorsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
