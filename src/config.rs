use std::time::Duration;

pub const DEFAULT_ARM_ENDPOINT: &str = "https://management.azure.com";

/// Where and how vaults get created. Loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the Functions host expects the custom handler on.
    pub port: u16,
    pub subscription_id: String,
    pub tenant_id: String,
    pub resource_group_name: String,
    /// Azure region for new vaults, e.g. `westeurope`.
    pub location: String,
    /// Resource manager base URL. Overridable for sovereign clouds.
    pub arm_endpoint: String,
    /// Upper bound on waiting for the create operation to finish.
    pub create_timeout: Duration,
    /// Poll interval used when ARM does not send `Retry-After`.
    pub poll_interval: Duration,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Config {
    pub fn arm_scope(&self) -> String {
        format!("{}/.default", self.arm_endpoint.trim_end_matches('/'))
    }
}

const REQUIRED: [&str; 4] = [
    "KV_CREATION_AZURE_SUBSCRIPTION_ID",
    "KV_CREATION_AZURE_TENANT_ID",
    "KV_CREATION_RESOURCE_GROUP_NAME",
    "KV_CREATION_LOCATION",
];

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    from_lookup(|key| std::env::var(key).ok())
}

/// Build a `Config` from any key lookup. Fails listing every missing
/// required variable rather than only the first.
pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    let missing: Vec<&str> = REQUIRED
        .iter()
        .copied()
        .filter(|key| get(*key).is_none())
        .collect();
    if !missing.is_empty() {
        anyhow::bail!(
            "missing required environment variables: {}",
            missing.join(", ")
        );
    }
    let required = |key: &str| get(key).unwrap_or_default();

    let parse_secs = |key: &str, default: u64| -> anyhow::Result<Duration> {
        let secs = match get(key) {
            Some(v) => v
                .trim()
                .parse::<u64>()
                .map_err(|e| anyhow::anyhow!("{key} must be a whole number of seconds: {e}"))?,
            None => default,
        };
        if secs == 0 {
            anyhow::bail!("{key} must be at least 1 second");
        }
        Ok(Duration::from_secs(secs))
    };

    let port = match get("FUNCTIONS_CUSTOMHANDLER_PORT") {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("FUNCTIONS_CUSTOMHANDLER_PORT is not a port: {e}"))?,
        None => 8080,
    };

    let log_format = match get("LOG_FORMAT").as_deref().map(str::to_ascii_lowercase).as_deref() {
        None | Some("json") => LogFormat::Json,
        Some("pretty") => LogFormat::Pretty,
        Some(other) => anyhow::bail!("LOG_FORMAT must be 'json' or 'pretty', got '{other}'"),
    };

    Ok(Config {
        port,
        subscription_id: required("KV_CREATION_AZURE_SUBSCRIPTION_ID"),
        tenant_id: required("KV_CREATION_AZURE_TENANT_ID"),
        resource_group_name: required("KV_CREATION_RESOURCE_GROUP_NAME"),
        location: required("KV_CREATION_LOCATION"),
        arm_endpoint: get("KV_CREATION_ARM_ENDPOINT")
            .unwrap_or_else(|| DEFAULT_ARM_ENDPOINT.into())
            .trim_end_matches('/')
            .to_string(),
        create_timeout: parse_secs("KV_CREATION_TIMEOUT_SECS", 300)?,
        poll_interval: parse_secs("KV_CREATION_POLL_INTERVAL_SECS", 5)?,
        log_format,
    })
}
