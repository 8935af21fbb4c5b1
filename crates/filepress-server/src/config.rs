use anyhow::{bail, Context};

use filepress_core::constants::{DEFAULT_HOST, DEFAULT_PORT, DEFAULT_TELEGRAM_WEBHOOK_PATH};

/// Process configuration, read from the environment once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    // App
    pub host: String,
    pub port: u16,
    pub app_domain: String,
    pub app_api_subdomain: Option<String>,
    pub app_secret_key: String,
    pub production: bool,

    // Processing service
    pub ilove_public_key: String,
    pub ilove_secret_key: Option<String>,

    // Fast store
    pub redis_url: String,

    // Durable store
    pub sb_url: String,
    pub sb_rest_url: String,
    pub sb_anon_key: String,
    pub sb_service_key: String,

    // Chat bot
    pub bot_token: String,
    pub bot_webhook_domain: Option<String>,
    pub bot_webhook_path: String,
    pub bot_webhook_secret: Option<String>,
}

fn required(name: &'static str) -> anyhow::Result<String> {
    std::env::var(name).with_context(|| format!("missing required env var {name}"))
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let port = match optional("PORT") {
            Some(raw) => raw.parse().with_context(|| format!("invalid PORT: {raw}"))?,
            None => DEFAULT_PORT,
        };

        // REDIS_URL wins; otherwise host+port compose one.
        let redis_url = match optional("REDIS_URL") {
            Some(url) => url,
            None => match (optional("REDIS_HOST"), optional("REDIS_PORT")) {
                (Some(host), Some(redis_port)) => format!("redis://{host}:{redis_port}"),
                _ => bail!("set REDIS_URL, or both REDIS_HOST and REDIS_PORT"),
            },
        };

        Ok(Self {
            host: optional("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            app_domain: required("APP_DOMAIN")?,
            app_api_subdomain: optional("APP_API_SUBDOMAIN"),
            app_secret_key: required("APP_SECRET_KEY")?,
            production: optional("APP_ENV").as_deref() == Some("production"),
            ilove_public_key: required("ILOVEAPI_PUBLIC_KEY")?,
            ilove_secret_key: optional("ILOVEAPI_SECRET_KEY"),
            redis_url,
            sb_url: required("SB_URL")?,
            sb_rest_url: required("SB_REST_URL")?,
            sb_anon_key: required("SB_ANON_KEY")?,
            sb_service_key: required("SB_SERVICE_KEY")?,
            bot_token: required("TELEGRAF_BOT_TOKEN")?,
            bot_webhook_domain: optional("TELEGRAF_WEBHOOK_DOMAIN"),
            bot_webhook_path: optional("TELEGRAF_WEBHOOK_PATH")
                .unwrap_or_else(|| DEFAULT_TELEGRAM_WEBHOOK_PATH.to_string()),
            bot_webhook_secret: optional("TELEGRAF_WEBHOOK_SECRET_TOKEN"),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Hosts allowed to post processing-service webhooks without the shared
    /// secret: our own domains plus the service's, subdomains included.
    pub fn webhook_allowed_hosts(&self) -> Vec<String> {
        let mut hosts = vec![
            self.app_domain.clone(),
            ".ilovepdf.com".to_string(),
            ".iloveimg.com".to_string(),
        ];
        if let Some(sub) = &self.app_api_subdomain {
            hosts.push(format!("{sub}.{}", self.app_domain));
        }
        hosts
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
