use std::{env, time::Duration};

/// Default push backend function URL.
pub const DEFAULT_API_BASE: &str = "https://functions.poehali.dev/6adb334a-6838-4575-aef7-55e7f7744a02";

#[derive(Clone, Debug)]
pub struct Config {
    pub api_base: String,
    pub admin_token: Option<String>,
    pub app_origin: String,
    pub http_timeout_ms: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let api_base = env_or("PUSH_API_BASE", DEFAULT_API_BASE);
        let admin_token = env::var("ADMIN_TOKEN").ok().filter(|token| !token.is_empty());
        let app_origin = env_or("APP_ORIGIN", "http://localhost:3000");
        let http_timeout_ms = env_or_parse("HTTP_TIMEOUT_MS", 10_000)?;

        // Guardrail checks for nonsensical configuration.
        if http_timeout_ms == 0 {
            return Err(anyhow::anyhow!("HTTP_TIMEOUT_MS must be > 0"));
        }
        url::Url::parse(&api_base)
            .map_err(|err| anyhow::anyhow!("PUSH_API_BASE is not a valid URL: {err}"))?;
        url::Url::parse(&app_origin)
            .map_err(|err| anyhow::anyhow!("APP_ORIGIN is not a valid URL: {err}"))?;

        Ok(Self {
            api_base,
            admin_token,
            app_origin,
            http_timeout_ms,
        })
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => Ok(value.parse()?),
        Err(_) => Ok(default),
    }
}
