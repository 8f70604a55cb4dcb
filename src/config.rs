use crate::breaker::BreakerPolicy;
use crate::error::ConfigError;
use std::fmt::Display;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const TELEGRAM_BASE_URL: &str = "https://api.telegram.org";

const DEADLINE_MS_RANGE: RangeInclusive<u64> = 1..=600_000;
const THRESHOLD_RANGE: RangeInclusive<u32> = 1..=1_000;
const COOLDOWN_SECS_RANGE: RangeInclusive<u64> = 1..=7 * 24 * 60 * 60;
const RATE_LIMIT_RANGE: RangeInclusive<u64> = 1..=100_000;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a concise, helpful assistant with a focus on \
     practical cyber security advice. Answer in the language the user writes in.";

#[derive(Debug, Clone)]
pub struct ProviderKey {
    pub api_key: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub token: String,
    pub chat_id: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub api_secret: String,
    pub groq: Option<ProviderKey>,
    pub openai: Option<ProviderKey>,
    pub gemini: Option<ProviderKey>,
    pub system_prompt: String,
    pub telegram: Option<TelegramConfig>,
    pub chat_deadline: Duration,
    pub breaker: BreakerPolicy,
    pub rate_limit_per_minute: u64,
    /// Key clients by forwarded headers instead of the socket peer.
    pub trust_proxy: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let provider = |key: &'static str, url_key: &'static str, default_url: &str| {
            get(key).map(|api_key| ProviderKey {
                api_key,
                base_url: get(url_key).unwrap_or_else(|| default_url.to_string()),
            })
        };

        let groq = provider("GROQ_KEY", "GROQ_BASE_URL", GROQ_BASE_URL);
        let openai = provider("OPENAI_KEY", "OPENAI_BASE_URL", OPENAI_BASE_URL);
        let gemini = provider("GEMINI_KEY", "GEMINI_BASE_URL", GEMINI_BASE_URL);

        if groq.is_none() && openai.is_none() && gemini.is_none() {
            return Err(ConfigError::NoProviders);
        }

        let telegram = match (get("TG_TOKEN"), get("TG_CHAT_ID")) {
            (Some(token), Some(chat_id)) => Some(TelegramConfig {
                token,
                chat_id,
                base_url: get("TG_BASE_URL").unwrap_or_else(|| TELEGRAM_BASE_URL.to_string()),
            }),
            _ => None,
        };

        let defaults = BreakerPolicy::default();

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(get("PORT"), "PORT", 3000)?,
            api_secret: get("API_SECRET").ok_or(ConfigError::Missing("API_SECRET"))?,
            groq,
            openai,
            gemini,
            system_prompt: get("SYSTEM_PROMPT").unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            telegram,
            chat_deadline: Duration::from_millis(parse_in(
                get("CHAT_DEADLINE_MS"),
                "CHAT_DEADLINE_MS",
                12_000,
                DEADLINE_MS_RANGE,
            )?),
            breaker: BreakerPolicy {
                failure_threshold: parse_in(
                    get("BREAKER_THRESHOLD"),
                    "BREAKER_THRESHOLD",
                    defaults.failure_threshold,
                    THRESHOLD_RANGE,
                )?,
                cooldown: Duration::from_secs(parse_in(
                    get("BREAKER_COOLDOWN_SECS"),
                    "BREAKER_COOLDOWN_SECS",
                    defaults.cooldown.as_secs(),
                    COOLDOWN_SECS_RANGE,
                )?),
            },
            rate_limit_per_minute: parse_in(
                get("RATE_LIMIT_RPM"),
                "RATE_LIMIT_RPM",
                20,
                RATE_LIMIT_RANGE,
            )?,
            trust_proxy: parse_or(get("TRUST_PROXY"), "TRUST_PROXY", false)?,
        })
    }
}

fn parse_or<T: FromStr>(
    value: Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
    }
}

fn parse_in<T>(
    value: Option<String>,
    name: &'static str,
    default: T,
    range: RangeInclusive<T>,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Display,
{
    let parsed = parse_or(value, name, default)?;
    if range.contains(&parsed) {
        Ok(parsed)
    } else {
        Err(ConfigError::Invalid {
            name,
            value: format!("{parsed} (expected {}..={})", range.start(), range.end()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_required_values_set() {
        let config =
            Config::from_lookup(lookup(&[("API_SECRET", "s3cret"), ("GROQ_KEY", "gk")])).unwrap();

        assert_eq!(config.port, 3000);
        assert_eq!(config.chat_deadline, Duration::from_millis(12_000));
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.breaker.cooldown, Duration::from_secs(300));
        assert_eq!(config.groq.unwrap().base_url, GROQ_BASE_URL);
        assert!(config.openai.is_none());
        assert!(config.telegram.is_none());
        assert!(!config.trust_proxy);
    }

    #[test]
    fn missing_secret_is_rejected() {
        let err = Config::from_lookup(lookup(&[("GROQ_KEY", "gk")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("API_SECRET")));
    }

    #[test]
    fn at_least_one_provider_required() {
        let err = Config::from_lookup(lookup(&[("API_SECRET", "s"), ("GROQ_KEY", "  ")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::NoProviders));
    }

    #[test]
    fn invalid_number_is_reported_with_its_name() {
        let err = Config::from_lookup(lookup(&[
            ("API_SECRET", "s"),
            ("GEMINI_KEY", "k"),
            ("BREAKER_THRESHOLD", "three"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                name: "BREAKER_THRESHOLD",
                ..
            }
        ));
    }

    #[test]
    fn zero_and_oversized_limits_are_rejected() {
        for (name, value) in [
            ("BREAKER_THRESHOLD", "0"),
            ("BREAKER_COOLDOWN_SECS", "0"),
            ("BREAKER_COOLDOWN_SECS", "18446744073709551615"),
            ("RATE_LIMIT_RPM", "0"),
            ("CHAT_DEADLINE_MS", "0"),
            ("CHAT_DEADLINE_MS", "18446744073709551615"),
        ] {
            let err = Config::from_lookup(lookup(&[
                ("API_SECRET", "s"),
                ("GROQ_KEY", "k"),
                (name, value),
            ]))
            .unwrap_err();
            match err {
                ConfigError::Invalid { name: reported, .. } => assert_eq!(reported, name),
                other => panic!("{name}={value} gave {other:?}"),
            }
        }
    }

    #[test]
    fn limits_at_the_edges_are_accepted() {
        let config = Config::from_lookup(lookup(&[
            ("API_SECRET", "s"),
            ("GROQ_KEY", "k"),
            ("BREAKER_THRESHOLD", "1"),
            ("BREAKER_COOLDOWN_SECS", "604800"),
            ("RATE_LIMIT_RPM", "1"),
            ("TRUST_PROXY", "true"),
        ]))
        .unwrap();
        assert_eq!(config.breaker.failure_threshold, 1);
        assert_eq!(config.breaker.cooldown, Duration::from_secs(604_800));
        assert_eq!(config.rate_limit_per_minute, 1);
        assert!(config.trust_proxy);
    }

    #[test]
    fn telegram_needs_both_token_and_chat() {
        let only_token = Config::from_lookup(lookup(&[
            ("API_SECRET", "s"),
            ("OPENAI_KEY", "k"),
            ("TG_TOKEN", "t"),
        ]))
        .unwrap();
        assert!(only_token.telegram.is_none());

        let both = Config::from_lookup(lookup(&[
            ("API_SECRET", "s"),
            ("OPENAI_KEY", "k"),
            ("TG_TOKEN", "t"),
            ("TG_CHAT_ID", "42"),
        ]))
        .unwrap();
        assert_eq!(both.telegram.unwrap().chat_id, "42");
    }
}
