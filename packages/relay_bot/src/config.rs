use anyhow::{Context, Result, bail};
use relay_core::{CaptchaMode, ChatId, RelaySettings, RetryPolicy};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Equivalent ways to configure:
//
//   config.toml:     [captcha]
//                    use_math = true
//
//   env var:         RELAY_CAPTCHA__USE_MATH=true   (double underscore = nesting)
//
//   legacy env var:  USE_MATH_CAPTCHA=true
//
// The legacy names (BOT_TOKEN, GROUP_ID, VERIFY_QUESTION, VERIFY_ANSWER,
// USE_MATH_CAPTCHA) are the outermost layer.

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub bot: BotFileConfig,
    #[serde(default)]
    pub workspace: WorkspaceFileConfig,
    #[serde(default)]
    pub captcha: CaptchaFileConfig,
    #[serde(default)]
    pub storage: StorageFileConfig,
    #[serde(default)]
    pub relay: RelayFileConfig,
}

/// Bot API access (lives under `[bot]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BotFileConfig {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub token: Option<String>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Long-poll timeout passed to getUpdates.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

impl Default for BotFileConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_url: default_api_url(),
            poll_timeout_secs: default_poll_timeout_secs(),
        }
    }
}

/// The staff forum chat (lives under `[workspace]`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WorkspaceFileConfig {
    #[serde(default)]
    pub group_id: i64,
}

/// Admission settings (lives under `[captcha]`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CaptchaFileConfig {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub question: Option<String>,
    /// Any set value, even an empty one, turns on the fixed-secret check.
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub answer: Option<String>,
    #[serde(default, deserialize_with = "lenient::bool")]
    pub use_math: bool,
}

/// Where durable state goes (lives under `[storage]`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StorageFileConfig {
    /// Defaults to `<data-dir>/topic_mapping.json`.
    #[serde(default)]
    pub state_file: Option<PathBuf>,
}

/// Relay timings (lives under `[relay]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelayFileConfig {
    #[serde(default = "default_health_ttl_secs")]
    pub health_ttl_secs: u64,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_provision_attempts")]
    pub provision_attempts: u32,
    #[serde(default = "default_provision_retry_delay_ms")]
    pub provision_retry_delay_ms: u64,
    #[serde(default = "default_link_ttl_secs")]
    pub link_ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_challenge_ttl_secs")]
    pub challenge_ttl_secs: u64,
}

impl Default for RelayFileConfig {
    fn default() -> Self {
        Self {
            health_ttl_secs: default_health_ttl_secs(),
            settle_delay_ms: default_settle_delay_ms(),
            provision_attempts: default_provision_attempts(),
            provision_retry_delay_ms: default_provision_retry_delay_ms(),
            link_ttl_secs: default_link_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            challenge_ttl_secs: default_challenge_ttl_secs(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.telegram.org".to_string()
}
fn default_poll_timeout_secs() -> u64 {
    30
}
fn default_health_ttl_secs() -> u64 {
    60
}
fn default_settle_delay_ms() -> u64 {
    500
}
fn default_provision_attempts() -> u32 {
    3
}
fn default_provision_retry_delay_ms() -> u64 {
    1000
}
fn default_link_ttl_secs() -> u64 {
    86400
}
fn default_sweep_interval_secs() -> u64 {
    3600
}
fn default_challenge_ttl_secs() -> u64 {
    300
}

/// Env values arrive pre-parsed by figment, so `VERIFY_ANSWER=42` is a number
/// and `USE_MATH_CAPTCHA=True` a string. Accept either shape.
mod lenient {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Bool(bool),
        Int(i64),
        Float(f64),
        Text(String),
    }

    impl Scalar {
        fn into_string(self) -> String {
            match self {
                Scalar::Bool(b) => b.to_string(),
                Scalar::Int(i) => i.to_string(),
                Scalar::Float(f) => f.to_string(),
                Scalar::Text(s) => s,
            }
        }
    }

    pub fn opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(Option::<Scalar>::deserialize(d)?
            .map(Scalar::into_string)
            .filter(|s| !s.is_empty()))
    }

    /// Like `opt_string` but keeps empty values.
    pub fn opt_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(Option::<Scalar>::deserialize(d)?.map(Scalar::into_string))
    }

    pub fn bool<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        Ok(match Option::<Scalar>::deserialize(d)? {
            Some(Scalar::Bool(b)) => b,
            Some(Scalar::Int(i)) => i != 0,
            Some(Scalar::Text(s)) => s.trim().eq_ignore_ascii_case("true"),
            Some(Scalar::Float(_)) | None => false,
        })
    }
}

const LEGACY_ENV: &[(&str, &str)] = &[
    ("BOT_TOKEN", "bot.token"),
    ("GROUP_ID", "workspace.group_id"),
    ("VERIFY_QUESTION", "captcha.question"),
    ("VERIFY_ANSWER", "captcha.answer"),
    ("USE_MATH_CAPTCHA", "captcha.use_math"),
];

/// Build a figment that layers: defaults → config.toml → RELAY_* env vars →
/// legacy env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `RELAY_BOT__TOKEN=...`  →  `bot.token = "..."`
///   `RELAY_RELAY__HEALTH_TTL_SECS=30`  →  `relay.health_ttl_secs = 30`
pub fn load_config(config_file: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let legacy = Env::raw()
        .only(&LEGACY_ENV.iter().map(|(k, _)| *k).collect::<Vec<_>>())
        .map(|key| {
            LEGACY_ENV
                .iter()
                .find(|(name, _)| key == *name)
                .map(|(_, path)| (*path).into())
                .unwrap_or_else(|| key.as_str().to_string().into())
        });

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_file))
        .merge(Env::prefixed("RELAY_").split("__"))
        .merge(legacy)
}

// =============================================================================
// Resolved config (validated, used by main)
// =============================================================================

#[derive(Clone, Debug)]
pub struct BotConfig {
    pub token: String,
    pub api_url: String,
    pub poll_timeout: Duration,
    pub state_file: PathBuf,
    pub sweep_interval: Duration,
    pub relay: RelaySettings,
}

impl BotConfig {
    pub fn from_file(fc: &FileConfig, data_dir: &Path) -> Result<Self> {
        let Some(token) = fc.bot.token.clone().filter(|t| !t.trim().is_empty()) else {
            bail!("bot token is not set (BOT_TOKEN or [bot] token)");
        };
        if fc.workspace.group_id == 0 {
            bail!("workspace group id is not set (GROUP_ID or [workspace] group_id)");
        }

        let captcha = CaptchaMode::resolve(
            fc.captcha.use_math,
            fc.captcha.question.clone(),
            fc.captcha.answer.clone(),
        );

        let r = &fc.relay;
        let mut relay = RelaySettings::new(ChatId(fc.workspace.group_id), captcha);
        relay.health_ttl = Duration::from_secs(r.health_ttl_secs);
        relay.settle_delay = Duration::from_millis(r.settle_delay_ms);
        relay.provision_retry = RetryPolicy::fixed(
            r.provision_attempts.max(1),
            Duration::from_millis(r.provision_retry_delay_ms),
        );
        relay.link_ttl = Duration::from_secs(r.link_ttl_secs);
        relay.challenge_ttl = Duration::from_secs(r.challenge_ttl_secs);

        Ok(Self {
            token,
            api_url: fc.bot.api_url.trim_end_matches('/').to_string(),
            poll_timeout: Duration::from_secs(fc.bot.poll_timeout_secs),
            state_file: fc
                .storage
                .state_file
                .clone()
                .unwrap_or_else(|| data_dir.join("topic_mapping.json")),
            sweep_interval: Duration::from_secs(r.sweep_interval_secs.max(1)),
            relay,
        })
    }
}

// =============================================================================
// Directory layout (derived from --data-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct DataDir {
    pub root: PathBuf,
}

impl DataDir {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let root = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("could not find home directory")?
                .join(".relay-bot"),
        };
        std::fs::create_dir_all(&root)
            .with_context(|| format!("failed to create data directory: {:?}", root))?;
        Ok(Self { root })
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }
}
