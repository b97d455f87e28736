use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub rewards: RewardsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Where the reward ledger is persisted across restarts.
    #[serde(default = "default_ledger_file")]
    pub ledger_file: PathBuf,
    /// How many completed plays the history view keeps.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Cadences and tolerances for the live sync machinery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Heartbeat cadence while a client is audibly playing a song.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Fallback polling interval — materially slower than the heartbeat;
    /// push is authoritative for time-sensitive sync.
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,
    /// Refresh interval for leaderboard / play history aggregates.
    #[serde(default = "default_aggregate_refresh_secs")]
    pub aggregate_refresh_secs: u64,
    /// Slack applied when judging client "song ended" reports against the
    /// server clock.
    #[serde(default = "default_end_tolerance_secs")]
    pub end_tolerance_secs: f64,
    /// Hard cap on the audio-asset duration probe.
    #[serde(default = "default_duration_probe_ms")]
    pub duration_probe_ms: u64,
    /// Duration assumed when the probe times out or the asset carries none.
    #[serde(default = "default_song_duration_secs")]
    pub default_song_duration_secs: f64,
}

/// Price tiers in base units of the external ledger's token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    #[serde(default = "default_price_queue_song")]
    pub queue_song: u64,
    #[serde(default = "default_price_shoutout")]
    pub shoutout: u64,
    #[serde(default = "default_price_ad")]
    pub ad: u64,
    #[serde(default = "default_price_skip")]
    pub skip_to_random: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Hard recording cap for a shoutout, seconds.
    #[serde(default = "default_shoutout_max_secs")]
    pub shoutout_max_secs: u64,
    /// Hard recording cap for an ad, seconds.
    #[serde(default = "default_ad_max_secs")]
    pub ad_max_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardsConfig {
    /// Reward accrued per (listener, play instance), base units.
    #[serde(default = "default_reward_per_song")]
    pub per_song: u64,
    /// Longest day gap that still continues a streak.  1 means activity
    /// yesterday keeps the streak alive; a larger gap resets it.
    #[serde(default = "default_streak_grace_days")]
    pub streak_grace_days: u32,
}

impl SyncConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_secs)
    }

    pub fn aggregate_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.aggregate_refresh_secs)
    }

    pub fn duration_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.duration_probe_ms)
    }
}

impl RecordingConfig {
    /// Maximum capture length for the given note kind.
    pub fn max_secs(&self, kind: crate::model::VoiceNoteKind) -> u64 {
        match kind {
            crate::model::VoiceNoteKind::Shoutout => self.shoutout_max_secs,
            crate::model::VoiceNoteKind::Ad => self.ad_max_secs,
        }
    }
}

impl PricingConfig {
    pub fn voice_note(&self, kind: crate::model::VoiceNoteKind) -> u64 {
        match kind {
            crate::model::VoiceNoteKind::Shoutout => self.shoutout,
            crate::model::VoiceNoteKind::Ad => self.ad,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ledger_file: default_ledger_file(),
            history_limit: default_history_limit(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat_secs(),
            poll_secs: default_poll_secs(),
            aggregate_refresh_secs: default_aggregate_refresh_secs(),
            end_tolerance_secs: default_end_tolerance_secs(),
            duration_probe_ms: default_duration_probe_ms(),
            default_song_duration_secs: default_song_duration_secs(),
        }
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            queue_song: default_price_queue_song(),
            shoutout: default_price_shoutout(),
            ad: default_price_ad(),
            skip_to_random: default_price_skip(),
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            shoutout_max_secs: default_shoutout_max_secs(),
            ad_max_secs: default_ad_max_secs(),
        }
    }
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            per_song: default_reward_per_song(),
            streak_grace_days: default_streak_grace_days(),
        }
    }
}

fn default_ledger_file() -> PathBuf {
    platform::data_dir().join("ledger.json")
}

fn default_history_limit() -> usize {
    50
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8787
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_poll_secs() -> u64 {
    45
}

fn default_aggregate_refresh_secs() -> u64 {
    60
}

fn default_end_tolerance_secs() -> f64 {
    2.0
}

fn default_duration_probe_ms() -> u64 {
    4000
}

fn default_song_duration_secs() -> f64 {
    180.0
}

fn default_price_queue_song() -> u64 {
    1_000
}

fn default_price_shoutout() -> u64 {
    500
}

fn default_price_ad() -> u64 {
    5_000
}

fn default_price_skip() -> u64 {
    2_000
}

fn default_shoutout_max_secs() -> u64 {
    15
}

fn default_ad_max_secs() -> u64 {
    60
}

fn default_reward_per_song() -> u64 {
    10
}

fn default_streak_grace_days() -> u32 {
    1
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            http: HttpConfig::default(),
            sync: SyncConfig::default(),
            pricing: PricingConfig::default(),
            recording: RecordingConfig::default(),
            rewards: RewardsConfig::default(),
        }
    }
}
