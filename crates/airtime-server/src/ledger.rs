//! Heartbeat reward ledger.
//!
//! Accrual is keyed on the play instance `(listener, token_id, started_at)`,
//! not the track, so a song broadcast again later earns again but duplicated
//! heartbeats within one play never multiply rewards.  `pending_rewards`
//! decreases only through a confirmed claim; a failed transfer leaves the
//! ledger byte-for-byte unchanged.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use airtime_proto::config::RewardsConfig;
use airtime_proto::error::RequestError;
use airtime_proto::model::{LeaderboardEntry, ListenerStats, TxReceipt};

use crate::external::PaymentGateway;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LedgerData {
    stats: HashMap<String, ListenerStats>,
    /// Play instances already credited, as "listener|token_id|started_at_ms".
    credited: HashSet<String>,
    /// Last calendar day each listener had qualifying activity.
    last_active: HashMap<String, NaiveDate>,
}

#[derive(Clone)]
pub struct RewardLedger {
    data: Arc<RwLock<LedgerData>>,
    ledger_file: PathBuf,
    rewards: RewardsConfig,
}

impl RewardLedger {
    /// Load persisted stats, or start empty when the file is missing or
    /// unreadable (a corrupt ledger file is logged, not fatal).
    pub fn load(ledger_file: PathBuf, rewards: RewardsConfig) -> Self {
        let data = match std::fs::read_to_string(&ledger_file) {
            Ok(content) => match serde_json::from_str::<LedgerData>(&content) {
                Ok(data) => data,
                Err(e) => {
                    warn!("ledger file {:?} unreadable, starting fresh: {}", ledger_file, e);
                    LedgerData::default()
                }
            },
            Err(_) => LedgerData::default(),
        };
        Self {
            data: Arc::new(RwLock::new(data)),
            ledger_file,
            rewards,
        }
    }

    /// Record one heartbeat for a play instance.  Returns `true` when this
    /// beat credited the instance; repeats are no-ops.
    pub async fn record_heartbeat(
        &self,
        listener: &str,
        token_id: &str,
        started_at_ms: i64,
        today: NaiveDate,
    ) -> anyhow::Result<bool> {
        let key = credit_key(listener, token_id, started_at_ms);
        {
            let mut data = self.data.write().await;
            if !data.credited.insert(key) {
                return Ok(false);
            }

            let per_song = self.rewards.per_song;
            let grace = self.rewards.streak_grace_days as i64;
            let previous = data.last_active.insert(listener.to_string(), today);
            let stats = data.stats.entry(listener.to_string()).or_default();
            stats.total_songs_listened += 1;
            stats.pending_rewards += per_song;
            stats.total_rewards_earned += per_song;

            match previous {
                Some(last) if last == today => {} // same-day repeat, streak untouched
                Some(last) if (today - last).num_days() <= grace => {
                    stats.current_streak += 1;
                }
                _ => {
                    stats.current_streak = 1;
                }
            }
            stats.longest_streak = stats.longest_streak.max(stats.current_streak);
        }
        self.save().await?;
        Ok(true)
    }

    /// Claim all pending rewards.  The external transfer is confirmed first;
    /// only then is `pending_rewards` reduced, and by exactly the amount
    /// transferred.  A failed transfer leaves the ledger unchanged.
    pub async fn claim(
        &self,
        listener: &str,
        gateway: &dyn PaymentGateway,
    ) -> Result<(TxReceipt, u64), RequestError> {
        // The write lock is held across the transfer: concurrent claims for
        // the same balance must serialize or both would be paid out.
        let mut data = self.data.write().await;
        let amount = data
            .stats
            .get(listener)
            .map(|s| s.pending_rewards)
            .unwrap_or(0);
        if amount == 0 {
            return Err(RequestError::Invalid("no pending rewards".into()));
        }

        let receipt = gateway
            .transfer_reward(listener, amount)
            .await
            .map_err(|e| RequestError::ClaimFailed(e.to_string()))?;

        if let Some(stats) = data.stats.get_mut(listener) {
            stats.pending_rewards = stats.pending_rewards.saturating_sub(amount);
        }
        drop(data);
        if let Err(e) = self.save().await {
            // The transfer already confirmed; losing the persisted zeroing
            // would double-pay on restart, so shout about it.
            warn!("failed to persist ledger after claim {}: {}", receipt, e);
        }
        info!("claim: {} received {} ({})", listener, amount, receipt);
        Ok((receipt, amount))
    }

    pub async fn note_submitted(&self, listener: &str) {
        {
            let mut data = self.data.write().await;
            data.stats
                .entry(listener.to_string())
                .or_default()
                .voice_notes_submitted += 1;
        }
        if let Err(e) = self.save().await {
            warn!("failed to persist ledger: {}", e);
        }
    }

    pub async fn note_played(&self, listener: &str) {
        {
            let mut data = self.data.write().await;
            data.stats
                .entry(listener.to_string())
                .or_default()
                .voice_notes_played += 1;
        }
        if let Err(e) = self.save().await {
            warn!("failed to persist ledger: {}", e);
        }
    }

    pub async fn stats_for(&self, listener: &str) -> ListenerStats {
        self.data
            .read()
            .await
            .stats
            .get(listener)
            .cloned()
            .unwrap_or_default()
    }

    /// Top listeners by songs listened, for the slow-interval aggregate view.
    pub async fn leaderboard(&self, limit: usize) -> Vec<LeaderboardEntry> {
        let data = self.data.read().await;
        let mut entries: Vec<LeaderboardEntry> = data
            .stats
            .iter()
            .map(|(address, s)| LeaderboardEntry {
                address: address.clone(),
                total_songs_listened: s.total_songs_listened,
                total_rewards_earned: s.total_rewards_earned,
            })
            .collect();
        entries.sort_by(|a, b| b.total_songs_listened.cmp(&a.total_songs_listened));
        entries.truncate(limit);
        entries
    }

    async fn save(&self) -> anyhow::Result<()> {
        let data = self.data.read().await;
        if let Some(parent) = self.ledger_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(&*data)?;
        tokio::fs::write(&self.ledger_file, json).await?;
        Ok(())
    }
}

fn credit_key(listener: &str, token_id: &str, started_at_ms: i64) -> String {
    format!("{}|{}|{}", listener, token_id, started_at_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::PaymentAction;
    use async_trait::async_trait;

    struct FailingGateway;

    #[async_trait]
    impl PaymentGateway for FailingGateway {
        async fn confirm(
            &self,
            _action: PaymentAction,
            _payer: &str,
            _amount: u64,
        ) -> anyhow::Result<TxReceipt> {
            anyhow::bail!("declined")
        }

        async fn transfer_reward(&self, _to: &str, _amount: u64) -> anyhow::Result<TxReceipt> {
            anyhow::bail!("transfer refused")
        }
    }

    struct ApprovingGateway;

    #[async_trait]
    impl PaymentGateway for ApprovingGateway {
        async fn confirm(
            &self,
            _action: PaymentAction,
            _payer: &str,
            _amount: u64,
        ) -> anyhow::Result<TxReceipt> {
            Ok(TxReceipt("0xok".into()))
        }

        async fn transfer_reward(&self, _to: &str, _amount: u64) -> anyhow::Result<TxReceipt> {
            Ok(TxReceipt("0xclaim".into()))
        }
    }

    fn test_ledger() -> (RewardLedger, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = RewardLedger::load(dir.path().join("ledger.json"), RewardsConfig::default());
        (ledger, dir)
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[tokio::test]
    async fn duplicate_heartbeats_accrue_once() {
        let (ledger, _dir) = test_ledger();
        let today = day("2026-08-04");
        assert!(ledger.record_heartbeat("0xa", "5", 1_000, today).await.unwrap());
        for _ in 0..5 {
            assert!(!ledger.record_heartbeat("0xa", "5", 1_000, today).await.unwrap());
        }
        let stats = ledger.stats_for("0xa").await;
        assert_eq!(stats.total_songs_listened, 1);
        assert_eq!(stats.pending_rewards, RewardsConfig::default().per_song);
    }

    #[tokio::test]
    async fn replay_of_same_token_is_a_new_instance() {
        let (ledger, _dir) = test_ledger();
        let today = day("2026-08-04");
        assert!(ledger.record_heartbeat("0xa", "5", 1_000, today).await.unwrap());
        assert!(ledger.record_heartbeat("0xa", "5", 2_000, today).await.unwrap());
        assert_eq!(ledger.stats_for("0xa").await.total_songs_listened, 2);
    }

    #[tokio::test]
    async fn streak_same_day_next_day_and_gap() {
        let (ledger, _dir) = test_ledger();
        ledger.record_heartbeat("0xa", "1", 1, day("2026-08-01")).await.unwrap();
        ledger.record_heartbeat("0xa", "2", 2, day("2026-08-01")).await.unwrap();
        assert_eq!(ledger.stats_for("0xa").await.current_streak, 1);

        ledger.record_heartbeat("0xa", "3", 3, day("2026-08-02")).await.unwrap();
        assert_eq!(ledger.stats_for("0xa").await.current_streak, 2);

        // Two silent days exceed the default grace of one.
        ledger.record_heartbeat("0xa", "4", 4, day("2026-08-05")).await.unwrap();
        let stats = ledger.stats_for("0xa").await;
        assert_eq!(stats.current_streak, 1);
        assert_eq!(stats.longest_streak, 2);
    }

    #[tokio::test]
    async fn failed_claim_leaves_ledger_unchanged() {
        let (ledger, _dir) = test_ledger();
        ledger.record_heartbeat("0xa", "5", 1_000, day("2026-08-04")).await.unwrap();
        let before = ledger.stats_for("0xa").await;

        let err = ledger.claim("0xa", &FailingGateway).await.unwrap_err();
        assert!(matches!(err, RequestError::ClaimFailed(_)));
        assert_eq!(ledger.stats_for("0xa").await, before);
    }

    #[tokio::test]
    async fn successful_claim_zeroes_pending_only() {
        let (ledger, _dir) = test_ledger();
        ledger.record_heartbeat("0xa", "5", 1_000, day("2026-08-04")).await.unwrap();
        let (receipt, amount) = ledger.claim("0xa", &ApprovingGateway).await.unwrap();
        assert_eq!(receipt.0, "0xclaim");
        assert_eq!(amount, RewardsConfig::default().per_song);

        let stats = ledger.stats_for("0xa").await;
        assert_eq!(stats.pending_rewards, 0);
        assert_eq!(stats.total_rewards_earned, amount);
        assert_eq!(stats.total_songs_listened, 1);
    }

    #[tokio::test]
    async fn claim_with_nothing_pending_is_invalid() {
        let (ledger, _dir) = test_ledger();
        let err = ledger.claim("0xa", &ApprovingGateway).await.unwrap_err();
        assert!(matches!(err, RequestError::Invalid(_)));
    }

    #[tokio::test]
    async fn ledger_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        {
            let ledger = RewardLedger::load(path.clone(), RewardsConfig::default());
            ledger.record_heartbeat("0xa", "5", 1_000, day("2026-08-04")).await.unwrap();
        }
        let reloaded = RewardLedger::load(path, RewardsConfig::default());
        assert_eq!(reloaded.stats_for("0xa").await.total_songs_listened, 1);
        // The credited set survives too — a restart cannot double-credit.
        assert!(!reloaded
            .record_heartbeat("0xa", "5", 1_000, day("2026-08-04"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn leaderboard_sorted_by_songs() {
        let (ledger, _dir) = test_ledger();
        let today = day("2026-08-04");
        ledger.record_heartbeat("0xa", "1", 1, today).await.unwrap();
        ledger.record_heartbeat("0xb", "1", 1, today).await.unwrap();
        ledger.record_heartbeat("0xb", "2", 2, today).await.unwrap();
        let board = ledger.leaderboard(10).await;
        assert_eq!(board[0].address, "0xb");
        assert_eq!(board[0].total_songs_listened, 2);
        assert_eq!(board.len(), 2);
    }
}
