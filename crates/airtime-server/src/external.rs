//! External collaborators the engine depends on but does not own.
//!
//! Payment confirmation and clip storage are opaque, atomic calls: they
//! either confirm (returning a receipt / URL) or fail, with no partial state
//! exposed to us.  The engine treats their answers as authoritative.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{info, warn};

use airtime_proto::model::TxReceipt;

/// What a payment is for.  Each action maps to its own price tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentAction {
    QueueSong,
    Shoutout,
    Ad,
    SkipToRandom,
}

impl PaymentAction {
    pub fn label(&self) -> &'static str {
        match self {
            PaymentAction::QueueSong => "queue-song",
            PaymentAction::Shoutout => "shoutout",
            PaymentAction::Ad => "ad",
            PaymentAction::SkipToRandom => "skip-to-random",
        }
    }
}

/// Confirmation against the external payment ledger.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Confirm an inbound payment of `amount` base units from `payer`.
    /// An `Err` means no funds moved.
    async fn confirm(
        &self,
        action: PaymentAction,
        payer: &str,
        amount: u64,
    ) -> anyhow::Result<TxReceipt>;

    /// Transfer `amount` of accrued rewards out to `recipient`.  An `Err`
    /// means the transfer did not happen.
    async fn transfer_reward(&self, recipient: &str, amount: u64) -> anyhow::Result<TxReceipt>;
}

/// Durable storage for recorded clips.  Returns a fetchable URL.
#[async_trait]
pub trait ClipStore: Send + Sync {
    async fn store(&self, clip: Vec<u8>, content_type: &str) -> anyhow::Result<String>;
}

// ── Development implementations ───────────────────────────────────────────────

/// Gateway for local development: confirms everything and fabricates
/// receipts.  Production deployments wire in their own implementation.
pub struct DevPaymentGateway;

#[async_trait]
impl PaymentGateway for DevPaymentGateway {
    async fn confirm(
        &self,
        action: PaymentAction,
        payer: &str,
        amount: u64,
    ) -> anyhow::Result<TxReceipt> {
        let receipt = make_receipt_id(action.label(), payer);
        info!(
            "dev gateway: confirmed {} from {} for {} ({})",
            action.label(),
            payer,
            amount,
            receipt
        );
        Ok(TxReceipt(receipt))
    }

    async fn transfer_reward(&self, recipient: &str, amount: u64) -> anyhow::Result<TxReceipt> {
        let receipt = make_receipt_id("reward-claim", recipient);
        info!(
            "dev gateway: transferred {} to {} ({})",
            amount, recipient, receipt
        );
        Ok(TxReceipt(receipt))
    }
}

/// Clip store for local development: writes clips under the data dir and
/// returns a URL served by the HTTP API's `/clips/:name` route.
pub struct FsClipStore {
    clips_dir: PathBuf,
    public_base: String,
}

impl FsClipStore {
    pub fn new(clips_dir: PathBuf, public_base: String) -> Self {
        Self {
            clips_dir,
            public_base,
        }
    }
}

#[async_trait]
impl ClipStore for FsClipStore {
    async fn store(&self, clip: Vec<u8>, content_type: &str) -> anyhow::Result<String> {
        let ext = match content_type {
            "audio/webm" => "webm",
            "audio/ogg" => "ogg",
            "audio/mp4" => "m4a",
            other => {
                warn!("unknown clip content type {:?}, storing as .bin", other);
                "bin"
            }
        };
        let name = format!(
            "{}.{}",
            make_receipt_id("clip", &format!("{}", clip.len())),
            ext
        );
        tokio::fs::create_dir_all(&self.clips_dir).await?;
        tokio::fs::write(self.clips_dir.join(&name), &clip).await?;
        Ok(format!("{}/clips/{}", self.public_base, name))
    }
}

/// Short unique id: hex hash of a timestamp plus a context string.
pub fn make_receipt_id(context: &str, salt: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut h = DefaultHasher::new();
    airtime_proto::timeline::now_ms().hash(&mut h);
    context.hash(&mut h);
    salt.hash(&mut h);
    std::process::id().hash(&mut h);
    format!("{:016x}", h.finish())
}
