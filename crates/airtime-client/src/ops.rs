//! Client side of the discrete request/response operations.
//!
//! Every mutation the client can make (queue, voice note, skip, heartbeat,
//! claim, song-ended) goes through here — HTTP in both push and fallback
//! modes, so the operations path never depends on the push socket's health.

use reqwest::StatusCode;

use airtime_proto::api::{
    ClaimOutcome, ClaimRequest, ErrorBody, HeartbeatAck, HeartbeatReport, QueueSongReceipt,
    QueueSongRequest, SkipReceipt, SkipRequest, SongEndedReport, VoiceNoteParams, VoiceNoteReceipt,
};
use airtime_proto::error::RequestError;
use airtime_proto::model::ListenerStats;

#[derive(Clone)]
pub struct OpsClient {
    http: reqwest::Client,
    base_url: String,
}

impl OpsClient {
    pub fn new(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    /// Queue a song.  Payment-gated server-side; see the error for whether
    /// funds moved.
    pub async fn queue_song(
        &self,
        req: &QueueSongRequest,
    ) -> Result<QueueSongReceipt, RequestError> {
        let resp = self
            .http
            .post(format!("{}/api/queue", self.base_url))
            .json(req)
            .send()
            .await
            .map_err(transport_error)?;
        decode_response(resp).await
    }

    /// Submit a recorded voice note clip.
    pub async fn voice_note(
        &self,
        params: &VoiceNoteParams,
        clip: Vec<u8>,
        content_type: &str,
    ) -> Result<VoiceNoteReceipt, RequestError> {
        let resp = self
            .http
            .post(format!("{}/api/voice-note", self.base_url))
            .query(params)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(clip)
            .send()
            .await
            .map_err(transport_error)?;
        decode_response(resp).await
    }

    pub async fn skip_to_random(&self, payer: &str) -> Result<SkipReceipt, RequestError> {
        let resp = self
            .http
            .post(format!("{}/api/skip", self.base_url))
            .json(&SkipRequest {
                payer: payer.to_string(),
            })
            .send()
            .await
            .map_err(transport_error)?;
        decode_response(resp).await
    }

    /// Best-effort heartbeat.  Callers log failures and move on; a missed
    /// beat forfeits that interval's credit and nothing more.
    pub async fn heartbeat(&self, report: &HeartbeatReport) -> anyhow::Result<HeartbeatAck> {
        let resp = self
            .http
            .post(format!("{}/api/heartbeat", self.base_url))
            .json(report)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    pub async fn claim_rewards(&self, listener: &str) -> Result<ClaimOutcome, RequestError> {
        let resp = self
            .http
            .post(format!("{}/api/claim", self.base_url))
            .json(&ClaimRequest {
                listener: listener.to_string(),
            })
            .send()
            .await
            .map_err(|e| RequestError::ClaimFailed(e.to_string()))?;
        decode_response(resp).await
    }

    /// Advisory "the current song finished here" report.
    pub async fn song_ended(&self, report: &SongEndedReport) -> anyhow::Result<()> {
        self.http
            .post(format!("{}/api/song-ended", self.base_url))
            .json(report)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn stats(&self, listener: &str) -> anyhow::Result<ListenerStats> {
        let resp = self
            .http
            .get(format!("{}/api/stats/{}", self.base_url, listener))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }
}

fn transport_error(e: reqwest::Error) -> RequestError {
    RequestError::Invalid(format!("request failed: {}", e))
}

/// Map the server's error taxonomy back into `RequestError` so callers can
/// distinguish "retry payment" from "retry registration only".
async fn decode_response<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, RequestError> {
    let status = resp.status();
    if status.is_success() {
        return resp
            .json()
            .await
            .map_err(|e| RequestError::Invalid(format!("malformed response: {}", e)));
    }

    let body: ErrorBody = resp.json().await.unwrap_or(ErrorBody {
        error: format!("http status {}", status),
        receipt: None,
    });

    Err(match (status, body.receipt) {
        (_, Some(receipt)) => RequestError::RegistrationAfterPaymentFailed {
            receipt,
            reason: body.error,
        },
        (StatusCode::PAYMENT_REQUIRED, None) => RequestError::PaymentRequired(body.error),
        (StatusCode::BAD_GATEWAY, None) => RequestError::ClaimFailed(body.error),
        (_, None) => RequestError::Invalid(body.error),
    })
}
