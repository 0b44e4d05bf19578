use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream;
use livefeed_common::config::StreamConfig;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::controller::StreamTicket;
use crate::mjpeg;
use crate::shared::SharedFrameState;

#[derive(Debug, Clone)]
pub struct EncoderSettings {
    pub jpeg_quality: u8,
    /// Minimum gap between two parts to the same client.
    pub min_frame_interval: Duration,
    /// Re-send the current frame after this long without a newer one.
    pub keepalive: Duration,
}

impl From<&StreamConfig> for EncoderSettings {
    fn from(config: &StreamConfig) -> Self {
        Self {
            jpeg_quality: config.jpeg_quality,
            min_frame_interval: Duration::from_millis(config.min_frame_interval_ms),
            keepalive: Duration::from_millis(config.keepalive_ms.max(1)),
        }
    }
}

/// Per-connection MJPEG producer.
///
/// Reads the shared state at its own pace and never holds anything the
/// capture loop waits on. Ends when its ticket is cancelled; a client
/// disconnect simply drops it.
pub struct StreamEncoder {
    shared: Arc<SharedFrameState>,
    versions: watch::Receiver<u64>,
    token: CancellationToken,
    generation: u64,
    settings: EncoderSettings,
    last_version: Option<u64>,
    parts_sent: u64,
}

impl StreamEncoder {
    pub fn new(shared: Arc<SharedFrameState>, ticket: StreamTicket, settings: EncoderSettings) -> Self {
        let versions = shared.watch_versions();
        debug!(generation = ticket.generation, "stream consumer attached");
        Self {
            shared,
            versions,
            token: ticket.token,
            generation: ticket.generation,
            settings,
            last_version: None,
            parts_sent: 0,
        }
    }

    /// Next multipart chunk, or `None` once the stream has been stopped.
    pub async fn next_part(&mut self) -> Option<Bytes> {
        loop {
            if self.last_version.is_some() && !self.pace().await {
                return None;
            }
            if self.token.is_cancelled() {
                return None;
            }

            self.versions.borrow_and_update();
            let snapshot = self.shared.snapshot();
            self.last_version = Some(snapshot.version);

            let frame = Arc::clone(&snapshot.frame);
            let quality = self.settings.jpeg_quality;
            let encoded = tokio::task::spawn_blocking(move || frame.jpeg(quality)).await;
            match encoded {
                Ok(Ok(jpeg)) => {
                    self.parts_sent += 1;
                    return Some(mjpeg::encode_part(&jpeg));
                }
                Ok(Err(e)) => {
                    warn!(error = %e, version = snapshot.version, "frame encode failed, skipping");
                }
                Err(e) => {
                    warn!(error = %e, version = snapshot.version, "encode task failed, skipping");
                }
            }
        }
    }

    /// Wait between parts. Returns `false` if the stream was stopped meanwhile.
    async fn pace(&mut self) -> bool {
        tokio::select! {
            _ = self.token.cancelled() => return false,
            _ = tokio::time::sleep(self.settings.min_frame_interval) => {}
        }
        if self.last_version != Some(self.shared.version()) {
            return true;
        }
        // Nothing new yet: wait for a publish, or re-send on keepalive.
        tokio::select! {
            _ = self.token.cancelled() => false,
            _ = self.versions.changed() => true,
            _ = tokio::time::sleep(self.settings.keepalive) => true,
        }
    }

    /// Adapt into a body stream for an HTTP response.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        futures_util::stream::unfold(self, |mut encoder| async move {
            encoder.next_part().await.map(|part| (Ok(part), encoder))
        })
    }
}

impl Drop for StreamEncoder {
    fn drop(&mut self) {
        debug!(
            generation = self.generation,
            parts = self.parts_sent,
            stopped = self.token.is_cancelled(),
            "stream consumer released"
        );
    }
}
