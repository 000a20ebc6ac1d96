//! Transport seam: moving audio frames to and from the remote participant.
//!
//! The media protocol itself is out of scope; implementations wrap
//! whatever room/connection primitive the host process provides.

use async_trait::async_trait;

use crate::audio::AudioFrame;
use crate::error::Result;

/// Inbound participant audio. `None` means the transport was lost or the
/// participant left; the session then closes.
#[async_trait]
pub trait AudioSource: Send + 'static {
    async fn next_frame(&mut self) -> Option<AudioFrame>;
}

/// Outbound agent audio.
#[async_trait]
pub trait AudioSink: Send + 'static {
    async fn write_frame(&mut self, frame: AudioFrame) -> Result<()>;

    /// Flush buffered output. Called during shutdown.
    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A connection to the media room for one participant.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Perform the handshake and split the connection into its inbound
    /// stream and outbound sink. The caller bounds this with a timeout.
    async fn connect(&self, room: &str) -> Result<(Box<dyn AudioSource>, Box<dyn AudioSink>)>;

    async fn disconnect(&self) -> Result<()>;
}
