//! The media handle seam: what the playback controller needs from the
//! host's playable-stream object.  `crate::mpv::MpvMedia` is the real
//! implementation; tests substitute a recording fake.

use std::fmt;

use futures_util::future::BoxFuture;

/// Outcome of a play request, delivered asynchronously.
pub type PlayFuture = BoxFuture<'static, Result<(), PlayRejection>>;

/// Why a play request did not start playback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayRejection {
    /// Superseded by a newer load/play request.
    Aborted,
    /// The host refused playback without a prior user gesture.
    NotAllowed,
    Other(String),
}

impl PlayRejection {
    /// Benign rejections leave the optimistic "playing" state standing.
    pub fn is_benign(&self) -> bool {
        matches!(self, PlayRejection::Aborted | PlayRejection::NotAllowed)
    }
}

impl fmt::Display for PlayRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayRejection::Aborted => write!(f, "play request aborted by a newer request"),
            PlayRejection::NotAllowed => write!(f, "play request not allowed"),
            PlayRejection::Other(reason) => write!(f, "{}", reason),
        }
    }
}

/// Unsolicited signals from the handle.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    /// The current source buffered enough to start.
    CanPlay,
    /// The handle's own error channel (stream died, decode failure, ...).
    Error(String),
}

/// A single playable-stream object, re-pointed between sources.
///
/// Everything except `play` is fire-and-forget and takes effect in call
/// order.  Implementations must be cheap to call from the controller's
/// event loop: no blocking, no awaiting.
pub trait MediaHandle: Send {
    fn set_source(&mut self, url: &str);

    /// The source the handle currently points at.
    fn source(&self) -> Option<&str>;

    /// Begin buffering the current source without starting playback.
    fn load(&mut self);

    fn pause(&mut self);

    fn play(&mut self) -> PlayFuture;

    /// Output level in `0.0..=1.0`.
    fn set_volume(&mut self, level: f32);

    fn set_muted(&mut self, muted: bool);

    /// Stop everything and free the underlying resources.
    fn release(&mut self);
}
