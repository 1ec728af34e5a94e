use std::time::Duration;
use thiserror::Error;

/// Failure taxonomy of the playback core. None of these escape the runtime:
/// each one degrades to "show something, keep polling".
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// One priority step failed; recovered by falling through to the next.
    #[error("source '{source_name}' unavailable: {reason}")]
    SourceUnavailable {
        source_name: &'static str,
        reason: String,
    },

    #[error("asset for '{content_id}' failed to load after {attempts} attempts")]
    AssetLoadFailure { content_id: String, attempts: u32 },

    #[error("asset for '{content_id}' stuck loading for {waited:?}")]
    StuckLoad { content_id: String, waited: Duration },

    #[error("all {failures} content sources failed")]
    AllSourcesExhausted { failures: usize },

    #[error("connection lost after {attempts} consecutive failures")]
    ConnectionError { attempts: u32 },
}
