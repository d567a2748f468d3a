use thiserror::Error;

/// Failure kinds surfaced by the engine.  Network and backend failures are
/// converted into one of these at the call site and never escape to the host.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Backend could not be reached (connection refused, timeout, bad body).
    #[error("cannot reach the download server: {0}")]
    Unreachable(String),

    /// Backend answered a start request with an explicit error.
    #[error("{0}")]
    SubmissionRejected(String),

    /// A job is already starting or downloading.
    #[error("a download is already in progress")]
    Busy,

    /// The URL does not name a track, album or playlist.
    #[error("not a downloadable link: {0}")]
    UnsupportedLink(String),

    /// Backend reported terminal failure for a job.
    #[error("Download failed: {0}")]
    JobFailed(String),

    /// No audio source or recorder could be started.
    #[error("capture unavailable: {0}")]
    CaptureUnavailable(String),
}

impl EngineError {
    pub(crate) fn transport(err: reqwest::Error) -> Self {
        EngineError::Unreachable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
