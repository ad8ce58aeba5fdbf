#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("video source {0} cannot be opened")]
    SourceUnavailable(String),
    #[error("{0} strategy used before its first frame was set")]
    NotPrimed(&'static str),
    #[error("frame is {got_width}x{got_height}, baseline is {width}x{height}")]
    FrameSizeMismatch {
        width: usize,
        height: usize,
        got_width: usize,
        got_height: usize,
    },
}
