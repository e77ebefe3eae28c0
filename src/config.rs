use std::time::Duration;

/// Settings for connections, codecs and TLS adapters.
#[derive(Debug, Clone)]
pub struct Config {
    /// Idle timeout rearmed on the endpoint each time a persistent
    /// request/response cycle completes.
    pub idle_timeout: Duration,

    /// Timeout for a whole exchange, scheduled on the endpoint when the
    /// request is committed. `None` disables it.
    pub exchange_timeout: Option<Duration>,

    /// Upper bound on iterations of a single drive cycle. Reaching it means
    /// a progress signal is stuck, which is a bug.
    pub max_loop_iterations: usize,

    /// Size of the buffer the request line and headers are written into.
    pub request_header_size: usize,

    /// Size of the buffer responses are read into.
    pub response_buffer_size: usize,

    /// Close the connection when a TLS engine reports NEED_UNWRAP right after
    /// running delegated tasks that started from NOT_HANDSHAKING.
    ///
    /// Some engines flip to that status spuriously and then wait forever for
    /// bytes the peer will never send.
    pub detect_handshake_status_flip: bool,

    /// Max number of idle buffers kept by a [`BufferArena`][crate::BufferArena].
    pub max_pooled_buffers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(20),
            exchange_timeout: None,
            max_loop_iterations: 10_000,
            request_header_size: 4 * 1024,
            response_buffer_size: 16 * 1024,
            detect_handshake_status_flip: true,
            max_pooled_buffers: 16,
        }
    }
}

impl Config {
    pub(crate) fn idle_timeout_ms(&self) -> u64 {
        self.idle_timeout.as_millis().min(u64::MAX as u128) as u64
    }
}
