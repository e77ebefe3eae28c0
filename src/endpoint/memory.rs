use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use super::{Endpoint, Filled, TimeoutTask};
use crate::buffer::Buffer;
use crate::util::lock;
use crate::Error;

/// An [`Endpoint`] backed by memory.
///
/// The "peer" side is driven through the inherent methods: bytes handed to
/// [`deliver()`](MemoryEndpoint::deliver) become input, and everything the
/// endpoint flushes is collected for [`take_output()`](MemoryEndpoint::take_output).
/// Clones share the same state.
#[derive(Clone, Default)]
pub struct MemoryEndpoint {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    closed: bool,
    input: VecDeque<u8>,
    peer_eof: bool,
    input_shutdown: bool,
    output_shutdown: bool,
    output: Vec<u8>,
    write_limit: Option<usize>,
    fault: Option<Error>,
    progressed: bool,
    max_idle_ms: u64,
    idle_scheduled: bool,
    write_schedules: usize,
    timeouts: Vec<(TimeoutTask, u64)>,
    fills: usize,
}

impl MemoryEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `data` available to the next fills.
    pub fn deliver(&self, data: &[u8]) {
        lock(&self.inner).input.extend(data);
    }

    /// The peer shut down its output. Input shuts down once drained.
    pub fn deliver_eof(&self) {
        lock(&self.inner).peer_eof = true;
    }

    /// Everything flushed since the last call.
    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut lock(&self.inner).output)
    }

    /// Cap the number of bytes each flush accepts. `None` for no cap.
    pub fn set_write_limit(&self, limit: Option<usize>) {
        lock(&self.inner).write_limit = limit;
    }

    /// Fail the next fill or flush with `error`.
    pub fn inject_fault(&self, error: Error) {
        lock(&self.inner).fault = Some(error);
    }

    /// Number of bytes delivered but not yet filled.
    pub fn pending_input(&self) -> usize {
        lock(&self.inner).input.len()
    }

    /// Number of fill calls made so far.
    pub fn fill_count(&self) -> usize {
        lock(&self.inner).fills
    }

    pub fn write_schedules(&self) -> usize {
        lock(&self.inner).write_schedules
    }

    pub fn is_idle_scheduled(&self) -> bool {
        lock(&self.inner).idle_scheduled
    }

    pub fn pending_timeouts(&self) -> usize {
        lock(&self.inner).timeouts.len()
    }

    /// Expire every scheduled timeout, as if its time had passed.
    pub fn expire_timeouts(&self) {
        // The tasks may call back into the endpoint, so run them unlocked.
        let timeouts = std::mem::take(&mut lock(&self.inner).timeouts);
        for (task, _) in timeouts {
            task.expire();
        }
    }
}

impl Endpoint for MemoryEndpoint {
    fn is_open(&self) -> bool {
        !lock(&self.inner).closed
    }

    fn close(&self) {
        let mut inner = lock(&self.inner);
        if !inner.closed {
            debug!("Close memory endpoint");
        }
        inner.closed = true;
    }

    fn fill(&self, buf: &mut Buffer) -> Result<Filled, Error> {
        let mut inner = lock(&self.inner);
        inner.fills += 1;

        if inner.closed {
            return Err(Error::EndpointClosed);
        }
        if let Some(e) = inner.fault.take() {
            return Err(e);
        }

        if inner.input.is_empty() {
            if inner.peer_eof {
                inner.input_shutdown = true;
            }
            if inner.input_shutdown {
                return Ok(Filled::Eof);
            }
            return Ok(Filled::Bytes(0));
        }

        let spare = buf.spare_mut();
        let n = spare.len().min(inner.input.len());
        for (to, from) in spare.iter_mut().zip(inner.input.drain(..n)) {
            *to = from;
        }
        buf.advance(n);

        if n > 0 {
            inner.progressed = true;
        }
        Ok(Filled::Bytes(n))
    }

    fn flush(&self, buf: &mut Buffer) -> Result<usize, Error> {
        let mut inner = lock(&self.inner);

        if inner.closed {
            return Err(Error::EndpointClosed);
        }
        if let Some(e) = inner.fault.take() {
            return Err(e);
        }
        if inner.output_shutdown {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "output is shut down").into());
        }

        let n = buf.len().min(inner.write_limit.unwrap_or(usize::MAX));
        inner.output.extend_from_slice(&buf.as_slice()[..n]);
        buf.consume(n);

        if n > 0 {
            inner.progressed = true;
        }
        Ok(n)
    }

    fn flush_buffered(&self) -> Result<(), Error> {
        Ok(())
    }

    fn is_buffering_input(&self) -> bool {
        false
    }

    fn is_buffering_output(&self) -> bool {
        false
    }

    fn shutdown_input(&self) -> Result<(), Error> {
        lock(&self.inner).input_shutdown = true;
        Ok(())
    }

    fn shutdown_output(&self) -> Result<(), Error> {
        let mut inner = lock(&self.inner);
        if !inner.output_shutdown {
            debug!("Shutdown memory endpoint output");
        }
        inner.output_shutdown = true;
        Ok(())
    }

    fn is_input_shutdown(&self) -> bool {
        let inner = lock(&self.inner);
        inner.closed || inner.input_shutdown
    }

    fn is_output_shutdown(&self) -> bool {
        let inner = lock(&self.inner);
        inner.closed || inner.output_shutdown
    }

    fn schedule_write(&self) {
        lock(&self.inner).write_schedules += 1;
    }

    fn schedule_idle(&self) {
        lock(&self.inner).idle_scheduled = true;
    }

    fn cancel_idle(&self) {
        lock(&self.inner).idle_scheduled = false;
    }

    fn schedule_timeout(&self, task: TimeoutTask, timeout_ms: u64) {
        lock(&self.inner).timeouts.push((task, timeout_ms));
    }

    fn cancel_timeout(&self, task: &TimeoutTask) {
        lock(&self.inner).timeouts.retain(|(t, _)| t != task);
    }

    fn max_idle_time(&self) -> u64 {
        lock(&self.inner).max_idle_ms
    }

    fn set_max_idle_time(&self, ms: u64) {
        lock(&self.inner).max_idle_ms = ms;
    }

    fn has_progressed(&self) -> bool {
        std::mem::take(&mut lock(&self.inner).progressed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_and_flush() {
        let endpoint = MemoryEndpoint::new();
        let mut buf = Buffer::new(4);

        assert_eq!(endpoint.fill(&mut buf).unwrap(), Filled::Bytes(0));
        assert!(!endpoint.has_progressed());

        endpoint.deliver(b"hello");
        assert_eq!(endpoint.fill(&mut buf).unwrap(), Filled::Bytes(4));
        assert_eq!(buf.as_slice(), b"hell");
        assert_eq!(endpoint.pending_input(), 1);
        assert!(endpoint.has_progressed());
        assert!(!endpoint.has_progressed());

        endpoint.set_write_limit(Some(3));
        assert_eq!(endpoint.flush(&mut buf).unwrap(), 3);
        assert_eq!(buf.as_slice(), b"l");
        assert_eq!(endpoint.take_output(), b"hel");
    }

    #[test]
    fn eof_after_drain() {
        let endpoint = MemoryEndpoint::new();
        let mut buf = Buffer::new(16);
        endpoint.deliver(b"abc");
        endpoint.deliver_eof();

        assert_eq!(endpoint.fill(&mut buf).unwrap(), Filled::Bytes(3));
        assert!(!endpoint.is_input_shutdown());
        assert_eq!(endpoint.fill(&mut buf).unwrap(), Filled::Eof);
        assert!(endpoint.is_input_shutdown());
    }

    #[test]
    fn closed_endpoint_faults() {
        let endpoint = MemoryEndpoint::new();
        let mut buf = Buffer::new(16);
        endpoint.close();
        assert_eq!(endpoint.fill(&mut buf).unwrap_err(), Error::EndpointClosed);
        assert_eq!(endpoint.flush(&mut buf).unwrap_err(), Error::EndpointClosed);
    }

    #[test]
    fn timeouts_expire_and_cancel() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let endpoint = MemoryEndpoint::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let f = fired.clone();
        let a = TimeoutTask::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        let f = fired.clone();
        let b = TimeoutTask::new(move || {
            f.fetch_add(10, Ordering::SeqCst);
        });

        endpoint.schedule_timeout(a.clone(), 100);
        endpoint.schedule_timeout(b, 100);
        endpoint.cancel_timeout(&a);
        assert_eq!(endpoint.pending_timeouts(), 1);

        endpoint.expire_timeouts();
        assert_eq!(fired.load(Ordering::SeqCst), 10);
        assert_eq!(endpoint.pending_timeouts(), 0);
    }
}
