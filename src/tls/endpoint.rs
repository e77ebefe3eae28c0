use std::fmt;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::engine::{Engine, EngineStatus, HandshakeStatus};
use crate::buffer::{Buffer, BufferArena};
use crate::endpoint::{Endpoint, Filled, TimeoutTask};
use crate::util::lock;
use crate::{Config, Error};

/// TLS adapter over another [`Endpoint`].
///
/// Application bytes flushed to this endpoint are wrapped into records and
/// written to the raw endpoint. Records filled from the raw endpoint are
/// unwrapped into application bytes. Handshakes, including renegotiation
/// mid-stream, are driven as a side effect of fill and flush.
///
/// All state sits behind one lock. A processing step takes it once and runs
/// to completion without taking it again.
pub struct TlsEndpoint<G> {
    raw: Arc<dyn Endpoint>,
    state: Mutex<TlsState<G>>,
    progressed: AtomicBool,
    detect_status_flip: bool,
}

struct TlsState<G> {
    engine: G,
    buffers: NetBuffers,
    // The inbound content is a partial record the engine could not use.
    // Cleared by new ciphertext or a successful unwrap.
    stalled: bool,
}

struct NetBuffers {
    arena: Arc<BufferArena>,
    packet_size: usize,
    application_size: usize,
    allocations: usize,
    inbound: Buffer,
    outbound: Buffer,
    unwrapped: Buffer,
}

impl NetBuffers {
    fn allocate(&mut self) {
        if self.allocations == 0 {
            if self.inbound.capacity() == 0 {
                self.inbound = self.arena.acquire(self.packet_size * 2);
            }
            if self.outbound.capacity() == 0 {
                self.outbound = self.arena.acquire(self.packet_size * 2);
            }
        }
        self.allocations += 1;
    }

    fn release(&mut self) {
        debug_assert!(self.allocations > 0, "unbalanced buffer release");
        self.allocations = self.allocations.saturating_sub(1);
        if self.allocations > 0 {
            return;
        }
        for buf in [&mut self.inbound, &mut self.outbound, &mut self.unwrapped] {
            if buf.capacity() > 0 && buf.is_empty() {
                self.arena.release(mem::take(buf));
            }
        }
    }
}

/// Holds one allocation of the buffers for the duration of a processing step.
struct Allocation<'a>(&'a mut NetBuffers);

impl<'a> Allocation<'a> {
    fn new(buffers: &'a mut NetBuffers) -> Self {
        buffers.allocate();
        Allocation(buffers)
    }
}

impl Deref for Allocation<'_> {
    type Target = NetBuffers;

    fn deref(&self) -> &Self::Target {
        self.0
    }
}

impl DerefMut for Allocation<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0
    }
}

impl Drop for Allocation<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Keeps the network buffers of a [`TlsEndpoint`] allocated while alive.
///
/// Nested fills and flushes inside the scope reuse the same buffers instead
/// of returning them to the arena after every step.
pub struct BufferScope<'a, G: Engine> {
    endpoint: &'a TlsEndpoint<G>,
}

impl<G: Engine> Drop for BufferScope<'_, G> {
    fn drop(&mut self) {
        self.endpoint.lock().buffers.release();
    }
}

impl<G: Engine> TlsEndpoint<G> {
    pub fn new(raw: Arc<dyn Endpoint>, engine: G, arena: Arc<BufferArena>, config: &Config) -> Self {
        let buffers = NetBuffers {
            arena,
            packet_size: engine.packet_buffer_size(),
            application_size: engine.application_buffer_size(),
            allocations: 0,
            inbound: Buffer::default(),
            outbound: Buffer::default(),
            unwrapped: Buffer::default(),
        };

        TlsEndpoint {
            raw,
            state: Mutex::new(TlsState {
                engine,
                buffers,
                stalled: false,
            }),
            progressed: AtomicBool::new(false),
            detect_status_flip: config.detect_handshake_status_flip,
        }
    }

    /// The endpoint records are read from and written to.
    pub fn raw(&self) -> &Arc<dyn Endpoint> {
        &self.raw
    }

    pub fn handshake_status(&self) -> HandshakeStatus {
        self.lock().engine.handshake_status()
    }

    /// Start a renegotiation. It is carried out by the following fills and flushes.
    pub fn begin_handshake(&self) -> Result<(), Error> {
        debug!("Begin handshake");
        self.lock().engine.begin_handshake()
    }

    /// Run `f` with exclusive access to the engine.
    pub fn with_engine<R>(&self, f: impl FnOnce(&mut G) -> R) -> R {
        f(&mut self.lock().engine)
    }

    /// Keep the network buffers allocated until the returned scope drops.
    pub fn buffer_scope(&self) -> BufferScope<'_, G> {
        self.lock().buffers.allocate();
        BufferScope { endpoint: self }
    }

    /// Run one processing step.
    ///
    /// Unwrapped bytes go to `to_fill`, or the internal scratch buffer when
    /// `None`. Bytes to wrap are taken from `to_flush`. Returns whether anything
    /// moved.
    pub(crate) fn process(
        &self,
        to_fill: Option<&mut Buffer>,
        to_flush: Option<&mut Buffer>,
    ) -> Result<bool, Error> {
        let progress =
            self.lock()
                .process(&*self.raw, to_fill, to_flush, self.detect_status_flip)?;
        if progress {
            self.progressed.store(true, Ordering::Release);
        }
        Ok(progress)
    }

    fn lock(&self) -> MutexGuard<'_, TlsState<G>> {
        lock(&self.state)
    }

    #[cfg(test)]
    pub(crate) fn allocations(&self) -> usize {
        self.lock().buffers.allocations
    }
}

impl<G: Engine> TlsState<G> {
    fn process(
        &mut self,
        raw: &dyn Endpoint,
        to_fill: Option<&mut Buffer>,
        to_flush: Option<&mut Buffer>,
        detect_status_flip: bool,
    ) -> Result<bool, Error> {
        let TlsState {
            engine,
            buffers,
            stalled,
        } = self;

        let mut buffers = Allocation::new(buffers);
        let NetBuffers {
            arena,
            application_size,
            inbound,
            outbound,
            unwrapped,
            ..
        } = &mut *buffers;

        let mut no_flush = Buffer::default();
        let to_flush = match to_flush {
            Some(b) => b,
            None => &mut no_flush,
        };

        let to_fill = match to_fill {
            Some(b) => {
                // Plaintext left over from an earlier step goes out before any new I/O.
                if unwrapped.has_content() {
                    let n = b.transfer_from(unwrapped);
                    return Ok(n > 0);
                }
                b
            }
            None => {
                if unwrapped.capacity() == 0 {
                    *unwrapped = arena.acquire(*application_size);
                }
                unwrapped
            }
        };

        let initial = engine.handshake_status();
        let mut some_progress = false;

        loop {
            let mut progress = false;
            let mut filled = 0;
            let mut flushed = 0;

            if raw.is_open() && inbound.space() > 0 {
                if let Filled::Bytes(n) = raw.fill(inbound)? {
                    if n > 0 {
                        filled = n;
                        *stalled = false;
                        progress = true;
                    }
                }
            }

            if raw.is_open() && outbound.has_content() {
                flushed = raw.flush(outbound)?;
                if flushed > 0 {
                    progress = true;
                }
            }

            trace!("Process filled={} flushed={}", filled, flushed);

            match engine.handshake_status() {
                HandshakeStatus::Finished => return Err(Error::UnexpectedHandshakeFinished),

                HandshakeStatus::NotHandshaking => {
                    if to_flush.has_content()
                        && outbound.space() > 0
                        && wrap(engine, raw, to_flush, outbound)?
                    {
                        progress = true;
                    }
                    if to_fill.space() > 0
                        && inbound.has_content()
                        && unwrap(engine, raw, inbound, to_fill, stalled)?
                    {
                        progress = true;
                    }
                }

                HandshakeStatus::NeedTask => {
                    while let Some(task) = engine.delegated_task() {
                        progress = true;
                        task();
                    }

                    if detect_status_flip
                        && initial == HandshakeStatus::NotHandshaking
                        && engine.handshake_status() == HandshakeStatus::NeedUnwrap
                    {
                        warn!("Handshake status flipped to NeedUnwrap after tasks, closing");
                        raw.close();
                        return Ok(false);
                    }
                }

                HandshakeStatus::NeedWrap => {
                    if wrap(engine, raw, to_flush, outbound)? {
                        progress = true;
                    }
                }

                HandshakeStatus::NeedUnwrap => {
                    if unwrap(engine, raw, inbound, to_fill, stalled)? {
                        progress = true;
                    }
                }
            }

            if !inbound.has_content() && raw.is_input_shutdown() && !engine.is_inbound_done() {
                debug!("Raw input shut down, close inbound");
                engine.close_inbound()?;
            }

            if !outbound.has_content() && engine.is_outbound_done() && !raw.is_output_shutdown() {
                debug!("Outbound done, shut down raw output");
                raw.shutdown_output()?;
            }

            if !progress {
                break;
            }
            some_progress = true;
        }

        Ok(some_progress)
    }
}

fn wrap<G: Engine>(
    engine: &mut G,
    raw: &dyn Endpoint,
    src: &mut Buffer,
    outbound: &mut Buffer,
) -> Result<bool, Error> {
    let result = match engine.wrap(src.as_slice(), outbound.spare_mut()) {
        Ok(v) => v,
        Err(e) => {
            warn!("Wrap failed, closing: {}", e);
            raw.close();
            return Err(e);
        }
    };

    debug!("Wrap {}", result);

    src.consume(result.bytes_consumed);
    outbound.advance(result.bytes_produced);

    match result.status {
        EngineStatus::BufferUnderflow => return Err(Error::TlsWrapUnderflow),
        EngineStatus::BufferOverflow | EngineStatus::Ok => {}
        EngineStatus::Closed => {
            // Give the close alert one chance to reach the peer.
            if raw.is_open() && outbound.has_content() {
                if let Err(e) = raw.flush(outbound) {
                    debug!("Flush of close alert failed: {}", e);
                }
            }
            raw.close();
        }
    }

    Ok(result.made_progress())
}

fn unwrap<G: Engine>(
    engine: &mut G,
    raw: &dyn Endpoint,
    inbound: &mut Buffer,
    dst: &mut Buffer,
    stalled: &mut bool,
) -> Result<bool, Error> {
    if !inbound.has_content() {
        return Ok(false);
    }

    let result = match engine.unwrap(inbound.as_slice(), dst.spare_mut()) {
        Ok(v) => v,
        Err(e) => {
            warn!("Unwrap failed, closing: {}", e);
            raw.close();
            return Err(e);
        }
    };

    debug!("Unwrap {}", result);

    inbound.consume(result.bytes_consumed);
    dst.advance(result.bytes_produced);

    match result.status {
        EngineStatus::BufferUnderflow | EngineStatus::BufferOverflow => {
            *stalled = !result.made_progress();
        }
        EngineStatus::Ok => *stalled = false,
        EngineStatus::Closed => raw.close(),
    }

    Ok(result.made_progress())
}

impl<G: Engine> Endpoint for TlsEndpoint<G> {
    fn is_open(&self) -> bool {
        self.raw.is_open()
    }

    fn close(&self) {
        self.raw.close();
    }

    fn fill(&self, buf: &mut Buffer) -> Result<Filled, Error> {
        let before = buf.len();

        let progress = {
            let mut state = self.lock();
            let direct = buf.space() >= state.buffers.application_size
                || state.buffers.unwrapped.has_content();

            if direct {
                state.process(&*self.raw, Some(&mut *buf), None, self.detect_status_flip)?
            } else {
                // Too little room for a whole record. Unwrap to scratch and
                // hand out what fits, the rest goes out on the next fill.
                let progress = state.process(&*self.raw, None, None, self.detect_status_flip)?;
                buf.transfer_from(&mut state.buffers.unwrapped);
                progress
            }
        };

        if progress {
            self.progressed.store(true, Ordering::Release);
        }

        let filled = buf.len().saturating_sub(before);
        if filled == 0 && self.is_input_shutdown() {
            return Ok(Filled::Eof);
        }

        Ok(Filled::Bytes(filled))
    }

    fn flush(&self, buf: &mut Buffer) -> Result<usize, Error> {
        let before = buf.len();
        self.process(None, Some(&mut *buf))?;
        Ok(before - buf.len())
    }

    fn flush_buffered(&self) -> Result<(), Error> {
        self.process(None, None)?;
        Ok(())
    }

    fn is_buffering_input(&self) -> bool {
        let state = self.lock();
        state.buffers.unwrapped.has_content()
            || (state.buffers.inbound.has_content() && !state.stalled)
    }

    fn is_buffering_output(&self) -> bool {
        self.lock().buffers.outbound.has_content()
    }

    fn shutdown_input(&self) -> Result<(), Error> {
        // Inbound closes when the raw endpoint reports end of stream. Closing
        // it early would stop the engine from writing.
        Ok(())
    }

    fn shutdown_output(&self) -> Result<(), Error> {
        debug!("Shutdown output, close outbound");
        self.lock().engine.close_outbound();
        self.process(None, None)?;
        Ok(())
    }

    fn is_input_shutdown(&self) -> bool {
        !self.raw.is_open() || self.lock().engine.is_inbound_done()
    }

    fn is_output_shutdown(&self) -> bool {
        !self.raw.is_open() || self.lock().engine.is_outbound_done()
    }

    fn schedule_write(&self) {
        self.raw.schedule_write();
    }

    fn schedule_idle(&self) {
        self.raw.schedule_idle();
    }

    fn cancel_idle(&self) {
        self.raw.cancel_idle();
    }

    fn schedule_timeout(&self, task: TimeoutTask, timeout_ms: u64) {
        self.raw.schedule_timeout(task, timeout_ms);
    }

    fn cancel_timeout(&self, task: &TimeoutTask) {
        self.raw.cancel_timeout(task);
    }

    fn max_idle_time(&self) -> u64 {
        self.raw.max_idle_time()
    }

    fn set_max_idle_time(&self, ms: u64) {
        self.raw.set_max_idle_time(ms);
    }

    fn has_progressed(&self) -> bool {
        let raw = self.raw.has_progressed();
        self.progressed.swap(false, Ordering::AcqRel) || raw
    }
}

impl<G: Engine> fmt::Debug for TlsEndpoint<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("TlsEndpoint")
            .field("status", &state.engine.handshake_status())
            .field("allocations", &state.buffers.allocations)
            .field("inbound", &state.buffers.inbound)
            .field("outbound", &state.buffers.outbound)
            .field("unwrapped", &state.buffers.unwrapped)
            .finish()
    }
}
