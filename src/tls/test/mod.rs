use std::sync::Arc;

use crate::buffer::{Buffer, BufferArena};
use crate::endpoint::{Endpoint, Filled, MemoryEndpoint};
use crate::tls::{Engine, EngineResult, EngineStatus, HandshakeStatus, TlsEndpoint};
use crate::{Config, Error};


pub(crate) use engine::{split_records, Stats, ToyEngine, ALERT, APPLICATION, HANDSHAKE};

/// Deterministic pseudo random numbers for cutting input.
pub(crate) struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Lcg(seed.wrapping_mul(0x9e37_79b9_7f4a_7c15) | 1)
    }

    pub fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.0 >> 33
    }

    /// A number in `0..n`.
    pub fn below(&mut self, n: usize) -> usize {
        (self.next() % n.max(1) as u64) as usize
    }

    /// Cut `data` into at most `pieces` non-empty parts at random points.
    pub fn split<'a>(&mut self, data: &'a [u8], pieces: usize) -> Vec<&'a [u8]> {
        if data.len() < 2 || pieces < 2 {
            return vec![data];
        }
        let mut cuts: Vec<usize> = (1..pieces)
            .map(|_| 1 + self.below(data.len() - 1))
            .collect();
        cuts.sort_unstable();
        cuts.dedup();

        let mut parts = Vec::new();
        let mut start = 0;
        for cut in cuts {
            parts.push(&data[start..cut]);
            start = cut;
        }
        parts.push(&data[start..]);
        parts
    }
}

/// Move everything `from` wrote over to `to`, record by record, each record
/// cut in up to `pieces` deliveries. `after` runs after every delivery.
pub(crate) fn transfer(
    from: &MemoryEndpoint,
    to: &MemoryEndpoint,
    rng: &mut Lcg,
    pieces: usize,
    mut after: impl FnMut(),
) -> usize {
    let data = from.take_output();
    let mut deliveries = 0;
    for record in split_records(&data) {
        for part in rng.split(record, pieces) {
            to.deliver(part);
            deliveries += 1;
            after();
        }
    }
    deliveries
}

/// Fill from `endpoint` until nothing more comes, appending to `out`.
pub(crate) fn fill_all(endpoint: &dyn Endpoint, buf: &mut Buffer, out: &mut Vec<u8>) {
    loop {
        let filled = endpoint.fill(buf).unwrap();
        out.extend_from_slice(buf.as_slice());
        buf.clear();
        if filled.bytes() == 0 {
            break;
        }
    }
}

/// Client and server adapters wired to each other through memory.
pub(crate) struct Pair {
    pub arena: Arc<BufferArena>,
    pub client_raw: MemoryEndpoint,
    pub server_raw: MemoryEndpoint,
    pub client: Arc<TlsEndpoint<ToyEngine>>,
    pub server: Arc<TlsEndpoint<ToyEngine>>,
    pub client_stats: Arc<Stats>,
    pub server_stats: Arc<Stats>,
}

impl Pair {
    pub fn new(client: ToyEngine, server: ToyEngine, config: &Config) -> Pair {
        let arena = Arc::new(BufferArena::new(config.max_pooled_buffers));
        let client_raw = MemoryEndpoint::new();
        let server_raw = MemoryEndpoint::new();
        let client_stats = client.stats();
        let server_stats = server.stats();

        Pair {
            client: Arc::new(TlsEndpoint::new(
                Arc::new(client_raw.clone()),
                client,
                arena.clone(),
                config,
            )),
            server: Arc::new(TlsEndpoint::new(
                Arc::new(server_raw.clone()),
                server,
                arena.clone(),
                config,
            )),
            arena,
            client_raw,
            server_raw,
            client_stats,
            server_stats,
        }
    }

    pub fn default_pair() -> Pair {
        Pair::new(
            ToyEngine::client(1024),
            ToyEngine::server(1024),
            &Config::default(),
        )
    }

    /// Run the handshake to the end, records cut in up to `pieces` deliveries.
    /// Returns the number of deliveries.
    pub fn handshake(&self, rng: &mut Lcg, pieces: usize) -> usize {
        let mut deliveries = 0;
        for _ in 0..100 {
            self.client.flush_buffered().unwrap();
            deliveries += transfer(&self.client_raw, &self.server_raw, rng, pieces, || {
                self.server.flush_buffered().unwrap()
            });
            deliveries += transfer(&self.server_raw, &self.client_raw, rng, pieces, || {
                self.client.flush_buffered().unwrap()
            });

            let done = self.client_stats.handshakes() > 0
                && self.client_stats.handshakes() == self.server_stats.handshakes()
                && self.client.handshake_status() == HandshakeStatus::NotHandshaking
                && self.server.handshake_status() == HandshakeStatus::NotHandshaking;
            if done {
                return deliveries;
            }
        }
        panic!("handshake did not finish");
    }
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

#[test]
fn handshake() {
    let pair = Pair::default_pair();
    pair.handshake(&mut Lcg::new(1), 1);

    assert_eq!(
        pair.client_stats.records(),
        vec![(HANDSHAKE, 120), (HANDSHAKE, 130), (HANDSHAKE, 40)]
    );
    assert_eq!(
        pair.server_stats.records(),
        vec![(HANDSHAKE, 700), (HANDSHAKE, 4), (HANDSHAKE, 40)]
    );
    assert_eq!(pair.client_stats.tasks(), 1);
    assert_eq!(pair.server_stats.tasks(), 1);
}

#[test]
fn handshake_split_in_twelve() {
    let baseline = Pair::default_pair();
    assert_eq!(baseline.handshake(&mut Lcg::new(0), 1), 6);

    for seed in 0..50 {
        let pair = Pair::default_pair();
        let deliveries = pair.handshake(&mut Lcg::new(seed), 2);

        assert_eq!(deliveries, 12, "seed {}", seed);
        assert_eq!(pair.client_stats.records(), baseline.client_stats.records());
        assert_eq!(pair.server_stats.records(), baseline.server_stats.records());
    }
}

#[test]
fn application_data_any_split() {
    let data = payload(20_000);

    for seed in 0..20 {
        let pair = Pair::default_pair();
        let mut rng = Lcg::new(seed);
        pair.handshake(&mut rng, 1);

        let mut out = Buffer::from(data.clone());
        let mut buf = Buffer::new(4096);
        let mut received = Vec::new();

        while out.has_content() {
            pair.client.flush(&mut out).unwrap();
            let wire = pair.client_raw.take_output();
            let pieces = 1 + rng.below(8);
            for part in rng.split(&wire, pieces) {
                pair.server_raw.deliver(part);
                fill_all(&*pair.server, &mut buf, &mut received);
            }
        }

        assert_eq!(received, data, "seed {}", seed);
        assert_eq!(pair.client_stats.count(APPLICATION), 20);
    }
}

#[test]
fn small_fill_buffer_drains_scratch() {
    let pair = Pair::default_pair();
    pair.handshake(&mut Lcg::new(3), 1);

    let data = payload(3000);
    pair.client.flush(&mut Buffer::from(data.clone())).unwrap();
    pair.server_raw.deliver(&pair.client_raw.take_output());

    // Less room than one record.
    let mut buf = Buffer::new(100);
    let mut received = Vec::new();
    for _ in 0..100 {
        fill_all(&*pair.server, &mut buf, &mut received);
        if received.len() == data.len() {
            break;
        }
    }
    assert_eq!(received, data);
}

#[test]
fn renegotiation_keeps_data() {
    let data = payload(10_000);

    for seed in 0..20 {
        let pair = Pair::default_pair();
        let mut rng = Lcg::new(seed);
        pair.handshake(&mut rng, 1);

        let (first, second) = data.split_at(3000 + seed as usize * 100);
        let mut buf = Buffer::new(4096);
        let mut received = Vec::new();

        let mut out = Buffer::from(first.to_vec());
        pair.client.flush(&mut out).unwrap();
        assert!(out.is_empty());

        pair.client.begin_handshake().unwrap();
        let mut out = Buffer::from(second.to_vec());

        for _ in 0..100 {
            pair.client.flush(&mut out).unwrap();
            transfer(&pair.client_raw, &pair.server_raw, &mut rng, 2, || {
                fill_all(&*pair.server, &mut buf, &mut received)
            });
            transfer(&pair.server_raw, &pair.client_raw, &mut rng, 2, || {
                pair.client.flush_buffered().unwrap()
            });
            if out.is_empty() && pair.client.handshake_status() == HandshakeStatus::NotHandshaking
            {
                break;
            }
        }
        fill_all(&*pair.server, &mut buf, &mut received);

        assert_eq!(received, data, "seed {}", seed);
        assert_eq!(pair.client_stats.handshakes(), 2);
        assert_eq!(pair.server_stats.handshakes(), 2);
    }
}

#[test]
fn status_flip_closes() {
    let pair = Pair::new(
        ToyEngine::client(1024),
        ToyEngine::server(1024).flip_after_task(),
        &Config::default(),
    );

    pair.client.flush_buffered().unwrap();
    pair.server_raw.deliver(&pair.client_raw.take_output());

    assert!(!pair.server.process(None, None).unwrap());
    assert!(!pair.server_raw.is_open());
}

#[test]
fn status_flip_ignored_when_disabled() {
    let config = Config {
        detect_handshake_status_flip: false,
        ..Default::default()
    };
    let pair = Pair::new(
        ToyEngine::client(1024),
        ToyEngine::server(1024).flip_after_task(),
        &config,
    );

    pair.client.flush_buffered().unwrap();
    pair.server_raw.deliver(&pair.client_raw.take_output());
    pair.server.flush_buffered().unwrap();

    assert!(pair.server_raw.is_open());
    assert_eq!(pair.server.handshake_status(), HandshakeStatus::NeedUnwrap);
}

#[test]
fn shutdown_output_sends_close_alert() {
    let pair = Pair::default_pair();
    pair.handshake(&mut Lcg::new(5), 1);

    pair.client.shutdown_output().unwrap();
    let wire = pair.client_raw.take_output();
    let records = split_records(&wire);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0][0], ALERT);
    assert!(!pair.client_raw.is_open());

    pair.server_raw.deliver(&wire);
    let mut buf = Buffer::new(4096);
    assert_eq!(pair.server.fill(&mut buf).unwrap(), Filled::Eof);
    assert!(!pair.server_raw.is_open());
}

#[test]
fn end_of_stream_closes_inbound() {
    let pair = Pair::default_pair();
    pair.handshake(&mut Lcg::new(6), 1);

    pair.server_raw.deliver_eof();
    let mut buf = Buffer::new(4096);
    assert_eq!(pair.server.fill(&mut buf).unwrap(), Filled::Eof);
    assert!(pair.server.is_input_shutdown());
    assert!(!pair.server.is_output_shutdown());
}

#[test]
fn partial_record_is_not_buffered_input() {
    let pair = Pair::default_pair();
    pair.handshake(&mut Lcg::new(7), 1);

    pair.client.flush(&mut Buffer::from(b"hello".to_vec())).unwrap();
    let wire = pair.client_raw.take_output();
    pair.server_raw.deliver(&wire[..4]);

    let mut buf = Buffer::new(4096);
    assert_eq!(pair.server.fill(&mut buf).unwrap(), Filled::Bytes(0));
    assert!(!pair.server.is_buffering_input());

    pair.server_raw.deliver(&wire[4..]);
    assert_eq!(pair.server.fill(&mut buf).unwrap(), Filled::Bytes(5));
    assert_eq!(buf.as_slice(), b"hello");
}

#[test]
fn buffers_held_by_scope() {
    let pair = Pair::default_pair();
    pair.handshake(&mut Lcg::new(8), 1);
    assert_eq!(pair.client.allocations(), 0);
    assert!(pair.arena.pooled() > 0);

    {
        let _scope = pair.client.buffer_scope();
        assert_eq!(pair.client.allocations(), 1);

        pair.client
            .flush(&mut Buffer::from(b"hello".to_vec()))
            .unwrap();
        assert_eq!(pair.client.allocations(), 1);

        let _nested = pair.client.buffer_scope();
        assert_eq!(pair.client.allocations(), 2);
    }

    assert_eq!(pair.client.allocations(), 0);
}

#[test]
fn progress_reported_once() {
    let pair = Pair::default_pair();
    pair.client.flush_buffered().unwrap();
    assert!(pair.client.has_progressed());
    assert!(!pair.client.has_progressed());
}

/// Engine stuck reporting fixed outcomes.
struct Fixed {
    status: HandshakeStatus,
    wrap: Result<EngineStatus, Error>,
}

impl Engine for Fixed {
    fn handshake_status(&self) -> HandshakeStatus {
        self.status
    }

    fn delegated_task(&mut self) -> Option<crate::tls::DelegatedTask> {
        None
    }

    fn begin_handshake(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn wrap(&mut self, _src: &[u8], _dst: &mut [u8]) -> Result<EngineResult, Error> {
        let status = self.wrap.clone()?;
        Ok(EngineResult::new(status, self.status, 0, 0))
    }

    fn unwrap(&mut self, _src: &[u8], _dst: &mut [u8]) -> Result<EngineResult, Error> {
        Ok(EngineResult::new(EngineStatus::Ok, self.status, 0, 0))
    }

    fn close_inbound(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn close_outbound(&mut self) {}

    fn is_inbound_done(&self) -> bool {
        false
    }

    fn is_outbound_done(&self) -> bool {
        false
    }

    fn packet_buffer_size(&self) -> usize {
        1029
    }

    fn application_buffer_size(&self) -> usize {
        1024
    }
}

fn fixed(
    status: HandshakeStatus,
    wrap: Result<EngineStatus, Error>,
) -> (TlsEndpoint<Fixed>, MemoryEndpoint) {
    let raw = MemoryEndpoint::new();
    let endpoint = TlsEndpoint::new(
        Arc::new(raw.clone()),
        Fixed { status, wrap },
        Arc::new(BufferArena::new(4)),
        &Config::default(),
    );
    (endpoint, raw)
}

// UnexpectedHandshakeFinished
#[test]
fn finished_as_status_is_error() {
    let (endpoint, _) = fixed(HandshakeStatus::Finished, Ok(EngineStatus::Ok));
    let err = endpoint.process(None, None).unwrap_err();
    assert_eq!(err, Error::UnexpectedHandshakeFinished);
}

// TlsWrapUnderflow
#[test]
fn wrap_underflow_is_error() {
    let (endpoint, _) = fixed(HandshakeStatus::NeedWrap, Ok(EngineStatus::BufferUnderflow));
    let err = endpoint.process(None, None).unwrap_err();
    assert_eq!(err, Error::TlsWrapUnderflow);
}

// Tls
#[test]
fn engine_fault_closes_endpoint() {
    let (endpoint, raw) = fixed(HandshakeStatus::NeedWrap, Err(Error::Tls("boom".into())));
    let err = endpoint.process(None, None).unwrap_err();
    assert_eq!(err, Error::Tls("boom".into()));
    assert!(!raw.is_open());
    assert_eq!(endpoint.allocations(), 0);
}
