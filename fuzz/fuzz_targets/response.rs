#![no_main]

use std::sync::Arc;

use hconn::http::Request;
use hconn::*;
use libfuzzer_sys::fuzz_target;

// Requests to pick from, they drive how the response is read.
const REQUESTS: &[(&str, &[(&str, &str)])] = &[
    ("GET", &[]),
    ("HEAD", &[]),
    ("GET", &[("connection", "close")]),
    ("POST", &[("content-length", "3")]),
    ("POST", &[("transfer-encoding", "chunked")]),
    ("GET", &[("upgrade", "websocket"), ("connection", "upgrade")]),
];

struct Pool;

impl Destination for Pool {
    fn send(&self, _exchange: Arc<dyn Exchange>) {}
    fn return_connection(&self, _connection: ConnectionId, _close: bool) {}
}

struct Quiet;

impl ExchangeListener for Quiet {}

fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }

    let (method, headers) = REQUESTS[data[0] as usize % REQUESTS.len()];
    let pipelined = data[1] & 1 == 1;
    let piece = (data[2] as usize % 64) + 1;
    let input = &data[3..];

    let config = Config {
        response_buffer_size: 512,
        ..Default::default()
    };
    let arena = Arc::new(BufferArena::new(config.max_pooled_buffers));
    let peer = MemoryEndpoint::new();
    let mut conn = HttpConnection::http1(Arc::new(peer.clone()), Arc::new(Pool), arena, &config);

    let exchange = || {
        let mut builder = Request::builder().method(method).uri("http://fuzz.test/");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        let request = builder.body(()).unwrap();
        let content = if method == "POST" {
            vec![b"abc".to_vec()]
        } else {
            vec![]
        };
        Arc::new(HttpExchange::with_content(request, content, Quiet))
    };

    conn.slot().send(exchange()).unwrap();
    if pipelined {
        conn.slot().send(exchange()).unwrap();
    }

    for chunk in input.chunks(piece) {
        peer.deliver(chunk);
        match conn.handle() {
            Ok(Handled::Switched(_)) | Err(_) => return,
            Ok(Handled::Continue) => {}
        }
        if !peer.is_open() {
            return;
        }
    }

    peer.deliver_eof();
    let _ = conn.handle();
});
