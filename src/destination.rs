use std::sync::Arc;

use crate::connection::ConnectionId;
use crate::exchange::Exchange;

/// Where exchanges are dispatched and connections are pooled.
pub trait Destination: Send + Sync {
    /// Dispatch `exchange` on some connection, pooled or new.
    fn send(&self, exchange: Arc<dyn Exchange>);

    /// `connection` has no exchange left. When `close` is set it must be
    /// closed, otherwise it can be pooled for reuse.
    fn return_connection(&self, connection: ConnectionId, close: bool);
}
