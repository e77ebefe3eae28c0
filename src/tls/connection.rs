use std::sync::Arc;

use super::endpoint::TlsEndpoint;
use super::engine::{Engine, HandshakeStatus};
use crate::connection::{Connection, Handled};
use crate::Error;

/// Drives the TLS handshake and, once application data can flow, the
/// connection running on top of the [`TlsEndpoint`].
pub struct TlsConnection<G> {
    endpoint: Arc<TlsEndpoint<G>>,
    connection: Box<dyn Connection>,
}

impl<G: Engine + 'static> TlsConnection<G> {
    /// `connection` must run on `endpoint` (or a clone of the `Arc`).
    pub fn new(endpoint: Arc<TlsEndpoint<G>>, connection: Box<dyn Connection>) -> Self {
        TlsConnection {
            endpoint,
            connection,
        }
    }

    pub fn endpoint(&self) -> &Arc<TlsEndpoint<G>> {
        &self.endpoint
    }
}

impl<G: Engine + 'static> Connection for TlsConnection<G> {
    fn handle(&mut self) -> Result<Handled, Error> {
        let _scope = self.endpoint.buffer_scope();

        let mut progress = true;
        while progress {
            progress = false;

            if self.endpoint.handshake_status() != HandshakeStatus::NotHandshaking {
                progress = self.endpoint.process(None, None)?;
            } else {
                if let Handled::Switched(next) = self.connection.handle()? {
                    debug!("Wrapped connection switched protocol");
                    self.connection = next;
                    progress = true;
                }

                // A renegotiation started underneath needs driving.
                if self.endpoint.handshake_status() != HandshakeStatus::NotHandshaking {
                    progress = true;
                }
            }

            trace!("TLS handle progress={}", progress);
        }

        Ok(Handled::Continue)
    }

    fn is_idle(&self) -> bool {
        self.connection.is_idle()
    }

    fn on_input_shutdown(&mut self) -> Result<(), Error> {
        self.connection.on_input_shutdown()
    }

    fn on_close(&mut self) {
        self.connection.on_close()
    }
}
