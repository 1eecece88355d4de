//! Client side of the noise handshake.
//!
//! Drives one [`Connection`] from `NotStarted` to `Finished`:
//!
//! | Step | State after |
//! |------|-------------|
//! | send client hello, await next frame | `HelloSent` |
//! | process server hello | `ServerHelloReceived` |
//! | send client finish, commit keys | `Finished` |
//!
//! Any failure moves the connection to `Failed`; there is no second attempt.

// ============================================================================
// Imports
// ============================================================================

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::{ClientPayload, HandshakeMessage, HandshakeState};

use super::connection::Connection;

// ============================================================================
// Connection - Handshake
// ============================================================================

impl Connection {
    /// Runs the three-message handshake.
    ///
    /// Starts the keep-alive once the handshake finishes.
    ///
    /// # Errors
    ///
    /// - [`Error::Handshake`] if the handshake was already attempted or the
    ///   server hello is malformed or fails verification
    /// - [`Error::Timeout`] if the server hello does not arrive in time
    /// - [`Error::ConnectionClosed`] if the transport closes mid-handshake,
    ///   including right after the keys were committed
    pub async fn handshake(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if *state != HandshakeState::NotStarted {
                return Err(Error::handshake("handshake already attempted"));
            }
            *state = HandshakeState::HelloSent;
        }

        match self.run_handshake().await {
            Ok(()) => {
                self.start_keep_alive()?;
                info!("Handshake finished");
                Ok(())
            }
            Err(e) => {
                self.set_state(HandshakeState::Failed);
                warn!(error = %e, "Handshake failed");
                Err(e)
            }
        }
    }

    async fn run_handshake(&self) -> Result<()> {
        let hello = {
            let mut engine = self.inner.engine.lock();
            let ephemeral = engine.generate_key_pair();
            engine.encode_message(&HandshakeMessage::client_hello(ephemeral.public))?
        };

        debug!("Sending client hello");
        let reply = self.await_frame(Some(&hello)).await?;

        let server_hello = self
            .inner
            .engine
            .lock()
            .decode_message(&reply)?
            .server_hello
            .ok_or_else(|| Error::handshake("expected server hello"))?;
        debug!("Server hello received");

        let (finish, payload) = {
            let mut engine = self.inner.engine.lock();
            let static_key = engine
                .process_handshake(&server_hello, &self.inner.credentials.noise_key)
                .map_err(|e| match e {
                    Error::Handshake { .. } => e,
                    other => Error::handshake(other.to_string()),
                })?;

            let payload = engine.encode_payload(&self.client_payload())?;
            let payload = engine.encrypt(&payload)?;
            (static_key, payload)
        };
        self.set_state(HandshakeState::ServerHelloReceived);

        let finish = self
            .inner
            .engine
            .lock()
            .encode_message(&HandshakeMessage::client_finish(finish, payload))?;

        debug!("Sending client finish");
        self.write_frame(&finish).await?;

        self.inner.engine.lock().finish_init()?;
        self.mark_finished()
    }

    /// Selects the identity payload for the client finish.
    fn client_payload(&self) -> ClientPayload {
        let config = &self.inner.config;
        let credentials = &self.inner.credentials;
        let user_agent = config.browser.user_agent();

        if config.mobile {
            return ClientPayload::Mobile {
                username: credentials.me.as_ref().map(|me| me.user().to_string()),
                user_agent,
            };
        }

        match &credentials.me {
            None => ClientPayload::Registration {
                registration_id: credentials.registration_id,
                identity_key: credentials.identity_key.public.clone(),
                user_agent,
            },
            Some(me) => ClientPayload::Login {
                username: me.user().to_string(),
                device: me.device(),
                user_agent,
            },
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
