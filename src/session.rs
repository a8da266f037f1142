//! Outbound session
//!
//! The participant side of a hub connection. An `OutboundSession` owns the
//! connection until `start`, which hands it to a `ConnectionHandler` and
//! returns that handler's event stream to the caller.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::config::ClientConfig;
use crate::connection::FramedConnection;
use crate::error::{AppError, AppResult, SendError};
use crate::handler::{ConnectionHandler, HandlerConfig, HandlerEvent};
use crate::types::HandlerId;

/// Buffered events between the handler and the session owner
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// The single handler a session drives
const SESSION_ID: HandlerId = HandlerId(0);

/// Client connection to a hub
#[derive(Debug)]
pub struct OutboundSession {
    connection: Option<FramedConnection>,
    handler: Option<ConnectionHandler>,
    name: String,
    config: HandlerConfig,
}

impl OutboundSession {
    pub fn new(connection: FramedConnection, config: &ClientConfig) -> Self {
        let name = connection.peer_addr().to_string();
        Self {
            connection: Some(connection),
            handler: None,
            name,
            config: config.handler_config(),
        }
    }

    /// Hub address this session talks to
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw access to the connection before `start`
    ///
    /// Returns `None` once the handler has taken ownership.
    pub fn connection_mut(&mut self) -> Option<&mut FramedConnection> {
        self.connection.as_mut()
    }

    /// Start the receive and write loops
    ///
    /// Every inbound frame arrives as `HandlerEvent::Message`, followed by a
    /// single `HandlerEvent::Disconnected` when the stream ends.
    pub fn start(&mut self) -> AppResult<mpsc::Receiver<HandlerEvent>> {
        let connection = self.connection.take().ok_or(AppError::AlreadyStarted)?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        self.handler = Some(ConnectionHandler::spawn(
            SESSION_ID,
            self.name.clone(),
            connection,
            events_tx,
            &self.config,
        ));
        info!(hub = %self.name, "Session started");

        Ok(events_rx)
    }

    /// Queue `text` for the hub; a no-op before `start` or after `stop`
    pub fn send(&self, text: impl Into<Arc<str>>) -> Result<(), SendError> {
        match &self.handler {
            Some(handler) => handler.send(text),
            None => Ok(()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handler
            .as_ref()
            .is_some_and(ConnectionHandler::is_active)
    }

    /// Stop the handler and wait for its loops to exit
    pub async fn stop(&mut self) {
        if let Some(handler) = self.handler.take() {
            handler.join().await;
            info!(hub = %self.name, "Session stopped");
        }
        self.connection = None;
    }
}
