//! RoomServer Actor implementation
//!
//! The central actor that owns every connection handler on the hub.
//! Uses the Actor pattern with mpsc channels for message passing: `Room`
//! handles send commands, handlers send events, and this actor is the only
//! consumer of both. Serializing everything through one task gives broadcast
//! a consistent view of which peers exist.

use std::collections::HashMap;

use futures_util::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::connection::FramedConnection;
use crate::handler::{ConnectionHandler, HandlerConfig, HandlerEvent};
use crate::message::Envelope;
use crate::types::HandlerId;

/// Commands sent from `Room` handles to the RoomServer actor
#[derive(Debug)]
pub enum RoomCommand {
    /// Register a new connection
    Add {
        connection: FramedConnection,
        name: String,
        reply: oneshot::Sender<HandlerId>,
    },
    /// Remove and stop a handler
    Remove { id: HandlerId },
    /// Relay to everyone except the sender
    Broadcast {
        sender_id: HandlerId,
        sender_name: String,
        text: String,
    },
    /// Relay to everyone
    BroadcastAll { sender_name: String, text: String },
    /// Number of registered handlers
    Count { reply: oneshot::Sender<usize> },
    /// Stop every handler and hand them back for joining
    StopAll {
        reply: oneshot::Sender<Vec<ConnectionHandler>>,
    },
}

/// Notices for the hub operator's console
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomNotice {
    /// A peer joined; `count` includes it
    Joined {
        id: HandlerId,
        name: String,
        count: usize,
    },
    /// A peer sent a message (already relayed to the others)
    Message {
        id: HandlerId,
        name: String,
        text: String,
    },
    /// A peer left; `count` excludes it
    Left {
        id: HandlerId,
        name: String,
        count: usize,
    },
}

/// The main RoomServer actor
pub struct RoomServer {
    /// All registered handlers: HandlerId -> ConnectionHandler
    handlers: HashMap<HandlerId, ConnectionHandler>,
    /// Next id to hand out
    next_id: u64,
    /// Command receiver channel
    commands: mpsc::Receiver<RoomCommand>,
    /// Handler event channel; a clone of the sender goes to every handler
    events_tx: mpsc::Sender<HandlerEvent>,
    events_rx: mpsc::Receiver<HandlerEvent>,
    /// Console notices
    notices: mpsc::UnboundedSender<RoomNotice>,
    handler_config: HandlerConfig,
}

impl RoomServer {
    pub fn new(
        commands: mpsc::Receiver<RoomCommand>,
        notices: mpsc::UnboundedSender<RoomNotice>,
        event_channel_capacity: usize,
        handler_config: HandlerConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(event_channel_capacity.max(1));
        Self {
            handlers: HashMap::new(),
            next_id: 1,
            commands,
            events_tx,
            events_rx,
            notices,
            handler_config,
        }
    }

    /// Run the RoomServer event loop
    ///
    /// Processes commands and handler events until every `Room` handle is
    /// dropped, then stops and joins all remaining handlers.
    pub async fn run(mut self) {
        info!("RoomServer started");

        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event),
            }
        }

        // Handlers blocked on a full event channel must not wait for us.
        self.events_rx.close();
        let handlers = self.take_all();
        join_all(handlers.into_iter().map(ConnectionHandler::join)).await;

        info!("RoomServer shutting down");
    }

    /// Process a single command
    fn handle_command(&mut self, cmd: RoomCommand) {
        match cmd {
            RoomCommand::Add {
                connection,
                name,
                reply,
            } => {
                let id = self.handle_add(connection, name);
                let _ = reply.send(id);
            }
            RoomCommand::Remove { id } => {
                self.handle_remove(id);
            }
            RoomCommand::Broadcast {
                sender_id,
                sender_name,
                text,
            } => {
                self.broadcast(Some(sender_id), &sender_name, &text);
            }
            RoomCommand::BroadcastAll { sender_name, text } => {
                self.broadcast(None, &sender_name, &text);
            }
            RoomCommand::Count { reply } => {
                let _ = reply.send(self.handlers.len());
            }
            RoomCommand::StopAll { reply } => {
                let handlers = self.take_all();
                info!("Stopped {} handler(s)", handlers.len());
                let _ = reply.send(handlers);
            }
        }
    }

    /// Process a single handler event
    fn handle_event(&mut self, event: HandlerEvent) {
        match event {
            HandlerEvent::Message { id, name, text } => {
                // Late frames from a handler that was already removed
                if !self.handlers.contains_key(&id) {
                    debug!(%id, "Dropping message from removed handler");
                    return;
                }

                info!(%id, "{}", Envelope::new(&name, &text));
                self.broadcast(Some(id), &name, &text);
                let _ = self.notices.send(RoomNotice::Message { id, name, text });
            }
            HandlerEvent::Disconnected { id } => {
                self.handle_remove(id);
            }
        }
    }

    /// Handle new connection
    fn handle_add(&mut self, connection: FramedConnection, name: String) -> HandlerId {
        let id = HandlerId(self.next_id);
        self.next_id += 1;

        let handler = ConnectionHandler::spawn(
            id,
            name.clone(),
            connection,
            self.events_tx.clone(),
            &self.handler_config,
        );
        self.handlers.insert(id, handler);

        let count = self.handlers.len();
        info!(%id, name = %name, count, "Client joined");
        let _ = self.notices.send(RoomNotice::Joined { id, name, count });
        id
    }

    /// Handle removal; absent ids are ignored
    fn handle_remove(&mut self, id: HandlerId) {
        let Some(handler) = self.handlers.remove(&id) else {
            return;
        };

        handler.stop();

        let count = self.handlers.len();
        let name = handler.name().to_string();
        info!(%id, name = %name, count, "Client left");
        let _ = self.notices.send(RoomNotice::Left { id, name, count });
    }

    /// Format once, then queue for every active handler except `exclude`
    fn broadcast(&self, exclude: Option<HandlerId>, sender_name: &str, text: &str) {
        let payload = Envelope::new(sender_name, text).to_payload();

        let mut delivered = 0usize;
        for (id, handler) in &self.handlers {
            if Some(*id) == exclude || !handler.is_active() {
                continue;
            }
            match handler.send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(%id, error = %e, "Broadcast to peer failed"),
            }
        }

        debug!(sender = %sender_name, delivered, "Broadcast queued");
    }

    /// Stop every handler and empty the registry
    fn take_all(&mut self) -> Vec<ConnectionHandler> {
        let handlers: Vec<ConnectionHandler> =
            self.handlers.drain().map(|(_, handler)| handler).collect();
        for handler in &handlers {
            handler.stop();
        }
        handlers
    }
}
