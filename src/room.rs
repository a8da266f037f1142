//! Room handle
//!
//! `Room` is a cheap, cloneable handle to the `RoomServer` actor that owns
//! the registry of connected peers. Every operation is a command on the
//! actor's channel, so calls from any number of tasks are applied one at a
//! time, in order.

use futures_util::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::config::ServerConfig;
use crate::connection::FramedConnection;
use crate::error::{AppError, AppResult};
use crate::handler::ConnectionHandler;
use crate::server::{RoomCommand, RoomNotice, RoomServer};
use crate::types::HandlerId;

/// Handle to the hub's broadcast registry
#[derive(Debug, Clone)]
pub struct Room {
    commands: mpsc::Sender<RoomCommand>,
}

impl Room {
    /// Start the RoomServer actor
    ///
    /// Returns the handle and the stream of console notices. The actor runs
    /// until every clone of the handle is dropped.
    pub fn spawn(config: &ServerConfig) -> (Self, mpsc::UnboundedReceiver<RoomNotice>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_channel_capacity.max(1));
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();

        let server = RoomServer::new(
            cmd_rx,
            notice_tx,
            config.event_channel_capacity,
            config.handler_config(),
        );
        tokio::spawn(server.run());

        (Self { commands: cmd_tx }, notice_rx)
    }

    async fn send(&self, cmd: RoomCommand) -> AppResult<()> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| AppError::ChannelSend)
    }

    async fn request<T>(&self, cmd: impl FnOnce(oneshot::Sender<T>) -> RoomCommand) -> AppResult<T> {
        let (reply, response) = oneshot::channel();
        self.send(cmd(reply)).await?;
        response.await.map_err(|_| AppError::ChannelSend)
    }

    /// Register a connection and start its handler
    pub async fn add(
        &self,
        connection: FramedConnection,
        name: impl Into<String>,
    ) -> AppResult<HandlerId> {
        let name = name.into();
        self.request(|reply| RoomCommand::Add {
            connection,
            name,
            reply,
        })
        .await
    }

    /// Remove and stop a handler; unknown ids are ignored
    pub async fn remove(&self, id: HandlerId) -> AppResult<()> {
        self.send(RoomCommand::Remove { id }).await
    }

    /// Send `"[sender_name]: text"` to every peer except `sender_id`
    pub async fn broadcast(
        &self,
        sender_id: HandlerId,
        sender_name: impl Into<String>,
        text: impl Into<String>,
    ) -> AppResult<()> {
        self.send(RoomCommand::Broadcast {
            sender_id,
            sender_name: sender_name.into(),
            text: text.into(),
        })
        .await
    }

    /// Send `"[sender_name]: text"` to every peer
    pub async fn broadcast_all(
        &self,
        sender_name: impl Into<String>,
        text: impl Into<String>,
    ) -> AppResult<()> {
        self.send(RoomCommand::BroadcastAll {
            sender_name: sender_name.into(),
            text: text.into(),
        })
        .await
    }

    /// Point-in-time number of registered peers
    pub async fn count(&self) -> AppResult<usize> {
        self.request(|reply| RoomCommand::Count { reply }).await
    }

    /// Stop every handler, clear the registry, and wait for all loops to exit
    pub async fn stop_all(&self) -> AppResult<()> {
        let handlers: Vec<ConnectionHandler> =
            self.request(|reply| RoomCommand::StopAll { reply }).await?;

        let stopped = handlers.len();
        join_all(handlers.into_iter().map(ConnectionHandler::join)).await;
        info!(stopped, "All handlers joined");
        Ok(())
    }
}
