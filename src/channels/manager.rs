//! ChannelManager — starts every channel and routes replies back.

use std::sync::Arc;

use futures::stream::{self, StreamExt};

use crate::channels::{Channel, IncomingMessage, MessageStream, OutgoingResponse, StatusUpdate};
use crate::error::ChannelError;

/// Owns the registered channels.
///
/// Replies are routed by `IncomingMessage::channel`, so a message always
/// goes back through the transport it arrived on.
#[derive(Default)]
pub struct ChannelManager {
    channels: Vec<Arc<dyn Channel>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, channel: Box<dyn Channel>) {
        tracing::debug!("Registered channel: {}", channel.name());
        self.channels.push(Arc::from(channel));
    }

    pub fn names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    fn get(&self, name: &str) -> Result<&Arc<dyn Channel>, ChannelError> {
        self.channels
            .iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| ChannelError::UnknownChannel(name.to_string()))
    }

    /// Start all channels and merge their streams.
    ///
    /// A channel that fails to start is logged and skipped; it is an error
    /// only when none start.
    pub async fn start_all(&self) -> Result<MessageStream, ChannelError> {
        let mut streams = Vec::with_capacity(self.channels.len());

        for channel in &self.channels {
            match channel.start().await {
                Ok(s) => {
                    tracing::info!("Channel {} started", channel.name());
                    streams.push(s);
                }
                Err(e) => {
                    tracing::error!("Channel {} failed to start: {}", channel.name(), e);
                }
            }
        }

        if streams.is_empty() {
            return Err(ChannelError::StartupFailed {
                name: "all".into(),
                reason: "no channel could be started".into(),
            });
        }

        Ok(stream::select_all(streams).boxed())
    }

    /// Send a reply through the channel `msg` came from.
    pub async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        self.get(&msg.channel)?.respond(msg, response).await
    }

    pub async fn send_status(
        &self,
        channel: &str,
        status: StatusUpdate,
        metadata: &serde_json::Value,
    ) -> Result<(), ChannelError> {
        self.get(channel)?.send_status(status, metadata).await
    }

    pub async fn shutdown_all(&self) -> Result<(), ChannelError> {
        for channel in &self.channels {
            if let Err(e) = channel.shutdown().await {
                tracing::warn!("Channel {} shutdown failed: {}", channel.name(), e);
            }
        }
        Ok(())
    }
}
