//! Main bot loop.
//!
//! Pulls messages from every channel and routes each one to a worker task
//! owned by its session. A worker drains its queue in arrival order, so one
//! user's messages are handled strictly FIFO while different users proceed
//! concurrently. Idle workers close their queue and exit; the next message
//! for that session starts a fresh one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::channels::{ChannelManager, IncomingMessage, StatusUpdate};
use crate::onboarding::OnboardingManager;

/// How long a session worker waits for its next message before exiting.
const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Closed queues are pruned once the routing table grows past this size.
const QUEUE_PRUNE_THRESHOLD: usize = 1024;

/// Connects the channels to the onboarding conversation.
pub struct Bot {
    manager: Arc<OnboardingManager>,
    channels: Arc<ChannelManager>,
    idle_timeout: Duration,
}

impl Bot {
    pub fn new(manager: Arc<OnboardingManager>, channels: ChannelManager) -> Self {
        Self {
            manager,
            channels: Arc::new(channels),
            idle_timeout: SESSION_IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Run until Ctrl+C or until every channel stream ends.
    ///
    /// Messages already received are handled and answered before the
    /// channels shut down.
    pub async fn run(self) -> crate::error::Result<()> {
        let mut message_stream = self.channels.start_all().await?;
        let mut workers = SessionWorkers::new(
            Arc::clone(&self.manager),
            Arc::clone(&self.channels),
            self.idle_timeout,
        );

        tracing::info!("Deposit bot ready and listening");

        loop {
            let message = tokio::select! {
                biased;
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Ctrl+C received, shutting down...");
                    break;
                }
                msg = message_stream.next() => {
                    match msg {
                        Some(m) => m,
                        None => {
                            tracing::info!("All channel streams ended, shutting down...");
                            break;
                        }
                    }
                }
            };

            workers.route(message);
        }

        tracing::info!("Bot shutting down, finishing queued messages...");
        workers.drain().await;
        self.channels.shutdown_all().await?;

        Ok(())
    }
}

/// Per-session FIFO queues, each drained by one worker task.
struct SessionWorkers {
    manager: Arc<OnboardingManager>,
    channels: Arc<ChannelManager>,
    idle_timeout: Duration,
    queues: HashMap<String, mpsc::UnboundedSender<IncomingMessage>>,
    tasks: JoinSet<()>,
}

impl SessionWorkers {
    fn new(
        manager: Arc<OnboardingManager>,
        channels: Arc<ChannelManager>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            manager,
            channels,
            idle_timeout,
            queues: HashMap::new(),
            tasks: JoinSet::new(),
        }
    }

    /// Queue `message` behind earlier messages of the same session.
    fn route(&mut self, message: IncomingMessage) {
        self.reap();

        let key = message.session_key();
        let message = match self.queues.get(&key) {
            Some(queue) => match queue.send(message) {
                Ok(()) => return,
                // The worker went idle and closed its queue.
                Err(mpsc::error::SendError(message)) => message,
            },
            None => message,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        self.tasks.spawn(session_worker(
            Arc::clone(&self.manager),
            Arc::clone(&self.channels),
            message,
            rx,
            self.idle_timeout,
        ));
        self.queues.insert(key, tx);

        if self.queues.len() > QUEUE_PRUNE_THRESHOLD {
            let before = self.queues.len();
            self.queues.retain(|_, queue| !queue.is_closed());
            tracing::debug!(pruned = before - self.queues.len(), "Pruned idle session queues");
        }
    }

    fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            if let Err(e) = result {
                tracing::error!("Session worker failed: {}", e);
            }
        }
    }

    /// Close every queue and wait until all queued messages are handled.
    async fn drain(mut self) {
        self.queues.clear();
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!("Session worker failed: {}", e);
            }
        }
    }
}

/// Handle one session's messages in order until its queue closes or idles out.
async fn session_worker(
    manager: Arc<OnboardingManager>,
    channels: Arc<ChannelManager>,
    first: IncomingMessage,
    mut queue: mpsc::UnboundedReceiver<IncomingMessage>,
    idle_timeout: Duration,
) {
    dispatch(&manager, &channels, first).await;

    loop {
        match tokio::time::timeout(idle_timeout, queue.recv()).await {
            Ok(Some(message)) => dispatch(&manager, &channels, message).await,
            Ok(None) => return,
            Err(_) => {
                // Refuse new messages, then finish what was already queued.
                queue.close();
                while let Some(message) = queue.recv().await {
                    dispatch(&manager, &channels, message).await;
                }
                return;
            }
        }
    }
}

/// Handle one message and send its reply, if any.
async fn dispatch(manager: &OnboardingManager, channels: &ChannelManager, message: IncomingMessage) {
    tracing::debug!(
        message_id = %message.id,
        "Received message from {} on {} ({} chars)",
        message.user_id,
        message.channel,
        message.content.len()
    );

    if manager.may_be_slow(&message).await {
        if let Err(e) = channels
            .send_status(&message.channel, StatusUpdate::Typing, &message.metadata)
            .await
        {
            tracing::debug!("Failed to send typing status: {}", e);
        }
    }

    let Some(reply) = manager.handle(&message).await else {
        return;
    };

    match channels.respond(&message, reply).await {
        Ok(()) => tracing::debug!(
            message_id = %message.id,
            latency_ms = (Utc::now() - message.received_at).num_milliseconds(),
            "Reply sent"
        ),
        Err(e) => tracing::error!(
            message_id = %message.id,
            channel = %message.channel,
            user_id = %message.user_id,
            "Failed to deliver reply: {}",
            e
        ),
    }
}
