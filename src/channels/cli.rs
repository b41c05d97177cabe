//! CLI channel — stdin/stdout REPL for local testing.

use async_trait::async_trait;
use futures::stream;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::channels::{
    Channel, IncomingMessage, Keyboard, MessageStream, OutgoingResponse, StatusUpdate,
};
use crate::error::ChannelError;

/// A simple CLI channel that reads from stdin and writes to stdout.
///
/// Every line comes from the same local user, so the whole REPL is one
/// onboarding session.
pub struct CliChannel {
    user_id: String,
}

impl CliChannel {
    pub fn new() -> Self {
        Self {
            user_id: "local-user".to_string(),
        }
    }
}

impl Default for CliChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Render reply buttons as a single line, e.g. `[Yes] [No]`.
fn render_keyboard(keyboard: &Keyboard) -> Option<String> {
    match keyboard {
        Keyboard::Choices { rows } => Some(
            rows.iter()
                .flatten()
                .map(|label| format!("[{label}]"))
                .collect::<Vec<_>>()
                .join(" "),
        ),
        Keyboard::Remove => None,
    }
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let user_id = self.user_id.clone();

        tokio::spawn(async move {
            let stdin = tokio::io::stdin();
            let reader = BufReader::new(stdin);
            let mut lines = reader.lines();

            eprint!("> ");

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            eprint!("> ");
                            continue;
                        }
                        let msg = IncomingMessage::new("cli", &user_id, &line);
                        if tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF
                    Err(e) => {
                        tracing::error!("Error reading stdin: {}", e);
                        break;
                    }
                }
            }
        });

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn respond(
        &self,
        _msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        println!("\n{}", response.content);
        if let Some(buttons) = response.keyboard.as_ref().and_then(render_keyboard) {
            println!("{buttons}");
        }
        println!();
        eprint!("> ");
        Ok(())
    }

    async fn send_status(
        &self,
        status: StatusUpdate,
        _metadata: &serde_json::Value,
    ) -> Result<(), ChannelError> {
        match status {
            StatusUpdate::Typing => eprintln!("⏳ checking..."),
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_choice_rows_inline() {
        let keyboard = Keyboard::Choices {
            rows: vec![
                vec!["BTC".into(), "TRX".into(), "ETH".into()],
                vec!["DOGE".into()],
            ],
        };
        assert_eq!(
            render_keyboard(&keyboard).as_deref(),
            Some("[BTC] [TRX] [ETH] [DOGE]")
        );
        assert!(render_keyboard(&Keyboard::Remove).is_none());
    }

    #[test]
    fn cli_channel_name() {
        assert_eq!(CliChannel::new().name(), "cli");
    }
}
