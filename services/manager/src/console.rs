//! Outbound protocol lines.
//!
//! Everything the manager says goes through [`Console`]: worker messages,
//! status lines and LOG lines for the supervisor console. LOG lines are
//! mirrored to tracing.

use ankadepth_proto::{LogLevel, LogSource, Message};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct Console {
    outbound: mpsc::Sender<Message>,
}

impl Console {
    pub fn new(outbound: mpsc::Sender<Message>) -> Self {
        Self { outbound }
    }

    pub async fn send(&self, message: Message) {
        if self.outbound.send(message).await.is_err() {
            debug!("Outbound channel closed");
        }
    }

    pub async fn log(&self, level: LogLevel, text: String) {
        match level {
            LogLevel::Info => info!("{}", text),
            LogLevel::Warning => warn!("{}", text),
            LogLevel::Error => error!("{}", text),
        }
        self.send(Message::Log {
            source: LogSource::Manager,
            level,
            text,
        })
        .await;
    }

    pub async fn info(&self, text: impl Into<String>) {
        self.log(LogLevel::Info, text.into()).await;
    }

    pub async fn warning(&self, text: impl Into<String>) {
        self.log(LogLevel::Warning, text.into()).await;
    }

    pub async fn error(&self, text: impl Into<String>) {
        self.log(LogLevel::Error, text.into()).await;
    }
}
