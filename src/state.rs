use sqlx::SqlitePool;
use tokio::sync::broadcast;

use crate::booking::LifecycleEvent;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub events: broadcast::Sender<LifecycleEvent>,
    pub push: PushConfig,
}

#[derive(Clone, Debug)]
pub struct PushConfig {
    pub public_key: String,
    pub private_key: String,
    pub subject: String,
}

impl PushConfig {
    pub fn from_env() -> Self {
        Self {
            public_key: std::env::var("VAPID_PUBLIC_KEY").unwrap_or_default(),
            private_key: std::env::var("VAPID_PRIVATE_KEY").unwrap_or_default(),
            subject: std::env::var("VAPID_SUBJECT")
                .unwrap_or_else(|_| "mailto:destek@kuaforrandevu.app".to_string()),
        }
    }

    pub fn enabled(&self) -> bool {
        !(self.public_key.trim().is_empty() || self.private_key.trim().is_empty())
    }
}
