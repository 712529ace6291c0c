use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::clock::Clock;
use crate::config::RelayConfig;
use crate::error::Error;
use crate::storage::{KeyValueStore, read_record, write_record};

/// The most recent sign-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoutInfo {
    pub email: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Single-slot record that drives the short-lived "sign in again?" prompt.
/// Old records simply stop prompting; nothing deletes them.
pub struct LogoutMemento {
    storage: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    key: String,
    window: time::Duration,
}

impl LogoutMemento {
    #[must_use]
    pub fn new(storage: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, config: &RelayConfig) -> Self {
        Self {
            storage,
            clock,
            key: config.storage_keys().logout(),
            window: time::Duration::try_from(config.logout_prompt_window)
                .unwrap_or(time::Duration::ZERO),
        }
    }

    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the record cannot be written.
    pub fn record(&self, email: impl Into<String>) -> Result<(), Error> {
        let info = LogoutInfo {
            email: email.into(),
            timestamp: self.clock.now(),
        };
        write_record(self.storage.as_ref(), &self.key, &info)
    }

    #[must_use]
    pub fn read(&self) -> Option<LogoutInfo> {
        read_record(self.storage.as_ref(), &self.key)
    }

    /// `true` while the last sign-out is younger than the prompt window.
    #[must_use]
    pub fn should_prompt(&self) -> bool {
        self.read()
            .is_some_and(|info| self.clock.now() - info.timestamp < self.window)
    }
}
