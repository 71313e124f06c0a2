//! Central shared state — passed as `Arc<AppState>` to all Axum handlers
//! and background tasks.

use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;

use tg_channels::channel::Channel;
use tg_core::address::ChatId;
use tg_core::config::Config;
use tg_core::pairing::PairingCodes;
use tg_core::paths::Paths;
use tg_sessions::SessionManager;

use crate::boards::BoardStore;
use crate::pipeline::batch::OutputBatcher;

pub struct AppState {
    pub paths: Paths,
    /// Mutated by pairing/linking; guarded by a short-section RwLock and
    /// persisted with `Config::save` after each mutation.
    pub config: RwLock<Config>,
    /// RFC3339 timestamp the daemon booted, reported by `/health` and used
    /// by the wrapper's code-freshness check.
    pub started_at: String,
    pub pid: u32,
    pub secret: String,
    pub sessions: SessionManager,
    pub channels: Vec<Arc<dyn Channel>>,
    pub pairing: PairingCodes,
    pub boards: BoardStore,
    pub batcher: OutputBatcher,
    pub shutdown: CancellationToken,
}

impl AppState {
    /// The adapter responsible for a chat address, matched on channel type
    /// and account name.
    pub fn channel_for_chat(&self, chat: &ChatId) -> Option<Arc<dyn Channel>> {
        let addr = chat.parse().ok()?;
        self.channels
            .iter()
            .find(|c| {
                c.channel_type() == addr.channel_type
                    && match addr.channel_name.as_deref() {
                        Some(name) => c.name() == name,
                        // A bare address targets the account named after its
                        // type, or the sole account of that type.
                        None => {
                            c.name() == addr.channel_type
                                || self
                                    .channels
                                    .iter()
                                    .filter(|x| x.channel_type() == addr.channel_type)
                                    .count()
                                    == 1
                        }
                    }
            })
            .cloned()
    }

    /// Read a config value under the lock.
    pub fn with_config<T>(&self, f: impl FnOnce(&Config) -> T) -> T {
        f(&self.config.read().unwrap())
    }

    /// Mutate the config and persist it.
    pub fn update_config<T>(
        &self,
        f: impl FnOnce(&mut Config) -> T,
    ) -> Result<T, tg_core::Error> {
        let result = {
            let mut config = self.config.write().unwrap();
            let result = f(&mut config);
            config.save(&self.paths)?;
            result
        };
        Ok(result)
    }
}
