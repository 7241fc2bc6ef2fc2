//! Synchronization with the chat service.
//!
//! - [`DeltaPoller`] turns the server's change feed into a pull-driven stream.
//! - [`DeltaApplier`] writes each page into the local replica atomically.
//! - [`ChatSyncPipeline`] owns the loop between the two.
//! - [`SettingsSyncEngine`] versions local settings and reconciles them.

mod applier;
mod gateway;
mod pipeline;
mod poller;
mod retry;
mod settings;

pub use applier::DeltaApplier;
pub use gateway::{SettingsDao, SettingsGateway, SettingsObserver};
pub use pipeline::{CatchUpReport, ChatSyncPipeline, DEFAULT_RESUBSCRIBE_DELAY};
pub use poller::{
    DeltaPoller, DeltaSubscription, PollIntervals, DEFAULT_CATCH_UP_INTERVAL,
    DEFAULT_POLL_INTERVAL,
};
pub use retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
pub use settings::{SettingSyncOutcome, SettingsSyncEngine};
