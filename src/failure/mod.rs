//! Per-(vendor, model) failure tracking and auto-disable

mod mock;
mod policy;
mod record;
mod reenable;
mod registry;
mod store;
mod tracker;

pub use mock::MockFailureTracker;
pub use policy::{
    DEFAULT_DISABLE_DURATION_SECONDS, DEFAULT_FAILURE_THRESHOLD, DEFAULT_TIME_WINDOW_SECONDS,
    EffectiveAutoDisableConfig, PairPolicy, PolicySource, PolicyTable, describe_policies,
    policies_json, resolve_effective_config,
};
pub use record::{DisableWindow, DisabledModel, FailureRecord, PairState, pair_key, split_pair_key};
pub use reenable::{DEFAULT_CHECK_INTERVAL, sweep_expired};
pub use registry::{global_tracker, init_global_tracker, install_global_tracker, replace_global_tracker};
pub use store::{RecordStore, ShardedRecordStore};
pub use tracker::{AutoDisableTracker, FailureTracker, TrackerBuilder};
