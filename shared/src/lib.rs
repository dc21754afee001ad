pub mod channel;
pub mod metrics_defs;
pub mod protocol;
