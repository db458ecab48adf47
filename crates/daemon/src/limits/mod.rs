//! Resource governance for sub-protocols.

pub mod filetransfer;

pub use filetransfer::{
    CounterSnapshot, DeviceCounters, FileInfo, Permit, PermitError, PolicyViolation, RateTracker,
};
