//! File transfer governance.
//!
//! A [`Permit`] validates upload and download requests against the configured
//! [`FileTransferLimits`](crate::config::FileTransferLimits) and meters the
//! bytes moved. Device-wide totals live in a [`DeviceCounters`] aggregate that
//! a [`RateTracker`] periodically folds into 1, 5 and 15 minute averages.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use connectd::config::LimitsConfig;
//! use connectd::limits::filetransfer::{DeviceCounters, FileInfo, RateTracker};
//!
//! # async fn demo() -> Result<(), connectd::limits::filetransfer::PermitError> {
//! let tracker = RateTracker::new(Arc::new(DeviceCounters::new()));
//! let permit = tracker.permit(LimitsConfig::default());
//!
//! permit.upload_file(&FileInfo::new("/srv/data/upload.bin").with_size(1024))?;
//! if !permit.bytes_received(1024) {
//!     // receive cap reached
//! }
//! tracker.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod counters;
pub mod fsutil;
pub mod permit;
pub mod tracker;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use counters::{CounterSnapshot, DecayWeights, DeviceCounters, RateAverages};
pub use permit::{Permit, PermitError, PolicyViolation, S_ISUID};
pub use tracker::{RateTracker, DEFAULT_UPDATE_INTERVAL};

/// Description of a file involved in a transfer.
///
/// Size and mode are only known when the peer declares them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Path on the device.
    pub path: PathBuf,
    /// Declared size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Declared permission bits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
    /// Declared owner id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    /// Declared group id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
}

impl FileInfo {
    /// Describe a file known only by its path.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            size: None,
            mode: None,
            uid: None,
            gid: None,
        }
    }

    /// Set the declared size.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Set the declared mode.
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Set the declared owner and group ids.
    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = Some(uid);
        self.gid = Some(gid);
        self
    }
}
