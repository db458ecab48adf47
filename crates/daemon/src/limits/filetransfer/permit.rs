//! File transfer policy gate and byte accounting.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use nix::unistd::{chown, Gid, Group, Uid, User};
use thiserror::Error;
use tracing::debug;

use super::counters::{CounterSnapshot, Counters, DeviceCounters};
use super::fsutil;
use super::FileInfo;
use crate::config::{FileTransferLimits, LimitsConfig};

/// Set-user-id mode bit.
pub const S_ISUID: u32 = 0o4000;

const PERMISSION_BITS: u32 = 0o777;

/// A transfer request rejected by policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    /// The path resolves outside the configured chroot.
    #[error("the target file path is outside chroot")]
    ChrootViolation,

    /// The file is not owned by the configured user.
    #[error("the file owner does not match")]
    OwnerMismatch,

    /// The file does not belong to the configured group.
    #[error("the file group does not match")]
    GroupMismatch,

    /// The path goes through a symbolic link.
    #[error("forbidden to follow the link")]
    FollowLinksForbidden,

    /// The upload target already exists.
    #[error("forbidden to overwrite the file")]
    OverwriteForbidden,

    /// The file is larger than the configured maximum.
    #[error("the file size is over the limit")]
    FileTooBig,

    /// The upload requests the set-user-id bit.
    #[error("the set uid mode is forbidden")]
    SuidForbidden,

    /// The download target is not a regular file.
    #[error("only regular files are allowed")]
    NotRegularFile,
}

/// Errors returned by [`Permit`] operations.
#[derive(Debug, Error)]
pub enum PermitError {
    /// Rejected by policy.
    #[error(transparent)]
    Policy(#[from] PolicyViolation),

    /// Filesystem operation on `path` failed.
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Configured user name does not exist.
    #[error("unknown user: {0}")]
    UnknownUser(String),

    /// Configured group name does not exist.
    #[error("unknown group: {0}")]
    UnknownGroup(String),

    /// The user or group database could not be read.
    #[error("failed to look up {name}: {source}")]
    Lookup {
        name: String,
        #[source]
        source: nix::Error,
    },

    /// The configured umask is not an octal mode.
    #[error("invalid umask: {0}")]
    InvalidUmask(String),
}

impl PermitError {
    fn io(path: &Path, source: io::Error) -> Self {
        PermitError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// The policy violation behind this error, if any.
    pub fn violation(&self) -> Option<PolicyViolation> {
        match self {
            PermitError::Policy(v) => Some(*v),
            _ => None,
        }
    }
}

/// Policy gate for one file transfer session.
///
/// Byte accounting updates both the shared device aggregate and the permit's
/// own counters. The device lock is always taken first.
#[derive(Debug)]
pub struct Permit {
    limits: LimitsConfig,
    device: Arc<DeviceCounters>,
    local: Mutex<Counters>,
}

impl Permit {
    /// Create a permit enforcing `limits` and accounting into `device`.
    pub fn new(limits: LimitsConfig, device: Arc<DeviceCounters>) -> Self {
        Self {
            limits,
            device,
            local: Mutex::new(Counters::new()),
        }
    }

    fn policy(&self) -> &FileTransferLimits {
        &self.limits.file_transfer
    }

    /// Check an upload to `file.path`.
    pub fn upload_file(&self, file: &FileInfo) -> Result<(), PermitError> {
        if !self.limits.enabled {
            return Ok(());
        }
        let policy = self.policy();

        if policy.max_file_size > 0 && file.size.is_some_and(|size| size > policy.max_file_size) {
            return Err(PolicyViolation::FileTooBig.into());
        }

        if !fsutil::is_in_chroot(&file.path, &policy.chroot) {
            return Err(PolicyViolation::ChrootViolation.into());
        }

        if !policy.follow_symlinks {
            let declared = fsutil::normalize(&file.path);
            let parent = declared.parent().unwrap_or(&declared);
            let resolved = fs::canonicalize(parent).map_err(|e| PermitError::io(parent, e))?;
            if resolved != parent {
                debug!(path = %file.path.display(), resolved = %resolved.display(), "Upload parent traverses a link");
                return Err(PolicyViolation::FollowLinksForbidden.into());
            }
        }

        if fsutil::file_exists(&file.path) {
            if !policy.allow_overwrite {
                return Err(PolicyViolation::OverwriteForbidden.into());
            }
            if !fsutil::owner_matches(&file.path, &policy.owner_put) {
                return Err(PolicyViolation::OwnerMismatch.into());
            }
            if !fsutil::group_matches(&file.path, &policy.group_put) {
                return Err(PolicyViolation::GroupMismatch.into());
            }
        }

        if !policy.allow_suid && file.mode.is_some_and(|mode| mode & S_ISUID != 0) {
            return Err(PolicyViolation::SuidForbidden.into());
        }

        Ok(())
    }

    /// Check a download of `file.path`.
    pub fn download_file(&self, file: &FileInfo) -> Result<(), PermitError> {
        if !self.limits.enabled {
            return Ok(());
        }
        let policy = self.policy();

        if policy.regular_files_only && !fsutil::is_regular_file(&file.path) {
            return Err(PolicyViolation::NotRegularFile.into());
        }

        if !fsutil::is_in_chroot(&file.path, &policy.chroot) {
            return Err(PolicyViolation::ChrootViolation.into());
        }

        if !fsutil::owner_matches(&file.path, &policy.owner_get) {
            return Err(PolicyViolation::OwnerMismatch.into());
        }

        if !fsutil::group_matches(&file.path, &policy.group_get) {
            return Err(PolicyViolation::GroupMismatch.into());
        }

        if !policy.follow_symlinks {
            let declared = fsutil::normalize(&file.path);
            let resolved =
                fs::canonicalize(&declared).map_err(|e| PermitError::io(&declared, e))?;
            if resolved != declared {
                return Err(PolicyViolation::FollowLinksForbidden.into());
            }
        }

        if policy.max_file_size > 0 {
            if let Some(size) = fsutil::file_size(&file.path) {
                if size > policy.max_file_size {
                    return Err(PolicyViolation::FileTooBig.into());
                }
            }
        }

        Ok(())
    }

    /// Account `n` transmitted bytes. Returns `false` once the device-wide
    /// transmit cap has been reached.
    ///
    /// The cap is compared against the cumulative total since start.
    pub fn bytes_sent(&self, n: u64) -> bool {
        if !self.limits.enabled {
            return true;
        }
        let cap = self.policy().counters.max_bytes_tx_per_hour;

        let mut device = self.device.lock();
        device.add_tx(n);
        let below_limit = cap == 0 || device.tx_bytes() < cap;

        let mut local = self.local.lock().unwrap_or_else(PoisonError::into_inner);
        local.add_tx(n);
        below_limit
    }

    /// Account `n` received bytes. Returns `false` once the device-wide
    /// receive cap has been reached.
    pub fn bytes_received(&self, n: u64) -> bool {
        if !self.limits.enabled {
            return true;
        }
        let cap = self.policy().counters.max_bytes_rx_per_hour;

        let mut device = self.device.lock();
        device.add_rx(n);
        let below_limit = cap == 0 || device.rx_bytes() < cap;

        let mut local = self.local.lock().unwrap_or_else(PoisonError::into_inner);
        local.add_rx(n);
        below_limit
    }

    /// Returns whether a transfer may continue at `offset`. Negative offsets
    /// mean the size is unknown and always pass.
    pub fn below_max_allowed_file_size(&self, offset: i64) -> bool {
        if !self.limits.enabled {
            return true;
        }
        let max = self.policy().max_file_size;
        match u64::try_from(offset) {
            Ok(offset) => max == 0 || offset < max,
            Err(_) => true,
        }
    }

    /// Apply the sender's mode to an uploaded file, honouring the configured umask.
    pub fn preserve_modes(&self, path: &Path, mode: u32) -> Result<(), PermitError> {
        if !self.limits.enabled {
            return Ok(());
        }
        let policy = self.policy();
        let umask = policy
            .parsed_umask()
            .map_err(|_| PermitError::InvalidUmask(policy.umask.clone()))?;
        let target = effective_mode(mode, umask);

        if policy.do_not_preserve_mode {
            return Ok(());
        }
        fs::set_permissions(path, fs::Permissions::from_mode(target))
            .map_err(|e| PermitError::io(path, e))
    }

    /// Apply ownership to an uploaded file.
    ///
    /// Configured `owner_put` / `group_put` names override the sender's ids.
    pub fn preserve_owner_group(&self, path: &Path, uid: u32, gid: u32) -> Result<(), PermitError> {
        if !self.limits.enabled {
            return Ok(());
        }
        let policy = self.policy();
        let mut uid = uid;
        let mut gid = gid;
        let mut forced = false;

        if !policy.owner_put.is_empty() {
            uid = lookup_uid(&policy.owner_put)?;
            forced = true;
        }
        if !policy.group_put.is_empty() {
            gid = lookup_gid(&policy.group_put)?;
            forced = true;
        }

        if !forced && policy.do_not_preserve_owner {
            return Ok(());
        }
        chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))
            .map_err(|e| PermitError::io(path, io::Error::from(e)))
    }

    /// Counters accumulated by this permit alone.
    pub fn counters(&self) -> CounterSnapshot {
        self.local
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    /// The shared device aggregate this permit accounts into.
    pub fn device_counters(&self) -> &Arc<DeviceCounters> {
        &self.device
    }

    /// The limits enforced by this permit.
    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }
}

/// Mode applied to an uploaded file: permission bits only, replaced by the
/// umask complement when one is set, with the set-uid bit carried over.
fn effective_mode(mode: u32, umask: Option<u32>) -> u32 {
    let base = match umask {
        Some(umask) => PERMISSION_BITS ^ (PERMISSION_BITS & umask),
        None => mode & PERMISSION_BITS,
    };
    if mode & S_ISUID != 0 {
        base | S_ISUID
    } else {
        base
    }
}

fn lookup_uid(name: &str) -> Result<u32, PermitError> {
    match User::from_name(name) {
        Ok(Some(user)) => Ok(user.uid.as_raw()),
        Ok(None) => Err(PermitError::UnknownUser(name.to_string())),
        Err(source) => Err(PermitError::Lookup {
            name: name.to_string(),
            source,
        }),
    }
}

fn lookup_gid(name: &str) -> Result<u32, PermitError> {
    match Group::from_name(name) {
        Ok(Some(group)) => Ok(group.gid.as_raw()),
        Ok(None) => Err(PermitError::UnknownGroup(name.to_string())),
        Err(source) => Err(PermitError::Lookup {
            name: name.to_string(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::{symlink, MetadataExt};
    use tempfile::TempDir;

    fn enabled(f: impl FnOnce(&mut FileTransferLimits)) -> LimitsConfig {
        let mut limits = LimitsConfig {
            enabled: true,
            ..Default::default()
        };
        f(&mut limits.file_transfer);
        limits
    }

    fn permit(limits: LimitsConfig) -> Permit {
        Permit::new(limits, Arc::new(DeviceCounters::new()))
    }

    /// Temp dir with symlinks resolved, so link checks see a clean path.
    fn real_tempdir() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let real = fs::canonicalize(dir.path()).unwrap();
        (dir, real)
    }

    fn violation(result: Result<(), PermitError>) -> Option<PolicyViolation> {
        result.err().and_then(|e| e.violation())
    }

    #[test]
    fn test_violation_messages() {
        assert_eq!(
            PolicyViolation::ChrootViolation.to_string(),
            "the target file path is outside chroot"
        );
        assert_eq!(
            PolicyViolation::OverwriteForbidden.to_string(),
            "forbidden to overwrite the file"
        );
        assert_eq!(
            PermitError::from(PolicyViolation::FileTooBig).to_string(),
            "the file size is over the limit"
        );
    }

    #[test]
    fn test_disabled_policy_allows_everything() {
        let mut limits = enabled(|ft| {
            ft.chroot = "/srv/data".to_string();
            ft.max_file_size = 1;
            ft.regular_files_only = true;
            ft.counters.max_bytes_tx_per_hour = 1;
        });
        limits.enabled = false;
        let p = permit(limits);

        let file = FileInfo::new("/etc/passwd").with_size(1 << 20).with_mode(0o4755);
        assert!(p.upload_file(&file).is_ok());
        assert!(p.download_file(&FileInfo::new("/nonexistent/dir")).is_ok());
        assert!(p.bytes_sent(100));
        assert!(p.below_max_allowed_file_size(1 << 30));
        assert!(p.preserve_modes(Path::new("/nonexistent"), 0o777).is_ok());
        assert!(p.preserve_owner_group(Path::new("/nonexistent"), 0, 0).is_ok());
        // Nothing is accounted while disabled.
        assert_eq!(p.counters().tx_bytes, 0);
    }

    #[test]
    fn test_upload_outside_chroot() {
        let p = permit(enabled(|ft| ft.chroot = "/srv/data".to_string()));
        let err = p.upload_file(&FileInfo::new("/etc/passwd")).unwrap_err();
        assert_eq!(err.violation(), Some(PolicyViolation::ChrootViolation));
        assert_eq!(err.to_string(), "the target file path is outside chroot");
    }

    #[test]
    fn test_upload_size_checked_first() {
        let p = permit(enabled(|ft| {
            ft.chroot = "/srv/data".to_string();
            ft.max_file_size = 10;
        }));
        let file = FileInfo::new("/etc/passwd").with_size(11);
        assert_eq!(violation(p.upload_file(&file)), Some(PolicyViolation::FileTooBig));
    }

    #[test]
    fn test_upload_overwrite_forbidden() {
        let (_guard, dir) = real_tempdir();
        let target = dir.join("existing");
        fs::write(&target, b"data").unwrap();

        let p = permit(enabled(|_| {}));
        assert_eq!(
            violation(p.upload_file(&FileInfo::new(&target))),
            Some(PolicyViolation::OverwriteForbidden)
        );
        assert!(p.upload_file(&FileInfo::new(dir.join("new"))).is_ok());
    }

    #[test]
    fn test_upload_overwrite_owner_mismatch() {
        let (_guard, dir) = real_tempdir();
        let target = dir.join("existing");
        fs::write(&target, b"data").unwrap();

        let p = permit(enabled(|ft| {
            ft.allow_overwrite = true;
            ft.owner_put = "no-such-user-connectd".to_string();
        }));
        assert_eq!(
            violation(p.upload_file(&FileInfo::new(&target))),
            Some(PolicyViolation::OwnerMismatch)
        );

        let p = permit(enabled(|ft| {
            ft.allow_overwrite = true;
            ft.group_put = "no-such-group-connectd".to_string();
        }));
        assert_eq!(
            violation(p.upload_file(&FileInfo::new(&target))),
            Some(PolicyViolation::GroupMismatch)
        );
    }

    #[test]
    fn test_upload_through_symlinked_dir() {
        let (_guard, dir) = real_tempdir();
        fs::create_dir(dir.join("real")).unwrap();
        symlink(dir.join("real"), dir.join("link")).unwrap();
        let file = FileInfo::new(dir.join("link").join("upload.bin"));

        let p = permit(enabled(|_| {}));
        assert_eq!(
            violation(p.upload_file(&file)),
            Some(PolicyViolation::FollowLinksForbidden)
        );

        let p = permit(enabled(|ft| ft.follow_symlinks = true));
        assert!(p.upload_file(&file).is_ok());
    }

    #[test]
    fn test_upload_missing_parent_is_io_error() {
        let (_guard, dir) = real_tempdir();
        let p = permit(enabled(|_| {}));
        let err = p
            .upload_file(&FileInfo::new(dir.join("missing").join("f")))
            .unwrap_err();
        assert!(matches!(err, PermitError::Io { .. }));
    }

    #[test]
    fn test_upload_suid() {
        let (_guard, dir) = real_tempdir();
        let file = FileInfo::new(dir.join("tool")).with_mode(0o4755);

        let p = permit(enabled(|_| {}));
        assert_eq!(violation(p.upload_file(&file)), Some(PolicyViolation::SuidForbidden));

        let p = permit(enabled(|ft| ft.allow_suid = true));
        assert!(p.upload_file(&file).is_ok());
    }

    #[test]
    fn test_download_checks() {
        let (_guard, dir) = real_tempdir();
        let file = dir.join("payload");
        fs::write(&file, b"0123456789").unwrap();

        let p = permit(enabled(|ft| ft.max_file_size = 1));
        assert_eq!(
            violation(p.download_file(&FileInfo::new(&file))),
            Some(PolicyViolation::FileTooBig)
        );

        let p = permit(enabled(|ft| ft.regular_files_only = true));
        assert_eq!(
            violation(p.download_file(&FileInfo::new(&dir))),
            Some(PolicyViolation::NotRegularFile)
        );
        assert!(p.download_file(&FileInfo::new(&file)).is_ok());

        let p = permit(enabled(|ft| ft.owner_get = "no-such-user-connectd".to_string()));
        assert_eq!(
            violation(p.download_file(&FileInfo::new(&file))),
            Some(PolicyViolation::OwnerMismatch)
        );

        let p = permit(enabled(|ft| ft.group_get = "no-such-group-connectd".to_string()));
        assert_eq!(
            violation(p.download_file(&FileInfo::new(&file))),
            Some(PolicyViolation::GroupMismatch)
        );
    }

    #[test]
    fn test_download_symlink() {
        let (_guard, dir) = real_tempdir();
        let file = dir.join("payload");
        fs::write(&file, b"x").unwrap();
        symlink(&file, dir.join("alias")).unwrap();

        let p = permit(enabled(|_| {}));
        assert_eq!(
            violation(p.download_file(&FileInfo::new(dir.join("alias")))),
            Some(PolicyViolation::FollowLinksForbidden)
        );
        assert!(p.download_file(&FileInfo::new(&file)).is_ok());

        // Ownership is checked before links.
        let p = permit(enabled(|ft| ft.owner_get = "no-such-user-connectd".to_string()));
        assert_eq!(
            violation(p.download_file(&FileInfo::new(dir.join("alias")))),
            Some(PolicyViolation::OwnerMismatch)
        );
        let p = permit(enabled(|ft| ft.group_get = "no-such-group-connectd".to_string()));
        assert_eq!(
            violation(p.download_file(&FileInfo::new(dir.join("alias")))),
            Some(PolicyViolation::GroupMismatch)
        );
    }

    #[test]
    fn test_bytes_accounting_and_caps() {
        let device = Arc::new(DeviceCounters::new());
        let limits = enabled(|ft| {
            ft.counters.max_bytes_tx_per_hour = 100;
            ft.counters.max_bytes_rx_per_hour = 0;
        });
        let first = Permit::new(limits.clone(), Arc::clone(&device));
        let second = Permit::new(limits, Arc::clone(&device));

        assert!(first.bytes_sent(40));
        assert!(second.bytes_sent(59));
        assert!(!first.bytes_sent(1));
        assert!(!second.bytes_sent(0));
        assert!(first.bytes_received(u64::MAX / 2));

        assert_eq!(device.snapshot().tx_bytes, 100);
        assert_eq!(first.counters().tx_bytes, 41);
        assert_eq!(second.counters().tx_bytes, 59);
    }

    #[test]
    fn test_bytes_sent_saturation() {
        let p = permit(enabled(|_| {}));
        assert!(p.bytes_sent(u64::MAX - 10));
        assert!(p.bytes_sent(20));
        assert_eq!(p.counters().tx_bytes, u64::MAX - 10);
        assert!(p.bytes_sent(10));
        assert_eq!(p.counters().tx_bytes, u64::MAX);
    }

    #[test]
    fn test_below_max_allowed_file_size() {
        let p = permit(enabled(|ft| ft.max_file_size = 100));
        assert!(p.below_max_allowed_file_size(-1));
        assert!(p.below_max_allowed_file_size(i64::MIN));
        assert!(p.below_max_allowed_file_size(99));
        assert!(!p.below_max_allowed_file_size(100));
        assert!(!p.below_max_allowed_file_size(i64::MAX));

        let unlimited = permit(enabled(|_| {}));
        assert!(unlimited.below_max_allowed_file_size(i64::MAX));
    }

    #[test]
    fn test_effective_mode() {
        assert_eq!(effective_mode(0o755, None), 0o755);
        assert_eq!(effective_mode(0o100644, None), 0o644);
        assert_eq!(effective_mode(0o4755, None), 0o4755);
        assert_eq!(effective_mode(0o644, Some(0o202)), 0o575);
        assert_eq!(effective_mode(0o4700, Some(0o022)), 0o4755);
    }

    #[test]
    fn test_preserve_modes() {
        let (_guard, dir) = real_tempdir();
        let file = dir.join("f");
        fs::write(&file, b"x").unwrap();

        let p = permit(enabled(|ft| ft.umask = "0202".to_string()));
        p.preserve_modes(&file, 0o644).unwrap();
        assert_eq!(fs::metadata(&file).unwrap().mode() & 0o7777, 0o575);

        let p = permit(enabled(|_| {}));
        p.preserve_modes(&file, 0o600).unwrap();
        assert_eq!(fs::metadata(&file).unwrap().mode() & 0o7777, 0o600);

        let p = permit(enabled(|ft| ft.do_not_preserve_mode = true));
        p.preserve_modes(&file, 0o777).unwrap();
        assert_eq!(fs::metadata(&file).unwrap().mode() & 0o7777, 0o600);
    }

    #[test]
    fn test_preserve_modes_invalid_umask() {
        let p = permit(enabled(|ft| ft.umask = "9x".to_string()));
        let err = p.preserve_modes(Path::new("/nonexistent"), 0o644).unwrap_err();
        assert!(matches!(err, PermitError::InvalidUmask(ref u) if u == "9x"));
    }

    #[test]
    fn test_preserve_owner_group() {
        let (_guard, dir) = real_tempdir();
        let file = dir.join("f");
        fs::write(&file, b"x").unwrap();
        let meta = fs::metadata(&file).unwrap();

        // Re-applying the current owner always succeeds.
        let p = permit(enabled(|_| {}));
        p.preserve_owner_group(&file, meta.uid(), meta.gid()).unwrap();

        let p = permit(enabled(|ft| ft.do_not_preserve_owner = true));
        p.preserve_owner_group(&file, 0, 0).unwrap();

        let p = permit(enabled(|ft| ft.owner_put = "no-such-user-connectd".to_string()));
        let err = p.preserve_owner_group(&file, meta.uid(), meta.gid()).unwrap_err();
        assert!(matches!(err, PermitError::UnknownUser(_)));

        let p = permit(enabled(|ft| ft.group_put = "no-such-group-connectd".to_string()));
        let err = p.preserve_owner_group(&file, meta.uid(), meta.gid()).unwrap_err();
        assert!(matches!(err, PermitError::UnknownGroup(_)));
    }

    fn current_user_and_group() -> (String, String) {
        let user = User::from_uid(nix::unistd::getuid()).unwrap().unwrap();
        let group = Group::from_gid(nix::unistd::getgid()).unwrap().unwrap();
        (user.name, group.name)
    }

    #[test]
    fn test_preserve_owner_group_forced_names_override_ids() {
        let (_guard, dir) = real_tempdir();
        let file = dir.join("f");
        fs::write(&file, b"x").unwrap();
        let meta = fs::metadata(&file).unwrap();
        let (user, group) = current_user_and_group();

        // The sender's ids are discarded: chown to them would fail, or move
        // the file to another owner when running as root.
        let p = permit(enabled(|ft| {
            ft.owner_put = user.clone();
            ft.group_put = group.clone();
        }));
        p.preserve_owner_group(&file, meta.uid() + 4242, meta.gid() + 4242)
            .unwrap();

        let after = fs::metadata(&file).unwrap();
        assert_eq!(after.uid(), nix::unistd::getuid().as_raw());
        assert_eq!(after.gid(), nix::unistd::getgid().as_raw());
    }

    #[test]
    fn test_preserve_owner_group_forced_owner_ignores_do_not_preserve() {
        let (_guard, dir) = real_tempdir();
        let file = dir.join("f");
        fs::write(&file, b"x").unwrap();
        let meta = fs::metadata(&file).unwrap();
        let (user, _) = current_user_and_group();

        if nix::unistd::getuid().is_root() {
            // Hand the file to someone else so the forced chown is visible.
            chown(
                &file,
                Some(Uid::from_raw(meta.uid() + 4242)),
                Some(Gid::from_raw(meta.gid())),
            )
            .unwrap();
        }

        let p = permit(enabled(|ft| {
            ft.do_not_preserve_owner = true;
            ft.owner_put = user.clone();
        }));
        p.preserve_owner_group(&file, meta.uid() + 4242, meta.gid())
            .unwrap();
        assert_eq!(fs::metadata(&file).unwrap().uid(), meta.uid());

        // Without a forced name nothing is touched.
        let p = permit(enabled(|ft| ft.do_not_preserve_owner = true));
        p.preserve_owner_group(&file, meta.uid() + 4242, meta.gid() + 4242)
            .unwrap();
        assert_eq!(fs::metadata(&file).unwrap().uid(), meta.uid());
    }
}
