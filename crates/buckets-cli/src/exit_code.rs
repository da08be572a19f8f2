//! Process exit codes.
//!
//! Code 2 is left to clap for usage errors.

pub const SUCCESS: u8 = 0;
pub const GENERAL_ERROR: u8 = 1;
/// Alias path is a mount point or a real file/directory.
pub const ALIAS_CONFLICT: u8 = 3;
/// rclone/FUSE missing, or the bucket cannot be reached.
pub const BACKEND_UNAVAILABLE: u8 = 4;
/// The backend failed to start, timed out, or could not be unmounted.
pub const MOUNT_FAILED: u8 = 5;
pub const INVALID_BUCKET: u8 = 6;
pub const PERMISSION_DENIED: u8 = 7;
