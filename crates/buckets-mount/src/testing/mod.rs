//! Testing utilities for reconciliation tests.
//!
//! Real FUSE mounts need privileges and network access, so tests run
//! against synthetic mount and process tables and a fake backend that
//! edits them the way rclone would. Everything else (directories, aliases,
//! spawned helper processes, log files) is real and lives in a temp dir.
//!
//! - **Fakes**: [`FakeMountTable`], [`FakeProcessTable`], [`FakeBackend`]
//! - **Node harness**: [`TestNode`], a temp base dir with a fixed identity
//! - **Assertions**: alias and mount-table checks with helpful messages
//!
//! # Usage
//!
//! ```ignore
//! use buckets_mount::testing::{TestNode, assert_alias_resolves_to};
//!
//! let node = TestNode::new();
//! let outcome = node.reconciler().mount(&bucket, &node.alias_root("data"))?;
//! assert_alias_resolves_to(&outcome.alias, &outcome.mount_point);
//! ```

pub mod assertions;
pub mod fakes;
pub mod node;

pub use assertions::{assert_alias_resolves_to, assert_mount_count, assert_no_alias};
pub use fakes::{FakeBackend, FakeMountTable, FakeProcessTable, StartBehavior, FAKE_REMOTE};
pub use node::{TestNode, TEST_HOST, TEST_UID, TEST_USER};
