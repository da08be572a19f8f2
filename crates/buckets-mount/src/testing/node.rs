//! A throwaway node: temp base directory, fixed identity, fake collaborators.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use super::fakes::{FakeBackend, FakeMountTable, FakeProcessTable};
use crate::config::EngineConfig;
use crate::host::Host;
use crate::identity::NodeIdentity;
use crate::layout::MountLayout;
use crate::probe::MountProbe;
use crate::reconcile::Reconciler;
use crate::sweep::ZombieSweep;

pub const TEST_USER: &str = "alice";
pub const TEST_UID: u32 = 1000;
pub const TEST_HOST: &str = "node01";

/// Temp-dir backed node with fake mount and process tables.
///
/// Clones made with [`TestNode::in_scope`] share the temp dir and fakes,
/// which is how concurrent jobs on one node are simulated.
#[derive(Debug, Clone)]
pub struct TestNode {
    temp: Arc<TempDir>,
    pub layout: MountLayout,
    pub table: Arc<FakeMountTable>,
    pub processes: Arc<FakeProcessTable>,
    pub backend: Arc<FakeBackend>,
    pub config: EngineConfig,
}

impl TestNode {
    /// Node in the shared scope.
    pub fn new() -> Self {
        let temp = Arc::new(TempDir::new().expect("failed to create temp dir"));
        let table = Arc::new(FakeMountTable::new());
        let processes = Arc::new(FakeProcessTable::new());
        let backend = Arc::new(FakeBackend::new(Arc::clone(&table), Arc::clone(&processes)));
        let config = EngineConfig::default()
            .readiness_timeout(Duration::from_secs(2))
            .poll_interval(Duration::from_millis(10))
            .terminate_grace(Duration::from_millis(200));

        let layout = layout_for(temp.path(), None);
        Self {
            temp,
            layout,
            table,
            processes,
            backend,
            config,
        }
    }

    /// Node running inside job `job_id`.
    pub fn with_job(job_id: &str) -> Self {
        Self::new().in_scope(Some(job_id))
    }

    /// Same node and fakes, seen from another scope.
    #[must_use]
    pub fn in_scope(&self, job_id: Option<&str>) -> Self {
        Self {
            layout: layout_for(self.temp.path(), job_id),
            ..self.clone()
        }
    }

    /// Root of the temp dir.
    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    /// A fresh alias root directory `work/<name>` inside the temp dir.
    pub fn alias_root(&self, name: &str) -> PathBuf {
        let root = self.temp.path().join("work").join(name);
        std::fs::create_dir_all(&root).expect("failed to create alias root");
        root
    }

    pub fn host(&self) -> Host {
        Host::new(
            self.table.clone(),
            self.processes.clone(),
            self.backend.clone(),
        )
    }

    pub fn probe(&self) -> MountProbe {
        self.host().probe()
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.layout.clone(), self.host(), self.config.clone())
    }

    pub fn sweep(&self) -> ZombieSweep {
        ZombieSweep::new(self.layout.clone(), self.host(), self.config.clone())
    }
}

impl Default for TestNode {
    fn default() -> Self {
        Self::new()
    }
}

fn layout_for(temp: &Path, job_id: Option<&str>) -> MountLayout {
    MountLayout::new(
        temp.join("base"),
        NodeIdentity {
            user: TEST_USER.to_string(),
            uid: TEST_UID,
            host: TEST_HOST.to_string(),
            job_id: job_id.map(String::from),
        },
    )
}
