//! The node-level collaborators every operation observes.

use std::sync::Arc;

use crate::backend::{BackendController, MountBackend};
use crate::config::EngineConfig;
use crate::mount_markers::{KernelMountTable, MountTable};
use crate::probe::MountProbe;
use crate::process_detection::{ProcessTable, SystemProcessTable};

/// Mount table, process table and backend of one node.
#[derive(Clone)]
pub struct Host {
    mounts: Arc<dyn MountTable>,
    processes: Arc<dyn ProcessTable>,
    backend: Arc<dyn MountBackend>,
}

impl Host {
    /// Host over explicit collaborators.
    pub fn new(
        mounts: Arc<dyn MountTable>,
        processes: Arc<dyn ProcessTable>,
        backend: Arc<dyn MountBackend>,
    ) -> Self {
        Self {
            mounts,
            processes,
            backend,
        }
    }

    /// The running system with the given backend.
    pub fn system(backend: Arc<dyn MountBackend>) -> Self {
        Self::new(
            Arc::new(KernelMountTable::new()),
            Arc::new(SystemProcessTable::new()),
            backend,
        )
    }

    pub fn mounts(&self) -> &Arc<dyn MountTable> {
        &self.mounts
    }

    pub fn processes(&self) -> &Arc<dyn ProcessTable> {
        &self.processes
    }

    pub fn backend(&self) -> &Arc<dyn MountBackend> {
        &self.backend
    }

    /// Mount probe over this host's mount table.
    pub fn probe(&self) -> MountProbe {
        MountProbe::new(Arc::clone(&self.mounts))
    }

    /// Backend controller for this host.
    pub fn controller(&self, config: EngineConfig) -> BackendController {
        BackendController::new(
            Arc::clone(&self.backend),
            self.probe(),
            Arc::clone(&self.processes),
            config,
        )
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("backend", &self.backend.name())
            .finish_non_exhaustive()
    }
}
