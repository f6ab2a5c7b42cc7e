//! Sandbox pool
//!
//! Owns the lifecycle of the sandbox instances behind every registered
//! language: provisioning at startup, handing out leases to executions, and
//! best-effort teardown at shutdown. How many instances exist per language
//! and how they are shared is decided by the configured [`InstanceStrategy`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

pub use crate::pool::handle::{SandboxHandle, SandboxState};
pub use crate::pool::lease::SandboxLease;
use crate::config::{Config, InstanceStrategy, Language};
use crate::pool::lease::{IdleInstances, LeaseKind, LiveInstances};
use crate::registry::LanguageRegistry;
use crate::runtime::{InstanceSpec, RuntimeError, SandboxRuntime};
use crate::types::{BindMount, ResourceLimits};

mod handle;
mod lease;

/// Errors that occur while provisioning or leasing sandboxes
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("sandbox for language '{0}' is not available")]
    Unavailable(String),

    #[error("failed to prepare staging directory {path}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("sandbox runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

/// Per-language pool state
#[derive(Debug)]
struct LanguageSlot {
    state: SandboxState,
    handles: Vec<SandboxHandle>,
    /// Idle queue, pooled strategy only
    idle: Option<Arc<IdleInstances>>,
}

impl LanguageSlot {
    fn with_state(state: SandboxState) -> Self {
        Self {
            state,
            handles: Vec::new(),
            idle: None,
        }
    }
}

/// Summary of one language's sandbox for health reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanguageStatus {
    pub language: String,
    pub state: SandboxState,
    pub instances: usize,
    /// Instances not currently leased (pooled strategy only)
    pub idle: Option<usize>,
}

/// Pool of sandbox instances, keyed by language
#[derive(Debug)]
pub struct SandboxPool {
    /// Management API of the sandbox runtime
    runtime: Arc<dyn SandboxRuntime>,

    /// Languages to provision
    registry: Arc<LanguageRegistry>,

    strategy: InstanceStrategy,

    /// Default resource limits (languages may override)
    limits: ResourceLimits,

    /// Host staging directory, created on initialize
    staging_dir: PathBuf,

    /// Bind mount of the staging directory into every instance
    mount: BindMount,

    slots: RwLock<HashMap<String, LanguageSlot>>,

    /// Leased ephemeral instances, stopped at shutdown if still live
    ephemeral: Arc<LiveInstances>,
}

impl SandboxPool {
    /// Create a pool. No instances exist until [`initialize`](Self::initialize).
    pub fn new(
        runtime: Arc<dyn SandboxRuntime>,
        registry: Arc<LanguageRegistry>,
        config: &Config,
    ) -> Self {
        Self {
            runtime,
            registry,
            strategy: config.strategy,
            limits: config.limits.clone(),
            staging_dir: config.staging_dir.clone(),
            mount: config.staging_mount(),
            slots: RwLock::new(HashMap::new()),
            ephemeral: Arc::new(LiveInstances::default()),
        }
    }

    /// Get the sandbox runtime
    pub fn runtime(&self) -> &Arc<dyn SandboxRuntime> {
        &self.runtime
    }

    /// Get the language registry
    pub fn registry(&self) -> &Arc<LanguageRegistry> {
        &self.registry
    }

    pub fn strategy(&self) -> InstanceStrategy {
        self.strategy
    }

    /// Host directory that executions stage their files in
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Where the staging directory appears inside every instance
    pub fn sandbox_dir(&self) -> &str {
        &self.mount.target
    }

    fn read_slots(&self) -> RwLockReadGuard<'_, HashMap<String, LanguageSlot>> {
        self.slots
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_slots(&self) -> RwLockWriteGuard<'_, HashMap<String, LanguageSlot>> {
        self.slots
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Provision sandboxes for every registered language
    ///
    /// Languages are provisioned concurrently. A language that fails is
    /// logged and marked [`SandboxState::Failed`]; the others are unaffected.
    /// Only a failure to create the staging directory aborts initialization.
    #[instrument(skip(self), fields(strategy = ?self.strategy))]
    pub async fn initialize(&self) -> Result<(), PoolError> {
        let already_initialized = self
            .read_slots()
            .values()
            .any(|slot| !slot.handles.is_empty());
        if already_initialized {
            warn!("pool already initialized, tearing down existing sandboxes first");
            self.shutdown().await;
        }

        tokio::fs::create_dir_all(&self.staging_dir)
            .await
            .map_err(|source| PoolError::Staging {
                path: self.staging_dir.clone(),
                source,
            })?;

        {
            let mut slots = self.write_slots();
            for id in self.registry.ids() {
                slots.insert(
                    id.to_owned(),
                    LanguageSlot::with_state(SandboxState::Initializing),
                );
            }
        }

        info!(languages = self.registry.len(), "initializing sandbox pool");

        let provisions = self.registry.iter().map(|(id, language)| async move {
            (id, self.provision_language(id, language).await)
        });
        let results = join_all(provisions).await;

        let mut slots = self.write_slots();
        for (id, result) in results {
            let slot = match result {
                Ok(slot) => {
                    info!(
                        language = id,
                        instances = slot.handles.len(),
                        "sandbox ready"
                    );
                    slot
                }
                Err(e) => {
                    error!(language = id, error = %e, "failed to provision sandbox");
                    LanguageSlot::with_state(SandboxState::Failed)
                }
            };
            slots.insert(id.to_owned(), slot);
        }

        Ok(())
    }

    /// Ensure the image and start the long-lived instances for one language
    async fn provision_language(
        &self,
        id: &str,
        language: &Language,
    ) -> Result<LanguageSlot, RuntimeError> {
        info!(language = id, image = %language.image, "ensuring image");
        self.runtime.ensure_image(&language.image).await?;

        let count = self.strategy.instances_per_language();
        let mut handles = Vec::with_capacity(count);
        for _ in 0..count {
            match self.provision_instance(id, language).await {
                Ok(instance_id) => handles.push(SandboxHandle::running(id, instance_id)),
                Err(e) => {
                    // Don't leave half a language behind
                    for handle in &handles {
                        if let Err(stop_err) = self.runtime.stop_instance(&handle.instance_id).await
                        {
                            warn!(instance_id = %handle.instance_id, error = %stop_err, "rollback stop failed");
                        }
                    }
                    return Err(e);
                }
            }
        }

        let idle = match self.strategy {
            InstanceStrategy::Pooled { .. } => Some(Arc::new(IdleInstances::new(
                handles.iter().map(|h| h.instance_id.clone()).collect(),
            ))),
            InstanceStrategy::Shared | InstanceStrategy::Ephemeral => None,
        };

        Ok(LanguageSlot {
            state: SandboxState::Running,
            handles,
            idle,
        })
    }

    /// Create and start one instance for a language
    async fn provision_instance(&self, id: &str, language: &Language) -> Result<String, RuntimeError> {
        let suffix = Uuid::new_v4().simple().to_string();
        let spec = InstanceSpec {
            name: format!("codepool-{id}-{}", &suffix[..12]),
            language: id.to_owned(),
            image: language.image.clone(),
            env: language.env.clone(),
            limits: language.effective_limits(&self.limits),
            mounts: vec![self.mount.clone()],
        };

        let instance_id = self.runtime.create_instance(&spec).await?;
        if let Err(e) = self.runtime.start_instance(&instance_id).await {
            // A container that never started is not auto-removed
            if let Err(remove_err) = self.runtime.remove_instance(&instance_id).await {
                warn!(%instance_id, error = %remove_err, "failed to remove unstarted instance");
            }
            return Err(e);
        }

        debug!(language = id, %instance_id, name = %spec.name, "instance started");
        Ok(instance_id)
    }

    /// Look up the running sandbox handle for a language
    ///
    /// Returns `None` if the language was never provisioned, failed, or the
    /// pool has shut down. Under the ephemeral strategy there is no
    /// long-lived instance and this always returns `None`; use
    /// [`is_available`](Self::is_available) instead.
    pub fn handle_for(&self, language: &str) -> Option<SandboxHandle> {
        let slots = self.read_slots();
        let slot = slots.get(language)?;
        if slot.state != SandboxState::Running {
            return None;
        }
        slot.handles.first().cloned()
    }

    /// Lifecycle state of a language's sandbox, if the pool knows the language
    pub fn state_of(&self, language: &str) -> Option<SandboxState> {
        self.read_slots().get(language).map(|slot| slot.state)
    }

    /// Check whether executions for a language can be served
    pub fn is_available(&self, language: &str) -> bool {
        self.state_of(language) == Some(SandboxState::Running)
    }

    /// Snapshot of all live handles, sorted by language
    pub fn handles(&self) -> Vec<SandboxHandle> {
        let slots = self.read_slots();
        let mut handles: Vec<SandboxHandle> = slots
            .values()
            .flat_map(|slot| slot.handles.iter().cloned())
            .collect();
        handles.sort_by(|a, b| a.language.cmp(&b.language));
        handles
    }

    /// Per-language status, sorted by language
    pub fn status(&self) -> Vec<LanguageStatus> {
        let slots = self.read_slots();
        let mut status: Vec<LanguageStatus> = slots
            .iter()
            .map(|(language, slot)| LanguageStatus {
                language: language.clone(),
                state: slot.state,
                instances: slot.handles.len(),
                idle: slot.idle.as_ref().map(|idle| idle.available()),
            })
            .collect();
        status.sort_by(|a, b| a.language.cmp(&b.language));
        status
    }

    /// Lease an instance for one execution
    ///
    /// Under the pooled strategy this waits until an instance is idle. Under
    /// the ephemeral strategy a fresh instance is created and must be handed
    /// back through [`release`](Self::release).
    #[instrument(skip(self))]
    pub async fn acquire(&self, language: &str) -> Result<SandboxLease, PoolError> {
        let unavailable = || PoolError::Unavailable(language.to_owned());

        let (shared_instance, idle) = {
            let slots = self.read_slots();
            let slot = slots.get(language).ok_or_else(unavailable)?;
            if slot.state != SandboxState::Running {
                return Err(unavailable());
            }
            (
                slot.handles.first().map(|h| h.instance_id.clone()),
                slot.idle.clone(),
            )
        };

        match self.strategy {
            InstanceStrategy::Shared => {
                let instance_id = shared_instance.ok_or_else(unavailable)?;
                Ok(SandboxLease::new(language, instance_id, LeaseKind::Shared))
            }
            InstanceStrategy::Pooled { .. } => {
                let idle = idle.ok_or_else(unavailable)?;
                let permit = idle
                    .permits
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| unavailable())?;
                let instance_id = idle.take().ok_or_else(unavailable)?;
                debug!(%instance_id, "leased pooled instance");
                Ok(SandboxLease::new(
                    language,
                    instance_id,
                    LeaseKind::Pooled {
                        idle,
                        _permit: permit,
                    },
                ))
            }
            InstanceStrategy::Ephemeral => {
                let definition = self
                    .registry
                    .definition_for(language)
                    .ok_or_else(unavailable)?;
                let instance_id = self.provision_instance(language, definition).await?;
                self.ephemeral.insert(language, &instance_id);
                let lease = SandboxLease::new(
                    language,
                    instance_id,
                    LeaseKind::Ephemeral {
                        runtime: Arc::clone(&self.runtime),
                        live: Arc::clone(&self.ephemeral),
                    },
                );
                // Shutdown may have drained the live set while we were provisioning
                if !self.is_available(language) {
                    self.release(lease).await;
                    return Err(unavailable());
                }
                Ok(lease)
            }
        }
    }

    /// Hand a lease back after its execution finished
    ///
    /// Ephemeral instances are stopped here; stop failures are logged.
    pub async fn release(&self, lease: SandboxLease) {
        let instance_id = lease.instance_id();
        if let LeaseKind::Ephemeral { runtime, live } = &lease.kind {
            if !live.claim(instance_id) {
                debug!(%instance_id, "ephemeral instance already stopped");
                return;
            }
            if let Err(e) = runtime.stop_instance(instance_id).await {
                warn!(%instance_id, error = %e, "failed to stop ephemeral instance");
            }
        }
    }

    /// Stop every live instance
    ///
    /// This includes ephemeral instances whose executions are still in
    /// flight; releasing such a lease later does not stop it again.
    /// Best effort: failures (for example an instance that was already
    /// auto-removed) are logged and swallowed. Afterwards no handles remain
    /// and every language that was running reports [`SandboxState::Stopped`].
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        let mut handles = Vec::new();
        {
            let mut slots = self.write_slots();
            for slot in slots.values_mut() {
                if let Some(idle) = slot.idle.take() {
                    idle.close();
                }
                if slot.state == SandboxState::Running {
                    slot.state = SandboxState::Stopped;
                }
                handles.append(&mut slot.handles);
            }
        }
        handles.extend(self.ephemeral.drain());
        info!(instances = handles.len(), "stopping all sandboxes");

        let stops = handles.into_iter().map(|handle| {
            let runtime = Arc::clone(&self.runtime);
            async move {
                debug!(language = %handle.language, instance_id = %handle.instance_id, "stopping instance");
                if let Err(e) = runtime.stop_instance(&handle.instance_id).await {
                    warn!(
                        language = %handle.language,
                        instance_id = %handle.instance_id,
                        error = %e,
                        "could not stop instance, it may have been auto-removed"
                    );
                }
            }
        });
        join_all(stops).await;
    }
}
