//! Leases on sandbox instances
//!
//! A lease is what an execution holds while it runs inside an instance.
//! Dropping a pooled lease returns its instance to the idle queue; ephemeral
//! leases should be handed back through `SandboxPool::release` so the
//! instance is stopped before the execution returns.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::pool::handle::SandboxHandle;
use crate::runtime::SandboxRuntime;

/// Idle instances of one language under the pooled strategy
#[derive(Debug)]
pub(crate) struct IdleInstances {
    /// One permit per idle instance
    pub(crate) permits: Arc<Semaphore>,
    queue: Mutex<VecDeque<String>>,
}

impl IdleInstances {
    pub(crate) fn new(instance_ids: Vec<String>) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(instance_ids.len())),
            queue: Mutex::new(instance_ids.into()),
        }
    }

    /// Take an idle instance. The caller must hold a permit.
    pub(crate) fn take(&self) -> Option<String> {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
    }

    fn put_back(&self, instance_id: String) {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(instance_id);
    }

    /// Stop handing out permits (pool shutdown)
    pub(crate) fn close(&self) {
        self.permits.close();
    }

    pub(crate) fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// Ephemeral instances that are leased and not yet stopped
///
/// Whoever claims an instance out of the set is the one that stops it, so a
/// lease released after a pool shutdown does not stop it twice.
#[derive(Debug, Default)]
pub(crate) struct LiveInstances {
    /// Instance id to language
    ids: Mutex<HashMap<String, String>>,
}

impl LiveInstances {
    pub(crate) fn insert(&self, language: &str, instance_id: &str) {
        self.lock()
            .insert(instance_id.to_owned(), language.to_owned());
    }

    /// Take responsibility for stopping an instance
    pub(crate) fn claim(&self, instance_id: &str) -> bool {
        self.lock().remove(instance_id).is_some()
    }

    /// Claim every live instance at once
    pub(crate) fn drain(&self) -> Vec<SandboxHandle> {
        self.lock()
            .drain()
            .map(|(instance_id, language)| SandboxHandle::running(language, instance_id))
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.ids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug)]
pub(crate) enum LeaseKind {
    /// Shared instance; concurrent leases may point at the same instance
    Shared,
    /// Exclusive use of one pooled instance
    Pooled {
        idle: Arc<IdleInstances>,
        _permit: OwnedSemaphorePermit,
    },
    /// Instance created for this lease alone
    Ephemeral {
        runtime: Arc<dyn SandboxRuntime>,
        live: Arc<LiveInstances>,
    },
}

/// The right to run one execution inside a sandbox instance
#[derive(Debug)]
pub struct SandboxLease {
    language: String,
    instance_id: String,
    pub(crate) kind: LeaseKind,
}

impl SandboxLease {
    pub(crate) fn new(language: &str, instance_id: String, kind: LeaseKind) -> Self {
        Self {
            language: language.to_owned(),
            instance_id,
            kind,
        }
    }

    /// Language the leased instance serves
    pub fn language(&self) -> &str {
        &self.language
    }

    /// Runtime identifier of the leased instance
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Whether the instance was created for this lease alone
    pub fn is_ephemeral(&self) -> bool {
        matches!(self.kind, LeaseKind::Ephemeral { .. })
    }
}

impl Drop for SandboxLease {
    fn drop(&mut self) {
        match &mut self.kind {
            LeaseKind::Shared => {}
            LeaseKind::Pooled { idle, .. } => {
                // Queue the instance before the permit is released with the fields
                idle.put_back(std::mem::take(&mut self.instance_id));
            }
            LeaseKind::Ephemeral { runtime, live } => {
                if !live.claim(&self.instance_id) {
                    return;
                }
                warn!(
                    language = %self.language,
                    instance_id = %self.instance_id,
                    "ephemeral lease dropped without release, stopping instance in background"
                );
                let runtime = Arc::clone(runtime);
                let instance_id = self.instance_id.clone();
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        handle.spawn(async move {
                            if let Err(e) = runtime.stop_instance(&instance_id).await {
                                warn!(%instance_id, error = %e, "background stop failed");
                            } else {
                                debug!(%instance_id, "background stop succeeded");
                            }
                        });
                    }
                    Err(_) => {
                        warn!(%instance_id, "no async runtime available, instance left running");
                    }
                }
            }
        }
    }
}
