//! GPU offload decisions.
//!
//! [`OffloadDispatcher::decide`] maps an operator kind and its operand type
//! classes to a [`Placement`]. The answer depends only on the kernel table,
//! the configured allow/deny policy and the device health flag, and is
//! computed once per plan node by the planner, never per batch.
//!
//! A device fault marks the dispatcher unhealthy. Work already in flight
//! still fails; plans built afterwards route every operator to the host.

use columnar_model::{EngineError, Result, TypeClass};
use gpu_kernels::{KernelRegistry, OpKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::{EngineConfig, HostFallbackPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Placement {
    Gpu,
    HostFallback,
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placement::Gpu => f.write_str("gpu"),
            Placement::HostFallback => f.write_str("host"),
        }
    }
}

pub struct OffloadDispatcher {
    registry: Arc<KernelRegistry>,
    fallback: HostFallbackPolicy,
    deny: BTreeSet<OpKind>,
    healthy: AtomicBool,
    faults: AtomicU64,
}

impl OffloadDispatcher {
    pub fn new(
        registry: Arc<KernelRegistry>,
        fallback: HostFallbackPolicy,
        deny: BTreeSet<OpKind>,
    ) -> Self {
        Self {
            registry,
            fallback,
            deny,
            healthy: AtomicBool::new(true),
            faults: AtomicU64::new(0),
        }
    }

    pub fn from_config(registry: Arc<KernelRegistry>, config: &EngineConfig) -> Self {
        Self::new(
            registry,
            config.host_fallback_policy.clone(),
            config.gpu_deny_list.clone(),
        )
    }

    pub fn registry(&self) -> &Arc<KernelRegistry> {
        &self.registry
    }

    pub fn decide(&self, op: OpKind, inputs: &[TypeClass]) -> Result<Placement> {
        let entry = self.registry.lookup(op, inputs).ok_or_else(|| {
            EngineError::UnsupportedOperation(format!("no kernel for {} over {:?}", op, inputs))
        })?;

        let on_device = entry.device && !self.deny.contains(&op) && self.is_healthy();
        let placement = if on_device {
            Placement::Gpu
        } else if self.fallback.allows(op) {
            Placement::HostFallback
        } else {
            return Err(EngineError::UnsupportedOperation(format!(
                "{} over {:?} cannot run on the device and host fallback is not allowed",
                op, inputs
            )));
        };
        debug!("Placing {} over {:?} on {}", op, inputs, placement);
        Ok(placement)
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Route future plans to the host after an accelerator failure.
    pub fn record_fault(&self, error: &EngineError) {
        self.faults.fetch_add(1, Ordering::Relaxed);
        if self.healthy.swap(false, Ordering::AcqRel) {
            warn!("Device fault ({}); routing future plans to host fallback", error);
        }
    }

    pub fn fault_count(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }

    /// Re-enable offload, e.g. after the device was reset.
    pub fn reset_health(&self) {
        self.healthy.store(true, Ordering::Release);
    }
}

impl fmt::Debug for OffloadDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OffloadDispatcher")
            .field("fallback", &self.fallback)
            .field("deny", &self.deny)
            .field("healthy", &self.is_healthy())
            .finish()
    }
}
