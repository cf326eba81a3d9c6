// Per-tenant instance state machine (spec 4.C.1): Absent -> Loading ->
// Resident -> Draining -> Absent, with a Resident* side state once WAL
// shipping has been stopped for an about-to-archive tenant. Load/unload
// are serialized per tenant so two concurrent requests for the same
// absent tenant trigger exactly one load.

use crate::common::TenantId;
use crate::host::TenantHost;
use parking_lot::Mutex as SyncMutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InstanceState {
    Absent = 0,
    Loading = 1,
    Resident = 2,
    ResidentShippingStopped = 3,
    Draining = 4,
}

impl From<u8> for InstanceState {
    fn from(v: u8) -> Self {
        match v {
            1 => InstanceState::Loading,
            2 => InstanceState::Resident,
            3 => InstanceState::ResidentShippingStopped,
            4 => InstanceState::Draining,
            _ => InstanceState::Absent,
        }
    }
}

/// A resident tenant's live host plus its state machine tracker. Cloned
/// freely (cheap `Arc` clones) by the cache; the `AsyncMutex` serializes
/// load/unload so callers racing to materialize the same absent tenant
/// join a single in-flight load instead of double-loading it.
pub struct TenantInstance {
    pub tenant_id: TenantId,
    state: AtomicU8,
    host: AsyncMutex<Option<Arc<dyn TenantHost>>>,
    load_lock: AsyncMutex<()>,
    last_access: SyncMutex<u64>,
}

impl TenantInstance {
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            state: AtomicU8::new(InstanceState::Absent as u8),
            host: AsyncMutex::new(None),
            load_lock: AsyncMutex::new(()),
            last_access: SyncMutex::new(crate::common::now_unix()),
        }
    }

    pub fn state(&self) -> InstanceState {
        InstanceState::from(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, s: InstanceState) {
        self.state.store(s as u8, Ordering::SeqCst);
    }

    pub fn touch(&self) {
        *self.last_access.lock() = crate::common::now_unix();
    }

    pub fn last_access(&self) -> u64 {
        *self.last_access.lock()
    }

    /// Transition Absent -> Loading -> Resident, running `open` exactly
    /// once even if multiple callers invoke this concurrently for the
    /// same instance. `open` is the caller-supplied bootstrap step
    /// (restore-from-blob-if-needed, then `TenantHost::bootstrap`).
    pub async fn ensure_loaded<F, Fut>(&self, open: F) -> std::io::Result<Arc<dyn TenantHost>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = std::io::Result<Arc<dyn TenantHost>>>,
    {
        let _guard = self.load_lock.lock().await;

        if let Some(host) = self.host.lock().await.clone() {
            self.touch();
            return Ok(host);
        }

        self.set_state(InstanceState::Loading);
        match open().await {
            Ok(host) => {
                *self.host.lock().await = Some(host.clone());
                self.set_state(InstanceState::Resident);
                self.touch();
                Ok(host)
            }
            Err(e) => {
                self.set_state(InstanceState::Absent);
                Err(e)
            }
        }
    }

    pub fn mark_shipping_stopped(&self) {
        if self.state() == InstanceState::Resident {
            self.set_state(InstanceState::ResidentShippingStopped);
        }
    }

    /// Drain and unload: marks Draining so no new requests are routed in,
    /// runs the caller-supplied teardown (final WAL sync then
    /// `TenantHost::shutdown`), then returns to Absent. Idempotent if
    /// already absent.
    pub async fn unload<F, Fut>(&self, teardown: F) -> std::io::Result<()>
    where
        F: FnOnce(Arc<dyn TenantHost>) -> Fut,
        Fut: std::future::Future<Output = std::io::Result<()>>,
    {
        let _guard = self.load_lock.lock().await;
        let host = self.host.lock().await.take();
        let Some(host) = host else {
            self.set_state(InstanceState::Absent);
            return Ok(());
        };

        self.set_state(InstanceState::Draining);
        let result = teardown(host).await;
        self.set_state(InstanceState::Absent);
        result
    }

    pub async fn is_loaded(&self) -> bool {
        self.host.lock().await.is_some()
    }

    pub async fn current_host(&self) -> Option<Arc<dyn TenantHost>> {
        self.host.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::StubHost;

    #[tokio::test]
    async fn ensure_loaded_transitions_to_resident() {
        let instance = TenantInstance::new(TenantId::new());
        assert_eq!(instance.state(), InstanceState::Absent);
        let host = instance
            .ensure_loaded(|| async { Ok(Arc::new(StubHost { body: "ok".into() }) as Arc<dyn TenantHost>) })
            .await
            .unwrap();
        assert_eq!(instance.state(), InstanceState::Resident);
        assert!(instance.is_loaded().await);
        drop(host);
    }

    #[tokio::test]
    async fn ensure_loaded_is_idempotent() {
        let instance = TenantInstance::new(TenantId::new());
        let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let c1 = calls.clone();
        instance
            .ensure_loaded(move || {
                c1.fetch_add(1, Ordering::SeqCst);
                async move { Ok(Arc::new(StubHost { body: "ok".into() }) as Arc<dyn TenantHost>) }
            })
            .await
            .unwrap();
        let c2 = calls.clone();
        instance
            .ensure_loaded(move || {
                c2.fetch_add(1, Ordering::SeqCst);
                async move { Ok(Arc::new(StubHost { body: "ok".into() }) as Arc<dyn TenantHost>) }
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unload_returns_to_absent() {
        let instance = TenantInstance::new(TenantId::new());
        instance
            .ensure_loaded(|| async { Ok(Arc::new(StubHost { body: "ok".into() }) as Arc<dyn TenantHost>) })
            .await
            .unwrap();
        instance.unload(|_host| async { Ok(()) }).await.unwrap();
        assert_eq!(instance.state(), InstanceState::Absent);
        assert!(!instance.is_loaded().await);
    }

    #[tokio::test]
    async fn failed_load_returns_to_absent() {
        let instance = TenantInstance::new(TenantId::new());
        let result = instance
            .ensure_loaded(|| async { Err(std::io::Error::new(std::io::ErrorKind::Other, "boom")) })
            .await;
        assert!(result.is_err());
        assert_eq!(instance.state(), InstanceState::Absent);
    }
}
