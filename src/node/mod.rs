//! The Tenant Node Runtime (spec component C): hosts a weighted-LRU
//! bounded set of resident tenant databases, enforces quotas, ships WAL
//! segments to durable storage, and archives tenants that go idle.

pub mod archival;
pub mod cache;
pub mod events;
pub mod instance;
pub mod quota;
pub mod runtime;
pub mod tier;
pub mod wal;

pub use archival::ArchivalSweeper;
pub use cache::WeightedLruCache;
pub use events::{ResourceEventSink, TracingEventSink};
pub use instance::{InstanceState, TenantInstance};
pub use quota::QuotaEnforcer;
pub use runtime::TenantNodeRuntime;
pub use tier::{classify as classify_tier, ResourceMetrics};
pub use wal::{FinalSyncReason, RestoreJob, RestoreJobRegistry, RestoreJobStatus, WalShippingState};
