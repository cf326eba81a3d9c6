//! The embedded-database host abstraction (spec 4.C "Tenant Node Runtime"
//! owns the lifecycle; the concrete database engine underneath is an
//! injectable collaborator). Grounded on the teacher's pattern of a
//! `TenantHost`-shaped seam between orchestration and the thing being
//! orchestrated, as seen in `multitenant::pdb`/`multitenant::cdb` fronting
//! a concrete storage engine behind a trait.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use std::path::Path;

/// One embedded database instance bound to a tenant. The runtime drives
/// `bootstrap` on load, routes HTTP through `http_handler` while resident,
/// and calls `shutdown` before the instance leaves the cache. Any engine
/// that can be opened from a directory and served over HTTP can implement
/// this without the runtime knowing its storage format.
#[async_trait]
pub trait TenantHost: Send + Sync {
    /// Opens (or creates, if `data_dir` is empty) the tenant's database.
    /// Returns `Err` distinctly from a missing file only when the open
    /// itself fails after the data is known to exist (spec 4.C.3: a
    /// missing snapshot is "new database", not a failure).
    async fn bootstrap(&self, data_dir: &Path) -> std::io::Result<()>;

    async fn http_handler(&self, req: Request<Body>) -> std::io::Result<Response<Body>>;

    /// Flush and close. Called with the instance already removed from the
    /// cache's lookup table, so no new requests can arrive concurrently.
    async fn shutdown(&self) -> std::io::Result<()>;
}

/// A `TenantHost` that serves a fixed in-memory response; used in tests
/// and as the default for tiers of the demo CLI that don't wire in a real
/// embedded engine.
pub struct StubHost {
    pub body: String,
}

#[async_trait]
impl TenantHost for StubHost {
    async fn bootstrap(&self, data_dir: &Path) -> std::io::Result<()> {
        tokio::fs::create_dir_all(data_dir).await
    }

    async fn http_handler(&self, _req: Request<Body>) -> std::io::Result<Response<Body>> {
        Ok(Response::new(Body::from(self.body.clone())))
    }

    async fn shutdown(&self) -> std::io::Result<()> {
        Ok(())
    }
}
