//! Shared application state threaded through every route handler.

use crate::auth::JwtVerifier;
use crate::config::GatewayConfig;
use crate::rate_limit::RateLimiter;
use arc_swap::ArcSwap;
use quarrygate_procedures::{DatabaseExecutor, HookRegistry, HttpClient, ProcedureExecutor};
use quarrygate_schema::SchemaRegistry;
use std::sync::Arc;

/// Everything a route handler needs, for one process lifetime. CRUD
/// routes dispatch through `executor.db()` directly; procedure routes
/// hand the whole `ProcedureExecutor` their descriptor and context.
///
/// `registry_cell` is an `ArcSwap` rather than a plain `Arc` so a
/// `hotReload` rebuild can publish a freshly-loaded registry without
/// mutating the one in-flight handlers are still reading from.
/// Readers always see a complete, self-consistent registry snapshot.
pub struct AppState<D, H, K>
where
    D: DatabaseExecutor + 'static,
    H: HttpClient + 'static,
    K: HookRegistry + 'static,
{
    pub registry_cell: Arc<ArcSwap<SchemaRegistry>>,
    pub config: Arc<GatewayConfig>,
    pub verifier: Arc<JwtVerifier>,
    pub rate_limiter: Arc<RateLimiter>,
    pub executor: Arc<ProcedureExecutor<D, H, K>>,
    pub started_at: std::time::Instant,
}

impl<D, H, K> AppState<D, H, K>
where
    D: DatabaseExecutor + 'static,
    H: HttpClient + 'static,
    K: HookRegistry + 'static,
{
    /// Current registry snapshot. Cheap: an `Arc` clone of whatever was
    /// last published, never blocks on a concurrent reload.
    pub fn registry(&self) -> Arc<SchemaRegistry> {
        self.registry_cell.load_full()
    }
}

impl<D, H, K> Clone for AppState<D, H, K>
where
    D: DatabaseExecutor + 'static,
    H: HttpClient + 'static,
    K: HookRegistry + 'static,
{
    fn clone(&self) -> Self {
        Self {
            registry_cell: self.registry_cell.clone(),
            config: self.config.clone(),
            verifier: self.verifier.clone(),
            rate_limiter: self.rate_limiter.clone(),
            executor: self.executor.clone(),
            started_at: self.started_at,
        }
    }
}
