/// Errors produced when a limiter cannot take a decision.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LimitError {
    /// The tenant table is full and the tenant is not yet tracked.
    ///
    /// Existing tenants keep being served. Call
    /// [`TenantLimiter::purge_idle`](crate::TenantLimiter::purge_idle) to make room.
    #[error("Tenant table is full ({max_tenants} tenants); cannot track a new tenant")]
    TenantCapacity {
        /// The configured maximum number of tenants.
        max_tenants: usize,
    },
}
