//! Declared units of work and the interceptor that turns declarations into routing.
//!
//! A [`UnitOfWork`] carries the one piece of intent callers declare: whether the work is
//! read-only. Running work through it installs the matching [`RoutingDecision`] before
//! the work starts and removes it on every exit path (return, error, panic, or the
//! future being dropped), restoring whatever the enclosing unit had declared.

use std::borrow::Cow;
use std::future::Future;

use serde::{Deserialize, Serialize};
use tracing::{Instrument, debug, debug_span};

use super::context::RoutingContext;
use super::decision::RoutingDecision;

/// A unit-of-work declaration.
///
/// `read_only` is `None` when nothing was declared, which routes like `false`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UnitOfWork {
    pub read_only: Option<bool>,
}

impl UnitOfWork {
    pub const fn read_only() -> Self {
        Self { read_only: Some(true) }
    }

    pub const fn read_write() -> Self {
        Self { read_only: Some(false) }
    }

    pub const fn undeclared() -> Self {
        Self { read_only: None }
    }

    pub const fn declared(read_only: bool) -> Self {
        Self {
            read_only: Some(read_only),
        }
    }

    /// Keeps this (method-level) declaration and falls back to the enclosing one.
    pub fn or_enclosing(self, enclosing: UnitOfWork) -> Self {
        Self {
            read_only: self.read_only.or(enclosing.read_only),
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.unwrap_or(false)
    }

    pub fn decision(&self) -> RoutingDecision {
        RoutingDecision::from_read_only(self.is_read_only())
    }

    /// Runs `work` with this unit's decision in effect.
    ///
    /// The decision is installed before `work` is first polled and lives in a task-local
    /// frame owned by this call, so concurrent units of work in the same task stay apart.
    pub async fn run<F>(self, work: F) -> F::Output
    where
        F: Future,
    {
        RoutingContext::scope(self.decision(), work).await
    }

    /// Runs synchronous `work` with this unit's decision in effect.
    ///
    /// When `work` returns or unwinds, the context is put back exactly as it was on
    /// entry, even if `work` set or cleared decisions itself.
    pub fn run_blocking<T>(self, work: impl FnOnce() -> T) -> T {
        let _restore = scopeguard::guard(RoutingContext::snapshot(), RoutingContext::restore);
        RoutingContext::push(self.decision());
        work()
    }
}

/// Applies unit-of-work declarations for one service.
///
/// The interceptor holds the service-wide (enclosing) declaration; each operation may
/// declare its own, which takes precedence.
#[derive(Debug, Clone)]
pub struct UnitOfWorkInterceptor {
    service: Cow<'static, str>,
    enclosing: UnitOfWork,
}

impl UnitOfWorkInterceptor {
    pub fn new(service: impl Into<Cow<'static, str>>) -> Self {
        Self {
            service: service.into(),
            enclosing: UnitOfWork::undeclared(),
        }
    }

    /// Sets the service-wide declaration used by operations that declare nothing.
    pub fn with_default(mut self, enclosing: UnitOfWork) -> Self {
        self.enclosing = enclosing;
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// The effective declaration for an operation.
    pub fn resolve(&self, operation: UnitOfWork) -> UnitOfWork {
        operation.or_enclosing(self.enclosing)
    }

    /// Runs an operation's future under its effective declaration.
    pub async fn intercept<F>(&self, operation: &str, declared: UnitOfWork, work: F) -> F::Output
    where
        F: Future,
    {
        let unit = self.resolve(declared);
        let decision = unit.decision();
        debug!(service = %self.service, operation, %decision, "Entering unit of work");

        let span = debug_span!("unit_of_work", service = %self.service, operation, %decision);
        unit.run(work).instrument(span).await
    }

    /// Runs a synchronous operation under its effective declaration.
    pub fn intercept_blocking<T>(&self, operation: &str, declared: UnitOfWork, work: impl FnOnce() -> T) -> T {
        let unit = self.resolve(declared);
        let decision = unit.decision();
        debug!(service = %self.service, operation, %decision, "Entering unit of work");

        let _entered = debug_span!("unit_of_work", service = %self.service, operation, %decision).entered();
        unit.run_blocking(work)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::SourceRole;
    use crate::test_utils::TestTopology;
    use futures::FutureExt;
    use rstest::rstest;
    use std::panic::AssertUnwindSafe;

    use RoutingDecision::{Read, Write};

    #[rstest]
    #[case(UnitOfWork::read_only(), Read)]
    #[case(UnitOfWork::read_write(), Write)]
    #[case(UnitOfWork::undeclared(), Write)]
    #[case(UnitOfWork::declared(true), Read)]
    fn test_declaration_maps_to_decision(#[case] unit: UnitOfWork, #[case] expected: RoutingDecision) {
        assert_eq!(unit.decision(), expected);
    }

    #[rstest]
    #[case(UnitOfWork::read_write(), UnitOfWork::read_only(), Write)]
    #[case(UnitOfWork::read_only(), UnitOfWork::read_write(), Read)]
    #[case(UnitOfWork::undeclared(), UnitOfWork::read_only(), Read)]
    #[case(UnitOfWork::undeclared(), UnitOfWork::undeclared(), Write)]
    fn test_method_declaration_takes_precedence(
        #[case] method: UnitOfWork,
        #[case] enclosing: UnitOfWork,
        #[case] expected: RoutingDecision,
    ) {
        assert_eq!(method.or_enclosing(enclosing).decision(), expected);

        let interceptor = UnitOfWorkInterceptor::new("users").with_default(enclosing);
        assert_eq!(interceptor.resolve(method).decision(), expected);
    }

    #[test]
    fn test_deserializes_from_config() {
        let unit: UnitOfWork = serde_json::from_str(r#"{"read_only": true}"#).unwrap();
        assert_eq!(unit, UnitOfWork::read_only());

        let unit: UnitOfWork = serde_json::from_str("{}").unwrap();
        assert_eq!(unit, UnitOfWork::undeclared());
    }

    #[test_log::test(tokio::test)]
    async fn test_read_only_work_uses_replicas() {
        let topology = TestTopology::new(2);

        let sources = UnitOfWork::read_only()
            .run(async {
                let mut seen = Vec::new();
                for _ in 0..4 {
                    let mut conn = topology.pools.connection();
                    seen.push(conn.acquire().await.unwrap().source);
                }
                seen
            })
            .await;

        assert_eq!(sources, vec!["R1", "R2", "R1", "R2"]);
        assert_eq!(topology.primary.checkouts(), 0);
    }

    #[tokio::test]
    async fn test_read_write_and_undeclared_work_use_primary() {
        let topology = TestTopology::new(2);

        for unit in [UnitOfWork::read_write(), UnitOfWork::undeclared()] {
            let role = unit
                .run(async {
                    let mut conn = topology.pools.connection();
                    conn.acquire().await.unwrap();
                    conn.role()
                })
                .await;
            assert_eq!(role, Some(SourceRole::Primary));
        }

        assert_eq!(topology.primary.checkouts(), 2);
        assert!(topology.replicas.iter().all(|r| r.checkouts() == 0));
    }

    #[tokio::test]
    async fn test_nested_read_inside_write_restores_primary() {
        let topology = TestTopology::new(2);

        let (outer_before, inner, outer_after) = UnitOfWork::read_write()
            .run(async {
                let mut before = topology.pools.connection();
                before.acquire().await.unwrap();

                let inner = UnitOfWork::read_only()
                    .run(async {
                        let mut conn = topology.pools.connection();
                        conn.acquire().await.unwrap();
                        conn.role()
                    })
                    .await;

                let mut after = topology.pools.connection();
                after.acquire().await.unwrap();
                (before.role(), inner, after.role())
            })
            .await;

        assert_eq!(outer_before, Some(SourceRole::Primary));
        assert_eq!(inner, Some(SourceRole::Replica(0)));
        assert_eq!(outer_after, Some(SourceRole::Primary));
    }

    #[tokio::test]
    async fn test_nested_write_inside_read_restores_read() {
        let after = UnitOfWork::read_only()
            .run(async {
                UnitOfWork::read_write()
                    .run(async { assert_eq!(RoutingContext::get(), Write) })
                    .await;
                RoutingContext::get()
            })
            .await;

        assert_eq!(after, Read);
    }

    #[tokio::test]
    async fn test_context_restored_after_error() {
        let before = RoutingContext::get();

        let result: Result<(), &str> = UnitOfWork::read_only().run(async { Err("query failed") }).await;

        assert_eq!(result, Err("query failed"));
        assert_eq!(RoutingContext::get(), before);
        assert_eq!(RoutingContext::depth(), 0);
    }

    #[tokio::test]
    async fn test_context_restored_after_panic() {
        let outcome = UnitOfWork::read_write()
            .run(async {
                let panicked = AssertUnwindSafe(UnitOfWork::read_only().run(async {
                    panic!("boom");
                }))
                .catch_unwind()
                .await;
                (panicked.is_err(), RoutingContext::get())
            })
            .await;

        assert_eq!(outcome, (true, Write));
        assert_eq!(RoutingContext::depth(), 0);
    }

    #[tokio::test]
    async fn test_read_only_work_without_data_access_checks_nothing_out() {
        let topology = TestTopology::new(3);

        UnitOfWork::read_only()
            .run(async {
                let _conn = topology.pools.connection();
            })
            .await;

        assert_eq!(topology.total_checkouts(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_work_checks_nothing_out_and_restores() {
        let topology = TestTopology::new(1);

        let work = UnitOfWork::read_only().run(async {
            let mut conn = topology.pools.connection();
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            conn.acquire().await.map(|_| ())
        });
        let result = tokio::time::timeout(std::time::Duration::from_millis(10), work).await;

        assert!(result.is_err());
        assert_eq!(topology.total_checkouts(), 0);
        assert_eq!(RoutingContext::get(), Write);
    }

    #[tokio::test]
    async fn test_cancelled_mid_flight_releases_connection() {
        let topology = TestTopology::new(1);

        let work = UnitOfWork::read_only().run(async {
            let mut conn = topology.pools.connection();
            conn.acquire().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        });
        let result = tokio::time::timeout(std::time::Duration::from_millis(10), work).await;

        assert!(result.is_err());
        assert_eq!(topology.replicas[0].checkouts(), 1);
        assert_eq!(topology.replicas[0].in_use(), 0);
    }

    #[test]
    fn test_run_blocking_restores_after_panic() {
        RoutingContext::push(Write);

        let result = std::panic::catch_unwind(|| {
            UnitOfWork::read_only().run_blocking(|| {
                assert_eq!(RoutingContext::get(), Read);
                panic!("boom");
            })
        });

        assert!(result.is_err());
        assert_eq!(RoutingContext::get(), Write);
        assert_eq!(RoutingContext::depth(), 1);
        RoutingContext::pop();
    }

    #[test]
    fn test_run_blocking_inner_clear_keeps_enclosing_decision() {
        let seen = UnitOfWork::read_only().run_blocking(|| {
            UnitOfWork::read_write().run_blocking(RoutingContext::clear);
            RoutingContext::get()
        });
        assert_eq!(seen, Read);
        assert_eq!(RoutingContext::depth(), 0);

        // clearing past the inner unit's own frame is undone too
        let seen = UnitOfWork::read_only().run_blocking(|| {
            UnitOfWork::read_write().run_blocking(|| {
                RoutingContext::clear();
                RoutingContext::clear();
                RoutingContext::set(Write);
            });
            (RoutingContext::get(), RoutingContext::depth())
        });
        assert_eq!(seen, (Read, 1));
        assert_eq!(RoutingContext::get(), Write);
    }

    #[tokio::test]
    async fn test_set_inside_run_blocking_on_runtime_thread() {
        let seen = UnitOfWork::read_write().run_blocking(|| {
            RoutingContext::set(Read);
            RoutingContext::get()
        });
        assert_eq!(seen, Read);
        assert_eq!(RoutingContext::get(), Write);
        assert_eq!(RoutingContext::depth(), 0);
    }

    #[test]
    fn test_run_blocking_nests() {
        let seen = UnitOfWork::read_only().run_blocking(|| {
            let inner = UnitOfWork::read_write().run_blocking(RoutingContext::get);
            (inner, RoutingContext::get())
        });

        assert_eq!(seen, (Write, Read));
        assert_eq!(RoutingContext::depth(), 0);
    }

    #[tokio::test]
    async fn test_run_blocking_on_blocking_thread() {
        let seen = tokio::task::spawn_blocking(|| UnitOfWork::read_only().run_blocking(RoutingContext::get))
            .await
            .unwrap();
        assert_eq!(seen, Read);
    }

    #[tokio::test]
    async fn test_interceptor_applies_service_default() {
        let topology = TestTopology::new(1);
        let interceptor = UnitOfWorkInterceptor::new("reports").with_default(UnitOfWork::read_only());
        assert_eq!(interceptor.service(), "reports");

        let listed = interceptor
            .intercept("list", UnitOfWork::undeclared(), async {
                let mut conn = topology.pools.connection();
                conn.acquire().await.unwrap();
                conn.role()
            })
            .await;
        let created = interceptor
            .intercept("create", UnitOfWork::read_write(), async {
                let mut conn = topology.pools.connection();
                conn.acquire().await.unwrap();
                conn.role()
            })
            .await;

        assert_eq!(listed, Some(SourceRole::Replica(0)));
        assert_eq!(created, Some(SourceRole::Primary));
    }

    #[test]
    fn test_interceptor_blocking() {
        let interceptor = UnitOfWorkInterceptor::new("stats").with_default(UnitOfWork::read_only());

        let seen = interceptor.intercept_blocking("daily", UnitOfWork::undeclared(), RoutingContext::get);
        assert_eq!(seen, Read);
        assert_eq!(RoutingContext::depth(), 0);
    }

    #[test]
    fn test_run_driven_outside_a_runtime() {
        let topology = TestTopology::new(1);

        let role = tokio_test::block_on(UnitOfWork::read_only().run(async {
            let mut conn = topology.pools.connection();
            tokio_test::assert_ok!(conn.acquire().await);
            conn.role()
        }));

        assert_eq!(role, Some(SourceRole::Replica(0)));
        assert_eq!(RoutingContext::get(), Write);
        assert_eq!(RoutingContext::depth(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_units_route_independently() {
        let topology = TestTopology::new(2);
        let pools = topology.pools.clone();

        let handles: Vec<_> = (0..64)
            .map(|i| {
                let pools = pools.clone();
                let unit = UnitOfWork::declared(i % 2 == 0);
                tokio::spawn(unit.run(async move {
                    let mut conn = pools.connection();
                    tokio::task::yield_now().await;
                    conn.acquire().await.unwrap();
                    (unit.is_read_only(), conn.role())
                }))
            })
            .collect();

        for handle in handles {
            let (read_only, role) = handle.await.unwrap();
            assert_eq!(role.map(|r| r.is_primary()), Some(!read_only));
        }

        assert_eq!(topology.primary.checkouts(), 32);
        assert_eq!(topology.replicas.iter().map(|r| r.checkouts()).sum::<usize>(), 32);
    }
}
