//! Read/write-split routing.
//!
//! # Architecture
//!
//! ```text
//! UnitOfWork::run ──► RoutingContext (task-local decision stack)
//!                              │
//! LazyConnection::acquire ──► ConnectionRouter::resolve
//!                              │
//!                  ┌───────────┴───────────┐
//!                  ↓ Write                 ↓ Read
//!              ┌────────┐          ┌─────────────────┐
//!              │Primary │          │ ReplicaBalancer │ (round robin)
//!              └────────┘          └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let pools = RoutedPools::new(ConnectionRouter::new(primary, replicas, ReadRoutingPolicy::Replicas)?);
//!
//! // Reads go to a replica
//! let users = UnitOfWork::read_only()
//!     .run(async {
//!         let mut conn = pools.connection();
//!         list_users(&mut **conn.acquire().await?).await
//!     })
//!     .await?;
//!
//! // Undeclared or read-write work goes to the primary
//! UnitOfWork::read_write()
//!     .run(async {
//!         let mut conn = pools.connection();
//!         create_user(&mut **conn.acquire().await?, &request).await
//!     })
//!     .await?;
//! ```

mod balancer;
mod context;
mod decision;
mod lazy;
mod router;
mod unit_of_work;

pub use balancer::ReplicaBalancer;
pub use context::RoutingContext;
pub use decision::RoutingDecision;
pub use lazy::{LazyConnection, RoutedPools};
pub use router::{ConnectionRouter, ReadRoutingPolicy, ResolvedSource, SourceRole};
pub use unit_of_work::{UnitOfWork, UnitOfWorkInterceptor};
