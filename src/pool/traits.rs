//! Key and task abstractions accepted by the session pool.

use futures::future::BoxFuture;
use std::fmt::Debug;
use std::hash::Hash;

/// Opaque identifier grouping tasks that must run in submission order.
///
/// Anything hashable, cloneable and thread-safe qualifies: NAT tuples,
/// socket addresses, strings.
pub trait SessionKey: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<T> SessionKey for T where T: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

/// A unit of work queued on a session. Errors are the task's own business.
pub type Task = BoxFuture<'static, ()>;
