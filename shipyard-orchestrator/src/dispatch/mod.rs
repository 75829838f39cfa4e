//! Build Dispatch
//!
//! Routes a pipeline's targets to capability-matched workers over the
//! Framed Channel and tracks their completion.
//!
//! - [`tracker`]: awaitable per-pipeline BuildTask set
//! - [`dispatcher`]: worker grouping, dispatch packets and the correlation map

pub mod dispatcher;
pub mod tracker;

pub use dispatcher::{Assignment, BuildDispatcher, DispatchRequest, RouteGuard, plan};
pub use tracker::{Applied, BuildTracker};
