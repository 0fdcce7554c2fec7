//! Engine: live detector generations, per-request contexts and the
//! force-keep rate limiter.
//!
//! Readers never lock: [`Engine::get_context`] snapshots the current
//! detector collection through an `ArcSwap`, and [`Engine::update`] installs
//! the next generation with a single swap.

mod context;
mod core;
mod rate_limiter;


pub use self::context::Context;
pub use self::core::Engine;
pub use self::rate_limiter::RateLimiter;
