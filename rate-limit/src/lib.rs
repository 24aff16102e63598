//! # rate_limit
//!
//! Debouncing and throttling for async functions, built on the
//! [`poll`] engine.
//!
//! Both limiters drive a private poll that never fires on its own: each
//! accepted invocation schedules an `invoked` tick, and every caller waiting
//! on that tick receives a clone of its outcome.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use rate_limit::{Edge, Throttler, ThrottlerOptions};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let fetch = Throttler::new(
//!     |path: String| async move { Ok::<_, String>(format!("contents of {path}")) },
//!     ThrottlerOptions::default()
//!         .with_limit(Duration::from_millis(200))
//!         .with_edge(Edge::Trailing),
//! )?;
//!
//! let contents = fetch.invoke("notebook.ipynb".to_string()).await?;
//! println!("{contents}");
//! # Ok(())
//! # }
//! ```

// Modules
pub mod config;
pub mod debouncer;
pub mod error;
pub mod throttler;

mod limiter;

// Re-exports - Public API
pub use config::{Edge, ThrottlerOptions, DEFAULT_LIMIT};
pub use debouncer::Debouncer;
pub use error::{RateLimitError, Result};
pub use throttler::Throttler;
