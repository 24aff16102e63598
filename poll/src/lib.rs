//! # poll
//!
//! A self-scheduling, backoff-aware, cancellable polling engine for keeping
//! local state (kernel status, file listings, sessions) in sync with a
//! remote server.
//!
//! A [`Poll`] repeatedly invokes a user factory. Every invocation outcome,
//! and every explicit `start`/`stop`/`refresh`, becomes a new immutable
//! [`State`] tagged with a [`Phase`]. Failures back off with decorrelated
//! jitter; standby skips the factory while the host is hidden.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use poll::{Backoff, FrequencyOptions, Phase, Poll, PollOptions};
//!
//! # async fn run() -> Result<(), poll::PollError> {
//! let poll: Poll<String, String> = Poll::new(
//!     PollOptions::new(|_state| async { Ok("idle".to_string()) })
//!         .name("kernel-status")
//!         .frequency(
//!             FrequencyOptions::new()
//!                 .with_backoff(Backoff::Enabled)
//!                 .with_interval(Duration::from_secs(1))
//!                 .with_max(Duration::from_secs(30)),
//!         ),
//! )?;
//!
//! poll.tick().await?;
//! poll.refresh().await;
//!
//! let state = poll.state();
//! if state.phase == Phase::Resolved {
//!     println!("kernel is {:?}", state.value());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! ```text
//! Poll<T, U>
//!     │
//!     ├── Mutex<Shared>: state, generation, frequency, standby, timer
//!     │
//!     ├── broadcast::Sender<Arc<State>>   ──► subscribe()
//!     │
//!     └── watch::Sender<Beat>             ──► tick(), disposed()
//! ```

// Modules
pub mod backoff;
pub mod config;
pub mod error;
pub mod frequency;
pub mod logging;
pub mod poll;
pub mod standby;
pub mod state;

// Re-exports - Public API
pub use config::{Factory, FrequencyOptions, PollOptions};
pub use error::{PollError, Result};
pub use frequency::{Backoff, Frequency, IMMEDIATE, MAX_INTERVAL, NEVER};
pub use poll::{Listener, Poll, ReadonlyPoll};
pub use standby::{AlwaysVisible, Standby, Visibility, VisibilityFlag};
pub use state::{Next, Phase, State};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{FrequencyOptions, PollOptions};
    pub use crate::frequency::{Backoff, Frequency, IMMEDIATE, NEVER};
    pub use crate::poll::{Poll, ReadonlyPoll};
    pub use crate::standby::Standby;
    pub use crate::state::{Next, Phase, State};
}
