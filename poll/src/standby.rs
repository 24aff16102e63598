//! Standby policy and the host visibility source it consults.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Reports whether the consuming context is currently visible to a user.
pub trait Visibility: Send + Sync {
    fn is_visible(&self) -> bool;
}

impl<F> Visibility for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_visible(&self) -> bool {
        self()
    }
}

/// Visibility for headless hosts: always visible.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysVisible;

impl Visibility for AlwaysVisible {
    fn is_visible(&self) -> bool {
        true
    }
}

/// A shared visibility toggle the host flips as focus changes.
///
/// Clones share the same flag.
#[derive(Debug, Clone)]
pub struct VisibilityFlag {
    visible: Arc<AtomicBool>,
}

impl VisibilityFlag {
    pub fn new(visible: bool) -> Self {
        Self {
            visible: Arc::new(AtomicBool::new(visible)),
        }
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
    }
}

impl Default for VisibilityFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Visibility for VisibilityFlag {
    fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }
}

/// When a poll should skip its factory and only keep rescheduling.
#[derive(Clone, Default)]
pub enum Standby {
    /// Always run the factory
    Never,
    /// Stand by while the host reports itself hidden
    #[default]
    WhenHidden,
    /// Stand by whenever the predicate returns true
    Predicate(Arc<dyn Fn() -> bool + Send + Sync>),
}

impl Standby {
    /// Build a predicate policy from a closure.
    pub fn when<F>(predicate: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Standby::Predicate(Arc::new(predicate))
    }

    /// Whether a tick should stand by instead of executing.
    pub fn is_active(&self, visibility: &dyn Visibility) -> bool {
        match self {
            Standby::Never => false,
            Standby::WhenHidden => !visibility.is_visible(),
            Standby::Predicate(predicate) => predicate(),
        }
    }
}

impl fmt::Debug for Standby {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Standby::Never => f.write_str("Never"),
            Standby::WhenHidden => f.write_str("WhenHidden"),
            Standby::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}
