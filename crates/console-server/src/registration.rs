//! Scoped registration guards.

use std::fmt;

type Disposer = Box<dyn FnOnce() + Send + Sync>;

/// Guard returned by every hub registration (listener, interceptor, entry).
///
/// Dropping the guard disposes the registration. [`Registration::detach`]
/// keeps it alive for the rest of the process.
#[must_use = "dropping a Registration disposes it immediately"]
pub struct Registration {
    key: String,
    disposer: Option<Disposer>,
}

impl Registration {
    /// Creates a guard that runs `disposer` once.
    pub fn new(key: impl Into<String>, disposer: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            key: key.into(),
            disposer: Some(Box::new(disposer)),
        }
    }

    /// Name of the registered item (listener name, entry id, ...).
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns true once the registration has been disposed or detached.
    pub fn is_disposed(&self) -> bool {
        self.disposer.is_none()
    }

    /// Removes the registration. Calling it again is a no-op.
    pub fn dispose(&mut self) {
        if let Some(disposer) = self.disposer.take() {
            disposer();
        }
    }

    /// Keeps the registration for the lifetime of the process.
    pub fn detach(mut self) {
        self.disposer = None;
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("key", &self.key)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
