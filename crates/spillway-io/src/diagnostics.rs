//! Explicitly passed diagnostics sink.
//!
//! The library never installs a process-wide subscriber. Disk queues take a
//! [`Diagnostics`] at construction and install it as the thread-local
//! default of each worker thread, so events emitted while serving requests
//! go to the sink the owner chose.

use tracing::dispatcher::{self, DefaultGuard};
use tracing::Dispatch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Handle to a `tracing` dispatcher.
#[derive(Clone, Debug)]
pub struct Diagnostics {
    dispatch: Dispatch,
}

impl Diagnostics {
    /// Sink that discards every event.
    pub fn silent() -> Self {
        Self {
            dispatch: Dispatch::none(),
        }
    }

    /// The dispatcher that is current on the calling thread.
    pub fn current() -> Self {
        Self {
            dispatch: dispatcher::get_default(Dispatch::clone),
        }
    }

    /// Formats events to stderr, filtered by an `EnvFilter` directive such
    /// as `"spillway_io=debug"`.
    pub fn stderr(filter: &str) -> Self {
        let subscriber = tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_thread_names(true))
            .with(EnvFilter::new(filter));
        Self {
            dispatch: Dispatch::new(subscriber),
        }
    }

    /// Wraps an existing dispatcher.
    pub fn from_dispatch(dispatch: Dispatch) -> Self {
        Self { dispatch }
    }

    /// The wrapped dispatcher.
    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Runs `f` with this sink as the default dispatcher.
    pub fn in_scope<R>(&self, f: impl FnOnce() -> R) -> R {
        dispatcher::with_default(&self.dispatch, f)
    }

    /// Makes this sink the calling thread's default until the guard drops.
    pub(crate) fn install(&self) -> DefaultGuard {
        dispatcher::set_default(&self.dispatch)
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::silent()
    }
}
