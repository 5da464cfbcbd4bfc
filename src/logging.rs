//! Built-in logger initialization.
//!
//! Uses the `env_logger` crate, gated by the Cargo feature
//! "builtin_env_logger" (enabled by default). When enabled, [`try_init`] is
//! called once from [`crate::heap::Heap::new`] so a host binary gets useful
//! logs out of the box without any setup of its own; a host that wants to
//! integrate with its own logging framework can disable the feature and
//! register its own implementation with the `log` crate before constructing
//! a [`crate::heap::Heap`].

/// Attempts to install an `env_logger`. Does nothing if the
/// "builtin_env_logger" feature is disabled, or if a logger is already
/// installed (e.g. by the host binary).
pub(crate) fn try_init() {
    cfg_if::cfg_if! {
        if #[cfg(feature = "builtin_env_logger")] {
            let result = env_logger::try_init_from_env(
                env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "warn"),
            );
            match result {
                Ok(()) => log::debug!("sconeheap: initialized the built-in logger"),
                Err(e) => log::debug!("sconeheap: built-in logger not installed: {e}"),
            }
        } else {
            log::debug!("sconeheap: \"builtin_env_logger\" feature disabled, not installing a logger");
        }
    }
}
