//! Logging bootstrap for the library.
//!
//! The core never logs at a level that implies recovery; the only routine
//! log site is the per-column UTF-8 fix notice in the record rewriter. This
//! module exposes an opt-in initializer so embedding applications and tests
//! can surface those messages without configuring `env_logger` themselves.

/// Enables verbose logging to stderr. Safe to call more than once.
pub fn enable_verbose_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .is_test(false)
        .try_init();
}
