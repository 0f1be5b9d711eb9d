//! Logging helpers for fire-and-forget paths.
//!
//! Errors on paths with no caller to return to (worker loops, substrate
//! reports, deadline timers) are logged here with their call site.

use std::fmt::Display;

/// Extension trait for logging errors with context.
pub trait ResultExt<T, E> {
    /// Log the error at `error` level if this is an `Err`.
    ///
    /// Returns the original `Result` unchanged.
    ///
    /// ```ignore
    /// use runhub_control_plane::result_ext::ResultExt;
    ///
    /// let _ = framework.stop(&run_id).await.log("stopping run");
    /// ```
    fn log<S: ToString>(self, context: S) -> Result<T, E>;

    /// Same as [`ResultExt::log`] at `warn` level, for expected rejections.
    fn log_warn<S: ToString>(self, context: S) -> Result<T, E>;
}

impl<T, E: Display> ResultExt<T, E> for Result<T, E> {
    #[track_caller]
    fn log<S: ToString>(self, context: S) -> Result<T, E> {
        if let Err(ref e) = self {
            let location = std::panic::Location::caller();
            tracing::error!(
                target: "runhub_control_plane",
                error = %e,
                file = %format!("{}:{}", location.file(), location.line()),
                context = %context.to_string(),
                "Operation failed"
            );
        }
        self
    }

    #[track_caller]
    fn log_warn<S: ToString>(self, context: S) -> Result<T, E> {
        if let Err(ref e) = self {
            let location = std::panic::Location::caller();
            tracing::warn!(
                target: "runhub_control_plane",
                error = %e,
                file = %format!("{}:{}", location.file(), location.line()),
                context = %context.to_string(),
                "Operation rejected"
            );
        }
        self
    }
}
