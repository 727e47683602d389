//! Utility macros used internally by the HTTP crate.

/// Returns early with an error if a condition is not met.
///
/// This is similar to `assert!`, but returns an error instead of panicking.
///
/// ```ignore
/// ensure!(headers.len() < MAX_HEADERS, ParseError::too_many_headers(MAX_HEADERS));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;
