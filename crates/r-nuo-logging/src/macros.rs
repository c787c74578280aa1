//! ---
//! nuo_section: "03-logging"
//! nuo_subsection: "module"
//! nuo_type: "source"
//! nuo_scope: "code"
//! nuo_description: "Context-enriched logging macros."
//! nuo_version: "v0.0.0-prealpha"
//! nuo_owner: "tbd"
//! ---
//! Logging macros that attach a [`LogContext`](crate::LogContext) to every event.

#[doc(hidden)]
#[macro_export]
macro_rules! __nuo_event {
    ($level:expr, $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            $level,
            node = ctx.node.unwrap_or(""),
            target = ctx.target.unwrap_or(""),
            request = ctx.request.unwrap_or_default(),
            state = ctx.state.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an informational log enriched with R-NUO context.
#[macro_export]
macro_rules! nuo_info {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__nuo_event!(tracing::Level::INFO, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__nuo_event!(tracing::Level::INFO, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a debug log enriched with R-NUO context.
#[macro_export]
macro_rules! nuo_debug {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__nuo_event!(tracing::Level::DEBUG, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__nuo_event!(tracing::Level::DEBUG, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a warning enriched with R-NUO context.
#[macro_export]
macro_rules! nuo_warn {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__nuo_event!(tracing::Level::WARN, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__nuo_event!(tracing::Level::WARN, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit an error log enriched with R-NUO context.
#[macro_export]
macro_rules! nuo_error {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__nuo_event!(tracing::Level::ERROR, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__nuo_event!(tracing::Level::ERROR, $crate::LogContext::default(), $($arg)+)
    };
}
