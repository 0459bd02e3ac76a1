/// Emits a trace-level event for per-record activity.
///
/// These events are frequent enough to cost noticeable time even when
/// filtered out, so they are compiled in only with the `trace-more` feature.
#[cfg(feature = "trace-more")]
macro_rules! trace {
    ($($arg:tt)+) => (::tracing::trace!($($arg)+));
}
/// Emits a trace-level event for per-record activity. Compiled out because
/// the `trace-more` feature is disabled.
#[cfg(not(feature = "trace-more"))]
macro_rules! trace {
    ($($arg:tt)+) => {{}};
}
pub(crate) use trace;
