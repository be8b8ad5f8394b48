// Logging forwards to the `log` crate when the `log` feature is enabled and
// compiles to nothing otherwise.

macro_rules! trace {
    ($($arg:tt)+) => {{
        #[cfg(feature = "log")]
        {
            ::log::trace!($($arg)+);
        }
    }};
}

macro_rules! debug {
    ($($arg:tt)+) => {{
        #[cfg(feature = "log")]
        {
            ::log::debug!($($arg)+);
        }
    }};
}
