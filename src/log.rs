//! Logging interface, contingent on the `log` feature
//!
//! Only enable `log` when your logger isn't writing over the same USB
//! link this driver serves!

macro_rules! debug {
    ($($args:tt)*) => {
        #[cfg(feature = "log")]
        ::log::debug!($($args)*)
    };
}

macro_rules! warn {
    ($($args:tt)*) => {
        #[cfg(feature = "log")]
        ::log::warn!($($args)*)
    };
}
