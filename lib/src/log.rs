// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

//! Logging sink for the memory model
//!
//! Every event is emitted under the [`TARGET`] target so that allocation traces can be filtered
//! independently from the rest of a generation run. Without the `log` feature all macros expand to
//! nothing and their arguments are never evaluated.

#![allow(unused_imports, unused_macros, reason = "Not all events may be used")]

/// Target under which all memory-model events are recorded
pub const TARGET: &str = "arrow::memory";

#[cfg(feature = "log")]
mod implementation {
    // Usage of [`__tracing_do_not_use_directly`] is allowed here

    macro_rules! error {
        ($($arg:tt)*) => {
            ::__tracing_do_not_use_directly::error!(target: $crate::log::TARGET, $($arg)*)
        };
    }

    macro_rules! warning {
        ($($arg:tt)*) => {
            ::__tracing_do_not_use_directly::warn!(target: $crate::log::TARGET, $($arg)*)
        };
    }

    macro_rules! info {
        ($($arg:tt)*) => {
            ::__tracing_do_not_use_directly::info!(target: $crate::log::TARGET, $($arg)*)
        };
    }

    macro_rules! debug {
        ($($arg:tt)*) => {
            ::__tracing_do_not_use_directly::debug!(target: $crate::log::TARGET, $($arg)*)
        };
    }

    macro_rules! trace {
        ($($arg:tt)*) => {
            ::__tracing_do_not_use_directly::trace!(target: $crate::log::TARGET, $($arg)*)
        };
    }

    pub(crate) use debug;
    pub(crate) use error;
    pub(crate) use info;
    pub(crate) use trace;
    pub(crate) use warning;
}

#[cfg(not(feature = "log"))]
mod implementation {
    macro_rules! error {
        ($($ignore:tt)*) => {};
    }

    macro_rules! warning {
        ($($ignore:tt)*) => {};
    }

    macro_rules! info {
        ($($ignore:tt)*) => {};
    }

    macro_rules! debug {
        ($($ignore:tt)*) => {};
    }

    macro_rules! trace {
        ($($ignore:tt)*) => {};
    }

    pub(crate) use debug;
    pub(crate) use error;
    pub(crate) use info;
    pub(crate) use trace;
    pub(crate) use warning;
}

#[cfg(feature = "log")]
#[doc(hidden)]
// The sandbox installs its subscriber through this re-export so both crates agree on one `tracing`
pub use __tracing_do_not_use_directly as tracing_internal;
pub(crate) use implementation::*;
