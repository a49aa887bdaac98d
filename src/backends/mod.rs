//! Minidriver backends.
//!
//! Implementations of [`Minidriver`](crate::minidriver::Minidriver).
//!
//! # Feature flags
//! - **`hid`**: enables the `hidapi` backend ([`hid::HidapiMinidriver`]).
//!
//! The [`virtual_input`] backend is always available; tests and demos run on it.

#[cfg(feature = "hid")]
#[cfg_attr(docsrs, doc(cfg(feature = "hid")))]
pub mod hid;

pub mod virtual_input;
