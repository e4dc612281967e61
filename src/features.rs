//! Documents the crate's Cargo features; contains no code.
//!
//! # `log`
//!
//! Enabled by default. Routes the loop's internal diagnostics (dropped
//! exceptions never retrieved, selector backend chosen, signal handlers
//! installed) through the [`log`] facade rather than `eprintln!`, the way
//! `mio` logs through the same crate.
//!
//! # `tls`
//!
//! Off by default. Pulls in `rustls` and enables [`crate::transport::tls`].
