//! Spec §6 Observability's debug mode, gated on the `RUST_CORRAL_DEBUG`
//! environment variable (checked once, like CPython asyncio's
//! `PYTHONASYNCIODEBUG`). When enabled, `Task::spawn` records its caller's
//! source location so the "task was destroyed while still pending"
//! diagnostic in [`crate::task`] can point at where it was created.

use std::sync::OnceLock;

static ENABLED: OnceLock<bool> = OnceLock::new();

/// Whether debug-mode diagnostics are active for this process.
pub fn enabled() -> bool {
    *ENABLED.get_or_init(|| std::env::var_os("RUST_CORRAL_DEBUG").is_some())
}
