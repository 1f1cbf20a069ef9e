// common.rs - print and error funnels over the `log` facade

use log::{debug, error, info, warn};

/// Fatal: unrecoverable, the caller cannot continue.
pub const ERR_FATAL: i32 = 0;
/// Drop: abandon the current operation and keep running.
pub const ERR_DROP: i32 = 1;

// ============================================================
// Com_Printf / Com_DPrintf / Com_Error
// ============================================================

/// General-purpose print.
pub fn com_printf(msg: &str) {
    info!("{}", msg.trim_end());
}

/// Developer-only print; shown when the host enables debug logging.
pub fn com_dprintf(msg: &str) {
    debug!("{}", msg.trim_end());
}

/// Error handler.
/// - `ERR_FATAL`: logs and panics.
/// - `ERR_DROP` (and anything else): logs and returns to the caller.
pub fn com_error(code: i32, msg: &str) {
    if code == ERR_FATAL {
        error!("{}", msg.trim_end());
        panic!("Fatal error: {}", msg.trim_end());
    }
    warn!("********************\nERROR: {}\n********************", msg.trim_end());
}
