//! Out-of-memory protection for the listening daemon

use super::error::{GuardError, Result};

/// Lowest oom_score_adj, exempts the process from the OOM killer
#[cfg(target_os = "linux")]
pub const OOM_SCORE_ADJ_MIN: i32 = -1000;

/// Exclude the calling process from out-of-memory kills.
///
/// Needs root (or CAP_SYS_RESOURCE on Linux); must run before privileges
/// are dropped.
#[cfg(target_os = "linux")]
pub fn protect_current_process() -> Result<()> {
    std::fs::write("/proc/self/oom_score_adj", OOM_SCORE_ADJ_MIN.to_string())
        .map_err(GuardError::Memory)
}

#[cfg(target_os = "freebsd")]
#[allow(unsafe_code)]
pub fn protect_current_process() -> Result<()> {
    // A zero-length range at NULL applies MADV_PROTECT to the whole process
    let rc = unsafe { libc::madvise(std::ptr::null_mut(), 0, libc::MADV_PROTECT) };
    if rc != 0 {
        return Err(GuardError::Memory(std::io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "freebsd")))]
pub fn protect_current_process() -> Result<()> {
    Err(GuardError::Unsupported("memory protection"))
}
