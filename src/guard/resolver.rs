//! Eager name-resolution initialisation
//!
//! The C library reads resolv.conf, nsswitch.conf and friends on first
//! use. Once the process view of the filesystem is restricted those files
//! are gone, so initialisation is forced while they are still reachable.

use std::net::ToSocketAddrs;
use tracing::debug;

use super::error::{GuardError, Result};

/// Host used to warm up the lookup path; always answerable locally
const WARMUP_HOST: &str = "localhost";

/// Initialise the resolver state of the C library
pub fn init_resolver() -> Result<()> {
    reinit_libc_resolver()?;

    // A lookup pulls in the NSS modules named by nsswitch.conf
    let resolved = (WARMUP_HOST, 0)
        .to_socket_addrs()
        .map_err(|e| GuardError::Resolver(format!("{} lookup: {}", WARMUP_HOST, e)))?
        .count();

    debug!("Resolver warm-up: {} resolved to {} addresses", WARMUP_HOST, resolved);
    Ok(())
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
#[allow(unsafe_code)]
fn reinit_libc_resolver() -> Result<()> {
    debug!("res_init()");
    // res_init only touches the calling thread's resolver state
    let rc = unsafe { libc::res_init() };
    if rc != 0 {
        return Err(GuardError::Resolver(format!(
            "res_init: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
fn reinit_libc_resolver() -> Result<()> {
    Ok(())
}
