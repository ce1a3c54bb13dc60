use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::AtomicBool;

use anyhow::Result;

static ABORT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

/// Process-wide abort flag, set by SIGINT/SIGTERM once handlers are
/// installed.
pub fn abort_flag() -> Arc<AtomicBool> {
    ABORT_FLAG
        .get_or_init(|| Arc::new(AtomicBool::new(false)))
        .clone()
}

#[cfg(unix)]
extern "C" fn request_abort(_signum: libc::c_int) {
    // Only an atomic store here; anything else is not signal-safe.
    if let Some(flag) = ABORT_FLAG.get() {
        flag.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(unix)]
pub fn install_abort_handlers() -> Result<Arc<AtomicBool>> {
    let flag = abort_flag();
    for signum in [libc::SIGINT, libc::SIGTERM] {
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = request_abort as extern "C" fn(libc::c_int) as libc::sighandler_t;
            libc::sigemptyset(&mut action.sa_mask);
            action.sa_flags = 0;
            if libc::sigaction(signum, &action, std::ptr::null_mut()) != 0 {
                return Err(anyhow::anyhow!("failed to install handler for signal {signum}"));
            }
        }
    }
    Ok(flag)
}

#[cfg(not(unix))]
pub fn install_abort_handlers() -> Result<Arc<AtomicBool>> {
    Ok(abort_flag())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_flag_is_shared() {
        let first = abort_flag();
        let second = abort_flag();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
