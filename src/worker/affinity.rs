//! Whole-process CPU pinning.
//!
//! A worker restricts itself to its assigned cores before spawning any
//! engine threads, so everything it starts later inherits the restriction.
//! Linux pins the whole process through `sched_setaffinity` and reads the
//! effective set back for verification. Other platforms only offer
//! thread-level pinning, so the main thread is pinned to the first
//! assigned core and verification is skipped.

use tracing::{info, warn};

use crate::error::{AppError, Result};

/// Core IDs usable on this machine, empty when detection fails.
pub fn available_cores() -> Vec<usize> {
    core_affinity::get_core_ids()
        .unwrap_or_default()
        .into_iter()
        .map(|core| core.id)
        .collect()
}

#[cfg(target_os = "linux")]
pub fn pin_to_cores(cores: &[usize]) -> Result<()> {
    use std::io;

    if cores.is_empty() {
        return Err(AppError::Worker("cannot pin to an empty core set".to_string()));
    }

    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        for &core in cores {
            if core >= libc::CPU_SETSIZE as usize {
                return Err(AppError::Worker(format!("core id {} out of range", core)));
            }
            libc::CPU_SET(core, &mut set);
        }

        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            return Err(AppError::Worker(format!(
                "sched_setaffinity({:?}) failed: {}",
                cores,
                io::Error::last_os_error()
            )));
        }
    }

    info!("Process pinned to cores {:?}", cores);
    Ok(())
}

/// Effective affinity of the current process.
#[cfg(target_os = "linux")]
pub fn current_affinity() -> Result<Vec<usize>> {
    use std::io;

    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        if libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut set) != 0 {
            return Err(AppError::Worker(format!(
                "sched_getaffinity failed: {}",
                io::Error::last_os_error()
            )));
        }
        Ok((0..libc::CPU_SETSIZE as usize)
            .filter(|&core| libc::CPU_ISSET(core, &set))
            .collect())
    }
}

#[cfg(not(target_os = "linux"))]
pub fn pin_to_cores(cores: &[usize]) -> Result<()> {
    if cores.is_empty() {
        return Err(AppError::Worker("cannot pin to an empty core set".to_string()));
    }

    let core = core_affinity::CoreId { id: cores[0] };
    if core_affinity::set_for_current(core) {
        warn!(
            "Whole-process pinning unavailable on this platform, main thread pinned to core {}",
            cores[0]
        );
        Ok(())
    } else {
        Err(AppError::Worker(format!(
            "failed to pin thread to core {}",
            cores[0]
        )))
    }
}

/// Effective affinity of the current process.
#[cfg(not(target_os = "linux"))]
pub fn current_affinity() -> Result<Vec<usize>> {
    Err(AppError::Worker(
        "affinity read-back not supported on this platform".to_string(),
    ))
}

/// Pin the process to `cores` and confirm the restriction took effect.
///
/// The effective set may be a subset of the request when cgroups further
/// restrict the process; that still keeps execution inside the assigned
/// cores. An effective set escaping the request is an error. Platforms
/// without read-back log a warning and trust the pin call.
pub fn pin_and_verify(cores: &[usize]) -> Result<Vec<usize>> {
    pin_to_cores(cores)?;

    match current_affinity() {
        Ok(effective) => {
            if effective.is_empty() || !effective.iter().all(|core| cores.contains(core)) {
                return Err(AppError::Worker(format!(
                    "affinity verification failed: requested {:?}, effective {:?}",
                    cores, effective
                )));
            }
            info!("Effective affinity confirmed: {:?}", effective);
            Ok(effective)
        }
        Err(e) => {
            warn!("Affinity read-back unavailable: {}", e);
            Ok(cores.to_vec())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_core_set_is_rejected() {
        assert!(pin_to_cores(&[]).is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn repinning_to_current_set_is_idempotent() {
        let initial = current_affinity().unwrap();
        if initial.is_empty() {
            return;
        }

        pin_to_cores(&initial).unwrap();
        let after = current_affinity().unwrap();
        assert_eq!(after, initial);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn verification_accepts_current_set() {
        let initial = current_affinity().unwrap();
        if initial.is_empty() {
            return;
        }

        let effective = pin_and_verify(&initial).unwrap();
        assert!(!effective.is_empty());
        assert!(effective.iter().all(|core| initial.contains(core)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn out_of_range_core_is_rejected() {
        let err = pin_to_cores(&[libc::CPU_SETSIZE as usize + 10]).unwrap_err();
        assert!(matches!(err, AppError::Worker(_)));
    }
}
