//! Thread-to-core pinning for processor threads.
//!
//! Busy-spin waiting only pays off when each processor owns a core, so the
//! topology can pin every processor thread it spawns.

use crate::error::Result;

/// Pin the calling thread to `cpu_id`.
#[cfg(target_os = "linux")]
pub fn pin_to_cpu(cpu_id: usize) -> Result<()> {
    use nix::sched::{ sched_setaffinity, CpuSet };
    use nix::unistd::Pid;

    let mut cpu_set = CpuSet::new();
    cpu_set.set(cpu_id)?;
    sched_setaffinity(Pid::from_raw(0), &cpu_set)?;
    Ok(())
}

/// Tag the calling thread with an affinity hint. macOS has no hard pinning,
/// threads sharing a tag are only scheduled close together.
#[cfg(target_os = "macos")]
pub fn pin_to_cpu(cpu_id: usize) -> Result<()> {
    use libc::{ pthread_mach_thread_np, pthread_self, thread_affinity_policy_data_t, thread_policy_set };
    use libc::{ THREAD_AFFINITY_POLICY, THREAD_AFFINITY_POLICY_COUNT };

    unsafe {
        let mut policy = thread_affinity_policy_data_t {
            affinity_tag: cpu_id as i32,
        };

        let result = thread_policy_set(
            pthread_mach_thread_np(pthread_self()),
            THREAD_AFFINITY_POLICY as u32,
            &mut policy as *mut _ as *mut i32,
            THREAD_AFFINITY_POLICY_COUNT
        );

        if result != 0 {
            return Err(crate::error::RinglaneError::system_resource("Failed to set CPU affinity"));
        }
    }
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn pin_to_cpu(_cpu_id: usize) -> Result<()> {
    Ok(())
}
