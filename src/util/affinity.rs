//! Worker thread pinning and optional NUMA memory policy.
//!
//! Linux:
//!   - CPU pin: pthread_setaffinity_np on the current thread.
//!   - NUMA mem policy: set_mempolicy(MPOL_BIND, nodemask), best-effort.
//! macOS:
//!   - Affinity tag: thread_policy_set(THREAD_AFFINITY_POLICY).
//!
//! Everything here is advisory. A failed pin leaves the worker running
//! wherever the OS puts it; the pool only logs it.

/// Placement of one worker thread.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PinConfig {
    /// Logical core to pin the worker to.
    pub core_id: Option<usize>,
    /// NUMA node for memory binding (Linux only).
    pub numa_node: Option<u16>,
    /// Whether to apply MPOL_BIND when `numa_node` is set (Linux only).
    pub mem_bind: bool,
    /// Mach thread affinity tag (macOS only).
    pub mac_affinity_tag: Option<i32>,
}

impl PinConfig {
    /// Pin to a single core and nothing else.
    pub fn core(core_id: usize) -> Self {
        Self {
            core_id: Some(core_id),
            ..Self::default()
        }
    }

    /// True when the config asks for nothing.
    pub fn is_empty(&self) -> bool {
        self.core_id.is_none() && self.numa_node.is_none() && self.mac_affinity_tag.is_none()
    }
}

/// Apply `cfg` to the calling thread. Returns false if any requested policy
/// was rejected by the OS.
pub fn pin_current_thread(cfg: &PinConfig) -> bool {
    let mut ok = true;

    #[cfg(target_os = "linux")]
    {
        use core::mem::{size_of, zeroed};
        unsafe {
            if let Some(core) = cfg.core_id {
                if core >= libc::CPU_SETSIZE as usize {
                    ok = false;
                } else {
                    let mut set: libc::cpu_set_t = zeroed();
                    libc::CPU_ZERO(&mut set);
                    libc::CPU_SET(core, &mut set);
                    let r = libc::pthread_setaffinity_np(
                        libc::pthread_self(),
                        size_of::<libc::cpu_set_t>(),
                        &set as *const libc::cpu_set_t,
                    );
                    ok &= r == 0;
                }
            }
            if let (Some(node), true) = (cfg.numa_node, cfg.mem_bind) {
                // set_mempolicy(MPOL_BIND=2, nodemask, maxnode)
                const MPOL_BIND: libc::c_long = 2;
                if (node as usize) < 64 {
                    let mask: u64 = 1u64 << (node as u32);
                    let r = libc::syscall(
                        libc::SYS_set_mempolicy,
                        MPOL_BIND,
                        &mask as *const u64,
                        64 as libc::c_long,
                    );
                    ok &= r == 0;
                } else {
                    ok = false;
                }
            }
        }
    }

    #[cfg(target_os = "macos")]
    {
        // Mach only knows affinity tags; core pinning is not available.
        unsafe {
            if let Some(tag) = cfg.mac_affinity_tag {
                type thread_t = libc::mach_port_t;
                #[repr(C)]
                struct thread_affinity_policy_data_t {
                    affinity_tag: libc::integer_t,
                }
                unsafe extern "C" {
                    fn mach_thread_self() -> thread_t;
                    fn thread_policy_set(
                        thread: thread_t,
                        flavor: libc::c_int,
                        policy_info: *const libc::integer_t,
                        count: libc::mach_msg_type_number_t,
                    ) -> libc::kern_return_t;
                }
                const THREAD_AFFINITY_POLICY: libc::c_int = 4;
                let pol = thread_affinity_policy_data_t {
                    affinity_tag: tag as libc::integer_t,
                };
                let cnt = (core::mem::size_of::<thread_affinity_policy_data_t>()
                    / core::mem::size_of::<libc::integer_t>())
                    as libc::mach_msg_type_number_t;
                let kr = thread_policy_set(
                    mach_thread_self(),
                    THREAD_AFFINITY_POLICY,
                    (&pol as *const thread_affinity_policy_data_t) as *const libc::integer_t,
                    cnt,
                );
                ok &= kr == 0;
            }
        }
    }

    let _ = cfg;
    ok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_is_a_noop() {
        let cfg = PinConfig::default();
        assert!(cfg.is_empty());
        assert!(pin_current_thread(&cfg));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn out_of_range_core_is_rejected() {
        std::thread::spawn(|| {
            assert!(!pin_current_thread(&PinConfig::core(usize::MAX)));
        })
        .join()
        .unwrap();
    }
}
