use sysinfo::System;

/// Host facts consulted for hardware-requirement warnings.
pub trait HostProbe: Send + Sync {
    /// Currently available physical memory in bytes.
    fn available_memory(&self) -> Option<u64>;

    /// OS version string, e.g. `"14.2.1"` or `"22.04"`.
    fn os_version(&self) -> Option<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SysinfoHost;

impl HostProbe for SysinfoHost {
    fn available_memory(&self) -> Option<u64> {
        let mut system = System::new();
        system.refresh_memory();
        match system.available_memory() {
            0 => None,
            bytes => Some(bytes),
        }
    }

    fn os_version(&self) -> Option<String> {
        System::os_version()
    }
}
