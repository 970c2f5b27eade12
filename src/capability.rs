//! Host capability query
//!
//! Side-effect free; hosts call it to decide whether to offer recording at
//! all before ever touching the controller.

use tracing::debug;

use crate::config::CaptureConfig;

/// What the host machine offers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    pub cpu_cores: usize,
    /// Major OS release, when it could be determined
    pub os_version: Option<u32>,
}

impl HostInfo {
    pub fn detect() -> Self {
        let info = Self {
            cpu_cores: num_cpus::get(),
            os_version: os_major_version(),
        };
        debug!("Detected host: {:?}", info);
        info
    }

    /// Whether this host can run the capture path under `config`
    pub fn supports(&self, config: &CaptureConfig) -> bool {
        if self.cpu_cores < config.min_cpu_cores {
            return false;
        }
        if config.min_os_version == 0 {
            return true;
        }
        matches!(self.os_version, Some(v) if v >= config.min_os_version)
    }
}

/// Detect the current host and check it against `config`
pub fn is_supported(config: &CaptureConfig) -> bool {
    HostInfo::detect().supports(config)
}

#[cfg(unix)]
fn os_major_version() -> Option<u32> {
    let mut uts: libc::utsname = unsafe { std::mem::zeroed() };
    if unsafe { libc::uname(&mut uts) } != 0 {
        return None;
    }
    let release = unsafe { std::ffi::CStr::from_ptr(uts.release.as_ptr()) };
    parse_major(release.to_str().ok()?)
}

#[cfg(not(unix))]
fn os_major_version() -> Option<u32> {
    None
}

fn parse_major(release: &str) -> Option<u32> {
    release
        .split(|c: char| !c.is_ascii_digit())
        .next()
        .and_then(|major| major.parse().ok())
}
