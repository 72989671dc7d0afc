//! Free-memory probe. The default cache budget is 70% of the memory that is
//! actually free at startup; on operating systems the probe does not
//! recognize, it reports `UnsupportedPlatform` and the caller falls back to
//! a fixed budget.

use crate::errors::GatewayError;

/// Fraction of free memory granted to the cache by default.
pub const DEFAULT_FRACTION: f64 = 0.70;

/// Default cache budget: 70% of currently free system memory.
pub fn default_cache_budget() -> Result<usize, GatewayError> {
    let free = free_memory_bytes()?;
    Ok((free as f64 * DEFAULT_FRACTION) as usize)
}

/// Bytes of free (reclaimable) system memory.
#[cfg(target_os = "linux")]
pub fn free_memory_bytes() -> Result<u64, GatewayError> {
    let meminfo = std::fs::read_to_string("/proc/meminfo")?;
    parse_meminfo(&meminfo).ok_or_else(|| {
        GatewayError::UnsupportedPlatform("linux without MemAvailable in /proc/meminfo".into())
    })
}

/// Parses `MemAvailable` (falling back to `MemFree`) out of /proc/meminfo.
/// Values are reported in kB.
#[cfg(target_os = "linux")]
fn parse_meminfo(meminfo: &str) -> Option<u64> {
    let field = |name: &str| {
        meminfo.lines().find_map(|line| {
            let rest = line.strip_prefix(name)?;
            rest.trim()
                .split_whitespace()
                .next()?
                .parse::<u64>()
                .ok()
                .map(|kb| kb * 1024)
        })
    };
    field("MemAvailable:").or_else(|| field("MemFree:"))
}

#[cfg(target_os = "macos")]
pub fn free_memory_bytes() -> Result<u64, GatewayError> {
    // vm_stat reports free+inactive pages; the page size is in its header.
    let output = std::process::Command::new("vm_stat").output()?;
    let text = String::from_utf8_lossy(&output.stdout);
    parse_vm_stat(&text)
        .ok_or_else(|| GatewayError::UnsupportedPlatform("macos with unparseable vm_stat".into()))
}

#[cfg(target_os = "macos")]
fn parse_vm_stat(text: &str) -> Option<u64> {
    let page_size: u64 = text
        .lines()
        .next()?
        .split("page size of ")
        .nth(1)?
        .split_whitespace()
        .next()?
        .parse()
        .ok()?;
    let pages = |name: &str| {
        text.lines().find_map(|line| {
            let rest = line.strip_prefix(name)?;
            rest.trim()
                .trim_end_matches('.')
                .parse::<u64>()
                .ok()
        })
    };
    let free = pages("Pages free:")?;
    let inactive = pages("Pages inactive:").unwrap_or(0);
    Some((free + inactive) * page_size)
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn free_memory_bytes() -> Result<u64, GatewayError> {
    Err(GatewayError::UnsupportedPlatform(
        std::env::consts::OS.to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_os = "linux")]
    fn test_parse_meminfo_prefers_mem_available() {
        let sample = "MemTotal:       16315016 kB\nMemFree:         1127524 kB\nMemAvailable:    8234120 kB\n";
        assert_eq!(parse_meminfo(sample), Some(8234120 * 1024));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_parse_meminfo_falls_back_to_mem_free() {
        let sample = "MemTotal:       16315016 kB\nMemFree:         1127524 kB\n";
        assert_eq!(parse_meminfo(sample), Some(1127524 * 1024));
    }

    #[test]
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    fn test_probe_reports_nonzero() {
        let free = free_memory_bytes().expect("probe should work on CI hosts");
        assert!(free > 0);
        let budget = default_cache_budget().unwrap();
        assert!(budget < free as usize);
    }
}
