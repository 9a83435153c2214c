// Process resource readings for loop statistics

/// Resident set size of this process in megabytes, where the OS exposes it
#[cfg(target_os = "linux")]
pub fn resident_memory_mb() -> Option<f64> {
    let process = procfs::process::Process::myself().ok()?;
    let status = process.status().ok()?;
    status.vmrss.map(|kb| kb as f64 / 1024.0)
}

#[cfg(not(target_os = "linux"))]
pub fn resident_memory_mb() -> Option<f64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resident_memory_reading() {
        let reading = resident_memory_mb();

        #[cfg(target_os = "linux")]
        assert!(reading.map(|mb| mb > 0.0).unwrap_or(false));

        #[cfg(not(target_os = "linux"))]
        assert!(reading.is_none());
    }
}
