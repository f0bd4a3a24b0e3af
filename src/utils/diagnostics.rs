//! Startup diagnostics

use std::time::Duration;
use sysinfo::System;
use tracing::info;

use crate::guard::{GuardReport, StepStatus};
use crate::platform::Capabilities;

/// Host facts logged at startup
#[derive(Debug, Clone)]
pub struct SystemInfo {
    pub os_name: String,
    pub os_version: String,
    pub kernel_version: String,
    pub hostname: String,
    pub cpu_count: usize,
    /// Total system memory in megabytes
    pub total_memory_mb: u64,
    /// Memory currently available, in megabytes
    pub available_memory_mb: u64,
}

impl SystemInfo {
    /// Gather system information
    pub fn gather() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu();

        Self {
            os_name: System::name().unwrap_or_else(|| "Unknown".to_string()),
            os_version: System::os_version().unwrap_or_else(|| "Unknown".to_string()),
            kernel_version: System::kernel_version().unwrap_or_else(|| "Unknown".to_string()),
            hostname: System::host_name().unwrap_or_else(|| "Unknown".to_string()),
            cpu_count: sys.cpus().len(),
            total_memory_mb: sys.total_memory() / 1024 / 1024,
            available_memory_mb: sys.available_memory() / 1024 / 1024,
        }
    }

    pub fn log(&self) {
        info!("=== System Information ===");
        info!("  OS: {} {}", self.os_name, self.os_version);
        info!("  Kernel: {}", self.kernel_version);
        info!("  Hostname: {}", self.hostname);
        info!("  CPUs: {}", self.cpu_count);
        info!(
            "  Memory: {} MB ({} MB available)",
            self.total_memory_mb, self.available_memory_mb
        );
    }
}

/// `HH:MM:SS`
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Log host facts, capabilities and what the startup guard did
pub fn log_startup_diagnostics(capabilities: &Capabilities, report: &GuardReport) {
    SystemInfo::gather().log();
    capabilities.log();

    info!("=== Startup Guard ===");
    for (step, status) in &report.steps {
        match status {
            StepStatus::Done => info!("  {}: done", step),
            StepStatus::Skipped(why) => info!("  {}: skipped ({})", step, why),
            // Details were logged at debug level when the step ran
            StepStatus::Failed(_) => info!("  {}: unavailable", step),
        }
    }
    if !report.mechanisms.is_empty() {
        let names: Vec<&str> = report.mechanisms.iter().map(|m| m.name.as_str()).collect();
        info!("  Security mechanisms: {}", names.join(", "));
    }
}
