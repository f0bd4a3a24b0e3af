//! Build script for lamco-login-frontend
//!
//! Stamps the binary with build date and commit for the startup banner.

use std::process::Command;

fn capture(program: &str, args: &[&str], fallback: &str) -> String {
    Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .unwrap_or_else(|| fallback.to_string())
}

fn main() {
    println!(
        "cargo:rustc-env=BUILD_DATE={}",
        capture("date", &["+%Y-%m-%d"], "unknown")
    );
    println!(
        "cargo:rustc-env=GIT_HASH={}",
        capture("git", &["rev-parse", "--short", "HEAD"], "unknown")
    );

    println!("cargo:rerun-if-changed=.git/HEAD");
}
