//! User-Friendly Error Formatting
//!
//! Turns startup failures into an operator message with troubleshooting
//! hints for the common cases.

use std::fmt::Write;

use crate::access::AccessError;
use crate::daemon::DaemonError;
use crate::session::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    Bind,
    Config,
    AccessRules,
    LoginClass,
    Exec,
    Generic,
}

fn categorize(error: &anyhow::Error) -> Category {
    for cause in error.chain() {
        if let Some(e) = cause.downcast_ref::<DaemonError>() {
            match e {
                DaemonError::Bind { .. } => return Category::Bind,
                DaemonError::InvalidStartups { .. } => return Category::Config,
                _ => {}
            }
        }
        if cause.downcast_ref::<AccessError>().is_some() {
            return Category::AccessRules;
        }
        if let Some(e) = cause.downcast_ref::<SessionError>() {
            match e {
                SessionError::LoginClassDatabase { .. } | SessionError::LoginClass { .. } => {
                    return Category::LoginClass
                }
                SessionError::Exec { .. } => return Category::Exec,
                _ => {}
            }
        }
    }

    let msg = error.to_string();
    if msg.contains("bind") || msg.contains("address") {
        Category::Bind
    } else if msg.contains("config") {
        Category::Config
    } else {
        Category::Generic
    }
}

/// Format error for operator consumption
pub fn format_user_error(error: &anyhow::Error) -> String {
    let mut output = String::new();

    writeln!(output).ok();
    writeln!(output, "╔════════════════════════════════════════════════════════════╗").ok();
    writeln!(output, "║                     ERROR                                  ║").ok();
    writeln!(output, "╚════════════════════════════════════════════════════════════╝").ok();
    writeln!(output).ok();

    match categorize(error) {
        Category::Bind => format_bind_error(&mut output),
        Category::Config => format_config_error(&mut output),
        Category::AccessRules => format_access_error(&mut output),
        Category::LoginClass => format_login_class_error(&mut output),
        Category::Exec => format_exec_error(&mut output),
        Category::Generic => format_generic_error(&mut output, &error.to_string()),
    }

    writeln!(output).ok();
    writeln!(output, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━").ok();
    writeln!(output, "Technical Details:").ok();
    writeln!(output).ok();
    writeln!(output, "{:#}", error).ok();
    writeln!(output).ok();
    writeln!(output, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━").ok();
    writeln!(output, "Need Help?").ok();
    writeln!(output, "  - Run with --verbose for detailed logs: lamco-login-frontend -vvv").ok();
    writeln!(output, "  - Validate configuration: lamco-login-frontend --check-config").ok();

    output
}

fn format_bind_error(output: &mut String) {
    writeln!(output, "Network Binding Error").ok();
    writeln!(output).ok();
    writeln!(output, "Could not listen for incoming connections.").ok();
    writeln!(output).ok();
    writeln!(output, "Common Causes:").ok();
    writeln!(output).ok();
    writeln!(output, "  1. Port already in use").ok();
    writeln!(output, "     → Check: sudo ss -tlnp | grep ':22 '").ok();
    writeln!(output, "     → Stop the other daemon or pick another port with --listen").ok();
    writeln!(output).ok();
    writeln!(output, "  2. Permission denied (port < 1024)").ok();
    writeln!(output, "     → Run as root or grant CAP_NET_BIND_SERVICE").ok();
    writeln!(output).ok();
    writeln!(output, "  3. Invalid listen address").ok();
    writeln!(output, "     → Should be 'IP:PORT', like '0.0.0.0:22' or '[::]:22'").ok();
}

fn format_config_error(output: &mut String) {
    writeln!(output, "Configuration Error").ok();
    writeln!(output).ok();
    writeln!(output, "Problem with the configuration file.").ok();
    writeln!(output).ok();
    writeln!(output, "Common Causes:").ok();
    writeln!(output).ok();
    writeln!(output, "  1. Invalid TOML syntax").ok();
    writeln!(output, "     → Check for typos, missing quotes, etc.").ok();
    writeln!(output).ok();
    writeln!(output, "  2. Bad value").ok();
    writeln!(output, "     → max_startups is 'start:rate:full' (e.g. '10:30:100')").ok();
    writeln!(output, "     → startups_policy is 'drop' or 'delay'").ok();
}

fn format_access_error(output: &mut String) {
    writeln!(output, "Access Rule Error").ok();
    writeln!(output).ok();
    writeln!(output, "The host access rules could not be loaded.").ok();
    writeln!(output).ok();
    writeln!(output, "Common Causes:").ok();
    writeln!(output).ok();
    writeln!(output, "  1. Malformed pattern").ok();
    writeln!(output, "     → Supported: ALL, 10.0.0.1, 192.168., 10.0.0.0/8,").ok();
    writeln!(output, "       10.0.0.0/255.0.0.0, [2001:db8::]/32, ... EXCEPT ...").ok();
    writeln!(output, "     → KNOWN, UNKNOWN and PARANOID need name lookups and are rejected").ok();
    writeln!(output).ok();
    writeln!(output, "  2. Rule file unreadable").ok();
    writeln!(output, "     → Check access.allow_file / access.deny_file paths").ok();
}

fn format_login_class_error(output: &mut String) {
    writeln!(output, "Login Class Error").ok();
    writeln!(output).ok();
    writeln!(output, "The login class database could not be used.").ok();
    writeln!(output).ok();
    writeln!(output, "  → Check login_class.login_conf points to a readable file").ok();
    writeln!(output, "  → Records look like 'name|alias:cap=value:...'").ok();
}

fn format_exec_error(output: &mut String) {
    writeln!(output, "Session Start Error").ok();
    writeln!(output).ok();
    writeln!(output, "The user's shell could not be executed.").ok();
    writeln!(output).ok();
    writeln!(output, "  → Check the shell in the user's passwd entry exists and is executable").ok();
}

fn format_generic_error(output: &mut String, error: &str) {
    writeln!(output, "Daemon Error").ok();
    writeln!(output).ok();
    writeln!(output, "Error: {}", error).ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_formatting() {
        let error = anyhow::Error::new(DaemonError::Bind {
            addr: "0.0.0.0:22".parse().unwrap(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        });
        let formatted = format_user_error(&error);
        assert!(formatted.contains("ERROR"));
        assert!(formatted.contains("Network Binding Error"));
    }

    #[test]
    fn test_access_error_through_context() {
        let error = anyhow::Error::new(AccessError::EmptyPatternList).context("loading rules");
        assert!(format_user_error(&error).contains("Access Rule Error"));
    }

    #[test]
    fn test_generic_error() {
        let formatted = format_user_error(&anyhow::anyhow!("something odd"));
        assert!(formatted.contains("Daemon Error"));
        assert!(formatted.contains("something odd"));
    }
}
