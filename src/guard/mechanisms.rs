//! Security mechanism plugin enumeration
//!
//! The mechanism file lists one plugin per line:
//!
//! ```text
//! # name        oid                      library                   options
//! kerberos_v5   1.2.840.113554.1.2.2     /usr/lib/libgssapi_krb5.so.2  [opt]
//! ```
//!
//! Reading it at startup validates it and maps every plugin library. The
//! parsed list and the library handles are kept for later, when neither
//! the file nor the plugins may be reachable any more.

use libloading::Library;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::error::{GuardError, Result};

/// One configured mechanism plugin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mechanism {
    pub name: String,
    pub oid: String,
    pub library: PathBuf,
    pub options: Vec<String>,
}

/// Enumerated mechanisms and the plugin libraries mapped for them.
///
/// Dropping the set unmaps the libraries.
#[derive(Debug, Clone, Default)]
pub struct MechanismSet {
    pub mechanisms: Vec<Mechanism>,
    libraries: Vec<Arc<Library>>,
}

impl MechanismSet {
    /// A set with nothing mapped
    pub fn new(mechanisms: Vec<Mechanism>) -> Self {
        Self {
            mechanisms,
            libraries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.mechanisms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mechanisms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mechanism> {
        self.mechanisms.iter()
    }

    /// Number of plugin libraries held mapped
    pub fn loaded(&self) -> usize {
        self.libraries.len()
    }
}

/// Parse mechanism file text; malformed lines are skipped
pub fn parse_mech_file(text: &str) -> Vec<Mechanism> {
    text.lines()
        .enumerate()
        .filter_map(|(idx, line)| {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                return None;
            }

            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next(), fields.next()) {
                (Some(name), Some(oid), Some(library)) if is_oid(oid) => Some(Mechanism {
                    name: name.to_string(),
                    oid: oid.to_string(),
                    library: PathBuf::from(library),
                    options: fields.map(str::to_string).collect(),
                }),
                _ => {
                    debug!("mech file line {}: skipping malformed entry", idx + 1);
                    None
                }
            }
        })
        .collect()
}

/// Read the mechanism file, check that absolute plugin paths exist and
/// map each plugin.
///
/// A plugin the dynamic linker cannot load is left out of the mapped set
/// but stays enumerated.
pub fn load_mechanisms(path: &Path) -> Result<MechanismSet> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| GuardError::Mechanisms(format!("{}: {}", path.display(), e)))?;

    let mechanisms = parse_mech_file(&text);

    for mech in &mechanisms {
        if mech.library.is_absolute() && !mech.library.exists() {
            return Err(GuardError::Mechanisms(format!(
                "plugin for {} not found: {}",
                mech.name,
                mech.library.display()
            )));
        }
    }

    let mut set = MechanismSet::new(Vec::new());
    for mech in mechanisms {
        match map_plugin(&mech.library) {
            Ok(library) => set.libraries.push(Arc::new(library)),
            Err(e) => debug!("{}: plugin {} not mapped: {}", mech.name, mech.library.display(), e),
        }
        set.mechanisms.push(mech);
    }

    Ok(set)
}

/// Relative names go through the dynamic linker search path
#[allow(unsafe_code)]
fn map_plugin(library: &Path) -> std::result::Result<Library, libloading::Error> {
    // Plugin initialisers run here, as they would on first use
    unsafe { Library::new(library) }
}

fn is_oid(s: &str) -> bool {
    !s.is_empty() && s.split('.').all(|arc| !arc.is_empty() && arc.bytes().all(|b| b.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_mech_file() {
        let text = "\
# GSS mechanisms
kerberos_v5 1.2.840.113554.1.2.2 libgssapi_krb5.so.2 kernel
spnego      1.3.6.1.5.5.2        libgssapi_spnego.so
broken      not-an-oid           libbroken.so
lonely
";
        let mechs = parse_mech_file(text);
        assert_eq!(mechs.len(), 2);
        assert_eq!(mechs[0].name, "kerberos_v5");
        assert_eq!(mechs[0].options, vec!["kernel"]);
        assert_eq!(mechs[1].library, PathBuf::from("libgssapi_spnego.so"));
    }

    #[test]
    fn test_missing_file() {
        let err = load_mechanisms(Path::new("/nonexistent/gss/mech")).unwrap_err();
        assert!(matches!(err, GuardError::Mechanisms(_)));
    }

    #[test]
    fn test_missing_absolute_plugin() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "krb5 1.2.3 /nonexistent/libgss.so").unwrap();
        assert!(load_mechanisms(file.path()).is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "krb5 1.2.3 libgss-missing.so").unwrap();
        let set = load_mechanisms(file.path()).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.loaded(), 0);
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn test_plugins_are_mapped() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "libm 1.3.6.1.4.1.99999 libm.so.6").unwrap();
        writeln!(file, "ghost 1.3.6.1.4.1.99998 libghost-missing.so").unwrap();

        let set = load_mechanisms(file.path()).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.loaded(), 1);
        assert_eq!(set.clone().loaded(), 1);
    }
}
