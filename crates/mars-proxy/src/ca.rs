//! Root CA loading for the MITM proxy.
//!
//! The root certificate and key are provisioned out of band (PEM files); the
//! proxy only loads them and signs per-host leaf certificates on the fly.

use std::fs;
use std::path::{Path, PathBuf};

use hudsucker::certificate_authority::RcgenAuthority;
use hudsucker::rcgen::{Issuer, KeyPair};
use hudsucker::rustls::crypto::aws_lc_rs::default_provider;

use crate::error::CaError;

/// CA certificate and key file names.
const CA_CERT_FILENAME: &str = "mars-ca.crt";
const CA_KEY_FILENAME: &str = "mars-ca.key";

/// Leaf certificates kept in the authority's cache.
const LEAF_CACHE_SIZE: u64 = 1000;

/// Locates and loads the root CA for the MITM proxy.
#[derive(Debug, Clone)]
pub struct CaManager {
    cert_path: PathBuf,
    key_path: PathBuf,
}

impl CaManager {
    /// Uses `mars-ca.crt` and `mars-ca.key` inside `ca_dir`.
    pub fn new(ca_dir: impl AsRef<Path>) -> Self {
        let ca_dir = ca_dir.as_ref();
        Self::from_files(ca_dir.join(CA_CERT_FILENAME), ca_dir.join(CA_KEY_FILENAME))
    }

    /// Uses explicit certificate and key paths.
    pub fn from_files(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        }
    }

    /// Creates a CA manager using the default Mars data directory.
    pub fn with_default_dir() -> Result<Self, CaError> {
        let project_dirs = directories::ProjectDirs::from("", "mars", "mars")
            .ok_or_else(|| CaError::Parse("Failed to get project dirs".into()))?;

        Ok(Self::new(project_dirs.data_dir().join("ca")))
    }

    /// Returns the path to the CA certificate file.
    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }

    /// Returns the path to the CA private key file.
    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    /// Checks if both CA files exist.
    pub fn ca_exists(&self) -> bool {
        self.cert_path.exists() && self.key_path.exists()
    }

    /// Loads the CA certificate and creates a hudsucker authority.
    pub fn load_authority(&self) -> Result<RcgenAuthority, CaError> {
        if !self.ca_exists() {
            return Err(CaError::Missing {
                cert: self.cert_path.clone(),
                key: self.key_path.clone(),
            });
        }

        let cert_pem = fs::read_to_string(&self.cert_path)?;
        let key_pem = fs::read_to_string(&self.key_path)?;

        let key_pair = KeyPair::from_pem(&key_pem).map_err(|e| CaError::Parse(e.to_string()))?;
        let issuer = Issuer::from_ca_cert_pem(&cert_pem, key_pair)
            .map_err(|e| CaError::Parse(e.to_string()))?;

        tracing::debug!("Loaded CA certificate from {:?}", self.cert_path);
        Ok(RcgenAuthority::new(issuer, LEAF_CACHE_SIZE, default_provider()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use hudsucker::rcgen::{
        BasicConstraints, CertificateParams, IsCa, KeyUsagePurpose,
    };
    use tempfile::TempDir;

    /// Writes a freshly generated root CA into `dir`.
    pub(crate) fn write_test_ca(dir: &Path) -> CaManager {
        let manager = CaManager::new(dir);
        fs::create_dir_all(dir).unwrap();

        let key_pair = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(vec!["Mars Test CA".to_string()]).unwrap();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        let cert = params.self_signed(&key_pair).unwrap();

        fs::write(manager.cert_path(), cert.pem()).unwrap();
        fs::write(manager.key_path(), key_pair.serialize_pem()).unwrap();
        manager
    }

    #[test]
    fn ca_manager_paths() {
        let manager = CaManager::new("/tmp/test-ca");
        assert_eq!(manager.cert_path(), Path::new("/tmp/test-ca/mars-ca.crt"));
        assert_eq!(manager.key_path(), Path::new("/tmp/test-ca/mars-ca.key"));
    }

    #[test]
    fn missing_ca_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let manager = CaManager::new(temp_dir.path().join("ca"));

        assert!(!manager.ca_exists());
        assert!(matches!(
            manager.load_authority(),
            Err(CaError::Missing { .. })
        ));
    }

    #[test]
    fn garbage_pem_fails_to_parse() {
        let temp_dir = TempDir::new().unwrap();
        let manager = CaManager::from_files(
            temp_dir.path().join("ca.crt"),
            temp_dir.path().join("ca.key"),
        );
        fs::write(manager.cert_path(), "not a certificate").unwrap();
        fs::write(manager.key_path(), "not a key").unwrap();

        assert!(matches!(manager.load_authority(), Err(CaError::Parse(_))));
    }

    #[test]
    fn loads_generated_ca() {
        let temp_dir = TempDir::new().unwrap();
        let manager = write_test_ca(&temp_dir.path().join("ca"));

        assert!(manager.ca_exists());
        assert!(manager.load_authority().is_ok());
    }
}
