//! SX-012: Secret decryption for encrypted override files.

use super::local::exec_command;
use std::path::Path;

/// Turns an encrypted file into plaintext using credentials from a profile.
pub trait SecretDecryptor {
    fn decrypt(&self, path: &Path, secret_profile: &str) -> Result<String, String>;
}

/// Decrypts through the `sops` binary. The profile is handed to sops (and
/// through it to the KMS client) as `AWS_PROFILE`.
pub struct SopsDecryptor {
    program: String,
}

impl Default for SopsDecryptor {
    fn default() -> Self {
        Self::new("sops")
    }
}

impl SopsDecryptor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl SecretDecryptor for SopsDecryptor {
    fn decrypt(&self, path: &Path, secret_profile: &str) -> Result<String, String> {
        let path_str = path.to_string_lossy();
        let out = exec_command(
            &self.program,
            &["--decrypt", path_str.as_ref()],
            &[("AWS_PROFILE", secret_profile)],
        )?;
        if !out.success() {
            return Err(format!(
                "cannot decrypt {}: {}",
                path.display(),
                out.stderr.trim()
            ));
        }
        Ok(out.stdout)
    }
}

/// Refuses every request. Used when a run must not touch secrets.
pub struct NoDecryptor;

impl SecretDecryptor for NoDecryptor {
    fn decrypt(&self, path: &Path, _secret_profile: &str) -> Result<String, String> {
        Err(format!(
            "{} is encrypted but no decryptor is configured",
            path.display()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sx012_missing_binary() {
        let d = SopsDecryptor::new("stax-no-such-sops");
        let err = d.decrypt(Path::new("/tmp/x.env"), "prod").unwrap_err();
        assert!(err.contains("failed to spawn"));
    }

    #[test]
    fn test_sx012_passes_path() {
        let d = SopsDecryptor::new("echo");
        let out = d.decrypt(Path::new("/cfg/secrets.env"), "sops-prod").unwrap();
        assert_eq!(out.trim(), "--decrypt /cfg/secrets.env");
    }

    #[test]
    fn test_sx012_failure_is_error() {
        let d = SopsDecryptor::new("false");
        let err = d.decrypt(Path::new("/cfg/secrets.env"), "p").unwrap_err();
        assert!(err.starts_with("cannot decrypt /cfg/secrets.env"));
    }

    #[test]
    fn test_sx012_no_decryptor() {
        let err = NoDecryptor
            .decrypt(Path::new("secrets.env"), "p")
            .unwrap_err();
        assert!(err.contains("no decryptor"));
    }
}
