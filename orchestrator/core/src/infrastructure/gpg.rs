// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Detached-signature verification for package manifests (spec.md §4.10).
//! When a registry's `RegistryConfig` carries `gpgcheck=true` and a
//! `gpgkey=file://…`, the Registry Service writes the manifest's signature
//! to a temp file, imports the referenced public key into a scratch
//! keyring, and shells out to the system `gpg` binary for a detached
//! verification — there is no mature pure-Rust OpenPGP verifier in the
//! teacher's dependency stack, so this is the one component in the system
//! that wraps blocking CLI work rather than a native crate, matching
//! spec.md §5's carve-out ("OS threads only for blocking container-runtime
//! CLI invocations" extends naturally to the other process-shelling case
//! this system has).

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum SignatureVerificationError {
    #[error("gpg key import failed: {0}")]
    KeyImport(String),
    #[error("signature verification failed: {0}")]
    Verification(String),
    #[error("I/O error preparing verification: {0}")]
    Io(String),
}

pub struct GpgVerifier {
    keyring_dir: TempDir,
}

impl GpgVerifier {
    pub fn new() -> Result<Self, SignatureVerificationError> {
        let keyring_dir = tempfile::tempdir().map_err(|e| SignatureVerificationError::Io(e.to_string()))?;
        Ok(Self { keyring_dir })
    }

    /// Import the public key at `gpgkey_path` (a `file://` URL's local
    /// path) into this verifier's scratch keyring.
    pub async fn import_key(&self, gpgkey_path: &Path) -> Result<(), SignatureVerificationError> {
        let output = Command::new("gpg")
            .arg("--homedir")
            .arg(self.keyring_dir.path())
            .arg("--import")
            .arg(gpgkey_path)
            .output()
            .await
            .map_err(|e| SignatureVerificationError::Io(e.to_string()))?;
        if !output.status.success() {
            return Err(SignatureVerificationError::KeyImport(String::from_utf8_lossy(&output.stderr).to_string()));
        }
        Ok(())
    }

    /// Verify `signature` (the manifest's detached signature bytes)
    /// against `manifest_bytes`.
    pub async fn verify(&self, manifest_bytes: &[u8], signature: &[u8]) -> Result<(), SignatureVerificationError> {
        let manifest_path = self.write_temp("manifest.json", manifest_bytes).await?;
        let sig_path = self.write_temp("manifest.json.sig", signature).await?;

        let output = Command::new("gpg")
            .arg("--homedir")
            .arg(self.keyring_dir.path())
            .arg("--verify")
            .arg(&sig_path)
            .arg(&manifest_path)
            .output()
            .await
            .map_err(|e| SignatureVerificationError::Io(e.to_string()))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(SignatureVerificationError::Verification(String::from_utf8_lossy(&output.stderr).to_string()))
        }
    }

    async fn write_temp(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, SignatureVerificationError> {
        let path = self.keyring_dir.path().join(name);
        tokio::fs::write(&path, bytes).await.map_err(|e| SignatureVerificationError::Io(e.to_string()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn run_gpg(homedir: &Path, args: &[&str]) -> std::process::Output {
        StdCommand::new("gpg")
            .arg("--homedir")
            .arg(homedir)
            .args(args)
            .output()
            .expect("gpg binary must be on PATH to exercise signature verification")
    }

    fn generate_signing_key(homedir: &Path) {
        let output = run_gpg(
            homedir,
            &["--batch", "--passphrase", "", "--quick-generate-key", "Test Key <test@example.com>", "default", "default", "never"],
        );
        assert!(output.status.success(), "key generation failed: {}", String::from_utf8_lossy(&output.stderr));
    }

    fn export_public_key(homedir: &Path) -> Vec<u8> {
        let output = run_gpg(homedir, &["--armor", "--export", "test@example.com"]);
        assert!(output.status.success());
        output.stdout
    }

    fn detach_sign(homedir: &Path, manifest_path: &Path, sig_path: &Path) {
        let output = run_gpg(
            homedir,
            &[
                "--batch",
                "--yes",
                "--pinentry-mode",
                "loopback",
                "--passphrase",
                "",
                "--output",
                sig_path.to_str().unwrap(),
                "--armor",
                "--detach-sign",
                manifest_path.to_str().unwrap(),
            ],
        );
        assert!(output.status.success(), "signing failed: {}", String::from_utf8_lossy(&output.stderr));
    }

    #[tokio::test]
    async fn verify_accepts_a_valid_detached_signature() {
        let signing_home = tempfile::tempdir().unwrap();
        generate_signing_key(signing_home.path());
        let pubkey_bytes = export_public_key(signing_home.path());
        let pubkey_path = signing_home.path().join("pubkey.asc");
        std::fs::write(&pubkey_path, &pubkey_bytes).unwrap();

        let manifest = br#"{"name":"weather-tool","version":"1.0.0"}"#;
        let manifest_path = signing_home.path().join("manifest.json");
        std::fs::write(&manifest_path, manifest).unwrap();
        let sig_path = signing_home.path().join("manifest.json.asc");
        detach_sign(signing_home.path(), &manifest_path, &sig_path);
        let signature = std::fs::read(&sig_path).unwrap();

        let verifier = GpgVerifier::new().unwrap();
        verifier.import_key(&pubkey_path).await.unwrap();
        verifier.verify(manifest, &signature).await.unwrap();
    }

    #[tokio::test]
    async fn verify_rejects_a_signature_over_different_bytes() {
        let signing_home = tempfile::tempdir().unwrap();
        generate_signing_key(signing_home.path());
        let pubkey_bytes = export_public_key(signing_home.path());
        let pubkey_path = signing_home.path().join("pubkey.asc");
        std::fs::write(&pubkey_path, &pubkey_bytes).unwrap();

        let manifest_path = signing_home.path().join("manifest.json");
        std::fs::write(&manifest_path, br#"{"name":"weather-tool","version":"1.0.0"}"#).unwrap();
        let sig_path = signing_home.path().join("manifest.json.asc");
        detach_sign(signing_home.path(), &manifest_path, &sig_path);
        let signature = std::fs::read(&sig_path).unwrap();

        let verifier = GpgVerifier::new().unwrap();
        verifier.import_key(&pubkey_path).await.unwrap();
        let tampered = br#"{"name":"weather-tool","version":"9.9.9"}"#;
        let result = verifier.verify(tampered, &signature).await;
        assert!(matches!(result, Err(SignatureVerificationError::Verification(_))));
    }
}
