//! Narrow trait boundaries over the three external binaries (nginx, the ACME
//! client, the cert tool), so the certificate engine and reloader are
//! testable with fakes instead of touching the filesystem or spawning
//! processes. Default implementations shell out via `tokio::process::Command`,
//! capturing combined stdout+stderr on failure.

use crate::error::{ProxyCtlError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::process::Command;

#[async_trait]
pub trait NginxController: Send + Sync {
    async fn validate(&self) -> Result<()>;
    async fn reload(&self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct IssuedCert {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[async_trait]
pub trait AcmeClient: Send + Sync {
    async fn issue(&self, domains: &[String], email: &str) -> Result<IssuedCert>;
}

#[async_trait]
pub trait CertTool: Send + Sync {
    async fn read_not_after(&self, path: &Path) -> Result<DateTime<Utc>>;
    async fn moduli_match(&self, cert_path: &Path, key_path: &Path) -> Result<bool>;
}

async fn run_captured(command: &str, args: &[&str]) -> Result<std::process::Output> {
    let output = Command::new(command)
        .args(args)
        .output()
        .await
        .map_err(ProxyCtlError::Io)?;
    Ok(output)
}

fn combined_output(output: &std::process::Output) -> String {
    format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

/// Shells out to `nginx -t` / `nginx -s reload`.
pub struct SubprocessNginxController {
    binary: String,
}

impl SubprocessNginxController {
    pub fn new(binary: String) -> Self {
        SubprocessNginxController { binary }
    }
}

#[async_trait]
impl NginxController for SubprocessNginxController {
    async fn validate(&self) -> Result<()> {
        let output = run_captured(&self.binary, &["-t"]).await?;
        if !output.status.success() {
            return Err(ProxyCtlError::Subprocess {
                command: format!("{} -t", self.binary),
                output: combined_output(&output),
            });
        }
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        let output = run_captured(&self.binary, &["-s", "reload"]).await?;
        if !output.status.success() {
            return Err(ProxyCtlError::Subprocess {
                command: format!("{} -s reload", self.binary),
                output: combined_output(&output),
            });
        }
        Ok(())
    }
}

/// Shells out to the ACME client binary (e.g. certbot) in non-interactive
/// mode and reads the resulting PEM files from the canonical live directory.
pub struct SubprocessAcmeClient {
    binary: String,
    letsencrypt_dir: PathBuf,
}

impl SubprocessAcmeClient {
    pub fn new(binary: String, letsencrypt_dir: PathBuf) -> Self {
        SubprocessAcmeClient {
            binary,
            letsencrypt_dir,
        }
    }
}

#[async_trait]
impl AcmeClient for SubprocessAcmeClient {
    async fn issue(&self, domains: &[String], email: &str) -> Result<IssuedCert> {
        if domains.is_empty() {
            return Err(ProxyCtlError::Validation("empty domain list".into()));
        }
        let primary = &domains[0];

        let mut args: Vec<String> = vec![
            "certonly".into(),
            "--non-interactive".into(),
            "--agree-tos".into(),
            "-m".into(),
            email.into(),
        ];
        for d in domains {
            args.push("-d".into());
            args.push(d.clone());
        }
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();

        let output = tokio::time::timeout(
            std::time::Duration::from_secs(300),
            run_captured(&self.binary, &arg_refs),
        )
        .await
        .map_err(|_| ProxyCtlError::Subprocess {
            command: format!("{} certonly", self.binary),
            output: "timed out after 300s".into(),
        })??;

        if !output.status.success() {
            return Err(ProxyCtlError::Subprocess {
                command: format!("{} certonly", self.binary),
                output: combined_output(&output),
            });
        }

        let live_dir = self.letsencrypt_dir.join("live").join(primary);
        Ok(IssuedCert {
            cert_path: live_dir.join("fullchain.pem"),
            key_path: live_dir.join("privkey.pem"),
        })
    }
}

/// Shells out to the cert tool's `x509`/modulus/`req` subcommands.
pub struct SubprocessCertTool {
    binary: String,
}

impl SubprocessCertTool {
    pub fn new(binary: String) -> Self {
        SubprocessCertTool { binary }
    }
}

#[async_trait]
impl CertTool for SubprocessCertTool {
    async fn read_not_after(&self, path: &Path) -> Result<DateTime<Utc>> {
        let path_str = path.to_string_lossy().to_string();
        let output = run_captured(
            &self.binary,
            &["x509", "-enddate", "-noout", "-in", &path_str],
        )
        .await?;
        if !output.status.success() {
            return Err(ProxyCtlError::Subprocess {
                command: format!("{} x509 -enddate", self.binary),
                output: combined_output(&output),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_not_after(&stdout).ok_or_else(|| ProxyCtlError::Subprocess {
            command: format!("{} x509 -enddate", self.binary),
            output: stdout.to_string(),
        })
    }

    async fn moduli_match(&self, cert_path: &Path, key_path: &Path) -> Result<bool> {
        let cert_str = cert_path.to_string_lossy().to_string();
        let key_str = key_path.to_string_lossy().to_string();

        let cert_out = run_captured(&self.binary, &["x509", "-noout", "-modulus", "-in", &cert_str]).await?;
        let key_out = run_captured(&self.binary, &["rsa", "-noout", "-modulus", "-in", &key_str]).await?;

        if !cert_out.status.success() || !key_out.status.success() {
            return Err(ProxyCtlError::Validation(
                "failed to read modulus for cert/key pair".into(),
            ));
        }

        Ok(cert_out.stdout == key_out.stdout)
    }
}

/// Parse `notAfter=Jan  1 00:00:00 2030 GMT` style output. Returns `None` on
/// any parse failure; callers default to `now + 90 days`.
fn parse_not_after(stdout: &str) -> Option<DateTime<Utc>> {
    let value = stdout.trim().strip_prefix("notAfter=")?;
    DateTime::parse_from_str(&format!("{} +0000", value.trim()), "%b %e %H:%M:%S %Y %Z %z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_notafter_line() {
        let parsed = parse_not_after("notAfter=Jan 15 12:00:00 2030 GMT\n");
        assert!(parsed.is_some());
        assert_eq!(parsed.unwrap().format("%Y-%m-%d").to_string(), "2030-01-15");
    }

    #[test]
    fn rejects_malformed_notafter_line() {
        assert!(parse_not_after("garbage").is_none());
    }
}
