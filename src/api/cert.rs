//! Self-signed certificate provisioning for the HTTPS listener.
//!
//! A `cert/` directory next to the binary holds `cert.pem`/`key.pem`; if both
//! already exist they're reused as-is (no validity check — an operator who
//! wants a fresh one deletes the directory).

use std::path::{Path, PathBuf};

use chrono::Datelike;
use rcgen::{Certificate, CertificateParams, DistinguishedName, DnType, SanType};

pub struct CertPaths {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Resolve (generating if absent) the self-signed cert/key pair for `host`,
/// valid for 10 years, stored under `exe_dir/cert`.
pub fn ensure_self_signed(exe_dir: &Path, host: &str) -> anyhow::Result<CertPaths> {
    let cert_dir = exe_dir.join("cert");
    let cert_path = cert_dir.join("cert.pem");
    let key_path = cert_dir.join("key.pem");

    if cert_path.exists() && key_path.exists() {
        return Ok(CertPaths { cert_path, key_path });
    }

    std::fs::create_dir_all(&cert_dir)?;

    let mut params = CertificateParams::new(vec![host.to_string()]);
    params.distinguished_name = DistinguishedName::new();
    params.distinguished_name.push(DnType::CommonName, host);
    params.subject_alt_names = vec![san_for(host)];

    let today = chrono::Utc::now().date_naive();
    params.not_before = rcgen::date_time_ymd(today.year(), today.month() as u8, today.day() as u8);
    params.not_after = rcgen::date_time_ymd(
        today.year() + 10,
        today.month() as u8,
        today.day() as u8,
    );

    let cert = Certificate::from_params(params)?;
    std::fs::write(&cert_path, cert.serialize_pem()?)?;
    std::fs::write(&key_path, cert.serialize_private_key_pem())?;

    Ok(CertPaths { cert_path, key_path })
}

fn san_for(host: &str) -> SanType {
    match host.parse::<std::net::IpAddr>() {
        Ok(ip) => SanType::IpAddress(ip),
        Err(_) => SanType::DnsName(host.to_string()),
    }
}
