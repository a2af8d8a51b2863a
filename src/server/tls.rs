use crate::error::{CodedError, ErrorCode, TelnetResult};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::{self, ServerConfig};

/// Builds a TELNETS server config from a PEM certificate chain and key.
pub fn load_tls_config(cert_path: &Path, key_path: &Path) -> TelnetResult<Arc<ServerConfig>> {
    let certs = read_certs(cert_path)?;
    let key = read_key(key_path)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|err| {
            CodedError::new(ErrorCode::TlsError, "Unsupported TLS protocol versions")
                .with_details(err.to_string())
        })?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| {
            CodedError::new(ErrorCode::TlsError, "Invalid certificate or key")
                .with_details(err.to_string())
        })?;
    Ok(Arc::new(config))
}

fn open(path: &Path, what: &str) -> TelnetResult<BufReader<File>> {
    let file = File::open(path).map_err(|err| {
        CodedError::new(ErrorCode::TlsError, format!("Failed to open {what} file"))
            .with_details(format!("{}: {err}", path.display()))
    })?;
    Ok(BufReader::new(file))
}

fn read_certs(path: &Path) -> TelnetResult<Vec<CertificateDer<'static>>> {
    let mut reader = open(path, "certificate")?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| {
            CodedError::new(ErrorCode::TlsError, "Failed to parse certificate file")
                .with_details(err.to_string())
        })?;
    if certs.is_empty() {
        return Err(CodedError::new(ErrorCode::TlsError, "No certificate found")
            .with_details(path.display().to_string())
            .into());
    }
    Ok(certs)
}

fn read_key(path: &Path) -> TelnetResult<PrivateKeyDer<'static>> {
    let mut reader = open(path, "key")?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|err| {
            CodedError::new(ErrorCode::TlsError, "Failed to parse key file")
                .with_details(err.to_string())
        })?
        .ok_or_else(|| {
            CodedError::new(ErrorCode::TlsError, "No private key found")
                .with_details(path.display().to_string())
                .into()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_files_are_tls_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_tls_config(&dir.path().join("cert.pem"), &dir.path().join("key.pem"))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::TlsError);
        assert!(err.to_string().contains("certificate"));
    }

    #[test]
    fn pem_without_certificates_is_rejected() {
        let mut cert = tempfile::NamedTempFile::new().unwrap();
        writeln!(cert, "not a certificate").unwrap();
        let key = tempfile::NamedTempFile::new().unwrap();
        let err = load_tls_config(cert.path(), key.path()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::TlsError);
        assert!(err.to_string().contains("No certificate found"));
    }
}
