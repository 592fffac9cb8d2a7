//! TLS certificate provider. Out of scope in `spec.md` §1 ("TLS primitives
//! are deferred to a TLS provider") — this is that provider, built on the
//! `rustls`/`tokio-rustls`/`rustls-pemfile` stack already idiomatic for this
//! kind of embeddable server in the surrounding pack.

#![cfg(feature = "tls")]

use crate::{
    errors::ServerError,
    limits::{TlsLimits, TlsVersion},
};
use rustls_pemfile::{certs, private_key};
use std::{io::BufReader, sync::Arc};
use tokio_rustls::{
    rustls::{self, server::WebPkiClientVerifier, RootCertStore},
    TlsAcceptor,
};

/// A loaded server certificate plus the derived TLS acceptor.
pub struct TlsProvider {
    pub(crate) acceptor: TlsAcceptor,
}

impl TlsProvider {
    /// Builds a provider from PEM-encoded certificate chain and private key
    /// bytes. Returns `ServerError::InvalidTls` on any parse failure —
    /// `start()` surfaces this to the caller per `spec.md` §7d.
    pub fn from_pem(
        cert_chain_pem: &[u8],
        private_key_pem: &[u8],
        limits: &TlsLimits,
    ) -> Result<Self, ServerError> {
        let mut cert_reader = BufReader::new(cert_chain_pem);
        let chain = certs(&mut cert_reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ServerError::InvalidTls(format!("certificate chain: {e}")))?;

        let mut key_reader = BufReader::new(private_key_pem);
        let key = private_key(&mut key_reader)
            .map_err(|e| ServerError::InvalidTls(format!("private key: {e}")))?
            .ok_or_else(|| ServerError::InvalidTls("no private key found".to_string()))?;

        let protocol_versions: Vec<&'static rustls::SupportedProtocolVersion> = limits
            .allowed_versions
            .iter()
            .map(|v| match v {
                TlsVersion::Tls12 => &rustls::version::TLS12,
                TlsVersion::Tls13 => &rustls::version::TLS13,
            })
            .collect();
        let builder = rustls::ServerConfig::builder_with_protocol_versions(&protocol_versions)
            .map_err(|e| ServerError::InvalidTls(format!("protocol versions: {e}")))?;

        let config = if limits.require_client_cert {
            let ca_pem = limits.client_ca_pem.as_deref().ok_or_else(|| {
                ServerError::InvalidTls("require_client_cert needs client_ca_pem to be set".to_string())
            })?;
            let mut ca_reader = BufReader::new(ca_pem);
            let mut roots = RootCertStore::empty();
            for cert in certs(&mut ca_reader).collect::<Result<Vec<_>, _>>()
                .map_err(|e| ServerError::InvalidTls(format!("client CA chain: {e}")))?
            {
                roots
                    .add(cert)
                    .map_err(|e| ServerError::InvalidTls(format!("client CA chain: {e}")))?;
            }
            let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                .build()
                .map_err(|e| ServerError::InvalidTls(format!("client cert verifier: {e}")))?;
            builder
                .with_client_cert_verifier(verifier)
                .with_single_cert(chain, key)
        } else {
            builder.with_no_client_auth().with_single_cert(chain, key)
        }
        .map_err(|e| ServerError::InvalidTls(format!("server config: {e}")))?;

        Ok(Self {
            acceptor: TlsAcceptor::from(Arc::new(config)),
        })
    }
}
