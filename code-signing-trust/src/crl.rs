// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Certificate revocation lists.
//!
//! CRLs are fetched from the distribution points named in certificates and
//! kept in a cache keyed by issuer identity. A cached set is served until any
//! of its members reaches its `nextUpdate`, at which point the whole set is
//! fetched again and replaced.
//!
//! The cache has no locking. Two verifications sharing an issuer may both
//! see a stale entry, both fetch and both overwrite it. Since CRL data for an
//! issuer converges, the only cost is a redundant fetch.

use {
    crate::{
        asn1::rfc5280::{CertificateList, RevokedCertificate},
        certificate::{verify_signature, CodeSigningCertificate},
        error::TrustError,
    },
    bcder::Integer,
    bytes::Bytes,
    chrono::{DateTime, Utc},
    log::{debug, warn},
    std::path::{Path, PathBuf},
    x509_certificate::{rfc3280::Name, CapturedX509Certificate},
};

/// A parsed CRL along with its DER encoding.
#[derive(Clone, Debug)]
pub struct Crl {
    list: CertificateList,
    der: Bytes,
}

impl Crl {
    pub fn from_der(data: impl Into<Bytes>) -> Result<Self, TrustError> {
        let der = data.into();
        let list = CertificateList::from_der(der.as_ref())?;

        Ok(Self { list, der })
    }

    pub fn der(&self) -> &Bytes {
        &self.der
    }

    pub fn issuer(&self) -> &Name {
        &self.list.tbs_cert_list.issuer
    }

    pub fn this_update(&self) -> DateTime<Utc> {
        self.list.tbs_cert_list.this_update
    }

    pub fn next_update(&self) -> Option<DateTime<Utc>> {
        self.list.tbs_cert_list.next_update
    }

    /// A CRL without `nextUpdate` is always stale.
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        match self.next_update() {
            Some(next_update) => next_update <= now,
            None => true,
        }
    }

    /// Whether this CRL is published by the issuer of `cert`.
    pub fn covers(&self, cert: &CapturedX509Certificate) -> bool {
        self.issuer() == cert.issuer_name()
    }

    /// Find the entry revoking a serial number.
    pub fn revocation(&self, serial: &Integer) -> Option<&RevokedCertificate> {
        self.list
            .tbs_cert_list
            .revoked_certificates
            .iter()
            .find(|entry| &entry.user_certificate == serial)
    }

    /// Verify the CRL signature with the issuing certificate.
    pub fn verify_issued_by(&self, issuer: &CapturedX509Certificate) -> Result<(), TrustError> {
        verify_signature(
            issuer,
            &self.list.signature_algorithm,
            None,
            self.list.tbs_cert_list_data.as_ref(),
            self.list.signature.octet_bytes().as_ref(),
        )
        .map_err(|e| TrustError::Crl(format!("CRL signature invalid: {}", e)))
    }
}

/// Persistent store of raw CRLs keyed by issuer identity.
///
/// Implementations are shared by concurrent verifications and need not
/// serialize a load with a later store.
pub trait CrlCache: Send + Sync {
    /// Load the cached CRLs for an issuer. An empty list means no entry.
    fn load(&self, issuer_id: &str) -> Result<Vec<Bytes>, TrustError>;

    /// Replace the cached CRLs for an issuer.
    fn store(&self, issuer_id: &str, crls: &[Bytes]) -> Result<(), TrustError>;
}

/// Retrieves DER encoded CRLs by URL.
pub trait CrlFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Bytes, TrustError>;
}

/// A [CrlCache] writing one file per CRL.
///
/// A single CRL is stored as `<issuer-id>.crl`. Multiple CRLs are stored as
/// `<issuer-id>_<n>.crl`.
#[derive(Clone, Debug)]
pub struct FileCrlCache {
    root: PathBuf,
}

impl FileCrlCache {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_paths(&self, issuer_id: &str) -> Result<Vec<PathBuf>, TrustError> {
        if !self.root.is_dir() {
            return Ok(vec![]);
        }

        let single = format!("{}.crl", issuer_id);
        let prefix = format!("{}_", issuer_id);

        let mut entries = vec![];
        for entry in std::fs::read_dir(&self.root)
            .map_err(|e| TrustError::IoPath(self.root.clone(), e))?
        {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();

            let index = if name == single {
                Some(0)
            } else {
                name.strip_prefix(&prefix)
                    .and_then(|rest| rest.strip_suffix(".crl"))
                    .and_then(|n| n.parse::<usize>().ok())
            };

            if let Some(index) = index {
                entries.push((index, entry.path()));
            }
        }

        entries.sort();

        Ok(entries.into_iter().map(|(_, path)| path).collect())
    }
}

impl CrlCache for FileCrlCache {
    fn load(&self, issuer_id: &str) -> Result<Vec<Bytes>, TrustError> {
        self.entry_paths(issuer_id)?
            .into_iter()
            .map(|path| {
                std::fs::read(&path)
                    .map(Bytes::from)
                    .map_err(|e| TrustError::IoPath(path, e))
            })
            .collect()
    }

    fn store(&self, issuer_id: &str, crls: &[Bytes]) -> Result<(), TrustError> {
        std::fs::create_dir_all(&self.root)
            .map_err(|e| TrustError::IoPath(self.root.clone(), e))?;

        for path in self.entry_paths(issuer_id)? {
            std::fs::remove_file(&path).map_err(|e| TrustError::IoPath(path, e))?;
        }

        for (i, crl) in crls.iter().enumerate() {
            let path = if crls.len() == 1 {
                self.root.join(format!("{}.crl", issuer_id))
            } else {
                self.root.join(format!("{}_{}.crl", issuer_id, i))
            };

            std::fs::write(&path, crl).map_err(|e| TrustError::IoPath(path, e))?;
        }

        Ok(())
    }
}

/// Fetches CRLs over HTTP.
pub struct HttpCrlFetcher {
    client: reqwest::blocking::Client,
}

impl HttpCrlFetcher {
    pub fn new() -> Result<Self, TrustError> {
        Ok(Self {
            client: reqwest::blocking::Client::builder().build()?,
        })
    }
}

impl CrlFetcher for HttpCrlFetcher {
    fn fetch(&self, url: &str) -> Result<Bytes, TrustError> {
        debug!("fetching CRL from {}", url);
        let response = self.client.get(url).send()?;

        if !response.status().is_success() {
            return Err(TrustError::HttpStatus(
                url.to_string(),
                response.status().as_u16(),
            ));
        }

        Ok(response.bytes()?)
    }
}

/// Serves CRLs for certificates, from cache when fresh.
pub struct CrlProvider {
    cache: Box<dyn CrlCache>,
    fetcher: Box<dyn CrlFetcher>,
}

impl CrlProvider {
    pub fn new(cache: Box<dyn CrlCache>, fetcher: Box<dyn CrlFetcher>) -> Self {
        Self { cache, fetcher }
    }

    /// Obtain the CRLs published by the issuer of `cert`.
    ///
    /// Fetch and cache failures are logged and yield fewer CRLs rather than
    /// an error.
    pub fn get_crls(&self, cert: &CapturedX509Certificate) -> Vec<Crl> {
        self.get_crls_at(cert, Utc::now())
    }

    pub fn get_crls_at(&self, cert: &CapturedX509Certificate, now: DateTime<Utc>) -> Vec<Crl> {
        let issuer_id = cert.issuer_id();

        if let Some(crls) = self.load_cached(&issuer_id, now) {
            debug!("CRL cache hit for {}", issuer_id);
            return crls;
        }

        let urls = cert.crl_distribution_points();
        if urls.is_empty() {
            warn!(
                "certificate {} has no CRL distribution points",
                cert.subject_display()
            );
        }

        let mut crls = vec![];
        for url in urls {
            match self.fetcher.fetch(&url).and_then(Crl::from_der) {
                Ok(crl) if crl.next_update().is_none() => {
                    warn!("dropping CRL from {} which lacks nextUpdate", url);
                }
                Ok(crl) => crls.push(crl),
                Err(e) => {
                    warn!("unable to obtain CRL from {}: {}", url, e);
                }
            }
        }

        let ders = crls.iter().map(|crl| crl.der().clone()).collect::<Vec<_>>();
        if let Err(e) = self.cache.store(&issuer_id, &ders) {
            warn!("unable to cache CRLs for {}: {}", issuer_id, e);
        }

        crls
    }

    fn load_cached(&self, issuer_id: &str, now: DateTime<Utc>) -> Option<Vec<Crl>> {
        let entries = match self.cache.load(issuer_id) {
            Ok(entries) if entries.is_empty() => {
                debug!("CRL cache miss for {}", issuer_id);
                return None;
            }
            Ok(entries) => entries,
            Err(e) => {
                warn!("unable to read CRL cache for {}: {}", issuer_id, e);
                return None;
            }
        };

        match entries
            .into_iter()
            .map(Crl::from_der)
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(crls) if crls.iter().any(|crl| crl.is_stale_at(now)) => {
                debug!("cached CRLs for {} are stale", issuer_id);
                None
            }
            Ok(crls) => Some(crls),
            Err(e) => {
                warn!("discarding unreadable cached CRLs for {}: {}", issuer_id, e);
                None
            }
        }
    }
}
