// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Certificate path construction and CRL based revocation checking.
//!
//! Paths are built from a leaf to a trust anchor by depth first search over
//! an untrusted pool of intermediates, backtracking when a candidate issuer
//! fails validation.
//!
//! Path validation is lenient about critical extensions. Code signing
//! certificates routinely mark extended key usage and vendor extensions
//! critical, so these are treated as understood even though no policy is
//! derived from them.

use {
    crate::{
        asn1::rfc5280::{
            KEY_USAGE_KEY_CERT_SIGN, OID_AUTHORITY_INFO_ACCESS, OID_AUTHORITY_KEY_IDENTIFIER,
            OID_BASIC_CONSTRAINTS, OID_CERTIFICATE_POLICIES, OID_CRL_DISTRIBUTION_POINTS,
            OID_EXTENDED_KEY_USAGE, OID_KEY_USAGE, OID_SUBJECT_ALT_NAME,
            OID_SUBJECT_KEY_IDENTIFIER,
        },
        certificate::CodeSigningCertificate,
        crl::{Crl, CrlProvider},
        error::TrustError,
    },
    bcder::{ConstOid, Oid},
    chrono::{DateTime, Utc},
    log::{debug, info},
    std::collections::HashMap,
    x509_certificate::CapturedX509Certificate,
};

/// Maximum number of certificates in a path, leaf and anchor included.
pub const MAX_PATH_LENGTH: usize = 10;

/// Critical extensions validation interprets.
const PROCESSED_CRITICAL_EXTENSIONS: &[ConstOid] = &[
    OID_BASIC_CONSTRAINTS,
    OID_KEY_USAGE,
    OID_SUBJECT_KEY_IDENTIFIER,
    OID_AUTHORITY_KEY_IDENTIFIER,
    OID_SUBJECT_ALT_NAME,
    OID_CERTIFICATE_POLICIES,
    OID_CRL_DISTRIBUTION_POINTS,
    OID_AUTHORITY_INFO_ACCESS,
];

/// Critical extensions accepted without being interpreted.
pub const LENIENT_CRITICAL_EXTENSIONS: &[ConstOid] = &[OID_EXTENDED_KEY_USAGE];

/// OID arcs under which any critical extension is accepted.
pub const LENIENT_CRITICAL_EXTENSION_ARCS: &[ConstOid] = &[
    // 1.2.840.113635.100.6.1 (Apple code signing certificate extensions)
    Oid(&[42, 134, 72, 134, 247, 99, 100, 6, 1]),
    // 1.2.840.113635.100.6.2 (Apple intermediate marker extensions)
    Oid(&[42, 134, 72, 134, 247, 99, 100, 6, 2]),
    // 1.3.6.1.4.1.311.2 (Microsoft Authenticode)
    Oid(&[43, 6, 1, 4, 1, 130, 55, 2]),
    // 1.3.6.1.4.1.311.10 (Microsoft crypto 2.0)
    Oid(&[43, 6, 1, 4, 1, 130, 55, 10]),
];

/// Whether a critical extension does not block path validation.
pub fn is_resolved_critical_extension(oid: &Oid) -> bool {
    let oid = oid.as_ref();

    PROCESSED_CRITICAL_EXTENSIONS
        .iter()
        .chain(LENIENT_CRITICAL_EXTENSIONS.iter())
        .any(|known| known.as_ref() == oid)
        || LENIENT_CRITICAL_EXTENSION_ARCS
            .iter()
            .any(|arc| oid.len() > arc.as_ref().len() && oid.starts_with(arc.as_ref()))
}

fn same_certificate(a: &CapturedX509Certificate, b: &CapturedX509Certificate) -> bool {
    a.constructed_data() == b.constructed_data()
}

/// A validated path, leaf first and trust anchor last.
#[derive(Clone, Debug)]
pub struct CertificateChain {
    certificates: Vec<CapturedX509Certificate>,
}

impl CertificateChain {
    pub fn certificates(&self) -> &[CapturedX509Certificate] {
        &self.certificates
    }

    pub fn leaf(&self) -> Option<&CapturedX509Certificate> {
        self.certificates.first()
    }

    pub fn anchor(&self) -> Option<&CapturedX509Certificate> {
        self.certificates.last()
    }

    /// The certificate in the path that issued the one at `index`.
    pub fn issuer_of(&self, index: usize) -> Option<&CapturedX509Certificate> {
        self.certificates.get(index + 1)
    }
}

/// Outcome of a CRL based revocation check.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CrlStatus {
    /// Every checked certificate had usable CRLs and none listed it.
    NotRevoked,
    /// Some certificate had no usable CRL, so CRLs prove nothing.
    Unavailable,
}

/// Builds paths to a set of trust anchors at a reference time.
pub struct ChainBuilder<'a> {
    anchors: &'a [CapturedX509Certificate],
    intermediates: Vec<&'a CapturedX509Certificate>,
    time: Option<DateTime<Utc>>,
}

impl<'a> ChainBuilder<'a> {
    pub fn new(anchors: &'a [CapturedX509Certificate], time: DateTime<Utc>) -> Self {
        Self {
            anchors,
            intermediates: vec![],
            time: Some(time),
        }
    }

    /// A builder that does not check certificate validity periods.
    pub fn without_time(anchors: &'a [CapturedX509Certificate]) -> Self {
        Self {
            anchors,
            intermediates: vec![],
            time: None,
        }
    }

    /// Add untrusted certificates that may appear in the path.
    pub fn intermediates(
        mut self,
        certs: impl IntoIterator<Item = &'a CapturedX509Certificate>,
    ) -> Self {
        self.intermediates.extend(certs);
        self
    }

    fn is_anchor(&self, cert: &CapturedX509Certificate) -> bool {
        self.anchors
            .iter()
            .any(|anchor| same_certificate(anchor, cert))
    }

    fn check_critical_extensions(&self, cert: &CapturedX509Certificate) -> Result<(), String> {
        match cert
            .critical_extensions()
            .into_iter()
            .find(|oid| !is_resolved_critical_extension(oid))
        {
            Some(oid) => Err(format!(
                "certificate {} has unrecognized critical extension {}",
                cert.subject_display(),
                oid
            )),
            None => Ok(()),
        }
    }

    fn check_time(&self, cert: &CapturedX509Certificate) -> Result<(), String> {
        let time = match self.time {
            Some(time) => time,
            None => return Ok(()),
        };

        if cert.is_time_valid_at(time) {
            Ok(())
        } else {
            Err(format!(
                "certificate {} is not valid at {} (valid {} to {})",
                cert.subject_display(),
                time.to_rfc3339(),
                cert.validity_not_before().to_rfc3339(),
                cert.validity_not_after().to_rfc3339()
            ))
        }
    }

    /// Validate a non-anchor CA candidate sitting above `below` certificates.
    fn check_ca(&self, cert: &CapturedX509Certificate, below: usize) -> Result<(), String> {
        self.check_time(cert)?;

        let constraints = cert.basic_constraints().unwrap_or_default();
        if !constraints.ca {
            return Err(format!(
                "certificate {} is not a certificate authority",
                cert.subject_display()
            ));
        }

        // The leaf does not count against the path length.
        if let Some(path_len) = constraints.path_len_constraint {
            if below.saturating_sub(1) > path_len as usize {
                return Err(format!(
                    "path length constraint of {} exceeded",
                    cert.subject_display()
                ));
            }
        }

        if let Some(key_usage) = cert.key_usage() {
            if !key_usage.has(KEY_USAGE_KEY_CERT_SIGN) {
                return Err(format!(
                    "certificate {} may not sign certificates",
                    cert.subject_display()
                ));
            }
        }

        self.check_critical_extensions(cert)
    }

    fn extend<'c>(
        &'c self,
        path: &mut Vec<&'c CapturedX509Certificate>,
        diagnostics: &mut Vec<String>,
    ) -> bool {
        let current = match path.last() {
            Some(cert) => *cert,
            None => return false,
        };

        if self.is_anchor(current) {
            return true;
        }

        if path.len() >= MAX_PATH_LENGTH {
            diagnostics.push(format!(
                "path exceeds {} certificates",
                MAX_PATH_LENGTH
            ));
            return false;
        }

        let authority_key_id = current.authority_key_identifier();
        let mut found_candidate = false;

        for candidate in self.anchors.iter().chain(self.intermediates.iter().copied()) {
            if candidate.subject_name() != current.issuer_name()
                || path.iter().any(|cert| same_certificate(cert, candidate))
            {
                continue;
            }

            if let (Some(aki), Some(ski)) =
                (&authority_key_id, candidate.subject_key_identifier())
            {
                if aki != &ski {
                    continue;
                }
            }

            found_candidate = true;

            if current.verify_signed_by_certificate(candidate).is_err() {
                diagnostics.push(format!(
                    "signature of {} does not verify with key of {}",
                    current.subject_display(),
                    candidate.subject_display()
                ));
                continue;
            }

            if !self.is_anchor(candidate) {
                if let Err(e) = self.check_ca(candidate, path.len()) {
                    diagnostics.push(e);
                    continue;
                }
            }

            path.push(candidate);
            if self.extend(path, diagnostics) {
                return true;
            }
            path.pop();
        }

        if !found_candidate {
            diagnostics.push(format!(
                "no trusted issuer found for {}",
                current.subject_display()
            ));
        }

        false
    }

    /// Build and validate a path from `leaf` to a trust anchor.
    pub fn build(&self, leaf: &CapturedX509Certificate) -> Result<CertificateChain, TrustError> {
        if self.anchors.is_empty() {
            return Err(TrustError::NoTrustAnchors);
        }

        self.check_time(leaf)
            .and_then(|_| self.check_critical_extensions(leaf))
            .map_err(TrustError::NoTrustedPath)?;

        let mut diagnostics = vec![];
        let mut path = vec![leaf];

        if self.extend(&mut path, &mut diagnostics) {
            debug!(
                "built path {}",
                path.iter()
                    .map(|cert| cert.subject_display())
                    .collect::<Vec<_>>()
                    .join(" -> ")
            );

            Ok(CertificateChain {
                certificates: path.into_iter().cloned().collect(),
            })
        } else {
            diagnostics.dedup();
            Err(TrustError::NoTrustedPath(diagnostics.join("; ")))
        }
    }

    /// Check every certificate in a path against CRLs.
    ///
    /// Self-signed certificates and the trust anchor are skipped. CRLs come
    /// from `provider`, fetched once per issuer, and from `embedded`. A CRL
    /// is only used when it names the certificate's issuer, is signed by the
    /// issuing certificate in the path and has not passed its `nextUpdate`.
    pub fn check_crls(
        &self,
        chain: &CertificateChain,
        provider: &CrlProvider,
        embedded: &[Crl],
    ) -> Result<CrlStatus, TrustError> {
        let now = Utc::now();
        let mut fetched: HashMap<String, Vec<Crl>> = HashMap::new();
        let mut checks = vec![];

        for (index, cert) in chain.certificates().iter().enumerate() {
            let issuer = match chain.issuer_of(index) {
                Some(issuer) if !cert.is_self_signed() => issuer,
                _ => continue,
            };

            let crls = fetched
                .entry(cert.issuer_id())
                .or_insert_with(|| provider.get_crls(cert))
                .iter()
                .chain(embedded.iter())
                .filter(|crl| {
                    crl.covers(cert)
                        && !crl.is_stale_at(now)
                        && crl.verify_issued_by(issuer).is_ok()
                })
                .cloned()
                .collect::<Vec<_>>();

            if crls.is_empty() {
                info!(
                    "no usable CRL for {}; abandoning CRL revocation checking",
                    cert.subject_display()
                );
                return Ok(CrlStatus::Unavailable);
            }

            checks.push((cert, crls));
        }

        for (cert, crls) in checks {
            for crl in crls {
                if let Some(entry) = crl.revocation(cert.serial_number_asn1()) {
                    return Err(TrustError::CertificateRevoked {
                        subject: cert.subject_display(),
                        time: entry.revocation_date.to_rfc3339(),
                        reason: entry
                            .reason
                            .map(|reason| format!(" (reason: {})", reason))
                            .unwrap_or_default(),
                    });
                }
            }
        }

        Ok(CrlStatus::NotRevoked)
    }
}
