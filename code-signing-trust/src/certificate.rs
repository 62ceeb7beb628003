// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Certificate extension access used by chain building and revocation.

use {
    crate::{
        asn1::{
            rfc5280::{
                decode_authority_key_identifier, decode_crl_distribution_points,
                decode_extended_key_usage, decode_ocsp_urls, decode_subject_key_identifier,
                BasicConstraints, KeyUsage, OID_AUTHORITY_INFO_ACCESS,
                OID_AUTHORITY_KEY_IDENTIFIER, OID_BASIC_CONSTRAINTS, OID_CRL_DISTRIBUTION_POINTS,
                OID_EXTENDED_KEY_USAGE, OID_KEY_USAGE, OID_SUBJECT_KEY_IDENTIFIER,
            },
            skip_content,
        },
        error::TrustError,
    },
    bcder::{decode::Constructed, ConstOid, Mode, Oid, Tag},
    bytes::Bytes,
    chrono::{DateTime, Utc},
    ring::{digest, signature::UnparsedPublicKey},
    x509_certificate::{
        rfc5280::{AlgorithmIdentifier, Certificate, Extension},
        CapturedX509Certificate, DigestAlgorithm, SignatureAlgorithm, X509Certificate,
    },
};

/// Extended key usage of a certificate.
#[derive(Clone, Debug)]
pub struct ExtendedKeyUsage {
    pub critical: bool,
    pub purposes: Vec<Oid>,
}

impl ExtendedKeyUsage {
    pub fn contains(&self, purpose: &ConstOid) -> bool {
        self.purposes
            .iter()
            .any(|oid| oid.as_ref() == purpose.as_ref())
    }
}

/// Extension accessors for certificates participating in code signing trust.
///
/// Malformed extensions read as absent.
pub trait CodeSigningCertificate {
    /// Find an extension by OID.
    fn find_extension(&self, oid: &ConstOid) -> Option<&Extension>;

    /// OIDs of every extension marked critical.
    fn critical_extensions(&self) -> Vec<Oid>;

    fn subject_key_identifier(&self) -> Option<Bytes>;

    fn authority_key_identifier(&self) -> Option<Bytes>;

    /// URLs from the CRL distribution points extension.
    fn crl_distribution_points(&self) -> Vec<String>;

    /// OCSP responder URLs from the authority information access extension.
    fn ocsp_urls(&self) -> Vec<String>;

    fn extended_key_usage(&self) -> Option<ExtendedKeyUsage>;

    fn basic_constraints(&self) -> Option<BasicConstraints>;

    fn key_usage(&self) -> Option<KeyUsage>;

    /// Lowercase hex SHA-1 of the DER encoding.
    fn sha1_thumbprint(&self) -> String;

    /// Identity of the issuer used to key revocation caches.
    ///
    /// This is the authority key identifier, falling back to the certificate's
    /// own thumbprint.
    fn issuer_id(&self) -> String;

    fn is_time_valid_at(&self, time: DateTime<Utc>) -> bool;

    /// Whether the subject and issuer match and the certificate verifies against its own key.
    fn is_self_signed(&self) -> bool;

    /// Human readable subject for messages.
    fn subject_display(&self) -> String;

    /// The DER encoded subject name exactly as it appears in the certificate.
    fn subject_name_der(&self) -> Result<Bytes, TrustError>;
}

impl CodeSigningCertificate for CapturedX509Certificate {
    fn find_extension(&self, oid: &ConstOid) -> Option<&Extension> {
        let x509: &X509Certificate = self;
        let cert: &Certificate = x509.as_ref();

        cert.iter_extensions()
            .find(|extension| extension.id.as_ref() == oid.as_ref())
    }

    fn critical_extensions(&self) -> Vec<Oid> {
        let x509: &X509Certificate = self;
        let cert: &Certificate = x509.as_ref();

        cert.iter_extensions()
            .filter(|extension| extension.critical.unwrap_or(false))
            .map(|extension| extension.id.clone())
            .collect()
    }

    fn subject_key_identifier(&self) -> Option<Bytes> {
        let extension = self.find_extension(&OID_SUBJECT_KEY_IDENTIFIER)?;

        decode_subject_key_identifier(extension.value.to_bytes().as_ref()).ok()
    }

    fn authority_key_identifier(&self) -> Option<Bytes> {
        let extension = self.find_extension(&OID_AUTHORITY_KEY_IDENTIFIER)?;

        decode_authority_key_identifier(extension.value.to_bytes().as_ref())
            .ok()
            .flatten()
    }

    fn crl_distribution_points(&self) -> Vec<String> {
        self.find_extension(&OID_CRL_DISTRIBUTION_POINTS)
            .and_then(|extension| {
                decode_crl_distribution_points(extension.value.to_bytes().as_ref()).ok()
            })
            .unwrap_or_default()
    }

    fn ocsp_urls(&self) -> Vec<String> {
        self.find_extension(&OID_AUTHORITY_INFO_ACCESS)
            .and_then(|extension| decode_ocsp_urls(extension.value.to_bytes().as_ref()).ok())
            .unwrap_or_default()
    }

    fn extended_key_usage(&self) -> Option<ExtendedKeyUsage> {
        let extension = self.find_extension(&OID_EXTENDED_KEY_USAGE)?;

        let purposes = decode_extended_key_usage(extension.value.to_bytes().as_ref()).ok()?;

        Some(ExtendedKeyUsage {
            critical: extension.critical.unwrap_or(false),
            purposes,
        })
    }

    fn basic_constraints(&self) -> Option<BasicConstraints> {
        let extension = self.find_extension(&OID_BASIC_CONSTRAINTS)?;

        BasicConstraints::decode(extension.value.to_bytes().as_ref()).ok()
    }

    fn key_usage(&self) -> Option<KeyUsage> {
        let extension = self.find_extension(&OID_KEY_USAGE)?;

        KeyUsage::decode(extension.value.to_bytes().as_ref()).ok()
    }

    fn sha1_thumbprint(&self) -> String {
        hex::encode(digest::digest(
            &digest::SHA1_FOR_LEGACY_USE_ONLY,
            self.constructed_data(),
        ))
    }

    fn issuer_id(&self) -> String {
        match self.authority_key_identifier() {
            Some(key_id) => hex::encode(key_id),
            None => self.sha1_thumbprint(),
        }
    }

    fn is_time_valid_at(&self, time: DateTime<Utc>) -> bool {
        self.validity_not_before() <= time && time <= self.validity_not_after()
    }

    fn is_self_signed(&self) -> bool {
        self.subject_is_issuer() && self.verify_signed_by_certificate(self).is_ok()
    }

    fn subject_display(&self) -> String {
        self.subject_name()
            .user_friendly_str()
            .unwrap_or_else(|_| self.sha1_thumbprint())
    }

    fn subject_name_der(&self) -> Result<Bytes, TrustError> {
        let subject = Constructed::decode(self.constructed_data(), Mode::Der, |cons| {
            cons.take_sequence(|cons| {
                let subject = cons.take_sequence(|cons| {
                    cons.take_opt_constructed_if(Tag::CTX_0, |cons| cons.skip_all())?;
                    // serialNumber, signature, issuer, validity
                    for _ in 0..4 {
                        cons.take_value(|_, content| skip_content(content))?;
                    }
                    let subject = cons.capture_one()?;
                    cons.skip_all()?;

                    Ok(subject)
                })?;
                cons.skip_all()?;

                Ok(subject)
            })
        })?;

        Ok(subject.into_bytes())
    }
}

/// Verify a signature made by a certificate's key.
///
/// `digest_algorithm` is needed when `signature_algorithm` only names a key
/// type, as CMS signer infos commonly do with `rsaEncryption`.
pub fn verify_signature(
    cert: &CapturedX509Certificate,
    signature_algorithm: &AlgorithmIdentifier,
    digest_algorithm: Option<DigestAlgorithm>,
    signed_data: &[u8],
    signature: &[u8],
) -> Result<(), TrustError> {
    let signature_algorithm = match digest_algorithm {
        Some(digest_algorithm) => SignatureAlgorithm::from_oid_and_digest_algorithm(
            &signature_algorithm.algorithm,
            digest_algorithm,
        )?,
        None => SignatureAlgorithm::try_from(signature_algorithm)?,
    };

    let key_algorithm = cert
        .key_algorithm()
        .ok_or(TrustError::UnsupportedKeyAlgorithm)?;
    let verify_algorithm = signature_algorithm.resolve_verification_algorithm(key_algorithm)?;

    UnparsedPublicKey::new(verify_algorithm, cert.public_key_data())
        .verify(signed_data, signature)
        .map_err(|_| TrustError::BadSignature(cert.subject_display()))
}
