// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    crate::result::VerifyStatus,
    bcder::decode::DecodeError,
    std::{convert::Infallible, path::PathBuf},
    thiserror::Error,
    x509_certificate::X509CertificateError,
};

/// Classes of strict conformance complaints that real signatures routinely trigger.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ViolationKind {
    /// Raised by CMS signer validation.
    Cms,
    /// Raised by time-stamp token validation.
    Tsp,
}

/// Unified error type for signature trust verification.
#[derive(Debug, Error)]
pub enum TrustError {
    #[error("bad argument")]
    CliBadArgument,

    #[error("{0}")]
    CliGeneralError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error on {0}: {1}")]
    IoPath(PathBuf, std::io::Error),

    #[error("HTTP error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("HTTP request to {0} failed with status {1}")]
    HttpStatus(String, u16),

    #[error("ASN.1 decode error: {0}")]
    Asn1Decode(#[from] DecodeError<Infallible>),

    #[error("PEM error: {0}")]
    Pem(#[from] pem::PemError),

    #[error("X.509 certificate handler error: {0}")]
    X509(#[from] X509CertificateError),

    #[error("signature data is empty; the artifact is not signed")]
    NotSigned,

    #[error("content type is not signed-data: {0}")]
    NotSignedData(String),

    #[error("unsupported digest algorithm: {0}")]
    UnsupportedDigestAlgorithm(String),

    #[error("certificate has unsupported key algorithm")]
    UnsupportedKeyAlgorithm,

    #[error("no certificate matching signer {0} found in certificate store")]
    SignerCertificateNotFound(String),

    #[error("signed attributes lack a message-digest attribute")]
    MissingMessageDigest,

    #[error("message digest mismatch: signed attributes declare {declared}, content digests to {computed}")]
    MessageDigestMismatch { declared: String, computed: String },

    #[error("signature does not verify against certificate {0}")]
    BadSignature(String),

    #[error("signed message carries no content to verify against")]
    NoContent,

    #[error("signed message has no signers")]
    NoSigners,

    #[error("{1}")]
    Violation(ViolationKind, &'static str),

    #[error("time-stamp token is malformed: {0}")]
    TimestampMalformed(String),

    #[error("time-stamp message imprint does not match digest of the signature it covers")]
    TimestampImprintMismatch,

    #[error("time-stamp certificate not found in time-stamp token certificate store")]
    TimestampCertificateNotFound,

    #[error("time-stamp certificate lacks an extended key usage extension")]
    TimestampMissingExtendedKeyUsage,

    #[error("time-stamp certificate extended key usage must be time stamping only")]
    TimestampExtendedKeyUsagePurpose,

    #[error("time-stamp generation time {0} is outside time-stamp certificate validity")]
    TimestampOutsideValidity(String),

    #[error("time-stamp signature invalid: {0}")]
    TimestampSignature(Box<TrustError>),

    #[error("no trust anchors configured")]
    NoTrustAnchors,

    #[error("unable to build a trusted certificate path: {0}")]
    NoTrustedPath(String),

    #[error("certificate {subject} was revoked at {time}{reason}")]
    CertificateRevoked {
        subject: String,
        time: String,
        reason: String,
    },

    #[error("cannot determine revocation status: {0}")]
    RevocationUnknown(String),

    #[error("CRL error: {0}")]
    Crl(String),

    #[error("OCSP error: {0}")]
    Ocsp(String),
}

impl TrustError {
    /// The verification status this error maps to when no context overrides it.
    pub fn status(&self) -> VerifyStatus {
        match self {
            Self::TimestampMalformed(_)
            | Self::TimestampImprintMismatch
            | Self::TimestampCertificateNotFound
            | Self::TimestampMissingExtendedKeyUsage
            | Self::TimestampExtendedKeyUsagePurpose
            | Self::TimestampOutsideValidity(_)
            | Self::TimestampSignature(_)
            | Self::Violation(ViolationKind::Tsp, _) => VerifyStatus::InvalidTimestamp,
            Self::NoTrustAnchors
            | Self::NoTrustedPath(_)
            | Self::CertificateRevoked { .. }
            | Self::RevocationUnknown(_)
            | Self::Crl(_)
            | Self::Ocsp(_) => VerifyStatus::InvalidChain,
            _ => VerifyStatus::InvalidSignature,
        }
    }
}

/// Render an error and every error in its `source()` chain as one message.
pub fn flatten_message(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();

    while let Some(cause) = source {
        let cause_message = cause.to_string();
        // thiserror's {0} formatting often embeds the source already.
        if !message.contains(&cause_message) {
            message.push_str(": ");
            message.push_str(&cause_message);
        }
        source = cause.source();
    }

    message
}
