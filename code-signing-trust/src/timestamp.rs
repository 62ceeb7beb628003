// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! RFC 3161 time-stamp tokens attached to signatures.

use {
    crate::{
        asn1::{
            rfc3161::{TstInfo, OID_CONTENT_TYPE_TST_INFO},
            rfc5280::OID_EKU_TIME_STAMPING,
        },
        certificate::CodeSigningCertificate,
        chain::ChainBuilder,
        error::{TrustError, ViolationKind},
        result::{enforce, VerifyResult, VerifyStatus, VIOLATION_TIMESTAMP_EKU_NOT_CRITICAL},
        settings::VerificationParams,
        signed_message::{SignedMessage, SignerInfo},
    },
    bcder::{decode::Constructed, Mode},
    chrono::{DateTime, Utc},
    log::debug,
    x509_certificate::{CapturedX509Certificate, DigestAlgorithm},
};

/// A time-stamp token: signed data whose content is a `TSTInfo`.
#[derive(Debug)]
pub struct TimestampToken {
    message: SignedMessage,
    tst_info: TstInfo,
}

impl TimestampToken {
    /// Parse a token from the value of a time-stamp attribute.
    pub fn from_der(data: &[u8]) -> Result<Self, TrustError> {
        let message = SignedMessage::from_ber(data)
            .map_err(|e| TrustError::TimestampMalformed(e.to_string()))?;

        if message.content_type().as_ref() != OID_CONTENT_TYPE_TST_INFO.as_ref() {
            return Err(TrustError::TimestampMalformed(format!(
                "content type {} is not TSTInfo",
                message.content_type()
            )));
        }

        let signers = message.signers().count();
        if signers != 1 {
            return Err(TrustError::TimestampMalformed(format!(
                "expected one signer; found {}",
                signers
            )));
        }

        let content = message.signed_content().ok_or_else(|| {
            TrustError::TimestampMalformed("token carries no TSTInfo".to_string())
        })?;

        let tst_info = Constructed::decode(content, Mode::Der, |cons| TstInfo::take_from(cons))
            .map_err(|e| TrustError::TimestampMalformed(format!("bad TSTInfo: {}", e)))?;

        Ok(Self { message, tst_info })
    }

    pub fn message(&self) -> &SignedMessage {
        &self.message
    }

    pub fn tst_info(&self) -> &TstInfo {
        &self.tst_info
    }

    /// When the time-stamp authority produced the token.
    pub fn gen_time(&self) -> DateTime<Utc> {
        self.tst_info.gen_time
    }

    /// The authority's signer info.
    pub fn signer(&self) -> Option<&SignerInfo> {
        self.message.signers().next()
    }

    /// Whether the message imprint is the digest of `data`.
    pub fn imprint_matches(&self, data: &[u8]) -> Result<bool, TrustError> {
        let imprint = &self.tst_info.message_imprint;
        let digest_algorithm = DigestAlgorithm::try_from(&imprint.hash_algorithm).map_err(|_| {
            TrustError::UnsupportedDigestAlgorithm(imprint.hash_algorithm.algorithm.to_string())
        })?;

        let mut hasher = digest_algorithm.digester();
        hasher.update(data);

        Ok(hasher.finish().as_ref() == imprint.hashed_message.to_bytes().as_ref())
    }
}

/// Validates a time-stamp token against the signature it covers.
pub struct TimestampValidator<'a> {
    params: &'a VerificationParams,
}

impl<'a> TimestampValidator<'a> {
    pub fn new(params: &'a VerificationParams) -> Self {
        Self { params }
    }

    /// Validate `token` as a time-stamp over `timestamped_signature`.
    ///
    /// Chain building failures are `InvalidChain`; everything else that goes
    /// wrong is `InvalidTimestamp`.
    pub fn validate(&self, token: &TimestampToken, timestamped_signature: &[u8]) -> VerifyResult {
        let cert = match self.token_certificate(token) {
            Ok(cert) => cert,
            Err(e) => return VerifyResult::with_status(VerifyStatus::InvalidTimestamp, &e),
        };

        if let Err(e) = self.check_token(token, cert, timestamped_signature) {
            return VerifyResult::with_status(VerifyStatus::InvalidTimestamp, &e)
                .with_certificate(cert);
        }

        if self.params.settings().build_chain() {
            if let Some(anchors) = &self.params.settings().anchors().timestamping {
                if let Err(e) = ChainBuilder::new(anchors, token.gen_time())
                    .intermediates(token.message().certificates())
                    .build(cert)
                {
                    return VerifyResult::with_status(VerifyStatus::InvalidChain, &e)
                        .with_certificate(cert);
                }
            }
        }

        debug!(
            "time-stamp by {} at {} is valid",
            cert.subject_display(),
            token.gen_time().to_rfc3339()
        );

        VerifyResult::valid()
    }

    fn token_certificate<'t>(
        &self,
        token: &'t TimestampToken,
    ) -> Result<&'t CapturedX509Certificate, TrustError> {
        token
            .signer()
            .and_then(|signer| signer.find_certificate(token.message().certificates()))
            .ok_or(TrustError::TimestampCertificateNotFound)
    }

    fn check_token(
        &self,
        token: &TimestampToken,
        cert: &CapturedX509Certificate,
        timestamped_signature: &[u8],
    ) -> Result<(), TrustError> {
        if !token.imprint_matches(timestamped_signature)? {
            return Err(TrustError::TimestampImprintMismatch);
        }

        let eku = cert
            .extended_key_usage()
            .ok_or(TrustError::TimestampMissingExtendedKeyUsage)?;
        if eku.purposes.len() != 1 || !eku.contains(&OID_EKU_TIME_STAMPING) {
            return Err(TrustError::TimestampExtendedKeyUsagePurpose);
        }
        if !eku.critical {
            enforce(
                TrustError::Violation(ViolationKind::Tsp, VIOLATION_TIMESTAMP_EKU_NOT_CRITICAL),
                self.params.settings().strict(),
            )?;
        }

        let (earliest, latest) = token.tst_info().gen_time_bounds();
        if !cert.is_time_valid_at(earliest) || !cert.is_time_valid_at(latest) {
            return Err(TrustError::TimestampOutsideValidity(
                token.gen_time().to_rfc3339(),
            ));
        }

        let signer = token
            .signer()
            .ok_or(TrustError::TimestampCertificateNotFound)?;
        let content = token.message().signed_content().ok_or(TrustError::NoContent)?;

        signer
            .verify_signature(cert, content)
            .map_err(|e| TrustError::TimestampSignature(Box::new(e)))
    }
}
