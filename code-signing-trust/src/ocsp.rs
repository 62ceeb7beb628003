// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Online Certificate Status Protocol (RFC 6960) checks.

use {
    crate::{
        asn1::{
            rfc5280::OID_EKU_OCSP_SIGNING,
            rfc6960::{
                BasicOcspResponse, CertId, CertStatus, OcspRequest, OcspResponse,
                OcspResponseStatus, ResponderId, OID_PKIX_OCSP_BASIC, OID_SHA1,
            },
        },
        certificate::{verify_signature, CodeSigningCertificate},
        error::TrustError,
        result::{VerifyResult, VerifyStatus},
    },
    bcder::{OctetString, Oid},
    bytes::Bytes,
    chrono::{DateTime, Utc},
    log::{debug, warn},
    ring::digest,
    std::time::Duration,
    x509_certificate::{rfc5280::AlgorithmIdentifier, CapturedX509Certificate},
};

/// HTTP request content type for OCSP requests.
pub const HTTP_CONTENT_TYPE_REQUEST: &str = "application/ocsp-request";

/// HTTP content type for OCSP responses.
pub const HTTP_CONTENT_TYPE_RESPONSE: &str = "application/ocsp-response";

/// Allowed distance between a response's `thisUpdate` and now.
pub const THIS_UPDATE_TOLERANCE_SECONDS: i64 = 60;

/// Carries a DER encoded OCSP request to a responder.
pub trait OcspTransport: Send + Sync {
    fn post(&self, url: &str, request: &[u8], timeout: Duration) -> Result<Bytes, TrustError>;
}

/// Sends OCSP requests as HTTP POSTs.
#[derive(Clone, Copy, Debug, Default)]
pub struct HttpOcspTransport {}

impl HttpOcspTransport {
    pub fn new() -> Self {
        Self {}
    }
}

impl OcspTransport for HttpOcspTransport {
    fn post(&self, url: &str, request: &[u8], timeout: Duration) -> Result<Bytes, TrustError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;

        debug!("sending OCSP request to {}", url);
        let response = client
            .post(url)
            .header("Content-Type", HTTP_CONTENT_TYPE_REQUEST)
            .header("Accept", HTTP_CONTENT_TYPE_RESPONSE)
            .body(request.to_vec())
            .send()?;

        if !response.status().is_success() {
            return Err(TrustError::HttpStatus(
                url.to_string(),
                response.status().as_u16(),
            ));
        }

        Ok(response.bytes()?)
    }
}

fn sha1_bytes(data: &[u8]) -> Bytes {
    Bytes::copy_from_slice(digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, data).as_ref())
}

/// Build the identifier of `target` as issued by `issuer`.
pub fn cert_id(
    target: &CapturedX509Certificate,
    issuer: &CapturedX509Certificate,
) -> Result<CertId, TrustError> {
    Ok(CertId {
        hash_algorithm: AlgorithmIdentifier {
            algorithm: Oid(Bytes::copy_from_slice(OID_SHA1.as_ref())),
            parameters: None,
        },
        issuer_name_hash: OctetString::new(sha1_bytes(issuer.subject_name_der()?.as_ref())),
        issuer_key_hash: OctetString::new(sha1_bytes(issuer.public_key_data().as_ref())),
        serial_number: target.serial_number_asn1().clone(),
    })
}

/// Checks the revocation status of a single certificate with its OCSP responder.
pub struct OcspVerifier<'a> {
    transport: &'a dyn OcspTransport,
    timeout: Duration,
}

impl<'a> OcspVerifier<'a> {
    pub fn new(transport: &'a dyn OcspTransport, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Check `target`, issued by `issuer`.
    ///
    /// Anything short of a fresh, authentic `good` answer is `InvalidChain`.
    pub fn check(
        &self,
        target: &CapturedX509Certificate,
        issuer: &CapturedX509Certificate,
    ) -> VerifyResult {
        match self.check_at(target, issuer, Utc::now()) {
            Ok(()) => VerifyResult::valid(),
            Err(e) => {
                VerifyResult::with_status(VerifyStatus::InvalidChain, &e).with_certificate(target)
            }
        }
    }

    pub fn check_at(
        &self,
        target: &CapturedX509Certificate,
        issuer: &CapturedX509Certificate,
        now: DateTime<Utc>,
    ) -> Result<(), TrustError> {
        let urls = target.ocsp_urls();
        if urls.is_empty() {
            return Err(TrustError::RevocationUnknown(format!(
                "certificate {} names no OCSP responder",
                target.subject_display()
            )));
        }

        let cert_id = cert_id(target, issuer)?;
        let request = OcspRequest {
            cert_id: cert_id.clone(),
        }
        .to_der()?;

        let mut last_error = None;
        let mut response = None;
        for url in &urls {
            match self.transport.post(url, &request, self.timeout) {
                Ok(data) => {
                    response = Some(data);
                    break;
                }
                Err(e) => {
                    warn!("OCSP request to {} failed: {}", url, e);
                    last_error = Some(e);
                }
            }
        }

        let response = match (response, last_error) {
            (Some(response), _) => response,
            (None, Some(e)) => return Err(TrustError::RevocationUnknown(e.to_string())),
            (None, None) => {
                return Err(TrustError::RevocationUnknown(
                    "no OCSP response".to_string(),
                ))
            }
        };

        let response = OcspResponse::from_der(response.as_ref())
            .map_err(|e| TrustError::Ocsp(format!("malformed response: {}", e)))?;

        if response.response_status != OcspResponseStatus::Successful {
            return Err(TrustError::Ocsp(format!(
                "responder answered {:?}",
                response.response_status
            )));
        }

        let basic = match (response.response_type, response.response) {
            (Some(typ), Some(data)) if typ.as_ref() == OID_PKIX_OCSP_BASIC.as_ref() => {
                BasicOcspResponse::from_der(data.as_ref())
                    .map_err(|e| TrustError::Ocsp(format!("malformed basic response: {}", e)))?
            }
            (Some(typ), _) => {
                return Err(TrustError::Ocsp(format!(
                    "unsupported response type {}",
                    typ
                )))
            }
            (None, _) => return Err(TrustError::Ocsp("response lacks response bytes".into())),
        };

        let responder = self.authorized_responder(&basic, issuer, now)?;

        verify_signature(
            &responder,
            &basic.signature_algorithm,
            None,
            basic.tbs_response_data_raw.as_ref(),
            basic.signature.octet_bytes().as_ref(),
        )
        .map_err(|e| TrustError::Ocsp(format!("response signature invalid: {}", e)))?;

        let single = basic
            .tbs_response_data
            .responses
            .iter()
            .find(|single| single.cert_id.matches(&cert_id))
            .ok_or_else(|| {
                TrustError::Ocsp(format!(
                    "response does not cover certificate {}",
                    target.subject_display()
                ))
            })?;

        if let Some(next_update) = single.next_update {
            if next_update < now {
                return Err(TrustError::Ocsp(format!(
                    "response expired at {}",
                    next_update.to_rfc3339()
                )));
            }
        }

        if (now - single.this_update).num_seconds().abs() > THIS_UPDATE_TOLERANCE_SECONDS {
            return Err(TrustError::Ocsp(format!(
                "response thisUpdate {} is not current",
                single.this_update.to_rfc3339()
            )));
        }

        match &single.cert_status {
            CertStatus::Good => {
                debug!("OCSP reports {} good", target.subject_display());
                Ok(())
            }
            CertStatus::Unknown => Err(TrustError::RevocationUnknown(format!(
                "responder does not know certificate {}",
                target.subject_display()
            ))),
            CertStatus::Revoked {
                revocation_time,
                reason,
            } => Err(TrustError::CertificateRevoked {
                subject: target.subject_display(),
                time: revocation_time.to_rfc3339(),
                reason: reason
                    .map(|reason| format!(" (reason: {})", reason))
                    .unwrap_or_default(),
            }),
        }
    }

    /// Find the certificate that signed a response.
    ///
    /// This is either the issuer itself or a delegated responder certificate
    /// embedded in the response, issued by the issuer for OCSP signing.
    fn authorized_responder(
        &self,
        basic: &BasicOcspResponse,
        issuer: &CapturedX509Certificate,
        now: DateTime<Utc>,
    ) -> Result<CapturedX509Certificate, TrustError> {
        let responder_id = &basic.tbs_response_data.responder_id;
        let identifies = |cert: &CapturedX509Certificate| match responder_id {
            ResponderId::ByName(name) => cert.subject_name() == name,
            ResponderId::ByKey(hash) => &sha1_bytes(cert.public_key_data().as_ref()) == hash,
        };

        if identifies(issuer) {
            return Ok(issuer.clone());
        }

        let embedded = basic
            .certs
            .iter()
            .map(|cert| CapturedX509Certificate::from_der(cert.as_slice().to_vec()))
            .collect::<Result<Vec<_>, _>>()?;

        let responder = embedded
            .into_iter()
            .find(|cert| identifies(cert))
            .ok_or_else(|| TrustError::Ocsp("responder certificate not found".into()))?;

        if !responder
            .extended_key_usage()
            .map(|eku| eku.contains(&OID_EKU_OCSP_SIGNING))
            .unwrap_or(false)
        {
            return Err(TrustError::Ocsp(format!(
                "responder {} is not authorized for OCSP signing",
                responder.subject_display()
            )));
        }

        if !responder.is_time_valid_at(now) {
            return Err(TrustError::Ocsp(format!(
                "responder certificate {} is not valid now",
                responder.subject_display()
            )));
        }

        responder.verify_signed_by_certificate(issuer).map_err(|_| {
            TrustError::Ocsp(format!(
                "responder certificate {} is not issued by {}",
                responder.subject_display(),
                issuer.subject_display()
            ))
        })?;

        Ok(responder)
    }
}
