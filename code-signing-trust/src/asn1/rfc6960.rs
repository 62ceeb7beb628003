// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! ASN.1 types defined by RFC 6960 (OCSP).

use {
    crate::asn1::{rfc5280::CrlReason, time::take_generalized_time},
    bcder::{
        decode::{Constructed, DecodeError, Source},
        encode::{self, PrimitiveContent, Values},
        BitString, Captured, ConstOid, Integer, Mode, OctetString, Oid, Tag, Unsigned,
    },
    bytes::Bytes,
    chrono::{DateTime, Utc},
    std::convert::Infallible,
    x509_certificate::{rfc3280::Name, rfc5280::AlgorithmIdentifier},
};

/// Basic OCSP response type.
///
/// 1.3.6.1.5.5.7.48.1.1
pub const OID_PKIX_OCSP_BASIC: ConstOid = Oid(&[43, 6, 1, 5, 5, 7, 48, 1, 1]);

/// SHA-1, the hash used for `CertID` values in requests.
///
/// 1.3.14.3.2.26
pub const OID_SHA1: ConstOid = Oid(&[43, 14, 3, 2, 26]);

/// Certificate identifier.
///
/// ```ASN.1
/// CertID          ::=     SEQUENCE {
///     hashAlgorithm       AlgorithmIdentifier,
///     issuerNameHash      OCTET STRING, -- Hash of issuer's DN
///     issuerKeyHash       OCTET STRING, -- Hash of issuer's public key
///     serialNumber        CertificateSerialNumber }
/// ```
#[derive(Clone, Debug)]
pub struct CertId {
    pub hash_algorithm: AlgorithmIdentifier,
    pub issuer_name_hash: OctetString,
    pub issuer_key_hash: OctetString,
    pub serial_number: Integer,
}

impl CertId {
    pub fn take_from<S: Source>(cons: &mut Constructed<S>) -> Result<Self, DecodeError<S::Error>> {
        cons.take_sequence(|cons| {
            let hash_algorithm = AlgorithmIdentifier::take_from(cons)?;
            let issuer_name_hash = OctetString::take_from(cons)?;
            let issuer_key_hash = OctetString::take_from(cons)?;
            let serial_number = Integer::take_from(cons)?;

            Ok(Self {
                hash_algorithm,
                issuer_name_hash,
                issuer_key_hash,
                serial_number,
            })
        })
    }

    pub fn encode_ref(&self) -> impl Values + '_ {
        encode::sequence((
            encode::sequence((
                self.hash_algorithm.algorithm.encode_ref(),
                ().encode(),
            )),
            self.issuer_name_hash.encode_ref(),
            self.issuer_key_hash.encode_ref(),
            (&self.serial_number).encode(),
        ))
    }

    /// Whether two identifiers name the same certificate.
    ///
    /// Algorithm parameters are ignored since responders disagree on whether
    /// SHA-1 carries an explicit NULL.
    pub fn matches(&self, other: &Self) -> bool {
        self.hash_algorithm.algorithm == other.hash_algorithm.algorithm
            && self.issuer_name_hash.to_bytes() == other.issuer_name_hash.to_bytes()
            && self.issuer_key_hash.to_bytes() == other.issuer_key_hash.to_bytes()
            && self.serial_number == other.serial_number
    }
}

/// An OCSP request for a single certificate, without signature or extensions.
///
/// ```ASN.1
/// OCSPRequest     ::=     SEQUENCE {
///     tbsRequest                  TBSRequest,
///     optionalSignature   [0]     EXPLICIT Signature OPTIONAL }
///
/// TBSRequest      ::=     SEQUENCE {
///     version             [0]     EXPLICIT Version DEFAULT v1,
///     requestorName       [1]     EXPLICIT GeneralName OPTIONAL,
///     requestList                 SEQUENCE OF Request,
///     requestExtensions   [2]     EXPLICIT Extensions OPTIONAL }
///
/// Request         ::=     SEQUENCE {
///     reqCert                     CertID,
///     singleRequestExtensions     [0] EXPLICIT Extensions OPTIONAL }
/// ```
#[derive(Clone, Debug)]
pub struct OcspRequest {
    pub cert_id: CertId,
}

impl OcspRequest {
    pub fn encode_ref(&self) -> impl Values + '_ {
        encode::sequence(encode::sequence(encode::sequence(encode::sequence(
            self.cert_id.encode_ref(),
        ))))
    }

    pub fn to_der(&self) -> Result<Vec<u8>, std::io::Error> {
        let mut der = Vec::new();
        self.encode_ref().write_encoded(Mode::Der, &mut der)?;

        Ok(der)
    }
}

/// Outcome of processing an OCSP request.
///
/// ```ASN.1
/// OCSPResponseStatus ::= ENUMERATED {
///     successful            (0),  -- Response has valid confirmations
///     malformedRequest      (1),  -- Illegal confirmation request
///     internalError         (2),  -- Internal error in issuer
///     tryLater              (3),  -- Try again later
///                                 -- (4) is not used
///     sigRequired           (5),  -- Must sign the request
///     unauthorized          (6)   -- Request unauthorized }
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OcspResponseStatus {
    Successful,
    MalformedRequest,
    InternalError,
    TryLater,
    SigRequired,
    Unauthorized,
}

impl OcspResponseStatus {
    pub fn take_from<S: Source>(cons: &mut Constructed<S>) -> Result<Self, DecodeError<S::Error>> {
        match cons.take_primitive_if(Tag::ENUMERATED, Unsigned::u8_from_primitive)? {
            0 => Ok(Self::Successful),
            1 => Ok(Self::MalformedRequest),
            2 => Ok(Self::InternalError),
            3 => Ok(Self::TryLater),
            5 => Ok(Self::SigRequired),
            6 => Ok(Self::Unauthorized),
            _ => Err(cons.content_err("unknown OCSPResponseStatus value")),
        }
    }
}

/// ```ASN.1
/// OCSPResponse ::= SEQUENCE {
///    responseStatus         OCSPResponseStatus,
///    responseBytes          [0] EXPLICIT ResponseBytes OPTIONAL }
///
/// ResponseBytes ::=       SEQUENCE {
///    responseType   OBJECT IDENTIFIER,
///    response       OCTET STRING }
/// ```
#[derive(Clone, Debug)]
pub struct OcspResponse {
    pub response_status: OcspResponseStatus,
    pub response_type: Option<Oid>,
    pub response: Option<Bytes>,
}

impl OcspResponse {
    pub fn take_from<S: Source>(cons: &mut Constructed<S>) -> Result<Self, DecodeError<S::Error>> {
        cons.take_sequence(|cons| {
            let response_status = OcspResponseStatus::take_from(cons)?;
            let response_bytes = cons.take_opt_constructed_if(Tag::CTX_0, |cons| {
                cons.take_sequence(|cons| {
                    let response_type = Oid::take_from(cons)?;
                    let response = OctetString::take_from(cons)?.to_bytes();

                    Ok((response_type, response))
                })
            })?;

            let (response_type, response) = match response_bytes {
                Some((t, r)) => (Some(t), Some(r)),
                None => (None, None),
            };

            Ok(Self {
                response_status,
                response_type,
                response,
            })
        })
    }

    pub fn from_der(data: &[u8]) -> Result<Self, DecodeError<Infallible>> {
        Constructed::decode(data, Mode::Der, |cons| Self::take_from(cons))
    }
}

/// ```ASN.1
/// BasicOCSPResponse       ::= SEQUENCE {
///    tbsResponseData      ResponseData,
///    signatureAlgorithm   AlgorithmIdentifier,
///    signature            BIT STRING,
///    certs            [0] EXPLICIT SEQUENCE OF Certificate OPTIONAL }
/// ```
#[derive(Clone, Debug)]
pub struct BasicOcspResponse {
    pub tbs_response_data: ResponseData,
    /// Encoded `tbsResponseData`, including tag and length. This is what is signed.
    pub tbs_response_data_raw: Bytes,
    pub signature_algorithm: AlgorithmIdentifier,
    pub signature: BitString,
    pub certs: Vec<Captured>,
}

impl BasicOcspResponse {
    pub fn take_from<S: Source>(cons: &mut Constructed<S>) -> Result<Self, DecodeError<S::Error>> {
        cons.take_sequence(|cons| {
            let mut tbs_response_data = None;
            let raw = cons.capture(|cons| {
                tbs_response_data = Some(ResponseData::take_from(cons)?);
                Ok(())
            })?;
            let signature_algorithm = AlgorithmIdentifier::take_from(cons)?;
            let signature = BitString::take_from(cons)?;
            let certs = cons
                .take_opt_constructed_if(Tag::CTX_0, |cons| {
                    cons.take_sequence(|cons| {
                        let mut certs = Vec::new();

                        loop {
                            let cert = cons.capture(|cons| {
                                cons.take_opt_sequence(|cons| cons.skip_all())?;
                                Ok(())
                            })?;
                            if cert.is_empty() {
                                break;
                            }
                            certs.push(cert);
                        }

                        Ok(certs)
                    })
                })?
                .unwrap_or_default();

            match tbs_response_data {
                Some(tbs_response_data) => Ok(Self {
                    tbs_response_data,
                    tbs_response_data_raw: raw.into_bytes(),
                    signature_algorithm,
                    signature,
                    certs,
                }),
                None => Err(cons.content_err("missing tbsResponseData")),
            }
        })
    }

    pub fn from_der(data: &[u8]) -> Result<Self, DecodeError<Infallible>> {
        Constructed::decode(data, Mode::Der, |cons| Self::take_from(cons))
    }
}

/// ```ASN.1
/// ResponderID ::= CHOICE {
///    byName               [1] Name,
///    byKey                [2] KeyHash }
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ResponderId {
    ByName(Name),
    ByKey(Bytes),
}

/// ```ASN.1
/// ResponseData ::= SEQUENCE {
///    version              [0] EXPLICIT Version DEFAULT v1,
///    responderID              ResponderID,
///    producedAt               GeneralizedTime,
///    responses                SEQUENCE OF SingleResponse,
///    responseExtensions   [1] EXPLICIT Extensions OPTIONAL }
/// ```
#[derive(Clone, Debug)]
pub struct ResponseData {
    pub responder_id: ResponderId,
    pub produced_at: DateTime<Utc>,
    pub responses: Vec<SingleResponse>,
}

impl ResponseData {
    pub fn take_from<S: Source>(cons: &mut Constructed<S>) -> Result<Self, DecodeError<S::Error>> {
        cons.take_sequence(|cons| {
            cons.take_opt_constructed_if(Tag::CTX_0, |cons| cons.skip_all())?;

            let responder_id = if let Some(name) =
                cons.take_opt_constructed_if(Tag::CTX_1, |cons| Name::take_from(cons))?
            {
                ResponderId::ByName(name)
            } else {
                ResponderId::ByKey(cons.take_constructed_if(Tag::CTX_2, |cons| {
                    Ok(OctetString::take_from(cons)?.to_bytes())
                })?)
            };

            let produced_at = take_generalized_time(cons)?;
            let responses = cons.take_sequence(|cons| {
                let mut responses = Vec::new();

                while let Some(response) = SingleResponse::take_opt_from(cons)? {
                    responses.push(response);
                }

                Ok(responses)
            })?;
            cons.take_opt_constructed_if(Tag::CTX_1, |cons| cons.skip_all())?;

            Ok(Self {
                responder_id,
                produced_at,
                responses,
            })
        })
    }
}

/// ```ASN.1
/// CertStatus ::= CHOICE {
///     good        [0]     IMPLICIT NULL,
///     revoked     [1]     IMPLICIT RevokedInfo,
///     unknown     [2]     IMPLICIT UnknownInfo }
///
/// RevokedInfo ::= SEQUENCE {
///     revocationTime              GeneralizedTime,
///     revocationReason    [0]     EXPLICIT CRLReason OPTIONAL }
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CertStatus {
    Good,
    Revoked {
        revocation_time: DateTime<Utc>,
        reason: Option<CrlReason>,
    },
    Unknown,
}

/// ```ASN.1
/// SingleResponse ::= SEQUENCE {
///    certID                       CertID,
///    certStatus                   CertStatus,
///    thisUpdate                   GeneralizedTime,
///    nextUpdate         [0]       EXPLICIT GeneralizedTime OPTIONAL,
///    singleExtensions   [1]       EXPLICIT Extensions OPTIONAL }
/// ```
#[derive(Clone, Debug)]
pub struct SingleResponse {
    pub cert_id: CertId,
    pub cert_status: CertStatus,
    pub this_update: DateTime<Utc>,
    pub next_update: Option<DateTime<Utc>>,
}

impl SingleResponse {
    pub fn take_opt_from<S: Source>(
        cons: &mut Constructed<S>,
    ) -> Result<Option<Self>, DecodeError<S::Error>> {
        cons.take_opt_sequence(|cons| {
            let cert_id = CertId::take_from(cons)?;

            let cert_status = if cons
                .take_opt_primitive_if(Tag::CTX_0, |prim| prim.skip_all())?
                .is_some()
            {
                CertStatus::Good
            } else if let Some(revoked) = cons.take_opt_constructed_if(Tag::CTX_1, |cons| {
                let revocation_time = take_generalized_time(cons)?;
                let reason =
                    cons.take_opt_constructed_if(Tag::CTX_0, |cons| CrlReason::take_from(cons))?;

                Ok(CertStatus::Revoked {
                    revocation_time,
                    reason,
                })
            })? {
                revoked
            } else {
                cons.take_primitive_if(Tag::CTX_2, |prim| prim.skip_all())?;
                CertStatus::Unknown
            };

            let this_update = take_generalized_time(cons)?;
            let next_update =
                cons.take_opt_constructed_if(Tag::CTX_0, |cons| take_generalized_time(cons))?;
            cons.take_opt_constructed_if(Tag::CTX_1, |cons| cons.skip_all())?;

            Ok(Self {
                cert_id,
                cert_status,
                this_update,
                next_update,
            })
        })
    }
}
