// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! ASN.1 types defined by RFC 5280 that certificate parsing does not cover.

This holds certificate revocation lists and the payloads of the certificate
extensions that path building and revocation checking interpret.
*/

use {
    crate::asn1::{
        skip_content,
        time::{take_opt_time, take_time},
    },
    bcder::{
        decode::{Constructed, DecodeError, Source},
        BitString, ConstOid, Integer, Mode, OctetString, Oid, Tag, Unsigned,
    },
    bytes::Bytes,
    chrono::{DateTime, Utc},
    std::convert::Infallible,
    x509_certificate::{rfc3280::Name, rfc5280::AlgorithmIdentifier},
};

/// Subject key identifier extension.
///
/// 2.5.29.14
pub const OID_SUBJECT_KEY_IDENTIFIER: ConstOid = Oid(&[85, 29, 14]);

/// Key usage extension.
///
/// 2.5.29.15
pub const OID_KEY_USAGE: ConstOid = Oid(&[85, 29, 15]);

/// Subject alternative name extension.
///
/// 2.5.29.17
pub const OID_SUBJECT_ALT_NAME: ConstOid = Oid(&[85, 29, 17]);

/// Basic constraints extension.
///
/// 2.5.29.19
pub const OID_BASIC_CONSTRAINTS: ConstOid = Oid(&[85, 29, 19]);

/// CRL reason code entry extension.
///
/// 2.5.29.21
pub const OID_CRL_REASON: ConstOid = Oid(&[85, 29, 21]);

/// CRL distribution points extension.
///
/// 2.5.29.31
pub const OID_CRL_DISTRIBUTION_POINTS: ConstOid = Oid(&[85, 29, 31]);

/// Certificate policies extension.
///
/// 2.5.29.32
pub const OID_CERTIFICATE_POLICIES: ConstOid = Oid(&[85, 29, 32]);

/// Authority key identifier extension.
///
/// 2.5.29.35
pub const OID_AUTHORITY_KEY_IDENTIFIER: ConstOid = Oid(&[85, 29, 35]);

/// Extended Key Usage extension.
///
/// 2.5.29.37
pub const OID_EXTENDED_KEY_USAGE: ConstOid = Oid(&[85, 29, 37]);

/// Authority information access extension.
///
/// 1.3.6.1.5.5.7.1.1
pub const OID_AUTHORITY_INFO_ACCESS: ConstOid = Oid(&[43, 6, 1, 5, 5, 7, 1, 1]);

/// OCSP access method.
///
/// 1.3.6.1.5.5.7.48.1
pub const OID_AD_OCSP: ConstOid = Oid(&[43, 6, 1, 5, 5, 7, 48, 1]);

/// Extended Key Usage for code signing.
///
/// 1.3.6.1.5.5.7.3.3
pub const OID_EKU_CODE_SIGNING: ConstOid = Oid(&[43, 6, 1, 5, 5, 7, 3, 3]);

/// Extended Key Usage for time stamping.
///
/// 1.3.6.1.5.5.7.3.8
pub const OID_EKU_TIME_STAMPING: ConstOid = Oid(&[43, 6, 1, 5, 5, 7, 3, 8]);

/// Extended Key Usage for signing OCSP responses.
///
/// 1.3.6.1.5.5.7.3.9
pub const OID_EKU_OCSP_SIGNING: ConstOid = Oid(&[43, 6, 1, 5, 5, 7, 3, 9]);

/// `keyCertSign` bit position in the key usage BIT STRING.
pub const KEY_USAGE_KEY_CERT_SIGN: usize = 5;

/// `cRLSign` bit position in the key usage BIT STRING.
pub const KEY_USAGE_CRL_SIGN: usize = 6;

/// Decode the key identifier out of an authority key identifier extension.
///
/// ```ASN.1
/// AuthorityKeyIdentifier ::= SEQUENCE {
///   keyIdentifier             [0] KeyIdentifier           OPTIONAL,
///   authorityCertIssuer       [1] GeneralNames            OPTIONAL,
///   authorityCertSerialNumber [2] CertificateSerialNumber OPTIONAL  }
/// ```
pub fn decode_authority_key_identifier(
    data: &[u8],
) -> Result<Option<Bytes>, DecodeError<Infallible>> {
    Constructed::decode(data, Mode::Der, |cons| {
        cons.take_sequence(|cons| {
            let key_id = cons.take_opt_primitive_if(Tag::CTX_0, |prim| prim.take_all())?;
            cons.skip_all()?;

            Ok(key_id)
        })
    })
}

/// Decode a subject key identifier extension.
pub fn decode_subject_key_identifier(data: &[u8]) -> Result<Bytes, DecodeError<Infallible>> {
    Constructed::decode(data, Mode::Der, |cons| {
        Ok(OctetString::take_from(cons)?.to_bytes())
    })
}

/// Decode the key purposes of an extended key usage extension.
pub fn decode_extended_key_usage(data: &[u8]) -> Result<Vec<Oid>, DecodeError<Infallible>> {
    Constructed::decode(data, Mode::Der, |cons| {
        cons.take_sequence(|cons| {
            let mut purposes = Vec::new();

            while let Some(oid) = cons.take_opt_primitive_if(Tag::OID, |prim| {
                Ok(Oid(prim.take_all()?))
            })? {
                purposes.push(oid);
            }

            Ok(purposes)
        })
    })
}

/// Basic constraints.
///
/// ```ASN.1
/// BasicConstraints ::= SEQUENCE {
///   cA                      BOOLEAN DEFAULT FALSE,
///   pathLenConstraint       INTEGER (0..MAX) OPTIONAL }
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BasicConstraints {
    pub ca: bool,
    pub path_len_constraint: Option<u32>,
}

impl BasicConstraints {
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError<Infallible>> {
        Constructed::decode(data, Mode::Der, |cons| {
            cons.take_sequence(|cons| {
                let ca = cons.take_opt_bool()?.unwrap_or(false);
                let path_len_constraint =
                    cons.take_opt_primitive_if(Tag::INTEGER, Unsigned::u32_from_primitive)?;

                Ok(Self {
                    ca,
                    path_len_constraint,
                })
            })
        })
    }
}

/// Key usage bits.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyUsage(BitString);

impl KeyUsage {
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError<Infallible>> {
        Constructed::decode(data, Mode::Der, |cons| Ok(Self(BitString::take_from(cons)?)))
    }

    /// Whether the bit at a position defined by RFC 5280 is set.
    pub fn has(&self, bit: usize) -> bool {
        self.0.bit(bit)
    }
}

/// Take every URI out of a `GeneralNames` sequence body.
///
/// Other name forms are skipped.
fn take_uris<S: Source>(cons: &mut Constructed<S>) -> Result<Vec<String>, DecodeError<S::Error>> {
    let mut uris = Vec::new();

    loop {
        if let Some(uri) = cons.take_opt_primitive_if(Tag::CTX_6, |prim| prim.take_all())? {
            uris.push(String::from_utf8_lossy(uri.as_ref()).to_string());
        } else if cons
            .take_opt_value(|_, content| skip_content(content))?
            .is_none()
        {
            break;
        }
    }

    Ok(uris)
}

/// Decode the URLs out of a CRL distribution points extension.
///
/// ```ASN.1
/// DistributionPoint ::= SEQUENCE {
///   distributionPoint       [0]     DistributionPointName OPTIONAL,
///   reasons                 [1]     ReasonFlags OPTIONAL,
///   cRLIssuer               [2]     GeneralNames OPTIONAL }
///
/// DistributionPointName ::= CHOICE {
///   fullName                [0]     GeneralNames,
///   nameRelativeToCRLIssuer [1]     RelativeDistinguishedName }
/// ```
pub fn decode_crl_distribution_points(data: &[u8]) -> Result<Vec<String>, DecodeError<Infallible>> {
    Constructed::decode(data, Mode::Der, |cons| {
        cons.take_sequence(|cons| {
            let mut urls = Vec::new();

            while let Some(mut point_urls) = cons.take_opt_sequence(|cons| {
                let urls = cons
                    .take_opt_constructed_if(Tag::CTX_0, |cons| {
                        let full_name =
                            cons.take_opt_constructed_if(Tag::CTX_0, |cons| take_uris(cons))?;
                        cons.skip_all()?;

                        Ok(full_name.unwrap_or_default())
                    })?
                    .unwrap_or_default();
                cons.skip_all()?;

                Ok(urls)
            })? {
                urls.append(&mut point_urls);
            }

            Ok(urls)
        })
    })
}

/// Decode the OCSP responder URLs out of an authority information access extension.
///
/// ```ASN.1
/// AccessDescription  ::=  SEQUENCE {
///   accessMethod          OBJECT IDENTIFIER,
///   accessLocation        GeneralName  }
/// ```
pub fn decode_ocsp_urls(data: &[u8]) -> Result<Vec<String>, DecodeError<Infallible>> {
    Constructed::decode(data, Mode::Der, |cons| {
        cons.take_sequence(|cons| {
            let mut urls = Vec::new();

            while let Some(mut location) = cons.take_opt_sequence(|cons| {
                let method = Oid::take_from(cons)?;
                let location = take_uris(cons)?;

                if method.as_ref() == OID_AD_OCSP.as_ref() {
                    Ok(location)
                } else {
                    Ok(vec![])
                }
            })? {
                urls.append(&mut location);
            }

            Ok(urls)
        })
    })
}

/// Reason a certificate was revoked.
///
/// ```ASN.1
/// CRLReason ::= ENUMERATED {
///   unspecified             (0),
///   keyCompromise           (1),
///   cACompromise            (2),
///   affiliationChanged      (3),
///   superseded              (4),
///   cessationOfOperation    (5),
///   certificateHold         (6),
///   removeFromCRL           (8),
///   privilegeWithdrawn      (9),
///   aACompromise           (10) }
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CrlReason {
    Unspecified,
    KeyCompromise,
    CaCompromise,
    AffiliationChanged,
    Superseded,
    CessationOfOperation,
    CertificateHold,
    RemoveFromCrl,
    PrivilegeWithdrawn,
    AaCompromise,
    Other(u8),
}

impl From<u8> for CrlReason {
    fn from(v: u8) -> Self {
        match v {
            0 => Self::Unspecified,
            1 => Self::KeyCompromise,
            2 => Self::CaCompromise,
            3 => Self::AffiliationChanged,
            4 => Self::Superseded,
            5 => Self::CessationOfOperation,
            6 => Self::CertificateHold,
            8 => Self::RemoveFromCrl,
            9 => Self::PrivilegeWithdrawn,
            10 => Self::AaCompromise,
            v => Self::Other(v),
        }
    }
}

impl From<CrlReason> for u8 {
    fn from(v: CrlReason) -> Self {
        match v {
            CrlReason::Unspecified => 0,
            CrlReason::KeyCompromise => 1,
            CrlReason::CaCompromise => 2,
            CrlReason::AffiliationChanged => 3,
            CrlReason::Superseded => 4,
            CrlReason::CessationOfOperation => 5,
            CrlReason::CertificateHold => 6,
            CrlReason::RemoveFromCrl => 8,
            CrlReason::PrivilegeWithdrawn => 9,
            CrlReason::AaCompromise => 10,
            CrlReason::Other(v) => v,
        }
    }
}

impl std::fmt::Display for CrlReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unspecified => f.write_str("unspecified"),
            Self::KeyCompromise => f.write_str("key compromise"),
            Self::CaCompromise => f.write_str("CA compromise"),
            Self::AffiliationChanged => f.write_str("affiliation changed"),
            Self::Superseded => f.write_str("superseded"),
            Self::CessationOfOperation => f.write_str("cessation of operation"),
            Self::CertificateHold => f.write_str("certificate hold"),
            Self::RemoveFromCrl => f.write_str("remove from CRL"),
            Self::PrivilegeWithdrawn => f.write_str("privilege withdrawn"),
            Self::AaCompromise => f.write_str("AA compromise"),
            Self::Other(v) => f.write_fmt(format_args!("reason {}", v)),
        }
    }
}

impl CrlReason {
    pub fn take_from<S: Source>(cons: &mut Constructed<S>) -> Result<Self, DecodeError<S::Error>> {
        Ok(cons
            .take_primitive_if(Tag::ENUMERATED, Unsigned::u8_from_primitive)?
            .into())
    }
}

/// Certificate revocation list (`CertificateList`).
#[derive(Clone, Debug)]
pub struct CertificateList {
    pub tbs_cert_list: TbsCertList,
    /// Encoded `tbsCertList`, including tag and length. This is what is signed.
    pub tbs_cert_list_data: Bytes,
    pub signature_algorithm: AlgorithmIdentifier,
    pub signature: BitString,
}

impl CertificateList {
    pub fn take_from<S: Source>(cons: &mut Constructed<S>) -> Result<Self, DecodeError<S::Error>> {
        cons.take_sequence(|cons| {
            let mut tbs_cert_list = None;
            let tbs_cert_list_data = cons.capture(|cons| {
                tbs_cert_list = Some(TbsCertList::take_from(cons)?);
                Ok(())
            })?;
            let signature_algorithm = AlgorithmIdentifier::take_from(cons)?;
            let signature = BitString::take_from(cons)?;

            match tbs_cert_list {
                Some(tbs_cert_list) => Ok(Self {
                    tbs_cert_list,
                    tbs_cert_list_data: tbs_cert_list_data.into_bytes(),
                    signature_algorithm,
                    signature,
                }),
                None => Err(cons.content_err("missing tbsCertList")),
            }
        })
    }

    pub fn from_der(data: &[u8]) -> Result<Self, DecodeError<Infallible>> {
        Constructed::decode(data, Mode::Der, |cons| Self::take_from(cons))
    }
}

/// The signed portion of a CRL.
///
/// Entry extensions are only consulted for the reason code.
#[derive(Clone, Debug)]
pub struct TbsCertList {
    pub version: Option<Integer>,
    pub signature: AlgorithmIdentifier,
    pub issuer: Name,
    pub this_update: DateTime<Utc>,
    pub next_update: Option<DateTime<Utc>>,
    pub revoked_certificates: Vec<RevokedCertificate>,
    pub crl_extensions: Vec<RawExtension>,
}

impl TbsCertList {
    pub fn take_from<S: Source>(cons: &mut Constructed<S>) -> Result<Self, DecodeError<S::Error>> {
        cons.take_sequence(|cons| {
            let version =
                cons.take_opt_primitive_if(Tag::INTEGER, |prim| Integer::from_primitive(prim))?;
            let signature = AlgorithmIdentifier::take_from(cons)?;
            let issuer = Name::take_from(cons)?;
            let this_update = take_time(cons)?;
            let next_update = take_opt_time(cons)?;
            let revoked_certificates = cons
                .take_opt_sequence(|cons| {
                    let mut entries = Vec::new();

                    while let Some(entry) = RevokedCertificate::take_opt_from(cons)? {
                        entries.push(entry);
                    }

                    Ok(entries)
                })?
                .unwrap_or_default();
            let crl_extensions = cons
                .take_opt_constructed_if(Tag::CTX_0, |cons| RawExtension::take_sequence_of(cons))?
                .unwrap_or_default();

            Ok(Self {
                version,
                signature,
                issuer,
                this_update,
                next_update,
                revoked_certificates,
                crl_extensions,
            })
        })
    }
}

/// An entry in the revoked certificates list.
#[derive(Clone, Debug)]
pub struct RevokedCertificate {
    pub user_certificate: Integer,
    pub revocation_date: DateTime<Utc>,
    pub reason: Option<CrlReason>,
}

impl RevokedCertificate {
    pub fn take_opt_from<S: Source>(
        cons: &mut Constructed<S>,
    ) -> Result<Option<Self>, DecodeError<S::Error>> {
        cons.take_opt_sequence(|cons| {
            let user_certificate = Integer::take_from(cons)?;
            let revocation_date = take_time(cons)?;
            let extensions = if let Some(extensions) =
                cons.take_opt_sequence(|cons| RawExtension::take_all(cons))?
            {
                extensions
            } else {
                vec![]
            };

            let mut reason = None;
            for ext in extensions
                .iter()
                .filter(|ext| ext.id.as_ref() == OID_CRL_REASON.as_ref())
            {
                reason = Some(
                    Constructed::decode(ext.value.as_ref(), Mode::Der, |cons| {
                        CrlReason::take_from(cons)
                    })
                    .map_err(DecodeError::convert)?,
                );
            }

            Ok(Self {
                user_certificate,
                revocation_date,
                reason,
            })
        })
    }
}

/// An extension kept as raw bytes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RawExtension {
    pub id: Oid,
    pub critical: bool,
    pub value: Bytes,
}

impl RawExtension {
    pub fn take_opt_from<S: Source>(
        cons: &mut Constructed<S>,
    ) -> Result<Option<Self>, DecodeError<S::Error>> {
        cons.take_opt_sequence(|cons| {
            let id = Oid::take_from(cons)?;
            let critical = cons.take_opt_bool()?.unwrap_or(false);
            let value = OctetString::take_from(cons)?.to_bytes();

            Ok(Self {
                id,
                critical,
                value,
            })
        })
    }

    pub fn take_all<S: Source>(
        cons: &mut Constructed<S>,
    ) -> Result<Vec<Self>, DecodeError<S::Error>> {
        let mut extensions = Vec::new();

        while let Some(extension) = Self::take_opt_from(cons)? {
            extensions.push(extension);
        }

        Ok(extensions)
    }

    pub fn take_sequence_of<S: Source>(
        cons: &mut Constructed<S>,
    ) -> Result<Vec<Self>, DecodeError<S::Error>> {
        cons.take_sequence(|cons| Self::take_all(cons))
    }
}
