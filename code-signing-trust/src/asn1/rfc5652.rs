// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! ASN.1 data structures defined by RFC 5652.

Only the signed-data content type is modeled. Values that are digested or
handed to other parsers (certificates, CRLs, attribute values, the
encapsulated content) are kept as captured bytes so verification sees the
exact encoding that was signed.
*/

use {
    crate::asn1::skip_content,
    bcder::{
        decode::{Constructed, Content, DecodeError, Source},
        Captured, ConstOid, Integer, Mode, OctetString, Oid, Tag,
    },
    std::convert::Infallible,
    x509_certificate::{rfc3280::Name, rfc5280::AlgorithmIdentifier},
};

/// The data content type.
///
/// 1.2.840.113549.1.7.1
pub const OID_ID_DATA: ConstOid = Oid(&[42, 134, 72, 134, 247, 13, 1, 7, 1]);

/// The signed-data content type.
///
/// 1.2.840.113549.1.7.2
pub const OID_ID_SIGNED_DATA: ConstOid = Oid(&[42, 134, 72, 134, 247, 13, 1, 7, 2]);

/// Identifies the content-type attribute.
///
/// 1.2.840.113549.1.9.3
pub const OID_CONTENT_TYPE: ConstOid = Oid(&[42, 134, 72, 134, 247, 13, 1, 9, 3]);

/// Identifies the message-digest attribute.
///
/// 1.2.840.113549.1.9.4
pub const OID_MESSAGE_DIGEST: ConstOid = Oid(&[42, 134, 72, 134, 247, 13, 1, 9, 4]);

/// Identifies the signing-time attribute.
///
/// 1.2.840.113549.1.9.5
pub const OID_SIGNING_TIME: ConstOid = Oid(&[42, 134, 72, 134, 247, 13, 1, 9, 5]);

/// Identifies the countersignature attribute.
///
/// 1.2.840.113549.1.9.6
pub const OID_COUNTER_SIGNATURE: ConstOid = Oid(&[42, 134, 72, 134, 247, 13, 1, 9, 6]);

/// Outermost wrapper of a CMS message.
#[derive(Clone, Debug)]
pub struct ContentInfo {
    pub content_type: Oid,
    pub content: Captured,
}

impl ContentInfo {
    pub fn take_from<S: Source>(cons: &mut Constructed<S>) -> Result<Self, DecodeError<S::Error>> {
        cons.take_sequence(|cons| {
            let content_type = Oid::take_from(cons)?;
            let content = cons.take_constructed_if(Tag::CTX_0, |cons| cons.capture_all())?;

            Ok(Self {
                content_type,
                content,
            })
        })
    }
}

/// `SignedData` (RFC 5652 section 5.1).
///
/// `version` is read and discarded. Verification does not depend on it.
#[derive(Clone, Debug)]
pub struct SignedData {
    pub digest_algorithms: Vec<AlgorithmIdentifier>,
    pub content_info: EncapsulatedContentInfo,
    /// Raw DER/BER of each `Certificate` in the certificate set.
    ///
    /// Other certificate formats are skipped.
    pub certificates: Vec<Captured>,
    /// Raw DER/BER of each `CertificateList` in the revocation info set.
    pub crls: Vec<Captured>,
    pub signer_infos: Vec<SignerInfo>,
}

impl SignedData {
    pub fn take_from<S: Source>(cons: &mut Constructed<S>) -> Result<Self, DecodeError<S::Error>> {
        cons.take_sequence(|cons| {
            Integer::take_from(cons)?;
            let digest_algorithms = cons.take_set(|cons| {
                collect(cons, |cons| AlgorithmIdentifier::take_opt_from(cons))
            })?;
            let content_info = EncapsulatedContentInfo::take_from(cons)?;
            let certificates = cons
                .take_opt_constructed_if(Tag::CTX_0, |cons| take_sequences(cons))?
                .unwrap_or_default();
            let crls = cons
                .take_opt_constructed_if(Tag::CTX_1, |cons| take_sequences(cons))?
                .unwrap_or_default();
            let signer_infos = cons.take_set(|cons| {
                collect(cons, |cons| cons.take_opt_sequence(SignerInfo::from_sequence))
            })?;

            Ok(Self {
                digest_algorithms,
                content_info,
                certificates,
                crls,
                signer_infos,
            })
        })
    }
}

/// Repeatedly apply `take` until it yields nothing.
fn collect<S: Source, T>(
    cons: &mut Constructed<S>,
    mut take: impl FnMut(&mut Constructed<S>) -> Result<Option<T>, DecodeError<S::Error>>,
) -> Result<Vec<T>, DecodeError<S::Error>> {
    let mut items = Vec::new();
    while let Some(item) = take(cons)? {
        items.push(item);
    }

    Ok(items)
}

/// Capture every remaining value, keeping only `SEQUENCE` ones.
fn take_sequences<S: Source>(
    cons: &mut Constructed<S>,
) -> Result<Vec<Captured>, DecodeError<S::Error>> {
    let mut values = Vec::new();

    loop {
        let mut is_sequence = false;
        let captured = cons.capture(|cons| {
            cons.take_opt_value(|tag, content| {
                is_sequence = tag == Tag::SEQUENCE;
                skip_content(content)
            })?;
            Ok(())
        })?;

        if captured.is_empty() {
            break;
        }
        if is_sequence {
            values.push(captured);
        }
    }

    Ok(values)
}

/// `EncapsulatedContentInfo`: the signed payload and its type.
///
/// Authenticode places a `SpcIndirectDataContent` SEQUENCE directly inside
/// the `[0]` wrapper instead of an OCTET STRING, so the wrapped value is
/// captured verbatim.
#[derive(Clone, Debug)]
pub struct EncapsulatedContentInfo {
    pub content_type: Oid,
    pub content: Option<Captured>,
}

impl EncapsulatedContentInfo {
    pub fn take_from<S: Source>(cons: &mut Constructed<S>) -> Result<Self, DecodeError<S::Error>> {
        cons.take_sequence(|cons| {
            let content_type = Oid::take_from(cons)?;
            let content = cons.take_opt_constructed_if(Tag::CTX_0, |cons| cons.capture_all())?;

            Ok(Self {
                content_type,
                content,
            })
        })
    }

    /// Resolve the bytes covered by the message digest.
    ///
    /// For an OCTET STRING this is the string value. For any other type it is
    /// the content octets of the value, without tag and length.
    pub fn digested_content(&self) -> Option<Result<Vec<u8>, DecodeError<Infallible>>> {
        let data = self.content.as_ref()?.as_slice();

        Some(
            if data.first().map(|b| b & 0xdf) == Some(0x04) {
                Constructed::decode(data, Mode::Ber, |cons| {
                    Ok(OctetString::take_from(cons)?.to_bytes().to_vec())
                })
            } else {
                Constructed::decode(data, Mode::Ber, |cons| {
                    cons.take_value(|_, content| match content {
                        Content::Primitive(prim) => Ok(prim.take_all()?.to_vec()),
                        Content::Constructed(inner) => Ok(inner.capture_all()?.as_slice().to_vec()),
                    })
                })
            },
        )
    }
}

/// One `SignerInfo` of a signed-data message.
#[derive(Clone, Debug)]
pub struct SignerInfo {
    pub sid: SignerIdentifier,
    pub digest_algorithm: AlgorithmIdentifier,
    pub signed_attributes: Option<Vec<Attribute>>,
    pub signature_algorithm: AlgorithmIdentifier,
    pub signature: OctetString,
    pub unsigned_attributes: Option<Vec<Attribute>>,

    /// Content octets of `signedAttrs`, without the `[0]` header.
    pub signed_attributes_data: Option<Vec<u8>>,
}

impl SignerInfo {
    /// Decode a `SignerInfo`, as found in the countersignature attribute.
    pub fn take_from<S: Source>(cons: &mut Constructed<S>) -> Result<Self, DecodeError<S::Error>> {
        cons.take_sequence(Self::from_sequence)
    }

    fn from_sequence<S: Source>(cons: &mut Constructed<S>) -> Result<Self, DecodeError<S::Error>> {
        Integer::take_from(cons)?;
        let sid = SignerIdentifier::take_from(cons)?;
        let digest_algorithm = AlgorithmIdentifier::take_from(cons)?;
        let signed_attributes_data = cons
            .take_opt_constructed_if(Tag::CTX_0, |cons| cons.capture_all())?
            .map(|captured| captured.as_slice().to_vec());
        let signature_algorithm = AlgorithmIdentifier::take_from(cons)?;
        let signature = OctetString::take_from(cons)?;
        let unsigned_attributes =
            cons.take_opt_constructed_if(Tag::CTX_1, |cons| Attribute::take_all(cons))?;

        // Signed attributes must be DER even when the outer structure is BER.
        // Parse them from the stashed bytes, which are also what gets digested.
        let signed_attributes = match &signed_attributes_data {
            Some(data) => Some(
                Constructed::decode(data.as_slice(), Mode::Der, |cons| Attribute::take_all(cons))
                    .map_err(DecodeError::convert)?,
            ),
            None => None,
        };

        Ok(Self {
            sid,
            digest_algorithm,
            signed_attributes,
            signature_algorithm,
            signature,
            unsigned_attributes,
            signed_attributes_data,
        })
    }

    /// Bytes the signature covers when signed attributes are present.
    ///
    /// This is `signedAttrs` re-tagged as a universal `SET OF`.
    pub fn signed_attributes_digested_content(&self) -> Option<Vec<u8>> {
        self.signed_attributes_data.as_ref().map(|data| {
            [&[0x31][..], &encode_length(data.len()), data].concat()
        })
    }
}

/// DER length octets for a value of `len` bytes.
pub fn encode_length(len: usize) -> Vec<u8> {
    if len < 0x80 {
        vec![len as u8]
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        let mut res = vec![0x80 | (bytes.len() - skip) as u8];
        res.extend_from_slice(&bytes[skip..]);
        res
    }
}

/// `SignerIdentifier`: how a signer names its certificate.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SignerIdentifier {
    IssuerAndSerialNumber { issuer: Name, serial_number: Integer },
    SubjectKeyIdentifier(OctetString),
}

impl SignerIdentifier {
    pub fn take_from<S: Source>(cons: &mut Constructed<S>) -> Result<Self, DecodeError<S::Error>> {
        if let Some(identifier) =
            cons.take_opt_value_if(Tag::CTX_0, |content| OctetString::from_content(content))?
        {
            Ok(Self::SubjectKeyIdentifier(identifier))
        } else {
            cons.take_sequence(|cons| {
                let issuer = Name::take_from(cons)?;
                let serial_number = Integer::take_from(cons)?;

                Ok(Self::IssuerAndSerialNumber {
                    issuer,
                    serial_number,
                })
            })
        }
    }
}

impl std::fmt::Display for SignerIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IssuerAndSerialNumber {
                issuer,
                serial_number,
            } => f.write_fmt(format_args!(
                "issuer {} serial {}",
                issuer
                    .user_friendly_str()
                    .unwrap_or_else(|_| "<unprintable>".to_string()),
                hex::encode(serial_number.as_slice())
            )),
            Self::SubjectKeyIdentifier(ski) => {
                f.write_fmt(format_args!("subject key {}", hex::encode(ski.to_bytes())))
            }
        }
    }
}

/// An attribute with each of its values captured verbatim.
#[derive(Clone, Debug)]
pub struct Attribute {
    pub typ: Oid,
    pub values: Vec<Captured>,
}

impl Attribute {
    pub fn take_opt_from<S: Source>(
        cons: &mut Constructed<S>,
    ) -> Result<Option<Self>, DecodeError<S::Error>> {
        cons.take_opt_sequence(|cons| {
            let typ = Oid::take_from(cons)?;
            let values = cons.take_set(|cons| {
                collect(cons, |cons| {
                    let value = cons.capture(|cons| {
                        cons.take_opt_value(|_, content| skip_content(content))?;
                        Ok(())
                    })?;

                    Ok((!value.is_empty()).then_some(value))
                })
            })?;

            Ok(Self { typ, values })
        })
    }

    /// Take every attribute remaining in a SET.
    pub fn take_all<S: Source>(
        cons: &mut Constructed<S>,
    ) -> Result<Vec<Self>, DecodeError<S::Error>> {
        collect(cons, Self::take_opt_from)
    }
}

/// Find the values of an attribute by type.
pub fn attribute_values<'a>(
    attributes: &'a [Attribute],
    typ: &'a ConstOid,
) -> impl Iterator<Item = &'a Captured> + 'a {
    attributes
        .iter()
        .filter(move |attr| attr.typ.as_ref() == typ.as_ref())
        .flat_map(|attr| attr.values.iter())
}
