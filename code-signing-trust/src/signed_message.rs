// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! High-level model of a parsed CMS `SignedData` signature.

use {
    crate::{
        asn1::{
            rfc3161::OID_TIME_STAMP_TOKEN,
            rfc5652::{
                self, attribute_values, ContentInfo, SignerIdentifier, OID_CONTENT_TYPE,
                OID_COUNTER_SIGNATURE, OID_ID_SIGNED_DATA, OID_MESSAGE_DIGEST, OID_SIGNING_TIME,
            },
            time::take_time,
        },
        certificate::{verify_signature, CodeSigningCertificate},
        error::TrustError,
        timestamp::TimestampToken,
    },
    bcder::{decode::Constructed, Captured, ConstOid, Mode, OctetString, Oid},
    bytes::Bytes,
    chrono::{DateTime, Utc},
    log::warn,
    once_cell::sync::OnceCell,
    x509_certificate::{CapturedX509Certificate, DigestAlgorithm},
};

/// Microsoft nested signature attribute (`szOID_NESTED_SIGNATURE`).
///
/// 1.3.6.1.4.1.311.2.4.1
pub const OID_NESTED_SIGNATURE: ConstOid = Oid(&[43, 6, 1, 4, 1, 130, 55, 2, 4, 1]);

/// Microsoft RFC 3161 timestamp attribute (`szOID_RFC3161_counterSign`).
///
/// 1.3.6.1.4.1.311.3.3.1
pub const OID_MS_COUNTER_SIGN: ConstOid = Oid(&[43, 6, 1, 4, 1, 130, 55, 3, 3, 1]);

/// Raw signature material extracted from an artifact.
///
/// `signed_content` is only present for formats whose signature is detached
/// from the signed bytes (Mach-O, MSI).
#[derive(Clone, Debug, Default)]
pub struct SignatureData {
    pub signed_content: Option<Bytes>,
    pub cms: Bytes,
}

impl SignatureData {
    pub fn attached(cms: impl Into<Bytes>) -> Self {
        Self {
            signed_content: None,
            cms: cms.into(),
        }
    }

    pub fn detached(cms: impl Into<Bytes>, signed_content: impl Into<Bytes>) -> Self {
        Self {
            signed_content: Some(signed_content.into()),
            cms: cms.into(),
        }
    }

    /// An empty blob means the artifact is not signed.
    pub fn is_empty(&self) -> bool {
        self.cms.is_empty()
    }
}

/// Decode PEM holding CMS data under a `PKCS7` or `CMS` tag.
pub fn decode_pem(data: impl AsRef<[u8]>) -> Result<Vec<u8>, TrustError> {
    let pem = pem::parse(data)?;

    match pem.tag.as_str() {
        "PKCS7" | "CMS" => Ok(pem.contents),
        tag => Err(TrustError::NotSignedData(format!("PEM tag {}", tag))),
    }
}

/// A parsed CMS signed-data structure.
///
/// Instances are immutable once parsed.
#[derive(Debug)]
pub struct SignedMessage {
    digest_algorithms: Vec<Oid>,
    content_type: Oid,
    signed_content: Option<Vec<u8>>,
    certificates: Vec<CapturedX509Certificate>,
    crls: Vec<Bytes>,
    signers: Vec<SignerInfo>,
}

impl SignedMessage {
    /// Parse extracted signature data.
    ///
    /// Detached content, when present, replaces any encapsulated content as
    /// the payload that signatures are checked against.
    pub fn parse(data: &SignatureData) -> Result<Self, TrustError> {
        if data.is_empty() {
            return Err(TrustError::NotSigned);
        }

        let mut message = Self::from_ber(data.cms.as_ref())?;
        if let Some(content) = &data.signed_content {
            message.signed_content = Some(content.to_vec());
        }

        Ok(message)
    }

    /// Parse a BER or DER encoded `ContentInfo` holding signed data.
    pub fn from_ber(data: &[u8]) -> Result<Self, TrustError> {
        let content_info = Constructed::decode(data, Mode::Ber, |cons| ContentInfo::take_from(cons))?;

        if content_info.content_type.as_ref() != OID_ID_SIGNED_DATA.as_ref() {
            return Err(TrustError::NotSignedData(
                content_info.content_type.to_string(),
            ));
        }

        let signed_data = Constructed::decode(content_info.content.as_slice(), Mode::Ber, |cons| {
            rfc5652::SignedData::take_from(cons)
        })?;

        Self::from_signed_data(signed_data)
    }

    /// Parse PEM data with a `PKCS7` or `CMS` tag.
    pub fn from_pem(data: impl AsRef<[u8]>) -> Result<Self, TrustError> {
        Self::from_ber(&decode_pem(data)?)
    }

    fn from_signed_data(signed_data: rfc5652::SignedData) -> Result<Self, TrustError> {
        let signed_content = match signed_data.content_info.digested_content() {
            Some(content) => Some(content?),
            None => None,
        };

        let certificates = signed_data
            .certificates
            .iter()
            .map(|cert| CapturedX509Certificate::from_der(cert.as_slice().to_vec()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            digest_algorithms: signed_data
                .digest_algorithms
                .into_iter()
                .map(|alg| alg.algorithm)
                .collect(),
            content_type: signed_data.content_info.content_type,
            signed_content,
            certificates,
            crls: signed_data
                .crls
                .into_iter()
                .map(|crl| crl.into_bytes())
                .collect(),
            signers: signed_data
                .signer_infos
                .into_iter()
                .map(SignerInfo::new)
                .collect(),
        })
    }

    /// OIDs of the digest algorithms the message declares.
    pub fn digest_algorithms(&self) -> &[Oid] {
        &self.digest_algorithms
    }

    /// Content type of the encapsulated content.
    pub fn content_type(&self) -> &Oid {
        &self.content_type
    }

    /// The bytes signatures in this message are checked against.
    pub fn signed_content(&self) -> Option<&[u8]> {
        self.signed_content.as_deref()
    }

    /// Certificates embedded in the message. These are not trusted.
    pub fn certificates(&self) -> &[CapturedX509Certificate] {
        &self.certificates
    }

    /// DER encoded CRLs embedded in the message.
    pub fn crls(&self) -> &[Bytes] {
        &self.crls
    }

    pub fn signers(&self) -> impl Iterator<Item = &SignerInfo> {
        self.signers.iter()
    }
}

/// One signer of a signed message.
///
/// Countersignatures and the timestamp token are derived from the unsigned
/// attributes on first access and memoized.
#[derive(Debug)]
pub struct SignerInfo {
    raw: rfc5652::SignerInfo,
    countersignatures: OnceCell<Result<Vec<SignerInfo>, TrustError>>,
    timestamp_token: OnceCell<Option<Result<TimestampToken, TrustError>>>,
}

impl SignerInfo {
    fn new(raw: rfc5652::SignerInfo) -> Self {
        Self {
            raw,
            countersignatures: OnceCell::new(),
            timestamp_token: OnceCell::new(),
        }
    }

    pub fn identifier(&self) -> &SignerIdentifier {
        &self.raw.sid
    }

    /// Raw signature bytes.
    pub fn signature(&self) -> Bytes {
        self.raw.signature.to_bytes()
    }

    pub fn digest_algorithm(&self) -> Result<DigestAlgorithm, TrustError> {
        DigestAlgorithm::try_from(&self.raw.digest_algorithm).map_err(|_| {
            TrustError::UnsupportedDigestAlgorithm(self.raw.digest_algorithm.algorithm.to_string())
        })
    }

    pub fn has_signed_attributes(&self) -> bool {
        self.raw.signed_attributes.is_some()
    }

    fn signed_attribute<'a>(&'a self, oid: &'a ConstOid) -> Option<&'a Captured> {
        attribute_values(self.raw.signed_attributes.as_deref().unwrap_or_default(), oid).next()
    }

    fn unsigned_attribute_values<'a>(
        &'a self,
        oid: &'a ConstOid,
    ) -> impl Iterator<Item = &'a Captured> + 'a {
        attribute_values(
            self.raw.unsigned_attributes.as_deref().unwrap_or_default(),
            oid,
        )
    }

    /// Whether a content-type attribute is among the signed attributes.
    pub fn has_content_type_attribute(&self) -> bool {
        self.signed_attribute(&OID_CONTENT_TYPE).is_some()
    }

    /// The signed `signing-time` attribute.
    pub fn signing_time(&self) -> Option<DateTime<Utc>> {
        let value = self.signed_attribute(&OID_SIGNING_TIME)?;

        Constructed::decode(value.as_slice(), Mode::Der, |cons| take_time(cons)).ok()
    }

    /// The signed `message-digest` attribute.
    pub fn message_digest(&self) -> Option<Bytes> {
        let value = self.signed_attribute(&OID_MESSAGE_DIGEST)?;

        Constructed::decode(value.as_slice(), Mode::Der, |cons| {
            Ok(OctetString::take_from(cons)?.to_bytes())
        })
        .ok()
    }

    /// Find the certificate that produced this signature.
    pub fn find_certificate<'a>(
        &self,
        certs: &'a [CapturedX509Certificate],
    ) -> Option<&'a CapturedX509Certificate> {
        certs.iter().find(|cert| match &self.raw.sid {
            SignerIdentifier::IssuerAndSerialNumber {
                issuer,
                serial_number,
            } => cert.issuer_name() == issuer && cert.serial_number_asn1() == serial_number,
            SignerIdentifier::SubjectKeyIdentifier(key_id) => {
                cert.subject_key_identifier() == Some(key_id.to_bytes())
            }
        })
    }

    /// Verify the signature over `content` with a signer certificate.
    ///
    /// With signed attributes present, the `message-digest` attribute must
    /// match the digest of `content` and the signature covers the attributes.
    /// Otherwise the signature covers `content` directly.
    pub fn verify_signature(
        &self,
        cert: &CapturedX509Certificate,
        content: &[u8],
    ) -> Result<(), TrustError> {
        let digest_algorithm = self.digest_algorithm()?;

        let signed_data = match self.raw.signed_attributes_digested_content() {
            Some(signed_data) => {
                let declared = self
                    .message_digest()
                    .ok_or(TrustError::MissingMessageDigest)?;

                let mut hasher = digest_algorithm.digester();
                hasher.update(content);
                let computed = hasher.finish();

                if declared.as_ref() != computed.as_ref() {
                    return Err(TrustError::MessageDigestMismatch {
                        declared: hex::encode(declared),
                        computed: hex::encode(computed.as_ref()),
                    });
                }

                signed_data
            }
            None => content.to_vec(),
        };

        verify_signature(
            cert,
            &self.raw.signature_algorithm,
            Some(digest_algorithm),
            &signed_data,
            self.raw.signature.to_bytes().as_ref(),
        )
    }

    /// Countersignatures carried in the unsigned attributes.
    pub fn countersignatures(&self) -> Result<&[SignerInfo], &TrustError> {
        self.countersignatures
            .get_or_init(|| {
                self.unsigned_attribute_values(&OID_COUNTER_SIGNATURE)
                    .map(|value| -> Result<SignerInfo, TrustError> {
                        Ok(SignerInfo::new(Constructed::decode(
                            value.as_slice(),
                            Mode::Ber,
                            |cons| rfc5652::SignerInfo::take_from(cons),
                        )?))
                    })
                    .collect()
            })
            .as_deref()
    }

    /// The timestamp token carried in the unsigned attributes.
    ///
    /// The Microsoft attribute wins when both it and the RFC 3161 attribute
    /// are present.
    pub fn timestamp_token(&self) -> Option<Result<&TimestampToken, &TrustError>> {
        self.timestamp_token
            .get_or_init(|| {
                let value = self
                    .unsigned_attribute_values(&OID_MS_COUNTER_SIGN)
                    .next()
                    .or_else(|| self.unsigned_attribute_values(&OID_TIME_STAMP_TOKEN).next())?;

                Some(TimestampToken::from_der(value.as_slice()))
            })
            .as_ref()
            .map(|token| token.as_ref())
    }

    /// Complete signed messages nested in the unsigned attributes.
    ///
    /// These are parsed anew on every call. The Microsoft counter-sign
    /// attribute is read by [Self::timestamp_token] instead.
    pub fn nested_messages(&self) -> Vec<Result<SignedMessage, TrustError>> {
        self.unsigned_attribute_values(&OID_NESTED_SIGNATURE)
            .map(|value| {
                let message = SignedMessage::from_ber(value.as_slice());
                if let Err(e) = &message {
                    warn!("unable to parse nested signature: {}", e);
                }
                message
            })
            .collect()
    }
}
