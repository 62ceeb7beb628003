// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Builders for a throwaway PKI and the signed structures tests verify.
//!
//! Everything is generated in process with ECDSA P-256 keys so tests need
//! neither fixture files nor network access.

use {
    crate::{
        asn1::{
            rfc3161::{OID_CONTENT_TYPE_TST_INFO, OID_TIME_STAMP_TOKEN},
            rfc5280::{
                OID_AD_OCSP, OID_AUTHORITY_INFO_ACCESS, OID_AUTHORITY_KEY_IDENTIFIER,
                OID_BASIC_CONSTRAINTS, OID_CRL_DISTRIBUTION_POINTS, OID_CRL_REASON,
                OID_EKU_CODE_SIGNING, OID_EKU_OCSP_SIGNING, OID_EKU_TIME_STAMPING,
                OID_EXTENDED_KEY_USAGE, OID_KEY_USAGE, OID_SUBJECT_KEY_IDENTIFIER,
            },
            rfc5652::{
                encode_length, OID_CONTENT_TYPE, OID_COUNTER_SIGNATURE, OID_ID_DATA,
                OID_ID_SIGNED_DATA, OID_MESSAGE_DIGEST, OID_SIGNING_TIME,
            },
            rfc6960::{OID_PKIX_OCSP_BASIC, OID_SHA1},
        },
        crl::{CrlCache, CrlFetcher, CrlProvider},
        error::TrustError,
        ocsp::OcspTransport,
        settings::{TrustAnchors, VerificationParams, VerificationSettings},
        signed_message::{OID_MS_COUNTER_SIGN, OID_NESTED_SIGNATURE},
    },
    bcder::{decode::Constructed, Mode},
    bytes::Bytes,
    chrono::{DateTime, Datelike, Duration, Utc},
    ring::{
        digest,
        rand::SystemRandom,
        signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_ASN1_SIGNING},
    },
    std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicU64, AtomicUsize, Ordering},
            Arc, Mutex,
        },
    },
    x509_certificate::{rfc5280::AlgorithmIdentifier, CapturedX509Certificate},
};

pub const TEST_URL_BASE: &str = "http://pki.test";

const OID_EC_PUBLIC_KEY: &[u8] = &[42, 134, 72, 206, 61, 2, 1];
const OID_PRIME256V1: &[u8] = &[42, 134, 72, 206, 61, 3, 1, 7];
const OID_ECDSA_SHA256: &[u8] = &[42, 134, 72, 206, 61, 4, 3, 2];
const OID_SHA256: &[u8] = &[96, 134, 72, 1, 101, 3, 4, 2, 1];
const OID_COMMON_NAME: &[u8] = &[85, 4, 3];
const OID_SPC_INDIRECT_DATA: &[u8] = &[43, 6, 1, 4, 1, 130, 55, 2, 1, 4];
const OID_TEST_POLICY: &[u8] = &[42, 3, 4];

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1000);

pub fn der_tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend(encode_length(content.len()));
    out.extend_from_slice(content);
    out
}

pub fn der_sequence(parts: &[Vec<u8>]) -> Vec<u8> {
    der_tlv(0x30, &parts.concat())
}

pub fn der_set(parts: &[Vec<u8>]) -> Vec<u8> {
    der_tlv(0x31, &parts.concat())
}

pub fn der_oid(oid: &[u8]) -> Vec<u8> {
    der_tlv(0x06, oid)
}

pub fn der_integer(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes
        .iter()
        .take_while(|b| **b == 0)
        .count()
        .min(bytes.len() - 1);
    let mut content = bytes[skip..].to_vec();
    if content[0] & 0x80 != 0 {
        content.insert(0, 0);
    }

    der_tlv(0x02, &content)
}

pub fn der_octet_string(data: &[u8]) -> Vec<u8> {
    der_tlv(0x04, data)
}

pub fn der_bit_string(data: &[u8]) -> Vec<u8> {
    let mut content = vec![0];
    content.extend_from_slice(data);
    der_tlv(0x03, &content)
}

pub fn der_enumerated(value: u8) -> Vec<u8> {
    der_tlv(0x0a, &[value])
}

pub fn der_generalized_time(time: DateTime<Utc>) -> Vec<u8> {
    der_tlv(0x18, time.format("%Y%m%d%H%M%SZ").to_string().as_bytes())
}

/// Encode a `Time`, using UTCTime where RFC 5280 requires it.
pub fn der_time(time: DateTime<Utc>) -> Vec<u8> {
    if (1950..2050).contains(&time.year()) {
        der_tlv(0x17, time.format("%y%m%d%H%M%SZ").to_string().as_bytes())
    } else {
        der_generalized_time(time)
    }
}

pub fn der_explicit(number: u8, inner: &[u8]) -> Vec<u8> {
    der_tlv(0xa0 | number, inner)
}

pub fn der_name(common_name: &str) -> Vec<u8> {
    der_sequence(&[der_set(&[der_sequence(&[
        der_oid(OID_COMMON_NAME),
        der_tlv(0x0c, common_name.as_bytes()),
    ])])])
}

fn der_attribute(oid: &[u8], value: Vec<u8>) -> Vec<u8> {
    der_sequence(&[der_oid(oid), der_set(&[value])])
}

fn der_extension(oid: &[u8], critical: bool, value: &[u8]) -> Vec<u8> {
    let mut parts = vec![der_oid(oid)];
    if critical {
        parts.push(vec![0x01, 0x01, 0xff]);
    }
    parts.push(der_octet_string(value));

    der_sequence(&parts)
}

fn ecdsa_sha256_der() -> Vec<u8> {
    der_sequence(&[der_oid(OID_ECDSA_SHA256)])
}

fn sha256_algorithm_der() -> Vec<u8> {
    der_sequence(&[der_oid(OID_SHA256)])
}

pub fn ecdsa_sha256_algorithm() -> AlgorithmIdentifier {
    Constructed::decode(ecdsa_sha256_der().as_slice(), Mode::Der, |cons| {
        AlgorithmIdentifier::take_from(cons)
    })
    .unwrap()
}

pub fn sha256(data: &[u8]) -> Vec<u8> {
    digest::digest(&digest::SHA256, data).as_ref().to_vec()
}

pub fn sha1(data: &[u8]) -> Vec<u8> {
    digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, data)
        .as_ref()
        .to_vec()
}

/// Drop sub-second precision, which the encoders above don't carry.
pub fn whole_seconds(time: DateTime<Utc>) -> DateTime<Utc> {
    time - Duration::nanoseconds(time.timestamp_subsec_nanos() as i64)
}

/// Flip one bit in the first occurrence of `needle`.
pub fn tamper(data: &mut [u8], needle: &[u8]) {
    let offset = data
        .windows(needle.len())
        .position(|window| window == needle)
        .expect("needle not found");
    data[offset] ^= 0x01;
}

pub struct TestKey {
    pair: EcdsaKeyPair,
    rng: SystemRandom,
}

impl TestKey {
    pub fn generate() -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng).unwrap();
        let pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8.as_ref(), &rng)
                .unwrap();

        Self { pair, rng }
    }

    pub fn public_key(&self) -> &[u8] {
        self.pair.public_key().as_ref()
    }

    pub fn key_id(&self) -> Vec<u8> {
        sha1(self.public_key())
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.pair.sign(&self.rng, message).unwrap().as_ref().to_vec()
    }

    fn subject_public_key_info(&self) -> Vec<u8> {
        der_sequence(&[
            der_sequence(&[der_oid(OID_EC_PUBLIC_KEY), der_oid(OID_PRIME256V1)]),
            der_bit_string(self.public_key()),
        ])
    }
}

/// Description of a certificate to issue.
#[derive(Clone, Debug)]
pub struct CertProfile {
    name: String,
    serial: Option<u64>,
    ca: bool,
    path_len: Option<u32>,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    eku: Option<(Vec<&'static [u8]>, bool)>,
    revocation_info: bool,
    crl_url: Option<String>,
    authority_key_id: bool,
    extensions: Vec<(Vec<u8>, bool, Vec<u8>)>,
}

impl CertProfile {
    fn new(name: &str) -> Self {
        let now = whole_seconds(Utc::now());

        Self {
            name: name.to_string(),
            serial: None,
            ca: false,
            path_len: None,
            not_before: now - Duration::days(30),
            not_after: now + Duration::days(365),
            eku: None,
            revocation_info: true,
            crl_url: None,
            authority_key_id: true,
            extensions: vec![],
        }
    }

    pub fn ca(name: &str) -> Self {
        let now = whole_seconds(Utc::now());

        Self {
            ca: true,
            not_before: now - Duration::days(3650),
            not_after: now + Duration::days(3650),
            ..Self::new(name)
        }
    }

    pub fn leaf(name: &str) -> Self {
        Self::new(name).eku(vec![OID_EKU_CODE_SIGNING.0], false)
    }

    pub fn timestamping(name: &str) -> Self {
        Self::new(name)
            .eku(vec![OID_EKU_TIME_STAMPING.0], true)
            .no_revocation_info()
    }

    pub fn ocsp_responder(name: &str) -> Self {
        Self::new(name)
            .eku(vec![OID_EKU_OCSP_SIGNING.0], false)
            .no_revocation_info()
    }

    pub fn serial(mut self, serial: u64) -> Self {
        self.serial = Some(serial);
        self
    }

    pub fn path_len(mut self, path_len: u32) -> Self {
        self.path_len = Some(path_len);
        self
    }

    pub fn not_ca(mut self) -> Self {
        self.ca = false;
        self
    }

    pub fn validity(mut self, not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> Self {
        self.not_before = whole_seconds(not_before);
        self.not_after = whole_seconds(not_after);
        self
    }

    pub fn eku(mut self, purposes: Vec<&'static [u8]>, critical: bool) -> Self {
        self.eku = Some((purposes, critical));
        self
    }

    pub fn no_eku(mut self) -> Self {
        self.eku = None;
        self
    }

    pub fn no_revocation_info(mut self) -> Self {
        self.revocation_info = false;
        self
    }

    pub fn crl_url(mut self, url: impl ToString) -> Self {
        self.crl_url = Some(url.to_string());
        self
    }

    pub fn no_authority_key_id(mut self) -> Self {
        self.authority_key_id = false;
        self
    }

    pub fn extension(mut self, oid: &[u8], critical: bool, value: &[u8]) -> Self {
        self.extensions
            .push((oid.to_vec(), critical, value.to_vec()));
        self
    }
}

/// A certificate with its private key.
pub struct TestIdentity {
    pub name: String,
    pub cert: CapturedX509Certificate,
    pub key: TestKey,
    pub serial: u64,
    pub issuer_name: String,
}

impl TestIdentity {
    pub fn self_signed(profile: CertProfile) -> Self {
        let key = TestKey::generate();
        let der = build_certificate(&profile, &key, &profile.name, &key, None);

        Self::from_parts(profile, key, der.0, der.1, None)
    }

    pub fn issue(&self, profile: CertProfile) -> Self {
        let key = TestKey::generate();
        let (der, serial) = build_certificate(&profile, &key, &self.name, &self.key, Some(self));

        Self::from_parts(profile, key, der, serial, Some(&self.name))
    }

    fn from_parts(
        profile: CertProfile,
        key: TestKey,
        der: Vec<u8>,
        serial: u64,
        issuer: Option<&str>,
    ) -> Self {
        Self {
            issuer_name: issuer.unwrap_or(&profile.name).to_string(),
            name: profile.name,
            cert: CapturedX509Certificate::from_der(der).unwrap(),
            key,
            serial,
        }
    }

    pub fn der(&self) -> Vec<u8> {
        self.cert.constructed_data().to_vec()
    }

    pub fn key_id(&self) -> Vec<u8> {
        self.key.key_id()
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.key.sign(message)
    }

    pub fn crl(&self) -> CrlBuilder<'_> {
        CrlBuilder::new(self)
    }
}

fn build_certificate(
    profile: &CertProfile,
    key: &TestKey,
    issuer_name: &str,
    issuer_key: &TestKey,
    issuer: Option<&TestIdentity>,
) -> (Vec<u8>, u64) {
    let serial = profile
        .serial
        .unwrap_or_else(|| NEXT_SERIAL.fetch_add(1, Ordering::SeqCst));

    let mut extensions = vec![der_extension(
        OID_SUBJECT_KEY_IDENTIFIER.0,
        false,
        &der_octet_string(&key.key_id()),
    )];

    if profile.authority_key_id {
        extensions.push(der_extension(
            OID_AUTHORITY_KEY_IDENTIFIER.0,
            false,
            &der_sequence(&[der_tlv(0x80, &issuer_key.key_id())]),
        ));
    }

    if profile.ca {
        let mut constraints = vec![vec![0x01, 0x01, 0xff]];
        if let Some(path_len) = profile.path_len {
            constraints.push(der_integer(path_len as u64));
        }
        extensions.push(der_extension(
            OID_BASIC_CONSTRAINTS.0,
            true,
            &der_sequence(&constraints),
        ));
        // keyCertSign and cRLSign
        extensions.push(der_extension(OID_KEY_USAGE.0, true, &[0x03, 0x02, 0x01, 0x06]));
    } else {
        // digitalSignature
        extensions.push(der_extension(OID_KEY_USAGE.0, true, &[0x03, 0x02, 0x07, 0x80]));
    }

    if let Some((purposes, critical)) = &profile.eku {
        let purposes = purposes.iter().map(|oid| der_oid(oid)).collect::<Vec<_>>();
        extensions.push(der_extension(
            OID_EXTENDED_KEY_USAGE.0,
            *critical,
            &der_sequence(&purposes),
        ));
    }

    if profile.revocation_info && issuer.is_some() {
        let crl_url = profile
            .crl_url
            .clone()
            .unwrap_or_else(|| format!("{}/{}.crl", TEST_URL_BASE, issuer_name));
        extensions.push(der_extension(
            OID_CRL_DISTRIBUTION_POINTS.0,
            false,
            &der_sequence(&[der_sequence(&[der_explicit(
                0,
                &der_explicit(0, &der_tlv(0x86, crl_url.as_bytes())),
            )])]),
        ));

        let ocsp_url = format!("{}/ocsp", TEST_URL_BASE);
        extensions.push(der_extension(
            OID_AUTHORITY_INFO_ACCESS.0,
            false,
            &der_sequence(&[der_sequence(&[
                der_oid(OID_AD_OCSP.0),
                der_tlv(0x86, ocsp_url.as_bytes()),
            ])]),
        ));
    }

    for (oid, critical, value) in &profile.extensions {
        extensions.push(der_extension(oid, *critical, value));
    }

    let tbs = der_sequence(&[
        der_explicit(0, &der_integer(2)),
        der_integer(serial),
        ecdsa_sha256_der(),
        der_name(issuer_name),
        der_sequence(&[der_time(profile.not_before), der_time(profile.not_after)]),
        der_name(&profile.name),
        key.subject_public_key_info(),
        der_explicit(3, &der_sequence(&extensions)),
    ]);

    let signature = issuer_key.sign(&tbs);

    (
        der_sequence(&[tbs, ecdsa_sha256_der(), der_bit_string(&signature)]),
        serial,
    )
}

/// A three level code signing hierarchy plus timestamping and OCSP identities.
pub struct TestPki {
    pub root: TestIdentity,
    pub intermediate: TestIdentity,
    pub leaf: TestIdentity,
    pub tsa_root: TestIdentity,
    pub tsa: TestIdentity,
    pub ocsp_responder: TestIdentity,
}

impl TestPki {
    pub fn new() -> Self {
        let root = TestIdentity::self_signed(CertProfile::ca("root"));
        let intermediate = root.issue(CertProfile::ca("intermediate").path_len(0));
        let leaf = intermediate.issue(CertProfile::leaf("leaf"));
        let tsa_root = TestIdentity::self_signed(CertProfile::ca("tsa-root"));
        let tsa = tsa_root.issue(CertProfile::timestamping("tsa"));
        let ocsp_responder = intermediate.issue(CertProfile::ocsp_responder("ocsp"));

        Self {
            root,
            intermediate,
            leaf,
            tsa_root,
            tsa,
            ocsp_responder,
        }
    }

    pub fn anchors(&self) -> TrustAnchors {
        TrustAnchors {
            code_signing: Some(vec![self.root.cert.clone()]),
            timestamping: Some(vec![self.tsa_root.cert.clone()]),
        }
    }
}

/// Builds one `SignerInfo`.
pub struct SignerBuilder<'a> {
    identity: &'a TestIdentity,
    signed_attributes: bool,
    content_type_attribute: Option<bool>,
    signing_time: Option<DateTime<Utc>>,
    by_key_id: bool,
    countersignatures: Vec<SignerBuilder<'a>>,
    timestamps: Vec<TimestampBuilder<'a>>,
    nested: Vec<Vec<u8>>,
    corrupt_signature: bool,
}

impl<'a> SignerBuilder<'a> {
    pub fn new(identity: &'a TestIdentity) -> Self {
        Self {
            identity,
            signed_attributes: true,
            content_type_attribute: None,
            signing_time: None,
            by_key_id: false,
            countersignatures: vec![],
            timestamps: vec![],
            nested: vec![],
            corrupt_signature: false,
        }
    }

    pub fn no_signed_attributes(mut self) -> Self {
        self.signed_attributes = false;
        self
    }

    /// Force the content-type attribute on or off.
    ///
    /// By default signers carry it and countersigners don't.
    pub fn content_type_attribute(mut self, present: bool) -> Self {
        self.content_type_attribute = Some(present);
        self
    }

    pub fn signing_time(mut self, time: DateTime<Utc>) -> Self {
        self.signing_time = Some(whole_seconds(time));
        self
    }

    pub fn by_key_identifier(mut self) -> Self {
        self.by_key_id = true;
        self
    }

    pub fn countersignature(mut self, countersigner: SignerBuilder<'a>) -> Self {
        self.countersignatures.push(countersigner);
        self
    }

    /// Attach a time-stamp token. May be called once per attribute type.
    pub fn timestamp(mut self, timestamp: TimestampBuilder<'a>) -> Self {
        self.timestamps.push(timestamp);
        self
    }

    pub fn nested(mut self, message: Vec<u8>) -> Self {
        self.nested.push(message);
        self
    }

    pub fn corrupt_signature(mut self) -> Self {
        self.corrupt_signature = true;
        self
    }

    /// Encode the signer info over `content`.
    ///
    /// `content_type` is `None` for countersignatures.
    pub fn build(&self, content: &[u8], content_type: Option<&[u8]>) -> Vec<u8> {
        let (signed_attributes, mut signature) = if self.signed_attributes {
            let mut attributes = vec![];
            if self
                .content_type_attribute
                .unwrap_or_else(|| content_type.is_some())
            {
                attributes.push(der_attribute(
                    OID_CONTENT_TYPE.0,
                    der_oid(content_type.unwrap_or(OID_ID_DATA.0)),
                ));
            }
            if let Some(time) = self.signing_time {
                attributes.push(der_attribute(OID_SIGNING_TIME.0, der_time(time)));
            }
            attributes.push(der_attribute(
                OID_MESSAGE_DIGEST.0,
                der_octet_string(&sha256(content)),
            ));

            let attributes = attributes.concat();
            let signature = self.identity.sign(&der_tlv(0x31, &attributes));

            (Some(der_tlv(0xa0, &attributes)), signature)
        } else {
            (None, self.identity.sign(content))
        };

        if self.corrupt_signature {
            if let Some(last) = signature.last_mut() {
                *last ^= 0x01;
            }
        }

        let mut unsigned = vec![];
        for countersigner in &self.countersignatures {
            unsigned.push(der_attribute(
                OID_COUNTER_SIGNATURE.0,
                countersigner.build(&signature, None),
            ));
        }
        for timestamp in &self.timestamps {
            let oid = if timestamp.vendor {
                OID_MS_COUNTER_SIGN.0
            } else {
                OID_TIME_STAMP_TOKEN.0
            };
            unsigned.push(der_attribute(oid, timestamp.build(&signature)));
        }
        for message in &self.nested {
            unsigned.push(der_attribute(OID_NESTED_SIGNATURE.0, message.clone()));
        }

        let (version, sid) = if self.by_key_id {
            (3, der_tlv(0x80, &self.identity.key_id()))
        } else {
            (
                1,
                der_sequence(&[
                    der_name(&self.identity.issuer_name),
                    der_integer(self.identity.serial),
                ]),
            )
        };

        let mut parts = vec![der_integer(version), sid, sha256_algorithm_der()];
        parts.extend(signed_attributes);
        parts.push(ecdsa_sha256_der());
        parts.push(der_octet_string(&signature));
        if !unsigned.is_empty() {
            parts.push(der_tlv(0xa1, &unsigned.concat()));
        }

        der_sequence(&parts)
    }
}

/// Builds an RFC 3161 time-stamp token over a signature.
pub struct TimestampBuilder<'a> {
    tsa: &'a TestIdentity,
    gen_time: DateTime<Utc>,
    vendor: bool,
    wrong_imprint: bool,
    certificates: Vec<&'a TestIdentity>,
    corrupt_signature: bool,
}

impl<'a> TimestampBuilder<'a> {
    pub fn new(tsa: &'a TestIdentity) -> Self {
        Self {
            tsa,
            gen_time: whole_seconds(Utc::now()),
            vendor: false,
            wrong_imprint: false,
            certificates: vec![tsa],
            corrupt_signature: false,
        }
    }

    pub fn gen_time(mut self, time: DateTime<Utc>) -> Self {
        self.gen_time = whole_seconds(time);
        self
    }

    /// Carry the token in the Microsoft attribute rather than the RFC 3161 one.
    pub fn vendor(mut self) -> Self {
        self.vendor = true;
        self
    }

    pub fn wrong_imprint(mut self) -> Self {
        self.wrong_imprint = true;
        self
    }

    pub fn corrupt_signature(mut self) -> Self {
        self.corrupt_signature = true;
        self
    }

    pub fn without_certificates(mut self) -> Self {
        self.certificates.clear();
        self
    }

    pub fn certificate(mut self, identity: &'a TestIdentity) -> Self {
        self.certificates.push(identity);
        self
    }

    pub fn build(&self, timestamped: &[u8]) -> Vec<u8> {
        let mut imprint = sha256(timestamped);
        if self.wrong_imprint {
            imprint[0] ^= 0xff;
        }

        let tst_info = der_sequence(&[
            der_integer(1),
            der_oid(OID_TEST_POLICY),
            der_sequence(&[sha256_algorithm_der(), der_octet_string(&imprint)]),
            der_integer(NEXT_SERIAL.fetch_add(1, Ordering::SeqCst)),
            der_generalized_time(self.gen_time),
        ]);

        let mut signer = SignerBuilder::new(self.tsa).signing_time(self.gen_time);
        if self.corrupt_signature {
            signer = signer.corrupt_signature();
        }

        let mut message = MessageBuilder::new(&tst_info)
            .content_type(OID_CONTENT_TYPE_TST_INFO.0)
            .signer(signer);
        for identity in &self.certificates {
            message = message.certificate(identity);
        }

        message.build()
    }
}

/// Builds a `ContentInfo` holding signed data.
pub struct MessageBuilder<'a> {
    content: Vec<u8>,
    content_type: &'static [u8],
    detached: bool,
    authenticode: bool,
    certificates: Vec<Vec<u8>>,
    crls: Vec<Vec<u8>>,
    signers: Vec<SignerBuilder<'a>>,
}

impl<'a> MessageBuilder<'a> {
    pub fn new(content: &[u8]) -> Self {
        Self {
            content: content.to_vec(),
            content_type: OID_ID_DATA.0,
            detached: false,
            authenticode: false,
            certificates: vec![],
            crls: vec![],
            signers: vec![],
        }
    }

    pub fn content_type(mut self, oid: &'static [u8]) -> Self {
        self.content_type = oid;
        self
    }

    pub fn detached(mut self) -> Self {
        self.detached = true;
        self
    }

    /// Encapsulate the content as a SEQUENCE, the way Authenticode does.
    ///
    /// The content must then be a concatenation of DER values.
    pub fn authenticode(mut self) -> Self {
        self.authenticode = true;
        self.content_type = OID_SPC_INDIRECT_DATA;
        self
    }

    pub fn certificate(mut self, identity: &TestIdentity) -> Self {
        self.certificates.push(identity.der());
        self
    }

    pub fn crl(mut self, crl: Vec<u8>) -> Self {
        self.crls.push(crl);
        self
    }

    pub fn signer(mut self, signer: SignerBuilder<'a>) -> Self {
        self.signers.push(signer);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut encapsulated = vec![der_oid(self.content_type)];
        if !self.detached {
            let content = if self.authenticode {
                der_tlv(0x30, &self.content)
            } else {
                der_octet_string(&self.content)
            };
            encapsulated.push(der_explicit(0, &content));
        }

        let mut parts = vec![
            der_integer(1),
            der_set(&[sha256_algorithm_der()]),
            der_sequence(&encapsulated),
        ];
        if !self.certificates.is_empty() {
            parts.push(der_tlv(0xa0, &self.certificates.concat()));
        }
        if !self.crls.is_empty() {
            parts.push(der_tlv(0xa1, &self.crls.concat()));
        }
        parts.push(der_set(
            &self
                .signers
                .iter()
                .map(|signer| signer.build(&self.content, Some(self.content_type)))
                .collect::<Vec<_>>(),
        ));

        der_sequence(&[
            der_oid(OID_ID_SIGNED_DATA.0),
            der_explicit(0, &der_sequence(&parts)),
        ])
    }
}

/// Builds a CRL signed by an identity.
pub struct CrlBuilder<'a> {
    issuer: &'a TestIdentity,
    this_update: DateTime<Utc>,
    next_update: Option<DateTime<Utc>>,
    revoked: Vec<(u64, DateTime<Utc>, Option<u8>)>,
    signer: Option<&'a TestIdentity>,
}

impl<'a> CrlBuilder<'a> {
    pub fn new(issuer: &'a TestIdentity) -> Self {
        let now = whole_seconds(Utc::now());

        Self {
            issuer,
            this_update: now - Duration::hours(1),
            next_update: Some(now + Duration::days(7)),
            revoked: vec![],
            signer: None,
        }
    }

    pub fn this_update(mut self, time: DateTime<Utc>) -> Self {
        self.this_update = whole_seconds(time);
        self
    }

    pub fn next_update(mut self, time: Option<DateTime<Utc>>) -> Self {
        self.next_update = time.map(whole_seconds);
        self
    }

    pub fn revoke(mut self, serial: u64, time: DateTime<Utc>, reason: Option<u8>) -> Self {
        self.revoked.push((serial, whole_seconds(time), reason));
        self
    }

    /// Sign with a different key than the named issuer's.
    pub fn signed_by(mut self, signer: &'a TestIdentity) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut parts = vec![
            der_integer(1),
            ecdsa_sha256_der(),
            der_name(&self.issuer.name),
            der_time(self.this_update),
        ];
        if let Some(next_update) = self.next_update {
            parts.push(der_time(next_update));
        }
        if !self.revoked.is_empty() {
            parts.push(der_sequence(
                &self
                    .revoked
                    .iter()
                    .map(|(serial, time, reason)| {
                        let mut entry = vec![der_integer(*serial), der_time(*time)];
                        if let Some(reason) = reason {
                            entry.push(der_sequence(&[der_extension(
                                OID_CRL_REASON.0,
                                false,
                                &der_enumerated(*reason),
                            )]));
                        }
                        der_sequence(&entry)
                    })
                    .collect::<Vec<_>>(),
            ));
        }

        let tbs = der_sequence(&parts);
        let signature = self.signer.unwrap_or(self.issuer).sign(&tbs);

        der_sequence(&[tbs, ecdsa_sha256_der(), der_bit_string(&signature)])
    }
}

pub enum TestCertStatus {
    Good,
    Revoked(DateTime<Utc>, Option<u8>),
    Unknown,
}

/// Builds an OCSP response about one certificate.
pub struct OcspResponseBuilder<'a> {
    responder: &'a TestIdentity,
    issuer: &'a TestIdentity,
    serial: u64,
    status: TestCertStatus,
    this_update: DateTime<Utc>,
    next_update: Option<DateTime<Utc>>,
    include_responder: bool,
    by_key: bool,
    response_status: u8,
}

impl<'a> OcspResponseBuilder<'a> {
    pub fn new(responder: &'a TestIdentity, issuer: &'a TestIdentity, serial: u64) -> Self {
        let now = whole_seconds(Utc::now());

        Self {
            responder,
            issuer,
            serial,
            status: TestCertStatus::Good,
            this_update: now,
            next_update: Some(now + Duration::hours(12)),
            include_responder: true,
            by_key: false,
            response_status: 0,
        }
    }

    pub fn status(mut self, status: TestCertStatus) -> Self {
        self.status = status;
        self
    }

    pub fn this_update(mut self, time: DateTime<Utc>) -> Self {
        self.this_update = whole_seconds(time);
        self
    }

    pub fn next_update(mut self, time: Option<DateTime<Utc>>) -> Self {
        self.next_update = time.map(whole_seconds);
        self
    }

    pub fn responder_by_key(mut self) -> Self {
        self.by_key = true;
        self
    }

    pub fn without_responder_certificate(mut self) -> Self {
        self.include_responder = false;
        self
    }

    pub fn response_status(mut self, status: u8) -> Self {
        self.response_status = status;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        if self.response_status != 0 {
            return der_sequence(&[der_enumerated(self.response_status)]);
        }

        let cert_id = der_sequence(&[
            der_sequence(&[der_oid(OID_SHA1.0), vec![0x05, 0x00]]),
            der_octet_string(&sha1(&der_name(&self.issuer.name))),
            der_octet_string(&sha1(self.issuer.key.public_key())),
            der_integer(self.serial),
        ]);

        let status = match &self.status {
            TestCertStatus::Good => vec![0x80, 0x00],
            TestCertStatus::Revoked(time, reason) => {
                let mut info = der_generalized_time(*time);
                if let Some(reason) = reason {
                    info.extend(der_explicit(0, &der_enumerated(*reason)));
                }
                der_tlv(0xa1, &info)
            }
            TestCertStatus::Unknown => vec![0x82, 0x00],
        };

        let mut single = vec![cert_id, status, der_generalized_time(self.this_update)];
        if let Some(next_update) = self.next_update {
            single.push(der_explicit(0, &der_generalized_time(next_update)));
        }

        let responder_id = if self.by_key {
            der_explicit(2, &der_octet_string(&self.responder.key_id()))
        } else {
            der_explicit(1, &der_name(&self.responder.name))
        };

        let tbs = der_sequence(&[
            responder_id,
            der_generalized_time(whole_seconds(Utc::now())),
            der_sequence(&[der_sequence(&single)]),
        ]);

        let mut basic = vec![
            tbs.clone(),
            ecdsa_sha256_der(),
            der_bit_string(&self.responder.sign(&tbs)),
        ];
        if self.include_responder {
            basic.push(der_explicit(0, &der_sequence(&[self.responder.der()])));
        }

        der_sequence(&[
            der_enumerated(0),
            der_explicit(
                0,
                &der_sequence(&[
                    der_oid(OID_PKIX_OCSP_BASIC.0),
                    der_octet_string(&der_sequence(&basic)),
                ]),
            ),
        ])
    }
}

/// Serves canned CRLs by URL and counts requests.
#[derive(Clone, Default)]
pub struct MockCrlFetcher {
    responses: Arc<Mutex<HashMap<String, Bytes>>>,
    calls: Arc<AtomicUsize>,
}

impl MockCrlFetcher {
    pub fn serve(&self, url: impl ToString, crl: Vec<u8>) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), Bytes::from(crl));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CrlFetcher for MockCrlFetcher {
    fn fetch(&self, url: &str) -> Result<Bytes, TrustError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        self.responses
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| TrustError::HttpStatus(url.to_string(), 404))
    }
}

/// In-memory CRL cache.
#[derive(Clone, Default)]
pub struct MemoryCrlCache {
    entries: Arc<Mutex<HashMap<String, Vec<Bytes>>>>,
}

impl MemoryCrlCache {
    pub fn entries(&self, issuer_id: &str) -> Vec<Bytes> {
        self.entries
            .lock()
            .unwrap()
            .get(issuer_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl CrlCache for MemoryCrlCache {
    fn load(&self, issuer_id: &str) -> Result<Vec<Bytes>, TrustError> {
        Ok(self.entries(issuer_id))
    }

    fn store(&self, issuer_id: &str, crls: &[Bytes]) -> Result<(), TrustError> {
        self.entries
            .lock()
            .unwrap()
            .insert(issuer_id.to_string(), crls.to_vec());
        Ok(())
    }
}

/// Answers every OCSP request with one canned response.
#[derive(Clone, Default)]
pub struct MockOcspTransport {
    response: Arc<Mutex<Option<Bytes>>>,
    requests: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

impl MockOcspTransport {
    pub fn respond(&self, response: Vec<u8>) {
        *self.response.lock().unwrap() = Some(Bytes::from(response));
    }

    pub fn requests(&self) -> Vec<(String, Vec<u8>)> {
        self.requests.lock().unwrap().clone()
    }
}

impl OcspTransport for MockOcspTransport {
    fn post(
        &self,
        url: &str,
        request: &[u8],
        _timeout: std::time::Duration,
    ) -> Result<Bytes, TrustError> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), request.to_vec()));

        self.response
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| TrustError::HttpStatus(url.to_string(), 503))
    }
}

/// Verification state wired to in-memory collaborators.
pub fn test_params(
    settings: VerificationSettings,
    fetcher: &MockCrlFetcher,
    transport: &MockOcspTransport,
) -> VerificationParams {
    VerificationParams::with_collaborators(
        settings,
        CrlProvider::new(
            Box::new(MemoryCrlCache::default()),
            Box::new(fetcher.clone()),
        ),
        Box::new(transport.clone()),
    )
}

/// Settings trusting the test PKI roots.
pub fn trusting(pki: &TestPki) -> VerificationSettings {
    let mut settings = VerificationSettings::default();
    settings.set_anchors(pki.anchors());
    settings
}
