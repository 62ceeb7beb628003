// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Recursive verification of signed messages.
//!
//! A signer is verified by checking its signature, then everything hanging
//! off its unsigned attributes (countersignatures, nested signed messages and
//! a time-stamp token), then its certificate chain and revocation status.
//! Each step short-circuits: the first failure anywhere in the tree becomes
//! the result of every node above it.
//!
//! Verification records a [VerificationNode] tree describing what was checked.

use {
    crate::{
        certificate::CodeSigningCertificate,
        chain::{CertificateChain, ChainBuilder, CrlStatus},
        crl::Crl,
        error::{TrustError, ViolationKind},
        ocsp::OcspVerifier,
        result::{enforce, VerifyResult, VerifyStatus, VIOLATION_COUNTERSIGNATURE_CONTENT_TYPE},
        settings::{ValidationTime, VerificationParams},
        signed_message::{SignatureData, SignedMessage, SignerInfo},
        timestamp::TimestampValidator,
    },
    chrono::{DateTime, Utc},
    log::{debug, info, warn},
    std::fmt::{Display, Formatter},
    x509_certificate::CapturedX509Certificate,
};

/// What a node in a verification tree represents.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VerificationTarget {
    /// A whole signed message.
    Message,
    /// A signer of a signed message.
    Signer,
    /// A countersignature over a parent signature.
    Countersignature,
    /// A complete signed message nested in a signer's unsigned attributes.
    NestedMessage,
    /// A time-stamp token over a signature.
    Timestamp,
}

impl Display for VerificationTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Message => "message",
            Self::Signer => "signer",
            Self::Countersignature => "countersignature",
            Self::NestedMessage => "nested message",
            Self::Timestamp => "time-stamp",
        })
    }
}

/// Outcome of verifying one element of a signature tree.
#[derive(Clone, Debug)]
pub struct VerificationNode {
    pub target: VerificationTarget,
    /// The certificate that produced the signature, once located.
    pub certificate: Option<CapturedX509Certificate>,
    pub result: VerifyResult,
    /// For messages, the instant certificates were validated at. `None` if
    /// no time was found and validity periods were not checked.
    pub validation_time: Option<DateTime<Utc>>,
    pub children: Vec<VerificationNode>,
}

impl VerificationNode {
    fn new(target: VerificationTarget) -> Self {
        Self {
            target,
            certificate: None,
            result: VerifyResult::valid(),
            validation_time: None,
            children: vec![],
        }
    }

    pub fn is_valid(&self) -> bool {
        self.result.is_valid()
    }

    /// Add a verified child, failing if it failed.
    fn push(&mut self, child: VerificationNode) -> Result<(), VerifyResult> {
        let result = child.result.clone();
        self.children.push(child);

        result.into_result()
    }

    fn fmt_indented(&self, f: &mut Formatter<'_>, depth: usize) -> std::fmt::Result {
        write!(f, "{:indent$}{}", "", self.target, indent = depth * 2)?;
        if let Some(cert) = &self.certificate {
            write!(f, " ({})", cert.subject_display())?;
        }
        writeln!(f, ": {}", self.result)?;

        for child in &self.children {
            child.fmt_indented(f, depth + 1)?;
        }

        Ok(())
    }
}

impl Display for VerificationNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.fmt_indented(f, 0)
    }
}

/// Verifies signer infos against the certificates and CRLs of their message.
pub struct SignerInfoVerifier<'a> {
    params: &'a VerificationParams,
    time: &'a ValidationTime,
    certificates: &'a [CapturedX509Certificate],
    crls: &'a [Crl],
}

impl<'a> SignerInfoVerifier<'a> {
    pub fn new(
        params: &'a VerificationParams,
        time: &'a ValidationTime,
        certificates: &'a [CapturedX509Certificate],
        crls: &'a [Crl],
    ) -> Self {
        Self {
            params,
            time,
            certificates,
            crls,
        }
    }

    /// Verify a signer over `content`.
    ///
    /// For a countersignature `content` is the signature it countersigns.
    pub fn verify(
        &self,
        signer: &SignerInfo,
        content: &[u8],
        target: VerificationTarget,
    ) -> VerifyResult {
        self.verify_tree(signer, content, target).result
    }

    /// Like [Self::verify] but returns the full verification tree.
    pub fn verify_tree(
        &self,
        signer: &SignerInfo,
        content: &[u8],
        target: VerificationTarget,
    ) -> VerificationNode {
        debug!("verifying {} {}", target, signer.identifier());

        let mut node = VerificationNode::new(target);
        if let Err(result) = self.evaluate(signer, content, target, &mut node) {
            debug!("{} {} failed: {}", target, signer.identifier(), result);
            node.result = result;
        }

        node
    }

    fn evaluate(
        &self,
        signer: &SignerInfo,
        content: &[u8],
        target: VerificationTarget,
        node: &mut VerificationNode,
    ) -> Result<(), VerifyResult> {
        let settings = self.params.settings();

        let cert = signer.find_certificate(self.certificates).ok_or_else(|| {
            VerifyResult::from_error(&TrustError::SignerCertificateNotFound(
                signer.identifier().to_string(),
            ))
        })?;
        node.certificate = Some(cert.clone());

        let signature_failure =
            |e: &TrustError| VerifyResult::with_status(VerifyStatus::InvalidSignature, e)
                .with_certificate(cert);

        if target == VerificationTarget::Countersignature && signer.has_content_type_attribute() {
            enforce(
                TrustError::Violation(ViolationKind::Cms, VIOLATION_COUNTERSIGNATURE_CONTENT_TYPE),
                settings.strict(),
            )
            .map_err(|e| signature_failure(&e))?;
        }

        signer
            .verify_signature(cert, content)
            .map_err(|e| signature_failure(&e))?;

        if settings.build_chain() && !self.time.is_resolved() {
            let embedded_time = signer.signing_time().or_else(|| {
                signer
                    .timestamp_token()
                    .and_then(|token| token.ok())
                    .map(|token| token.gen_time())
            });

            if let Some(time) = embedded_time {
                self.time.resolve(time);
            }
        }

        let signature = signer.signature();

        let countersignatures = signer
            .countersignatures()
            .map_err(|e| signature_failure(e))?;
        for countersignature in countersignatures {
            node.push(self.verify_tree(
                countersignature,
                &signature,
                VerificationTarget::Countersignature,
            ))?;
        }

        for nested in signer.nested_messages() {
            let message = nested.map_err(|e| signature_failure(&e))?;

            let mut child =
                SignedMessageVerifier::new(self.params).verify_tree_with(&message, self.time);
            child.target = VerificationTarget::NestedMessage;
            node.push(child)?;
        }

        if let Some(token) = signer.timestamp_token() {
            let mut child = VerificationNode::new(VerificationTarget::Timestamp);

            child.result = match token {
                Ok(token) => {
                    child.certificate = token
                        .signer()
                        .and_then(|signer| signer.find_certificate(token.message().certificates()))
                        .cloned();
                    TimestampValidator::new(self.params).validate(token, &signature)
                }
                Err(e) => VerifyResult::with_status(VerifyStatus::InvalidTimestamp, e),
            };

            node.push(child)?;
        }

        if settings.build_chain() {
            self.verify_chain(cert, target)?;
        }

        Ok(())
    }

    fn verify_chain(
        &self,
        cert: &CapturedX509Certificate,
        target: VerificationTarget,
    ) -> Result<(), VerifyResult> {
        let anchors = self.params.settings().anchors();
        let anchors = match target {
            VerificationTarget::Countersignature | VerificationTarget::Timestamp => {
                &anchors.timestamping
            }
            _ => &anchors.code_signing,
        };

        let anchors = match anchors {
            Some(anchors) => anchors,
            None => {
                debug!("no trust anchors for {}; skipping chain building", target);
                return Ok(());
            }
        };

        let chain_failure = |e: &TrustError| {
            VerifyResult::with_status(VerifyStatus::InvalidChain, e).with_certificate(cert)
        };

        let builder = match self.time.get() {
            Some(time) => ChainBuilder::new(anchors, time),
            None => {
                debug!("no validation time; not checking validity periods");
                ChainBuilder::without_time(anchors)
            }
        }
        .intermediates(self.certificates);
        let chain = builder.build(cert).map_err(|e| chain_failure(&e))?;

        if self.params.settings().check_revocation() {
            self.check_revocation(&builder, &chain)?;
        }

        Ok(())
    }

    fn check_revocation(
        &self,
        builder: &ChainBuilder,
        chain: &CertificateChain,
    ) -> Result<(), VerifyResult> {
        let status = builder
            .check_crls(chain, self.params.crl_provider(), self.crls)
            .map_err(|e| {
                let result = VerifyResult::with_status(VerifyStatus::InvalidChain, &e);
                match chain.leaf() {
                    Some(leaf) => result.with_certificate(leaf),
                    None => result,
                }
            })?;

        if status == CrlStatus::NotRevoked {
            return Ok(());
        }

        match (chain.leaf(), chain.issuer_of(0)) {
            (Some(leaf), Some(issuer)) => {
                info!(
                    "CRLs unavailable; checking {} with OCSP",
                    leaf.subject_display()
                );

                OcspVerifier::new(
                    self.params.ocsp_transport(),
                    self.params.settings().ocsp_timeout(),
                )
                .check(leaf, issuer)
                .into_result()
            }
            _ => Ok(()),
        }
    }
}

/// Verifies every signer of a signed message.
pub struct SignedMessageVerifier<'a> {
    params: &'a VerificationParams,
}

impl<'a> SignedMessageVerifier<'a> {
    pub fn new(params: &'a VerificationParams) -> Self {
        Self { params }
    }

    /// Verify a message, returning the first failure.
    pub fn verify(&self, message: &SignedMessage) -> VerifyResult {
        self.verify_tree(message).result
    }

    /// Verify a message and describe every check performed.
    ///
    /// Each call resolves its own validation time.
    pub fn verify_tree(&self, message: &SignedMessage) -> VerificationNode {
        let time = ValidationTime::new(self.params.settings().time_mode());

        self.verify_tree_with(message, &time)
    }

    /// Verify a message sharing the validation time of an enclosing one.
    fn verify_tree_with(&self, message: &SignedMessage, time: &ValidationTime) -> VerificationNode {
        let mut node = VerificationNode::new(VerificationTarget::Message);
        if let Err(result) = self.evaluate(message, time, &mut node) {
            node.result = result;
        }
        node.validation_time = time.get();

        node
    }

    fn evaluate(
        &self,
        message: &SignedMessage,
        time: &ValidationTime,
        node: &mut VerificationNode,
    ) -> Result<(), VerifyResult> {
        let crls = message
            .crls()
            .iter()
            .filter_map(|der| match Crl::from_der(der.clone()) {
                Ok(crl) => Some(crl),
                Err(e) => {
                    warn!("ignoring malformed embedded CRL: {}", e);
                    None
                }
            })
            .collect::<Vec<_>>();

        let content = message
            .signed_content()
            .ok_or_else(|| VerifyResult::from_error(&TrustError::NoContent))?;

        let verifier = SignerInfoVerifier::new(self.params, time, message.certificates(), &crls);

        let mut signers = 0;
        for signer in message.signers() {
            signers += 1;
            node.push(verifier.verify_tree(signer, content, VerificationTarget::Signer))?;
        }

        if signers == 0 {
            return Err(VerifyResult::from_error(&TrustError::NoSigners));
        }

        Ok(())
    }
}

/// Verify a parsed message.
pub fn verify(message: &SignedMessage, params: &VerificationParams) -> VerifyResult {
    SignedMessageVerifier::new(params).verify(message)
}

/// Parse and verify extracted signature data.
///
/// Parse failures, including unsigned input, are `InvalidSignature`.
pub fn verify_signature_data(data: &SignatureData, params: &VerificationParams) -> VerifyResult {
    match SignedMessage::parse(data) {
        Ok(message) => verify(&message, params),
        Err(e) => VerifyResult::with_status(VerifyStatus::InvalidSignature, &e),
    }
}
