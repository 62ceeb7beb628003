// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Trust verification of code signing signatures.
//!
//! Authenticode, Apple `codesign` and MSI signatures are all RFC 5652
//! Cryptographic Message Syntax (CMS) `SignedData` structures. This crate
//! takes the raw CMS blob extracted from a signed artifact and decides
//! whether it is cryptographically valid, chains to a trusted root and is not
//! revoked, at a point in time of the caller's choosing.
//!
//! # Features and Capabilities
//!
//! This crate can:
//!
//! * Parse CMS signed data from DER, BER or PEM, with attached or detached
//!   content. (See [SignedMessage].)
//! * Verify every signer, recursing into countersignatures, nested
//!   signatures and RFC 3161 time-stamp tokens. (See [SignedMessageVerifier]
//!   and [SignerInfoVerifier].)
//! * Build certificate paths to configured trust anchors with a policy that
//!   tolerates the critical extensions real code signing certificates carry.
//!   (See [ChainBuilder].)
//! * Check revocation with CRLs, cached on disk, falling back to OCSP.
//!   (See [CrlProvider] and [OcspVerifier].)
//!
//! Locating signature data inside PE, Mach-O or MSI files is not in scope.
//! Callers hand over a [SignatureData] holding the CMS blob and, for formats
//! that sign detached content, the bytes that were signed.
//!
//! # Outcomes
//!
//! Verification never returns errors. It returns a [VerifyResult] whose
//! [VerifyStatus] is one of `Valid`, `InvalidSignature`, `InvalidChain` or
//! `InvalidTimestamp`, carrying the first failure found and the certificate
//! responsible for it when one is known.
//!
//! A small number of well known standards violations found in real
//! signatures are tolerated. See [TOLERATED_VIOLATIONS]. Enable
//! [VerificationSettings::set_strict] to reject them.
//!
//! # Example
//!
//! ```no_run
//! use code_signing_trust::{
//!     verify_signature_data, SignatureData, TrustAnchors, VerificationParams,
//!     VerificationSettings,
//! };
//!
//! # fn main() -> Result<(), code_signing_trust::TrustError> {
//! let mut settings = VerificationSettings::default();
//! settings.set_anchors(TrustAnchors {
//!     code_signing: Some(TrustAnchors::certificates_from_pem_file("roots.pem")?),
//!     timestamping: Some(TrustAnchors::certificates_from_pem_file("tsa-roots.pem")?),
//! });
//! settings.set_check_revocation(true);
//!
//! let params = VerificationParams::new(settings)?;
//! let data = SignatureData::attached(std::fs::read("signature.p7s")?);
//!
//! let result = verify_signature_data(&data, &params);
//! println!("{}", result);
//! # Ok(())
//! # }
//! ```

pub mod asn1;
pub mod certificate;
pub use certificate::CodeSigningCertificate;
pub mod chain;
pub use chain::{CertificateChain, ChainBuilder, CrlStatus};
pub mod crl;
pub use crl::{Crl, CrlCache, CrlFetcher, CrlProvider, FileCrlCache, HttpCrlFetcher};
mod error;
pub use error::*;
pub mod ocsp;
pub use ocsp::{HttpOcspTransport, OcspTransport, OcspVerifier};
mod result;
pub use result::*;
mod settings;
pub use settings::*;
pub mod signed_message;
pub use signed_message::{SignatureData, SignedMessage, SignerInfo};
pub mod timestamp;
pub use timestamp::{TimestampToken, TimestampValidator};
mod verifier;
pub use verifier::*;

#[cfg(test)]
mod testutil;
