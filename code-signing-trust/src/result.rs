// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Verification outcomes.

use {
    crate::error::{flatten_message, TrustError, ViolationKind},
    log::warn,
    std::fmt::{Display, Formatter},
    x509_certificate::CapturedX509Certificate,
};

/// Content-type attribute on a countersignature.
pub const VIOLATION_COUNTERSIGNATURE_CONTENT_TYPE: &str =
    "content-type attribute found in countersignature";

/// Time-stamp EKU extension present but not flagged critical.
pub const VIOLATION_TIMESTAMP_EKU_NOT_CRITICAL: &str =
    "time-stamp certificate extended key usage extension is not critical";

/// Strict conformance complaints that are not treated as failures.
///
/// Entries are matched on exact kind and message.
pub const TOLERATED_VIOLATIONS: &[(ViolationKind, &str)] = &[
    (ViolationKind::Cms, VIOLATION_COUNTERSIGNATURE_CONTENT_TYPE),
    (ViolationKind::Tsp, VIOLATION_TIMESTAMP_EKU_NOT_CRITICAL),
];

/// Whether an error is a tolerated conformance violation.
pub fn is_tolerated(err: &TrustError) -> bool {
    match err {
        TrustError::Violation(kind, message) => TOLERATED_VIOLATIONS
            .iter()
            .any(|(allowed_kind, allowed)| allowed_kind == kind && allowed == message),
        _ => false,
    }
}

/// Decide whether a conformance violation fails verification.
///
/// Tolerated violations are logged and swallowed unless `strict` is set.
pub fn enforce(violation: TrustError, strict: bool) -> Result<(), TrustError> {
    if !strict && is_tolerated(&violation) {
        warn!("tolerating conformance violation: {}", violation);
        Ok(())
    } else {
        Err(violation)
    }
}

/// Overall verdict of a verification.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VerifyStatus {
    Valid,
    InvalidSignature,
    InvalidChain,
    InvalidTimestamp,
}

impl Display for VerifyStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Valid => "valid",
            Self::InvalidSignature => "invalid signature",
            Self::InvalidChain => "invalid chain",
            Self::InvalidTimestamp => "invalid timestamp",
        })
    }
}

/// Result of verifying a signed message or one of its signers.
///
/// A failed verification reports exactly one failure: the first one encountered.
#[derive(Clone, Debug)]
pub struct VerifyResult {
    pub status: VerifyStatus,
    pub message: String,
    pub certificate: Option<CapturedX509Certificate>,
}

impl VerifyResult {
    pub fn valid() -> Self {
        Self {
            status: VerifyStatus::Valid,
            message: String::new(),
            certificate: None,
        }
    }

    pub fn new(status: VerifyStatus, message: impl ToString) -> Self {
        Self {
            status,
            message: message.to_string(),
            certificate: None,
        }
    }

    /// Map an error using its own taxonomy.
    pub fn from_error(err: &TrustError) -> Self {
        Self::new(err.status(), flatten_message(err))
    }

    /// Map an error to an explicit status.
    pub fn with_status(status: VerifyStatus, err: &TrustError) -> Self {
        Self::new(status, flatten_message(err))
    }

    pub fn with_certificate(mut self, cert: &CapturedX509Certificate) -> Self {
        self.certificate = Some(cert.clone());
        self
    }

    pub fn is_valid(&self) -> bool {
        self.status == VerifyStatus::Valid
    }

    /// Convert to a `Result` so failures short-circuit with `?`.
    pub fn into_result(self) -> Result<(), VerifyResult> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl Display for VerifyResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            f.write_fmt(format_args!("{}", self.status))
        } else {
            f.write_fmt(format_args!("{}: {}", self.status, self.message))
        }
    }
}
