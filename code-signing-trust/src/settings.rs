// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Verification configuration.

use {
    crate::{
        crl::{CrlProvider, FileCrlCache, HttpCrlFetcher},
        error::TrustError,
        ocsp::{HttpOcspTransport, OcspTransport},
    },
    chrono::{DateTime, Utc},
    log::debug,
    once_cell::sync::OnceCell,
    std::{
        path::{Path, PathBuf},
        time::Duration,
    },
    x509_certificate::CapturedX509Certificate,
};

/// Default timeout for OCSP requests.
pub const DEFAULT_OCSP_TIMEOUT: Duration = Duration::from_secs(5);

/// How the instant certificates are validated at is chosen.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TimeMode {
    /// Use the signed signing-time attribute or the timestamp token's
    /// generation time, whichever is found first.
    FromEmbeddedTimestamp,

    /// Use the wall clock.
    Current,

    /// Use a caller provided instant.
    Explicit(DateTime<Utc>),
}

impl Default for TimeMode {
    fn default() -> Self {
        Self::FromEmbeddedTimestamp
    }
}

/// Trusted root certificates.
///
/// A `None` set disables chain building for the signatures it would anchor.
/// An empty set causes chain building to fail.
#[derive(Clone, Debug, Default)]
pub struct TrustAnchors {
    pub code_signing: Option<Vec<CapturedX509Certificate>>,
    pub timestamping: Option<Vec<CapturedX509Certificate>>,
}

impl TrustAnchors {
    /// Parse every certificate in PEM data.
    pub fn certificates_from_pem(
        data: impl AsRef<[u8]>,
    ) -> Result<Vec<CapturedX509Certificate>, TrustError> {
        Ok(CapturedX509Certificate::from_pem_multiple(data)?)
    }

    /// Read every certificate from a PEM file.
    pub fn certificates_from_pem_file(
        path: impl AsRef<Path>,
    ) -> Result<Vec<CapturedX509Certificate>, TrustError> {
        let path = path.as_ref();
        let data =
            std::fs::read(path).map_err(|e| TrustError::IoPath(path.to_path_buf(), e))?;

        let certs = Self::certificates_from_pem(data)?;
        debug!("loaded {} anchors from {}", certs.len(), path.display());

        Ok(certs)
    }
}

/// Settings for a verification.
#[derive(Clone, Debug)]
pub struct VerificationSettings {
    anchors: TrustAnchors,
    build_chain: bool,
    check_revocation: bool,
    ocsp_timeout: Duration,
    time_mode: TimeMode,
    strict: bool,
    crl_cache_dir: PathBuf,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            anchors: TrustAnchors::default(),
            build_chain: true,
            check_revocation: false,
            ocsp_timeout: DEFAULT_OCSP_TIMEOUT,
            time_mode: TimeMode::default(),
            strict: false,
            crl_cache_dir: std::env::temp_dir().join("code-signing-trust-crls"),
        }
    }
}

impl VerificationSettings {
    pub fn anchors(&self) -> &TrustAnchors {
        &self.anchors
    }

    pub fn set_anchors(&mut self, anchors: TrustAnchors) {
        self.anchors = anchors;
    }

    /// Whether certificate chains are built to the trust anchors.
    ///
    /// When disabled, only signatures and timestamps are checked.
    pub fn build_chain(&self) -> bool {
        self.build_chain
    }

    pub fn set_build_chain(&mut self, value: bool) {
        self.build_chain = value;
    }

    /// Whether revocation is checked after a chain is built.
    pub fn check_revocation(&self) -> bool {
        self.check_revocation
    }

    pub fn set_check_revocation(&mut self, value: bool) {
        self.check_revocation = value;
    }

    pub fn ocsp_timeout(&self) -> Duration {
        self.ocsp_timeout
    }

    pub fn set_ocsp_timeout(&mut self, timeout: Duration) {
        self.ocsp_timeout = timeout;
    }

    pub fn time_mode(&self) -> TimeMode {
        self.time_mode
    }

    pub fn set_time_mode(&mut self, mode: TimeMode) {
        self.time_mode = mode;
    }

    /// Whether known real-world conformance violations are rejected.
    pub fn strict(&self) -> bool {
        self.strict
    }

    pub fn set_strict(&mut self, value: bool) {
        self.strict = value;
    }

    /// Directory holding cached CRLs.
    pub fn crl_cache_dir(&self) -> &Path {
        &self.crl_cache_dir
    }

    pub fn set_crl_cache_dir(&mut self, path: impl AsRef<Path>) {
        self.crl_cache_dir = path.as_ref().to_path_buf();
    }
}

/// Settings plus the injected network and cache collaborators.
///
/// May be reused across verifications. Nothing derived from a verified
/// message is stored here.
pub struct VerificationParams {
    settings: VerificationSettings,
    crl_provider: CrlProvider,
    ocsp_transport: Box<dyn OcspTransport>,
}

impl VerificationParams {
    /// Construct with the file system CRL cache and HTTP collaborators.
    pub fn new(settings: VerificationSettings) -> Result<Self, TrustError> {
        let crl_provider = CrlProvider::new(
            Box::new(FileCrlCache::new(settings.crl_cache_dir())),
            Box::new(HttpCrlFetcher::new()?),
        );

        Ok(Self::with_collaborators(
            settings,
            crl_provider,
            Box::new(HttpOcspTransport::new()),
        ))
    }

    pub fn with_collaborators(
        settings: VerificationSettings,
        crl_provider: CrlProvider,
        ocsp_transport: Box<dyn OcspTransport>,
    ) -> Self {
        Self {
            settings,
            crl_provider,
            ocsp_transport,
        }
    }

    pub fn settings(&self) -> &VerificationSettings {
        &self.settings
    }

    pub fn crl_provider(&self) -> &CrlProvider {
        &self.crl_provider
    }

    pub fn ocsp_transport(&self) -> &dyn OcspTransport {
        self.ocsp_transport.as_ref()
    }
}

/// The instant certificates are validated at during one top-level verification.
///
/// In [TimeMode::FromEmbeddedTimestamp] mode the first signing time or
/// time-stamp encountered is recorded and never replaced.
#[derive(Debug)]
pub struct ValidationTime {
    mode: TimeMode,
    resolved: OnceCell<DateTime<Utc>>,
}

impl ValidationTime {
    pub fn new(mode: TimeMode) -> Self {
        Self {
            mode,
            resolved: OnceCell::new(),
        }
    }

    /// Record the validation time found in a signature.
    ///
    /// Returns whether the time was recorded.
    pub fn resolve(&self, time: DateTime<Utc>) -> bool {
        if self.mode != TimeMode::FromEmbeddedTimestamp {
            return false;
        }

        let recorded = self.resolved.set(time).is_ok();
        if recorded {
            debug!("validation time resolved to {}", time);
        }

        recorded
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.get().is_some()
    }

    /// The instant validity periods are checked at.
    ///
    /// `None` means no time was found in the signature, in which case
    /// validity periods are not checked.
    pub fn get(&self) -> Option<DateTime<Utc>> {
        match self.mode {
            TimeMode::FromEmbeddedTimestamp => self.resolved.get().copied(),
            TimeMode::Current => Some(Utc::now()),
            TimeMode::Explicit(time) => Some(time),
        }
    }
}
