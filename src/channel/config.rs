//! Channel configuration.
//!
//! [`HostConfig`] and [`ClientConfig`] are built through validating
//! builders. Values that would break the protocol (missing credential,
//! wildcard origins, zero timeouts) are refused at [`build`](HostConfigBuilder::build)
//! time with [`Error::Config`] or [`Error::InvalidOrigin`].
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use frame_channel::HostConfig;
//!
//! # fn example() -> frame_channel::Result<()> {
//! let config = HostConfig::builder()
//!     .container_target("#intel-panel")
//!     .credential("pk_live_abc123")
//!     .expected_origin("https://intel.example.com")
//!     .handshake_timeout(Duration::from_secs(5))
//!     .feature("alerts", true)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;

use crate::error::{Error, Result};
use crate::protocol::{Credential, Features, MessageSigner};

use super::monitor::HeartbeatConfig;
use super::origin::Origin;

// ============================================================================
// Constants
// ============================================================================

/// Default bound on handshake completion.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default limit on concurrently pending requests.
pub const DEFAULT_MAX_PENDING_REQUESTS: usize = 100;

/// Default accepted credential formats: live/test API keys and session
/// tokens.
pub const DEFAULT_CREDENTIAL_PATTERN: &str =
    r"^(pk_(live|test)_[A-Za-z0-9]+|sess_[A-Za-z0-9._-]+)$";

// ============================================================================
// RequestClass
// ============================================================================

/// Request categories with their default timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestClass {
    /// Cheap status probes (10 s).
    Status,
    /// Ordinary queries (30 s).
    Standard,
    /// Long-running processing such as report generation (120 s).
    Processing,
}

impl RequestClass {
    /// Returns the default timeout for this class.
    #[inline]
    #[must_use]
    pub const fn timeout(self) -> Duration {
        match self {
            Self::Status => Duration::from_secs(10),
            Self::Standard => Duration::from_secs(30),
            Self::Processing => Duration::from_secs(120),
        }
    }
}

// ============================================================================
// HostConfig
// ============================================================================

/// Validated Host configuration.
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub(crate) container_target: Option<String>,
    pub(crate) credential: Credential,
    pub(crate) expected_origin: Origin,
    pub(crate) handshake_timeout: Duration,
    pub(crate) request_timeout: Duration,
    pub(crate) features: Features,
    pub(crate) heartbeat: HeartbeatConfig,
    pub(crate) signer: Option<MessageSigner>,
    pub(crate) max_pending_requests: usize,
}

impl HostConfig {
    /// Creates a new builder.
    #[inline]
    #[must_use]
    pub fn builder() -> HostConfigBuilder {
        HostConfigBuilder::new()
    }

    /// Label of the embedding surface, if set.
    #[inline]
    #[must_use]
    pub fn container_target(&self) -> Option<&str> {
        self.container_target.as_deref()
    }

    /// Origin the Client frame is expected to have.
    #[inline]
    #[must_use]
    pub fn expected_origin(&self) -> &Origin {
        &self.expected_origin
    }

    /// Handshake timeout.
    #[inline]
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Default request timeout.
    #[inline]
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Requested feature flags.
    #[inline]
    #[must_use]
    pub fn features(&self) -> &Features {
        &self.features
    }

    /// Heartbeat timing.
    #[inline]
    #[must_use]
    pub fn heartbeat(&self) -> HeartbeatConfig {
        self.heartbeat
    }
}

/// Builder for [`HostConfig`].
#[derive(Debug, Default, Clone)]
pub struct HostConfigBuilder {
    container_target: Option<String>,
    credential: Option<String>,
    expected_origin: Option<String>,
    handshake_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    features: Features,
    heartbeat: Option<HeartbeatConfig>,
    signing_key: Option<Vec<u8>>,
    max_pending_requests: Option<usize>,
}

impl HostConfigBuilder {
    /// Creates an empty builder.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the embedding surface label (a selector or element id).
    #[inline]
    #[must_use]
    pub fn container_target(mut self, target: impl Into<String>) -> Self {
        self.container_target = Some(target.into());
        self
    }

    /// Sets the credential sent in the handshake.
    #[inline]
    #[must_use]
    pub fn credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    /// Sets the exact origin of the Client frame.
    #[inline]
    #[must_use]
    pub fn expected_origin(mut self, origin: impl Into<String>) -> Self {
        self.expected_origin = Some(origin.into());
        self
    }

    /// Sets the handshake timeout.
    #[inline]
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }

    /// Sets the default request timeout.
    #[inline]
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Requests a single feature flag.
    #[inline]
    #[must_use]
    pub fn feature(mut self, name: impl Into<String>, enabled: bool) -> Self {
        self.features.insert(name.into(), enabled);
        self
    }

    /// Requests several feature flags.
    #[must_use]
    pub fn features<I, K>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = (K, bool)>,
        K: Into<String>,
    {
        self.features
            .extend(features.into_iter().map(|(name, on)| (name.into(), on)));
        self
    }

    /// Sets heartbeat timing.
    #[inline]
    #[must_use]
    pub fn heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    /// Enables HMAC signing with a key shared with the Client.
    #[inline]
    #[must_use]
    pub fn signing_key(mut self, key: impl AsRef<[u8]>) -> Self {
        self.signing_key = Some(key.as_ref().to_vec());
        self
    }

    /// Sets the pending request limit.
    #[inline]
    #[must_use]
    pub fn max_pending_requests(mut self, max: usize) -> Self {
        self.max_pending_requests = Some(max);
        self
    }

    /// Validates and builds the configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the credential or expected origin is missing,
    ///   a timeout or limit is zero, or the heartbeat is invalid
    /// - [`Error::InvalidOrigin`] if the expected origin is a wildcard,
    ///   opaque or unparsable
    pub fn build(self) -> Result<HostConfig> {
        let credential = match self.credential {
            Some(value) if !value.trim().is_empty() => Credential::new(value),
            _ => {
                return Err(Error::config(
                    "Credential is required. Use .credential() to set it.\n\
                     Example: HostConfig::builder().credential(\"pk_live_...\")",
                ));
            }
        };

        let origin = self.expected_origin.ok_or_else(|| {
            Error::config(
                "Expected origin is required. Use .expected_origin() to set it.\n\
                 Example: HostConfig::builder().expected_origin(\"https://intel.example.com\")",
            )
        })?;
        let expected_origin = Origin::parse(&origin)?;

        let handshake_timeout = non_zero(
            "handshake_timeout",
            self.handshake_timeout.unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT),
        )?;
        let request_timeout = non_zero(
            "request_timeout",
            self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
        )?;

        let heartbeat = self.heartbeat.unwrap_or_default();
        heartbeat.validate()?;

        Ok(HostConfig {
            container_target: self.container_target,
            credential,
            expected_origin,
            handshake_timeout,
            request_timeout,
            features: self.features,
            heartbeat,
            signer: build_signer(self.signing_key)?,
            max_pending_requests: max_pending(self.max_pending_requests)?,
        })
    }
}

// ============================================================================
// CredentialVerifier
// ============================================================================

/// Application check run on handshake credentials after the format check.
#[derive(Clone)]
pub struct CredentialVerifier(Arc<dyn Fn(&Credential) -> bool + Send + Sync>);

impl CredentialVerifier {
    /// Wraps a verification function.
    pub fn new<F>(verify: F) -> Self
    where
        F: Fn(&Credential) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(verify))
    }

    /// Runs the check.
    #[inline]
    #[must_use]
    pub fn verify(&self, credential: &Credential) -> bool {
        (self.0)(credential)
    }
}

impl fmt::Debug for CredentialVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CredentialVerifier(..)")
    }
}

// ============================================================================
// ClientConfig
// ============================================================================

/// Validated Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub(crate) host_origin: Origin,
    pub(crate) credential_pattern: Regex,
    pub(crate) verifier: Option<CredentialVerifier>,
    pub(crate) supported_features: Option<Features>,
    pub(crate) handshake_timeout: Duration,
    pub(crate) request_timeout: Duration,
    pub(crate) signer: Option<MessageSigner>,
    pub(crate) max_pending_requests: usize,
}

impl ClientConfig {
    /// Creates a new builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Origin the Host page is expected to have.
    #[inline]
    #[must_use]
    pub fn host_origin(&self) -> &Origin {
        &self.host_origin
    }

    /// How long `accept` waits for a valid handshake.
    #[inline]
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Default request timeout.
    #[inline]
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Checks a handshake credential. Returns the refusal reason.
    pub(crate) fn check_credential(&self, credential: &Credential) -> Option<&'static str> {
        if !self.credential_pattern.is_match(credential.expose()) {
            return Some("invalid credential format");
        }
        if let Some(verifier) = &self.verifier
            && !verifier.verify(credential)
        {
            return Some("credential refused");
        }
        None
    }

    /// Features to enable out of those requested.
    pub(crate) fn negotiate(&self, requested: &Features) -> Features {
        requested
            .iter()
            .filter(|(name, on)| {
                **on && self
                    .supported_features
                    .as_ref()
                    .is_none_or(|supported| supported.get(*name).copied().unwrap_or(false))
            })
            .map(|(name, _)| (name.clone(), true))
            .collect()
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Default, Clone)]
pub struct ClientConfigBuilder {
    host_origin: Option<String>,
    credential_pattern: Option<String>,
    verifier: Option<CredentialVerifier>,
    supported_features: Option<Features>,
    handshake_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    signing_key: Option<Vec<u8>>,
    max_pending_requests: Option<usize>,
}

impl ClientConfigBuilder {
    /// Creates an empty builder.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the exact origin of the Host page.
    #[inline]
    #[must_use]
    pub fn host_origin(mut self, origin: impl Into<String>) -> Self {
        self.host_origin = Some(origin.into());
        self
    }

    /// Overrides the credential format regex.
    #[inline]
    #[must_use]
    pub fn credential_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.credential_pattern = Some(pattern.into());
        self
    }

    /// Adds an application credential check.
    #[must_use]
    pub fn verifier<F>(mut self, verify: F) -> Self
    where
        F: Fn(&Credential) -> bool + Send + Sync + 'static,
    {
        self.verifier = Some(CredentialVerifier::new(verify));
        self
    }

    /// Declares a supported feature. Without any declaration every
    /// requested feature is accepted.
    #[inline]
    #[must_use]
    pub fn supported_feature(mut self, name: impl Into<String>) -> Self {
        self.supported_features
            .get_or_insert_with(Features::new)
            .insert(name.into(), true);
        self
    }

    /// Sets how long `accept` waits for a valid handshake.
    #[inline]
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }

    /// Sets the default request timeout.
    #[inline]
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Enables HMAC signing with a key shared with the Host.
    #[inline]
    #[must_use]
    pub fn signing_key(mut self, key: impl AsRef<[u8]>) -> Self {
        self.signing_key = Some(key.as_ref().to_vec());
        self
    }

    /// Sets the pending request limit.
    #[inline]
    #[must_use]
    pub fn max_pending_requests(mut self, max: usize) -> Self {
        self.max_pending_requests = Some(max);
        self
    }

    /// Validates and builds the configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the host origin is missing, the credential
    ///   pattern does not compile, or a timeout or limit is zero
    /// - [`Error::InvalidOrigin`] if the host origin is a wildcard, opaque or
    ///   unparsable
    pub fn build(self) -> Result<ClientConfig> {
        let origin = self.host_origin.ok_or_else(|| {
            Error::config(
                "Host origin is required. Use .host_origin() to set it.\n\
                 Example: ClientConfig::builder().host_origin(\"https://pos.example.com\")",
            )
        })?;
        let host_origin = Origin::parse(&origin)?;

        let pattern = self
            .credential_pattern
            .as_deref()
            .unwrap_or(DEFAULT_CREDENTIAL_PATTERN);
        let credential_pattern = Regex::new(pattern)
            .map_err(|e| Error::config(format!("Invalid credential pattern: {e}")))?;

        Ok(ClientConfig {
            host_origin,
            credential_pattern,
            verifier: self.verifier,
            supported_features: self.supported_features,
            handshake_timeout: non_zero(
                "handshake_timeout",
                self.handshake_timeout.unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT),
            )?,
            request_timeout: non_zero(
                "request_timeout",
                self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            )?,
            signer: build_signer(self.signing_key)?,
            max_pending_requests: max_pending(self.max_pending_requests)?,
        })
    }
}

// ============================================================================
// Validation
// ============================================================================

fn non_zero(name: &str, value: Duration) -> Result<Duration> {
    if value.is_zero() {
        return Err(Error::config(format!("{name} must be greater than zero")));
    }
    Ok(value)
}

fn max_pending(value: Option<usize>) -> Result<usize> {
    match value.unwrap_or(DEFAULT_MAX_PENDING_REQUESTS) {
        0 => Err(Error::config("max_pending_requests must be at least 1")),
        max => Ok(max),
    }
}

fn build_signer(key: Option<Vec<u8>>) -> Result<Option<MessageSigner>> {
    key.map(MessageSigner::new).transpose()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn host_builder() -> HostConfigBuilder {
        HostConfig::builder()
            .credential("pk_live_abc123")
            .expected_origin("https://intel.example.com")
    }

    #[test]
    fn test_host_defaults() {
        let config = host_builder().build().expect("config");
        assert_eq!(config.handshake_timeout(), DEFAULT_HANDSHAKE_TIMEOUT);
        assert_eq!(config.request_timeout(), DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.heartbeat(), HeartbeatConfig::default());
        assert_eq!(config.max_pending_requests, DEFAULT_MAX_PENDING_REQUESTS);
        assert!(config.container_target().is_none());
        assert!(config.signer.is_none());
    }

    #[test]
    fn test_host_requires_credential() {
        let err = HostConfig::builder()
            .expected_origin("https://intel.example.com")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));

        let blank = host_builder().credential("  ").build().unwrap_err();
        assert!(matches!(blank, Error::Config { .. }));
    }

    #[test]
    fn test_host_requires_origin() {
        let err = HostConfig::builder()
            .credential("pk_live_abc123")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_host_rejects_wildcard_origin() {
        let err = host_builder().expected_origin("*").build().unwrap_err();
        assert!(matches!(err, Error::InvalidOrigin { .. }));
    }

    #[test]
    fn test_host_rejects_zero_values() {
        assert!(host_builder().handshake_timeout(Duration::ZERO).build().is_err());
        assert!(host_builder().request_timeout(Duration::ZERO).build().is_err());
        assert!(host_builder().max_pending_requests(0).build().is_err());
        assert!(
            host_builder()
                .heartbeat(HeartbeatConfig::new(Duration::ZERO))
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_host_features_merge() {
        let config = host_builder()
            .feature("alerts", true)
            .features([("insights", true), ("reports", false)])
            .build()
            .expect("config");
        assert_eq!(config.features().len(), 3);
        assert_eq!(config.features().get("reports"), Some(&false));
    }

    #[test]
    fn test_host_signing_key() {
        let config = host_builder().signing_key("shared").build().expect("config");
        assert!(config.signer.is_some());
        assert!(host_builder().signing_key("").build().is_err());
    }

    #[test]
    fn test_request_class_timeouts() {
        assert_eq!(RequestClass::Status.timeout(), Duration::from_secs(10));
        assert_eq!(RequestClass::Standard.timeout(), Duration::from_secs(30));
        assert_eq!(RequestClass::Processing.timeout(), Duration::from_secs(120));
    }

    #[test]
    fn test_client_requires_host_origin() {
        let err = ClientConfig::builder().build().unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(ClientConfig::builder().host_origin("null").build().is_err());
    }

    #[test]
    fn test_client_default_credential_pattern() {
        let config = ClientConfig::builder()
            .host_origin("https://pos.example.com")
            .build()
            .expect("config");

        assert_eq!(config.check_credential(&Credential::new("pk_live_abc123")), None);
        assert_eq!(config.check_credential(&Credential::new("pk_test_XYZ9")), None);
        assert_eq!(config.check_credential(&Credential::new("sess_a1.b2-c3")), None);
        assert_eq!(
            config.check_credential(&Credential::new("sk_live_secret")),
            Some("invalid credential format")
        );
        assert_eq!(
            config.check_credential(&Credential::new("pk_live_")),
            Some("invalid credential format")
        );
    }

    #[test]
    fn test_client_invalid_pattern() {
        let err = ClientConfig::builder()
            .host_origin("https://pos.example.com")
            .credential_pattern("(unclosed")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_client_verifier() {
        let config = ClientConfig::builder()
            .host_origin("https://pos.example.com")
            .verifier(|credential| credential.expose().ends_with("good"))
            .build()
            .expect("config");

        assert_eq!(config.check_credential(&Credential::new("pk_live_good")), None);
        assert_eq!(
            config.check_credential(&Credential::new("pk_live_bad")),
            Some("credential refused")
        );
    }

    #[test]
    fn test_client_feature_negotiation() {
        let requested: Features = [
            ("alerts".to_string(), true),
            ("insights".to_string(), true),
            ("reports".to_string(), false),
        ]
        .into_iter()
        .collect();

        let open = ClientConfig::builder()
            .host_origin("https://pos.example.com")
            .build()
            .expect("config");
        let all = open.negotiate(&requested);
        assert_eq!(all.len(), 2);
        assert!(!all.contains_key("reports"));

        let limited = ClientConfig::builder()
            .host_origin("https://pos.example.com")
            .supported_feature("alerts")
            .build()
            .expect("config");
        let subset = limited.negotiate(&requested);
        assert_eq!(subset.len(), 1);
        assert_eq!(subset.get("alerts"), Some(&true));
    }
}
