//! Request signing and verification.
//!
//! A caller signs the exact bytes it sends:
//!
//! ```text
//! signature = lowercase_hex(md5(raw_body ++ "_" ++ secret))
//! ```
//!
//! and transmits it with its caller id in two headers (by default
//! `x-caller-id` and `x-signature`). The receiver looks the caller up in a
//! [`CallerRegistry`], recomputes the digest over the bytes it received and
//! rejects mismatches with an authentication error.
//!
//! Signing runs in [`Stage::BeforeSend`](courier_core::Stage::BeforeSend) so
//! it sees the body after every other middleware touched it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use courier_core::{
    BoxFuture, Bytes, Handler, IoDirection, Middleware, PipelineError, PipelineResult, Request,
    RequestMessage,
};

/// Default header carrying the caller id.
pub const DEFAULT_CALLER_ID_HEADER: &str = "x-caller-id";

/// Default header carrying the signature.
pub const DEFAULT_SIGNATURE_HEADER: &str = "x-signature";

/// Order of the signing middleware within [`Stage::BeforeSend`](courier_core::Stage::BeforeSend).
pub const SIGN_ORDER: i32 = 100;

/// Order of the header presence check; it must see the signer's headers.
pub const REQUIRE_HEADERS_ORDER: i32 = SIGN_ORDER + 1;

/// Computes the signature of `raw` under `secret`.
///
/// # Example
///
/// ```
/// use courier_middleware::stages::signature::sign;
///
/// let signature = sign(br#"{"x":1}"#, "s3cret");
/// assert_eq!(signature.len(), 32);
/// assert!(signature.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
/// ```
#[must_use]
pub fn sign(raw: &[u8], secret: &str) -> String {
    let mut input = Vec::with_capacity(raw.len() + 1 + secret.len());
    input.extend_from_slice(raw);
    input.push(b'_');
    input.extend_from_slice(secret.as_bytes());
    format!("{:x}", md5::compute(&input))
}

/// Returns true if `signature` matches `raw` under `secret`.
#[must_use]
pub fn verify(raw: &[u8], secret: &str, signature: &str) -> bool {
    sign(raw, secret) == signature
}

/// Names of the headers carrying the caller id and the signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeaders {
    caller_id: String,
    signature: String,
}

impl Default for SignatureHeaders {
    fn default() -> Self {
        Self {
            caller_id: DEFAULT_CALLER_ID_HEADER.to_string(),
            signature: DEFAULT_SIGNATURE_HEADER.to_string(),
        }
    }
}

impl SignatureHeaders {
    /// Creates a header pair. Names are lowercased.
    #[must_use]
    pub fn new(caller_id: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            caller_id: caller_id.into().to_ascii_lowercase(),
            signature: signature.into().to_ascii_lowercase(),
        }
    }

    /// Returns the caller id header name.
    #[must_use]
    pub fn caller_id(&self) -> &str {
        &self.caller_id
    }

    /// Returns the signature header name.
    #[must_use]
    pub fn signature(&self) -> &str {
        &self.signature
    }
}

/// A caller id with its shared secret.
#[derive(Clone, PartialEq, Eq)]
pub struct CallerCredential {
    caller_id: String,
    secret: String,
}

impl CallerCredential {
    /// Creates a credential.
    #[must_use]
    pub fn new(caller_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            caller_id: caller_id.into(),
            secret: secret.into(),
        }
    }

    /// Returns the caller id.
    #[must_use]
    pub fn caller_id(&self) -> &str {
        &self.caller_id
    }

    /// Returns the shared secret.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for CallerCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallerCredential")
            .field("caller_id", &self.caller_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Known callers, keyed by caller id.
#[derive(Debug, Clone, Default)]
pub struct CallerRegistry {
    callers: HashMap<String, CallerCredential>,
}

impl CallerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a caller, replacing any previous secret for the same id.
    pub fn register(&mut self, credential: CallerCredential) {
        self.callers
            .insert(credential.caller_id.clone(), credential);
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with_caller(mut self, caller_id: impl Into<String>, secret: impl Into<String>) -> Self {
        self.register(CallerCredential::new(caller_id, secret));
        self
    }

    /// Returns the secret of `caller_id`.
    #[must_use]
    pub fn secret(&self, caller_id: &str) -> Option<&str> {
        self.callers.get(caller_id).map(CallerCredential::secret)
    }

    /// Returns the number of registered callers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.callers.len()
    }

    /// Returns true if no caller is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callers.is_empty()
    }
}

impl FromIterator<CallerCredential> for CallerRegistry {
    fn from_iter<I: IntoIterator<Item = CallerCredential>>(iter: I) -> Self {
        let mut registry = Self::new();
        for credential in iter {
            registry.register(credential);
        }
        registry
    }
}

/// Signs outgoing requests.
///
/// If the message has no raw bytes yet, the payload is encoded first and
/// the encoded bytes are kept, so the writer sends exactly what was signed.
#[derive(Debug, Clone)]
pub struct SignRequestMiddleware {
    credential: CallerCredential,
    headers: SignatureHeaders,
}

impl SignRequestMiddleware {
    /// Creates a signer for `credential` using the default headers.
    #[must_use]
    pub fn new(credential: CallerCredential) -> Self {
        Self {
            credential,
            headers: SignatureHeaders::default(),
        }
    }

    /// Uses custom header names.
    #[must_use]
    pub fn with_headers(mut self, headers: SignatureHeaders) -> Self {
        self.headers = headers;
        self
    }

    /// Wraps the signer in a [`Stage::BeforeSend`](courier_core::Stage::BeforeSend) entry.
    #[must_use]
    pub fn into_middleware(self) -> Middleware<Request> {
        Middleware::before_send(SIGN_ORDER, self)
    }
}

impl Handler<Request> for SignRequestMiddleware {
    fn name(&self) -> &'static str {
        "sign_request"
    }

    fn handle<'a>(&'a self, message: &'a mut RequestMessage) -> BoxFuture<'a, PipelineResult<()>> {
        Box::pin(async move {
            let raw = match message.raw() {
                Some(raw) => raw.clone(),
                None => message.encode_payload()?,
            };
            let signature = sign(&raw, self.credential.secret());
            message.insert_header(self.headers.caller_id(), self.credential.caller_id())?;
            message.insert_header(self.headers.signature(), &signature)?;
            tracing::trace!(
                caller_id = %self.credential.caller_id(),
                body_len = raw.len(),
                "Request signed"
            );
            message.next().await
        })
    }
}

/// Verifies incoming request signatures.
///
/// Runs after the reader, so the digest covers the bytes actually received
/// (the captured request body, or the raw bytes if nothing was captured).
#[derive(Debug, Clone)]
pub struct VerifySignatureMiddleware {
    registry: Arc<CallerRegistry>,
    headers: SignatureHeaders,
}

impl VerifySignatureMiddleware {
    /// Creates a verifier over `registry` using the default headers.
    #[must_use]
    pub fn new(registry: impl Into<Arc<CallerRegistry>>) -> Self {
        Self {
            registry: registry.into(),
            headers: SignatureHeaders::default(),
        }
    }

    /// Uses custom header names.
    #[must_use]
    pub fn with_headers(mut self, headers: SignatureHeaders) -> Self {
        self.headers = headers;
        self
    }

    fn received_bytes(message: &RequestMessage) -> Bytes {
        message
            .duplicate_request()
            .map(|duplicate| duplicate.body().clone())
            .or_else(|| message.raw().cloned())
            .unwrap_or_default()
    }

    fn verify_message(&self, message: &RequestMessage) -> PipelineResult<()> {
        let caller_id = message
            .header(self.headers.caller_id())
            .ok_or_else(|| PipelineError::authentication("missing caller id"))?;
        let signature = message
            .header(self.headers.signature())
            .ok_or_else(|| PipelineError::authentication("missing signature"))?;
        let secret = self
            .registry
            .secret(caller_id)
            .ok_or_else(|| PipelineError::authentication(format!("unknown caller: {caller_id}")))?;

        if verify(&Self::received_bytes(message), secret, signature) {
            Ok(())
        } else {
            Err(PipelineError::authentication("signature mismatch"))
        }
    }
}

impl Handler<Request> for VerifySignatureMiddleware {
    fn name(&self) -> &'static str {
        "verify_signature"
    }

    fn handle<'a>(&'a self, message: &'a mut RequestMessage) -> BoxFuture<'a, PipelineResult<()>> {
        Box::pin(async move {
            message.next().await?;
            if let Err(error) = self.verify_message(message) {
                tracing::warn!(
                    request_id = %message.request_id(),
                    error = %error,
                    "Signature verification failed"
                );
                return Err(error);
            }
            Ok(())
        })
    }
}

/// Rejects requests that do not carry both signature headers.
///
/// Outgoing requests are checked before sending; incoming requests once the
/// reader has populated their headers. No digest is computed.
///
/// Register it with [`into_middleware`](Self::into_middleware) so that on an
/// outgoing request it runs after [`SignRequestMiddleware`].
#[derive(Debug, Clone, Default)]
pub struct RequireSignatureHeadersMiddleware {
    headers: SignatureHeaders,
}

impl RequireSignatureHeadersMiddleware {
    /// Creates the check using the default headers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses custom header names.
    #[must_use]
    pub fn with_headers(headers: SignatureHeaders) -> Self {
        Self { headers }
    }

    /// Wraps the check in a [`Stage::BeforeSend`](courier_core::Stage::BeforeSend)
    /// entry ordered after the signer.
    #[must_use]
    pub fn into_middleware(self) -> Middleware<Request> {
        Middleware::before_send(REQUIRE_HEADERS_ORDER, self)
    }

    fn check(&self, message: &RequestMessage) -> PipelineResult<()> {
        for name in [self.headers.caller_id(), self.headers.signature()] {
            if message.header(name).map_or(true, str::is_empty) {
                return Err(PipelineError::authentication(format!("missing header: {name}")));
            }
        }
        Ok(())
    }
}

impl Handler<Request> for RequireSignatureHeadersMiddleware {
    fn name(&self) -> &'static str {
        "require_signature_headers"
    }

    fn handle<'a>(&'a self, message: &'a mut RequestMessage) -> BoxFuture<'a, PipelineResult<()>> {
        Box::pin(async move {
            if message.direction() == Some(IoDirection::Write) {
                self.check(message)?;
                return message.next().await;
            }
            message.next().await?;
            self.check(message)
        })
    }
}
