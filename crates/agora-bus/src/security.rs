//! SecurityGate — envelope signing and the inbound admission pipeline.
//!
//! Every agent holds an Ed25519 keypair generated at construction. The
//! signing scheme follows the same shape as signed manifests:
//!
//! 1. Compute SHA-256 over the envelope's canonical signing bytes
//!    (sender, recipient, kind, timestamp, payload — keys sorted,
//!    signature excluded).
//! 2. Sign the hex digest with Ed25519.
//! 3. Transmit the signature base64-encoded in the envelope.
//!
//! Verification recomputes the digest and checks the signature against
//! the claimed sender's pinned public key. Every failure mode — missing
//! signature, unknown sender, malformed signature bytes — verifies
//! false; nothing is ever reported back to the sender.
//!
//! Peer keys are pinned first-seen: an announcement carrying a key for a
//! sender that already has a different pinned key is rejected.

use agora_types::envelope::{Envelope, EnvelopeKind};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::BusError;

/// Why an inbound envelope was refused admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationFailure {
    /// The envelope came from this agent itself (own broadcast echo).
    SelfOriginated,
    /// Missing, malformed, or incorrect signature — or no key pinned for
    /// the claimed sender.
    BadSignature,
    /// The sender is not trusted under the active policy.
    Untrusted,
    /// The sender exceeded its sliding-window budget.
    RateLimited,
}

/// Pluggable trust policy over sender identities.
pub trait TrustPolicy: Send + Sync {
    /// Whether messages from this sender are eligible for processing.
    fn is_trusted(&self, sender_id: &str) -> bool;
}

/// Default policy: every known sender is trusted.
pub struct PermissiveTrust;

impl TrustPolicy for PermissiveTrust {
    fn is_trusted(&self, _sender_id: &str) -> bool {
        true
    }
}

/// Allow-list policy with runtime revocation.
pub struct AllowListTrust {
    allowed: RwLock<HashSet<String>>,
}

impl AllowListTrust {
    /// Create a policy trusting exactly the given senders.
    pub fn new(allowed: impl IntoIterator<Item = String>) -> Self {
        Self {
            allowed: RwLock::new(allowed.into_iter().collect()),
        }
    }

    /// Add a sender to the allow list.
    pub fn allow(&self, sender_id: impl Into<String>) {
        let mut allowed = self.allowed.write().unwrap_or_else(|e| e.into_inner());
        allowed.insert(sender_id.into());
    }

    /// Revoke a sender.
    pub fn revoke(&self, sender_id: &str) {
        let mut allowed = self.allowed.write().unwrap_or_else(|e| e.into_inner());
        allowed.remove(sender_id);
    }
}

impl TrustPolicy for AllowListTrust {
    fn is_trusted(&self, sender_id: &str) -> bool {
        let allowed = self.allowed.read().unwrap_or_else(|e| e.into_inner());
        allowed.contains(sender_id)
    }
}

/// Sliding-window rate limiter keyed by sender identity.
///
/// Keeps the accepted-message timestamps per sender and prunes expired
/// ones lazily on access, bounding memory per sender to `max_requests`.
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    requests: Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    /// Create a limiter accepting `max_requests` per `window` per sender.
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            requests: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a message from this sender is accepted now. Acceptance
    /// consumes one slot in the sender's window.
    pub fn check(&self, sender_id: &str) -> bool {
        let now = Instant::now();
        let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        let stamps = requests.entry(sender_id.to_string()).or_default();
        stamps.retain(|t| now.duration_since(*t) < self.window);

        if stamps.len() < self.max_requests {
            stamps.push(now);
            true
        } else {
            false
        }
    }
}

/// Per-agent security context: signs outbound envelopes and screens
/// inbound ones.
pub struct SecurityGate {
    agent_id: String,
    signing_key: SigningKey,
    known_keys: RwLock<HashMap<String, VerifyingKey>>,
    trust: Box<dyn TrustPolicy>,
    limiter: RateLimiter,
}

impl SecurityGate {
    /// Create a gate with a fresh keypair, permissive trust, and the
    /// default rate limit (100 messages per 60s window per sender).
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            signing_key: SigningKey::generate(&mut OsRng),
            known_keys: RwLock::new(HashMap::new()),
            trust: Box::new(PermissiveTrust),
            limiter: RateLimiter::new(100, Duration::from_secs(60)),
        }
    }

    /// Replace the trust policy.
    pub fn with_trust_policy(mut self, trust: Box<dyn TrustPolicy>) -> Self {
        self.trust = trust;
        self
    }

    /// Replace the rate limit.
    pub fn with_rate_limit(mut self, max_requests: usize, window: Duration) -> Self {
        self.limiter = RateLimiter::new(max_requests, window);
        self
    }

    /// The agent identity this gate signs for.
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// This agent's public key, base64-encoded for transmission in
    /// capability announcements.
    pub fn public_key_b64(&self) -> String {
        BASE64.encode(self.signing_key.verifying_key().to_bytes())
    }

    /// Pin a peer's public key directly (static configuration).
    pub fn add_known_key(&self, agent_id: impl Into<String>, key: VerifyingKey) {
        let mut keys = self.known_keys.write().unwrap_or_else(|e| e.into_inner());
        keys.insert(agent_id.into(), key);
    }

    /// Pin a peer's base64-encoded public key, first-seen-wins.
    ///
    /// Returns false (and pins nothing) when the sender id is not a
    /// real identity, the encoding is invalid, or the sender already
    /// has a different pinned key.
    pub fn learn_key_b64(&self, agent_id: &str, key_b64: &str) -> bool {
        if agent_id.is_empty() || agent_id == agora_types::envelope::BROADCAST_RECIPIENT {
            warn!(sender = agent_id, "Refusing to pin a key for a non-identity sender");
            return false;
        }
        let Ok(decoded) = BASE64.decode(key_b64) else {
            warn!(sender = agent_id, "Announcement carried undecodable public key");
            return false;
        };
        let key_bytes: [u8; 32] = match decoded.as_slice().try_into() {
            Ok(bytes) => bytes,
            Err(_) => {
                warn!(sender = agent_id, "Announcement public key has wrong length");
                return false;
            }
        };
        let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
            warn!(sender = agent_id, "Announcement public key is not a valid Ed25519 point");
            return false;
        };

        let mut keys = self.known_keys.write().unwrap_or_else(|e| e.into_inner());
        match keys.get(agent_id) {
            Some(existing) if *existing != key => {
                warn!(sender = agent_id, "Conflicting public key for pinned sender, rejecting");
                false
            }
            Some(_) => true,
            None => {
                keys.insert(agent_id.to_string(), key);
                debug!(sender = agent_id, "Pinned public key");
                true
            }
        }
    }

    /// Sign an envelope's canonical bytes. The result goes into
    /// `envelope.signature` before publish.
    pub fn sign(&self, envelope: &Envelope) -> Result<String, BusError> {
        let digest = Self::digest(envelope)?;
        let signature = self.signing_key.sign(digest.as_bytes());
        Ok(BASE64.encode(signature.to_bytes()))
    }

    /// Verify an envelope's signature against the claimed sender's
    /// pinned public key. Fails closed on every malformed input,
    /// including a sender that is not a real identity (`"*"` is only
    /// ever a recipient).
    pub fn verify(&self, envelope: &Envelope) -> bool {
        if envelope.sender.is_empty()
            || envelope.sender == agora_types::envelope::BROADCAST_RECIPIENT
        {
            return false;
        }
        let Some(signature_b64) = envelope.signature.as_deref() else {
            return false;
        };
        let keys = self.known_keys.read().unwrap_or_else(|e| e.into_inner());
        let Some(key) = keys.get(&envelope.sender) else {
            return false;
        };
        let Ok(decoded) = BASE64.decode(signature_b64) else {
            return false;
        };
        let sig_bytes: [u8; 64] = match decoded.as_slice().try_into() {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let signature = Signature::from_bytes(&sig_bytes);
        let Ok(digest) = Self::digest(envelope) else {
            return false;
        };
        key.verify(digest.as_bytes(), &signature).is_ok()
    }

    /// Whether the sender is trusted under the active policy.
    pub fn is_trusted(&self, sender_id: &str) -> bool {
        self.trust.is_trusted(sender_id)
    }

    /// Whether the sender is within its rate budget. Acceptance consumes
    /// one slot.
    pub fn check_rate_limit(&self, sender_id: &str) -> bool {
        self.limiter.check(sender_id)
    }

    /// Run the full admission pipeline on an inbound envelope,
    /// short-circuiting on the first failure:
    ///
    /// 1. drop own echoes, 2. verify signature, 3. trust policy,
    /// 4. rate limit.
    ///
    /// Envelope kinds that advertise identity (announcements and
    /// capability responses) may pin the embedded public key first, so
    /// first contact can be verified at all; the signature must still
    /// check out against that key.
    pub fn admit(&self, envelope: &Envelope) -> Result<(), ValidationFailure> {
        if envelope.sender == self.agent_id {
            return Err(ValidationFailure::SelfOriginated);
        }

        if matches!(
            envelope.kind,
            EnvelopeKind::CapabilityAnnouncement | EnvelopeKind::CapabilityResponse
        ) {
            if let Some(key_b64) = envelope.payload_str("public_key") {
                // Outcome ignored here: a conflicting key leaves the old
                // pin in place and verification below fails.
                let _ = self.learn_key_b64(&envelope.sender, key_b64);
            }
        }

        if !self.verify(envelope) {
            return Err(ValidationFailure::BadSignature);
        }
        if !self.is_trusted(&envelope.sender) {
            return Err(ValidationFailure::Untrusted);
        }
        if !self.check_rate_limit(&envelope.sender) {
            return Err(ValidationFailure::RateLimited);
        }
        Ok(())
    }

    /// Hex SHA-256 of the canonical signing bytes.
    fn digest(envelope: &Envelope) -> Result<String, BusError> {
        let bytes = envelope.signing_bytes()?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_types::envelope::EnvelopeKind;
    use serde_json::{Map, Value};

    fn signed_envelope(gate: &SecurityGate, recipient: &str) -> Envelope {
        let mut payload = Map::new();
        payload.insert("task_id".to_string(), Value::from("t-1"));
        let mut env = Envelope::new(EnvelopeKind::TaskRequest, gate.agent_id(), recipient)
            .with_payload(payload);
        env.signature = Some(gate.sign(&env).unwrap());
        env
    }

    fn exchange_keys(a: &SecurityGate, b: &SecurityGate) {
        a.add_known_key(b.agent_id(), b.signing_key.verifying_key());
        b.add_known_key(a.agent_id(), a.signing_key.verifying_key());
    }

    #[test]
    fn test_sign_and_verify_roundtrip() {
        let alice = SecurityGate::new("alice");
        let bob = SecurityGate::new("bob");
        exchange_keys(&alice, &bob);

        let env = signed_envelope(&alice, "bob");
        assert!(bob.verify(&env));
    }

    #[test]
    fn test_verify_fails_on_mutated_field() {
        let alice = SecurityGate::new("alice");
        let bob = SecurityGate::new("bob");
        exchange_keys(&alice, &bob);

        let mut env = signed_envelope(&alice, "bob");
        env.recipient = "mallory".to_string();
        assert!(!bob.verify(&env));

        let mut env = signed_envelope(&alice, "bob");
        env.payload
            .insert("task_id".to_string(), Value::from("t-2"));
        assert!(!bob.verify(&env));
    }

    #[test]
    fn test_verify_fails_closed() {
        let alice = SecurityGate::new("alice");
        let bob = SecurityGate::new("bob");

        // Unknown sender key.
        let env = signed_envelope(&alice, "bob");
        assert!(!bob.verify(&env));

        exchange_keys(&alice, &bob);

        // Missing signature.
        let mut env = signed_envelope(&alice, "bob");
        env.signature = None;
        assert!(!bob.verify(&env));

        // Malformed signature bytes.
        let mut env = signed_envelope(&alice, "bob");
        env.signature = Some("not base64!!!".to_string());
        assert!(!bob.verify(&env));
        env.signature = Some(BASE64.encode(b"too short"));
        assert!(!bob.verify(&env));
    }

    #[test]
    fn test_wrong_key_fails() {
        let alice = SecurityGate::new("alice");
        let mallory = SecurityGate::new("alice"); // same claimed identity
        let bob = SecurityGate::new("bob");
        bob.add_known_key("alice", alice.signing_key.verifying_key());

        let env = signed_envelope(&mallory, "bob");
        assert!(!bob.verify(&env));
    }

    #[test]
    fn test_key_pinning_first_seen_wins() {
        let bob = SecurityGate::new("bob");
        let alice = SecurityGate::new("alice");
        let mallory = SecurityGate::new("alice");

        assert!(bob.learn_key_b64("alice", &alice.public_key_b64()));
        // Re-announcing the same key is fine.
        assert!(bob.learn_key_b64("alice", &alice.public_key_b64()));
        // A different key for the pinned sender is rejected.
        assert!(!bob.learn_key_b64("alice", &mallory.public_key_b64()));

        let env = signed_envelope(&alice, "bob");
        assert!(bob.verify(&env));
    }

    #[test]
    fn test_rate_limiter_sliding_window() {
        let limiter = RateLimiter::new(3, Duration::from_millis(200));

        assert!(limiter.check("alice"));
        assert!(limiter.check("alice"));
        assert!(limiter.check("alice"));
        // 4th message inside the window is rejected.
        assert!(!limiter.check("alice"));
        // Other senders are unaffected.
        assert!(limiter.check("bob"));

        std::thread::sleep(Duration::from_millis(250));
        // Window elapsed: alice is accepted again.
        assert!(limiter.check("alice"));
    }

    #[test]
    fn test_admission_pipeline_order() {
        let alice = SecurityGate::new("alice");
        let bob = SecurityGate::new("bob").with_rate_limit(1, Duration::from_secs(60));
        exchange_keys(&alice, &bob);

        // Own echo dropped before anything else (no signature needed).
        let echo = Envelope::new(EnvelopeKind::StatusUpdate, "bob", "*");
        assert_eq!(bob.admit(&echo), Err(ValidationFailure::SelfOriginated));

        // Unsigned envelope from a peer.
        let unsigned = Envelope::new(EnvelopeKind::TaskRequest, "alice", "bob");
        assert_eq!(bob.admit(&unsigned), Err(ValidationFailure::BadSignature));

        // Valid envelope admitted once, then rate-limited.
        let env = signed_envelope(&alice, "bob");
        assert_eq!(bob.admit(&env), Ok(()));
        let env = signed_envelope(&alice, "bob");
        assert_eq!(bob.admit(&env), Err(ValidationFailure::RateLimited));
    }

    #[test]
    fn test_untrusted_sender_rejected() {
        let alice = SecurityGate::new("alice");
        let bob =
            SecurityGate::new("bob").with_trust_policy(Box::new(AllowListTrust::new(Vec::new())));
        exchange_keys(&alice, &bob);

        let env = signed_envelope(&alice, "bob");
        assert_eq!(bob.admit(&env), Err(ValidationFailure::Untrusted));
    }

    #[test]
    fn test_allow_list_revocation() {
        let policy = AllowListTrust::new(vec!["alice".to_string()]);
        assert!(policy.is_trusted("alice"));
        assert!(!policy.is_trusted("bob"));

        policy.allow("bob");
        assert!(policy.is_trusted("bob"));

        policy.revoke("alice");
        assert!(!policy.is_trusted("alice"));
    }

    #[test]
    fn test_broadcast_sender_is_never_valid() {
        let alice = SecurityGate::new("alice");
        let bob = SecurityGate::new("bob");

        let mut env = Envelope::new(EnvelopeKind::CapabilityAnnouncement, "*", "*");
        env.payload.insert(
            "public_key".to_string(),
            Value::from(alice.public_key_b64()),
        );
        env.signature = Some(alice.sign(&env).unwrap());

        assert_eq!(bob.admit(&env), Err(ValidationFailure::BadSignature));
        assert!(!bob.learn_key_b64("*", &alice.public_key_b64()));
    }

    #[test]
    fn test_announcement_bootstraps_key() {
        let alice = SecurityGate::new("alice");
        let bob = SecurityGate::new("bob");

        let mut payload = Map::new();
        payload.insert("agent_name".to_string(), Value::from("Alice"));
        payload.insert(
            "public_key".to_string(),
            Value::from(alice.public_key_b64()),
        );
        let mut env = Envelope::new(EnvelopeKind::CapabilityAnnouncement, "alice", "*")
            .with_payload(payload);
        env.signature = Some(alice.sign(&env).unwrap());

        // First contact: the embedded key is pinned and the signature
        // verified against it.
        assert_eq!(bob.admit(&env), Ok(()));

        // A forged follow-up under a different key is now rejected.
        let mallory = SecurityGate::new("alice");
        let forged = signed_envelope(&mallory, "bob");
        assert_eq!(bob.admit(&forged), Err(ValidationFailure::BadSignature));
    }
}
