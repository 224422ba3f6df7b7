//! Host identity checks applied while negotiating the SSH session.

use russh::keys::{HashAlg, PublicKey};

/// Decides whether the key presented by the control host is trusted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HostKeyPolicy {
    /// Trust only a key whose SHA-256 fingerprint matches.
    Pinned {
        /// Expected fingerprint in `SHA256:<base64>` form. The `SHA256:`
        /// prefix is optional.
        fingerprint: String,
    },
    /// Trust any key. Host identity is not verified.
    AcceptAny,
}

impl HostKeyPolicy {
    /// Checks the fingerprint of a presented key.
    #[must_use]
    pub fn accepts_fingerprint(&self, presented: &str) -> bool {
        match self {
            Self::AcceptAny => true,
            Self::Pinned { fingerprint } => {
                strip_prefix(fingerprint.trim()) == strip_prefix(presented.trim())
            }
        }
    }

    /// Checks a key presented during the handshake.
    #[must_use]
    pub fn accepts(&self, key: &PublicKey) -> bool {
        let presented = key.fingerprint(HashAlg::Sha256).to_string();
        self.accepts_fingerprint(&presented)
    }
}

fn strip_prefix(fingerprint: &str) -> &str {
    fingerprint.strip_prefix("SHA256:").unwrap_or(fingerprint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const PINNED: &str = "SHA256:uNiVztksCsDhcc0u9e8BujQXVUpKZIDTMczCvj3tD2s";

    #[rstest]
    #[case(PINNED, true)]
    #[case("uNiVztksCsDhcc0u9e8BujQXVUpKZIDTMczCvj3tD2s", true)]
    #[case("SHA256:AAAAztksCsDhcc0u9e8BujQXVUpKZIDTMczCvj3tD2s", false)]
    #[case("", false)]
    fn pinned_policy_matches_exact_fingerprint(#[case] presented: &str, #[case] expected: bool) {
        let policy = HostKeyPolicy::Pinned {
            fingerprint: String::from(PINNED),
        };

        assert_eq!(policy.accepts_fingerprint(presented), expected);
    }

    #[test]
    fn accept_any_trusts_every_key() {
        assert!(HostKeyPolicy::AcceptAny.accepts_fingerprint("SHA256:anything"));
    }
}
