//! Initiator election.
//!
//! Both ends of a pair compute the same answer without talking to each other:
//! the lexicographically greater device id initiates.

/// Which side of the handshake a peer state plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Sends the offer
    Initiator,
    /// Waits for an offer and answers it
    Responder,
}

impl Role {
    /// Role of `local` towards `remote`
    #[must_use]
    pub fn elect(local: &str, remote: &str) -> Self {
        if elect(local, remote) {
            Role::Initiator
        } else {
            Role::Responder
        }
    }

    /// True for [`Role::Initiator`]
    #[must_use]
    pub fn is_initiator(self) -> bool {
        self == Role::Initiator
    }
}

/// True if `local` initiates the connection to `remote`.
///
/// For distinct ids exactly one side initiates. Equal ids never initiate.
#[must_use]
pub fn elect(local: &str, remote: &str) -> bool {
    local > remote
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greater_id_initiates() {
        assert!(elect("xyz", "abc"));
        assert!(!elect("abc", "xyz"));
    }

    #[test]
    fn test_equal_ids_never_initiate() {
        assert!(!elect("abc", "abc"));
    }

    #[test]
    fn test_role() {
        assert_eq!(Role::elect("b", "a"), Role::Initiator);
        assert_eq!(Role::elect("a", "b"), Role::Responder);
        assert!(Role::Initiator.is_initiator());
        assert!(!Role::Responder.is_initiator());
    }

    #[test]
    fn test_prefix_ordering() {
        // A proper prefix sorts first
        assert!(elect("abcd", "abc"));
        assert!(!elect("abc", "abcd"));
    }
}
