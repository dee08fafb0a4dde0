//! Registration tokens.
//!
//! Every registration carries a token that comes back with its readiness
//! events. Connection tokens pack a slab index with a generation counter, so
//! an event still queued in the current batch for a connection that was
//! closed (and whose slot was reused) no longer matches anything.

/// Identifier attached to a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(pub usize);

/// Token of the listening socket.
pub const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Token of the selector's internal waker.
pub const WAKER_TOKEN: Token = Token(usize::MAX - 1);

const INDEX_BITS: u32 = usize::BITS / 2;
const INDEX_MASK: usize = (1 << INDEX_BITS) - 1;
const GENERATION_MASK: usize = INDEX_MASK >> 1;

/// Largest slab index a connection token can carry.
pub const MAX_INDEX: usize = INDEX_MASK >> 1;

impl Token {
    /// Build a connection token from a slab index and generation.
    ///
    /// The generation is truncated so the top bit stays clear, which keeps
    /// connection tokens disjoint from the reserved ones.
    pub fn connection(index: usize, generation: u32) -> Self {
        debug_assert!(index <= MAX_INDEX, "connection index out of range");
        let generation = generation as usize & GENERATION_MASK;
        Token((generation << INDEX_BITS) | index)
    }

    /// Slab index of a connection token.
    pub fn index(self) -> usize {
        self.0 & INDEX_MASK
    }

    /// Generation of a connection token.
    pub fn generation(self) -> u32 {
        ((self.0 >> INDEX_BITS) & GENERATION_MASK) as u32
    }

    pub fn is_reserved(self) -> bool {
        self == LISTENER_TOKEN || self == WAKER_TOKEN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_packing() {
        let token = Token::connection(42, 7);
        assert_eq!(token.index(), 42);
        assert_eq!(token.generation(), 7);
        assert!(!token.is_reserved());

        // Same slot, next generation: distinct token.
        assert_ne!(token, Token::connection(42, 8));
    }

    #[test]
    fn test_connection_tokens_never_reserved() {
        let token = Token::connection(MAX_INDEX, u32::MAX);
        assert!(!token.is_reserved());
        assert_ne!(token, LISTENER_TOKEN);
        assert_ne!(token, WAKER_TOKEN);
    }
}
