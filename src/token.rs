use std::fmt;

/// Associates a readiness event with the registration that produced it.
///
/// A `Token` is supplied by the caller when registering a file descriptor
/// with a [`Selector`](crate::selector::Selector) and is handed back,
/// unchanged, in every [`Event`](crate::selector::Event) produced for that
/// descriptor. The event loop uses the token to look up the reader/writer
/// [`Handle`](crate::handle::Handle) pair stored for the descriptor.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Token(pub usize);

impl From<usize> for Token {
    fn from(val: usize) -> Token {
        Token(val)
    }
}

impl From<Token> for usize {
    fn from(val: Token) -> usize {
        val.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({})", self.0)
    }
}
