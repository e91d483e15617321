use serde::{Deserialize, Serialize};
use std::fmt;

/// Position in a paginated remote listing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub enum Cursor {
    /// Start of the namespace, no continuation token yet.
    #[default]
    Start,

    /// Opaque continuation token returned by the previous page.
    Token(String),
}

impl Cursor {
    pub fn from_token(token: Option<String>) -> Self {
        match token {
            Some(t) if !t.is_empty() => Cursor::Token(t),
            _ => Cursor::Start,
        }
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            Cursor::Start => None,
            Cursor::Token(t) => Some(t),
        }
    }

    pub fn into_token(self) -> Option<String> {
        match self {
            Cursor::Start => None,
            Cursor::Token(t) => Some(t),
        }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cursor::Start => f.write_str("<start>"),
            Cursor::Token(t) => f.write_str(t),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_token_is_start() {
        assert_eq!(Cursor::from_token(Some(String::new())), Cursor::Start);
        assert_eq!(Cursor::from_token(None), Cursor::Start);
        assert_eq!(
            Cursor::from_token(Some("abc".into())).token(),
            Some("abc")
        );
    }
}
