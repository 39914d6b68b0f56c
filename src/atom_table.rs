use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// An interned-by-value atom name. Cloning is a reference count bump,
/// so atoms move freely between OR-parallel workers.
#[derive(Clone, Eq)]
pub struct Atom(Arc<str>);

impl Atom {
    #[inline]
    pub fn new(name: &str) -> Self {
        Atom(Arc::from(name))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if the atom prints without quotes under `writeq/1`.
    pub fn is_unquoted(&self) -> bool {
        let s = self.as_str();
        let mut chars = s.chars();

        match chars.next() {
            Some(c) if c.is_ascii_lowercase() => chars.all(|c| c.is_alphanumeric() || c == '_'),
            Some(_) if s.chars().all(is_symbol_char) => true,
            _ => matches!(s, "[]" | "!" | ";" | "{}" | ","),
        }
    }

    pub fn is_symbolic(&self) -> bool {
        !self.0.is_empty() && self.0.chars().all(is_symbol_char)
    }
}

#[inline]
pub(crate) fn is_symbol_char(c: char) -> bool {
    matches!(
        c,
        '+' | '-' | '*' | '/' | '\\' | '^' | '<' | '>' | '=' | '~' | ':' | '.' | '?' | '@' | '#'
            | '&' | '$'
    )
}

impl PartialEq for Atom {
    #[inline]
    fn eq(&self, other: &Atom) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl Hash for Atom {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

impl PartialOrd for Atom {
    #[inline]
    fn partial_cmp(&self, other: &Atom) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Atom {
    #[inline]
    fn cmp(&self, other: &Atom) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl Borrow<str> for Atom {
    #[inline]
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Atom {
    #[inline]
    fn from(name: &str) -> Self {
        Atom::new(name)
    }
}

impl From<String> for Atom {
    #[inline]
    fn from(name: String) -> Self {
        Atom(Arc::from(name))
    }
}

impl fmt::Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "atom!({:?})", self.as_str())
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

macro_rules! atom {
    ($name:expr) => {
        $crate::atom_table::Atom::new($name)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting() {
        assert!(atom!("foo_Bar1").is_unquoted());
        assert!(atom!("=..").is_unquoted());
        assert!(atom!("[]").is_unquoted());
        assert!(!atom!("Foo").is_unquoted());
        assert!(!atom!("hello world").is_unquoted());
        assert!(!atom!("").is_unquoted());
    }

    #[test]
    fn equality_ignores_allocation() {
        let a = atom!("member");
        let b = Atom::from(String::from("member"));

        assert_eq!(a, b);
        assert_eq!(a.cmp(&b), Ordering::Equal);
        assert!(atom!("abc") < atom!("abd"));
    }
}
