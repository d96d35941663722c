use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::error::ReferenceError;

/// Which source archive a file's bytes live in.  Dense, assigned from 0 in
/// insertion order by [`ArchiveFileMap::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ArchiveToken(pub u32);

impl fmt::Display for ArchiveToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Ordered token → locator table.  Purely additive: tokens are never removed
/// or reassigned, so a token handed out stays valid for the map's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveFileMap {
    locators: Vec<String>,
    tokens:   HashMap<String, ArchiveToken>,
}

impl ArchiveFileMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `locator` under a fresh token, even if it is already present.
    /// Fails once every `u32` token has been handed out.
    pub fn add(&mut self, locator: impl Into<String>) -> Result<ArchiveToken, ReferenceError> {
        let token   = next_token(self.locators.len())?;
        let locator = locator.into();
        self.tokens.entry(locator.clone()).or_insert(token);
        self.locators.push(locator);
        Ok(token)
    }

    /// The token of `locator`, adding it if it is not present yet.
    pub fn intern(&mut self, locator: &str) -> Result<ArchiveToken, ReferenceError> {
        match self.token_of(locator) {
            Some(token) => Ok(token),
            None        => self.add(locator),
        }
    }

    /// First token registered for `locator`.
    pub fn token_of(&self, locator: &str) -> Option<ArchiveToken> {
        self.tokens.get(locator).copied()
    }

    pub fn resolve(&self, token: ArchiveToken) -> Result<&str, ReferenceError> {
        self.locators
            .get(token.0 as usize)
            .map(String::as_str)
            .ok_or(ReferenceError::UnknownToken(token.0))
    }

    pub fn len(&self) -> usize {
        self.locators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locators.is_empty()
    }

    /// Entries in token order.
    pub fn iter(&self) -> impl Iterator<Item = (ArchiveToken, &str)> + '_ {
        // `add` keeps every index within u32.
        (0..=u32::MAX)
            .zip(&self.locators)
            .map(|(i, l)| (ArchiveToken(i), l.as_str()))
    }
}

/// Token for the entry appended to a map holding `len` entries.
fn next_token(len: usize) -> Result<ArchiveToken, ReferenceError> {
    u32::try_from(len)
        .map(ArchiveToken)
        .map_err(|_| ReferenceError::ArchiveMapFull { len })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_dense_and_ordered() {
        let mut map = ArchiveFileMap::new();
        for i in 0..4 {
            assert_eq!(map.add(format!("data{i}.rda")).unwrap(), ArchiveToken(i));
        }
        for i in 0..4 {
            assert_eq!(map.resolve(ArchiveToken(i)).unwrap(), format!("data{i}.rda"));
        }
        assert_eq!(map.resolve(ArchiveToken(4)), Err(ReferenceError::UnknownToken(4)));
    }

    #[test]
    fn add_never_deduplicates_but_intern_does() {
        let mut map = ArchiveFileMap::new();
        let a = map.add("a.rda").unwrap();
        let b = map.add("a.rda").unwrap();
        assert_ne!(a, b);
        assert_eq!(map.intern("a.rda").unwrap(), a);
        assert_eq!(map.intern("b.rda").unwrap(), ArchiveToken(2));
        assert_eq!(map.len(), 3);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn token_space_is_capped_at_u32() {
        assert_eq!(next_token(u32::MAX as usize), Ok(ArchiveToken(u32::MAX)));
        let full = u32::MAX as usize + 1;
        assert_eq!(next_token(full), Err(ReferenceError::ArchiveMapFull { len: full }));
    }
}
