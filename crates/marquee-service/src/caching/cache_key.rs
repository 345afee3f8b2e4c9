use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// The key identifying a remote artwork resource, both in-flight and in memory.
///
/// Keys are compared by exact string equality. No normalization takes place, so `/a.jpg` and
/// `a.jpg` are two different keys even though they might refer to the same remote file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CacheKey {
    fn from(path: &str) -> Self {
        Self(path.into())
    }
}

impl From<String> for CacheKey {
    fn from(path: String) -> Self {
        Self(path.into())
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
