use std::collections::HashSet;

pub const DEFAULT_TRANSLATABLE_KEYS: &[&str] =
    &["text", "caption", "alt", "title", "label", "description"];

/// Editor plumbing, URLs, identifiers, timestamps, counters and enumerated
/// fields. Values under these keys are neither translated nor descended into.
pub const DEFAULT_PROTECTED_KEYS: &[&str] = &[
    // editor structure
    "type", "marks", "level", "class", "rel", "target", "href",
    // media and layout
    "src", "imageUrl", "postUrl", "userProfileImage", "url", "link", "objectFit", "size",
    "alignment", "textAlign", "width", "height", "style", "className", "id", "name",
    // dates
    "timestamp", "date", "time", "datetime", "publishedAt", "createdAt", "updatedAt",
    // counters
    "likesCount", "commentsCount", "viewsCount", "sharesCount", "count", "index", "order",
    "length", "position", "duration", "weight",
    // identity
    "username", "userId", "uuid", "email",
    // geo
    "location", "coordinates", "latitude", "longitude",
    // flags and enums
    "status", "language", "code", "color", "enabled", "visible", "selected", "default",
];

/// Decides which object keys hold translatable text and which subtrees are
/// off limits for the walker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPolicy {
    translatable: HashSet<String>,
    protected: HashSet<String>,
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_TRANSLATABLE_KEYS.iter().copied(),
            DEFAULT_PROTECTED_KEYS.iter().copied(),
        )
    }
}

impl KeyPolicy {
    pub fn new<T, P>(translatable: T, protected: P) -> Self
    where
        T: IntoIterator,
        T::Item: Into<String>,
        P: IntoIterator,
        P::Item: Into<String>,
    {
        Self {
            translatable: translatable.into_iter().map(Into::into).collect(),
            protected: protected.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_protected(&self, key: &str) -> bool {
        self.protected.contains(key)
    }

    /// A key is translatable only when it is allow-listed and not protected.
    pub fn is_translatable(&self, key: &str) -> bool {
        self.translatable.contains(key) && !self.is_protected(key)
    }

    pub fn protect(mut self, key: impl Into<String>) -> Self {
        self.protected.insert(key.into());
        self
    }

    pub fn allow(mut self, key: impl Into<String>) -> Self {
        self.translatable.insert(key.into());
        self
    }
}
