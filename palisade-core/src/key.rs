//! Cache key derivation for prompt lookups.
//!
//! A key is derived deterministically from a prompt name plus either a
//! version number or a label. Every key for a given name shares the same
//! `prompt:{name}:` prefix, which is what prefix invalidation targets. Lock
//! keys append a fixed suffix and are never themselves cache keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Namespace segment every cache key starts with.
const KEY_NAMESPACE: &str = "prompt";

/// Suffix appended to a cache key to derive its lock key.
const LOCK_SUFFIX: &str = ":lock";

/// Label a request resolves to when neither a version nor a label was given.
pub const DEFAULT_LABEL: &str = "production";

/// Which variant of a named prompt a caller wants.
///
/// Exactly one of version or label applies to a lookup; [`Default`] stands in
/// for "neither given" and resolves to [`DEFAULT_LABEL`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PromptSelector {
    /// A specific immutable version number.
    Version(u32),
    /// A mutable label such as `"production"` or `"staging"`.
    Label(String),
    /// No explicit version or label.
    #[default]
    Latest,
}

impl PromptSelector {
    /// Render the selector segment of a cache key.
    ///
    /// Versions and labels live in disjoint sub-namespaces so that a label
    /// named `"v7"` can never collide with version 7.
    fn segment(&self) -> String {
        match self {
            PromptSelector::Version(v) => format!("version:{v}"),
            PromptSelector::Label(l) => format!("label:{}", escape(l)),
            PromptSelector::Latest => format!("label:{}", escape(DEFAULT_LABEL)),
        }
    }
}

impl fmt::Display for PromptSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptSelector::Version(v) => write!(f, "version {v}"),
            PromptSelector::Label(l) => write!(f, "label {l}"),
            PromptSelector::Latest => write!(f, "label {DEFAULT_LABEL}"),
        }
    }
}

/// A derived cache key.
///
/// # Design
///
/// The rendered string is private; a `CacheKey` can only be built through
/// [`CacheKey::new`], so every key in the system went through the same
/// derivation and the prefix invariant holds by construction.
///
/// # Format
///
/// `prompt:{name}:version:{n}` or `prompt:{name}:label:{label}`, with `%` and
/// `:` percent-escaped inside the name and label segments. The escaping keeps
/// the prefix of one name from ever being a prefix of another name's keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    rendered: String,
}

impl CacheKey {
    /// Derive the cache key for a prompt name and selector.
    pub fn new(name: &str, selector: &PromptSelector) -> Self {
        Self {
            rendered: format!("{}{}", Self::name_prefix(name), selector.segment()),
        }
    }

    /// The prefix shared by every key derived from `name`.
    ///
    /// Passing this to a prefix delete removes all cached versions and
    /// labels of the name at once.
    pub fn name_prefix(name: &str) -> String {
        format!("{KEY_NAMESPACE}:{}:", escape(name))
    }

    /// The rendered key string, as written to backing stores.
    pub fn as_str(&self) -> &str {
        &self.rendered
    }

    /// The key the distributed lock for this entry lives under.
    pub fn lock_key(&self) -> String {
        format!("{}{LOCK_SUFFIX}", self.rendered)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

/// Percent-escape the characters that carry structure in a rendered key.
fn escape(segment: &str) -> String {
    if !segment.contains(['%', ':']) {
        return segment.to_string();
    }
    segment.replace('%', "%25").replace(':', "%3A")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_inputs_same_key() {
        let a = CacheKey::new("greeting", &PromptSelector::Version(3));
        let b = CacheKey::new("greeting", &PromptSelector::Version(3));
        assert_eq!(a, b);
    }

    #[test]
    fn test_version_and_label_do_not_collide() {
        let by_version = CacheKey::new("greeting", &PromptSelector::Version(7));
        let by_label = CacheKey::new("greeting", &PromptSelector::Label("v7".to_string()));
        assert_ne!(by_version, by_label);
    }

    #[test]
    fn test_default_selector_resolves_to_production_label() {
        let latest = CacheKey::new("greeting", &PromptSelector::Latest);
        let explicit = CacheKey::new(
            "greeting",
            &PromptSelector::Label(DEFAULT_LABEL.to_string()),
        );
        assert_eq!(latest, explicit);
    }

    #[test]
    fn test_keys_share_name_prefix() {
        let prefix = CacheKey::name_prefix("greeting");
        let v = CacheKey::new("greeting", &PromptSelector::Version(1));
        let l = CacheKey::new("greeting", &PromptSelector::Label("staging".to_string()));
        assert!(v.as_str().starts_with(&prefix));
        assert!(l.as_str().starts_with(&prefix));
    }

    #[test]
    fn test_lock_key_is_not_a_cache_key() {
        let key = CacheKey::new("greeting", &PromptSelector::Latest);
        assert_eq!(key.lock_key(), format!("{}:lock", key.as_str()));
        assert_ne!(key.lock_key(), key.as_str());
    }

    #[test]
    fn test_colon_in_name_does_not_bleed_across_prefixes() {
        // "team" and "team:legacy" must not share an invalidation scope.
        let plain = CacheKey::new("team:legacy", &PromptSelector::Latest);
        assert!(!plain.as_str().starts_with(&CacheKey::name_prefix("team")));
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn selector_strategy() -> impl Strategy<Value = PromptSelector> {
        prop_oneof![
            any::<u32>().prop_map(PromptSelector::Version),
            "[a-zA-Z0-9:%_-]{1,24}".prop_map(PromptSelector::Label),
            Just(PromptSelector::Latest),
        ]
    }

    proptest! {
        /// Derivation is deterministic: same inputs, same key.
        #[test]
        fn prop_derivation_deterministic(
            name in "[a-zA-Z0-9:%_.-]{1,32}",
            selector in selector_strategy(),
        ) {
            let a = CacheKey::new(&name, &selector);
            let b = CacheKey::new(&name, &selector);
            prop_assert_eq!(a, b);
        }

        /// Every key derived from a name starts with that name's prefix.
        #[test]
        fn prop_key_carries_name_prefix(
            name in "[a-zA-Z0-9:%_.-]{1,32}",
            selector in selector_strategy(),
        ) {
            let key = CacheKey::new(&name, &selector);
            prop_assert!(key.as_str().starts_with(&CacheKey::name_prefix(&name)));
        }

        /// Prefixes of distinct names never contain one another, even when
        /// one name is a textual prefix of the other or contains separators.
        #[test]
        fn prop_name_prefixes_disjoint(
            name1 in "[a-zA-Z0-9:%_.-]{1,32}",
            name2 in "[a-zA-Z0-9:%_.-]{1,32}",
            selector in selector_strategy(),
        ) {
            prop_assume!(name1 != name2);
            let key = CacheKey::new(&name1, &selector);
            prop_assert!(!key.as_str().starts_with(&CacheKey::name_prefix(&name2)));
        }

        /// Distinct selectors under one name yield distinct keys.
        #[test]
        fn prop_selectors_injective(
            name in "[a-zA-Z0-9_.-]{1,32}",
            s1 in selector_strategy(),
            s2 in selector_strategy(),
        ) {
            let k1 = CacheKey::new(&name, &s1);
            let k2 = CacheKey::new(&name, &s2);
            // Latest is an alias for the default label, so treat those as equal.
            let canonical = |s: &PromptSelector| match s {
                PromptSelector::Latest => PromptSelector::Label(DEFAULT_LABEL.to_string()),
                other => other.clone(),
            };
            if canonical(&s1) == canonical(&s2) {
                prop_assert_eq!(k1, k2);
            } else {
                prop_assert_ne!(k1, k2);
            }
        }
    }
}
