//! Classification of the three sentinel-symbol prefixes that form the wire
//! protocol between the macro layer (`interface.h`, out of scope — spec §1)
//! and the discovery engine (spec §4.2).

const SIZEOF_PROVIDER_PREFIX: &str = "_SIZEOF_PROVIDER_";
const PROVIDER_PREFIX: &str = "_PROVIDER_";
const SIG_TEST_PREFIX: &str = "_SIG_TEST_";

/// The harness never trusts ELF symbol *types*; every sentinel is
/// identified purely by its name's prefix (spec §4.1, §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel<'a> {
    /// `_SIZEOF_PROVIDER_<name>` — `name` is the provider's human name.
    SizeofProvider { name: &'a str },
    /// `_PROVIDER_<name>` — the type name string for provider `name`.
    ProviderTypeName { name: &'a str },
    /// `_SIG_TEST_<name>` — the signature string for test `name`.
    TestSignature { name: &'a str },
}

/// Classifies a symbol name, returning `None` for anything that isn't one
/// of the three recognized prefixes.
///
/// Prefix checks are ordered longest-first so `_SIZEOF_PROVIDER_x` is never
/// mistaken for `_PROVIDER_x` (it isn't a valid prefix match anyway, since
/// `_SIZEOF_PROVIDER_` and `_PROVIDER_` share no common prefix past the
/// leading underscore, but keeping the longer, more specific prefix first
/// documents the intent).
pub fn classify(name: &str) -> Option<Sentinel<'_>> {
    if let Some(rest) = name.strip_prefix(SIZEOF_PROVIDER_PREFIX) {
        return Some(Sentinel::SizeofProvider { name: rest });
    }
    if let Some(rest) = name.strip_prefix(PROVIDER_PREFIX) {
        return Some(Sentinel::ProviderTypeName { name: rest });
    }
    if let Some(rest) = name.strip_prefix(SIG_TEST_PREFIX) {
        return Some(Sentinel::TestSignature { name: rest });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_each_prefix() {
        assert_eq!(
            classify("_SIZEOF_PROVIDER_small"),
            Some(Sentinel::SizeofProvider { name: "small" })
        );
        assert_eq!(
            classify("_PROVIDER_small"),
            Some(Sentinel::ProviderTypeName { name: "small" })
        );
        assert_eq!(
            classify("_SIG_TEST_pos"),
            Some(Sentinel::TestSignature { name: "pos" })
        );
        assert_eq!(classify("small"), None);
        assert_eq!(classify("_TEST_pos"), None);
    }
}
