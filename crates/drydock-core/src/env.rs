//! Environment forwarding into execution units.

use std::collections::BTreeMap;

/// Keep every variable whose name does not start with a denied prefix.
///
/// Prefix matching is case-sensitive, like environment variable names on Linux.
/// Empty prefixes are ignored rather than denying everything.
pub fn filter_env<I, K, V>(vars: I, deny_prefixes: &[String]) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    vars.into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .filter(|(name, _)| {
            !deny_prefixes
                .iter()
                .any(|prefix| !prefix.is_empty() && name.starts_with(prefix.as_str()))
        })
        .collect()
}
