//! LDAP Helper Utilities
//!
//! Extension trait for pulling attributes out of search results without
//! repeating the `.get().and_then().cloned()` chain at every call site.

use ldap3::SearchEntry;

use crate::ldap_utils::extract_cn;

/// Extension trait for SearchEntry to simplify attribute extraction.
///
/// Attribute names are matched case-insensitively since servers are free to
/// echo them back in a different case than requested.
pub(crate) trait SearchEntryExt {
    /// Get a string attribute, returning empty string if not found
    fn get_string_attr(&self, name: &str) -> String;

    /// Get an optional string attribute (returns None if missing)
    fn get_optional_attr(&self, name: &str) -> Option<String>;

    /// Get all values for a multi-valued attribute
    fn get_multi_attr(&self, name: &str) -> Vec<String>;

    /// Get the distinguished name
    fn get_dn(&self) -> String;

    /// Group names from `memberOf`, sorted. Values without a leading CN are skipped.
    fn member_of_names(&self) -> Vec<String>;
}

fn lookup<'a>(entry: &'a SearchEntry, name: &str) -> Option<&'a Vec<String>> {
    entry.attrs.get(name).or_else(|| {
        entry
            .attrs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values)
    })
}

impl SearchEntryExt for SearchEntry {
    fn get_string_attr(&self, name: &str) -> String {
        self.get_optional_attr(name).unwrap_or_default()
    }

    fn get_optional_attr(&self, name: &str) -> Option<String> {
        lookup(self, name).and_then(|v| v.first()).cloned()
    }

    fn get_multi_attr(&self, name: &str) -> Vec<String> {
        lookup(self, name).cloned().unwrap_or_default()
    }

    fn get_dn(&self) -> String {
        // dn is a field on SearchEntry, not in attrs
        self.dn.clone()
    }

    fn member_of_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .get_multi_attr("memberOf")
            .iter()
            .filter_map(|dn| extract_cn(dn))
            .collect();
        names.sort();
        names
    }
}
