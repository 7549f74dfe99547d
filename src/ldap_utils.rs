//! LDAP Utilities
//!
//! RFC 4515 filter escaping plus the distinguished-name parsing the clone
//! workflow relies on: common-name extraction for group membership and OU path
//! extraction for computer placement.

/// Escapes a string for safe use in an LDAP search filter (RFC 4515).
///
/// The following characters are escaped:
/// - `*` (asterisk) -> `\2a`
/// - `(` (left parenthesis) -> `\28`
/// - `)` (right parenthesis) -> `\29`
/// - `\` (backslash) -> `\5c`
/// - `\0` (NUL) -> `\00`
///
/// # Examples
///
/// ```
/// use pc_group_cloning::ldap_utils::escape_ldap_filter;
///
/// let safe = escape_ldap_filter("PC*");
/// assert_eq!(safe, "PC\\2a");
/// ```
pub fn escape_ldap_filter(input: &str) -> String {
    input.chars().fold(String::new(), |mut acc, c| {
        match c {
            '*' => acc.push_str("\\2a"),
            '(' => acc.push_str("\\28"),
            ')' => acc.push_str("\\29"),
            '\\' => acc.push_str("\\5c"),
            '\0' => acc.push_str("\\00"),
            _ => acc.push(c),
        }
        acc
    })
}

/// Byte ranges of each RDN in a DN, splitting on unescaped commas.
fn component_spans(dn: &str) -> Vec<(usize, usize)> {
    if dn.trim().is_empty() {
        return Vec::new();
    }

    let mut spans = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in dn.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            ',' => {
                spans.push((start, i));
                start = i + 1;
            }
            _ => {}
        }
    }
    spans.push((start, dn.len()));
    spans
}

/// Splits a DN into its RDN components, honouring `\` escapes.
pub fn split_dn(dn: &str) -> Vec<&str> {
    component_spans(dn)
        .into_iter()
        .map(|(s, e)| dn[s..e].trim())
        .collect()
}

/// Decodes RFC 4514 escapes (`\,` and `\2C` style) in an attribute value.
pub fn unescape_dn_value(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() {
            let hex = bytes
                .get(i + 1..i + 3)
                .filter(|pair| pair.iter().all(u8::is_ascii_hexdigit))
                .and_then(|pair| std::str::from_utf8(pair).ok())
                .and_then(|pair| u8::from_str_radix(pair, 16).ok());
            match hex {
                Some(b) => {
                    out.push(b);
                    i += 3;
                }
                None => {
                    out.push(bytes[i + 1]);
                    i += 2;
                }
            }
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Returns the common name of a DN whose leading component is `CN=`.
///
/// `CN=LSS-App-Office,OU=Groups,DC=example,DC=com` yields `LSS-App-Office`.
/// DNs led by any other attribute yield `None`.
///
/// # Examples
///
/// ```
/// use pc_group_cloning::ldap_utils::extract_cn;
///
/// assert_eq!(extract_cn("CN=Smith\\, John,OU=Staff,DC=corp"), Some("Smith, John".to_string()));
/// assert_eq!(extract_cn("OU=Staff,DC=corp"), None);
/// ```
pub fn extract_cn(dn: &str) -> Option<String> {
    let first = split_dn(dn).into_iter().next()?;
    let (attr, value) = first.split_once('=')?;
    if !attr.trim().eq_ignore_ascii_case("CN") {
        return None;
    }
    let value = unescape_dn_value(value.trim());
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Returns the OU path an object lives in: the DN suffix starting at the first
/// `OU=` component after the object's own RDN. Objects that sit directly in a
/// container (for example `CN=Computers`) with no OU above them yield an empty
/// string.
pub fn organizational_unit_of(dn: &str) -> String {
    component_spans(dn)
        .into_iter()
        .skip(1)
        .find(|&(s, e)| {
            dn[s..e]
                .trim_start()
                .get(..3)
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case("OU="))
        })
        .map(|(s, _)| dn[s..].trim().to_string())
        .unwrap_or_default()
}

/// The leading RDN (`CN=PC-01`) of a DN.
pub fn leading_rdn(dn: &str) -> Option<&str> {
    split_dn(dn).into_iter().next().filter(|rdn| rdn.contains('='))
}

/// Everything after the leading RDN.
pub fn parent_dn(dn: &str) -> Option<&str> {
    component_spans(dn)
        .get(1)
        .map(|&(s, _)| dn[s..].trim())
        .filter(|parent| !parent.is_empty())
}

/// Compares two DNs component-wise, ignoring case and whitespace around separators.
pub fn dn_eq(a: &str, b: &str) -> bool {
    let left = split_dn(a);
    let right = split_dn(b);
    left.len() == right.len()
        && left
            .iter()
            .zip(right.iter())
            .all(|(l, r)| normalize_rdn(l) == normalize_rdn(r))
}

fn normalize_rdn(rdn: &str) -> String {
    match rdn.split_once('=') {
        Some((attr, value)) => format!(
            "{}={}",
            attr.trim().to_ascii_lowercase(),
            value.trim().to_lowercase()
        ),
        None => rdn.trim().to_lowercase(),
    }
}

/// Checks that every component of `value` has the `attr=value` shape.
pub fn is_distinguished_name(value: &str) -> bool {
    let parts = split_dn(value);
    !parts.is_empty()
        && parts.iter().all(|part| match part.split_once('=') {
            Some((attr, val)) => {
                let attr = attr.trim();
                !attr.is_empty()
                    && attr.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
                    && !val.trim().is_empty()
            }
            None => false,
        })
}

/// Builds the default naming context for a DNS domain.
///
/// `example.com` yields `DC=example,DC=com`.
pub fn base_dn_from_domain(domain: &str) -> String {
    domain
        .split('.')
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .map(|label| format!("DC={}", label))
        .collect::<Vec<_>>()
        .join(",")
}
