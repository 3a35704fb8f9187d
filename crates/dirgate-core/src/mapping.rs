//! Attribute mapping between LDAP and the SQL backend
//!
//! Holds the directory layout the gateway serves:
//! - the base DN all user entries are anchored under
//! - the RDN attribute whose value names an entry
//! - the LDAP attribute name -> backend query token table
//!
//! LDAP attribute descriptions are case-insensitive, so every lookup here
//! ignores ASCII case and hands back the configured spelling.

use crate::error::{Error, Result};

/// Immutable, process-lifetime attribute mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeMapping {
    base_dn: String,
    rdn_attribute: String,
    attributes: Vec<(String, String)>,
}

impl AttributeMapping {
    /// Create a mapping. Later table entries override earlier ones with the
    /// same (case-insensitive) LDAP name.
    pub fn new<I>(base_dn: impl Into<String>, rdn_attribute: impl Into<String>, table: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut attributes: Vec<(String, String)> = Vec::new();

        for (name, token) in table {
            match attributes
                .iter_mut()
                .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
            {
                Some(entry) => entry.1 = token,
                None => attributes.push((name, token)),
            }
        }

        Self {
            base_dn: base_dn.into(),
            rdn_attribute: rdn_attribute.into(),
            attributes,
        }
    }

    pub fn base_dn(&self) -> &str {
        &self.base_dn
    }

    pub fn rdn_attribute(&self) -> &str {
        &self.rdn_attribute
    }

    /// Configured (LDAP name, backend token) pairs in table order
    pub fn entries(&self) -> &[(String, String)] {
        &self.attributes
    }

    pub fn is_rdn_attribute(&self, name: &str) -> bool {
        self.rdn_attribute.eq_ignore_ascii_case(name)
    }

    /// Whether `dn` names the served subtree root
    pub fn is_base_dn(&self, dn: &str) -> bool {
        self.base_dn.eq_ignore_ascii_case(dn)
    }

    /// Configured spelling of a known attribute (the RDN attribute included)
    pub fn canonical_name(&self, name: &str) -> Option<&str> {
        if self.is_rdn_attribute(name) {
            return Some(&self.rdn_attribute);
        }

        self.attributes
            .iter()
            .find(|(ldap, _)| ldap.eq_ignore_ascii_case(name))
            .map(|(ldap, _)| ldap.as_str())
    }

    /// Backend query token for an LDAP attribute; unmapped names stand for themselves
    pub fn token_for<'a>(&'a self, name: &'a str) -> &'a str {
        self.attributes
            .iter()
            .find(|(ldap, _)| ldap.eq_ignore_ascii_case(name))
            .map(|(_, token)| token.as_str())
            .unwrap_or(name)
    }

    /// The full attribute set: the RDN attribute followed by every configured attribute
    pub fn all_attributes(&self) -> Vec<String> {
        let mut all = vec![self.rdn_attribute.clone()];

        for (name, _) in &self.attributes {
            if !self.is_rdn_attribute(name) {
                all.push(name.clone());
            }
        }

        all
    }

    /// Reduce a requested attribute list to the supported set.
    ///
    /// An empty list (or one containing `*`) selects every attribute.
    /// Otherwise the RDN attribute comes first, followed by each known
    /// requested attribute once, in request order. Unknown names are dropped.
    pub fn filter_requested(&self, requested: &[String]) -> Vec<String> {
        if requested.is_empty() || requested.iter().any(|a| a == "*") {
            return self.all_attributes();
        }

        let mut filtered = vec![self.rdn_attribute.clone()];

        for attr in requested {
            if let Some(name) = self.canonical_name(attr) {
                if !filtered.iter().any(|f| f == name) {
                    filtered.push(name.to_string());
                }
            }
        }

        filtered
    }

    /// DN of the entry whose RDN value is `rdn_value`
    pub fn dn_for(&self, rdn_value: &str, base_object: &str) -> String {
        format!("{}={},{}", self.rdn_attribute, rdn_value, base_object)
    }

    /// Extract the user name from `{rdn}=<user>,{base_dn}`.
    ///
    /// The attribute and base DN match ignoring ASCII case, like
    /// [`is_base_dn`](Self::is_base_dn); the user name keeps its case.
    pub fn user_from_dn(&self, dn: &str) -> Result<String> {
        let prefix = format!("{}=", self.rdn_attribute);
        let suffix = format!(",{}", self.base_dn);

        strip_prefix_ignore_case(dn, &prefix)
            .and_then(|rest| strip_suffix_ignore_case(rest, &suffix))
            .filter(|user| !user.is_empty())
            .map(str::to_string)
            .ok_or(Error::MalformedDn { prefix, suffix })
    }
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let head = value.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &value[prefix.len()..])
}

fn strip_suffix_ignore_case<'a>(value: &'a str, suffix: &str) -> Option<&'a str> {
    let split = value.len().checked_sub(suffix.len())?;
    let tail = value.get(split..)?;
    tail.eq_ignore_ascii_case(suffix).then(|| &value[..split])
}

/// Parse an attribute table written as `ldap:token,ldap2:token2,ldap3`.
///
/// A bare name maps to itself. Empty entries are skipped.
pub fn parse_attribute_pairs(value: &str) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();

    for entry in value.split(',').map(str::trim) {
        if entry.is_empty() {
            continue;
        }

        let mut split = entry.split(':');
        let name = split.next().unwrap_or_default();
        let token = split.next().unwrap_or(name);

        if split.next().is_some() || name.is_empty() || token.is_empty() {
            return Err(Error::NotAKeyValuePair(entry.to_string()));
        }

        pairs.push((name.to_string(), token.to_string()));
    }

    Ok(pairs)
}
