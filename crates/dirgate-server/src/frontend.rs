//! Bind and search handling
//!
//! Requests are handled independently of each other: a successful bind does
//! not change what later searches on the same connection may see.

use dirgate_backend::{DirectoryBackend, QueryResult};
use dirgate_core::{AttributeMapping, Error, Result};
use ldap3_proto::proto::{
    LdapBindCred, LdapBindRequest, LdapFilter, LdapPartialAttribute, LdapResult, LdapResultCode,
    LdapSearchRequest, LdapSearchResultEntry,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Credential carried by a bind request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindCredential {
    Simple(String),
    /// Any non-simple method, by name
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindRequest {
    pub dn: String,
    pub credential: BindCredential,
}

impl From<&LdapBindRequest> for BindRequest {
    fn from(request: &LdapBindRequest) -> Self {
        let credential = match &request.cred {
            LdapBindCred::Simple(password) => BindCredential::Simple(password.clone()),
            LdapBindCred::SASL(sasl) => BindCredential::Unsupported(sasl.mechanism.clone()),
        };

        Self {
            dn: request.dn.clone(),
            credential,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub base: String,
    pub filter: LdapFilter,
    pub attributes: Vec<String>,
}

impl From<&LdapSearchRequest> for SearchRequest {
    fn from(request: &LdapSearchRequest) -> Self {
        Self {
            base: request.base.clone(),
            filter: request.filter.clone(),
            attributes: request.attrs.clone(),
        }
    }
}

/// Entries of a search followed by its final result
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResponse {
    pub entries: Vec<LdapSearchResultEntry>,
    pub done: LdapResult,
}

impl SearchResponse {
    fn failed(err: &Error) -> Self {
        Self {
            entries: Vec::new(),
            done: ldap_result(err.result_code(), err.to_string()),
        }
    }
}

pub(crate) fn ldap_result(code: LdapResultCode, message: impl Into<String>) -> LdapResult {
    LdapResult {
        code,
        matcheddn: String::new(),
        message: message.into(),
        referral: vec![],
    }
}

/// LDAP protocol frontend
pub struct Frontend {
    mapping: Arc<AttributeMapping>,
    backend: Arc<dyn DirectoryBackend>,
}

impl Frontend {
    pub fn new(mapping: Arc<AttributeMapping>, backend: Arc<dyn DirectoryBackend>) -> Self {
        Self { mapping, backend }
    }

    pub fn mapping(&self) -> &AttributeMapping {
        &self.mapping
    }

    /// Answer a bind with `success` or `invalidCredentials`.
    ///
    /// Unknown users and wrong passwords produce the same response.
    pub async fn handle_bind(&self, request: &BindRequest) -> LdapResult {
        match self.authenticate(request).await {
            Ok(user) => {
                info!(user = %user, "Bind succeeded");
                ldap_result(LdapResultCode::Success, "")
            }
            Err(e) => {
                warn!(dn = %request.dn, error = %e, "Bind rejected");
                ldap_result(e.result_code(), "")
            }
        }
    }

    async fn authenticate(&self, request: &BindRequest) -> Result<String> {
        let password = match &request.credential {
            BindCredential::Simple(password) => password.clone(),
            BindCredential::Unsupported(method) => {
                return Err(Error::UnsupportedAuthMethod(method.clone()))
            }
        };

        let user = self.mapping.user_from_dn(&request.dn)?;

        // Unauthenticated bind (RFC 4513 5.1.2)
        if password.is_empty() {
            return Err(Error::InvalidCredentials(user));
        }

        let stored = match self.backend.authenticate(&user).await {
            Some(stored) => stored,
            None => return Err(Error::InvalidCredentials(user)),
        };

        // Memory-hard schemes run off the reactor
        let valid = tokio::task::spawn_blocking(move || dirgate_crypto::verify(&password, &stored))
            .await
            .unwrap_or(false);

        if valid {
            Ok(user)
        } else {
            Err(Error::InvalidCredentials(user))
        }
    }

    /// Run a search. The final result is `success` whenever the request
    /// itself was acceptable, even with zero entries.
    pub async fn handle_search(&self, request: &SearchRequest) -> SearchResponse {
        if !self.mapping.is_base_dn(&request.base) {
            info!(base = %request.base, "Search outside the served subtree");
            return SearchResponse::failed(&Error::OutOfScope(request.base.clone()));
        }

        let lookup = match self.lookup_value(&request.filter) {
            Ok(lookup) => lookup,
            Err(e) => {
                warn!(filter = ?request.filter, error = %e, "Search rejected");
                return SearchResponse::failed(&e);
            }
        };

        let projected = self.mapping.filter_requested(&request.attributes);
        debug!(
            lookup = %lookup,
            requested = ?request.attributes,
            projected = ?projected,
            "Searching directory"
        );

        let results = self.backend.search(lookup, &projected).await;
        let entries: Vec<_> = results
            .iter()
            .filter_map(|result| self.render_entry(result, lookup, &request.base))
            .collect();

        info!(lookup = %lookup, entries = entries.len(), "Search completed");

        SearchResponse {
            entries,
            done: ldap_result(LdapResultCode::Success, ""),
        }
    }

    /// Only `(<rdn>=<value>)` selects entries
    fn lookup_value<'a>(&self, filter: &'a LdapFilter) -> Result<&'a str> {
        match filter {
            LdapFilter::Equality(attribute, value) if self.mapping.is_rdn_attribute(attribute) => {
                Ok(value)
            }
            LdapFilter::Equality(attribute, _) => Err(Error::InvalidRdn {
                expected: self.mapping.rdn_attribute().to_string(),
                got: attribute.clone(),
            }),
            other => Err(Error::UnsupportedFilter(filter_kind(other).to_string())),
        }
    }

    /// One search entry per backend result. The RDN value falls back to the
    /// filter's lookup value; entries without any RDN value are skipped.
    fn render_entry(
        &self,
        result: &QueryResult,
        lookup: &str,
        base: &str,
    ) -> Option<LdapSearchResultEntry> {
        let rdn_value = result
            .first(self.mapping.rdn_attribute())
            .filter(|value| !value.is_empty())
            .unwrap_or(lookup);

        if rdn_value.is_empty() {
            warn!(
                rdn = %self.mapping.rdn_attribute(),
                "Skipping search result without an RDN value"
            );
            return None;
        }

        let attributes = result
            .attributes()
            .iter()
            .filter(|attribute| !attribute.values.is_empty())
            .map(|attribute| LdapPartialAttribute {
                atype: attribute.name.clone(),
                vals: attribute
                    .values
                    .iter()
                    .map(|value| value.as_bytes().to_vec())
                    .collect(),
            })
            .collect();

        Some(LdapSearchResultEntry {
            dn: self.mapping.dn_for(rdn_value, base),
            attributes,
        })
    }
}

fn filter_kind(filter: &LdapFilter) -> &'static str {
    match filter {
        LdapFilter::And(_) => "And",
        LdapFilter::Or(_) => "Or",
        LdapFilter::Not(_) => "Not",
        LdapFilter::Equality(_, _) => "Equality",
        LdapFilter::Present(_) => "Present",
        _ => "Other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const BASE_DN: &str = "ou=People,dc=example,dc=com";
    // "test123"
    const SSHA: &str = "{SSHA}RrAeHR4zMHdNUfvtEibV9yTbtmMY7nF/";

    #[derive(Default)]
    struct TestBackend {
        hashes: HashMap<String, String>,
        results: Vec<QueryResult>,
        auth_calls: Mutex<Vec<String>>,
        search_calls: Mutex<Vec<(String, Vec<String>)>>,
    }

    #[async_trait]
    impl DirectoryBackend for TestBackend {
        async fn authenticate(&self, username: &str) -> Option<String> {
            self.auth_calls.lock().unwrap().push(username.to_string());
            self.hashes.get(username).cloned()
        }

        async fn search(&self, username: &str, attributes: &[String]) -> Vec<QueryResult> {
            self.search_calls
                .lock()
                .unwrap()
                .push((username.to_string(), attributes.to_vec()));
            self.results.clone()
        }
    }

    fn mapping() -> Arc<AttributeMapping> {
        Arc::new(AttributeMapping::new(
            BASE_DN,
            "cn",
            vec![
                ("mail".to_string(), "email_col".to_string()),
                ("memberOf".to_string(), "group_col".to_string()),
            ],
        ))
    }

    fn frontend(backend: TestBackend) -> (Frontend, Arc<TestBackend>) {
        let backend = Arc::new(backend);
        (Frontend::new(mapping(), backend.clone()), backend)
    }

    fn bind(dn: &str, password: &str) -> BindRequest {
        BindRequest {
            dn: dn.to_string(),
            credential: BindCredential::Simple(password.to_string()),
        }
    }

    fn search(base: &str, filter: LdapFilter, attributes: &[&str]) -> SearchRequest {
        SearchRequest {
            base: base.to_string(),
            filter,
            attributes: attributes.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn eq(attribute: &str, value: &str) -> LdapFilter {
        LdapFilter::Equality(attribute.to_string(), value.to_string())
    }

    fn values(entry: &LdapSearchResultEntry, atype: &str) -> Vec<String> {
        entry
            .attributes
            .iter()
            .filter(|a| a.atype == atype)
            .flat_map(|a| a.vals.iter())
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_bind_with_valid_and_invalid_credentials() {
        let (frontend, backend) = frontend(TestBackend {
            hashes: HashMap::from([("bob".to_string(), SSHA.to_string())]),
            ..Default::default()
        });

        let dn = "cn=bob,ou=People,dc=example,dc=com";
        assert_eq!(frontend.handle_bind(&bind(dn, "test123")).await.code, LdapResultCode::Success);
        assert_eq!(
            frontend.handle_bind(&bind(dn, "wrong")).await.code,
            LdapResultCode::InvalidCredentials
        );
        assert_eq!(
            frontend
                .handle_bind(&bind("cn=carol,ou=People,dc=example,dc=com", "test123"))
                .await
                .code,
            LdapResultCode::InvalidCredentials
        );

        assert_eq!(*backend.auth_calls.lock().unwrap(), vec!["bob", "bob", "carol"]);
    }

    #[tokio::test]
    async fn test_bind_rejections_skip_the_backend() {
        let (frontend, backend) = frontend(TestBackend::default());

        let sasl = BindRequest {
            dn: "cn=bob,ou=People,dc=example,dc=com".to_string(),
            credential: BindCredential::Unsupported("SASL".to_string()),
        };
        for request in [
            sasl,
            bind("uid=bob,ou=People,dc=example,dc=com", "test123"),
            bind("cn=bob,dc=other", "test123"),
            bind("cn=bob,ou=People,dc=example,dc=com", ""),
        ] {
            let result = frontend.handle_bind(&request).await;
            assert_eq!(result.code, LdapResultCode::InvalidCredentials, "{:?}", request);
        }

        assert!(backend.auth_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_rejects_unsupported_filters() {
        let (frontend, backend) = frontend(TestBackend::default());

        let present = search(BASE_DN, LdapFilter::Present("objectClass".to_string()), &[]);
        let response = frontend.handle_search(&present).await;
        assert_eq!(response.done.code, LdapResultCode::NoSuchAttribute);
        assert!(response.entries.is_empty());

        let other_attribute = search(BASE_DN, eq("uid", "bob"), &[]);
        let response = frontend.handle_search(&other_attribute).await;
        assert_eq!(response.done.code, LdapResultCode::NoSuchAttribute);
        assert_eq!(response.done.message, "invalid rdn 'uid', should be 'cn'");

        let and = search(
            BASE_DN,
            LdapFilter::And(vec![eq("cn", "bob"), eq("mail", "a@x.com")]),
            &[],
        );
        let response = frontend.handle_search(&and).await;
        assert_eq!(response.done.code, LdapResultCode::NoSuchAttribute);

        assert!(backend.search_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_outside_base_dn() {
        let (frontend, backend) = frontend(TestBackend::default());

        let response = frontend
            .handle_search(&search("dc=example,dc=com", eq("cn", "bob"), &[]))
            .await;

        assert_eq!(response.done.code, LdapResultCode::NoSuchObject);
        assert!(response.entries.is_empty());
        assert!(backend.search_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_without_matches_succeeds() {
        let (frontend, _) = frontend(TestBackend::default());

        let response = frontend
            .handle_search(&search(BASE_DN, eq("cn", "nobody"), &["mail"]))
            .await;

        assert_eq!(response.done.code, LdapResultCode::Success);
        assert!(response.entries.is_empty());
    }

    #[tokio::test]
    async fn test_search_renders_entries() {
        let (frontend, backend) = frontend(TestBackend {
            results: vec![QueryResult::new()
                .with("cn", "bob")
                .with("mail", "bob@example.com")
                .with("memberOf", "admins")
                .with("memberOf", "staff")
                .with("memberOf", "admins")],
            ..Default::default()
        });

        let response = frontend
            .handle_search(&search(BASE_DN, eq("CN", "bob"), &["memberOf", "unknown", "mail"]))
            .await;

        assert_eq!(response.done.code, LdapResultCode::Success);
        assert_eq!(response.entries.len(), 1);

        let entry = &response.entries[0];
        assert_eq!(entry.dn, "cn=bob,ou=People,dc=example,dc=com");
        assert_eq!(values(entry, "mail"), vec!["bob@example.com"]);
        assert_eq!(values(entry, "memberOf"), vec!["admins", "staff"]);

        let calls = backend.search_calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![(
                "bob".to_string(),
                vec!["cn".to_string(), "memberOf".to_string(), "mail".to_string()]
            )]
        );
    }

    #[tokio::test]
    async fn test_search_rdn_falls_back_to_lookup_value() {
        // Row without the RDN column, as returned by a pre-aliased query
        let (frontend, _) = frontend(TestBackend {
            results: vec![QueryResult::new().with("mail", "a@x.com")],
            ..Default::default()
        });

        let response = frontend
            .handle_search(&search(BASE_DN, eq("cn", "bob"), &["mail"]))
            .await;

        assert_eq!(response.entries.len(), 1);
        assert_eq!(response.entries[0].dn, "cn=bob,ou=People,dc=example,dc=com");
        assert_eq!(values(&response.entries[0], "mail"), vec!["a@x.com"]);
        assert_eq!(response.entries[0].attributes.len(), 1);
    }

    #[tokio::test]
    async fn test_search_skips_entries_without_rdn_value() {
        let mut empty_but_present = QueryResult::new();
        empty_but_present.touch("mail");

        let (frontend, _) = frontend(TestBackend {
            results: vec![
                QueryResult::new().with("mail", "orphan@x.com"),
                empty_but_present,
                QueryResult::new().with("cn", "alice"),
            ],
            ..Default::default()
        });

        let response = frontend
            .handle_search(&search(BASE_DN, eq("cn", ""), &[]))
            .await;

        assert_eq!(response.done.code, LdapResultCode::Success);
        assert_eq!(response.entries.len(), 1);
        assert_eq!(response.entries[0].dn, "cn=alice,ou=People,dc=example,dc=com");
    }

    #[tokio::test]
    async fn test_empty_but_present_result_has_no_attributes() {
        let mut result = QueryResult::new();
        result.touch("mail");

        let (frontend, _) = frontend(TestBackend {
            results: vec![result],
            ..Default::default()
        });

        let response = frontend
            .handle_search(&search(BASE_DN, eq("cn", "bob"), &["mail"]))
            .await;

        assert_eq!(response.entries.len(), 1);
        assert_eq!(response.entries[0].dn, "cn=bob,ou=People,dc=example,dc=com");
        assert!(response.entries[0].attributes.is_empty());
    }
}
