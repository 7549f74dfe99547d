//! Active Directory access for the clone workflow.
//!
//! [`DirectoryClient`] is the seam the orchestrator and the HTTP layer depend
//! on; [`LdapDirectoryClient`] is the production implementation. Each call
//! opens its own connection, binds, does its work and unbinds, so there is no
//! connection state to go stale between requests.

use async_trait::async_trait;
use ldap3::{LdapConn, LdapResult, Mod, Scope, SearchEntry};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::DirectorySettings;
use crate::credential_vault::CredentialSource;
use crate::errors::{from_result_code, ChangeOutcome, DirectoryError, Result};
use crate::ldap_helpers::SearchEntryExt;
use crate::ldap_timeout::{
    ldap_ambient_bind_with_timeout, ldap_bind_with_timeout, ldap_connect_with_timeout,
    ldap_modify_with_timeout, ldap_modifydn_with_timeout, ldap_search_with_timeout,
    ldap_unbind_with_timeout,
};
use crate::ldap_utils::{
    dn_eq, escape_ldap_filter, extract_cn, is_distinguished_name, leading_rdn,
    organizational_unit_of, parent_dn,
};

/// Location and descriptions of one computer object.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputerDetails {
    pub name: String,
    pub distinguished_name: String,
    pub ou: String,
    pub ou_description: String,
    pub description: String,
}

/// Directory operations used by the clone workflow and the lookup endpoints.
///
/// Computers and groups are addressed by name; the implementation resolves
/// them to distinguished names.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Computer names containing `term`, sorted.
    async fn find_computers(&self, term: &str) -> Result<Vec<String>>;

    /// Group names containing `term`, sorted.
    async fn find_groups(&self, term: &str) -> Result<Vec<String>>;

    /// Distinguished names of OUs whose name contains `term`, sorted.
    async fn find_organizational_units(&self, term: &str) -> Result<Vec<String>>;

    /// Names of the groups the computer is a direct member of, sorted.
    async fn get_group_membership(&self, computer: &str) -> Result<Vec<String>>;

    /// The computer's DN from its first `OU=` component on, or empty.
    async fn get_organizational_unit(&self, computer: &str) -> Result<String>;

    async fn get_computer_details(&self, computer: &str) -> Result<ComputerDetails>;

    async fn add_to_group(&self, computer: &str, group: &str) -> Result<ChangeOutcome>;

    async fn remove_from_group(&self, computer: &str, group: &str) -> Result<ChangeOutcome>;

    /// Moves the computer object under `target_ou`.
    async fn move_to_ou(&self, computer: &str, target_ou: &str) -> Result<ChangeOutcome>;
}

// LDAP result codes treated as "already in the requested state"
const RC_NO_SUCH_ATTRIBUTE: u32 = 16;
const RC_ATTRIBUTE_OR_VALUE_EXISTS: u32 = 20;
const RC_ENTRY_ALREADY_EXISTS: u32 = 68;

/// [`DirectoryClient`] over LDAP.
pub struct LdapDirectoryClient {
    settings: DirectorySettings,
    credentials: Arc<dyn CredentialSource>,
}

impl LdapDirectoryClient {
    pub fn new(settings: DirectorySettings, credentials: Arc<dyn CredentialSource>) -> Self {
        Self {
            settings,
            credentials,
        }
    }

    /// Connects and binds, as the service account when one is configured and
    /// as the process identity otherwise.
    async fn get_connection(&self) -> Result<LdapConn> {
        let credentials = self.credentials.credentials().await?;

        // An empty password would turn into an unauthenticated bind
        if let Some(creds) = &credentials {
            if !creds.has_secret() {
                return Err(DirectoryError::AuthError(format!(
                    "No usable secret for service account {}",
                    creds.identity()
                )));
            }
        }

        let url = self.settings.url();
        let ldap = ldap_connect_with_timeout(
            &url,
            self.settings.connect_timeout,
            self.settings.verify_tls,
        )
        .await?;

        let ldap = match credentials {
            Some(creds) => {
                debug!("Binding to {} as {}", url, creds.identity());
                ldap_bind_with_timeout(
                    ldap,
                    creds.identity(),
                    creds.secret(),
                    self.settings.operation_timeout,
                )
                .await?
            }
            None => {
                debug!("Binding to {} with the process identity", url);
                ldap_ambient_bind_with_timeout(
                    ldap,
                    &self.settings.server_host(),
                    self.settings.operation_timeout,
                )
                .await?
            }
        };

        Ok(ldap)
    }

    async fn search(
        &self,
        ldap: LdapConn,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: Vec<&str>,
    ) -> Result<(Vec<SearchEntry>, LdapConn)> {
        let (entries, ldap) = ldap_search_with_timeout(
            ldap,
            base,
            scope,
            filter,
            attrs,
            self.settings.operation_timeout,
        )
        .await?;
        Ok((entries.into_iter().map(SearchEntry::construct).collect(), ldap))
    }

    async fn release(&self, ldap: LdapConn) {
        ldap_unbind_with_timeout(ldap, self.settings.operation_timeout).await;
    }

    /// Looks up one computer object by name.
    async fn find_computer_entry(
        &self,
        ldap: LdapConn,
        computer: &str,
        attrs: Vec<&str>,
    ) -> Result<(SearchEntry, LdapConn)> {
        let computer = computer.trim();
        if computer.is_empty() {
            return Err(DirectoryError::ValidationError(
                "Computer name is required".to_string(),
            ));
        }

        let base = self.settings.base_dn.clone();
        let (entries, ldap) = self
            .search(ldap, &base, Scope::Subtree, &computer_filter(computer), attrs)
            .await?;

        match entries.into_iter().next() {
            Some(entry) => Ok((entry, ldap)),
            None => {
                self.release(ldap).await;
                Err(DirectoryError::NotFound(format!("computer {}", computer)))
            }
        }
    }

    async fn find_group_dn(&self, ldap: LdapConn, group: &str) -> Result<(String, LdapConn)> {
        let base = self.settings.base_dn.clone();
        let (entries, ldap) = self
            .search(
                ldap,
                &base,
                Scope::Subtree,
                &group_filter(group.trim()),
                vec!["distinguishedName"],
            )
            .await?;

        match entries.into_iter().next() {
            Some(entry) => Ok((entry.get_dn(), ldap)),
            None => {
                self.release(ldap).await;
                Err(DirectoryError::NotFound(format!("group {}", group)))
            }
        }
    }

    /// Substring search on `name` for one object class.
    async fn name_search(
        &self,
        object_class: &str,
        term: &str,
        use_dn: bool,
    ) -> Result<Vec<String>> {
        let term = term.trim();
        if term.is_empty() {
            return Ok(Vec::new());
        }

        let ldap = self.get_connection().await?;
        let base = self.settings.base_dn.clone();
        let (entries, ldap) = self
            .search(
                ldap,
                &base,
                Scope::Subtree,
                &name_search_filter(object_class, term),
                vec!["name"],
            )
            .await?;
        self.release(ldap).await;

        let mut names: Vec<String> = entries
            .iter()
            .map(|entry| {
                if use_dn {
                    entry.get_dn()
                } else {
                    entry.get_string_attr("name")
                }
            })
            .filter(|name| !name.is_empty())
            .collect();
        names.sort_by_key(|name| name.to_lowercase());
        names.dedup();

        debug!("{} search for '{}' returned {} entries", object_class, term, names.len());
        Ok(names)
    }
}

#[async_trait]
impl DirectoryClient for LdapDirectoryClient {
    async fn find_computers(&self, term: &str) -> Result<Vec<String>> {
        self.name_search("computer", term, false).await
    }

    async fn find_groups(&self, term: &str) -> Result<Vec<String>> {
        self.name_search("group", term, false).await
    }

    async fn find_organizational_units(&self, term: &str) -> Result<Vec<String>> {
        self.name_search("organizationalUnit", term, true).await
    }

    async fn get_group_membership(&self, computer: &str) -> Result<Vec<String>> {
        let ldap = self.get_connection().await?;
        let (entry, ldap) = self
            .find_computer_entry(ldap, computer, vec!["memberOf"])
            .await?;
        self.release(ldap).await;

        Ok(entry.member_of_names())
    }

    async fn get_organizational_unit(&self, computer: &str) -> Result<String> {
        let ldap = self.get_connection().await?;
        let (entry, ldap) = self
            .find_computer_entry(ldap, computer, vec!["distinguishedName"])
            .await?;
        self.release(ldap).await;

        Ok(organizational_unit_of(&entry.get_dn()))
    }

    async fn get_computer_details(&self, computer: &str) -> Result<ComputerDetails> {
        let ldap = self.get_connection().await?;
        let (entry, ldap) = self
            .find_computer_entry(ldap, computer, vec!["name", "description"])
            .await?;

        let dn = entry.get_dn();
        let ou = organizational_unit_of(&dn);
        let mut details = ComputerDetails {
            name: entry.get_string_attr("name"),
            distinguished_name: dn,
            ou: ou.clone(),
            ou_description: String::new(),
            description: entry.get_string_attr("description"),
        };

        if ou.is_empty() {
            self.release(ldap).await;
            return Ok(details);
        }

        match self
            .search(ldap, &ou, Scope::Base, "(objectClass=*)", vec!["description"])
            .await
        {
            Ok((entries, ldap)) => {
                if let Some(ou_entry) = entries.first() {
                    details.ou_description = ou_entry.get_string_attr("description");
                }
                self.release(ldap).await;
            }
            Err(e) => debug!("Could not read description of {}: {}", ou, e),
        }

        Ok(details)
    }

    async fn add_to_group(&self, computer: &str, group: &str) -> Result<ChangeOutcome> {
        let ldap = self.get_connection().await?;
        let (entry, ldap) = self
            .find_computer_entry(ldap, computer, vec!["memberOf"])
            .await?;
        let computer_dn = entry.get_dn();
        let (group_dn, ldap) = self.find_group_dn(ldap, group).await?;

        if entry
            .get_multi_attr("memberOf")
            .iter()
            .any(|dn| dn_eq(dn, &group_dn))
        {
            self.release(ldap).await;
            debug!("{} is already a member of {}", computer, group);
            return Ok(ChangeOutcome::AlreadySatisfied);
        }

        let mods = vec![Mod::Add(
            "member".to_string(),
            HashSet::from([computer_dn.clone()]),
        )];
        let (result, ldap) =
            ldap_modify_with_timeout(ldap, &group_dn, mods, self.settings.operation_timeout)
                .await?;
        self.release(ldap).await;

        let outcome = classify_change(
            &result,
            &[RC_ATTRIBUTE_OR_VALUE_EXISTS, RC_ENTRY_ALREADY_EXISTS],
        )?;
        if outcome.was_applied() {
            info!(target: "audit", computer = %computer_dn, group = %group_dn, "Computer added to group");
        }
        Ok(outcome)
    }

    async fn remove_from_group(&self, computer: &str, group: &str) -> Result<ChangeOutcome> {
        let ldap = self.get_connection().await?;
        let (entry, ldap) = self
            .find_computer_entry(ldap, computer, vec!["memberOf"])
            .await?;
        let computer_dn = entry.get_dn();

        // Resolve the group through the computer's own memberOf so groups
        // outside the search base are still found
        let group = group.trim();
        let group_dn = entry.get_multi_attr("memberOf").into_iter().find(|dn| {
            extract_cn(dn).is_some_and(|cn| cn.eq_ignore_ascii_case(group))
        });
        let Some(group_dn) = group_dn else {
            self.release(ldap).await;
            debug!("{} is not a member of {}", computer, group);
            return Ok(ChangeOutcome::AlreadySatisfied);
        };

        let mods = vec![Mod::Delete(
            "member".to_string(),
            HashSet::from([computer_dn.clone()]),
        )];
        let (result, ldap) =
            ldap_modify_with_timeout(ldap, &group_dn, mods, self.settings.operation_timeout)
                .await?;
        self.release(ldap).await;

        let outcome = classify_change(&result, &[RC_NO_SUCH_ATTRIBUTE])?;
        if outcome.was_applied() {
            info!(target: "audit", computer = %computer_dn, group = %group_dn, "Computer removed from group");
        }
        Ok(outcome)
    }

    async fn move_to_ou(&self, computer: &str, target_ou: &str) -> Result<ChangeOutcome> {
        let target_ou = target_ou.trim();
        if !is_distinguished_name(target_ou) {
            return Err(DirectoryError::ValidationError(format!(
                "'{}' is not a distinguished name",
                target_ou
            )));
        }

        let ldap = self.get_connection().await?;
        let (entry, ldap) = self
            .find_computer_entry(ldap, computer, vec!["distinguishedName"])
            .await?;
        let dn = entry.get_dn();

        if parent_dn(&dn).is_some_and(|parent| dn_eq(parent, target_ou)) {
            self.release(ldap).await;
            debug!("{} is already in {}", computer, target_ou);
            return Ok(ChangeOutcome::AlreadySatisfied);
        }

        let Some(rdn) = leading_rdn(&dn).map(str::to_string) else {
            self.release(ldap).await;
            return Err(DirectoryError::InternalError(format!(
                "Malformed distinguished name: {}",
                dn
            )));
        };

        let (result, ldap) = ldap_modifydn_with_timeout(
            ldap,
            &dn,
            &rdn,
            target_ou,
            self.settings.operation_timeout,
        )
        .await?;
        self.release(ldap).await;

        let outcome = classify_change(&result, &[])?;
        info!(target: "audit", computer = %dn, target_ou = target_ou, "Computer moved");
        Ok(outcome)
    }
}

/// Turns a raw modify result into an outcome. `tolerated` codes mean the
/// directory already had the requested state.
fn classify_change(result: &LdapResult, tolerated: &[u32]) -> Result<ChangeOutcome> {
    match result.rc {
        0 => Ok(ChangeOutcome::Applied),
        rc if tolerated.contains(&rc) => {
            debug!("Change already satisfied (rc={}): {}", rc, result.text);
            Ok(ChangeOutcome::AlreadySatisfied)
        }
        rc => {
            warn!("Directory rejected change (rc={}): {}", rc, result.text);
            Err(from_result_code(rc, &result.text))
        }
    }
}

fn computer_filter(name: &str) -> String {
    let escaped = escape_ldap_filter(name);
    format!(
        "(&(objectClass=computer)(|(name={0})(sAMAccountName={0}$)))",
        escaped
    )
}

fn group_filter(name: &str) -> String {
    let escaped = escape_ldap_filter(name);
    format!(
        "(&(objectClass=group)(|(name={0})(sAMAccountName={0})))",
        escaped
    )
}

fn name_search_filter(object_class: &str, term: &str) -> String {
    format!(
        "(&(objectClass={})(name=*{}*))",
        object_class,
        escape_ldap_filter(term)
    )
}
