//! Credential parameters and auth plugin selection.
//!
//! The CLI accepts a flat set of credential options (flags or `NIMBUS_*`
//! environment variables). Which identity plugin gets used is decided once,
//! deterministically, from the options that are present — never by probing
//! the server.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::error::CliError;

/// The closed set of legal credential parameter names.
///
/// Lookups are typed; an undeclared parameter name is unrepresentable
/// rather than a runtime fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuthField {
    AuthUrl,
    /// Service endpoint URL for token/endpoint auth.
    Url,
    Token,
    Username,
    UserId,
    Password,
    ProjectId,
    ProjectName,
    /// Legacy v2 names; populated from the project fields during
    /// normalization, never accepted directly from the command line.
    TenantId,
    TenantName,
    DomainId,
    DomainName,
    UserDomainId,
    UserDomainName,
    ProjectDomainId,
    ProjectDomainName,
}

impl AuthField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthUrl => "auth_url",
            Self::Url => "url",
            Self::Token => "token",
            Self::Username => "username",
            Self::UserId => "user_id",
            Self::Password => "password",
            Self::ProjectId => "project_id",
            Self::ProjectName => "project_name",
            Self::TenantId => "tenant_id",
            Self::TenantName => "tenant_name",
            Self::DomainId => "domain_id",
            Self::DomainName => "domain_name",
            Self::UserDomainId => "user_domain_id",
            Self::UserDomainName => "user_domain_name",
            Self::ProjectDomainId => "project_domain_id",
            Self::ProjectDomainName => "project_domain_name",
        }
    }
}

impl fmt::Display for AuthField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flat credential parameter mapping, keyed by [`AuthField`].
///
/// Mutable while the session manager normalizes it; frozen (moved into the
/// session) once bootstrap completes.
#[derive(Debug, Clone, Default)]
pub struct AuthParams(BTreeMap<AuthField, String>);

impl AuthParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field. Empty values are dropped so "present" always means
    /// "present with a non-empty value".
    pub fn set(&mut self, field: AuthField, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            return;
        }
        self.0.insert(field, value);
    }

    pub fn set_opt(&mut self, field: AuthField, value: Option<&str>) {
        if let Some(value) = value {
            self.set(field, value);
        }
    }

    pub fn get(&self, field: AuthField) -> Option<&str> {
        self.0.get(&field).map(String::as_str)
    }

    pub fn contains(&self, field: AuthField) -> bool {
        self.0.contains_key(&field)
    }

    pub fn remove(&mut self, field: AuthField) -> Option<String> {
        self.0.remove(&field)
    }

    /// Field names and values with the password masked, for logging and
    /// `configuration show`.
    pub fn masked(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .map(|(k, v)| {
                let value = if *k == AuthField::Password || *k == AuthField::Token {
                    "<redacted>".to_string()
                } else {
                    v.clone()
                };
                (k.as_str().to_string(), value)
            })
            .collect()
    }
}

/// The enumerated auth plugin strategies.
///
/// Exactly one is selected per process; selection is idempotent because it
/// happens inside the session manager's one-shot bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPlugin {
    /// Pre-authorized token against a fixed endpoint. No catalog.
    TokenEndpoint,
    V2Password,
    V3Password,
    /// Version-agnostic password auth; the identity version is discovered
    /// from the auth URL's version document.
    Password,
    V2Token,
    V3Token,
    /// Version-agnostic token auth.
    Token,
}

/// Allow-list of plugin names accepted by `--auth-type`.
pub const PLUGIN_LIST: &[&str] = &[
    "token_endpoint",
    "v2password",
    "v3password",
    "password",
    "v2token",
    "v3token",
    "token",
];

impl AuthPlugin {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TokenEndpoint => "token_endpoint",
            Self::V2Password => "v2password",
            Self::V3Password => "v3password",
            Self::Password => "password",
            Self::V2Token => "v2token",
            Self::V3Token => "v3token",
            Self::Token => "token",
        }
    }

    /// Password-family plugins prompt for a missing password and take part
    /// in domain-scope defaulting.
    pub fn is_password_family(&self) -> bool {
        matches!(self, Self::V2Password | Self::V3Password | Self::Password)
    }

    /// v2-family plugins use the legacy tenant_* parameter names and no
    /// domain scoping.
    pub fn is_v2_family(&self) -> bool {
        matches!(self, Self::V2Password | Self::V2Token)
    }

    /// Parameters that must be present before any network access.
    pub fn required_fields(&self) -> &'static [AuthField] {
        match self {
            Self::TokenEndpoint => &[AuthField::Url, AuthField::Token],
            Self::V2Password | Self::V3Password | Self::Password => {
                &[AuthField::AuthUrl, AuthField::Username]
            }
            Self::V2Token | Self::V3Token | Self::Token => {
                &[AuthField::AuthUrl, AuthField::Token]
            }
        }
    }

    /// Whether the plugin's parameter set includes the v3 domain-scope
    /// fields. Controls default-domain backfill.
    pub fn accepts_domain_scope(&self) -> bool {
        matches!(self, Self::V3Password | Self::V3Token | Self::Password | Self::Token)
    }
}

impl FromStr for AuthPlugin {
    type Err = CliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "token_endpoint" => Ok(Self::TokenEndpoint),
            "v2password" => Ok(Self::V2Password),
            "v3password" => Ok(Self::V3Password),
            "password" => Ok(Self::Password),
            "v2token" => Ok(Self::V2Token),
            "v3token" => Ok(Self::V3Token),
            "token" => Ok(Self::Token),
            other => Err(CliError::Config(format!(
                "Unknown auth type '{other}'. Valid types: {}",
                PLUGIN_LIST.join(", ")
            ))),
        }
    }
}

impl fmt::Display for AuthPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pick an auth plugin from the supplied credential parameters.
///
/// The url+token check runs first because a combined service endpoint and
/// token must override everything else, including an explicit username.
pub fn select_auth_plugin(
    auth: &AuthParams,
    auth_type: Option<&str>,
    identity_api_version: &str,
) -> Result<AuthPlugin, CliError> {
    let plugin = if auth.contains(AuthField::Url) && auth.contains(AuthField::Token) {
        AuthPlugin::TokenEndpoint
    } else if let Some(name) = auth_type {
        name.parse::<AuthPlugin>()?
    } else if auth.contains(AuthField::Username) {
        if identity_api_version == "3" {
            AuthPlugin::V3Password
        } else if identity_api_version.starts_with('2') {
            AuthPlugin::V2Password
        } else {
            // Let the session discover the identity version itself.
            AuthPlugin::Password
        }
    } else if auth.contains(AuthField::Token) {
        if identity_api_version == "3" {
            AuthPlugin::V3Token
        } else if identity_api_version.starts_with('2') {
            AuthPlugin::V2Token
        } else {
            AuthPlugin::Token
        }
    } else {
        // The ultimate default, with version discovery.
        AuthPlugin::Password
    };
    debug!(plugin = plugin.name(), "auth plugin selected");
    Ok(plugin)
}

/// Basic option checking to avoid unhelpful error messages later.
/// Must run before any network access.
pub fn check_valid_authentication_options(
    auth: &AuthParams,
    plugin: AuthPlugin,
) -> Result<(), CliError> {
    let missing: Vec<&str> = plugin
        .required_fields()
        .iter()
        .filter(|f| !auth.contains(**f))
        .map(|f| f.as_str())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(CliError::Config(format!(
            "Missing parameter(s) required for auth type '{}': {}",
            plugin.name(),
            missing.join(", ")
        )))
    }
}

/// Stricter check used when an operation needs a scoped session: the
/// parameters must name an explicit project or domain scope.
///
/// This is deliberately a different validation path from
/// [`check_valid_authentication_options`]; some operations are fine with an
/// authenticated-but-unscoped session.
pub fn check_valid_authorization_options(
    auth: &AuthParams,
    plugin: AuthPlugin,
) -> Result<(), CliError> {
    let scoped = auth.contains(AuthField::ProjectId)
        || auth.contains(AuthField::ProjectName)
        || auth.contains(AuthField::TenantId)
        || auth.contains(AuthField::TenantName)
        || auth.contains(AuthField::DomainId)
        || auth.contains(AuthField::DomainName);

    if scoped {
        Ok(())
    } else {
        Err(CliError::Config(format!(
            "Auth type '{}' produced an unscoped session. Supply one of: \
             project_id, project_name, domain_id, domain_name",
            plugin.name()
        )))
    }
}

/// Rename legacy fields for v2-family plugins:
/// project_id -> tenant_id, project_name -> tenant_name.
pub fn normalize_v2_params(auth: &mut AuthParams) {
    if let Some(value) = auth.remove(AuthField::ProjectId) {
        auth.set(AuthField::TenantId, value);
    }
    if let Some(value) = auth.remove(AuthField::ProjectName) {
        auth.set(AuthField::TenantName, value);
    }
}

/// Default-domain handling.
///
/// Identity v2.0 has no domains: for password-family plugins any domain
/// fields are stripped (with a warning). For v3 password-family plugins,
/// project_domain_id / user_domain_id are backfilled to the configured
/// default when neither the id nor the name was supplied.
pub fn apply_default_domain(
    auth: &mut AuthParams,
    plugin: AuthPlugin,
    identity_api_version: &str,
    default_domain: &str,
) {
    if identity_api_version == "2.0" && plugin.is_password_family() {
        for field in [
            AuthField::ProjectDomainName,
            AuthField::ProjectDomainId,
            AuthField::UserDomainName,
            AuthField::UserDomainId,
        ] {
            if auth.remove(field).is_some() {
                tracing::warn!(
                    field = field.as_str(),
                    "ignoring domain config because identity API version is 2.0"
                );
            }
        }
        return;
    }

    // Domain scoping only applies to v3-capable plugins.
    if identity_api_version != "3" || plugin.is_v2_family() || !plugin.accepts_domain_scope() {
        return;
    }
    if !plugin.is_password_family() {
        return;
    }

    if !auth.contains(AuthField::ProjectDomainId) && !auth.contains(AuthField::ProjectDomainName) {
        auth.set(AuthField::ProjectDomainId, default_domain);
    }
    if !auth.contains(AuthField::UserDomainId) && !auth.contains(AuthField::UserDomainName) {
        auth.set(AuthField::UserDomainId, default_domain);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn params(fields: &[(AuthField, &str)]) -> AuthParams {
        let mut p = AuthParams::new();
        for (f, v) in fields {
            p.set(*f, *v);
        }
        p
    }

    #[test]
    fn url_and_token_select_token_endpoint_even_with_username() {
        let auth = params(&[
            (AuthField::Url, "https://compute.example.test"),
            (AuthField::Token, "secret"),
            (AuthField::Username, "alice"),
        ]);
        let plugin = select_auth_plugin(&auth, None, "3").unwrap();
        assert_eq!(plugin, AuthPlugin::TokenEndpoint);
    }

    #[test]
    fn explicit_auth_type_wins_over_username() {
        let auth = params(&[(AuthField::Username, "alice")]);
        let plugin = select_auth_plugin(&auth, Some("v3token"), "3").unwrap();
        assert_eq!(plugin, AuthPlugin::V3Token);
    }

    #[test]
    fn unknown_auth_type_is_a_configuration_error() {
        let auth = AuthParams::new();
        let err = select_auth_plugin(&auth, Some("kerberos"), "3").unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
    }

    #[rstest]
    #[case("3", AuthPlugin::V3Password)]
    #[case("2.0", AuthPlugin::V2Password)]
    #[case("2", AuthPlugin::V2Password)]
    #[case("1.1", AuthPlugin::Password)]
    #[case("latest", AuthPlugin::Password)]
    fn username_selects_password_variant(#[case] version: &str, #[case] expected: AuthPlugin) {
        let auth = params(&[(AuthField::Username, "alice")]);
        assert_eq!(select_auth_plugin(&auth, None, version).unwrap(), expected);
    }

    #[rstest]
    #[case("3", AuthPlugin::V3Token)]
    #[case("2.0", AuthPlugin::V2Token)]
    #[case("weird", AuthPlugin::Token)]
    fn bare_token_selects_token_variant(#[case] version: &str, #[case] expected: AuthPlugin) {
        let auth = params(&[(AuthField::Token, "secret")]);
        assert_eq!(select_auth_plugin(&auth, None, version).unwrap(), expected);
    }

    #[test]
    fn no_options_default_to_generic_password() {
        let auth = AuthParams::new();
        assert_eq!(
            select_auth_plugin(&auth, None, "3").unwrap(),
            AuthPlugin::Password
        );
    }

    #[test]
    fn authentication_check_reports_missing_fields() {
        let auth = params(&[(AuthField::Username, "alice")]);
        let err = check_valid_authentication_options(&auth, AuthPlugin::V3Password).unwrap_err();
        match err {
            CliError::Config(msg) => assert!(msg.contains("auth_url"), "got: {msg}"),
            other => panic!("expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn authorization_check_requires_explicit_scope() {
        let auth = params(&[
            (AuthField::AuthUrl, "https://identity.example.test"),
            (AuthField::Username, "alice"),
        ]);
        assert!(check_valid_authorization_options(&auth, AuthPlugin::V3Password).is_err());

        let scoped = params(&[
            (AuthField::AuthUrl, "https://identity.example.test"),
            (AuthField::Username, "alice"),
            (AuthField::ProjectName, "widgets"),
        ]);
        assert!(check_valid_authorization_options(&scoped, AuthPlugin::V3Password).is_ok());
    }

    #[test]
    fn v2_normalization_renames_project_fields() {
        let mut auth = params(&[
            (AuthField::ProjectId, "p-1"),
            (AuthField::ProjectName, "widgets"),
        ]);
        normalize_v2_params(&mut auth);
        assert!(!auth.contains(AuthField::ProjectId));
        assert!(!auth.contains(AuthField::ProjectName));
        assert_eq!(auth.get(AuthField::TenantId), Some("p-1"));
        assert_eq!(auth.get(AuthField::TenantName), Some("widgets"));
    }

    #[test]
    fn v3_password_backfills_default_domains() {
        let mut auth = params(&[
            (AuthField::Username, "alice"),
            (AuthField::ProjectName, "widgets"),
        ]);
        apply_default_domain(&mut auth, AuthPlugin::V3Password, "3", "default");
        assert_eq!(auth.get(AuthField::ProjectDomainId), Some("default"));
        assert_eq!(auth.get(AuthField::UserDomainId), Some("default"));
    }

    #[test]
    fn supplied_domain_names_suppress_backfill() {
        let mut auth = params(&[
            (AuthField::Username, "alice"),
            (AuthField::UserDomainName, "corp"),
        ]);
        apply_default_domain(&mut auth, AuthPlugin::V3Password, "3", "default");
        assert_eq!(auth.get(AuthField::UserDomainName), Some("corp"));
        assert!(!auth.contains(AuthField::UserDomainId));
        // project domain was not supplied, so it is still backfilled
        assert_eq!(auth.get(AuthField::ProjectDomainId), Some("default"));
    }

    #[test]
    fn v2_password_strips_all_domain_fields() {
        let mut auth = params(&[
            (AuthField::Username, "alice"),
            (AuthField::ProjectDomainId, "d-1"),
            (AuthField::ProjectDomainName, "corp"),
            (AuthField::UserDomainId, "d-2"),
            (AuthField::UserDomainName, "corp"),
        ]);
        apply_default_domain(&mut auth, AuthPlugin::V2Password, "2.0", "default");
        for field in [
            AuthField::ProjectDomainId,
            AuthField::ProjectDomainName,
            AuthField::UserDomainId,
            AuthField::UserDomainName,
        ] {
            assert!(!auth.contains(field), "{field} should have been stripped");
        }
    }

    #[test]
    fn token_plugins_are_never_backfilled() {
        let mut auth = params(&[(AuthField::Token, "secret")]);
        apply_default_domain(&mut auth, AuthPlugin::V3Token, "3", "default");
        assert!(!auth.contains(AuthField::ProjectDomainId));
        assert!(!auth.contains(AuthField::UserDomainId));
    }

    #[test]
    fn masked_params_redact_secrets() {
        let auth = params(&[
            (AuthField::Username, "alice"),
            (AuthField::Password, "hunter2"),
            (AuthField::Token, "tok"),
        ]);
        let masked = auth.masked();
        assert_eq!(masked["password"], "<redacted>");
        assert_eq!(masked["token"], "<redacted>");
        assert_eq!(masked["username"], "alice");
    }

    #[test]
    fn empty_values_are_treated_as_absent() {
        let mut auth = AuthParams::new();
        auth.set(AuthField::Password, "");
        assert!(!auth.contains(AuthField::Password));
    }
}
