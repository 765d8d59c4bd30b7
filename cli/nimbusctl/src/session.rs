//! Session management: deferred credential construction, the authenticated
//! HTTP session, scope resolution, and per-service endpoint lookup.
//!
//! Auth setup is deferred until something actually needs it because it gets
//! in the way of commands that do not require auth. The lifecycle is
//! one-directional within a process:
//!
//! ```text
//! UNINITIALIZED -> SESSION_READY (setup_auth) -> SCOPE_RESOLVED (auth_ref)
//! ```
//!
//! Both transitions are guarded by one-shot cells: the first caller wins,
//! the result is immutable thereafter, and nothing is ever re-derived or
//! silently refreshed.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::auth::{
    apply_default_domain, check_valid_authentication_options,
    check_valid_authorization_options, normalize_v2_params, select_auth_plugin, AuthField,
    AuthParams, AuthPlugin,
};
use crate::config::{CliOptions, TlsVerify};
use crate::error::CliError;

/// User agent sent on every request.
pub const USER_AGENT: &str = "nimbusctl";

/// Callback used to obtain a password when password auth was requested but
/// no password was supplied. Invoked at most once per process.
pub type PasswordPrompt = Box<dyn Fn(Option<&str>) -> Result<String, CliError> + Send + Sync>;

/// The authenticated session: selected plugin, frozen credential
/// parameters, and the transport client. Built exactly once.
#[derive(Debug)]
pub struct Session {
    pub plugin: AuthPlugin,
    pub auth_params: AuthParams,
    pub http: reqwest::Client,
}

/// Server-issued authorization context, cached after the first (and only)
/// identity round trip.
#[derive(Debug, Clone)]
pub struct AuthRef {
    pub token: String,
    pub project_id: Option<String>,
    pub domain_id: Option<String>,
    /// Absent for token/endpoint auth, which carries no catalog.
    pub catalog: Option<ServiceCatalog>,
}

/// Server-provided listing of service endpoints.
#[derive(Debug, Clone)]
pub struct ServiceCatalog {
    pub entries: Vec<CatalogEntry>,
}

#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub service_type: String,
    pub name: String,
    pub endpoints: Vec<CatalogEndpoint>,
}

#[derive(Debug, Clone)]
pub struct CatalogEndpoint {
    pub interface: String,
    pub region: Option<String>,
    pub url: String,
}

impl ServiceCatalog {
    /// Resolve the endpoint URL for a service type, filtered by region and
    /// interface. Absence of a match is an error, never a soft fallback.
    pub fn url_for(
        &self,
        service_type: &str,
        region: Option<&str>,
        interface: &str,
    ) -> Result<String, CliError> {
        for entry in &self.entries {
            if entry.service_type != service_type {
                continue;
            }
            for ep in &entry.endpoints {
                if ep.interface != interface {
                    continue;
                }
                if let Some(wanted) = region {
                    if ep.region.as_deref() != Some(wanted) {
                        continue;
                    }
                }
                return Ok(ep.url.clone());
            }
        }
        Err(CliError::EndpointNotFound(format!(
            "{} endpoint for interface '{}'{} not in service catalog",
            service_type,
            interface,
            region.map(|r| format!(" in region '{r}'")).unwrap_or_default()
        )))
    }

    pub fn has_service_type(&self, service_type: &str) -> bool {
        self.entries.iter().any(|e| e.service_type == service_type)
    }
}

/// Wall-clock timing record for one network call.
#[derive(Debug, Clone, Serialize)]
pub struct TimingEntry {
    pub label: String,
    pub elapsed_ms: u128,
}

/// Deep-copied view of the static configuration, safe to display.
#[derive(Debug, Serialize)]
pub struct ConfigurationView {
    pub auth: std::collections::BTreeMap<String, String>,
    pub auth_type: Option<String>,
    pub identity_api_version: String,
    pub region_name: Option<String>,
    pub interface: Option<String>,
    pub default_domain: String,
    pub timing: bool,
}

/// Manages the authenticated session and authorization scope shared by all
/// service clients.
pub struct SessionManager {
    options: CliOptions,
    pw_prompt: PasswordPrompt,
    session: OnceCell<Session>,
    auth_ref: OnceCell<AuthRef>,
    timings: Mutex<Vec<TimingEntry>>,
}

impl SessionManager {
    pub fn new(options: CliOptions, pw_prompt: PasswordPrompt) -> Self {
        Self {
            options,
            pw_prompt,
            session: OnceCell::new(),
            auth_ref: OnceCell::new(),
            timings: Mutex::new(Vec::new()),
        }
    }

    pub fn region_name(&self) -> Option<&str> {
        self.options.region_name.as_deref()
    }

    pub fn interface(&self) -> Option<&str> {
        self.options.interface.as_deref()
    }

    /// Set up authentication. Idempotent: the second and later calls return
    /// the already-built session without re-running any setup work, so the
    /// password prompt fires at most once per process.
    ///
    /// No network access happens here; the identity round trip is deferred
    /// to [`SessionManager::auth_ref`].
    pub async fn setup_auth(&self) -> Result<&Session, CliError> {
        self.session
            .get_or_try_init(|| async { self.build_session() })
            .await
    }

    fn build_session(&self) -> Result<Session, CliError> {
        let plugin = select_auth_plugin(
            &self.options.auth,
            self.options.auth_type.as_deref(),
            &self.options.identity_api_version,
        )?;

        // Basic option checking to avoid unhelpful error messages.
        // Must happen before any network access.
        check_valid_authentication_options(&self.options.auth, plugin)?;

        // Build the transport before prompting: a bad CA bundle or client
        // certificate must fail without ever asking for a password.
        let http = self.build_http_client()?;

        let mut auth_params = self.options.auth.clone();

        // Password auth with no password prompts exactly once.
        if plugin.is_password_family() && !auth_params.contains(AuthField::Password) {
            let password = (self.pw_prompt)(None)?;
            auth_params.set(AuthField::Password, password);
        }

        if plugin.is_v2_family() {
            normalize_v2_params(&mut auth_params);
        }

        apply_default_domain(
            &mut auth_params,
            plugin,
            &self.options.identity_api_version,
            &self.options.default_domain,
        );

        debug!(
            plugin = plugin.name(),
            params = ?auth_params.masked(),
            "auth parameters built"
        );

        Ok(Session {
            plugin,
            auth_params,
            http,
        })
    }

    fn build_http_client(&self) -> Result<reqwest::Client, CliError> {
        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);

        match &self.options.verify {
            TlsVerify::Enabled => {}
            TlsVerify::Disabled => {
                builder = builder.danger_accept_invalid_certs(true);
            }
            TlsVerify::CaBundle(path) => {
                let pem = std::fs::read(path).map_err(|e| {
                    CliError::Config(format!("Failed to read CA bundle {path:?}: {e}"))
                })?;
                let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                    CliError::Config(format!("Invalid CA bundle {path:?}: {e}"))
                })?;
                builder = builder.add_root_certificate(cert);
            }
        }

        if let Some(cert_path) = &self.options.client_cert {
            let mut pem = std::fs::read(cert_path).map_err(|e| {
                CliError::Config(format!("Failed to read client cert {cert_path:?}: {e}"))
            })?;
            if let Some(key_path) = &self.options.client_key {
                let key = std::fs::read(key_path).map_err(|e| {
                    CliError::Config(format!("Failed to read client key {key_path:?}: {e}"))
                })?;
                pem.extend_from_slice(&key);
            }
            let identity = reqwest::Identity::from_pem(&pem).map_err(|e| {
                CliError::Config(format!("Invalid client certificate: {e}"))
            })?;
            builder = builder.identity(identity);
        }

        builder
            .build()
            .map_err(|e| CliError::Config(format!("Failed to build HTTP client: {e}")))
    }

    /// Dereference the authorization scope, authenticating on first use.
    /// Exactly one identity round trip per process; subsequent calls are
    /// cache hits.
    pub async fn auth_ref(&self) -> Result<&AuthRef, CliError> {
        self.auth_ref
            .get_or_try_init(|| async {
                let session = self.setup_auth().await?;
                debug!("dereferencing auth_ref");
                self.acquire_auth_ref(session).await
            })
            .await
    }

    /// Check that the resolved scope carries a project or domain. If not,
    /// re-validate the original parameters against the stricter
    /// "explicit scope required" rule; some operations are fine with an
    /// authenticated-but-unscoped session, so this is separate from the
    /// baseline authentication check.
    pub async fn validate_scope(&self) -> Result<(), CliError> {
        let auth_ref = self.auth_ref().await?;
        if auth_ref.project_id.is_some() || auth_ref.domain_id.is_some() {
            return Ok(());
        }
        let session = self.setup_auth().await?;
        check_valid_authorization_options(&session.auth_params, session.plugin)
    }

    /// Return the endpoint URL for a service type. An empty interface means
    /// "public". With a catalog the lookup goes through it; without one
    /// (token/endpoint auth) the plugin's fixed endpoint is used.
    pub async fn get_endpoint_for_service(
        &self,
        service_type: &str,
        region: Option<&str>,
        interface: Option<&str>,
    ) -> Result<String, CliError> {
        let interface = match interface {
            Some(i) if !i.is_empty() => i,
            _ => "public",
        };

        let auth_ref = self.auth_ref().await?;
        match &auth_ref.catalog {
            Some(catalog) => catalog.url_for(service_type, region, interface),
            None => {
                let session = self.setup_auth().await?;
                session
                    .auth_params
                    .get(AuthField::Url)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        CliError::EndpointNotFound(format!(
                            "no service catalog available and auth plugin '{}' has no fixed \
                             endpoint",
                            session.plugin
                        ))
                    })
            }
        }
    }

    /// Best-effort probe for the network service. With a catalog, checks
    /// for a "network" entry; with no catalog at all, assumes enabled.
    /// A usability default, not a security check.
    pub async fn is_network_service_enabled(&self) -> Result<bool, CliError> {
        let auth_ref = self.auth_ref().await?;
        match &auth_ref.catalog {
            Some(catalog) => {
                let enabled = catalog.has_service_type("network");
                debug!(enabled, "network service catalog probe");
                Ok(enabled)
            }
            None => {
                debug!("no service catalog, assuming network service enabled");
                Ok(true)
            }
        }
    }

    /// Deep copy of the static configuration. Never hands out the live
    /// mutable mapping; secrets are masked.
    pub fn get_configuration(&self) -> ConfigurationView {
        ConfigurationView {
            auth: self.options.auth.masked(),
            auth_type: self.options.auth_type.clone(),
            identity_api_version: self.options.identity_api_version.clone(),
            region_name: self.options.region_name.clone(),
            interface: self.options.interface.clone(),
            default_domain: self.options.default_domain.clone(),
            timing: self.options.timing,
        }
    }

    /// Send a request, recording wall-clock duration when `--timing` is
    /// set. Timing never alters control flow.
    pub(crate) async fn send_timed(
        &self,
        request: reqwest::RequestBuilder,
        label: String,
    ) -> Result<reqwest::Response, CliError> {
        let start = Instant::now();
        let result = request.send().await;
        let elapsed = start.elapsed();
        debug!(%label, elapsed_ms = elapsed.as_millis(), "request completed");
        if self.options.timing {
            self.record_timing(label, elapsed);
        }
        Ok(result?)
    }

    fn record_timing(&self, label: String, elapsed: Duration) {
        if let Ok(mut timings) = self.timings.lock() {
            timings.push(TimingEntry {
                label,
                elapsed_ms: elapsed.as_millis(),
            });
        }
    }

    /// Timing records accumulated so far (empty unless `--timing`).
    pub fn timing_report(&self) -> Vec<TimingEntry> {
        self.timings.lock().map(|t| t.clone()).unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Identity protocol
    // ------------------------------------------------------------------

    async fn acquire_auth_ref(&self, session: &Session) -> Result<AuthRef, CliError> {
        match session.plugin {
            // Pre-authorized token against a fixed endpoint: nothing to
            // dereference server-side, no catalog.
            AuthPlugin::TokenEndpoint => Ok(AuthRef {
                token: session
                    .auth_params
                    .get(AuthField::Token)
                    .unwrap_or_default()
                    .to_string(),
                project_id: None,
                domain_id: None,
                catalog: None,
            }),
            AuthPlugin::V3Password | AuthPlugin::V3Token => self.v3_authenticate(session).await,
            AuthPlugin::V2Password | AuthPlugin::V2Token => self.v2_authenticate(session).await,
            AuthPlugin::Password | AuthPlugin::Token => {
                match self.discover_identity_version(session).await? {
                    IdentityVersion::V3 => self.v3_authenticate(session).await,
                    IdentityVersion::V2 => self.v2_authenticate(session).await,
                }
            }
        }
    }

    async fn v3_authenticate(&self, session: &Session) -> Result<AuthRef, CliError> {
        let auth_url = required_param(session, AuthField::AuthUrl)?;
        let url = format!("{}/auth/tokens", auth_url.trim_end_matches('/'));
        let body = v3_auth_request(session);

        let response = self
            .send_timed(session.http.post(&url).json(&body), format!("POST {url}"))
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(identity_error(status.as_u16(), response).await);
        }

        let token = response
            .headers()
            .get("X-Subject-Token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                CliError::Config("identity response carried no X-Subject-Token header".into())
            })?;

        let body: Value = response.json().await?;
        let token_body = &body["token"];

        let catalog = token_body["catalog"]
            .as_array()
            .map(|entries| parse_v3_catalog(entries));

        Ok(AuthRef {
            token,
            project_id: token_body["project"]["id"].as_str().map(str::to_string),
            domain_id: token_body["domain"]["id"].as_str().map(str::to_string),
            catalog,
        })
    }

    async fn v2_authenticate(&self, session: &Session) -> Result<AuthRef, CliError> {
        let auth_url = required_param(session, AuthField::AuthUrl)?;
        let url = format!("{}/tokens", auth_url.trim_end_matches('/'));
        let body = v2_auth_request(session);

        let response = self
            .send_timed(session.http.post(&url).json(&body), format!("POST {url}"))
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(identity_error(status.as_u16(), response).await);
        }

        let body: Value = response.json().await?;
        let access = &body["access"];

        let token = access["token"]["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| CliError::Config("identity response carried no token id".into()))?;

        let catalog = access["serviceCatalog"]
            .as_array()
            .map(|entries| parse_v2_catalog(entries));

        Ok(AuthRef {
            token,
            project_id: access["token"]["tenant"]["id"].as_str().map(str::to_string),
            domain_id: None,
            catalog,
        })
    }

    /// Pick an identity version for the generic plugins: trust an explicit
    /// /v3 or /v2.0 path suffix, otherwise fetch the version document at
    /// the auth URL root. An unrecognized document falls back to v3.
    async fn discover_identity_version(
        &self,
        session: &Session,
    ) -> Result<IdentityVersion, CliError> {
        let auth_url = required_param(session, AuthField::AuthUrl)?;
        let path = auth_url.trim_end_matches('/');
        if path.ends_with("/v3") {
            return Ok(IdentityVersion::V3);
        }
        if path.ends_with("/v2.0") || path.ends_with("/v2") {
            return Ok(IdentityVersion::V2);
        }

        let response = self
            .send_timed(session.http.get(path), format!("GET {path}"))
            .await?;
        // A bare identity root typically answers 300 Multiple Choices with
        // the version document in the body, so don't gate on 2xx here.
        let discovered = response
            .json::<Value>()
            .await
            .ok()
            .and_then(|doc| version_from_document(&doc));
        let version = discovered.unwrap_or(IdentityVersion::V3);
        debug!(?version, "identity version discovered");
        Ok(version)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdentityVersion {
    V2,
    V3,
}

fn version_from_document(doc: &Value) -> Option<IdentityVersion> {
    let ids: Vec<&str> = if let Some(values) = doc["versions"]["values"].as_array() {
        values.iter().filter_map(|v| v["id"].as_str()).collect()
    } else if let Some(id) = doc["version"]["id"].as_str() {
        vec![id]
    } else {
        return None;
    };

    if ids.iter().any(|id| id.starts_with("v3")) {
        Some(IdentityVersion::V3)
    } else if ids.iter().any(|id| id.starts_with("v2")) {
        Some(IdentityVersion::V2)
    } else {
        None
    }
}

fn required_param(session: &Session, field: AuthField) -> Result<&str, CliError> {
    session
        .auth_params
        .get(field)
        .ok_or_else(|| CliError::Config(format!("Missing required auth parameter: {field}")))
}

fn v3_auth_request(session: &Session) -> Value {
    let params = &session.auth_params;

    let identity = if session.plugin.is_password_family() {
        let mut user = json!({
            "password": params.get(AuthField::Password).unwrap_or_default(),
        });
        if let Some(user_id) = params.get(AuthField::UserId) {
            user["id"] = json!(user_id);
        } else {
            user["name"] = json!(params.get(AuthField::Username).unwrap_or_default());
            if let Some(id) = params.get(AuthField::UserDomainId) {
                user["domain"] = json!({ "id": id });
            } else if let Some(name) = params.get(AuthField::UserDomainName) {
                user["domain"] = json!({ "name": name });
            }
        }
        json!({
            "methods": ["password"],
            "password": { "user": user },
        })
    } else {
        json!({
            "methods": ["token"],
            "token": { "id": params.get(AuthField::Token).unwrap_or_default() },
        })
    };

    let mut auth = json!({ "identity": identity });

    if let Some(project_id) = params.get(AuthField::ProjectId) {
        auth["scope"] = json!({ "project": { "id": project_id } });
    } else if let Some(project_name) = params.get(AuthField::ProjectName) {
        let mut project = json!({ "name": project_name });
        if let Some(id) = params.get(AuthField::ProjectDomainId) {
            project["domain"] = json!({ "id": id });
        } else if let Some(name) = params.get(AuthField::ProjectDomainName) {
            project["domain"] = json!({ "name": name });
        }
        auth["scope"] = json!({ "project": project });
    } else if let Some(domain_id) = params.get(AuthField::DomainId) {
        auth["scope"] = json!({ "domain": { "id": domain_id } });
    } else if let Some(domain_name) = params.get(AuthField::DomainName) {
        auth["scope"] = json!({ "domain": { "name": domain_name } });
    }
    // No scope fields: request an unscoped token.

    json!({ "auth": auth })
}

fn v2_auth_request(session: &Session) -> Value {
    let params = &session.auth_params;
    let mut auth = if session.plugin.is_password_family() {
        json!({
            "passwordCredentials": {
                "username": params.get(AuthField::Username).unwrap_or_default(),
                "password": params.get(AuthField::Password).unwrap_or_default(),
            }
        })
    } else {
        json!({
            "token": { "id": params.get(AuthField::Token).unwrap_or_default() }
        })
    };

    if let Some(tenant_id) = params.get(AuthField::TenantId) {
        auth["tenantId"] = json!(tenant_id);
    } else if let Some(tenant_name) = params.get(AuthField::TenantName) {
        auth["tenantName"] = json!(tenant_name);
    }

    json!({ "auth": auth })
}

fn parse_v3_catalog(entries: &[Value]) -> ServiceCatalog {
    let entries = entries
        .iter()
        .map(|entry| CatalogEntry {
            service_type: entry["type"].as_str().unwrap_or_default().to_string(),
            name: entry["name"].as_str().unwrap_or_default().to_string(),
            endpoints: entry["endpoints"]
                .as_array()
                .map(|eps| {
                    eps.iter()
                        .map(|ep| CatalogEndpoint {
                            interface: ep["interface"].as_str().unwrap_or("public").to_string(),
                            region: ep["region"].as_str().map(str::to_string),
                            url: ep["url"].as_str().unwrap_or_default().to_string(),
                        })
                        .collect()
                })
                .unwrap_or_default(),
        })
        .collect();
    ServiceCatalog { entries }
}

fn parse_v2_catalog(entries: &[Value]) -> ServiceCatalog {
    let entries = entries
        .iter()
        .map(|entry| {
            let mut endpoints = Vec::new();
            if let Some(eps) = entry["endpoints"].as_array() {
                for ep in eps {
                    let region = ep["region"].as_str().map(str::to_string);
                    for (key, interface) in [
                        ("publicURL", "public"),
                        ("internalURL", "internal"),
                        ("adminURL", "admin"),
                    ] {
                        if let Some(url) = ep[key].as_str() {
                            endpoints.push(CatalogEndpoint {
                                interface: interface.to_string(),
                                region: region.clone(),
                                url: url.to_string(),
                            });
                        }
                    }
                }
            }
            CatalogEntry {
                service_type: entry["type"].as_str().unwrap_or_default().to_string(),
                name: entry["name"].as_str().unwrap_or_default().to_string(),
                endpoints,
            }
        })
        .collect();
    ServiceCatalog { entries }
}

async fn identity_error(status: u16, response: reqwest::Response) -> CliError {
    let body: Value = response.json().await.unwrap_or_default();
    let message = body["error"]["message"]
        .as_str()
        .unwrap_or("identity request failed")
        .to_string();
    CliError::api(status, "identity_error", message, None)
}
