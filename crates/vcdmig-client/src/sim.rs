use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;
use vcdmig_domain::{Element, Reference};

use crate::error::{ClientError, PlatformError};
use crate::platform::{unescape_filter_value, Platform};

const VCLOUD_NS: &str = "http://www.vmware.com/vcloud/v1.5";

/// An in-memory vCloud Director.
///
/// - Serves the same REST surface as [`VcdClient`](crate::vcd::VcdClient):
///   query, retrieval, creation, edit, and edge service configuration.
/// - Enforces the platform rules the migrator depends on: every href in a
///   submitted body must point at an existing object, names are unique in
///   their scope, disabled edge services must be empty, only one default
///   route, storage profiles must be disabled and non-default before removal.
/// - Records every request for assertions.
#[derive(Clone)]
pub struct SimPlatform {
    label: String,
    base:  String,
    inner: Arc<RwLock<Inner>>,
}

/// One request as the simulated platform received it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method:     &'static str,
    pub href:       String,
    pub media_type: Option<String>,
    pub body:       Option<Element>,
}

#[derive(Debug, Clone)]
struct SimObject {
    query_type: String,
    element:    Element,
    /// Extra attributes exposed on query records (`org`, `vdc`, ...).
    record:     BTreeMap<String, String>,
    /// Reads left before a `status`-bearing entity reports ready.
    pending:    Option<u32>,
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    method:   &'static str,
    fragment: String,
    status:   u16,
    error:    PlatformError,
}

#[derive(Debug, Default)]
struct Inner {
    base:        String,
    objects:     BTreeMap<String, SimObject>,
    order:       Vec<String>,
    requests:    Vec<RecordedRequest>,
    ready_after: u32,
    failures:    Vec<InjectedFailure>,
    closed:      bool,
}

impl SimPlatform {
    pub fn new(label: &str) -> Self {
        let base = format!("https://{}.sim", label);
        Self {
            label: label.to_string(),
            base:  base.clone(),
            inner: Arc::new(RwLock::new(Inner { base, ..Inner::default() })),
        }
    }

    // ── Behaviour knobs ───────────────────────────────────────────────────────

    /// Newly created vdcs, gateways and networks report `status="0"` for the
    /// next `reads` retrievals before turning ready.
    pub async fn set_ready_after(&self, reads: u32) {
        self.inner.write().await.ready_after = reads;
    }

    /// Put an existing object back into provisioning for the next `reads`
    /// retrievals.
    pub async fn set_pending(&self, href: &str, reads: u32) {
        if let Some(obj) = self.inner.write().await.objects.get_mut(href) {
            obj.pending = Some(reads);
            obj.element.set_attr("status", "0");
        }
    }

    /// Make every `method` request whose href contains `fragment` fail with
    /// the given platform error.
    pub async fn fail_requests(
        &self,
        method: &'static str,
        fragment: &str,
        status: u16,
        minor: &str,
        message: &str,
    ) {
        self.inner.write().await.failures.push(InjectedFailure {
            method,
            fragment: fragment.to_string(),
            status,
            error: PlatformError {
                major:   Some(status.to_string()),
                minor:   Some(minor.to_string()),
                message: message.to_string(),
            },
        });
    }

    // ── Inspection ────────────────────────────────────────────────────────────

    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.inner.read().await.requests.clone()
    }

    /// Current state of every object of `query_type`, in creation order.
    pub async fn objects(&self, query_type: &str) -> Vec<Element> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|h| inner.objects.get(h))
            .filter(|o| o.query_type == query_type)
            .map(|o| o.element.clone())
            .collect()
    }

    pub async fn object(&self, href: &str) -> Option<Element> {
        self.inner.read().await.objects.get(href).map(|o| o.element.clone())
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.read().await.closed
    }

    // ── Seeding ───────────────────────────────────────────────────────────────

    /// Insert an arbitrary object; returns its href.
    pub async fn seed(&self, query_type: &str, element: Element, record: &[(&str, &str)]) -> String {
        let mut inner = self.inner.write().await;
        let record = record.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        inner.insert(query_type, element, record, false)
    }

    pub async fn seed_org(&self, name: &str) -> String {
        let org = Element::new("AdminOrg")
            .with_attr("xmlns", VCLOUD_NS)
            .with_attr("name", name)
            .with_child(Element::new("Description").with_text(format!("{} tenant", name)))
            .with_child(Element::new("FullName").with_text(name))
            .with_child(Element::new("IsEnabled").with_text("true"))
            .with_child(
                Element::new("Settings").with_child(
                    Element::new("OrgGeneralSettings")
                        .with_attr("href", format!("{}/api/admin/org/settings/general", self.base))
                        .with_child(Element::new("CanPublishCatalogs").with_text("false"))
                        .with_child(Element::new("DeployedVMQuota").with_text("0")),
                ),
            );
        let mut inner = self.inner.write().await;
        let href = inner.insert("organization", org, BTreeMap::new(), false);
        inner.ensure_org_containers(&href);
        href
    }

    pub async fn seed_right(&self, name: &str) -> String {
        let right = Element::new("Right").with_attr("name", name);
        self.seed("right", right, &[]).await
    }

    pub async fn seed_role(&self, org_href: &str, name: &str, right_hrefs: &[(&str, &str)]) -> String {
        let mut rights = Element::new("RightReferences");
        for (right_name, href) in right_hrefs {
            rights.children.push(
                Element::new("RightReference")
                    .with_attr("href", *href)
                    .with_attr("name", *right_name)
                    .with_attr("type", "application/vnd.vmware.admin.right+xml"),
            );
        }
        let role = Element::new("Role")
            .with_attr("xmlns", VCLOUD_NS)
            .with_attr("name", name)
            .with_child(Element::new("Description").with_text(format!("{} role", name)))
            .with_child(rights);
        let mut inner = self.inner.write().await;
        let mut record = BTreeMap::new();
        record.insert("org".to_string(), org_href.to_string());
        let href = inner.insert("role", role, record, false);
        inner.add_to_listing(org_href, "RoleReferences", "RoleReference", &href);
        href
    }

    pub async fn seed_user(&self, org_href: &str, name: &str, role: &Reference) -> String {
        let user = Element::new("User")
            .with_attr("xmlns", VCLOUD_NS)
            .with_attr("name", name)
            .with_child(Element::new("FullName").with_text(name))
            .with_child(Element::new("EmailAddress").with_text(format!("{}@example.com", name)))
            .with_child(Element::new("IsEnabled").with_text("true"))
            .with_child(Element::new("IsLocked").with_text("false"))
            .with_child(Element::new("ProviderType").with_text("INTEGRATED"))
            .with_child(role.to_element("Role"));
        let mut inner = self.inner.write().await;
        let mut record = BTreeMap::new();
        record.insert("org".to_string(), org_href.to_string());
        let href = inner.insert("adminUser", user, record, false);
        inner.add_to_listing(org_href, "Users", "UserReference", &href);
        href
    }

    pub async fn seed_vcenter(&self, name: &str) -> String {
        self.seed("virtualCenter", Element::new("VimServer").with_attr("name", name), &[])
            .await
    }

    /// A provider vdc with one network pool and the given storage profiles
    /// (`(name, enabled)`); `*` is the wildcard profile.
    pub async fn seed_provider_vdc(
        &self,
        name: &str,
        profiles: &[(&str, bool)],
        network_pool: &str,
    ) -> String {
        let mut inner = self.inner.write().await;
        let pool_href = inner.insert(
            "networkPool",
            Element::new("VMWNetworkPool").with_attr("name", network_pool),
            BTreeMap::new(),
            false,
        );
        let pool_ref = Reference {
            name:     network_pool.to_string(),
            ref_type: Some("application/vnd.vmware.admin.networkPool+xml".into()),
            href:     pool_href,
        };
        let pvdc = Element::new("ProviderVdc")
            .with_attr("xmlns", VCLOUD_NS)
            .with_attr("name", name)
            .with_child(Element::new("NetworkPoolReferences").with_child(pool_ref.to_element("NetworkPoolReference")))
            .with_child(Element::new("StorageProfiles"));
        let pvdc_href = inner.insert("providerVdc", pvdc, BTreeMap::new(), false);

        for (profile, enabled) in profiles {
            let mut record = BTreeMap::new();
            record.insert("providerVdc".to_string(), pvdc_href.clone());
            record.insert("isEnabled".to_string(), enabled.to_string());
            let el = Element::new("ProviderVdcStorageProfile")
                .with_attr("name", *profile)
                .with_child(Element::new("Enabled").with_text(enabled.to_string()));
            let href = inner.insert("providerVdcStorageProfile", el, record, false);
            inner.add_to_listing(&pvdc_href, "StorageProfiles", "ProviderVdcStorageProfile", &href);
        }
        pvdc_href
    }

    /// An OrgVdc in `org_href`, optionally drawing from `pvdc_href`.
    pub async fn seed_vdc(&self, org_href: &str, name: &str, pvdc_href: Option<&str>) -> String {
        let mut inner = self.inner.write().await;
        let mut vdc = Element::new("AdminVdc")
            .with_attr("xmlns", VCLOUD_NS)
            .with_attr("name", name)
            .with_attr("status", "1")
            .with_child(Element::new("Description").with_text(format!("{} datacenter", name)))
            .with_child(Element::new("AllocationModel").with_text("AllocationVApp"))
            .with_child(
                Element::new("ComputeCapacity")
                    .with_child(capacity("Cpu", "MHz", "0", "0"))
                    .with_child(capacity("Memory", "MB", "0", "0")),
            )
            .with_child(Element::new("NicQuota").with_text("0"))
            .with_child(Element::new("NetworkQuota").with_text("10"))
            .with_child(Element::new("VmQuota").with_text("0"))
            .with_child(Element::new("IsEnabled").with_text("true"))
            .with_child(Element::new("VdcStorageProfiles"))
            .with_child(Element::new("AvailableNetworks"))
            .with_child(Element::new("IsThinProvision").with_text("true"));
        if let Some(pvdc) = pvdc_href {
            if let Some(p) = inner.objects.get(pvdc) {
                let name = p.element.attr("name").unwrap_or_default().to_string();
                let pool = p
                    .element
                    .find(&["NetworkPoolReferences", "NetworkPoolReference"])
                    .cloned();
                vdc.children.push(
                    Element::new("ProviderVdcReference")
                        .with_attr("href", pvdc)
                        .with_attr("name", name)
                        .with_attr("type", "application/vnd.vmware.admin.providervdc+xml"),
                );
                if let Some(pool) = pool {
                    vdc.children.push(pool);
                }
            }
        }
        let mut record = BTreeMap::new();
        record.insert("org".to_string(), org_href.to_string());
        let href = inner.insert("adminOrgVdc", vdc, record, false);
        inner.add_to_listing(org_href, "Vdcs", "Vdc", &href);
        href
    }

    /// A storage profile already attached to a vdc (source-side fixtures).
    pub async fn seed_vdc_storage_profile(
        &self,
        vdc_href: &str,
        name: &str,
        limit_mb: u64,
        default: bool,
    ) -> String {
        let mut inner = self.inner.write().await;
        let el = Element::new("AdminVdcStorageProfile")
            .with_attr("name", name)
            .with_child(Element::new("Enabled").with_text("true"))
            .with_child(Element::new("Units").with_text("MB"))
            .with_child(Element::new("Limit").with_text(limit_mb.to_string()))
            .with_child(Element::new("Default").with_text(default.to_string()));
        let mut record = BTreeMap::new();
        record.insert("vdc".to_string(), vdc_href.to_string());
        let href = inner.insert("adminOrgVdcStorageProfile", el, record, false);
        inner.add_to_listing(vdc_href, "VdcStorageProfiles", "VdcStorageProfile", &href);
        href
    }

    pub async fn seed_external_network(&self, name: &str) -> String {
        let net = Element::new("VMWExternalNetwork")
            .with_attr("xmlns", VCLOUD_NS)
            .with_attr("name", name)
            .with_child(Element::new("Description").with_text("provider uplink"));
        self.seed("externalNetwork", net, &[]).await
    }

    /// An edge gateway inside `vdc_href`, described by `element`.
    pub async fn seed_edge_gateway(&self, vdc_href: &str, element: Element) -> String {
        let mut inner = self.inner.write().await;
        let record = inner.vdc_record(vdc_href);
        inner.insert("edgeGateway", element, record, false)
    }

    /// An OrgVdcNetwork inside `vdc_href`, described by `element`.
    pub async fn seed_network(&self, vdc_href: &str, element: Element) -> String {
        let mut inner = self.inner.write().await;
        let record = inner.vdc_record(vdc_href);
        let org = record.get("org").cloned();
        let href = inner.insert("orgVdcNetwork", element, record, false);
        inner.add_to_listing(vdc_href, "AvailableNetworks", "Network", &href);
        if let Some(org) = org {
            inner.add_to_listing(&org, "Networks", "Network", &href);
        }
        href
    }

    async fn record_request(
        &self,
        method: &'static str,
        href: &str,
        media_type: Option<&str>,
        body: Option<&Element>,
    ) -> Result<(), ClientError> {
        let mut inner = self.inner.write().await;
        inner.requests.push(RecordedRequest {
            method,
            href: href.to_string(),
            media_type: media_type.map(str::to_string),
            body: body.cloned(),
        });
        let injected = inner
            .failures
            .iter()
            .find(|f| f.method == method && href.contains(&f.fragment))
            .cloned();
        match injected {
            Some(f) => Err(ClientError::from_status(
                f.status,
                &self.base,
                &format!("{} {}", method, href),
                method == "GET",
                f.error,
            )),
            None => Ok(()),
        }
    }
}

fn capacity(name: &str, units: &str, allocated: &str, limit: &str) -> Element {
    Element::new(name)
        .with_child(Element::new("Units").with_text(units))
        .with_child(Element::new("Allocated").with_text(allocated))
        .with_child(Element::new("Limit").with_text(limit))
        .with_child(Element::new("Reserved").with_text("0"))
        .with_child(Element::new("Used").with_text("0"))
}

fn validation(what: &str, minor: &str, message: impl Into<String>) -> ClientError {
    ClientError::Validation {
        what: what.to_string(),
        error: PlatformError {
            major:   Some("400".into()),
            minor:   Some(minor.into()),
            message: message.into(),
        },
    }
}

fn duplicate(what: &str, name: &str) -> ClientError {
    ClientError::Conflict {
        what: what.to_string(),
        error: PlatformError {
            major:   Some("400".into()),
            minor:   Some("DUPLICATE_NAME".into()),
            message: format!("The name {} is already in use.", name),
        },
    }
}

fn href_segment(query_type: &str) -> &'static str {
    match query_type {
        "organization" => "admin/org",
        "role" => "admin/role",
        "right" => "admin/right",
        "adminUser" => "admin/user",
        "adminOrgVdc" => "admin/vdc",
        "providerVdc" => "admin/providervdc",
        "providerVdcStorageProfile" => "admin/pvdcStorageProfile",
        "adminOrgVdcStorageProfile" => "admin/vdcStorageProfile",
        "networkPool" => "admin/extension/networkPool",
        "externalNetwork" => "admin/extension/externalnet",
        "virtualCenter" => "admin/extension/vimServer",
        "edgeGateway" => "admin/edgeGateway",
        "orgVdcNetwork" => "admin/network",
        "task" => "task",
        _ => "entity",
    }
}

fn record_name(query_type: &str) -> String {
    let mut chars = query_type.chars();
    match chars.next() {
        Some(first) => format!("{}{}Record", first.to_ascii_uppercase(), chars.as_str()),
        None => "Record".to_string(),
    }
}

/// `*` matches any run of characters.
fn wildcard_match(pattern: &str, value: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == value;
    }
    let mut rest = value;
    for (i, part) in parts.iter().enumerate() {
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

impl Inner {
    fn insert(
        &mut self,
        query_type: &str,
        mut element: Element,
        record: BTreeMap<String, String>,
        with_status: bool,
    ) -> String {
        let href = format!("{}/api/{}/{}", self.base, href_segment(query_type), Uuid::new_v4());
        element.set_attr("href", href.clone());
        let pending = with_status.then_some(self.ready_after);
        if with_status {
            element.set_attr("status", if self.ready_after == 0 { "1" } else { "0" });
        }
        self.objects.insert(
            href.clone(),
            SimObject { query_type: query_type.to_string(), element, record, pending },
        );
        self.order.push(href.clone());
        href
    }

    fn new_task(&mut self, operation: &str) -> Element {
        let task = Element::new("Task")
            .with_attr("status", "success")
            .with_attr("operation", operation);
        let href = self.insert("task", task, BTreeMap::new(), false);
        Element::new("Task")
            .with_attr("href", href)
            .with_attr("status", "running")
            .with_attr("operation", operation)
    }

    /// The created object as the platform echoes it, with a pending task.
    fn created_response(&mut self, href: &str, operation: &str) -> Element {
        let task = self.new_task(operation);
        let mut el = self
            .objects
            .get(href)
            .map(|o| o.element.clone())
            .unwrap_or_default();
        el.children.push(Element::new("Tasks").with_child(task));
        el
    }

    fn ensure_org_containers(&mut self, org_href: &str) {
        if let Some(org) = self.objects.get_mut(org_href) {
            for container in ["Users", "Vdcs", "Networks"] {
                if org.element.child(container).is_none() {
                    org.element.children.push(Element::new(container));
                }
            }
        }
    }

    fn add_to_listing(&mut self, owner_href: &str, container: &str, item: &str, href: &str) {
        let Some(child) = self.objects.get(href) else { return };
        let name = child.element.attr("name").unwrap_or_default().to_string();
        let ref_type = child.element.attr("type").map(str::to_string);
        let Some(owner) = self.objects.get_mut(owner_href) else { return };
        if owner.element.child(container).is_none() {
            owner.element.children.push(Element::new(container));
        }
        if let Some(list) = owner.element.child_mut(container) {
            let mut r = Element::new(item).with_attr("href", href).with_attr("name", name);
            if let Some(t) = ref_type {
                r.set_attr("type", t);
            }
            list.children.push(r);
        }
    }

    fn remove_from_listing(&mut self, owner_href: &str, container: &str, href: &str) {
        if let Some(list) = self
            .objects
            .get_mut(owner_href)
            .and_then(|o| o.element.child_mut(container))
        {
            list.children.retain(|c| c.attr("href") != Some(href));
        }
    }

    fn vdc_record(&self, vdc_href: &str) -> BTreeMap<String, String> {
        let mut record = BTreeMap::new();
        record.insert("vdc".to_string(), vdc_href.to_string());
        if let Some(org) = self.objects.get(vdc_href).and_then(|v| v.record.get("org")) {
            record.insert("org".to_string(), org.clone());
        }
        record
    }

    fn require(&self, href: &str, what: &str) -> Result<(), ClientError> {
        if self.objects.contains_key(href) {
            Ok(())
        } else {
            Err(ClientError::NotFound { what: format!("{} {}", what, href) })
        }
    }

    /// Every href in a submitted body must point at a live object.
    fn check_refs(&self, body: &Element, what: &str) -> Result<(), ClientError> {
        let mut missing = None;
        body.walk(&mut |e| {
            if missing.is_some() || e.local_name() == "Link" {
                return;
            }
            if let Some(href) = e.attr("href") {
                if !self.objects.contains_key(href) {
                    missing = Some(format!(
                        "<{}> references unknown object '{}' ({})",
                        e.local_name(),
                        e.attr("name").unwrap_or("?"),
                        href
                    ));
                }
            }
        });
        match missing {
            Some(m) => Err(validation(what, "INVALID_REFERENCE", m)),
            None => Ok(()),
        }
    }

    fn name_taken(&self, query_type: &str, name: &str, scope: Option<(&str, &str)>) -> bool {
        self.objects.values().any(|o| {
            o.query_type == query_type
                && o.element.attr("name") == Some(name)
                && scope.map_or(true, |(k, v)| o.record.get(k).map(String::as_str) == Some(v))
        })
    }

    fn record_for(&self, href: &str) -> Element {
        let Some(obj) = self.objects.get(href) else { return Element::default() };
        let mut rec = Element::new(record_name(&obj.query_type))
            .with_attr("name", obj.element.attr("name").unwrap_or_default())
            .with_attr("href", href);
        for (k, v) in &obj.record {
            rec.set_attr(k.clone(), v.clone());
        }
        if let Some(status) = obj.element.attr("status") {
            rec.set_attr("status", status);
        }
        rec
    }

    fn matches_filter(&self, obj: &SimObject, filter: &str) -> bool {
        filter.split(';').filter(|t| !t.is_empty()).all(|term| {
            let Some((key, value)) = term.split_once("==") else { return false };
            let value = unescape_filter_value(value);
            let have = if key == "name" {
                obj.element.attr("name")
            } else {
                obj.record.get(key).map(String::as_str)
            };
            have.is_some_and(|h| wildcard_match(&value, h))
        })
    }

    // ── Creation handlers ─────────────────────────────────────────────────────

    fn create_org(&mut self, body: &Element, what: &str) -> Result<Element, ClientError> {
        let name = body.attr("name").unwrap_or_default();
        if body.child("FullName").is_none() {
            return Err(validation(what, "BAD_REQUEST", "FullName is required"));
        }
        if self.name_taken("organization", name, None) {
            return Err(duplicate(what, name));
        }
        self.check_refs(body, what)?;
        let href = self.insert("organization", body.clone(), BTreeMap::new(), false);
        self.ensure_org_containers(&href);
        Ok(self.created_response(&href, "Created Organization"))
    }

    fn create_role(&mut self, org: &str, body: &Element, what: &str) -> Result<Element, ClientError> {
        self.require(org, "organization")?;
        let name = body.attr("name").unwrap_or_default();
        if self.name_taken("role", name, Some(("org", org))) {
            return Err(duplicate(what, name));
        }
        self.check_refs(body, what)?;
        let mut record = BTreeMap::new();
        record.insert("org".to_string(), org.to_string());
        let href = self.insert("role", body.clone(), record, false);
        Ok(self.created_response(&href, "Created Role"))
    }

    fn create_user(&mut self, org: &str, body: &Element, what: &str) -> Result<Element, ClientError> {
        self.require(org, "organization")?;
        let name = body.attr("name").unwrap_or_default();
        if self.name_taken("adminUser", name, Some(("org", org))) {
            return Err(duplicate(what, name));
        }
        let integrated = body.child_text("ProviderType").map_or(true, |p| p == "INTEGRATED");
        if integrated && body.child_text("Password").map_or(true, str::is_empty) {
            return Err(validation(what, "BAD_REQUEST", "Password is required for local users"));
        }
        if body.child("Role").is_none() {
            return Err(validation(what, "BAD_REQUEST", "Role is required"));
        }
        self.check_refs(body, what)?;
        let mut stored = body.clone();
        stored.remove_children("Password");
        let mut record = BTreeMap::new();
        record.insert("org".to_string(), org.to_string());
        let href = self.insert("adminUser", stored, record, false);
        self.add_to_listing(org, "Users", "UserReference", &href);
        Ok(self.created_response(&href, "Created User"))
    }

    fn create_vdc(&mut self, org: &str, params: &Element, what: &str) -> Result<Element, ClientError> {
        self.require(org, "organization")?;
        let name = params.attr("name").unwrap_or_default();
        if self.name_taken("adminOrgVdc", name, Some(("org", org))) {
            return Err(duplicate(what, name));
        }
        if params.child("ProviderVdcReference").is_none() {
            return Err(validation(what, "BAD_REQUEST", "ProviderVdcReference is required"));
        }
        let profiles: Vec<Element> = params.children_named("VdcStorageProfile").cloned().collect();
        if profiles.is_empty() {
            return Err(validation(what, "BAD_REQUEST", "at least one VdcStorageProfile is required"));
        }
        self.check_refs(params, what)?;

        let mut vdc = Element::new("AdminVdc")
            .with_attr("xmlns", VCLOUD_NS)
            .with_attr("name", name);
        for c in &params.children {
            if c.local_name() != "VdcStorageProfile" {
                vdc.children.push(c.clone());
            }
        }
        vdc.children.push(Element::new("VdcStorageProfiles"));
        vdc.children.push(Element::new("AvailableNetworks"));

        let mut record = BTreeMap::new();
        record.insert("org".to_string(), org.to_string());
        let href = self.insert("adminOrgVdc", vdc, record, true);
        self.add_to_listing(org, "Vdcs", "Vdc", &href);
        for p in &profiles {
            self.add_vdc_profile(&href, p, what)?;
        }
        Ok(self.created_response(&href, "Created Virtual Datacenter"))
    }

    /// Attach a profile described by a `VdcStorageProfile`/`AddStorageProfile`
    /// params element.
    fn add_vdc_profile(&mut self, vdc: &str, params: &Element, what: &str) -> Result<(), ClientError> {
        let pvdc_profile = params
            .child("ProviderVdcStorageProfile")
            .and_then(|p| p.attr("href"))
            .ok_or_else(|| validation(what, "BAD_REQUEST", "ProviderVdcStorageProfile is required"))?
            .to_string();
        let name = self
            .objects
            .get(&pvdc_profile)
            .and_then(|p| p.element.attr("name"))
            .ok_or_else(|| ClientError::NotFound { what: pvdc_profile.clone() })?
            .to_string();
        if self.name_taken("adminOrgVdcStorageProfile", &name, Some(("vdc", vdc))) {
            return Err(validation(what, "DUPLICATE_STORAGE_PROFILE", format!("{} already attached", name)));
        }
        let default = params.child_flag("Default").unwrap_or(false);
        if default {
            self.clear_default(vdc);
        }
        let el = Element::new("AdminVdcStorageProfile")
            .with_attr("name", name)
            .with_child(Element::new("Enabled").with_text(params.child_text("Enabled").unwrap_or("true")))
            .with_child(Element::new("Units").with_text(params.child_text("Units").unwrap_or("MB")))
            .with_child(Element::new("Limit").with_text(params.child_text("Limit").unwrap_or("0")))
            .with_child(Element::new("Default").with_text(default.to_string()))
            .with_child(
                Element::new("ProviderVdcStorageProfile")
                    .with_attr("href", pvdc_profile)
                    .with_attr("type", "application/vnd.vmware.admin.pvdcStorageProfile+xml"),
            );
        let mut record = BTreeMap::new();
        record.insert("vdc".to_string(), vdc.to_string());
        let href = self.insert("adminOrgVdcStorageProfile", el, record, false);
        self.add_to_listing(vdc, "VdcStorageProfiles", "VdcStorageProfile", &href);
        Ok(())
    }

    fn clear_default(&mut self, vdc: &str) {
        for o in self.objects.values_mut() {
            if o.query_type == "adminOrgVdcStorageProfile"
                && o.record.get("vdc").map(String::as_str) == Some(vdc)
            {
                o.element.set_child_text("Default", "false");
            }
        }
    }

    fn update_vdc_profiles(&mut self, vdc: &str, body: &Element, what: &str) -> Result<Element, ClientError> {
        self.require(vdc, "vdc")?;
        for add in body.children_named("AddStorageProfile") {
            self.add_vdc_profile(vdc, add, what)?;
        }
        for remove in body.children_named("RemoveStorageProfile") {
            let href = remove.attr("href").unwrap_or_default().to_string();
            let profile = self
                .objects
                .get(&href)
                .filter(|o| o.record.get("vdc").map(String::as_str) == Some(vdc))
                .ok_or_else(|| ClientError::NotFound { what: format!("storage profile {}", href) })?;
            if profile.element.child_flag("Enabled").unwrap_or(false) {
                return Err(validation(what, "BAD_REQUEST", "storage profile must be disabled before removal"));
            }
            if profile.element.child_flag("Default").unwrap_or(false) {
                return Err(validation(what, "BAD_REQUEST", "the default storage profile cannot be removed"));
            }
            self.objects.remove(&href);
            self.order.retain(|h| *h != href);
            self.remove_from_listing(vdc, "VdcStorageProfiles", &href);
        }
        Ok(self.new_task("Updated Storage Profiles"))
    }

    fn create_edge(&mut self, vdc: &str, body: &Element, what: &str) -> Result<Element, ClientError> {
        self.require(vdc, "vdc")?;
        let name = body.attr("name").unwrap_or_default();
        if self.name_taken("edgeGateway", name, Some(("vdc", vdc))) {
            return Err(duplicate(what, name));
        }
        check_edge_body(body, what)?;
        self.check_refs(body, what)?;
        let record = self.vdc_record(vdc);
        let href = self.insert("edgeGateway", body.clone(), record, true);
        Ok(self.created_response(&href, "Created Edge Gateway"))
    }

    fn create_network(&mut self, vdc: &str, body: &Element, what: &str) -> Result<Element, ClientError> {
        self.require(vdc, "vdc")?;
        let record = self.vdc_record(vdc);
        let org = record.get("org").cloned();
        let name = body.attr("name").unwrap_or_default();
        let scope = org.as_deref().map(|o| ("org", o));
        if self.name_taken("orgVdcNetwork", name, scope) {
            return Err(duplicate(what, name));
        }
        let fence = body
            .find(&["Configuration", "FenceMode"])
            .and_then(|f| f.text())
            .unwrap_or("isolated");
        if fence == "natRouted" && body.child("EdgeGateway").is_none() {
            return Err(validation(what, "BAD_REQUEST", "routed networks need an EdgeGateway"));
        }
        if fence == "bridged" && body.find(&["Configuration", "ParentNetwork"]).is_none() {
            return Err(validation(what, "BAD_REQUEST", "bridged networks need a ParentNetwork"));
        }
        self.check_refs(body, what)?;
        let href = self.insert("orgVdcNetwork", body.clone(), record, true);
        self.add_to_listing(vdc, "AvailableNetworks", "Network", &href);
        if let Some(org) = org {
            self.add_to_listing(&org, "Networks", "Network", &href);
        }
        Ok(self.created_response(&href, "Created Network"))
    }

    fn create_external_network(&mut self, body: &Element, what: &str) -> Result<Element, ClientError> {
        let name = body.attr("name").unwrap_or_default();
        if self.name_taken("externalNetwork", name, None) {
            return Err(duplicate(what, name));
        }
        if body.child("VimPortGroupRef").is_none() {
            return Err(validation(what, "BAD_REQUEST", "VimPortGroupRef is required"));
        }
        if !body.descendants_named("AllocatedIpAddresses").is_empty()
            || !body.descendants_named("SubAllocations").is_empty()
        {
            return Err(validation(what, "BAD_REQUEST", "IP allocations are read-only"));
        }
        self.check_refs(body, what)?;
        let href = self.insert("externalNetwork", body.clone(), BTreeMap::new(), false);
        Ok(self.created_response(&href, "Created External Network"))
    }

    fn configure_services(&mut self, edge: &str, body: &Element, what: &str) -> Result<Element, ClientError> {
        self.require(edge, "edge gateway")?;
        self.check_refs(body, what)?;
        if let Some(obj) = self.objects.get_mut(edge) {
            if obj.element.child("Configuration").is_none() {
                obj.element.children.push(Element::new("Configuration"));
            }
            if let Some(cfg) = obj.element.child_mut("Configuration") {
                cfg.remove_children("EdgeGatewayServiceConfiguration");
                let mut services = body.clone();
                services.remove_attr("xmlns");
                cfg.children.push(services);
            }
        }
        Ok(self.new_task("Configured Edge Gateway Services"))
    }

    fn edit(&mut self, href: &str, body: &Element, what: &str) -> Result<Element, ClientError> {
        let Some(obj) = self.objects.get(href) else {
            return Err(ClientError::NotFound { what: what.to_string() });
        };
        let query_type = obj.query_type.clone();
        let vdc = obj.record.get("vdc").cloned();
        self.check_refs_except_self(body, href, what)?;

        match query_type.as_str() {
            "edgeGateway" => check_edge_body(body, what)?,
            "adminOrgVdcStorageProfile" => {
                let was_default = obj.element.child_flag("Default").unwrap_or(false);
                let default = body.child_flag("Default").unwrap_or(was_default);
                let enabled = body.child_flag("Enabled").unwrap_or(true);
                if default && !enabled {
                    return Err(validation(what, "BAD_REQUEST", "the default storage profile cannot be disabled"));
                }
                if default && !was_default {
                    if let Some(vdc) = &vdc {
                        self.clear_default(vdc);
                    }
                }
            }
            _ => {}
        }

        let Some(obj) = self.objects.get_mut(href) else {
            return Err(ClientError::NotFound { what: what.to_string() });
        };
        let status = obj.element.attr("status").map(str::to_string);
        let mut replacement = body.clone();
        replacement.set_attr("href", href);
        if let Some(s) = status {
            replacement.set_attr("status", s);
        }
        obj.element = replacement;
        Ok(self.new_task("Updated"))
    }

    fn check_refs_except_self(&self, body: &Element, own_href: &str, what: &str) -> Result<(), ClientError> {
        let mut copy = body.clone();
        if copy.attr("href") == Some(own_href) {
            copy.remove_attr("href");
        }
        self.check_refs(&copy, what)
    }
}

/// Rules the platform applies to an edge gateway body.
fn check_edge_body(body: &Element, what: &str) -> Result<(), ClientError> {
    fn flag(e: &Element) -> bool {
        e.child_flag("UseForDefaultRoute").unwrap_or(false)
    }
    let interfaces = body.descendants_named("GatewayInterface");
    if interfaces.iter().filter(|i| flag(i)).count() > 1 {
        return Err(validation(what, "BAD_REQUEST", "only one interface can be used for the default route"));
    }
    for iface in &interfaces {
        let subnets = iface.children_named("SubnetParticipation").filter(|s| flag(s)).count();
        match (flag(iface), subnets) {
            (true, 1) | (false, 0) => {}
            (true, _) => {
                return Err(validation(
                    what,
                    "BAD_REQUEST",
                    "the default route interface needs exactly one default route subnet",
                ))
            }
            (false, _) => {
                return Err(validation(
                    what,
                    "BAD_REQUEST",
                    "a default route subnet must sit on the default route interface",
                ))
            }
        }
    }
    if let Some(services) = body.find(&["Configuration", "EdgeGatewayServiceConfiguration"]) {
        for s in &services.children {
            let disabled = s.child_flag("IsEnabled") == Some(false);
            let configured = s.children.iter().any(|c| c.local_name() != "IsEnabled");
            if disabled && configured && s.local_name() != "FirewallService" && s.local_name() != "NatService" {
                return Err(validation(
                    what,
                    "BAD_REQUEST",
                    format!("{} is disabled but still carries configuration", s.local_name()),
                ));
            }
        }
    }
    if let Some(d) = body.child_text("Description") {
        if d.chars().count() > vcdmig_domain::DESCRIPTION_MAX_CHARS {
            return Err(validation(what, "BAD_REQUEST", "description too long"));
        }
    }
    Ok(())
}

#[async_trait]
impl Platform for SimPlatform {
    fn label(&self) -> &str {
        &self.label
    }

    fn base_url(&self) -> &str {
        &self.base
    }

    async fn query(&self, query_type: &str, filter: &str) -> Result<Vec<Element>, ClientError> {
        let target = format!("{}?{}", query_type, filter);
        self.record_request("QUERY", &target, None, None).await?;
        let inner = self.inner.read().await;
        let records: Vec<Element> = inner
            .order
            .iter()
            .filter(|h| {
                inner
                    .objects
                    .get(*h)
                    .is_some_and(|o| o.query_type == query_type && inner.matches_filter(o, filter))
            })
            .map(|h| inner.record_for(h))
            .collect();
        debug!(label = %self.label, query_type, filter, count = records.len(), "SimPlatform: query");
        Ok(records)
    }

    async fn get(&self, href: &str) -> Result<Element, ClientError> {
        self.record_request("GET", href, None, None).await?;
        let mut inner = self.inner.write().await;
        let obj = inner
            .objects
            .get_mut(href)
            .ok_or_else(|| ClientError::NotFound { what: format!("GET {}", href) })?;
        if let Some(pending) = obj.pending.as_mut() {
            if *pending > 0 {
                *pending -= 1;
                obj.element.set_attr("status", "0");
            } else {
                obj.element.set_attr("status", "1");
            }
        }
        Ok(obj.element.clone())
    }

    async fn post(&self, href: &str, media_type: &str, body: &Element) -> Result<Element, ClientError> {
        self.record_request("POST", href, Some(media_type), Some(body)).await?;
        let what = format!("POST {}", href);
        let mut inner = self.inner.write().await;
        debug!(label = %self.label, href, body = body.local_name(), "SimPlatform: post");
        match body.local_name() {
            "AdminOrg" => inner.create_org(body, &what),
            "Role" => inner.create_role(href.trim_end_matches("/roles"), body, &what),
            "User" => inner.create_user(href.trim_end_matches("/users"), body, &what),
            "CreateVdcParams" => inner.create_vdc(href.trim_end_matches("/vdcsparams"), body, &what),
            "UpdateVdcStorageProfiles" => {
                inner.update_vdc_profiles(href.trim_end_matches("/vdcStorageProfiles"), body, &what)
            }
            "EdgeGateway" => inner.create_edge(href.trim_end_matches("/edgeGateways"), body, &what),
            "OrgVdcNetwork" => inner.create_network(href.trim_end_matches("/networks"), body, &what),
            "VMWExternalNetwork" => inner.create_external_network(body, &what),
            "EdgeGatewayServiceConfiguration" => inner.configure_services(
                href.trim_end_matches("/action/configureServices"),
                body,
                &what,
            ),
            other => Err(validation(&what, "UNSUPPORTED", format!("unsupported body <{}>", other))),
        }
    }

    async fn put(&self, href: &str, media_type: &str, body: &Element) -> Result<Element, ClientError> {
        self.record_request("PUT", href, Some(media_type), Some(body)).await?;
        let what = format!("PUT {}", href);
        self.inner.write().await.edit(href, body, &what)
    }

    async fn close(&self) -> Result<(), ClientError> {
        self.record_request("DELETE", "/api/session", None, None).await?;
        self.inner.write().await.closed = true;
        Ok(())
    }
}
