use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::xml::Element;

// ── Object types ──────────────────────────────────────────────────────────────

/// Every kind of platform object the migrator knows how to read and build.
///
/// Declaration order is dependency order: an object only ever references
/// objects of an earlier variant (edge gateways reference external networks,
/// routed networks reference edge gateways, and so on).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Organization,
    Role,
    User,
    OrgVdc,
    ExternalNetwork,
    EdgeGateway,
    OrgVdcNetwork,
}

impl ObjectType {
    pub const ALL: [ObjectType; 7] = [
        ObjectType::Organization,
        ObjectType::Role,
        ObjectType::User,
        ObjectType::OrgVdc,
        ObjectType::ExternalNetwork,
        ObjectType::EdgeGateway,
        ObjectType::OrgVdcNetwork,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Organization => "organization",
            ObjectType::Role => "role",
            ObjectType::User => "user",
            ObjectType::OrgVdc => "org_vdc",
            ObjectType::ExternalNetwork => "external_network",
            ObjectType::EdgeGateway => "edge_gateway",
            ObjectType::OrgVdcNetwork => "org_vdc_network",
        }
    }

    /// Value of the `type=` parameter of the query service.
    pub fn query_type(&self) -> &'static str {
        match self {
            ObjectType::Organization => "organization",
            ObjectType::Role => "role",
            ObjectType::User => "adminUser",
            ObjectType::OrgVdc => "adminOrgVdc",
            ObjectType::ExternalNetwork => "externalNetwork",
            ObjectType::EdgeGateway => "edgeGateway",
            ObjectType::OrgVdcNetwork => "orgVdcNetwork",
        }
    }

    /// Media type used when submitting (or referencing) this object.
    pub fn media_type(&self) -> &'static str {
        match self {
            ObjectType::Organization => "application/vnd.vmware.admin.organization+xml",
            ObjectType::Role => "application/vnd.vmware.admin.role+xml",
            ObjectType::User => "application/vnd.vmware.admin.user+xml",
            ObjectType::OrgVdc => "application/vnd.vmware.admin.vdc+xml",
            ObjectType::ExternalNetwork => "application/vnd.vmware.admin.vmwexternalnet+xml",
            ObjectType::EdgeGateway => "application/vnd.vmware.admin.edgeGateway+xml",
            ObjectType::OrgVdcNetwork => "application/vnd.vmware.vcloud.orgVdcNetwork+xml",
        }
    }

    /// Root element names this object is serialised under, admin view first.
    pub fn root_tags(&self) -> &'static [&'static str] {
        match self {
            ObjectType::Organization => &["AdminOrg", "Org"],
            ObjectType::Role => &["Role"],
            ObjectType::User => &["User"],
            ObjectType::OrgVdc => &["AdminVdc", "Vdc"],
            ObjectType::ExternalNetwork => &["VMWExternalNetwork"],
            ObjectType::EdgeGateway => &["EdgeGateway"],
            ObjectType::OrgVdcNetwork => &["OrgVdcNetwork", "OrgNetwork"],
        }
    }

    /// Infer the object type from a root element's local name.
    pub fn from_root_tag(tag: &str) -> Option<ObjectType> {
        Self::ALL
            .into_iter()
            .find(|t| t.root_tags().contains(&tag))
    }

    /// Infer the object type from a reference's `type` attribute.
    pub fn from_media_type(media_type: &str) -> Option<ObjectType> {
        let base = media_type.split(';').next().unwrap_or(media_type).trim();
        match base {
            "application/vnd.vmware.admin.organization+xml"
            | "application/vnd.vmware.vcloud.org+xml" => Some(ObjectType::Organization),
            "application/vnd.vmware.admin.role+xml" => Some(ObjectType::Role),
            "application/vnd.vmware.admin.user+xml" => Some(ObjectType::User),
            "application/vnd.vmware.admin.vdc+xml" | "application/vnd.vmware.vcloud.vdc+xml" => {
                Some(ObjectType::OrgVdc)
            }
            "application/vnd.vmware.admin.vmwexternalnet+xml" => Some(ObjectType::ExternalNetwork),
            "application/vnd.vmware.admin.edgeGateway+xml" => Some(ObjectType::EdgeGateway),
            "application/vnd.vmware.vcloud.orgVdcNetwork+xml"
            | "application/vnd.vmware.admin.orgVdcNetwork+xml"
            | "application/vnd.vmware.vcloud.orgNetwork+xml" => Some(ObjectType::OrgVdcNetwork),
            _ => None,
        }
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ObjectType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalised = s.trim().to_ascii_lowercase().replace('-', "_");
        let t = match normalised.as_str() {
            "organization" | "org" => ObjectType::Organization,
            "role" => ObjectType::Role,
            "user" => ObjectType::User,
            "org_vdc" | "orgvdc" | "vdc" => ObjectType::OrgVdc,
            "external_network" | "externalnetwork" | "extnet" => ObjectType::ExternalNetwork,
            "edge_gateway" | "edgegateway" | "edge" => ObjectType::EdgeGateway,
            "org_vdc_network" | "orgvdcnetwork" | "network" => ObjectType::OrgVdcNetwork,
            _ => return Err(DomainError::UnknownObjectType(s.to_string())),
        };
        Ok(t)
    }
}

// ── References ────────────────────────────────────────────────────────────────

/// A link from one object to another: `<Foo href=".." name=".." type=".."/>`.
///
/// The href is only meaningful on the instance it was read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub name:     String,
    pub ref_type: Option<String>,
    pub href:     String,
}

impl Reference {
    /// Read a reference from an element carrying `href` and `name`.
    /// `Link` elements are navigation, not references, and yield `None`.
    pub fn from_element(el: &Element) -> Option<Reference> {
        if el.local_name() == "Link" {
            return None;
        }
        Some(Reference {
            name:     el.attr("name")?.to_string(),
            ref_type: el.attr("type").map(str::to_string),
            href:     el.attr("href")?.to_string(),
        })
    }

    /// Overwrite the reference attributes of `el` with this reference.
    pub fn write_into(&self, el: &mut Element) {
        el.set_attr("href", self.href.clone());
        el.set_attr("name", self.name.clone());
        match &self.ref_type {
            Some(t) => el.set_attr("type", t.clone()),
            None => {
                el.remove_attr("type");
            }
        }
    }

    pub fn to_element(&self, name: impl Into<String>) -> Element {
        let mut el = Element::new(name);
        self.write_into(&mut el);
        el
    }

    pub fn object_type(&self) -> Option<ObjectType> {
        self.ref_type.as_deref().and_then(ObjectType::from_media_type)
    }
}

// ── Descriptors ───────────────────────────────────────────────────────────────

/// The full structured description of one platform object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDescriptor {
    object_type: ObjectType,
    root:        Element,
}

impl ObjectDescriptor {
    pub fn new(object_type: ObjectType, root: Element) -> Self {
        Self { object_type, root }
    }

    /// Parse a document, inferring the object type from its root element.
    pub fn from_xml(xml: &str) -> Result<Self, DomainError> {
        let root = Element::parse(xml)?;
        let object_type = ObjectType::from_root_tag(root.local_name())
            .ok_or_else(|| DomainError::UnknownRootTag(root.name.clone()))?;
        Ok(Self { object_type, root })
    }

    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    pub fn name(&self) -> &str {
        self.root.attr("name").unwrap_or_default()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.root.set_attr("name", name);
    }

    pub fn href(&self) -> Option<&str> {
        self.root.attr("href")
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Element {
        &mut self.root
    }

    pub fn into_root(self) -> Element {
        self.root
    }

    /// Every embedded reference below the root, in document order.
    pub fn references(&self) -> Vec<Reference> {
        let mut out = Vec::new();
        for c in &self.root.children {
            c.walk(&mut |e| {
                if let Some(r) = Reference::from_element(e) {
                    out.push(r);
                }
            });
        }
        out
    }

    /// A required direct-child reference, e.g. `ProviderVdcReference`.
    pub fn reference(&self, local_name: &str) -> Result<Reference, DomainError> {
        self.root
            .child(local_name)
            .and_then(Reference::from_element)
            .ok_or_else(|| DomainError::MissingField {
                object: format!("{} '{}'", self.object_type, self.name()),
                field:  local_name.to_string(),
            })
    }

    pub fn to_xml(&self) -> Result<String, DomainError> {
        self.root.to_xml()
    }
}
