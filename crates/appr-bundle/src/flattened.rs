//! Flattened manifest parsing.
//!
//! A flattened bundle is one YAML file holding every resource of a release.
//! Two shapes are accepted, possibly mixed across `---` separated documents:
//!
//! ```text
//! data:
//!   customResourceDefinitions: |
//!     - apiVersion: apiextensions.k8s.io/v1beta1
//!       kind: CustomResourceDefinition
//!       ...
//!   clusterServiceVersions: |
//!     - ...
//!   packages: |
//!     - packageName: descheduler
//!       ...
//! ```
//!
//! or plain Kubernetes-style documents, each with `apiVersion` and `kind`.

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::error::{BundleError, BundleResult};

const DATA_KEY: &str = "data";

const SECTION_KEYS: [(&str, ResourceSection); 3] = [
    (
        "customResourceDefinitions",
        ResourceSection::CustomResourceDefinition,
    ),
    (
        "clusterServiceVersions",
        ResourceSection::ClusterServiceVersion,
    ),
    ("packages", ResourceSection::Package),
];

/// Which part of an operator bundle a resource belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceSection {
    CustomResourceDefinition,
    ClusterServiceVersion,
    Package,
    Other,
}

impl ResourceSection {
    fn from_kind(kind: Option<&str>) -> Self {
        match kind {
            Some("CustomResourceDefinition") => Self::CustomResourceDefinition,
            Some("ClusterServiceVersion") => Self::ClusterServiceVersion,
            Some("PackageManifest") => Self::Package,
            _ => Self::Other,
        }
    }
}

/// One resource definition from a flattened manifest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resource {
    pub section: ResourceSection,
    pub api_version: Option<String>,
    pub kind: Option<String>,
    /// `metadata.name`, or `packageName` for package entries.
    pub name: Option<String>,
    /// The resource document as parsed.
    pub body: Value,
}

impl Resource {
    fn from_value(section: Option<ResourceSection>, body: Value) -> Self {
        let api_version = str_field(&body, "apiVersion");
        let kind = str_field(&body, "kind");

        let section = section.unwrap_or_else(|| {
            let from_kind = ResourceSection::from_kind(kind.as_deref());
            if from_kind == ResourceSection::Other && body.get("packageName").is_some() {
                ResourceSection::Package
            } else {
                from_kind
            }
        });

        let name = body
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .map(String::from)
            .or_else(|| str_field(&body, "packageName"));

        Self {
            section,
            api_version,
            kind,
            name,
            body,
        }
    }

    /// Body as JSON, for stores that ingest JSON documents.
    pub fn to_json(&self) -> BundleResult<serde_json::Value> {
        serde_json::to_value(&self.body).map_err(|e| {
            BundleError::parse(format!(
                "resource {} is not representable as JSON: {}",
                self.name.as_deref().unwrap_or("<unnamed>"),
                e
            ))
        })
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(String::from)
}

/// Structured form of a flattened bundle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlattenedManifest {
    /// Resources in document order.
    pub resources: Vec<Resource>,
}

impl FlattenedManifest {
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn section(&self, section: ResourceSection) -> impl Iterator<Item = &Resource> {
        self.resources.iter().filter(move |r| r.section == section)
    }

    pub fn custom_resource_definitions(&self) -> impl Iterator<Item = &Resource> {
        self.section(ResourceSection::CustomResourceDefinition)
    }

    pub fn cluster_service_versions(&self) -> impl Iterator<Item = &Resource> {
        self.section(ResourceSection::ClusterServiceVersion)
    }

    pub fn packages(&self) -> impl Iterator<Item = &Resource> {
        self.section(ResourceSection::Package)
    }

    /// Append another manifest's resources after this one's.
    pub fn merge(&mut self, other: FlattenedManifest) {
        self.resources.extend(other.resources);
    }
}

/// Parse a flattened manifest file.
///
/// Every document in the file is captured. Fails with `Parse` on invalid
/// UTF-8, invalid YAML, malformed `data` sections, or when no resource is found.
pub fn parse_flattened(content: &[u8]) -> BundleResult<FlattenedManifest> {
    let documents = parse_documents(content)?;

    let mut resources = Vec::new();
    for (i, document) in documents.into_iter().enumerate() {
        match data_sections(&document) {
            Some(data) => {
                for (key, section) in SECTION_KEYS {
                    let Some(value) = data.get(key) else {
                        continue;
                    };
                    for item in section_items(value)
                        .map_err(|e| prefix_parse_error(e, &format!("document #{} {}", i, key)))?
                    {
                        resources.push(Resource::from_value(Some(section), item));
                    }
                }
            }
            None => resources.push(Resource::from_value(None, document)),
        }
    }

    if resources.is_empty() {
        return Err(BundleError::parse("manifest contains no resources"));
    }

    Ok(FlattenedManifest { resources })
}

/// Whether the content looks like a manifest: at least one YAML document that
/// is either a `data` section wrapper or a resource with `apiVersion` and `kind`.
pub fn is_manifest_content(content: &[u8]) -> bool {
    match parse_documents(content) {
        Ok(documents) => documents.iter().any(|d| {
            data_sections(d).is_some() || (d.get("apiVersion").is_some() && d.get("kind").is_some())
        }),
        Err(_) => false,
    }
}

/// Non-null YAML documents of the content, in order.
fn parse_documents(content: &[u8]) -> BundleResult<Vec<Value>> {
    let text = std::str::from_utf8(content)
        .map_err(|e| BundleError::parse(format!("manifest is not valid UTF-8: {}", e)))?;

    let mut documents = Vec::new();
    for (i, document) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let value = Value::deserialize(document).map_err(|e| BundleError::Parse {
            message: format!("document #{}: {}", i, e),
            source: Some(e),
        })?;
        if !value.is_null() {
            documents.push(value);
        }
    }

    Ok(documents)
}

/// The `data` mapping, if the document is a section wrapper.
fn data_sections(document: &Value) -> Option<&Mapping> {
    let data = document.get(DATA_KEY)?.as_mapping()?;
    SECTION_KEYS
        .iter()
        .any(|(key, _)| data.contains_key(*key))
        .then_some(data)
}

/// Items of one section: a YAML list embedded as a string, or an inline list.
fn section_items(value: &Value) -> BundleResult<Vec<Value>> {
    let parsed;
    let list = match value {
        Value::String(embedded) => {
            parsed = serde_yaml::from_str::<Value>(embedded).map_err(|e| BundleError::Parse {
                message: e.to_string(),
                source: Some(e),
            })?;
            &parsed
        }
        other => other,
    };

    match list {
        Value::Null => Ok(Vec::new()),
        Value::Sequence(items) => Ok(items.iter().filter(|v| !v.is_null()).cloned().collect()),
        _ => Err(BundleError::parse("expected a list of resources")),
    }
}

fn prefix_parse_error(err: BundleError, context: &str) -> BundleError {
    match err {
        BundleError::Parse { message, source } => BundleError::Parse {
            message: format!("{}: {}", context, message),
            source,
        },
        other => other,
    }
}
