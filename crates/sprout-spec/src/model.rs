use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ParseError;
use crate::view_ref::{MULTI_SEPARATOR, READ_ONLY_SUFFIX, SpaceViewRequest, is_concrete_token};

/// Parameter name assumed for a bare viewspec fragment without `key=`.
pub const DEFAULT_PARAMETER: &str = "data";

/// Immutable caller intent, parsed from a viewspec string.
///
/// An empty `service_name` means the service is not known yet and has to be
/// supplied from context before resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpawnRequest {
    pub service_name: String,
    pub parameters: BTreeMap<String, ParameterRequest>,
    pub url_prefix: String,
    pub user: String,
    pub ephemeral: bool,
    pub force_read_only: bool,
}

/// Raw parameter token, interpreted on demand once its declared type is known.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterRequest(String);

impl ParameterRequest {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_concrete(&self, kind: &ParameterType) -> bool {
        match kind {
            ParameterType::Space => is_concrete_token(&self.0),
            ParameterType::Spaces => self.members().all(is_concrete_token),
            _ => true,
        }
    }

    pub fn resource(&self) -> Result<Resource, ParseError> {
        Resource::parse(&self.0)
    }

    pub fn space(&self, force_read_only: bool) -> SpaceViewRequest {
        SpaceViewRequest::parse(&self.0, force_read_only)
    }

    pub fn spaces(&self, force_read_only: bool) -> Vec<SpaceViewRequest> {
        self.members()
            .map(|member| SpaceViewRequest::parse(member, force_read_only))
            .collect()
    }

    fn members(&self) -> impl Iterator<Item = &str> {
        self.0.split(MULTI_SEPARATOR).filter(|m| !m.is_empty())
    }
}

impl fmt::Display for ParameterRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParameterRequest {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Quantity plus unit, e.g. `500mb` or `2a100`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resource {
    pub quantity: u64,
    pub unit: String,
}

impl Resource {
    /// Leading ASCII digits are the quantity (1 when absent); the rest is the unit verbatim.
    pub fn parse(token: &str) -> Result<Self, ParseError> {
        let digits_end = token
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(token.len());
        let (digits, unit) = token.split_at(digits_end);
        let quantity = if digits.is_empty() {
            1
        } else {
            digits
                .parse::<u64>()
                .map_err(|_| ParseError::QuantityOverflow {
                    token: token.to_string(),
                })?
        };
        Ok(Self {
            quantity,
            unit: unit.to_string(),
        })
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.quantity, self.unit)
    }
}

/// Resolved, content-addressed view of a space. Owned by the space store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpaceView {
    pub tip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    pub read_only: bool,
    pub tree_path: PathBuf,
    pub owner_file_path: PathBuf,
    pub alias_file_path: PathBuf,
    /// Set when resolving this view created a new space.
    #[serde(default)]
    pub created: bool,
}

impl SpaceView {
    pub fn space_id(&self) -> &str {
        crate::view_ref::space_id_of(&self.tip)
    }

    pub fn format(&self) -> String {
        if self.read_only {
            format!("{}{}", self.tip, READ_ONLY_SUFFIX)
        } else {
            self.tip.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterValue {
    String(String),
    Resource(Resource),
    Space(SpaceView),
    Spaces(Vec<SpaceView>),
}

impl ParameterValue {
    pub fn views(&self) -> &[SpaceView] {
        match self {
            ParameterValue::Space(view) => std::slice::from_ref(view),
            ParameterValue::Spaces(views) => views,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedParameter {
    pub value: ParameterValue,
    /// Implicit parameters (schema defaults) are left out of the canonical viewspec.
    #[serde(default)]
    pub implicit: bool,
}

impl ResolvedParameter {
    pub fn explicit(value: ParameterValue) -> Self {
        Self {
            value,
            implicit: false,
        }
    }

    pub fn implicit(value: ParameterValue) -> Self {
        Self {
            value,
            implicit: true,
        }
    }

    pub fn format(&self) -> String {
        match &self.value {
            ParameterValue::String(s) => s.clone(),
            ParameterValue::Resource(r) => r.to_string(),
            ParameterValue::Space(view) => view.format(),
            ParameterValue::Spaces(views) => {
                // Leading empty member marks the value as multi-valued.
                let mut multi = vec![String::new()];
                multi.extend(views.iter().map(SpaceView::format));
                multi.sort();
                multi.join(&MULTI_SEPARATOR.to_string())
            }
        }
    }

    pub fn views(&self) -> &[SpaceView] {
        self.value.views()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParameterType {
    String,
    Resource,
    Space,
    Spaces,
    /// Declared by a definition but not understood here; rejected at resolution.
    Unknown(String),
}

impl ParameterType {
    pub fn as_str(&self) -> &str {
        match self {
            ParameterType::String => "string",
            ParameterType::Resource => "resource",
            ParameterType::Space => "space",
            ParameterType::Spaces => "spaces",
            ParameterType::Unknown(other) => other,
        }
    }
}

impl From<String> for ParameterType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "string" => ParameterType::String,
            "resource" => ParameterType::Resource,
            "space" => ParameterType::Space,
            "spaces" => ParameterType::Spaces,
            _ => ParameterType::Unknown(value),
        }
    }
}

impl From<ParameterType> for String {
    fn from(value: ParameterType) -> Self {
        value.as_str().to_string()
    }
}

impl Serialize for ParameterType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ParameterType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(ParameterType::from)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParameterSchema {
    #[serde(rename = "type")]
    pub kind: ParameterType,
    /// Default token used when the request omits the parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub optional: bool,
}

impl ParameterSchema {
    pub fn of(kind: ParameterType) -> Self {
        Self {
            kind,
            value: None,
            description: None,
            optional: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceDirDef {
    pub id: String,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateMount {
    pub source: String,
    pub destination: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

impl TemplateMount {
    pub fn is_read_only(&self) -> bool {
        self.mode.as_deref() != Some("rw")
    }
}

/// Spawn half of a service definition, already evaluated by the definition store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpawnTemplate {
    pub image: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, rename = "resourcedirs", skip_serializing_if = "BTreeMap::is_empty")]
    pub resource_dirs: BTreeMap<String, ResourceDirDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<TemplateMount>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url_prefix: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub schema: BTreeMap<String, ParameterSchema>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub name: String,
    pub spawn: SpawnTemplate,
    /// Opaque to the spawn path.
    #[serde(default)]
    pub activities: BTreeMap<String, serde_json::Value>,
}

/// Fully typed counterpart of a [`SpawnRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnResolution {
    pub user: String,
    pub ephemeral: bool,
    pub service_name: String,
    pub parameters: BTreeMap<String, ResolvedParameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_period_seconds: Option<u32>,
    pub spawn: SpawnTemplate,
}

impl SpawnResolution {
    /// Every resolved view as `(parameter, is_multi, view)`.
    pub fn space_views(&self) -> Vec<(&str, bool, &SpaceView)> {
        let mut out = Vec::new();
        for (name, parameter) in &self.parameters {
            let multi = matches!(parameter.value, ParameterValue::Spaces(_));
            for view in parameter.views() {
                out.push((name.as_str(), multi, view));
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnResponse {
    /// Runtime-assigned instance id.
    pub name: String,
    pub backend_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
    pub resolution: SpawnResolution,
}

impl SpawnResponse {
    pub fn url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&self.backend_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(tip: &str, read_only: bool) -> SpaceView {
        SpaceView {
            tip: tip.into(),
            base: None,
            read_only,
            tree_path: PathBuf::from("/tree"),
            owner_file_path: PathBuf::from("/owner"),
            alias_file_path: PathBuf::from("/alias"),
            created: false,
        }
    }

    #[test]
    fn resource_tokens() {
        assert_eq!(
            Resource::parse("500mb").unwrap(),
            Resource {
                quantity: 500,
                unit: "mb".into()
            }
        );
        assert_eq!(
            Resource::parse("gpu").unwrap(),
            Resource {
                quantity: 1,
                unit: "gpu".into()
            }
        );
        assert_eq!(
            Resource::parse("").unwrap(),
            Resource {
                quantity: 1,
                unit: String::new()
            }
        );
        assert_eq!(Resource::parse("2a100").unwrap().to_string(), "2a100");
    }

    #[test]
    fn resource_overflow_is_an_error() {
        let err = Resource::parse("99999999999999999999999gb").unwrap_err();
        assert!(matches!(err, ParseError::QuantityOverflow { .. }));
    }

    #[test]
    fn concreteness_depends_on_type() {
        let fork = ParameterRequest::new("fork:sp-1");
        assert!(!fork.is_concrete(&ParameterType::Space));
        assert!(fork.is_concrete(&ParameterType::String));
        assert!(fork.is_concrete(&ParameterType::Resource));
        assert!(!ParameterRequest::new("").is_concrete(&ParameterType::Space));

        let multi = ParameterRequest::new("sp-1,fork:sp-2");
        assert!(!multi.is_concrete(&ParameterType::Spaces));
        assert!(ParameterRequest::new(",sp-1,sp-2").is_concrete(&ParameterType::Spaces));
    }

    #[test]
    fn multi_format_is_sorted_with_marker() {
        let param = ResolvedParameter::explicit(ParameterValue::Spaces(vec![
            view("sp-b", false),
            view("sp-a", true),
        ]));
        assert_eq!(param.format(), ",sp-a:ro,sp-b");
        assert_eq!(param.views().len(), 2);

        let spaces = ParameterRequest::new(param.format()).spaces(false);
        assert_eq!(spaces.len(), 2);
        assert!(spaces[0].read_only);
    }

    #[test]
    fn parameter_type_serde_keeps_unknown_names() {
        let schema: ParameterSchema = serde_json::from_str(r#"{"type":"blob"}"#).unwrap();
        assert_eq!(schema.kind, ParameterType::Unknown("blob".into()));
        let schema: ParameterSchema =
            serde_json::from_str(r#"{"type":"spaces","optional":true}"#).unwrap();
        assert_eq!(schema.kind, ParameterType::Spaces);
        assert!(schema.optional);
        assert_eq!(
            serde_json::to_string(&ParameterType::Space).unwrap(),
            "\"space\""
        );
    }

    #[test]
    fn template_mounts_default_read_only() {
        let mount = TemplateMount {
            source: "/a".into(),
            destination: "/b".into(),
            mode: None,
        };
        assert!(mount.is_read_only());
        let rw = TemplateMount {
            mode: Some("rw".into()),
            ..mount
        };
        assert!(!rw.is_read_only());
    }
}
