//! Component profiles: partial structural descriptors of data-producing or
//! data-consuming units.  Every field is optional; an unset field is a
//! wildcard when the profile expresses interest.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Direction of a component, seen from the device exposing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IoType {
    Input,
    Output,
}

/// Describes an available component, or a filter over components.
///
/// Equality and hashing are structural, and tags are held in an ordered
/// set, so two separately built profiles with the same contents are the
/// same value (and the same registry key).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub io_type: Option<IoType>,
    /// Topic the component publishes on or listens to.  Descriptive only:
    /// never compared by the filter engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<Vec<ComponentProfile>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_modules: Option<Vec<ComponentProfile>>,
}

impl ComponentProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn message_format(mut self, format: impl Into<String>) -> Self {
        self.message_format = Some(format.into());
        self
    }

    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    pub fn device_id(mut self, id: impl Into<String>) -> Self {
        self.device_id = Some(id.into());
        self
    }

    pub fn io_type(mut self, io: IoType) -> Self {
        self.io_type = Some(io);
        self
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the tag set (duplicates collapse).
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn components(mut self, components: Vec<ComponentProfile>) -> Self {
        self.components = Some(components);
        self
    }

    pub fn processing_modules(mut self, modules: Vec<ComponentProfile>) -> Self {
        self.processing_modules = Some(modules);
        self
    }

    /// True when no field is set, i.e. the profile is a pure wildcard.
    pub fn is_wildcard(&self) -> bool {
        *self == Self::default()
    }
}

/// Wrapper used by the component list service and announcements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentList {
    #[serde(default)]
    pub elements: Vec<ComponentProfile>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_fields_are_omitted_on_the_wire() {
        let p = ComponentProfile::new()
            .io_type(IoType::Input)
            .message_format("ubii.dataStructure.Vector3");
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "ioType": "input",
                "messageFormat": "ubii.dataStructure.Vector3",
            })
        );
    }

    #[test]
    fn tag_order_does_not_affect_equality() {
        let a = ComponentProfile::new().tags(["imu", "motion"]);
        let b = ComponentProfile::new().tags(["motion", "imu", "imu"]);
        assert_eq!(a, b);
    }

    #[test]
    fn parses_nested_profiles() {
        let json = r#"{
            "id": "dev-1",
            "components": [{"ioType": "output", "tags": ["camera"]}]
        }"#;
        let p: ComponentProfile = serde_json::from_str(json).unwrap();
        let nested = p.components.as_ref().unwrap();
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].io_type, Some(IoType::Output));
        assert!(nested[0].tags.as_ref().unwrap().contains("camera"));
    }

    #[test]
    fn wildcard_detection() {
        assert!(ComponentProfile::new().is_wildcard());
        assert!(!ComponentProfile::new().name("x").is_wildcard());
        assert!(!ComponentProfile::new().tags(Vec::<String>::new()).is_wildcard());
    }
}
