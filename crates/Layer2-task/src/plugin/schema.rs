//! Configuration schemas advertised to the host

use serde::Serialize;
use styx_foundation::DEFAULT_CONTAINER_BIN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrType {
    String,
    Number,
    Bool,
    ListOfString,
    MapOfString,
}

/// One attribute of a config block
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttrSpec {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub ty: AttrType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl AttrSpec {
    fn required(name: &'static str, ty: AttrType) -> Self {
        Self {
            name,
            ty,
            required: true,
            default: None,
        }
    }

    fn optional(name: &'static str, ty: AttrType) -> Self {
        Self {
            name,
            ty,
            required: false,
            default: None,
        }
    }

    fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectSpec {
    pub attributes: Vec<AttrSpec>,
}

impl ObjectSpec {
    pub fn get(&self, name: &str) -> Option<&AttrSpec> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// Plugin-level configuration
pub fn config_spec() -> ObjectSpec {
    ObjectSpec {
        attributes: vec![AttrSpec::optional("container_bin_path", AttrType::String)
            .with_default(serde_json::Value::from(DEFAULT_CONTAINER_BIN))],
    }
}

/// Per-task driver block
pub fn task_config_spec() -> ObjectSpec {
    use AttrType::*;

    ObjectSpec {
        attributes: vec![
            AttrSpec::required("image", String),
            AttrSpec::optional("command", String),
            AttrSpec::optional("args", ListOfString),
            AttrSpec::optional("env", MapOfString),
            AttrSpec::optional("ports", ListOfString),
            AttrSpec::optional("volumes", ListOfString),
            AttrSpec::optional("memory", String),
            AttrSpec::optional("cpus", Number),
            AttrSpec::optional("working_dir", String),
            AttrSpec::optional("network", String),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_schema() {
        let spec = task_config_spec();
        assert_eq!(spec.attributes.len(), 10);
        assert!(spec.get("image").unwrap().required);
        assert!(!spec.get("network").unwrap().required);
        assert_eq!(spec.get("cpus").unwrap().ty, AttrType::Number);
    }

    #[test]
    fn test_config_schema_default() {
        let json = serde_json::to_value(config_spec()).unwrap();
        assert_eq!(json["attributes"][0]["name"], "container_bin_path");
        assert_eq!(json["attributes"][0]["default"], DEFAULT_CONTAINER_BIN);
        assert_eq!(json["attributes"][0]["type"], "string");
    }
}
