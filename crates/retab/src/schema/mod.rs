//! JSON schema validation of generated documents
//!
//! Validation itself sits behind [SchemaLoader] and [Schema] so callers can bring their own validator.
//! [FileSchemaLoader] reads JSON or YAML schema files relative to a base directory and validates with the
//! `jsonschema` crate.
//!
//! Errors point into the document with a JSON pointer ([ValidationError::instance_location]).
//! [location::instance_location_range] maps such a pointer back to the expression that produced the value.
use std::path::{Path, PathBuf};

pub mod location;

pub trait Schema {
    /// `None` when the instance is valid
    fn validate(&self, instance: &serde_json::Value) -> Option<ValidationError>;
}

pub trait SchemaLoader {
    fn load_schema(&self, reference: &str) -> Result<Box<dyn Schema>, SchemaError>;
}

/// A validation failure, possibly made of several more specific causes
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub instance_location: String,
    pub message: String,
    pub causes: Vec<ValidationError>,
}

impl ValidationError {
    /// The most specific errors
    pub fn leaves(&self) -> Vec<&ValidationError> {
        if self.causes.is_empty() {
            return vec![self];
        }
        self.causes.iter().flat_map(ValidationError::leaves).collect()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SchemaError {
    #[error("unable to read schema {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("schema is not valid JSON")]
    Json(#[from] serde_json::Error),
    #[error("schema is not valid YAML")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid schema: {0}")]
    Invalid(String),
    #[error("remote schemas are not supported: {0}")]
    Remote(String),
}

#[derive(Debug, Clone)]
pub struct FileSchemaLoader {
    base_dir: PathBuf,
}

impl FileSchemaLoader {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }
}

impl SchemaLoader for FileSchemaLoader {
    #[tracing::instrument(level = "debug", skip(self))]
    fn load_schema(&self, reference: &str) -> Result<Box<dyn Schema>, SchemaError> {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return Err(SchemaError::Remote(reference.to_string()));
        }

        let path = self.base_dir.join(reference);
        let contents = std::fs::read_to_string(&path).map_err(|source| SchemaError::Io {
            path: path.clone(),
            source,
        })?;

        let is_yaml = matches!(
            path.extension().and_then(|extension| extension.to_str()),
            Some("yaml" | "yml")
        );
        let schema: serde_json::Value = if is_yaml {
            serde_yaml::from_str(&contents)?
        } else {
            serde_json::from_str(&contents)?
        };

        JsonSchema::new(&schema).map(|schema| Box::new(schema) as Box<dyn Schema>)
    }
}

/// A compiled JSON schema
pub struct JsonSchema {
    validator: jsonschema::Validator,
}

impl JsonSchema {
    pub fn new(schema: &serde_json::Value) -> Result<Self, SchemaError> {
        let validator =
            jsonschema::validator_for(schema).map_err(|err| SchemaError::Invalid(err.to_string()))?;
        Ok(Self { validator })
    }
}

impl Schema for JsonSchema {
    fn validate(&self, instance: &serde_json::Value) -> Option<ValidationError> {
        let causes: Vec<ValidationError> = self
            .validator
            .iter_errors(instance)
            .map(|err| ValidationError {
                instance_location: err.instance_path().to_string(),
                message: err.to_string(),
                causes: vec![],
            })
            .collect();

        if causes.is_empty() {
            return None;
        }

        Some(ValidationError {
            instance_location: String::new(),
            message: "document does not match the schema".to_string(),
            causes,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn reports_every_violation() {
        let schema = JsonSchema::new(&json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "steps": {"type": "array", "items": {"type": "integer"}}
            }
        }))
        .unwrap();

        assert_eq!(schema.validate(&json!({"name": "x", "steps": [1]})), None);

        let error = schema
            .validate(&json!({"name": 1, "steps": [1, "two"]}))
            .unwrap();
        let mut locations: Vec<&str> = error
            .leaves()
            .into_iter()
            .map(|leaf| leaf.instance_location.as_str())
            .collect();
        locations.sort();
        assert_eq!(locations, vec!["/name", "/steps/1"]);
    }

    #[test]
    fn remote_schemas_are_rejected() {
        let loader = FileSchemaLoader::new(".");
        assert!(matches!(
            loader.load_schema("https://json.schemastore.org/github-workflow.json"),
            Err(SchemaError::Remote(_))
        ));
    }
}
