//! Schema types and builders for tfplug
//!
//! This module provides the schema system for declaring provider and resource
//! attributes, their flags, and the plan modifiers the host applies to them.

use crate::plan_modifier::PlanModifier;
use crate::types::{AttributePath, Diagnostic, Dynamic, DynamicValue};
use std::fmt;

/// AttributeType defines the type system for Terraform attributes
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeType {
    String,
    Number, // Always f64
    Bool,
    List(Box<AttributeType>), // Ordered, allows duplicates
    Map(Box<AttributeType>),  // String keys only
}

impl AttributeType {
    /// Whether `value` fits this type. Null and unknown fit anything.
    pub fn accepts(&self, value: &Dynamic) -> bool {
        match (value, self) {
            (Dynamic::Null, _) | (Dynamic::Unknown, _) => true,
            (Dynamic::String(_), AttributeType::String) => true,
            (Dynamic::Number(_), AttributeType::Number) => true,
            (Dynamic::Bool(_), AttributeType::Bool) => true,
            (Dynamic::List(items), AttributeType::List(elem)) => {
                items.iter().all(|item| elem.accepts(item))
            }
            (Dynamic::Map(entries), AttributeType::Map(elem)) => {
                entries.values().all(|item| elem.accepts(item))
            }
            _ => false,
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeType::String => f.write_str("string"),
            AttributeType::Number => f.write_str("number"),
            AttributeType::Bool => f.write_str("bool"),
            AttributeType::List(elem) => write!(f, "list({})", elem),
            AttributeType::Map(elem) => write!(f, "map({})", elem),
        }
    }
}

/// Schema is returned by providers and resources
/// Version is used for state migration
#[derive(Debug)]
pub struct Schema {
    pub version: i64,
    pub description: String,
    pub attributes: Vec<Attribute>,
}

impl Schema {
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|attr| attr.name == name)
    }

    /// Attributes only the provider sets (computed and not configurable)
    pub fn computed_only(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes
            .iter()
            .filter(|attr| attr.computed && !attr.optional && !attr.required)
    }

    /// Check a configuration object against the declared attributes:
    /// required attributes are present, values have the declared type and
    /// nothing outside the schema is set.
    pub fn validate_config(&self, config: &DynamicValue) -> Vec<Diagnostic> {
        let fields = match &config.value {
            Dynamic::Map(fields) => fields,
            Dynamic::Unknown => return vec![],
            other => {
                return vec![Diagnostic::error(
                    "Invalid configuration",
                    format!("Configuration must be an object, got {}", other.type_name()),
                )]
            }
        };

        let mut diagnostics = Vec::new();

        for attr in self.attributes.iter().filter(|attr| attr.required) {
            if fields.get(&attr.name).map_or(true, Dynamic::is_null) {
                diagnostics.push(
                    Diagnostic::error(
                        format!("Missing required field: {}", attr.name),
                        format!("The field '{}' is required but was not provided", attr.name),
                    )
                    .with_attribute(AttributePath::new(&attr.name)),
                );
            }
        }

        for (name, value) in fields {
            match self.attribute(name) {
                Some(attr) if !attr.r#type.accepts(value) => diagnostics.push(
                    Diagnostic::error(
                        format!("Type mismatch for field: {}", name),
                        format!(
                            "Field '{}' expects type {} but got {}",
                            name,
                            attr.r#type,
                            value.type_name()
                        ),
                    )
                    .with_attribute(AttributePath::new(name)),
                ),
                Some(_) => {}
                None => diagnostics.push(
                    Diagnostic::error(
                        format!("Unknown field: {}", name),
                        format!("The field '{}' is not defined in the schema", name),
                    )
                    .with_attribute(AttributePath::new(name)),
                ),
            }
        }

        diagnostics
    }
}

/// Attribute represents a single configuration attribute
pub struct Attribute {
    pub name: String,
    pub r#type: AttributeType,
    pub description: String,
    pub required: bool,
    pub optional: bool,
    pub computed: bool,
    pub plan_modifiers: Vec<Box<dyn PlanModifier>>,
}

// Manual Debug implementation since plan modifiers don't implement Debug
impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attribute")
            .field("name", &self.name)
            .field("type", &self.r#type)
            .field("required", &self.required)
            .field("optional", &self.optional)
            .field("computed", &self.computed)
            .field(
                "plan_modifiers",
                &format!("{} plan modifiers", self.plan_modifiers.len()),
            )
            .finish()
    }
}

/// AttributeBuilder provides fluent API for building attributes
pub struct AttributeBuilder {
    attribute: Attribute,
}

impl AttributeBuilder {
    pub fn new(name: &str, type_: AttributeType) -> Self {
        Self {
            attribute: Attribute {
                name: name.to_string(),
                r#type: type_,
                description: String::new(),
                required: false,
                optional: false,
                computed: false,
                plan_modifiers: Vec::new(),
            },
        }
    }

    pub fn description(mut self, desc: &str) -> Self {
        self.attribute.description = desc.to_string();
        self
    }

    pub fn required(mut self) -> Self {
        self.attribute.required = true;
        self.attribute.optional = false;
        self
    }

    pub fn optional(mut self) -> Self {
        self.attribute.optional = true;
        self.attribute.required = false;
        self
    }

    pub fn computed(mut self) -> Self {
        self.attribute.computed = true;
        self
    }

    pub fn plan_modifier(mut self, modifier: Box<dyn PlanModifier>) -> Self {
        self.attribute.plan_modifiers.push(modifier);
        self
    }

    pub fn build(self) -> Attribute {
        self.attribute
    }
}

/// SchemaBuilder provides fluent API for building schemas
pub struct SchemaBuilder {
    schema: Schema,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self {
            schema: Schema {
                version: 0,
                description: String::new(),
                attributes: Vec::new(),
            },
        }
    }

    pub fn version(mut self, version: i64) -> Self {
        self.schema.version = version;
        self
    }

    pub fn attribute(mut self, attr: Attribute) -> Self {
        self.schema.attributes.push(attr);
        self
    }

    pub fn description(mut self, desc: &str) -> Self {
        self.schema.description = desc.to_string();
        self
    }

    pub fn build(self) -> Schema {
        self.schema
    }
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan_modifier::RequiresReplaceIfChanged;

    #[test]
    fn attribute_builder_creates_required_string() {
        let attr = AttributeBuilder::new("source_dir", AttributeType::String)
            .description("Path to directory containing KCL scripts")
            .required()
            .plan_modifier(Box::new(RequiresReplaceIfChanged))
            .build();

        assert_eq!(attr.name, "source_dir");
        assert!(matches!(attr.r#type, AttributeType::String));
        assert!(attr.required);
        assert!(!attr.optional);
        assert_eq!(attr.plan_modifiers.len(), 1);
    }

    #[test]
    fn schema_lookup_and_computed_only() {
        let schema = SchemaBuilder::new()
            .version(1)
            .description("Test resource schema")
            .attribute(
                AttributeBuilder::new("id", AttributeType::String)
                    .computed()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("args", AttributeType::List(Box::new(AttributeType::String)))
                    .optional()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("label", AttributeType::String)
                    .optional()
                    .computed()
                    .build(),
            )
            .build();

        assert_eq!(schema.version, 1);
        assert!(schema.attribute("args").unwrap().optional);
        assert!(schema.attribute("missing").is_none());

        let computed: Vec<_> = schema.computed_only().map(|a| a.name.as_str()).collect();
        assert_eq!(computed, vec!["id"]);
    }

    fn exec_like_schema() -> Schema {
        SchemaBuilder::new()
            .attribute(
                AttributeBuilder::new("source_dir", AttributeType::String)
                    .required()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("args", AttributeType::List(Box::new(AttributeType::String)))
                    .optional()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new(
                    "environment",
                    AttributeType::Map(Box::new(AttributeType::String)),
                )
                .optional()
                .build(),
            )
            .attribute(
                AttributeBuilder::new("timeout", AttributeType::Number)
                    .optional()
                    .build(),
            )
            .build()
    }

    fn summaries(diags: &[Diagnostic]) -> Vec<&str> {
        diags.iter().map(|d| d.summary.as_str()).collect()
    }

    #[test]
    fn valid_config_passes() {
        let config = DynamicValue::decode_json(
            br#"{"source_dir": "./app", "args": ["-o", "out.json"], "environment": {"A": "1"}, "timeout": 30}"#,
        )
        .unwrap();

        assert!(exec_like_schema().validate_config(&config).is_empty());
    }

    #[test]
    fn fields_outside_the_schema_are_rejected_even_when_null() {
        let config =
            DynamicValue::decode_json(br#"{"source_dir": "./app", "arguments": null}"#).unwrap();

        let diags = exec_like_schema().validate_config(&config);

        assert_eq!(summaries(&diags), vec!["Unknown field: arguments"]);
        assert_eq!(diags[0].attribute, Some(AttributePath::new("arguments")));
    }

    #[test]
    fn missing_or_null_required_field_is_reported() {
        let schema = exec_like_schema();

        let missing = schema.validate_config(&DynamicValue::object());
        let null = schema
            .validate_config(&DynamicValue::decode_json(br#"{"source_dir": null}"#).unwrap());

        assert_eq!(summaries(&missing), vec!["Missing required field: source_dir"]);
        assert_eq!(summaries(&null), vec!["Missing required field: source_dir"]);
        assert_eq!(missing[0].attribute, Some(AttributePath::new("source_dir")));
    }

    #[test]
    fn type_mismatches_are_reported_per_field() {
        let config = DynamicValue::decode_json(
            br#"{"source_dir": 7, "args": "not-a-list", "environment": {"A": 1}, "timeout": "30"}"#,
        )
        .unwrap();

        let diags = exec_like_schema().validate_config(&config);

        assert_eq!(
            summaries(&diags),
            vec![
                "Type mismatch for field: args",
                "Type mismatch for field: environment",
                "Type mismatch for field: source_dir",
                "Type mismatch for field: timeout",
            ]
        );
        assert!(diags[0].detail.contains("list(string)"), "{}", diags[0].detail);
    }

    #[test]
    fn unknown_values_fit_any_type() {
        let mut config = DynamicValue::object();
        config.mark_unknown(&AttributePath::new("source_dir")).unwrap();
        config.mark_unknown(&AttributePath::new("args")).unwrap();

        assert!(exec_like_schema().validate_config(&config).is_empty());
    }

    #[test]
    fn non_object_config_is_rejected() {
        let config = DynamicValue::new(Dynamic::String("./app".to_string()));

        let diags = exec_like_schema().validate_config(&config);

        assert_eq!(summaries(&diags), vec!["Invalid configuration"]);
    }
}
