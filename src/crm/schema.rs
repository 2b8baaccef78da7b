//! CRM schema contract and preflight validation.
//!
//! The pipeline writes into a CRM database owned by humans; its property set
//! drifts. Preflight compares the live schema to the contract and fails
//! writes before they corrupt anything. Status and stage option strings must
//! match the CRM's literal enum values, historical spellings included, so
//! they come from configuration rather than code.

use std::collections::BTreeSet;
use std::fmt;

use serde_json::Value as JsonValue;

use crate::config::CrmConfig;

/// Notion property types we validate against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Title,
    Select,
    MultiSelect,
    RichText,
    Number,
    Url,
}

impl PropertyKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            PropertyKind::Title => "title",
            PropertyKind::Select => "select",
            PropertyKind::MultiSelect => "multi_select",
            PropertyKind::RichText => "rich_text",
            PropertyKind::Number => "number",
            PropertyKind::Url => "url",
        }
    }
}

pub const PROP_COMPANY_NAME: &str = "Company Name";
pub const PROP_STATUS: &str = "Status";
pub const PROP_INVESTMENT_STAGE: &str = "Investment Stage";
pub const PROP_DISCOVERY_ID: &str = "Discovery ID";
pub const PROP_CANONICAL_KEY: &str = "Canonical Key";
pub const PROP_CONFIDENCE_SCORE: &str = "Confidence Score";
pub const PROP_SIGNAL_TYPES: &str = "Signal Types";
pub const PROP_WHY_NOW: &str = "Why Now";
pub const PROP_WEBSITE: &str = "Website";

/// What the pipeline requires of the CRM database.
#[derive(Debug, Clone)]
pub struct SchemaContract {
    pub required: Vec<(&'static str, PropertyKind)>,
    pub optional: Vec<(&'static str, PropertyKind)>,
    /// Status options that must exist, verbatim.
    pub status_options: Vec<String>,
    /// Investment stage options that must exist, verbatim.
    pub stage_options: Vec<String>,
}

impl SchemaContract {
    pub fn from_config(crm: &CrmConfig) -> Self {
        let mut status_options = vec![
            crm.auto_push_status.clone(),
            crm.needs_review_status.clone(),
        ];
        status_options.extend(crm.workflow_statuses.iter().cloned());
        status_options.extend(crm.terminal_statuses.iter().cloned());
        status_options.dedup();

        Self {
            required: vec![
                (PROP_COMPANY_NAME, PropertyKind::Title),
                (PROP_STATUS, PropertyKind::Select),
                (PROP_INVESTMENT_STAGE, PropertyKind::Select),
                (PROP_DISCOVERY_ID, PropertyKind::RichText),
                (PROP_CANONICAL_KEY, PropertyKind::RichText),
                (PROP_CONFIDENCE_SCORE, PropertyKind::Number),
                (PROP_SIGNAL_TYPES, PropertyKind::MultiSelect),
                (PROP_WHY_NOW, PropertyKind::RichText),
            ],
            optional: vec![(PROP_WEBSITE, PropertyKind::Url)],
            status_options,
            stage_options: crm.stage_options.clone(),
        }
    }
}

/// Outcome of comparing the live schema to the contract.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub missing_properties: Vec<String>,
    pub missing_optional_properties: Vec<String>,
    /// property name -> expected type
    pub wrong_property_types: Vec<(String, &'static str)>,
    pub missing_status_options: Vec<String>,
    pub missing_stage_options: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.missing_properties.is_empty()
            && self.wrong_property_types.is_empty()
            && self.missing_status_options.is_empty()
            && self.missing_stage_options.is_empty()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            if self.missing_optional_properties.is_empty() {
                return write!(f, "schema validation passed");
            }
            return write!(
                f,
                "schema validation passed (optional properties missing: {})",
                self.missing_optional_properties.join(", ")
            );
        }

        writeln!(f, "schema validation failed:")?;
        for prop in &self.missing_properties {
            writeln!(f, "  missing required property: {prop}")?;
        }
        for (prop, expected) in &self.wrong_property_types {
            writeln!(f, "  wrong type for {prop}: expected {expected}")?;
        }
        for option in &self.missing_status_options {
            writeln!(f, "  Status is missing option: {option:?}")?;
        }
        for option in &self.missing_stage_options {
            writeln!(f, "  Investment Stage is missing option: {option:?}")?;
        }
        for prop in &self.missing_optional_properties {
            writeln!(f, "  (optional) missing property: {prop}")?;
        }
        Ok(())
    }
}

/// Compare the contract against the `properties` object of a live database.
/// Pure so it can be tested without a transport.
pub fn validate(contract: &SchemaContract, properties: &JsonValue) -> ValidationReport {
    let mut report = ValidationReport::default();

    let props = match properties.as_object() {
        Some(map) => map,
        None => {
            report.missing_properties = contract
                .required
                .iter()
                .map(|(name, _)| name.to_string())
                .collect();
            return report;
        }
    };

    for (name, expected) in &contract.required {
        match props.get(*name) {
            None => report.missing_properties.push(name.to_string()),
            Some(prop) => {
                let actual = prop.get("type").and_then(|t| t.as_str()).unwrap_or("");
                if actual != expected.as_str() {
                    report
                        .wrong_property_types
                        .push((name.to_string(), expected.as_str()));
                }
            }
        }
    }

    for (name, expected) in &contract.optional {
        match props.get(*name) {
            None => report.missing_optional_properties.push(name.to_string()),
            Some(prop) => {
                let actual = prop.get("type").and_then(|t| t.as_str()).unwrap_or("");
                if actual != expected.as_str() {
                    report
                        .wrong_property_types
                        .push((name.to_string(), expected.as_str()));
                }
            }
        }
    }

    let status_options = select_options(props.get(PROP_STATUS));
    if !status_options.is_empty() || props.contains_key(PROP_STATUS) {
        for option in &contract.status_options {
            if !status_options.contains(option.as_str()) {
                report.missing_status_options.push(option.clone());
            }
        }
    }

    let stage_options = select_options(props.get(PROP_INVESTMENT_STAGE));
    if !stage_options.is_empty() || props.contains_key(PROP_INVESTMENT_STAGE) {
        for option in &contract.stage_options {
            if !stage_options.contains(option.as_str()) {
                report.missing_stage_options.push(option.clone());
            }
        }
    }

    report
}

fn select_options(prop: Option<&JsonValue>) -> BTreeSet<&str> {
    prop.and_then(|p| p.get("select"))
        .and_then(|s| s.get("options"))
        .and_then(|o| o.as_array())
        .map(|options| {
            options
                .iter()
                .filter_map(|o| o.get("name").and_then(|n| n.as_str()))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use serde_json::json;

    fn full_properties(contract: &SchemaContract) -> JsonValue {
        let mut props = serde_json::Map::new();
        for (name, kind) in contract.required.iter().chain(contract.optional.iter()) {
            let body = match kind {
                PropertyKind::Select => {
                    let options: Vec<_> = if *name == PROP_STATUS {
                        contract.status_options.iter().map(|s| json!({"name": s})).collect()
                    } else {
                        contract.stage_options.iter().map(|s| json!({"name": s})).collect()
                    };
                    json!({"type": "select", "select": {"options": options}})
                }
                other => json!({"type": other.as_str()}),
            };
            props.insert(name.to_string(), body);
        }
        JsonValue::Object(props)
    }

    #[test]
    fn complete_schema_passes() {
        let contract = SchemaContract::from_config(&AppConfig::default().crm);
        let report = validate(&contract, &full_properties(&contract));
        assert!(report.is_valid(), "{report}");
    }

    #[test]
    fn missing_required_property_fails() {
        let contract = SchemaContract::from_config(&AppConfig::default().crm);
        let mut props = full_properties(&contract);
        props.as_object_mut().unwrap().remove(PROP_CANONICAL_KEY);

        let report = validate(&contract, &props);
        assert!(!report.is_valid());
        assert_eq!(report.missing_properties, vec![PROP_CANONICAL_KEY]);
        assert!(report.to_string().contains("Canonical Key"));
    }

    #[test]
    fn wrong_property_type_fails() {
        let contract = SchemaContract::from_config(&AppConfig::default().crm);
        let mut props = full_properties(&contract);
        props.as_object_mut().unwrap().insert(
            PROP_CONFIDENCE_SCORE.to_string(),
            json!({"type": "rich_text"}),
        );

        let report = validate(&contract, &props);
        assert!(!report.is_valid());
        assert_eq!(
            report.wrong_property_types,
            vec![(PROP_CONFIDENCE_SCORE.to_string(), "number")]
        );
    }

    #[test]
    fn missing_misspelled_status_option_fails() {
        // The board's historical spelling comes from config and must match
        // verbatim; a corrected spelling upstream is a validation failure.
        let contract = SchemaContract::from_config(&AppConfig::default().crm);
        let mut props = full_properties(&contract);
        let status = props.as_object_mut().unwrap().get_mut(PROP_STATUS).unwrap();
        *status = json!({"type": "select", "select": {"options": [
            {"name": "Source"}, {"name": "Tracking"},
            {"name": "Initial Meeting / Call"}, {"name": "Diligence"},
            {"name": "Committed"}, {"name": "Funded"},
            {"name": "Passed"}, {"name": "Lost"}
        ]}});

        let report = validate(&contract, &props);
        assert!(!report.is_valid());
        assert_eq!(report.missing_status_options, vec!["Dilligence"]);
    }

    #[test]
    fn missing_optional_property_is_only_a_warning() {
        let contract = SchemaContract::from_config(&AppConfig::default().crm);
        let mut props = full_properties(&contract);
        props.as_object_mut().unwrap().remove(PROP_WEBSITE);

        let report = validate(&contract, &props);
        assert!(report.is_valid());
        assert_eq!(report.missing_optional_properties, vec![PROP_WEBSITE]);
    }
}
