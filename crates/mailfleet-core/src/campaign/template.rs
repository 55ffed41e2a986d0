//! Template Renderer - Handles personalization of campaign content

use super::Contact;
use mailfleet_storage::TemplateVariables;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").expect("placeholder pattern is valid"));

/// Template renderer for personalizing subjects and template data
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateRenderer;

impl TemplateRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Merge variables for one recipient.
    ///
    /// Later layers win: campaign variables, then variant variables, then
    /// contact fields (`email`, `first_name`, `last_name`, `name` and
    /// `attributes.<key>`).
    pub fn merge_variables(
        &self,
        campaign: &TemplateVariables,
        variant: Option<&TemplateVariables>,
        contact: &Contact,
    ) -> BTreeMap<String, String> {
        let mut merged: BTreeMap<String, String> = campaign
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if let Some(variant) = variant {
            merged.extend(variant.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        merged.insert("email".to_string(), contact.email.clone());
        if let Some(first_name) = &contact.first_name {
            merged.insert("first_name".to_string(), first_name.clone());
        }
        if let Some(last_name) = &contact.last_name {
            merged.insert("last_name".to_string(), last_name.clone());
        }
        if let Some(name) = contact.full_name() {
            merged.insert("name".to_string(), name);
        }
        for (key, value) in &contact.attributes {
            merged.insert(format!("attributes.{}", key), value.clone());
        }

        merged
    }

    /// Replace `{{key}}` placeholders; unknown placeholders render empty
    pub fn render(&self, template: &str, variables: &BTreeMap<String, String>) -> String {
        PLACEHOLDER
            .replace_all(template, |caps: &Captures| {
                variables.get(&caps[1]).cloned().unwrap_or_default()
            })
            .into_owned()
    }
}
