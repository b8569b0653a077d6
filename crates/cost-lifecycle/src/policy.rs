//! Override rules deciding which services may be cancelled.
//!
//! Two kinds of rule exist:
//!
//! - **Exemptions**: services that never show cancellation state. A pattern
//!   matches a service name exactly or as a substring, so `"Tax"` also covers
//!   `"AWS Tax"`.
//! - **Parent → children**: a cancellation recorded on the parent is shown as
//!   pending on every child.
//!
//! Exemptions always win over parent propagation.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;

/// Why a service is exempt from cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExemptionKind {
    /// Usage-billed; there is no standing resource to cancel.
    PayAsYouGo,
    /// A mandatory charge such as tax.
    Required,
}

impl std::fmt::Display for ExemptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PayAsYouGo => write!(f, "pay-as-you-go"),
            Self::Required => write!(f, "required"),
        }
    }
}

/// Usage-billed AWS services with nothing to cancel.
pub const AWS_PAY_AS_YOU_GO: &[&str] = &[
    "Amazon Rekognition",
    "Amazon Transcribe",
    "Amazon Polly",
    "Amazon Textract",
    "Amazon Comprehend",
    "Amazon Translate",
    "Amazon Lex",
    "AWS CodeWhisperer",
    "Amazon Kendra",
];

/// Charges that can never be cancelled.
pub const AWS_REQUIRED: &[&str] = &["Tax"];

/// Model line items billed under Amazon Bedrock.
pub const AWS_BEDROCK_MODELS: &[&str] = &[
    "Claude 3.7 Sonnet",
    "Claude 3.5 Sonnet",
    "Claude 3 Haiku",
    "Claude 3 Opus",
];

/// Static rule table consulted by the engine and controller.
#[derive(Debug, Clone, Default)]
pub struct OverridePolicy {
    exemptions: Vec<(String, ExemptionKind)>,
    children: BTreeMap<String, BTreeSet<String>>,
    parents: HashMap<String, String>,
}

impl OverridePolicy {
    /// A policy with no rules.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Start building a policy.
    #[must_use]
    pub fn builder() -> OverridePolicyBuilder {
        OverridePolicyBuilder::default()
    }

    /// Default rules for AWS cost reports.
    #[must_use]
    pub fn aws_defaults() -> Self {
        let mut builder = Self::builder();
        for name in AWS_PAY_AS_YOU_GO {
            builder = builder.pay_as_you_go(*name);
        }
        for name in AWS_REQUIRED {
            builder = builder.required(*name);
        }
        builder
            .parent("Amazon Bedrock", AWS_BEDROCK_MODELS.iter().copied())
            .build()
            .unwrap_or_default()
    }

    /// The exemption covering `name`, if any.
    ///
    /// Exact matches take priority over substring matches.
    #[must_use]
    pub fn exemption(&self, name: &str) -> Option<ExemptionKind> {
        let name = name.trim();
        self.exemptions
            .iter()
            .find(|(pattern, _)| pattern == name)
            .or_else(|| {
                self.exemptions
                    .iter()
                    .find(|(pattern, _)| name.contains(pattern.as_str()))
            })
            .map(|(_, kind)| *kind)
    }

    /// Whether `name` must never show cancellation state.
    #[must_use]
    pub fn is_exempt(&self, name: &str) -> bool {
        self.exemption(name).is_some()
    }

    /// Services whose state is driven by `name`.
    #[must_use]
    pub fn children_of(&self, name: &str) -> BTreeSet<&str> {
        self.children
            .get(name)
            .map(|children| children.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// The service driving `name`'s state, if any.
    #[must_use]
    pub fn parent_of(&self, name: &str) -> Option<&str> {
        self.parents.get(name).map(String::as_str)
    }

    /// Whether the policy has no rules at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exemptions.is_empty() && self.children.is_empty()
    }
}

/// Builder for [`OverridePolicy`].
#[derive(Debug, Default)]
pub struct OverridePolicyBuilder {
    exemptions: Vec<(String, ExemptionKind)>,
    children: BTreeMap<String, BTreeSet<String>>,
}

impl OverridePolicyBuilder {
    /// Exempt a service pattern.
    #[must_use]
    pub fn exempt(mut self, pattern: impl Into<String>, kind: ExemptionKind) -> Self {
        let pattern = pattern.into().trim().to_string();
        if !pattern.is_empty() {
            self.exemptions.push((pattern, kind));
        }
        self
    }

    /// Exempt a usage-billed service.
    #[must_use]
    pub fn pay_as_you_go(self, pattern: impl Into<String>) -> Self {
        self.exempt(pattern, ExemptionKind::PayAsYouGo)
    }

    /// Exempt a mandatory charge.
    #[must_use]
    pub fn required(self, pattern: impl Into<String>) -> Self {
        self.exempt(pattern, ExemptionKind::Required)
    }

    /// Declare children driven by `parent`.
    #[must_use]
    pub fn parent<I, S>(mut self, parent: impl Into<String>, children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.children
            .entry(parent.into())
            .or_default()
            .extend(children.into_iter().map(Into::into));
        self
    }

    /// Validate and build the policy.
    pub fn build(self) -> Result<OverridePolicy, PolicyError> {
        let mut parents: HashMap<String, String> = HashMap::new();

        for (parent, children) in &self.children {
            for child in children {
                if child == parent {
                    return Err(PolicyError::SelfParent(child.clone()));
                }
                if let Some(first) = parents.insert(child.clone(), parent.clone()) {
                    return Err(PolicyError::ConflictingParent {
                        child: child.clone(),
                        first,
                        second: parent.clone(),
                    });
                }
            }
        }

        Ok(OverridePolicy {
            exemptions: self.exemptions,
            children: self.children,
            parents,
        })
    }
}

/// Serializable form of the override rules, as found in the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Usage-billed service patterns.
    pub pay_as_you_go: Vec<String>,
    /// Mandatory charge patterns.
    pub required: Vec<String>,
    /// Parent name to child names.
    pub parents: BTreeMap<String, Vec<String>>,
}

impl PolicyConfig {
    /// Build the policy described by this section.
    pub fn build(&self) -> Result<OverridePolicy, PolicyError> {
        let mut builder = OverridePolicy::builder();
        for name in &self.pay_as_you_go {
            builder = builder.pay_as_you_go(name.clone());
        }
        for name in &self.required {
            builder = builder.required(name.clone());
        }
        for (parent, children) in &self.parents {
            builder = builder.parent(parent.clone(), children.iter().cloned());
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_and_substring_exemptions() {
        let policy = OverridePolicy::aws_defaults();
        assert_eq!(
            policy.exemption("Amazon Rekognition"),
            Some(ExemptionKind::PayAsYouGo)
        );
        assert_eq!(
            policy.exemption("Amazon Comprehend Medical"),
            Some(ExemptionKind::PayAsYouGo)
        );
        assert_eq!(policy.exemption("AWS Tax"), Some(ExemptionKind::Required));
        assert_eq!(policy.exemption(" Tax "), Some(ExemptionKind::Required));
        assert!(!policy.is_exempt("Amazon OpenSearch Service"));
    }

    #[test]
    fn test_exact_match_wins_over_substring() {
        let policy = OverridePolicy::builder()
            .required("Amazon")
            .pay_as_you_go("Amazon Polly")
            .build()
            .unwrap();
        assert_eq!(
            policy.exemption("Amazon Polly"),
            Some(ExemptionKind::PayAsYouGo)
        );
        assert_eq!(policy.exemption("Amazon EC2"), Some(ExemptionKind::Required));
    }

    #[test]
    fn test_parent_and_children_lookup() {
        let policy = OverridePolicy::aws_defaults();
        assert_eq!(policy.parent_of("Claude 3 Opus"), Some("Amazon Bedrock"));
        assert!(policy.children_of("Amazon Bedrock").contains("Claude 3 Haiku"));
        assert!(policy.children_of("Amazon EC2").is_empty());
        assert_eq!(policy.parent_of("Amazon Bedrock"), None);
    }

    #[test]
    fn test_child_with_two_parents_is_rejected() {
        let err = OverridePolicy::builder()
            .parent("A", ["C"])
            .parent("B", ["C"])
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            PolicyError::ConflictingParent {
                child: "C".to_string(),
                first: "A".to_string(),
                second: "B".to_string(),
            }
        );
    }

    #[test]
    fn test_self_parent_is_rejected() {
        let err = OverridePolicy::builder()
            .parent("A", ["A"])
            .build()
            .unwrap_err();
        assert_eq!(err, PolicyError::SelfParent("A".to_string()));
    }

    #[test]
    fn test_policy_config_build() {
        let config = PolicyConfig {
            pay_as_you_go: vec!["Amazon Rekognition".to_string()],
            required: vec!["Tax".to_string()],
            parents: BTreeMap::from([(
                "Bedrock".to_string(),
                vec!["Claude-A".to_string()],
            )]),
        };
        let policy = config.build().unwrap();
        assert!(policy.is_exempt("Amazon Rekognition"));
        assert_eq!(policy.parent_of("Claude-A"), Some("Bedrock"));
    }

    #[test]
    fn test_empty_policy() {
        let policy = OverridePolicy::empty();
        assert!(policy.is_empty());
        assert!(!policy.is_exempt("anything"));
    }
}
