//! Normalized source document - the compiler's input
//!
//! The document is produced by an extraction step outside this crate. Every
//! entity carries a stable id from the source system; those ids flow into
//! action ids and idempotency keys.

use crate::error::{Result, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

/// Repository visibility on the target platform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Private,
    Internal,
    Public,
}

/// The container being migrated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositorySpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    /// Where the git history is pulled from
    pub clone_url: String,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    /// Feature toggles such as `has_issues`, `has_projects`
    #[serde(default)]
    pub features: BTreeMap<String, bool>,
}

fn default_branch() -> String {
    "main".to_string()
}

impl RepositorySpec {
    /// Whether anything beyond plain creation needs configuring
    pub fn needs_configuration(&self) -> bool {
        self.homepage.is_some() || !self.topics.is_empty() || !self.features.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WikiSpec {
    pub clone_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelSpec {
    pub id: String,
    pub name: String,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_color() -> String {
    "ededed".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestoneSpec {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub due_on: Option<String>,
    #[serde(default = "default_state")]
    pub state: String,
}

fn default_state() -> String {
    "open".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentSpec {
    pub id: String,
    pub body: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// An issue from the source tracker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueSpec {
    pub id: String,
    #[serde(default)]
    pub number: Option<u64>,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default = "default_state")]
    pub state: String,
    #[serde(default)]
    pub author: Option<String>,
    /// Label ids
    #[serde(default)]
    pub labels: Vec<String>,
    /// Milestone id
    #[serde(default)]
    pub milestone: Option<String>,
    #[serde(default)]
    pub assignees: Vec<String>,
    /// Ids of other issues or pull requests mentioned by this one
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub comments: Vec<CommentSpec>,
}

/// A merge/pull request from the source system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestSpec {
    pub id: String,
    #[serde(default)]
    pub number: Option<u64>,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub head: String,
    pub base: String,
    #[serde(default = "default_state")]
    pub state: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub milestone: Option<String>,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub comments: Vec<CommentSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSpec {
    pub id: String,
    pub url: String,
    #[serde(default = "default_events")]
    pub events: Vec<String>,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    /// The shared secret cannot be extracted and must be supplied by a human
    #[serde(default)]
    pub secret_required: bool,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_events() -> Vec<String> {
    vec!["push".to_string()]
}

fn default_content_type() -> String {
    "json".to_string()
}

fn default_true() -> bool {
    true
}

/// A CI/automation definition translated to a workflow file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub id: String,
    pub path: String,
    pub content: String,
}

/// A secret whose value never leaves the source system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretSpec {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LfsObject {
    pub oid: String,
    pub size: u64,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LfsSpec {
    #[serde(default)]
    pub objects: Vec<LfsObject>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetSpec {
    pub id: String,
    pub name: String,
    pub source_url: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseSpec {
    pub id: String,
    pub tag: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub assets: Vec<AssetSpec>,
}

/// Source-system member to be granted access on the target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorSpec {
    /// Source username
    pub id: String,
    #[serde(default = "default_permission")]
    pub permission: String,
    /// Target-platform username, if already known
    #[serde(default)]
    pub mapped_username: Option<String>,
}

fn default_permission() -> String {
    "push".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchProtectionSpec {
    pub branch: String,
    #[serde(default)]
    pub required_reviews: u32,
    #[serde(default)]
    pub required_status_checks: Vec<String>,
    #[serde(default)]
    pub enforce_admins: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleSpec {
    pub id: String,
    pub name: String,
    pub source_url: String,
    #[serde(default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchivalSpec {
    /// Mark the repository read-only once everything else is done
    #[serde(default)]
    pub archive_repository: bool,
    #[serde(default)]
    pub bundles: Vec<BundleSpec>,
}

/// The full normalized description of one repository migration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub source_id: String,
    pub repository: RepositorySpec,
    #[serde(default)]
    pub wiki: Option<WikiSpec>,
    #[serde(default)]
    pub labels: Vec<LabelSpec>,
    #[serde(default)]
    pub milestones: Vec<MilestoneSpec>,
    #[serde(default)]
    pub issues: Vec<IssueSpec>,
    #[serde(default)]
    pub pull_requests: Vec<PullRequestSpec>,
    #[serde(default)]
    pub webhooks: Vec<WebhookSpec>,
    #[serde(default)]
    pub workflows: Vec<WorkflowSpec>,
    #[serde(default)]
    pub secrets: Vec<SecretSpec>,
    #[serde(default)]
    pub lfs: Option<LfsSpec>,
    #[serde(default)]
    pub releases: Vec<ReleaseSpec>,
    #[serde(default)]
    pub collaborators: Vec<CollaboratorSpec>,
    #[serde(default)]
    pub branch_protections: Vec<BranchProtectionSpec>,
    #[serde(default)]
    pub archival: Option<ArchivalSpec>,
    /// Selection embedded in the document; an explicit selection passed to
    /// the compiler takes precedence
    #[serde(default)]
    pub components: Option<ComponentSelection>,
}

impl SourceDocument {
    /// Parse a document from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a document file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Check the document for missing fields and duplicate ids
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        require("document", "source_id", &self.source_id)?;
        require("repository", "name", &self.repository.name)?;
        require("repository", "clone_url", &self.repository.clone_url)?;
        require("repository", "default_branch", &self.repository.default_branch)?;

        if let Some(wiki) = &self.wiki {
            require("wiki", "clone_url", &wiki.clone_url)?;
        }

        unique("label", self.labels.iter().map(|l| l.id.as_str()))?;
        for label in &self.labels {
            require(&format!("label {}", label.id), "name", &label.name)?;
        }

        unique("milestone", self.milestones.iter().map(|m| m.id.as_str()))?;
        for milestone in &self.milestones {
            require(&format!("milestone {}", milestone.id), "title", &milestone.title)?;
        }

        // Issues and pull requests share one id space for cross-references
        unique(
            "issue or pull request",
            self.issues
                .iter()
                .map(|i| i.id.as_str())
                .chain(self.pull_requests.iter().map(|p| p.id.as_str())),
        )?;
        for issue in &self.issues {
            let entity = format!("issue {}", issue.id);
            require(&entity, "title", &issue.title)?;
            unique("issue comment", issue.comments.iter().map(|c| c.id.as_str()))?;
        }
        for pr in &self.pull_requests {
            let entity = format!("pull request {}", pr.id);
            require(&entity, "title", &pr.title)?;
            require(&entity, "head", &pr.head)?;
            require(&entity, "base", &pr.base)?;
            unique(
                "pull request comment",
                pr.comments.iter().map(|c| c.id.as_str()),
            )?;
        }

        unique("webhook", self.webhooks.iter().map(|w| w.id.as_str()))?;
        for hook in &self.webhooks {
            require(&format!("webhook {}", hook.id), "url", &hook.url)?;
        }
        unique("workflow", self.workflows.iter().map(|w| w.id.as_str()))?;
        for workflow in &self.workflows {
            require(&format!("workflow {}", workflow.id), "path", &workflow.path)?;
        }
        unique("secret", self.secrets.iter().map(|s| s.name.as_str()))?;

        unique("release", self.releases.iter().map(|r| r.id.as_str()))?;
        for release in &self.releases {
            require(&format!("release {}", release.id), "tag", &release.tag)?;
            unique(
                "release asset",
                release.assets.iter().map(|a| a.id.as_str()),
            )?;
        }

        unique(
            "collaborator",
            self.collaborators.iter().map(|c| c.id.as_str()),
        )?;
        unique(
            "branch protection",
            self.branch_protections.iter().map(|b| b.branch.as_str()),
        )?;

        if let Some(archival) = &self.archival {
            unique("bundle", archival.bundles.iter().map(|b| b.id.as_str()))?;
            for bundle in &archival.bundles {
                require(&format!("bundle {}", bundle.id), "source_url", &bundle.source_url)?;
            }
        }

        if let Some(selection) = &self.components {
            selection.validate()?;
        }

        Ok(())
    }
}

fn require(entity: &str, field: &str, value: &str) -> std::result::Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField {
            entity: entity.to_string(),
            field: field.to_string(),
        });
    }
    Ok(())
}

fn unique<'a>(
    class: &str,
    ids: impl Iterator<Item = &'a str>,
) -> std::result::Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.trim().is_empty() {
            return Err(ValidationError::MissingField {
                entity: class.to_string(),
                field: "id".to_string(),
            });
        }
        if !seen.insert(id) {
            return Err(ValidationError::DuplicateEntity {
                class: class.to_string(),
                id: id.to_string(),
            });
        }
    }
    Ok(())
}

// ============================================================================
// Component Selection
// ============================================================================

/// Known components and the sub-options each accepts
const COMPONENTS: &[(&str, &[&str])] = &[
    ("repository", &[]),
    ("wiki", &[]),
    ("labels", &[]),
    ("milestones", &[]),
    ("issues", &["comments"]),
    ("pull_requests", &["comments"]),
    ("webhooks", &[]),
    ("workflows", &[]),
    ("secrets", &[]),
    ("lfs", &[]),
    ("releases", &["assets"]),
    ("collaborators", &[]),
    ("branch_protections", &[]),
    ("archival", &["archive_repository", "bundles"]),
];

/// Per-component switch plus sub-option flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentOptions {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(flatten)]
    pub options: BTreeMap<String, bool>,
}

impl Default for ComponentOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            options: BTreeMap::new(),
        }
    }
}

/// Which parts of the source to migrate.
///
/// Components and options that are not mentioned are enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentSelection(pub BTreeMap<String, ComponentOptions>);

impl ComponentSelection {
    /// Selection with everything enabled
    pub fn all() -> Self {
        Self::default()
    }

    /// Parse a selection from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let selection: Self = serde_json::from_str(json)?;
        selection.validate()?;
        Ok(selection)
    }

    /// Disable a component
    pub fn disable(mut self, component: &str) -> Self {
        self.0.entry(component.to_string()).or_default().enabled = false;
        self
    }

    /// Set a sub-option flag on a component
    pub fn with_option(mut self, component: &str, option: &str, value: bool) -> Self {
        self.0
            .entry(component.to_string())
            .or_default()
            .options
            .insert(option.to_string(), value);
        self
    }

    /// Whether a component is enabled
    pub fn is_enabled(&self, component: &str) -> bool {
        self.0.get(component).is_none_or(|c| c.enabled)
    }

    /// Whether a component is enabled and its sub-option is on
    pub fn option(&self, component: &str, option: &str) -> bool {
        self.is_enabled(component)
            && self
                .0
                .get(component)
                .and_then(|c| c.options.get(option))
                .copied()
                .unwrap_or(true)
    }

    /// Reject unknown component or option names and a disabled repository
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        for (name, opts) in &self.0 {
            let Some((_, known)) = COMPONENTS.iter().find(|(c, _)| *c == name.as_str()) else {
                return Err(ValidationError::UnknownComponent { name: name.clone() });
            };
            for option in opts.options.keys() {
                if !known.contains(&option.as_str()) {
                    return Err(ValidationError::UnknownComponentOption {
                        component: name.clone(),
                        option: option.clone(),
                    });
                }
            }
        }
        if !self.is_enabled("repository") {
            return Err(ValidationError::RequiredComponentDisabled {
                name: "repository".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal() -> serde_json::Value {
        json!({
            "source_id": "gitlab:acme/widgets",
            "repository": {"name": "widgets", "clone_url": "https://git.example/acme/widgets.git"}
        })
    }

    #[test]
    fn test_minimal_document_defaults() {
        let doc: SourceDocument = serde_json::from_value(minimal()).unwrap();
        assert_eq!(doc.repository.default_branch, "main");
        assert_eq!(doc.repository.visibility, Visibility::Private);
        assert!(!doc.repository.needs_configuration());
        assert!(doc.validate().is_ok());
    }

    #[test]
    fn test_empty_source_id_rejected() {
        let mut value = minimal();
        value["source_id"] = json!("  ");
        let doc: SourceDocument = serde_json::from_value(value).unwrap();
        assert_eq!(
            doc.validate().unwrap_err(),
            ValidationError::MissingField {
                entity: "document".into(),
                field: "source_id".into()
            }
        );
    }

    #[test]
    fn test_issue_and_pull_request_ids_share_namespace() {
        let mut value = minimal();
        value["issues"] = json!([{"id": "7", "title": "Bug"}]);
        value["pull_requests"] = json!([{"id": "7", "title": "Fix", "head": "fix", "base": "main"}]);
        let doc: SourceDocument = serde_json::from_value(value).unwrap();
        assert!(matches!(
            doc.validate(),
            Err(ValidationError::DuplicateEntity { .. })
        ));
    }

    #[test]
    fn test_selection_defaults_to_enabled() {
        let selection = ComponentSelection::all();
        assert!(selection.is_enabled("issues"));
        assert!(selection.option("issues", "comments"));
    }

    #[test]
    fn test_selection_parses_flags() {
        let selection = ComponentSelection::from_json(
            r#"{"issues": {"enabled": true, "comments": false}, "wiki": {"enabled": false}}"#,
        )
        .unwrap();
        assert!(selection.is_enabled("issues"));
        assert!(!selection.option("issues", "comments"));
        assert!(!selection.is_enabled("wiki"));
        assert!(!selection.option("wiki", "anything"));
    }

    #[test]
    fn test_selection_rejects_unknown_names() {
        let err = ComponentSelection::all().disable("gists").validate().unwrap_err();
        assert_eq!(err, ValidationError::UnknownComponent { name: "gists".into() });

        let err = ComponentSelection::all()
            .with_option("labels", "colors", false)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnknownComponentOption { .. }));
    }

    #[test]
    fn test_repository_cannot_be_disabled() {
        let err = ComponentSelection::all()
            .disable("repository")
            .validate()
            .unwrap_err();
        assert!(matches!(err, ValidationError::RequiredComponentDisabled { .. }));
    }
}
