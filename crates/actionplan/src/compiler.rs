//! Plan compiler - turns a source document into a validated [`Plan`]
//!
//! Compilation has three stages:
//! 1. Validate the document and component selection
//! 2. Emit actions class by class, in phase order, deriving dependency edges
//!    from the relationships in the data
//! 3. Validate the assembled actions and order them topologically
//!
//! Disabled components are never emitted, so no edge ever has to be pruned
//! after the fact. Emission order is fixed, which together with the
//! insertion-ordered topological sort makes the output deterministic.

use crate::catalog::ActionType;
use crate::error::{CompilationError, Result, ValidationError};
use crate::idempotency::{idempotency_key, parameter_fingerprint};
use crate::model::{Action, Plan, build_graph, validate_actions};
use crate::source::{ComponentSelection, SourceDocument};
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Header overrides for a compilation
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Use this run id instead of generating one
    pub run_id: Option<String>,
    /// Use this timestamp instead of the current time
    pub generated_at: Option<DateTime<Utc>>,
}

/// Compile with default options
pub fn compile(doc: &SourceDocument, selection: Option<&ComponentSelection>) -> Result<Plan> {
    PlanCompiler::default().compile(doc, selection)
}

/// Stable action id for an entity
pub fn action_id(action_type: ActionType, entity_id: &str) -> String {
    format!("{action_type}:{entity_id}")
}

/// Compiler configured with header options
#[derive(Debug, Clone, Default)]
pub struct PlanCompiler {
    options: CompileOptions,
}

impl PlanCompiler {
    pub fn new(options: CompileOptions) -> Self {
        Self { options }
    }

    /// Compile a document.
    ///
    /// An explicit `selection` takes precedence over one embedded in the
    /// document. The returned plan has already passed [`Plan::validate`].
    pub fn compile(
        &self,
        doc: &SourceDocument,
        selection: Option<&ComponentSelection>,
    ) -> Result<Plan> {
        let selection = selection
            .or(doc.components.as_ref())
            .cloned()
            .unwrap_or_default();
        selection.validate()?;
        doc.validate()?;

        let actions = Emitter::new(doc, &selection).emit_all()?;

        // Structural validation happens before ordering so the error names
        // the offending ids rather than a failed sort.
        validate_actions(&actions)?;
        let order = build_graph(&actions)?
            .topological_sort()
            .map_err(CompilationError::from)?;

        let mut by_id: HashMap<String, Action> =
            actions.into_iter().map(|a| (a.id.clone(), a)).collect();
        let ordered: Vec<Action> = order
            .iter()
            .filter_map(|id| by_id.remove(id))
            .collect();

        let generated_at = self.options.generated_at.unwrap_or_else(Utc::now);
        let run_id = self
            .options
            .run_id
            .clone()
            .unwrap_or_else(|| default_run_id(&doc.source_id, generated_at));

        let plan = Plan::assemble(doc.source_id.clone(), run_id, generated_at, ordered);
        plan.validate()?;

        log::info!(
            "Compiled plan {} for {}: {} actions, {} dependencies",
            plan.run_id,
            plan.source_id,
            plan.statistics.total_actions,
            plan.statistics.total_dependencies
        );
        Ok(plan)
    }
}

fn default_run_id(source_id: &str, at: DateTime<Utc>) -> String {
    let digest = blake3::hash(source_id.as_bytes()).to_hex();
    format!("{}-{}", at.format("%Y%m%dT%H%M%SZ"), &digest[..8])
}

// ============================================================================
// Emission
// ============================================================================

/// An action before its key is computed
struct Draft {
    action_type: ActionType,
    entity_id: String,
    description: String,
    parameters: Value,
    dependencies: Vec<String>,
    user_input_fields: Vec<String>,
}

impl Draft {
    fn new(
        action_type: ActionType,
        entity_id: impl Into<String>,
        description: String,
        parameters: Value,
    ) -> Self {
        Self {
            action_type,
            entity_id: entity_id.into(),
            description,
            parameters,
            dependencies: Vec::new(),
            user_input_fields: Vec::new(),
        }
    }

    fn after(mut self, dependency: &str) -> Self {
        self.dependencies.push(dependency.to_string());
        self
    }

    fn after_all(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies.extend(dependencies);
        self
    }

    fn awaiting(mut self, field: &str) -> Self {
        self.user_input_fields.push(field.to_string());
        self
    }
}

struct Emitter<'a> {
    doc: &'a SourceDocument,
    selection: &'a ComponentSelection,
    actions: Vec<Action>,
}

impl<'a> Emitter<'a> {
    fn new(doc: &'a SourceDocument, selection: &'a ComponentSelection) -> Self {
        Self {
            doc,
            selection,
            actions: Vec::new(),
        }
    }

    fn emit(&mut self, draft: Draft) -> String {
        let mut parameters: BTreeMap<String, Value> = match draft.parameters {
            Value::Object(map) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        };
        for field in &draft.user_input_fields {
            parameters.entry(field.clone()).or_insert(Value::Null);
        }

        let fingerprint = parameter_fingerprint(&parameters);
        let key = idempotency_key(
            &self.doc.source_id,
            draft.action_type,
            &draft.entity_id,
            &fingerprint,
        );

        let mut dependencies: Vec<String> = Vec::with_capacity(draft.dependencies.len());
        for dep in draft.dependencies {
            if !dependencies.contains(&dep) {
                dependencies.push(dep);
            }
        }

        let id = action_id(draft.action_type, &draft.entity_id);
        self.actions.push(Action {
            id: id.clone(),
            action_type: draft.action_type,
            idempotency_key: key,
            description: draft.description,
            phase: draft.action_type.phase(),
            dependencies,
            parameters,
            requires_user_input: !draft.user_input_fields.is_empty(),
            user_input_fields: draft.user_input_fields,
            reversible: draft.action_type.is_reversible(),
        });
        id
    }

    fn emit_all(mut self) -> std::result::Result<Vec<Action>, ValidationError> {
        let anchors = self.emit_container();
        self.emit_metadata(&anchors);
        self.emit_entities(&anchors)?;
        self.emit_integrations(&anchors);
        self.emit_large_objects(&anchors);
        self.emit_governance(&anchors);
        self.emit_preservation(&anchors);
        Ok(self.actions)
    }

    /// Setup and content phases. Returns the container and content anchors.
    fn emit_container(&mut self) -> Anchors {
        let doc = self.doc;
        let repo = &doc.repository;

        let created = self.emit(Draft::new(
            ActionType::CreateRepository,
            &repo.name,
            format!("Create repository {}", repo.name),
            json!({
                "name": repo.name,
                "description": repo.description,
                "visibility": repo.visibility,
                "default_branch": repo.default_branch,
            }),
        ));

        if repo.needs_configuration() {
            self.emit(
                Draft::new(
                    ActionType::ConfigureRepository,
                    &repo.name,
                    format!("Configure repository {}", repo.name),
                    json!({
                        "name": repo.name,
                        "homepage": repo.homepage,
                        "topics": repo.topics,
                        "features": repo.features,
                    }),
                )
                .after(&created),
            );
        }

        let content = self.emit(
            Draft::new(
                ActionType::PushContent,
                &repo.name,
                format!("Push git history of {}", repo.name),
                json!({
                    "clone_url": repo.clone_url,
                    "default_branch": repo.default_branch,
                }),
            )
            .after(&created),
        );

        if self.selection.is_enabled("wiki")
            && let Some(wiki) = &doc.wiki
        {
            self.emit(
                Draft::new(
                    ActionType::PushWiki,
                    &repo.name,
                    format!("Push wiki of {}", repo.name),
                    json!({ "clone_url": wiki.clone_url }),
                )
                .after(&created),
            );
        }

        Anchors { created, content }
    }

    fn emit_metadata(&mut self, anchors: &Anchors) {
        let doc = self.doc;

        if self.selection.is_enabled("labels") {
            for label in &doc.labels {
                self.emit(
                    Draft::new(
                        ActionType::CreateLabel,
                        &label.id,
                        format!("Create label {}", label.name),
                        json!({
                            "name": label.name,
                            "color": label.color.trim_start_matches('#'),
                            "description": label.description,
                        }),
                    )
                    .after(&anchors.created),
                );
            }
        }

        if self.selection.is_enabled("milestones") {
            for milestone in &doc.milestones {
                self.emit(
                    Draft::new(
                        ActionType::CreateMilestone,
                        &milestone.id,
                        format!("Create milestone {}", milestone.title),
                        json!({
                            "title": milestone.title,
                            "description": milestone.description,
                            "due_on": milestone.due_on,
                            "state": milestone.state,
                        }),
                    )
                    .after(&anchors.created),
                );
            }
        }
    }

    fn emit_entities(&mut self, anchors: &Anchors) -> std::result::Result<(), ValidationError> {
        let doc = self.doc;
        let links = Links::new(doc, self.selection);

        if self.selection.is_enabled("issues") {
            for issue in &doc.issues {
                let entity = format!("issue {}", issue.id);
                let deps = links.resolve(
                    &entity,
                    &issue.id,
                    &issue.labels,
                    issue.milestone.as_deref(),
                    &issue.references,
                )?;

                let issue_action = self.emit(
                    Draft::new(
                        ActionType::CreateIssue,
                        &issue.id,
                        format!("Create issue {}", issue.title),
                        json!({
                            "title": issue.title,
                            "body": issue.body,
                            "state": issue.state,
                            "number": issue.number,
                            "author": issue.author,
                            "labels": links.label_names(&issue.labels),
                            "milestone": links.milestone_title(issue.milestone.as_deref()),
                            "assignees": issue.assignees,
                        }),
                    )
                    .after(&anchors.content)
                    .after_all(deps),
                );

                if self.selection.option("issues", "comments") {
                    for comment in &issue.comments {
                        self.emit(
                            Draft::new(
                                ActionType::AddIssueComment,
                                format!("{}/{}", issue.id, comment.id),
                                format!("Comment {} on issue {}", comment.id, issue.id),
                                json!({
                                    "issue": issue_action,
                                    "body": comment.body,
                                    "author": comment.author,
                                    "created_at": comment.created_at,
                                }),
                            )
                            .after(&issue_action),
                        );
                    }
                }
            }
        }

        if self.selection.is_enabled("pull_requests") {
            for pr in &doc.pull_requests {
                let entity = format!("pull request {}", pr.id);
                let deps = links.resolve(
                    &entity,
                    &pr.id,
                    &pr.labels,
                    pr.milestone.as_deref(),
                    &pr.references,
                )?;

                let pr_action = self.emit(
                    Draft::new(
                        ActionType::CreatePullRequest,
                        &pr.id,
                        format!("Open pull request {}", pr.title),
                        json!({
                            "title": pr.title,
                            "body": pr.body,
                            "head": pr.head,
                            "base": pr.base,
                            "state": pr.state,
                            "number": pr.number,
                            "author": pr.author,
                            "labels": links.label_names(&pr.labels),
                            "milestone": links.milestone_title(pr.milestone.as_deref()),
                        }),
                    )
                    .after(&anchors.content)
                    .after_all(deps),
                );

                if self.selection.option("pull_requests", "comments") {
                    for comment in &pr.comments {
                        self.emit(
                            Draft::new(
                                ActionType::AddPullRequestComment,
                                format!("{}/{}", pr.id, comment.id),
                                format!("Comment {} on pull request {}", comment.id, pr.id),
                                json!({
                                    "pull_request": pr_action,
                                    "body": comment.body,
                                    "author": comment.author,
                                    "created_at": comment.created_at,
                                }),
                            )
                            .after(&pr_action),
                        );
                    }
                }
            }
        }

        Ok(())
    }

    fn emit_integrations(&mut self, anchors: &Anchors) {
        let doc = self.doc;

        if self.selection.is_enabled("webhooks") {
            for hook in &doc.webhooks {
                let mut draft = Draft::new(
                    ActionType::CreateWebhook,
                    &hook.id,
                    format!("Register webhook {}", hook.url),
                    json!({
                        "url": hook.url,
                        "events": hook.events,
                        "content_type": hook.content_type,
                        "active": hook.active,
                    }),
                )
                .after(&anchors.created);
                if hook.secret_required {
                    draft = draft.awaiting("secret");
                }
                self.emit(draft);
            }
        }

        if self.selection.is_enabled("workflows") {
            for workflow in &doc.workflows {
                self.emit(
                    Draft::new(
                        ActionType::CommitWorkflow,
                        &workflow.id,
                        format!("Commit workflow {}", workflow.path),
                        json!({
                            "path": workflow.path,
                            "content": workflow.content,
                            "branch": doc.repository.default_branch,
                        }),
                    )
                    .after(&anchors.content),
                );
            }
        }

        if self.selection.is_enabled("secrets") {
            for secret in &doc.secrets {
                self.emit(
                    Draft::new(
                        ActionType::SetSecret,
                        &secret.name,
                        format!("Set secret {}", secret.name),
                        json!({ "name": secret.name }),
                    )
                    .after(&anchors.created)
                    .awaiting("value"),
                );
            }
        }
    }

    fn emit_large_objects(&mut self, anchors: &Anchors) {
        let doc = self.doc;

        if self.selection.is_enabled("lfs")
            && let Some(lfs) = &doc.lfs
            && !lfs.objects.is_empty()
        {
            let total: u64 = lfs.objects.iter().map(|o| o.size).sum();
            self.emit(
                Draft::new(
                    ActionType::PushLfsObjects,
                    &doc.repository.name,
                    format!("Upload {} LFS objects", lfs.objects.len()),
                    json!({
                        "objects": lfs.objects,
                        "total_size": total,
                    }),
                )
                .after(&anchors.content),
            );
        }

        if self.selection.is_enabled("releases") {
            for release in &doc.releases {
                let release_action = self.emit(
                    Draft::new(
                        ActionType::CreateRelease,
                        &release.id,
                        format!("Create release {}", release.tag),
                        json!({
                            "tag": release.tag,
                            "name": release.name,
                            "body": release.body,
                            "draft": release.draft,
                            "prerelease": release.prerelease,
                        }),
                    )
                    .after(&anchors.content),
                );

                if self.selection.option("releases", "assets") {
                    for asset in &release.assets {
                        self.emit(
                            Draft::new(
                                ActionType::UploadReleaseAsset,
                                format!("{}/{}", release.id, asset.id),
                                format!("Upload {} to release {}", asset.name, release.tag),
                                json!({
                                    "release": release_action,
                                    "name": asset.name,
                                    "source_url": asset.source_url,
                                    "size": asset.size,
                                    "content_type": asset.content_type,
                                }),
                            )
                            .after(&release_action),
                        );
                    }
                }
            }
        }
    }

    fn emit_governance(&mut self, anchors: &Anchors) {
        let doc = self.doc;

        if self.selection.is_enabled("collaborators") {
            for collaborator in &doc.collaborators {
                let mut draft = Draft::new(
                    ActionType::AddCollaborator,
                    &collaborator.id,
                    format!("Grant {} {} access", collaborator.id, collaborator.permission),
                    json!({
                        "username": collaborator.mapped_username,
                        "source_username": collaborator.id,
                        "permission": collaborator.permission,
                    }),
                )
                .after(&anchors.created);
                if collaborator.mapped_username.is_none() {
                    draft = draft.awaiting("username");
                }
                self.emit(draft);
            }
        }

        if self.selection.is_enabled("branch_protections") {
            for rule in &doc.branch_protections {
                self.emit(
                    Draft::new(
                        ActionType::ProtectBranch,
                        &rule.branch,
                        format!("Protect branch {}", rule.branch),
                        json!({
                            "branch": rule.branch,
                            "required_reviews": rule.required_reviews,
                            "required_status_checks": rule.required_status_checks,
                            "enforce_admins": rule.enforce_admins,
                        }),
                    )
                    .after(&anchors.content),
                );
            }
        }
    }

    fn emit_preservation(&mut self, anchors: &Anchors) {
        let doc = self.doc;
        if !self.selection.is_enabled("archival") {
            return;
        }
        let Some(archival) = &doc.archival else {
            return;
        };

        if self.selection.option("archival", "bundles") {
            for bundle in &archival.bundles {
                self.emit(
                    Draft::new(
                        ActionType::UploadArchiveBundle,
                        &bundle.id,
                        format!("Upload preservation bundle {}", bundle.name),
                        json!({
                            "name": bundle.name,
                            "source_url": bundle.source_url,
                            "kind": bundle.kind,
                        }),
                    )
                    .after(&anchors.created),
                );
            }
        }

        if archival.archive_repository && self.selection.option("archival", "archive_repository")
        {
            // An archived repository is read-only, so archiving waits for
            // every sink of the graph (and therefore for everything).
            let sinks = self.sinks();
            self.emit(
                Draft::new(
                    ActionType::ArchiveRepository,
                    &doc.repository.name,
                    format!("Archive repository {}", doc.repository.name),
                    json!({ "name": doc.repository.name }),
                )
                .after_all(sinks),
            );
        }
    }

    /// Emitted actions that nothing depends on yet
    fn sinks(&self) -> Vec<String> {
        let depended: HashSet<&str> = self
            .actions
            .iter()
            .flat_map(|a| a.dependencies.iter().map(String::as_str))
            .collect();
        self.actions
            .iter()
            .filter(|a| !depended.contains(a.id.as_str()))
            .map(|a| a.id.clone())
            .collect()
    }
}

/// Action ids every later phase hangs off
struct Anchors {
    /// `create_repository`
    created: String,
    /// `push_content`
    content: String,
}

/// Resolves labels, milestones and cross-references to dependency ids
struct Links<'a> {
    labels: HashMap<&'a str, &'a str>,
    labels_enabled: bool,
    milestones: HashMap<&'a str, &'a str>,
    milestones_enabled: bool,
    /// Issue/PR id -> action id, `None` when its component is disabled
    entities: HashMap<&'a str, Option<String>>,
}

impl<'a> Links<'a> {
    fn new(doc: &'a SourceDocument, selection: &ComponentSelection) -> Self {
        let issues_on = selection.is_enabled("issues");
        let prs_on = selection.is_enabled("pull_requests");

        let mut entities = HashMap::new();
        for issue in &doc.issues {
            let id = issues_on.then(|| action_id(ActionType::CreateIssue, &issue.id));
            entities.insert(issue.id.as_str(), id);
        }
        for pr in &doc.pull_requests {
            let id = prs_on.then(|| action_id(ActionType::CreatePullRequest, &pr.id));
            entities.insert(pr.id.as_str(), id);
        }

        Self {
            labels: doc
                .labels
                .iter()
                .map(|l| (l.id.as_str(), l.name.as_str()))
                .collect(),
            labels_enabled: selection.is_enabled("labels"),
            milestones: doc
                .milestones
                .iter()
                .map(|m| (m.id.as_str(), m.title.as_str()))
                .collect(),
            milestones_enabled: selection.is_enabled("milestones"),
            entities,
        }
    }

    /// Dependency ids for an issue or pull request
    fn resolve(
        &self,
        entity: &str,
        own_id: &str,
        labels: &[String],
        milestone: Option<&str>,
        references: &[String],
    ) -> std::result::Result<Vec<String>, ValidationError> {
        let mut deps = Vec::new();

        for label in labels {
            if !self.labels.contains_key(label.as_str()) {
                return Err(unknown(entity, "label", label));
            }
            if self.labels_enabled {
                deps.push(action_id(ActionType::CreateLabel, label));
            }
        }

        if let Some(milestone) = milestone {
            if !self.milestones.contains_key(milestone) {
                return Err(unknown(entity, "milestone", milestone));
            }
            if self.milestones_enabled {
                deps.push(action_id(ActionType::CreateMilestone, milestone));
            }
        }

        for reference in references {
            if reference == own_id {
                log::debug!("{entity} references itself; ignoring");
                continue;
            }
            match self.entities.get(reference.as_str()) {
                Some(Some(target)) => deps.push(target.clone()),
                Some(None) => {
                    log::debug!("{entity} references {reference} of a disabled component; dropping edge");
                }
                None => return Err(unknown(entity, "issue or pull request", reference)),
            }
        }

        Ok(deps)
    }

    fn label_names(&self, ids: &[String]) -> Vec<&str> {
        ids.iter()
            .filter_map(|id| self.labels.get(id.as_str()).copied())
            .collect()
    }

    fn milestone_title(&self, id: Option<&str>) -> Option<&str> {
        id.and_then(|m| self.milestones.get(m).copied())
    }
}

fn unknown(entity: &str, class: &str, reference: &str) -> ValidationError {
    ValidationError::UnknownReference {
        entity: entity.to_string(),
        class: class.to_string(),
        reference: reference.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn doc(value: Value) -> SourceDocument {
        serde_json::from_value(value).unwrap()
    }

    fn base() -> Value {
        json!({
            "source_id": "gitlab:acme/widgets",
            "repository": {
                "name": "widgets",
                "clone_url": "https://git.example/acme/widgets.git"
            }
        })
    }

    fn pinned() -> PlanCompiler {
        PlanCompiler::new(CompileOptions {
            run_id: Some("run-1".into()),
            generated_at: Some(DateTime::from_timestamp(1_700_000_000, 0).unwrap()),
        })
    }

    fn rich() -> Value {
        let mut value = base();
        value["repository"]["topics"] = json!(["rust"]);
        value["wiki"] = json!({"clone_url": "https://git.example/acme/widgets.wiki.git"});
        value["labels"] = json!([{"id": "l1", "name": "bug", "color": "#d73a4a"}]);
        value["milestones"] = json!([{"id": "m1", "title": "v1"}]);
        value["issues"] = json!([
            {"id": "1", "title": "Crash", "labels": ["l1"], "milestone": "m1",
             "comments": [{"id": "c1", "body": "repro"}]},
            {"id": "2", "title": "Follow-up", "references": ["1", "3"]}
        ]);
        value["pull_requests"] = json!([
            {"id": "3", "title": "Fix crash", "head": "fix", "base": "main",
             "comments": [{"id": "c9", "body": "lgtm"}]}
        ]);
        value["webhooks"] = json!([{"id": "h1", "url": "https://ci.example/hook", "secret_required": true}]);
        value["workflows"] = json!([{"id": "ci", "path": ".github/workflows/ci.yml", "content": "on: push"}]);
        value["secrets"] = json!([{"name": "DEPLOY_KEY"}]);
        value["lfs"] = json!({"objects": [{"oid": "abc", "size": 10}, {"oid": "def", "size": 5}]});
        value["releases"] = json!([{"id": "r1", "tag": "v1.0.0",
            "assets": [{"id": "a1", "name": "widgets.tar.gz", "source_url": "https://files/a1"}]}]);
        value["collaborators"] = json!([
            {"id": "ann", "permission": "admin", "mapped_username": "ann-gh"},
            {"id": "bob"}
        ]);
        value["branch_protections"] = json!([{"branch": "main", "required_reviews": 1}]);
        value["archival"] = json!({
            "archive_repository": true,
            "bundles": [{"id": "b1", "name": "ci-logs", "source_url": "https://files/b1"}]
        });
        value
    }

    fn ids(plan: &Plan) -> Vec<&str> {
        plan.actions.iter().map(|a| a.id.as_str()).collect()
    }

    fn position(plan: &Plan, id: &str) -> usize {
        plan.actions.iter().position(|a| a.id == id).unwrap()
    }

    #[test]
    fn test_container_with_three_children() {
        let mut value = base();
        value["issues"] = json!([
            {"id": "1", "title": "One"},
            {"id": "2", "title": "Two"},
            {"id": "3", "title": "Three", "references": ["1"]}
        ]);
        let plan = pinned().compile(&doc(value), None).unwrap();

        assert_eq!(plan.statistics.total_actions, 5);
        let third = plan.action("create_issue:3").unwrap();
        assert!(third.dependencies.contains(&"push_content:widgets".to_string()));
        assert!(third.dependencies.contains(&"create_issue:1".to_string()));
        assert!(position(&plan, "create_issue:1") < position(&plan, "create_issue:3"));
    }

    #[test]
    fn test_rich_document_compiles_and_validates() {
        let plan = pinned().compile(&doc(rich()), None).unwrap();
        assert!(plan.validate().is_ok());
        assert_eq!(plan.run_id, "run-1");

        // every type appears at least once in the rich document
        for ty in ActionType::ALL {
            assert!(
                plan.statistics.actions_by_type.contains_key(&ty),
                "missing {ty}"
            );
        }
        assert_eq!(plan.actions[0].id, "create_repository:widgets");
        assert_eq!(plan.actions.last().unwrap().id, "archive_repository:widgets");
        // webhook secret, DEPLOY_KEY and bob's username
        assert_eq!(plan.statistics.actions_requiring_user_input, 3);
    }

    #[test]
    fn test_every_dependency_exists_and_precedes() {
        let plan = pinned().compile(&doc(rich()), None).unwrap();
        for (idx, action) in plan.actions.iter().enumerate() {
            for dep in &action.dependencies {
                let dep_idx = position(&plan, dep);
                assert!(dep_idx < idx, "{dep} must precede {}", action.id);
            }
        }
    }

    #[test]
    fn test_compilation_is_deterministic() {
        let a = pinned().compile(&doc(rich()), None).unwrap();
        let b = pinned().compile(&doc(rich()), None).unwrap();
        assert_eq!(a.to_json_pretty().unwrap(), b.to_json_pretty().unwrap());

        let c = compile(&doc(rich()), None).unwrap();
        let keys = |p: &Plan| -> Vec<String> {
            p.actions.iter().map(|a| a.idempotency_key.clone()).collect()
        };
        assert_eq!(ids(&a), ids(&c));
        assert_eq!(keys(&a), keys(&c));
    }

    #[test]
    fn test_keys_are_unique() {
        let plan = pinned().compile(&doc(rich()), None).unwrap();
        let keys: HashSet<&str> = plan
            .actions
            .iter()
            .map(|a| a.idempotency_key.as_str())
            .collect();
        assert_eq!(keys.len(), plan.actions.len());
    }

    #[test]
    fn test_cross_reference_to_pull_request() {
        let plan = pinned().compile(&doc(rich()), None).unwrap();
        let follow_up = plan.action("create_issue:2").unwrap();
        assert!(
            follow_up
                .dependencies
                .contains(&"create_pull_request:3".to_string())
        );
        let comment = plan.action("add_issue_comment:1/c1").unwrap();
        assert_eq!(comment.dependencies, vec!["create_issue:1"]);
        assert_eq!(comment.param_str("issue"), Some("create_issue:1"));
    }

    #[test]
    fn test_labels_and_milestones_become_edges() {
        let plan = pinned().compile(&doc(rich()), None).unwrap();
        let issue = plan.action("create_issue:1").unwrap();
        assert!(issue.dependencies.contains(&"create_label:l1".to_string()));
        assert!(issue.dependencies.contains(&"create_milestone:m1".to_string()));
        assert_eq!(issue.parameters["labels"], json!(["bug"]));
        let label = plan.action("create_label:l1").unwrap();
        assert_eq!(label.param_str("color"), Some("d73a4a"));
    }

    #[test]
    fn test_disabled_components_are_not_emitted() {
        let selection = ComponentSelection::all()
            .disable("pull_requests")
            .disable("labels")
            .with_option("issues", "comments", false);
        let plan = pinned().compile(&doc(rich()), Some(&selection)).unwrap();

        assert!(plan.actions.iter().all(|a| !matches!(
            a.action_type,
            ActionType::CreatePullRequest
                | ActionType::AddPullRequestComment
                | ActionType::CreateLabel
                | ActionType::AddIssueComment
        )));
        // the edge to the disabled PR is dropped, not dangling
        let follow_up = plan.action("create_issue:2").unwrap();
        assert!(
            !follow_up
                .dependencies
                .iter()
                .any(|d| d.starts_with("create_pull_request"))
        );
        // label names stay on the issue even without label actions
        let issue = plan.action("create_issue:1").unwrap();
        assert_eq!(issue.parameters["labels"], json!(["bug"]));
    }

    #[test]
    fn test_embedded_selection_is_used() {
        let mut value = rich();
        value["components"] = json!({"releases": {"assets": false}});
        let plan = pinned().compile(&doc(value), None).unwrap();
        assert!(plan.action("create_release:r1").is_some());
        assert!(plan.action("upload_release_asset:r1/a1").is_none());
    }

    #[test]
    fn test_archive_waits_for_everything() {
        let plan = pinned().compile(&doc(rich()), None).unwrap();
        let graph = plan.dependency_graph().unwrap();
        let archive = "archive_repository:widgets".to_string();
        let root = "create_repository:widgets".to_string();
        let downstream = graph.transitive_dependents(&root).unwrap();
        assert_eq!(downstream.len(), plan.actions.len() - 1);
        assert!(downstream.contains(&archive));
        for action in &plan.actions {
            if action.id != archive {
                let reach = graph.transitive_dependents(&action.id).unwrap();
                assert!(reach.contains(&archive), "{} not before archive", action.id);
            }
        }
    }

    #[test]
    fn test_optional_setup_actions() {
        let plan = pinned().compile(&doc(base()), None).unwrap();
        assert_eq!(
            ids(&plan),
            vec!["create_repository:widgets", "push_content:widgets"]
        );
        assert_eq!(plan.foundational_actions(), vec!["create_repository:widgets"]);
    }

    #[test]
    fn test_mutual_references_are_a_cycle() {
        let mut value = base();
        value["issues"] = json!([
            {"id": "1", "title": "A", "references": ["2"]},
            {"id": "2", "title": "B", "references": ["1"]}
        ]);
        let err = pinned().compile(&doc(value), None).unwrap_err();
        match err {
            Error::Compilation(CompilationError::CycleDetected { cycle_path }) => {
                assert!(cycle_path.contains(&"create_issue:1".to_string()));
                assert!(cycle_path.contains(&"create_issue:2".to_string()));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_reference_ignored() {
        let mut value = base();
        value["issues"] = json!([{"id": "1", "title": "A", "references": ["1"]}]);
        let plan = pinned().compile(&doc(value), None).unwrap();
        assert_eq!(
            plan.action("create_issue:1").unwrap().dependencies,
            vec!["push_content:widgets"]
        );
    }

    #[test]
    fn test_unknown_reference_is_validation_error() {
        let mut value = base();
        value["issues"] = json!([{"id": "1", "title": "A", "references": ["99"]}]);
        let err = pinned().compile(&doc(value), None).unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::UnknownReference { .. })
        ));

        let mut value = base();
        value["issues"] = json!([{"id": "1", "title": "A", "labels": ["nope"]}]);
        assert!(pinned().compile(&doc(value), None).is_err());
    }

    #[test]
    fn test_invalid_selection_rejected() {
        let selection = ComponentSelection::all().disable("repository");
        let err = pinned().compile(&doc(base()), Some(&selection)).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_user_input_fields_are_null_parameters() {
        let plan = pinned().compile(&doc(rich()), None).unwrap();
        let bob = plan.action("add_collaborator:bob").unwrap();
        assert!(bob.requires_user_input);
        assert_eq!(bob.unresolved_inputs(), vec!["username"]);
        let ann = plan.action("add_collaborator:ann").unwrap();
        assert!(!ann.requires_user_input);
    }

    #[test]
    fn test_default_run_id_shape() {
        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let id = default_run_id("gitlab:acme/widgets", at);
        assert!(id.starts_with("20231114T221320Z-"));
        assert_eq!(id.len(), "20231114T221320Z-".len() + 8);
    }
}
