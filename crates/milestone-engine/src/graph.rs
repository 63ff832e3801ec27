//! Typed playbook graph: worlds, nodes, outcomes and requirements, built from a
//! parsed document and indexed for lookup.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use milestone_playbook::{
    parse_condition, ConditionExpr, FieldDoc, LocalizedText, NodeDoc, OutcomeDoc,
    PlaybookDocument, RequirementsDoc, SourceDocument, UploadDoc, WorldDoc,
};
use milestone_types::{FieldValues, MilestoneError, Result};

use crate::index::{NodeLocation, PlaybookIndex};

/// A loaded, immutable playbook version.
///
/// Built from a [`SourceDocument`]; every condition is parsed and every node's
/// requirements are checked against its kind during construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Playbook {
    pub id: String,
    pub version: String,
    pub checksum: String,
    pub locale_default: Option<String>,
    pub roles: Vec<Role>,
    worlds: Vec<World>,
    conditions: BTreeMap<String, NamedCondition>,
    index: PlaybookIndex,
}

#[derive(Debug, Clone, PartialEq)]
pub struct World {
    pub id: String,
    pub title: LocalizedText,
    pub order: i32,
    pub condition: Option<VisibilityCondition>,
    pub nodes: Vec<NodeDefinition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeDefinition {
    pub id: String,
    pub title: LocalizedText,
    pub kind: NodeKind,
    pub allowed_completers: Vec<String>,
    pub prerequisites: Vec<String>,
    pub next: Vec<String>,
    pub outcomes: Vec<Outcome>,
    pub condition: Option<VisibilityCondition>,
    pub timer: Option<Timer>,
    pub requirements: Requirements,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Role {
    pub id: String,
    pub label: LocalizedText,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamedCondition {
    pub id: String,
    pub expr: ConditionExpr,
    pub description: LocalizedText,
}

/// A node or world `condition`, resolved against the conditions table.
#[derive(Debug, Clone, PartialEq)]
pub struct VisibilityCondition {
    /// The reference as written in the document.
    pub reference: String,
    pub expr: ConditionExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub value: String,
    pub label: LocalizedText,
    pub matcher: ConditionExpr,
    pub next: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timer {
    pub duration_days: u32,
    pub start_event: String,
}

// ---------------------------------------------------------------------------
// Node kinds and requirements
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Form,
    Upload,
    Decision,
    Meeting,
    Waiting,
    External,
    Boss,
    Gateway,
}

impl NodeKind {
    pub const ALL: [NodeKind; 8] = [
        NodeKind::Form,
        NodeKind::Upload,
        NodeKind::Decision,
        NodeKind::Meeting,
        NodeKind::Waiting,
        NodeKind::External,
        NodeKind::Boss,
        NodeKind::Gateway,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Form => "form",
            NodeKind::Upload => "upload",
            NodeKind::Decision => "decision",
            NodeKind::Meeting => "meeting",
            NodeKind::Waiting => "waiting",
            NodeKind::External => "external",
            NodeKind::Boss => "boss",
            NodeKind::Gateway => "gateway",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = MilestoneError;

    fn from_str(s: &str) -> Result<Self> {
        NodeKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| MilestoneError::DefinitionIntegrity(format!("unknown node type '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Boolean,
    Date,
    Number,
    Select,
    File,
    Other,
}

impl FieldType {
    fn from_doc(raw: Option<&str>) -> Option<Self> {
        let ty = match raw.unwrap_or("text") {
            "text" | "textarea" | "string" => FieldType::Text,
            "boolean" | "bool" | "checkbox" => FieldType::Boolean,
            "date" => FieldType::Date,
            "number" | "int" => FieldType::Number,
            "select" | "multiselect" => FieldType::Select,
            "file" => FieldType::File,
            "other" => FieldType::Other,
            _ => return None,
        };
        Some(ty)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub key: String,
    pub required: bool,
    pub field_type: FieldType,
    pub label: LocalizedText,
    pub options: Vec<String>,
    pub other_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadSlot {
    pub key: String,
    pub mime: Vec<String>,
    pub required: bool,
    pub label: LocalizedText,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub rule: String,
    pub source: Option<String>,
}

/// What a node collects, keyed by its kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Requirements {
    Form {
        fields: Vec<FieldSpec>,
        validations: Vec<Validation>,
    },
    Upload {
        slots: Vec<UploadSlot>,
        fields: Vec<FieldSpec>,
    },
    Decision {
        fields: Vec<FieldSpec>,
    },
    Meeting {
        fields: Vec<FieldSpec>,
        slots: Vec<UploadSlot>,
    },
    Waiting {
        checklist: Vec<String>,
    },
    External {
        checklist: Vec<String>,
    },
    Boss {
        fields: Vec<FieldSpec>,
        slots: Vec<UploadSlot>,
    },
    Gateway,
}

impl Requirements {
    pub fn fields(&self) -> &[FieldSpec] {
        match self {
            Requirements::Form { fields, .. }
            | Requirements::Upload { fields, .. }
            | Requirements::Decision { fields }
            | Requirements::Meeting { fields, .. }
            | Requirements::Boss { fields, .. } => fields,
            Requirements::Waiting { .. } | Requirements::External { .. } | Requirements::Gateway => {
                &[]
            }
        }
    }

    pub fn slots(&self) -> &[UploadSlot] {
        match self {
            Requirements::Upload { slots, .. }
            | Requirements::Meeting { slots, .. }
            | Requirements::Boss { slots, .. } => slots,
            _ => &[],
        }
    }

    pub fn checklist(&self) -> &[String] {
        match self {
            Requirements::Waiting { checklist } | Requirements::External { checklist } => {
                checklist
            }
            _ => &[],
        }
    }

    /// Keys of required fields and slots that `submitted` does not satisfy.
    ///
    /// Required boolean fields must be `true`; any other required field or
    /// slot must be present and non-empty.
    pub fn missing(&self, submitted: &FieldValues) -> Vec<&str> {
        let fields = self.fields().iter().filter(|f| f.required).filter(|f| {
            match submitted.get(&f.key) {
                None => true,
                Some(value) if f.field_type == FieldType::Boolean => value.as_bool() != Some(true),
                Some(value) => is_blank(value),
            }
        });
        let slots = self
            .slots()
            .iter()
            .filter(|s| s.required)
            .filter(|s| submitted.get(&s.key).map_or(true, is_blank));

        fields
            .map(|f| f.key.as_str())
            .chain(slots.map(|s| s.key.as_str()))
            .collect()
    }

    pub fn is_ready(&self, submitted: &FieldValues) -> bool {
        self.missing(submitted).is_empty()
    }

    /// Build the typed requirements for `kind`, rejecting shapes the kind cannot carry.
    pub(crate) fn from_doc(
        node_id: &str,
        kind: NodeKind,
        doc: Option<&RequirementsDoc>,
    ) -> Result<Self> {
        let empty = RequirementsDoc::default();
        let doc = doc.unwrap_or(&empty);
        let fields = doc
            .fields
            .iter()
            .map(|f| field_spec(node_id, f))
            .collect::<Result<Vec<_>>>()?;
        let slots: Vec<UploadSlot> = doc.uploads.iter().map(upload_slot).collect();
        let shape_error = |what: &str| {
            MilestoneError::DefinitionIntegrity(format!("node '{node_id}' ({kind}) {what}"))
        };

        let requirements = match kind {
            NodeKind::Form => {
                if fields.is_empty() {
                    return Err(shape_error("must declare at least one field"));
                }
                if !slots.is_empty() {
                    return Err(shape_error("cannot declare upload slots"));
                }
                let validations = doc
                    .validations
                    .iter()
                    .map(|v| Validation {
                        rule: v.rule.clone(),
                        source: v.source.clone(),
                    })
                    .collect();
                Requirements::Form {
                    fields,
                    validations,
                }
            }
            NodeKind::Upload => {
                if slots.is_empty() {
                    return Err(shape_error("must declare at least one upload slot"));
                }
                Requirements::Upload { slots, fields }
            }
            NodeKind::Decision => {
                if !slots.is_empty() {
                    return Err(shape_error("cannot declare upload slots"));
                }
                Requirements::Decision { fields }
            }
            NodeKind::Meeting => Requirements::Meeting { fields, slots },
            NodeKind::Boss => Requirements::Boss { fields, slots },
            NodeKind::Waiting | NodeKind::External => {
                if !fields.is_empty() || !slots.is_empty() {
                    return Err(shape_error("collects no fields or uploads, only a checklist"));
                }
                let checklist = doc.checklist.clone();
                if kind == NodeKind::Waiting {
                    Requirements::Waiting { checklist }
                } else {
                    Requirements::External { checklist }
                }
            }
            NodeKind::Gateway => {
                if !fields.is_empty() || !slots.is_empty() || !doc.checklist.is_empty() {
                    return Err(shape_error("is a pass-through and collects nothing"));
                }
                Requirements::Gateway
            }
        };
        Ok(requirements)
    }
}

fn is_blank(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => s.trim().is_empty(),
        serde_json::Value::Array(items) => items.is_empty(),
        serde_json::Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn field_spec(node_id: &str, doc: &FieldDoc) -> Result<FieldSpec> {
    let field_type = FieldType::from_doc(doc.field_type.as_deref()).ok_or_else(|| {
        MilestoneError::DefinitionIntegrity(format!(
            "node '{node_id}' field '{}' has unknown type '{}'",
            doc.key,
            doc.field_type.as_deref().unwrap_or_default()
        ))
    })?;
    Ok(FieldSpec {
        key: doc.key.clone(),
        required: doc.required,
        field_type,
        label: doc.label.clone(),
        options: doc.options.iter().map(|o| o.value.clone()).collect(),
        other_key: doc.other_key.clone(),
    })
}

fn upload_slot(doc: &UploadDoc) -> UploadSlot {
    let mut mime = doc.mime.clone();
    if let Some(accept) = &doc.accept {
        mime.extend(accept.split(',').map(|m| m.trim().to_string()).filter(|m| !m.is_empty()));
    }
    UploadSlot {
        key: doc.key.clone(),
        mime,
        required: doc.required,
        label: doc.label.clone(),
    }
}

/// Kind plus typed requirements of a node document, with the per-kind shape checks.
pub(crate) fn typed_shape(node: &NodeDoc) -> Result<(NodeKind, Requirements)> {
    let kind: NodeKind = node.node_type.parse().map_err(|_| {
        MilestoneError::DefinitionIntegrity(format!(
            "node '{}' has unknown type '{}'",
            node.id, node.node_type
        ))
    })?;
    let requirements = Requirements::from_doc(&node.id, kind, node.requirements.as_ref())?;

    match kind {
        NodeKind::Decision if node.outcomes.is_empty() => {
            Err(MilestoneError::DefinitionIntegrity(format!(
                "decision node '{}' must declare outcomes",
                node.id
            )))
        }
        NodeKind::Gateway if node.outcomes.is_empty() && node.next.is_empty() => {
            Err(MilestoneError::DefinitionIntegrity(format!(
                "gateway node '{}' must route somewhere (outcomes or next)",
                node.id
            )))
        }
        _ => Ok((kind, requirements)),
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

impl VisibilityCondition {
    /// A reference names a conditions-table entry; otherwise it is read as an
    /// inline expression, so a bare name becomes a process-flag test.
    fn resolve(reference: &str, table: &BTreeMap<String, NamedCondition>) -> Result<Self> {
        let expr = match table.get(reference.trim()) {
            Some(named) => named.expr.clone(),
            None => parse_condition(reference)?,
        };
        Ok(Self {
            reference: reference.to_string(),
            expr,
        })
    }
}

fn outcome_from_doc(doc: &OutcomeDoc) -> Result<Outcome> {
    let matcher = match &doc.when {
        Some(when) => parse_condition(when)?,
        None => ConditionExpr::outcome_equals(&doc.value),
    };
    Ok(Outcome {
        value: doc.value.clone(),
        label: doc.label.clone(),
        matcher,
        next: doc.next.clone(),
    })
}

fn node_from_doc(
    doc: &NodeDoc,
    table: &BTreeMap<String, NamedCondition>,
) -> Result<NodeDefinition> {
    let (kind, requirements) = typed_shape(doc)?;
    let outcomes = doc
        .outcomes
        .iter()
        .map(outcome_from_doc)
        .collect::<Result<Vec<_>>>()?;
    let condition = doc
        .condition
        .as_deref()
        .map(|c| VisibilityCondition::resolve(c, table))
        .transpose()?;

    Ok(NodeDefinition {
        id: doc.id.clone(),
        title: doc.title.clone(),
        kind,
        allowed_completers: doc.who_can_complete.clone(),
        prerequisites: doc.prerequisites.clone(),
        next: doc.next.clone(),
        outcomes,
        condition,
        timer: doc.timer.as_ref().map(|t| Timer {
            duration_days: t.duration_days,
            start_event: t.start_on.clone(),
        }),
        requirements,
    })
}

fn world_from_doc(doc: &WorldDoc, table: &BTreeMap<String, NamedCondition>) -> Result<World> {
    Ok(World {
        id: doc.id.clone(),
        title: doc.title.clone(),
        order: doc.order,
        condition: doc
            .condition
            .as_deref()
            .map(|c| VisibilityCondition::resolve(c, table))
            .transpose()?,
        nodes: doc
            .nodes
            .iter()
            .map(|n| node_from_doc(n, table))
            .collect::<Result<Vec<_>>>()?,
    })
}

impl Playbook {
    pub fn from_document(source: SourceDocument) -> Result<Self> {
        let SourceDocument { document, checksum } = source;
        let PlaybookDocument {
            playbook_id,
            version,
            locale_default,
            worlds,
            roles,
            conditions,
        } = document;

        let mut table = BTreeMap::new();
        for cond in &conditions {
            let named = NamedCondition {
                id: cond.id.clone(),
                expr: parse_condition(&cond.expr)?,
                description: cond.description.clone(),
            };
            if table.insert(cond.id.clone(), named).is_some() {
                return Err(MilestoneError::DefinitionIntegrity(format!(
                    "condition '{}' is declared twice",
                    cond.id
                )));
            }
        }

        let mut worlds = worlds
            .iter()
            .map(|w| world_from_doc(w, &table))
            .collect::<Result<Vec<_>>>()?;
        // Stable: equal orders keep declaration order.
        worlds.sort_by_key(|w| w.order);

        let index = PlaybookIndex::build(&worlds)?;

        tracing::debug!(
            playbook = %playbook_id,
            version = %version,
            worlds = worlds.len(),
            nodes = index.len(),
            "Built playbook graph"
        );

        Ok(Playbook {
            id: playbook_id,
            version,
            checksum,
            locale_default,
            roles: roles
                .into_iter()
                .map(|r| Role {
                    id: r.id,
                    label: r.label,
                })
                .collect(),
            worlds,
            conditions: table,
            index,
        })
    }

    /// Worlds sorted by display order.
    pub fn worlds(&self) -> &[World] {
        &self.worlds
    }

    pub fn world(&self, id: &str) -> Option<&World> {
        self.index.world_position(id).map(|i| &self.worlds[i])
    }

    pub fn node(&self, id: &str) -> Option<&NodeDefinition> {
        self.index.location(id).map(|loc| self.at(loc).1)
    }

    /// The world that owns `node_id`.
    pub fn world_of(&self, node_id: &str) -> Option<&World> {
        self.index.location(node_id).map(|loc| self.at(loc).0)
    }

    pub fn condition(&self, id: &str) -> Option<&NamedCondition> {
        self.conditions.get(id)
    }

    pub fn conditions(&self) -> impl Iterator<Item = &NamedCondition> {
        self.conditions.values()
    }

    /// Every node with its world, worlds by order and nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = (&World, &NodeDefinition)> {
        self.worlds
            .iter()
            .flat_map(|w| w.nodes.iter().map(move |n| (w, n)))
    }

    /// Nodes ordered so that every prerequisite and branch source precedes its dependents.
    pub fn dependency_order(&self) -> impl Iterator<Item = (&World, &NodeDefinition)> {
        self.index.dependency_order().iter().map(|&loc| self.at(loc))
    }

    /// Nodes whose forward outcome branches name `node_id` and so gate it.
    pub fn branch_sources(&self, node_id: &str) -> &[String] {
        self.index.branch_sources(node_id)
    }

    /// Nodes whose outcome branches route back to `node_id` for rework.
    pub fn loop_sources(&self, node_id: &str) -> &[String] {
        self.index.loop_sources(node_id)
    }

    pub fn index(&self) -> &PlaybookIndex {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.len() == 0
    }

    fn at(&self, loc: NodeLocation) -> (&World, &NodeDefinition) {
        let world = &self.worlds[loc.world];
        (world, &world.nodes[loc.node])
    }
}

impl NodeDefinition {
    /// Targets this node can route to when it completes: every outcome's
    /// targets, plus `next` as the fallback branch when outcomes exist.
    pub fn branch_targets(&self) -> Vec<&str> {
        if self.outcomes.is_empty() {
            return Vec::new();
        }
        let mut targets: Vec<&str> = Vec::new();
        let all = self
            .outcomes
            .iter()
            .flat_map(|o| o.next.iter())
            .chain(self.next.iter());
        for target in all {
            if !targets.contains(&target.as_str()) {
                targets.push(target.as_str());
            }
        }
        targets
    }

    pub fn can_complete(&self, role: &str) -> bool {
        self.allowed_completers.iter().any(|r| r == role)
    }
}

impl Timer {
    pub fn deadline(&self, anchor: DateTime<Utc>) -> DateTime<Utc> {
        anchor + chrono::Duration::days(i64::from(self.duration_days))
    }

    pub fn is_overdue(&self, anchor: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now > self.deadline(anchor)
    }

    /// Time left until the deadline; negative once overdue.
    pub fn remaining(&self, anchor: DateTime<Utc>, now: DateTime<Utc>) -> chrono::Duration {
        self.deadline(anchor) - now
    }
}
