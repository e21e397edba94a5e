//! Evidence graph: typed relationships between claims, fragments, and
//! pages.
//!
//! A directed graph (one edge per ordered node pair) over composite node
//! IDs `"<type>:<obj_id>"`, backed by `petgraph` with a name index.
//! Supports evidence retrieval, claim-confidence verdicts, contradiction
//! marking, citation-integrity analysis (loops, round trips, self
//! references, penalties), and persistence into the `edges` table.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction as PetDirection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{Citation, Paper};
use crate::storage::Database;
use crate::Result;

/// Types of nodes in the evidence graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Claim,
    Fragment,
    Page,
}

impl NodeType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Claim => "claim",
            NodeType::Fragment => "fragment",
            NodeType::Page => "page",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "claim" => Some(NodeType::Claim),
            "fragment" => Some(NodeType::Fragment),
            "page" => Some(NodeType::Page),
            _ => None,
        }
    }
}

/// Types of relationships between nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationType {
    Supports,
    Refutes,
    Cites,
    Neutral,
}

impl RelationType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Supports => "supports",
            RelationType::Refutes => "refutes",
            RelationType::Cites => "cites",
            RelationType::Neutral => "neutral",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "supports" => Some(RelationType::Supports),
            "refutes" => Some(RelationType::Refutes),
            "cites" => Some(RelationType::Cites),
            "neutral" => Some(RelationType::Neutral),
            _ => None,
        }
    }
}

/// Claim adoption lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdoptionStatus {
    Pending,
    Adopted,
    NotAdopted,
}

/// Typed node attributes. Unknown attributes have no representation here
/// and are rejected at the boundary by construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeAttributes {
    pub is_academic: bool,
    pub doi: Option<String>,
    pub citation_count: Option<i64>,
    pub year: Option<i32>,
    pub venue: Option<String>,
    pub source_api: Option<String>,
    pub domain: Option<String>,
    pub adoption_status: Option<AdoptionStatus>,
}

impl NodeAttributes {
    /// Merge other attributes in: set fields override, absent fields keep.
    fn merge_from(&mut self, other: NodeAttributes) {
        self.is_academic |= other.is_academic;
        merge_opt(&mut self.doi, other.doi);
        merge_opt(&mut self.citation_count, other.citation_count);
        merge_opt(&mut self.year, other.year);
        merge_opt(&mut self.venue, other.venue);
        merge_opt(&mut self.source_api, other.source_api);
        merge_opt(&mut self.domain, other.domain);
        merge_opt(&mut self.adoption_status, other.adoption_status);
    }
}

fn merge_opt<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

/// Typed edge attributes for every relation kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeAttributes {
    pub confidence: Option<f64>,
    pub nli_label: Option<String>,
    pub nli_confidence: Option<f64>,
    pub is_academic: bool,
    pub is_influential: bool,
    pub citation_context: Option<String>,
    pub is_contradiction: bool,
}

#[derive(Debug, Clone)]
struct NodeData {
    node_type: NodeType,
    obj_id: String,
    attrs: NodeAttributes,
}

#[derive(Debug, Clone)]
struct EdgeData {
    edge_id: String,
    relation: RelationType,
    attrs: EdgeAttributes,
}

/// One piece of evidence attached to a claim.
#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceRecord {
    pub node_type: NodeType,
    pub obj_id: String,
    pub relation: RelationType,
    pub confidence: Option<f64>,
    pub nli_confidence: Option<f64>,
    pub node: NodeAttributes,
}

/// Evidence for a claim grouped by relation.
#[derive(Debug, Clone, Default)]
pub struct EvidenceBundle {
    pub supports: Vec<EvidenceRecord>,
    pub refutes: Vec<EvidenceRecord>,
    pub neutral: Vec<EvidenceRecord>,
}

/// Verdict derived from supporting/refuting evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Unverified,
    LikelyFalse,
    Contested,
    Supported,
    WellSupported,
}

impl Verdict {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Unverified => "unverified",
            Verdict::LikelyFalse => "likely_false",
            Verdict::Contested => "contested",
            Verdict::Supported => "supported",
            Verdict::WellSupported => "well_supported",
        }
    }
}

/// Confidence assessment for one claim.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimConfidence {
    pub confidence: f64,
    pub verdict: Verdict,
    pub supporting_count: usize,
    pub refuting_count: usize,
    pub neutral_count: usize,
    pub independent_sources: usize,
}

/// A pair of claims connected by at least one REFUTES edge.
#[derive(Debug, Clone, PartialEq)]
pub struct Contradiction {
    pub claim1_id: String,
    pub claim2_id: String,
    pub confidence: f64,
}

/// Severity tier for citation-integrity findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

/// One simple cycle in the CITES subgraph.
#[derive(Debug, Clone, PartialEq)]
pub struct CitationLoop {
    pub length: usize,
    pub node_ids: Vec<String>,
    pub severity: Severity,
}

/// Mutual citation between two nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundTrip {
    pub node_a: String,
    pub node_b: String,
    pub severity: Severity,
}

/// A node citing itself, directly or through its own domain.
#[derive(Debug, Clone, PartialEq)]
pub enum SelfReference {
    Direct {
        node_id: String,
    },
    SameDomain {
        source: String,
        target: String,
        domain: String,
    },
}

impl SelfReference {
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self {
            SelfReference::Direct { .. } => Severity::Critical,
            SelfReference::SameDomain { .. } => Severity::Medium,
        }
    }
}

/// Citation-integrity summary across the whole graph.
#[derive(Debug, Clone)]
pub struct IntegrityReport {
    pub integrity_score: f64,
    pub total_citation_edges: usize,
    pub loops: Vec<CitationLoop>,
    pub round_trips: Vec<RoundTrip>,
    pub self_references: Vec<SelfReference>,
    pub problematic_node_count: usize,
    /// Nodes whose penalty dropped below 0.9, worst first.
    pub penalized_nodes: Vec<(String, f64)>,
}

/// Primary vs. secondary source split over PAGE nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimarySourceRatio {
    pub primary_count: usize,
    pub secondary_count: usize,
    pub total_pages: usize,
    pub primary_ratio: f64,
    pub meets_threshold: bool,
}

/// Node/edge totals plus headline integrity metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphStats {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub claim_count: usize,
    pub fragment_count: usize,
    pub page_count: usize,
    pub supports_count: usize,
    pub refutes_count: usize,
    pub cites_count: usize,
    pub neutral_count: usize,
    pub citation_integrity_score: f64,
    pub citation_loop_count: usize,
    pub round_trip_count: usize,
}

/// One step of a citation chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainNode {
    pub depth: usize,
    pub node_type: NodeType,
    pub obj_id: String,
}

const PRIMARY_SOURCE_THRESHOLD: f64 = 0.6;

/// Evidence graph for one research task.
pub struct EvidenceGraph {
    task_id: Option<String>,
    graph: DiGraph<NodeData, EdgeData>,
    node_ids: HashMap<String, NodeIndex>,
}

impl EvidenceGraph {
    #[must_use]
    pub fn new(task_id: Option<String>) -> Self {
        Self {
            task_id,
            graph: DiGraph::new(),
            node_ids: HashMap::new(),
        }
    }

    #[must_use]
    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    fn make_node_id(node_type: NodeType, obj_id: &str) -> String {
        format!("{}:{}", node_type.as_str(), obj_id)
    }

    fn parse_node_id(node_id: &str) -> Option<(NodeType, &str)> {
        let (type_str, obj_id) = node_id.split_once(':')?;
        Some((NodeType::parse(type_str)?, obj_id))
    }

    /// Add a node, merging attributes when it already exists. Returns the
    /// composite node ID.
    pub fn add_node(&mut self, node_type: NodeType, obj_id: &str, attrs: NodeAttributes) -> String {
        let node_id = Self::make_node_id(node_type, obj_id);
        match self.node_ids.get(&node_id) {
            Some(&ix) => self.graph[ix].attrs.merge_from(attrs),
            None => {
                let ix = self.graph.add_node(NodeData {
                    node_type,
                    obj_id: obj_id.to_string(),
                    attrs,
                });
                self.node_ids.insert(node_id.clone(), ix);
            }
        }
        node_id
    }

    fn ensure_node(&mut self, node_type: NodeType, obj_id: &str) -> NodeIndex {
        let node_id = Self::make_node_id(node_type, obj_id);
        if let Some(&ix) = self.node_ids.get(&node_id) {
            return ix;
        }
        let ix = self.graph.add_node(NodeData {
            node_type,
            obj_id: obj_id.to_string(),
            attrs: NodeAttributes::default(),
        });
        self.node_ids.insert(node_id, ix);
        ix
    }

    /// Add an edge, creating endpoints as needed. A second edge between
    /// the same ordered pair replaces the relation and merges attributes.
    /// Returns the edge ID.
    pub fn add_edge(
        &mut self,
        source_type: NodeType,
        source_id: &str,
        target_type: NodeType,
        target_id: &str,
        relation: RelationType,
        attrs: EdgeAttributes,
    ) -> String {
        self.insert_edge(
            source_type,
            source_id,
            target_type,
            target_id,
            relation,
            attrs,
            Uuid::new_v4().to_string(),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_edge(
        &mut self,
        source_type: NodeType,
        source_id: &str,
        target_type: NodeType,
        target_id: &str,
        relation: RelationType,
        attrs: EdgeAttributes,
        edge_id: String,
    ) -> String {
        let source = self.ensure_node(source_type, source_id);
        let target = self.ensure_node(target_type, target_id);

        if let Some(existing) = self.graph.find_edge(source, target) {
            let data = &mut self.graph[existing];
            data.relation = relation;
            data.edge_id = edge_id.clone();
            let old = std::mem::take(&mut data.attrs);
            data.attrs = merged_edge_attrs(old, attrs);
        } else {
            self.graph.add_edge(
                source,
                target,
                EdgeData {
                    edge_id: edge_id.clone(),
                    relation,
                    attrs,
                },
            );
        }
        edge_id
    }

    fn claim_node(&self, claim_id: &str) -> Option<NodeIndex> {
        self.node_ids
            .get(&Self::make_node_id(NodeType::Claim, claim_id))
            .copied()
    }

    fn evidence_from_edge(&self, source: NodeIndex, data: &EdgeData) -> EvidenceRecord {
        let node = &self.graph[source];
        EvidenceRecord {
            node_type: node.node_type,
            obj_id: node.obj_id.clone(),
            relation: data.relation,
            confidence: data.attrs.confidence,
            nli_confidence: data.attrs.nli_confidence,
            node: node.attrs.clone(),
        }
    }

    /// Evidence with a SUPPORTS edge into the claim.
    #[must_use]
    pub fn get_supporting_evidence(&self, claim_id: &str) -> Vec<EvidenceRecord> {
        self.incoming_evidence(claim_id, Some(RelationType::Supports))
    }

    /// Evidence with a REFUTES edge into the claim.
    #[must_use]
    pub fn get_refuting_evidence(&self, claim_id: &str) -> Vec<EvidenceRecord> {
        self.incoming_evidence(claim_id, Some(RelationType::Refutes))
    }

    fn incoming_evidence(
        &self,
        claim_id: &str,
        relation: Option<RelationType>,
    ) -> Vec<EvidenceRecord> {
        let Some(claim) = self.claim_node(claim_id) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(claim, PetDirection::Incoming)
            .filter(|edge| relation.map_or(true, |r| edge.weight().relation == r))
            .map(|edge| self.evidence_from_edge(edge.source(), edge.weight()))
            .collect()
    }

    /// All evidence for a claim, grouped by relation.
    #[must_use]
    pub fn get_all_evidence(&self, claim_id: &str) -> EvidenceBundle {
        let mut bundle = EvidenceBundle::default();
        for record in self.incoming_evidence(claim_id, None) {
            match record.relation {
                RelationType::Supports => bundle.supports.push(record),
                RelationType::Refutes => bundle.refutes.push(record),
                RelationType::Neutral => bundle.neutral.push(record),
                RelationType::Cites => {}
            }
        }
        bundle
    }

    /// Aggregate evidence into a confidence score and verdict.
    #[must_use]
    pub fn calculate_claim_confidence(&self, claim_id: &str) -> ClaimConfidence {
        let evidence = self.get_all_evidence(claim_id);
        let supporting_count = evidence.supports.len();
        let refuting_count = evidence.refutes.len();
        let neutral_count = evidence.neutral.len();
        let total = supporting_count + refuting_count + neutral_count;

        let independent_sources = {
            let mut pages: HashSet<&str> = HashSet::new();
            for record in evidence
                .supports
                .iter()
                .chain(&evidence.refutes)
                .chain(&evidence.neutral)
            {
                if record.node_type == NodeType::Page {
                    pages.insert(&record.obj_id);
                }
            }
            pages.len()
        };

        if total == 0 {
            return ClaimConfidence {
                confidence: 0.0,
                verdict: Verdict::Unverified,
                supporting_count: 0,
                refuting_count: 0,
                neutral_count: 0,
                independent_sources: 0,
            };
        }

        let avg_support = if evidence.supports.is_empty() {
            0.0
        } else {
            evidence
                .supports
                .iter()
                .map(|e| e.confidence.unwrap_or(0.5))
                .sum::<f64>()
                / evidence.supports.len() as f64
        };

        let (confidence, verdict) = if refuting_count > 0 {
            let confidence = avg_support
                * (supporting_count as f64 / (supporting_count + refuting_count * 2) as f64);
            let verdict = if supporting_count > refuting_count {
                Verdict::Contested
            } else {
                Verdict::LikelyFalse
            };
            (confidence, verdict)
        } else if supporting_count >= 3 {
            ((avg_support * 1.1).min(1.0), Verdict::WellSupported)
        } else if supporting_count >= 1 {
            (avg_support, Verdict::Supported)
        } else {
            (0.3, Verdict::Unverified)
        };

        ClaimConfidence {
            confidence: round3(confidence),
            verdict,
            supporting_count,
            refuting_count,
            neutral_count,
            independent_sources,
        }
    }

    fn claim_nodes(&self) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|&ix| self.graph[ix].node_type == NodeType::Claim)
            .collect()
    }

    /// All unordered claim pairs connected by a REFUTES edge in either
    /// direction.
    #[must_use]
    pub fn find_contradictions(&self) -> Vec<Contradiction> {
        let claims = self.claim_nodes();
        let mut contradictions = Vec::new();

        for (i, &claim1) in claims.iter().enumerate() {
            for &claim2 in &claims[i + 1..] {
                let forward = self
                    .graph
                    .find_edge(claim1, claim2)
                    .map(|e| &self.graph[e]);
                let backward = self
                    .graph
                    .find_edge(claim2, claim1)
                    .map(|e| &self.graph[e]);

                let refutes = |data: &Option<&EdgeData>| {
                    data.map_or(false, |d| d.relation == RelationType::Refutes)
                };
                if refutes(&forward) || refutes(&backward) {
                    let confidence = forward
                        .iter()
                        .chain(backward.iter())
                        .filter_map(|d| d.attrs.confidence)
                        .fold(0.0f64, f64::max);
                    contradictions.push(Contradiction {
                        claim1_id: self.graph[claim1].obj_id.clone(),
                        claim2_id: self.graph[claim2].obj_id.clone(),
                        confidence,
                    });
                }
            }
        }
        contradictions
    }

    /// Flag both directions of every contradicting pair with
    /// `is_contradiction = true`. Returns the number of pairs.
    pub fn mark_contradictions(&mut self) -> usize {
        let contradictions = self.find_contradictions();
        for c in &contradictions {
            let a = self.claim_node(&c.claim1_id);
            let b = self.claim_node(&c.claim2_id);
            let (Some(a), Some(b)) = (a, b) else { continue };
            if let Some(e) = self.graph.find_edge(a, b) {
                self.graph[e].attrs.is_contradiction = true;
            }
            if let Some(e) = self.graph.find_edge(b, a) {
                self.graph[e].attrs.is_contradiction = true;
            }
        }
        contradictions.len()
    }

    /// Edges currently flagged as contradictions, as
    /// (source, target, edge_id) composites.
    #[must_use]
    pub fn get_contradiction_edges(&self) -> Vec<(String, String, String)> {
        self.graph
            .edge_references()
            .filter(|e| e.weight().attrs.is_contradiction)
            .map(|e| {
                let source = &self.graph[e.source()];
                let target = &self.graph[e.target()];
                (
                    Self::make_node_id(source.node_type, &source.obj_id),
                    Self::make_node_id(target.node_type, &target.obj_id),
                    e.weight().edge_id.clone(),
                )
            })
            .collect()
    }

    /// Set the adoption status of a claim node.
    pub fn set_claim_adoption_status(&mut self, claim_id: &str, status: AdoptionStatus) {
        match self.claim_node(claim_id) {
            Some(ix) => {
                self.graph[ix].attrs.adoption_status = Some(status);
                debug!(claim_id, status = ?status, "claim adoption status updated");
            }
            None => warn!(claim_id, "cannot set adoption status: claim not found"),
        }
    }

    /// Adoption status of a claim, defaulting to pending for known claims.
    #[must_use]
    pub fn get_claim_adoption_status(&self, claim_id: &str) -> Option<AdoptionStatus> {
        let ix = self.claim_node(claim_id)?;
        Some(
            self.graph[ix]
                .attrs
                .adoption_status
                .unwrap_or(AdoptionStatus::Pending),
        )
    }

    /// All claim object IDs with a given adoption status.
    #[must_use]
    pub fn get_claims_by_adoption_status(&self, status: AdoptionStatus) -> Vec<String> {
        self.claim_nodes()
            .into_iter()
            .filter(|&ix| {
                self.graph[ix]
                    .attrs
                    .adoption_status
                    .unwrap_or(AdoptionStatus::Pending)
                    == status
            })
            .map(|ix| self.graph[ix].obj_id.clone())
            .collect()
    }

    /// Indices and adjacency of the CITES subgraph, in stable node order.
    fn cites_subgraph(&self) -> (Vec<NodeIndex>, Vec<BTreeSet<usize>>) {
        let nodes: Vec<NodeIndex> = self.graph.node_indices().collect();
        let position: HashMap<NodeIndex, usize> =
            nodes.iter().enumerate().map(|(i, &ix)| (ix, i)).collect();
        let mut adjacency = vec![BTreeSet::new(); nodes.len()];
        for edge in self.graph.edge_references() {
            if edge.weight().relation == RelationType::Cites {
                adjacency[position[&edge.source()]].insert(position[&edge.target()]);
            }
        }
        (nodes, adjacency)
    }

    /// Every simple cycle in the CITES subgraph, each exactly once, with a
    /// severity tier from the cycle length.
    #[must_use]
    pub fn detect_citation_loops(&self) -> Vec<CitationLoop> {
        let (nodes, adjacency) = self.cites_subgraph();
        simple_cycles(&adjacency)
            .into_iter()
            .map(|cycle| {
                let node_ids: Vec<String> = cycle
                    .iter()
                    .map(|&i| {
                        let data = &self.graph[nodes[i]];
                        Self::make_node_id(data.node_type, &data.obj_id)
                    })
                    .collect();
                CitationLoop {
                    length: cycle.len(),
                    severity: loop_severity(cycle.len()),
                    node_ids,
                }
            })
            .collect()
    }

    /// Unordered pairs with CITES edges in both directions.
    #[must_use]
    pub fn detect_round_trips(&self) -> Vec<RoundTrip> {
        let mut round_trips = Vec::new();
        let mut checked: HashSet<(NodeIndex, NodeIndex)> = HashSet::new();

        for edge in self.graph.edge_references() {
            if edge.weight().relation != RelationType::Cites {
                continue;
            }
            let (u, v) = (edge.source(), edge.target());
            if u == v {
                continue;
            }
            let pair = if u < v { (u, v) } else { (v, u) };
            if !checked.insert(pair) {
                continue;
            }
            let reverse_cites = self
                .graph
                .find_edge(v, u)
                .is_some_and(|e| self.graph[e].relation == RelationType::Cites);
            if reverse_cites {
                let a = &self.graph[u];
                let b = &self.graph[v];
                round_trips.push(RoundTrip {
                    node_a: Self::make_node_id(a.node_type, &a.obj_id),
                    node_b: Self::make_node_id(b.node_type, &b.obj_id),
                    severity: Severity::High,
                });
            }
        }
        round_trips
    }

    /// Direct self-citations plus same-domain citations (from the node
    /// `domain` attribute).
    #[must_use]
    pub fn detect_self_references(&self) -> Vec<SelfReference> {
        let mut self_refs = Vec::new();
        for edge in self.graph.edge_references() {
            if edge.weight().relation != RelationType::Cites {
                continue;
            }
            let (u, v) = (edge.source(), edge.target());
            let source = &self.graph[u];
            let target = &self.graph[v];

            if u == v {
                self_refs.push(SelfReference::Direct {
                    node_id: Self::make_node_id(source.node_type, &source.obj_id),
                });
                continue;
            }

            if let (Some(source_domain), Some(target_domain)) =
                (&source.attrs.domain, &target.attrs.domain)
            {
                if source_domain == target_domain {
                    self_refs.push(SelfReference::SameDomain {
                        source: Self::make_node_id(source.node_type, &source.obj_id),
                        target: Self::make_node_id(target.node_type, &target.obj_id),
                        domain: source_domain.clone(),
                    });
                }
            }
        }
        self_refs
    }

    /// Multiplicative credibility penalties per composite node ID, clamped
    /// to [0, 1]. 1.0 means no penalty.
    #[must_use]
    pub fn calculate_citation_penalties(&self) -> HashMap<String, f64> {
        let mut penalties: HashMap<String, f64> = self
            .graph
            .node_indices()
            .map(|ix| {
                let data = &self.graph[ix];
                (Self::make_node_id(data.node_type, &data.obj_id), 1.0)
            })
            .collect();

        let mut apply = |node_id: &str, factor: f64| {
            if let Some(p) = penalties.get_mut(node_id) {
                *p *= factor;
            }
        };

        for loop_info in self.detect_citation_loops() {
            let factor = match loop_info.severity {
                Severity::Critical => 0.2,
                Severity::High => 0.4,
                Severity::Medium => 0.6,
                Severity::Low => 0.8,
            };
            for node_id in &loop_info.node_ids {
                apply(node_id, factor);
            }
        }

        for rt in self.detect_round_trips() {
            apply(&rt.node_a, 0.3);
            apply(&rt.node_b, 0.3);
        }

        for sr in self.detect_self_references() {
            match &sr {
                SelfReference::Direct { node_id } => apply(node_id, 0.1),
                SelfReference::SameDomain { source, target, .. } => {
                    apply(source, 0.5);
                    apply(target, 0.6);
                }
            }
        }

        for penalty in penalties.values_mut() {
            *penalty = penalty.clamp(0.0, 1.0);
        }
        penalties
    }

    /// Full citation-integrity report: findings, penalties, and an
    /// aggregate score.
    #[must_use]
    pub fn get_citation_integrity_report(&self) -> IntegrityReport {
        let loops = self.detect_citation_loops();
        let round_trips = self.detect_round_trips();
        let self_references = self.detect_self_references();
        let penalties = self.calculate_citation_penalties();

        let total_citation_edges = self
            .graph
            .edge_references()
            .filter(|e| e.weight().relation == RelationType::Cites)
            .count();

        let mut problematic: HashSet<&str> = HashSet::new();
        for l in &loops {
            problematic.extend(l.node_ids.iter().map(String::as_str));
        }
        for rt in &round_trips {
            problematic.insert(&rt.node_a);
            problematic.insert(&rt.node_b);
        }
        for sr in &self_references {
            match sr {
                SelfReference::Direct { node_id } => {
                    problematic.insert(node_id);
                }
                SelfReference::SameDomain { source, .. } => {
                    problematic.insert(source);
                }
            }
        }

        let integrity_score = if total_citation_edges > 0 {
            (1.0 - problematic.len() as f64 / penalties.len().max(1) as f64).clamp(0.0, 1.0)
        } else {
            1.0
        };

        let mut penalized_nodes: Vec<(String, f64)> = penalties
            .into_iter()
            .filter(|(_, p)| *p < 0.9)
            .collect();
        penalized_nodes.sort_by(|a, b| a.1.total_cmp(&b.1));

        IntegrityReport {
            integrity_score: round3(integrity_score),
            total_citation_edges,
            problematic_node_count: problematic.len(),
            loops,
            round_trips,
            self_references,
            penalized_nodes,
        }
    }

    /// Fraction of PAGE nodes with no outgoing CITES edge to another PAGE.
    #[must_use]
    pub fn get_primary_source_ratio(&self) -> PrimarySourceRatio {
        let mut primary_count = 0usize;
        let mut secondary_count = 0usize;

        for ix in self.graph.node_indices() {
            if self.graph[ix].node_type != NodeType::Page {
                continue;
            }
            let cites_a_page = self
                .graph
                .edges_directed(ix, PetDirection::Outgoing)
                .any(|e| {
                    e.weight().relation == RelationType::Cites
                        && self.graph[e.target()].node_type == NodeType::Page
                });
            if cites_a_page {
                secondary_count += 1;
            } else {
                primary_count += 1;
            }
        }

        let total = primary_count + secondary_count;
        let primary_ratio = if total > 0 {
            primary_count as f64 / total as f64
        } else {
            0.0
        };
        PrimarySourceRatio {
            primary_count,
            secondary_count,
            total_pages: total,
            primary_ratio: round3(primary_ratio),
            meets_threshold: primary_ratio >= PRIMARY_SOURCE_THRESHOLD,
        }
    }

    /// Follow CITES edges from a node toward primary sources, one hop at a
    /// time, stopping at `max_depth` or the first revisit.
    #[must_use]
    pub fn get_citation_chain(
        &self,
        node_type: NodeType,
        obj_id: &str,
        max_depth: usize,
    ) -> Vec<ChainNode> {
        let start = Self::make_node_id(node_type, obj_id);
        let Some(&start_ix) = self.node_ids.get(&start) else {
            return Vec::new();
        };

        let mut chain = Vec::new();
        let mut visited: HashSet<NodeIndex> = HashSet::new();
        let mut current = Some(start_ix);
        let mut depth = 0usize;

        while let Some(ix) = current {
            if depth >= max_depth || !visited.insert(ix) {
                break;
            }
            let data = &self.graph[ix];
            chain.push(ChainNode {
                depth,
                node_type: data.node_type,
                obj_id: data.obj_id.clone(),
            });

            current = self
                .graph
                .edges_directed(ix, PetDirection::Outgoing)
                .find(|e| e.weight().relation == RelationType::Cites)
                .map(|e| e.target());
            depth += 1;
        }
        chain
    }

    /// Annotate a PAGE node with academic metadata and add PAGE-to-PAGE
    /// CITES edges for every citation whose target maps to a known page.
    /// Citations without a page mapping are skipped, not errored. Returns
    /// (edges created, citations skipped).
    pub fn add_academic_page_with_citations(
        &mut self,
        page_id: &str,
        paper: &Paper,
        citations: &[Citation],
        paper_to_page_map: Option<&HashMap<String, String>>,
    ) -> (usize, usize) {
        self.add_node(
            NodeType::Page,
            page_id,
            NodeAttributes {
                is_academic: true,
                doi: paper.doi.clone(),
                citation_count: Some(paper.citation_count),
                year: paper.year,
                venue: paper.venue.clone(),
                source_api: Some(paper.source_api.clone()),
                ..NodeAttributes::default()
            },
        );

        let empty = HashMap::new();
        let page_map = paper_to_page_map.unwrap_or(&empty);
        let mut created = 0usize;
        let mut skipped = 0usize;

        for citation in citations {
            let Some(cited_page_id) = page_map.get(&citation.cited_paper_id) else {
                debug!(
                    cited_paper_id = %citation.cited_paper_id,
                    page_id,
                    "skipping citation: cited paper has no page"
                );
                skipped += 1;
                continue;
            };

            self.add_edge(
                NodeType::Page,
                page_id,
                NodeType::Page,
                cited_page_id,
                RelationType::Cites,
                EdgeAttributes {
                    confidence: Some(1.0),
                    is_academic: true,
                    is_influential: citation.is_influential,
                    citation_context: citation.context.clone(),
                    ..EdgeAttributes::default()
                },
            );
            created += 1;
        }

        debug!(page_id, created, skipped, "added academic page with citations");
        (created, skipped)
    }

    /// Node and edge totals plus integrity metrics.
    #[must_use]
    pub fn get_stats(&self) -> GraphStats {
        let mut stats = GraphStats {
            total_nodes: self.graph.node_count(),
            total_edges: self.graph.edge_count(),
            claim_count: 0,
            fragment_count: 0,
            page_count: 0,
            supports_count: 0,
            refutes_count: 0,
            cites_count: 0,
            neutral_count: 0,
            citation_integrity_score: 0.0,
            citation_loop_count: 0,
            round_trip_count: 0,
        };
        for ix in self.graph.node_indices() {
            match self.graph[ix].node_type {
                NodeType::Claim => stats.claim_count += 1,
                NodeType::Fragment => stats.fragment_count += 1,
                NodeType::Page => stats.page_count += 1,
            }
        }
        for edge in self.graph.edge_references() {
            match edge.weight().relation {
                RelationType::Supports => stats.supports_count += 1,
                RelationType::Refutes => stats.refutes_count += 1,
                RelationType::Cites => stats.cites_count += 1,
                RelationType::Neutral => stats.neutral_count += 1,
            }
        }
        let integrity = self.get_citation_integrity_report();
        stats.citation_integrity_score = integrity.integrity_score;
        stats.citation_loop_count = integrity.loops.len();
        stats.round_trip_count = integrity.round_trips.len();
        stats
    }

    /// Persist every edge into the `edges` table (upsert on edge ID). All
    /// edges written by one call share a `cause_id`.
    pub fn save_to_db(&self, db: &Database) -> Result<()> {
        let cause_id = Uuid::new_v4().to_string();
        for edge in self.graph.edge_references() {
            let source = &self.graph[edge.source()];
            let target = &self.graph[edge.target()];
            let data = edge.weight();
            db.execute(
                "INSERT OR REPLACE INTO edges (
                    id, source_type, source_id, target_type, target_id, relation,
                    confidence, nli_label, nli_confidence,
                    is_academic, is_influential, citation_context, is_contradiction, cause_id
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                rusqlite::params![
                    data.edge_id,
                    source.node_type.as_str(),
                    source.obj_id,
                    target.node_type.as_str(),
                    target.obj_id,
                    data.relation.as_str(),
                    data.attrs.confidence,
                    data.attrs.nli_label,
                    data.attrs.nli_confidence,
                    data.attrs.is_academic as i64,
                    data.attrs.is_influential as i64,
                    data.attrs.citation_context,
                    data.attrs.is_contradiction as i64,
                    cause_id,
                ],
            )?;
        }
        info!(
            edge_count = self.graph.edge_count(),
            task_id = self.task_id.as_deref(),
            "evidence graph saved"
        );
        Ok(())
    }

    /// Rebuild the graph from the `edges` table, optionally filtered to
    /// edges touching claims of one task.
    pub fn load_from_db(&mut self, db: &Database, task_id: Option<&str>) -> Result<()> {
        let rows = match task_id {
            Some(task) => db.query_edges(
                "SELECT id, source_type, source_id, target_type, target_id, relation,
                        confidence, nli_label, nli_confidence,
                        is_academic, is_influential, citation_context, is_contradiction
                 FROM edges
                 WHERE (source_type = 'claim' AND source_id IN (SELECT id FROM claims WHERE task_id = ?1))
                    OR (target_type = 'claim' AND target_id IN (SELECT id FROM claims WHERE task_id = ?1))",
                rusqlite::params![task],
            )?,
            None => db.query_edges(
                "SELECT id, source_type, source_id, target_type, target_id, relation,
                        confidence, nli_label, nli_confidence,
                        is_academic, is_influential, citation_context, is_contradiction
                 FROM edges",
                rusqlite::params![],
            )?,
        };

        self.graph.clear();
        self.node_ids.clear();

        let count = rows.len();
        for row in rows {
            let (Some(source_type), Some(target_type), Some(relation)) = (
                NodeType::parse(&row.source_type),
                NodeType::parse(&row.target_type),
                RelationType::parse(&row.relation),
            ) else {
                warn!(edge_id = %row.id, "skipping edge with unknown type or relation");
                continue;
            };
            self.insert_edge(
                source_type,
                &row.source_id,
                target_type,
                &row.target_id,
                relation,
                EdgeAttributes {
                    confidence: row.confidence,
                    nli_label: row.nli_label,
                    nli_confidence: row.nli_confidence,
                    is_academic: row.is_academic,
                    is_influential: row.is_influential,
                    citation_context: row.citation_context,
                    is_contradiction: row.is_contradiction,
                },
                row.id,
            );
        }

        info!(edge_count = count, task_id, "evidence graph loaded");
        Ok(())
    }

    /// Export the graph as JSON (nodes, edges, stats) for debugging and
    /// report tooling.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let nodes: Vec<serde_json::Value> = self
            .graph
            .node_indices()
            .map(|ix| {
                let data = &self.graph[ix];
                serde_json::json!({
                    "id": Self::make_node_id(data.node_type, &data.obj_id),
                    "node_type": data.node_type.as_str(),
                    "obj_id": data.obj_id,
                    "attributes": data.attrs,
                })
            })
            .collect();
        let edges: Vec<serde_json::Value> = self
            .graph
            .edge_references()
            .map(|e| {
                let source = &self.graph[e.source()];
                let target = &self.graph[e.target()];
                serde_json::json!({
                    "edge_id": e.weight().edge_id,
                    "source": Self::make_node_id(source.node_type, &source.obj_id),
                    "target": Self::make_node_id(target.node_type, &target.obj_id),
                    "relation": e.weight().relation.as_str(),
                    "attributes": e.weight().attrs,
                })
            })
            .collect();
        serde_json::json!({ "nodes": nodes, "edges": edges })
    }

    /// Number of edges currently in the graph.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Number of nodes currently in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }
}

fn merged_edge_attrs(old: EdgeAttributes, new: EdgeAttributes) -> EdgeAttributes {
    EdgeAttributes {
        confidence: new.confidence.or(old.confidence),
        nli_label: new.nli_label.or(old.nli_label),
        nli_confidence: new.nli_confidence.or(old.nli_confidence),
        is_academic: new.is_academic || old.is_academic,
        is_influential: new.is_influential || old.is_influential,
        citation_context: new.citation_context.or(old.citation_context),
        is_contradiction: new.is_contradiction || old.is_contradiction,
    }
}

fn loop_severity(length: usize) -> Severity {
    match length {
        0..=2 => Severity::Critical,
        3 => Severity::High,
        4..=5 => Severity::Medium,
        _ => Severity::Low,
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Johnson-style enumeration of every simple cycle, each exactly once.
/// Self-loops are emitted as cycles of length 1.
fn simple_cycles(adjacency: &[BTreeSet<usize>]) -> Vec<Vec<usize>> {
    let n = adjacency.len();
    let mut cycles: Vec<Vec<usize>> = Vec::new();
    let mut adj: Vec<BTreeSet<usize>> = adjacency.to_vec();

    for v in 0..n {
        if adj[v].remove(&v) {
            cycles.push(vec![v]);
        }
    }

    let mut start = 0usize;
    while start < n {
        let sccs = strongly_connected(&adj, start);
        let Some(scc) = sccs
            .into_iter()
            .filter(|scc| scc.len() >= 2)
            .min_by_key(|scc| scc.iter().copied().min().unwrap_or(usize::MAX))
        else {
            break;
        };
        let scc_set: BTreeSet<usize> = scc.into_iter().collect();
        let s = match scc_set.iter().next() {
            Some(&s) => s,
            None => break,
        };

        let mut blocked = vec![false; n];
        let mut block_map: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
        let mut path: Vec<usize> = Vec::new();
        circuit(
            s,
            s,
            &adj,
            &scc_set,
            &mut blocked,
            &mut block_map,
            &mut path,
            &mut cycles,
        );
        start = s + 1;
    }
    cycles
}

#[allow(clippy::too_many_arguments)]
fn circuit(
    v: usize,
    s: usize,
    adj: &[BTreeSet<usize>],
    scc: &BTreeSet<usize>,
    blocked: &mut Vec<bool>,
    block_map: &mut Vec<BTreeSet<usize>>,
    path: &mut Vec<usize>,
    cycles: &mut Vec<Vec<usize>>,
) -> bool {
    let mut found = false;
    path.push(v);
    blocked[v] = true;

    let neighbors: Vec<usize> = adj[v].iter().copied().filter(|w| scc.contains(w)).collect();
    for w in neighbors {
        if w == s {
            cycles.push(path.clone());
            found = true;
        } else if !blocked[w] && circuit(w, s, adj, scc, blocked, block_map, path, cycles) {
            found = true;
        }
    }

    if found {
        unblock(v, blocked, block_map);
    } else {
        for &w in adj[v].iter().filter(|w| scc.contains(w)) {
            block_map[w].insert(v);
        }
    }

    path.pop();
    found
}

fn unblock(v: usize, blocked: &mut Vec<bool>, block_map: &mut Vec<BTreeSet<usize>>) {
    blocked[v] = false;
    let waiting = std::mem::take(&mut block_map[v]);
    for w in waiting {
        if blocked[w] {
            unblock(w, blocked, block_map);
        }
    }
}

/// Strongly connected components of the subgraph induced on vertices
/// `>= start`.
fn strongly_connected(adj: &[BTreeSet<usize>], start: usize) -> Vec<Vec<usize>> {
    let n = adj.len();
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let mut index_map: BTreeMap<usize, NodeIndex> = BTreeMap::new();
    for v in start..n {
        index_map.insert(v, graph.add_node(v));
    }
    for v in start..n {
        for &w in adj[v].iter().filter(|&&w| w >= start) {
            graph.add_edge(index_map[&v], index_map[&w], ());
        }
    }
    petgraph::algo::tarjan_scc(&graph)
        .into_iter()
        .map(|scc| scc.into_iter().map(|ix| graph[ix]).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cites() -> EdgeAttributes {
        EdgeAttributes {
            confidence: Some(1.0),
            is_academic: true,
            ..EdgeAttributes::default()
        }
    }

    fn support(confidence: f64) -> EdgeAttributes {
        EdgeAttributes {
            confidence: Some(confidence),
            ..EdgeAttributes::default()
        }
    }

    fn graph() -> EvidenceGraph {
        EvidenceGraph::new(Some("task_1".to_string()))
    }

    #[test]
    fn add_node_twice_merges_attributes() {
        let mut g = graph();
        let id = g.add_node(
            NodeType::Page,
            "p1",
            NodeAttributes {
                domain: Some("example.org".to_string()),
                ..NodeAttributes::default()
            },
        );
        let id2 = g.add_node(
            NodeType::Page,
            "p1",
            NodeAttributes {
                is_academic: true,
                ..NodeAttributes::default()
            },
        );
        assert_eq!(id, id2);
        assert_eq!(g.node_count(), 1);
        let export = g.to_json();
        let node = &export["nodes"][0];
        assert_eq!(node["attributes"]["is_academic"], true);
        assert_eq!(node["attributes"]["domain"], "example.org");
    }

    #[test]
    fn add_edge_creates_missing_endpoints() {
        let mut g = graph();
        g.add_edge(
            NodeType::Fragment,
            "f1",
            NodeType::Claim,
            "c1",
            RelationType::Supports,
            support(0.8),
        );
        assert_eq!(g.node_count(), 2);
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn supporting_and_refuting_evidence_retrieval() {
        let mut g = graph();
        g.add_edge(NodeType::Fragment, "f1", NodeType::Claim, "c1", RelationType::Supports, support(0.9));
        g.add_edge(NodeType::Fragment, "f2", NodeType::Claim, "c1", RelationType::Refutes, support(0.7));
        g.add_edge(NodeType::Page, "p1", NodeType::Claim, "c1", RelationType::Neutral, support(0.5));

        let supports = g.get_supporting_evidence("c1");
        assert_eq!(supports.len(), 1);
        assert_eq!(supports[0].obj_id, "f1");
        assert_eq!(supports[0].confidence, Some(0.9));

        let refutes = g.get_refuting_evidence("c1");
        assert_eq!(refutes.len(), 1);
        assert_eq!(refutes[0].obj_id, "f2");

        let all = g.get_all_evidence("c1");
        assert_eq!(all.supports.len(), 1);
        assert_eq!(all.refutes.len(), 1);
        assert_eq!(all.neutral.len(), 1);
    }

    #[test]
    fn unknown_claim_has_no_evidence() {
        let g = graph();
        assert!(g.get_supporting_evidence("missing").is_empty());
        assert_eq!(g.calculate_claim_confidence("missing").verdict, Verdict::Unverified);
    }

    #[test]
    fn confidence_unverified_without_evidence() {
        let mut g = graph();
        g.add_node(NodeType::Claim, "c1", NodeAttributes::default());
        let result = g.calculate_claim_confidence("c1");
        assert_eq!(result.verdict, Verdict::Unverified);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn confidence_supported_with_one_support() {
        let mut g = graph();
        g.add_edge(NodeType::Fragment, "f1", NodeType::Claim, "c1", RelationType::Supports, support(0.8));
        let result = g.calculate_claim_confidence("c1");
        assert_eq!(result.verdict, Verdict::Supported);
        assert_eq!(result.confidence, 0.8);
    }

    #[test]
    fn confidence_well_supported_with_three_supports() {
        let mut g = graph();
        for (i, c) in [0.8, 0.9, 1.0].iter().enumerate() {
            g.add_edge(
                NodeType::Fragment,
                &format!("f{i}"),
                NodeType::Claim,
                "c1",
                RelationType::Supports,
                support(*c),
            );
        }
        let result = g.calculate_claim_confidence("c1");
        assert_eq!(result.verdict, Verdict::WellSupported);
        assert_eq!(result.confidence, round3((0.9f64 * 1.1).min(1.0)));
        assert_eq!(result.supporting_count, 3);
    }

    #[test]
    fn confidence_contested_and_likely_false() {
        let mut g = graph();
        g.add_edge(NodeType::Fragment, "f1", NodeType::Claim, "c1", RelationType::Supports, support(0.8));
        g.add_edge(NodeType::Fragment, "f2", NodeType::Claim, "c1", RelationType::Supports, support(0.8));
        g.add_edge(NodeType::Fragment, "f3", NodeType::Claim, "c1", RelationType::Refutes, support(0.9));
        let result = g.calculate_claim_confidence("c1");
        assert_eq!(result.verdict, Verdict::Contested);
        assert_eq!(result.confidence, round3(0.8 * (2.0 / 4.0)));

        let mut g2 = graph();
        g2.add_edge(NodeType::Fragment, "f1", NodeType::Claim, "c1", RelationType::Supports, support(0.8));
        g2.add_edge(NodeType::Fragment, "f2", NodeType::Claim, "c1", RelationType::Refutes, support(0.9));
        assert_eq!(g2.calculate_claim_confidence("c1").verdict, Verdict::LikelyFalse);
    }

    #[test]
    fn independent_sources_count_distinct_pages() {
        let mut g = graph();
        g.add_edge(NodeType::Page, "p1", NodeType::Claim, "c1", RelationType::Supports, support(0.8));
        g.add_edge(NodeType::Page, "p2", NodeType::Claim, "c1", RelationType::Neutral, support(0.5));
        g.add_edge(NodeType::Fragment, "f1", NodeType::Claim, "c1", RelationType::Supports, support(0.9));
        let result = g.calculate_claim_confidence("c1");
        assert_eq!(result.independent_sources, 2);
    }

    #[test]
    fn contradictions_found_and_marked() {
        let mut g = graph();
        g.add_edge(NodeType::Claim, "c1", NodeType::Claim, "c2", RelationType::Refutes, support(0.9));
        g.add_edge(NodeType::Claim, "c2", NodeType::Claim, "c1", RelationType::Refutes, support(0.7));

        let contradictions = g.find_contradictions();
        assert_eq!(contradictions.len(), 1);
        assert_eq!(contradictions[0].confidence, 0.9);

        let marked = g.mark_contradictions();
        assert_eq!(marked, 1);
        assert_eq!(g.get_contradiction_edges().len(), 2);
    }

    #[test]
    fn citation_loop_detection_with_severities() {
        let mut g = graph();
        // Two-node loop: p1 -> p2 -> p1
        g.add_edge(NodeType::Page, "p1", NodeType::Page, "p2", RelationType::Cites, cites());
        g.add_edge(NodeType::Page, "p2", NodeType::Page, "p1", RelationType::Cites, cites());
        // Three-node loop: p3 -> p4 -> p5 -> p3
        g.add_edge(NodeType::Page, "p3", NodeType::Page, "p4", RelationType::Cites, cites());
        g.add_edge(NodeType::Page, "p4", NodeType::Page, "p5", RelationType::Cites, cites());
        g.add_edge(NodeType::Page, "p5", NodeType::Page, "p3", RelationType::Cites, cites());

        let mut loops = g.detect_citation_loops();
        loops.sort_by_key(|l| l.length);
        assert_eq!(loops.len(), 2);
        assert_eq!(loops[0].length, 2);
        assert_eq!(loops[0].severity, Severity::Critical);
        assert_eq!(loops[1].length, 3);
        assert_eq!(loops[1].severity, Severity::High);
    }

    #[test]
    fn every_simple_cycle_detected_exactly_once() {
        let mut g = graph();
        // Diamond with a back edge: two distinct cycles through p1.
        g.add_edge(NodeType::Page, "p1", NodeType::Page, "p2", RelationType::Cites, cites());
        g.add_edge(NodeType::Page, "p2", NodeType::Page, "p3", RelationType::Cites, cites());
        g.add_edge(NodeType::Page, "p3", NodeType::Page, "p1", RelationType::Cites, cites());
        g.add_edge(NodeType::Page, "p2", NodeType::Page, "p1", RelationType::Cites, cites());

        let loops = g.detect_citation_loops();
        assert_eq!(loops.len(), 2);
        let mut lengths: Vec<usize> = loops.iter().map(|l| l.length).collect();
        lengths.sort_unstable();
        assert_eq!(lengths, vec![2, 3]);

        // Each cycle appears once: no two loops share the same node set.
        let sets: Vec<BTreeSet<&str>> = loops
            .iter()
            .map(|l| l.node_ids.iter().map(String::as_str).collect())
            .collect();
        assert_ne!(sets[0], sets[1]);
    }

    #[test]
    fn non_cites_edges_do_not_create_loops() {
        let mut g = graph();
        g.add_edge(NodeType::Claim, "c1", NodeType::Claim, "c2", RelationType::Refutes, support(0.5));
        g.add_edge(NodeType::Claim, "c2", NodeType::Claim, "c1", RelationType::Refutes, support(0.5));
        assert!(g.detect_citation_loops().is_empty());
    }

    #[test]
    fn round_trips_detected_once_per_pair() {
        let mut g = graph();
        g.add_edge(NodeType::Page, "p1", NodeType::Page, "p2", RelationType::Cites, cites());
        g.add_edge(NodeType::Page, "p2", NodeType::Page, "p1", RelationType::Cites, cites());
        let round_trips = g.detect_round_trips();
        assert_eq!(round_trips.len(), 1);
        assert_eq!(round_trips[0].severity, Severity::High);
    }

    #[test]
    fn self_references_direct_and_same_domain() {
        let mut g = graph();
        g.add_edge(NodeType::Page, "p1", NodeType::Page, "p1", RelationType::Cites, cites());
        g.add_node(
            NodeType::Page,
            "p2",
            NodeAttributes { domain: Some("example.org".to_string()), ..NodeAttributes::default() },
        );
        g.add_node(
            NodeType::Page,
            "p3",
            NodeAttributes { domain: Some("example.org".to_string()), ..NodeAttributes::default() },
        );
        g.add_edge(NodeType::Page, "p2", NodeType::Page, "p3", RelationType::Cites, cites());

        let self_refs = g.detect_self_references();
        assert_eq!(self_refs.len(), 2);
        assert!(self_refs.iter().any(|s| matches!(s, SelfReference::Direct { node_id } if node_id == "page:p1")));
        assert!(self_refs.iter().any(|s| matches!(
            s,
            SelfReference::SameDomain { domain, .. } if domain == "example.org"
        )));
    }

    #[test]
    fn penalties_compose_and_clamp() {
        let mut g = graph();
        // p1 is in a 2-node loop (x0.2 each member) and a round trip (x0.3)
        g.add_edge(NodeType::Page, "p1", NodeType::Page, "p2", RelationType::Cites, cites());
        g.add_edge(NodeType::Page, "p2", NodeType::Page, "p1", RelationType::Cites, cites());

        let penalties = g.calculate_citation_penalties();
        let p1 = penalties["page:p1"];
        assert!((p1 - 0.2 * 0.3).abs() < 1e-9);
        assert!((0.0..=1.0).contains(&p1));
    }

    #[test]
    fn direct_self_reference_penalty() {
        let mut g = graph();
        g.add_edge(NodeType::Page, "p1", NodeType::Page, "p1", RelationType::Cites, cites());
        let penalties = g.calculate_citation_penalties();
        // Self-loop cycle (critical, x0.2) plus direct self-reference (x0.1)
        assert!((penalties["page:p1"] - 0.2 * 0.1).abs() < 1e-9);
    }

    #[test]
    fn same_domain_penalties_are_asymmetric() {
        let mut g = graph();
        g.add_node(
            NodeType::Page,
            "p1",
            NodeAttributes { domain: Some("example.org".to_string()), ..NodeAttributes::default() },
        );
        g.add_node(
            NodeType::Page,
            "p2",
            NodeAttributes { domain: Some("example.org".to_string()), ..NodeAttributes::default() },
        );
        g.add_edge(NodeType::Page, "p1", NodeType::Page, "p2", RelationType::Cites, cites());
        let penalties = g.calculate_citation_penalties();
        assert!((penalties["page:p1"] - 0.5).abs() < 1e-9);
        assert!((penalties["page:p2"] - 0.6).abs() < 1e-9);
    }

    #[test]
    fn primary_source_ratio_threshold() {
        let mut g = graph();
        // p1 cites p2: p1 secondary, p2 primary
        g.add_edge(NodeType::Page, "p1", NodeType::Page, "p2", RelationType::Cites, cites());
        g.add_node(NodeType::Page, "p3", NodeAttributes::default());
        g.add_node(NodeType::Page, "p4", NodeAttributes::default());

        let ratio = g.get_primary_source_ratio();
        assert_eq!(ratio.total_pages, 4);
        assert_eq!(ratio.secondary_count, 1);
        assert_eq!(ratio.primary_count, 3);
        assert!(ratio.meets_threshold);
    }

    #[test]
    fn citation_chain_follows_cites_edges() {
        let mut g = graph();
        g.add_edge(NodeType::Fragment, "f1", NodeType::Page, "p1", RelationType::Cites, cites());
        g.add_edge(NodeType::Page, "p1", NodeType::Page, "p2", RelationType::Cites, cites());

        let chain = g.get_citation_chain(NodeType::Fragment, "f1", 5);
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[0].depth, 0);
        assert_eq!(chain[2].obj_id, "p2");

        let capped = g.get_citation_chain(NodeType::Fragment, "f1", 2);
        assert_eq!(capped.len(), 2);
    }

    #[test]
    fn academic_page_with_citations_skips_unmapped_targets() {
        let mut g = graph();
        let mut paper = Paper::new("s2:abc", "Title", "semantic_scholar");
        paper.doi = Some("10.1234/x".to_string());
        paper.citation_count = 42;

        let citations = vec![
            Citation {
                citing_paper_id: "s2:abc".to_string(),
                cited_paper_id: "s2:known".to_string(),
                is_influential: true,
                context: Some("as shown in".to_string()),
            },
            Citation {
                citing_paper_id: "s2:abc".to_string(),
                cited_paper_id: "s2:unknown".to_string(),
                is_influential: false,
                context: None,
            },
        ];
        let mut page_map = HashMap::new();
        page_map.insert("s2:known".to_string(), "pg_2".to_string());

        let (created, skipped) =
            g.add_academic_page_with_citations("pg_1", &paper, &citations, Some(&page_map));
        assert_eq!(created, 1);
        assert_eq!(skipped, 1);

        let export = g.to_json();
        let edges = export["edges"].as_array().unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0]["attributes"]["is_academic"], true);
        assert_eq!(edges[0]["attributes"]["is_influential"], true);
        assert_eq!(edges[0]["target"], "page:pg_2");
    }

    #[test]
    fn adoption_status_lifecycle() {
        let mut g = graph();
        g.add_node(NodeType::Claim, "c1", NodeAttributes::default());
        assert_eq!(g.get_claim_adoption_status("c1"), Some(AdoptionStatus::Pending));
        g.set_claim_adoption_status("c1", AdoptionStatus::Adopted);
        assert_eq!(g.get_claim_adoption_status("c1"), Some(AdoptionStatus::Adopted));
        assert_eq!(g.get_claims_by_adoption_status(AdoptionStatus::Adopted), vec!["c1"]);
        assert_eq!(g.get_claim_adoption_status("missing"), None);
    }

    #[test]
    fn integrity_report_scores_clean_graph_as_one() {
        let mut g = graph();
        g.add_edge(NodeType::Page, "p1", NodeType::Page, "p2", RelationType::Cites, cites());
        let report = g.get_citation_integrity_report();
        assert_eq!(report.integrity_score, 1.0);
        assert_eq!(report.total_citation_edges, 1);
        assert!(report.loops.is_empty());
    }

    #[test]
    fn stats_count_nodes_edges_and_loops() {
        let mut g = graph();
        g.add_edge(NodeType::Fragment, "f1", NodeType::Claim, "c1", RelationType::Supports, support(0.8));
        g.add_edge(NodeType::Page, "p1", NodeType::Page, "p2", RelationType::Cites, cites());
        g.add_edge(NodeType::Page, "p2", NodeType::Page, "p1", RelationType::Cites, cites());

        let stats = g.get_stats();
        assert_eq!(stats.total_nodes, 4);
        assert_eq!(stats.total_edges, 3);
        assert_eq!(stats.claim_count, 1);
        assert_eq!(stats.fragment_count, 1);
        assert_eq!(stats.page_count, 2);
        assert_eq!(stats.supports_count, 1);
        assert_eq!(stats.cites_count, 2);
        assert_eq!(stats.citation_loop_count, 1);
        assert_eq!(stats.round_trip_count, 1);
    }
}
