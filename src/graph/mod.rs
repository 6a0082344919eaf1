//! Knowledge graph over memory content (spec §4.I): entity extraction,
//! similarity edges, Leiden clustering, and persistence into
//! `graph_nodes`/`graph_edges`/`graph_clusters`/`cluster_members`.

pub mod leiden;

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rusqlite::{params, OptionalExtension};

use crate::config::GraphConfig;
use crate::error::{sanitize, ErrorKind, Result};
use crate::search::hybrid::content_preview;
use crate::search::vector::{sparse_cosine, top_terms, TfIdfVectorizer};
use crate::store::{ListFilters, Memory, SortBy, Store};

/// Lexemes that tip an edge's classification toward `DependsOn` rather
/// than the default `RelatedTo` (spec §4.I edge kinds).
const DEPENDENCY_LEXEMES: &[&str] =
    &["depends on", "requires", "blocked by", "blocks", "needs", "prerequisite"];

fn has_dependency_lexeme(text: &str) -> bool {
    let lower = text.to_lowercase();
    DEPENDENCY_LEXEMES.iter().any(|lexeme| lower.contains(lexeme))
}

/// How two memories ended up connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Similar,
    DependsOn,
    RelatedTo,
}

impl EdgeKind {
    fn as_str(self) -> &'static str {
        match self {
            EdgeKind::Similar => "similar",
            EdgeKind::DependsOn => "depends-on",
            EdgeKind::RelatedTo => "related-to",
        }
    }
}

type Edge = (i64, i64, f64, EdgeKind, Vec<String>);

/// Snapshot counts after a build or for an already-persisted graph.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub cluster_count: usize,
}

/// One stored cluster's metadata.
#[derive(Debug, Clone)]
pub struct ClusterSummary {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub member_count: usize,
    pub avg_importance: f64,
    pub parent_cluster_id: Option<i64>,
    pub depth: u8,
}

/// A community detected at some recursion depth, possibly subdivided
/// further. Built entirely in memory before anything touches the
/// database (spec §4.I hierarchical subdivision).
struct ClusterPlan {
    members: Vec<i64>,
    children: Vec<ClusterPlan>,
}

fn count_clusters(plans: &[ClusterPlan]) -> usize {
    plans.iter().map(|p| 1 + count_clusters(&p.children)).sum()
}

fn induced_subgraph(graph: &UnGraph<i64, f64>, keep: &HashSet<NodeIndex>) -> UnGraph<i64, f64> {
    let mut sub = UnGraph::new_undirected();
    let mut mapping: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    for &idx in keep {
        mapping.insert(idx, sub.add_node(graph[idx]));
    }
    for edge in graph.edge_references() {
        let (a, b) = (edge.source(), edge.target());
        if let (Some(&na), Some(&nb)) = (mapping.get(&a), mapping.get(&b)) {
            sub.add_edge(na, nb, *edge.weight());
        }
    }
    sub
}

fn build_cluster_tree(
    memory_ids: &[i64],
    graph: &UnGraph<i64, f64>,
    node_index: &HashMap<i64, NodeIndex>,
    depth: u8,
    config: &GraphConfig,
) -> Vec<ClusterPlan> {
    if memory_ids.len() < 2 {
        return vec![ClusterPlan { members: memory_ids.to_vec(), children: Vec::new() }];
    }
    let keep: HashSet<NodeIndex> = memory_ids.iter().filter_map(|id| node_index.get(id).copied()).collect();
    let sub = induced_subgraph(graph, &keep);
    let seed = config.leiden_seed.wrapping_add(depth as u64);
    let communities = leiden::detect_communities(&sub, seed);

    let mut groups: HashMap<usize, Vec<i64>> = HashMap::new();
    for (node_idx, community) in &communities {
        groups.entry(*community).or_default().push(sub[*node_idx]);
    }

    groups
        .into_values()
        .map(|members| {
            if members.len() >= config.hierarchical_subdivision_min_members
                && depth + 1 < config.max_depth
            {
                let children = build_cluster_tree(&members, graph, node_index, depth + 1, config);
                ClusterPlan { members, children }
            } else {
                ClusterPlan { members, children: Vec::new() }
            }
        })
        .collect()
}

fn cluster_name(members: &[i64], entities: &HashMap<i64, Vec<String>>) -> String {
    let mut freq: HashMap<&str, usize> = HashMap::new();
    for id in members {
        if let Some(terms) = entities.get(id) {
            for term in terms {
                *freq.entry(term.as_str()).or_insert(0) += 1;
            }
        }
    }
    let mut ranked: Vec<(&str, usize)> = freq.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    let top: Vec<&str> = ranked.into_iter().take(3).map(|(t, _)| t).collect();
    if top.is_empty() {
        "untitled cluster".to_string()
    } else {
        top.join(" & ")
    }
}

fn cluster_description(members: &[&Memory]) -> Option<String> {
    if members.is_empty() {
        return None;
    }
    let mut tag_freq: HashMap<&str, usize> = HashMap::new();
    for m in members {
        for tag in &m.tags {
            *tag_freq.entry(tag.as_str()).or_insert(0) += 1;
        }
    }
    let mut ranked_tags: Vec<(&str, usize)> = tag_freq.into_iter().collect();
    ranked_tags.sort_by(|a, b| b.1.cmp(&a.1));
    let top_tags: Vec<&str> = ranked_tags.into_iter().take(5).map(|(t, _)| t).collect();

    let earliest = members.iter().map(|m| m.created_at).min().unwrap();
    let latest = members.iter().map(|m| m.created_at).max().unwrap();
    let representative =
        members.iter().max_by_key(|m| m.importance).map(|m| content_preview(&m.content, 160)).unwrap_or_default();

    Some(format!(
        "{} memories, tags: [{}], spans {} to {}. Example: {}",
        members.len(),
        top_tags.join(", "),
        earliest.date_naive(),
        latest.date_naive(),
        representative,
    ))
}

fn persist_plan(
    conn: &rusqlite::Connection,
    profile: &str,
    plan: &ClusterPlan,
    parent_id: Option<i64>,
    depth: u8,
    entities: &HashMap<i64, Vec<String>>,
    memory_by_id: &HashMap<i64, Memory>,
) -> rusqlite::Result<()> {
    let members: Vec<&Memory> = plan.members.iter().filter_map(|id| memory_by_id.get(id)).collect();
    let name = cluster_name(&plan.members, entities);
    let description = cluster_description(&members);
    let avg_importance = if members.is_empty() {
        0.0
    } else {
        members.iter().map(|m| m.importance as f64).sum::<f64>() / members.len() as f64
    };

    conn.execute(
        "INSERT INTO graph_clusters (profile, name, description, member_count, avg_importance, parent_cluster_id, depth)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![profile, name, description, plan.members.len() as i64, avg_importance, parent_id, depth as i64],
    )?;
    let cluster_id = conn.last_insert_rowid();
    for memory_id in &plan.members {
        conn.execute(
            "INSERT INTO cluster_members (cluster_id, memory_id) VALUES (?1, ?2)",
            params![cluster_id, memory_id],
        )?;
    }
    for child in &plan.children {
        persist_plan(conn, profile, child, Some(cluster_id), depth + 1, entities, memory_by_id)?;
    }
    Ok(())
}

/// Entity extraction + similarity graph + Leiden clustering over one
/// profile's memories, persisted to the store (spec §4.I).
pub struct GraphEngine {
    config: GraphConfig,
    pending_edges: Mutex<HashMap<String, usize>>,
}

impl GraphEngine {
    pub fn new(config: GraphConfig) -> Self {
        Self { config, pending_edges: Mutex::new(HashMap::new()) }
    }

    /// Full rebuild: fetch every memory in the profile (scale-guarded to
    /// `sample_cap`), extract entities, build the similarity graph,
    /// detect communities (with hierarchical subdivision), and persist
    /// the whole thing, replacing anything previously stored.
    pub fn build(&self, store: &Store, profile: &str, min_sim: Option<f64>) -> Result<GraphStats> {
        let threshold = min_sim.unwrap_or(self.config.edge_weight_threshold);
        let filters = ListFilters::default();
        let mut memories = store.list(profile, &filters, SortBy::CreatedAtDesc, i64::MAX as usize, 0)?;

        if memories.len() > self.config.sample_cap {
            let total = memories.len();
            let mut rng = ChaCha8Rng::seed_from_u64(self.config.leiden_seed);
            memories.shuffle(&mut rng);
            memories.truncate(self.config.sample_cap);
            tracing::warn!(total, cap = self.config.sample_cap, "graph build sampled down to the scale cap");
        }

        let mut vectorizer = TfIdfVectorizer::new();
        vectorizer.rebuild(memories.iter().map(|m| m.content.as_str()));

        let mut entities: HashMap<i64, Vec<String>> = HashMap::new();
        let mut vectors: HashMap<i64, HashMap<String, f32>> = HashMap::new();
        for memory in &memories {
            let sparse = vectorizer.sparse_vectorize(&memory.content);
            let top = top_terms(&sparse, self.config.entity_top_k, self.config.entity_weight_floor as f32);
            entities.insert(memory.id, top);
            vectors.insert(memory.id, sparse);
        }

        let mut graph: UnGraph<i64, f64> = UnGraph::new_undirected();
        let mut node_index: HashMap<i64, NodeIndex> = HashMap::new();
        for memory in &memories {
            node_index.insert(memory.id, graph.add_node(memory.id));
        }

        let ids: Vec<i64> = memories.iter().map(|m| m.id).collect();
        let contents: HashMap<i64, &str> = memories.iter().map(|m| (m.id, m.content.as_str())).collect();

        let mut edges: Vec<Edge> = Vec::new();
        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                let (a, b) = (ids[i], ids[j]);
                let sim = sparse_cosine(&vectors[&a], &vectors[&b]) as f64;
                if sim < threshold {
                    continue;
                }
                let (source, target) = if a < b { (a, b) } else { (b, a) };
                let shared = shared_entities(&entities[&a], &entities[&b], self.config.max_shared_entities);
                let kind = if sim > self.config.similar_kind_threshold {
                    EdgeKind::Similar
                } else if has_dependency_lexeme(contents[&a]) || has_dependency_lexeme(contents[&b]) {
                    EdgeKind::DependsOn
                } else {
                    EdgeKind::RelatedTo
                };
                graph.add_edge(node_index[&source], node_index[&target], sim);
                edges.push((source, target, sim, kind, shared));
            }
        }

        let tree = build_cluster_tree(&ids, &graph, &node_index, 0, &self.config);
        let stats = GraphStats { node_count: ids.len(), edge_count: edges.len(), cluster_count: count_clusters(&tree) };
        let memory_by_id: HashMap<i64, Memory> = memories.into_iter().map(|m| (m.id, m)).collect();

        self.persist(store, profile, ids, entities, vectors, edges, tree, memory_by_id)?;
        self.pending_edges.lock().unwrap().insert(profile.to_string(), 0);
        Ok(stats)
    }

    #[allow(clippy::too_many_arguments)]
    fn persist(
        &self,
        store: &Store,
        profile: &str,
        ids: Vec<i64>,
        entities: HashMap<i64, Vec<String>>,
        vectors: HashMap<i64, HashMap<String, f32>>,
        edges: Vec<Edge>,
        tree: Vec<ClusterPlan>,
        memory_by_id: HashMap<i64, Memory>,
    ) -> Result<()> {
        let profile = profile.to_string();
        store.with_writer(move |conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "DELETE FROM cluster_members WHERE cluster_id IN (SELECT id FROM graph_clusters WHERE profile = ?1)",
                params![profile],
            )?;
            tx.execute("DELETE FROM graph_clusters WHERE profile = ?1", params![profile])?;
            tx.execute("DELETE FROM graph_edges WHERE profile = ?1", params![profile])?;
            tx.execute("DELETE FROM graph_nodes WHERE profile = ?1", params![profile])?;

            let now = chrono::Utc::now().to_rfc3339();
            for id in &ids {
                let entities_json =
                    serde_json::to_string(entities.get(id).map(Vec::as_slice).unwrap_or(&[])).unwrap_or_else(|_| "[]".into());
                let vector_blob = vectors.get(id).and_then(|v| serde_json::to_vec(v).ok()).unwrap_or_default();
                tx.execute(
                    "INSERT INTO graph_nodes (memory_id, profile, entities_json, vector_blob, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![id, profile, entities_json, vector_blob, now],
                )?;
            }
            for (source, target, weight, kind, shared) in &edges {
                let shared_json = serde_json::to_string(shared).unwrap_or_else(|_| "[]".into());
                tx.execute(
                    "INSERT INTO graph_edges (source_id, target_id, profile, weight, kind, shared_entities_json)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![source, target, profile, weight, kind.as_str(), shared_json],
                )?;
            }
            for plan in &tree {
                persist_plan(&tx, &profile, plan, None, 0, &entities, &memory_by_id)?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Incrementally fold one new memory into an already-built graph:
    /// compute its entities/vector, compare against every existing node
    /// in the profile, add edges above threshold, and attach to
    /// whichever existing cluster it connects to most. Reclustering is
    /// deferred — this returns `true` once enough edges have
    /// accumulated since the last full `build` that a rebuild is due.
    pub fn index_memory(&self, store: &Store, profile: &str, memory_id: i64, content: &str) -> Result<bool> {
        let filters = ListFilters::default();
        let memories = store.list(profile, &filters, SortBy::CreatedAtDesc, i64::MAX as usize, 0)?;
        let mut vectorizer = TfIdfVectorizer::new();
        vectorizer.rebuild(memories.iter().map(|m| m.content.as_str()));

        let sparse = vectorizer.sparse_vectorize(content);
        let entities = top_terms(&sparse, self.config.entity_top_k, self.config.entity_weight_floor as f32);

        let existing = {
            let conn = store.reader()?;
            let mut stmt = conn
                .prepare("SELECT memory_id, entities_json, vector_blob FROM graph_nodes WHERE profile = ?1 AND memory_id != ?2")
                .map_err(|e| ErrorKind::Internal(sanitize(e.to_string())))?;
            let rows = stmt
                .query_map(params![profile, memory_id], |row| {
                    let id: i64 = row.get(0)?;
                    let entities_json: String = row.get(1)?;
                    let vector_blob: Vec<u8> = row.get(2)?;
                    Ok((id, entities_json, vector_blob))
                })
                .map_err(|e| ErrorKind::Internal(sanitize(e.to_string())))?;
            let mut out = Vec::new();
            for row in rows {
                let (id, entities_json, blob) = row.map_err(|e| ErrorKind::Internal(sanitize(e.to_string())))?;
                let other_entities: Vec<String> = serde_json::from_str(&entities_json).unwrap_or_default();
                let other_vector: HashMap<String, f32> = serde_json::from_slice(&blob).unwrap_or_default();
                out.push((id, other_entities, other_vector));
            }
            out
        };

        let threshold = self.config.edge_weight_threshold;
        let mut new_edges: Vec<Edge> = Vec::new();
        for (other_id, other_entities, other_vector) in &existing {
            let sim = sparse_cosine(&sparse, other_vector) as f64;
            if sim < threshold {
                continue;
            }
            let (source, target) = if memory_id < *other_id { (memory_id, *other_id) } else { (*other_id, memory_id) };
            let shared = shared_entities(&entities, other_entities, self.config.max_shared_entities);
            let kind = if sim > self.config.similar_kind_threshold {
                EdgeKind::Similar
            } else if has_dependency_lexeme(content) {
                EdgeKind::DependsOn
            } else {
                EdgeKind::RelatedTo
            };
            new_edges.push((source, target, sim, kind, shared));
        }

        let attach_cluster = self.most_connected_cluster(store, profile, memory_id, &new_edges)?;
        let edge_count = new_edges.len();

        let profile_owned = profile.to_string();
        let entities_json = serde_json::to_string(&entities).unwrap_or_else(|_| "[]".into());
        let vector_blob = serde_json::to_vec(&sparse).unwrap_or_default();
        let now = chrono::Utc::now().to_rfc3339();

        store.with_writer(move |conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT OR REPLACE INTO graph_nodes (memory_id, profile, entities_json, vector_blob, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![memory_id, profile_owned, entities_json, vector_blob, now],
            )?;
            for (source, target, weight, kind, shared) in &new_edges {
                let shared_json = serde_json::to_string(shared).unwrap_or_else(|_| "[]".into());
                tx.execute(
                    "INSERT OR REPLACE INTO graph_edges (source_id, target_id, profile, weight, kind, shared_entities_json)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![source, target, profile_owned, weight, kind.as_str(), shared_json],
                )?;
            }
            if let Some(cluster_id) = attach_cluster {
                tx.execute(
                    "INSERT OR IGNORE INTO cluster_members (cluster_id, memory_id) VALUES (?1, ?2)",
                    params![cluster_id, memory_id],
                )?;
                tx.execute(
                    "UPDATE graph_clusters SET member_count = member_count + 1 WHERE id = ?1",
                    params![cluster_id],
                )?;
            }
            tx.commit()?;
            Ok(())
        })?;

        let mut pending = self.pending_edges.lock().unwrap();
        let counter = pending.entry(profile.to_string()).or_insert(0);
        *counter += edge_count;
        Ok(*counter >= self.config.incremental_rebuild_edge_threshold)
    }

    fn most_connected_cluster(
        &self,
        store: &Store,
        profile: &str,
        new_id: i64,
        edges: &[Edge],
    ) -> Result<Option<i64>> {
        if edges.is_empty() {
            return Ok(None);
        }
        let conn = store.reader()?;
        let mut stmt = conn
            .prepare(
                "SELECT cm.cluster_id FROM cluster_members cm
                 JOIN graph_clusters gc ON gc.id = cm.cluster_id
                 WHERE cm.memory_id = ?1 AND gc.profile = ?2",
            )
            .map_err(|e| ErrorKind::Internal(sanitize(e.to_string())))?;
        let mut counts: HashMap<i64, usize> = HashMap::new();
        for (source, target, ..) in edges {
            let neighbor = if *source == new_id { *target } else { *source };
            let rows = stmt
                .query_map(params![neighbor, profile], |row| row.get::<_, i64>(0))
                .map_err(|e| ErrorKind::Internal(sanitize(e.to_string())))?;
            for row in rows {
                let cluster_id = row.map_err(|e| ErrorKind::Internal(sanitize(e.to_string())))?;
                *counts.entry(cluster_id).or_insert(0) += 1;
            }
        }
        Ok(counts.into_iter().max_by_key(|(_, count)| *count).map(|(id, _)| id))
    }

    pub fn stats(&self, store: &Store, profile: &str) -> Result<GraphStats> {
        let conn = store.reader()?;
        let count = |sql: &str| -> Result<usize> {
            conn.query_row(sql, params![profile], |row| row.get::<_, i64>(0))
                .map(|n| n as usize)
                .map_err(|e| ErrorKind::Internal(sanitize(e.to_string())))
        };
        Ok(GraphStats {
            node_count: count("SELECT COUNT(*) FROM graph_nodes WHERE profile = ?1")?,
            edge_count: count("SELECT COUNT(*) FROM graph_edges WHERE profile = ?1")?,
            cluster_count: count("SELECT COUNT(*) FROM graph_clusters WHERE profile = ?1")?,
        })
    }

    /// Breadth-first traversal over stored edges, up to `max_hops`,
    /// excluding the starting memory itself.
    pub fn related(&self, store: &Store, profile: &str, memory_id: i64, max_hops: u32) -> Result<Vec<i64>> {
        let conn = store.reader()?;
        let mut visited: HashSet<i64> = HashSet::from([memory_id]);
        let mut frontier: Vec<i64> = vec![memory_id];
        for _ in 0..max_hops.max(1) {
            if frontier.is_empty() {
                break;
            }
            let mut stmt = conn
                .prepare(
                    "SELECT target_id FROM graph_edges WHERE source_id = ?1 AND profile = ?2
                     UNION SELECT source_id FROM graph_edges WHERE target_id = ?1 AND profile = ?2",
                )
                .map_err(|e| ErrorKind::Internal(sanitize(e.to_string())))?;
            let mut next = Vec::new();
            for &id in &frontier {
                let rows = stmt
                    .query_map(params![id, profile], |row| row.get::<_, i64>(0))
                    .map_err(|e| ErrorKind::Internal(sanitize(e.to_string())))?;
                for row in rows {
                    let neighbor = row.map_err(|e| ErrorKind::Internal(sanitize(e.to_string())))?;
                    if visited.insert(neighbor) {
                        next.push(neighbor);
                    }
                }
            }
            frontier = next;
        }
        visited.remove(&memory_id);
        Ok(visited.into_iter().collect())
    }

    /// The graph-expansion search strategy (spec §4.H): given a set of
    /// seed memory ids (typically `Store::search_fts`'s top hits),
    /// gather their 1-hop neighbors whose edge weight clears the
    /// configured threshold and rank each neighbor by `neighbor_count *
    /// average_edge_weight` across every seed it connects to. Seeds
    /// themselves are excluded from the returned list.
    pub fn expand_from_seeds(&self, store: &Store, profile: &str, seeds: &[i64]) -> Result<Vec<(i64, f64)>> {
        if seeds.is_empty() {
            return Ok(Vec::new());
        }
        let threshold = self.config.edge_weight_threshold;
        let seed_set: HashSet<i64> = seeds.iter().copied().collect();
        let conn = store.reader()?;
        let mut stmt = conn
            .prepare(
                "SELECT target_id, weight FROM graph_edges WHERE source_id = ?1 AND profile = ?2 AND weight >= ?3
                 UNION ALL
                 SELECT source_id, weight FROM graph_edges WHERE target_id = ?1 AND profile = ?2 AND weight >= ?3",
            )
            .map_err(|e| ErrorKind::Internal(sanitize(e.to_string())))?;
        let mut by_neighbor: HashMap<i64, (usize, f64)> = HashMap::new();
        for &seed in seeds {
            let rows = stmt
                .query_map(params![seed, profile, threshold], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
                })
                .map_err(|e| ErrorKind::Internal(sanitize(e.to_string())))?;
            for row in rows {
                let (neighbor_id, weight) = row.map_err(|e| ErrorKind::Internal(sanitize(e.to_string())))?;
                if seed_set.contains(&neighbor_id) {
                    continue;
                }
                let entry = by_neighbor.entry(neighbor_id).or_insert((0, 0.0));
                entry.0 += 1;
                entry.1 += weight;
            }
        }
        let mut ranked: Vec<(i64, f64)> = by_neighbor
            .into_iter()
            .map(|(id, (count, total_weight))| (id, count as f64 * (total_weight / count as f64)))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(ranked)
    }

    pub fn cluster_members(&self, store: &Store, cluster_id: i64) -> Result<Vec<i64>> {
        let conn = store.reader()?;
        let mut stmt = conn
            .prepare("SELECT memory_id FROM cluster_members WHERE cluster_id = ?1")
            .map_err(|e| ErrorKind::Internal(sanitize(e.to_string())))?;
        let rows = stmt
            .query_map(params![cluster_id], |row| row.get::<_, i64>(0))
            .map_err(|e| ErrorKind::Internal(sanitize(e.to_string())))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| ErrorKind::Internal(sanitize(e.to_string())))?);
        }
        Ok(out)
    }

    pub fn cluster_summary(&self, store: &Store, cluster_id: i64) -> Result<ClusterSummary> {
        let conn = store.reader()?;
        conn.query_row(
            "SELECT id, name, description, member_count, avg_importance, parent_cluster_id, depth
             FROM graph_clusters WHERE id = ?1",
            params![cluster_id],
            |row| {
                Ok(ClusterSummary {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    member_count: row.get::<_, i64>(3)? as usize,
                    avg_importance: row.get(4)?,
                    parent_cluster_id: row.get(5)?,
                    depth: row.get::<_, i64>(6)? as u8,
                })
            },
        )
        .optional()
        .map_err(|e| ErrorKind::Internal(sanitize(e.to_string())))?
        .ok_or_else(|| ErrorKind::NotFound(format!("cluster {cluster_id} not found")))
    }
}

fn shared_entities(a: &[String], b: &[String], cap: usize) -> Vec<String> {
    let set_a: HashSet<&String> = a.iter().collect();
    let set_b: HashSet<&String> = b.iter().collect();
    let mut common: Vec<String> = set_a.intersection(&set_b).map(|s| s.to_string()).collect();
    common.sort();
    common.truncate(cap);
    common
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::NewMemory;

    fn setup() -> (tempfile::TempDir, Store, GraphEngine) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let store = Store::open(dir.path(), &config).unwrap();
        let engine = GraphEngine::new(config.graph);
        (dir, store, engine)
    }

    #[test]
    fn build_links_similar_memories_and_isolates_unrelated_ones() {
        let (_dir, store, engine) = setup();
        let a = store.add("default", NewMemory { content: "react hooks manage component state".into(), ..Default::default() }).unwrap();
        let b = store.add("default", NewMemory { content: "react hooks simplify component lifecycle".into(), ..Default::default() }).unwrap();
        store.add("default", NewMemory { content: "postgresql backup retention policy".into(), ..Default::default() }).unwrap();

        let stats = engine.build(&store, "default", None).unwrap();
        assert_eq!(stats.node_count, 3);

        let related_to_a = engine.related(&store, "default", a, 1).unwrap();
        assert!(related_to_a.contains(&b));
    }

    #[test]
    fn build_is_deterministic_across_runs() {
        let (_dir, store, engine) = setup();
        for i in 0..8 {
            store.add("default", NewMemory { content: format!("memory about topic {}", i % 3), ..Default::default() }).unwrap();
        }
        let first = engine.build(&store, "default", None).unwrap();
        let second = engine.build(&store, "default", None).unwrap();
        assert_eq!(first.node_count, second.node_count);
        assert_eq!(first.edge_count, second.edge_count);
        assert_eq!(first.cluster_count, second.cluster_count);
    }

    #[test]
    fn cluster_members_and_summary_round_trip() {
        let (_dir, store, engine) = setup();
        let a = store.add("default", NewMemory { content: "rust ownership and borrowing rules".into(), ..Default::default() }).unwrap();
        let b = store.add("default", NewMemory { content: "rust ownership borrowing lifetimes".into(), ..Default::default() }).unwrap();
        engine.build(&store, "default", None).unwrap();

        let conn = store.reader().unwrap();
        let cluster_id: i64 = conn
            .query_row(
                "SELECT cluster_id FROM cluster_members WHERE memory_id = ?1 LIMIT 1",
                params![a],
                |row| row.get(0),
            )
            .unwrap();
        drop(conn);

        let members = engine.cluster_members(&store, cluster_id).unwrap();
        assert!(members.contains(&a));
        assert!(members.contains(&b) || members.len() == 1);
        let summary = engine.cluster_summary(&store, cluster_id).unwrap();
        assert_eq!(summary.id, cluster_id);
    }

    #[test]
    fn index_memory_connects_to_existing_nodes_incrementally() {
        let (_dir, store, engine) = setup();
        let a = store.add("default", NewMemory { content: "kubernetes deployment rollout strategy".into(), ..Default::default() }).unwrap();
        engine.build(&store, "default", None).unwrap();

        let b = store.add("default", NewMemory { content: "kubernetes deployment rollout plan".into(), ..Default::default() }).unwrap();
        engine.index_memory(&store, "default", b, "kubernetes deployment rollout plan").unwrap();

        let related = engine.related(&store, "default", b, 1).unwrap();
        assert!(related.contains(&a));
    }

    #[test]
    fn profiles_do_not_leak_edges_into_each_other() {
        let (_dir, store, engine) = setup();
        store.add("work", NewMemory { content: "quarterly roadmap planning notes".into(), ..Default::default() }).unwrap();
        store.add("personal", NewMemory { content: "quarterly roadmap planning thoughts".into(), ..Default::default() }).unwrap();
        engine.build(&store, "work", None).unwrap();
        engine.build(&store, "personal", None).unwrap();

        let work_stats = engine.stats(&store, "work").unwrap();
        let personal_stats = engine.stats(&store, "personal").unwrap();
        assert_eq!(work_stats.node_count, 1);
        assert_eq!(personal_stats.node_count, 1);
    }
}
