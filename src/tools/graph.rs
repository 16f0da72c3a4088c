use super::defs::{GraphQueryType, KnowledgeGraphQueryArgs};
use crate::store::models::{Graph, GraphEntity};
use anyhow::Result;
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};

const DEFAULT_DEPTH: usize = 2;

/// Run a structural query against a locally stored graph. The result is a
/// JSON string handed back to the model verbatim.
pub fn run_graph_query(graph: &Graph, args: &KnowledgeGraphQueryArgs) -> Result<String> {
    match args.query_type {
        GraphQueryType::ListEntities => list_entities(graph),
        GraphQueryType::Entity => {
            let label = args
                .start_nodes
                .first()
                .ok_or_else(|| anyhow::anyhow!("entity query requires one start node"))?;
            entity_details(graph, label)
        }
        GraphQueryType::Path => {
            let (from, to) = match args.start_nodes.as_slice() {
                [from, to, ..] => (from, to),
                _ => anyhow::bail!("path query requires two start nodes"),
            };
            find_paths(graph, from, to, args.max_depth.unwrap_or(DEFAULT_DEPTH + 1))
        }
        GraphQueryType::Subgraph => {
            let label = args
                .start_nodes
                .first()
                .ok_or_else(|| anyhow::anyhow!("subgraph query requires one start node"))?;
            subgraph(graph, label, args.max_depth.unwrap_or(DEFAULT_DEPTH))
        }
    }
}

fn find_entity<'a>(graph: &'a Graph, label: &str) -> Option<&'a GraphEntity> {
    graph
        .entities
        .iter()
        .find(|e| e.label.eq_ignore_ascii_case(label))
}

fn adjacency(graph: &Graph) -> HashMap<&str, Vec<(&str, &str)>> {
    let mut adj: HashMap<&str, Vec<(&str, &str)>> = HashMap::new();
    for rel in &graph.relationships {
        adj.entry(rel.source_id.as_str())
            .or_default()
            .push((rel.target_id.as_str(), rel.relationship_type.as_str()));
        adj.entry(rel.target_id.as_str())
            .or_default()
            .push((rel.source_id.as_str(), rel.relationship_type.as_str()));
    }
    adj
}

fn label_of<'a>(graph: &'a Graph, entity_id: &'a str) -> &'a str {
    graph
        .entities
        .iter()
        .find(|e| e.id == entity_id)
        .map(|e| e.label.as_str())
        .unwrap_or(entity_id)
}

fn list_entities(graph: &Graph) -> Result<String> {
    let entities: Vec<_> = graph
        .entities
        .iter()
        .map(|e| json!({"label": e.label, "type": e.entity_type}))
        .collect();
    Ok(serde_json::to_string_pretty(&json!({
        "graph": graph.name,
        "entity_count": entities.len(),
        "entities": entities,
    }))?)
}

fn entity_details(graph: &Graph, label: &str) -> Result<String> {
    let Some(entity) = find_entity(graph, label) else {
        anyhow::bail!("entity '{}' not found in graph '{}'", label, graph.name);
    };
    let neighbours: Vec<_> = adjacency(graph)
        .remove(entity.id.as_str())
        .unwrap_or_default()
        .into_iter()
        .map(|(id, rel)| json!({"label": label_of(graph, id), "relationship": rel}))
        .collect();
    Ok(serde_json::to_string_pretty(&json!({
        "label": entity.label,
        "type": entity.entity_type,
        "properties": entity.properties,
        "document_ids": entity.document_ids,
        "neighbours": neighbours,
    }))?)
}

fn find_paths(graph: &Graph, from: &str, to: &str, max_depth: usize) -> Result<String> {
    let Some(start) = find_entity(graph, from) else {
        anyhow::bail!("entity '{}' not found in graph '{}'", from, graph.name);
    };
    let Some(goal) = find_entity(graph, to) else {
        anyhow::bail!("entity '{}' not found in graph '{}'", to, graph.name);
    };

    let adj = adjacency(graph);
    let mut paths: Vec<Vec<String>> = Vec::new();
    let mut queue: VecDeque<Vec<&str>> = VecDeque::new();
    queue.push_back(vec![start.id.as_str()]);

    while let Some(path) = queue.pop_front() {
        let Some(&last) = path.last() else {
            continue;
        };
        if last == goal.id {
            paths.push(path.iter().map(|id| label_of(graph, id).to_string()).collect());
            continue;
        }
        if path.len() > max_depth {
            continue;
        }
        for &(next, _rel) in adj.get(last).map(|v| v.as_slice()).unwrap_or_default() {
            if !path.contains(&next) {
                let mut extended = path.clone();
                extended.push(next);
                queue.push_back(extended);
            }
        }
    }

    Ok(serde_json::to_string_pretty(&json!({
        "from": start.label,
        "to": goal.label,
        "paths": paths,
    }))?)
}

fn subgraph(graph: &Graph, label: &str, max_depth: usize) -> Result<String> {
    let Some(start) = find_entity(graph, label) else {
        anyhow::bail!("entity '{}' not found in graph '{}'", label, graph.name);
    };

    let adj = adjacency(graph);
    let mut seen: HashSet<&str> = HashSet::new();
    let mut frontier: Vec<&str> = vec![start.id.as_str()];
    seen.insert(start.id.as_str());

    for _ in 0..max_depth {
        let mut next_frontier = Vec::new();
        for node in frontier {
            for &(next, _rel) in adj.get(node).map(|v| v.as_slice()).unwrap_or_default() {
                if seen.insert(next) {
                    next_frontier.push(next);
                }
            }
        }
        frontier = next_frontier;
    }

    let nodes: Vec<_> = seen.iter().map(|id| label_of(graph, id)).collect();
    let edges: Vec<_> = graph
        .relationships
        .iter()
        .filter(|r| seen.contains(r.source_id.as_str()) && seen.contains(r.target_id.as_str()))
        .map(|r| {
            json!({
                "source": label_of(graph, &r.source_id),
                "target": label_of(graph, &r.target_id),
                "type": r.relationship_type,
            })
        })
        .collect();

    Ok(serde_json::to_string_pretty(&json!({
        "center": start.label,
        "depth": max_depth,
        "nodes": nodes,
        "edges": edges,
    }))?)
}
