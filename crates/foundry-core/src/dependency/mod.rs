//! Dependency Analyzer
//!
//! Turns the locked data schema into an ordered list of generation tasks.
//!
//! # Architecture
//!
//! ```text
//! data schema (DDL)
//!        │  schema::parse_tables
//!        v
//! tables + FK references (discovery order)
//!        │  analyze_from_schema
//!        v
//! TaskDependencyGraph (4 nodes per table)
//!        │  topological_sort
//!        v
//! ordered Vec<TaskNode>  ──>  task plan (session memory)
//! ```
//!
//! For every table the analyzer emits one node per [`TaskLayer`], ordered
//! entity -> mapper -> service -> controller, with an extra entity -> service
//! edge so a service never depends on the mapper alone. A foreign key from
//! table A to table B adds `B.layer -> A.layer` for every layer.

pub mod graph;
pub mod schema;

pub use graph::{TaskDependencyGraph, TaskLayer, TaskNode};
pub use schema::{normalize_table_name, parse_tables, to_pascal_case, TableDef};

use crate::error::Result;

/// Intra-table edges, `(before, after)`
const LAYER_EDGES: [(TaskLayer, TaskLayer); 4] = [
    (TaskLayer::Entity, TaskLayer::Mapper),
    (TaskLayer::Mapper, TaskLayer::Service),
    (TaskLayer::Entity, TaskLayer::Service),
    (TaskLayer::Service, TaskLayer::Controller),
];

/// Builds task graphs from schema text. Stateless.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyAnalyzer;

impl DependencyAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Build the task graph for `schema`.
    ///
    /// Blank input yields an empty graph. References to tables that the
    /// schema does not define are ignored.
    pub fn analyze_from_schema(&self, schema: &str) -> TaskDependencyGraph {
        let mut graph = TaskDependencyGraph::new();
        if schema.trim().is_empty() {
            return graph;
        }

        let tables = parse_tables(schema);

        for (table_index, table) in tables.iter().enumerate() {
            let stem = to_pascal_case(&table.name);
            for layer in TaskLayer::ALL {
                graph.add_node(TaskNode {
                    id: TaskNode::id_for(layer, &table.name),
                    layer,
                    table: table.name.clone(),
                    class_name: format!("{}{}", stem, layer.class_suffix()),
                    table_index,
                });
            }
        }

        for table in &tables {
            for (before, after) in LAYER_EDGES {
                self.link(
                    &mut graph,
                    &TaskNode::id_for(before, &table.name),
                    &TaskNode::id_for(after, &table.name),
                );
            }

            for referenced in &table.references {
                if !tables.iter().any(|t| &t.name == referenced) {
                    tracing::debug!(
                        table = %table.name,
                        referenced = %referenced,
                        "Ignoring reference to undeclared table"
                    );
                    continue;
                }
                for layer in TaskLayer::ALL {
                    self.link(
                        &mut graph,
                        &TaskNode::id_for(layer, referenced),
                        &TaskNode::id_for(layer, &table.name),
                    );
                }
            }
        }

        tracing::debug!(
            tables = tables.len(),
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "Task graph built"
        );
        graph
    }

    fn link(&self, graph: &mut TaskDependencyGraph, before: &str, after: &str) {
        // Both ids were inserted above.
        if let Err(e) = graph.add_dependency(before, after) {
            tracing::warn!("Skipping task edge {} -> {}: {}", before, after, e);
        }
    }

    /// Deterministic generation order for `graph`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::GraphError::CycleDetected`] when the schema has
    /// mutually referencing tables.
    pub fn topological_sort(&self, graph: &TaskDependencyGraph) -> Result<Vec<TaskNode>> {
        graph.topological_sort()
    }

    /// Parse and order in one step
    pub fn plan(&self, schema: &str) -> Result<Vec<TaskNode>> {
        let graph = self.analyze_from_schema(schema);
        self.topological_sort(&graph)
    }
}

/// Markdown checklist for the session task plan
pub fn render_task_plan(round: u32, tasks: &[TaskNode]) -> String {
    let mut out = format!("## Round {} task order ({} tasks)\n", round + 1, tasks.len());
    if tasks.is_empty() {
        out.push_str("- (no tables in data schema)\n");
        return out;
    }
    for (i, task) in tasks.iter().enumerate() {
        out.push_str(&format!(
            "{}. [ ] {} `{}` ({})\n",
            i + 1,
            task.layer,
            task.class_name,
            task.table
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FoundryError, GraphError};
    use proptest::prelude::*;

    const SHOP: &str = r#"
        CREATE TABLE users (id BIGINT PRIMARY KEY, email VARCHAR(255));
        CREATE TABLE orders (
            id BIGINT PRIMARY KEY,
            user_id BIGINT NOT NULL REFERENCES users(id)
        );
        CREATE TABLE order_items (
            id BIGINT PRIMARY KEY,
            order_id BIGINT REFERENCES orders(id),
            price DECIMAL(10,2)
        );
    "#;

    fn position(order: &[TaskNode], id: &str) -> usize {
        order.iter().position(|n| n.id == id).unwrap()
    }

    #[test]
    fn test_blank_schema_is_empty_graph() {
        let analyzer = DependencyAnalyzer::new();
        for input in ["", "   ", "\n\t"] {
            let graph = analyzer.analyze_from_schema(input);
            assert_eq!(graph.node_count(), 0);
            assert_eq!(graph.edge_count(), 0);
        }
    }

    #[test]
    fn test_four_nodes_per_table() {
        let graph = DependencyAnalyzer::new().analyze_from_schema(SHOP);
        assert_eq!(graph.node_count(), 12);
        let node = graph.get("task_service_order_items").unwrap();
        assert_eq!(node.class_name, "OrderItemsService");
        assert_eq!(node.table_index, 2);
    }

    #[test]
    fn test_intra_table_edges() {
        let graph = DependencyAnalyzer::new().analyze_from_schema(SHOP);
        assert!(graph.has_edge("task_entity_users", "task_mapper_users"));
        assert!(graph.has_edge("task_mapper_users", "task_service_users"));
        assert!(graph.has_edge("task_entity_users", "task_service_users"));
        assert!(graph.has_edge("task_service_users", "task_controller_users"));
    }

    #[test]
    fn test_foreign_keys_order_referenced_first() {
        let order = DependencyAnalyzer::new().plan(SHOP).unwrap();
        for layer in TaskLayer::ALL {
            let users = position(&order, &TaskNode::id_for(layer, "users"));
            let orders = position(&order, &TaskNode::id_for(layer, "orders"));
            let items = position(&order, &TaskNode::id_for(layer, "order_items"));
            assert!(users < orders, "{layer}");
            assert!(orders < items, "{layer}");
        }
    }

    #[test]
    fn test_sort_is_deterministic() {
        let analyzer = DependencyAnalyzer::new();
        let first = analyzer.plan(SHOP).unwrap();
        for _ in 0..5 {
            assert_eq!(analyzer.plan(SHOP).unwrap(), first);
        }
        assert_eq!(first[0].id, "task_entity_users");
    }

    #[test]
    fn test_mutual_references_are_a_cycle() {
        let schema = "CREATE TABLE a (id INT, b_id INT REFERENCES b(id));\n\
                      CREATE TABLE b (id INT, a_id INT REFERENCES a(id));";
        let err = DependencyAnalyzer::new().plan(schema).unwrap_err();
        match err {
            FoundryError::Graph(GraphError::CycleDetected(ids)) => {
                assert!(ids.contains(&"task_entity_a".to_string()));
                assert!(ids.contains(&"task_entity_b".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_render_task_plan() {
        let order = DependencyAnalyzer::new().plan(SHOP).unwrap();
        let plan = render_task_plan(0, &order);
        assert!(plan.starts_with("## Round 1 task order (12 tasks)"));
        assert!(plan.contains("1. [ ] entity `UsersEntity` (users)"));
        assert!(render_task_plan(1, &[]).contains("no tables"));
    }

    fn schema_strategy() -> impl Strategy<Value = (usize, Vec<Option<usize>>)> {
        (1usize..8).prop_flat_map(|n| {
            let refs = (0..n)
                .map(|i| {
                    if i == 0 {
                        Just(None).boxed()
                    } else {
                        proptest::option::of(0..i).boxed()
                    }
                })
                .collect::<Vec<_>>();
            (Just(n), refs)
        })
    }

    proptest! {
        #[test]
        fn prop_no_fk_tables_yield_layered_order(n in 1usize..10) {
            let schema: String = (0..n)
                .map(|i| format!("CREATE TABLE t{i} (id INT, name VARCHAR(10));\n"))
                .collect();
            let analyzer = DependencyAnalyzer::new();
            let graph = analyzer.analyze_from_schema(&schema);
            prop_assert_eq!(graph.node_count(), 4 * n);
            let order = analyzer.topological_sort(&graph).unwrap();
            for i in 0..n {
                let table = format!("t{i}");
                let positions: Vec<usize> = TaskLayer::ALL
                    .iter()
                    .map(|l| position(&order, &TaskNode::id_for(*l, &table)))
                    .collect();
                prop_assert!(positions.windows(2).all(|w| w[0] < w[1]));
            }
        }

        #[test]
        fn prop_referenced_tables_come_first((n, refs) in schema_strategy()) {
            let schema: String = (0..n)
                .map(|i| match refs[i] {
                    Some(j) => format!("CREATE TABLE t{i} (id INT, p INT REFERENCES t{j}(id));\n"),
                    None => format!("CREATE TABLE t{i} (id INT);\n"),
                })
                .collect();
            let order = DependencyAnalyzer::new().plan(&schema).unwrap();
            for (i, r) in refs.iter().enumerate() {
                if let Some(j) = r {
                    for layer in TaskLayer::ALL {
                        let referenced = position(&order, &TaskNode::id_for(layer, &format!("t{j}")));
                        let referencing = position(&order, &TaskNode::id_for(layer, &format!("t{i}")));
                        prop_assert!(referenced < referencing);
                    }
                }
            }
        }
    }
}
