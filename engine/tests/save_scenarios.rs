//! End-to-end save tests against the in-memory transport.

use proptest::prelude::*;
use serde_json::json;
use tether_engine::{
    has_cycle, transport::Call, Error, Method, MockTransport, Record, Session, Value,
};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

/// Build records where node `i` references node `j` for every `(i, j)` edge.
fn graph(nodes: usize, edges: &[(usize, usize)]) -> Vec<Record> {
    let records: Vec<Record> = (0..nodes).map(|i| Record::new(format!("Node{i}"))).collect();
    for (n, (from, to)) in edges.iter().enumerate() {
        records[*from]
            .set(&format!("edge{n}"), &records[*to])
            .unwrap();
    }
    records
}

/// Edges that only point forward, so the graph is acyclic.
fn forward_edges(nodes: usize) -> impl Strategy<Value = Vec<(usize, usize)>> {
    prop::collection::vec((0..nodes, 0..nodes), 0..nodes * 2).prop_map(|pairs| {
        pairs
            .into_iter()
            .filter(|(a, b)| a != b)
            .map(|(a, b)| (a.min(b), a.max(b)))
            .collect()
    })
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn child_is_batched_before_parent_is_created() {
    let session = Session::new(MockTransport::new());
    let parent = Record::new("Parent");
    let child = Record::new("Child");
    child.set("name", "kid").unwrap();
    parent.set("child", &child).unwrap();

    session.save(&parent).await.unwrap();

    let calls = session.transport().calls();
    assert_eq!(calls.len(), 2);
    match &calls[0] {
        Call::Batch(requests) => {
            assert_eq!(requests.len(), 1);
            assert_eq!(requests[0].method, Method::Post);
            assert_eq!(requests[0].path, "/1.1/classes/Child");
            assert_eq!(requests[0].body.as_ref().unwrap()["name"], json!("kid"));
        }
        other => panic!("expected a batch, got {other:?}"),
    }
    match &calls[1] {
        Call::Create {
            class_name,
            payload,
            ..
        } => {
            assert_eq!(class_name, "Parent");
            assert_eq!(
                payload["child"],
                json!({
                    "__type": "Pointer",
                    "className": "Child",
                    "objectId": child.object_id().unwrap(),
                })
            );
        }
        other => panic!("expected a create, got {other:?}"),
    }
}

#[tokio::test]
async fn chain_is_saved_deepest_first() {
    let session = Session::new(MockTransport::new());
    let records = graph(3, &[(0, 1), (1, 2)]);

    session.save_all(&records[..1]).await.unwrap();

    let classes: Vec<String> = session
        .transport()
        .calls()
        .into_iter()
        .map(|call| match call {
            Call::Batch(requests) => requests
                .iter()
                .map(|r| r.path.rsplit('/').next().unwrap_or_default().to_string())
                .collect::<Vec<_>>()
                .join(","),
            other => panic!("unexpected call {other:?}"),
        })
        .collect();
    assert_eq!(classes, vec!["Node2", "Node1", "Node0"]);
}

#[tokio::test]
async fn back_reference_makes_no_calls() {
    let session = Session::new(MockTransport::new());
    let records = graph(3, &[(0, 1), (1, 2), (2, 0)]);

    for record in &records {
        assert!(has_cycle(record));
    }
    let err = session.save(&records[1]).await.unwrap_err();
    assert!(matches!(err, Error::CircleReference { .. }));
    assert_eq!(session.transport().call_count(), 0);
}

#[tokio::test]
async fn diamond_saves_shared_record_once() {
    let session = Session::new(MockTransport::new());
    let records = graph(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);

    session.save(&records[0]).await.unwrap();

    let created: usize = session
        .transport()
        .calls()
        .iter()
        .map(|call| match call {
            Call::Batch(requests) => requests.len(),
            Call::Create { .. } => 1,
            _ => 0,
        })
        .sum();
    assert_eq!(created, 4);
    assert!(records.iter().all(|r| r.object_id().is_some()));
}

#[tokio::test]
async fn saved_reference_is_written_as_pointer() {
    let session = Session::new(MockTransport::new());
    let author = Record::without_data("Author", "a1");
    let post = Record::new("Post");
    post.set("author", &author).unwrap();

    session.save(&post).await.unwrap();

    let calls = session.transport().calls();
    assert_eq!(calls.len(), 1, "saved dependencies need no batch");
    assert!(matches!(&calls[0], Call::Create { .. }));
}

#[tokio::test]
async fn relations_and_lists_are_encoded_as_operations() {
    let session = Session::new(MockTransport::new());
    let fan = Record::new("User");
    let post = Record::new("Post");
    post.add_relation("likes", &fan).unwrap();
    post.add_unique_to_list("tags", ["rust"]).unwrap();
    post.add_unique_to_list("tags", ["rust", "async"]).unwrap();
    post.increment("views", 2).unwrap();

    session.save(&post).await.unwrap();

    let calls = session.transport().calls();
    assert!(matches!(&calls[0], Call::Batch(r) if r.len() == 1));
    let Call::Create { payload, .. } = &calls[1] else {
        panic!("expected a create");
    };
    assert_eq!(payload["likes"]["__op"], "AddRelation");
    assert_eq!(
        payload["likes"]["objects"][0]["objectId"],
        json!(fan.object_id().unwrap())
    );
    assert_eq!(
        payload["tags"],
        json!({"__op": "AddUnique", "objects": ["rust", "async"]})
    );
    assert_eq!(payload["views"], json!({"__op": "Increment", "amount": 2}));
    assert_eq!(post.get("views"), Some(Value::from(2)));
}

#[tokio::test]
async fn mutations_after_save_are_sent_as_updates() {
    let session = Session::new(MockTransport::new());
    let post = Record::new("Post");
    post.set("title", "draft").unwrap();
    session.save(&post).await.unwrap();

    post.set("title", "final").unwrap();
    assert!(post.is_dirty());
    session.save(&post).await.unwrap();

    let calls = session.transport().calls();
    assert!(matches!(
        &calls[1],
        Call::Update { payload, .. } if payload["title"] == "final"
    ));
    let stored = session
        .transport()
        .stored("Post", &post.object_id().unwrap())
        .unwrap();
    assert_eq!(stored["title"], "final");
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_acyclic_graphs_are_fully_saved(
        (nodes, edges) in (1usize..8).prop_flat_map(|n| (Just(n), forward_edges(n)))
    ) {
        let records = graph(nodes, &edges);
        for record in &records {
            prop_assert!(!has_cycle(record));
        }

        let session = Session::new(MockTransport::new());
        runtime().block_on(session.save_all(&records)).unwrap();

        for record in &records {
            prop_assert!(record.object_id().is_some());
            prop_assert!(!record.is_dirty());
        }
    }

    #[test]
    fn prop_save_assigns_ids_to_reachable_records(
        (nodes, edges) in (1usize..8).prop_flat_map(|n| (Just(n), forward_edges(n)))
    ) {
        let records = graph(nodes, &edges);
        let session = Session::new(MockTransport::new());
        runtime().block_on(session.save(&records[0])).unwrap();

        // Everything reachable from the root now has an ID.
        let mut reachable = vec![false; nodes];
        reachable[0] = true;
        for _ in 0..nodes {
            for (from, to) in &edges {
                if reachable[*from] {
                    reachable[*to] = true;
                }
            }
        }
        for (i, record) in records.iter().enumerate() {
            prop_assert_eq!(record.object_id().is_some(), reachable[i]);
        }
    }

    #[test]
    fn prop_back_edge_is_rejected_without_io(
        (nodes, edges) in (2usize..8).prop_flat_map(|n| (Just(n), forward_edges(n)))
    ) {
        // Close a loop along a forward path 0 -> 1 -> ... -> last -> 0.
        let mut edges = edges;
        edges.extend((0..nodes - 1).map(|i| (i, i + 1)));
        edges.push((nodes - 1, 0));
        let records = graph(nodes, &edges);

        prop_assert!(has_cycle(&records[0]));
        let session = Session::new(MockTransport::new());
        let result = runtime().block_on(session.save(&records[0]));
        let rejected = matches!(result, Err(Error::CircleReference { .. }));
        prop_assert!(rejected, "expected a circle reference, got {:?}", result);
        prop_assert_eq!(session.transport().call_count(), 0);
    }
}
