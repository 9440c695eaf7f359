//! End-to-end seed scenarios (spec §8).

use orch_engine::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn agent(name: &str, role: AgentRole, system_prompt: &str) -> AgentSpec {
    AgentSpec { name: name.to_string(), role, system_prompt: system_prompt.to_string(), use_tools: false }
}

async fn run_single_block(block: Block, client: Arc<orch_engine::model_client::MockModelClient>) -> Execution {
    let design = Design { id: "d1".to_string(), blocks: vec![block], connections: vec![] };
    let tmp = TempDir::new().unwrap();
    let workspace_manager = Arc::new(WorkspaceManager::new(tmp.path().to_path_buf(), Duration::from_secs(1800)));
    let stream_hub = Arc::new(StreamHub::new(2000));
    let scheduler = DesignScheduler::new(client, workspace_manager, stream_hub);
    scheduler.run("exec1", &design, "Explain TCP.", Vec::new(), CancellationToken::new()).await.unwrap()
}

/// S1: sequential pipeline, no git.
#[tokio::test]
async fn s1_sequential_pipeline() {
    let client = Arc::new(orch_engine::model_client::MockModelClient::new());
    client.script("Summarize", "TCP is a transport protocol.");
    client.script("Translate to French", "TCP est un protocole de transport.");

    let block = Block {
        id: "b1".to_string(),
        block_type: BlockType::Sequential,
        agents: vec![agent("A1", AgentRole::Worker, "Summarize"), agent("A2", AgentRole::Worker, "Translate to French")],
        task: "Explain TCP.".to_string(),
        git_repo: None,
        isolate_agent_workspaces: false,
        rounds: None,
        aggregator: None,
    };

    let execution = run_single_block(block, client).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    let result = execution.block_results.get("b1").unwrap();
    assert_eq!(result.final_text().unwrap(), "TCP est un protocole de transport.");
}

/// S2: parallel with aggregator, no git.
#[tokio::test]
async fn s2_parallel_with_aggregator() {
    let client = Arc::new(orch_engine::model_client::MockModelClient::new());
    client.script("R1", "Review1");
    client.script("R2", "Review2");
    client.script("R3", "Review3");
    client.script("AGG", "Review1 Review2 Review3");

    let block = Block {
        id: "b1".to_string(),
        block_type: BlockType::Parallel,
        agents: vec![
            agent("R1", AgentRole::Worker, "R1"),
            agent("R2", AgentRole::Worker, "R2"),
            agent("R3", AgentRole::Worker, "R3"),
            agent("AGG", AgentRole::Worker, "AGG"),
        ],
        task: "Review the PR".to_string(),
        git_repo: None,
        isolate_agent_workspaces: false,
        rounds: None,
        aggregator: Some("AGG".to_string()),
    };

    let execution = run_single_block(block, client).await;
    let result = execution.block_results.get("b1").unwrap();
    if let BlockResult::Completed { per_agent_outputs, final_output, .. } = result {
        assert_eq!(per_agent_outputs[0].agent, "R1");
        assert_eq!(per_agent_outputs[1].agent, "R2");
        assert_eq!(per_agent_outputs[2].agent, "R3");
        assert!(final_output.starts_with("Review1"));
    } else {
        panic!("expected completed block, got {result:?}");
    }
}

/// S3: hierarchical delegation.
#[tokio::test]
async fn s3_hierarchical_delegation() {
    let client = Arc::new(orch_engine::model_client::MockModelClient::new());
    client.script("M", r#"{"W1":"task1","W2":"task2"}"#);
    client.script("M", "task1 and task2 complete");
    client.script("W1", "task1 done");
    client.script("W2", "task2 done");

    let block = Block {
        id: "b1".to_string(),
        block_type: BlockType::Hierarchical,
        agents: vec![
            agent("M", AgentRole::Manager, "M"),
            agent("W1", AgentRole::Worker, "W1"),
            agent("W2", AgentRole::Worker, "W2"),
        ],
        task: "Coordinate the release".to_string(),
        git_repo: None,
        isolate_agent_workspaces: false,
        rounds: None,
        aggregator: None,
    };

    let execution = run_single_block(block, client).await;
    let result = execution.block_results.get("b1").unwrap();
    let text = result.final_text().unwrap();
    assert!(text.contains("task1"));
    assert!(text.contains("task2"));
}

/// S4: isolated per-agent workspaces with tool use (via `editor_create_change`
/// dispatched through the same JSON-RPC surface the model SDK calls into,
/// not the `EditorManager` directly).
#[tokio::test]
async fn s4_isolated_workspaces_tool_use() {
    let client = Arc::new(orch_engine::model_client::MockModelClient::new());
    client.script("W1", "wrote README for W1");
    client.script("W2", "wrote README for W2");

    let block = Block {
        id: "b1".to_string(),
        block_type: BlockType::Parallel,
        agents: vec![agent("W1", AgentRole::Worker, "W1"), agent("W2", AgentRole::Worker, "W2")],
        task: "Write a README".to_string(),
        git_repo: None,
        isolate_agent_workspaces: true,
        rounds: None,
        aggregator: None,
    };

    let design = Design { id: "d1".to_string(), blocks: vec![block], connections: vec![] };
    let tmp = TempDir::new().unwrap();
    let workspace_manager = Arc::new(WorkspaceManager::new(tmp.path().to_path_buf(), Duration::from_secs(1800)));
    let stream_hub = Arc::new(StreamHub::new(2000));
    let scheduler = DesignScheduler::new(client, workspace_manager.clone(), stream_hub);

    scheduler.run("exec1", &design, "Write a README", Vec::new(), CancellationToken::new()).await.unwrap();

    let workspace = workspace_manager.get("exec1", "b1").await.unwrap();
    assert_eq!(workspace.per_agent_paths.len(), 2);
    let w1_path = workspace.path_for(Some("W1")).to_path_buf();
    let w2_path = workspace.path_for(Some("W2")).to_path_buf();
    assert_ne!(w1_path, w2_path);

    let editor_service = Arc::new(orch_engine::editor::EditorService::new(Arc::new(EngineConfig::default())));
    let w1_for_bridge = w1_path.clone();
    let bridge_w1 = ToolBridge::new(
        editor_service.clone(),
        Arc::new(move |_wf: &str| Some(w1_for_bridge.clone())),
        4,
        String::new(),
        Duration::from_secs(30),
    );
    let w2_for_bridge = w2_path.clone();
    let bridge_w2 = ToolBridge::new(
        editor_service.clone(),
        Arc::new(move |_wf: &str| Some(w2_for_bridge.clone())),
        4,
        String::new(),
        Duration::from_secs(30),
    );

    let response_w1 = bridge_w1
        .dispatch(
            orch_engine::tool_bridge::RpcRequest {
                method: "tools/call".to_string(),
                params: json!({
                    "name": "editor_create_change",
                    "arguments": {"workflow_id": "wf-w1", "file_path": "README.md", "operation": "create", "new_content": "W1 content"}
                }),
                id: json!(1),
            },
            "W1",
            None,
        )
        .await;
    assert!(response_w1.error.is_none(), "{:?}", response_w1.error);

    let response_w2 = bridge_w2
        .dispatch(
            orch_engine::tool_bridge::RpcRequest {
                method: "tools/call".to_string(),
                params: json!({
                    "name": "editor_create_change",
                    "arguments": {"workflow_id": "wf-w2", "file_path": "README.md", "operation": "create", "new_content": "W2 content"}
                }),
                id: json!(2),
            },
            "W2",
            None,
        )
        .await;
    assert!(response_w2.error.is_none(), "{:?}", response_w2.error);

    assert_eq!(std::fs::read_to_string(w1_path.join("README.md")).unwrap(), "W1 content");
    assert_eq!(std::fs::read_to_string(w2_path.join("README.md")).unwrap(), "W2 content");

    let manager_w1 = editor_service.manager_for(&w1_path, None).await.unwrap();
    let manager_w2 = editor_service.manager_for(&w2_path, None).await.unwrap();
    assert_eq!(manager_w1.list_changes(None).len(), 1);
    assert_eq!(manager_w2.list_changes(None).len(), 1);
}

/// S5: reject-in-reverse-order.
#[tokio::test]
async fn s5_reject_in_reverse_order() {
    let tmp = TempDir::new().unwrap();
    let editor = orch_engine::editor::EditorManager::new(tmp.path().to_path_buf(), 10 * 1024 * 1024);

    let c1 = editor
        .create_change("F.txt", Operation::Create, Some(b"A".to_vec()), None, false, None, None)
        .await
        .unwrap();
    let c2 = editor
        .create_change("F.txt", Operation::Update, Some(b"B".to_vec()), None, false, None, None)
        .await
        .unwrap();

    editor.reject(&c2.id).unwrap();
    assert_eq!(editor.read("F.txt").unwrap().content, b"A");

    editor.reject(&c1.id).unwrap();
    assert!(editor.read("F.txt").is_err());

    let history = editor.list_changes(Some(ChangeStatus::Rejected));
    assert_eq!(history.len(), 2);
}

/// S6: cancellation mid-stream. The first block's agent turn is scripted to
/// hang for a second before producing `Done`; cancellation fires after the
/// first chunk has already been observed, while that turn is genuinely
/// still in flight, and is caught at the next block boundary.
#[tokio::test]
async fn s6_cancellation_mid_stream() {
    let client = Arc::new(orch_engine::model_client::MockModelClient::new());
    client.script_slow("A1", "finished too late", Duration::from_secs(5));

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let block1 = Block {
        id: "b1".to_string(),
        block_type: BlockType::Sequential,
        agents: vec![agent("A1", AgentRole::Worker, "A1")],
        task: "Slow task".to_string(),
        git_repo: None,
        isolate_agent_workspaces: false,
        rounds: None,
        aggregator: None,
    };
    let block2 = Block {
        id: "b2".to_string(),
        block_type: BlockType::Sequential,
        agents: vec![agent("A2", AgentRole::Worker, "A2")],
        task: "Never reached".to_string(),
        git_repo: None,
        isolate_agent_workspaces: false,
        rounds: None,
        aggregator: None,
    };
    let design = Design {
        id: "d1".to_string(),
        blocks: vec![block1, block2],
        connections: vec![Connection {
            source_block: "b1".to_string(),
            target_block: "b2".to_string(),
            source_agent: None,
            target_agent: None,
            kind: ConnectionKind::Block,
        }],
    };
    let tmp = TempDir::new().unwrap();
    let workspace_manager = Arc::new(WorkspaceManager::new(tmp.path().to_path_buf(), Duration::from_secs(1800)));
    let stream_hub = Arc::new(StreamHub::new(2000));
    let scheduler = DesignScheduler::new(client, workspace_manager, stream_hub);

    let execution = scheduler.run("exec1", &design, "Slow task", Vec::new(), token).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    // b1's turn was genuinely in flight when cancellation fired.
    assert!(execution.block_results.contains_key("b1"));
    assert!(!execution.block_results.contains_key("b2"));
}
