mod common;

use alloy_primitives::{address, b256, Address, Bytes};
use common::{erc20_abi, frame, hex_of, sourcify_contract, FakeCompiler, FakeNode};
use serde_json::json;
use tracing::info;
use walnut_common::{CallResult, CompilationFailureKind, DecodedValue, TraceRequest};
use walnut_engine::{DebugPipeline, EngineConfig, PipelineStage, RegistryConfig};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

const TOKEN: Address = address!("c0ffee254729296a45a3885639ac7e10f9d54979");
const USER: Address = address!("00000000000000000000000000000000000000aa");

fn config(registry: &MockServer, scratch: &std::path::Path) -> EngineConfig {
    EngineConfig::default()
        .with_rpc_timeout(5)
        .with_registry_timeout(5)
        .with_default_registry(RegistryConfig::Sourcify { url: registry.uri() })
        .with_scratch_root(scratch)
}

fn simulate(node: &MockServer, to: Address, calldata: String) -> TraceRequest {
    TraceRequest::Simulate {
        from: USER,
        to,
        calldata: calldata.parse::<Bytes>().unwrap(),
        value: None,
        block_number: Some(100),
        rpc_url: Some(node.uri()),
        chain_id: Some(1),
    }
}

async fn mount_sourcify(registry: &MockServer, address: Address, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(format!("/v2/contract/1/{address}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(registry)
        .await;
}

#[tokio::test]
async fn test_simulated_transfer_is_decoded() {
    walnut_common::logging::ensure_test_logging(None);
    info!("Running test");

    let recipient = Address::repeat_byte(0xb0);
    let calldata = format!("0xa9059cbb{:0>64}{:064x}", hex_of(recipient), 1000u64);
    // Tracers sometimes drop the 0x prefix on output.
    let output = format!("{}1", "0".repeat(63));
    let node = FakeNode::new(frame("CALL", USER, TOKEN, &calldata, &output))
        .with_code(TOKEN, "0x6001600201")
        .serve()
        .await;
    let registry = MockServer::start().await;
    mount_sourcify(
        &registry,
        TOKEN,
        sourcify_contract("Token", "pragma solidity ^0.8.0;\ncontract Token {}", erc20_abi()),
    )
    .await;

    let scratch = tempfile::tempdir().unwrap();
    let pipeline = DebugPipeline::new(config(&registry, scratch.path()), FakeCompiler::new());
    let info = pipeline.simulate(&simulate(&node, TOKEN, calldata)).await.unwrap();

    assert_eq!(info.contract_calls_map.len(), 1);
    assert!(info.function_calls_map.is_empty());
    let call = &info.contract_calls_map[&0];
    assert_eq!(call.entry_point_name.as_deref(), Some("transfer"));
    assert_eq!(call.contract_name.as_deref(), Some("Token"));
    assert!(call.is_verified);
    assert!(call.result.is_success());

    let types: Vec<&str> = call.arguments_decoded.iter().map(|p| p.ty.as_str()).collect();
    assert_eq!(types, ["address", "uint256"]);
    assert_eq!(call.arguments_decoded[0].name, "to");
    match &call.arguments_decoded[1].value {
        DecodedValue::Decoded { value, .. } => assert_eq!(value, &json!("1000")),
        other => panic!("amount not decoded: {other:?}"),
    }
    match &call.result_decoded[0].value {
        DecodedValue::Decoded { value, .. } => assert_eq!(value, &json!(true)),
        other => panic!("result not decoded: {other:?}"),
    }

    let tx = info.tx.unwrap();
    assert_eq!(tx.block_number, 100);
    assert_eq!(tx.from, USER);

    // Simulation never compiles.
    assert!(std::fs::read_dir(scratch.path()).map(|mut d| d.next().is_none()).unwrap_or(true));
}

#[tokio::test]
async fn test_failed_compilation_keeps_calls_but_not_debug_data() {
    walnut_common::logging::ensure_test_logging(None);
    info!("Running test");

    let good = Address::repeat_byte(0x01);
    let bad = Address::repeat_byte(0x02);
    let mut root = frame("CALL", USER, good, "0xc0406226", "0x");
    root["calls"] = json!([frame("CALL", good, bad, "0x", "0x")]);

    let node = FakeNode::new(root)
        .with_code(good, "0x600160020100")
        .with_code(bad, "0x600160020100")
        .with_struct_logs(&[
            (0, "PUSH1", 1),
            (2, "PUSH1", 1),
            (4, "CALL", 1),
            (0, "PUSH1", 2),
            (2, "PUSH1", 2),
            (5, "STOP", 2),
            (5, "STOP", 1),
        ])
        .serve()
        .await;
    let registry = MockServer::start().await;
    mount_sourcify(
        &registry,
        good,
        sourcify_contract("Good", "pragma solidity ^0.8.0;\ncontract Good {}", json!([])),
    )
    .await;
    mount_sourcify(
        &registry,
        bad,
        sourcify_contract("Bad", "pragma solidity ^0.4.24;\ncontract Bad {}", json!([])),
    )
    .await;

    let scratch = tempfile::tempdir().unwrap();
    let compiler = FakeCompiler::new();
    let pipeline = DebugPipeline::new(config(&registry, scratch.path()), compiler.clone());
    let info = pipeline.debug(&simulate(&node, good, "0xc0406226".into())).await.unwrap();

    assert_eq!(compiler.job_names(), ["Good", "Bad"]);

    // Both calls are present.
    assert_eq!(info.contract_calls_map.len(), 2);
    assert_eq!(info.contract_calls_map[&0].children_call_ids, vec![1]);
    assert_eq!(info.contract_calls_map[&1].parent_call_id, Some(0));

    // Only the first one has debug data.
    let classes = &info.simulation_debugger_data.classes_debugger_data;
    assert_eq!(classes.keys().copied().collect::<Vec<_>>(), vec![good]);
    assert!(!classes[&good].pc_to_source_info.is_empty());
    assert!(info.contract_calls_map[&0].debugger_data_available);
    assert_eq!(info.contract_calls_map[&0].debugger_trace_step_index, Some(0));
    assert!(!info.contract_calls_map[&1].debugger_data_available);
    assert_eq!(info.contract_calls_map[&1].debugger_trace_step_index, None);

    let trace = &info.simulation_debugger_data.debugger_trace;
    assert!(!trace.is_empty());
    assert!(trace.iter().all(|entry| entry.contract_call_id == 0));
    assert_eq!(trace[0].location.file_path, "src/Good.sol");

    let blocking: Vec<_> = info.diagnostics.iter().filter(|d| d.blocking).collect();
    assert_eq!(blocking.len(), 1);
    assert_eq!(blocking[0].address, bad);
    assert_eq!(blocking[0].kind, CompilationFailureKind::VersionMismatch);
}

#[tokio::test]
async fn test_replayed_deep_revert() {
    walnut_common::logging::ensure_test_logging(None);
    info!("Running test");

    let (a, b, c) = (Address::repeat_byte(0x0a), Address::repeat_byte(0x0b), Address::repeat_byte(0x0c));
    let tx_hash = b256!("1111111111111111111111111111111111111111111111111111111111111111");

    let mut inner = frame("CALL", b, c, "0x", "0x");
    inner["error"] = json!("execution reverted");
    inner["revertReason"] = json!("insufficient balance");
    let mut middle = frame("CALL", a, b, "0x", "0x");
    middle["error"] = json!("execution reverted");
    middle["calls"] = json!([inner]);
    let mut root = frame("CALL", USER, a, "0x", "0x");
    root["error"] = json!("execution reverted");
    root["calls"] = json!([middle]);

    let node = FakeNode::new(root)
        .with_transaction(json!({
            "hash": tx_hash,
            "from": format!("{USER:#x}"),
            "to": format!("{a:#x}"),
            "nonce": "0x5",
            "blockNumber": "0x10",
        }))
        .serve()
        .await;
    let registry = MockServer::start().await;

    let scratch = tempfile::tempdir().unwrap();
    let pipeline = DebugPipeline::new(config(&registry, scratch.path()), FakeCompiler::new());
    let request = TraceRequest::Replay { tx_hash, rpc_url: Some(node.uri()), chain_id: Some(1) };
    let info = pipeline.debug(&request).await.unwrap();

    let calls = &info.contract_calls_map;
    assert_eq!(calls.len(), 3);
    assert!(calls.values().all(|call| call.is_reverted_frame));
    assert!(!calls[&0].is_deepest_revert);
    assert!(!calls[&1].is_deepest_revert);
    assert!(calls[&2].is_deepest_revert);
    assert_eq!(calls[&2].error_message.as_deref(), Some("insufficient balance"));
    assert!(matches!(&calls[&2].result, CallResult::Failure { error, .. } if error == "insufficient balance"));

    let tx = info.tx.unwrap();
    assert_eq!(tx.tx_hash, Some(tx_hash));
    assert_eq!(tx.nonce, Some(5));
    assert_eq!(tx.block_number, 16);
    assert_eq!(tx.block_timestamp, Some(0x65f1b2c0));
}

#[tokio::test]
async fn test_missing_debug_namespace_fails_run() {
    walnut_common::logging::ensure_test_logging(None);
    info!("Running test");

    let node = FakeNode::new(json!(null)).without_debug().serve().await;
    let registry = MockServer::start().await;
    let scratch = tempfile::tempdir().unwrap();
    let pipeline = DebugPipeline::new(config(&registry, scratch.path()), FakeCompiler::new());

    let err = pipeline.debug(&simulate(&node, TOKEN, "0x".into())).await.unwrap_err();
    assert_eq!(err.stage, PipelineStage::Acquiring);
    assert_eq!(err.kind(), "debugNotSupported");
}

#[tokio::test]
async fn test_debug_call_failure_keeps_node_error() {
    walnut_common::logging::ensure_test_logging(None);
    info!("Running test");

    let node = FakeNode::new(json!(null))
        .with_debug_error(-32000, "header for block 0x405 does not exist")
        .serve()
        .await;
    let registry = MockServer::start().await;
    let scratch = tempfile::tempdir().unwrap();
    let pipeline = DebugPipeline::new(config(&registry, scratch.path()), FakeCompiler::new());

    let err = pipeline.debug(&simulate(&node, TOKEN, "0x".into())).await.unwrap_err();
    assert_eq!(err.stage, PipelineStage::Acquiring);
    assert_eq!(err.kind(), "rpc");
    assert!(err.public_message().contains("does not exist"));
}

#[tokio::test]
async fn test_unreachable_node_does_not_leak_url() {
    walnut_common::logging::ensure_test_logging(None);
    info!("Running test");

    let key = "Zq8dWm3Lr7Xy2Kp9Tn4Vb6Hs1Jc5Gf0A";
    let registry = MockServer::start().await;
    let scratch = tempfile::tempdir().unwrap();
    let pipeline = DebugPipeline::new(config(&registry, scratch.path()), FakeCompiler::new());
    let request = TraceRequest::Simulate {
        from: USER,
        to: TOKEN,
        calldata: Bytes::new(),
        value: None,
        block_number: Some(1),
        rpc_url: Some(format!("http://127.0.0.1:1/v2/{key}")),
        chain_id: Some(1),
    };

    let err = pipeline.simulate(&request).await.unwrap_err();
    assert_eq!(err.stage, PipelineStage::Acquiring);
    assert_eq!(err.kind(), "connectionFailed");
    let message = err.public_message();
    assert!(!message.contains(key), "{message}");
    assert!(!message.contains("127.0.0.1:1/v2"), "{message}");
}
