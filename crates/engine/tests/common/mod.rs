//! Shared fixtures for the engine integration tests: a scripted JSON-RPC node,
//! registry response builders and a compiler double.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use alloy_primitives::Address;
use futures::future::BoxFuture;
use semver::Version;
use serde_json::{json, Value};
use walnut_common::CompilationFailureKind;
use walnut_engine::{check_pragma, CompilationError, CompileJob, DebugCompiler, VersionCheck};
use wiremock::{matchers::method, Mock, MockServer, Request, Respond, ResponseTemplate};

/// Scripted JSON-RPC node. Answers by method name and echoes the request id.
#[derive(Debug, Clone, Default)]
pub struct FakeNode {
    pub chain_id: u64,
    pub block_number: u64,
    pub call_trace: Value,
    pub struct_logs: Vec<Value>,
    pub code: HashMap<String, String>,
    pub storage: HashMap<String, String>,
    pub transaction: Option<Value>,
    pub debug_unsupported: bool,
    pub debug_error: Option<(i64, String)>,
}

fn key(address: Address) -> String {
    format!("{address:#x}")
}

impl FakeNode {
    pub fn new(call_trace: Value) -> Self {
        Self { chain_id: 1, block_number: 100, call_trace, ..Default::default() }
    }

    pub fn with_code(mut self, address: Address, code: &str) -> Self {
        self.code.insert(key(address), code.to_string());
        self
    }

    pub fn with_implementation(mut self, proxy: Address, implementation: Address) -> Self {
        self.storage.insert(key(proxy), format!("0x{:0>64}", hex_of(implementation)));
        self
    }

    pub fn with_struct_logs(mut self, steps: &[(u64, &str, u64)]) -> Self {
        self.struct_logs = steps
            .iter()
            .map(|(pc, op, depth)| json!({ "pc": pc, "op": op, "depth": depth, "gas": 100000, "gasCost": 3 }))
            .collect();
        self
    }

    pub fn with_transaction(mut self, transaction: Value) -> Self {
        self.transaction = Some(transaction);
        self
    }

    pub fn without_debug(mut self) -> Self {
        self.debug_unsupported = true;
        self
    }

    /// Fail every `debug_*` call with the given JSON-RPC error.
    pub fn with_debug_error(mut self, code: i64, message: &str) -> Self {
        self.debug_error = Some((code, message.to_string()));
        self
    }

    /// Mount the node on a fresh mock server.
    pub async fn serve(self) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(self).mount(&server).await;
        server
    }

    fn lookup<'a>(map: &'a HashMap<String, String>, params: &Value) -> Option<&'a String> {
        let address = params.get(0)?.as_str()?.to_ascii_lowercase();
        map.get(&address)
    }

    fn answer(&self, method: &str, params: &Value) -> Result<Value, (i64, String)> {
        match method {
            "eth_chainId" => Ok(json!(format!("{:#x}", self.chain_id))),
            "eth_blockNumber" => Ok(json!(format!("{:#x}", self.block_number))),
            "eth_getCode" => Ok(json!(Self::lookup(&self.code, params).map_or("0x", |c| c.as_str()))),
            "eth_getStorageAt" => Ok(json!(Self::lookup(&self.storage, params)
                .cloned()
                .unwrap_or_else(|| format!("0x{}", "0".repeat(64))))),
            "eth_getTransactionByHash" => Ok(self.transaction.clone().unwrap_or(Value::Null)),
            "eth_getBlockByNumber" => Ok(json!({
                "number": params[0],
                "timestamp": "0x65f1b2c0",
            })),
            "debug_traceTransaction" | "debug_traceCall" => {
                if let Some(error) = &self.debug_error {
                    return Err(error.clone());
                }
                if self.debug_unsupported {
                    return Err((-32601, format!("the method {method} does not exist/is not available")));
                }
                let options = params.as_array().and_then(|p| p.last()).cloned().unwrap_or_default();
                if options.get("tracer").and_then(Value::as_str) == Some("callTracer") {
                    Ok(self.call_trace.clone())
                } else {
                    Ok(json!({
                        "gas": 21000,
                        "failed": false,
                        "returnValue": "",
                        "structLogs": self.struct_logs,
                    }))
                }
            }
            other => Err((-32601, format!("the method {other} does not exist/is not available"))),
        }
    }
}

impl Respond for FakeNode {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap_or_default();
        let id = body.get("id").cloned().unwrap_or(json!(0));
        let method = body.get("method").and_then(Value::as_str).unwrap_or_default();
        let params = body.get("params").cloned().unwrap_or(json!([]));

        let reply = match self.answer(method, &params) {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err((code, message)) => {
                json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
            }
        };
        ResponseTemplate::new(200).set_body_json(reply)
    }
}

pub fn hex_of(address: Address) -> String {
    alloy_primitives::hex::encode(address)
}

/// `callTracer` frame.
pub fn frame(kind: &str, from: Address, to: Address, input: &str, output: &str) -> Value {
    json!({
        "type": kind,
        "from": format!("{from:#x}"),
        "to": format!("{to:#x}"),
        "value": "0x0",
        "gas": "0x30000",
        "gasUsed": "0x5000",
        "input": input,
        "output": output,
    })
}

/// Sourcify v2 `fields=all` answer for a single-file contract.
pub fn sourcify_contract(name: &str, source: &str, abi: Value) -> Value {
    let path = format!("src/{name}.sol");
    let mut sources = serde_json::Map::new();
    sources.insert(path.clone(), json!({ "content": source }));
    json!({
        "match": "exact_match",
        "abi": abi,
        "sources": sources,
        "compilation": {
            "name": name,
            "fullyQualifiedName": format!("{path}:{name}"),
            "compilerVersion": "0.8.29+commit.ab55807c",
            "compilerSettings": { "optimizer": { "enabled": false, "runs": 200 } }
        }
    })
}

pub fn erc20_abi() -> Value {
    json!([
        {
            "type": "function",
            "name": "transfer",
            "stateMutability": "nonpayable",
            "inputs": [
                { "name": "to", "type": "address" },
                { "name": "amount", "type": "uint256" }
            ],
            "outputs": [{ "name": "", "type": "bool" }]
        },
        {
            "type": "function",
            "name": "balanceOf",
            "stateMutability": "view",
            "inputs": [{ "name": "owner", "type": "address" }],
            "outputs": [{ "name": "", "type": "uint256" }]
        }
    ])
}

/// Compiler double. Refuses sources whose pragma excludes its version, and
/// otherwise writes a legacy source map where every instruction of
/// `600160020100` maps to bytes `0..10` of file 0.
#[derive(Debug)]
pub struct FakeCompiler {
    pub version: Version,
    pub jobs: Mutex<Vec<CompileJob>>,
}

impl FakeCompiler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { version: Version::new(0, 8, 29), jobs: Mutex::new(Vec::new()) })
    }

    pub fn job_names(&self) -> Vec<String> {
        self.jobs.lock().unwrap().iter().map(|job| job.contract_name.clone()).collect()
    }
}

impl DebugCompiler for FakeCompiler {
    fn version(&self) -> &Version {
        &self.version
    }

    fn compile<'a>(&'a self, job: &'a CompileJob) -> BoxFuture<'a, Result<PathBuf, CompilationError>> {
        Box::pin(async move {
            self.jobs.lock().unwrap().push(job.clone());
            let source = tokio::fs::read_to_string(job.work_dir.join(&job.target))
                .await
                .map_err(|e| CompilationError::new(CompilationFailureKind::MissingSource, e.to_string()))?;
            if let VersionCheck::Mismatch { .. } = check_pragma(&source, &self.version) {
                return Err(CompilationError::new(
                    CompilationFailureKind::VersionMismatch,
                    "Error: Source file requires different compiler version",
                ));
            }

            let dir = job.debug_dir();
            tokio::fs::create_dir_all(&dir).await.unwrap();
            let name = &job.contract_name;
            tokio::fs::write(dir.join(format!("{name}.bin-runtime")), "600160020100").await.unwrap();
            tokio::fs::write(dir.join(format!("{name}.srcmap-runtime")), "0:10:0;;;").await.unwrap();
            Ok(dir)
        })
    }
}
