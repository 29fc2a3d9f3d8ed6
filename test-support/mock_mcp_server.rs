//! Minimal MCP server for integration testing the proxy end-to-end.
//! Speaks JSON-RPC over stdio. `argv[1]` is a path to a text file whose
//! (trimmed) contents are returned as the `t` tool's answer, read fresh at
//! startup — editing that file and restarting this process is how tests
//! simulate a source-code hot-reload edit.

use std::io::{self, BufRead, Write};

fn main() {
    let response_path = std::env::args().nth(1);
    let response_text = response_path
        .as_deref()
        .and_then(|p| std::fs::read_to_string(p).ok())
        .unwrap_or_default()
        .trim()
        .to_string();

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };

        let msg: serde_json::Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => continue,
        };

        // Notifications carry no "id" — this fixture has nothing to do with
        // them.
        if msg.get("id").is_none() {
            continue;
        }

        let id = msg["id"].clone();
        let method = msg["method"].as_str().unwrap_or("");

        let response = match method {
            "initialize" => serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "protocolVersion": "2025-06-18",
                    "capabilities": {"tools": {"listChanged": true}},
                    "serverInfo": {"name": "mcpmon-fixture", "version": "0.1.0"}
                }
            }),
            "tools/list" => serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "tools": [{
                        "name": "t",
                        "description": "returns the fixture's current response text",
                        "inputSchema": {"type": "object"}
                    }]
                }
            }),
            "tools/call" if msg["params"]["name"] == "t" => serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "content": [{"type": "text", "text": response_text}]
                }
            }),
            _ => serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {"echoed": method}
            }),
        };

        let _ = writeln!(out, "{response}");
        let _ = out.flush();
    }
}
