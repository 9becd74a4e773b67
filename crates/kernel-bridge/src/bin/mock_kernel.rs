//! A stand-in kernel for exercising the bridge.
//!
//! Its last argument is the path of a JSON manifest (the "artifact"). The
//! manifest may set `greeting`, `skipGreeting` and `startupStderr`. After
//! greeting it serves requests until stdin closes. Objects keep their
//! properties in memory; a few method names trigger misbehaviour on purpose.
//! `slow` warns on stderr and replies only after the bridge has given up.

use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    greeting: Option<String>,
    #[serde(default)]
    skip_greeting: bool,
    startup_stderr: Option<String>,
}

struct MockKernel {
    artifact: PathBuf,
    objects: HashMap<String, Map<String, Value>>,
    next_id: u64,
}

enum Outcome {
    Reply(Value),
    /// Write the text to stdout verbatim
    Raw(String),
    /// Write to stderr and produce no reply
    Stderr(String),
    Silent,
    Crash(String),
}

fn ok(payload: Value) -> Outcome {
    Outcome::Reply(json!({ "ok": payload }))
}

fn fault(message: impl Into<String>) -> Outcome {
    Outcome::Reply(json!({ "error": message.into(), "stack": "at MockKernel.dispatch" }))
}

impl MockKernel {
    fn object(&mut self, request: &Value) -> Result<(String, &mut Map<String, Value>), Outcome> {
        let id = request["objref"]["$jsii.byref"]
            .as_str()
            .ok_or_else(|| fault("request has no objref"))?
            .to_string();
        match self.objects.get_mut(&id) {
            Some(props) => Ok((id, props)),
            None => Err(fault(format!("Object {id} not found"))),
        }
    }

    fn dispatch(&mut self, request: Value) -> Outcome {
        match request["api"].as_str().unwrap_or_default() {
            "load" => ok(json!({
                "assembly": request["name"].clone(),
                "types": 2,
            })),
            "create" => {
                let fqn = request["fqn"].as_str().unwrap_or("Object");
                self.next_id += 1;
                let id = format!("{fqn}@{}", 10_000 + self.next_id);
                let mut props = Map::new();
                if let Some(initial) = request["args"].get(0) {
                    props.insert("value".to_string(), initial.clone());
                }
                self.objects.insert(id.clone(), props);
                ok(json!({ "$jsii.byref": id }))
            }
            "get" => match self.object(&request) {
                Ok((_, props)) => {
                    let property = request["property"].as_str().unwrap_or_default();
                    match props.get(property) {
                        Some(value) => ok(json!({ "value": value })),
                        None => ok(json!({})),
                    }
                }
                Err(outcome) => outcome,
            },
            "set" => {
                let property = request["property"].as_str().unwrap_or_default().to_string();
                let value = request["value"].clone();
                match self.object(&request) {
                    Ok((_, props)) => {
                        props.insert(property, value);
                        ok(json!({}))
                    }
                    Err(outcome) => outcome,
                }
            }
            "invoke" => {
                let method = request["method"].as_str().unwrap_or_default().to_string();
                let args = request["args"].clone();
                match self.object(&request) {
                    Ok((id, props)) => invoke(&id, props, &method, &args),
                    Err(outcome) => outcome,
                }
            }
            "sinvoke" => self.static_invoke(&request),
            "del" => {
                let id = match self.object(&request) {
                    Ok((id, _)) => id,
                    Err(outcome) => return outcome,
                };
                self.objects.remove(&id);
                ok(json!({}))
            }
            other => fault(format!("unknown api {other:?}")),
        }
    }

    fn static_invoke(&self, request: &Value) -> Outcome {
        let method = request["method"].as_str().unwrap_or_default();
        match method {
            "artifactExists" => ok(json!({ "result": self.artifact.exists() })),
            "objectCount" => ok(json!({ "result": self.objects.len() })),
            "add" => {
                let sum: i64 = request["args"]
                    .as_array()
                    .map(|args| args.iter().filter_map(Value::as_i64).sum())
                    .unwrap_or_default();
                ok(json!({ "result": sum }))
            }
            other => fault(format!("no static method {other}")),
        }
    }
}

fn invoke(id: &str, props: &mut Map<String, Value>, method: &str, args: &Value) -> Outcome {
    match method {
        "double" => match props.get("value").and_then(Value::as_i64) {
            Some(value) => ok(json!({ "result": value * 2 })),
            None => fault(format!("{id} has no numeric value")),
        },
        "echo" => ok(json!({ "result": args.get(0).cloned().unwrap_or(Value::Null) })),
        "fail" => Outcome::Stderr("boom".to_string()),
        "mute" => Outcome::Silent,
        "garbage" => Outcome::Raw("this is not json".to_string()),
        "mismatch" => ok(json!("a bare string")),
        "noisy" => {
            eprintln!("warning: deprecated call");
            ok(json!({ "result": "done" }))
        }
        "slow" => {
            eprintln!("warning: slow path");
            std::thread::sleep(std::time::Duration::from_millis(300));
            ok(json!({ "result": "late" }))
        }
        "crash" => Outcome::Crash("fatal: kernel crashed".to_string()),
        "throw" => fault("TypeError: cannot read property of undefined"),
        other => fault(format!("{id} has no method {other}")),
    }
}

fn write_line(out: &mut impl Write, line: &str) -> io::Result<()> {
    out.write_all(line.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()
}

fn main() -> io::Result<()> {
    let artifact = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "missing artifact path"))?;
    let manifest: Manifest = match std::fs::read(&artifact) {
        Ok(bytes) if !bytes.is_empty() => serde_json::from_slice(&bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
        Ok(_) => Manifest::default(),
        Err(e) => {
            eprintln!("cannot read artifact {}: {e}", artifact.display());
            std::process::exit(2);
        }
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();

    if let Some(text) = &manifest.startup_stderr {
        eprintln!("{text}");
    }

    if !manifest.skip_greeting {
        let greeting = manifest
            .greeting
            .clone()
            .unwrap_or_else(|| "@kernel-bridge/mock@1.2.3".to_string());
        write_line(&mut out, &json!({ "hello": greeting }).to_string())?;
    }

    let mut kernel = MockKernel {
        artifact,
        objects: HashMap::new(),
        next_id: 0,
    };

    for line in io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let outcome = match serde_json::from_str::<Value>(&line) {
            Ok(request) => kernel.dispatch(request),
            Err(e) => fault(format!("invalid request: {e}")),
        };

        match outcome {
            Outcome::Reply(reply) => write_line(&mut out, &reply.to_string())?,
            Outcome::Raw(text) => write_line(&mut out, &text)?,
            Outcome::Stderr(text) => eprint!("{text}"),
            Outcome::Silent => {}
            Outcome::Crash(text) => {
                eprintln!("{text}");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
