use std::fs;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::time::{Duration, Instant};

const MODEL: &str = "ISO-10303-21;
HEADER;
FILE_DESCRIPTION((''),'2;1');
FILE_NAME('e2e.ifc','',(''),(''),'','','');
FILE_SCHEMA(('IFC2X3'));
ENDSEC;
DATA;
#1=IFCBUILDING('2FCZDorxHDT8NI01kdXi8P',$,'Depot',$,$,#5,$,$,.ELEMENT.,$,$,$);
#2=IFCBUILDINGSTOREY('0w984V0GL6yR4z75YWgVfX',$,'Ground',$,$,#5,$,$,.ELEMENT.,0.);
#3=IFCRELAGGREGATES('2_Rb3uJHj6dBGTnwsGoKrt',$,$,$,#1,(#2));
#5=IFCLOCALPLACEMENT($,$);
ENDSEC;
END-ISO-10303-21;
";

fn modelgraph_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_modelgraph"))
}

struct ChildGuard {
    child: Child,
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn start_server(upload_dir: &Path, ready_file: &Path, extra: &[&str]) -> (ChildGuard, String) {
    let child = Command::new(modelgraph_bin())
        .arg("serve")
        .arg("--listen")
        .arg("127.0.0.1:0")
        .arg("--upload-dir")
        .arg(upload_dir)
        .arg("--ready-file")
        .arg(ready_file)
        .args(extra)
        .spawn()
        .expect("spawn modelgraph serve");
    let guard = ChildGuard { child };

    let deadline = Instant::now() + Duration::from_secs(20);
    while !ready_file.exists() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(50));
    }
    assert!(ready_file.exists(), "server did not write ready file");

    let ready_text = fs::read_to_string(ready_file).expect("read ready file");
    let ready_json: serde_json::Value = serde_json::from_str(&ready_text).expect("parse ready json");
    let addr = ready_json["addr"]
        .as_str()
        .expect("ready file addr")
        .to_string();
    (guard, addr)
}

/// Send one request and return (status, raw header block, body).
fn http_request(
    addr: &str,
    method: &str,
    path: &str,
    headers: &[(&str, String)],
    body: &[u8],
) -> (u16, String, String) {
    let mut stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .ok();
    stream
        .set_write_timeout(Some(Duration::from_secs(10)))
        .ok();

    let mut request = format!(
        "{method} {path} HTTP/1.1\r\nHost: {addr}\r\nContent-Length: {}\r\nConnection: close\r\n",
        body.len()
    );
    for (name, value) in headers {
        request.push_str(&format!("{name}: {value}\r\n"));
    }
    request.push_str("\r\n");

    // One write, so the server sees the body even when it answers early.
    let mut payload = request.into_bytes();
    payload.extend_from_slice(body);
    stream.write_all(&payload).expect("write request");
    stream.flush().ok();

    let mut response_bytes = Vec::new();
    stream
        .read_to_end(&mut response_bytes)
        .expect("read response");
    let response = String::from_utf8_lossy(&response_bytes).to_string();

    let status = response
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(0);
    let (head, body_text) = response
        .split_once("\r\n\r\n")
        .map(|(h, b)| (h.to_string(), b.to_string()))
        .unwrap_or((response.clone(), String::new()));
    (status, head, body_text)
}

fn json(body: &str) -> serde_json::Value {
    serde_json::from_str(body).expect("parse JSON response")
}

fn post_chunk(
    addr: &str,
    file_id: &str,
    index: usize,
    total: usize,
    bytes: &[u8],
) -> (u16, serde_json::Value) {
    let (status, _, body) = http_request(
        addr,
        "POST",
        "/upload-chunk?max_nodes=10&max_relationships=10",
        &[
            ("file-id", file_id.to_string()),
            ("chunk-number", index.to_string()),
            ("total-chunks", total.to_string()),
        ],
        bytes,
    );
    (status, json(&body))
}

fn files_under(dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(Result::ok)
        .map(|e| {
            let path = e.path();
            if path.is_dir() {
                files_under(&path)
            } else {
                1
            }
        })
        .sum()
}

#[test]
fn serve_chunked_upload_smoke() {
    let dir = tempfile::tempdir().expect("tempdir");
    let upload_dir = dir.path().join("uploads");
    let (_guard, addr) = start_server(&upload_dir, &dir.path().join("ready.json"), &[]);

    let (status, _, body) = http_request(&addr, "GET", "/health", &[], b"");
    assert_eq!(status, 200);
    assert_eq!(json(&body)["status"], "ok");

    let bytes = MODEL.as_bytes();
    let cut_a = bytes.len() / 3;
    let cut_b = 2 * bytes.len() / 3;
    let parts = [&bytes[..cut_a], &bytes[cut_a..cut_b], &bytes[cut_b..]];

    let (status, reply) = post_chunk(&addr, "e2e-model", 2, 3, parts[2]);
    assert_eq!(status, 200);
    assert_eq!(reply["message"], "Chunk 2 received");
    let (status, reply) = post_chunk(&addr, "e2e-model", 0, 3, parts[0]);
    assert_eq!(status, 200);
    assert_eq!(reply["message"], "Chunk 0 received");

    let (status, graph) = post_chunk(&addr, "e2e-model", 1, 3, parts[1]);
    assert_eq!(status, 200, "{graph}");
    let nodes = graph["nodes"].as_array().expect("nodes array");
    assert_eq!(nodes.len(), 4);
    assert_eq!(nodes[0]["data"]["id"], "1");
    assert_eq!(nodes[0]["data"]["label"], "IfcBuilding");
    assert_eq!(nodes[0]["data"]["Name"], "Depot");

    let edges = graph["edges"].as_array().expect("edges array");
    assert!(edges.iter().any(|e| e["data"]["source"] == "3"
        && e["data"]["target"] == "2"
        && e["data"]["label"] == "RelatedObjects"));
    assert!(edges.iter().any(|e| e["data"]["source"] == "2"
        && e["data"]["target"] == "3"
        && e["data"]["label"] == "back_RelatedObjects"));

    assert_eq!(files_under(&upload_dir), 0, "staged files must be cleaned up");
}

#[test]
fn serve_rejects_bad_requests() {
    let dir = tempfile::tempdir().expect("tempdir");
    let upload_dir = dir.path().join("uploads");
    let (_guard, addr) = start_server(
        &upload_dir,
        &dir.path().join("ready.json"),
        &["--max-chunk-bytes", "16"],
    );

    let (status, _, body) = http_request(
        &addr,
        "POST",
        "/upload-chunk",
        &[
            ("chunk-number", "0".to_string()),
            ("total-chunks", "1".to_string()),
        ],
        b"abc",
    );
    assert_eq!(status, 400);
    assert!(json(&body)["detail"].as_str().unwrap().contains("file-id"));
    assert_eq!(files_under(&upload_dir), 0);

    let (status, reply) = post_chunk(&addr, "big", 0, 1, &[b'x'; 64]);
    assert_eq!(status, 413, "{reply}");
    assert_eq!(files_under(&upload_dir), 0);

    let (status, reply) = post_chunk(&addr, "junk", 0, 1, b"not ifc");
    assert_eq!(status, 500);
    assert!(reply["detail"].is_string());
    assert_eq!(files_under(&upload_dir), 0);

    let (status, _, _) = http_request(&addr, "GET", "/nope", &[], b"");
    assert_eq!(status, 404);
}

#[test]
fn serve_multipart_upload_and_cors() {
    let dir = tempfile::tempdir().expect("tempdir");
    let upload_dir = dir.path().join("uploads");
    let (_guard, addr) = start_server(&upload_dir, &dir.path().join("ready.json"), &[]);

    let boundary = "modelgraph-e2e-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"file\"; filename=\"e2e.ifc\"\r\n",
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(MODEL.as_bytes());
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    let (status, head, text) = http_request(
        &addr,
        "POST",
        "/upload?max_nodes=2&max_relationships=0",
        &[
            (
                "Content-Type",
                format!("multipart/form-data; boundary={boundary}"),
            ),
            ("Origin", "http://localhost:5173".to_string()),
        ],
        &body,
    );
    assert_eq!(status, 200, "{text}");
    let graph = json(&text);
    assert_eq!(graph["nodes"].as_array().unwrap().len(), 2);
    assert!(graph["edges"].as_array().unwrap().is_empty());
    assert!(head
        .to_ascii_lowercase()
        .contains("access-control-allow-origin: http://localhost:5173"));
    assert_eq!(files_under(&upload_dir), 0);

    let (status, head, _) = http_request(
        &addr,
        "OPTIONS",
        "/upload-chunk",
        &[("Origin", "http://localhost:5173".to_string())],
        b"",
    );
    assert_eq!(status, 204);
    assert!(head.to_ascii_lowercase().contains("access-control-allow-headers"));
}
