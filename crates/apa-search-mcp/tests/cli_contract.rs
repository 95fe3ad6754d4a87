use assert_cmd::Command;
use axum::{http::header, routing::get, Router};
use predicates::prelude::*;
use std::net::SocketAddr;

fn hermetic(cmd: &mut Command) -> &mut Command {
    cmd.env_remove("APA_SEARCH_ENV_FILE")
        .env_remove("APA_SEARCH_BASE_URL")
        .env_remove("APA_SEARCH_TIMEOUT_MS")
}

/// Fixture server on its own runtime thread so the blocking CLI can talk to it.
fn fixture_site() -> SocketAddr {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
        rt.block_on(async move {
            let app = Router::new()
                .route(
                    "/",
                    get(|| async {
                        (
                            [(header::CONTENT_TYPE, "text/html")],
                            "<html><head><title> Fixture   home </title></head><body></body></html>",
                        )
                    }),
                )
                .route(
                    "/search",
                    get(|| async {
                        (
                            [(header::CONTENT_TYPE, "text/html")],
                            r#"<article><h2>Intelligence testing</h2><a href="/topics/intelligence">go</a><p>IQ and beyond.</p></article>"#,
                        )
                    }),
                );
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            tx.send(listener.local_addr().unwrap()).unwrap();
            axum::serve(listener, app).await.unwrap();
        });
    });
    rx.recv().expect("fixture addr")
}

#[test]
fn version_json_contract() {
    let out = hermetic(&mut Command::new(assert_cmd::cargo::cargo_bin!("apa-search")))
        .args(["version"])
        .output()
        .expect("run apa-search version");
    assert!(out.status.success(), "apa-search version failed");
    let v: serde_json::Value =
        serde_json::from_slice(&out.stdout).expect("parse version json");
    assert_eq!(v["name"].as_str(), Some("apa-search"));
    assert!(!v["version"].as_str().unwrap_or("").is_empty());
    assert_eq!(v["features"]["stdio"].as_bool(), Some(true));
}

#[test]
fn version_text_contract() {
    hermetic(&mut Command::new(assert_cmd::cargo::cargo_bin!("apa-search")))
        .args(["version", "--output", "text"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("apa-search "));
}

#[test]
fn search_prints_formatted_results() {
    let addr = fixture_site();
    hermetic(&mut Command::new(assert_cmd::cargo::cargo_bin!("apa-search")))
        .args(["--base-url", &format!("http://{addr}"), "search", "intelligence"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "# APA.org search results for: 'intelligence'",
        ))
        .stdout(predicate::str::contains("## 1. Intelligence testing"))
        .stdout(predicate::str::contains(format!(
            "**Link:** http://{addr}/topics/intelligence"
        )));
}

#[test]
fn doctor_reports_reachable_site() {
    let addr = fixture_site();
    let out = hermetic(&mut Command::new(assert_cmd::cargo::cargo_bin!("apa-search")))
        .env("APA_SEARCH_BASE_URL", format!("http://{addr}/"))
        .args(["doctor"])
        .output()
        .expect("run apa-search doctor");
    assert!(out.status.success());
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("parse doctor json");
    assert_eq!(v["kind"].as_str(), Some("doctor"));
    assert_eq!(v["ok"].as_bool(), Some(true));
    assert_eq!(v["config"]["base_url"].as_str(), Some(format!("http://{addr}").as_str()));
    assert_eq!(v["checks"][0]["status"].as_u64(), Some(200));
    assert_eq!(v["checks"][0]["title"].as_str(), Some("Fixture home"));
}

#[test]
fn doctor_reports_unreachable_site_without_failing() {
    // Nothing listens on port 9 locally; the check fails but the command still succeeds.
    let out = hermetic(&mut Command::new(assert_cmd::cargo::cargo_bin!("apa-search")))
        .args(["--base-url", "http://127.0.0.1:9", "doctor", "--output", "text"])
        .output()
        .expect("run apa-search doctor");
    assert!(out.status.success());
    let s = String::from_utf8_lossy(&out.stdout);
    assert!(s.contains("site: http://127.0.0.1:9"), "{s}");
    assert!(s.contains("reachable: no"), "{s}");
}

#[test]
fn env_file_supplies_unset_variables() {
    let addr = fixture_site();
    let dir = tempfile::tempdir().expect("tempdir");
    let env_path = dir.path().join("apa-search.env");
    std::fs::write(
        &env_path,
        format!("# local overrides\nAPA_SEARCH_BASE_URL = http://{addr}\nnot a pair\n"),
    )
    .expect("write env file");

    let out = hermetic(&mut Command::new(assert_cmd::cargo::cargo_bin!("apa-search")))
        .env("APA_SEARCH_ENV_FILE", &env_path)
        .args(["doctor"])
        .output()
        .expect("run apa-search doctor");
    assert!(out.status.success());
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("parse doctor json");
    assert_eq!(v["config"]["base_url"].as_str(), Some(format!("http://{addr}").as_str()));
    assert_eq!(v["ok"].as_bool(), Some(true));
}
