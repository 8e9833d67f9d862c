//! Source-level invariants for the gateway workspace.
//!
//! These run on every `cargo test --workspace` so a refactor cannot quietly
//! reintroduce panics on the request path, leak upstream detail to callers,
//! or let clients spoof gateway-owned headers.

use regex::Regex;
use std::path::Path;
use walkdir::WalkDir;

/// Read all .rs files from the gateway crates, skipping tests and this crate.
fn production_source_files() -> Vec<(String, String)> {
    let root = Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap();

    let crates_dir = root.join("crates");
    let mut files = Vec::new();

    for entry in WalkDir::new(&crates_dir).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();

        if path.extension().and_then(|e| e.to_str()) != Some("rs") {
            continue;
        }

        let path_str = path.to_str().unwrap_or("");
        if path_str.contains("gateway-audit") {
            continue;
        }
        if path_str.contains("tests/") || path_str.contains("\\tests\\") {
            continue;
        }

        if let Ok(content) = std::fs::read_to_string(path) {
            files.push((path_str.to_string(), content));
        }
    }

    files
}

/// Everything before the first `#[cfg(test)]` / `mod tests` in a file.
fn production_lines(content: &str) -> String {
    let mut result = Vec::new();
    let mut in_test_module = false;

    for line in content.lines() {
        if line.contains("#[cfg(test)]") || line.trim().starts_with("mod tests") {
            in_test_module = true;
        }
        if !in_test_module {
            result.push(line);
        }
    }

    result.join("\n")
}

fn gateway_file<'a>(files: &'a [(String, String)], suffix: &str) -> &'a str {
    files
        .iter()
        .find(|(path, _)| path.replace('\\', "/").ends_with(suffix))
        .map(|(_, content)| content.as_str())
        .unwrap_or_else(|| panic!("{suffix} not found"))
}

#[test]
fn request_path_has_no_panicking_unwraps() {
    let files = production_source_files();
    let panic_re = Regex::new(r"\.unwrap\(\)|\.expect\(|panic!\(").unwrap();

    let request_path = [
        "src/pipeline.rs",
        "src/proxy/mod.rs",
        "src/proxy/race.rs",
        "src/tenant.rs",
        "src/routing.rs",
        "src/cipher.rs",
        "src/routes/gateway.rs",
    ];

    for (path, content) in &files {
        let normalized = path.replace('\\', "/");
        if !request_path.iter().any(|p| normalized.ends_with(p)) {
            continue;
        }
        let prod_content = production_lines(content);
        for (i, line) in prod_content.lines().enumerate() {
            assert!(
                !panic_re.is_match(line),
                "Panicking call on the request path at {}:{}: {}",
                path,
                i + 1,
                line.trim()
            );
        }
    }
}

#[test]
fn http_clients_disable_redirects() {
    let files = production_source_files();
    let builder_re = Regex::new(r"reqwest::Client::builder\(\)").unwrap();
    let redirect_re = Regex::new(r"redirect\s*\(\s*.*Policy::none\(\)").unwrap();

    let mut builders = 0;
    for (path, content) in &files {
        let prod_content = production_lines(content);

        for mat in builder_re.find_iter(&prod_content) {
            builders += 1;
            let search_end = (mat.end() + 500).min(prod_content.len());
            let builder_chain = &prod_content[mat.start()..search_end];

            assert!(
                redirect_re.is_match(builder_chain),
                "reqwest::Client::builder() at {} does not set redirect(Policy::none()). \
                 Backends must not be able to bounce the gateway to arbitrary hosts.",
                path
            );
        }
    }
    assert!(builders > 0, "no reqwest client builder found");
}

#[test]
fn constant_time_uses_subtle_crate() {
    let files = production_source_files();

    for (path, content) in &files {
        let prod_content = production_lines(content);
        if prod_content.contains("fn constant_time_eq") {
            assert!(
                prod_content.contains("use subtle") || prod_content.contains("subtle::"),
                "File {} contains constant_time_eq that doesn't use the subtle crate.",
                path
            );
        }
    }
}

#[test]
fn error_responses_use_public_messages_only() {
    let files = production_source_files();
    let error_rs = production_lines(gateway_file(&files, "sg-gateway/src/error.rs"));

    let body_start = error_rs
        .find("fn error_response")
        .expect("GatewayError implements error_response");
    let body = &error_rs[body_start..];

    assert!(
        body.contains("public_message()"),
        "error_response must build its body from public_message()"
    );
    for (i, line) in body.lines().enumerate() {
        if line.contains("\"message\"") {
            assert!(
                !line.contains("self.to_string()") && !line.contains("format!"),
                "error.rs error_response line {} sends internal detail: {}",
                i + 1,
                line.trim()
            );
        }
    }
}

#[test]
fn upstream_detail_never_reaches_json_bodies() {
    let files = production_source_files();
    let dangerous = ["e.to_string()", "{e}", "{:?}", "RUST_BACKTRACE"];

    for (path, content) in &files {
        if !content.contains("HttpResponse::") {
            continue;
        }
        let prod_content = production_lines(content);
        for (i, line) in prod_content.lines().enumerate() {
            if !line.contains("json!") && !line.contains(".json(") {
                continue;
            }
            for pattern in &dangerous {
                assert!(
                    !line.contains(pattern),
                    "Potential internal detail '{}' in HTTP response at {}:{}",
                    pattern,
                    path,
                    i + 1
                );
            }
        }
    }
}

#[test]
fn client_supplied_internal_headers_are_dropped() {
    let files = production_source_files();
    let pipeline = production_lines(gateway_file(&files, "sg-gateway/src/pipeline.rs"));

    let list_re = Regex::new(r"INTERNAL_HEADERS: &\[&str\] = &\[([^\]]*)\]").unwrap();
    let caps = list_re
        .captures(&pipeline)
        .expect("pipeline.rs declares INTERNAL_HEADERS");
    let list = &caps[1];
    assert!(list.contains("USER_ID_HEADER") || list.contains("\"userid\""));
    assert!(list.contains("\"targeturl\""));

    assert!(
        pipeline.contains("INTERNAL_HEADERS.contains"),
        "ProxyContext construction must filter INTERNAL_HEADERS"
    );
}

#[test]
fn hop_by_hop_headers_are_not_forwarded() {
    let files = production_source_files();
    let proxy = production_lines(gateway_file(&files, "sg-gateway/src/proxy/mod.rs"));

    for header in ["\"host\"", "\"connection\"", "\"transfer-encoding\"", "\"upgrade\""] {
        assert!(
            proxy.contains(header),
            "proxy/mod.rs must strip {header} before forwarding"
        );
    }
}

#[test]
fn no_hardcoded_key_material() {
    // 32-byte keys encode to 44 base64 characters, 16-byte IVs to 24.
    let key_re = Regex::new(r#""[A-Za-z0-9+/]{43}=""#).unwrap();
    let iv_re = Regex::new(r#""[A-Za-z0-9+/]{22}==""#).unwrap();
    let files = production_source_files();

    for (path, content) in &files {
        let prod_content = production_lines(content);
        for (i, line) in prod_content.lines().enumerate() {
            assert!(
                !key_re.is_match(line) && !iv_re.is_match(line),
                "Possible hardcoded key material at {}:{}",
                path,
                i + 1
            );
        }
    }
}
