//! Build script for roomcast-cast
//!
//! Sets GIT_HASH, BUILD_TIMESTAMP and BUILD_PROFILE for `GET /build_info`
//! and the startup banner. GIT_HASH carries a `-dirty` suffix when the
//! working tree has uncommitted changes.

use chrono::{SecondsFormat, Utc};
use std::process::Command;

/// Trimmed stdout of a successful git invocation
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn emit(key: &str, value: &str) {
    println!("cargo:rustc-env={}={}", key, value);
}

fn main() {
    let revision = git(&["describe", "--always", "--dirty", "--abbrev=8", "--exclude=*"])
        .unwrap_or_else(|| "unknown".to_string());
    emit("GIT_HASH", &revision);

    emit(
        "BUILD_TIMESTAMP",
        &Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    );

    let profile = std::env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());
    emit("BUILD_PROFILE", &profile);

    // Rerun whenever HEAD moves; the timestamp marks the last such rebuild
    if let Some(head) = git(&["rev-parse", "--git-path", "HEAD"]) {
        println!("cargo:rerun-if-changed={}", head);
    }
    println!("cargo:rerun-if-changed=build.rs");
}
