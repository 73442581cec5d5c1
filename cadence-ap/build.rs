//! Build script for cadence-ap
//!
//! Exposes a build identifier to the crate (see `src/build_info.rs`). The
//! timestamp honors `SOURCE_DATE_EPOCH` so packaged builds are reproducible.

use chrono::{DateTime, SecondsFormat, Utc};
use std::env;
use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout).ok().map(|s| s.trim().to_string())
}

/// Short commit hash, suffixed `-dirty` when the tree has local changes
fn source_revision() -> String {
    match git(&["rev-parse", "--short=8", "HEAD"]).filter(|h| !h.is_empty()) {
        Some(hash) => {
            let dirty = git(&["status", "--porcelain", "--untracked-files=no"])
                .is_some_and(|status| !status.is_empty());
            if dirty {
                format!("{}-dirty", hash)
            } else {
                hash
            }
        }
        None => "unknown".to_string(),
    }
}

fn build_timestamp() -> String {
    let pinned = env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));
    pinned
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn main() {
    let vars = [
        ("CADENCE_GIT_HASH", source_revision()),
        ("CADENCE_BUILD_TIMESTAMP", build_timestamp()),
        (
            "CADENCE_BUILD_PROFILE",
            env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string()),
        ),
        (
            "CADENCE_BUILD_TARGET",
            env::var("TARGET").unwrap_or_else(|_| "unknown".to_string()),
        ),
    ];
    for (key, value) in vars {
        println!("cargo:rustc-env={}={}", key, value);
    }

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=../.git/HEAD");
    println!("cargo:rerun-if-changed=../.git/index");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
}
