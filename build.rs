use std::process::Command;

/// Runs git in the crate directory, returning trimmed stdout on success.
fn git_output(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout)
        .ok()
        .map(|s| s.trim().to_string())
}

fn main() {
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-changed=.git/refs/heads");

    // Shown by `kira --version`
    let hash = git_output(&["rev-parse", "--short=8", "HEAD"])
        .filter(|hash| !hash.is_empty())
        .unwrap_or_else(|| "unknown".to_string());
    let dirty = git_output(&["status", "--porcelain"]).is_some_and(|status| !status.is_empty());

    println!(
        "cargo::rustc-env=GIT_HASH={}{}",
        hash,
        if dirty { "-dirty" } else { "" }
    );
}
