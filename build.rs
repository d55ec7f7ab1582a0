use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn main() {
    let revision =
        git(&["describe", "--always", "--tags"]).unwrap_or_else(|| "unknown".to_string());
    let dirty = git(&["status", "--porcelain"]).map(|s| !s.is_empty());

    println!("cargo:rustc-env=GIT_REVISION={revision}");
    println!(
        "cargo:rustc-env=GIT_DIRTY={}",
        match dirty {
            Some(true) => "true",
            _ => "false",
        }
    );
    println!("cargo:rerun-if-changed=.git/HEAD");
}
