#![forbid(unsafe_code)]

// Capture git and compiler information for the /version endpoint and the
// start-up banner.  Source trees without git metadata (tarballs, vendored
// copies) still build; the affected values read "unknown".
fn main() {
    set_env("GIT_BRANCH", build_data::get_git_branch());
    set_env("GIT_COMMIT_SHORT", build_data::get_git_commit_short());
    set_env("GIT_DIRTY", build_data::get_git_dirty().map(|d| d.to_string()));
    // BUILD_TIMESTAMP would make builds unreproducible.
    set_env("SOURCE_TIMESTAMP", build_data::get_source_time().map(build_data::format_timestamp));
    set_env("RUSTC_VERSION", build_data::get_rustc_version());
}

fn set_env(key: &str, value: Result<String, String>) {
    let value = value.unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env={}={}", key, value);
}
