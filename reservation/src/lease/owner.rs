/// Diagnostic value written to a lease key: `{hostname}-{owner}-{pid}`.
pub fn owner_token(owner: &str) -> String {
    format!("{}-{}-{}", hostname(), owner, std::process::id())
}

fn hostname() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}
