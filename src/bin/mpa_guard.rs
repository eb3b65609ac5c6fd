//! mpa_guard - multi-person authorization operator tool
//!
//! Exits with the Linux-PAM numeric code of the outcome for `authenticate`,
//! 0/1 for `policy` and `check`.

fn main() -> anyhow::Result<()> {
    let code = mpa_guard::cli::run()?;
    std::process::exit(code);
}
