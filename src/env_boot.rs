/// Loads `ONEVONE_ENV_FILE` when set, otherwise `.env` from the working
/// directory, falling back to the crate root.
pub fn ensure_dotenv() {
    if let Ok(path) = std::env::var("ONEVONE_ENV_FILE") {
        if dotenv::from_filename(&path).is_ok() {
            return;
        }
    }
    if dotenv::dotenv().is_ok() {
        return;
    }
    let candidate = format!("{}/.env", env!("CARGO_MANIFEST_DIR"));
    let _ = dotenv::from_filename(candidate);
}
