fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    kirjuri::cli::run()
}
