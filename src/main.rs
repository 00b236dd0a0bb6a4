//! Profile Sync - binary entry point
//! Delegates to the library for all app logic.

#[tokio::main]
async fn main() {
    if let Err(e) = profile_sync::run().await {
        tracing::error!(error = %e, "server stopped");
        eprintln!("profile-sync: {}", e);
        std::process::exit(1);
    }
}
