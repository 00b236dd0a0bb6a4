//! Follows a running server's profile stream and prints every change.
//!
//! Usage: profile-tail [BASE_URL]   (default: $PROFILE_SYNC_URL or http://127.0.0.1:3001)

use profile_sync::client::{ProfileSync, SyncConfig, SyncState};
use std::env;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    profile_sync::logging::init_cli();

    let base_url = env::args()
        .nth(1)
        .or_else(|| env::var("PROFILE_SYNC_URL").ok())
        .unwrap_or_else(|| "http://127.0.0.1:3001".to_string());

    let sync = match ProfileSync::connect(SyncConfig::new(&base_url)).await {
        Ok(sync) => sync,
        Err(e) => {
            eprintln!("Could not connect to {}: {}", base_url, e);
            std::process::exit(1);
        }
    };

    let mut changes = sync.subscribe();
    loop {
        let state = changes.borrow_and_update().clone();
        print_state(&state);

        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
}

fn print_state(state: &SyncState) {
    match state {
        SyncState::Loading => println!("waiting for the first event..."),
        SyncState::Missing => println!("no profile yet (POST /api/create to make one)"),
        SyncState::Ready(profile) => {
            let progress = profile.onboarding();
            println!(
                "\n@{} ({}) theme={} posts={} onboarding={}/{}",
                profile.username,
                profile.display_name,
                profile.theme,
                profile.posts.len(),
                progress.completed_steps(),
                profile_sync::model::OnboardingProgress::TOTAL_STEPS,
            );
            if !profile.bio.is_empty() {
                println!("  {}", profile.bio);
            }
            for post in profile.display_order() {
                let pin = if post.is_pinned { "*" } else { " " };
                println!("  {} [{}] {}", pin, post.id, post.title);
            }
        }
    }
}
