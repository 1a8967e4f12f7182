//! Watches a module directory and reports which changes would trigger a
//! hot swap.
//!
//! Run with: cargo run --example watch_modules --features watch -- ./modules

use std::path::PathBuf;
use std::time::Duration;

use module_host_runtime::{ModuleWatcher, WatchConfig, WatchEvent, WatchTarget};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./modules"));
    std::fs::create_dir_all(&dir)?;

    let mut watcher = ModuleWatcher::new(
        WatchConfig::new()
            .with_debounce(Duration::from_millis(250))
            .with_recursive(false),
    );

    watcher.on_change(|event| match (&event, event.target()) {
        (WatchEvent::Removed { path }, _) => info!("Removed {}", path.display()),
        (_, WatchTarget::Library) => info!(
            "Library changed for module {:?}; candidate for hot swap",
            event.module_name()
        ),
        (_, WatchTarget::Manifest) => {
            info!("Manifest changed: {}; revalidate", event.path().display())
        }
        (_, WatchTarget::Other) => {}
    });

    watcher.watch(&dir)?;
    watcher.start()?;
    info!("Watching {} for 30 seconds", dir.display());

    std::thread::sleep(Duration::from_secs(30));
    watcher.stop();
    Ok(())
}
