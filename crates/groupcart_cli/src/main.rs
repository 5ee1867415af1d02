//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `groupcart_core` linkage with deterministic output.
//! - `demo` runs a two-client scenario (create group, join, share an item)
//!   against the configured store file.

use groupcart_core::db::open_shared_db;
use groupcart_core::{
    init_logging, AccountService, AppConfig, GroupSession, SharedStore, SqliteDocumentStore,
    SqliteIdentityProvider,
};
use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

const DEMO_PASSWORD: &str = "demo-password";
const SYNC_TIMEOUT: Duration = Duration::from_millis(200);

fn main() -> ExitCode {
    println!("groupcart_core ping={}", groupcart_core::ping());
    println!("groupcart_core version={}", groupcart_core::core_version());

    if std::env::args().nth(1).as_deref() != Some("demo") {
        return ExitCode::SUCCESS;
    }
    match run_demo() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("demo failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run_demo() -> Result<(), Box<dyn Error>> {
    let config = AppConfig::from_env()?;
    if let Some(log_dir) = &config.log_dir {
        init_logging(&config.log_level, &log_dir.to_string_lossy())?;
    }

    let conn = open_shared_db(&config.db_path)?;
    let store: SharedStore = Arc::new(SqliteDocumentStore::new(conn.clone()));
    let client_a = AccountService::new(SqliteIdentityProvider::new(conn.clone()), store.clone())
        .with_group_id_len(config.group_id_len);
    let client_b = AccountService::new(SqliteIdentityProvider::new(conn), store.clone());

    // Reruns against the same file need fresh accounts.
    let run = std::process::id();
    let created = client_a.sign_up(&format!("a{run}@demo.test"), DEMO_PASSWORD, None)?;
    println!("a: {}", created.message());
    let joined = client_b.sign_up(
        &format!("b{run}@demo.test"),
        DEMO_PASSWORD,
        Some(created.group_id()),
    )?;
    println!("b: {}", joined.message());

    let mut session_a = GroupSession::open(created.user().clone(), store.clone())?;
    let mut session_b = GroupSession::open(joined.user().clone(), store)?;
    session_a.sync()?;
    session_b.sync()?;

    let milk = session_a
        .add_item("Milk", "Dairy")?
        .ok_or("item input was blank")?;
    session_b.wait_for_change(SYNC_TIMEOUT)?;
    println!("b sees: {:?}", session_b.view().item_labels());

    let purchased = session_b.toggle_purchased(&milk.id)?;
    session_a.wait_for_change(SYNC_TIMEOUT)?;
    println!(
        "a sees {} purchased={} (b set {purchased})",
        milk.label(),
        session_a
            .view()
            .items
            .iter()
            .any(|item| item.id == milk.id && item.purchased)
    );
    println!(
        "a is_admin={} b is_admin={}",
        session_a.view().is_admin,
        session_b.view().is_admin
    );
    Ok(())
}
