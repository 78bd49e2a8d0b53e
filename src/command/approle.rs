use std::path::Path;

use crate::config::BootstrapConfig;
use crate::error::BootstrapResult;

use super::setup::{prepare, print_summary};

pub async fn run_approle(
    config: BootstrapConfig,
    skip_preflight: bool,
    role: &str,
    policies: &[String],
    ttl: &str,
    save_to: Option<&Path>,
) -> BootstrapResult<()> {
    let mut bootstrapper = prepare(config, skip_preflight).await?;
    let (report, credentials) = bootstrapper
        .setup_with_approle(role, policies, ttl, save_to)
        .await?;

    print_summary(&report, false);
    println!();
    println!("✅ AppRole '{}' ready", role);
    println!("   role_id:   {}", credentials.role_id);
    match save_to {
        Some(path) => println!("   secret_id: saved to {}", path.display()),
        None => println!("   secret_id: {}", credentials.secret_id),
    }
    Ok(())
}
