use crate::config::BootstrapConfig;
use crate::credentials::{CredentialStore, FileCredentialStore};
use crate::error::BootstrapResult;
use crate::keys::KeyMaterialStore;
use crate::vault::{HealthProbe, HttpHealthProbe, VaultState};

pub async fn run_status(config: BootstrapConfig) -> BootstrapResult<()> {
    let probe = HttpHealthProbe::new(&config.vault_addr, config.timings.probe_timeout())?;
    let state = probe.state().await;

    let marker = match state {
        VaultState::Unsealed => "✅",
        VaultState::Down => "❌",
        _ => "⚠️ ",
    };
    println!("{} Vault at {} is {}", marker, config.vault_addr, state);

    let keys = KeyMaterialStore::new(config.keys_file(), config.key_threshold);
    if keys.exists() {
        println!("   Key file: {}", keys.path().display());
    } else {
        println!("   Key file: {} (not present)", keys.path().display());
    }

    let credentials =
        FileCredentialStore::new(config.credentials_dir.clone(), &config.keychain_service)?;
    match credentials.get_token()? {
        Some(_) => println!("   Root token: stored in {}", credentials.path().display()),
        None => println!("   Root token: not stored. Run 'vault-bootstrap setup'."),
    }

    Ok(())
}
