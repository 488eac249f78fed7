use anyhow::{bail, Result};

use crate::services::crypto::CryptoService;

/// Seal a credential and print the value to paste into the environment file.
pub fn seal_secret(name: &str, value: &str) -> Result<()> {
    if name.trim().is_empty() || value.is_empty() {
        bail!("both a name and a value are required");
    }
    let sealed = CryptoService::seal_secret(name.trim(), value)?;
    println!("{}", sealed);
    Ok(())
}
