//! `settings` command
//!
//! The configuration file is the single source of truth; changes are written
//! back through [`ConfigManager`](crate::infrastructure::config::ConfigManager).

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use super::AppContext;
use crate::infrastructure::config::SyncConfig;

#[derive(Args, Debug, Clone, Default)]
pub struct SettingsArgs {
    /// Skip records whose stock status is `instock`
    #[arg(long)]
    pub ignore_in_stock: Option<bool>,
}

impl SettingsArgs {
    pub const fn has_changes(&self) -> bool {
        self.ignore_in_stock.is_some()
    }

    pub fn apply(&self, sync: &mut SyncConfig) {
        if let Some(ignore) = self.ignore_in_stock {
            sync.ignore_in_stock = ignore;
        }
    }
}

pub async fn show_settings(ctx: &AppContext, args: SettingsArgs) -> Result<()> {
    let sync = if args.has_changes() {
        let updated = ctx
            .config_manager
            .update_sync_config(|sync| args.apply(sync))
            .await?;
        info!("⚙️ Sync settings updated (ignore_in_stock = {})", updated.ignore_in_stock);
        updated
    } else {
        ctx.config.sync.clone()
    };

    println!("Configuration file: {}", ctx.config_manager.config_path().display());
    println!(
        "{}",
        serde_json::to_string_pretty(&sync).context("Failed to render settings")?
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::ConfigManager;
    use tempfile::tempdir;

    #[test]
    fn empty_args_change_nothing() {
        let mut sync = SyncConfig::default();
        let args = SettingsArgs::default();
        assert!(!args.has_changes());
        args.apply(&mut sync);
        assert!(!sync.ignore_in_stock);
    }

    #[tokio::test]
    async fn toggle_is_persisted() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let manager = ConfigManager::with_path(dir.path().join("config.json"));
        let args = SettingsArgs {
            ignore_in_stock: Some(true),
        };

        manager.update_sync_config(|sync| args.apply(sync)).await?;
        assert!(manager.load_config().await?.sync.ignore_in_stock);
        Ok(())
    }
}
