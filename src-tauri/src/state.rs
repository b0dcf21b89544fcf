use anyhow::Context;
use kaimono_config::{AppConfig, ConfigManager};
use kaimono_core::SyncRun;
use kaimono_security::SecretStore;
use kaimono_storage::Storage;
use tokio::sync::{Mutex, RwLock};

pub struct AppState {
    pub(crate) config_manager: ConfigManager,
    pub(crate) config: RwLock<AppConfig>,
    pub(crate) storage: Storage,
    pub(crate) secrets: SecretStore,
    /// At most one sync run at a time; the slot doubles as the lock.
    pub(crate) active_sync: Mutex<Option<SyncRun>>,
}

impl AppState {
    pub async fn initialize() -> anyhow::Result<Self> {
        let config_manager = ConfigManager::new().context("initialize config manager")?;
        let config = config_manager.load().context("load app config")?;

        let secrets = SecretStore::new("io.kaimono.desktop");

        let db_path = config_manager.data_dir().join(&config.database.file_name);
        let storage = Storage::connect(&db_path)
            .await
            .context("initialize sqlite storage")?;

        Ok(Self {
            config_manager,
            config: RwLock::new(config),
            storage,
            secrets,
            active_sync: Mutex::new(None),
        })
    }

    pub async fn config(&self) -> AppConfig {
        self.config.read().await.clone()
    }

    pub async fn set_config(&self, next: AppConfig) -> anyhow::Result<()> {
        self.config_manager.save(&next)?;
        let mut guard = self.config.write().await;
        *guard = next;
        Ok(())
    }

    /// Closes out runs a crash left in `running`, before any new run starts.
    pub async fn recover_interrupted_sync(&self) -> anyhow::Result<u64> {
        let recovered = self.storage.fail_interrupted_sync_runs().await?;
        if recovered > 0 {
            tracing::warn!(recovered, "marked interrupted sync runs as failed");
        }
        Ok(recovered)
    }
}
