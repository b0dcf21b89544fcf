use crate::SecurityError;

/// Namespaced wrapper over the OS keychain. All API credentials (Gemini key,
/// Gmail client id/secret) live here; nothing secret touches config or the
/// database.
#[derive(Debug, Clone)]
pub struct SecretStore {
    service_name: String,
}

#[derive(Debug, Clone)]
pub struct SecretKey {
    pub namespace: String,
    pub id: String,
}

impl SecretKey {
    pub fn new(namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            id: id.into(),
        }
    }

    pub fn as_username(&self) -> String {
        format!("{}:{}", self.namespace, self.id)
    }
}

impl SecretStore {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    pub fn set(&self, key: &SecretKey, value: &str) -> Result<(), SecurityError> {
        let entry = keyring::Entry::new(&self.service_name, &key.as_username())?;
        entry.set_password(value)?;
        Ok(())
    }

    pub fn get(&self, key: &SecretKey) -> Result<Option<String>, SecurityError> {
        let entry = keyring::Entry::new(&self.service_name, &key.as_username())?;
        match entry.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn exists(&self, key: &SecretKey) -> Result<bool, SecurityError> {
        Ok(self.get(key)?.is_some())
    }

    pub fn delete(&self, key: &SecretKey) -> Result<(), SecurityError> {
        let entry = keyring::Entry::new(&self.service_name, &key.as_username())?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
