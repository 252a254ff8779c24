// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Key-value configuration store
//!
//! Model selection and Azure OpenAI credentials are looked up by key. The
//! default store is a small JSON file (`.convoeval`) in the working
//! directory; an environment variable named after the key takes priority.

use crate::error::Result;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Default key file name, relative to the working directory
pub const KEY_FILE: &str = ".convoeval";

/// Known configuration keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyValues {
    #[serde(rename = "USE_AZURE_OPENAI")]
    UseAzureOpenAI,
    #[serde(rename = "AZURE_OPENAI_API_KEY")]
    AzureOpenAIApiKey,
    #[serde(rename = "OPENAI_API_VERSION")]
    OpenAIApiVersion,
    #[serde(rename = "AZURE_DEPLOYMENT_NAME")]
    AzureDeploymentName,
    #[serde(rename = "AZURE_OPENAI_ENDPOINT")]
    AzureOpenAIEndpoint,
    #[serde(rename = "AZURE_MODEL_VERSION")]
    AzureModelVersion,
}

impl KeyValues {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyValues::UseAzureOpenAI => "USE_AZURE_OPENAI",
            KeyValues::AzureOpenAIApiKey => "AZURE_OPENAI_API_KEY",
            KeyValues::OpenAIApiVersion => "OPENAI_API_VERSION",
            KeyValues::AzureDeploymentName => "AZURE_DEPLOYMENT_NAME",
            KeyValues::AzureOpenAIEndpoint => "AZURE_OPENAI_ENDPOINT",
            KeyValues::AzureModelVersion => "AZURE_MODEL_VERSION",
        }
    }

    /// Keys written by `set-azure-openai`
    pub fn azure() -> [KeyValues; 5] {
        [
            KeyValues::AzureOpenAIApiKey,
            KeyValues::OpenAIApiVersion,
            KeyValues::AzureDeploymentName,
            KeyValues::AzureOpenAIEndpoint,
            KeyValues::AzureModelVersion,
        ]
    }
}

impl fmt::Display for KeyValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lookup interface used by models to resolve their configuration
pub trait KeyStore: Send + Sync {
    fn fetch_data(&self, key: KeyValues) -> Option<String>;

    fn write_data(&self, key: KeyValues, value: &str) -> Result<()>;

    fn remove_data(&self, key: KeyValues) -> Result<()>;
}

/// JSON-file backed key store
pub struct KeyFileHandler {
    path: PathBuf,
    env_override: bool,
    write_lock: Mutex<()>,
}

impl KeyFileHandler {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            env_override: true,
            write_lock: Mutex::new(()),
        }
    }

    /// Ignore environment variables and read the file only
    pub fn without_env_override(mut self) -> Self {
        self.env_override = false;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<HashMap<String, String>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn store(&self, data: &HashMap<String, String>) -> Result<()> {
        let content = serde_json::to_string_pretty(data)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

impl Default for KeyFileHandler {
    fn default() -> Self {
        Self::new(KEY_FILE)
    }
}

impl KeyStore for KeyFileHandler {
    fn fetch_data(&self, key: KeyValues) -> Option<String> {
        if self.env_override {
            if let Ok(value) = std::env::var(key.as_str()) {
                return Some(value);
            }
        }

        match self.load() {
            Ok(mut data) => data.remove(key.as_str()),
            Err(e) => {
                tracing::warn!("Failed to read key file {:?}: {}", self.path, e);
                None
            }
        }
    }

    fn write_data(&self, key: KeyValues, value: &str) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut data = self.load()?;
        data.insert(key.as_str().to_string(), value.to_string());
        self.store(&data)
    }

    fn remove_data(&self, key: KeyValues) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut data = self.load()?;
        if data.remove(key.as_str()).is_some() {
            self.store(&data)?;
        }
        Ok(())
    }
}

/// In-process key store
#[derive(Default)]
pub struct MemoryKeyStore {
    data: RwLock<HashMap<KeyValues, String>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: KeyValues, value: impl Into<String>) -> Self {
        self.data.write().insert(key, value.into());
        self
    }
}

impl KeyStore for MemoryKeyStore {
    fn fetch_data(&self, key: KeyValues) -> Option<String> {
        self.data.read().get(&key).cloned()
    }

    fn write_data(&self, key: KeyValues, value: &str) -> Result<()> {
        self.data.write().insert(key, value.to_string());
        Ok(())
    }

    fn remove_data(&self, key: KeyValues) -> Result<()> {
        self.data.write().remove(&key);
        Ok(())
    }
}
