use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::AppError;
use crate::models::ConnectionDescriptor;
use crate::services::database::{AdapterFactory, EngineHandle};

/// Source of live handles for logical connections.
///
/// Adapters never open handles on their own: callers resolve a connection id
/// here and pass the handle into each adapter call.
#[async_trait::async_trait]
pub trait ConnectionRegistry: Send + Sync {
    /// Live handle plus the descriptor it was opened from. A catalog override
    /// yields a copy of the stored descriptor pointed at that catalog.
    async fn resolve(
        &self,
        connection_id: &str,
        catalog_override: Option<&str>,
    ) -> Result<(EngineHandle, ConnectionDescriptor), AppError>;

    /// Keep `handle` for later calls against the connection's own catalog.
    async fn cache_handle(&self, connection_id: &str, handle: EngineHandle) -> Result<(), AppError>;
}

type HandleKey = (String, String);

/// Process-local registry that opens handles through the adapter factory and
/// caches one per connection and catalog.
pub struct InMemoryRegistry {
    factory: AdapterFactory,
    descriptors: Arc<RwLock<HashMap<String, ConnectionDescriptor>>>,
    handles: Arc<RwLock<HashMap<HandleKey, EngineHandle>>>,
}

impl InMemoryRegistry {
    pub fn new(factory: AdapterFactory) -> Self {
        Self {
            factory,
            descriptors: Arc::new(RwLock::new(HashMap::new())),
            handles: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Store or replace the descriptor for `connection_id`. Handles cached
    /// for a replaced descriptor are closed.
    pub async fn register(
        &self,
        connection_id: impl Into<String>,
        descriptor: ConnectionDescriptor,
    ) -> Result<(), AppError> {
        if !self.factory.is_supported(descriptor.engine) {
            return Err(AppError::Config(format!(
                "Unsupported database type: {}",
                descriptor.engine
            )));
        }
        let connection_id = connection_id.into();
        let replaced = {
            let mut descriptors = self.descriptors.write().await;
            descriptors.insert(connection_id.clone(), descriptor)
        };
        if replaced.is_some() {
            self.evict(&connection_id).await?;
        }
        tracing::info!("Registered connection {}", connection_id);
        Ok(())
    }

    /// Close and forget every handle cached for `connection_id`.
    /// Returns the number of handles closed.
    pub async fn evict(&self, connection_id: &str) -> Result<usize, AppError> {
        let removed: Vec<EngineHandle> = {
            let mut handles = self.handles.write().await;
            let keys: Vec<HandleKey> = handles
                .keys()
                .filter(|(id, _)| id == connection_id)
                .cloned()
                .collect();
            keys.iter().filter_map(|key| handles.remove(key)).collect()
        };
        if removed.is_empty() {
            return Ok(0);
        }

        let descriptor = self.descriptor(connection_id).await?;
        let adapter = self.factory.create_adapter(descriptor.engine)?;
        let count = removed.len();
        for handle in removed {
            if let Err(e) = adapter.close(handle).await {
                tracing::warn!("Failed to close handle for {}: {}", connection_id, e);
            }
        }
        tracing::info!("Evicted {} handle(s) for {}", count, connection_id);
        Ok(count)
    }

    /// Drop the connection and close its handles.
    pub async fn remove(&self, connection_id: &str) -> Result<bool, AppError> {
        if !self.descriptors.read().await.contains_key(connection_id) {
            return Ok(false);
        }
        self.evict(connection_id).await?;
        self.descriptors.write().await.remove(connection_id);
        Ok(true)
    }

    pub async fn handle_count(&self) -> usize {
        self.handles.read().await.len()
    }

    /// Log-safe connection string for `connection_id`.
    pub async fn descriptor_masked(&self, connection_id: &str) -> Result<String, AppError> {
        let descriptor = self.descriptor(connection_id).await?;
        let adapter = self.factory.create_adapter(descriptor.engine)?;
        Ok(mask_credentials(&adapter.build_dsn(&descriptor)?))
    }

    async fn descriptor(&self, connection_id: &str) -> Result<ConnectionDescriptor, AppError> {
        self.descriptors
            .read()
            .await
            .get(connection_id)
            .cloned()
            .ok_or_else(|| AppError::Config(format!("Unknown connection: {}", connection_id)))
    }
}

#[async_trait::async_trait]
impl ConnectionRegistry for InMemoryRegistry {
    async fn resolve(
        &self,
        connection_id: &str,
        catalog_override: Option<&str>,
    ) -> Result<(EngineHandle, ConnectionDescriptor), AppError> {
        let stored = self.descriptor(connection_id).await?;
        let descriptor = match catalog_override.filter(|c| !c.is_empty()) {
            Some(catalog) if catalog != stored.database => stored.with_database(catalog),
            _ => stored,
        };
        let key = (connection_id.to_string(), descriptor.database.clone());

        // Fast path: check if handle already exists (read lock)
        {
            let handles = self.handles.read().await;
            if let Some(handle) = handles.get(&key) {
                tracing::debug!("Using cached handle for {} ({})", connection_id, key.1);
                return Ok((handle.clone(), descriptor));
            }
        }

        // Slow path: open a new handle (write lock)
        let mut handles = self.handles.write().await;

        // Double-check in case another task opened the handle while we were waiting
        if let Some(handle) = handles.get(&key) {
            tracing::debug!("Handle opened by another task for {}", connection_id);
            return Ok((handle.clone(), descriptor));
        }

        let adapter = self.factory.create_adapter(descriptor.engine)?;
        tracing::info!(
            "Opening {} handle for {}: {}",
            descriptor.engine,
            connection_id,
            mask_credentials(&adapter.build_dsn(&descriptor)?)
        );
        let handle = adapter.connect(&descriptor).await.map_err(|e| {
            tracing::error!("Failed to open handle for {}: {}", connection_id, e);
            e
        })?;

        handles.insert(key, handle.clone());
        Ok((handle, descriptor))
    }

    async fn cache_handle(
        &self,
        connection_id: &str,
        handle: EngineHandle,
    ) -> Result<(), AppError> {
        let descriptor = self.descriptor(connection_id).await?;
        let key = (connection_id.to_string(), descriptor.database);
        let previous = self.handles.write().await.insert(key, handle);
        if let Some(previous) = previous {
            let adapter = self.factory.create_adapter(descriptor.engine)?;
            if let Err(e) = adapter.close(previous).await {
                tracing::warn!("Failed to close replaced handle for {}: {}", connection_id, e);
            }
        }
        Ok(())
    }
}

/// Mask credentials in a connection string for safe logging.
///
/// URL passwords become `***`, as do `password=` and ODBC `PWD=` values in
/// key/value strings.
pub fn mask_credentials(dsn: &str) -> String {
    if dsn.contains("://") {
        if let Ok(parsed_url) = url::Url::parse(dsn) {
            let mut masked = parsed_url.clone();
            if parsed_url.password().is_some() {
                let _ = masked.set_password(Some("***"));
            }
            return mask_key_values(masked.as_str(), &['&', '?']);
        }
    }
    mask_key_values(dsn, &[';', ' '])
}

fn mask_key_values(dsn: &str, separators: &[char]) -> String {
    let mut out = String::with_capacity(dsn.len());
    let mut rest = dsn;
    while let Some(pos) = find_secret_key(rest) {
        let (head, tail) = rest.split_at(pos);
        out.push_str(head);
        let eq = tail.find('=').map(|i| i + 1).unwrap_or(tail.len());
        out.push_str(&tail[..eq]);
        out.push_str("***");
        let value = &tail[eq..];
        let end = value.find(|c| separators.contains(&c)).unwrap_or(value.len());
        rest = &value[end..];
    }
    out.push_str(rest);
    out
}

/// Byte offset of the next `password=` or `pwd=` key, matched case-insensitively
/// at a key boundary.
fn find_secret_key(s: &str) -> Option<usize> {
    let lower = s.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    let mut found: Option<usize> = None;
    for key in ["password=", "pwd="] {
        for (i, _) in lower.match_indices(key) {
            if i == 0 || matches!(bytes[i - 1], b';' | b' ' | b'&' | b'?') {
                found = Some(found.map_or(i, |f| f.min(i)));
                break;
            }
        }
    }
    found
}
