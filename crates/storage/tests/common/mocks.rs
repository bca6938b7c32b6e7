use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use tessera_storage::error::{StorageError, StorageResult};
use tessera_storage::traits::{ByteStream, ObjectMeta, ObjectStore, StreamingUpload};

/// Backend whose writes always fail, simulating a full or broken disk.
/// Reads report an empty store.
#[derive(Default)]
pub struct FailingBackend {
    pub write_attempts: AtomicUsize,
}

fn disk_full() -> StorageError {
    StorageError::Io(std::io::Error::other("no space left on device"))
}

#[async_trait]
impl ObjectStore for FailingBackend {
    async fn exists(&self, _key: &str) -> StorageResult<bool> {
        Ok(false)
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        Err(StorageError::NotFound(key.to_string()))
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        Err(StorageError::NotFound(key.to_string()))
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        Err(StorageError::NotFound(key.to_string()))
    }

    async fn put(&self, _key: &str, _data: Bytes) -> StorageResult<()> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        Err(disk_full())
    }

    async fn put_stream(&self, _key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FailingUpload))
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }
}

struct FailingUpload;

#[async_trait]
impl StreamingUpload for FailingUpload {
    async fn write(&mut self, _data: Bytes) -> StorageResult<()> {
        Err(disk_full())
    }

    async fn finish(self: Box<Self>) -> StorageResult<u64> {
        Err(disk_full())
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        Ok(())
    }
}
