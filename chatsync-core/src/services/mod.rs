pub mod chat_sync_service;

pub use chat_sync_service::ChatSyncService;
