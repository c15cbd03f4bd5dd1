pub mod archive_svc;
pub mod backup_service;
pub mod cloud_svc;
pub mod config;
pub mod crypto_svc;
pub mod data_layer_error;
pub mod integrity_svc;
pub mod repository;
pub mod sandbox;
pub mod time_provider;
