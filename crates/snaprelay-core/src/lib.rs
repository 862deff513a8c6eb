//! snaprelay-core
//!
//! Periodic database snapshots replicated to a remote object store.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, snapshot, object, transfer, errors）
//! - **ports**: 抽象化レイヤー（SnapshotService, ObjectStore, Clock, IdGenerator）
//! - **impls**: 実装（HttpSnapshotService, GatewayObjectStore, InMemoryObjectStore）
//! - **app**: アプリケーションロジック（locator, orchestrator, replication_loop, builder）
//! - **config**: TOML 設定と環境変数による上書き

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
