//! pscflow の設定ファイル探索と読み込み

pub mod error;
pub mod settings;

pub use error::*;
pub use settings::{FolderOverride, RetryOverride, RetryScheme, Settings};

use std::path::PathBuf;

/// 設定ファイル名の候補（優先順）
pub const SETTINGS_CANDIDATES: [&str; 4] = [
    "pscflow.local.yaml",
    ".pscflow.local.yaml",
    "pscflow.yaml",
    ".pscflow.yaml",
];

/// 設定ファイルのパスを直接指定する環境変数
pub const CONFIG_PATH_ENV: &str = "PSCFLOW_CONFIG_PATH";

/// 設定ファイルを探す
///
/// 以下の優先順位で検索:
/// 1. 環境変数 PSCFLOW_CONFIG_PATH (直接パス指定)
/// 2. カレントディレクトリ: pscflow.local.yaml, .pscflow.local.yaml, pscflow.yaml, .pscflow.yaml
/// 3. ./.pscflow/ ディレクトリ内: 同様の順序
/// 4. ~/.config/pscflow/pscflow.yaml (グローバル設定)
pub fn find_settings_file() -> Result<PathBuf> {
    // 1. 環境変数で直接指定
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!("{} が存在しません: {}", CONFIG_PATH_ENV, path.display());
    }

    let current_dir = std::env::current_dir()?;

    // 2. カレントディレクトリで検索
    for filename in &SETTINGS_CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    // 3. ./.pscflow/ ディレクトリで検索
    let local_dir = current_dir.join(".pscflow");
    if local_dir.is_dir() {
        for filename in &SETTINGS_CANDIDATES {
            let path = local_dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    // 4. グローバル設定ファイル
    if let Some(config_dir) = dirs::config_dir() {
        let global = config_dir.join("pscflow").join("pscflow.yaml");
        if global.exists() {
            return Ok(global);
        }
    }

    Err(ConfigError::SettingsFileNotFound)
}
