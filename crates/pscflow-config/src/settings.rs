//! 設定ファイルの内容
//!
//! ```yaml
//! terraform_root: infra/terraform
//! command_timeout_secs: 900
//! folders:
//!   producer:
//!     retry:
//!       max_attempts: 5
//!       base_delay_secs: 30
//! ```

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// リソースフォルダ（producer, consumer, ...）を含むディレクトリ
    pub terraform_root: PathBuf,
    pub terraform_bin: String,
    pub gcloud_bin: String,

    /// terraform コマンド1回あたりのタイムアウト
    pub command_timeout_secs: u64,

    /// API 有効化後の反映待ち時間
    pub propagation_wait_secs: u64,

    pub poll_interval_secs: u64,
    pub poll_max_wait_minutes: u64,

    /// デプロイ全体の上限時間
    pub overall_deadline_minutes: u64,

    /// リソースフォルダごとの上書き設定
    pub folders: BTreeMap<String, FolderOverride>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            terraform_root: PathBuf::from("terraform"),
            terraform_bin: "terraform".to_string(),
            gcloud_bin: "gcloud".to_string(),
            command_timeout_secs: 900,
            propagation_wait_secs: 120,
            poll_interval_secs: 30,
            poll_max_wait_minutes: 30,
            overall_deadline_minutes: 35,
            folders: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FolderOverride {
    pub retry: Option<RetryOverride>,
    pub capabilities_already_enabled: Option<bool>,
    pub apis: Option<Vec<String>>,
    pub capability_targets: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryOverride {
    pub max_attempts: u32,
    pub base_delay_secs: u64,

    /// 省略時はフォルダの既定の方式
    #[serde(default)]
    pub scheme: Option<RetryScheme>,
}

/// リトライ間隔の方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryScheme {
    /// 試行回数 × base_delay_secs
    Linear,
    /// 毎回 base_delay_secs
    PerCategory,
}

impl Settings {
    /// YAML 文字列から読み込む
    pub fn from_yaml(content: &str, path: &Path) -> Result<Self> {
        // 空ファイルはデフォルト値として扱う
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let settings: Settings =
            serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        settings.validate()?;
        Ok(settings)
    }

    /// 指定パスの設定ファイルを読み込む
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings = Self::from_yaml(&content, path)?;
        tracing::debug!("設定ファイルを読み込みました: {}", path.display());
        Ok(settings)
    }

    /// 設定ファイルを探索して読み込む
    ///
    /// 見つからない場合はデフォルト値を返す。
    pub fn discover() -> Result<(Self, Option<PathBuf>)> {
        match crate::find_settings_file() {
            Ok(path) => Ok((Self::load(&path)?, Some(path))),
            Err(ConfigError::SettingsFileNotFound) => {
                tracing::debug!("設定ファイルがないためデフォルト値を使用します");
                Ok((Self::default(), None))
            }
            Err(e) => Err(e),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.terraform_bin.trim().is_empty() {
            return Err(ConfigError::Invalid("terraform_bin が空です".to_string()));
        }
        if self.gcloud_bin.trim().is_empty() {
            return Err(ConfigError::Invalid("gcloud_bin が空です".to_string()));
        }
        for (name, value) in [
            ("command_timeout_secs", self.command_timeout_secs),
            ("poll_interval_secs", self.poll_interval_secs),
            ("poll_max_wait_minutes", self.poll_max_wait_minutes),
            ("overall_deadline_minutes", self.overall_deadline_minutes),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{} は 1 以上を指定してください",
                    name
                )));
            }
        }
        for (folder, over) in &self.folders {
            if over.retry.is_some_and(|retry| retry.max_attempts == 0) {
                return Err(ConfigError::Invalid(format!(
                    "folders.{}.retry.max_attempts は 1 以上を指定してください",
                    folder
                )));
            }
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn propagation_wait(&self) -> Duration {
        Duration::from_secs(self.propagation_wait_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn poll_max_wait(&self) -> Duration {
        Duration::from_secs(self.poll_max_wait_minutes.saturating_mul(60))
    }

    pub fn overall_deadline(&self) -> Duration {
        Duration::from_secs(self.overall_deadline_minutes.saturating_mul(60))
    }
}
