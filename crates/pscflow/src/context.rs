//! 設定ファイルからプロビジョナーを組み立てる

use anyhow::{Context, Result};
use colored::Colorize;
use pscflow_cloud::{BackoffScheme, CommandRunner, RetryPolicy, StateManager, TokioCommandRunner};
use pscflow_cloud_gcp::{FolderKind, Provisioner, ProvisionerOptions};
use pscflow_config::{RetryScheme, Settings};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct AppContext {
    pub settings: Settings,
    pub settings_path: Option<PathBuf>,
    pub provisioner: Provisioner,
    pub state: StateManager,
}

impl AppContext {
    pub fn load(config: Option<&Path>, terraform_root: Option<PathBuf>) -> Result<Self> {
        let (mut settings, settings_path) = match config {
            Some(path) => (
                Settings::load(path)
                    .with_context(|| format!("設定ファイルを読み込めません: {}", path.display()))?,
                Some(path.to_path_buf()),
            ),
            None => Settings::discover()?,
        };

        // コマンドライン指定が設定ファイルより優先
        if let Some(root) = terraform_root {
            settings.terraform_root = root;
        }

        let provisioner = build_provisioner(&settings, Arc::new(TokioCommandRunner::new()))?;
        let state = StateManager::new(std::env::current_dir()?);

        Ok(Self {
            settings,
            settings_path,
            provisioner,
            state,
        })
    }

    /// 読み込んだ設定ファイルを表示
    pub fn print_settings_source(&self) {
        match &self.settings_path {
            Some(path) => println!("設定ファイル: {}", path.display().to_string().cyan()),
            None => println!("{}", "設定ファイルなし（デフォルト値を使用）".dimmed()),
        }
        println!(
            "terraform: {}",
            self.settings.terraform_root.display().to_string().cyan()
        );
    }
}

pub fn provisioner_options(settings: &Settings) -> ProvisionerOptions {
    ProvisionerOptions {
        terraform_root: settings.terraform_root.clone(),
        terraform_bin: settings.terraform_bin.clone(),
        gcloud_bin: settings.gcloud_bin.clone(),
        command_timeout: settings.command_timeout(),
        propagation_wait: settings.propagation_wait(),
        poll_interval: settings.poll_interval(),
        poll_max_wait: settings.poll_max_wait(),
    }
}

/// 設定値とフォルダごとの上書きを反映したプロビジョナー
pub fn build_provisioner(
    settings: &Settings,
    runner: Arc<dyn CommandRunner>,
) -> Result<Provisioner> {
    let mut provisioner = Provisioner::new(runner, provisioner_options(settings));

    for (name, over) in &settings.folders {
        let kind: FolderKind = name
            .parse()
            .with_context(|| format!("folders.{} は不明なリソースフォルダです", name))?;
        let mut profile = provisioner.profile(kind);

        if let Some(retry) = over.retry {
            let scheme = match retry.scheme {
                Some(RetryScheme::Linear) => BackoffScheme::Linear,
                Some(RetryScheme::PerCategory) => BackoffScheme::PerCategory,
                None => profile.retry.scheme,
            };
            profile.retry =
                RetryPolicy::new(retry.max_attempts, retry.base_delay_secs).with_scheme(scheme);
        }
        if let Some(enabled) = over.capabilities_already_enabled {
            profile.capabilities_already_enabled = enabled;
        }
        if let Some(apis) = &over.apis {
            profile.apis = apis.clone();
        }
        if let Some(targets) = &over.capability_targets {
            profile.capability_targets = targets.clone();
        }

        tracing::debug!("{} のプロファイルを上書き: {:?}", kind, profile.retry);
        provisioner = provisioner.with_profile(profile);
    }

    Ok(provisioner)
}
