use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// 作業ディレクトリ、terraform フォルダ、偽の外部コマンドを用意する
pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        Self { root }
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }

    pub fn write_settings(&self, content: &str) {
        fs::write(self.root.path().join("pscflow.yaml"), content).unwrap();
    }

    #[allow(dead_code)]
    pub fn create_folder(&self, name: &str) -> PathBuf {
        let dir = self.root.path().join("terraform").join(name);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[allow(dead_code)]
    pub fn state_file(&self) -> PathBuf {
        self.root.path().join(".pscflow").join("state.json")
    }

    /// 実行可能なシェルスクリプトを bin/ に書き出す
    #[cfg(unix)]
    #[allow(dead_code)]
    pub fn write_script(&self, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let dir = self.root.path().join("bin");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }
}

#[allow(dead_code)]
pub fn settings_for(gcloud: &Path, terraform: &Path) -> String {
    format!(
        "gcloud_bin: {}\nterraform_bin: {}\npropagation_wait_secs: 0\npoll_interval_secs: 1\npoll_max_wait_minutes: 1\n",
        gcloud.display(),
        terraform.display()
    )
}
