#![allow(deprecated)] // TODO: cargo_bin → cargo_bin_cmd! へ移行

mod common;

use assert_cmd::Command;
use common::TestProject;
use predicates::prelude::*;

fn psc(project: &TestProject) -> Command {
    let mut cmd = Command::cargo_bin("psc").unwrap();
    cmd.current_dir(project.path())
        .env_remove("PSCFLOW_CONFIG_PATH")
        .env_remove("PSCFLOW_TERRAFORM_ROOT")
        .env_remove("PSCFLOW_PROJECT_ID");
    cmd
}

/// CLIヘルプが正しく表示されることを確認
#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("psc").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Private Service Connect"))
        .stdout(predicate::str::contains("deploy"))
        .stdout(predicate::str::contains("output"))
        .stdout(predicate::str::contains("await-psc"))
        .stdout(predicate::str::contains("history"));
}

/// バージョン表示が正しく動作することを確認
#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("psc").unwrap();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("pscflow"));
}

/// deployのサブコマンドが揃っていることを確認
#[test]
fn test_deploy_help() {
    let mut cmd = Command::cargo_bin("psc").unwrap();
    cmd.args(["deploy", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("producer"))
        .stdout(predicate::str::contains("consumer"))
        .stdout(predicate::str::contains("create-vm"))
        .stdout(predicate::str::contains("create-sql"))
        .stdout(predicate::str::contains("managed"));
}

/// 不正なコマンドでエラーになることを確認
#[test]
fn test_invalid_command() {
    let mut cmd = Command::cargo_bin("psc").unwrap();
    cmd.arg("invalid-command").assert().failure();
}

/// producerは接続を許可するConsumerの指定が必須
#[test]
fn test_producer_requires_allowed_consumers() {
    let project = TestProject::new();
    psc(&project)
        .args(["deploy", "producer", "--project-id", "p-1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--allowed-consumer"));
}

/// 不正なService Attachment URIは外部コマンドを実行する前に拒否される
#[test]
fn test_managed_rejects_invalid_uri() {
    let project = TestProject::new();
    psc(&project)
        .args([
            "deploy",
            "managed",
            "--project-id",
            "c-1",
            "--service-attachment-uri",
            "projects/p/regions/us-central1/forwardingRules/fr",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid service attachment URI"));

    assert!(!project.state_file().exists());
}

/// 範囲外のメンテナンス曜日はエラー
#[test]
fn test_create_sql_validates_maintenance_day() {
    let project = TestProject::new();
    psc(&project)
        .args([
            "deploy",
            "create-sql",
            "--producer-project-id",
            "p-1",
            "--maintenance-day",
            "9",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("maintenance_day"));
}

/// 未知のリソースフォルダの出力は取得できない
#[test]
fn test_output_unknown_folder() {
    let project = TestProject::new();
    psc(&project)
        .args(["output", "staging"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown resource folder"));
}

/// 未デプロイのフォルダの出力はNotFound
#[test]
fn test_output_not_deployed() {
    let project = TestProject::new();
    psc(&project)
        .args(["output", "producer"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Output not found"));
}

/// 履歴がない場合
#[test]
fn test_history_empty() {
    let project = TestProject::new();
    psc(&project)
        .arg("history")
        .assert()
        .success()
        .stdout(predicate::str::contains("デプロイ履歴はありません"));
}

/// 不正な設定ファイルはエラー
#[test]
fn test_invalid_settings_file() {
    let project = TestProject::new();
    project.write_settings("command_timeout: 10\n");
    psc(&project)
        .arg("history")
        .assert()
        .failure()
        .stderr(predicate::str::contains("設定ファイルの読み込みに失敗しました"));
}

/// --config で指定したファイルが存在しない場合はエラー
#[test]
fn test_missing_config_flag_file() {
    let project = TestProject::new();
    psc(&project)
        .args(["--config", "missing.yaml", "history"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("設定ファイルを読み込めません"));
}

/// 設定ファイルで未知のリソースフォルダを上書きするとエラー
#[test]
fn test_unknown_folder_override() {
    let project = TestProject::new();
    project.write_settings("folders:\n  staging:\n    capabilities_already_enabled: true\n");
    psc(&project)
        .arg("history")
        .assert()
        .failure()
        .stderr(predicate::str::contains("folders.staging"));
}
