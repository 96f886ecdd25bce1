use crate::commands::print_output;
use crate::context::AppContext;
use crate::progress::Spinner;
use chrono::Utc;
use clap::{Args, Subcommand};
use colored::Colorize;
use pscflow_cloud::{DeployRecord, DeployStatus, ErrorCategory};
use pscflow_cloud_gcp::{
    Component, ConsumerParams, DEFAULT_REGION, DeployFailure, DeployReport, FolderKind,
    ManagedDefaults, ProducerParams, SqlParams, VmParams, validate_service_attachment_uri,
};
use std::time::Duration;

#[derive(Subcommand, Debug)]
pub enum DeployTarget {
    /// Producer（内部ロードバランサ + Service Attachment）をデプロイ
    Producer(ProducerArgs),
    /// Consumer（PSC エンドポイント + ネットワーク）をデプロイ
    Consumer(ConsumerArgs),
    /// Consumer 側の VM をデプロイ
    CreateVm(VmArgs),
    /// Cloud SQL（PSC 有効）をデプロイし、PSC の有効化を待つ
    CreateSql(SqlArgs),
    /// 既存の Service Attachment に対して Consumer をデフォルト値でデプロイ
    Managed(ManagedArgs),
}

/// デプロイ共通オプション
#[derive(Args, Debug, Default)]
pub struct CommonArgs {
    /// API が有効化済みとして API 有効化フェーズをスキップ
    #[arg(long)]
    pub capabilities_enabled: bool,
    /// 出力を JSON で表示
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ProducerArgs {
    /// Producer のプロジェクト ID
    #[arg(long, env = "PSCFLOW_PROJECT_ID")]
    pub project_id: String,
    #[arg(long, env = "PSCFLOW_REGION", default_value = DEFAULT_REGION)]
    pub region: String,
    /// 接続を許可する Consumer のプロジェクト ID（カンマ区切り）
    #[arg(long = "allowed-consumer", value_delimiter = ',', required = true)]
    pub allowed_consumer_project_ids: Vec<String>,
    /// 内部ファイアウォールの許可元 CIDR（カンマ区切り）
    #[arg(long, value_delimiter = ',')]
    pub internal_firewall_source_ranges: Vec<String>,
    /// PSC 用 IP レンジのプレフィックス長
    #[arg(long)]
    pub psc_ip_range_prefix_length: Option<u32>,
    #[command(flatten)]
    pub common: CommonArgs,
}

impl ProducerArgs {
    fn params(&self) -> ProducerParams {
        ProducerParams {
            region: self.region.clone(),
            internal_firewall_source_ranges: non_empty(&self.internal_firewall_source_ranges),
            psc_ip_range_prefix_length: self.psc_ip_range_prefix_length,
            ..ProducerParams::new(&self.project_id, self.allowed_consumer_project_ids.clone())
        }
    }
}

#[derive(Args, Debug)]
pub struct ConsumerArgs {
    /// Consumer のプロジェクト ID
    #[arg(long, env = "PSCFLOW_PROJECT_ID")]
    pub project_id: String,
    #[arg(long, env = "PSCFLOW_REGION", default_value = DEFAULT_REGION)]
    pub region: String,
    /// 接続先の Service Attachment URI
    #[arg(long)]
    pub service_attachment_uri: String,
    #[arg(long)]
    pub consumer_vpc_name: Option<String>,
    #[arg(long)]
    pub vm_subnet_name: Option<String>,
    #[arg(long)]
    pub psc_subnet_name: Option<String>,
    #[arg(long)]
    pub vm_subnet_cidr_range: Option<String>,
    #[arg(long)]
    pub psc_subnet_cidr_range: Option<String>,
    #[arg(long, value_delimiter = ',')]
    pub internal_firewall_source_ranges: Vec<String>,
    #[arg(long, value_delimiter = ',')]
    pub postgres_egress_destination_ranges: Vec<String>,
    #[arg(long)]
    pub psc_endpoint_name: Option<String>,
    #[command(flatten)]
    pub common: CommonArgs,
}

impl ConsumerArgs {
    fn params(&self) -> ConsumerParams {
        ConsumerParams {
            region: self.region.clone(),
            consumer_vpc_name: self.consumer_vpc_name.clone(),
            vm_subnet_name: self.vm_subnet_name.clone(),
            psc_subnet_name: self.psc_subnet_name.clone(),
            vm_subnet_cidr_range: self.vm_subnet_cidr_range.clone(),
            psc_subnet_cidr_range: self.psc_subnet_cidr_range.clone(),
            internal_firewall_source_ranges: non_empty(&self.internal_firewall_source_ranges),
            postgres_egress_destination_ranges: non_empty(
                &self.postgres_egress_destination_ranges,
            ),
            psc_endpoint_name: self.psc_endpoint_name.clone(),
            ..ConsumerParams::new(&self.project_id, &self.service_attachment_uri)
        }
    }
}

#[derive(Args, Debug)]
pub struct VmArgs {
    /// VM を作成するプロジェクト ID
    #[arg(long, env = "PSCFLOW_PROJECT_ID")]
    pub project_id: String,
    #[arg(long, env = "PSCFLOW_REGION", default_value = DEFAULT_REGION)]
    pub region: String,
    #[arg(long)]
    pub consumer_vpc_name: Option<String>,
    #[arg(long)]
    pub vm_subnet_name: Option<String>,
    #[arg(long)]
    pub instance_name: Option<String>,
    #[arg(long)]
    pub machine_type: Option<String>,
    #[arg(long)]
    pub os_image: Option<String>,
    #[command(flatten)]
    pub common: CommonArgs,
}

impl VmArgs {
    fn params(&self) -> VmParams {
        let defaults = VmParams::new(&self.project_id);
        VmParams {
            region: self.region.clone(),
            consumer_vpc_name: self.consumer_vpc_name.clone(),
            vm_subnet_name: self.vm_subnet_name.clone(),
            instance_name: self.instance_name.clone().unwrap_or(defaults.instance_name),
            machine_type: self.machine_type.clone().unwrap_or(defaults.machine_type),
            os_image: self.os_image.clone().unwrap_or(defaults.os_image),
            project_id: defaults.project_id,
        }
    }
}

#[derive(Args, Debug)]
pub struct SqlArgs {
    /// Cloud SQL を作成する Producer のプロジェクト ID
    #[arg(long, env = "PSCFLOW_PROJECT_ID")]
    pub producer_project_id: String,
    #[arg(long, env = "PSCFLOW_REGION", default_value = DEFAULT_REGION)]
    pub region: String,
    #[arg(long)]
    pub instance_id: Option<String>,
    /// postgres ユーザーの初期パスワード
    #[arg(long, env = "PSCFLOW_SQL_PASSWORD", hide_env_values = true)]
    pub default_password: Option<String>,
    /// PSC 接続を許可する Consumer のプロジェクト ID
    #[arg(long)]
    pub allowed_consumer_project_id: Option<String>,
    #[arg(long)]
    pub tier: Option<String>,
    #[arg(long)]
    pub database_version: Option<String>,
    #[arg(long)]
    pub deletion_protection: bool,
    /// 自動バックアップを無効化
    #[arg(long)]
    pub no_backup: bool,
    /// バックアップ開始時刻（HH:MM）
    #[arg(long)]
    pub backup_start_time: Option<String>,
    /// メンテナンス曜日（1=日曜, 7=土曜）
    #[arg(long)]
    pub maintenance_day: Option<u32>,
    /// メンテナンス時刻（0-23）
    #[arg(long)]
    pub maintenance_hour: Option<u32>,
    #[arg(long)]
    pub maintenance_update_track: Option<String>,
    /// PSC の有効化を待たずに終了
    #[arg(long)]
    pub no_wait: bool,
    #[command(flatten)]
    pub common: CommonArgs,
}

impl SqlArgs {
    fn params(&self) -> SqlParams {
        let d = SqlParams::new(&self.producer_project_id);
        SqlParams {
            region: self.region.clone(),
            instance_id: self.instance_id.clone().unwrap_or(d.instance_id),
            default_password: self.default_password.clone().unwrap_or(d.default_password),
            allowed_consumer_project_id: self.allowed_consumer_project_id.clone(),
            tier: self.tier.clone().unwrap_or(d.tier),
            database_version: self.database_version.clone().unwrap_or(d.database_version),
            deletion_protection: self.deletion_protection,
            backup_enabled: !self.no_backup,
            backup_start_time: self.backup_start_time.clone().unwrap_or(d.backup_start_time),
            maintenance_day: self.maintenance_day.unwrap_or(d.maintenance_day),
            maintenance_hour: self.maintenance_hour.unwrap_or(d.maintenance_hour),
            maintenance_update_track: self
                .maintenance_update_track
                .clone()
                .unwrap_or(d.maintenance_update_track),
            producer_project_id: d.producer_project_id,
        }
    }
}

#[derive(Args, Debug)]
pub struct ManagedArgs {
    /// Consumer のプロジェクト ID
    #[arg(long, env = "PSCFLOW_PROJECT_ID")]
    pub project_id: String,
    #[arg(long, env = "PSCFLOW_REGION", default_value = DEFAULT_REGION)]
    pub region: String,
    /// 接続先の Service Attachment URI
    #[arg(long)]
    pub service_attachment_uri: String,
    /// 出力を JSON で表示
    #[arg(long)]
    pub json: bool,
}

fn non_empty(values: &[String]) -> Option<Vec<String>> {
    (!values.is_empty()).then(|| values.to_vec())
}

impl DeployTarget {
    pub fn folder(&self) -> FolderKind {
        match self {
            DeployTarget::Producer(_) => FolderKind::Producer,
            DeployTarget::Consumer(_) | DeployTarget::Managed(_) => FolderKind::Consumer,
            DeployTarget::CreateVm(_) => FolderKind::CreateVm,
            DeployTarget::CreateSql(_) => FolderKind::CreateSql,
        }
    }

    fn project_id(&self) -> &str {
        match self {
            DeployTarget::Producer(a) => &a.project_id,
            DeployTarget::Consumer(a) => &a.project_id,
            DeployTarget::CreateVm(a) => &a.project_id,
            DeployTarget::CreateSql(a) => &a.producer_project_id,
            DeployTarget::Managed(a) => &a.project_id,
        }
    }

    fn json(&self) -> bool {
        match self {
            DeployTarget::Producer(a) => a.common.json,
            DeployTarget::Consumer(a) => a.common.json,
            DeployTarget::CreateVm(a) => a.common.json,
            DeployTarget::CreateSql(a) => a.common.json,
            DeployTarget::Managed(a) => a.json,
        }
    }

    /// 外部コマンドを実行する前のパラメータ検証
    pub fn validate(&self) -> pscflow_cloud_gcp::Result<()> {
        match self {
            DeployTarget::Producer(a) => a.params().validate(),
            DeployTarget::Consumer(a) => a.params().validate(),
            DeployTarget::CreateVm(a) => a.params().validate(),
            DeployTarget::CreateSql(a) => a.params().validate(),
            DeployTarget::Managed(a) => validate_service_attachment_uri(&a.service_attachment_uri),
        }
    }
}

/// 1回のデプロイの結果
struct Completed {
    report: DeployReport,
    message: Option<String>,
}

impl From<DeployReport> for Completed {
    fn from(report: DeployReport) -> Self {
        Self {
            report,
            message: None,
        }
    }
}

async fn execute(ctx: &AppContext, target: &DeployTarget) -> Result<Completed, DeployFailure> {
    let provisioner = &ctx.provisioner;
    match target {
        DeployTarget::Producer(a) => {
            let request = a
                .params()
                .into_request()?
                .capabilities_already_enabled(a.common.capabilities_enabled);
            Ok(provisioner.deploy(&request).await?.into())
        }
        DeployTarget::Consumer(a) => {
            let request = a
                .params()
                .into_request()?
                .capabilities_already_enabled(a.common.capabilities_enabled);
            Ok(provisioner.deploy(&request).await?.into())
        }
        DeployTarget::CreateVm(a) => {
            let request = a
                .params()
                .into_request()?
                .capabilities_already_enabled(a.common.capabilities_enabled);
            Ok(provisioner.deploy(&request).await?.into())
        }
        DeployTarget::CreateSql(a) if a.no_wait => {
            let request = a
                .params()
                .into_request()?
                .capabilities_already_enabled(a.common.capabilities_enabled);
            Ok(provisioner.deploy(&request).await?.into())
        }
        DeployTarget::CreateSql(a) => {
            let sql = provisioner
                .deploy_sql_with_psc(a.params(), a.common.capabilities_enabled)
                .await?;
            Ok(Completed {
                report: sql.report,
                message: Some(sql.message),
            })
        }
        DeployTarget::Managed(a) => {
            let defaults = ManagedDefaults {
                region: a.region.clone(),
                ..ManagedDefaults::new(&a.project_id)
            };
            Ok(provisioner
                .deploy_managed(&a.service_attachment_uri, &defaults)
                .await?
                .into())
        }
    }
}

pub async fn handle(ctx: &AppContext, target: DeployTarget) -> anyhow::Result<()> {
    run(ctx, target, ctx.settings.overall_deadline()).await
}

async fn run(ctx: &AppContext, target: DeployTarget, deadline: Duration) -> anyhow::Result<()> {
    let folder = target.folder();
    println!("{}", format!("{} をデプロイします...", folder).blue().bold());
    ctx.print_settings_source();
    println!("プロジェクト: {}", target.project_id().cyan());

    target.validate()?;

    let version = ctx.provisioner.gcloud().check_installed().await?;
    tracing::debug!("gcloud: {}", version);

    let lock = ctx.state.acquire_lock(folder.name()).await?;
    let started_at = Utc::now();

    println!();
    let spinner = Spinner::new(format!("{} を適用中...", folder));

    // 期限切れで待機をやめても、実行中の terraform は止めない
    let Ok(outcome) = tokio::time::timeout(deadline, execute(ctx, &target)).await else {
        let message = format!(
            "デプロイが制限時間（{}秒）内に完了しませんでした。terraform の適用はまだ実行中の可能性があります",
            deadline.as_secs()
        );
        spinner.finish_error("状態不明");
        let record = DeployRecord::new(folder.name(), DeployStatus::Unknown)
            .with_project(target.project_id())
            .with_message(&message)
            .started_at(started_at);
        save_record(ctx, record).await;

        println!();
        println!("{}", "デプロイの結果は不明です".yellow().bold());
        println!(
            "  {}",
            "完了を確認してから `psc output` で出力を取得してください".yellow()
        );
        lock.release().await?;
        return Err(anyhow::anyhow!(message));
    };

    let result = match outcome {
        Ok(done) => {
            let report = &done.report;
            match report.caveat {
                Some(category) => spinner.finish_success(&format!(
                    "{} を受け付けました（{}）",
                    folder, category
                )),
                None => spinner.finish_success(&format!("{} のデプロイが完了しました", folder)),
            }

            let mut record = DeployRecord::new(folder.name(), report.status())
                .with_project(&report.project_id)
                .with_category(report.caveat)
                .with_attempts(report.attempts.clone())
                .with_output(report.output.clone())
                .started_at(started_at);
            if let Some(message) = &done.message {
                record = record.with_message(message);
            }
            save_record(ctx, record).await;

            print_summary(&done);
            print_output(&report.output, target.json())?;
            Ok(())
        }
        Err(failure) => {
            spinner.finish_error(&failure.to_string());
            let record = DeployRecord::new(folder.name(), DeployStatus::Failed)
                .with_project(target.project_id())
                .with_category(failure.category())
                .with_message(failure.to_string())
                .with_attempts(failure.attempts.clone())
                .started_at(started_at);
            save_record(ctx, record).await;

            print_failure(&failure);
            Err(failure.into())
        }
    };

    lock.release().await?;
    result
}

async fn save_record(ctx: &AppContext, record: DeployRecord) {
    if let Err(e) = ctx.state.record(record).await {
        tracing::warn!("デプロイ履歴を保存できませんでした: {}", e);
    }
}

fn print_summary(done: &Completed) {
    let report = &done.report;
    println!();
    println!(
        "{} {} ({})",
        "✓".green(),
        report.folder.to_string().cyan(),
        report.status()
    );
    println!("  試行回数: {}", report.attempts.len());
    if report.caveat.is_some() {
        println!(
            "  {}",
            "プロバイダ側で処理が継続しています。完了まで時間がかかる場合があります".yellow()
        );
    }
    if let Some(message) = &done.message {
        println!("  {}", message);
    }
    if report.output.fallback {
        println!(
            "  {}",
            "terraform の出力を読み取れなかったため入力値のみ表示します".yellow()
        );
    }
    println!();
}

fn print_failure(failure: &DeployFailure) {
    println!();
    println!("{}", "デプロイに失敗しました".red().bold());
    for attempt in &failure.attempts {
        let result = match attempt.category {
            Some(category) => category.to_string().red(),
            None => "ok".green(),
        };
        println!(
            "  • {} #{}: {} ({}ms)",
            attempt.phase,
            attempt.attempt_number,
            result,
            attempt.duration_ms()
        );
    }
    match failure.category() {
        Some(ErrorCategory::PermissionDenied) => println!(
            "{}",
            "プロジェクトに対する権限を確認してから再実行してください".yellow()
        ),
        Some(ErrorCategory::CapabilityPropagating) => println!(
            "{}",
            "API の有効化が反映されるまで数分待ってから再実行してください".yellow()
        ),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::build_provisioner;
    use pscflow_cloud::StateManager;
    use pscflow_cloud::testing::{Reply, ScriptedRunner};
    use pscflow_config::Settings;
    use std::sync::Arc;
    use tempfile::{TempDir, tempdir};

    fn context(root: &TempDir, runner: Arc<ScriptedRunner>) -> AppContext {
        let settings = Settings {
            terraform_root: root.path().join("terraform"),
            propagation_wait_secs: 0,
            ..Settings::default()
        };
        std::fs::create_dir_all(settings.terraform_root.join("producer")).unwrap();
        AppContext {
            provisioner: build_provisioner(&settings, runner).unwrap(),
            state: StateManager::new(root.path()),
            settings,
            settings_path: None,
        }
    }

    fn producer_target() -> DeployTarget {
        DeployTarget::Producer(ProducerArgs {
            project_id: "p-1".to_string(),
            region: DEFAULT_REGION.to_string(),
            allowed_consumer_project_ids: vec!["c-1".to_string()],
            internal_firewall_source_ranges: Vec::new(),
            psc_ip_range_prefix_length: None,
            common: CommonArgs::default(),
        })
    }

    fn sql_args() -> SqlArgs {
        SqlArgs {
            producer_project_id: "p-1".to_string(),
            region: DEFAULT_REGION.to_string(),
            instance_id: None,
            default_password: None,
            allowed_consumer_project_id: Some("c-1".to_string()),
            tier: None,
            database_version: None,
            deletion_protection: false,
            no_backup: false,
            backup_start_time: None,
            maintenance_day: None,
            maintenance_hour: None,
            maintenance_update_track: None,
            no_wait: false,
            common: CommonArgs::default(),
        }
    }

    #[test]
    fn test_sql_args_fall_back_to_defaults() {
        let params = sql_args().params();
        assert_eq!(params.instance_id, "producer-sql");
        assert_eq!(params.tier, "db-f1-micro");
        assert_eq!(params.maintenance_day, 7);
        assert!(params.backup_enabled);
        assert_eq!(params.allowed_consumer_project_id.as_deref(), Some("c-1"));
    }

    #[test]
    fn test_sql_args_validated_before_running() {
        let target = DeployTarget::CreateSql(SqlArgs {
            maintenance_hour: Some(24),
            ..sql_args()
        });
        assert!(target.validate().is_err());
        assert_eq!(target.folder(), FolderKind::CreateSql);
        assert_eq!(target.project_id(), "p-1");
    }

    #[test]
    fn test_empty_lists_are_not_sent() {
        let args = ProducerArgs {
            project_id: "p-1".to_string(),
            region: "asia-northeast1".to_string(),
            allowed_consumer_project_ids: vec!["c-1".to_string(), "c-2".to_string()],
            internal_firewall_source_ranges: Vec::new(),
            psc_ip_range_prefix_length: None,
            common: CommonArgs::default(),
        };
        let params = args.params();
        assert_eq!(params.internal_firewall_source_ranges, None);
        assert_eq!(params.allowed_consumer_project_ids.len(), 2);
        assert_eq!(params.region, "asia-northeast1");
    }

    #[test]
    fn test_managed_targets_consumer_folder() {
        let target = DeployTarget::Managed(ManagedArgs {
            project_id: "c-1".to_string(),
            region: DEFAULT_REGION.to_string(),
            service_attachment_uri: "projects/p/regions/r/forwardingRules/fr".to_string(),
            json: true,
        });
        assert_eq!(target.folder(), FolderKind::Consumer);
        assert!(target.json());
        assert!(target.validate().is_err());
    }

    #[tokio::test]
    async fn test_overall_deadline_reports_unknown() {
        let root = tempdir().unwrap();
        let runner = Arc::new(
            ScriptedRunner::new().on("apply", vec![Reply::Slow(Duration::from_secs(30))]),
        );
        let ctx = context(&root, runner.clone());

        let err = run(&ctx, producer_target(), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("まだ実行中の可能性があります"));

        let state = ctx.state.load().await.unwrap();
        let record = state.get("producer").unwrap();
        assert_eq!(record.status, DeployStatus::Unknown);
        assert_eq!(record.project_id.as_deref(), Some("p-1"));
        assert_eq!(record.category, None);

        // ロックは解放され、次のデプロイを妨げない
        assert!(!root.path().join(".pscflow/lock-producer.json").exists());
        assert_eq!(runner.count("terraform apply"), 1);
    }

    #[tokio::test]
    async fn test_run_within_deadline_succeeds() {
        let root = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let ctx = context(&root, runner.clone());

        run(&ctx, producer_target(), Duration::from_secs(60))
            .await
            .unwrap();

        let state = ctx.state.load().await.unwrap();
        assert_eq!(
            state.get("producer").map(|r| r.status),
            Some(DeployStatus::Succeeded)
        );
        assert!(!root.path().join(".pscflow/lock-producer.json").exists());
    }
}
