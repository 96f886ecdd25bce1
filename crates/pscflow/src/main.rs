mod commands;
mod context;
mod progress;

use clap::{Parser, Subcommand};
use commands::deploy::DeployTarget;
use context::AppContext;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "psc")]
#[command(about = "Private Service Connect の構成を terraform でプロビジョニングする", long_about = None)]
struct Cli {
    /// 設定ファイルのパス（省略時は自動探索）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// リソースフォルダを含む terraform ディレクトリ
    #[arg(long, global = true, env = "PSCFLOW_TERRAFORM_ROOT")]
    terraform_root: Option<PathBuf>,

    /// デバッグログを出力
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// リソースフォルダをデプロイ
    Deploy {
        #[command(subcommand)]
        target: DeployTarget,
    },
    /// 直前のデプロイの出力を表示
    Output {
        /// リソースフォルダ (producer, consumer, create-vm, create-sql)
        folder: String,
        /// JSON で表示
        #[arg(long)]
        json: bool,
    },
    /// Cloud SQL インスタンスの PSC 有効化を待機
    #[command(name = "await-psc")]
    AwaitPsc {
        /// Producer のプロジェクト ID
        #[arg(long, env = "PSCFLOW_PROJECT_ID")]
        project_id: String,
        /// Cloud SQL インスタンス ID
        #[arg(long)]
        instance_id: String,
        /// 最大待機時間（分）。省略時は設定ファイルの値
        #[arg(long)]
        max_wait_minutes: Option<u64>,
    },
    /// デプロイ履歴を表示
    History {
        /// リソースフォルダ（指定時は試行の詳細を表示）
        folder: Option<String>,
    },
    /// バージョン情報を表示
    Version,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ログは stderr、結果は stdout
    init_tracing(cli.verbose);

    // Versionコマンドは設定ファイル不要
    if matches!(cli.command, Commands::Version) {
        println!("pscflow {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let ctx = AppContext::load(cli.config.as_deref(), cli.terraform_root)?;

    match cli.command {
        Commands::Deploy { target } => commands::deploy::handle(&ctx, target).await,
        Commands::Output { folder, json } => commands::output::handle(&ctx, &folder, json).await,
        Commands::AwaitPsc {
            project_id,
            instance_id,
            max_wait_minutes,
        } => commands::await_psc::handle(&ctx, &project_id, &instance_id, max_wait_minutes).await,
        Commands::History { folder } => commands::history::handle(&ctx, folder.as_deref()).await,
        Commands::Version => Ok(()),
    }
}
