use crate::context::AppContext;
use colored::Colorize;
use pscflow_cloud::{DeployRecord, DeployStatus};

pub async fn handle(ctx: &AppContext, folder: Option<&str>) -> anyhow::Result<()> {
    let state = ctx.state.load().await?;

    if let Some(folder) = folder {
        let record = state
            .get(folder)
            .ok_or_else(|| anyhow::anyhow!("{} のデプロイ履歴はありません", folder))?;
        print_detail(record);
        return Ok(());
    }

    if state.deploys.is_empty() {
        println!("{}", "デプロイ履歴はありません".dimmed());
        return Ok(());
    }

    println!("{}", "デプロイ履歴:".bold());
    for record in state.deploys.values() {
        println!(
            "  {} {} {:<24} {}",
            format!("{:<12}", record.resource_folder).cyan(),
            status_label(record.status),
            record.project_id.as_deref().unwrap_or("-"),
            record.finished_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

fn status_label(status: DeployStatus) -> String {
    let label = format!("{:<10}", status.to_string());
    match status {
        DeployStatus::Succeeded => label.green().to_string(),
        DeployStatus::Accepted | DeployStatus::Unknown => label.yellow().to_string(),
        DeployStatus::Failed => label.red().to_string(),
    }
}

fn print_detail(record: &DeployRecord) {
    println!("{}", record.resource_folder.cyan().bold());
    println!("  状態: {}", status_label(record.status));
    if let Some(project) = &record.project_id {
        println!("  プロジェクト: {}", project);
    }
    println!(
        "  期間: {} → {}",
        record.started_at.format("%Y-%m-%d %H:%M:%S"),
        record.finished_at.format("%H:%M:%S")
    );
    if let Some(category) = record.category {
        println!("  分類: {}", category);
    }
    if let Some(message) = &record.message {
        println!("  メッセージ: {}", message);
    }
    for attempt in &record.attempts {
        println!(
            "  • {} #{} {} ({}ms)",
            attempt.phase,
            attempt.attempt_number,
            attempt
                .category
                .map(|c| c.to_string())
                .unwrap_or_else(|| "ok".to_string()),
            attempt.duration_ms()
        );
    }
}
