use crate::commands::print_output;
use crate::context::AppContext;
use colored::Colorize;

pub async fn handle(ctx: &AppContext, folder: &str, json: bool) -> anyhow::Result<()> {
    let output = ctx.provisioner.get_last_output(folder).await?;

    if !json {
        let state = ctx.state.load().await?;
        match state.get(folder) {
            Some(record) => println!(
                "最終デプロイ: {} ({})",
                record.finished_at.format("%Y-%m-%d %H:%M:%S UTC"),
                record.status.to_string().cyan()
            ),
            None => println!("{}", "このディレクトリからのデプロイ履歴はありません".dimmed()),
        }
        println!();
    }

    print_output(&output, json)
}
