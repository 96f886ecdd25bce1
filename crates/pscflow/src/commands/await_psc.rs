use crate::context::AppContext;
use crate::progress::Spinner;
use colored::Colorize;
use std::time::Duration;

fn minutes(m: u64) -> Duration {
    Duration::from_secs(m.saturating_mul(60))
}

pub async fn handle(
    ctx: &AppContext,
    project_id: &str,
    instance_id: &str,
    max_wait_minutes: Option<u64>,
) -> anyhow::Result<()> {
    let max_wait = max_wait_minutes
        .map(minutes)
        .unwrap_or_else(|| ctx.settings.poll_max_wait());

    println!(
        "{}",
        format!("{} の PSC 有効化を待機します...", instance_id)
            .blue()
            .bold()
    );
    let spinner = Spinner::new(format!(
        "PSC を確認中（最大 {}分、{}秒間隔）",
        max_wait.as_secs() / 60,
        ctx.settings.poll_interval_secs
    ));

    let enabled = ctx
        .provisioner
        .await_async_completion(instance_id, project_id, max_wait)
        .await;

    if enabled {
        spinner.finish_success("PSC が有効になりました");
    } else {
        // 期限切れはエラーではない
        spinner.finish_error("期限内に PSC が有効になりませんでした");
        println!(
            "{}",
            "インスタンスの作成はバックグラウンドで継続しています。後で再確認してください".yellow()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minutes_saturate() {
        assert_eq!(minutes(2), Duration::from_secs(120));
        assert_eq!(minutes(u64::MAX), Duration::from_secs(u64::MAX));
    }
}
