pub mod await_psc;
pub mod deploy;
pub mod history;
pub mod output;

use colored::Colorize;
use pscflow_cloud::OutputRecord;

/// 出力レコードを表示
pub fn print_output(output: &OutputRecord, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&output.values)?);
        return Ok(());
    }

    println!("{}", "出力:".bold());
    let width = output.values.keys().map(String::len).max().unwrap_or(0);
    for (key, value) in &output.values {
        let text = match value {
            serde_json::Value::String(s) if s.is_empty() => "-".dimmed().to_string(),
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        println!("  {}  {}", format!("{:width$}", key, width = width).cyan(), text);
    }
    Ok(())
}
