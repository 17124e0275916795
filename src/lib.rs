#![forbid(unsafe_code)]

pub mod adapters;
pub mod app;
mod cli;
mod commands;
pub mod domain;
pub mod infrastructure;
pub mod ports;

#[cfg(test)]
mod test_utils;

use anyhow::{bail, Context};
use clap::Parser;
use serde::Serialize;

use adapters::TomlConfigStore;
use app::AppController;
use cli::{Args, Commands};
use domain::{DetectedTool, LiveMetrics, ToolCategory};

pub fn run() {
    let args = Args::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(dispatch(args)) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn dispatch(args: Args) -> anyhow::Result<()> {
    let store = match &args.data_dir {
        Some(dir) => TomlConfigStore::at(dir)?,
        None => TomlConfigStore::new()?,
    };
    let controller = AppController::with_store(store, args.log_level.as_deref())
        .context("Failed to initialize application")?;
    let json = args.json;

    match args.command {
        Commands::Tools { category } => {
            let category = category.as_deref().map(parse_category).transpose()?;
            let tools = commands::list_tools(&controller, category);
            if json {
                print_json(&tools)?;
            } else {
                for tool in tools {
                    println!(
                        "{:<16} {:<24} {:<16} {:<8} {}",
                        tool.id,
                        tool.name,
                        tool.category,
                        tool.strategy,
                        tool.commands.join(", ")
                    );
                }
            }
        }

        Commands::Scan {
            category,
            tool,
            refresh,
        } => {
            if refresh && (tool.is_some() || category.is_some()) {
                commands::invalidate_cache(&controller)?;
            }
            if let Some(id) = tool {
                let detected = commands::scan_tool(&controller, &id).await?;
                if json {
                    print_json(&detected)?;
                } else {
                    print_tool(&detected);
                }
            } else if let Some(category) = category {
                let tools = commands::scan_category(&controller, parse_category(&category)?).await;
                if json {
                    print_json(&tools)?;
                } else {
                    tools.iter().for_each(print_tool);
                }
            } else if json {
                let results = commands::scan_all(&controller, refresh, None).await?;
                print_json(&results)?;
            } else {
                let on_category = |category: ToolCategory, tools: &[DetectedTool]| {
                    println!("[{}]", category);
                    tools.iter().for_each(print_tool);
                };
                commands::scan_all(&controller, refresh, Some(&on_category)).await?;
            }
        }

        Commands::Cached => {
            let cached = commands::get_cached_results(&controller);
            if json {
                print_json(&cached)?;
            } else {
                match cached.last_full_scan {
                    Some(at) => println!("Last full scan: {}", at.to_rfc3339()),
                    None => println!("No full scan recorded"),
                }
                for (category, tools) in &cached.categories {
                    println!("[{}]", category);
                    tools.iter().for_each(print_tool);
                }
            }
        }

        Commands::Invalidate => {
            commands::invalidate_cache(&controller)?;
            if !json {
                println!("Detection cache cleared");
            }
        }

        Commands::Metrics { interval, samples } => {
            let streamed = commands::stream_metrics(&controller, interval, samples, |metrics| {
                if json {
                    if let Ok(line) = serde_json::to_string(metrics) {
                        println!("{}", line);
                    }
                } else {
                    println!("{}", format_metrics(metrics));
                }
            })
            .await;
            commands::shutdown(&controller).await;
            streamed?;
        }

        Commands::Snapshot { refresh } => {
            let snapshot = if refresh {
                commands::get_system_snapshot(&controller, true).await
            } else {
                let result = commands::bootstrap_metrics(&controller).await;
                match result.snapshot {
                    Some(snapshot) => Ok(snapshot),
                    None => Err(domain::DomainError::Collector(
                        result.error.unwrap_or_else(|| "no snapshot".to_string()),
                    )),
                }
            };
            commands::shutdown(&controller).await;
            print_json(&snapshot?)?;
        }

        Commands::Paths => {
            let paths = commands::get_paths(&controller);
            if json {
                print_json(&paths)?;
            } else {
                println!("Config: {}", paths.config_path);
                println!("Data:   {}", paths.data_dir);
                println!("Logs:   {}", paths.logs_dir);
            }
        }
    }

    Ok(())
}

fn parse_category(name: &str) -> anyhow::Result<ToolCategory> {
    match ToolCategory::parse(name) {
        Some(category) => Ok(category),
        None => {
            let known: Vec<_> = ToolCategory::ALL.iter().map(|c| c.as_str()).collect();
            bail!("unknown category '{}' (expected one of: {})", name, known.join(", "))
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_tool(tool: &DetectedTool) {
    println!(
        "  {:<24} {:<14} {:<12} {}",
        tool.display_name,
        tool.status.to_string(),
        tool.version.as_deref().unwrap_or("-"),
        tool.path
            .as_deref()
            .or(tool.description.as_deref())
            .unwrap_or("")
    );
}

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
const MIB: f64 = 1024.0 * 1024.0;

fn format_metrics(m: &LiveMetrics) -> String {
    let mut parts = Vec::new();
    if let Some(load) = m.cpu_load {
        parts.push(format!("cpu {:5.1}%", load));
    }
    if let (Some(used), Some(total)) = (m.mem_used, m.mem_total) {
        parts.push(format!(
            "mem {:.1}/{:.1} GiB",
            used as f64 / GIB,
            total as f64 / GIB
        ));
    }
    if let (Some(read), Some(write)) = (m.disk_read_per_sec, m.disk_write_per_sec) {
        parts.push(format!("disk r {:.1} w {:.1} MiB/s", read / MIB, write / MIB));
    }
    if let Some(all) = m.processes_all {
        parts.push(format!("procs {}", all));
    }
    if let Some(percent) = m.battery_percent {
        let charging = if m.battery_charging == Some(true) { "+" } else { "" };
        parts.push(format!("bat {:.0}%{}", percent, charging));
    }
    if m.has_error {
        parts.push("(errors)".to_string());
    }
    parts.join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_category_accepts_dashes() {
        assert_eq!(parse_category("ai-ml").ok(), Some(ToolCategory::AiMl));
        assert!(parse_category("nope").is_err());
    }

    #[test]
    fn test_format_metrics_skips_missing_fields() {
        let metrics = LiveMetrics {
            cpu_load: Some(12.5),
            mem_used: Some(4 * 1024 * 1024 * 1024),
            mem_total: Some(16 * 1024 * 1024 * 1024),
            ..Default::default()
        };
        assert_eq!(format_metrics(&metrics), "cpu  12.5% | mem 4.0/16.0 GiB");
    }
}
