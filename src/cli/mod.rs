mod commands;
mod serve;

use std::path::PathBuf;

use anyhow::Result;
use console::style;

use crate::core::config::EngineConfig;
use crate::core::terminal::{self, print_error};
use crate::logging::init_logging;

fn print_help() {
    terminal::print_banner();

    println!(" {}", style("Engine").bold());
    terminal::print_command("serve", "Run the knowledge-base sync engine");
    println!();
    println!(" {}", style("Bots").bold());
    terminal::print_command("add-bot", "Register a bot record from a TOML file (queues a sync)");
    terminal::print_command("sync", "Re-queue a bot's knowledge-base sync");
    terminal::print_command("status", "Show a bot's sync status");
    println!();
    println!(
        " {} {} <command> [flags]\n",
        style("Usage:").bold(),
        style("insight-sync").green()
    );
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct CommonFlags {
    pub config: Option<PathBuf>,
    pub quiet: bool,
}

pub(crate) fn parse_common_flags(args: &[String], start: usize) -> CommonFlags {
    let mut flags = CommonFlags::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    flags.config = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--quiet" | "-q" => {
                flags.quiet = true;
                i += 1;
            }
            _ => i += 1,
        }
    }
    flags
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct BotFlags {
    pub user: Option<String>,
    pub bot: Option<String>,
}

pub(crate) fn parse_bot_flags(args: &[String], start: usize) -> BotFlags {
    let mut flags = BotFlags::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--user" | "-u" => {
                if i + 1 < args.len() {
                    flags.user = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--bot" | "-b" => {
                if i + 1 < args.len() {
                    flags.bot = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    flags
}

pub(crate) fn parse_file_flag(args: &[String], start: usize) -> Option<PathBuf> {
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--file" | "-f" => {
                if i + 1 < args.len() {
                    return Some(PathBuf::from(&args[i + 1]));
                }
                i += 1;
            }
            _ => i += 1,
        }
    }
    None
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    let cmd = args[1].as_str();
    let common = parse_common_flags(&args, 2);
    let config = EngineConfig::load(common.config.as_deref())?;

    match cmd {
        "serve" => {
            init_logging(common.quiet);
            serve::run_serve(config).await
        }
        "add-bot" => {
            init_logging(true);
            let Some(file) = parse_file_flag(&args, 2) else {
                print_error("Error: --file is required for add-bot.");
                print_help();
                return Ok(());
            };
            commands::run_add_bot(&file, &config).await
        }
        "sync" => {
            init_logging(true);
            let flags = parse_bot_flags(&args, 2);
            let (Some(user), Some(bot)) = (flags.user, flags.bot) else {
                print_error("Error: --user and --bot are required for sync.");
                print_help();
                return Ok(());
            };
            commands::run_queue_sync(&user, &bot, &config).await
        }
        "status" => {
            init_logging(true);
            let flags = parse_bot_flags(&args, 2);
            let (Some(user), Some(bot)) = (flags.user, flags.bot) else {
                print_error("Error: --user and --bot are required for status.");
                print_help();
                return Ok(());
            };
            commands::run_status(&user, &bot, &config).await
        }
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        _ => {
            print_error(&format!("Unknown command: {}", cmd));
            print_help();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_bot_flags, parse_common_flags, parse_file_flag};
    use std::path::PathBuf;

    fn args(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_common_flags_reads_config_and_quiet() {
        let parsed = parse_common_flags(
            &args(&["insight-sync", "serve", "--config", "/tmp/c.toml", "--quiet"]),
            2,
        );
        assert_eq!(parsed.config, Some(PathBuf::from("/tmp/c.toml")));
        assert!(parsed.quiet);
    }

    #[test]
    fn parse_bot_flags_reads_user_and_bot() {
        let parsed = parse_bot_flags(
            &args(&["insight-sync", "sync", "--user", "u1", "--bot", "b1"]),
            2,
        );
        assert_eq!(parsed.user.as_deref(), Some("u1"));
        assert_eq!(parsed.bot.as_deref(), Some("b1"));
    }

    #[test]
    fn parse_bot_flags_tolerates_missing_values() {
        let parsed = parse_bot_flags(&args(&["insight-sync", "sync", "--user"]), 2);
        assert_eq!(parsed.user, None);
        assert_eq!(parsed.bot, None);
    }

    #[test]
    fn parse_file_flag_reads_path() {
        let parsed = parse_file_flag(&args(&["insight-sync", "add-bot", "-f", "bot.toml"]), 2);
        assert_eq!(parsed, Some(PathBuf::from("bot.toml")));
    }
}
