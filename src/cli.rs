use clap::{ArgAction, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "proxbalance")]
#[command(about = "Memory load balancer daemon for Proxmox VE clusters")]
#[command(version)]
pub struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "config.yml")]
    pub config: PathBuf,

    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Plan one cycle, report what would move, and exit without migrating
    #[arg(long)]
    pub check: bool,

    /// Path to a .env file for loading the API password
    #[arg(long, value_name = "FILE")]
    pub env_file: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["proxbalance"]).unwrap();
        assert_eq!(args.config, PathBuf::from("config.yml"));
        assert_eq!(args.verbose, 0);
        assert!(!args.check);
        assert!(args.env_file.is_none());
    }

    #[test]
    fn test_flags() {
        let args = Args::try_parse_from([
            "proxbalance",
            "-c",
            "/etc/proxbalance.yml",
            "-vv",
            "--check",
            "--env-file",
            "/etc/proxbalance.env",
        ])
        .unwrap();
        assert_eq!(args.config, PathBuf::from("/etc/proxbalance.yml"));
        assert_eq!(args.verbose, 2);
        assert!(args.check);
        assert_eq!(args.env_file, Some(PathBuf::from("/etc/proxbalance.env")));
    }
}
