//! SentinelFS - Pre-write backup filter filesystem
//!
//! Usage:
//!   sentinelfs init <lower_dir>       - Write a default configuration
//!   sentinelfs mount <mount_point>    - Mount the filtered view
//!   sentinelfs unmount <mount_point>  - Unmount a mounted view
//!   sentinelfs status                 - Show configuration status

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use sentinelfs::{config::Config, fs::SentinelFs};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sentinelfs")]
#[command(author = "sentinelfs Contributors")]
#[command(version)]
#[command(about = "Pre-write backup filter filesystem")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "~/.config/sentinelfs/config.json")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration for a volume
    Init {
        /// Directory tree to filter
        lower_dir: PathBuf,

        /// Mount point the filtered view will appear at
        #[arg(long, default_value = "/mnt/sentinelfs")]
        mount_point: PathBuf,

        /// Protected-directory markers
        #[arg(long, value_delimiter = ',')]
        markers: Option<Vec<String>>,
    },

    /// Mount the filtered view
    Mount {
        /// Mount point directory (overrides the configured one)
        mount_point: Option<PathBuf>,

        /// Allow other users to access the mount
        #[arg(long)]
        allow_other: bool,
    },

    /// Unmount a mounted view
    Unmount {
        /// Mount point to unmount
        mount_point: PathBuf,
    },

    /// Show configuration status
    Status,
}

fn main() {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");

    let config_path = expand_tilde(&cli.config);

    if let Err(e) = run_command(cli.command, &config_path) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run_command(command: Commands, config_path: &PathBuf) -> anyhow::Result<()> {
    match command {
        Commands::Init {
            lower_dir,
            mount_point,
            markers,
        } => cmd_init(config_path, lower_dir, mount_point, markers),

        Commands::Mount {
            mount_point,
            allow_other,
        } => cmd_mount(config_path, mount_point, allow_other),

        Commands::Unmount { mount_point } => cmd_unmount(&mount_point),

        Commands::Status => cmd_status(config_path),
    }
}

fn cmd_init(
    config_path: &PathBuf,
    lower_dir: PathBuf,
    mount_point: PathBuf,
    markers: Option<Vec<String>>,
) -> anyhow::Result<()> {
    info!("Initializing SentinelFS configuration...");

    let mut config = Config::default();
    config.mount.lower_dir = lower_dir
        .canonicalize()
        .with_context(|| format!("lower directory {:?} is not accessible", lower_dir))?;
    config.mount.mount_point = mount_point;
    if let Some(markers) = markers {
        config.protect.markers = markers;
    }

    config.validate()?;

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    config.save(config_path)?;

    info!("Configuration saved to {:?}", config_path);
    info!("Volume: {:?}", config.mount.lower_dir);
    info!("Protected markers: {:?}", config.protect.markers);
    info!("");
    info!("Next step: run 'sentinelfs mount' to mount the filtered view");

    Ok(())
}

fn cmd_mount(
    config_path: &PathBuf,
    mount_point: Option<PathBuf>,
    allow_other: bool,
) -> anyhow::Result<()> {
    let mut config = Config::load(config_path)?;
    if let Some(mount_point) = mount_point {
        config.mount.mount_point = mount_point;
    }
    if allow_other {
        config.mount.allow_other = true;
    }

    info!("Starting SentinelFS...");

    let fs = SentinelFs::new(&config)?;

    std::fs::create_dir_all(&config.mount.mount_point)?;

    info!(
        "Mounting {:?} at {:?}",
        config.mount.lower_dir, config.mount.mount_point
    );

    let mut options = vec![
        fuser::MountOption::FSName("sentinelfs".to_string()),
        fuser::MountOption::AutoUnmount,
    ];

    if config.mount.allow_other {
        options.push(fuser::MountOption::AllowOther);
    }
    if config.mount.allow_root {
        options.push(fuser::MountOption::AllowRoot);
    }

    fuser::mount2(fs, &config.mount.mount_point, &options)
        .context("mount failed")?;

    Ok(())
}

fn cmd_unmount(mount_point: &PathBuf) -> anyhow::Result<()> {
    info!("Unmounting {:?}...", mount_point);

    #[cfg(target_os = "linux")]
    let output = std::process::Command::new("fusermount")
        .arg("-u")
        .arg(mount_point)
        .output()?;

    #[cfg(target_os = "macos")]
    let output = std::process::Command::new("umount")
        .arg(mount_point)
        .output()?;

    if output.status.success() {
        info!("Unmounted successfully");
        Ok(())
    } else {
        bail!(
            "Failed to unmount: {}",
            String::from_utf8_lossy(&output.stderr)
        )
    }
}

fn cmd_status(config_path: &PathBuf) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;

    println!("SentinelFS Status");
    println!("=================");
    println!();
    println!("Configuration: {:?}", config_path);
    println!("Volume: {:?}", config.mount.lower_dir);
    println!("Mount point: {:?}", config.mount.mount_point);
    println!("Protected markers: {}", config.protect.markers.join(", "));
    println!("Shadow suffix: {}", config.backup.suffix);
    println!(
        "Copy chunk size: {} KiB",
        config.backup.chunk_size / 1024
    );

    if config.mount.lower_dir.is_dir() {
        println!("Volume check: ok");
    } else {
        println!("Volume check: MISSING (run 'sentinelfs init' again)");
    }

    Ok(())
}

/// Expand ~ to home directory
fn expand_tilde(path: &PathBuf) -> PathBuf {
    if path.starts_with("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(path.strip_prefix("~").unwrap());
        }
    }
    path.clone()
}
