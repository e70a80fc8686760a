//! img2ami: register raw disk images as EC2 machine images
//!
//! `register` writes a local image onto an EBS volume through a short-lived
//! worker instance and registers the snapshot as an AMI. `cleanup-orphans`
//! removes tagged workers and volumes that earlier runs left behind.

use anyhow::{Context, Result};
use chrono::Duration;
use clap::{Parser, Subcommand};
use img2ami::aws::{AwsContext, CleanupConfig, TagBasedCleanup};
use img2ami::{RegistrationError, config, orchestrator};
use img2ami_common::defaults::{
    DEFAULT_DEVICE_NAME, DEFAULT_MAX_ATTEMPTS, DEFAULT_ORPHAN_MIN_AGE_HOURS,
    DEFAULT_ROOT_DEVICE_NAME, DEFAULT_SECURITY_GROUP, DEFAULT_SSH_CONNECT_TIMEOUT_SECS,
    DEFAULT_SSH_USER, DEFAULT_TRANSFER_TIMEOUT_SECS,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

/// Exit code for usage and validation errors, matching clap's
const EXIT_USAGE: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "img2ami")]
#[command(about = "Register raw disk images as EC2 machine images")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

/// Arguments for the register command
#[derive(clap::Args, Debug)]
struct RegisterArgs {
    /// Raw disk image to register
    #[arg(long)]
    image: PathBuf,

    /// AWS region
    #[arg(long)]
    region: String,

    /// AMI the worker instance boots from
    #[arg(long)]
    worker_ami: String,

    /// EC2 key pair installed on the worker
    #[arg(long)]
    key_name: String,

    /// Worker instance type
    #[arg(long)]
    instance_type: String,

    /// Name of the registered image
    #[arg(long)]
    name: String,

    /// Architecture of the registered image (x86_64, arm64, ...)
    #[arg(long)]
    arch: String,

    /// Description of the registered image
    #[arg(long)]
    description: Option<String>,

    /// VPC subnet for the worker (uses the default VPC if not specified)
    #[arg(long)]
    subnet_id: Option<String>,

    /// Base64-encoded user data for the worker
    #[arg(long)]
    user_data: Option<String>,

    /// Volume size in GiB (default: image size rounded up)
    #[arg(long)]
    volume_size: Option<u64>,

    /// Security group name for the worker
    #[arg(long, default_value = DEFAULT_SECURITY_GROUP)]
    security_group: String,

    /// Root device name of the registered image
    #[arg(long, default_value = DEFAULT_ROOT_DEVICE_NAME)]
    root_device_name: String,

    /// Device name of the working volume on the worker
    #[arg(long, default_value = DEFAULT_DEVICE_NAME)]
    device_name: String,

    /// Private key for ssh (default: ~/.ssh/<key-name>.pem)
    #[arg(long)]
    ssh_key: Option<PathBuf>,

    /// Login user on the worker
    #[arg(long, default_value = DEFAULT_SSH_USER)]
    ssh_user: String,

    /// ssh connect timeout in seconds
    #[arg(long, default_value_t = DEFAULT_SSH_CONNECT_TIMEOUT_SECS)]
    ssh_connect_timeout: u64,

    /// Upper bound in seconds for the upload and the device write
    #[arg(long, default_value_t = DEFAULT_TRANSFER_TIMEOUT_SECS)]
    transfer_timeout: u64,

    /// Full attempts before giving up
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
    max_attempts: u32,

    /// AWS profile to use (overrides AWS_PROFILE env var)
    #[arg(long, env = "AWS_PROFILE")]
    aws_profile: Option<String>,

    /// Validate configuration and check the name without creating resources
    #[arg(long)]
    dry_run: bool,

    /// Write a JSON report here
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl From<RegisterArgs> for config::RunConfig {
    fn from(args: RegisterArgs) -> Self {
        Self {
            image: config::ImageConfig {
                path: args.image,
                name: args.name,
                description: args.description,
                architecture: args.arch,
                root_device_name: args.root_device_name,
                volume_size_gib: args.volume_size,
            },
            aws: config::AwsConfig {
                region: args.region,
                aws_profile: args.aws_profile,
            },
            worker: config::WorkerConfig {
                ami: args.worker_ami,
                instance_type: args.instance_type,
                key_name: args.key_name,
                security_group: args.security_group,
                subnet_id: args.subnet_id,
                user_data: args.user_data,
            },
            transfer: config::TransferConfig {
                ssh_key: args.ssh_key,
                ssh_user: args.ssh_user,
                device_name: args.device_name,
                connect_timeout_secs: args.ssh_connect_timeout,
                transfer_timeout_secs: args.transfer_timeout,
            },
            budgets: config::WaitBudgets::default(),
            flags: config::RuntimeFlags {
                max_attempts: args.max_attempts,
                dry_run: args.dry_run,
                output: args.output,
            },
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a raw disk image as an AMI
    Register(Box<RegisterArgs>),

    /// Clean up orphaned workers and volumes using tag-based discovery
    CleanupOrphans {
        /// AWS region to clean
        #[arg(long)]
        region: String,

        /// Minimum age in hours before considering a resource orphaned
        #[arg(long, default_value_t = DEFAULT_ORPHAN_MIN_AGE_HOURS)]
        min_age_hours: u64,

        /// Only clean up resources from a specific run ID
        #[arg(long)]
        run_id: Option<String>,

        /// AWS profile to use
        #[arg(long, env = "AWS_PROFILE")]
        aws_profile: Option<String>,

        /// Actually delete resources (default is dry-run)
        #[arg(long)]
        execute: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            print_error(&e);
            let usage = e
                .downcast_ref::<RegistrationError>()
                .is_some_and(RegistrationError::is_validation);
            if usage {
                ExitCode::from(EXIT_USAGE)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

/// Print error in a user-friendly way
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();

    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }

    if let Some(hint) = e
        .downcast_ref::<RegistrationError>()
        .and_then(RegistrationError::suggestion)
    {
        let _ = writeln!(stderr, "  \x1b[36mHint:\x1b[0m {hint}");
    }

    if std::env::var("RUST_BACKTRACE").is_err() {
        let _ = writeln!(
            stderr,
            "\n\x1b[2mSet RUST_BACKTRACE=1 for a detailed backtrace\x1b[0m"
        );
    } else {
        let backtrace = e.backtrace();
        if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
            let _ = writeln!(stderr, "\n\x1b[2mBacktrace:\x1b[0m\n{backtrace}");
        }
    }
}

fn init_tracing() {
    let mut filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    // The AWS SDK is chatty at info
    for directive in ["aws_config=warn", "aws_sdk_ec2=warn", "aws_smithy_runtime=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    match args.command {
        Command::Register(register_args) => {
            let config: config::RunConfig = (*register_args).into();
            // Local checks run before anything talks to AWS
            let plan = config.validate()?;

            let Some(report) = orchestrator::register_image(&plan).await? else {
                println!("Dry run passed: '{}' is free to register.", plan.image_name());
                return Ok(());
            };

            report.print_summary();
            if let Some(path) = plan.output() {
                report.write_json(path)?;
            }
        }

        Command::CleanupOrphans {
            region,
            min_age_hours,
            run_id,
            aws_profile,
            execute,
        } => {
            handle_cleanup_orphans(region, min_age_hours, run_id, aws_profile, execute).await?;
        }
    }

    Ok(())
}

/// Handle the cleanup-orphans command
async fn handle_cleanup_orphans(
    region: String,
    min_age_hours: u64,
    run_id: Option<String>,
    aws_profile: Option<String>,
    execute: bool,
) -> Result<()> {
    let mode = if execute { "EXECUTE" } else { "DRY-RUN" };
    info!(
        region = %region,
        min_age_hours,
        run_id = ?run_id,
        mode,
        "Cleaning up orphaned resources"
    );

    let min_age = i64::try_from(min_age_hours)
        .ok()
        .and_then(Duration::try_hours)
        .context("--min-age-hours is out of range")?;

    let ctx = AwsContext::new(&region, aws_profile.as_deref()).await;
    let cleanup = TagBasedCleanup::from_context(&ctx);
    let config = CleanupConfig {
        min_age,
        run_id,
        dry_run: !execute,
    };

    let report = cleanup.cleanup(&config).await?;

    println!("\n=== Cleanup Report ===");
    println!("Mode: {mode}");
    println!("Region: {region}");
    println!();
    println!("Resources found: {}", report.total_found);
    println!("  Worker instances: {}", report.instances);
    println!("  Working volumes:  {}", report.volumes);
    println!("  Snapshots:        {}", report.snapshots);
    println!();
    if execute {
        println!("Deleted: {}", report.deleted);
        println!("Failed:  {}", report.failed);
    } else {
        println!("Skipped: {} (dry-run mode)", report.skipped);
        println!();
        println!("Run with --execute to actually delete resources.");
    }

    Ok(())
}
