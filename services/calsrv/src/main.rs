//! Meter Calibration Service (`calsrv`)
//!
//! Command-line front end: frame tools that work offline plus calibration runs
//! against a meter on a serial port. Results are printed to stdout as JSON.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use calsrv::logging::init_logging;
use calsrv::{
    create_all_steps, CalibrationExecutor, CalibrationParameters, CalsrvConfig, Communicator,
    ExecutionResult, SerialTransport, StepResult, StepRunner, StepStatus,
};
use dlt645::{DeviceAddress, FrameBuilder, FrameParser};

#[derive(Parser, Debug)]
#[command(name = "calsrv")]
#[command(about = "Electricity meter calibration over DL/T645 frames")]
#[command(version)]
struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, env = "CALSRV_CONFIG")]
    config: Option<PathBuf>,

    /// Serial port, overrides the configuration
    #[arg(short, long)]
    port: Option<String>,

    /// Log level, overrides the configuration (RUST_LOG still wins)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a command frame without sending it
    Build {
        /// Data identifier, 8 hex digits (e.g. 00F81500)
        identifier: String,
        /// Parameter bytes as hex
        #[arg(long, default_value = "")]
        params: String,
        /// Meter address, 12 hex digits
        #[arg(long)]
        address: Option<String>,
    },

    /// Decode a frame given as hex
    Parse {
        /// Frame bytes, whitespace allowed
        frame: String,
    },

    /// List the calibration steps
    Steps,

    /// Run selected calibration steps
    Run {
        /// Step ids, comma separated (e.g. step1,step3)
        #[arg(long, value_delimiter = ',', required = true)]
        steps: Vec<String>,
    },

    /// Run all calibration steps in order
    OneClick,

    /// Check that the meter answers
    TestComm,

    /// Print the effective configuration
    Config,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn progress(step_id: &str, status: StepStatus, result: Option<&StepResult>) -> anyhow::Result<()> {
    match result.and_then(|r| r.correction_value) {
        Some(value) => info!(step = step_id, %status, correction = value, "Step progress"),
        None => info!(step = step_id, %status, "Step progress"),
    }
    Ok(())
}

async fn open_communicator(config: &CalsrvConfig) -> anyhow::Result<Arc<Communicator>> {
    let transport = SerialTransport::new(config.serial.clone())
        .with_context(|| format!("Invalid serial configuration for {}", config.serial.port))?;
    let communicator = Communicator::new(Box::new(transport), config.communication.clone())?;
    communicator
        .connect()
        .await
        .with_context(|| format!("Failed to open {}", config.serial.port))?;
    Ok(Arc::new(communicator))
}

/// Wait for a background run, cancelling it on Ctrl-C
async fn supervise(
    executor: &CalibrationExecutor,
    mut handle: JoinHandle<ExecutionResult>,
) -> anyhow::Result<ExecutionResult> {
    tokio::select! {
        result = &mut handle => return Ok(result?),
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling calibration run");
            executor.cancel_execution();
        },
    }
    Ok(handle.await?)
}

async fn run_calibration(config: &CalsrvConfig, steps: Option<Vec<String>>) -> anyhow::Result<()> {
    let communicator = open_communicator(config).await?;
    let executor = Arc::new(CalibrationExecutor::new(
        communicator.clone(),
        config.execution.clone(),
    ));
    let params: CalibrationParameters = config.parameters.clone();

    let handle = match steps {
        Some(steps) => executor.spawn_selected_steps(steps, params, Arc::new(progress))?,
        None => executor.spawn_one_click_calibration(params, Arc::new(progress))?,
    };
    let result = supervise(&executor, handle).await?;

    info!(stats = ?communicator.statistics(), "Communication statistics");
    communicator.disconnect().await?;
    print_json(&result.to_json())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = CalsrvConfig::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.serial.port = port;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    let _log_guard = init_logging(&config.logging)?;

    match cli.command {
        Command::Build {
            identifier,
            params,
            address,
        } => {
            let params = hex::decode(params.trim()).context("Parameters must be hex")?;
            let address: DeviceAddress = match address {
                Some(address) => address.parse()?,
                None => config.communication.address.parse()?,
            };
            let frame = FrameBuilder::new()
                .with_address(address)
                .with_control_code(config.communication.control_code)
                .build(&identifier, &params)?;
            print_json(&serde_json::json!({
                "identifier": identifier.to_uppercase(),
                "frame": hex::encode_upper(&frame),
                "length": frame.len(),
            }))
        },
        Command::Parse { frame } => {
            let parsed = FrameParser::parse_hex(&frame);
            print_json(&parsed.to_json())?;
            if !parsed.is_success() {
                bail!("frame did not parse: {:?}", parsed.result);
            }
            Ok(())
        },
        Command::Steps => {
            let steps: Vec<_> = create_all_steps()
                .into_iter()
                .map(|step| StepRunner::new(step).summary())
                .collect();
            print_json(&steps)
        },
        Command::Run { steps } => run_calibration(&config, Some(steps)).await,
        Command::OneClick => run_calibration(&config, None).await,
        Command::TestComm => {
            let communicator = open_communicator(&config).await?;
            let report = communicator.test_communication().await;
            info!(diagnostics = ?communicator.transport_diagnostics().await, "Transport");
            communicator.disconnect().await?;
            print_json(&report)?;
            if !report.success {
                bail!("meter did not answer");
            }
            Ok(())
        },
        Command::Config => {
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        },
    }
}
