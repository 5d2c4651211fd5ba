//! `npu` — command-line interface for the systolic matrix-multiply NPU.
//!
//! ```text
//! USAGE:
//!   npu profiles                     List register profiles
//!   npu bench [--batch N]            Run the batch benchmark and verify
//!   npu mac                          Single-PE MAC check (legacy bitstream)
//!   npu datapath                     Integrated DMA round trip (legacy bitstream)
//!
//! GLOBAL:
//!   --profile <name>   register profile (default: NPU_PROFILE or hps-msgdma)
//!   --simulate         run against the software model instead of /dev/mem
//!   --poll-budget <n>  status reads allowed per wait
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use npu_chip::ALL_PROFILES;
use npu_driver::{
    BenchmarkPlan, NpuConfig, NpuDevice, PhaseReport, RegisterBus, Sequencer, SharedBuffer,
    SharedMemory, SimulatedNpu,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "npu", about = "Systolic NPU host driver CLI", version)]
struct Cli {
    /// Register profile (see `npu profiles`).
    #[arg(long, global = true)]
    profile: Option<String>,
    /// Use the software model instead of /dev/mem.
    #[arg(long, global = true)]
    simulate: bool,
    /// Status reads allowed per wait before it is reported as a timeout.
    #[arg(long, global = true)]
    poll_budget: Option<u64>,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// List the shipped register profiles.
    Profiles,
    /// Load identity weights, run a batch and check it against the CPU.
    Bench {
        /// Number of 8×8 input matrices.
        #[arg(long, default_value_t = BenchmarkPlan::DEFAULT_BATCH)]
        batch: usize,
    },
    /// Drive the single MAC PE: 3 × 7 + 10.
    Mac,
    /// Stream a marker pattern through the integrated DMA.
    Datapath,
}

impl Cmd {
    const fn name(&self) -> &'static str {
        match self {
            Self::Profiles => "profiles",
            Self::Bench { .. } => "bench",
            Self::Mac => "mac",
            Self::Datapath => "datapath",
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    if let Cmd::Profiles = cli.command {
        cmd_profiles();
        return Ok(());
    }

    let config = build_config(&cli)?;
    if cli.simulate {
        let npu = SimulatedNpu::new(config.profile);
        let mut seq = config.sequencer(npu.registers());
        let mut buf = SharedBuffer::new(npu.memory());
        println!("Profile      : {} (simulated)", config.profile.name);
        dispatch(&cli.command, &mut seq, &mut buf)
    } else {
        let mut device = NpuDevice::open(&config)
            .with_context(|| format!("opening {} (root required)", npu_driver::DEV_MEM))?;
        let (mut seq, mut buf) = device.split();
        println!("Profile      : {}", config.profile.name);
        dispatch(&cli.command, &mut seq, &mut buf)
    }
}

fn build_config(cli: &Cli) -> Result<NpuConfig> {
    let mut config = NpuConfig::from_env().context("reading NPU_* environment")?;
    if let Some(name) = &cli.profile {
        config = config.with_profile_name(name)?;
    }
    if let Some(polls) = cli.poll_budget {
        config = config.with_poll_budget(polls).context("--poll-budget")?;
    }
    tracing::debug!("Using {config:?}");
    Ok(config)
}

fn dispatch<B, M>(cmd: &Cmd, seq: &mut Sequencer<B>, buf: &mut SharedBuffer<M>) -> Result<()>
where
    B: RegisterBus,
    M: SharedMemory,
{
    tracing::info!("Running {}", cmd.name());
    match cmd {
        Cmd::Profiles => cmd_profiles(),
        Cmd::Bench { batch } => cmd_bench(seq, buf, *batch)?,
        Cmd::Mac => cmd_mac(seq)?,
        Cmd::Datapath => cmd_datapath(seq, buf)?,
    }
    Ok(())
}

fn cmd_profiles() {
    for profile in ALL_PROFILES {
        println!("{:<12} {}", profile.name, profile.summary);
        println!(
            "             control {:#010x}+{:#x}  shared {:#010x}+{:#x} (bus {:#010x})",
            profile.control_window.base,
            profile.control_window.span,
            profile.shared_window.base,
            profile.shared_window.span,
            profile.shared_bus_base
        );
    }
}

fn print_phases(phases: &[PhaseReport]) {
    for phase in phases {
        let name = phase.phase().to_string();
        let timeouts = phase.timeouts();
        if timeouts.is_empty() {
            println!("  {name:<13}: ok ({} polls)", phase.total_polls());
        }
        for t in timeouts {
            println!("  {name:<13}: {t}");
        }
    }
}

fn cmd_bench<B, M>(seq: &mut Sequencer<B>, buf: &mut SharedBuffer<M>, batch: usize) -> Result<()>
where
    B: RegisterBus,
    M: SharedMemory,
{
    if batch == 0 {
        bail!("--batch must be at least 1");
    }
    let report = npu_driver::run_benchmark(seq, buf, &BenchmarkPlan::with_batch(batch))
        .context("benchmark setup")?;

    println!("Batch        : {} matrices", report.batch);
    print_phases(&report.phases);
    println!("CPU time     : {:?}", report.cpu_time);
    println!("NPU time     : {:?}", report.npu_time);
    match report.speedup() {
        Some(s) => println!("Speedup      : {s:.2}×"),
        None => println!("Speedup      : n/a"),
    }
    println!(
        "Verified     : {} elements, {} mismatches",
        report.verify.checked, report.verify.mismatch_count
    );
    for m in &report.verify.mismatches {
        println!("  {m}");
    }
    if let Some(dump) = &report.verify.first_failure {
        println!("{dump}");
    }

    if !report.passed() {
        tracing::error!(
            "{} of {} elements differ",
            report.verify.mismatch_count,
            report.verify.checked
        );
        bail!("benchmark FAILED");
    }
    println!("PASS");
    Ok(())
}

fn cmd_mac<B: RegisterBus>(seq: &mut Sequencer<B>) -> Result<()> {
    let report = npu_driver::run_mac_check(seq)?;
    println!("MAC          : {} (expected {})", report.result, report.expected);
    if !report.passed() {
        bail!("MAC check FAILED");
    }
    println!("PASS");
    Ok(())
}

fn cmd_datapath<B, M>(seq: &mut Sequencer<B>, buf: &mut SharedBuffer<M>) -> Result<()>
where
    B: RegisterBus,
    M: SharedMemory,
{
    let report = npu_driver::run_datapath(seq, buf, &npu_driver::DatapathPlan::default())?;
    print_phases(std::slice::from_ref(&report.phase));
    for (i, beat) in report.beats.iter().enumerate() {
        println!("  out[{i:2}] = {beat:#010x}");
    }
    if !report.passed() {
        bail!("datapath FAILED");
    }
    println!("PASS");
    Ok(())
}
