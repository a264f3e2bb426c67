//! `pixie`: command-line control of Pixie-16 modules.
//!
//! ```text
//! USAGE:
//!   pixie csr read                     Print the control/status register
//!   pixie csr set <mask>               Set CSR bits
//!   pixie csr clear <mask>             Clear CSR bits
//!   pixie load-fpga <image>            Load both FIPPI FPGA pairs
//!   pixie simulate                     Boot a modelled module end to end
//!   pixie baseline <trace>             Estimate the baseline of a trace file
//! ```
//!
//! Without `--pci` commands run against the software model of a module.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pixie_driver::baseline::{BaselineConfig, Channel};
use pixie_driver::fixture::{tests, BoardKind};
use pixie_driver::{
    csr, select_bus, BusSelection, FippiLoader, FirmwareImage, LoadConfig, Module, ModuleConfig,
    Revision, SimulatedBus, SoftwareModule, Timing,
};
use pixie_hw::{AdcWord, Word};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pixie", about = "Pixie-16 hardware control CLI", version)]
struct Cli {
    /// PCI address of the module (e.g. 0000:05:0d.0). Simulated when absent.
    #[arg(long, global = true)]
    pci: Option<String>,

    /// Crate slot of the module.
    #[arg(long, global = true, default_value_t = 2)]
    slot: usize,

    /// Daughterboard labels in board order (e.g. DB04,DB10). Mainboard when absent.
    #[arg(long, global = true, value_delimiter = ',')]
    boards: Vec<String>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Control/status register access.
    Csr {
        #[command(subcommand)]
        op: CsrOp,
    },
    /// Load both FIPPI FPGA pairs from an image file.
    LoadFpga {
        /// Configuration image.
        image: PathBuf,
        /// Attempts per FPGA pair, PIXIE_FPGA_RETRIES when absent.
        #[arg(long)]
        retries: Option<usize>,
    },
    /// Boot a modelled Rev H module: swap detection, offsets and ADC tests.
    Simulate {
        /// Cross an ADC pair, as BOARD:PAIR (e.g. 1:0).
        #[arg(long)]
        swap: Vec<String>,
        /// Baseline target in percent of the ADC range.
        #[arg(long, default_value_t = 10.0)]
        baseline_percent: f64,
    },
    /// Estimate the baseline of a trace file of whitespace separated samples.
    Baseline {
        /// Trace file, decimal or 0x-prefixed hex samples.
        trace: PathBuf,
        /// ADC resolution.
        #[arg(long, default_value_t = 14)]
        bits: u32,
        /// Histogram buckets.
        #[arg(long, default_value_t = 30)]
        noise_bins: usize,
        /// Noise band in percent.
        #[arg(long, default_value_t = 0.5)]
        noise_percent: f64,
    },
}

#[derive(Subcommand)]
enum CsrOp {
    /// Print the CSR.
    Read,
    /// Set bits.
    Set {
        /// Bit mask, decimal or 0x-prefixed hex.
        mask: String,
    },
    /// Clear bits.
    Clear {
        /// Bit mask, decimal or 0x-prefixed hex.
        mask: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    let boards = board_kinds(&cli.boards)?;

    match cli.command {
        Cmd::Csr { op } => cmd_csr(cli.pci.as_deref(), cli.slot, &boards, &op)?,
        Cmd::LoadFpga { image, retries } => {
            cmd_load_fpga(cli.pci.as_deref(), cli.slot, &boards, &image, retries)?;
        }
        Cmd::Simulate {
            swap,
            baseline_percent,
        } => cmd_simulate(cli.slot, &boards, &swap, baseline_percent)?,
        Cmd::Baseline {
            trace,
            bits,
            noise_bins,
            noise_percent,
        } => cmd_baseline(&trace, bits, BaselineConfig::new(noise_bins, noise_percent))?,
    }

    Ok(())
}

fn board_kinds(labels: &[String]) -> Result<Vec<BoardKind>> {
    labels
        .iter()
        .map(|label| BoardKind::from_label(label).map_err(Into::into))
        .collect()
}

fn module_config(slot: usize, boards: &[BoardKind]) -> ModuleConfig {
    if boards.is_empty() {
        ModuleConfig::mainboard(slot, 0, Revision::F, pixie_hw::MAX_CHANNELS)
    } else {
        ModuleConfig::rev_h(slot, 0, boards)
    }
}

fn parse_word(text: &str) -> Result<Word> {
    let text = text.trim();
    let value = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => Word::from_str_radix(hex, 16),
        None => text.parse(),
    };
    value.with_context(|| format!("invalid number: {text}"))
}

/// Module on the PCI bus or on a software model of the configured layout
fn open_module(pci: Option<&str>, config: ModuleConfig) -> Result<Module> {
    let module = match pci {
        Some(address) => {
            let bus = select_bus(&BusSelection::Pci {
                address: address.to_string(),
            })?;
            Module::new(config, bus)?
        }
        None => {
            let model = SoftwareModule::new(&config);
            let bus = Arc::new(SimulatedBus::with_model(model.clone()));
            Module::new(config, bus)?.with_run_control(Arc::new(model.run_control()))
        }
    };
    tracing::info!("{}: {} bus", module.label(), module.bus().bus_type());
    Ok(module)
}

fn cmd_csr(pci: Option<&str>, slot: usize, boards: &[BoardKind], op: &CsrOp) -> Result<()> {
    let module = open_module(pci, module_config(slot, boards))?;
    match op {
        CsrOp::Read => {}
        CsrOp::Set { mask } => csr::set(&module, parse_word(mask)?)?,
        CsrOp::Clear { mask } => csr::clear(&module, parse_word(mask)?)?,
    }
    println!("CSR: 0x{:08x}", csr::read(&module)?);
    Ok(())
}

fn cmd_load_fpga(
    pci: Option<&str>,
    slot: usize,
    boards: &[BoardKind],
    image: &std::path::Path,
    retries: Option<usize>,
) -> Result<()> {
    let image = FirmwareImage::from_file(image)
        .with_context(|| format!("reading {}", image.display()))?;
    let mut config = LoadConfig::from_env()?;
    if let Some(retries) = retries {
        config = config.with_retries(retries);
    }
    let mut module = open_module(pci, module_config(slot, boards))?;
    module.init_fixtures()?;

    println!(
        "Loading {} ({} bytes, checksum 0x{:08x}) ...",
        image.name(),
        image.len(),
        image.checksum()
    );
    for report in FippiLoader::new(config).boot(&mut module, &image)? {
        println!(
            "  {:<10} attempts={} words={} backoff={} time={:?}",
            report.fpga, report.attempts, report.words, report.backoff, report.duration
        );
    }
    println!("Done.");
    Ok(())
}

fn parse_swap(text: &str) -> Result<(usize, usize)> {
    let Some((board, pair)) = text.split_once(':') else {
        bail!("invalid swap, expected BOARD:PAIR: {text}");
    };
    Ok((
        board.trim().parse().with_context(|| format!("invalid board: {board}"))?,
        pair.trim().parse().with_context(|| format!("invalid pair: {pair}"))?,
    ))
}

fn cmd_simulate(slot: usize, boards: &[BoardKind], swaps: &[String], percent: f64) -> Result<()> {
    let boards = if boards.is_empty() {
        vec![BoardKind::Db04, BoardKind::Db10]
    } else {
        boards.to_vec()
    };
    let config = ModuleConfig::rev_h(slot, 0, &boards)
        .with_timing(Timing::IMMEDIATE)
        .with_trace_length(4096);
    let mut model = SoftwareModule::new(&config);
    for swap in swaps {
        let (board, pair) = parse_swap(swap)?;
        model = model.swap_pair(board, pair);
    }
    let bus = Arc::new(SimulatedBus::with_model(model.clone()));
    bus.set_logging(false);
    let mut module = Module::new(config, bus)?.with_run_control(Arc::new(model.run_control()));
    module.init_fixtures()?;

    let image = FirmwareImage::new("model", vec![0u8; 1024]);
    FippiLoader::new(LoadConfig::default().immediate()).boot(&mut module, &image)?;
    module.boot_fixtures()?;

    println!("Module {}", module.label());
    for db in 0..boards.len() {
        println!("  DB{db} ADCCTRL 0x{:x}", model.adcctrl(db).unwrap_or(0));
    }

    for channel in 0..module.num_channels() {
        module.set_baseline_percent(channel, percent)?;
    }
    module.adjust_offsets()?;
    let baselines = module.analyze_channel_baselines(1)?;
    println!("  chan  fixture  offset-dac  baseline");
    for (channel, baseline) in baselines.iter().enumerate() {
        let label = module.fixtures()?.channels()[channel].label().to_string();
        println!(
            "  {channel:>4}  {label:<7}  {:>10}  {:>8}",
            module.channel_params(channel)?.offset_dac,
            baseline.baseline().map_or_else(|| "-".to_string(), |b| b.to_string())
        );
    }

    for test in [tests::ADC_SWEET_SPOT, tests::ADC_PATTERN_CHECK] {
        if !module.has_test(test) {
            continue;
        }
        let passed = module.run_test(test, &mut |line: &str, level| {
            if level == Level::ERROR {
                println!("    error: {line}");
            } else {
                println!("    {line}");
            }
        })?;
        println!("  {test}: {}", if passed { "pass" } else { "fail" });
    }
    Ok(())
}

fn cmd_baseline(path: &std::path::Path, bits: u32, config: BaselineConfig) -> Result<()> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let trace = text
        .split_whitespace()
        .map(|sample| {
            let word = parse_word(sample)?;
            AdcWord::try_from(word).with_context(|| format!("sample out of range: {sample}"))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut channel = Channel::new(config);
    channel.start(0, bits);
    channel.update(&trace);
    match channel.end() {
        Some(baseline) => println!(
            "{}: samples={} baseline={baseline} margin={}",
            path.display(),
            trace.len(),
            channel.margin()
        ),
        None => bail!("{}: no samples", path.display()),
    }
    Ok(())
}
