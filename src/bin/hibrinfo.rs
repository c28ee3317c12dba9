use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use hibrimage::hibr::metadata::FileVariant;
use hibrimage::hibr::reader::ImageReader;
use hibrimage::hibr::source::{ByteSource, FileByteSource};
use indicatif::{ProgressBar, ProgressStyle};
use pretty_hex::pretty_hex;
use tracing::{error, Level};

/// Prints the memory-image-information metadata of a Windows hibernation
/// file. Read-only: never writes the reconstructed memory image.
#[derive(Parser, Debug, Clone)]
#[command(name = "hibrinfo", version, about)]
struct Arguments {
    /// Verbose logging to stderr; repeat for trace-level plus a hex dump of
    /// the first probed page.
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to a `hiberfil.sys`-style hibernation file.
    #[arg(value_name = "SOURCE_FILE")]
    source_file: PathBuf,
}

fn run(args: &Arguments) -> Result<()> {
    let source = FileByteSource::open(&args.source_file).context("unable to open source file")?;

    let progress = ProgressBar::new_spinner();
    progress.set_style(
        ProgressStyle::with_template("{spinner} {msg}").expect("static template is valid"),
    );
    progress.set_message("walking page map chain...");
    progress.enable_steady_tick(std::time::Duration::from_millis(120));

    let mut reader: ImageReader<FileByteSource> = ImageReader::new();
    reader
        .open(source)
        .context("unable to open source file")?;
    progress.finish_and_clear();

    print_metadata(&reader).context("unable to print file information")?;

    if args.verbose >= 2 {
        print_first_page_hex(&args.source_file).context("unable to print file information")?;
    }

    Ok(())
}

fn print_metadata<S: ByteSource>(reader: &ImageReader<S>) -> Result<()> {
    let meta = reader.metadata()?;
    let size = reader.size()?;

    println!("Windows Hibernation File Information");
    println!();
    println!("\tVariant:\t\t\t{}", describe_variant(meta.variant));
    println!("\tPage size:\t\t\t{} bytes", meta.page_size);
    if meta.variant == FileVariant::WinXP32 {
        println!(
            "\tMemory blocks page number:\t{}",
            meta.memory_blocks_page_number
        );
    }
    println!("\tTotal pages:\t\t\t{}", meta.total_pages);
    println!("\tFree pages:\t\t\t{}", meta.free_pages);
    println!("\tFeature flags:\t\t\t0x{:08x}", meta.feature_flags);
    println!("\tHibernation flags:\t\t0x{:08x}", meta.hibernation_flags);
    println!("\tSystem time (FILETIME):\t\t{}", meta.system_time_filetime);
    println!();
    println!("\tReconstructed memory image size:\t{size} bytes");

    Ok(())
}

fn describe_variant(variant: FileVariant) -> &'static str {
    match variant {
        FileVariant::WinXP32 => "Windows XP (32-bit)",
        FileVariant::WinXP64 => "Windows XP (64-bit)",
        FileVariant::Win7_32 => "Windows 7 (32-bit)",
        FileVariant::Win7_64 => "Windows 7 (64-bit)",
    }
}

fn print_first_page_hex(path: &PathBuf) -> Result<()> {
    let bytes = std::fs::read(path)?;
    let preview: Vec<u8> = bytes.into_iter().take(256).collect();
    eprintln!("First page (first {} bytes):", preview.len());
    eprintln!("{}", pretty_hex(&preview));
    Ok(())
}

fn main() -> ExitCode {
    let args = Arguments::parse();

    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(match args.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        })
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("failed to set up logger");

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            eprintln!("hibrinfo: {err:#}");
            ExitCode::FAILURE
        }
    }
}
