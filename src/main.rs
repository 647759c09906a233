//! Main entry point for the vfspack CLI app

use std::sync::Arc;

use vfspack::cli::{self, Commands};
use vfspack::extract;
use vfspack::logging::LogSink;
use vfspack::pack::{PackState, Packer};

fn main() -> std::process::ExitCode {
    if let Err(e) = run_app() {
        eprintln!("Error: {}", e);
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

fn run_app() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::run()?;

    let sink = Arc::new(match &args.log_file {
        Some(path) => LogSink::to_file(path, true)?,
        None => LogSink::to_console(),
    });

    match args.command {
        Commands::Pack {
            base,
            output,
            threads,
        } => {
            let mut packer = Packer::with_threads(Arc::clone(&sink), threads);
            packer.begin(base, output);
            // Keep worker output flowing while the background pipeline runs.
            sink.pump_until(|| packer.is_done());
            packer.join();
            if let PackState::Failed(reason) = packer.state() {
                return Err(reason.into());
            }
        }
        Commands::Unpack { archive, output } => {
            let count = extract::unpack_archive(&archive, &output, &sink)?;
            sink.log(&format!("unpacked {count} files into '{}'", output.display()));
        }
        Commands::List { archive } => {
            extract::list_archive(&archive, &sink)?;
        }
    }

    Ok(())
}
