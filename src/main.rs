mod capture;
mod cli;
mod export;
mod filter;
mod frame;
mod pipeline;
mod protocol;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::capture::CaptureSource;
use crate::cli::{Cli, OutputFormat, parse_ports};
use crate::export::{JsonExporter, LogExporter, PacketExporter};
use crate::filter::{ClausePredicate, OperationPredicate};
use crate::pipeline::Pipeline;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.to_string())),
        )
        .init();

    if cli.list_devices {
        for (name, desc) in
            capture::list_devices().context("failed to enumerate capture devices")?
        {
            match desc {
                Some(desc) => println!("{name}\t{desc}"),
                None => println!("{name}"),
            }
        }
        return Ok(());
    }

    let ports = parse_ports(&cli.ports);
    anyhow::ensure!(
        !ports.is_empty(),
        "no usable ports in port specification {:?}",
        cli.ports
    );

    let predicate = build_predicate(cli.filter.as_deref());
    let exporter: Box<dyn PacketExporter + Send> = match cli.output {
        OutputFormat::Log => Box::new(LogExporter),
        OutputFormat::Json => Box::new(JsonExporter),
    };

    let live = cli.file.is_none();
    let source = match &cli.file {
        Some(path) => CaptureSource::open_file(path)
            .with_context(|| format!("failed to open capture file {}", path.display()))?,
        None => {
            let device = capture::resolve_device(cli.interface.as_deref())
                .context("failed to resolve a capture device")?;
            info!(
                event_name = "startup.listening",
                device = %device,
                ports = ?ports,
                "listening for traffic"
            );
            CaptureSource::open_device(&device)
                .with_context(|| format!("failed to open capture device {device:?}"))?
        }
    };

    let link_type = source.link_type();
    let mut pipeline = Pipeline::new(ports, predicate, exporter);

    let stop = Arc::new(AtomicBool::new(false));
    let loop_stop = stop.clone();
    let mut capture_task = tokio::task::spawn_blocking(move || {
        source.run(loop_stop, |time, data| {
            pipeline.handle_frame(link_type, time, data);
        })
    });

    tokio::select! {
        result = &mut capture_task => {
            result.context("capture worker panicked")??;
            if live {
                info!(event_name = "shutdown.capture_ended", "capture loop ended");
            }
        }
        _ = signal::ctrl_c() => {
            info!(event_name = "shutdown.signal", "received ctrl-c, shutting down");
            stop.store(true, Ordering::Relaxed);
            capture_task.await.context("capture worker panicked")??;
        }
    }

    Ok(())
}

/// Compiles the filter expression when one was given. A predicate that does
/// not compile disables filtering rather than aborting startup.
fn build_predicate(expression: Option<&str>) -> Option<Box<dyn OperationPredicate + Send>> {
    let expression = expression?;

    match ClausePredicate::compile(expression) {
        Ok(predicate) => Some(Box::new(predicate)),
        Err(err) => {
            warn!(
                event_name = "startup.filter_compile_failed",
                expression = %expression,
                error.message = %err,
                "failed to compile filter expression, filtering disabled"
            );
            None
        }
    }
}
