mod cli;
mod fs_plugin;
mod shutdown;

use std::sync::Arc;

use clap::Parser;

use crawlkit_engine::{CrawlerEngine, EngineConfig, EngineEvent};

use crate::cli::Cli;
use crate::fs_plugin::FsCrawlerPlugin;
use crate::shutdown::{spawn_ctrl_c_handler, ShutdownController, ShutdownEvent};

fn print_event(event: &EngineEvent) {
    match event {
        EngineEvent::CrawlerStarted => println!("crawler started"),
        EngineEvent::CrawlerResumed => println!("crawler resumed"),
        EngineEvent::CrawlerStopping => println!("crawler stopping"),
        EngineEvent::CrawlerStopped => println!("crawler stopped"),
        EngineEvent::CrawlerFinished => println!("crawler finished"),
        EngineEvent::DocumentImported { record } => {
            println!("imported {}", record.reference);
        }
        EngineEvent::RejectedImport { record } => {
            println!("rejected {}", record.reference);
        }
        EngineEvent::RejectedError { record, message } => {
            println!("error {}: {}", record.reference, message);
        }
        EngineEvent::DocumentCommittedRemove { reference } => {
            println!("removed {reference}");
        }
        EngineEvent::Progress { processed, queued } => {
            println!("progress: processed={processed} queued={queued}");
        }
        EngineEvent::Warning { message } => {
            println!("warning: {message}");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = EngineConfig::new(cli.id.clone(), cli.work_dir.clone());
    config.num_threads = cli.num_threads.max(1);
    config.max_documents = cli.max_documents();
    config.orphans_strategy = cli.orphans.into();
    config.stop_on_exceptions = cli.stop_on.iter().copied().map(Into::into).collect();
    config.resume = cli.resume;

    let manifest_path = config.work_dir.join(format!("{}.manifest.jsonl", cli.id));
    let plugin = Arc::new(FsCrawlerPlugin::new(cli.root.clone(), manifest_path));
    let seeds = plugin.discover_seeds()?;

    println!(
        "crawlkit {} id={} root={} seeds={}",
        env!("CARGO_PKG_VERSION"),
        cli.id,
        cli.root.display(),
        seeds.len()
    );

    let engine = Arc::new(CrawlerEngine::open(config, plugin, None).await?);
    let mut events = engine.subscribe();

    let shutdown = Arc::new(ShutdownController::new());
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::unbounded_channel::<ShutdownEvent>();
    spawn_ctrl_c_handler(shutdown.clone(), shutdown_tx);

    let run_engine = engine.clone();
    let mut run_handle = tokio::spawn(async move { run_engine.run(seeds).await });

    let run_result = loop {
        tokio::select! {
            ev_opt = shutdown_rx.recv() => {
                match ev_opt {
                    Some(ShutdownEvent::Graceful) => {
                        println!("stop requested — finishing the current reference before exiting (press CTRL+C again to exit immediately)");
                        engine.request_stop();
                    }
                    Some(ShutdownEvent::Immediate) => {
                        println!("stop requested again — exiting immediately");
                        std::process::exit(130);
                    }
                    None => {}
                }
            }
            evt = events.recv() => {
                match evt {
                    Ok(event) => print_event(&event),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {}
                }
            }
            result = &mut run_handle => {
                break result;
            }
        }
    };

    // Drain any events emitted between the engine finishing and the select
    // loop above observing `run_handle`.
    while let Ok(event) = events.try_recv() {
        print_event(&event);
    }

    match run_result {
        Ok(Ok(())) => {
            let status = engine.status();
            println!(
                "done: processed={} queued={} active={}",
                status.processed, status.queued, status.active
            );
            Ok(())
        }
        Ok(Err(e)) => Err(e.into()),
        Err(join_err) => Err(anyhow::anyhow!("engine task panicked: {join_err}")),
    }
}
