#[macro_use]
extern crate log;

use anyhow::{bail, Result};
use dectalk_rs::{
    config::{self, Config},
    event::{Event, EventBus},
    native::NativeEngine,
    wav, Engine,
};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();

    let config = config::load().await?;
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.as_slice() {
        [flag, path, text @ ..] if flag == "--wav" => {
            if text.is_empty() {
                bail!("usage: dectalk --wav <path|-> <text>...");
            }
            speak_to_wav(config, path.clone(), text.join(" ")).await
        }
        [] => speak_stdin(config).await,
        _ => bail!("usage: dectalk [--wav <path|-> <text>...]"),
    }
}

#[cfg(all(feature = "native", windows))]
fn backend() -> Arc<dyn NativeEngine> {
    Arc::new(dectalk_rs::native::ffi::FonixTalk::new())
}

#[cfg(not(all(feature = "native", windows)))]
fn backend() -> Arc<dyn NativeEngine> {
    warn!("Built without the native engine, using the simulated one");
    Arc::new(dectalk_rs::native::sim::SimulatedEngine::default())
}

/// Speaks each line read from stdin until `exit` or EOF.
async fn speak_stdin(config: Config) -> Result<()> {
    let bus = EventBus::new();
    if config.print_phonemes {
        print_phonemes(&bus);
    }

    let engine = Engine::start_with_bus(backend(), config.engine, Some(bus))?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim() == "exit" {
            break;
        }
        engine.speak(&line)?;
    }

    let mut engine = tokio::task::spawn_blocking(move || engine.sync().map(|_| engine)).await??;
    engine.shutdown()?;

    Ok(())
}

async fn speak_to_wav(config: Config, path: String, text: String) -> Result<()> {
    tokio::task::spawn_blocking(move || -> Result<()> {
        let engine = Engine::start(backend(), config.engine)?;

        if path == "-" {
            let pcm = engine.speak_to_memory(&text)?;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&wav::header_for_stream())?;
            stdout.write_all(&pcm)?;
            stdout.flush()?;
        } else {
            engine.speak_to_wav(&path, &text)?;
            info!("Wrote {path}");
        }

        Ok(())
    })
    .await?
}

fn print_phonemes(bus: &EventBus) {
    let mut subscriber = bus.subscribe();
    tokio::spawn(async move {
        while let Some(event) = subscriber.recv().await {
            if let Event::Phoneme(_) = event {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => error!("Failed to serialize event: {e}"),
                }
            } else {
                debug!("Received event: {:?}", event);
            }
        }
    });
}
