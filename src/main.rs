mod cli;

use clap::Parser;
use cli::{Cli, Command, ConfigAction};
use crossbeam_channel::{never, select, unbounded, Receiver};
use std::io::{BufRead, Write};
use std::path::Path;
use std::process::ExitCode;
use std::thread;

use tubeplayer_lib::audio::CpalBackend;
use tubeplayer_lib::commands::{self, format_duration, Downloads, PlayerEvent, PlayerSession};
use tubeplayer_lib::share::ShareServer;
use tubeplayer_lib::{AppConfig, Catalog, Error, LoopMode, Result};

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {}", e);
            if e.is_recoverable() {
                ExitCode::FAILURE
            } else {
                ExitCode::from(2)
            }
        }
    }
}

/// Ok(false) means the command ran but reported a failure
fn run(cli: Cli) -> Result<bool> {
    let config = AppConfig::load(cli.config.as_deref())?;

    if let Command::Config { action } = &cli.command {
        return config_command(&config, cli.config.as_deref(), action);
    }

    let catalog = Catalog::new(&config.database_path)?;

    match cli.command {
        Command::Download { url, title } => download(&config, catalog, &url, title.as_deref()),
        Command::List => Ok(report(commands::list_tracks(&catalog).map(|tracks| {
            if tracks.is_empty() {
                return "The catalog is empty.".to_string();
            }
            tracks
                .iter()
                .map(|t| {
                    format!(
                        "{:>4}  {:<50}  {:>7}  {}",
                        t.id,
                        t.title,
                        format_duration(t.duration as f64),
                        t.created_at
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        }))),
        Command::Delete { id } => Ok(report(commands::delete_track(&catalog, id))),
        Command::Sync => Ok(report(
            commands::sync_library(&catalog, &config.downloads_dir).map(|r| {
                format!(
                    "Imported {} new tracks, removed {} missing ones.",
                    r.imported, r.pruned
                )
            }),
        )),
        Command::Play {
            ids,
            loop_mode,
            volume,
        } => play(&config, catalog, &ids, loop_mode, volume),
        Command::Share { ids, port } => share(&config, &catalog, &ids, port),
        Command::Config { .. } => Ok(true),
    }
}

fn report(result: std::result::Result<String, String>) -> bool {
    match result {
        Ok(message) => {
            println!("{}", message);
            true
        }
        Err(message) => {
            eprintln!("{}", message);
            false
        }
    }
}

fn config_command(config: &AppConfig, path: Option<&Path>, action: &ConfigAction) -> Result<bool> {
    match action {
        ConfigAction::Show => println!("{}", serde_json::to_string_pretty(config)?),
        ConfigAction::Init => {
            let written = config.save(path)?;
            println!("Wrote {}", written.display());
        }
    }
    Ok(true)
}

fn download(config: &AppConfig, catalog: Catalog, url: &str, title: Option<&str>) -> Result<bool> {
    let downloads = Downloads::from_config(config, catalog)?;
    let runtime = tokio::runtime::Runtime::new()?;

    let result = runtime.block_on(async {
        let progress = |percent: f64| {
            eprint!("\rDownloading... {:5.1}%", percent);
            let _ = std::io::stderr().flush();
        };

        let job = downloads.download_and_record(url, title, progress);
        tokio::pin!(job);

        tokio::select! {
            result = &mut job => result,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nCancelling...");
                downloads.cancel();
                job.await
            }
        }
    });
    eprintln!();

    Ok(report(result.map(|track| {
        format!(
            "Saved \"{}\" as #{} ({})",
            track.title,
            track.id,
            format_duration(track.duration as f64)
        )
    })))
}

fn share(config: &AppConfig, catalog: &Catalog, ids: &[i64], port: Option<u16>) -> Result<bool> {
    let files = match commands::share_tracks(catalog, ids, &config.share_dir) {
        Ok(files) => files,
        Err(message) => {
            eprintln!("{}", message);
            return Ok(false);
        }
    };

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let server = ShareServer::start(&config.share_dir, port.unwrap_or(config.share_port)).await?;
        println!("Sharing {} tracks at {}", files.len(), server.url());
        println!("Press Ctrl-C to stop.");
        tokio::signal::ctrl_c().await?;
        server.shutdown().await?;
        Ok::<_, Error>(())
    })?;
    Ok(true)
}

const HELP: &str = "\
Commands:
  p, pause         pause playback
  r, resume        resume playback
  n, next          next track
  b, prev          previous track
  s, stop          stop playback
  l, loop          switch loop mode (no loop, loop one, loop all)
  v, volume <0-100>
  seek <seconds>
  q, queue         show the queue
  x, quit          leave";

enum Flow {
    Continue,
    Quit,
}

enum Step {
    Input(Option<String>),
    Event(Option<PlayerEvent>),
}

fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
    rx
}

fn handle_input(session: &PlayerSession<CpalBackend>, line: &str) -> Flow {
    let mut words = line.split_whitespace();
    let command = words.next().unwrap_or("");
    let argument = words.next();

    match command {
        "" => {
            let status = session.status();
            println!(
                "{:?}: {} {} / {} (volume {:.0}%, {})",
                status.state,
                status.current_track.as_deref().unwrap_or("-"),
                format_duration(status.position),
                format_duration(status.duration),
                status.volume * 100.0,
                status.loop_mode
            );
        }
        "p" | "pause" => session.pause(),
        "r" | "resume" => session.resume(),
        "n" | "next" => {
            report(session.next_track());
        }
        "b" | "prev" | "previous" => {
            report(session.previous_track());
        }
        "s" | "stop" => session.stop(),
        "l" | "loop" => println!("Loop mode: {}", session.toggle_loop()),
        "v" | "volume" => match argument.and_then(|v| v.parse::<f32>().ok()) {
            Some(volume) => session.set_volume(volume / 100.0),
            None => println!("Usage: volume <0-100>"),
        },
        "seek" => match argument.and_then(|s| s.parse::<f64>().ok()) {
            Some(seconds) => {
                report(session.seek(seconds).map(|_| format!("Jumped to {}", format_duration(seconds))));
            }
            None => println!("Usage: seek <seconds>"),
        },
        "q" | "queue" => {
            for row in session.queue_rows() {
                let marker = if row.is_current { ">" } else { " " };
                println!("{} {:>3}. {}", marker, row.index + 1, row.title);
            }
        }
        "x" | "quit" | "exit" => return Flow::Quit,
        _ => println!("{}", HELP),
    }
    Flow::Continue
}

fn play(
    config: &AppConfig,
    catalog: Catalog,
    ids: &[i64],
    loop_mode: LoopMode,
    volume: Option<u8>,
) -> Result<bool> {
    let session = PlayerSession::from_config(config, catalog)?;
    session.set_loop_mode(loop_mode);
    if let Some(volume) = volume {
        session.set_volume(volume as f32 / 100.0);
    }

    if !report(session.play_selected(ids)) {
        return Ok(false);
    }
    println!("{}", HELP);

    let lines = spawn_stdin_reader();
    let mut stdin_open = true;
    let mut duration = 0.0;
    let mut last_second = None;

    loop {
        let input = if stdin_open { lines.clone() } else { never() };
        let step = select! {
            recv(input) -> line => Step::Input(line.ok()),
            recv(session.events()) -> event => Step::Event(event.ok()),
        };

        match step {
            Step::Input(Some(line)) => {
                if let Flow::Quit = handle_input(&session, line.trim()) {
                    break;
                }
            }
            // Input closed: keep playing until the queue runs out
            Step::Input(None) => stdin_open = false,
            Step::Event(None) => break,
            Step::Event(Some(event)) => {
                match event {
                    PlayerEvent::Duration(seconds) => {
                        duration = seconds;
                        last_second = None;
                    }
                    PlayerEvent::Position(seconds) => {
                        let second = seconds as u64;
                        if last_second != Some(second) {
                            last_second = Some(second);
                            print!(
                                "\r  {} / {}   ",
                                format_duration(seconds),
                                format_duration(duration)
                            );
                            let _ = std::io::stdout().flush();
                        }
                    }
                    PlayerEvent::Finished(_) => println!(),
                }

                if let Some(status) = session.handle_event(event) {
                    report(status);
                }
            }
        }

        // Without input nothing can resume a pause or restart a finished queue
        if !stdin_open && !session.is_active() {
            break;
        }
    }

    session.stop();
    Ok(true)
}
