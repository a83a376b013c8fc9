use chrono::Local;
use clap::Parser;
use crossbeam::channel::{unbounded, Sender};
use dialoguer::{theme::ColorfulTheme, Select};
use midiplex::{
    cli::{validate_destination, validate_sources, Args, Command},
    config::EngineConfig,
    driver::MidirDriver,
    endpoint::{OutputDestination, ProviderKind},
    event_loop::{EventLoop, SessionCommand},
    logging,
    session::{MidiSession, SessionEvent},
    sysex::file,
    ui, MidiplexError, Result,
};
use serde_json::Value;
use std::fs;
use std::io::{self, BufRead};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::thread;

type Session = MidiSession<MidirDriver>;

fn main() {
    let args = Args::parse();
    initialize_logging(args.verbose);

    if let Err(e) = run(args) {
        log::error!("{}", e);
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn initialize_logging(verbose: bool) {
    if let Err(e) = logging::init_logger(verbose) {
        eprintln!("Warning: logging disabled: {}", e);
    }
    log::info!("Application starting");
}

fn run(args: Args) -> Result<()> {
    let mut config = EngineConfig::load(args.config.as_deref())?;
    args.apply_overrides(&mut config);

    let (driver_tx, driver_rx) = unbounded();
    let driver = MidirDriver::new(&config.client_name, driver_tx)?;
    let (session_tx, session_rx) = unbounded();
    let mut session = MidiSession::new(driver, &config, session_tx)?;
    let (command_tx, command_rx) = unbounded();
    let event_loop = EventLoop::new(driver_rx, session_rx, command_rx);

    let result = match args.command {
        Command::List => {
            list_endpoints(&session);
            Ok(())
        }
        Command::Monitor { sources, all } => monitor(&mut session, &event_loop, &sources, all),
        Command::Receive {
            multiple, output, ..
        } => receive(&mut session, &event_loop, command_tx.clone(), multiple, output),
        Command::Send {
            file,
            destination,
            virtual_source,
            ..
        } => send(
            &mut session,
            &event_loop,
            &file,
            destination.as_deref(),
            virtual_source,
        ),
    };

    session.close();
    drop(command_tx);
    result
}

fn list_endpoints(session: &Session) {
    ui::print_source_groups(&session.source_groups(), &session.selected_sources());
    ui::print_destinations(
        &session.destinations(),
        session.selected_destination().as_ref(),
    );
}

fn monitor(session: &mut Session, event_loop: &EventLoop, sources: &[String], all: bool) -> Result<()> {
    let offered = session.all_sources();
    let selected = if all {
        offered
    } else if !sources.is_empty() {
        validate_sources(sources, &offered).map_err(MidiplexError::EndpointNotFound)?
    } else {
        restore_settings(session);
        let restored = session.selected_sources();
        if restored.is_empty() {
            offered
                .into_iter()
                .filter(|s| s.kind == ProviderKind::Port)
                .collect()
        } else {
            restored
        }
    };
    session.set_selected_sources(&selected);
    save_settings(session);

    let mut names: Vec<String> = session.selected_sources().iter().map(|s| s.to_string()).collect();
    names.sort();
    println!("Monitoring: {}", names.join(", "));
    println!("\nPress Ctrl+C to exit...");

    event_loop.run(session, |_, event| {
        match event {
            SessionEvent::Messages(messages) => {
                for message in &messages {
                    println!("{}", ui::format_message(message));
                }
            }
            SessionEvent::SourceListChanged => println!("-- sources changed --"),
            _ => {}
        }
        ControlFlow::Continue(())
    })
}

fn receive(
    session: &mut Session,
    event_loop: &EventLoop,
    commands: Sender<SessionCommand>,
    multiple: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    let spinner = ui::create_receive_spinner();
    if multiple {
        session.listen_for_multiple_messages();
        spinner.println("Press Enter when done.");
        thread::spawn(move || {
            let mut line = String::new();
            let _ = io::stdin().lock().read_line(&mut line);
            let _ = commands.send(SessionCommand::FinishListen);
        });
    } else {
        session.listen_for_one_message();
    }

    let mut received = Vec::new();
    event_loop.run(session, |_, event| match event {
        SessionEvent::ReadProgress(progress) => {
            ui::update_receive_spinner(&spinner, &progress);
            ControlFlow::Continue(())
        }
        SessionEvent::ReadFinished(messages) => {
            received = messages;
            ControlFlow::Break(())
        }
        _ => ControlFlow::Continue(()),
    })?;
    spinner.finish_with_message(ui::receive_message(&session.receive_progress()));

    if received.is_empty() {
        println!("No messages received.");
        return Ok(());
    }
    let path = output.unwrap_or_else(|| file::received_file_name(Local::now()));
    file::write_file(&path, &received)?;
    println!("Saved {} messages to {}", received.len(), path.display());
    Ok(())
}

fn send(
    session: &mut Session,
    event_loop: &EventLoop,
    path: &Path,
    destination: Option<&str>,
    virtual_source: bool,
) -> Result<()> {
    let messages = file::read_file(path)?;

    let destination = if virtual_source {
        OutputDestination::Virtual
    } else if let Some(name) = destination {
        validate_destination(name, &session.destinations()).map_err(MidiplexError::EndpointNotFound)?
    } else {
        restore_settings(session);
        prompt_for_destination(session)?
    };
    session.select_destination(destination.clone());
    save_settings(session);

    let bytes_to_send = messages.iter().map(|m| m.len()).sum();
    let bar = ui::create_send_progress(bytes_to_send);
    bar.println(format!("Sending {} to {}", path.display(), destination));
    session.send_sysex(messages);

    let mut outcome = None;
    event_loop.run(session, |session, event| match event {
        SessionEvent::SendProgress(progress) => {
            ui::update_send_progress(&bar, &progress);
            ControlFlow::Continue(())
        }
        SessionEvent::SendFinished { success, progress } => {
            ui::update_send_progress(&bar, &progress);
            outcome = Some((success, progress));
            ControlFlow::Break(())
        }
        SessionEvent::DestinationDisappeared(endpoint) => {
            bar.println(format!("{} went away", endpoint.name));
            session.cancel_sending();
            if let Some(next) = session.select_first_available_destination() {
                bar.println(format!("Output now goes to {}", next));
                save_settings(session);
            }
            ControlFlow::Continue(())
        }
        _ => ControlFlow::Continue(()),
    })?;

    match outcome {
        Some((true, progress)) => {
            bar.finish();
            println!("Sent {} messages", progress.message_count);
            Ok(())
        }
        Some((false, progress)) => {
            bar.abandon();
            Err(MidiplexError::Driver(format!(
                "send stopped after {} of {} bytes",
                progress.bytes_sent, progress.bytes_to_send
            )))
        }
        None => {
            bar.abandon();
            Ok(())
        }
    }
}

fn prompt_for_destination(session: &Session) -> Result<OutputDestination> {
    let destinations = session.destinations();
    let names: Vec<String> = destinations.iter().map(|d| d.to_string()).collect();
    let default = session
        .selected_destination()
        .and_then(|selected| destinations.iter().position(|d| *d == selected))
        .unwrap_or(0);

    let index = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Send to")
        .items(&names)
        .default(default)
        .interact()
        .map_err(|e| MidiplexError::Prompt(e.to_string()))?;
    Ok(destinations[index].clone())
}

fn settings_path() -> Option<PathBuf> {
    logging::log_dir()
        .ok()
        .and_then(|dir| dir.parent().map(|data| data.join("settings.json")))
}

fn restore_settings(session: &mut Session) {
    let Some(path) = settings_path() else {
        return;
    };
    let Ok(contents) = fs::read_to_string(&path) else {
        return;
    };
    match serde_json::from_str::<Value>(&contents) {
        Ok(settings) => {
            let missing = session.apply_persistent_settings(&settings);
            if !missing.is_empty() {
                println!("Could not find: {}", missing.join(", "));
            }
        }
        Err(e) => log::warn!("Ignoring unreadable settings {}: {}", path.display(), e),
    }
}

fn save_settings(session: &Session) {
    let Some(path) = settings_path() else {
        return;
    };
    let mut settings: Value = fs::read_to_string(&path)
        .ok()
        .and_then(|contents| serde_json::from_str(&contents).ok())
        .unwrap_or_else(|| Value::Object(Default::default()));

    if let (Value::Object(saved), Value::Object(current)) = (&mut settings, session.persistent_settings()) {
        saved.extend(current);
    }
    let written = serde_json::to_string_pretty(&settings)
        .map_err(MidiplexError::from)
        .and_then(|json| fs::write(&path, json).map_err(MidiplexError::from));
    if let Err(e) = written {
        log::warn!("Could not save settings to {}: {}", path.display(), e);
    }
}

