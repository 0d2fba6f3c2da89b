use std::{
    error::Error,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::RecvTimeoutError,
    },
    time::Duration,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use svcmgr::{
    cli::{Cli, Commands, parse_args},
    monitor::{Monitor, ServiceEvent},
    registry::Registry,
    supervisor::Supervisor,
};

fn main() {
    let args = parse_args();
    init_logging(&args);

    if let Err(err) = run(args) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run(args: Cli) -> Result<(), Box<dyn Error>> {
    let registry_path = args
        .registry
        .clone()
        .unwrap_or_else(Registry::default_path);
    let registry = Registry::load(registry_path)?;
    let supervisor = Arc::new(Supervisor::with_system_probe(registry));

    match args.command {
        Commands::Add { name, command } => {
            supervisor.add_service(&name, &command)?;
            println!("Added service '{name}'");
        }
        Commands::Remove { name } => {
            supervisor.remove_service(&name)?;
            println!("Removed service '{name}'");
        }
        Commands::Update { name, command } => {
            supervisor.update_command(&name, &command)?;
            println!("Updated service '{name}'");
        }
        Commands::List => {
            list_services(&supervisor);
        }
        Commands::Run { services } => {
            run_foreground(supervisor, services)?;
        }
    }

    Ok(())
}

fn init_logging(args: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn list_services(supervisor: &Supervisor) {
    let definitions = supervisor.definitions();
    if definitions.is_empty() {
        println!("No services registered.");
        return;
    }

    for definition in definitions {
        let name = &definition.name;
        let state = if supervisor.is_running(name) {
            let pid = supervisor
                .get_pid(name)
                .map(|p| p.to_string())
                .unwrap_or_else(|| "?".to_string());
            let ports = supervisor.listening_ports(name);
            if ports.is_empty() {
                format!("running (pid {pid})")
            } else {
                let ports = ports
                    .iter()
                    .map(|p| format!(":{p}"))
                    .collect::<Vec<_>>()
                    .join(" ");
                format!("running (pid {pid}, {ports})")
            }
        } else {
            "stopped".to_string()
        };

        println!("{name}\t{state}\t{}", definition.command);
        if let Some(message) = supervisor.get_error(name) {
            println!("  ! {message}");
        }
    }
}

fn run_foreground(
    supervisor: Arc<Supervisor>,
    services: Vec<String>,
) -> Result<(), Box<dyn Error>> {
    let names: Vec<String> = if services.is_empty() {
        supervisor
            .definitions()
            .into_iter()
            .map(|d| d.name)
            .collect()
    } else {
        services
    };

    if names.is_empty() {
        println!("No services to run.");
        return Ok(());
    }

    for name in &names {
        if supervisor.start(name) {
            info!("Started service '{name}'");
        } else {
            let message = supervisor
                .get_error(name)
                .unwrap_or_else(|| "unknown failure".to_string());
            error!("Failed to start '{name}': {message}");
            eprintln!("{name}: {message}");
        }
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        shutdown_flag.store(true, Ordering::SeqCst);
    })?;

    let (monitor, events) = Monitor::spawn(Arc::clone(&supervisor));
    println!("Supervising {} service(s); Ctrl-C to stop.", names.len());

    while !shutdown.load(Ordering::SeqCst) {
        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(ServiceEvent::Exited { name }) => {
                let message = supervisor
                    .get_error(&name)
                    .unwrap_or_else(|| "process exited".to_string());
                eprintln!("{name}: {message}");
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    println!("Shutting down...");
    monitor.shutdown();
    supervisor.stop_all();
    Ok(())
}
