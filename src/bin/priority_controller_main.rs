// priority_controller_main.rs
use clap::Parser;
use signal_priority::communication::messages::Fanout;
use signal_priority::config::{sim_home, Scenario};
use signal_priority::control_system::controller::{PriorityController, PriorityPolicy};
use signal_priority::global_variables::{DEFAULT_SCENARIO_FILE, EVENTS_CSV, FRAMES_DIR};
use signal_priority::monitoring::amqp::{publish_events_rabbitmq, AmqpEventSink};
use signal_priority::monitoring::csv_log::CsvEventLog;
use signal_priority::monitoring::log_sink::LogSink;
use signal_priority::simulation_engine::simulation::{Backend, Simulation};
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "priority-controller")]
#[command(about = "Give emergency vehicles a green wave through a simulated junction", long_about = None)]
struct Args {
    /// Render junction frames under $SIM_HOME/frames (the default)
    #[arg(long, overrides_with = "no_gui")]
    gui: bool,

    /// Run without rendering
    #[arg(long = "no-gui", overrides_with = "gui")]
    no_gui: bool,

    /// Scenario file describing the network, signal program and traffic
    #[arg(short, long, default_value = DEFAULT_SCENARIO_FILE)]
    scenario: PathBuf,

    /// Event log; defaults to $SIM_HOME/priority_events.csv
    #[arg(long)]
    events_csv: Option<PathBuf>,

    /// Also publish events to RabbitMQ
    #[arg(long)]
    amqp: bool,

    /// Replace the scenario's random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Steps between rendered frames
    #[arg(long, default_value = "10")]
    frame_every: u64,
}

type BoxError = Box<dyn Error + Send + Sync>;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), BoxError> {
    // both preconditions are checked before anything starts
    let home = sim_home()?;
    let mut scenario = Scenario::load(&args.scenario)?;
    if let Some(seed) = args.seed {
        scenario.simulation.seed = seed;
    }
    let topology = scenario.topology()?;

    let visual = args.gui || !args.no_gui;
    let backend = if visual {
        Backend::Visual {
            frames_dir: home.join(FRAMES_DIR),
            every_steps: args.frame_every,
        }
    } else {
        Backend::Headless
    };
    let simulation = Simulation::new(&scenario, topology.clone(), backend)?;
    let policy = PriorityPolicy::new(
        &scenario.intersection_id,
        topology,
        scenario.controller.clone(),
    );

    let csv_path = args.events_csv.unwrap_or_else(|| home.join(EVENTS_CSV));
    let mut sinks = Fanout::new()
        .with(LogSink)
        .with(CsvEventLog::new(csv_path));
    let publisher = if args.amqp {
        let (sink, rx) = AmqpEventSink::channel();
        sinks = sinks.with(sink);
        Some(tokio::spawn(publish_events_rabbitmq(rx)))
    } else {
        None
    };

    // dropping the controller closes the publisher's channel
    let summary = tokio::task::spawn_blocking(move || {
        let mut controller = PriorityController::new(simulation, policy, sinks);
        controller.run()
    })
    .await??;

    if let Some(handle) = publisher {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("Event publishing failed: {}", e),
            Err(e) => log::warn!("Event publisher did not finish: {}", e),
        }
    }

    println!(
        "Simulation ended at {:.1}s after {} steps",
        summary.final_time_s, summary.steps
    );
    println!(
        "Total emergency vehicles processed: {}",
        summary.processed_vehicles.len()
    );
    for id in &summary.processed_vehicles {
        println!("  - {}", id);
    }
    Ok(())
}
