use openarm_demo::demo::{self, SweepEvent};
use openarm_demo::{cli, SimulatedConnector, StopFlag};
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(
    name = "openarm-sweep",
    about = "Swing every motor ID from 1 to 15 in turn, skipping any that fail"
)]
struct Args {
    #[structopt(default_value = "can0")]
    interface: String,
    /// Motor IDs that never answer
    #[structopt(long, use_delimiter = true)]
    offline: Vec<u32>,
}

fn print_event(event: &SweepEvent) {
    match event {
        SweepEvent::Started { id, recv_id } => println!("\n--- ID {} (recv {}) ---", id, recv_id),
        SweepEvent::Done { id, .. } => println!("Done ID {}", id),
        SweepEvent::Skipped { id, error } => eprintln!("Skip ID {}: {}", id, error),
    }
}

async fn sweep(args: Args) -> anyhow::Result<()> {
    let stop = StopFlag::install()?;

    println!("=== OpenArm Full Sweep Demo (IDs 1..15) ===");
    println!("CAN interface: {}  FD: on", args.interface);
    println!("Press Ctrl+C to stop safely.");

    let connector = SimulatedConnector::with_offline(args.offline);
    demo::sweep(&connector, &args.interface, demo::SWEEP_IDS, &stop, print_event).await?;

    println!("\nFinished.");
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    cli::init_tracing();
    let args = Args::from_args();
    std::process::exit(cli::exit_code(sweep(args).await));
}
