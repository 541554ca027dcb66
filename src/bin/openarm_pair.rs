use anyhow::Context;
use openarm_demo::{cli, demo, ControlLoop, SimulatedConnector, StopFlag, WaveConfig};
use structopt::StructOpt;
use tokio::time::Duration;

#[derive(StructOpt, Debug)]
#[structopt(name = "openarm-pair", about = "Swing joints 7 and 8 of one arm in antiphase")]
struct Args {
    /// Swing amplitude in radians
    #[structopt(default_value = "0.7")]
    amplitude: f64,
    /// Swing frequency in Hz
    #[structopt(default_value = "0.30")]
    frequency: f64,
    /// Run time in seconds
    #[structopt(default_value = "20")]
    duration: u64,
    #[structopt(long, default_value = "can1")]
    interface: String,
    /// Motor IDs that never answer
    #[structopt(long, use_delimiter = true)]
    offline: Vec<u32>,
}

async fn pair(args: Args) -> anyhow::Result<()> {
    let wave = WaveConfig::new(args.amplitude, args.frequency)?;
    let stop = StopFlag::install()?;

    println!("=== OpenArm {} ID7,8 Demo ===", args.interface);
    println!(
        "amp={} rad, freq={} Hz, duration={} s",
        wave.amplitude, wave.frequency, args.duration
    );

    let connector = SimulatedConnector::with_offline(args.offline);
    let mut groups = demo::pair_groups(&connector, &args.interface, wave)
        .with_context(|| format!("setting up motors on {}", args.interface))?;
    let control = ControlLoop::new(demo::pair_config(Duration::from_secs(args.duration)))?;
    control
        .execute(&mut groups, &stop, |sample| println!("{}", sample))
        .await?;

    println!("Done.");
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    cli::init_tracing();
    let args = Args::from_args();
    std::process::exit(cli::exit_code(pair(args).await));
}
