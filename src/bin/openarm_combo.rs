use anyhow::Context;
use openarm_demo::{cli, demo, ControlLoop, SimulatedConnector, StopFlag, WaveConfig};
use structopt::StructOpt;
use tokio::time::Duration;

#[derive(StructOpt, Debug)]
#[structopt(
    name = "openarm-combo",
    about = "Swing joints 2, 4 and 6 on both arms while cycling both grippers"
)]
struct Args {
    /// Amplitude scale in radians
    #[structopt(default_value = "1.0")]
    amplitude: f64,
    /// Swing frequency in Hz
    #[structopt(default_value = "0.30")]
    frequency: f64,
    /// Run time in seconds
    #[structopt(default_value = "30")]
    duration: u64,
    #[structopt(long, default_value = "can0")]
    right: String,
    #[structopt(long, default_value = "can1")]
    left: String,
    /// Motor IDs that never answer
    #[structopt(long, use_delimiter = true)]
    offline: Vec<u32>,
}

async fn combo(args: Args) -> anyhow::Result<()> {
    let wave = WaveConfig::new(args.amplitude, args.frequency)?;
    let stop = StopFlag::install()?;

    println!("=== Combo Demo: Even IDs on Both Arms ===");
    println!(
        "right arm: {} IDs2/4/6 + gripper8, left arm: {} IDs2/4/6 + gripper8",
        args.right, args.left
    );
    println!(
        "amp={} rad, freq={} Hz, duration={} s",
        wave.amplitude, wave.frequency, args.duration
    );

    let connector = SimulatedConnector::with_offline(args.offline);
    let mut groups = demo::combo_groups(&connector, &args.right, &args.left, wave)
        .context("setting up arms and grippers")?;
    let control = ControlLoop::new(demo::combo_config(Duration::from_secs(args.duration)))?;
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
    std::process::exit(cli::exit_code(combo(args).await));
}
