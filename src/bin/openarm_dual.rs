use anyhow::Context;
use openarm_demo::{cli, demo, ControlLoop, SimulatedConnector, StopFlag, WaveConfig};
use structopt::StructOpt;
use tokio::time::Duration;

#[derive(StructOpt, Debug)]
#[structopt(
    name = "openarm-dual",
    about = "Swing the even joints of the right arm and the odd joints of the left arm"
)]
struct Args {
    /// Amplitude scale applied to the per-joint swing table
    #[structopt(default_value = "1.2")]
    amplitude: f64,
    /// Swing frequency in Hz
    #[structopt(default_value = "0.35")]
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

fn id_list(ids: &[u32]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

async fn dual(args: Args) -> anyhow::Result<()> {
    let wave = WaveConfig::new(args.amplitude, args.frequency)?;
    let stop = StopFlag::install()?;

    println!("=== OpenArm Dual Full Demo ===");
    println!("{} fixed IDs: {}", args.right, id_list(&demo::DUAL_RIGHT_IDS));
    println!("{} fixed IDs: {}", args.left, id_list(&demo::DUAL_LEFT_IDS));
    println!(
        "amp={} rad, freq={} Hz, duration={} s",
        wave.amplitude, wave.frequency, args.duration
    );
    println!("Ctrl+C to stop safely");

    let connector = SimulatedConnector::with_offline(args.offline);
    let mut groups = demo::dual_groups(&connector, &args.right, &args.left, wave)
        .context("setting up both arms")?;
    let control = ControlLoop::new(demo::dual_config(Duration::from_secs(args.duration)))?;
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
    std::process::exit(cli::exit_code(dual(args).await));
}
