use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "openarm_demo=info,warn";

/// Log to stderr so progress lines on stdout stay readable. `RUST_LOG`
/// overrides the default filter.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    // a subscriber may already be installed when demos are driven from tests
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Map a demo outcome to an exit status, printing the error chain on failure.
pub fn exit_code(outcome: anyhow::Result<()>) -> i32 {
    match outcome {
        Ok(()) => 0,
        Err(error) => {
            eprintln!("Error: {:#}", error);
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn success_exits_zero() {
        assert_eq!(exit_code(Ok(())), 0);
    }

    #[test]
    fn failure_exits_one() {
        let outcome: anyhow::Result<()> =
            Err(anyhow::anyhow!("no reply")).context("setting up motors on can0");
        assert_eq!(exit_code(outcome), 1);
    }
}
