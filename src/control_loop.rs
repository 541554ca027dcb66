//! Fixed-cadence command loop.
//!
//! Every tick evaluates each group's trajectory at the elapsed time,
//! submits the commands, waits a bounded time for replies and, at a slower
//! cadence, hands a [`Telemetry`] snapshot to the caller. The tick sleep is
//! a fixed interval, so send and receive latency stretches the real period.
//!
//! Whatever ends the loop (deadline, tick limit, [`StopFlag`] or a bus
//! error) every group gets one hold command and is then disabled. Failures
//! during that teardown are logged and dropped.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info, warn};

use crate::bus::{safe_disable, ArmBus};
use crate::motor::{CallbackMode, MotorState};
use crate::trajectory::Trajectory;
use crate::{Error, Result};

/// Cancellation flag set from the signal handler and polled at tick
/// boundaries.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> StopFlag {
        StopFlag::default()
    }

    /// Route SIGINT and SIGTERM into a new flag. The handler only stores.
    pub fn install() -> Result<StopFlag> {
        let flag = StopFlag::new();
        let handle = flag.clone();
        ctrlc::set_handler(move || handle.stop())?;
        Ok(flag)
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A bus handle and the trajectory that drives it.
pub struct MotorGroup {
    name: String,
    bus: Box<dyn ArmBus>,
    trajectory: Box<dyn Trajectory>,
}

impl MotorGroup {
    pub fn new(
        name: impl Into<String>,
        bus: Box<dyn ArmBus>,
        trajectory: Box<dyn Trajectory>,
    ) -> MotorGroup {
        MotorGroup {
            name: name.into(),
            bus,
            trajectory,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bus(&self) -> &dyn ArmBus {
        self.bus.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopConfig {
    pub duration: Duration,
    pub tick: Duration,
    /// Bound on the per-group wait for replies after each command.
    pub recv_timeout: Duration,
    /// `None` disables telemetry.
    pub print_interval: Option<Duration>,
    pub max_ticks: Option<u64>,
    /// Wait for replies after enabling, before streaming starts.
    pub enable_timeout: Duration,
    /// Wait for replies after the hold command.
    pub settle_timeout: Duration,
    pub disable_timeout: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        LoopConfig {
            duration: Duration::from_secs(20),
            tick: Duration::from_millis(30),
            recv_timeout: Duration::from_millis(600),
            print_interval: Some(Duration::from_secs(1)),
            max_ticks: None,
            enable_timeout: Duration::from_millis(2000),
            settle_timeout: Duration::from_millis(700),
            disable_timeout: Duration::from_millis(1500),
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tick.is_zero() {
            return Err(Error::InvalidConfig("tick interval must be positive".into()));
        }
        if let Some(interval) = self.print_interval {
            if interval.is_zero() {
                return Err(Error::InvalidConfig("print interval must be positive".into()));
            }
        }
        Ok(())
    }

    /// Upper bound on ticks a run can execute.
    pub fn tick_bound(&self) -> u64 {
        let tick = self.tick.as_nanos().max(1);
        let by_time = (self.duration.as_nanos() + tick - 1) / tick;
        let by_time = u64::try_from(by_time).unwrap_or(u64::MAX);
        match self.max_ticks {
            Some(max) => by_time.min(max),
            None => by_time,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Elapsed,
    Stopped,
    TickLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopReport {
    pub ticks: u64,
    pub exit: LoopExit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupTelemetry {
    pub name: String,
    pub arm: Vec<MotorState>,
    pub gripper: Option<MotorState>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    /// seconds since the loop started
    pub elapsed: f64,
    pub groups: Vec<GroupTelemetry>,
}

impl Telemetry {
    fn capture(elapsed: f64, groups: &[MotorGroup]) -> Telemetry {
        Telemetry {
            elapsed,
            groups: groups
                .iter()
                .map(|group| GroupTelemetry {
                    name: group.name.clone(),
                    arm: group.bus.arm_states(),
                    gripper: group.bus.gripper_state(),
                })
                .collect(),
        }
    }
}

impl fmt::Display for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "t={:.3}", self.elapsed)?;
        for group in &self.groups {
            if group.arm.is_empty() && group.gripper.is_none() {
                write!(f, " {}: no motor state yet", group.name)?;
                continue;
            }
            for motor in group.arm.iter().chain(group.gripper.iter()) {
                write!(f, " {}:id{}={:.4}", group.name, motor.id, motor.position)?;
            }
        }
        Ok(())
    }
}

/// Switch every group into its running state: replies ignored while the
/// enable acknowledgements drain, then state tracking on.
pub async fn enable_groups(groups: &mut [MotorGroup], timeout: Duration) -> Result<()> {
    for group in groups.iter_mut() {
        group.bus.set_callback_mode_all(CallbackMode::Ignore);
    }
    for group in groups.iter_mut() {
        group.bus.enable_all().await?;
        info!(group = %group.name, interface = group.bus.interface(), "enabled");
    }
    for group in groups.iter_mut() {
        let replies = group.bus.recv_all(timeout).await?;
        debug!(group = %group.name, replies, "enable acknowledged");
    }
    for group in groups.iter_mut() {
        group.bus.set_callback_mode_all(CallbackMode::State);
    }
    Ok(())
}

/// Best-effort disable of every group, in order.
pub async fn disable_groups(groups: &mut [MotorGroup], timeout: Duration) {
    for group in groups.iter_mut() {
        safe_disable(group.bus.as_mut(), timeout).await;
    }
}

/// Hold near zero, let the joints settle, then disable. Never fails.
pub async fn teardown(groups: &mut [MotorGroup], settle: Duration, disable: Duration) {
    for group in groups.iter_mut() {
        let hold = group.trajectory.hold();
        if let Err(error) = group.bus.mit_control_all(&hold).await {
            warn!(group = %group.name, %error, "hold command failed");
        }
        if let Some(position) = group.trajectory.gripper_hold() {
            if let Err(error) = group.bus.set_gripper_position(position).await {
                warn!(group = %group.name, %error, "gripper hold failed");
            }
        }
    }
    for group in groups.iter_mut() {
        if let Err(error) = group.bus.recv_all(settle).await {
            warn!(group = %group.name, %error, "no reply to hold command");
        }
    }
    disable_groups(groups, disable).await;
}

pub struct ControlLoop {
    config: LoopConfig,
}

impl ControlLoop {
    pub fn new(config: LoopConfig) -> Result<ControlLoop> {
        config.validate()?;
        Ok(ControlLoop { config })
    }

    /// Enable the groups and run the loop. If enabling fails anywhere every
    /// group is disabled before the error is returned.
    pub async fn execute<F>(
        &self,
        groups: &mut [MotorGroup],
        stop: &StopFlag,
        report: F,
    ) -> Result<LoopReport>
    where
        F: FnMut(&Telemetry),
    {
        if let Err(error) = enable_groups(groups, self.config.enable_timeout).await {
            warn!(%error, "enable failed, disabling all groups");
            disable_groups(groups, self.config.disable_timeout).await;
            return Err(error);
        }
        self.run(groups, stop, report).await
    }

    /// Stream setpoints to already enabled groups, then tear down.
    pub async fn run<F>(
        &self,
        groups: &mut [MotorGroup],
        stop: &StopFlag,
        mut report: F,
    ) -> Result<LoopReport>
    where
        F: FnMut(&Telemetry),
    {
        let outcome = self.stream(groups, stop, &mut report).await;
        teardown(
            groups,
            self.config.settle_timeout,
            self.config.disable_timeout,
        )
        .await;
        match &outcome {
            Ok(summary) => info!(ticks = summary.ticks, exit = ?summary.exit, "loop finished"),
            Err(error) => warn!(%error, "loop aborted"),
        }
        outcome
    }

    async fn stream<F>(
        &self,
        groups: &mut [MotorGroup],
        stop: &StopFlag,
        report: &mut F,
    ) -> Result<LoopReport>
    where
        F: FnMut(&Telemetry),
    {
        let start = Instant::now();
        // durations past the clock's range mean no deadline
        let deadline = start.checked_add(self.config.duration);
        let mut next_print = Some(start);
        let mut ticks = 0;

        let exit = loop {
            if stop.is_stopped() {
                break LoopExit::Stopped;
            }
            if deadline.map_or(false, |deadline| Instant::now() >= deadline) {
                break LoopExit::Elapsed;
            }
            if self.config.max_ticks.map_or(false, |max| ticks >= max) {
                break LoopExit::TickLimit;
            }

            let t = start.elapsed().as_secs_f64();
            for group in groups.iter_mut() {
                let commands = group.trajectory.arm(t);
                group.bus.mit_control_all(&commands).await?;
                if let Some(position) = group.trajectory.gripper(t) {
                    group.bus.set_gripper_position(position).await?;
                }
            }
            for group in groups.iter_mut() {
                let replies = group.bus.recv_all(self.config.recv_timeout).await?;
                if replies == 0 {
                    debug!(group = %group.name, tick = ticks, "no state this tick");
                }
            }
            ticks += 1;

            if let (Some(interval), Some(due)) = (self.config.print_interval, next_print) {
                let now = Instant::now();
                if now >= due {
                    report(&Telemetry::capture(t, groups));
                    next_print = now.checked_add(interval);
                }
            }

            sleep(self.config.tick).await;
        };

        Ok(LoopReport { ticks, exit })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::motor::{ControlMode, Gains, MitParam, MotorGroupSpec, MotorSpec};
    use crate::trajectory::{JointWave, SineTrajectory};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Event {
        Callback(CallbackMode),
        Enable,
        Disable,
        Command(Vec<MitParam>),
        Gripper(f64),
        Recv,
    }

    /// Records every call; optionally fails or raises a stop flag.
    pub(crate) struct MockBus {
        pub(crate) events: Arc<Mutex<Vec<Event>>>,
        pub(crate) fail_enable: bool,
        pub(crate) fail_command_at: Option<usize>,
        pub(crate) stop_at_command: Option<(usize, StopFlag)>,
        commands: usize,
        motors: usize,
    }

    impl MockBus {
        pub(crate) fn new(motors: usize) -> (MockBus, Arc<Mutex<Vec<Event>>>) {
            let events = Arc::new(Mutex::new(vec![]));
            (
                MockBus {
                    events: events.clone(),
                    fail_enable: false,
                    fail_command_at: None,
                    stop_at_command: None,
                    commands: 0,
                    motors,
                },
                events,
            )
        }

        fn push(&self, event: Event) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[async_trait]
    impl ArmBus for MockBus {
        fn interface(&self) -> &str {
            "mock0"
        }

        fn init_arm_motors(&mut self, group: MotorGroupSpec) -> Result<()> {
            self.motors = group.len();
            Ok(())
        }

        fn init_gripper_motor(&mut self, _motor: MotorSpec, _mode: ControlMode) -> Result<()> {
            Ok(())
        }

        fn set_gripper_limit(&mut self, _speed: f64, _torque: f64) -> Result<()> {
            Ok(())
        }

        fn set_callback_mode_all(&mut self, mode: CallbackMode) {
            self.push(Event::Callback(mode));
        }

        async fn enable_all(&mut self) -> Result<()> {
            self.push(Event::Enable);
            if self.fail_enable {
                return Err(Error::NoResponse(1));
            }
            Ok(())
        }

        async fn disable_all(&mut self) -> Result<()> {
            self.push(Event::Disable);
            Err(Error::NotEnabled("mock0".into()))
        }

        async fn mit_control_all(&mut self, params: &[MitParam]) -> Result<()> {
            self.push(Event::Command(params.to_vec()));
            self.commands += 1;
            if let Some((at, stop)) = &self.stop_at_command {
                if self.commands == *at {
                    stop.stop();
                }
            }
            if self.fail_command_at == Some(self.commands) {
                return Err(Error::NotEnabled("mock0".into()));
            }
            if params.len() != self.motors {
                return Err(Error::CommandCount {
                    expected: self.motors,
                    got: params.len(),
                });
            }
            Ok(())
        }

        async fn set_gripper_position(&mut self, position: f64) -> Result<()> {
            self.push(Event::Gripper(position));
            Ok(())
        }

        async fn recv_all(&mut self, _timeout: Duration) -> Result<usize> {
            self.push(Event::Recv);
            Ok(self.motors)
        }

        fn arm_states(&self) -> Vec<MotorState> {
            (0..self.motors as u32).map(MotorState::new).collect()
        }

        fn gripper_state(&self) -> Option<MotorState> {
            None
        }
    }

    fn trajectory(joints: usize) -> Box<dyn Trajectory> {
        Box::new(SineTrajectory::new(
            0.3,
            Gains::default(),
            vec![JointWave::new(0.7, 0.0, 0.0); joints],
        ))
    }

    fn config(duration_ms: u64, tick_ms: u64) -> LoopConfig {
        LoopConfig {
            duration: Duration::from_millis(duration_ms),
            tick: Duration::from_millis(tick_ms),
            ..Default::default()
        }
    }

    fn count(events: &Arc<Mutex<Vec<Event>>>, wanted: &Event) -> usize {
        events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| std::mem::discriminant(*event) == std::mem::discriminant(wanted))
            .count()
    }

    fn last_command(events: &Arc<Mutex<Vec<Event>>>) -> Vec<MitParam> {
        events
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find_map(|event| match event {
                Event::Command(cmds) => Some(cmds.clone()),
                _ => None,
            })
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_exit_tears_down_once() {
        let (bus, events) = MockBus::new(2);
        let mut groups = vec![MotorGroup::new("arm", Box::new(bus), trajectory(2))];
        let control = ControlLoop::new(config(1000, 30)).unwrap();
        let report = control
            .run(&mut groups, &StopFlag::new(), |_| {})
            .await
            .unwrap();

        assert_eq!(report.exit, LoopExit::Elapsed);
        assert_eq!(count(&events, &Event::Disable), 1);
        let hold = last_command(&events);
        assert!(hold.iter().all(|cmd| cmd.q == 0.0 && cmd.kp == 6.0));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_exit_tears_down_once() {
        let (bus, events) = MockBus::new(2);
        let stop = StopFlag::new();
        stop.stop();
        let mut groups = vec![MotorGroup::new("arm", Box::new(bus), trajectory(2))];
        let control = ControlLoop::new(config(1000, 30)).unwrap();
        let report = control.run(&mut groups, &stop, |_| {}).await.unwrap();

        assert_eq!(report, LoopReport { ticks: 0, exit: LoopExit::Stopped });
        assert_eq!(count(&events, &Event::Disable), 1);
        assert_eq!(count(&events, &Event::Command(vec![])), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_mid_tick_finishes_tick() {
        let stop = StopFlag::new();
        let (mut bus, events) = MockBus::new(1);
        bus.stop_at_command = Some((3, stop.clone()));
        let mut groups = vec![MotorGroup::new("arm", Box::new(bus), trajectory(1))];
        let control = ControlLoop::new(config(10_000, 30)).unwrap();
        let report = control.run(&mut groups, &stop, |_| {}).await.unwrap();

        assert_eq!(report, LoopReport { ticks: 3, exit: LoopExit::Stopped });
        // three ticks of receive plus the settle wait
        assert_eq!(count(&events, &Event::Recv), 4);
        assert_eq!(count(&events, &Event::Disable), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_duration_runs_until_stopped() {
        let stop = StopFlag::new();
        let (mut bus, events) = MockBus::new(1);
        bus.stop_at_command = Some((2, stop.clone()));
        let mut groups = vec![MotorGroup::new("arm", Box::new(bus), trajectory(1))];
        let cfg = LoopConfig {
            duration: Duration::from_secs(u64::MAX),
            print_interval: Some(Duration::from_secs(u64::MAX)),
            ..Default::default()
        };
        let control = ControlLoop::new(cfg).unwrap();
        let mut samples = 0;
        let report = control
            .execute(&mut groups, &stop, |_| samples += 1)
            .await
            .unwrap();

        assert_eq!(report, LoopReport { ticks: 2, exit: LoopExit::Stopped });
        assert_eq!(samples, 1);
        assert_eq!(count(&events, &Event::Disable), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_count_is_bounded() {
        let (bus, _events) = MockBus::new(1);
        let mut groups = vec![MotorGroup::new("arm", Box::new(bus), trajectory(1))];
        let cfg = config(1000, 30);
        let bound = cfg.tick_bound();
        let control = ControlLoop::new(cfg).unwrap();
        let report = control
            .run(&mut groups, &StopFlag::new(), |_| {})
            .await
            .unwrap();

        assert_eq!(bound, 34);
        assert!(report.ticks <= bound + 1, "ticks={}", report.ticks);
        assert!(report.ticks >= bound - 1, "ticks={}", report.ticks);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_limit_ends_loop() {
        let (bus, _events) = MockBus::new(1);
        let mut groups = vec![MotorGroup::new("arm", Box::new(bus), trajectory(1))];
        let mut cfg = config(60_000, 50);
        cfg.max_ticks = Some(140);
        let control = ControlLoop::new(cfg).unwrap();
        let report = control
            .run(&mut groups, &StopFlag::new(), |_| {})
            .await
            .unwrap();
        assert_eq!(report, LoopReport { ticks: 140, exit: LoopExit::TickLimit });
    }

    #[tokio::test(start_paused = true)]
    async fn runtime_error_still_tears_down() {
        let (mut bus, events) = MockBus::new(1);
        bus.fail_command_at = Some(5);
        let mut groups = vec![MotorGroup::new("arm", Box::new(bus), trajectory(1))];
        let control = ControlLoop::new(config(10_000, 30)).unwrap();
        let result = control.run(&mut groups, &StopFlag::new(), |_| {}).await;

        assert!(matches!(result, Err(Error::NotEnabled(_))));
        assert_eq!(count(&events, &Event::Disable), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn mismatched_trajectory_is_rejected() {
        let (bus, events) = MockBus::new(2);
        let mut groups = vec![MotorGroup::new("arm", Box::new(bus), trajectory(3))];
        let control = ControlLoop::new(config(1000, 30)).unwrap();
        let result = control.run(&mut groups, &StopFlag::new(), |_| {}).await;

        assert!(matches!(
            result,
            Err(Error::CommandCount { expected: 2, got: 3 })
        ));
        assert_eq!(count(&events, &Event::Disable), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn telemetry_follows_print_interval() {
        let (bus, _events) = MockBus::new(2);
        let mut groups = vec![MotorGroup::new("arm", Box::new(bus), trajectory(2))];
        let control = ControlLoop::new(config(3000, 30)).unwrap();
        let mut samples = vec![];
        control
            .run(&mut groups, &StopFlag::new(), |sample| samples.push(sample.clone()))
            .await
            .unwrap();

        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].elapsed, 0.0);
        assert_eq!(samples[1].groups[0].arm.len(), 2);
        assert!(samples[1].to_string().starts_with("t=1.0"));
    }

    #[tokio::test(start_paused = true)]
    async fn enable_failure_disables_every_group() {
        let (first, first_events) = MockBus::new(1);
        let (mut second, second_events) = MockBus::new(1);
        second.fail_enable = true;
        let mut groups = vec![
            MotorGroup::new("right", Box::new(first), trajectory(1)),
            MotorGroup::new("left", Box::new(second), trajectory(1)),
        ];
        let control = ControlLoop::new(config(1000, 30)).unwrap();
        let result = control
            .execute(&mut groups, &StopFlag::new(), |_| {})
            .await;

        assert!(matches!(result, Err(Error::NoResponse(1))));
        assert_eq!(count(&first_events, &Event::Disable), 1);
        assert_eq!(count(&second_events, &Event::Disable), 1);
        assert_eq!(count(&first_events, &Event::Command(vec![])), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn enable_sequence_switches_callback_mode() {
        let (bus, events) = MockBus::new(1);
        let mut groups = vec![MotorGroup::new("arm", Box::new(bus), trajectory(1))];
        enable_groups(&mut groups, Duration::from_millis(2000))
            .await
            .unwrap();
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                Event::Callback(CallbackMode::Ignore),
                Event::Enable,
                Event::Recv,
                Event::Callback(CallbackMode::State),
            ]
        );
    }

    #[test]
    fn zero_tick_is_invalid() {
        let cfg = LoopConfig {
            tick: Duration::ZERO,
            ..Default::default()
        };
        assert!(ControlLoop::new(cfg).is_err());
    }

    #[test]
    fn telemetry_without_state_says_so() {
        let sample = Telemetry {
            elapsed: 0.5,
            groups: vec![GroupTelemetry {
                name: "can0".into(),
                arm: vec![],
                gripper: None,
            }],
        };
        assert_eq!(sample.to_string(), "t=0.500 can0: no motor state yet");
    }
}
