//! Sinusoidal MIT-mode demos for the OpenArm.
//!
//! [`ControlLoop`] streams setpoints from a [`Trajectory`] to each
//! [`MotorGroup`] at a fixed tick and always leaves the motors held near
//! zero and disabled. Motor transport sits behind [`ArmBus`];
//! [`SimulatedArm`] implements it in-process.

mod error;

pub mod bus;
pub mod cli;
pub mod control_loop;
pub mod demo;
pub mod motor;
pub mod sim;
pub mod trajectory;

pub use bus::{safe_disable, ArmBus, Connector};
pub use control_loop::{
    ControlLoop, LoopConfig, LoopExit, LoopReport, MotorGroup, StopFlag, Telemetry,
};
pub use error::{Error, Result};
pub use motor::{
    CallbackMode, ControlMode, Gains, MitParam, MotorGroupSpec, MotorSpec, MotorState, MotorType,
};
pub use sim::{SimulatedArm, SimulatedConnector};
pub use trajectory::{sine, JointWave, SineTrajectory, Trajectory, WaveConfig};
