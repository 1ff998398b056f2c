// Zenoh runtime: commands in, telemetry and health out
// The serial bus is blocking and single-owner: every bus operation takes the
// arm lock inside spawn_blocking, so commands and telemetry never interleave
// on the wire.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{error, info, warn};

// local imports
use crate::arm::{ArmController, Diagnostic, MoveReport};
use crate::config::{
    ArmConfig, CMD_TIMEOUT, LOOP_HZ, TELEMETRY_EVERY_TICKS, TOPIC_CMD_ARM, TOPIC_HEALTH,
    TOPIC_TELEMETRY,
};
use crate::error::{ArmError, Result};
use crate::messages::{ArmCommand, ArmTelemetry, RuntimeHealth};
use crate::servo::{BusPort, SerialLink, ServoBus, SimulatedController};

pub type SharedArm = Arc<Mutex<ArmController<Box<dyn BusPort>>>>;

/// Options picked on the command line
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub config: ArmConfig,
    pub simulate: bool,
}

pub struct Runtime {
    queue: VecDeque<ArmCommand>,
    cmd_received_at: Option<Instant>,
    bus_fault: bool,
    health: RuntimeHealth,
    last_diagnostics: Vec<Diagnostic>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            cmd_received_at: None,
            bus_fault: false,
            health: RuntimeHealth::CmdStale, // Start stale until first cmd
            last_diagnostics: Vec::new(),
        }
    }

    /// Queue an incoming command. A newer motion command replaces any
    /// motion still waiting; only the latest target matters.
    pub fn on_command(&mut self, cmd: ArmCommand) {
        info!("Received command: {:?}", &cmd);
        if cmd.is_motion() {
            self.queue.retain(|queued| !queued.is_motion());
        }
        self.queue.push_back(cmd);
        self.cmd_received_at = Some(Instant::now());
    }

    pub fn take_commands(&mut self) -> Vec<ArmCommand> {
        self.queue.drain(..).collect()
    }

    /// Record the outcome of one executed command
    pub fn on_result(&mut self, result: &Result<Option<MoveReport>>) {
        match result {
            Ok(report) => {
                self.bus_fault = false;
                if let Some(report) = report {
                    self.last_diagnostics = report.diagnostics.clone();
                }
            }
            Err(e @ (ArmError::Unreachable { .. } | ArmError::InvalidArgument(_))) => {
                warn!("Command rejected: {}", e);
            }
            Err(e) => {
                error!("Bus failure: {}", e);
                self.bus_fault = true;
            }
        }
    }

    /// Health from bus state and command age
    pub fn update_health(&mut self) -> RuntimeHealth {
        let next = if self.bus_fault {
            RuntimeHealth::BusFault
        } else {
            match self.cmd_received_at {
                Some(at) if at.elapsed() <= CMD_TIMEOUT => RuntimeHealth::Ok,
                _ => RuntimeHealth::CmdStale,
            }
        };
        if next != self.health && next == RuntimeHealth::CmdStale {
            info!("Command stream stale, holding last pose");
        }
        self.health = next;
        next
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    pub fn last_diagnostics(&self) -> &[Diagnostic] {
        &self.last_diagnostics
    }
}

/// Run one command against the arm. Blocks on the bus.
///
/// A zero `duration_ms` on any motion command means the configured default.
pub fn execute(arm: &SharedArm, cmd: &ArmCommand, default_duration_ms: u16) -> Result<Option<MoveReport>> {
    let or_default = |duration_ms: u16| {
        if duration_ms == 0 {
            default_duration_ms
        } else {
            duration_ms
        }
    };

    let mut arm = arm.lock().unwrap_or_else(PoisonError::into_inner);
    match cmd {
        ArmCommand::Pose {
            wrist_roll,
            grip,
            duration_ms,
            steps,
            ..
        } => {
            let pose = cmd.pose().unwrap_or_default();
            let duration_ms = or_default(*duration_ms);
            match steps {
                Some(steps) if *steps > 1 => {
                    let total = Duration::from_millis(duration_ms as u64);
                    let mut reports = arm.interpolate_to(&pose, *wrist_roll, *grip, *steps, total)?;
                    Ok(reports.pop())
                }
                _ => arm.move_to(&pose, *wrist_roll, *grip, duration_ms).map(Some),
            }
        }
        ArmCommand::Joints {
            wrist_roll,
            grip,
            duration_ms,
            ..
        } => {
            let joints = cmd.joints().unwrap_or_default();
            arm.move_joints(joints, *wrist_roll, *grip, or_default(*duration_ms))
                .map(Some)
        }
        ArmCommand::Servos { duration_ms, .. } => {
            let targets = cmd.servo_targets()?;
            arm.move_servos(&targets, or_default(*duration_ms))?;
            Ok(None)
        }
        ArmCommand::Unload { servo_id } => {
            if servo_id.is_empty() {
                arm.unload_all()?;
            } else {
                arm.unload(servo_id)?;
            }
            Ok(None)
        }
    }
}

/// Read battery and positions. Failures leave the field empty.
pub fn read_telemetry(arm: &SharedArm) -> ArmTelemetry {
    let mut arm = arm.lock().unwrap_or_else(PoisonError::into_inner);
    let battery_v = arm
        .battery_voltage()
        .map_err(|e| warn!("Battery read failed: {}", e))
        .ok();
    let positions = arm
        .read_all_positions()
        .map_err(|e| warn!("Position read failed: {}", e))
        .unwrap_or_default();

    let servos = arm.servos();
    let joints = positions
        .iter()
        .filter_map(|(&id, &raw)| {
            servos
                .joint_for_id(id)
                .map(|joint| (joint, servos.channel(joint).to_angle(raw)))
        })
        .collect();

    ArmTelemetry {
        battery_v,
        positions,
        joints,
        last_pose: arm.last_pose(),
        diagnostics: Vec::new(),
    }
}

fn open_arm(options: &RunOptions) -> Result<SharedArm> {
    let config = &options.config;
    config.validate()?;

    let port: Box<dyn BusPort> = if options.simulate {
        info!("Using simulated servo controller");
        Box::new(SimulatedController::new())
    } else {
        info!("Opening servo controller on {} @ {} baud", config.port, config.baud_rate);
        Box::new(SerialLink::open(&config.port, config.baud_rate, config.bus_timing().timeout)?)
    };

    let bus = ServoBus::with_port(port, config.bus_timing());
    let arm = ArmController::new(bus, config.geometry, config.servos.clone())?;
    Ok(Arc::new(Mutex::new(arm)))
}

pub async fn run(options: RunOptions) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let arm = open_arm(&options)?;
    let default_duration_ms = options.config.default_duration_ms;

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CMD_ARM).await?;
    let pub_telemetry = session.declare_publisher(TOPIC_TELEMETRY).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut runtime = Runtime::new();
    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));
    let mut ticks: u64 = 0;

    info!(
        "Runtime started: {}Hz loop, {}ms command timeout",
        LOOP_HZ,
        CMD_TIMEOUT.as_millis()
    );
    info!("Subscribed to: {}", TOPIC_CMD_ARM);
    info!("Publishing to: {}, {}", TOPIC_TELEMETRY, TOPIC_HEALTH);

    // One listener for the whole run, so a signal during a blocking step is not lost
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = &mut ctrl_c => {
                info!("Shutting down runtime...");
                break;
            }
        }
        ticks += 1;

        // 1. Drain all pending commands (non-blocking)
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<ArmCommand>(&payload) {
                Ok(cmd) => runtime.on_command(cmd),
                Err(e) => warn!("Failed to parse command: {}", e),
            }
        }

        // 2. Execute queued commands in order, off the async executor
        for cmd in runtime.take_commands() {
            let arm = arm.clone();
            let result =
                tokio::task::spawn_blocking(move || execute(&arm, &cmd, default_duration_ms))
                    .await?;
            runtime.on_result(&result);
        }

        // 3. Publish telemetry at a lower rate
        if ticks % TELEMETRY_EVERY_TICKS == 0 {
            let arm = arm.clone();
            let mut telemetry = tokio::task::spawn_blocking(move || read_telemetry(&arm)).await?;
            telemetry.diagnostics = runtime.last_diagnostics().to_vec();
            pub_telemetry.put(serde_json::to_string(&telemetry)?).await?;
        }

        // 4. Publish health
        let health = runtime.update_health();
        pub_health.put(serde_json::to_string(&health)?).await?;
    }

    Ok(())
}
